//! Pipeline orchestrator.
//!
//! One request walks `Received → Sampling ⇄ Detecting → Aggregating → Crediting → Done`, or
//! drops to `Failed` from any earlier stage. Detection is the only step that waits on a
//! shared resource (the detector pool); crediting is the only step with a side effect, so a
//! request that fails before `Crediting` leaves every balance untouched.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::config::{BackendKind, DetectorSettings, RewardsConfig, SamplingSettings};
use crate::detect::{DetectorBackend, DetectorPool, RawPrediction, StubBackend};
use crate::error::PipelineError;
use crate::filter::{Detection, FrameFilter, FrameResult};
use crate::frame::Frame;
use crate::ingest::{self, MediaKind, SampledFrames, VideoSource, VideoStream};
use crate::ledger::PointsLedger;
use crate::reward::{Award, FrameDetections, RewardPolicy, VideoTally};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Received,
    Sampling,
    Detecting,
    Aggregating,
    Crediting,
    Done,
    Failed,
}

impl Stage {
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        match (self, next) {
            (Done, _) | (Failed, _) => false,
            (_, Failed) => true,
            (Received, Sampling)
            | (Sampling, Detecting)
            | (Detecting, Sampling)
            | (Sampling, Aggregating)
            | (Aggregating, Crediting)
            | (Crediting, Done) => true,
            _ => false,
        }
    }
}

/// Outcome of one processed upload.
#[derive(Clone, Debug, Serialize)]
pub struct MediaResult {
    pub user_id: String,
    #[serde(flatten)]
    pub detail: MediaDetail,
    /// Credited units under the media kind's policy.
    pub unit_count: u64,
    /// Qualifying detections; for videos, summed over sampled frames.
    pub bottles_detected: u64,
    pub frames_sampled: u64,
    pub points_earned: u64,
    /// Balance returned by the ledger after this credit.
    pub total_points: u64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "media_kind", rename_all = "snake_case")]
pub enum MediaDetail {
    Image { bottle_locations: Vec<Detection> },
    /// Only frames holding at least one detection.
    Video { bottle_frames: Vec<FrameDetections> },
}

impl MediaResult {
    pub fn media_kind(&self) -> MediaKind {
        match self.detail {
            MediaDetail::Image { .. } => MediaKind::Image,
            MediaDetail::Video { .. } => MediaKind::Video,
        }
    }
}

pub struct RewardPipeline {
    filter: FrameFilter,
    policy: RewardPolicy,
    sampling: SamplingSettings,
    detectors: Arc<DetectorPool>,
    ledger: Arc<PointsLedger>,
}

impl RewardPipeline {
    pub fn new(
        config: &RewardsConfig,
        detectors: Arc<DetectorPool>,
        ledger: Arc<PointsLedger>,
    ) -> Self {
        Self {
            filter: FrameFilter::from(&config.scoring),
            policy: RewardPolicy::from(&config.scoring),
            sampling: config.sampling.clone(),
            detectors,
            ledger,
        }
    }

    /// Build the detector pool the config asks for and an empty ledger.
    pub fn from_config(config: &RewardsConfig) -> Result<Self> {
        let pool = build_detector_pool(&config.detector)?;
        Ok(Self::new(
            config,
            Arc::new(pool),
            Arc::new(PointsLedger::new()),
        ))
    }

    pub fn ledger(&self) -> &PointsLedger {
        &self.ledger
    }

    pub fn detectors(&self) -> &DetectorPool {
        &self.detectors
    }

    /// Score a decoded image. The frame is analyzed as frame 1.
    pub fn process_image(&self, frame: Frame, user_id: &str) -> Result<MediaResult, PipelineError> {
        let frames = std::iter::once(Ok(frame.with_index(1)));
        self.run(MediaKind::Image, frames, user_id)
    }

    /// Score an opened video stream, sampling every `frame_stride`-th frame.
    pub fn process_video<S: VideoStream>(
        &self,
        stream: S,
        user_id: &str,
    ) -> Result<MediaResult, PipelineError> {
        let frames = SampledFrames::new(stream, self.sampling.frame_stride);
        self.run(MediaKind::Video, frames, user_id)
    }

    /// Decode or open the file at `path` and score it. The media kind comes from
    /// `content_type` when given, else from the file extension.
    pub fn process_path(
        &self,
        path: &Path,
        content_type: Option<&str>,
        user_id: &str,
    ) -> Result<MediaResult, PipelineError> {
        let kind = match content_type {
            Some(content_type) => MediaKind::from_content_type(content_type)?,
            None => MediaKind::from_path(path)?,
        };
        match kind {
            MediaKind::Image => {
                let frame = ingest::load_image(path).inspect_err(|e| {
                    log::warn!("rejecting upload for '{}': {}", user_id, e);
                })?;
                self.process_image(frame, user_id)
            }
            MediaKind::Video => {
                let location = path.to_str().ok_or_else(|| {
                    PipelineError::InvalidMedia(format!("{} is not valid UTF-8", path.display()))
                })?;
                let source = VideoSource::open(location).inspect_err(|e| {
                    log::warn!("rejecting upload for '{}': {}", user_id, e);
                })?;
                self.process_video(source, user_id)
            }
        }
    }

    fn run<I>(&self, kind: MediaKind, frames: I, user_id: &str) -> Result<MediaResult, PipelineError>
    where
        I: Iterator<Item = Result<Frame, PipelineError>>,
    {
        let mut trace = RequestTrace::new(user_id, kind);
        let frame_limit = match kind {
            MediaKind::Image => None,
            MediaKind::Video => self.sampling.max_sampled_frames,
        };
        let mut tally = Tally::new(kind, &self.policy);

        trace.advance(Stage::Sampling);
        for next in frames {
            let frame = next.map_err(|e| trace.fail(e))?;
            if let Some(limit) = frame_limit {
                if tally.frames_sampled() >= limit {
                    return Err(trace.fail(PipelineError::FrameLimitExceeded { limit }));
                }
            }

            trace.advance(Stage::Detecting);
            let predictions = self.detect(&frame).map_err(|e| trace.fail(e))?;
            let result = self.filter.apply(frame.index, &predictions);
            drop(frame);
            tally.push(result);
            trace.advance(Stage::Sampling);
        }

        trace.advance(Stage::Aggregating);
        let outcome = tally.finish(&self.policy);

        trace.advance(Stage::Crediting);
        let total_points = self
            .ledger
            .credit_and_get(user_id, outcome.award.points)
            .map_err(|e| trace.fail(e))?;
        trace.advance(Stage::Done);

        log::info!(
            "{:?} for '{}': {} units from {} detections over {} frames, +{} points, total {}",
            kind,
            user_id,
            outcome.award.unit_count,
            outcome.bottles_detected,
            outcome.frames_sampled,
            outcome.award.points,
            total_points
        );

        Ok(MediaResult {
            user_id: user_id.to_string(),
            detail: outcome.detail,
            unit_count: outcome.award.unit_count,
            bottles_detected: outcome.bottles_detected,
            frames_sampled: outcome.frames_sampled,
            points_earned: outcome.award.points,
            total_points,
        })
    }

    /// One detector call. The pooled instance is returned before the caller filters.
    fn detect(&self, frame: &Frame) -> Result<Vec<RawPrediction>, PipelineError> {
        let mut detector = self.detectors.acquire()?;
        detector
            .detect(frame)
            .map_err(|e| PipelineError::DetectorFailure {
                frame_index: frame.index,
                reason: format!("{}: {:#}", detector.name(), e),
            })
    }
}

/// Construct `settings.instances` backends of the configured kind.
pub fn build_detector_pool(settings: &DetectorSettings) -> Result<DetectorPool> {
    let mut backends: Vec<Box<dyn DetectorBackend>> = Vec::with_capacity(settings.instances);
    for _ in 0..settings.instances {
        backends.push(build_backend(settings)?);
    }
    let pool = DetectorPool::new(backends, settings.max_queue)?;
    pool.warm_up()?;
    log::info!(
        "detector pool ready: backend={:?} instances={} max_queue={}",
        settings.backend,
        pool.capacity(),
        pool.max_queue()
    );
    Ok(pool)
}

fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend {
        BackendKind::Stub => Ok(Box::new(StubBackend::new())),
        #[cfg(feature = "backend-tract")]
        BackendKind::Tract => {
            let path = settings
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow!("tract backend requires a model path"))?;
            Ok(Box::new(crate::detect::TractBackend::new(
                path,
                settings.input_size,
            )?))
        }
        #[cfg(not(feature = "backend-tract"))]
        BackendKind::Tract => Err(anyhow!(
            "tract backend requires the backend-tract feature"
        )),
    }
}

struct RequestTrace<'a> {
    user_id: &'a str,
    kind: MediaKind,
    stage: Stage,
}

impl<'a> RequestTrace<'a> {
    fn new(user_id: &'a str, kind: MediaKind) -> Self {
        log::debug!("{:?} upload received for '{}'", kind, user_id);
        Self {
            user_id,
            kind,
            stage: Stage::Received,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(
            self.stage.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.stage,
            next
        );
        log::trace!("'{}': {:?} -> {:?}", self.user_id, self.stage, next);
        self.stage = next;
    }

    fn fail(&mut self, err: PipelineError) -> PipelineError {
        log::warn!(
            "{:?} upload for '{}' failed during {:?}: {}",
            self.kind,
            self.user_id,
            self.stage,
            err
        );
        self.stage = Stage::Failed;
        err
    }
}

enum Tally {
    Image(Option<FrameResult>),
    Video(VideoTally),
}

struct Outcome {
    award: Award,
    detail: MediaDetail,
    bottles_detected: u64,
    frames_sampled: u64,
}

impl Tally {
    fn new(kind: MediaKind, policy: &RewardPolicy) -> Self {
        match kind {
            MediaKind::Image => Tally::Image(None),
            MediaKind::Video => Tally::Video(policy.video_tally()),
        }
    }

    fn frames_sampled(&self) -> u64 {
        match self {
            Tally::Image(frame) => frame.is_some() as u64,
            Tally::Video(tally) => tally.frames_sampled(),
        }
    }

    fn push(&mut self, result: FrameResult) {
        match self {
            Tally::Image(frame) => *frame = Some(result),
            Tally::Video(tally) => tally.push(result),
        }
    }

    fn finish(self, policy: &RewardPolicy) -> Outcome {
        match self {
            Tally::Image(frame) => {
                let frames_sampled = frame.is_some() as u64;
                let frame = frame.unwrap_or(FrameResult {
                    frame_index: 1,
                    detections: Vec::new(),
                });
                let award = policy.score_image(&frame);
                Outcome {
                    award,
                    bottles_detected: award.unit_count,
                    frames_sampled,
                    detail: MediaDetail::Image {
                        bottle_locations: frame.detections,
                    },
                }
            }
            Tally::Video(tally) => {
                let summary = tally.finish();
                Outcome {
                    award: summary.award,
                    bottles_detected: summary.detections_total,
                    frames_sampled: summary.frames_sampled,
                    detail: MediaDetail::Video {
                        bottle_frames: summary.frames,
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        let path = [
            Stage::Received,
            Stage::Sampling,
            Stage::Detecting,
            Stage::Sampling,
            Stage::Detecting,
            Stage::Sampling,
            Stage::Aggregating,
            Stage::Crediting,
            Stage::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_advance_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn failed_is_reachable_until_done() {
        for stage in [
            Stage::Received,
            Stage::Sampling,
            Stage::Detecting,
            Stage::Aggregating,
            Stage::Crediting,
        ] {
            assert!(stage.can_advance_to(Stage::Failed));
        }
        assert!(!Stage::Done.can_advance_to(Stage::Failed));
        assert!(!Stage::Failed.can_advance_to(Stage::Sampling));
    }

    #[test]
    fn stages_cannot_be_skipped() {
        assert!(!Stage::Received.can_advance_to(Stage::Detecting));
        assert!(!Stage::Detecting.can_advance_to(Stage::Crediting));
        assert!(!Stage::Aggregating.can_advance_to(Stage::Done));
    }

    #[test]
    fn stub_pipeline_processes_synthetic_video() {
        let config = RewardsConfig::default();
        let pipeline = RewardPipeline::from_config(&config).unwrap();
        let result = pipeline
            .process_path(Path::new("stub://40"), None, "demo")
            .unwrap();
        assert_eq!(result.media_kind(), MediaKind::Video);
        assert_eq!(result.frames_sampled, 4);
        assert_eq!(result.points_earned, result.unit_count * 5);
        assert_eq!(pipeline.ledger().get("demo"), result.total_points);
    }
}
