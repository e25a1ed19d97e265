//! Scoring policy: turns filtered detections into units and points.
//!
//! Images pay per detection. Videos pay per sampled frame that holds at least one detection,
//! however many detections that frame has. The video rule is a coarse guard against paying
//! repeatedly for one bottle that stays in view across consecutive sampled frames; it
//! under-counts several bottles visible at once and over-counts a bottle that leaves and
//! re-enters the shot.

use serde::Serialize;

use crate::config::ScoringSettings;
use crate::filter::{Detection, FrameResult};

/// Units credited and the resulting point value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Award {
    pub unit_count: u64,
    pub points: u64,
}

/// Video frame that contributed a unit, as reported back to the caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameDetections {
    pub frame: u64,
    pub bottles: u64,
    pub locations: Vec<Detection>,
}

#[derive(Clone, Copy, Debug)]
pub struct RewardPolicy {
    points_per_image_unit: u64,
    points_per_video_unit: u64,
}

impl RewardPolicy {
    pub fn new(points_per_image_unit: u64, points_per_video_unit: u64) -> Self {
        Self {
            points_per_image_unit,
            points_per_video_unit,
        }
    }

    /// Every qualifying detection in the image is one unit.
    pub fn score_image(&self, frame: &FrameResult) -> Award {
        let unit_count = frame.detections.len() as u64;
        Award {
            unit_count,
            points: unit_count.saturating_mul(self.points_per_image_unit),
        }
    }

    pub fn video_tally(&self) -> VideoTally {
        VideoTally {
            points_per_unit: self.points_per_video_unit,
            frames_sampled: 0,
            detections_total: 0,
            frames: Vec::new(),
        }
    }
}

impl From<&ScoringSettings> for RewardPolicy {
    fn from(settings: &ScoringSettings) -> Self {
        Self::new(
            settings.points_per_image_unit,
            settings.points_per_video_unit,
        )
    }
}

/// Running aggregation over a video's sampled frames.
///
/// Only frames with detections are retained; empty frames are counted and dropped.
#[derive(Debug)]
pub struct VideoTally {
    points_per_unit: u64,
    frames_sampled: u64,
    detections_total: u64,
    frames: Vec<FrameDetections>,
}

impl VideoTally {
    pub fn push(&mut self, frame: FrameResult) {
        self.frames_sampled += 1;
        if !frame.has_detections() {
            return;
        }
        let bottles = frame.detections.len() as u64;
        self.detections_total += bottles;
        self.frames.push(FrameDetections {
            frame: frame.frame_index,
            bottles,
            locations: frame.detections,
        });
    }

    pub fn frames_sampled(&self) -> u64 {
        self.frames_sampled
    }

    pub fn finish(self) -> VideoSummary {
        let unit_count = self.frames.len() as u64;
        VideoSummary {
            award: Award {
                unit_count,
                points: unit_count.saturating_mul(self.points_per_unit),
            },
            frames_sampled: self.frames_sampled,
            detections_total: self.detections_total,
            frames: self.frames,
        }
    }
}

#[derive(Debug)]
pub struct VideoSummary {
    pub award: Award,
    pub frames_sampled: u64,
    pub detections_total: u64,
    pub frames: Vec<FrameDetections>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::BoundingBox;

    fn detection(frame_index: u64) -> Detection {
        Detection {
            frame_index,
            class_id: 39,
            bbox: BoundingBox {
                x1: 0,
                y1: 0,
                x2: 4,
                y2: 4,
            },
            confidence: 0.9,
        }
    }

    fn frame(frame_index: u64, count: usize) -> FrameResult {
        FrameResult {
            frame_index,
            detections: (0..count).map(|_| detection(frame_index)).collect(),
        }
    }

    #[test]
    fn image_pays_per_detection() {
        let policy = RewardPolicy::new(10, 5);
        assert_eq!(
            policy.score_image(&frame(1, 3)),
            Award {
                unit_count: 3,
                points: 30
            }
        );
        assert_eq!(policy.score_image(&frame(1, 0)), Award::default());
    }

    #[test]
    fn video_pays_once_per_frame_with_detections() {
        let policy = RewardPolicy::new(10, 5);
        let mut tally = policy.video_tally();
        for (index, count) in [(10, 0), (20, 3), (30, 1), (40, 0), (50, 7)] {
            tally.push(frame(index, count));
        }
        let summary = tally.finish();
        assert_eq!(
            summary.award,
            Award {
                unit_count: 3,
                points: 15
            }
        );
        assert_eq!(summary.frames_sampled, 5);
        assert_eq!(summary.detections_total, 11);
        let indices: Vec<u64> = summary.frames.iter().map(|f| f.frame).collect();
        assert_eq!(indices, vec![20, 30, 50]);
        assert_eq!(summary.frames[0].bottles, 3);
    }

    #[test]
    fn empty_video_earns_nothing() {
        let summary = RewardPolicy::new(10, 5).video_tally().finish();
        assert_eq!(summary.award, Award::default());
        assert!(summary.frames.is_empty());
    }
}
