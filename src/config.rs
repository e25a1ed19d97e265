use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::detect::DEFAULT_MAX_QUEUE;

/// Class 39 in the COCO taxonomy is "bottle".
pub const COCO_BOTTLE_CLASS_ID: u32 = 39;

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.2;
const DEFAULT_POINTS_PER_IMAGE_UNIT: u64 = 10;
const DEFAULT_POINTS_PER_VIDEO_UNIT: u64 = 5;
const DEFAULT_FRAME_STRIDE: u64 = 10;
const DEFAULT_MAX_SAMPLED_FRAMES: u64 = 3_600;
const DEFAULT_DETECTOR_INSTANCES: usize = 1;
const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RewardsConfigFile {
    scoring: Option<ScoringConfigFile>,
    sampling: Option<SamplingConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ScoringConfigFile {
    target_class_id: Option<u32>,
    confidence_threshold: Option<f32>,
    points_per_image_unit: Option<u64>,
    points_per_video_unit: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SamplingConfigFile {
    frame_stride: Option<u64>,
    /// 0 disables the cap.
    max_sampled_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    backend: Option<String>,
    instances: Option<usize>,
    max_queue: Option<usize>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct RewardsConfig {
    pub scoring: ScoringSettings,
    pub sampling: SamplingSettings,
    pub detector: DetectorSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringSettings {
    pub target_class_id: u32,
    /// Detections must score strictly above this value.
    pub confidence_threshold: f32,
    pub points_per_image_unit: u64,
    pub points_per_video_unit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingSettings {
    /// Every `frame_stride`-th decoded video frame is analyzed.
    pub frame_stride: u64,
    pub max_sampled_frames: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorSettings {
    pub backend: BackendKind,
    pub instances: usize,
    pub max_queue: usize,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Stub,
    Tract,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(BackendKind::Stub),
            "tract" => Ok(BackendKind::Tract),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            target_class_id: COCO_BOTTLE_CLASS_ID,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            points_per_image_unit: DEFAULT_POINTS_PER_IMAGE_UNIT,
            points_per_video_unit: DEFAULT_POINTS_PER_VIDEO_UNIT,
        }
    }
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            frame_stride: DEFAULT_FRAME_STRIDE,
            max_sampled_frames: Some(DEFAULT_MAX_SAMPLED_FRAMES),
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Stub,
            instances: DEFAULT_DETECTOR_INSTANCES,
            max_queue: DEFAULT_MAX_QUEUE,
            model_path: None,
            input_size: DEFAULT_INPUT_SIZE,
        }
    }
}

impl RewardsConfig {
    /// Defaults, then the file named by `REWARDS_CONFIG`, then `REWARDS_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("REWARDS_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RewardsConfigFile) -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(scoring) = file.scoring {
            if let Some(v) = scoring.target_class_id {
                cfg.scoring.target_class_id = v;
            }
            if let Some(v) = scoring.confidence_threshold {
                cfg.scoring.confidence_threshold = v;
            }
            if let Some(v) = scoring.points_per_image_unit {
                cfg.scoring.points_per_image_unit = v;
            }
            if let Some(v) = scoring.points_per_video_unit {
                cfg.scoring.points_per_video_unit = v;
            }
        }
        if let Some(sampling) = file.sampling {
            if let Some(v) = sampling.frame_stride {
                cfg.sampling.frame_stride = v;
            }
            if let Some(v) = sampling.max_sampled_frames {
                cfg.sampling.max_sampled_frames = frame_cap(v);
            }
        }
        if let Some(detector) = file.detector {
            if let Some(v) = detector.backend {
                cfg.detector.backend = v.parse()?;
            }
            if let Some(v) = detector.instances {
                cfg.detector.instances = v;
            }
            if let Some(v) = detector.max_queue {
                cfg.detector.max_queue = v;
            }
            if detector.model_path.is_some() {
                cfg.detector.model_path = detector.model_path;
            }
            if let Some(v) = detector.input_size {
                cfg.detector.input_size = v;
            }
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_parse("REWARDS_TARGET_CLASS_ID")? {
            self.scoring.target_class_id = v;
        }
        if let Some(v) = env_parse("REWARDS_CONFIDENCE_THRESHOLD")? {
            self.scoring.confidence_threshold = v;
        }
        if let Some(v) = env_parse("REWARDS_POINTS_PER_IMAGE_UNIT")? {
            self.scoring.points_per_image_unit = v;
        }
        if let Some(v) = env_parse("REWARDS_POINTS_PER_VIDEO_UNIT")? {
            self.scoring.points_per_video_unit = v;
        }
        if let Some(v) = env_parse("REWARDS_FRAME_STRIDE")? {
            self.sampling.frame_stride = v;
        }
        if let Some(v) = env_parse::<u64>("REWARDS_MAX_SAMPLED_FRAMES")? {
            self.sampling.max_sampled_frames = frame_cap(v);
        }
        if let Some(v) = env_parse("REWARDS_DETECTOR_BACKEND")? {
            self.detector.backend = v;
        }
        if let Some(v) = env_parse("REWARDS_DETECTOR_INSTANCES")? {
            self.detector.instances = v;
        }
        if let Some(v) = env_parse("REWARDS_DETECTOR_QUEUE")? {
            self.detector.max_queue = v;
        }
        if let Ok(path) = std::env::var("REWARDS_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.scoring.confidence_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "confidence threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        if self.sampling.frame_stride == 0 {
            return Err(anyhow!("frame stride must be at least 1"));
        }
        if self.detector.instances == 0 {
            return Err(anyhow!("detector instances must be at least 1"));
        }
        if self.detector.input_size < 32 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!(
                "detector input size must be a multiple of 32 and at least 32, got {}",
                self.detector.input_size
            ));
        }
        if self.detector.backend == BackendKind::Tract && self.detector.model_path.is_none() {
            return Err(anyhow!("tract backend requires a model path"));
        }
        Ok(())
    }
}

fn frame_cap(value: u64) -> Option<u64> {
    (value > 0).then_some(value)
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, raw)),
        _ => Ok(None),
    }
}

fn read_config_file(path: &Path) -> Result<RewardsConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reward_rules() {
        let cfg = RewardsConfig::default();
        assert_eq!(cfg.scoring.target_class_id, 39);
        assert_eq!(cfg.scoring.confidence_threshold, 0.2);
        assert_eq!(cfg.scoring.points_per_image_unit, 10);
        assert_eq!(cfg.scoring.points_per_video_unit, 5);
        assert_eq!(cfg.sampling.frame_stride, 10);
        assert_eq!(cfg.detector.instances, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_stride_is_rejected() {
        let mut cfg = RewardsConfig::default();
        cfg.sampling.frame_stride = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let mut cfg = RewardsConfig::default();
        cfg.scoring.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
        cfg.scoring.confidence_threshold = f32::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn tract_requires_model_path() {
        let mut cfg = RewardsConfig::default();
        cfg.detector.backend = BackendKind::Tract;
        assert!(cfg.validate().is_err());
        cfg.detector.model_path = Some(PathBuf::from("yolov8n.onnx"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_frame_cap_disables_limit() {
        let file: RewardsConfigFile =
            serde_json::from_str(r#"{"sampling": {"max_sampled_frames": 0}}"#).unwrap();
        let cfg = RewardsConfig::from_file(file).unwrap();
        assert_eq!(cfg.sampling.max_sampled_frames, None);
    }

    #[test]
    fn backend_names_parse() {
        assert_eq!("Tract".parse::<BackendKind>().unwrap(), BackendKind::Tract);
        assert!("opencv".parse::<BackendKind>().is_err());
    }
}
