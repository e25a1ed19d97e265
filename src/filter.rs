//! Per-frame reduction of raw detector output to qualifying detections.

use serde::Serialize;

use crate::config::ScoringSettings;
use crate::detect::RawPrediction;

/// Integer pixel box with `x1 <= x2` and `y1 <= y2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl BoundingBox {
    /// Truncate toward zero and order the corners.
    fn from_pixels([x1, y1, x2, y2]: [f32; 4]) -> Self {
        let (x1, x2) = (x1 as i64, x2 as i64);
        let (y1, y2) = (y1 as i64, y2 as i64);
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }
}

/// A prediction that passed the frame filter.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    #[serde(skip)]
    pub frame_index: u64,
    #[serde(skip)]
    pub class_id: u32,
    #[serde(flatten)]
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Qualifying detections for one sampled frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameResult {
    pub frame_index: u64,
    pub detections: Vec<Detection>,
}

impl FrameResult {
    pub fn has_detections(&self) -> bool {
        !self.detections.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FrameFilter {
    target_class_id: u32,
    confidence_threshold: f32,
}

impl FrameFilter {
    pub fn new(target_class_id: u32, confidence_threshold: f32) -> Self {
        Self {
            target_class_id,
            confidence_threshold,
        }
    }

    /// Keep predictions of the target class strictly above the threshold, in input order.
    pub fn apply(&self, frame_index: u64, predictions: &[RawPrediction]) -> FrameResult {
        let detections = predictions
            .iter()
            .filter(|p| {
                p.class_id == self.target_class_id && p.confidence > self.confidence_threshold
            })
            .map(|p| Detection {
                frame_index,
                class_id: p.class_id,
                bbox: BoundingBox::from_pixels(p.bbox),
                confidence: p.confidence,
            })
            .collect();
        FrameResult {
            frame_index,
            detections,
        }
    }
}

impl From<&ScoringSettings> for FrameFilter {
    fn from(settings: &ScoringSettings) -> Self {
        Self::new(settings.target_class_id, settings.confidence_threshold)
    }
}
