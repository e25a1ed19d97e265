#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawPrediction;
use crate::frame::{Frame, RGB_CHANNELS};

const DEFAULT_MIN_SCORE: f32 = 0.05;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_MAX_DETECTIONS: usize = 300;

/// Tract-based backend for YOLOv8-family ONNX exports.
///
/// The model is expected to take `[1, 3, S, S]` RGB input scaled to `0..1` and to emit
/// `[1, 4 + classes, anchors]`, rows being `cx, cy, w, h` followed by per-class scores.
/// Frames are stretched to `S x S`; boxes are mapped back to source-frame pixels.
/// The backend applies per-class non-maximum suppression but no application threshold;
/// that belongs to the frame filter.
pub struct TractBackend {
    model: RunnableModel<TypedFact, Box<dyn TypedOp>, TypedModel>,
    input_size: u32,
    min_score: f32,
    iou_threshold: f32,
    max_detections: usize,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, input_size as usize, input_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            min_score: DEFAULT_MIN_SCORE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
        })
    }

    /// Override the score below which anchors are dropped before NMS.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.channels != RGB_CHANNELS {
            bail!(
                "expected {} channels, got {}",
                RGB_CHANNELS,
                frame.channels
            );
        }
        let source = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", frame.width, frame.height))?;
        let size = self.input_size;
        let resized = imageops::resize(&source, size, size, FilterType::Triangle);

        let size = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<RawPrediction>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output was not rank 3")?;
        let (batch, rows, anchors) = view.dim();
        if batch != 1 || rows <= 4 {
            bail!("unexpected model output shape [{}, {}, {}]", batch, rows, anchors);
        }

        let sx = frame.width as f32 / self.input_size as f32;
        let sy = frame.height as f32 / self.input_size as f32;
        let mut candidates = Vec::new();
        for i in 0..anchors {
            let mut best_class = 0usize;
            let mut best_score = f32::NEG_INFINITY;
            for class in 0..rows - 4 {
                let score = view[(0, 4 + class, i)];
                if score > best_score {
                    best_score = score;
                    best_class = class;
                }
            }
            if !best_score.is_finite() || best_score < self.min_score {
                continue;
            }
            let cx = view[(0, 0, i)];
            let cy = view[(0, 1, i)];
            let w = view[(0, 2, i)];
            let h = view[(0, 3, i)];
            let bbox = [
                ((cx - w / 2.0) * sx).clamp(0.0, frame.width as f32),
                ((cy - h / 2.0) * sy).clamp(0.0, frame.height as f32),
                ((cx + w / 2.0) * sx).clamp(0.0, frame.width as f32),
                ((cy + h / 2.0) * sy).clamp(0.0, frame.height as f32),
            ];
            candidates.push(RawPrediction::new(
                best_class as u32,
                best_score.min(1.0),
                bbox,
            ));
        }

        Ok(non_max_suppression(
            candidates,
            self.iou_threshold,
            self.max_detections,
        ))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawPrediction>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let size = self.input_size as usize;
        let blank = Frame::rgb(vec![0u8; size * size * 3], self.input_size, self.input_size, 1)?;
        self.detect(&blank).map(|_| ())
    }
}

/// Greedy per-class NMS, highest confidence first.
fn non_max_suppression(
    mut candidates: Vec<RawPrediction>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<RawPrediction> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawPrediction> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_best_overlapping_box_per_class() {
        let candidates = vec![
            RawPrediction::new(39, 0.6, [0.0, 0.0, 10.0, 10.0]),
            RawPrediction::new(39, 0.9, [1.0, 1.0, 11.0, 11.0]),
            RawPrediction::new(0, 0.7, [1.0, 1.0, 11.0, 11.0]),
            RawPrediction::new(39, 0.5, [50.0, 50.0, 60.0, 60.0]),
        ];
        let kept = non_max_suppression(candidates, 0.45, 10);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].confidence, 0.9);
        assert!(kept.iter().any(|p| p.class_id == 0));
    }
}
