use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::config::COCO_BOTTLE_CLASS_ID;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawPrediction;
use crate::frame::Frame;

/// Number of classes in the COCO taxonomy the stub draws from.
const STUB_CLASS_COUNT: u32 = 80;

/// Stub backend for demos and wiring tests. No model is loaded.
///
/// Predictions are derived from a SHA-256 digest of the frame, so the same pixels always
/// produce the same predictions and different frames usually produce different ones.
#[derive(Default)]
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawPrediction>> {
        let mut hasher = Sha256::new();
        hasher.update(frame.width.to_le_bytes());
        hasher.update(frame.height.to_le_bytes());
        hasher.update(frame.pixels());
        let digest: [u8; 32] = hasher.finalize().into();

        let count = (digest[0] % 4) as usize;
        let w = frame.width as f32;
        let h = frame.height as f32;
        let predictions = digest[1..]
            .chunks_exact(6)
            .take(count)
            .map(|chunk| {
                let class_id = if chunk[0] % 2 == 0 {
                    COCO_BOTTLE_CLASS_ID
                } else {
                    chunk[0] as u32 % STUB_CLASS_COUNT
                };
                let confidence = chunk[1] as f32 / 255.0;
                let x1 = chunk[2] as f32 / 255.0 * w * 0.5;
                let y1 = chunk[3] as f32 / 255.0 * h * 0.5;
                let x2 = x1 + chunk[4] as f32 / 255.0 * w * 0.5;
                let y2 = y1 + chunk[5] as f32 / 255.0 * h * 0.5;
                RawPrediction::new(class_id, confidence, [x1, y1, x2, y2])
            })
            .collect();
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_is_deterministic() {
        let mut backend = StubBackend::new();
        let a = Frame::rgb(vec![42u8; 4 * 4 * 3], 4, 4, 1).unwrap();
        let b = Frame::rgb(vec![42u8; 4 * 4 * 3], 4, 4, 10).unwrap();

        let first = backend.detect(&a).unwrap();
        let second = backend.detect(&b).unwrap();
        assert_eq!(first, second);
        assert!(first.len() < 4);
    }

    #[test]
    fn stub_boxes_stay_inside_frame() {
        let mut backend = StubBackend::new();
        for seed in 0..32u8 {
            let frame = Frame::rgb(vec![seed; 8 * 6 * 3], 8, 6, 1).unwrap();
            for p in backend.detect(&frame).unwrap() {
                let [x1, y1, x2, y2] = p.bbox;
                assert!(x1 <= x2 && y1 <= y2);
                assert!(x2 <= 8.0 && y2 <= 6.0);
                assert!((0.0..=1.0).contains(&p.confidence));
            }
        }
    }
}
