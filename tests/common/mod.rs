#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};

use bottle_rewards::config::RewardsConfig;
use bottle_rewards::{
    DetectorBackend, DetectorPool, Frame, PointsLedger, RawPrediction, RewardPipeline,
    COCO_BOTTLE_CLASS_ID,
};

/// Test backend keyed on a frame's first pixel byte.
///
/// Synthetic video frame N is filled with `N % 256`, so the key identifies the sampled frame.
/// Every call records the key it saw.
pub struct ScriptedBackend {
    by_fill: HashMap<u8, Vec<RawPrediction>>,
    seen: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedBackend {
    pub fn new(by_fill: HashMap<u8, Vec<RawPrediction>>) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                by_fill,
                seen: seen.clone(),
            },
            seen,
        )
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawPrediction>> {
        if frame.channels != 3 {
            bail!("expected 3 channels, got {}", frame.channels);
        }
        let key = frame.pixels()[0];
        self.seen.lock().unwrap().push(key);
        Ok(self.by_fill.get(&key).cloned().unwrap_or_default())
    }
}

pub fn bottle(confidence: f32) -> RawPrediction {
    RawPrediction::new(COCO_BOTTLE_CLASS_ID, confidence, [10.4, 12.9, 50.5, 90.99])
}

pub fn bottles(count: usize) -> Vec<RawPrediction> {
    (0..count).map(|_| bottle(0.8)).collect()
}

pub fn rgb_frame(fill: u8) -> Frame {
    Frame::rgb(vec![fill; 8 * 8 * 3], 8, 8, 1).unwrap()
}

pub fn pipeline_with(
    config: &RewardsConfig,
    backend: impl DetectorBackend + 'static,
    max_queue: usize,
) -> RewardPipeline {
    let pool = DetectorPool::single(backend).with_max_queue(max_queue);
    RewardPipeline::new(config, Arc::new(pool), Arc::new(PointsLedger::new()))
}

pub fn scripted_pipeline(
    script: HashMap<u8, Vec<RawPrediction>>,
) -> (RewardPipeline, Arc<Mutex<Vec<u8>>>) {
    let (backend, seen) = ScriptedBackend::new(script);
    (
        pipeline_with(&RewardsConfig::default(), backend, 64),
        seen,
    )
}
