//! Bottle Rewards
//!
//! Turns an uploaded image or video into a count of detected bottles and credits the
//! resulting points to the uploader's running balance.
//!
//! # Architecture
//!
//! - `ingest`: frame sources (decoded images, stride-sampled videos)
//! - `detect`: detector backend trait, bundled backends, bounded detector pool
//! - `filter`: per-frame reduction to qualifying detections
//! - `reward`: image and video scoring policies
//! - `ledger`: in-memory per-user balances with atomic credit
//! - `pipeline`: orchestrates one request from frames to credited points
//!
//! Balances live only as long as the process; nothing is persisted. User identifiers are
//! taken as given.

pub mod config;
pub mod detect;
pub mod error;
pub mod filter;
pub mod frame;
pub mod ingest;
pub mod ledger;
pub mod pipeline;
pub mod reward;

pub use config::{RewardsConfig, COCO_BOTTLE_CLASS_ID};
pub use detect::{DetectorBackend, DetectorPool, RawPrediction, StubBackend};
pub use error::{ErrorClass, PipelineError};
pub use filter::{BoundingBox, Detection, FrameFilter, FrameResult};
pub use frame::Frame;
pub use ingest::{MediaKind, SampledFrames, SyntheticVideo, VideoSource, VideoStream};
pub use ledger::PointsLedger;
pub use pipeline::{build_detector_pool, MediaDetail, MediaResult, RewardPipeline, Stage};
pub use reward::{Award, FrameDetections, RewardPolicy};
