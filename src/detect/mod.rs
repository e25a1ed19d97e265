mod backend;
pub mod backends;
mod pool;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use pool::{DetectorPool, PooledDetector, DEFAULT_MAX_QUEUE};
pub use result::RawPrediction;
