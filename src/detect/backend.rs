use anyhow::Result;

use crate::detect::result::RawPrediction;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend wraps one loaded model. `detect` takes `&mut self` because model runtimes are not
/// assumed to be reentrant; callers reach backends only through `DetectorPool`, which hands
/// each instance to one request at a time.
///
/// Implementations must be deterministic for a fixed model and frame and must not keep the
/// pixel slice beyond the call. An `Err` means the frame was unusable for the model; the
/// pipeline aborts the request and never looks for partial output.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<RawPrediction>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
