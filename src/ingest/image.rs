//! Still-image decoding.

use std::path::Path;

use crate::error::PipelineError;
use crate::frame::Frame;

/// Decode an image file into a single RGB frame with index 1.
pub fn load_image(path: &Path) -> Result<Frame, PipelineError> {
    let decoded = ::image::open(path).map_err(|e| {
        PipelineError::InvalidMedia(format!("could not read image at {}: {}", path.display(), e))
    })?;
    into_frame(decoded)
}

/// Decode an in-memory JPEG or PNG.
pub fn decode_image(bytes: &[u8]) -> Result<Frame, PipelineError> {
    let decoded = ::image::load_from_memory(bytes).map_err(PipelineError::invalid_media)?;
    into_frame(decoded)
}

fn into_frame(decoded: ::image::DynamicImage) -> Result<Frame, PipelineError> {
    let rgb = decoded.to_rgb8();
    let (width, height) = rgb.dimensions();
    Frame::rgb(rgb.into_raw(), width, height, 1)
}
