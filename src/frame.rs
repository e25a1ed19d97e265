//! Decoded frame container.
//!
//! A `Frame` owns interleaved 8-bit pixels for one decoded image or video frame plus its
//! 1-based position in the media unit. Frames are request-scoped: they are produced by a
//! frame source, handed to a detector by reference, and dropped once filtered.

use crate::error::PipelineError;

/// Channel count expected by the bundled detector backends.
pub const RGB_CHANNELS: u8 = 3;

pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// 1-based index within the media unit. Images always carry index 1.
    pub index: u64,
}

// No Clone: a frame is moved through the pipeline, never duplicated.

impl Frame {
    /// Build a frame from interleaved pixels, checking the buffer length against the
    /// declared geometry.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        channels: u8,
        index: u64,
    ) -> Result<Self, PipelineError> {
        if width == 0 || height == 0 || channels == 0 {
            return Err(PipelineError::InvalidMedia(format!(
                "frame geometry {}x{}x{} is empty",
                width, height, channels
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(channels as usize))
            .ok_or_else(|| PipelineError::InvalidMedia("frame dimensions overflow".into()))?;
        if pixels.len() != expected {
            return Err(PipelineError::InvalidMedia(format!(
                "expected {} pixel bytes for {}x{}x{}, received {}",
                expected,
                width,
                height,
                channels,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
            channels,
            index,
        })
    }

    /// Build an RGB frame.
    pub fn rgb(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self, PipelineError> {
        Self::new(pixels, width, height, RGB_CHANNELS, index)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub(crate) fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content is never printed.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("index", &self.index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        let err = Frame::rgb(vec![0u8; 10], 2, 2, 1).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidMedia(_)));
    }

    #[test]
    fn rejects_empty_geometry() {
        assert!(Frame::rgb(Vec::new(), 0, 4, 1).is_err());
    }

    #[test]
    fn debug_omits_pixels() {
        let frame = Frame::rgb(vec![7u8; 12], 2, 2, 5).unwrap();
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("index: 5"));
        assert!(!rendered.contains("pixels"));
    }
}
