//! Frame sources.
//!
//! - Still images, decoded in memory with the `image` crate
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Synthetic `stub://<frames>` videos (always available, for demos and tests)
//!
//! Videos are consumed through `SampledFrames`, which decodes every frame in order but only
//! converts and yields every `stride`-th one. Sources never write decoded frames to disk and
//! never log pixel content.

pub mod image;
pub mod video;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod video_ffmpeg;

use std::path::Path;

use serde::Serialize;

use crate::error::PipelineError;

pub use self::image::{decode_image, load_image};
pub use video::{SampledFrames, SyntheticVideo, VideoSource, VideoStream};

/// Kind of uploaded media; selects the scoring policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "m4v"];

impl MediaKind {
    /// Resolve from a MIME type such as `image/jpeg` or `video/mp4`.
    pub fn from_content_type(content_type: &str) -> Result<Self, PipelineError> {
        let major = content_type
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match major.as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            _ => Err(PipelineError::InvalidMedia(format!(
                "content type '{}' is neither an image nor a video",
                content_type
            ))),
        }
    }

    /// Resolve from a file extension. `stub://` URIs are synthetic videos.
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        if path.to_string_lossy().starts_with(video::STUB_SCHEME) {
            return Ok(MediaKind::Video);
        }
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Ok(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Ok(MediaKind::Video)
        } else {
            Err(PipelineError::InvalidMedia(format!(
                "cannot tell media kind of {}",
                path.display()
            )))
        }
    }
}
