//! Video frame sources and stride sampling.
//!
//! `VideoSource` opens a local file (FFmpeg, feature: ingest-file-ffmpeg) or a synthetic
//! `stub://<frames>` clip. Whatever the backend, frames are consumed through `SampledFrames`:
//! every decoded frame advances the position, but only frames whose 1-based index is a
//! multiple of the stride are converted to RGB and yielded. The sequence is finite, lazy and
//! single-pass.
//!
//! Sources MUST NOT fetch remote URLs or store decoded frames to disk.

use std::iter::FusedIterator;

use crate::error::PipelineError;
use crate::frame::Frame;

#[cfg(feature = "ingest-file-ffmpeg")]
use super::video_ffmpeg::FfmpegVideo;

pub(crate) const STUB_SCHEME: &str = "stub://";

const STUB_WIDTH: u32 = 64;
const STUB_HEIGHT: u32 = 48;

/// A decoder positioned before its next frame.
pub trait VideoStream: Send {
    /// Advance past the next frame without converting its pixels.
    /// Returns `false` at end of stream.
    fn skip_frame(&mut self) -> Result<bool, PipelineError>;

    /// Decode the next frame into RGB. `None` at end of stream.
    /// The returned frame's index is assigned by the caller.
    fn read_frame(&mut self) -> Result<Option<Frame>, PipelineError>;
}

impl<S: VideoStream + ?Sized> VideoStream for Box<S> {
    fn skip_frame(&mut self) -> Result<bool, PipelineError> {
        (**self).skip_frame()
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        (**self).read_frame()
    }
}

/// Every `stride`-th frame of a stream, indexed from 1.
///
/// After the stream ends or fails, the iterator stays exhausted.
pub struct SampledFrames<S> {
    stream: S,
    stride: u64,
    position: u64,
    finished: bool,
}

impl<S: VideoStream> SampledFrames<S> {
    /// `stride` values below 1 are treated as 1.
    pub fn new(stream: S, stride: u64) -> Self {
        Self {
            stream,
            stride: stride.max(1),
            position: 0,
            finished: false,
        }
    }

    /// Number of frames decoded so far.
    pub fn frames_decoded(&self) -> u64 {
        self.position
    }

    fn advance(&mut self) -> Result<Option<Frame>, PipelineError> {
        loop {
            let index = self.position + 1;
            if index % self.stride == 0 {
                return match self.stream.read_frame()? {
                    Some(frame) => {
                        self.position = index;
                        Ok(Some(frame.with_index(index)))
                    }
                    None => Ok(None),
                };
            }
            if !self.stream.skip_frame()? {
                return Ok(None);
            }
            self.position = index;
        }
    }
}

impl<S: VideoStream> Iterator for SampledFrames<S> {
    type Item = Result<Frame, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.advance() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<S: VideoStream> FusedIterator for SampledFrames<S> {}

/// Local video source.
pub struct VideoSource {
    backend: VideoBackend,
}

enum VideoBackend {
    Synthetic(SyntheticVideo),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegVideo),
}

impl VideoSource {
    /// Open a local file or a `stub://<frames>` clip. Fails with `InvalidMedia` before any
    /// frame is produced when the medium cannot be opened.
    pub fn open(path: &str) -> Result<Self, PipelineError> {
        if !is_local_file_path(path) {
            return Err(PipelineError::InvalidMedia(
                "video ingestion only supports local paths (no URL schemes)".into(),
            ));
        }
        if path.starts_with(STUB_SCHEME) {
            return Ok(Self {
                backend: VideoBackend::Synthetic(SyntheticVideo::from_uri(path)?),
            });
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: VideoBackend::Ffmpeg(FfmpegVideo::open(path)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(PipelineError::InvalidMedia(
                "video decoding requires the ingest-file-ffmpeg feature".into(),
            ))
        }
    }
}

impl VideoStream for VideoSource {
    fn skip_frame(&mut self) -> Result<bool, PipelineError> {
        match &mut self.backend {
            VideoBackend::Synthetic(source) => source.skip_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.skip_frame(),
        }
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        match &mut self.backend {
            VideoBackend::Synthetic(source) => source.read_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.read_frame(),
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic clip (stub://<frames>)
// ----------------------------------------------------------------------------

/// Fixed-length clip whose frame N is filled with the byte `N % 256`.
pub struct SyntheticVideo {
    total_frames: u64,
    produced: u64,
    width: u32,
    height: u32,
}

impl SyntheticVideo {
    pub fn new(total_frames: u64, width: u32, height: u32) -> Self {
        Self {
            total_frames,
            produced: 0,
            width,
            height,
        }
    }

    /// Parse `stub://<frames>`.
    pub fn from_uri(uri: &str) -> Result<Self, PipelineError> {
        let count = uri
            .strip_prefix(STUB_SCHEME)
            .and_then(|rest| rest.trim().parse::<u64>().ok())
            .ok_or_else(|| {
                PipelineError::InvalidMedia(format!(
                    "synthetic video '{}' must look like stub://<frames>",
                    uri
                ))
            })?;
        log::debug!("opened synthetic video with {} frames", count);
        Ok(Self::new(count, STUB_WIDTH, STUB_HEIGHT))
    }
}

impl VideoStream for SyntheticVideo {
    fn skip_frame(&mut self) -> Result<bool, PipelineError> {
        if self.produced >= self.total_frames {
            return Ok(false);
        }
        self.produced += 1;
        Ok(true)
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if self.produced >= self.total_frames {
            return Ok(None);
        }
        self.produced += 1;
        let fill = (self.produced % 256) as u8;
        let len = self.width as usize * self.height as usize * 3;
        Frame::rgb(vec![fill; len], self.width, self.height, self.produced).map(Some)
    }
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(STUB_SCHEME) {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStream {
        fail_at: u64,
        position: u64,
    }

    impl VideoStream for FailingStream {
        fn skip_frame(&mut self) -> Result<bool, PipelineError> {
            self.position += 1;
            if self.position == self.fail_at {
                return Err(PipelineError::InvalidMedia("corrupt packet".into()));
            }
            Ok(true)
        }

        fn read_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
            self.position += 1;
            if self.position == self.fail_at {
                return Err(PipelineError::InvalidMedia("corrupt packet".into()));
            }
            Frame::rgb(vec![0u8; 3], 1, 1, self.position).map(Some)
        }
    }

    fn indices(stream: impl VideoStream, stride: u64) -> Vec<u64> {
        SampledFrames::new(stream, stride)
            .map(|frame| frame.unwrap().index)
            .collect()
    }

    #[test]
    fn samples_every_stride_th_frame() {
        let got = indices(SyntheticVideo::new(100, 2, 2), 10);
        assert_eq!(got, (1..=10).map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn trailing_partial_stride_is_not_sampled() {
        assert_eq!(indices(SyntheticVideo::new(25, 2, 2), 10), vec![10, 20]);
        assert!(indices(SyntheticVideo::new(9, 2, 2), 10).is_empty());
    }

    #[test]
    fn stride_one_yields_every_frame() {
        assert_eq!(indices(SyntheticVideo::new(3, 2, 2), 1), vec![1, 2, 3]);
    }

    #[test]
    fn sampled_pixels_come_from_the_sampled_frame() {
        let mut frames = SampledFrames::new(SyntheticVideo::new(30, 2, 2), 10);
        let frame = frames.next().unwrap().unwrap();
        assert_eq!(frame.pixels()[0], 10);
        assert_eq!(frames.frames_decoded(), 10);
    }

    #[test]
    fn error_ends_the_sequence() {
        let mut frames = SampledFrames::new(
            FailingStream {
                fail_at: 15,
                position: 0,
            },
            10,
        );
        assert_eq!(frames.next().unwrap().unwrap().index, 10);
        assert!(frames.next().unwrap().is_err());
        assert!(frames.next().is_none());
    }

    #[test]
    fn stub_uri_parses_frame_count() {
        let mut source = VideoSource::open("stub://12").unwrap();
        let mut count = 0;
        while source.skip_frame().unwrap() {
            count += 1;
        }
        assert_eq!(count, 12);
    }

    #[test]
    fn remote_and_malformed_paths_are_invalid() {
        assert!(matches!(
            VideoSource::open("rtsp://camera/stream"),
            Err(PipelineError::InvalidMedia(_))
        ));
        assert!(matches!(
            VideoSource::open("stub://many"),
            Err(PipelineError::InvalidMedia(_))
        ));
        assert!(VideoSource::open("  ").is_err());
    }
}
