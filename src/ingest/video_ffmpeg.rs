//! Local video decoding using FFmpeg.
//!
//! Skipped frames are decoded (the codec needs them as references) but never scaled to RGB.

use ffmpeg_next as ffmpeg;

use super::video::VideoStream;
use crate::error::PipelineError;
use crate::frame::Frame;

pub(crate) struct FfmpegVideo {
    path: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    decoded: ffmpeg::frame::Video,
    eof_sent: bool,
    frames_decoded: u64,
}

impl FfmpegVideo {
    pub(crate) fn open(path: &str) -> Result<Self, PipelineError> {
        ffmpeg::init().map_err(|e| invalid(path, "initialize ffmpeg", e))?;
        let input =
            ffmpeg::format::input(&path).map_err(|e| invalid(path, "open video", e))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| {
                PipelineError::InvalidMedia(format!("{} has no video track", path))
            })?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|e| invalid(path, "load video decoder parameters", e))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| invalid(path, "open video decoder", e))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| invalid(path, "create scaler", e))?;

        log::info!(
            "opened video {} ({}x{})",
            path,
            decoder.width(),
            decoder.height()
        );

        Ok(Self {
            path: path.to_string(),
            input,
            stream_index,
            decoder,
            scaler,
            decoded: ffmpeg::frame::Video::empty(),
            eof_sent: false,
            frames_decoded: 0,
        })
    }

    /// Decode the next frame into `self.decoded`. Returns false once the decoder is drained.
    fn decode_next(&mut self) -> Result<bool, PipelineError> {
        loop {
            if self.decoder.receive_frame(&mut self.decoded).is_ok() {
                self.frames_decoded += 1;
                return Ok(true);
            }
            if self.eof_sent {
                log::debug!("{}: end of stream after {} frames", self.path, self.frames_decoded);
                return Ok(false);
            }

            let mut fed = false;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .map_err(|e| invalid(&self.path, "decode packet", e))?;
                fed = true;
                break;
            }
            if !fed {
                self.decoder
                    .send_eof()
                    .map_err(|e| invalid(&self.path, "flush decoder", e))?;
                self.eof_sent = true;
            }
        }
    }
}

impl VideoStream for FfmpegVideo {
    fn skip_frame(&mut self) -> Result<bool, PipelineError> {
        self.decode_next()
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if !self.decode_next()? {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&self.decoded, &mut rgb_frame)
            .map_err(|e| invalid(&self.path, "scale frame to RGB", e))?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
        Frame::rgb(pixels, width, height, self.frames_decoded).map(Some)
    }
}

fn invalid(path: &str, what: &str, err: ffmpeg::Error) -> PipelineError {
    PipelineError::InvalidMedia(format!("{}: failed to {}: {}", path, what, err))
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32), PipelineError> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data.get(..row_bytes * height as usize).ok_or_else(|| {
            PipelineError::InvalidMedia("decoded frame is shorter than its geometry".into())
        })?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).ok_or_else(|| {
            PipelineError::InvalidMedia("decoded frame row is out of bounds".into())
        })?);
    }

    Ok((pixels, width, height))
}
