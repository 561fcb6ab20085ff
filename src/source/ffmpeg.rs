//! Video file decoding through FFmpeg.

use std::path::Path;

use ffmpeg_next as ffmpeg;

use super::FrameSource;
use crate::error::{Error, Result};
use crate::models::Frame;

pub(crate) struct FfmpegSource {
    label: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    flushed: bool,
}

impl FfmpegSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let label = path.display().to_string();
        let fail = |reason: String| Error::unavailable(&label, reason);

        ffmpeg::init().map_err(|err| fail(format!("initialize ffmpeg: {err}")))?;
        let input = ffmpeg::format::input(&path).map_err(|err| fail(err.to_string()))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| fail("file has no video track".to_string()))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .map_err(|err| fail(format!("load decoder parameters: {err}")))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|err| fail(format!("open video decoder: {err}")))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|err| fail(format!("create scaler: {err}")))?;

        log::info!(
            "Opened {} with ffmpeg ({}x{})",
            label,
            decoder.width(),
            decoder.height()
        );
        drop(input_stream);

        Ok(Self {
            label,
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            flushed: false,
        })
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .map_err(|err| Error::unavailable(&self.label, format!("scale frame to RGB: {err}")))?;

        let width = rgb_frame.width();
        let height = rgb_frame.height();
        let row_bytes = width as usize * 3;
        let stride = rgb_frame.stride(0) as usize;
        let data = rgb_frame.data(0);

        let pixels = if stride == row_bytes {
            data[..row_bytes * height as usize].to_vec()
        } else {
            let mut pixels = Vec::with_capacity(row_bytes * height as usize);
            for row in 0..height as usize {
                let start = row * stride;
                let line = data
                    .get(start..start + row_bytes)
                    .ok_or_else(|| Error::unavailable(&self.label, "frame row is out of bounds"))?;
                pixels.extend_from_slice(line);
            }
            pixels
        };

        let frame = Frame::from_raw(width, height, 3, pixels)?.with_index(self.frame_count);
        self.frame_count += 1;
        Ok(frame)
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.flushed {
                return Ok(None);
            }

            let next = self
                .input
                .packets()
                .next()
                .map(|(stream, packet)| (stream.index(), packet));
            match next {
                Some((index, packet)) if index == self.stream_index => {
                    self.decoder
                        .send_packet(&packet)
                        .map_err(|err| Error::unavailable(&self.label, format!("decode: {err}")))?;
                }
                Some(_) => {}
                None => {
                    // Drain frames still buffered in the decoder
                    self.decoder
                        .send_eof()
                        .map_err(|err| Error::unavailable(&self.label, format!("flush: {err}")))?;
                    self.flushed = true;
                }
            }
        }
    }

    fn description(&self) -> String {
        self.label.clone()
    }
}
