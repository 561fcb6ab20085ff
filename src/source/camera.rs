//! V4L2 camera capture.

use ouroboros::self_referencing;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;

use super::FrameSource;
use super::normalize::yuyv_to_rgb;
use crate::error::{Error, Result};
use crate::models::Frame;

#[self_referencing]
struct CaptureState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub(crate) struct CameraSource {
    label: String,
    state: CaptureState,
    fourcc: FourCC,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl CameraSource {
    pub(crate) fn open(index: u32, width: u32, height: u32) -> Result<Self> {
        let label = format!("camera {index}");
        let path = format!("/dev/video{index}");
        let fail = |reason: String| Error::unavailable(&label, reason);

        let device =
            v4l::Device::with_path(&path).map_err(|err| fail(format!("open {path}: {err}")))?;
        let mut format = device
            .format()
            .map_err(|err| fail(format!("read format: {err}")))?;
        format.width = width;
        format.height = height;
        format.fourcc = FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("Failed to set format on {}: {}", path, err);
                device
                    .format()
                    .map_err(|err| fail(format!("read format: {err}")))?
            }
        };

        let state = CaptureStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|err| fail(format!("create buffer stream: {err}")))?;

        log::info!(
            "Opened {} ({}x{} {})",
            path,
            format.width,
            format.height,
            format.fourcc
        );

        Ok(Self {
            label,
            state,
            fourcc: format.fourcc,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }
}

fn decode_buffer(fourcc: FourCC, buf: &[u8], width: u32, height: u32) -> anyhow::Result<Frame> {
    match &fourcc.repr {
        b"RGB3" => {
            let len = width as usize * height as usize * 3;
            let pixels = buf
                .get(..len)
                .ok_or_else(|| anyhow::anyhow!("short RGB buffer ({} bytes)", buf.len()))?;
            Ok(Frame::from_raw(width, height, 3, pixels.to_vec())?)
        }
        b"YUYV" => Ok(Frame::from_raw(width, height, 3, yuyv_to_rgb(buf, width, height)?)?),
        b"MJPG" => {
            let image = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)?;
            Ok(Frame::from_dynamic(image))
        }
        _ => anyhow::bail!("unsupported pixel format {fourcc}"),
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let (fourcc, width, height) = (self.fourcc, self.width, self.height);
        let frame = self
            .state
            .with_stream_mut(|stream| -> anyhow::Result<Frame> {
                let (buf, _meta) = stream.next()?;
                decode_buffer(fourcc, buf, width, height)
            })
            .map_err(|err| Error::unavailable(&self.label, format!("{err:#}")))?;

        let frame = frame.with_index(self.frame_count);
        self.frame_count += 1;
        Ok(Some(frame))
    }

    fn is_live(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        self.label.clone()
    }
}
