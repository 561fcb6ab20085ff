use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tract_onnx::prelude::tract_ndarray::Array4;

use crate::models::BoundingBox;

/// Largest stride of the YOLOv5 detection heads
pub const MODEL_STRIDE: u32 = 32;

/// Gray used for letterbox padding
pub const PAD_COLOR: Rgb<u8> = Rgb([114, 114, 114]);

/// Round an inference size up to a multiple of the stride
pub fn check_img_size(img_size: u32, stride: u32) -> u32 {
    let stride = stride.max(1);
    let size = img_size.div_ceil(stride) * stride;
    let size = size.max(stride);
    if size != img_size {
        log::warn!(
            "--img-size {} must be a multiple of max stride {}, updating to {}",
            img_size,
            stride,
            size
        );
    }
    size
}

/// Mapping between original image coordinates and letterboxed model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Compute scale and padding that fit `source` into `target` keeping aspect ratio
    pub fn fit(source: (u32, u32), target: (u32, u32)) -> Self {
        let (w, h) = (source.0 as f32, source.1 as f32);
        let (tw, th) = (target.0 as f32, target.1 as f32);
        let scale = (tw / w).min(th / h);
        let new_w = (w * scale).round();
        let new_h = (h * scale).round();
        Self {
            scale,
            pad_x: (tw - new_w) / 2.0,
            pad_y: (th - new_h) / 2.0,
        }
    }

    /// Map a box from model input space back to the original image
    pub fn unmap(&self, bbox: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            (bbox.x - self.pad_x) / self.scale,
            (bbox.y - self.pad_y) / self.scale,
            bbox.width / self.scale,
            bbox.height / self.scale,
        )
    }
}

/// Resize with unchanged aspect ratio and pad to `target` (width, height)
pub fn letterbox(image: &RgbImage, target: (u32, u32)) -> (RgbImage, Letterbox) {
    let (width, height) = image.dimensions();
    let lb = Letterbox::fit((width, height), target);

    if (width, height) == target {
        return (image.clone(), lb);
    }

    let new_w = ((width as f32 * lb.scale).round() as u32).clamp(1, target.0);
    let new_h = ((height as f32 * lb.scale).round() as u32).clamp(1, target.1);
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(target.0, target.1, PAD_COLOR);
    let left = (lb.pad_x - 0.1).round().max(0.0) as i64;
    let top = (lb.pad_y - 0.1).round().max(0.0) as i64;
    imageops::overlay(&mut canvas, &resized, left, top);

    (canvas, lb)
}

/// RGB HWC u8 -> NCHW f32 in [0, 1]
pub fn to_input_tensor(image: &RgbImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    Array4::from_shape_fn(
        (1, 3, height as usize, width as usize),
        |(_, channel, y, x)| image.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
    )
}
