use image::{DynamicImage, RgbImage};

use crate::error::{Error, Result};

/// Axis-aligned box in pixel coordinates (top-left corner plus size)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_corners(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
        }
    }

    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    pub fn x2(&self) -> f32 {
        self.x + self.width
    }

    pub fn y2(&self) -> f32 {
        self.y + self.height
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn intersection(&self, other: &BoundingBox) -> f32 {
        let w = (self.x2().min(other.x2()) - self.x.max(other.x)).max(0.0);
        let h = (self.y2().min(other.y2()) - self.y.max(other.y)).max(0.0);
        w * h
    }

    /// Intersection over union, 0.0 for disjoint or degenerate boxes
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }

    /// Clip the box to an image of the given size
    pub fn clip(&self, width: u32, height: u32) -> BoundingBox {
        let (w, h) = (width as f32, height as f32);
        BoundingBox::from_corners(
            self.x.clamp(0.0, w),
            self.y.clamp(0.0, h),
            self.x2().clamp(0.0, w),
            self.y2().clamp(0.0, h),
        )
    }
}

/// One predicted object in a frame
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub label: String,
    /// Always within [0, 1]
    pub confidence: f32,
}

impl Detection {
    /// Text drawn next to the box, e.g. "person 0.87"
    pub fn caption(&self, hide_labels: bool, hide_conf: bool) -> Option<String> {
        match (hide_labels, hide_conf) {
            (true, _) => None,
            (false, true) => Some(self.label.clone()),
            (false, false) => Some(format!("{} {:.2}", self.label, self.confidence)),
        }
    }
}

/// One RGB image pulled from an image file, video or camera
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position of the frame within its source
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { index: 0, image }
    }

    pub fn with_index(mut self, index: u64) -> Self {
        self.index = index;
        self
    }

    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self::new(image.to_rgb8())
    }

    /// Build a frame from interleaved 8-bit pixels with 1 (gray), 3 (RGB) or 4 (RGBA) channels
    pub fn from_raw(width: u32, height: u32, channels: usize, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(channels))
            .ok_or_else(|| Error::inference("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(Error::inference(format!(
                "expected {} bytes for a {}x{}x{} frame, got {}",
                expected,
                width,
                height,
                channels,
                pixels.len()
            )));
        }

        let image = match channels {
            3 => RgbImage::from_raw(width, height, pixels),
            1 => image::GrayImage::from_raw(width, height, pixels)
                .map(|gray| DynamicImage::ImageLuma8(gray).to_rgb8()),
            4 => image::RgbaImage::from_raw(width, height, pixels)
                .map(|rgba| DynamicImage::ImageRgba8(rgba).to_rgb8()),
            other => {
                return Err(Error::inference(format!(
                    "unsupported channel count {other}, expected 1, 3 or 4"
                )));
            }
        }
        .ok_or_else(|| Error::inference("pixel buffer does not match frame size"))?;

        Ok(Self::new(image))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}
