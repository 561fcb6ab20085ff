use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::config::DetectorSettings;
use crate::models::Detection;

/// Ultralytics color palette, indexed by class id
const PALETTE: [[u8; 3]; 20] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x92, 0xCC, 0x17],
    [0x3D, 0xDB, 0x86],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
    [0x2C, 0x99, 0xA8],
    [0x00, 0xC2, 0xFF],
    [0x34, 0x45, 0x93],
    [0x64, 0x73, 0xFF],
    [0x00, 0x18, 0xEC],
    [0x84, 0x38, 0xFF],
    [0x52, 0x00, 0x85],
    [0xCB, 0x38, 0xFF],
    [0xFF, 0x95, 0xC8],
    [0xFF, 0x37, 0xC7],
];

/// Fonts tried when none is configured
const SYSTEM_FONTS: [&str; 6] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Draws detection boxes and captions onto frames
pub struct Annotator {
    line_thickness: u32,
    hide_labels: bool,
    hide_conf: bool,
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(settings: &DetectorSettings) -> Self {
        let font = if settings.hide_labels {
            None
        } else {
            load_font(settings.font.as_deref())
        };
        Self {
            line_thickness: settings.line_thickness.max(1),
            hide_labels: settings.hide_labels,
            hide_conf: settings.hide_conf,
            font,
        }
    }

    /// Annotator that never draws captions
    pub fn boxes_only(line_thickness: u32) -> Self {
        Self {
            line_thickness: line_thickness.max(1),
            hide_labels: true,
            hide_conf: true,
            font: None,
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Return a copy of `image` with every detection drawn on it
    pub fn annotate(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = image.clone();
        for detection in detections {
            self.draw_detection(&mut canvas, detection);
        }
        canvas
    }

    fn draw_detection(&self, canvas: &mut RgbImage, detection: &Detection) {
        let color = class_color(detection.class_id);
        let bbox = detection.bbox;
        let x = bbox.x.round() as i32;
        let y = bbox.y.round() as i32;
        let w = bbox.width.round().max(1.0) as u32;
        let h = bbox.height.round().max(1.0) as u32;

        // Thickness grows inwards
        for t in 0..self.line_thickness {
            let inset = 2 * t;
            if inset >= w || inset >= h {
                break;
            }
            let rect = Rect::at(x + t as i32, y + t as i32).of_size(w - inset, h - inset);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        let Some(font) = &self.font else {
            return;
        };
        let Some(caption) = detection.caption(self.hide_labels, self.hide_conf) else {
            return;
        };

        let scale = PxScale::from((self.line_thickness as f32 * 6.0).max(12.0));
        let (text_w, text_h) = text_size(scale, font, &caption);
        let pad = 2;
        let label_h = text_h + 2 * pad;
        // Above the box when there is room, inside it otherwise
        let label_y = if y >= label_h as i32 { y - label_h as i32 } else { y };

        draw_filled_rect_mut(
            canvas,
            Rect::at(x, label_y).of_size(text_w + 2 * pad, label_h),
            color,
        );
        draw_text_mut(
            canvas,
            Rgb([255, 255, 255]),
            x + pad as i32,
            label_y + pad as i32,
            scale,
            font,
            &caption,
        );
    }
}

fn load_font(configured: Option<&Path>) -> Option<FontVec> {
    let candidates: Vec<PathBuf> = match configured {
        Some(path) => vec![path.to_path_buf()],
        None => SYSTEM_FONTS.iter().map(PathBuf::from).collect(),
    };

    for path in candidates {
        let Ok(bytes) = std::fs::read(&path) else {
            continue;
        };
        match FontVec::try_from_vec(bytes) {
            Ok(font) => {
                log::debug!("Using font {:?} for captions", path);
                return Some(font);
            }
            Err(err) => log::warn!("Ignoring font {:?}: {}", path, err),
        }
    }

    log::warn!("No usable TrueType font found, boxes will be drawn without captions");
    None
}

/// "Detected 3 objects" plus per-class counts in first-seen order
pub fn summarize(detections: &[Detection]) -> String {
    let mut summary = format!("Detected {} objects", detections.len());
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for detection in detections {
        match counts.iter_mut().find(|(label, _)| *label == detection.label) {
            Some((_, count)) => *count += 1,
            None => counts.push((&detection.label, 1)),
        }
    }
    if !counts.is_empty() {
        let classes: Vec<String> = counts
            .iter()
            .map(|(label, count)| format!("{count} {label}"))
            .collect();
        summary.push_str(&format!("\nClasses: {}", classes.join(", ")));
    }
    summary
}
