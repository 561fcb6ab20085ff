//! Decoding of raw YOLOv5 output rows into boxes.
//!
//! Each output row is `[cx, cy, w, h, objectness, class_0 .. class_n]`, in model
//! input pixels, with sigmoid already applied by the exported graph.

use std::cmp::Ordering;

use tract_onnx::prelude::tract_ndarray::ArrayView2;

use crate::config::DetectorSettings;
use crate::error::{Error, Result};
use crate::models::BoundingBox;

/// Upper bound on boxes handed to NMS
pub const MAX_NMS: usize = 30_000;

/// A box that passed the confidence filter, still in model input space
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub confidence: f32,
}

/// Turn raw output rows into candidates above the confidence threshold
pub fn decode(output: ArrayView2<'_, f32>, settings: &DetectorSettings) -> Result<Vec<Candidate>> {
    if output.ncols() < 6 {
        return Err(Error::inference(format!(
            "unexpected model output with {} columns, expected 5 + number of classes",
            output.ncols()
        )));
    }

    let mut candidates = Vec::new();
    for row in output.rows() {
        let objectness = row[4];
        if !(objectness > settings.conf_thres) {
            continue;
        }

        let (class_id, class_score) = row
            .iter()
            .skip(5)
            .copied()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, score)| {
                if score > best.1 { (i, score) } else { best }
            });

        let confidence = (objectness * class_score).clamp(0.0, 1.0);
        if !(confidence > settings.conf_thres) {
            continue;
        }
        if let Some(classes) = &settings.classes {
            if !classes.contains(&class_id) {
                continue;
            }
        }

        candidates.push(Candidate {
            bbox: BoundingBox::from_center(row[0], row[1], row[2], row[3]),
            class_id,
            confidence,
        });
    }

    Ok(candidates)
}

/// Greedy non-maximum suppression, per class unless `agnostic`
pub fn non_max_suppression(
    mut candidates: Vec<Candidate>,
    iou_thres: f32,
    agnostic: bool,
    max_det: usize,
) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });
    candidates.truncate(MAX_NMS);

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if keep.len() >= max_det {
            break;
        }
        let suppressed = keep.iter().any(|kept| {
            (agnostic || kept.class_id == candidate.class_id)
                && kept.bbox.iou(&candidate.bbox) > iou_thres
        });
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}
