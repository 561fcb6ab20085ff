//! Saving annotated results under `runs/detect/exp*`.

use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::config::OutputSettings;
use crate::error::{Error, Result};
use crate::models::Detection;

/// Return `path` if it is free (or `exist_ok`), else the first free `path2`, `path3`, ...
///
/// For files the number goes before the extension: `prediction2.jpg`.
pub fn increment_path(path: &Path, exist_ok: bool) -> PathBuf {
    if exist_ok || !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = match path.extension() {
        Some(ext) if path.is_file() => format!(".{}", ext.to_string_lossy()),
        _ => String::new(),
    };
    let base = if suffix.is_empty() {
        path.file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(stem)
    } else {
        stem
    };

    (2..)
        .map(|n| path.with_file_name(format!("{base}{n}{suffix}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Format like Python's `%g`: six significant digits, no trailing zeros,
/// exponent notation below 1e-4 and from 1e6
fn fmt_g(value: f32) -> String {
    fn trim(text: &str) -> &str {
        if text.contains('.') {
            text.trim_end_matches('0').trim_end_matches('.')
        } else {
            text
        }
    }

    // Rounding to six digits first settles the exponent, e.g. 999999.5 -> 1e+06
    let scientific = format!("{value:.5e}");
    let Some((mantissa, exp)) = scientific.split_once('e') else {
        return value.to_string();
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return value.to_string();
    };

    if (-4..6).contains(&exp) {
        let decimals = (5 - exp) as usize;
        trim(&format!("{value:.decimals$}")).to_string()
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim(mantissa), sign, exp.abs())
    }
}

/// One `class cx cy w h [conf]` line per detection, normalized to the frame size
pub fn yolo_label_lines(
    detections: &[Detection],
    width: u32,
    height: u32,
    save_conf: bool,
) -> Vec<String> {
    let (w, h) = (width.max(1) as f32, height.max(1) as f32);
    detections
        .iter()
        .map(|detection| {
            let (cx, cy) = detection.bbox.center();
            let mut fields = vec![
                detection.class_id.to_string(),
                fmt_g(cx / w),
                fmt_g(cy / h),
                fmt_g(detection.bbox.width / w),
                fmt_g(detection.bbox.height / h),
            ];
            if save_conf {
                fields.push(fmt_g(detection.confidence));
            }
            fields.join(" ")
        })
        .collect()
}

fn write_labels(path: &Path, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| Error::output(parent, err.to_string()))?;
    }
    let mut body = lines.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    std::fs::write(path, body).map_err(|err| Error::output(path, err.to_string()))
}

fn write_image(path: &Path, image: &RgbImage) -> Result<()> {
    image
        .save(path)
        .map_err(|err| Error::output(path, err.to_string()))
}

/// First of `name`, `name2`, `name3`, ... with neither `<dir>/<stem>.jpg`
/// nor `<dir>/labels/<stem>.txt` on disk
fn free_stem(dir: &Path, name: &str) -> String {
    let taken = |stem: &str| {
        dir.join(format!("{stem}.jpg")).exists()
            || dir.join("labels").join(format!("{stem}.txt")).exists()
    };
    if !taken(name) {
        return name.to_string();
    }
    (2u64..)
        .map(|n| format!("{name}{n}"))
        .find(|stem| !taken(stem))
        .unwrap_or_else(|| name.to_string())
}

/// Owns the run directory of one application session
#[derive(Debug)]
pub struct OutputWriter {
    settings: OutputSettings,
    run_dir: Option<PathBuf>,
}

impl OutputWriter {
    pub fn new(settings: OutputSettings) -> Self {
        Self {
            settings,
            run_dir: None,
        }
    }

    pub fn settings(&self) -> &OutputSettings {
        &self.settings
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.save || self.settings.save_txt
    }

    /// Run directory, created on first use
    pub fn run_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.run_dir {
            return Ok(dir.clone());
        }
        let dir = increment_path(
            &self.settings.project.join(&self.settings.name),
            self.settings.exist_ok,
        );
        std::fs::create_dir_all(&dir).map_err(|err| Error::output(&dir, err.to_string()))?;
        log::info!("Saving results to {:?}", dir);
        self.run_dir = Some(dir.clone());
        Ok(dir)
    }

    /// Save one annotated image as `<run>/<name>.jpg`, plus labels when enabled.
    /// The name is numbered until neither the image nor its label file exists.
    /// Returns the image path (the label path with `--nosave`), or `None` when
    /// saving is disabled.
    pub fn save_image(
        &mut self,
        name: &str,
        image: &RgbImage,
        detections: &[Detection],
    ) -> Result<Option<PathBuf>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let dir = self.run_dir()?;
        let stem = free_stem(&dir, name);
        let image_path = dir.join(format!("{stem}.jpg"));
        let label_path = dir.join("labels").join(format!("{stem}.txt"));

        if self.settings.save {
            write_image(&image_path, image)?;
            log::info!("Saved {:?} ({} detections)", image_path, detections.len());
        }
        if self.settings.save_txt {
            let lines = yolo_label_lines(
                detections,
                image.width(),
                image.height(),
                self.settings.save_conf,
            );
            write_labels(&label_path, &lines)?;
        }
        Ok(Some(if self.settings.save {
            image_path
        } else {
            label_path
        }))
    }

    /// Writer for a numbered frame sequence under `<run>/<prefix>`
    pub fn sequence(&mut self, prefix: &str) -> Result<Option<SequenceWriter>> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let run_dir = self.run_dir()?;
        let dir = increment_path(&run_dir.join(prefix), false);
        std::fs::create_dir_all(&dir).map_err(|err| Error::output(&dir, err.to_string()))?;
        log::info!("Recording frames to {:?}", dir);

        Ok(Some(SequenceWriter {
            dir,
            save_images: self.settings.save,
            save_txt: self.settings.save_txt,
            save_conf: self.settings.save_conf,
            written: 0,
        }))
    }
}

/// Writes `frame_000000.jpg`, `frame_000001.jpg`, ... for one playback session
#[derive(Debug)]
pub struct SequenceWriter {
    dir: PathBuf,
    save_images: bool,
    save_txt: bool,
    save_conf: bool,
    written: u64,
}

impl SequenceWriter {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frames_written(&self) -> u64 {
        self.written
    }

    pub fn write(&mut self, index: u64, image: &RgbImage, detections: &[Detection]) -> Result<()> {
        let stem = format!("frame_{index:06}");
        if self.save_images {
            write_image(&self.dir.join(format!("{stem}.jpg")), image)?;
        }
        if self.save_txt {
            let lines = yolo_label_lines(detections, image.width(), image.height(), self.save_conf);
            write_labels(&self.dir.join("labels").join(format!("{stem}.txt")), &lines)?;
        }
        self.written += 1;
        Ok(())
    }

    /// Remove the sequence directory if no frame was ever written to it
    pub fn discard(self) {
        if self.written > 0 {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => log::debug!("Removed unused recording {:?}", self.dir),
            Err(err) => log::warn!("Could not remove {:?}: {}", self.dir, err),
        }
    }
}
