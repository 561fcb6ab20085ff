use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "YOLO Detector";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Weights used by "Initialize Model" when the user never picked a file
pub const DEFAULT_WEIGHTS: &str = "weights/yolov5s.onnx";

/// Detection and drawing parameters, applied when a model is loaded
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorSettings {
    /// Inference size in pixels (square), rounded up to a multiple of the model stride
    pub img_size: u32,
    pub conf_thres: f32,
    pub iou_thres: f32,
    pub max_det: usize,
    /// Keep only these class ids
    pub classes: Option<Vec<usize>>,
    pub agnostic_nms: bool,
    pub line_thickness: u32,
    pub hide_labels: bool,
    pub hide_conf: bool,
    /// TrueType font for box captions
    pub font: Option<PathBuf>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            img_size: 640,
            conf_thres: 0.25,
            iou_thres: 0.45,
            max_det: 1000,
            classes: None,
            agnostic_nms: false,
            line_thickness: 3,
            hide_labels: false,
            hide_conf: false,
            font: None,
        }
    }
}

/// Where and what to save after detection
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub save: bool,
    pub save_txt: bool,
    pub save_conf: bool,
    pub project: PathBuf,
    pub name: String,
    pub exist_ok: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            save: true,
            save_txt: false,
            save_conf: false,
            project: PathBuf::from("runs/detect"),
            name: "exp".to_string(),
            exist_ok: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSettings {
    /// Delay between frames of a finite source without its own frame rate
    pub frame_interval: Duration,
    /// `/dev/video{index}` used by "Camera Detection"
    pub camera_index: u32,
    pub camera_width: u32,
    pub camera_height: u32,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(30),
            camera_index: 0,
            camera_width: 640,
            camera_height: 480,
        }
    }
}

/// State persisted between launches. Only the last weights path is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    pub weights: Option<PathBuf>,
}

impl AppSettings {
    /// `<config dir>/yolo-detector/settings.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("yolo-detector").join("settings.toml"))
    }

    /// Load settings, falling back to defaults when the file does not exist yet
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings {:?}", path))?;
        let settings = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse settings {:?}", path))?;
        Ok(settings)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw).with_context(|| format!("Failed to write settings {:?}", path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_yolov5_detect() {
        let settings = DetectorSettings::default();
        assert_eq!(settings.img_size, 640);
        assert_eq!(settings.conf_thres, 0.25);
        assert_eq!(settings.iou_thres, 0.45);
        assert_eq!(settings.max_det, 1000);
        assert_eq!(settings.line_thickness, 3);
    }

    #[test]
    fn app_settings_roundtrip_through_file() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("nested").join("settings.toml");

        assert_eq!(AppSettings::load_from(&path)?, AppSettings::default());

        let settings = AppSettings {
            weights: Some(PathBuf::from("/models/yolov5n.onnx")),
        };
        settings.save_to(&path)?;
        assert_eq!(AppSettings::load_from(&path)?, settings);
        Ok(())
    }
}
