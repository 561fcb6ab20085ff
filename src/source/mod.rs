//! Frame sources for video playback and still images.
//!
//! Sources are opened on the playback thread and never cross threads, so
//! backends holding raw device or decoder handles need not be `Send`.

#[cfg(feature = "camera")]
mod camera;
#[cfg(feature = "ffmpeg")]
mod ffmpeg;
#[cfg_attr(not(feature = "camera"), allow(dead_code))]
pub mod normalize;
mod sequence;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::PlaybackSettings;
use crate::error::{Error, Result};
use crate::models::Frame;

pub use sequence::{GifSource, ImageSequence};

/// Still image formats accepted by image detection and directory playback
pub const IMAGE_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "bmp", "gif", "webp", "tif", "tiff"];

/// Container formats handed to FFmpeg
pub const VIDEO_EXTENSIONS: [&str; 9] = ["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "mpg"];

/// A stream of frames pulled by the playback loop
pub trait FrameSource {
    /// Next frame, or `None` once a finite source is exhausted
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Live sources never reach end-of-stream and are not paced
    fn is_live(&self) -> bool {
        false
    }

    fn description(&self) -> String;
}

/// What the user asked to play
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    Video(PathBuf),
    Camera(u32),
}

impl SourceSpec {
    pub fn is_camera(&self) -> bool {
        matches!(self, SourceSpec::Camera(_))
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Video(path) => write!(f, "{}", path.display()),
            SourceSpec::Camera(index) => write!(f, "camera {index}"),
        }
    }
}

pub(crate) fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

pub fn is_image_file(path: &Path) -> bool {
    IMAGE_EXTENSIONS.contains(&extension_of(path).as_str())
}

/// Open a source for playback
pub fn open_source(spec: &SourceSpec, settings: &PlaybackSettings) -> Result<Box<dyn FrameSource>> {
    match spec {
        SourceSpec::Video(path) => open_video(path),
        SourceSpec::Camera(index) => open_camera(*index, settings),
    }
}

fn open_video(path: &Path) -> Result<Box<dyn FrameSource>> {
    let target = path.display().to_string();
    if path.is_dir() {
        return Ok(Box::new(ImageSequence::from_dir(path)?));
    }
    if !path.is_file() {
        return Err(Error::unavailable(target, "file not found"));
    }

    let extension = extension_of(path);
    if extension == "gif" {
        return Ok(Box::new(GifSource::open(path)?));
    }
    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        // A still image plays as a one-frame video
        return Ok(Box::new(ImageSequence::from_files(vec![path.to_path_buf()])));
    }
    open_video_file(path, &extension)
}

#[cfg(feature = "ffmpeg")]
fn open_video_file(path: &Path, _extension: &str) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(ffmpeg::FfmpegSource::open(path)?))
}

#[cfg(not(feature = "ffmpeg"))]
fn open_video_file(path: &Path, extension: &str) -> Result<Box<dyn FrameSource>> {
    let reason = if VIDEO_EXTENSIONS.contains(&extension) {
        "video files need the `ffmpeg` feature; play a GIF or a directory of frames instead"
            .to_string()
    } else {
        format!("unsupported video format '.{extension}'")
    };
    Err(Error::unavailable(path.display().to_string(), reason))
}

#[cfg(feature = "camera")]
fn open_camera(index: u32, settings: &PlaybackSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(camera::CameraSource::open(
        index,
        settings.camera_width,
        settings.camera_height,
    )?))
}

#[cfg(not(feature = "camera"))]
fn open_camera(index: u32, _settings: &PlaybackSettings) -> Result<Box<dyn FrameSource>> {
    Err(Error::unavailable(
        format!("camera {index}"),
        "camera support is not enabled in this build (rebuild with the `camera` feature)",
    ))
}

/// Load a still image as a frame
pub fn load_image(path: &Path) -> Result<Frame> {
    let target = path.display().to_string();
    if !path.is_file() {
        return Err(Error::unavailable(target, "file not found"));
    }
    let image = image::open(path).map_err(|err| Error::unavailable(target, err.to_string()))?;
    Ok(Frame::from_dynamic(image))
}
