use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, Frames};

use super::{FrameSource, is_image_file};
use crate::error::{Error, Result};
use crate::models::Frame;

/// Image files played back in file-name order
pub struct ImageSequence {
    label: String,
    files: Vec<PathBuf>,
    position: usize,
}

impl ImageSequence {
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let target = dir.display().to_string();
        let entries =
            std::fs::read_dir(dir).map_err(|err| Error::unavailable(&target, err.to_string()))?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_image_file(path))
            .collect();
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        if files.is_empty() {
            return Err(Error::unavailable(target, "directory contains no image frames"));
        }
        log::debug!("Image sequence {:?}: {} frames", dir, files.len());

        Ok(Self {
            label: target,
            files,
            position: 0,
        })
    }

    pub fn from_files(files: Vec<PathBuf>) -> Self {
        let label = files
            .first()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        Self {
            label,
            files,
            position: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.position) else {
            return Ok(None);
        };
        let image = image::open(path)
            .map_err(|err| Error::unavailable(path.display().to_string(), err.to_string()))?;
        let frame = Frame::from_dynamic(image).with_index(self.position as u64);
        self.position += 1;
        Ok(Some(frame))
    }

    fn description(&self) -> String {
        self.label.clone()
    }
}

/// Animated GIF decoded one frame at a time
pub struct GifSource {
    label: String,
    frames: Frames<'static>,
    index: u64,
}

impl GifSource {
    pub fn open(path: &Path) -> Result<Self> {
        let target = path.display().to_string();
        let file = File::open(path).map_err(|err| Error::unavailable(&target, err.to_string()))?;
        let decoder = GifDecoder::new(BufReader::new(file))
            .map_err(|err| Error::unavailable(&target, err.to_string()))?;

        Ok(Self {
            label: target,
            frames: decoder.into_frames(),
            index: 0,
        })
    }
}

impl FrameSource for GifSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(next) = self.frames.next() else {
            return Ok(None);
        };
        let buffer = next
            .map_err(|err| Error::unavailable(&self.label, err.to_string()))?
            .into_buffer();
        let frame = Frame::from_dynamic(DynamicImage::ImageRgba8(buffer)).with_index(self.index);
        self.index += 1;
        Ok(Some(frame))
    }

    fn description(&self) -> String {
        self.label.clone()
    }
}
