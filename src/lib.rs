pub mod config;
pub mod detection;
pub mod error;
pub mod models;
pub mod output;
pub mod playback;
pub mod render;
pub mod source;

pub use config::{AppSettings, DetectorSettings, OutputSettings, PlaybackSettings};
pub use detection::{Detector, ModelHandle, detect, load_weights};
pub use error::{Error, Result};
pub use models::{BoundingBox, Detection, Frame};
pub use output::{OutputWriter, SequenceWriter};
pub use playback::{
    PlaybackController, PlaybackEvent, PlaybackState, RenderedFrame, SessionId, StopReason,
};
pub use render::Annotator;
pub use source::{FrameSource, SourceSpec};

#[cfg(feature = "gui")]
pub mod gui;
