use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::playback::PlaybackState;

/// Result type alias used across the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to the UI shell. None of them are fatal to the process.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to load weights {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    #[error("Failed to open {target}: {reason}")]
    Source { target: String, reason: String },

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Model is not initialized. Select weights and initialize the model first")]
    ModelNotLoaded,

    #[error("Cannot {action} while playback is {state}")]
    InvalidTransition {
        action: &'static str,
        state: PlaybackState,
    },

    #[error("Failed to save results to {}: {reason}", path.display())]
    Output { path: PathBuf, reason: String },
}

impl Error {
    pub fn load<S: Into<String>>(path: &Path, reason: S) -> Self {
        Self::Load {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn unavailable<T: Into<String>, S: Into<String>>(target: T, reason: S) -> Self {
        Self::Source {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::Inference(msg.into())
    }

    pub fn output<S: Into<String>>(path: &Path, reason: S) -> Self {
        Self::Output {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Short heading for message dialogs
    pub fn title(&self) -> &'static str {
        match self {
            Error::Load { .. } | Error::ModelNotLoaded => "Model Error",
            Error::Source { .. } => "Source Error",
            Error::Inference(_) => "Detection Error",
            Error::InvalidTransition { .. } => "Playback",
            Error::Output { .. } => "Save Error",
        }
    }
}
