#![allow(dead_code, unused_imports)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from yolo_detector for tests
pub use yolo_detector::{
    Detection, Detector, DetectorSettings, Error, Frame, ModelHandle, PlaybackController,
    PlaybackEvent, PlaybackSettings, PlaybackState, SourceSpec, StopReason,
};
