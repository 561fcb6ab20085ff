use crate::gui::screens::{ScreenMessage, detector_page::DetectorScreen};

#[derive(Debug, Clone)]
pub enum Message {
    Detector(ScreenMessage<DetectorScreen>),
}
