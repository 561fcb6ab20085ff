use iced::{Element, Subscription, Task, time};

use super::{AppState, GuiOptions, Message};
use crate::config::APP_NAME;
use crate::gui::screens::{
    Screen, ScreenMessage,
    detector_page::{DetectorMessage, DetectorScreen, ParentMessage},
};

pub struct DetectorApp {
    state: AppState,
    screen: DetectorScreen,
}

impl DetectorApp {
    pub fn new(state: AppState) -> Self {
        let screen = DetectorScreen::new(&state);
        Self { state, screen }
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::Detector(ScreenMessage::ScreenMessage(msg)) => self
                .screen
                .update(msg, &mut self.state)
                .map(Message::Detector),
            Message::Detector(ScreenMessage::ParentMessage(ParentMessage::Exit)) => {
                if self.state.controller.is_running() {
                    let _ = self.state.controller.stop();
                }
                iced::exit()
            }
        }
    }

    pub fn view(&self) -> Element<'_, Message> {
        self.screen.view().map(Message::Detector)
    }

    /// Poll the playback channel while a session may still report events
    pub fn subscription(&self) -> Subscription<Message> {
        if self.state.controller.is_running() || self.screen.awaiting_events() {
            time::every(self.state.playback_settings.frame_interval)
                .map(|_| Message::Detector(ScreenMessage::ScreenMessage(DetectorMessage::Tick)))
        } else {
            Subscription::none()
        }
    }
}

/// Open the main window and block until it is closed
pub fn run(options: GuiOptions) -> anyhow::Result<()> {
    log::info!("Starting {}", APP_NAME);
    iced::application(
        move || DetectorApp::new(AppState::new(options.clone())),
        DetectorApp::update,
        DetectorApp::view,
    )
    .title(APP_NAME)
    .subscription(DetectorApp::subscription)
    .window_size((1280.0, 800.0))
    .run()?;
    Ok(())
}
