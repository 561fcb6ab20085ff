use std::path::PathBuf;
use std::sync::Arc;

use iced::{
    ContentFit, Element, Length, Task,
    widget::{button, column, container, image, text},
};
use rfd::{AsyncFileDialog, AsyncMessageDialog, MessageButtons, MessageLevel};

use crate::config::{APP_NAME, APP_VERSION, DEFAULT_WEIGHTS};
use crate::detection::{self, ImageDetection};
use crate::error::Error;
use crate::gui::{
    AppState,
    screens::{Screen, ScreenMessage},
    widgets::{group, layout},
};
use crate::playback::{PlaybackEvent, PlaybackState, SessionId, StopReason};
use crate::render::summarize;
use crate::source::{IMAGE_EXTENSIONS, SourceSpec, VIDEO_EXTENSIONS};

/// An error ready to be shown in a dialog
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub title: String,
    pub message: String,
}

impl From<Error> for ErrorReport {
    fn from(err: Error) -> Self {
        Self {
            title: err.title().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorScreen {
    display: Option<image::Handle>,
    status_text: String,
    status_bar: String,
    model_ready: bool,
    busy: bool,
    playback: PlaybackState,
    session: Option<SessionId>,
    camera_active: bool,
}

#[derive(Debug, Clone)]
pub enum DetectorMessage {
    SelectWeights,
    WeightsSelected(Option<PathBuf>),
    Initialize,
    Initialized(Result<PathBuf, ErrorReport>),
    DetectImage,
    ImagePicked(Option<PathBuf>),
    ImageDetected(Result<ImageDetection, ErrorReport>),
    DetectVideo,
    VideoPicked(Option<PathBuf>),
    ToggleCamera,
    TogglePause,
    Stop,
    Tick,
    About,
    None,
}

#[derive(Debug, Clone)]
pub enum ParentMessage {
    Exit,
}

fn to_handle(frame: &::image::RgbImage) -> image::Handle {
    let rgba = ::image::DynamicImage::ImageRgb8(frame.clone()).to_rgba8();
    image::Handle::from_rgba(rgba.width(), rgba.height(), rgba.into_raw())
}

fn dialog(level: MessageLevel, title: &str, message: &str) -> Task<ScreenMessage<DetectorScreen>> {
    Task::perform(
        AsyncMessageDialog::new()
            .set_level(level)
            .set_title(title)
            .set_description(message)
            .set_buttons(MessageButtons::Ok)
            .show(),
        |_| ScreenMessage::ScreenMessage(DetectorMessage::None),
    )
}

fn error_dialog(report: &ErrorReport) -> Task<ScreenMessage<DetectorScreen>> {
    dialog(MessageLevel::Error, &report.title, &report.message)
}

impl DetectorScreen {
    pub fn new(state: &AppState) -> Self {
        let status_text = match &state.weights {
            Some(path) => format!("Selected weights: {}", path.display()),
            None => "No image loaded".to_string(),
        };
        Self {
            display: None,
            status_text,
            status_bar: "Ready".to_string(),
            model_ready: false,
            busy: false,
            playback: PlaybackState::Stopped,
            session: None,
            camera_active: false,
        }
    }

    /// True while playback events may still arrive
    pub fn awaiting_events(&self) -> bool {
        self.session.is_some()
    }

    fn running(&self) -> bool {
        self.session.is_some()
    }

    fn fail(&mut self, report: ErrorReport) -> Task<ScreenMessage<Self>> {
        log::warn!("{}: {}", report.title, report.message);
        self.status_text = format!("Error: {}", report.message);
        self.status_bar = "Error".to_string();
        error_dialog(&report)
    }

    fn require_model(&mut self) -> Option<Task<ScreenMessage<Self>>> {
        if self.model_ready {
            return None;
        }
        Some(dialog(
            MessageLevel::Warning,
            "Warning",
            "Please initialize the model first",
        ))
    }

    fn start(&mut self, spec: SourceSpec, state: &mut AppState) -> Task<ScreenMessage<Self>> {
        let prefix = if spec.is_camera() {
            "camera_detection"
        } else {
            "prediction"
        };
        let (recorder, output_error) = match state.output.sequence(prefix) {
            Ok(recorder) => (recorder, None),
            Err(err) => (None, Some(ErrorReport::from(err))),
        };

        match state.controller.start_recording(spec.clone(), recorder) {
            Ok(session) => {
                self.session = Some(session);
                self.playback = PlaybackState::Playing;
                self.camera_active = spec.is_camera();
                self.status_text = match &spec {
                    SourceSpec::Camera(_) => "Camera detection started".to_string(),
                    SourceSpec::Video(path) => format!("Processing video: {}", path.display()),
                };
                self.status_bar = if self.camera_active {
                    "Camera detection active".to_string()
                } else {
                    "Video detection started".to_string()
                };
                match output_error {
                    Some(report) => error_dialog(&report),
                    None => Task::none(),
                }
            }
            Err(err) => self.fail(err.into()),
        }
    }

    /// Request a stop; `Finished` arrives on a later tick once the source is released
    fn stop(&mut self, state: &mut AppState) -> Task<ScreenMessage<Self>> {
        match state.controller.request_stop() {
            Ok(()) => self.status_bar = "Stopping...".to_string(),
            Err(err) => log::debug!("{}", err),
        }
        let events = state.drain_events();
        self.handle_events(events)
    }

    fn handle_events(&mut self, events: Vec<PlaybackEvent>) -> Task<ScreenMessage<Self>> {
        let mut tasks = Vec::new();
        for event in events {
            if Some(event.session()) != self.session {
                continue;
            }
            match event {
                PlaybackEvent::Started { .. } => {}
                PlaybackEvent::Frame(frame) => {
                    self.display = Some(to_handle(&frame.image));
                    self.status_text = summarize(&frame.detections);
                }
                PlaybackEvent::StateChanged { state, .. } => {
                    self.playback = state;
                    match state {
                        PlaybackState::Paused => self.status_bar = "Paused".to_string(),
                        PlaybackState::Playing => self.status_bar = "Running".to_string(),
                        PlaybackState::Stopped => {}
                    }
                }
                PlaybackEvent::FrameFailed { index, message, .. } => {
                    self.status_bar = format!("Frame {index} failed: {message}");
                }
                PlaybackEvent::OutputFailed { message, .. } => {
                    tasks.push(error_dialog(&ErrorReport {
                        title: "Save Error".to_string(),
                        message,
                    }));
                }
                PlaybackEvent::Finished { reason, frames, .. } => {
                    self.session = None;
                    self.playback = PlaybackState::Stopped;
                    self.camera_active = false;
                    self.display = None;
                    self.status_bar = "Ready".to_string();
                    self.status_text = match reason {
                        StopReason::Requested => "Detection stopped".to_string(),
                        StopReason::EndOfStream => {
                            format!("Video finished ({frames} frames)")
                        }
                        StopReason::SourceFailed(message) => {
                            let report = ErrorReport {
                                title: "Source Error".to_string(),
                                message: message.clone(),
                            };
                            tasks.push(error_dialog(&report));
                            format!("Error: {message}")
                        }
                    };
                }
            }
        }
        Task::batch(tasks)
    }

    fn control_panel(&self) -> Element<'_, ScreenMessage<Self>> {
        let msg = |m: DetectorMessage| ScreenMessage::ScreenMessage(m);
        let idle = !self.running() && !self.busy;

        let model_setup = column![
            button("Select Weights")
                .width(Length::Fill)
                .on_press_maybe(idle.then(|| msg(DetectorMessage::SelectWeights))),
            button("Initialize Model")
                .width(Length::Fill)
                .on_press_maybe(idle.then(|| msg(DetectorMessage::Initialize))),
        ]
        .spacing(6);

        let camera_label = if self.camera_active {
            "Stop Camera"
        } else {
            "Camera Detection"
        };
        let detection = column![
            button("Image Detection")
                .width(Length::Fill)
                .on_press_maybe(idle.then(|| msg(DetectorMessage::DetectImage))),
            button("Video Detection")
                .width(Length::Fill)
                .on_press_maybe(idle.then(|| msg(DetectorMessage::DetectVideo))),
            button(camera_label)
                .width(Length::Fill)
                .on_press_maybe((idle || self.camera_active).then(|| msg(DetectorMessage::ToggleCamera))),
        ]
        .spacing(6);

        let pause_label = if self.playback == PlaybackState::Paused {
            "Resume"
        } else {
            "Pause"
        };
        let control = column![
            button(pause_label)
                .width(Length::Fill)
                .on_press_maybe(self.running().then(|| msg(DetectorMessage::TogglePause))),
            button("Stop")
                .width(Length::Fill)
                .on_press_maybe(self.running().then(|| msg(DetectorMessage::Stop))),
        ]
        .spacing(6);

        let menu = column![
            button("About").on_press(msg(DetectorMessage::About)),
            button("Exit").on_press(ScreenMessage::ParentMessage(ParentMessage::Exit)),
        ]
        .spacing(6);

        column![
            text(APP_NAME).size(24),
            group("Model Setup", model_setup),
            group("Detection", detection),
            group("Control", control),
            menu,
        ]
        .spacing(12)
        .into()
    }

    fn display_panel(&self) -> Element<'_, ScreenMessage<Self>> {
        let display: Element<'_, ScreenMessage<Self>> = match &self.display {
            Some(handle) => image(handle.clone())
                .content_fit(ContentFit::Contain)
                .width(Length::Fill)
                .height(Length::Fill)
                .into(),
            None => container(text("No image loaded"))
                .center_x(Length::Fill)
                .center_y(Length::Fill)
                .into(),
        };

        column![
            container(display).height(Length::FillPortion(5)),
            group("Status", text(&self.status_text)),
        ]
        .spacing(10)
        .into()
    }
}

impl Screen for DetectorScreen {
    type Message = DetectorMessage;
    type ParentMessage = ParentMessage;

    fn view(&self) -> Element<'_, ScreenMessage<Self>> {
        layout(self.control_panel(), self.display_panel(), &self.status_bar)
    }

    fn update(
        &mut self,
        message: Self::Message,
        state: &mut AppState,
    ) -> Task<ScreenMessage<Self>> {
        match message {
            DetectorMessage::SelectWeights => Task::perform(
                AsyncFileDialog::new()
                    .set_title("Select weights file")
                    .set_directory("weights")
                    .add_filter("ONNX weights", &["onnx"])
                    .pick_file(),
                |handle| {
                    ScreenMessage::ScreenMessage(DetectorMessage::WeightsSelected(
                        handle.map(|data| data.path().to_path_buf()),
                    ))
                },
            ),
            DetectorMessage::WeightsSelected(Some(path)) => {
                self.status_text = format!("Selected weights: {}", path.display());
                state.remember_weights(path);
                Task::none()
            }
            DetectorMessage::WeightsSelected(None) => {
                self.status_text = "No weights file selected".to_string();
                Task::none()
            }
            DetectorMessage::Initialize => {
                let path = state
                    .weights
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_WEIGHTS));
                self.busy = true;
                self.status_bar = "Initializing model...".to_string();
                Task::perform(
                    detection::initialize(
                        Arc::clone(&state.detector),
                        path,
                        state.detector_settings.clone(),
                    ),
                    |result| {
                        ScreenMessage::ScreenMessage(DetectorMessage::Initialized(
                            result.map_err(ErrorReport::from),
                        ))
                    },
                )
            }
            DetectorMessage::Initialized(Ok(path)) => {
                self.busy = false;
                self.model_ready = true;
                self.status_text = format!(
                    "Model initialized successfully\nWeights: {}",
                    path.display()
                );
                self.status_bar = "Model ready".to_string();
                dialog(MessageLevel::Info, "Success", "Model initialized successfully")
            }
            DetectorMessage::Initialized(Err(report)) => {
                self.busy = false;
                self.model_ready = state.detector.is_loaded();
                let task = self.fail(report);
                self.status_bar = "Model initialization failed".to_string();
                task
            }
            DetectorMessage::DetectImage => {
                if let Some(warning) = self.require_model() {
                    return warning;
                }
                Task::perform(
                    AsyncFileDialog::new()
                        .set_title("Open Image")
                        .add_filter("Images", &IMAGE_EXTENSIONS)
                        .pick_file(),
                    |handle| {
                        ScreenMessage::ScreenMessage(DetectorMessage::ImagePicked(
                            handle.map(|data| data.path().to_path_buf()),
                        ))
                    },
                )
            }
            DetectorMessage::ImagePicked(None) => {
                self.status_text = "No image selected".to_string();
                Task::none()
            }
            DetectorMessage::ImagePicked(Some(path)) => {
                self.busy = true;
                self.status_text = format!("Processing image: {}", path.display());
                self.status_bar = "Processing image...".to_string();
                Task::perform(
                    detection::detect_image_file(
                        Arc::clone(&state.detector),
                        Arc::clone(&state.annotator),
                        path,
                    ),
                    |result| {
                        ScreenMessage::ScreenMessage(DetectorMessage::ImageDetected(
                            result.map_err(ErrorReport::from),
                        ))
                    },
                )
            }
            DetectorMessage::ImageDetected(Ok(result)) => {
                self.busy = false;
                self.display = Some(to_handle(&result.annotated));
                self.status_text = summarize(&result.detections);
                self.status_bar = "Detection complete".to_string();
                match state
                    .output
                    .save_image("prediction", &result.annotated, &result.detections)
                {
                    Ok(_) => Task::none(),
                    Err(err) => self.fail(err.into()),
                }
            }
            DetectorMessage::ImageDetected(Err(report)) => {
                self.busy = false;
                self.fail(report)
            }
            DetectorMessage::DetectVideo => {
                if let Some(warning) = self.require_model() {
                    return warning;
                }
                let mut extensions: Vec<&str> = VIDEO_EXTENSIONS.to_vec();
                extensions.push("gif");
                Task::perform(
                    AsyncFileDialog::new()
                        .set_title("Open Video")
                        .add_filter("Videos", extensions.as_slice())
                        .pick_file(),
                    |handle| {
                        ScreenMessage::ScreenMessage(DetectorMessage::VideoPicked(
                            handle.map(|data| data.path().to_path_buf()),
                        ))
                    },
                )
            }
            DetectorMessage::VideoPicked(None) => {
                self.status_text = "No video selected".to_string();
                Task::none()
            }
            DetectorMessage::VideoPicked(Some(path)) => self.start(SourceSpec::Video(path), state),
            DetectorMessage::ToggleCamera => {
                if self.camera_active {
                    return self.stop(state);
                }
                if let Some(warning) = self.require_model() {
                    return warning;
                }
                let index = state.playback_settings.camera_index;
                self.start(SourceSpec::Camera(index), state)
            }
            DetectorMessage::TogglePause => match state.controller.toggle_pause() {
                Ok(next) => {
                    self.playback = next;
                    Task::none()
                }
                Err(err) => {
                    log::debug!("{}", err);
                    Task::none()
                }
            },
            DetectorMessage::Stop => self.stop(state),
            DetectorMessage::Tick => {
                let events = state.drain_events();
                self.handle_events(events)
            }
            DetectorMessage::About => dialog(
                MessageLevel::Info,
                &format!("About {APP_NAME}"),
                &format!(
                    "{APP_NAME} v{APP_VERSION}\n\n\
                     An application for object detection using YOLOv5.\n\n\
                     Based on Ultralytics YOLOv5 implementation."
                ),
            ),
            DetectorMessage::None => Task::none(),
        }
    }
}
