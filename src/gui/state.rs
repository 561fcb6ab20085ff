use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};

use crate::config::{AppSettings, DetectorSettings, OutputSettings, PlaybackSettings};
use crate::detection::Detector;
use crate::output::OutputWriter;
use crate::playback::{PlaybackController, PlaybackEvent};
use crate::render::Annotator;

/// Everything the window needs to start with
#[derive(Debug, Clone, Default)]
pub struct GuiOptions {
    pub detector: DetectorSettings,
    pub output: OutputSettings,
    pub playback: PlaybackSettings,
    /// Preselected weights; falls back to the persisted choice
    pub weights: Option<PathBuf>,
    /// Where the last weights choice is remembered
    pub settings_path: Option<PathBuf>,
}

pub struct AppState {
    pub detector: Arc<Detector>,
    pub annotator: Arc<Annotator>,
    pub detector_settings: DetectorSettings,
    pub playback_settings: PlaybackSettings,
    pub controller: PlaybackController,
    pub events: Receiver<PlaybackEvent>,
    pub output: OutputWriter,
    pub weights: Option<PathBuf>,
    pub settings_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(options: GuiOptions) -> Self {
        let remembered = options.settings_path.as_deref().and_then(|path| {
            AppSettings::load_from(path)
                .map_err(|err| log::warn!("{:#}", err))
                .ok()
                .and_then(|settings| settings.weights)
        });

        let detector = Arc::new(Detector::new());
        let annotator = Arc::new(Annotator::new(&options.detector));
        let (events_tx, events) = mpsc::channel();
        let controller = PlaybackController::new(
            Arc::clone(&detector),
            Arc::clone(&annotator),
            options.playback.clone(),
            events_tx,
        );

        Self {
            detector,
            annotator,
            detector_settings: options.detector,
            playback_settings: options.playback,
            controller,
            events,
            output: OutputWriter::new(options.output),
            weights: options.weights.or(remembered),
            settings_path: options.settings_path,
        }
    }

    /// Remember the selected weights for the next launch
    pub fn remember_weights(&mut self, path: PathBuf) {
        if let Some(settings_path) = &self.settings_path {
            let settings = AppSettings {
                weights: Some(path.clone()),
            };
            if let Err(err) = settings.save_to(settings_path) {
                log::warn!("Could not persist weights choice: {:#}", err);
            }
        }
        self.weights = Some(path);
    }

    /// Events the playback thread produced since the last call
    pub fn drain_events(&self) -> Vec<PlaybackEvent> {
        self.events.try_iter().collect()
    }
}
