//! Video and camera playback.
//!
//! A session runs on its own thread, pulling frames from a [`FrameSource`],
//! detecting and annotating them, and sending the results over a channel in
//! frame order. The [`PlaybackController`] owns that thread and validates
//! play/pause/stop requests before forwarding them as commands.

mod session;

use std::fmt;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use image::RgbImage;

use crate::config::PlaybackSettings;
use crate::detection::Detector;
use crate::error::{Error, Result};
use crate::models::Detection;
use crate::output::SequenceWriter;
use crate::render::Annotator;
use crate::source::{FrameSource, SourceSpec, open_source};

use session::{Command, Session};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Identifies one start..stop run; events carry it so stale ones can be ignored
pub type SessionId = u64;

/// An annotated frame ready for display
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub session: SessionId,
    pub index: u64,
    pub image: RgbImage,
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Requested,
    EndOfStream,
    SourceFailed(String),
}

/// Everything the playback thread reports, in the order it happened
#[derive(Debug, Clone)]
pub enum PlaybackEvent {
    Started {
        session: SessionId,
        source: String,
        live: bool,
    },
    Frame(RenderedFrame),
    StateChanged {
        session: SessionId,
        state: PlaybackState,
    },
    /// Detection failed on one frame; playback continues
    FrameFailed {
        session: SessionId,
        index: u64,
        message: String,
    },
    /// Recording stopped after a write error; playback continues
    OutputFailed {
        session: SessionId,
        message: String,
    },
    Finished {
        session: SessionId,
        reason: StopReason,
        frames: u64,
    },
}

impl PlaybackEvent {
    pub fn session(&self) -> SessionId {
        match self {
            PlaybackEvent::Started { session, .. }
            | PlaybackEvent::StateChanged { session, .. }
            | PlaybackEvent::FrameFailed { session, .. }
            | PlaybackEvent::OutputFailed { session, .. }
            | PlaybackEvent::Finished { session, .. } => *session,
            PlaybackEvent::Frame(frame) => frame.session,
        }
    }
}

/// Published state of the current (or last) session. Written only by the
/// playback thread.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    pub session: Option<SessionId>,
    pub source: Option<String>,
    pub state: PlaybackState,
    /// Index of the next frame to be pulled
    pub position: u64,
    pub live: bool,
}

struct Worker {
    session: SessionId,
    commands: Sender<Command>,
    handle: JoinHandle<()>,
    /// Last state requested through the controller
    requested: PlaybackState,
}

pub struct PlaybackController {
    detector: Arc<Detector>,
    annotator: Arc<Annotator>,
    settings: PlaybackSettings,
    events: Sender<PlaybackEvent>,
    status: Arc<Mutex<SessionStatus>>,
    worker: Option<Worker>,
    /// Stopped sessions whose thread has not exited yet
    retiring: Vec<Worker>,
    last_session: SessionId,
}

impl PlaybackController {
    pub fn new(
        detector: Arc<Detector>,
        annotator: Arc<Annotator>,
        settings: PlaybackSettings,
        events: Sender<PlaybackEvent>,
    ) -> Self {
        Self {
            detector,
            annotator,
            settings,
            events,
            status: Arc::new(Mutex::new(SessionStatus::default())),
            worker: None,
            retiring: Vec::new(),
            last_session: 0,
        }
    }

    /// Open `spec` and start playing it
    pub fn start(&mut self, spec: SourceSpec) -> Result<SessionId> {
        self.start_recording(spec, None)
    }

    /// Like [`start`](Self::start), also writing every annotated frame to `recorder`
    pub fn start_recording(
        &mut self,
        spec: SourceSpec,
        recorder: Option<SequenceWriter>,
    ) -> Result<SessionId> {
        let settings = self.settings.clone();
        let label = spec.to_string();
        self.start_with(label, move || open_source(&spec, &settings), recorder)
    }

    /// Start a session on whatever source `open` produces. The source is
    /// opened on the playback thread; open failures are returned here.
    pub fn start_with<F>(
        &mut self,
        label: impl Into<String>,
        open: F,
        recorder: Option<SequenceWriter>,
    ) -> Result<SessionId>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>> + Send + 'static,
    {
        let state = self.state();
        if state != PlaybackState::Stopped {
            return Err(Error::InvalidTransition {
                action: "start",
                state,
            });
        }
        self.retire();
        if !self.detector.is_loaded() {
            return Err(Error::ModelNotLoaded);
        }

        let label = label.into();
        let id = self.last_session + 1;
        let (command_tx, command_rx) = mpsc::channel();
        let (opened_tx, opened_rx) = mpsc::channel();

        let session = Session {
            id,
            label: label.clone(),
            detector: Arc::clone(&self.detector),
            annotator: Arc::clone(&self.annotator),
            frame_interval: self.settings.frame_interval,
            events: self.events.clone(),
            status: Arc::clone(&self.status),
            commands: command_rx,
            recorder,
        };

        let handle = std::thread::Builder::new()
            .name(format!("playback-{id}"))
            .spawn(move || session.run(open, opened_tx))
            .map_err(|err| Error::unavailable(&label, format!("cannot spawn playback thread: {err}")))?;

        match opened_rx.recv() {
            Ok(Ok(())) => {
                self.last_session = id;
                self.worker = Some(Worker {
                    session: id,
                    commands: command_tx,
                    handle,
                    requested: PlaybackState::Playing,
                });
                log::info!("Playback session {} started on {}", id, label);
                Ok(id)
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                log::warn!("Could not start playback: {}", err);
                Err(err)
            }
            Err(_) => {
                let _ = handle.join();
                Err(Error::unavailable(label, "playback thread exited before opening the source"))
            }
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        self.request(PlaybackState::Playing, PlaybackState::Paused, "pause", Command::Pause)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.request(PlaybackState::Paused, PlaybackState::Playing, "resume", Command::Resume)
    }

    /// Pause when playing, resume when paused
    pub fn toggle_pause(&mut self) -> Result<PlaybackState> {
        match self.state() {
            PlaybackState::Playing => self.pause().map(|_| PlaybackState::Paused),
            PlaybackState::Paused => self.resume().map(|_| PlaybackState::Playing),
            state => Err(Error::InvalidTransition {
                action: "pause",
                state,
            }),
        }
    }

    /// Stop the session and wait for the playback thread to release the source
    pub fn stop(&mut self) -> Result<()> {
        self.request_stop()?;
        self.join_retiring();
        Ok(())
    }

    /// Ask the playback thread to stop without waiting for it. The controller
    /// reads `Stopped` at once; the thread reports `Finished` once it has
    /// released the source.
    pub fn request_stop(&mut self) -> Result<()> {
        let state = self.state();
        if state == PlaybackState::Stopped {
            self.retire();
            return Err(Error::InvalidTransition {
                action: "stop",
                state,
            });
        }
        if let Some(mut worker) = self.worker.take() {
            worker.requested = PlaybackState::Stopped;
            log::info!("Session {}: stop requested", worker.session);
            self.retiring.push(worker);
        }
        self.retire();
        Ok(())
    }

    /// State as seen by the caller, including requests the playback thread
    /// has not applied yet. A session that ended on its own reads `Stopped`.
    pub fn state(&self) -> PlaybackState {
        let status = self.lock_status();
        match &self.worker {
            Some(worker)
                if status.session == Some(worker.session)
                    && status.state != PlaybackState::Stopped =>
            {
                worker.requested
            }
            _ => PlaybackState::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() != PlaybackState::Stopped
    }

    /// Snapshot of what the playback thread last published
    pub fn status(&self) -> SessionStatus {
        self.lock_status().clone()
    }

    /// Id of the running session, if any
    pub fn session(&self) -> Option<SessionId> {
        self.is_running()
            .then(|| self.worker.as_ref().map(|w| w.session))
            .flatten()
    }

    fn request(
        &mut self,
        from: PlaybackState,
        to: PlaybackState,
        action: &'static str,
        command: Command,
    ) -> Result<()> {
        let state = self.state();
        if state != from {
            return Err(Error::InvalidTransition { action, state });
        }
        if let Some(worker) = self.worker.as_mut() {
            if worker.commands.send(command).is_ok() {
                worker.requested = to;
                log::debug!("Session {}: {} requested", worker.session, action);
                return Ok(());
            }
        }
        Err(Error::InvalidTransition {
            action,
            state: PlaybackState::Stopped,
        })
    }

    /// Send `Stop` to the current and retiring threads, then join the ones
    /// that have already exited. Never blocks on a thread still running.
    fn retire(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.retiring.push(worker);
        }
        let (finished, running): (Vec<Worker>, Vec<Worker>) = self
            .retiring
            .drain(..)
            .partition(|worker| worker.handle.is_finished());
        for worker in finished {
            Self::join(worker);
        }
        for worker in &running {
            let _ = worker.commands.send(Command::Stop);
        }
        self.retiring = running;
    }

    /// Wait for every stopped thread to exit
    fn join_retiring(&mut self) {
        for worker in self.retiring.drain(..) {
            let _ = worker.commands.send(Command::Stop);
            Self::join(worker);
        }
    }

    fn join(worker: Worker) {
        let session = worker.session;
        if worker.handle.join().is_err() {
            log::error!("Playback thread for session {} panicked", session);
        } else {
            log::debug!("Playback thread for session {} joined", session);
        }
    }

    fn lock_status(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            log::debug!("Stopping playback on shutdown");
            self.retiring.push(worker);
        }
        self.join_retiring();
    }
}
