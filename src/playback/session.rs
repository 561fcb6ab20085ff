use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{PlaybackEvent, PlaybackState, RenderedFrame, SessionId, SessionStatus, StopReason};
use crate::detection::Detector;
use crate::error::Result;
use crate::models::Frame;
use crate::output::SequenceWriter;
use crate::render::Annotator;
use crate::source::FrameSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Command {
    Pause,
    Resume,
    Stop,
}

/// Everything the playback thread owns for one run
pub(super) struct Session {
    pub id: SessionId,
    pub label: String,
    pub detector: Arc<Detector>,
    pub annotator: Arc<Annotator>,
    pub frame_interval: Duration,
    pub events: Sender<PlaybackEvent>,
    pub status: Arc<Mutex<SessionStatus>>,
    pub commands: Receiver<Command>,
    pub recorder: Option<SequenceWriter>,
}

impl Session {
    pub fn run<F>(mut self, open: F, opened: Sender<Result<()>>)
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>>,
    {
        let mut source = match open() {
            Ok(source) => source,
            Err(err) => {
                if let Some(recorder) = self.recorder.take() {
                    recorder.discard();
                }
                let _ = opened.send(Err(err));
                return;
            }
        };
        let live = source.is_live();

        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = SessionStatus {
            session: Some(self.id),
            source: Some(self.label.clone()),
            state: PlaybackState::Playing,
            position: 0,
            live,
        };
        let _ = opened.send(Ok(()));
        drop(opened);

        self.emit(PlaybackEvent::Started {
            session: self.id,
            source: self.label.clone(),
            live,
        });
        self.emit(PlaybackEvent::StateChanged {
            session: self.id,
            state: PlaybackState::Playing,
        });

        let (reason, frames) = self.pull_frames(source.as_mut(), live);

        // Release the device or file before anyone can observe Stopped
        drop(source);
        self.publish(|status| status.state = PlaybackState::Stopped);

        match &reason {
            StopReason::SourceFailed(message) => {
                log::warn!("Session {}: source failed: {}", self.id, message)
            }
            reason => log::info!(
                "Session {} finished after {} frames ({:?})",
                self.id,
                frames,
                reason
            ),
        }
        self.emit(PlaybackEvent::StateChanged {
            session: self.id,
            state: PlaybackState::Stopped,
        });
        self.emit(PlaybackEvent::Finished {
            session: self.id,
            reason,
            frames,
        });
    }

    /// Frame loop. Returns why it ended and how many frames it rendered.
    fn pull_frames(&mut self, source: &mut dyn FrameSource, live: bool) -> (StopReason, u64) {
        let mut paused = false;
        let mut pending: Option<Command> = None;
        let mut rendered = 0;

        loop {
            let command = if let Some(command) = pending.take() {
                Some(command)
            } else if paused {
                Some(self.commands.recv().unwrap_or(Command::Stop))
            } else {
                match self.commands.try_recv() {
                    Ok(command) => Some(command),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => Some(Command::Stop),
                }
            };

            match command {
                Some(Command::Stop) => return (StopReason::Requested, rendered),
                Some(Command::Pause) => {
                    if !paused {
                        paused = true;
                        self.set_state(PlaybackState::Paused);
                    }
                    continue;
                }
                Some(Command::Resume) => {
                    if paused {
                        paused = false;
                        self.set_state(PlaybackState::Playing);
                    }
                    continue;
                }
                None => {}
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return (StopReason::EndOfStream, rendered),
                Err(err) => return (StopReason::SourceFailed(err.to_string()), rendered),
            };
            if self.process(frame) {
                rendered += 1;
            }

            // Live sources are paced by the device itself
            if !live {
                match self.commands.recv_timeout(self.frame_interval) {
                    Ok(command) => pending = Some(command),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => pending = Some(Command::Stop),
                }
            }
        }
    }

    /// Detect, annotate and deliver one frame. Returns false if detection failed.
    fn process(&mut self, frame: Frame) -> bool {
        let index = frame.index;
        let result = self.detector.detect(&frame);
        self.publish(|status| status.position = index + 1);

        let detections = match result {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!("Session {}: frame {} failed: {}", self.id, index, err);
                self.emit(PlaybackEvent::FrameFailed {
                    session: self.id,
                    index,
                    message: err.to_string(),
                });
                return false;
            }
        };

        let image = self.annotator.annotate(&frame.image, &detections);
        self.record(index, &image, &detections);
        self.emit(PlaybackEvent::Frame(RenderedFrame {
            session: self.id,
            index,
            image,
            detections,
        }));
        true
    }

    fn record(&mut self, index: u64, image: &image::RgbImage, detections: &[crate::models::Detection]) {
        let Some(recorder) = self.recorder.as_mut() else {
            return;
        };
        if let Err(err) = recorder.write(index, image, detections) {
            log::warn!("Session {}: recording stopped: {}", self.id, err);
            self.recorder = None;
            self.emit(PlaybackEvent::OutputFailed {
                session: self.id,
                message: err.to_string(),
            });
        }
    }

    fn set_state(&self, state: PlaybackState) {
        log::info!("Session {}: {}", self.id, state);
        self.publish(|status| status.state = state);
        self.emit(PlaybackEvent::StateChanged {
            session: self.id,
            state,
        });
    }

    /// Update the shared status unless a newer session has taken it over
    fn publish(&self, update: impl FnOnce(&mut SessionStatus)) {
        let mut status = self.status.lock().unwrap_or_else(|e| e.into_inner());
        if status.session == Some(self.id) {
            update(&mut status);
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        // The receiver may be gone during shutdown
        let _ = self.events.send(event);
    }
}
