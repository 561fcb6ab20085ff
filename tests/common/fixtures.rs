use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};
use tract_onnx::prelude::tract_ndarray::{Array3, Array4, ArrayD};
use yolo_detector::detection::InferenceBackend;
use yolo_detector::render::Annotator;
use yolo_detector::source::FrameSource;
use yolo_detector::{
    Detector, DetectorSettings, Frame, ModelHandle, PlaybackController, PlaybackEvent,
    PlaybackSettings,
};

/// Model input size used by the scripted backend
pub const TEST_INPUT: u32 = 64;

/// Stand-in for a YOLOv5 export: reports one "spot" (class 0) covering all
/// bright pixels of the input, and nothing on dark frames.
pub struct BrightSpotBackend;

impl InferenceBackend for BrightSpotBackend {
    fn name(&self) -> &str {
        "bright-spot"
    }

    fn input_size(&self) -> (u32, u32) {
        (TEST_INPUT, TEST_INPUT)
    }

    fn infer(&self, input: Array4<f32>) -> anyhow::Result<ArrayD<f32>> {
        let (_, channels, height, width) = input.dim();
        anyhow::ensure!(channels == 3, "expected 3 channels, got {channels}");

        let mut bounds: Option<(usize, usize, usize, usize)> = None;
        for y in 0..height {
            for x in 0..width {
                let bright = (0..3).all(|c| input[[0, c, y, x]] > 0.5);
                if bright {
                    bounds = Some(match bounds {
                        None => (x, y, x, y),
                        Some((x1, y1, x2, y2)) => (x1.min(x), y1.min(y), x2.max(x), y2.max(y)),
                    });
                }
            }
        }

        let row = match bounds {
            Some((x1, y1, x2, y2)) => {
                let (w, h) = ((x2 - x1 + 1) as f32, (y2 - y1 + 1) as f32);
                vec![x1 as f32 + w / 2.0, y1 as f32 + h / 2.0, w, h, 0.9, 0.95, 0.1]
            }
            None => vec![0.0; 7],
        };
        Ok(Array3::from_shape_vec((1, 1, 7), row)?.into_dyn())
    }
}

/// [`BrightSpotBackend`] that reports entering `infer`, then holds the call
/// until the gate is opened (or ten seconds pass).
pub struct GatedBackend {
    entered: Mutex<Sender<()>>,
    gate: Mutex<Receiver<()>>,
}

impl GatedBackend {
    /// Returns the backend, a receiver signalled on each `infer`, and the gate
    pub fn new() -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let backend = Self {
            entered: Mutex::new(entered_tx),
            gate: Mutex::new(gate_rx),
        };
        (backend, entered_rx, gate_tx)
    }
}

impl InferenceBackend for GatedBackend {
    fn name(&self) -> &str {
        "gated"
    }

    fn input_size(&self) -> (u32, u32) {
        BrightSpotBackend.input_size()
    }

    fn infer(&self, input: Array4<f32>) -> anyhow::Result<ArrayD<f32>> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.gate.lock().unwrap().recv_timeout(Duration::from_secs(10));
        BrightSpotBackend.infer(input)
    }
}

pub fn test_settings() -> DetectorSettings {
    DetectorSettings {
        img_size: TEST_INPUT,
        ..DetectorSettings::default()
    }
}

pub fn scripted_model(names: &[&str]) -> ModelHandle {
    ModelHandle::from_backend(
        Box::new(BrightSpotBackend),
        names.iter().map(|name| name.to_string()).collect(),
        "scripted.onnx",
        test_settings(),
    )
}

/// Detector with the scripted model already installed
pub fn loaded_detector() -> Arc<Detector> {
    let detector = Detector::new();
    detector.install(scripted_model(&["spot", "other"]));
    Arc::new(detector)
}

pub fn test_annotator() -> Arc<Annotator> {
    Arc::new(Annotator::boxes_only(2))
}

pub fn black_frame(width: u32, height: u32) -> Frame {
    Frame::new(RgbImage::new(width, height))
}

/// Black frame with a white square at (x, y)
pub fn frame_with_spot(width: u32, height: u32, x: u32, y: u32, size: u32) -> Frame {
    let image = RgbImage::from_fn(width, height, |px, py| {
        if (x..x + size).contains(&px) && (y..y + size).contains(&py) {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    });
    Frame::new(image)
}

/// Write `count` small PNG frames into `dir` and return it
pub fn write_frame_dir(dir: &Path, count: usize) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    for i in 0..count {
        RgbImage::new(32, 24).save(dir.join(format!("frame_{i:03}.png")))?;
    }
    Ok(dir.to_path_buf())
}

/// Fast playback settings for tests
pub fn test_playback(frame_interval_ms: u64) -> PlaybackSettings {
    PlaybackSettings {
        frame_interval: Duration::from_millis(frame_interval_ms),
        ..PlaybackSettings::default()
    }
}

pub fn controller(
    detector: Arc<Detector>,
    frame_interval_ms: u64,
) -> (PlaybackController, Receiver<PlaybackEvent>) {
    let (tx, rx) = mpsc::channel();
    let controller =
        PlaybackController::new(detector, test_annotator(), test_playback(frame_interval_ms), tx);
    (controller, rx)
}

/// Frame source fed from a script. Sets `released` when dropped.
pub struct ScriptedSource {
    items: VecDeque<yolo_detector::Result<Frame>>,
    live: bool,
    next_index: u64,
    released: Arc<AtomicBool>,
}

impl ScriptedSource {
    /// Finite source yielding `items` in order
    pub fn new(items: Vec<yolo_detector::Result<Frame>>) -> (Self, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        let source = Self {
            items: items.into(),
            live: false,
            next_index: 0,
            released: Arc::clone(&released),
        };
        (source, released)
    }

    /// `count` black frames
    pub fn frames(count: usize) -> (Self, Arc<AtomicBool>) {
        Self::new((0..count).map(|_| Ok(black_frame(32, 24))).collect())
    }

    /// Endless live source producing a black frame every few milliseconds
    pub fn live() -> (Self, Arc<AtomicBool>) {
        let (mut source, released) = Self::new(Vec::new());
        source.live = true;
        (source, released)
    }

    pub fn boxed(self) -> Box<dyn FrameSource> {
        Box::new(self)
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> yolo_detector::Result<Option<Frame>> {
        let item = match self.items.pop_front() {
            Some(item) => item,
            None if self.live => {
                std::thread::sleep(Duration::from_millis(5));
                Ok(black_frame(32, 24))
            }
            None => return Ok(None),
        };
        let frame = item?.with_index(self.next_index);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn description(&self) -> String {
        "scripted".to_string()
    }
}

impl Drop for ScriptedSource {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Live source that yields one frame, then blocks in `next_frame` until the
/// gate is opened (or ten seconds pass). Sets `released` when dropped.
pub struct HangingSource {
    gate: Receiver<()>,
    next_index: u64,
    released: Arc<AtomicBool>,
}

impl HangingSource {
    pub fn new() -> (Self, Sender<()>, Arc<AtomicBool>) {
        let (gate_tx, gate_rx) = mpsc::channel();
        let released = Arc::new(AtomicBool::new(false));
        let source = Self {
            gate: gate_rx,
            next_index: 0,
            released: Arc::clone(&released),
        };
        (source, gate_tx, released)
    }

    pub fn boxed(self) -> Box<dyn FrameSource> {
        Box::new(self)
    }
}

impl FrameSource for HangingSource {
    fn next_frame(&mut self) -> yolo_detector::Result<Option<Frame>> {
        if self.next_index > 0 {
            let _ = self.gate.recv_timeout(Duration::from_secs(10));
        }
        let frame = black_frame(32, 24).with_index(self.next_index);
        self.next_index += 1;
        Ok(Some(frame))
    }

    fn is_live(&self) -> bool {
        true
    }

    fn description(&self) -> String {
        "hanging".to_string()
    }
}

impl Drop for HangingSource {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Short description of an event without pixel data
pub fn describe(event: &PlaybackEvent) -> String {
    match event {
        PlaybackEvent::Started { session, .. } => format!("started({session})"),
        PlaybackEvent::Frame(frame) => format!("frame({})", frame.index),
        PlaybackEvent::StateChanged { state, .. } => format!("state({state})"),
        PlaybackEvent::FrameFailed { index, .. } => format!("failed({index})"),
        PlaybackEvent::OutputFailed { .. } => "output-failed".to_string(),
        PlaybackEvent::Finished { reason, frames, .. } => format!("finished({reason:?}, {frames})"),
    }
}

/// Receive events until `done` matches one, returning everything seen.
/// Panics after ten seconds.
pub fn collect_until(
    rx: &Receiver<PlaybackEvent>,
    mut done: impl FnMut(&PlaybackEvent) -> bool,
) -> Vec<PlaybackEvent> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = Vec::new();
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(remaining) {
            Ok(event) => {
                let finished = done(&event);
                seen.push(event);
                if finished {
                    return seen;
                }
            }
            Err(_) => break,
        }
    }
    panic!(
        "timed out waiting for playback event, saw {:?}",
        seen.iter().map(describe).collect::<Vec<_>>()
    );
}

pub fn is_finished(event: &PlaybackEvent) -> bool {
    matches!(event, PlaybackEvent::Finished { .. })
}

pub fn frame_indices(events: &[PlaybackEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            PlaybackEvent::Frame(frame) => Some(frame.index),
            _ => None,
        })
        .collect()
}
