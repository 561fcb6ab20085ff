use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use yolo_detector::config::{AppSettings, DEFAULT_WEIGHTS};
use yolo_detector::render::summarize;
use yolo_detector::source::{SourceSpec, is_image_file, load_image};
use yolo_detector::{
    Annotator, Detector, DetectorSettings, OutputSettings, OutputWriter, PlaybackController,
    PlaybackEvent, PlaybackSettings, StopReason,
};

#[derive(Parser)]
#[command(name = "yolo-detector")]
#[command(about = "Object detection on images, videos and cameras with YOLOv5 ONNX models")]
struct Cli {
    /// Model weights (.onnx); defaults to the last weights picked in the GUI
    #[arg(long, value_name = "FILE")]
    weights: Option<PathBuf>,

    /// Run without a window on an image, video, frame directory or camera index
    #[arg(long, value_name = "SOURCE")]
    source: Option<String>,

    /// Inference size in pixels
    #[arg(long = "img-size", default_value_t = 640)]
    img_size: u32,

    #[arg(long = "conf-thres", default_value_t = 0.25)]
    conf_thres: f32,

    #[arg(long = "iou-thres", default_value_t = 0.45)]
    iou_thres: f32,

    /// Maximum detections per frame
    #[arg(long = "max-det", default_value_t = 1000)]
    max_det: usize,

    /// Keep only these class ids, e.g. `--classes 0 2 3`
    #[arg(long, num_args = 1..)]
    classes: Option<Vec<usize>>,

    #[arg(long = "agnostic-nms")]
    agnostic_nms: bool,

    /// Bounding box thickness in pixels
    #[arg(long = "line-thickness", default_value_t = 3)]
    line_thickness: u32,

    #[arg(long = "hide-labels")]
    hide_labels: bool,

    #[arg(long = "hide-conf")]
    hide_conf: bool,

    /// TrueType font for box captions
    #[arg(long, value_name = "FILE")]
    font: Option<PathBuf>,

    /// Do not save annotated images or frames
    #[arg(long)]
    nosave: bool,

    /// Save YOLO label files
    #[arg(long = "save-txt")]
    save_txt: bool,

    /// Include confidences in label files
    #[arg(long = "save-conf")]
    save_conf: bool,

    /// Results are saved to PROJECT/NAME
    #[arg(long, default_value = "runs/detect")]
    project: PathBuf,

    #[arg(long, default_value = "exp")]
    name: String,

    /// Reuse PROJECT/NAME instead of incrementing it
    #[arg(long = "exist-ok")]
    exist_ok: bool,

    /// Camera device index used by "Camera Detection"
    #[arg(long, default_value_t = 0)]
    camera: u32,

    /// Delay between video frames in milliseconds
    #[arg(long = "frame-interval", default_value_t = 30)]
    frame_interval: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            img_size: self.img_size,
            conf_thres: self.conf_thres,
            iou_thres: self.iou_thres,
            max_det: self.max_det,
            classes: self.classes.clone(),
            agnostic_nms: self.agnostic_nms,
            line_thickness: self.line_thickness,
            hide_labels: self.hide_labels,
            hide_conf: self.hide_conf,
            font: self.font.clone(),
        }
    }

    fn output_settings(&self) -> OutputSettings {
        OutputSettings {
            save: !self.nosave,
            save_txt: self.save_txt,
            save_conf: self.save_conf,
            project: self.project.clone(),
            name: self.name.clone(),
            exist_ok: self.exist_ok,
        }
    }

    fn playback_settings(&self) -> PlaybackSettings {
        PlaybackSettings {
            frame_interval: Duration::from_millis(self.frame_interval),
            camera_index: self.camera,
            ..PlaybackSettings::default()
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match &args.source {
        Some(source) => run_headless(&args, source),
        None => run_gui(&args),
    }
}

#[cfg(feature = "gui")]
fn run_gui(args: &Cli) -> anyhow::Result<()> {
    yolo_detector::gui::run(yolo_detector::gui::GuiOptions {
        detector: args.detector_settings(),
        output: args.output_settings(),
        playback: args.playback_settings(),
        weights: args.weights.clone(),
        settings_path: AppSettings::default_path(),
    })
}

#[cfg(not(feature = "gui"))]
fn run_gui(_args: &Cli) -> anyhow::Result<()> {
    anyhow::bail!("built without the `gui` feature; pass --source to run headless")
}

fn resolve_weights(args: &Cli) -> PathBuf {
    if let Some(weights) = &args.weights {
        return weights.clone();
    }
    AppSettings::default_path()
        .and_then(|path| AppSettings::load_from(&path).ok())
        .and_then(|settings| settings.weights)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WEIGHTS))
}

fn parse_source(source: &str) -> SourceSpec {
    match source.parse::<u32>() {
        Ok(index) => SourceSpec::Camera(index),
        Err(_) => SourceSpec::Video(PathBuf::from(source)),
    }
}

fn run_headless(args: &Cli, source: &str) -> anyhow::Result<()> {
    let settings = args.detector_settings();
    let detector = Arc::new(Detector::new());
    detector.load(&resolve_weights(args), &settings)?;
    let annotator = Arc::new(Annotator::new(&settings));
    let mut output = OutputWriter::new(args.output_settings());

    let spec = parse_source(source);
    match &spec {
        SourceSpec::Video(path) if path.is_file() && is_image_file(path) && !is_gif(path) => {
            detect_image(&detector, &annotator, &mut output, path)
        }
        _ => play(args, detector, annotator, &mut output, spec),
    }
}

fn is_gif(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gif"))
}

fn detect_image(
    detector: &Detector,
    annotator: &Annotator,
    output: &mut OutputWriter,
    path: &Path,
) -> anyhow::Result<()> {
    let frame = load_image(path)?;
    let detections = detector.detect(&frame)?;
    let annotated = annotator.annotate(&frame.image, &detections);

    println!("{}: {}", path.display(), summarize(&detections));
    if let Some(saved) = output.save_image("prediction", &annotated, &detections)? {
        println!("Results saved to {}", saved.display());
    }
    Ok(())
}

fn play(
    args: &Cli,
    detector: Arc<Detector>,
    annotator: Arc<Annotator>,
    output: &mut OutputWriter,
    spec: SourceSpec,
) -> anyhow::Result<()> {
    let (events_tx, events) = mpsc::channel();
    let mut controller =
        PlaybackController::new(detector, annotator, args.playback_settings(), events_tx);

    let prefix = if spec.is_camera() {
        "camera_detection"
    } else {
        "prediction"
    };
    let recorder = output.sequence(prefix)?;
    let recording = recorder.as_ref().map(|r| r.dir().to_path_buf());
    let session = controller
        .start_recording(spec, recorder)
        .context("could not start playback")?;

    for event in events.iter() {
        match event {
            PlaybackEvent::Frame(frame) => {
                println!("frame {}: {}", frame.index, summarize(&frame.detections).replace('\n', "; "));
            }
            PlaybackEvent::FrameFailed { index, message, .. } => {
                eprintln!("frame {index}: {message}");
            }
            PlaybackEvent::OutputFailed { message, .. } => eprintln!("{message}"),
            PlaybackEvent::Finished {
                session: finished,
                reason,
                frames,
            } if finished == session => {
                println!("Processed {frames} frames");
                if let Some(dir) = &recording {
                    println!("Results saved to {}", dir.display());
                }
                if let StopReason::SourceFailed(message) = reason {
                    anyhow::bail!("source failed: {message}");
                }
                break;
            }
            _ => {}
        }
    }
    Ok(())
}
