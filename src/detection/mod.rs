pub mod backend;
pub mod classes;
pub mod postprocessing;
pub mod preprocessing;

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use image::RgbImage;
use tract_onnx::prelude::tract_ndarray::{ArrayD, ArrayView2, Axis, Ix2};

use crate::config::DetectorSettings;
use crate::error::{Error, Result};
use crate::models::{Detection, Frame};
use crate::render::Annotator;

pub use backend::{InferenceBackend, TractBackend};

/// Loaded weights ready for inference, plus the settings they were loaded with
pub struct ModelHandle {
    backend: Box<dyn InferenceBackend>,
    names: Vec<String>,
    weights: PathBuf,
    settings: DetectorSettings,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("backend", &self.backend.name())
            .field("weights", &self.weights)
            .field("classes", &self.names.len())
            .finish()
    }
}

impl ModelHandle {
    /// Wrap an already constructed backend
    pub fn from_backend(
        backend: Box<dyn InferenceBackend>,
        names: Vec<String>,
        weights: impl Into<PathBuf>,
        settings: DetectorSettings,
    ) -> Self {
        Self {
            backend,
            names,
            weights: weights.into(),
            settings,
        }
    }

    pub fn weights(&self) -> &Path {
        &self.weights
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn label(&self, class_id: usize) -> String {
        self.names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class{class_id}"))
    }
}

/// Load YOLOv5 weights exported to ONNX
pub fn load_weights(path: &Path, settings: &DetectorSettings) -> Result<ModelHandle> {
    if !path.is_file() {
        return Err(Error::load(path, "file not found"));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "onnx" => {}
        "pt" | "pth" => {
            return Err(Error::load(
                path,
                "PyTorch checkpoints cannot be loaded directly; export the model with \
                 `python export.py --weights <file>.pt --include onnx` and select the .onnx file",
            ));
        }
        other => {
            return Err(Error::load(
                path,
                format!("unsupported weights format '.{other}', expected an ONNX export"),
            ));
        }
    }

    let img_size = preprocessing::check_img_size(settings.img_size, preprocessing::MODEL_STRIDE);
    log::info!("Loading weights {:?} (input {}x{})", path, img_size, img_size);

    let backend =
        TractBackend::load(path, img_size).map_err(|err| Error::load(path, format!("{err:#}")))?;

    let names = classes::load_sidecar_names(path)
        .or_else(|| backend.embedded_names().map(<[String]>::to_vec))
        .unwrap_or_else(classes::coco_names);

    log::info!("Model ready: {} classes", names.len());
    Ok(ModelHandle::from_backend(
        Box::new(backend),
        names,
        path,
        DetectorSettings {
            img_size,
            ..settings.clone()
        },
    ))
}

/// Run detection on a single frame.
///
/// Boxes are returned in the frame's pixel coordinates, clipped to its bounds.
pub fn detect(model: &ModelHandle, frame: &Frame) -> Result<Vec<Detection>> {
    if frame.is_empty() {
        return Err(Error::inference(format!(
            "empty frame ({}x{})",
            frame.width(),
            frame.height()
        )));
    }

    let settings = &model.settings;
    let (boxed, letterbox) = preprocessing::letterbox(&frame.image, model.backend.input_size());
    let input = preprocessing::to_input_tensor(&boxed);

    let output = model
        .backend
        .infer(input)
        .map_err(|err| Error::inference(format!("{err:#}")))?;
    let rows = output_rows(&output)?;

    let candidates = postprocessing::decode(rows, settings)?;
    let kept = postprocessing::non_max_suppression(
        candidates,
        settings.iou_thres,
        settings.agnostic_nms,
        settings.max_det,
    );

    Ok(kept
        .into_iter()
        .map(|candidate| Detection {
            bbox: letterbox
                .unmap(&candidate.bbox)
                .clip(frame.width(), frame.height()),
            label: model.label(candidate.class_id),
            class_id: candidate.class_id,
            confidence: candidate.confidence,
        })
        .collect())
}

/// Accept `[1, N, C]` or `[N, C]` network output
fn output_rows(output: &ArrayD<f32>) -> Result<ArrayView2<'_, f32>> {
    let view = match output.ndim() {
        3 if output.shape()[0] == 1 => output.index_axis(Axis(0), 0),
        2 => output.view(),
        _ => {
            return Err(Error::inference(format!(
                "unexpected model output shape {:?}, expected [1, N, 5 + classes]",
                output.shape()
            )));
        }
    };
    view.into_dimensionality::<Ix2>()
        .map_err(|err| Error::inference(err.to_string()))
}

/// Detector adapter shared between the UI and the playback thread.
///
/// Detections hold the read lock for their whole duration, so replacing the
/// model waits for in-flight calls to finish.
#[derive(Default)]
pub struct Detector {
    model: RwLock<Option<ModelHandle>>,
}

impl Detector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.read().is_some()
    }

    /// Load new weights and swap them in. On failure the previous model stays active.
    pub fn load(&self, path: &Path, settings: &DetectorSettings) -> Result<()> {
        let handle = load_weights(path, settings)?;
        self.install(handle);
        Ok(())
    }

    /// Replace the active model, waiting for running detections
    pub fn install(&self, handle: ModelHandle) {
        let mut guard = self.model.write().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = guard.as_ref() {
            log::debug!("Replacing model {:?}", previous.weights());
        }
        *guard = Some(handle);
    }

    pub fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let guard = self.read();
        let model = guard.as_ref().ok_or(Error::ModelNotLoaded)?;
        detect(model, frame)
    }

    pub fn weights(&self) -> Option<PathBuf> {
        self.read().as_ref().map(|m| m.weights().to_path_buf())
    }

    pub fn settings(&self) -> Option<DetectorSettings> {
        self.read().as_ref().map(|m| m.settings().clone())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<ModelHandle>> {
        self.model.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Result of running detection on one still image
#[derive(Debug, Clone)]
pub struct ImageDetection {
    pub path: PathBuf,
    pub annotated: RgbImage,
    pub detections: Vec<Detection>,
}

/// Load weights into `detector` on a blocking worker thread
pub async fn initialize(
    detector: Arc<Detector>,
    path: PathBuf,
    settings: DetectorSettings,
) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || detector.load(&path, &settings).map(|_| path))
        .await
        .map_err(|err| Error::inference(format!("model loading task failed: {err}")))?
}

/// Load an image file, detect and annotate it on a blocking worker thread
pub async fn detect_image_file(
    detector: Arc<Detector>,
    annotator: Arc<Annotator>,
    path: PathBuf,
) -> Result<ImageDetection> {
    tokio::task::spawn_blocking(move || {
        let frame = crate::source::load_image(&path)?;
        let detections = detector.detect(&frame)?;
        let annotated = annotator.annotate(&frame.image, &detections);
        Ok(ImageDetection {
            path,
            annotated,
            detections,
        })
    })
    .await
    .map_err(|err| Error::inference(format!("detection task failed: {err}")))?
}
