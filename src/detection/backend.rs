use std::path::Path;

use anyhow::{Context, anyhow};
use tract_onnx::prelude::*;
use tract_onnx::prelude::tract_ndarray::{Array4, ArrayD};

use super::classes;

/// Runs the exported network on one preprocessed input tensor.
///
/// Implementations must be safe to call from several threads at once; the
/// detector only ever hands out shared references.
pub trait InferenceBackend: Send + Sync {
    /// Human-readable name (used in logs)
    fn name(&self) -> &str;

    /// Input size (width, height) the network expects
    fn input_size(&self) -> (u32, u32);

    /// Run the network on a `[1, 3, H, W]` tensor and return the first output
    fn infer(&self, input: Array4<f32>) -> anyhow::Result<ArrayD<f32>>;
}

type RunFn = dyn Fn(Array4<f32>) -> anyhow::Result<ArrayD<f32>> + Send + Sync;

/// ONNX backend built on tract
pub struct TractBackend {
    run: Box<RunFn>,
    input_size: (u32, u32),
    names: Option<Vec<String>>,
}

impl TractBackend {
    /// Load an ONNX export and optimize it for a fixed square input
    pub fn load(path: &Path, img_size: u32) -> anyhow::Result<Self> {
        let onnx = tract_onnx::onnx();
        let proto = onnx
            .proto_model_for_path(path)
            .with_context(|| format!("failed to parse ONNX file {}", path.display()))?;

        let names = proto
            .metadata_props
            .iter()
            .find(|prop| prop.key == "names")
            .and_then(|prop| classes::parse_names_metadata(&prop.value));

        let plan = onnx
            .model_for_proto_model(&proto)
            .context("failed to build ONNX graph")?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, img_size as usize, img_size as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        let run = move |input: Array4<f32>| -> anyhow::Result<ArrayD<f32>> {
            let outputs = plan.run(tvec!(input.into_tensor().into()))?;
            let output = outputs
                .first()
                .ok_or_else(|| anyhow!("model produced no outputs"))?;
            let view = output
                .to_array_view::<f32>()
                .context("model output tensor was not f32")?;
            Ok(view.to_owned())
        };

        Ok(Self {
            run: Box::new(run),
            input_size: (img_size, img_size),
            names,
        })
    }

    /// Class names embedded in the export metadata, if any
    pub fn embedded_names(&self) -> Option<&[String]> {
        self.names.as_deref()
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &str {
        "tract-onnx"
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn infer(&self, input: Array4<f32>) -> anyhow::Result<ArrayD<f32>> {
        (self.run)(input)
    }
}
