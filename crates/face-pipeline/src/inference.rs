//! Inference capability boundary.
//!
//! Detectors hand a pre-normalised tensor and a pair of tensor names to an
//! [`InferenceModel`] and get a numeric tensor back. Nothing above this
//! module looks inside the model graph.

use anyhow::{bail, Context, Result};
use ndarray::{ArrayD, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use telemetry::metrics::{INFERENCE_TIME, MODEL_LOADS};

/// Input and output tensor identifiers for one model call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorNames {
    pub input: String,
    pub output: String,
}

impl TensorNames {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

/// A loaded model. Owned by exactly one detector and never shared between
/// threads.
pub trait InferenceModel: Send {
    fn infer(&mut self, input: ArrayD<f32>, names: &TensorNames) -> Result<ArrayD<f32>>;

    /// Backend label used in logs and metrics
    fn execution_provider(&self) -> &str {
        "none"
    }
}

/// Loads model artifacts by reference (usually a file path).
pub trait ModelLoader: Send + Sync {
    fn load(&self, model_reference: &str) -> Result<Box<dyn InferenceModel>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum ExecutionProvider {
    #[default]
    Cpu,
    Cuda,
    TensorRt,
}

impl ExecutionProvider {
    pub fn label(self) -> &'static str {
        match self {
            ExecutionProvider::Cpu => "CPU",
            ExecutionProvider::Cuda => "CUDA",
            ExecutionProvider::TensorRt => "TensorRT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrtOptions {
    /// Preferred backend; falls back TensorRT -> CUDA -> CPU
    pub execution_provider: ExecutionProvider,

    /// GPU device for CUDA/TensorRT
    pub device_id: i32,

    /// Threads used inside one operator
    pub intra_threads: usize,

    /// Threads used across independent operators
    pub inter_threads: usize,
}

impl Default for OrtOptions {
    fn default() -> Self {
        Self {
            execution_provider: ExecutionProvider::Cpu,
            device_id: 0,
            intra_threads: 4,
            inter_threads: 1,
        }
    }
}

/// ONNX Runtime loader
#[derive(Debug, Clone, Default)]
pub struct OrtModelLoader {
    options: OrtOptions,
}

impl OrtModelLoader {
    pub fn new(options: OrtOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &OrtOptions {
        &self.options
    }

    /// Create ONNX session with execution provider fallback
    fn create_session(&self, model_path: &str) -> Result<(Session, ExecutionProvider)> {
        match self.options.execution_provider {
            ExecutionProvider::TensorRt => {
                tracing::info!(model = model_path, "attempting TensorRT");
                let result = Session::builder()
                    .context("Failed to create session builder")?
                    .with_optimization_level(GraphOptimizationLevel::Level3)
                    .context("Failed to set optimization level")?
                    .with_intra_threads(self.options.intra_threads)
                    .context("Failed to set intra threads")?
                    .with_inter_threads(self.options.inter_threads)
                    .context("Failed to set inter threads")?
                    .with_execution_providers([
                        TensorRTExecutionProvider::default()
                            .with_device_id(self.options.device_id)
                            .build(),
                        CUDAExecutionProvider::default()
                            .with_device_id(self.options.device_id)
                            .build(),
                        CPUExecutionProvider::default().build(),
                    ])
                    .context("Failed to set execution providers")?
                    .commit_from_file(model_path);

                match result {
                    Ok(session) => Ok((session, ExecutionProvider::TensorRt)),
                    Err(e) => {
                        tracing::warn!(
                            model = model_path,
                            error = %e,
                            "TensorRT failed, trying CUDA"
                        );
                        self.try_cuda(model_path)
                    }
                }
            }
            ExecutionProvider::Cuda => self.try_cuda(model_path),
            ExecutionProvider::Cpu => self.try_cpu(model_path),
        }
    }

    fn try_cuda(&self, model_path: &str) -> Result<(Session, ExecutionProvider)> {
        tracing::info!(model = model_path, "attempting CUDA");
        let result = Session::builder()
            .context("Failed to create session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .with_intra_threads(self.options.intra_threads)
            .context("Failed to set intra threads")?
            .with_inter_threads(self.options.inter_threads)
            .context("Failed to set inter threads")?
            .with_execution_providers([
                CUDAExecutionProvider::default()
                    .with_device_id(self.options.device_id)
                    .build(),
                CPUExecutionProvider::default().build(),
            ])
            .context("Failed to set execution providers")?
            .commit_from_file(model_path);

        match result {
            Ok(session) => Ok((session, ExecutionProvider::Cuda)),
            Err(e) => {
                tracing::warn!(model = model_path, error = %e, "CUDA failed, using CPU");
                self.try_cpu(model_path)
            }
        }
    }

    fn try_cpu(&self, model_path: &str) -> Result<(Session, ExecutionProvider)> {
        let session = Session::builder()
            .context("Failed to create session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .with_intra_threads(self.options.intra_threads)
            .context("Failed to set intra threads")?
            .with_inter_threads(self.options.inter_threads)
            .context("Failed to set inter threads")?
            .commit_from_file(model_path)
            .context("Failed to load model from file")?;
        Ok((session, ExecutionProvider::Cpu))
    }
}

impl ModelLoader for OrtModelLoader {
    fn load(&self, model_reference: &str) -> Result<Box<dyn InferenceModel>> {
        if !Path::new(model_reference).is_file() {
            MODEL_LOADS
                .with_label_values(&[self.options.execution_provider.label(), "missing"])
                .inc();
            bail!("model artifact not found: {}", model_reference);
        }

        let (session, provider) = match self.create_session(model_reference) {
            Ok(loaded) => loaded,
            Err(e) => {
                MODEL_LOADS
                    .with_label_values(&[self.options.execution_provider.label(), "error"])
                    .inc();
                return Err(e.context(format!("failed to load model {}", model_reference)));
            }
        };

        MODEL_LOADS
            .with_label_values(&[provider.label(), "ok"])
            .inc();
        tracing::info!(
            model = model_reference,
            provider = provider.label(),
            "model loaded"
        );

        Ok(Box::new(OrtModel {
            session,
            provider,
            reference: model_reference.to_string(),
        }))
    }
}

pub struct OrtModel {
    session: Session,
    provider: ExecutionProvider,
    reference: String,
}

impl InferenceModel for OrtModel {
    fn infer(&mut self, input: ArrayD<f32>, names: &TensorNames) -> Result<ArrayD<f32>> {
        let input_tensor = Value::from_array(input).context("Failed to build input tensor")?;

        let started = Instant::now();
        let outputs = self
            .session
            .run(ort::inputs![names.input.as_str() => input_tensor])
            .with_context(|| format!("inference failed for {}", self.reference))?;
        INFERENCE_TIME
            .with_label_values(&[self.provider.label()])
            .observe(started.elapsed().as_secs_f64());

        let output_value = outputs
            .get(names.output.as_str())
            .or_else(|| outputs.get("output"))
            .or_else(|| outputs.get("output0"))
            .with_context(|| {
                format!(
                    "output tensor {:?} not produced by {}",
                    names.output, self.reference
                )
            })?;
        let (shape, data) = output_value
            .try_extract_tensor::<f32>()
            .context("Failed to extract output tensor")?;

        let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
        let output = ArrayD::from_shape_vec(IxDyn(&shape_usize), data.to_vec())
            .context("output tensor shape does not match its data")?;
        Ok(output)
    }

    fn execution_provider(&self) -> &str {
        self.provider.label()
    }
}
