//! Face attribute pipeline: detectors, their registry, and ordered,
//! failure-isolated execution over frames.

pub mod annotate;
pub mod batch;
pub mod config;
pub mod detector;
pub mod inference;
pub mod mock;
pub mod pipeline;
pub mod preprocess;
pub mod registry;

pub use batch::{process_images, BatchOptions, FrameResult, PipelineFactory};
pub use config::{PipelineArgs, PipelineConfig};
pub use detector::Detector;
pub use inference::{InferenceModel, ModelLoader, OrtModelLoader, OrtOptions, TensorNames};
pub use pipeline::{Pipeline, PipelineObserver, RunReport, TaskOutcome, TaskStatus, TracingObserver};
pub use registry::{DetectorRegistry, UnknownKindPolicy};
