use crate::inference::{ExecutionProvider, OrtOptions};
use crate::registry::UnknownKindPolicy;
use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

/// Command line of the `face-pipeline` binary
#[derive(Debug, Clone, Parser)]
#[command(name = "face-pipeline")]
#[command(about = "Run the face attribute pipeline over a set of images", long_about = None)]
pub struct PipelineArgs {
    /// Pipeline document (JSON task list)
    #[arg(long, short, env = "FACE_PIPELINE_CONFIG")]
    pub config: PathBuf,

    /// Images to process
    #[arg(required = true)]
    pub images: Vec<PathBuf>,

    /// Write results here instead of stdout
    #[arg(long, short, env = "FACE_PIPELINE_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Directory for annotated copies of the input images
    #[arg(long, env = "FACE_PIPELINE_ANNOTATE_DIR")]
    pub annotate_dir: Option<PathBuf>,

    /// TrueType/OpenType font for pose and score labels on annotated images
    #[arg(long, env = "FACE_PIPELINE_ANNOTATE_FONT", requires = "annotate_dir")]
    pub annotate_font: Option<PathBuf>,

    /// Write Prometheus metrics here after the run
    #[arg(long, env = "FACE_PIPELINE_METRICS_OUT")]
    pub metrics_out: Option<PathBuf>,

    /// Parallel pipelines, each with its own loaded models
    #[arg(long, env = "FACE_PIPELINE_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// What to do with task kinds that have no detector
    #[arg(
        long,
        value_enum,
        env = "FACE_PIPELINE_UNKNOWN_KINDS",
        default_value_t = UnknownKindPolicy::Skip
    )]
    pub unknown_kinds: UnknownKindPolicy,

    /// Preferred ONNX Runtime execution provider
    #[arg(
        long,
        value_enum,
        env = "ORT_EXECUTION_PROVIDER",
        default_value_t = ExecutionProvider::Cpu
    )]
    pub execution_provider: ExecutionProvider,

    /// GPU device id for CUDA / TensorRT
    #[arg(long, env = "ORT_DEVICE_ID", default_value_t = 0)]
    pub device_id: i32,

    #[arg(long, env = "ORT_INTRA_THREADS", default_value_t = 4)]
    pub intra_threads: usize,

    #[arg(long, env = "ORT_INTER_THREADS", default_value_t = 1)]
    pub inter_threads: usize,
}

/// Validated process configuration, built once at startup
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub document: PathBuf,
    pub images: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub annotate_dir: Option<PathBuf>,
    pub annotate_font: Option<PathBuf>,
    pub metrics_out: Option<PathBuf>,
    pub workers: usize,
    pub unknown_kinds: UnknownKindPolicy,
    pub ort: OrtOptions,
}

impl PipelineConfig {
    pub fn from_args(args: PipelineArgs) -> Result<Self> {
        if args.workers == 0 {
            bail!("--workers must be at least 1");
        }
        if args.intra_threads == 0 || args.inter_threads == 0 {
            bail!("ONNX Runtime thread counts must be at least 1");
        }
        if args.device_id < 0 {
            bail!("--device-id must not be negative");
        }

        Ok(Self {
            document: args.config,
            // more workers than images would only load idle models
            workers: args.workers.min(args.images.len().max(1)),
            images: args.images,
            output: args.output,
            annotate_dir: args.annotate_dir,
            annotate_font: args.annotate_font,
            metrics_out: args.metrics_out,
            unknown_kinds: args.unknown_kinds,
            ort: OrtOptions {
                execution_provider: args.execution_provider,
                device_id: args.device_id,
                intra_threads: args.intra_threads,
                inter_threads: args.inter_threads,
            },
        })
    }

    pub fn from_cli() -> Result<Self> {
        Self::from_args(PipelineArgs::parse())
    }
}
