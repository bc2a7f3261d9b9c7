//! Multi-image processing. Every worker owns its own pipeline (and so its own
//! loaded models) and runs on the blocking thread pool.

use crate::annotate::{output_paths, save_annotated, AnnotateOptions};
use crate::pipeline::{Pipeline, RunReport};
use anyhow::{Context, Result};
use common::{Frame, FrameSnapshot};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Builds a fresh pipeline for one worker
pub type PipelineFactory = Arc<dyn Fn() -> Result<Pipeline> + Send + Sync>;

/// Exported result for one image
#[derive(Debug, Clone, Serialize)]
pub struct FrameResult {
    pub snapshot: FrameSnapshot,
    pub report: RunReport,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub workers: usize,
    pub annotate_dir: Option<PathBuf>,
    pub annotate: AnnotateOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            annotate_dir: None,
            annotate: AnnotateOptions::default(),
        }
    }
}

/// Decode and process one image with an existing pipeline. With
/// `annotate_to`, an annotated copy is written to that path.
pub fn process_image(
    pipeline: &mut Pipeline,
    path: &Path,
    annotate_to: Option<&Path>,
    annotate: &AnnotateOptions,
) -> Result<FrameResult> {
    let image = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?
        .to_rgb8();
    let frame = Frame::new(path.display().to_string(), image);
    let report = pipeline.run(&frame);
    let snapshot = frame.snapshot();

    if let Some(output_path) = annotate_to {
        match save_annotated(frame.image(), &snapshot, output_path, annotate) {
            Ok(()) => info!(
                image = %snapshot.name,
                path = %output_path.display(),
                "annotated image saved"
            ),
            Err(e) => warn!(image = %snapshot.name, error = %e, "failed to save annotated image"),
        }
    }

    Ok(FrameResult { snapshot, report })
}

/// Process `paths` on `options.workers` blocking workers. Images that fail to
/// decode are logged and left out; the rest keep input order. Any worker
/// failing to build its pipeline fails the batch. Annotated copies of inputs
/// sharing a file name are told apart by input index.
pub async fn process_images(
    paths: Vec<PathBuf>,
    factory: PipelineFactory,
    options: BatchOptions,
) -> Result<Vec<FrameResult>> {
    if paths.is_empty() {
        return Ok(Vec::new());
    }

    let workers = options.workers.clamp(1, paths.len());
    let chunk_size = paths.len().div_ceil(workers);
    let jobs: Vec<(PathBuf, Option<PathBuf>)> = match &options.annotate_dir {
        Some(dir) => {
            let outputs = output_paths(&paths, dir);
            paths.into_iter().zip(outputs.into_iter().map(Some)).collect()
        }
        None => paths.into_iter().map(|path| (path, None)).collect(),
    };

    let mut handles = Vec::with_capacity(workers);
    for (worker, chunk) in jobs.chunks(chunk_size).enumerate() {
        let chunk = chunk.to_vec();
        let factory = Arc::clone(&factory);
        let annotate = options.annotate.clone();

        handles.push(tokio::task::spawn_blocking(move || -> Result<Vec<FrameResult>> {
            let mut pipeline =
                factory().with_context(|| format!("worker {} failed to build pipeline", worker))?;
            info!(worker, images = chunk.len(), tasks = pipeline.len(), "worker started");

            let mut results = Vec::with_capacity(chunk.len());
            for (path, output) in &chunk {
                match process_image(&mut pipeline, path, output.as_deref(), &annotate) {
                    Ok(result) => results.push(result),
                    Err(e) => warn!(worker, image = %path.display(), error = %e, "skipping image"),
                }
            }
            Ok(results)
        }));
    }

    let mut results = Vec::with_capacity(jobs.len());
    for handle in handles {
        let chunk = handle.await.context("pipeline worker panicked")??;
        results.extend(chunk);
    }
    Ok(results)
}
