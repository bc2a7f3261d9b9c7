use anyhow::{Context, Result};
use common::PipelineDocument;
use face_pipeline::annotate::AnnotateOptions;
use face_pipeline::{
    process_images, BatchOptions, DetectorRegistry, OrtModelLoader, PipelineConfig, PipelineFactory,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit
    let _logging = telemetry::init_with_service("face-pipeline")?;

    let config = PipelineConfig::from_cli()?;
    info!(
        document = %config.document.display(),
        images = config.images.len(),
        workers = config.workers,
        provider = config.ort.execution_provider.label(),
        "starting face pipeline"
    );

    let document = PipelineDocument::from_path(&config.document)
        .with_context(|| format!("failed to load {}", config.document.display()))?;
    let registry = Arc::new(DetectorRegistry::with_builtin().with_policy(config.unknown_kinds));
    let loader = Arc::new(OrtModelLoader::new(config.ort.clone()));

    info!(
        tasks = document.active_tasks().len(),
        config_ids = ?document.config_ids,
        "pipeline document loaded"
    );

    let annotate = AnnotateOptions::load(config.annotate_font.as_deref())?;
    let document = Arc::new(document);
    let factory: PipelineFactory =
        Arc::new(move || registry.build_pipeline(&document, loader.as_ref()));

    let results = process_images(
        config.images.clone(),
        factory,
        BatchOptions {
            workers: config.workers,
            annotate_dir: config.annotate_dir.clone(),
            annotate,
        },
    )
    .await?;

    let json = serde_json::to_string_pretty(&results).context("failed to serialise results")?;
    match &config.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), frames = results.len(), "results written");
        }
        None => println!("{}", json),
    }

    if let Some(path) = &config.metrics_out {
        let metrics = telemetry::metrics::render().context("failed to render metrics")?;
        std::fs::write(path, metrics)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(())
}
