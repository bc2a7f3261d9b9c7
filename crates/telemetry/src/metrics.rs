// Metric construction only fails on invalid names or label sets, which are
// fixed at compile time here.
#![allow(clippy::expect_used)]

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Pipeline Metrics ====
    pub static ref PIPELINE_TASK_DURATION: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "pipeline_task_duration_seconds",
                "Wall-clock duration of one detector run",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
            &["task", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PIPELINE_TASK_FAILURES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "pipeline_task_failures_total",
                "Detector runs that returned an error or panicked",
            ),
            &["task"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PIPELINE_FRAMES_PROCESSED: IntCounter = {
        let metric = IntCounter::new(
            "pipeline_frames_processed_total",
            "Frames that completed a pipeline run",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PIPELINE_FACES_DETECTED: IntCounter = {
        let metric = IntCounter::new(
            "pipeline_faces_detected_total",
            "Faces present in completed frames",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Inference Metrics ====
    pub static ref MODEL_LOADS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("model_loads_total", "Model load attempts"),
            &["execution_provider", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref INFERENCE_TIME: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "inference_time_seconds",
                "Time spent inside the inference session (excluding pre/post processing)",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0]),
            &["execution_provider"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| {
        prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e))
    })
}
