//! Ordered, failure-isolated execution of detectors against one frame.

use crate::detector::Detector;
use common::Frame;
use serde::Serialize;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use telemetry::metrics::{
    PIPELINE_FACES_DETECTED, PIPELINE_FRAMES_PROCESSED, PIPELINE_TASK_DURATION,
    PIPELINE_TASK_FAILURES,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("tasks can only be added while configuring (pipeline is {0:?})")]
    NotConfigurable(PipelineState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Configured,
    Sorted,
    Running,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    Ok,
    Failed { error: String },
    Panicked { message: String },
}

impl TaskStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, TaskStatus::Ok)
    }

    fn label(&self) -> &'static str {
        match self {
            TaskStatus::Ok => "ok",
            TaskStatus::Failed { .. } => "failed",
            TaskStatus::Panicked { .. } => "panicked",
        }
    }
}

/// Result of one detector run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub name: String,
    pub kind: String,
    pub precedence: i32,
    pub elapsed_ms: f64,
    #[serde(flatten)]
    pub status: TaskStatus,
}

/// Per-frame execution summary, tasks in execution order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub frame: String,
    pub faces: usize,
    pub total_ms: f64,
    pub outcomes: Vec<TaskOutcome>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| !o.status.is_ok())
    }
}

/// Receives progress events from [`Pipeline::run_with`]
pub trait PipelineObserver: Send + Sync {
    fn task_started(&self, _frame: &str, _task: &str, _precedence: i32) {}

    fn task_finished(&self, _frame: &str, _outcome: &TaskOutcome) {}

    fn frame_finished(&self, _report: &RunReport) {}
}

/// Logs through `tracing` and records Prometheus metrics
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn task_started(&self, frame: &str, task: &str, precedence: i32) {
        debug!(image = frame, task, precedence, "task started");
    }

    fn task_finished(&self, frame: &str, outcome: &TaskOutcome) {
        PIPELINE_TASK_DURATION
            .with_label_values(&[outcome.name.as_str(), outcome.status.label()])
            .observe(outcome.elapsed_ms / 1000.0);

        match &outcome.status {
            TaskStatus::Ok => debug!(
                image = frame,
                task = %outcome.name,
                elapsed_ms = outcome.elapsed_ms,
                "task finished"
            ),
            TaskStatus::Failed { error } => {
                PIPELINE_TASK_FAILURES
                    .with_label_values(&[outcome.name.as_str()])
                    .inc();
                warn!(
                    image = frame,
                    task = %outcome.name,
                    elapsed_ms = outcome.elapsed_ms,
                    error = %error,
                    "task failed"
                );
            }
            TaskStatus::Panicked { message } => {
                PIPELINE_TASK_FAILURES
                    .with_label_values(&[outcome.name.as_str()])
                    .inc();
                error!(
                    image = frame,
                    task = %outcome.name,
                    elapsed_ms = outcome.elapsed_ms,
                    panic = %message,
                    "task panicked"
                );
            }
        }
    }

    fn frame_finished(&self, report: &RunReport) {
        PIPELINE_FRAMES_PROCESSED.inc();
        PIPELINE_FACES_DETECTED.inc_by(report.faces as u64);
        info!(
            image = %report.frame,
            faces = report.faces,
            total_ms = report.total_ms,
            failed = report.failures().count(),
            "frame processed"
        );
    }
}

/// Detectors executed in ascending precedence, ties in insertion order.
///
/// A failing or panicking detector is recorded and the remaining detectors
/// still run; whatever it would have written keeps its previous value.
pub struct Pipeline {
    tasks: Vec<Box<dyn Detector>>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            state: PipelineState::Configured,
        }
    }

    pub fn add_task(&mut self, task: Box<dyn Detector>) -> Result<(), PipelineError> {
        if self.state != PipelineState::Configured {
            return Err(PipelineError::NotConfigurable(self.state));
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Task names in execution order (once sorted) or insertion order
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name()).collect()
    }

    /// Stable sort by precedence. Only the first call reorders.
    pub fn sort(&mut self) {
        if self.state == PipelineState::Configured {
            self.tasks.sort_by_key(|t| t.precedence());
            self.state = PipelineState::Sorted;
        }
    }

    pub fn run(&mut self, frame: &Frame) -> RunReport {
        self.run_with(frame, &TracingObserver)
    }

    pub fn run_with(&mut self, frame: &Frame, observer: &dyn PipelineObserver) -> RunReport {
        self.sort();
        self.state = PipelineState::Running;

        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(self.tasks.len());

        for task in self.tasks.iter_mut() {
            observer.task_started(frame.name(), task.name(), task.precedence());

            let task_started = Instant::now();
            let status = match catch_unwind(AssertUnwindSafe(|| task.run(frame))) {
                Ok(Ok(())) => TaskStatus::Ok,
                Ok(Err(e)) => TaskStatus::Failed {
                    error: format!("{:#}", e),
                },
                Err(payload) => TaskStatus::Panicked {
                    message: panic_message(payload.as_ref()),
                },
            };

            let outcome = TaskOutcome {
                name: task.name().to_string(),
                kind: task.kind().to_string(),
                precedence: task.precedence(),
                elapsed_ms: task_started.elapsed().as_secs_f64() * 1000.0,
                status,
            };
            observer.task_finished(frame.name(), &outcome);
            outcomes.push(outcome);
        }

        let report = RunReport {
            frame: frame.name().to_string(),
            faces: frame.face_count(),
            total_ms: started.elapsed().as_secs_f64() * 1000.0,
            outcomes,
        };
        self.state = PipelineState::Completed;
        observer.frame_finished(&report);
        report
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use common::{Attribute, FaceBox, Rect, Smile};
    use image::RgbImage;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        SetSmile(f32),
    }

    struct Scripted {
        name: String,
        precedence: i32,
        behaviour: Behaviour,
        log: Log,
    }

    impl Scripted {
        fn boxed(
            name: &str,
            precedence: i32,
            behaviour: Behaviour,
            log: &Log,
        ) -> Box<dyn Detector> {
            Box::new(Self {
                name: name.to_string(),
                precedence,
                behaviour,
                log: Arc::clone(log),
            })
        }
    }

    impl Detector for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> &'static str {
            "Scripted"
        }

        fn precedence(&self) -> i32 {
            self.precedence
        }

        fn run(&mut self, frame: &Frame) -> Result<()> {
            self.log.lock().unwrap().push(self.name.clone());
            match self.behaviour {
                Behaviour::Succeed => Ok(()),
                Behaviour::Fail => bail!("{} failed", self.name),
                Behaviour::Panic => panic!("{} exploded", self.name),
                Behaviour::SetSmile(score) => {
                    frame.update_face(0, |face| face.set(Smile { score }));
                    Ok(())
                }
            }
        }
    }

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl PipelineObserver for Recording {
        fn task_started(&self, _frame: &str, task: &str, _precedence: i32) {
            self.events.lock().unwrap().push(format!("start {task}"));
        }

        fn task_finished(&self, _frame: &str, outcome: &TaskOutcome) {
            self.events
                .lock()
                .unwrap()
                .push(format!("finish {} {}", outcome.name, outcome.status.label()));
        }

        fn frame_finished(&self, report: &RunReport) {
            self.events
                .lock()
                .unwrap()
                .push(format!("frame {}", report.frame));
        }
    }

    fn frame() -> Frame {
        let frame = Frame::new("img", RgbImage::new(64, 64));
        frame.set_face_boxes(vec![FaceBox::new(Rect::new(1.0, 1.0, 10.0, 10.0), 0.9)]);
        frame
    }

    #[test]
    fn test_runs_in_precedence_order_with_stable_ties() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        for (name, precedence) in [("c", 2), ("a1", 0), ("b1", 1), ("a2", 0), ("b2", 1)] {
            pipeline
                .add_task(Scripted::boxed(name, precedence, Behaviour::Succeed, &log))
                .unwrap();
        }

        for _ in 0..3 {
            pipeline.run(&frame());
        }
        let runs = log.lock().unwrap();
        for chunk in runs.chunks(5) {
            assert_eq!(chunk, ["a1", "a2", "b1", "b2", "c"]);
        }
        assert_eq!(pipeline.state(), PipelineState::Completed);
    }

    #[test]
    fn test_failures_and_panics_are_isolated() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        pipeline.add_task(Scripted::boxed("fails", 0, Behaviour::Fail, &log)).unwrap();
        pipeline.add_task(Scripted::boxed("panics", 1, Behaviour::Panic, &log)).unwrap();
        pipeline.add_task(Scripted::boxed("smile", 2, Behaviour::SetSmile(0.7), &log)).unwrap();

        let frame = frame();
        let report = pipeline.run(&frame);

        assert_eq!(*log.lock().unwrap(), ["fails", "panics", "smile"]);
        assert!(matches!(report.outcomes[0].status, TaskStatus::Failed { .. }));
        assert_eq!(
            report.outcomes[1].status,
            TaskStatus::Panicked {
                message: "panics exploded".to_string()
            }
        );
        assert!(report.outcomes[2].status.is_ok());
        assert_eq!(report.failures().count(), 2);
        assert_eq!(frame.faces()[0].get::<Smile>().score, 0.7);
        // the frame stays readable after a panic
        assert_eq!(frame.face_count(), 1);
    }

    #[test]
    fn test_untouched_attributes_stay_unknown() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        pipeline.add_task(Scripted::boxed("fails", 0, Behaviour::Fail, &log)).unwrap();
        let frame = frame();
        pipeline.run(&frame);

        let face = &frame.faces()[0];
        assert!(face.attributes.iter().all(|r| r.is_unknown()));
        assert!(face.get::<Smile>().is_unknown());
    }

    #[test]
    fn test_add_task_rejected_after_run() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        pipeline.add_task(Scripted::boxed("a", 0, Behaviour::Succeed, &log)).unwrap();
        pipeline.run(&frame());

        let err = pipeline
            .add_task(Scripted::boxed("late", 0, Behaviour::Succeed, &log))
            .unwrap_err();
        assert_eq!(err, PipelineError::NotConfigurable(PipelineState::Completed));
        assert_eq!(pipeline.len(), 1);
    }

    #[test]
    fn test_observer_sees_every_event() {
        let log = Log::default();
        let mut pipeline = Pipeline::new();
        pipeline.add_task(Scripted::boxed("b", 1, Behaviour::Fail, &log)).unwrap();
        pipeline.add_task(Scripted::boxed("a", 0, Behaviour::Succeed, &log)).unwrap();

        let observer = Recording::default();
        let report = pipeline.run_with(&frame(), &observer);

        assert_eq!(
            *observer.events.lock().unwrap(),
            ["start a", "finish a ok", "start b", "finish b failed", "frame img"]
        );
        assert_eq!(report.faces, 1);
        assert_eq!(pipeline.task_names(), ["a", "b"]);
    }

    #[test]
    fn test_report_serialises_status_inline() {
        let outcome = TaskOutcome {
            name: "fd".into(),
            kind: "FaceDetection".into(),
            precedence: 0,
            elapsed_ms: 1.5,
            status: TaskStatus::Failed { error: "boom".into() },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
    }
}
