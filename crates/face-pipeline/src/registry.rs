use crate::detector::{
    ClassifierTarget, CropClassifier, Detector, FaceDetector, FaceMeshDetector, HeadPoseEstimator,
    LandmarkDetector,
};
use crate::inference::ModelLoader;
use crate::pipeline::Pipeline;
use anyhow::{anyhow, bail, Context, Result};
use common::task_config::{PipelineDocument, TaskDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// Builds a detector from its descriptor, loading the model through `loader`
pub type DetectorFactory = fn(&TaskDescriptor, &dyn ModelLoader) -> Result<Box<dyn Detector>>;

/// What to do with a task whose kind has no registered factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
pub enum UnknownKindPolicy {
    /// Log a warning and leave the task out
    #[default]
    Skip,
    /// Fail the whole build
    Reject,
}

/// `FacialFeatures` entries with this id select the mesh model
const MESH_FEATURES_ID: &str = "FFTFlowLite";

/// Registry mapping task kind tags to detector factories
pub struct DetectorRegistry {
    factories: HashMap<String, DetectorFactory>,
    policy: UnknownKindPolicy,
}

impl DetectorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            policy: UnknownKindPolicy::default(),
        }
    }

    /// Registry with every built-in detector kind
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        let builtin: [(&str, DetectorFactory); 7] = [
            (FaceDetector::KIND, |d, l| {
                Ok(Box::new(FaceDetector::from_descriptor(d, l)?))
            }),
            (LandmarkDetector::KIND, |d, l| {
                Ok(Box::new(LandmarkDetector::from_descriptor(d, l)?))
            }),
            (FaceMeshDetector::KIND, |d, l| {
                Ok(Box::new(FaceMeshDetector::from_descriptor(d, l)?))
            }),
            (HeadPoseEstimator::KIND, |d, l| {
                Ok(Box::new(HeadPoseEstimator::from_descriptor(d, l)?))
            }),
            (ClassifierTarget::MouthOpen.kind(), |d, l| {
                Ok(Box::new(CropClassifier::from_descriptor(ClassifierTarget::MouthOpen, d, l)?))
            }),
            (ClassifierTarget::Smile.kind(), |d, l| {
                Ok(Box::new(CropClassifier::from_descriptor(ClassifierTarget::Smile, d, l)?))
            }),
            (ClassifierTarget::Eyeglasses.kind(), |d, l| {
                Ok(Box::new(CropClassifier::from_descriptor(ClassifierTarget::Eyeglasses, d, l)?))
            }),
        ];
        for (kind, factory) in builtin {
            registry.factories.insert(kind.to_string(), factory);
        }
        registry
    }

    pub fn with_policy(mut self, policy: UnknownKindPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> UnknownKindPolicy {
        self.policy
    }

    /// Register a factory for a new kind
    pub fn register(&mut self, kind: impl Into<String>, factory: DetectorFactory) -> Result<()> {
        let kind = kind.into();
        if self.factories.contains_key(&kind) {
            return Err(anyhow!("Detector kind '{}' is already registered", kind));
        }
        info!("Registered detector kind: {}", kind);
        self.factories.insert(kind, factory);
        Ok(())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Kind tag actually used for `descriptor`
    pub fn resolve_kind<'a>(&self, descriptor: &'a TaskDescriptor) -> &'a str {
        if descriptor.kind == LandmarkDetector::KIND && descriptor.id == MESH_FEATURES_ID {
            FaceMeshDetector::KIND
        } else {
            &descriptor.kind
        }
    }

    /// Construct one detector per descriptor, in declaration order. Any load
    /// failure aborts the build.
    pub fn build(
        &self,
        descriptors: &[TaskDescriptor],
        loader: &dyn ModelLoader,
    ) -> Result<Vec<Box<dyn Detector>>> {
        let mut detectors = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let kind = self.resolve_kind(descriptor);
            let Some(factory) = self.factories.get(kind) else {
                match self.policy {
                    UnknownKindPolicy::Skip => {
                        warn!(task = %descriptor.id, kind, "unknown task kind, skipping");
                        continue;
                    }
                    UnknownKindPolicy::Reject => {
                        bail!("task {}: unknown kind '{}'", descriptor.id, kind)
                    }
                }
            };

            let detector = factory(descriptor, loader)
                .with_context(|| format!("failed to build task {} ({})", descriptor.id, kind))?;
            info!(
                task = %descriptor.id,
                kind,
                precedence = descriptor.precedence,
                model = %descriptor.model_reference,
                "task loaded"
            );
            detectors.push(detector);
        }
        Ok(detectors)
    }

    /// Build the document's active tasks into a ready-to-run pipeline
    pub fn build_pipeline(
        &self,
        document: &PipelineDocument,
        loader: &dyn ModelLoader,
    ) -> Result<Pipeline> {
        let tasks = document.active_tasks();
        if tasks.is_empty() {
            warn!("no active tasks, pipeline will leave frames untouched");
        }

        let mut pipeline = Pipeline::new();
        for detector in self.build(tasks, loader)? {
            pipeline.add_task(detector)?;
        }
        Ok(pipeline)
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
