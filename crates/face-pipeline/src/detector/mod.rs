pub mod crop_classifier;
pub mod face_detection;
pub mod face_mesh;
pub mod head_pose;
pub mod landmarks;

pub use crop_classifier::{ClassifierTarget, CropClassifier};
pub use face_detection::FaceDetector;
pub use face_mesh::FaceMeshDetector;
pub use head_pose::HeadPoseEstimator;
pub use landmarks::LandmarkDetector;

use crate::inference::TensorNames;
use crate::preprocess::{channel_values, ChannelOrder, Normalization, TensorLayout};
use anyhow::{bail, Result};
use common::face::FaceEntity;
use common::geometry::Size;
use common::task_config::{ConfigError, ParamBag, TaskDescriptor};
use common::Frame;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One configured task that reads and updates a [`Frame`]
pub trait Detector: Send {
    /// Declared task name (the descriptor id)
    fn name(&self) -> &str;

    /// Kind tag this detector was built for (e.g. "FaceDetection")
    fn kind(&self) -> &'static str;

    /// Lower runs first
    fn precedence(&self) -> i32;

    /// Run against one frame. Per-face failures are logged and skipped; an
    /// error here means the task produced nothing for the frame.
    fn run(&mut self, frame: &Frame) -> Result<()>;
}

/// Name and ordering key shared by every detector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub name: String,
    pub precedence: i32,
}

impl TaskInfo {
    pub fn new(name: impl Into<String>, precedence: i32) -> Self {
        Self {
            name: name.into(),
            precedence,
        }
    }

    pub fn from_descriptor(descriptor: &TaskDescriptor) -> Self {
        Self::new(descriptor.id.clone(), descriptor.precedence)
    }
}

/// Model input contract: tensor size, pixel normalisation, channel order,
/// layout and tensor names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub size: Size,
    pub normalization: Normalization,
    pub channel_order: ChannelOrder,
    pub layout: TensorLayout,
    pub names: TensorNames,
}

impl InputSpec {
    /// Apply the common `NN*` overrides. Absent parameters keep the current
    /// value.
    ///
    /// `NNImageNormalization` sets a uniform scale, `NNImageStd` a
    /// per-channel scale of `1 / std`, `NNImageMean` the per-channel mean and
    /// `NNSwapRB` selects RGB (true) or BGR (false) channel order.
    pub fn apply_params(&mut self, params: &ParamBag) -> Result<(), ConfigError> {
        params.apply_u32("NNInputImageWidth", &mut self.size.width)?;
        params.apply_u32("NNInputImageHeight", &mut self.size.height)?;

        if let Some(scale) = params.get_f32("NNImageNormalization")? {
            self.normalization.scale = [scale; 3];
        }
        if let Some(std) = params.get_f32_vec("NNImageStd")? {
            let std = channel_values(&std).ok_or_else(|| ConfigError::ParamType {
                name: "NNImageStd".to_string(),
                expected: "vector of 1 or 3 values",
                found: common::ParamType::FloatVec,
            })?;
            self.normalization.scale = std.map(|s| if s == 0.0 { 1.0 } else { 1.0 / s });
        }
        if let Some(mean) = params.get_f32_vec("NNImageMean")? {
            self.normalization.mean = channel_values(&mean).ok_or_else(|| {
                ConfigError::ParamType {
                    name: "NNImageMean".to_string(),
                    expected: "vector of 1 or 3 values",
                    found: common::ParamType::FloatVec,
                }
            })?;
        }
        if let Some(swap_rb) = params.get_bool("NNSwapRB")? {
            self.channel_order = if swap_rb {
                ChannelOrder::Rgb
            } else {
                ChannelOrder::Bgr
            };
        }
        params.apply_string("NNInputName", &mut self.names.input)?;
        params.apply_string("NNOutputName", &mut self.names.output)?;
        Ok(())
    }
}

/// Copy the faces out, compute a result for each without holding the frame
/// lock, then write each result back. Failing faces keep their previous
/// values. Fails only when every face failed.
pub(crate) fn run_per_face<T>(
    task: &str,
    frame: &Frame,
    mut compute: impl FnMut(usize, &FaceEntity) -> Result<T>,
    mut apply: impl FnMut(&mut FaceEntity, T),
) -> Result<()> {
    let faces = frame.faces();
    let mut failed = 0usize;
    let mut last_error = None;

    for (index, face) in faces.iter().enumerate() {
        match compute(index, face) {
            Ok(value) => {
                frame.update_face(index, |target| apply(target, value));
            }
            Err(e) => {
                warn!(task, face = index, error = %e, "face skipped");
                failed += 1;
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if failed == faces.len() => {
            Err(e.context(format!("{} failed on all {} faces", task, failed)))
        }
        _ => Ok(()),
    }
}

/// Flatten an output tensor, requiring at least `min_len` values
pub(crate) fn output_values(output: &ndarray::ArrayD<f32>, min_len: usize) -> Result<Vec<f32>> {
    let values: Vec<f32> = output.iter().copied().collect();
    if values.len() < min_len {
        bail!(
            "model output has {} values, expected at least {}",
            values.len(),
            min_len
        );
    }
    Ok(values)
}
