//! 468-point face mesh detector.
//!
//! Each face box is grown into a square with a margin, the region is
//! letterboxed into the model input, and the `468 x 3` output (pixel
//! coordinates in the model input, plus depth) is inverse-mapped, clipped to
//! the region and offset by the region origin.

use super::{output_values, run_per_face, Detector, InputSpec, TaskInfo};
use crate::inference::{InferenceModel, ModelLoader, TensorNames};
use crate::preprocess::{image_to_tensor, ChannelOrder, Normalization, TensorLayout};
use anyhow::{anyhow, Context, Result};
use common::geometry::{expand_box_to_square_with_margin, resize_region_with_padding, Point, Size};
use common::landmarks::{LandmarkSet, FACE_MESH_POINTS};
use common::task_config::TaskDescriptor;
use common::Frame;
use serde::{Deserialize, Serialize};

const VALUES_PER_POINT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMeshConfig {
    pub input: InputSpec,

    /// Fraction of the square side added on every edge
    pub face_margin: f32,
}

impl Default for FaceMeshConfig {
    fn default() -> Self {
        Self {
            input: InputSpec {
                size: Size::new(192, 192),
                normalization: Normalization::uniform(127.5, 1.0 / 127.5),
                channel_order: ChannelOrder::Rgb,
                layout: TensorLayout::Nhwc,
                names: TensorNames::new("input_1", "conv2d_21"),
            },
            face_margin: 0.25,
        }
    }
}

pub struct FaceMeshDetector {
    info: TaskInfo,
    config: FaceMeshConfig,
    model: Box<dyn InferenceModel>,
}

impl FaceMeshDetector {
    pub const KIND: &'static str = "FaceMesh";

    pub fn new(info: TaskInfo, config: FaceMeshConfig, model: Box<dyn InferenceModel>) -> Self {
        Self {
            info,
            config,
            model,
        }
    }

    pub fn from_descriptor(descriptor: &TaskDescriptor, loader: &dyn ModelLoader) -> Result<Self> {
        let mut config = FaceMeshConfig::default();
        config.input.apply_params(&descriptor.parameters)?;
        descriptor
            .parameters
            .apply_f32("NNFaceMargin", &mut config.face_margin)?;

        let model = loader
            .load(&descriptor.model_reference)
            .with_context(|| format!("task {}: face mesh model", descriptor.id))?;
        Ok(Self::new(TaskInfo::from_descriptor(descriptor), config, model))
    }

    pub fn config(&self) -> &FaceMeshConfig {
        &self.config
    }
}

impl Detector for FaceMeshDetector {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn precedence(&self) -> i32 {
        self.info.precedence
    }

    fn run(&mut self, frame: &Frame) -> Result<()> {
        let bounds = frame.size();
        let image = frame.image();
        let input = &self.config.input;
        let margin = self.config.face_margin;
        let model = &mut self.model;

        run_per_face(
            &self.info.name,
            frame,
            |_, face| {
                let face_box = face.face_box.ok_or_else(|| anyhow!("face has no bounding box"))?;
                let square = expand_box_to_square_with_margin(face_box.rect, bounds, margin);
                let (canvas, coords, region) =
                    resize_region_with_padding(image, square, input.size, true)?;

                let tensor = image_to_tensor(
                    &canvas,
                    &input.normalization,
                    input.channel_order,
                    input.layout,
                );
                let output = model.infer(tensor, &input.names)?;
                let values = output_values(&output, FACE_MESH_POINTS * VALUES_PER_POINT)?;

                let points: Vec<Point> = values
                    .chunks_exact(VALUES_PER_POINT)
                    .take(FACE_MESH_POINTS)
                    .map(|xyz| {
                        let local = coords.to_source(Point::new(xyz[0], xyz[1]));
                        Point::new(
                            local.x.clamp(0.0, region.width) + region.x,
                            local.y.clamp(0.0, region.height) + region.y,
                        )
                    })
                    .collect();
                Ok((points, face_box.confidence))
            },
            |face, (points, confidence)| {
                face.landmarks = LandmarkSet::from_face_mesh(&points, confidence);
                face.feature_points = points;
                face.invalidate_derived();
                face.store_derived();
            },
        )
    }
}
