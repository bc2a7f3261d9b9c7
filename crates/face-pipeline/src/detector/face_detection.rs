//! SSD-style face detector.
//!
//! The whole frame is letterboxed into the model input (300x300 by default),
//! detections come back as `[.., N, 7]` rows of
//! `(image_id, label, confidence, x1, y1, x2, y2)` with corners normalised to
//! the model input, and surviving boxes are mapped back to frame
//! coordinates through the resize's [`CoordinateFrame`].

use super::{output_values, Detector, InputSpec, TaskInfo};
use crate::inference::{InferenceModel, ModelLoader, TensorNames};
use crate::preprocess::{image_to_tensor, resize_exact, ChannelOrder, Normalization, TensorLayout};
use anyhow::{bail, Context, Result};
use common::geometry::{clip_rect, resize_with_padding, CoordinateFrame, Point, Rect, Size};
use common::task_config::TaskDescriptor;
use common::{FaceBox, Frame};
use serde::{Deserialize, Serialize};
use tracing::debug;

const DETECTION_ROW: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDetectorConfig {
    pub input: InputSpec,

    /// Keep detections with confidence strictly above this value
    pub confidence_threshold: f32,

    /// Letterbox the frame (true) or stretch it to the input size (false)
    pub pad_input: bool,
}

impl Default for FaceDetectorConfig {
    fn default() -> Self {
        Self {
            input: InputSpec {
                size: Size::new(300, 300),
                normalization: Normalization::new([104.0, 177.0, 123.0], [1.0; 3]),
                channel_order: ChannelOrder::Bgr,
                layout: TensorLayout::Nchw,
                names: TensorNames::new("data", "detection_out"),
            },
            confidence_threshold: 0.5,
            pad_input: true,
        }
    }
}

/// Maps normalised model-input corners back to the source frame
enum InputMapping {
    Letterbox(CoordinateFrame),
    Stretch { source: Size },
}

impl InputMapping {
    fn to_source(&self, nx: f32, ny: f32) -> Point {
        match self {
            InputMapping::Letterbox(frame) => frame.to_source(Point::new(
                nx * frame.canvas.width as f32,
                ny * frame.canvas.height as f32,
            )),
            InputMapping::Stretch { source } => {
                Point::new(nx * source.width as f32, ny * source.height as f32)
            }
        }
    }
}

pub struct FaceDetector {
    info: TaskInfo,
    config: FaceDetectorConfig,
    model: Box<dyn InferenceModel>,
}

impl FaceDetector {
    pub const KIND: &'static str = "FaceDetection";

    pub fn new(info: TaskInfo, config: FaceDetectorConfig, model: Box<dyn InferenceModel>) -> Self {
        Self {
            info,
            config,
            model,
        }
    }

    pub fn from_descriptor(descriptor: &TaskDescriptor, loader: &dyn ModelLoader) -> Result<Self> {
        let mut config = FaceDetectorConfig::default();
        config.input.apply_params(&descriptor.parameters)?;
        descriptor
            .parameters
            .apply_f32("NNConfidenceThreshold", &mut config.confidence_threshold)?;
        descriptor
            .parameters
            .apply_bool("NNPadInput", &mut config.pad_input)?;

        let model = loader
            .load(&descriptor.model_reference)
            .with_context(|| format!("task {}: face detection model", descriptor.id))?;
        Ok(Self::new(TaskInfo::from_descriptor(descriptor), config, model))
    }

    pub fn config(&self) -> &FaceDetectorConfig {
        &self.config
    }

    fn decode(
        &self,
        output: &ndarray::ArrayD<f32>,
        mapping: &InputMapping,
        bounds: Size,
    ) -> Result<Vec<FaceBox>> {
        let values = output_values(output, 0)?;
        if values.len() % DETECTION_ROW != 0 {
            bail!(
                "detection output of {} values is not a multiple of {}",
                values.len(),
                DETECTION_ROW
            );
        }

        let boxes = values
            .chunks_exact(DETECTION_ROW)
            .filter(|row| row[2] > self.config.confidence_threshold)
            .filter_map(|row| {
                let top_left = mapping.to_source(row[3], row[4]);
                let bottom_right = mapping.to_source(row[5], row[6]);
                let rect = clip_rect(Rect::from_corners(top_left, bottom_right), bounds);
                (!rect.is_empty()).then(|| FaceBox::new(rect, row[2]))
            })
            .collect();
        Ok(boxes)
    }
}

impl Detector for FaceDetector {
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
        let input = &self.config.input;

        let (canvas, mapping) = if self.config.pad_input {
            let (canvas, coords) = resize_with_padding(frame.image(), input.size, true)?;
            (canvas, InputMapping::Letterbox(coords))
        } else {
            (
                resize_exact(frame.image(), input.size),
                InputMapping::Stretch { source: bounds },
            )
        };

        let tensor = image_to_tensor(
            &canvas,
            &input.normalization,
            input.channel_order,
            input.layout,
        );
        let output = self
            .model
            .infer(tensor, &input.names)
            .context("face detection inference failed")?;

        let boxes = self.decode(&output, &mapping, bounds)?;
        debug!(task = %self.info.name, faces = boxes.len(), "faces detected");
        frame.set_face_boxes(boxes);
        Ok(())
    }
}
