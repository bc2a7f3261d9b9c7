//! 68-point facial landmark detector.
//!
//! The frame is first shrunk (aspect preserved, no padding) into a bounded
//! working space. Each face box is forward-mapped into that space, cropped,
//! resized to the model input, and the model returns 68 `(x, y)` pairs
//! normalised to the crop. Points travel crop -> working space -> frame.

use super::{output_values, run_per_face, Detector, InputSpec, TaskInfo};
use crate::inference::{InferenceModel, ModelLoader, TensorNames};
use crate::preprocess::{
    crop, image_to_tensor, resize_exact, ChannelOrder, Normalization, TensorLayout,
};
use anyhow::{anyhow, Context, Result};
use common::geometry::{clip_point, clip_rect, resize_with_padding, Point, Rect, Size};
use common::landmarks::{LandmarkSet, LANDMARKS_68};
use common::task_config::TaskDescriptor;
use common::Frame;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkDetectorConfig {
    pub input: InputSpec,

    /// Bound for the working-space resize of the whole frame
    pub working_size: Size,
}

impl Default for LandmarkDetectorConfig {
    fn default() -> Self {
        Self {
            input: InputSpec {
                size: Size::new(112, 112),
                normalization: Normalization::uniform(0.0, 1.0 / 255.0),
                channel_order: ChannelOrder::Rgb,
                layout: TensorLayout::Nchw,
                names: TensorNames::new("input", "landmarks"),
            },
            working_size: Size::new(500, 500),
        }
    }
}

pub struct LandmarkDetector {
    info: TaskInfo,
    config: LandmarkDetectorConfig,
    model: Box<dyn InferenceModel>,
}

impl LandmarkDetector {
    pub const KIND: &'static str = "FacialFeatures";

    pub fn new(
        info: TaskInfo,
        config: LandmarkDetectorConfig,
        model: Box<dyn InferenceModel>,
    ) -> Self {
        Self {
            info,
            config,
            model,
        }
    }

    pub fn from_descriptor(descriptor: &TaskDescriptor, loader: &dyn ModelLoader) -> Result<Self> {
        let mut config = LandmarkDetectorConfig::default();
        config.input.apply_params(&descriptor.parameters)?;
        descriptor
            .parameters
            .apply_u32("NNWorkingImageWidth", &mut config.working_size.width)?;
        descriptor
            .parameters
            .apply_u32("NNWorkingImageHeight", &mut config.working_size.height)?;

        let model = loader
            .load(&descriptor.model_reference)
            .with_context(|| format!("task {}: landmark model", descriptor.id))?;
        Ok(Self::new(TaskInfo::from_descriptor(descriptor), config, model))
    }

    pub fn config(&self) -> &LandmarkDetectorConfig {
        &self.config
    }
}

impl Detector for LandmarkDetector {
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
        let (working, coords) =
            resize_with_padding(frame.image(), self.config.working_size, false)?;
        let working_bounds = coords.canvas;

        let input = &self.config.input;
        let model = &mut self.model;

        run_per_face(
            &self.info.name,
            frame,
            |_, face| {
                let face_box = face.face_box.ok_or_else(|| anyhow!("face has no bounding box"))?;
                let region = clip_rect(coords.rect_to_target(face_box.rect), working_bounds);
                let (x, y, w, h) = region
                    .pixel_bounds(working_bounds)
                    .ok_or_else(|| anyhow!("face box is empty in working space"))?;
                let face_crop = crop(&working, Rect::new(x as f32, y as f32, w as f32, h as f32))?;
                let resized = resize_exact(&face_crop, input.size);

                let tensor = image_to_tensor(
                    &resized,
                    &input.normalization,
                    input.channel_order,
                    input.layout,
                );
                let output = model.infer(tensor, &input.names)?;
                let values = output_values(&output, LANDMARKS_68 * 2)?;

                let points: Vec<Point> = values
                    .chunks_exact(2)
                    .take(LANDMARKS_68)
                    .map(|xy| {
                        let in_working =
                            Point::new(x as f32 + xy[0] * w as f32, y as f32 + xy[1] * h as f32);
                        clip_point(coords.to_source(in_working), bounds)
                    })
                    .collect();
                Ok((points, face_box.confidence))
            },
            |face, (points, confidence)| {
                face.landmarks = LandmarkSet::from_68_points(&points, confidence);
                face.feature_points = points;
                face.invalidate_derived();
                face.store_derived();
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockModel;
    use common::landmarks::LandmarkIndex;
    use common::{FaceBox, MouthOpen};
    use image::RgbImage;

    /// Every point at the centre of the crop, except the mouth which opens
    /// vertically
    fn centred_output() -> Vec<f32> {
        let mut out = vec![0.5; LANDMARKS_68 * 2];
        // corners 48 / 54
        out[48 * 2] = 0.25;
        out[54 * 2] = 0.75;
        // inner lips 62 / 66
        out[62 * 2 + 1] = 0.4;
        out[66 * 2 + 1] = 0.6;
        out
    }

    fn detector(model: MockModel) -> LandmarkDetector {
        let config = LandmarkDetectorConfig::default();
        LandmarkDetector::new(TaskInfo::new("ff", 1), config, Box::new(model))
    }

    #[test]
    fn test_points_map_back_to_frame() {
        // 1000x500 frame -> working 500x250, scale 0.5
        let frame = Frame::new("f", RgbImage::new(1000, 500));
        frame.set_face_boxes(vec![FaceBox::new(Rect::new(200.0, 100.0, 200.0, 200.0), 0.9)]);

        let model = MockModel::constant(&[1, LANDMARKS_68 * 2], centred_output());
        let log = model.input_log();
        detector(model).run(&frame).unwrap();

        assert_eq!(log.lock().unwrap()[0].0, vec![1, 3, 112, 112]);

        let face = &frame.faces()[0];
        assert_eq!(face.feature_points.len(), LANDMARKS_68);
        let tip = face.landmarks.point(LandmarkIndex::NoseTip).unwrap();
        assert!((tip.x - 300.0).abs() < 1.0, "{tip:?}");
        assert!((tip.y - 200.0).abs() < 1.0, "{tip:?}");

        // mouth width 100, gap 40 in frame space
        let mouth: MouthOpen = face.get();
        assert!((mouth.open_ratio - 0.4).abs() < 0.02, "{mouth:?}");
        assert_eq!(mouth.open_score, common::UNKNOWN_SCORE);
    }

    #[test]
    fn test_short_output_fails_face() {
        let frame = Frame::new("f", RgbImage::new(100, 100));
        frame.set_face_boxes(vec![FaceBox::new(Rect::new(10.0, 10.0, 50.0, 50.0), 0.9)]);
        let mut det = detector(MockModel::constant(&[1, 10], vec![0.5; 10]));
        assert!(det.run(&frame).is_err());
        assert!(frame.faces()[0].feature_points.is_empty());
    }

    #[test]
    fn test_no_faces_is_noop() {
        let frame = Frame::new("f", RgbImage::new(100, 100));
        let model = MockModel::constant(&[1, LANDMARKS_68 * 2], centred_output());
        let calls = model.call_counter();
        detector(model).run(&frame).unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_working_size_param() {
        let loader = crate::mock::MockModelLoader::new()
            .with_model("ff.onnx", || MockModel::constant(&[1], vec![0.0]));
        let desc = TaskDescriptor::new("FFDefault", LandmarkDetector::KIND, 1)
            .with_model("ff.onnx")
            .with_param("NNWorkingImageWidth", common::ParamValue::Int(640));
        let det = LandmarkDetector::from_descriptor(&desc, &loader).unwrap();
        assert_eq!(det.config().working_size, Size::new(640, 500));
    }
}
