//! Single-score classifiers run on the face crop (mouth open, smile,
//! eyeglasses).

use super::{output_values, run_per_face, Detector, InputSpec, TaskInfo};
use crate::inference::{InferenceModel, ModelLoader, TensorNames};
use crate::preprocess::{
    crop, image_to_tensor, resize_exact, ChannelOrder, Normalization, TensorLayout,
};
use anyhow::{anyhow, Context, Result};
use common::geometry::Size;
use common::task_config::TaskDescriptor;
use common::{Eyeglasses, FaceEntity, Frame, MouthOpen, Smile};
use serde::{Deserialize, Serialize};

/// Which attribute slot a classifier writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierTarget {
    MouthOpen,
    Smile,
    Eyeglasses,
}

impl ClassifierTarget {
    pub const ALL: [ClassifierTarget; 3] = [
        ClassifierTarget::MouthOpen,
        ClassifierTarget::Smile,
        ClassifierTarget::Eyeglasses,
    ];

    pub fn kind(self) -> &'static str {
        match self {
            ClassifierTarget::MouthOpen => "MouthOpen",
            ClassifierTarget::Smile => "Smile",
            ClassifierTarget::Eyeglasses => "Eyeglasses",
        }
    }

    pub fn default_config(self) -> CropClassifierConfig {
        let (side, names, output_index) = match self {
            ClassifierTarget::MouthOpen | ClassifierTarget::Smile => {
                (224, TensorNames::new("input_2", "output"), 0)
            }
            ClassifierTarget::Eyeglasses => (160, TensorNames::new("input", "cross_"), 1),
        };
        CropClassifierConfig {
            input: InputSpec {
                size: Size::new(side, side),
                normalization: Normalization::uniform(0.0, 1.0 / 255.0),
                channel_order: ChannelOrder::Bgr,
                layout: TensorLayout::Nchw,
                names,
            },
            output_index,
        }
    }

    /// Write `score` into this target's slot. Mouth-open only touches
    /// `open_score`; the landmark ratio is left as is.
    fn store(self, face: &mut FaceEntity, score: f32) {
        match self {
            ClassifierTarget::MouthOpen => face
                .attributes
                .update::<MouthOpen>(|m| m.open_score = score),
            ClassifierTarget::Smile => face.set(Smile { score }),
            ClassifierTarget::Eyeglasses => face.set(Eyeglasses { score }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropClassifierConfig {
    pub input: InputSpec,

    /// Position of the score in the flattened output
    pub output_index: usize,
}

pub struct CropClassifier {
    info: TaskInfo,
    target: ClassifierTarget,
    config: CropClassifierConfig,
    model: Box<dyn InferenceModel>,
}

impl CropClassifier {
    pub fn new(
        info: TaskInfo,
        target: ClassifierTarget,
        config: CropClassifierConfig,
        model: Box<dyn InferenceModel>,
    ) -> Self {
        Self {
            info,
            target,
            config,
            model,
        }
    }

    pub fn from_descriptor(
        target: ClassifierTarget,
        descriptor: &TaskDescriptor,
        loader: &dyn ModelLoader,
    ) -> Result<Self> {
        let mut config = target.default_config();
        config.input.apply_params(&descriptor.parameters)?;
        descriptor
            .parameters
            .apply_usize("NNOutputIndex", &mut config.output_index)?;

        let model = loader
            .load(&descriptor.model_reference)
            .with_context(|| format!("task {}: {} model", descriptor.id, target.kind()))?;
        Ok(Self::new(TaskInfo::from_descriptor(descriptor), target, config, model))
    }

    pub fn target(&self) -> ClassifierTarget {
        self.target
    }

    pub fn config(&self) -> &CropClassifierConfig {
        &self.config
    }
}

impl Detector for CropClassifier {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn kind(&self) -> &'static str {
        self.target.kind()
    }

    fn precedence(&self) -> i32 {
        self.info.precedence
    }

    fn run(&mut self, frame: &Frame) -> Result<()> {
        let image = frame.image();
        let input = &self.config.input;
        let index = self.config.output_index;
        let target = self.target;
        let model = &mut self.model;

        run_per_face(
            &self.info.name,
            frame,
            |_, face| {
                let face_box = face.face_box.ok_or_else(|| anyhow!("face has no bounding box"))?;
                let face_crop = crop(image, face_box.rect)?;
                let resized = resize_exact(&face_crop, input.size);
                let tensor = image_to_tensor(
                    &resized,
                    &input.normalization,
                    input.channel_order,
                    input.layout,
                );
                let output = model.infer(tensor, &input.names)?;
                let values = output_values(&output, index + 1)?;
                Ok(values[index])
            },
            |face, score| target.store(face, score),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockModel, MockModelLoader};
    use common::task_config::ParamValue;
    use common::{Attribute, FaceBox, Rect, UNKNOWN_SCORE};
    use image::{Rgb, RgbImage};
    use ndarray::{ArrayD, IxDyn};
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    fn frame_with_face() -> Frame {
        let frame = Frame::new("f", RgbImage::new(320, 240));
        frame.set_face_boxes(vec![FaceBox::new(Rect::new(40.0, 40.0, 100.0, 120.0), 0.9)]);
        frame
    }

    fn classifier(target: ClassifierTarget, model: MockModel) -> CropClassifier {
        let config = target.default_config();
        CropClassifier::new(TaskInfo::new(target.kind(), 5), target, config, Box::new(model))
    }

    #[test]
    fn test_defaults_per_target() {
        let mouth = ClassifierTarget::MouthOpen.default_config();
        assert_eq!(mouth.input.size, Size::new(224, 224));
        assert_eq!(mouth.output_index, 0);
        let glasses = ClassifierTarget::Eyeglasses.default_config();
        assert_eq!(glasses.input.size, Size::new(160, 160));
        assert_eq!(glasses.input.names, TensorNames::new("input", "cross_"));
        assert_eq!(glasses.output_index, 1);
    }

    #[test]
    fn test_eyeglasses_reads_second_output() {
        let frame = frame_with_face();
        let model = MockModel::constant(&[1, 2], vec![0.1, 0.8]);
        let log = model.input_log();
        classifier(ClassifierTarget::Eyeglasses, model).run(&frame).unwrap();

        assert_eq!(log.lock().unwrap()[0].0, vec![1, 3, 160, 160]);
        let face = &frame.faces()[0];
        assert_eq!(face.get::<Eyeglasses>().score, 0.8);
        assert!(face.get::<Smile>().is_unknown());
    }

    #[test]
    fn test_mouth_score_does_not_touch_ratio() {
        let frame = frame_with_face();
        frame.update_face(0, |face| {
            face.set(MouthOpen {
                open_score: UNKNOWN_SCORE,
                open_ratio: 0.3,
            })
        });
        classifier(ClassifierTarget::MouthOpen, MockModel::constant(&[1, 1], vec![0.75]))
            .run(&frame)
            .unwrap();

        let mouth: MouthOpen = frame.faces()[0].get();
        assert_eq!(mouth, MouthOpen { open_score: 0.75, open_ratio: 0.3 });
    }

    #[test]
    fn test_failed_inference_keeps_sentinel() {
        let frame = frame_with_face();
        let mut det = classifier(ClassifierTarget::Smile, MockModel::failing("boom"));
        assert!(det.run(&frame).is_err());
        assert!(frame.faces()[0].get::<Smile>().is_unknown());
    }

    #[test]
    fn test_output_index_param() {
        let loader = MockModelLoader::new()
            .with_model("smile.onnx", || MockModel::constant(&[3], vec![0.0, 0.0, 0.6]));
        let desc = TaskDescriptor::new("SM", "Smile", 5)
            .with_model("smile.onnx")
            .with_param("NNOutputIndex", ParamValue::Int(2))
            .with_param("NNInputImageWidth", ParamValue::Int(96))
            .with_param("NNInputImageHeight", ParamValue::Int(96));
        let mut det =
            CropClassifier::from_descriptor(ClassifierTarget::Smile, &desc, &loader).unwrap();
        assert_eq!(det.config().input.size, Size::new(96, 96));

        let frame = frame_with_face();
        det.run(&frame).unwrap();
        assert_eq!(frame.faces()[0].get::<Smile>().score, 0.6);
    }

    #[test]
    fn test_normalization_params_reach_tensor() {
        let frame = Frame::new("f", RgbImage::from_pixel(320, 240, Rgb([100, 50, 200])));
        frame.set_face_boxes(vec![FaceBox::new(Rect::new(40.0, 40.0, 100.0, 120.0), 0.9)]);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let loader = MockModelLoader::new().with_model("smile.onnx", move || {
            let sink = Arc::clone(&sink);
            MockModel::new(move |input, _| {
                let mut seen = sink.lock().unwrap();
                seen.extend((0..3).map(|c| input[[0, c, 0, 0]]));
                Ok(ArrayD::from_elem(IxDyn(&[1, 1]), 0.5))
            })
        });
        let desc = TaskDescriptor::new("SM", "Smile", 5)
            .with_model("smile.onnx")
            .with_param("NNImageMean", ParamValue::FloatVec(vec![10.0, 20.0, 30.0]))
            .with_param("NNImageStd", ParamValue::FloatVec(vec![2.0, 0.0, 4.0]))
            .with_param("NNSwapRB", ParamValue::Int(1));
        let mut det =
            CropClassifier::from_descriptor(ClassifierTarget::Smile, &desc, &loader).unwrap();
        det.run(&frame).unwrap();

        // RGB order; a zero std leaves the green channel unscaled
        assert_eq!(*seen.lock().unwrap(), vec![45.0, 30.0, 42.5]);
    }

    #[test]
    fn test_inference_runs_without_frame_lock() {
        let frame = Arc::new(frame_with_face());
        let observed = Arc::clone(&frame);
        let model = MockModel::new(move |_, _| {
            // blocks forever if the caller still holds the frame lock
            let faces = observed.snapshot().faces.len();
            Ok(ArrayD::from_elem(IxDyn(&[1, 1]), faces as f32 / 10.0))
        });
        let mut det = classifier(ClassifierTarget::Smile, model);

        let (tx, rx) = mpsc::channel();
        let running = Arc::clone(&frame);
        std::thread::spawn(move || {
            let _ = tx.send(det.run(&running).is_ok());
        });
        assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap());
        assert_eq!(frame.faces()[0].get::<Smile>().score, 0.1);
    }
}
