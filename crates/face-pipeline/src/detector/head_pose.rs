//! Head pose regression from 68-point landmarks.
//!
//! The model consumes pairwise landmark offsets scaled by the inter-ocular
//! distance and standardised with statistics shipped alongside the model.

use super::{output_values, run_per_face, Detector, TaskInfo};
use crate::inference::{InferenceModel, ModelLoader, TensorNames};
use anyhow::{anyhow, bail, Context, Result};
use common::geometry::Point;
use common::landmarks::LANDMARKS_68;
use common::task_config::TaskDescriptor;
use common::{Frame, HeadPose};
use ndarray::{ArrayD, IxDyn};
use std::path::Path;

/// Points before this index (the jaw line) are not used
const FIRST_POSE_POINT: usize = 17;

/// `2 * C(51, 2)`: dx and dy for every pair of the 51 inner points
pub const POSE_FEATURES: usize =
    (LANDMARKS_68 - FIRST_POSE_POINT) * (LANDMARKS_68 - FIRST_POSE_POINT - 1);

/// Features are expressed in units of 1/100 of the inter-ocular distance
const IOD_UNITS: f32 = 100.0;

/// Standardisation loaded from a two-row CSV (mean, std). Means apply per
/// feature; the std at the `dx` index of a pair applies to both its offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureStats {
    mean: Vec<f32>,
    std: Vec<f32>,
}

impl FeatureStats {
    /// Keep the first `POSE_FEATURES` values of each row. A zero std is
    /// replaced by 1.
    pub fn new(mean: Vec<f32>, std: Vec<f32>) -> Result<Self> {
        for (label, row) in [("mean", &mean), ("std", &std)] {
            if row.len() < POSE_FEATURES {
                bail!("{} row has {} values, expected {}", label, row.len(), POSE_FEATURES);
            }
        }

        Ok(Self {
            mean: mean[..POSE_FEATURES].to_vec(),
            std: std[..POSE_FEATURES]
                .iter()
                .map(|&s| if s == 0.0 { 1.0 } else { s })
                .collect(),
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut rows = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(n, line)| {
                line.split(',')
                    .map(|v| {
                        v.trim()
                            .parse::<f32>()
                            .with_context(|| format!("row {}: invalid number {:?}", n + 1, v))
                    })
                    .collect::<Result<Vec<f32>>>()
            });

        let mean = rows.next().ok_or_else(|| anyhow!("missing mean row"))??;
        let std = rows.next().ok_or_else(|| anyhow!("missing std row"))??;
        Self::new(mean, std)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read pose statistics {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid pose statistics {}", path.display()))
    }

    /// Zero mean, unit std
    pub fn identity() -> Self {
        Self {
            mean: vec![0.0; POSE_FEATURES],
            std: vec![1.0; POSE_FEATURES],
        }
    }

    pub fn mean(&self) -> &[f32] {
        &self.mean
    }

    pub fn std(&self) -> &[f32] {
        &self.std
    }
}

/// Interleaved `dx, dy` for every pair `17 <= i < j < 68`, scaled to
/// `100 / iod` and standardised. Both offsets of a pair share the std stored
/// at the pair's `dx` index.
pub fn pose_features(points: &[Point], iod: f32, stats: &FeatureStats) -> Vec<f32> {
    let scale = IOD_UNITS / iod;
    let mut features = Vec::with_capacity(POSE_FEATURES);
    for i in FIRST_POSE_POINT..LANDMARKS_68 {
        for j in (i + 1)..LANDMARKS_68 {
            let k = features.len();
            let std = stats.std[k];
            features.push((scale * (points[i].x - points[j].x) - stats.mean[k]) / std);
            features.push((scale * (points[i].y - points[j].y) - stats.mean[k + 1]) / std);
        }
    }
    features
}

pub struct HeadPoseEstimator {
    info: TaskInfo,
    names: TensorNames,
    stats: FeatureStats,
    model: Box<dyn InferenceModel>,
}

impl HeadPoseEstimator {
    pub const KIND: &'static str = "FacePose";

    pub fn new(info: TaskInfo, stats: FeatureStats, model: Box<dyn InferenceModel>) -> Self {
        Self {
            info,
            names: TensorNames::new("dense_input", "dense_3/MatMul"),
            stats,
            model,
        }
    }

    pub fn from_descriptor(descriptor: &TaskDescriptor, loader: &dyn ModelLoader) -> Result<Self> {
        let stats_path = descriptor.config_reference.as_deref().ok_or_else(|| {
            anyhow!("task {}: head pose needs a configReference CSV", descriptor.id)
        })?;
        let stats = FeatureStats::from_path(stats_path)
            .with_context(|| format!("task {}", descriptor.id))?;

        let model = loader
            .load(&descriptor.model_reference)
            .with_context(|| format!("task {}: head pose model", descriptor.id))?;
        let mut estimator = Self::new(TaskInfo::from_descriptor(descriptor), stats, model);
        descriptor
            .parameters
            .apply_string("NNInputName", &mut estimator.names.input)?;
        descriptor
            .parameters
            .apply_string("NNOutputName", &mut estimator.names.output)?;
        Ok(estimator)
    }

    pub fn names(&self) -> &TensorNames {
        &self.names
    }
}

impl Detector for HeadPoseEstimator {
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
        let stats = &self.stats;
        let names = &self.names;
        let model = &mut self.model;

        run_per_face(
            &self.info.name,
            frame,
            |_, face| {
                if face.feature_points.len() != LANDMARKS_68 {
                    bail!(
                        "head pose needs {} feature points, face has {}",
                        LANDMARKS_68,
                        face.feature_points.len()
                    );
                }
                let iod = face
                    .inter_ocular_distance()
                    .filter(|d| *d > f32::EPSILON)
                    .ok_or_else(|| anyhow!("inter-ocular distance unavailable"))?;

                let features = pose_features(&face.feature_points, iod, stats);
                let input = ArrayD::from_shape_vec(IxDyn(&[1, POSE_FEATURES]), features)
                    .context("failed to shape pose features")?;
                let output = model.infer(input, names)?;
                let values = output_values(&output, 3)?;
                Ok(HeadPose {
                    pitch: values[0],
                    yaw: values[1],
                    roll: values[2],
                })
            },
            |face, pose| face.set(pose),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockModel;
    use common::landmarks::LandmarkSet;
    use common::task_config::ParamValue;
    use common::{Attribute, FaceBox, Rect, UNKNOWN_ANGLE};
    use image::RgbImage;
    use std::io::Write;

    fn face_points() -> Vec<Point> {
        (0..LANDMARKS_68)
            .map(|i| Point::new(100.0 + (i % 10) as f32 * 5.0, 100.0 + (i / 10) as f32 * 5.0))
            .collect()
    }

    fn frame_with_landmarks() -> Frame {
        let frame = Frame::new("f", RgbImage::new(300, 300));
        frame.set_face_boxes(vec![FaceBox::new(Rect::new(90.0, 90.0, 80.0, 80.0), 0.9)]);
        frame.update_face(0, |face| {
            let points = face_points();
            face.landmarks = LandmarkSet::from_68_points(&points, 0.9);
            face.feature_points = points;
        });
        frame
    }

    fn estimator(model: MockModel) -> HeadPoseEstimator {
        HeadPoseEstimator::new(TaskInfo::new("pose", 3), FeatureStats::identity(), Box::new(model))
    }

    fn stats_csv(mean: f32, std: f32) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let row = |v: f32| vec![v.to_string(); POSE_FEATURES].join(",");
        writeln!(file, "{}", row(mean)).unwrap();
        writeln!(file, "{}", row(std)).unwrap();
        file
    }

    #[test]
    fn test_feature_count() {
        assert_eq!(POSE_FEATURES, 2550);
        let f = pose_features(&face_points(), 10.0, &FeatureStats::identity());
        assert_eq!(f.len(), POSE_FEATURES);
    }

    #[test]
    fn test_features_scaled_and_standardised() {
        let mut points = vec![Point::default(); LANDMARKS_68];
        points[17] = Point::new(10.0, 4.0);
        points[18] = Point::new(0.0, 0.0);
        let mut mean = vec![0.0; POSE_FEATURES];
        mean[1] = 1.0;
        let mut std = vec![1.0; POSE_FEATURES];
        std[0] = 4.0;
        std[1] = 2.0;
        let stats = FeatureStats::new(mean, std).unwrap();

        let f = pose_features(&points, 50.0, &stats);
        // pair (17, 18): dx = 10 * 2 / 4, dy = (4 * 2 - 1) / 4
        assert!((f[0] - 5.0).abs() < 1e-5);
        assert!((f[1] - 1.75).abs() < 1e-5);
    }

    #[test]
    fn test_pair_offsets_share_dx_std() {
        let mut points = vec![Point::default(); LANDMARKS_68];
        points[17] = Point::new(7.0, 7.0);
        let mut std = vec![1.0; POSE_FEATURES];
        std[1] = 2.0;
        let stats = FeatureStats::new(vec![0.0; POSE_FEATURES], std).unwrap();

        let f = pose_features(&points, IOD_UNITS, &stats);
        assert!((f[0] - 7.0).abs() < 1e-5);
        assert!((f[1] - 7.0).abs() < 1e-5);
    }

    #[test]
    fn test_short_stats_rejected() {
        assert!(FeatureStats::new(vec![0.0; 3], vec![1.0; POSE_FEATURES]).is_err());
        assert!(FeatureStats::new(vec![0.0; POSE_FEATURES], vec![1.0; 10]).is_err());
        let stats =
            FeatureStats::new(vec![0.0; POSE_FEATURES + 2], vec![0.0; POSE_FEATURES]).unwrap();
        assert_eq!(stats.mean().len(), POSE_FEATURES);
        assert!(stats.std().iter().all(|s| *s == 1.0));
    }

    #[test]
    fn test_stats_parsing() {
        let file = stats_csv(0.5, 0.0);
        let stats = FeatureStats::from_path(file.path()).unwrap();
        assert_eq!(stats.mean().len(), POSE_FEATURES);
        assert!(stats.std().iter().all(|s| *s == 1.0));

        assert!(FeatureStats::parse("1,2,3\n1,2,3\n").is_err());
        assert!(FeatureStats::parse("").is_err());
        assert!(FeatureStats::parse(&format!("{}\n", vec!["x"; POSE_FEATURES].join(","))).is_err());
    }

    #[test]
    fn test_pose_written_in_pitch_yaw_roll_order() {
        let frame = frame_with_landmarks();
        let model = MockModel::constant(&[1, 3], vec![10.0, -20.0, 5.0]);
        let log = model.input_log();
        let mut est = estimator(model);
        est.run(&frame).unwrap();

        assert_eq!(log.lock().unwrap()[0].0, vec![1, POSE_FEATURES]);
        let pose: HeadPose = frame.faces()[0].get();
        assert_eq!(pose, HeadPose { pitch: 10.0, yaw: -20.0, roll: 5.0 });
    }

    #[test]
    fn test_missing_landmarks_leaves_sentinel() {
        let frame = Frame::new("f", RgbImage::new(100, 100));
        frame.set_face_boxes(vec![FaceBox::new(Rect::new(10.0, 10.0, 50.0, 50.0), 0.9)]);
        let model = MockModel::constant(&[1, 3], vec![1.0, 2.0, 3.0]);
        let calls = model.call_counter();
        let mut est = estimator(model);

        assert!(est.run(&frame).is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        let pose: HeadPose = frame.faces()[0].get();
        assert!(pose.is_unknown());
        assert_eq!(pose.yaw, UNKNOWN_ANGLE);
    }

    #[test]
    fn test_from_descriptor_requires_stats() {
        let loader = crate::mock::MockModelLoader::new()
            .with_model("pose.onnx", || MockModel::constant(&[1, 3], vec![0.0; 3]));
        let base = TaskDescriptor::new("FP", HeadPoseEstimator::KIND, 3).with_model("pose.onnx");
        assert!(HeadPoseEstimator::from_descriptor(&base, &loader).is_err());

        let missing = base.clone().with_config("/nonexistent/pose.csv");
        assert!(HeadPoseEstimator::from_descriptor(&missing, &loader).is_err());

        let file = stats_csv(0.0, 1.0);
        let ok = base
            .with_config(file.path().to_string_lossy())
            .with_param("NNOutputName", ParamValue::String("pose".into()));
        let est = HeadPoseEstimator::from_descriptor(&ok, &loader).unwrap();
        assert_eq!(est.names().output, "pose");
    }
}
