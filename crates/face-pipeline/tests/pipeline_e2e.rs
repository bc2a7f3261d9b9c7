//! End-to-end tests: configuration document -> registry -> pipeline -> frame
//! results, with scripted models standing in for ONNX sessions.

use anyhow::Result;
use common::landmarks::{LandmarkIndex, LANDMARKS_68};
use common::{
    Attribute, Eyeglasses, EyesOpen, Frame, Gaze, HeadPose, MouthOpen, PipelineDocument, RedEye,
    Smile,
};
use face_pipeline::detector::head_pose::POSE_FEATURES;
use face_pipeline::mock::{MockModel, MockModelLoader};
use face_pipeline::{process_images, BatchOptions, DetectorRegistry, PipelineFactory, TaskStatus};
use image::RgbImage;
use ndarray::ArrayD;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

fn landmark_output() -> Vec<f32> {
    (0..LANDMARKS_68)
        .flat_map(|i| {
            let col = (i % 10) as f32 / 9.0;
            let row = (i / 10) as f32 / 6.0;
            [0.2 + 0.6 * col, 0.2 + 0.6 * row]
        })
        .collect()
}

fn loader() -> MockModelLoader {
    MockModelLoader::new()
        .with_model("fd.onnx", || {
            MockModel::constant(&[1, 1, 1, 7], vec![0.0, 1.0, 0.95, 0.25, 0.25, 0.75, 0.75])
        })
        .with_model("ff.onnx", || MockModel::constant(&[1, LANDMARKS_68 * 2], landmark_output()))
        .with_model("pose.onnx", || MockModel::constant(&[1, 3], vec![5.0, -10.0, 2.0]))
        .with_model("mouth.onnx", || MockModel::constant(&[1, 1], vec![0.8]))
        .with_model("smile.onnx", || MockModel::constant(&[1, 1], vec![0.3]))
        .with_model("glasses.onnx", || MockModel::constant(&[1, 2], vec![0.1, 0.9]))
        .with_model("broken.onnx", || MockModel::failing("inference backend unavailable"))
        .with_model("panics.onnx", || {
            MockModel::new(|_, _| -> Result<ArrayD<f32>> { panic!("corrupt output buffer") })
        })
}

fn pose_csv(dir: &Path) -> String {
    let path = dir.join("pose.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "{}", vec!["0.0"; POSE_FEATURES].join(",")).unwrap();
    writeln!(file, "{}", vec!["1.0"; POSE_FEATURES].join(",")).unwrap();
    path.display().to_string()
}

/// Landmarks are declared before face detection; precedence fixes the order.
fn document(csv: &str, smile_model: &str, glasses_model: &str) -> PipelineDocument {
    let json = format!(
        r#"{{
    "configIds": ["FD", "FF", "FP", "MO", "SM", "EG"],
    "tasks": [
        {{ "id": "FF", "kind": "FacialFeatures", "precedence": 1, "modelReference": "ff.onnx" }},
        {{ "id": "FD", "kind": "FaceDetection", "precedence": 0, "modelReference": "fd.onnx",
           "parameters": {{ "NNConfidenceThreshold": [0.5, "float"],
                            "NNImageMean": ["[104.0, 177.0, 123.0]", "vector<float>"] }} }},
        {{ "id": "FP", "kind": "FacePose", "precedence": 2, "modelReference": "pose.onnx",
           "configReference": "{csv}" }},
        {{ "id": "MO", "kind": "MouthOpen", "precedence": 3, "modelReference": "mouth.onnx" }},
        {{ "id": "SM", "kind": "Smile", "precedence": 3, "modelReference": "{smile_model}" }},
        {{ "id": "EG", "kind": "Eyeglasses", "precedence": 3,
           "modelReference": "{glasses_model}" }},
        {{ "id": "XX", "kind": "RedEyeDetector", "precedence": 4 }}
    ]
}}"#
    );
    PipelineDocument::parse(&json).unwrap()
}

#[test]
fn test_full_pipeline_fills_every_configured_attribute() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = tempfile::tempdir()?;
    let doc = document(&pose_csv(dir.path()), "smile.onnx", "glasses.onnx");

    let mut pipeline = DetectorRegistry::with_builtin().build_pipeline(&doc, &loader())?;
    assert_eq!(pipeline.task_names(), ["FF", "FD", "FP", "MO", "SM", "EG"]);

    let frame = Frame::new("group.jpg", RgbImage::new(400, 300));
    let report = pipeline.run(&frame);
    assert_eq!(report.failures().count(), 0, "{report:?}");
    let order: Vec<&str> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(order, ["FD", "FF", "FP", "MO", "SM", "EG"]);

    let faces = frame.faces();
    assert_eq!(faces.len(), 1);
    let face = &faces[0];

    let face_box = face.face_box.unwrap();
    assert!((face_box.rect.x - 100.0).abs() < 1.0);
    assert!((face_box.rect.width - 200.0).abs() < 1.0);

    assert_eq!(face.feature_points.len(), LANDMARKS_68);
    for p in &face.feature_points {
        assert!(face_box.rect.contains(p), "{p:?} outside {face_box:?}");
    }
    assert!(face.landmarks.point(LandmarkIndex::NoseTip).is_some());
    assert!(face.inter_ocular_distance().unwrap() > 0.0);

    assert_eq!(face.get::<HeadPose>(), HeadPose { pitch: 5.0, yaw: -10.0, roll: 2.0 });
    let mouth: MouthOpen = face.get();
    assert_eq!(mouth.open_score, 0.8);
    assert!(mouth.open_ratio > 0.0);
    assert_eq!(face.get::<Smile>().score, 0.3);
    assert_eq!(face.get::<Eyeglasses>().score, 0.9);

    assert!(face.get::<EyesOpen>().is_unknown());
    assert!(face.get::<Gaze>().is_unknown());
    assert!(face.get::<RedEye>().is_unknown());
    Ok(())
}

#[test]
fn test_failing_and_panicking_tasks_do_not_stop_the_run() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = tempfile::tempdir()?;
    let doc = document(&pose_csv(dir.path()), "broken.onnx", "panics.onnx");
    let mut pipeline = DetectorRegistry::with_builtin().build_pipeline(&doc, &loader())?;

    let frame = Frame::new("group.jpg", RgbImage::new(400, 300));
    let report = pipeline.run(&frame);

    let failed: Vec<(&str, &TaskStatus)> = report
        .failures()
        .map(|o| (o.name.as_str(), &o.status))
        .collect();
    assert_eq!(failed.len(), 2);
    assert_eq!(failed[0].0, "SM");
    assert!(matches!(failed[0].1, TaskStatus::Failed { .. }));
    assert_eq!(failed[1].0, "EG");
    assert!(matches!(failed[1].1, TaskStatus::Panicked { .. }));

    let face = &frame.faces()[0];
    assert!(face.get::<Smile>().is_unknown());
    assert!(face.get::<Eyeglasses>().is_unknown());
    assert_eq!(face.get::<MouthOpen>().open_score, 0.8);
    assert!(!face.get::<HeadPose>().is_unknown());

    // the pipeline is reusable after a panic
    let again = pipeline.run(&Frame::new("next.jpg", RgbImage::new(400, 300)));
    assert_eq!(again.outcomes.len(), 6);
    Ok(())
}

#[test]
fn test_missing_pose_statistics_fail_the_build() {
    let doc = document("/nonexistent/pose.csv", "smile.onnx", "glasses.onnx");
    let err = DetectorRegistry::with_builtin()
        .build_pipeline(&doc, &loader())
        .err()
        .unwrap();
    assert!(format!("{:#}", err).contains("FP"));
}

#[test]
fn test_legacy_document_from_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tasks.json");
    std::fs::write(
        &path,
        r#"{
            "vMLConfigIDs": ["FD"],
            "vMLModules": [
                { "id": "FD", "task": "FaceDetection", "precedence": 0, "version": 1,
                  "modelName": "fd.onnx", "cfg": "",
                  "vParams": { "NNInputImageWidth": [320, "int"], "NNSwapRB": [0, "int"] } }
            ]
        }"#,
    )?;

    let doc = PipelineDocument::from_path(&path)?;
    let mut pipeline = DetectorRegistry::with_builtin().build_pipeline(&doc, &loader())?;
    let frame = Frame::new("a.jpg", RgbImage::new(640, 480));
    pipeline.run(&frame);
    assert_eq!(frame.face_count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_batch_over_image_files() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = tempfile::tempdir()?;
    let annotated = tempfile::tempdir()?;
    let doc = Arc::new(document(&pose_csv(dir.path()), "smile.onnx", "glasses.onnx"));

    let mut paths = Vec::new();
    for name in ["one.png", "two.png", "three.png"] {
        let path = dir.path().join(name);
        RgbImage::new(400, 300).save(&path)?;
        paths.push(path);
    }

    let registry = Arc::new(DetectorRegistry::with_builtin());
    let loader = Arc::new(loader());
    let factory: PipelineFactory = Arc::new(move || registry.build_pipeline(&doc, loader.as_ref()));

    let results = process_images(
        paths,
        factory,
        BatchOptions {
            workers: 2,
            annotate_dir: Some(annotated.path().to_path_buf()),
            ..BatchOptions::default()
        },
    )
    .await?;

    assert_eq!(results.len(), 3);
    for result in &results {
        assert_eq!(result.snapshot.faces.len(), 1);
        assert_eq!(result.report.outcomes.len(), 6);
    }
    assert!(annotated.path().join("two.png").exists());

    let json = serde_json::to_value(&results)?;
    assert_eq!(json[0]["report"]["outcomes"][0]["status"], "ok");
    assert_eq!(json[0]["snapshot"]["width"], 400);
    Ok(())
}
