//! Overlay of pipeline results on the source image.

use ab_glyph::{FontArc, PxScale};
use anyhow::{Context, Result};
use common::{Attribute, Eyeglasses, FaceEntity, FrameSnapshot, HeadPose, MouthOpen, Rect, Smile};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_text_mut};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const FEATURE_COLOR: Rgb<u8> = Rgb([0, 128, 255]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const TEXT_HEIGHT: f32 = 14.0;

/// Optional parts of the overlay
#[derive(Clone, Default)]
pub struct AnnotateOptions {
    /// Font for the pose and score labels; without one only geometry is drawn
    pub font: Option<FontArc>,
}

impl AnnotateOptions {
    /// Load the label font from a TrueType/OpenType file, if one is given
    pub fn load(font_path: Option<&Path>) -> Result<Self> {
        let font = match font_path {
            Some(path) => {
                let bytes = fs::read(path)
                    .with_context(|| format!("failed to read font {}", path.display()))?;
                let font = FontArc::try_from_vec(bytes)
                    .with_context(|| format!("invalid font {}", path.display()))?;
                Some(font)
            }
            None => None,
        };
        Ok(Self { font })
    }
}

impl std::fmt::Debug for AnnotateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotateOptions")
            .field("font", &self.font.is_some())
            .finish()
    }
}

/// Draw face boxes, named landmarks and raw feature points
pub fn annotate(image: &RgbImage, snapshot: &FrameSnapshot) -> RgbImage {
    annotate_with(image, snapshot, &AnnotateOptions::default())
}

/// [`annotate`], plus pose and score labels above each box when a font is set
pub fn annotate_with(
    image: &RgbImage,
    snapshot: &FrameSnapshot,
    options: &AnnotateOptions,
) -> RgbImage {
    let mut canvas = image.clone();
    let (w, h) = canvas.dimensions();
    if w == 0 || h == 0 {
        return canvas;
    }

    for face in &snapshot.faces {
        if let Some(face_box) = face.face_box {
            draw_hollow_rect_mut(&mut canvas, to_pixel_rect(face_box.rect, w, h), BOX_COLOR);
        }
        for point in &face.feature_points {
            let center = (clamp_to_i32(point.x, w), clamp_to_i32(point.y, h));
            draw_filled_circle_mut(&mut canvas, center, 1, FEATURE_COLOR);
        }
        for (_, location) in face.landmarks.iter() {
            let center = (clamp_to_i32(location.x, w), clamp_to_i32(location.y, h));
            draw_filled_circle_mut(&mut canvas, center, 3, LANDMARK_COLOR);
        }
        if let (Some(font), Some(face_box)) = (&options.font, face.face_box) {
            let lines = face_labels(face);
            let x = clamp_to_i32(face_box.rect.x + 2.0, w);
            let top = face_box.rect.y - TEXT_HEIGHT * lines.len() as f32 - 2.0;
            for (n, line) in lines.iter().enumerate() {
                let y = clamp_to_i32(top + TEXT_HEIGHT * n as f32, h);
                let scale = PxScale::from(TEXT_HEIGHT);
                draw_text_mut(&mut canvas, TEXT_COLOR, x, y, scale, font, line);
            }
        }
    }
    canvas
}

/// Text shown above a face: detection confidence, then the pose and scores
/// that are known.
pub fn face_labels(face: &FaceEntity) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(face_box) = face.face_box {
        lines.push(format!("{}", (face_box.confidence * 100.0) as i32));
    }

    let pose: HeadPose = face.get();
    if !pose.is_unknown() {
        lines.push(format!(
            "Roll:{}, Yaw:{}, Pitch:{}",
            pose.roll as i32, pose.yaw as i32, pose.pitch as i32
        ));
    }

    let mut scores = Vec::new();
    let mouth: MouthOpen = face.get();
    if !mouth.is_unknown() {
        scores.push(format!("Mouth:{:.2}/{:.2}", mouth.open_score, mouth.open_ratio));
    }
    let smile: Smile = face.get();
    if !smile.is_unknown() {
        scores.push(format!("Smile:{:.2}", smile.score));
    }
    let glasses: Eyeglasses = face.get();
    if !glasses.is_unknown() {
        scores.push(format!("Glasses:{:.2}", glasses.score));
    }
    if !scores.is_empty() {
        lines.push(scores.join(", "));
    }
    lines
}

/// Annotate and save to `output_path`, creating its directory if needed
pub fn save_annotated(
    image: &RgbImage,
    snapshot: &FrameSnapshot,
    output_path: &Path,
    options: &AnnotateOptions,
) -> Result<()> {
    if let Some(dir) = output_path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    annotate_with(image, snapshot, options)
        .save(output_path)
        .with_context(|| format!("failed to save annotated image {}", output_path.display()))
}

/// One output path per input under `output_dir`. Inputs that share a file
/// name get their input index appended to the stem.
pub fn output_paths(inputs: &[PathBuf], output_dir: &Path) -> Vec<PathBuf> {
    let file_name = |input: &PathBuf| {
        input
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("frame.png"))
    };

    let mut counts: HashMap<PathBuf, usize> = HashMap::new();
    for input in inputs {
        *counts.entry(file_name(input)).or_default() += 1;
    }

    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let name = file_name(input);
            if counts.get(&name).copied().unwrap_or(0) < 2 {
                return output_dir.join(name);
            }
            let stem = name.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
            let unique = match name.extension() {
                Some(ext) => format!("{}_{}.{}", stem, index, ext.to_string_lossy()),
                None => format!("{}_{}", stem, index),
            };
            warn!(
                input = %input.display(),
                output = %unique,
                "annotated file name shared with another input, adding index"
            );
            output_dir.join(unique)
        })
        .collect()
}

fn to_pixel_rect(rect: Rect, w: u32, h: u32) -> imageproc::rect::Rect {
    let (max_x, max_y) = ((w - 1) as f32, (h - 1) as f32);
    let x1 = rect.x.clamp(0.0, max_x);
    let y1 = rect.y.clamp(0.0, max_y);
    let x2 = (rect.x + rect.width).clamp(0.0, max_x);
    let y2 = (rect.y + rect.height).clamp(0.0, max_y);

    imageproc::rect::Rect::at(x1.round() as i32, y1.round() as i32)
        .of_size((x2 - x1).max(1.0).round() as u32, (y2 - y1).max(1.0).round() as u32)
}

#[inline]
fn clamp_to_i32(value: f32, extent: u32) -> i32 {
    value.clamp(0.0, (extent - 1) as f32).round() as i32
}
