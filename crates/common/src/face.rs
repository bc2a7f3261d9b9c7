//! Detected face: box, landmarks and attributes.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::attributes::{Attribute, AttributeKind, AttributeStore, MouthOpen};
use crate::geometry::{Point, Rect};
use crate::landmarks::{LandmarkIndex, LandmarkSet};

/// Face bounding box in image coordinates with detector confidence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    pub rect: Rect,
    pub confidence: f32,
}

impl FaceBox {
    pub fn new(rect: Rect, confidence: f32) -> Self {
        Self { rect, confidence }
    }
}

/// Everything known about one detected face.
///
/// Derived attributes (currently the geometric mouth-open ratio) are computed
/// on first access and cached. Changing landmarks afterwards does not refresh
/// the cache; call [`FaceEntity::invalidate_derived`] after doing so.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaceEntity {
    pub face_box: Option<FaceBox>,
    pub landmarks: LandmarkSet,
    /// Raw keypoints from the last landmark model (68 or 468 points)
    pub feature_points: Vec<Point>,
    pub attributes: AttributeStore,
    #[serde(skip)]
    derived_mouth_ratio: OnceCell<Option<f32>>,
}

impl PartialEq for FaceEntity {
    fn eq(&self, other: &Self) -> bool {
        self.face_box == other.face_box
            && self.landmarks == other.landmarks
            && self.feature_points == other.feature_points
            && self.attributes == other.attributes
    }
}

impl FaceEntity {
    pub fn new(face_box: FaceBox) -> Self {
        Self {
            face_box: Some(face_box),
            ..Default::default()
        }
    }

    pub fn get<A: Attribute>(&self) -> A {
        self.attributes.get()
    }

    pub fn set<A: Attribute>(&mut self, value: A) {
        self.attributes.set(value)
    }

    /// Distance between the two eye-centre landmarks
    pub fn inter_ocular_distance(&self) -> Option<f32> {
        let left = self.landmarks.point(LandmarkIndex::LeftEyeCenter)?;
        let right = self.landmarks.point(LandmarkIndex::RightEyeCenter)?;
        Some(left.distance(&right))
    }

    /// Inner-lip gap over mouth width, cached after the first call
    pub fn mouth_open_ratio(&self) -> Option<f32> {
        *self.derived_mouth_ratio.get_or_init(|| {
            let top = self.landmarks.point(LandmarkIndex::MouthTop)?;
            let bottom = self.landmarks.point(LandmarkIndex::MouthBottom)?;
            let left = self.landmarks.point(LandmarkIndex::MouthLeftCorner)?;
            let right = self.landmarks.point(LandmarkIndex::MouthRightCorner)?;
            let width = left.distance(&right);
            if width <= f32::EPSILON {
                return None;
            }
            Some(top.distance(&bottom) / width)
        })
    }

    /// Value derivable from landmark geometry alone, for the kinds that have
    /// one.
    pub fn compute_derived(&self, kind: AttributeKind) -> Option<f32> {
        match kind {
            AttributeKind::MouthOpen => self.mouth_open_ratio(),
            _ => None,
        }
    }

    /// Copy the derived mouth ratio into the `MouthOpen` slot, leaving
    /// `open_score` untouched.
    pub fn store_derived(&mut self) {
        if let Some(ratio) = self.mouth_open_ratio() {
            self.attributes
                .update::<MouthOpen>(|m| m.open_ratio = ratio);
        }
    }

    pub fn invalidate_derived(&mut self) {
        self.derived_mouth_ratio = OnceCell::new();
    }
}
