//! Named facial landmarks and the tables that derive them from raw
//! keypoint sets (68-point and 468-point face mesh).
//!
//! "Left" and "right" are image-left and image-right.

use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// Number of points produced by the 68-point landmark model
pub const LANDMARKS_68: usize = 68;

/// Number of points produced by the face-mesh model
pub const FACE_MESH_POINTS: usize = 468;

/// A landmark position with the confidence reported for it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureLocation {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl FeatureLocation {
    pub fn new(point: Point, confidence: f32) -> Self {
        Self {
            x: point.x,
            y: point.y,
            confidence,
        }
    }

    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LandmarkIndex {
    LeftEyeCenter,
    LeftEyeLeftCorner,
    LeftEyeRightCorner,
    RightEyeCenter,
    RightEyeLeftCorner,
    RightEyeRightCorner,
    NoseLeftSide,
    NoseRightSide,
    NoseTip,
    MouthCenter,
    MouthLeftCorner,
    MouthRightCorner,
    /// Inner upper lip
    MouthTop,
    /// Inner lower lip
    MouthBottom,
}

impl LandmarkIndex {
    pub const COUNT: usize = 14;

    pub const ALL: [LandmarkIndex; Self::COUNT] = [
        LandmarkIndex::LeftEyeCenter,
        LandmarkIndex::LeftEyeLeftCorner,
        LandmarkIndex::LeftEyeRightCorner,
        LandmarkIndex::RightEyeCenter,
        LandmarkIndex::RightEyeLeftCorner,
        LandmarkIndex::RightEyeRightCorner,
        LandmarkIndex::NoseLeftSide,
        LandmarkIndex::NoseRightSide,
        LandmarkIndex::NoseTip,
        LandmarkIndex::MouthCenter,
        LandmarkIndex::MouthLeftCorner,
        LandmarkIndex::MouthRightCorner,
        LandmarkIndex::MouthTop,
        LandmarkIndex::MouthBottom,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

/// Fixed set of optional named landmarks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    slots: [Option<FeatureLocation>; LandmarkIndex::COUNT],
}

impl LandmarkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: LandmarkIndex) -> Option<FeatureLocation> {
        self.slots[index.slot()]
    }

    pub fn point(&self, index: LandmarkIndex) -> Option<Point> {
        self.get(index).map(|l| l.point())
    }

    pub fn set(&mut self, index: LandmarkIndex, location: FeatureLocation) {
        self.slots[index.slot()] = Some(location);
    }

    pub fn clear(&mut self, index: LandmarkIndex) {
        self.slots[index.slot()] = None;
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Present landmarks in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (LandmarkIndex, FeatureLocation)> + '_ {
        LandmarkIndex::ALL
            .iter()
            .filter_map(|&idx| self.get(idx).map(|loc| (idx, loc)))
    }

    /// Derive named landmarks from a 68-point set. Returns an empty set when
    /// fewer than 68 points are supplied.
    pub fn from_68_points(points: &[Point], confidence: f32) -> Self {
        let mut set = Self::new();
        if points.len() < LANDMARKS_68 {
            return set;
        }

        let at = |i: usize| FeatureLocation::new(points[i], confidence);
        let centroid = |range: std::ops::RangeInclusive<usize>| {
            Point::centroid(&points[range]).map(|p| FeatureLocation::new(p, confidence))
        };

        if let Some(c) = centroid(36..=41) {
            set.set(LandmarkIndex::LeftEyeCenter, c);
        }
        if let Some(c) = centroid(42..=47) {
            set.set(LandmarkIndex::RightEyeCenter, c);
        }
        set.set(LandmarkIndex::LeftEyeLeftCorner, at(36));
        set.set(LandmarkIndex::LeftEyeRightCorner, at(39));
        set.set(LandmarkIndex::RightEyeLeftCorner, at(42));
        set.set(LandmarkIndex::RightEyeRightCorner, at(45));
        set.set(LandmarkIndex::NoseLeftSide, at(31));
        set.set(LandmarkIndex::NoseRightSide, at(35));
        set.set(LandmarkIndex::NoseTip, at(30));
        set.set(LandmarkIndex::MouthLeftCorner, at(48));
        set.set(LandmarkIndex::MouthRightCorner, at(54));
        set.set(LandmarkIndex::MouthTop, at(62));
        set.set(LandmarkIndex::MouthBottom, at(66));
        set.set(
            LandmarkIndex::MouthCenter,
            FeatureLocation::new(points[62].midpoint(&points[66]), confidence),
        );
        set
    }

    /// Derive named landmarks from a 468-point face mesh. Returns an empty
    /// set when fewer than 468 points are supplied.
    pub fn from_face_mesh(points: &[Point], confidence: f32) -> Self {
        let mut set = Self::new();
        if points.len() < FACE_MESH_POINTS {
            return set;
        }

        let at = |i: usize| FeatureLocation::new(points[i], confidence);
        let ring_center = |a: MeshRegion, b: MeshRegion| {
            let ring: Vec<Point> = a
                .indices()
                .iter()
                .chain(b.indices())
                .map(|&i| points[i])
                .collect();
            Point::centroid(&ring).map(|p| FeatureLocation::new(p, confidence))
        };

        // The mesh names eyes from the subject's point of view, so the
        // subject's right eye is the image-left one.
        if let Some(c) = ring_center(MeshRegion::RightEyeUpper0, MeshRegion::RightEyeLower0) {
            set.set(LandmarkIndex::LeftEyeCenter, c);
        }
        if let Some(c) = ring_center(MeshRegion::LeftEyeUpper0, MeshRegion::LeftEyeLower0) {
            set.set(LandmarkIndex::RightEyeCenter, c);
        }
        set.set(LandmarkIndex::LeftEyeLeftCorner, at(33));
        set.set(LandmarkIndex::LeftEyeRightCorner, at(133));
        set.set(LandmarkIndex::RightEyeLeftCorner, at(362));
        set.set(LandmarkIndex::RightEyeRightCorner, at(263));
        set.set(LandmarkIndex::NoseLeftSide, at(98));
        set.set(LandmarkIndex::NoseRightSide, at(327));
        set.set(LandmarkIndex::NoseTip, at(1));
        set.set(LandmarkIndex::MouthLeftCorner, at(61));
        set.set(LandmarkIndex::MouthRightCorner, at(291));
        set.set(LandmarkIndex::MouthTop, at(13));
        set.set(LandmarkIndex::MouthBottom, at(14));
        set.set(
            LandmarkIndex::MouthCenter,
            FeatureLocation::new(points[13].midpoint(&points[14]), confidence),
        );
        set
    }
}

/// Face-mesh keypoint regions (0-based indices into the 468-point mesh).
/// Names follow the subject's point of view. There are no iris regions: the
/// iris keypoints (468..478) only exist in the 478-point attention mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeshRegion {
    Silhouette,
    LipsUpperOuter,
    LipsLowerOuter,
    LipsUpperInner,
    LipsLowerInner,
    RightEyeUpper0,
    RightEyeLower0,
    RightEyeUpper1,
    RightEyeLower1,
    RightEyeUpper2,
    RightEyeLower2,
    RightEyeLower3,
    RightEyebrowUpper,
    RightEyebrowLower,
    LeftEyeUpper0,
    LeftEyeLower0,
    LeftEyeUpper1,
    LeftEyeLower1,
    LeftEyeUpper2,
    LeftEyeLower2,
    LeftEyeLower3,
    LeftEyebrowUpper,
    LeftEyebrowLower,
    MidwayBetweenEyes,
    NoseTip,
    NoseBottom,
    NoseRightCorner,
    NoseLeftCorner,
    RightCheek,
    LeftCheek,
}

impl MeshRegion {
    pub const ALL: [MeshRegion; 30] = [
        MeshRegion::Silhouette,
        MeshRegion::LipsUpperOuter,
        MeshRegion::LipsLowerOuter,
        MeshRegion::LipsUpperInner,
        MeshRegion::LipsLowerInner,
        MeshRegion::RightEyeUpper0,
        MeshRegion::RightEyeLower0,
        MeshRegion::RightEyeUpper1,
        MeshRegion::RightEyeLower1,
        MeshRegion::RightEyeUpper2,
        MeshRegion::RightEyeLower2,
        MeshRegion::RightEyeLower3,
        MeshRegion::RightEyebrowUpper,
        MeshRegion::RightEyebrowLower,
        MeshRegion::LeftEyeUpper0,
        MeshRegion::LeftEyeLower0,
        MeshRegion::LeftEyeUpper1,
        MeshRegion::LeftEyeLower1,
        MeshRegion::LeftEyeUpper2,
        MeshRegion::LeftEyeLower2,
        MeshRegion::LeftEyeLower3,
        MeshRegion::LeftEyebrowUpper,
        MeshRegion::LeftEyebrowLower,
        MeshRegion::MidwayBetweenEyes,
        MeshRegion::NoseTip,
        MeshRegion::NoseBottom,
        MeshRegion::NoseRightCorner,
        MeshRegion::NoseLeftCorner,
        MeshRegion::RightCheek,
        MeshRegion::LeftCheek,
    ];

    pub fn indices(self) -> &'static [usize] {
        match self {
            MeshRegion::Silhouette => &[
                10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378,
                400, 377, 152, 148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54,
                103, 67, 109,
            ],
            MeshRegion::LipsUpperOuter => &[61, 185, 40, 39, 37, 0, 267, 269, 270, 409, 291],
            MeshRegion::LipsLowerOuter => &[146, 91, 181, 84, 17, 314, 405, 321, 375, 291],
            MeshRegion::LipsUpperInner => &[78, 191, 80, 81, 82, 13, 312, 311, 310, 415, 308],
            MeshRegion::LipsLowerInner => &[78, 95, 88, 178, 87, 14, 317, 402, 318, 324, 308],
            MeshRegion::RightEyeUpper0 => &[246, 161, 160, 159, 158, 157, 173],
            MeshRegion::RightEyeLower0 => &[33, 7, 163, 144, 145, 153, 154, 155, 133],
            MeshRegion::RightEyeUpper1 => &[247, 30, 29, 27, 28, 56, 190],
            MeshRegion::RightEyeLower1 => &[130, 25, 110, 24, 23, 22, 26, 112, 243],
            MeshRegion::RightEyeUpper2 => &[113, 225, 224, 223, 222, 221, 189],
            MeshRegion::RightEyeLower2 => &[226, 31, 228, 229, 230, 231, 232, 233, 244],
            MeshRegion::RightEyeLower3 => &[143, 111, 117, 118, 119, 120, 121, 128, 245],
            MeshRegion::RightEyebrowUpper => &[156, 70, 63, 105, 66, 107, 55, 193],
            MeshRegion::RightEyebrowLower => &[35, 124, 46, 53, 52, 65],
            MeshRegion::LeftEyeUpper0 => &[466, 388, 387, 386, 385, 384, 398],
            MeshRegion::LeftEyeLower0 => &[263, 249, 390, 373, 374, 380, 381, 382, 362],
            MeshRegion::LeftEyeUpper1 => &[467, 260, 259, 257, 258, 286, 414],
            MeshRegion::LeftEyeLower1 => &[359, 255, 339, 254, 253, 252, 256, 341, 463],
            MeshRegion::LeftEyeUpper2 => &[342, 445, 444, 443, 442, 441, 413],
            MeshRegion::LeftEyeLower2 => &[446, 261, 448, 449, 450, 451, 452, 453, 464],
            MeshRegion::LeftEyeLower3 => &[372, 340, 346, 347, 348, 349, 350, 357, 465],
            MeshRegion::LeftEyebrowUpper => &[383, 300, 293, 334, 296, 336, 285, 417],
            MeshRegion::LeftEyebrowLower => &[265, 353, 276, 283, 282, 295],
            MeshRegion::MidwayBetweenEyes => &[168],
            MeshRegion::NoseTip => &[1],
            MeshRegion::NoseBottom => &[2],
            MeshRegion::NoseRightCorner => &[98],
            MeshRegion::NoseLeftCorner => &[327],
            MeshRegion::RightCheek => &[205],
            MeshRegion::LeftCheek => &[425],
        }
    }
}
