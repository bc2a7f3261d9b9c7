//! Per-face attribute storage.
//!
//! Every [`AttributeKind`] owns exactly one slot in an [`AttributeStore`].
//! Slots start at a sentinel value that no detector can produce
//! (angle 360 degrees, score -1), so "not computed" is always
//! distinguishable from a measurement.

use serde::{Deserialize, Serialize};

/// Angle sentinel (valid angles lie in `[-180, 180)`)
pub const UNKNOWN_ANGLE: f32 = 360.0;

/// Score sentinel (valid scores lie in `[0, 1]`, ratios are non-negative)
pub const UNKNOWN_SCORE: f32 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeKind {
    HeadPose,
    EyesOpen,
    Gaze,
    MouthOpen,
    Smile,
    RedEye,
    Eyeglasses,
}

impl AttributeKind {
    pub const COUNT: usize = 7;

    pub const ALL: [AttributeKind; Self::COUNT] = [
        AttributeKind::HeadPose,
        AttributeKind::EyesOpen,
        AttributeKind::Gaze,
        AttributeKind::MouthOpen,
        AttributeKind::Smile,
        AttributeKind::RedEye,
        AttributeKind::Eyeglasses,
    ];

    fn slot(self) -> usize {
        self as usize
    }

    /// The sentinel record for this kind
    pub fn unknown(self) -> AttributeRecord {
        match self {
            AttributeKind::HeadPose => HeadPose::unknown().into_record(),
            AttributeKind::EyesOpen => EyesOpen::unknown().into_record(),
            AttributeKind::Gaze => Gaze::unknown().into_record(),
            AttributeKind::MouthOpen => MouthOpen::unknown().into_record(),
            AttributeKind::Smile => Smile::unknown().into_record(),
            AttributeKind::RedEye => RedEye::unknown().into_record(),
            AttributeKind::Eyeglasses => Eyeglasses::unknown().into_record(),
        }
    }
}

/// Head orientation in degrees, right-handed with the head as origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyesOpen {
    pub left: f32,
    pub right: f32,
}

/// Gaze direction in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gaze {
    pub horizontal: f32,
    pub vertical: f32,
}

/// Mouth openness. `open_score` comes from a classifier, `open_ratio` from
/// landmark geometry; the two are never merged.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MouthOpen {
    pub open_score: f32,
    pub open_ratio: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Smile {
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RedEye {
    pub left: f32,
    pub right: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Eyeglasses {
    pub score: f32,
}

/// Tagged union over every attribute kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum AttributeRecord {
    HeadPose(HeadPose),
    EyesOpen(EyesOpen),
    Gaze(Gaze),
    MouthOpen(MouthOpen),
    Smile(Smile),
    RedEye(RedEye),
    Eyeglasses(Eyeglasses),
}

impl AttributeRecord {
    pub fn kind(&self) -> AttributeKind {
        match self {
            AttributeRecord::HeadPose(_) => AttributeKind::HeadPose,
            AttributeRecord::EyesOpen(_) => AttributeKind::EyesOpen,
            AttributeRecord::Gaze(_) => AttributeKind::Gaze,
            AttributeRecord::MouthOpen(_) => AttributeKind::MouthOpen,
            AttributeRecord::Smile(_) => AttributeKind::Smile,
            AttributeRecord::RedEye(_) => AttributeKind::RedEye,
            AttributeRecord::Eyeglasses(_) => AttributeKind::Eyeglasses,
        }
    }

    /// True when every field still holds its sentinel
    pub fn is_unknown(&self) -> bool {
        *self == self.kind().unknown()
    }
}

/// A concrete attribute value bound to exactly one kind.
pub trait Attribute: Sized + Copy {
    const KIND: AttributeKind;

    fn unknown() -> Self;
    fn into_record(self) -> AttributeRecord;
    fn from_record(record: &AttributeRecord) -> Option<Self>;

    fn is_unknown(&self) -> bool {
        self.into_record().is_unknown()
    }
}

macro_rules! impl_attribute {
    ($ty:ident, { $($field:ident: $sentinel:expr),+ $(,)? }) => {
        impl Attribute for $ty {
            const KIND: AttributeKind = AttributeKind::$ty;

            fn unknown() -> Self {
                Self { $($field: $sentinel),+ }
            }

            fn into_record(self) -> AttributeRecord {
                AttributeRecord::$ty(self)
            }

            fn from_record(record: &AttributeRecord) -> Option<Self> {
                match record {
                    AttributeRecord::$ty(value) => Some(*value),
                    _ => None,
                }
            }
        }

        impl From<$ty> for AttributeRecord {
            fn from(value: $ty) -> Self {
                AttributeRecord::$ty(value)
            }
        }
    };
}

impl_attribute!(HeadPose, { roll: UNKNOWN_ANGLE, pitch: UNKNOWN_ANGLE, yaw: UNKNOWN_ANGLE });
impl_attribute!(EyesOpen, { left: UNKNOWN_SCORE, right: UNKNOWN_SCORE });
impl_attribute!(Gaze, { horizontal: UNKNOWN_ANGLE, vertical: UNKNOWN_ANGLE });
impl_attribute!(MouthOpen, { open_score: UNKNOWN_SCORE, open_ratio: UNKNOWN_SCORE });
impl_attribute!(Smile, { score: UNKNOWN_SCORE });
impl_attribute!(RedEye, { left: UNKNOWN_SCORE, right: UNKNOWN_SCORE });
impl_attribute!(Eyeglasses, { score: UNKNOWN_SCORE });

/// One slot per [`AttributeKind`], each initialised to its sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<AttributeRecord>", into = "Vec<AttributeRecord>")]
pub struct AttributeStore {
    slots: [AttributeRecord; AttributeKind::COUNT],
}

impl Default for AttributeStore {
    fn default() -> Self {
        Self {
            slots: AttributeKind::ALL.map(AttributeKind::unknown),
        }
    }
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot for `A::KIND`
    pub fn set<A: Attribute>(&mut self, value: A) {
        self.slots[A::KIND.slot()] = value.into_record();
    }

    /// Typed read; returns the sentinel when unset
    pub fn get<A: Attribute>(&self) -> A {
        A::from_record(&self.slots[A::KIND.slot()]).unwrap_or_else(A::unknown)
    }

    /// Overwrite the slot matching the record's own kind
    pub fn set_record(&mut self, record: AttributeRecord) {
        self.slots[record.kind().slot()] = record;
    }

    pub fn record(&self, kind: AttributeKind) -> AttributeRecord {
        self.slots[kind.slot()]
    }

    pub fn is_known(&self, kind: AttributeKind) -> bool {
        !self.record(kind).is_unknown()
    }

    pub fn reset(&mut self, kind: AttributeKind) {
        self.slots[kind.slot()] = kind.unknown();
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeRecord> {
        self.slots.iter()
    }

    /// Apply `f` to the current value of `A`'s slot and store the result
    pub fn update<A: Attribute>(&mut self, f: impl FnOnce(&mut A)) {
        let mut value = self.get::<A>();
        f(&mut value);
        self.set(value);
    }
}

impl From<Vec<AttributeRecord>> for AttributeStore {
    fn from(records: Vec<AttributeRecord>) -> Self {
        let mut store = AttributeStore::default();
        for record in records {
            store.set_record(record);
        }
        store
    }
}

impl From<AttributeStore> for Vec<AttributeRecord> {
    fn from(store: AttributeStore) -> Self {
        store.slots.to_vec()
    }
}
