//! Shared value types and data model for the face attribute pipeline.

pub mod attributes;
pub mod face;
pub mod frame;
pub mod geometry;
pub mod landmarks;
pub mod task_config;

pub use attributes::{
    Attribute, AttributeKind, AttributeRecord, AttributeStore, Eyeglasses, EyesOpen, Gaze,
    HeadPose, MouthOpen, RedEye, Smile, UNKNOWN_ANGLE, UNKNOWN_SCORE,
};
pub use face::{FaceBox, FaceEntity};
pub use frame::{Frame, FrameSnapshot};
pub use geometry::{CoordinateFrame, Point, Rect, Size};
pub use landmarks::{FeatureLocation, LandmarkIndex, LandmarkSet, MeshRegion};
pub use task_config::{
    ConfigError, ParamBag, ParamType, ParamValue, PipelineDocument, TaskDescriptor,
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
