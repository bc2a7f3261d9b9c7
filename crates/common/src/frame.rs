//! Per-image processing state.
//!
//! The pixel buffer is immutable and lives outside the lock. Face boxes and
//! face entities sit behind one per-frame mutex; every accessor holds it only
//! for the duration of a copy in or out, never across inference.

use std::sync::{Mutex, MutexGuard};

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::face::{FaceBox, FaceEntity};
use crate::geometry::Size;

#[derive(Debug, Default)]
struct FrameState {
    face_boxes: Vec<FaceBox>,
    faces: Vec<FaceEntity>,
}

#[derive(Debug)]
pub struct Frame {
    name: String,
    image: RgbImage,
    state: Mutex<FrameState>,
}

/// Deep copy of a frame's results, safe to export while other frames run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSnapshot {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub faces: Vec<FaceEntity>,
}

impl Frame {
    pub fn new(name: impl Into<String>, image: RgbImage) -> Self {
        Self {
            name: name.into(),
            image,
            state: Mutex::new(FrameState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn size(&self) -> Size {
        Size::of(&self.image)
    }

    // A detector that panicked mid-write leaves the state consistent at the
    // granularity of one accessor call, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, FrameState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn face_boxes(&self) -> Vec<FaceBox> {
        self.lock().face_boxes.clone()
    }

    pub fn face_count(&self) -> usize {
        self.lock().face_boxes.len()
    }

    /// Replace the detections. Faces are reset to fresh entities, one per
    /// box, so no attribute from a previous detection survives.
    pub fn set_face_boxes(&self, boxes: Vec<FaceBox>) {
        let faces = boxes.iter().copied().map(FaceEntity::new).collect();
        let mut state = self.lock();
        state.face_boxes = boxes;
        state.faces = faces;
    }

    pub fn faces(&self) -> Vec<FaceEntity> {
        self.lock().faces.clone()
    }

    /// Apply `f` to one face under the lock. Keep `f` short.
    pub fn update_face<R>(&self, index: usize, f: impl FnOnce(&mut FaceEntity) -> R) -> Option<R> {
        let mut state = self.lock();
        state.faces.get_mut(index).map(f)
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        let faces = self.faces();
        FrameSnapshot {
            name: self.name.clone(),
            width: self.image.width(),
            height: self.image.height(),
            faces,
        }
    }
}
