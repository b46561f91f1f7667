//! CRTC state

use super::mode::ModeId;
use super::transform::{Transform, TransformSet};

/// Stable identifier of a CRTC; the hardware object id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CrtcId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether this rectangle fits entirely within a `width` x `height`
    /// screen anchored at the origin.
    pub fn fits_in(&self, width: i32, height: i32) -> bool {
        self.x + self.width <= width && self.y + self.height <= height
    }
}

/// A hardware scan-out engine.
///
/// `rect` is the post-transform framebuffer region being scanned out:
/// under a 90/270 degree transform its width/height are the active
/// mode's height/width.
#[derive(Debug, Clone, PartialEq)]
pub struct Crtc {
    pub id: CrtcId,
    pub rect: Rect,
    pub current_mode: Option<ModeId>,
    pub transform: Transform,
    /// Transforms this CRTC can apply in hardware.
    pub all_transforms: TransformSet,
    /// Scratch flag used while an apply pass walks the CRTC list.
    pub(crate) is_dirty: bool,
}

impl Crtc {
    pub fn new(id: CrtcId) -> Self {
        Self {
            id,
            rect: Rect::default(),
            current_mode: None,
            transform: Transform::Normal,
            all_transforms: TransformSet::NORMAL,
            is_dirty: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.current_mode.is_some()
    }

    pub(crate) fn unset_mode(&mut self) {
        self.current_mode = None;
        self.rect = Rect::default();
        self.transform = Transform::Normal;
    }
}
