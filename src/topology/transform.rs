//! Rotation/reflection transforms
//!
//! Eight transforms: four rotations, each with an optional horizontal
//! flip. Reflection about the vertical axis is expressible as a flip
//! plus a half turn, so these eight cover the full group.

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl Transform {
    pub const ALL: [Transform; 8] = [
        Transform::Normal,
        Transform::Rotate90,
        Transform::Rotate180,
        Transform::Rotate270,
        Transform::Flipped,
        Transform::Flipped90,
        Transform::Flipped180,
        Transform::Flipped270,
    ];

    /// True for the 90/270 degree variants where a CRTC rectangle's
    /// width and height are swapped relative to the mode.
    pub fn is_rotated(self) -> bool {
        matches!(
            self,
            Transform::Rotate90
                | Transform::Rotate270
                | Transform::Flipped90
                | Transform::Flipped270
        )
    }

    pub fn is_flipped(self) -> bool {
        matches!(
            self,
            Transform::Flipped
                | Transform::Flipped90
                | Transform::Flipped180
                | Transform::Flipped270
        )
    }

    /// Number of clockwise quarter turns (0..=3).
    pub fn quarter_turns(self) -> u32 {
        match self {
            Transform::Normal | Transform::Flipped => 0,
            Transform::Rotate90 | Transform::Flipped90 => 1,
            Transform::Rotate180 | Transform::Flipped180 => 2,
            Transform::Rotate270 | Transform::Flipped270 => 3,
        }
    }

    /// Build a transform from a flip and a quarter-turn count.
    pub fn from_parts(flipped: bool, quarter_turns: u32) -> Transform {
        match (flipped, quarter_turns % 4) {
            (false, 0) => Transform::Normal,
            (false, 1) => Transform::Rotate90,
            (false, 2) => Transform::Rotate180,
            (false, 3) => Transform::Rotate270,
            (true, 0) => Transform::Flipped,
            (true, 1) => Transform::Flipped90,
            (true, 2) => Transform::Flipped180,
            _ => Transform::Flipped270,
        }
    }
}

bitflags! {
    /// The set of transforms a piece of hardware can apply without a
    /// software fallback.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TransformSet: u8 {
        const NORMAL = 1 << 0;
        const ROTATE_90 = 1 << 1;
        const ROTATE_180 = 1 << 2;
        const ROTATE_270 = 1 << 3;
        const FLIPPED = 1 << 4;
        const FLIPPED_90 = 1 << 5;
        const FLIPPED_180 = 1 << 6;
        const FLIPPED_270 = 1 << 7;
    }
}

impl TransformSet {
    pub fn contains_transform(self, transform: Transform) -> bool {
        self.contains(TransformSet::from(transform))
    }

    pub fn insert_transform(&mut self, transform: Transform) {
        self.insert(TransformSet::from(transform));
    }

    pub fn remove_transform(&mut self, transform: Transform) {
        self.remove(TransformSet::from(transform));
    }
}

impl From<Transform> for TransformSet {
    fn from(transform: Transform) -> Self {
        match transform {
            Transform::Normal => TransformSet::NORMAL,
            Transform::Rotate90 => TransformSet::ROTATE_90,
            Transform::Rotate180 => TransformSet::ROTATE_180,
            Transform::Rotate270 => TransformSet::ROTATE_270,
            Transform::Flipped => TransformSet::FLIPPED,
            Transform::Flipped90 => TransformSet::FLIPPED_90,
            Transform::Flipped180 => TransformSet::FLIPPED_180,
            Transform::Flipped270 => TransformSet::FLIPPED_270,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotated_variants() {
        assert!(Transform::Rotate90.is_rotated());
        assert!(Transform::Flipped270.is_rotated());
        assert!(!Transform::Normal.is_rotated());
        assert!(!Transform::Flipped180.is_rotated());
    }

    #[test]
    fn parts_round_trip() {
        for &t in &Transform::ALL {
            assert_eq!(Transform::from_parts(t.is_flipped(), t.quarter_turns()), t);
        }
    }

    #[test]
    fn set_membership() {
        let mut set = TransformSet::NORMAL | TransformSet::ROTATE_180;
        assert!(set.contains_transform(Transform::Rotate180));
        assert!(!set.contains_transform(Transform::Flipped));
        set.insert_transform(Transform::Flipped);
        assert!(set.contains_transform(Transform::Flipped));
        set.remove_transform(Transform::Flipped);
        assert!(!set.contains_transform(Transform::Flipped));
    }
}
