//! RandR rotation bitmask conversions
//!
//! RandR encodes a CRTC's orientation as a u16 bitmask (four rotation
//! bits, two reflection bits); the supported set uses the same mask.
//! Reflection around Y is not a distinct transform: it folds into a
//! horizontal flip composed with a half turn.

use x11rb::protocol::randr::Rotation;

use crate::topology::{Transform, TransformSet};

const ALL_ROTATION_BITS: u16 = 2 | 4 | 8; // ROTATE90 | ROTATE180 | ROTATE270
const REFLECT_BITS: u16 = 16 | 32; // REFLECT_X | REFLECT_Y

pub fn transform_from_xrandr(rotation: Rotation) -> Transform {
    let bits = u16::from(rotation);
    let quarter = if bits & u16::from(Rotation::ROTATE90) != 0 {
        1
    } else if bits & u16::from(Rotation::ROTATE180) != 0 {
        2
    } else if bits & u16::from(Rotation::ROTATE270) != 0 {
        3
    } else {
        0
    };
    let reflect_x = bits & u16::from(Rotation::REFLECT_X) != 0;
    let reflect_y = bits & u16::from(Rotation::REFLECT_Y) != 0;
    match (reflect_x, reflect_y) {
        (false, false) => Transform::from_parts(false, quarter),
        (true, false) => Transform::from_parts(true, quarter),
        (false, true) => Transform::from_parts(true, quarter + 2),
        (true, true) => Transform::from_parts(false, quarter + 2),
    }
}

pub fn xrandr_from_transform(transform: Transform) -> Rotation {
    let rotate = match transform.quarter_turns() {
        0 => Rotation::ROTATE0,
        1 => Rotation::ROTATE90,
        2 => Rotation::ROTATE180,
        _ => Rotation::ROTATE270,
    };
    if transform.is_flipped() {
        rotate | Rotation::REFLECT_X
    } else {
        rotate
    }
}

/// Expand a supported-rotations mask into the transform set.
///
/// Any rotation together with any reflection generates the whole group
/// by composition; otherwise each bit contributes individually.
pub fn transforms_from_xrandr_all(rotations: Rotation) -> TransformSet {
    let bits = u16::from(rotations);
    if bits & ALL_ROTATION_BITS != 0 && bits & REFLECT_BITS != 0 {
        return TransformSet::all();
    }
    let mut set = TransformSet::NORMAL;
    if bits & u16::from(Rotation::ROTATE90) != 0 {
        set.insert_transform(Transform::Rotate90);
    }
    if bits & u16::from(Rotation::ROTATE180) != 0 {
        set.insert_transform(Transform::Rotate180);
    }
    if bits & u16::from(Rotation::ROTATE270) != 0 {
        set.insert_transform(Transform::Rotate270);
    }
    if bits & u16::from(Rotation::REFLECT_X) != 0 {
        set.insert_transform(Transform::Flipped);
    }
    if bits & u16::from(Rotation::REFLECT_Y) != 0 {
        set.insert_transform(Transform::Flipped180);
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_rotations_round_trip() {
        for &t in &[
            Transform::Normal,
            Transform::Rotate90,
            Transform::Rotate180,
            Transform::Rotate270,
            Transform::Flipped,
            Transform::Flipped90,
            Transform::Flipped180,
            Transform::Flipped270,
        ] {
            assert_eq!(transform_from_xrandr(xrandr_from_transform(t)), t);
        }
    }

    #[test]
    fn reflect_y_folds_into_flip_plus_half_turn() {
        assert_eq!(
            transform_from_xrandr(Rotation::ROTATE0 | Rotation::REFLECT_Y),
            Transform::Flipped180
        );
        assert_eq!(
            transform_from_xrandr(Rotation::ROTATE90 | Rotation::REFLECT_Y),
            Transform::Flipped270
        );
        // Both reflections compose to a pure half turn
        assert_eq!(
            transform_from_xrandr(Rotation::ROTATE0 | Rotation::REFLECT_X | Rotation::REFLECT_Y),
            Transform::Rotate180
        );
    }

    #[test]
    fn rotation_plus_reflection_supports_everything() {
        let set = transforms_from_xrandr_all(Rotation::ROTATE90 | Rotation::REFLECT_X);
        for &t in &Transform::ALL {
            assert!(set.contains_transform(t));
        }
    }

    #[test]
    fn rotations_alone_stay_individual() {
        let set =
            transforms_from_xrandr_all(Rotation::ROTATE0 | Rotation::ROTATE90 | Rotation::ROTATE180);
        assert!(set.contains_transform(Transform::Normal));
        assert!(set.contains_transform(Transform::Rotate90));
        assert!(set.contains_transform(Transform::Rotate180));
        assert!(!set.contains_transform(Transform::Rotate270));
        assert!(!set.contains_transform(Transform::Flipped));
    }

    #[test]
    fn reflections_alone_stay_individual() {
        let set = transforms_from_xrandr_all(
            Rotation::ROTATE0 | Rotation::REFLECT_X | Rotation::REFLECT_Y,
        );
        assert!(set.contains_transform(Transform::Normal));
        assert!(set.contains_transform(Transform::Flipped));
        assert!(set.contains_transform(Transform::Flipped180));
        assert!(!set.contains_transform(Transform::Rotate90));
    }
}
