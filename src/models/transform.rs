//! Orientation values and the result reported by a rotation.

use std::fmt;

/// Value of the EXIF Orientation tag (0x0112).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Orientation {
    Normal = 1,
    FlipHorizontal = 2,
    Rotate180 = 3,
    FlipVertical = 4,
    Transpose = 5,
    Rotate90 = 6,
    Transverse = 7,
    Rotate270 = 8,
}

impl Orientation {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Normal),
            2 => Some(Self::FlipHorizontal),
            3 => Some(Self::Rotate180),
            4 => Some(Self::FlipVertical),
            5 => Some(Self::Transpose),
            6 => Some(Self::Rotate90),
            7 => Some(Self::Transverse),
            8 => Some(Self::Rotate270),
            _ => None,
        }
    }

    pub fn value(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Outcome of a successful rotation. Only logged; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformResult {
    /// Orientation that was detected and corrected.
    pub orientation: Orientation,
    /// Pixel height after correction.
    pub height: u32,
    /// Pixel width after correction.
    pub width: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orientation_from_tag_value() {
        assert_eq!(Orientation::from_u32(1), Some(Orientation::Normal));
        assert_eq!(Orientation::from_u32(6), Some(Orientation::Rotate90));
        assert_eq!(Orientation::from_u32(8), Some(Orientation::Rotate270));
        assert_eq!(Orientation::from_u32(0), None);
        assert_eq!(Orientation::from_u32(9), None);
    }
}
