//! Aspect ratios accepted on job requests and the pixel dimensions the
//! generation workflow uses for each of them.

use serde::{Deserialize, Serialize};

/// Requested shape of the generated images.
///
/// Unknown wire values deserialize to [`AspectRatio::Other`] so that a
/// producer adding a new ratio does not break consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "square_1x1")]
    Square1x1,
    #[serde(rename = "landscape_16x9")]
    Landscape16x9,
    #[serde(rename = "portrait_9x16")]
    Portrait9x16,
    #[serde(other, rename = "other")]
    Other,
}

/// Width and height in pixels of the latent image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Side length used for square output and for unrecognised ratios.
pub const SQUARE_SIDE: u32 = 1024;
/// Long edge for 16:9 and 9:16 output.
pub const WIDE_LONG_EDGE: u32 = 1536;
/// Short edge for 16:9 and 9:16 output.
pub const WIDE_SHORT_EDGE: u32 = 864;

impl AspectRatio {
    /// Pixel dimensions for this ratio.
    pub fn resolution(self) -> Resolution {
        let (width, height) = match self {
            Self::Square1x1 => (SQUARE_SIDE, SQUARE_SIDE),
            Self::Landscape16x9 => (WIDE_LONG_EDGE, WIDE_SHORT_EDGE),
            Self::Portrait9x16 => (WIDE_SHORT_EDGE, WIDE_LONG_EDGE),
            Self::Other => (SQUARE_SIDE, SQUARE_SIDE),
        };
        Resolution { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn landscape_is_wide() {
        let r = AspectRatio::Landscape16x9.resolution();
        assert_eq!((r.width, r.height), (1536, 864));
    }

    #[test]
    fn portrait_is_tall() {
        let r = AspectRatio::Portrait9x16.resolution();
        assert_eq!((r.width, r.height), (864, 1536));
    }

    #[test]
    fn other_falls_back_to_square() {
        assert_eq!(
            AspectRatio::Other.resolution(),
            AspectRatio::Square1x1.resolution()
        );
    }

    #[test]
    fn unknown_wire_value_deserializes_to_other() {
        let ratio: AspectRatio = serde_json::from_str(r#""cinema_21x9""#).unwrap();
        assert_eq!(ratio, AspectRatio::Other);
    }

    #[test]
    fn known_wire_value_deserializes() {
        let ratio: AspectRatio = serde_json::from_str(r#""portrait_9x16""#).unwrap();
        assert_eq!(ratio, AspectRatio::Portrait9x16);
    }
}
