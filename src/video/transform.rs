//! Orientation and mirroring applied to frames before encoding.

use serde::{Deserialize, Serialize};

use super::encoder::VideoError;

/// Clockwise rotation applied to recorded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    #[serde(rename = "0")]
    Deg0,
    #[serde(rename = "90")]
    Deg90,
    #[serde(rename = "180")]
    Deg180,
    #[serde(rename = "270")]
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    fn swaps_axes(&self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }
}

/// Rotation followed by an optional horizontal flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoTransform {
    pub rotation: Rotation,
    pub mirrored: bool,
}

impl VideoTransform {
    pub fn is_identity(&self) -> bool {
        self.rotation == Rotation::Deg0 && !self.mirrored
    }

    /// Size of a `width`x`height` frame after the transform.
    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        if self.rotation.swaps_axes() {
            (height, width)
        } else {
            (width, height)
        }
    }

    /// Source pixel that lands on output pixel `(x, y)`.
    fn source_of(&self, x: u32, y: u32, width: u32, height: u32) -> (u32, u32) {
        let (out_w, _) = self.output_size(width, height);
        let x = if self.mirrored { out_w - 1 - x } else { x };
        match self.rotation {
            Rotation::Deg0 => (x, y),
            Rotation::Deg90 => (y, height - 1 - x),
            Rotation::Deg180 => (width - 1 - x, height - 1 - y),
            Rotation::Deg270 => (width - 1 - y, x),
        }
    }
}

/// Apply `transform` to a tightly packed RGBA frame.
///
/// Returns the new pixels with their width and height. Fails when `rgba` is
/// not exactly `width * height * 4` bytes.
pub fn orient_rgba(
    rgba: &[u8],
    width: u32,
    height: u32,
    transform: &VideoTransform,
) -> Result<(Vec<u8>, u32, u32), VideoError> {
    let expected = width as usize * height as usize * 4;
    if rgba.len() != expected {
        return Err(VideoError::InvalidConfig(format!(
            "{}x{} frame needs {} bytes, got {}",
            width,
            height,
            expected,
            rgba.len()
        )));
    }
    let (out_w, out_h) = transform.output_size(width, height);
    if transform.is_identity() {
        return Ok((rgba.to_vec(), out_w, out_h));
    }

    let mut out = vec![0u8; (out_w * out_h * 4) as usize];
    for y in 0..out_h {
        for x in 0..out_w {
            let (sx, sy) = transform.source_of(x, y, width, height);
            let src = ((sy * width + sx) * 4) as usize;
            let dst = ((y * out_w + x) * 4) as usize;
            out[dst..dst + 4].copy_from_slice(&rgba[src..src + 4]);
        }
    }
    Ok((out, out_w, out_h))
}

#[cfg(test)]
mod tests {
    use super::*;

    // 3x2 frame, each pixel tagged with its index in the red channel.
    fn tagged() -> Vec<u8> {
        (0..6u8).flat_map(|i| [i, 0, 0, 255]).collect()
    }

    fn reds(rgba: &[u8]) -> Vec<u8> {
        rgba.chunks(4).map(|p| p[0]).collect()
    }

    fn with(rotation: Rotation, mirrored: bool) -> VideoTransform {
        VideoTransform { rotation, mirrored }
    }

    #[test]
    fn test_identity_keeps_pixels() {
        let (out, w, h) = orient_rgba(&tagged(), 3, 2, &VideoTransform::default()).unwrap();
        assert_eq!((w, h), (3, 2));
        assert_eq!(out, tagged());
    }

    #[test]
    fn test_rotate_clockwise() {
        // 0 1 2      3 0
        // 3 4 5  ->  4 1
        //            5 2
        let (out, w, h) = orient_rgba(&tagged(), 3, 2, &with(Rotation::Deg90, false)).unwrap();
        assert_eq!((w, h), (2, 3));
        assert_eq!(reds(&out), vec![3, 0, 4, 1, 5, 2]);
    }

    #[test]
    fn test_rotate_half_turn() {
        let (out, _, _) = orient_rgba(&tagged(), 3, 2, &with(Rotation::Deg180, false)).unwrap();
        assert_eq!(reds(&out), vec![5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_rotate_counter_clockwise() {
        let (out, w, h) = orient_rgba(&tagged(), 3, 2, &with(Rotation::Deg270, false)).unwrap();
        assert_eq!((w, h), (2, 3));
        assert_eq!(reds(&out), vec![2, 5, 1, 4, 0, 3]);
    }

    #[test]
    fn test_mirror() {
        let (out, _, _) = orient_rgba(&tagged(), 3, 2, &with(Rotation::Deg0, true)).unwrap();
        assert_eq!(reds(&out), vec![2, 1, 0, 5, 4, 3]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let short = &tagged()[..20];
        for rotation in [Rotation::Deg0, Rotation::Deg90] {
            assert!(matches!(
                orient_rgba(short, 3, 2, &with(rotation, false)),
                Err(VideoError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_rotation_serde_uses_degrees() {
        let transform = with(Rotation::Deg270, true);
        let json = serde_json::to_string(&transform).unwrap();
        assert_eq!(json, r#"{"rotation":"270","mirrored":true}"#);
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::Deg90));
        assert_eq!(Rotation::from_degrees(45), None);
    }
}
