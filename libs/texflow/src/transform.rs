// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Crop rectangles, orientation flags, and the sampling-transform composer.
//!
//! The composed matrix maps unit texture coordinates onto the visible
//! region of the current buffer, applying the producer's crop and
//! orientation and a final vertical flip so that downstream sampling sees
//! the top of the image at y = 0.

use crate::matrix::{self, Mat4};

/// Orientation flags attached to each queued frame.
///
/// Bits compose: 180-degree and 270-degree rotations are encoded as flag
/// combinations rather than distinct values.
pub mod flags {
    /// Mirror across the vertical axis.
    pub const FLIP_HORIZONTAL: u32 = 1 << 0;
    /// Mirror across the horizontal axis.
    pub const FLIP_VERTICAL: u32 = 1 << 1;
    /// Quarter-turn rotation.
    pub const ROTATE_90: u32 = 1 << 2;
    pub const ROTATE_180: u32 = FLIP_HORIZONTAL | FLIP_VERTICAL;
    pub const ROTATE_270: u32 = FLIP_HORIZONTAL | FLIP_VERTICAL | ROTATE_90;
}

/// Axis-aligned rectangle in buffer pixel coordinates.
///
/// `right` and `bottom` are exclusive. The default value is the empty
/// rectangle, which the composer treats as "no crop".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Crop {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Crop {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

/// Composes the sampling matrix for a frame.
///
/// Orientation flags apply in the order horizontal flip, vertical flip,
/// quarter turn. The crop is then scaled and translated into place, and
/// the whole product is vertically flipped to move the image origin to
/// the top-left corner.
///
/// When a crop edge does not coincide with the buffer edge, the crop is
/// pulled in by one texel on that side. Bilinear sampling at the boundary
/// would otherwise blend in pixels outside the crop; a whole texel (not
/// half) is taken because subsampled chroma planes halve the effective
/// texel density. Nearest-neighbour sampling at a 1:1 texel ratio loses a
/// border row/column under this scheme.
pub fn compose(crop: Crop, transform: u32, buffer_width: u32, buffer_height: u32) -> Mat4 {
    let mut xform = matrix::IDENTITY;
    if transform & flags::FLIP_HORIZONTAL != 0 {
        xform = matrix::product(&xform, &matrix::FLIP_H);
    }
    if transform & flags::FLIP_VERTICAL != 0 {
        xform = matrix::product(&xform, &matrix::FLIP_V);
    }
    if transform & flags::ROTATE_90 != 0 {
        xform = matrix::product(&xform, &matrix::ROT_90);
    }

    let crop_mtx = if crop.is_empty() {
        matrix::IDENTITY
    } else {
        let w = buffer_width as f32;
        let h = buffer_height as f32;
        let mut xshrink = 0;
        let mut yshrink = 0;

        let tx = if crop.left > 0 {
            xshrink += 1;
            (crop.left + 1) as f32 / w
        } else {
            0.0
        };
        if crop.right < buffer_width as i32 {
            xshrink += 1;
        }
        let ty = if crop.bottom < buffer_height as i32 {
            yshrink += 1;
            (buffer_height as i32 - crop.bottom + 1) as f32 / h
        } else {
            0.0
        };
        if crop.top > 0 {
            yshrink += 1;
        }
        let sx = (crop.width() - xshrink) as f32 / w;
        let sy = (crop.height() - yshrink) as f32 / h;

        [
            sx, 0.0, 0.0, 0.0, //
            0.0, sy, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            tx, ty, 0.0, 1.0,
        ]
    };

    let before_flip = matrix::product(&crop_mtx, &xform);
    matrix::product(&matrix::FLIP_V, &before_flip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{apply_to_point, product, FLIP_V};
    use crate::testing::assert_mat_eq;

    #[test]
    fn test_crop_dimensions() {
        let crop = Crop::new(10, 20, 110, 220);
        assert_eq!(crop.width(), 100);
        assert_eq!(crop.height(), 200);
        assert!(!crop.is_empty());
        assert!(Crop::default().is_empty());
        assert!(Crop::new(5, 5, 5, 10).is_empty());
    }

    #[test]
    fn test_empty_crop_no_flags_is_vertical_flip() {
        // No crop and no orientation leaves only the origin-normalizing flip.
        let m = compose(Crop::default(), 0, 256, 256);
        assert_mat_eq(&m, &FLIP_V);
    }

    #[test]
    fn test_full_buffer_crop_is_vertical_flip() {
        // A crop that covers the whole buffer shrinks nothing.
        let m = compose(Crop::new(0, 0, 256, 256), 0, 256, 256);
        assert_mat_eq(&m, &FLIP_V);
    }

    #[test]
    fn test_inset_crop_shrinks_one_texel_per_clipped_edge() {
        let m = compose(Crop::new(1, 1, 255, 255), 0, 256, 256);

        // All four edges are clipped: tx and ty step in by (edge + 1)
        // texels, sx and sy give up one texel per clipped side.
        let tx = 2.0 / 256.0;
        let ty = 2.0 / 256.0;
        let sx = (254.0 - 2.0) / 256.0;
        let sy = (254.0 - 2.0) / 256.0;
        let crop_mtx = [
            sx, 0.0, 0.0, 0.0, //
            0.0, sy, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            tx, ty, 0.0, 1.0,
        ];
        assert_mat_eq(&m, &product(&FLIP_V, &crop_mtx));
    }

    #[test]
    fn test_left_edge_only_crop() {
        // Only the left and right edges are clipped; top/bottom stay full.
        let m = compose(Crop::new(8, 0, 248, 128), 0, 256, 128);
        let tx = 9.0 / 256.0;
        let sx = (240.0 - 2.0) / 256.0;
        let crop_mtx = [
            sx, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            tx, 0.0, 0.0, 1.0,
        ];
        assert_mat_eq(&m, &product(&FLIP_V, &crop_mtx));
    }

    #[test]
    fn test_rotate_90_with_horizontal_flip_corner_mapping() {
        // FLIP_V * (FLIP_H * ROT_90) maps (x, y) -> (y, 1 - x).
        let m = compose(
            Crop::default(),
            flags::FLIP_HORIZONTAL | flags::ROTATE_90,
            64,
            64,
        );
        let corners = [
            ((0.0, 0.0), (0.0, 1.0)),
            ((1.0, 0.0), (0.0, 0.0)),
            ((1.0, 1.0), (1.0, 0.0)),
            ((0.0, 1.0), (1.0, 1.0)),
        ];
        for ((x, y), (ex, ey)) in corners {
            let (ox, oy) = apply_to_point(&m, x, y);
            assert!(
                (ox - ex).abs() < 1e-5 && (oy - ey).abs() < 1e-5,
                "corner ({x}, {y}) mapped to ({ox}, {oy}), expected ({ex}, {ey})"
            );
        }
    }

    #[test]
    fn test_rotate_180_flags_match_flip_pair() {
        let rotated = compose(Crop::default(), flags::ROTATE_180, 32, 32);
        let flipped = compose(
            Crop::default(),
            flags::FLIP_HORIZONTAL | flags::FLIP_VERTICAL,
            32,
            32,
        );
        assert_mat_eq(&rotated, &flipped);
    }
}
