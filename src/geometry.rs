//! Parallel-beam projection geometry and square-pixel volume geometry.
//!
//! Coordinates are in pixel units with the origin at the centre of the
//! volume. Pixel `(r, c)` is centred on
//! `x = c - (cols-1)/2`, `y = (rows-1)/2 - r`, so row 0 is the top of the
//! image. Detector bin `t` is centred on `s = (t - (n-1)/2) * spacing`; for
//! angle θ its ray passes through `s·(cos θ, sin θ)` travelling along
//! `(sin θ, -cos θ)`.

use ndarray::Array1;

use crate::error::{ReconError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionGeometry {
    pub det_spacing: f32,
    pub n_detectors: usize,
    pub angles: Array1<f32>,
}

impl ProjectionGeometry {
    pub fn parallel(det_spacing: f32, n_detectors: usize, angles: Array1<f32>) -> Result<Self> {
        if !(det_spacing > 0.0 && det_spacing.is_finite()) {
            return Err(ReconError::InvalidParameter(format!(
                "detector spacing must be positive, got {det_spacing}"
            )));
        }
        if n_detectors == 0 {
            return Err(ReconError::InvalidParameter("no detector elements".into()));
        }
        if angles.is_empty() {
            return Err(ReconError::InvalidParameter("no projection angles".into()));
        }
        Ok(Self { det_spacing, n_detectors, angles })
    }

    pub fn n_angles(&self) -> usize {
        self.angles.len()
    }

    /// Shape of a sinogram recorded with this geometry: `(angles, detectors)`.
    pub fn sinogram_shape(&self) -> (usize, usize) {
        (self.n_angles(), self.n_detectors)
    }

    /// Signed offset of detector bin `t` from the rotation axis.
    pub fn detector_offset(&self, t: usize) -> f32 {
        (t as f32 - (self.n_detectors as f32 - 1.0) / 2.0) * self.det_spacing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeGeometry {
    pub rows: usize,
    pub cols: usize,
}

impl VolumeGeometry {
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(ReconError::InvalidParameter(format!(
                "volume must have at least one pixel, got {rows}x{cols}"
            )));
        }
        Ok(Self { rows, cols })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn n_pixels(&self) -> usize {
        self.rows * self.cols
    }

    pub fn half_width(&self) -> f32 {
        self.cols as f32 / 2.0
    }

    pub fn half_height(&self) -> f32 {
        self.rows as f32 / 2.0
    }
}

/// `n` equally spaced angles from `first_deg` to `last_deg` inclusive, in radians.
pub fn limited_angles(n: usize, first_deg: f32, last_deg: f32) -> Array1<f32> {
    Array1::linspace(first_deg, last_deg, n).mapv(f32::to_radians)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;
    use rstest::rstest;

    #[test]
    fn limited_angles_include_both_ends() {
        let angles = limited_angles(101, -50.0, 50.0);
        assert_eq!(angles.len(), 101);
        assert_float_eq!(angles[0], -50f32.to_radians(), abs <= 1e-6);
        assert_float_eq!(angles[100], 50f32.to_radians(), abs <= 1e-6);
        assert_float_eq!(angles[50], 0.0, abs <= 1e-6);
    }

    #[rstest]
    #[case(4, 1.0, 0, -1.5)]
    #[case(4, 1.0, 3, 1.5)]
    #[case(5, 1.0, 2, 0.0)]
    #[case(3, 2.0, 0, -2.0)]
    fn detector_offsets_are_centred(
        #[case] n: usize,
        #[case] spacing: f32,
        #[case] t: usize,
        #[case] expected: f32,
    ) {
        let geom = ProjectionGeometry::parallel(spacing, n, Array1::zeros(1)).unwrap();
        assert_float_eq!(geom.detector_offset(t), expected, abs <= 1e-6);
    }

    #[test]
    fn invalid_geometries_are_rejected() {
        assert!(ProjectionGeometry::parallel(0.0, 4, Array1::zeros(3)).is_err());
        assert!(ProjectionGeometry::parallel(1.0, 0, Array1::zeros(3)).is_err());
        assert!(ProjectionGeometry::parallel(1.0, 4, Array1::zeros(0)).is_err());
        assert!(VolumeGeometry::new(0, 3).is_err());
    }
}
