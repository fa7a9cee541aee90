use ndarray::{Array2, ArrayView2};
use tracing::debug;

use crate::error::{check_shape, Result};
use crate::projector::SystemMatrix;

/// Box constraints applied after every SIRT update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SirtOptions {
    pub min_constraint: Option<f32>,
    pub max_constraint: Option<f32>,
}

/// Inverse of each sum, with zero where the sum vanishes.
fn inverse_sums(sums: Vec<f32>) -> Vec<f32> {
    sums.into_iter()
        .map(|s| if s > 1e-6 { 1.0 / s } else { 0.0 })
        .collect()
}

/// Perform one SIRT iteration over all rays.
///
/// image:        length N (x), updated in place
/// sinogram:     length M (p)
/// inv_rows:     length M, R = 1 / row sums of W
/// inv_cols:     length N, C = 1 / column sums of W
pub fn sirt_step(
    w: &SystemMatrix,
    sinogram: &[f32],
    image: &mut [f32],
    inv_rows: &[f32],
    inv_cols: &[f32],
    options: &SirtOptions,
) -> f32 {
    // weighted residual: R (p - W x)
    let projected = w.forward_flat(image);
    let mut residual_norm = 0.0f32;
    let weighted: Vec<f32> = projected
        .iter()
        .zip(sinogram)
        .zip(inv_rows)
        .map(|((wx, p), r)| {
            let diff = p - wx;
            residual_norm += diff * diff;
            diff * r
        })
        .collect();

    let update = w.back_flat(&weighted);
    for ((x, u), c) in image.iter_mut().zip(&update).zip(inv_cols) {
        *x += c * u;
        if let Some(lo) = options.min_constraint {
            *x = x.max(lo);
        }
        if let Some(hi) = options.max_constraint {
            *x = x.min(hi);
        }
    }
    residual_norm.sqrt()
}

/// SIRT reconstruction loop.
///
/// - sinogram: shape (angles, detectors) of the system matrix geometry
/// - iterations: number of SIRT passes over all rays
///
/// Returns the reconstructed image, starting from all zeros.
pub fn sirt(
    w: &SystemMatrix,
    sinogram: ArrayView2<f32>,
    iterations: usize,
    options: &SirtOptions,
) -> Result<Array2<f32>> {
    check_shape(
        "sinogram",
        w.projection_geometry().sinogram_shape(),
        sinogram.dim(),
    )?;
    let p: Vec<f32> = sinogram.iter().copied().collect();
    let inv_rows = inverse_sums(w.row_sums());
    let inv_cols = inverse_sums(w.col_sums());

    let mut image = vec![0.0f32; w.n_pixels()];
    for iteration in 0..iterations {
        let residual = sirt_step(w, &p, &mut image, &inv_rows, &inv_cols, options);
        debug!(iteration, residual, "SIRT");
    }

    Ok(Array2::from_shape_vec(w.volume_geometry().shape(), image)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{limited_angles, ProjectionGeometry, VolumeGeometry};
    use crate::phantom::nanotube_phantom;

    fn residual(w: &SystemMatrix, sino: &Array2<f32>, image: &Array2<f32>) -> f32 {
        let projected = w.forward(image.view()).unwrap();
        (&projected - sino).mapv(|v| v * v).sum().sqrt()
    }

    #[test]
    fn sirt_reduces_the_residual() {
        let n = 24;
        let proj = ProjectionGeometry::parallel(1.0, n, limited_angles(30, -50.0, 50.0)).unwrap();
        let vol = VolumeGeometry::new(n, n).unwrap();
        let w = SystemMatrix::build(&proj, &vol);
        let phantom = nanotube_phantom(n, 8.0, 4.0, 1.0);
        let sino = w.forward(phantom.view()).unwrap();

        let start = residual(&w, &sino, &Array2::zeros((n, n)));
        let few = sirt(&w, sino.view(), 5, &SirtOptions::default()).unwrap();
        let many = sirt(&w, sino.view(), 50, &SirtOptions::default()).unwrap();

        let after_few = residual(&w, &sino, &few);
        let after_many = residual(&w, &sino, &many);
        assert!(after_few < start);
        assert!(after_many < after_few);
        assert!(many.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn constraints_clamp_the_image() {
        let proj = ProjectionGeometry::parallel(1.0, 8, limited_angles(6, -50.0, 50.0)).unwrap();
        let vol = VolumeGeometry::new(8, 8).unwrap();
        let w = SystemMatrix::build(&proj, &vol);
        let sino =
            Array2::from_shape_fn((6, 8), |(a, t)| if (a + t) % 3 == 0 { 4.0 } else { -2.0 });
        let options = SirtOptions { min_constraint: Some(0.0), max_constraint: Some(1.0) };
        let image = sirt(&w, sino.view(), 10, &options).unwrap();
        assert!(image.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn mismatched_sinogram_is_rejected() {
        let proj = ProjectionGeometry::parallel(1.0, 8, limited_angles(6, -50.0, 50.0)).unwrap();
        let vol = VolumeGeometry::new(8, 8).unwrap();
        let w = SystemMatrix::build(&proj, &vol);
        assert!(sirt(&w, Array2::zeros((8, 6)).view(), 1, &SirtOptions::default()).is_err());
    }
}
