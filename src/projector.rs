//! Sparse parallel-beam system matrix and its forward / back projections.
//!
//! Each row of the matrix is one ray (angle-major, detector-minor) and holds
//! the intersection lengths of that ray with the pixels it crosses. The
//! crossings are found by walking the pixel grid boundary by boundary, in the
//! manner of Siddon's algorithm.

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{check_shape, Result};
use crate::geometry::{ProjectionGeometry, VolumeGeometry};

/// Non-zero elements of one system matrix row: `(pixel index, weight)`.
pub type SystemMatrixRow = Vec<(usize, f32)>;

#[derive(Debug, Clone)]
pub struct SystemMatrix {
    proj: ProjectionGeometry,
    vol: VolumeGeometry,
    row_ptr: Vec<usize>,
    indices: Vec<usize>,
    weights: Vec<f32>,
}

impl SystemMatrix {
    pub fn build(proj: &ProjectionGeometry, vol: &VolumeGeometry) -> Self {
        let n_det = proj.n_detectors;
        let n_rays = proj.n_angles() * n_det;

        let rows: Vec<SystemMatrixRow> = (0..n_rays)
            .into_par_iter()
            .map(|ray| {
                let theta = proj.angles[ray / n_det];
                let offset = proj.detector_offset(ray % n_det);
                trace_ray(theta, offset, vol)
            })
            .collect();

        let nnz = rows.iter().map(Vec::len).sum();
        let mut row_ptr = Vec::with_capacity(n_rays + 1);
        let mut indices = Vec::with_capacity(nnz);
        let mut weights = Vec::with_capacity(nnz);
        row_ptr.push(0);
        for row in rows {
            for (i, w) in row {
                indices.push(i);
                weights.push(w);
            }
            row_ptr.push(indices.len());
        }

        let matrix = Self { proj: proj.clone(), vol: *vol, row_ptr, indices, weights };
        debug!(rays = n_rays, pixels = vol.n_pixels(), nnz = matrix.nnz(), "system matrix");
        matrix
    }

    pub fn projection_geometry(&self) -> &ProjectionGeometry {
        &self.proj
    }

    pub fn volume_geometry(&self) -> &VolumeGeometry {
        &self.vol
    }

    pub fn n_rays(&self) -> usize {
        self.row_ptr.len() - 1
    }

    pub fn n_pixels(&self) -> usize {
        self.vol.n_pixels()
    }

    pub fn nnz(&self) -> usize {
        self.weights.len()
    }

    fn row(&self, ray: usize) -> (&[usize], &[f32]) {
        let span = self.row_ptr[ray]..self.row_ptr[ray + 1];
        (&self.indices[span.clone()], &self.weights[span])
    }

    /// `W x` on flat, row-major buffers.
    pub fn forward_flat(&self, image: &[f32]) -> Vec<f32> {
        debug_assert_eq!(image.len(), self.n_pixels());
        (0..self.n_rays())
            .into_par_iter()
            .map(|ray| {
                let (indices, weights) = self.row(ray);
                indices.iter().zip(weights).map(|(&i, &w)| w * image[i]).sum()
            })
            .collect()
    }

    /// `Wᵀ y` on flat, row-major buffers.
    pub fn back_flat(&self, sinogram: &[f32]) -> Vec<f32> {
        debug_assert_eq!(sinogram.len(), self.n_rays());
        let n_pixels = self.n_pixels();
        // Every thread accumulates into its own image; the images are summed at the end
        (0..self.n_rays())
            .into_par_iter()
            .fold(
                || vec![0.0f32; n_pixels],
                |mut acc, ray| {
                    let value = sinogram[ray];
                    if value != 0.0 {
                        let (indices, weights) = self.row(ray);
                        for (&i, &w) in indices.iter().zip(weights) {
                            acc[i] += w * value;
                        }
                    }
                    acc
                },
            )
            .reduce(
                || vec![0.0f32; n_pixels],
                |mut l, r| {
                    l.iter_mut().zip(r.iter()).for_each(|(l, r)| *l += r);
                    l
                },
            )
    }

    pub fn forward(&self, image: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_shape("image", self.vol.shape(), image.dim())?;
        let flat: Vec<f32> = image.iter().copied().collect();
        Ok(Array2::from_shape_vec(self.proj.sinogram_shape(), self.forward_flat(&flat))?)
    }

    pub fn back(&self, sinogram: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_shape("sinogram", self.proj.sinogram_shape(), sinogram.dim())?;
        let flat: Vec<f32> = sinogram.iter().copied().collect();
        Ok(Array2::from_shape_vec(self.vol.shape(), self.back_flat(&flat))?)
    }

    /// Total intersection length of each ray with the volume.
    pub fn row_sums(&self) -> Vec<f32> {
        (0..self.n_rays())
            .into_par_iter()
            .map(|ray| self.row(ray).1.iter().sum())
            .collect()
    }

    /// Total weight with which each pixel is seen by all rays.
    pub fn col_sums(&self) -> Vec<f32> {
        self.back_flat(&vec![1.0; self.n_rays()])
    }
}

/// Walk one ray through the pixel grid, collecting `(pixel index, length)`.
pub fn trace_ray(theta: f32, offset: f32, vol: &VolumeGeometry) -> SystemMatrixRow {
    let theta = theta as f64;
    let offset = offset as f64;
    let (half_w, half_h) = (vol.half_width() as f64, vol.half_height() as f64);

    let origin = [offset * theta.cos(), offset * theta.sin()];
    let direction = [theta.sin(), -theta.cos()];
    let lower = [-half_w, -half_h];
    let upper = [half_w, half_h];

    // Where does the ray enter and leave the volume?
    let (mut t_enter, mut t_exit) = (f64::NEG_INFINITY, f64::INFINITY);
    for d in 0..2 {
        if direction[d].abs() < 1e-12 {
            if origin[d] <= lower[d] || origin[d] >= upper[d] {
                return Vec::new();
            }
        } else {
            let a = (lower[d] - origin[d]) / direction[d];
            let b = (upper[d] - origin[d]) / direction[d];
            t_enter = t_enter.max(a.min(b));
            t_exit = t_exit.min(a.max(b));
        }
    }
    if t_exit - t_enter <= 1e-9 {
        return Vec::new();
    }

    // Grid cell of the entry point: column counted from the left, `j` from the bottom
    let n = [vol.cols as i64, vol.rows as i64];
    let entry = [
        origin[0] + t_enter * direction[0],
        origin[1] + t_enter * direction[1],
    ];
    let mut cell = [0i64; 2];
    let mut step = [0i64; 2];
    let mut t_next = [f64::INFINITY; 2];
    let mut t_delta = [f64::INFINITY; 2];
    for d in 0..2 {
        cell[d] = ((entry[d] - lower[d]).floor() as i64).clamp(0, n[d] - 1);
        if direction[d] > 1e-12 {
            step[d] = 1;
            t_delta[d] = 1.0 / direction[d];
            t_next[d] = (lower[d] + (cell[d] + 1) as f64 - origin[d]) / direction[d];
        } else if direction[d] < -1e-12 {
            step[d] = -1;
            t_delta[d] = -1.0 / direction[d];
            t_next[d] = (lower[d] + cell[d] as f64 - origin[d]) / direction[d];
        }
    }

    let mut row = Vec::with_capacity(vol.rows + vol.cols);
    let mut here = t_enter;
    loop {
        // Which boundary will be hit next
        let d = if t_next[0] <= t_next[1] { 0 } else { 1 };
        let boundary = t_next[d].min(t_exit);

        let weight = boundary - here;
        if weight > 1e-9 {
            let r = (n[1] - 1 - cell[1]) as usize;
            let c = cell[0] as usize;
            row.push((r * vol.cols + c, weight as f32));
        }
        if boundary >= t_exit {
            break;
        }

        here = boundary;
        t_next[d] += t_delta[d];
        cell[d] += step[d];
        if cell[d] < 0 || cell[d] >= n[d] {
            break;
        }
    }
    row
}
