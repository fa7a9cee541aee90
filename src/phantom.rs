//! Synthetic test objects and simulated measurements.

use ndarray::Array2;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::{rngs::StdRng, SeedableRng};

use crate::error::{check_shape, ReconError, Result};
use crate::projector::SystemMatrix;

/// Cross-section of a tube: `value` between `inner_radius` and
/// `outer_radius` (pixels) from the centre of a `size × size` image.
pub fn nanotube_phantom(
    size: usize,
    outer_radius: f32,
    inner_radius: f32,
    value: f32,
) -> Array2<f32> {
    let centre = (size as f32 - 1.0) / 2.0;
    Array2::from_shape_fn((size, size), |(r, c)| {
        let (x, y) = (c as f32 - centre, centre - r as f32);
        let radius = (x * x + y * y).sqrt();
        if radius <= outer_radius && radius >= inner_radius { value } else { 0.0 }
    })
}

/// Forward project `phantom` and add zero-mean Gaussian noise.
pub fn simulate_sinogram(
    w: &SystemMatrix,
    phantom: &Array2<f32>,
    noise_sigma: f32,
    seed: u64,
) -> Result<Array2<f32>> {
    check_shape("phantom", w.volume_geometry().shape(), phantom.dim())?;
    let clean = w.forward(phantom.view())?;
    if noise_sigma == 0.0 {
        return Ok(clean);
    }
    let normal = Normal::new(0.0f32, noise_sigma)
        .map_err(|e| ReconError::InvalidParameter(format!("noise sigma {noise_sigma}: {e}")))?;
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Array2::random_using(clean.dim(), normal, &mut rng);
    Ok(clean + noise)
}
