//! Huber-smoothed isotropic total variation.
//!
//! Forward differences with Neumann boundaries (the difference across the
//! last row / column is zero). Gradient magnitudes below `delta` are
//! penalized quadratically, which keeps the functional differentiable.

#[inline]
fn huber(m: f32, delta: f32) -> f32 {
    if m <= delta {
        m * m / (2.0 * delta)
    } else {
        m - 0.5 * delta
    }
}

#[inline]
fn differences(image: &[f32], (rows, cols): (usize, usize), r: usize, c: usize) -> (f32, f32) {
    let here = image[r * cols + c];
    let dx = if c + 1 < cols { image[r * cols + c + 1] - here } else { 0.0 };
    let dy = if r + 1 < rows { image[(r + 1) * cols + c] - here } else { 0.0 };
    (dx, dy)
}

/// Huber TV of a row-major `rows × cols` image.
pub fn huber_tv(image: &[f32], shape: (usize, usize), delta: f32) -> f32 {
    let (rows, cols) = shape;
    debug_assert_eq!(image.len(), rows * cols);
    let mut total = 0.0f64;
    for r in 0..rows {
        for c in 0..cols {
            let (dx, dy) = differences(image, shape, r, c);
            total += huber((dx * dx + dy * dy).sqrt(), delta) as f64;
        }
    }
    total as f32
}

/// Gradient of [`huber_tv`] with respect to every pixel.
pub fn huber_tv_gradient(image: &[f32], shape: (usize, usize), delta: f32) -> Vec<f32> {
    let (rows, cols) = shape;
    debug_assert_eq!(image.len(), rows * cols);
    let mut grad = vec![0.0f32; image.len()];
    for r in 0..rows {
        for c in 0..cols {
            let (dx, dy) = differences(image, shape, r, c);
            let m = (dx * dx + dy * dy).sqrt();
            // φ'(m) / m
            let scale = if m <= delta { 1.0 / delta } else { 1.0 / m };
            let (px, py) = (scale * dx, scale * dy);

            let here = r * cols + c;
            grad[here] -= px + py;
            if c + 1 < cols {
                grad[here + 1] += px;
            }
            if r + 1 < rows {
                grad[here + cols] += py;
            }
        }
    }
    grad
}
