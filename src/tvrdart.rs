//! TVR-DART: discrete tomography through a soft segmentation function.
//!
//! The reconstruction variable `x` is continuous; the image seen by the
//! projector is its soft segmentation `S(x; θ)`. Both are found by minimizing
//!
//! ```text
//! f(x, θ) = ½ ‖W S(x; θ) − p‖² + λ · TV_huber(S(x; θ))
//! ```
//!
//! [`joint`] alternates between `x` and the segmentation parameters `θ`
//! (gray values and sharpness); [`recon`] keeps `θ` fixed.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use tracing::{debug, info};

use crate::error::{check_shape, ReconError, Result};
use crate::lbfgs::{minimize, LbfgsOptions};
use crate::projector::SystemMatrix;
use crate::segmentation::SoftSegmentation;
use crate::tv::{huber_tv, huber_tv_gradient};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TvrDartOptions {
    /// Gradient magnitude below which TV is penalized quadratically.
    pub huber_delta: f32,
    /// Alternations between image and parameter updates in [`joint`].
    pub joint_rounds: usize,
    pub x_iterations: usize,
    pub param_iterations: usize,
    pub min_sharpness: f32,
    /// Keep the lowest gray value (vacuum) at its initial value.
    pub fix_background: bool,
}

impl Default for TvrDartOptions {
    fn default() -> Self {
        Self {
            huber_delta: 0.01,
            joint_rounds: 10,
            x_iterations: 20,
            param_iterations: 10,
            min_sharpness: 0.1,
            fix_background: true,
        }
    }
}

/// Measured data, operator and regularization weight shared by every evaluation.
pub struct Objective<'a> {
    w: &'a SystemMatrix,
    p: Vec<f32>,
    lambda: f32,
    huber_delta: f32,
}

impl<'a> Objective<'a> {
    pub fn new(
        w: &'a SystemMatrix,
        sinogram: ArrayView2<f32>,
        lambda: f32,
        huber_delta: f32,
    ) -> Result<Self> {
        check_shape("sinogram", w.projection_geometry().sinogram_shape(), sinogram.dim())?;
        if !(lambda >= 0.0) {
            return Err(ReconError::InvalidParameter(format!(
                "lambda must be non-negative, got {lambda}"
            )));
        }
        if !(huber_delta > 0.0) {
            return Err(ReconError::InvalidParameter(format!(
                "Huber delta must be positive, got {huber_delta}"
            )));
        }
        Ok(Self { w, p: sinogram.iter().copied().collect(), lambda, huber_delta })
    }

    /// Objective value and its derivative w.r.t. every pixel of the segmented image.
    fn evaluate_segmented(&self, segmented: &[f32]) -> (f64, Vec<f32>) {
        let shape = self.w.volume_geometry().shape();
        let residual: Vec<f32> = self
            .w
            .forward_flat(segmented)
            .iter()
            .zip(&self.p)
            .map(|(wx, p)| wx - p)
            .collect();
        let data = 0.5 * residual.iter().map(|r| (*r as f64).powi(2)).sum::<f64>();
        let tv = huber_tv(segmented, shape, self.huber_delta) as f64;

        let mut grad = self.w.back_flat(&residual);
        if self.lambda > 0.0 {
            let tv_grad = huber_tv_gradient(segmented, shape, self.huber_delta);
            grad.iter_mut().zip(&tv_grad).for_each(|(g, t)| *g += self.lambda * t);
        }
        (data + self.lambda as f64 * tv, grad)
    }

    /// Value and gradient w.r.t. the continuous image `x`.
    pub fn with_respect_to_image(&self, x: &[f32], seg: &SoftSegmentation) -> (f64, Vec<f32>) {
        let (segmented, slope) = seg.apply(x);
        let (value, mut grad) = self.evaluate_segmented(&segmented);
        grad.iter_mut().zip(&slope).for_each(|(g, s)| *g *= s);
        (value, grad)
    }

    /// Value and gradient w.r.t. the parameter vector `[gv…, K…]`.
    ///
    /// Parameters that do not describe a valid segmentation (unordered gray
    /// values, non-positive sharpness) evaluate to infinity.
    pub fn with_respect_to_param(&self, x: &[f32], param: &[f32]) -> (f64, Vec<f32>) {
        let seg = match SoftSegmentation::from_param(ArrayView1::from(param)) {
            Ok(seg) => seg,
            Err(_) => return (f64::INFINITY, vec![0.0; param.len()]),
        };
        let (segmented, _) = seg.apply(x);
        let (value, grad) = self.evaluate_segmented(&segmented);
        (value, seg.param_gradient(x, &grad).to_vec())
    }
}

fn image_options(iterations: usize) -> LbfgsOptions {
    LbfgsOptions { max_iterations: iterations, ..LbfgsOptions::default() }
}

fn check_image(w: &SystemMatrix, x0: ArrayView2<f32>) -> Result<Vec<f32>> {
    check_shape("initial image", w.volume_geometry().shape(), x0.dim())?;
    Ok(x0.iter().copied().collect())
}

/// Update the segmentation parameters with the image held fixed.
fn estimate_param(
    objective: &Objective,
    x: &[f32],
    seg: &SoftSegmentation,
    options: &TvrDartOptions,
) -> Result<SoftSegmentation> {
    let param = seg.param().to_vec();
    let n_gv = seg.gray_values().len();
    // With a fixed background only gv_1.. and K are free
    let skip = usize::from(options.fix_background);
    let background = param[0];

    let lower: Vec<f32> = (skip..param.len())
        .map(|i| if i < n_gv { f32::NEG_INFINITY } else { options.min_sharpness })
        .collect();

    let full = |free: &[f32]| -> Vec<f32> {
        if skip == 1 {
            std::iter::once(background).chain(free.iter().copied()).collect()
        } else {
            free.to_vec()
        }
    };

    let result = minimize(
        |free| {
            let (value, grad) = objective.with_respect_to_param(x, &full(free));
            (value, grad[skip..].to_vec())
        },
        param[skip..].to_vec(),
        Some(lower.as_slice()),
        &LbfgsOptions { max_iterations: options.param_iterations, ..LbfgsOptions::default() },
    );
    SoftSegmentation::from_param(Array1::from(full(&result.x)).view())
}

/// Jointly estimate the reconstruction and the segmentation parameters.
///
/// - w: projection operator
/// - sinogram: measured data, shape (angles, detectors)
/// - x0: initial continuous reconstruction (typically SIRT)
/// - param0: initial `[gv…, K…]`
/// - lambda: TV weight
///
/// Returns the segmented reconstruction and the estimated parameter vector.
pub fn joint(
    w: &SystemMatrix,
    sinogram: ArrayView2<f32>,
    x0: ArrayView2<f32>,
    param0: ArrayView1<f32>,
    lambda: f32,
    options: &TvrDartOptions,
) -> Result<(Array2<f32>, Array1<f32>)> {
    let objective = Objective::new(w, sinogram, lambda, options.huber_delta)?;
    let mut x = check_image(w, x0)?;
    let mut seg = SoftSegmentation::from_param(param0)?;

    for round in 0..options.joint_rounds {
        let image = minimize(
            |x| objective.with_respect_to_image(x, &seg),
            x,
            None,
            &image_options(options.x_iterations),
        );
        x = image.x;

        seg = estimate_param(&objective, &x, &seg, options)?;
        debug!(
            round,
            value = image.value,
            gray_values = ?seg.gray_values(),
            sharpness = ?seg.sharpness(),
            "joint estimation"
        );
    }
    info!(gray_values = ?seg.gray_values(), sharpness = ?seg.sharpness(), "estimated parameters");

    let (segmented, _) = seg.apply(&x);
    Ok((Array2::from_shape_vec(w.volume_geometry().shape(), segmented)?, seg.param()))
}

/// Reconstruct with fixed segmentation parameters.
///
/// Returns the segmented reconstruction and the underlying continuous image.
pub fn recon(
    w: &SystemMatrix,
    sinogram: ArrayView2<f32>,
    x0: ArrayView2<f32>,
    param: ArrayView1<f32>,
    lambda: f32,
    iterations: usize,
    options: &TvrDartOptions,
) -> Result<(Array2<f32>, Array2<f32>)> {
    let objective = Objective::new(w, sinogram, lambda, options.huber_delta)?;
    let seg = SoftSegmentation::from_param(param)?;
    let x = check_image(w, x0)?;

    let result = minimize(
        |x| objective.with_respect_to_image(x, &seg),
        x,
        None,
        &image_options(iterations),
    );
    debug!(iterations = result.iterations, value = result.value, "TVR-DART reconstruction");

    let shape = w.volume_geometry().shape();
    let (segmented, _) = seg.apply(&result.x);
    Ok((
        Array2::from_shape_vec(shape, segmented)?,
        Array2::from_shape_vec(shape, result.x)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{limited_angles, ProjectionGeometry, VolumeGeometry};
    use crate::phantom::nanotube_phantom;
    use crate::segmentation::gv2param;
    use crate::sirt::{sirt, SirtOptions};
    use float_eq::assert_float_eq;
    use ndarray::array;

    struct Setup {
        w: SystemMatrix,
        phantom: Array2<f32>,
        sinogram: Array2<f32>,
        sirt: Array2<f32>,
    }

    fn setup(n: usize, value: f32) -> Setup {
        let proj = ProjectionGeometry::parallel(1.0, n, limited_angles(40, -50.0, 50.0)).unwrap();
        let vol = VolumeGeometry::new(n, n).unwrap();
        let w = SystemMatrix::build(&proj, &vol);
        let phantom = nanotube_phantom(n, n as f32 * 0.35, n as f32 * 0.18, value);
        let sinogram = w.forward(phantom.view()).unwrap();
        let sirt = sirt(&w, sinogram.view(), 50, &SirtOptions::default()).unwrap();
        Setup { w, phantom, sinogram, sirt }
    }

    #[test]
    fn image_gradient_matches_finite_differences() {
        let s = setup(8, 1.0);
        let objective = Objective::new(&s.w, s.sinogram.view(), 0.5, 0.05).unwrap();
        let seg = SoftSegmentation::new(&[0.0, 1.0], &[4.0]).unwrap();
        let x: Vec<f32> = s.sirt.iter().copied().collect();
        let (_, grad) = objective.with_respect_to_image(&x, &seg);

        let h = 1e-2;
        for i in [0, 9, 27, 36, 63] {
            let mut plus = x.clone();
            let mut minus = x.clone();
            plus[i] += h;
            minus[i] -= h;
            let numeric = (objective.with_respect_to_image(&plus, &seg).0
                - objective.with_respect_to_image(&minus, &seg).0)
                / (2.0 * h as f64);
            assert_float_eq!(grad[i] as f64, numeric, abs <= 5e-2 * numeric.abs().max(1.0));
        }
    }

    #[test]
    fn invalid_parameters_are_infinitely_bad() {
        let s = setup(8, 1.0);
        let objective = Objective::new(&s.w, s.sinogram.view(), 1.0, 0.01).unwrap();
        let x: Vec<f32> = s.sirt.iter().copied().collect();
        let (value, _) = objective.with_respect_to_param(&x, &[1.0, 0.0, 4.0]);
        assert!(value.is_infinite());
    }

    #[test]
    fn recon_keeps_the_volume_shape() {
        let s = setup(16, 1.0);
        let param = array![0.0, 1.0, 4.0];
        let (segmented, rec) = recon(
            &s.w,
            s.sinogram.view(),
            s.sirt.view(),
            param.view(),
            1.0,
            10,
            &TvrDartOptions::default(),
        )
        .unwrap();
        assert_eq!(segmented.dim(), (16, 16));
        assert_eq!(rec.dim(), (16, 16));
        assert!(segmented.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn recon_rejects_mismatched_initial_image() {
        let s = setup(8, 1.0);
        let param = array![0.0, 1.0, 4.0];
        let bad = Array2::zeros((8, 9));
        let options = TvrDartOptions::default();
        let result = recon(&s.w, s.sinogram.view(), bad.view(), param.view(), 1.0, 1, &options);
        assert!(result.is_err());
    }

    #[test]
    fn joint_estimation_recovers_the_phantom() {
        let n = 24;
        let s = setup(n, 0.8);
        let scale = s.sirt.fold(f32::MIN, |m, &v| m.max(v));
        let sinogram = &s.sinogram / scale;
        let x0 = &s.sirt / scale;

        let param0 = gv2param(array![0.0, 1.0].view(), array![4.0].view()).unwrap();
        let options = TvrDartOptions { joint_rounds: 6, ..TvrDartOptions::default() };
        let (_, param) =
            joint(&s.w, sinogram.view(), x0.view(), param0.view(), 1.0, &options).unwrap();
        assert_float_eq!(param[0], 0.0, abs <= 1e-7);

        let (segmented, _) =
            recon(&s.w, sinogram.view(), x0.view(), param.view(), 1.0, 50, &options).unwrap();
        let estimated = param[1] * scale;
        assert_float_eq!(estimated, 0.8, abs <= 0.15);

        let truth = s.phantom.mapv(|v| v > 0.4);
        let found = segmented.mapv(|v| v * scale > 0.4);
        let agree = truth.iter().zip(found.iter()).filter(|(a, b)| a == b).count();
        assert!(agree as f32 >= 0.85 * (n * n) as f32, "only {agree} of {} pixels agree", n * n);
    }
}
