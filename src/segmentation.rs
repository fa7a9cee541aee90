//! Soft segmentation function and its parameter vector.
//!
//! With gray values `ρ_0 < ρ_1 < … < ρ_{n-1}` and one sharpness `K_i` per
//! transition, the soft segmentation of a continuous value `x` is
//!
//! ```text
//! S(x) = ρ_0 + Σ_i d_i · u(k_i (x − τ_i))
//! d_i = ρ_{i+1} − ρ_i,  τ_i = (ρ_i + ρ_{i+1}) / 2,  k_i = K_i / d_i
//! u(z) = 1 / (1 + e^{−2z})
//! ```
//!
//! For large `K` this approaches a staircase that snaps every value to the
//! nearest gray value. The parameter vector used by the optimizer is
//! `[ρ_0 … ρ_{n-1}, K_0 … K_{n-2}]`.

use ndarray::{s, Array1, ArrayView1};

use crate::error::{ReconError, Result};

/// Pack gray values and sharpness into one parameter vector.
pub fn gv2param(gv: ArrayView1<f32>, k: ArrayView1<f32>) -> Result<Array1<f32>> {
    if gv.len() < 2 || k.len() + 1 != gv.len() {
        return Err(ReconError::InvalidParameter(format!(
            "need n >= 2 gray values and n-1 sharpness values, got {} and {}",
            gv.len(),
            k.len()
        )));
    }
    Ok(gv.iter().chain(k.iter()).copied().collect())
}

/// Split a parameter vector into `(gray values, sharpness)`.
pub fn param2gv(param: ArrayView1<f32>) -> Result<(Array1<f32>, Array1<f32>)> {
    if param.len() < 3 || param.len() % 2 == 0 {
        return Err(ReconError::InvalidParameter(format!(
            "parameter vector must have length 2n-1 with n >= 2, got {}",
            param.len()
        )));
    }
    let n_gv = (param.len() + 1) / 2;
    Ok((
        param.slice(s![..n_gv]).to_owned(),
        param.slice(s![n_gv..]).to_owned(),
    ))
}

#[inline]
fn logistic(z: f32) -> f32 {
    1.0 / (1.0 + (-2.0 * z).clamp(-80.0, 80.0).exp())
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftSegmentation {
    gv: Vec<f32>,
    k: Vec<f32>,
}

impl SoftSegmentation {
    pub fn new(gv: &[f32], k: &[f32]) -> Result<Self> {
        if gv.len() < 2 || k.len() + 1 != gv.len() {
            return Err(ReconError::InvalidParameter(format!(
                "need n >= 2 gray values and n-1 sharpness values, got {} and {}",
                gv.len(),
                k.len()
            )));
        }
        if gv.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(ReconError::InvalidParameter(format!(
                "gray values must be strictly increasing: {gv:?}"
            )));
        }
        if k.iter().any(|&k| !(k > 0.0 && k.is_finite())) {
            return Err(ReconError::InvalidParameter(format!(
                "sharpness must be positive: {k:?}"
            )));
        }
        Ok(Self { gv: gv.to_vec(), k: k.to_vec() })
    }

    pub fn from_param(param: ArrayView1<f32>) -> Result<Self> {
        let (gv, k) = param2gv(param)?;
        Self::new(&gv.to_vec(), &k.to_vec())
    }

    pub fn gray_values(&self) -> &[f32] {
        &self.gv
    }

    pub fn sharpness(&self) -> &[f32] {
        &self.k
    }

    pub fn n_params(&self) -> usize {
        self.gv.len() + self.k.len()
    }

    pub fn param(&self) -> Array1<f32> {
        self.gv.iter().chain(&self.k).copied().collect()
    }

    /// Yields `(d_i, τ_i, K_i)` for every transition.
    fn transitions(&self) -> impl Iterator<Item = (f32, f32, f32)> + '_ {
        self.gv
            .windows(2)
            .zip(&self.k)
            .map(|(w, &k)| (w[1] - w[0], 0.5 * (w[0] + w[1]), k))
    }

    pub fn value(&self, x: f32) -> f32 {
        self.gv[0]
            + self
                .transitions()
                .map(|(d, tau, k)| d * logistic(k / d * (x - tau)))
                .sum::<f32>()
    }

    /// `dS/dx`
    pub fn derivative(&self, x: f32) -> f32 {
        self.transitions()
            .map(|(d, tau, k)| {
                let u = logistic(k / d * (x - tau));
                2.0 * k * u * (1.0 - u)
            })
            .sum()
    }

    /// `S(x)` and `dS/dx` for every element.
    pub fn apply(&self, x: &[f32]) -> (Vec<f32>, Vec<f32>) {
        x.iter().map(|&x| (self.value(x), self.derivative(x))).unzip()
    }

    /// Accumulate `Σ_j g_j · ∂S(x_j)/∂θ` into a gradient over the parameter
    /// vector, where `g_j` is the derivative of the objective w.r.t. `S(x_j)`.
    pub fn param_gradient(&self, x: &[f32], g: &[f32]) -> Array1<f32> {
        let n_gv = self.gv.len();
        let mut grad = vec![0.0f64; self.n_params()];
        for (&x, &g) in x.iter().zip(g) {
            let g = g as f64;
            grad[0] += g;
            for (i, (d, tau, k)) in self.transitions().enumerate() {
                let u = logistic(k / d * (x - tau));
                let du = 2.0 * u * (1.0 - u);
                let offset = x - tau;
                let (lo, hi) = (
                    -u + du * k * (-0.5 * d + offset) / d,
                    u + du * k * (-0.5 * d - offset) / d,
                );
                grad[i] += g * lo as f64;
                grad[i + 1] += g * hi as f64;
                grad[n_gv + i] += g * (du * offset) as f64;
            }
        }
        grad.into_iter().map(|v| v as f32).collect()
    }

    /// Snap a continuous value onto the nearest gray value.
    pub fn hard(&self, x: f32) -> f32 {
        let level = self.transitions().filter(|&(_, tau, _)| x >= tau).count();
        self.gv[level]
    }
}
