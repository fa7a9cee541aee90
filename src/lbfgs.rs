//! Limited-memory BFGS with backtracking line search and optional lower bounds.
//!
//! Lower bounds are enforced by projection: trial points are clipped onto the
//! feasible set and search directions never push coordinates that already
//! sit on their bound further outwards. Objectives may return an infinite
//! value to mark a point as infeasible; the line search then backs off.

use std::collections::VecDeque;

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LbfgsOptions {
    pub max_iterations: usize,
    /// Number of correction pairs kept.
    pub history: usize,
    /// Stop once the largest projected gradient component falls below this.
    pub gradient_tolerance: f32,
    /// Stop once the relative decrease of the objective falls below this.
    pub value_tolerance: f64,
    pub max_line_search: usize,
}

impl Default for LbfgsOptions {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            history: 10,
            gradient_tolerance: 1e-6,
            value_tolerance: 1e-10,
            max_line_search: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub x: Vec<f32>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(a, b)| (*a as f64) * (*b as f64)).sum()
}

fn project(x: &mut [f32], lower: Option<&[f32]>) {
    if let Some(lower) = lower {
        x.iter_mut().zip(lower).for_each(|(x, lo)| *x = x.max(*lo));
    }
}

fn at_bound(x: f32, lower: Option<&[f32]>, i: usize) -> bool {
    lower.map_or(false, |lo| x <= lo[i])
}

/// Largest gradient component that could still move `x` inside the feasible set.
fn projected_gradient_norm(x: &[f32], g: &[f32], lower: Option<&[f32]>) -> f32 {
    x.iter()
        .zip(g)
        .enumerate()
        .map(|(i, (&x, &g))| if at_bound(x, lower, i) && g > 0.0 { 0.0 } else { g.abs() })
        .fold(0.0, f32::max)
}

/// Two-loop recursion: approximate `-H g` from the stored correction pairs.
fn search_direction(g: &[f32], pairs: &VecDeque<(Vec<f32>, Vec<f32>, f64)>) -> Vec<f32> {
    let mut q: Vec<f64> = g.iter().map(|&g| g as f64).collect();
    let mut alphas = Vec::with_capacity(pairs.len());
    for (s, y, rho) in pairs.iter().rev() {
        let alpha = rho * s.iter().zip(&q).map(|(s, q)| *s as f64 * q).sum::<f64>();
        q.iter_mut().zip(y).for_each(|(q, y)| *q -= alpha * *y as f64);
        alphas.push(alpha);
    }

    let gamma = match pairs.back() {
        Some((s, y, _)) => dot(s, y) / dot(y, y),
        None => 1.0 / g.iter().map(|g| (*g as f64).abs()).fold(1.0, f64::max),
    };
    q.iter_mut().for_each(|q| *q *= gamma);

    for ((s, y, rho), alpha) in pairs.iter().zip(alphas.iter().rev()) {
        let beta = rho * y.iter().zip(&q).map(|(y, q)| *y as f64 * q).sum::<f64>();
        q.iter_mut().zip(s).for_each(|(q, s)| *q += (alpha - beta) * *s as f64);
    }
    q.into_iter().map(|q| -q as f32).collect()
}

/// Minimize `objective` starting from `x0`.
///
/// `objective` returns the value and gradient at a point. `lower`, when
/// given, must have the same length as `x0`.
pub fn minimize<F>(
    mut objective: F,
    mut x: Vec<f32>,
    lower: Option<&[f32]>,
    options: &LbfgsOptions,
) -> Minimum
where
    F: FnMut(&[f32]) -> (f64, Vec<f32>),
{
    const ARMIJO: f64 = 1e-4;

    project(&mut x, lower);
    let (mut value, mut grad) = objective(&x);
    let mut pairs: VecDeque<(Vec<f32>, Vec<f32>, f64)> = VecDeque::with_capacity(options.history);
    let mut converged = false;
    let mut iterations = 0;

    while iterations < options.max_iterations {
        let gradient_norm = projected_gradient_norm(&x, &grad, lower);
        if !value.is_finite() || gradient_norm <= options.gradient_tolerance {
            converged = value.is_finite();
            break;
        }

        let mut direction = search_direction(&grad, &pairs);
        let mask = |d: &mut Vec<f32>, x: &[f32]| {
            for (i, d) in d.iter_mut().enumerate() {
                if at_bound(x[i], lower, i) && *d < 0.0 {
                    *d = 0.0;
                }
            }
        };
        mask(&mut direction, &x);
        if dot(&direction, &grad) >= 0.0 {
            // Curvature information is misleading; restart from steepest descent
            pairs.clear();
            direction = search_direction(&grad, &pairs);
            mask(&mut direction, &x);
        }

        let mut step = 1.0f32;
        let mut accepted = None;
        for _ in 0..options.max_line_search {
            let mut trial: Vec<f32> = x.iter().zip(&direction).map(|(x, d)| x + step * d).collect();
            project(&mut trial, lower);
            let moved: Vec<f32> = trial.iter().zip(&x).map(|(t, x)| t - x).collect();
            let (trial_value, trial_grad) = objective(&trial);
            if trial_value.is_finite() && trial_value <= value + ARMIJO * dot(&grad, &moved) {
                accepted = Some((trial, moved, trial_value, trial_grad));
                break;
            }
            step *= 0.5;
        }

        let Some((next, s, next_value, next_grad)) = accepted else {
            trace!(iterations, value, "line search failed");
            break;
        };
        iterations += 1;

        let y: Vec<f32> = next_grad.iter().zip(&grad).map(|(a, b)| a - b).collect();
        let sy = dot(&s, &y);
        if sy > 1e-12 {
            if pairs.len() == options.history {
                pairs.pop_front();
            }
            pairs.push_back((s, y, 1.0 / sy));
        }

        let decrease = value - next_value;
        x = next;
        value = next_value;
        grad = next_grad;
        trace!(iterations, value, step, "L-BFGS");

        if decrease <= options.value_tolerance * value.abs().max(1.0) {
            converged = true;
            break;
        }
    }

    Minimum { x, value, iterations, converged }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_eq::assert_float_eq;

    #[test]
    fn minimizes_a_quadratic() {
        let centre = [3.0f32, -2.0, 0.5];
        let scales = [1.0f32, 10.0, 0.1];
        let result = minimize(
            |x| {
                let terms = x.iter().zip(&centre).zip(&scales);
                let value: f64 = terms
                    .clone()
                    .map(|((x, c), s)| (s * (x - c) * (x - c)) as f64)
                    .sum();
                let grad: Vec<f32> = terms.map(|((x, c), s)| 2.0 * s * (x - c)).collect();
                (value, grad)
            },
            vec![0.0; 3],
            None,
            &LbfgsOptions::default(),
        );
        for (x, c) in result.x.iter().zip(&centre) {
            assert_float_eq!(*x, *c, abs <= 1e-3);
        }
    }

    #[test]
    fn minimizes_rosenbrock() {
        let options = LbfgsOptions { max_iterations: 500, ..LbfgsOptions::default() };
        let result = minimize(
            |x| {
                let (a, b) = (x[0] as f64, x[1] as f64);
                let value = (1.0 - a).powi(2) + 100.0 * (b - a * a).powi(2);
                let ga = -2.0 * (1.0 - a) - 400.0 * a * (b - a * a);
                let gb = 200.0 * (b - a * a);
                (value, vec![ga as f32, gb as f32])
            },
            vec![-1.2, 1.0],
            None,
            &options,
        );
        assert_float_eq!(result.x[0], 1.0, abs <= 2e-2);
        assert_float_eq!(result.x[1], 1.0, abs <= 4e-2);
    }

    #[test]
    fn respects_lower_bounds() {
        let lower = [0.0f32, -10.0];
        let result = minimize(
            |x| {
                let value = ((x[0] + 1.0).powi(2) + (x[1] + 1.0).powi(2)) as f64;
                (value, vec![2.0 * (x[0] + 1.0), 2.0 * (x[1] + 1.0)])
            },
            vec![2.0, 2.0],
            Some(lower.as_slice()),
            &LbfgsOptions::default(),
        );
        assert_float_eq!(result.x[0], 0.0, abs <= 1e-6);
        assert_float_eq!(result.x[1], -1.0, abs <= 1e-3);
    }

    #[test]
    fn infeasible_region_is_avoided() {
        // Objective undefined for x < 0.5; minimum of the defined part sits on its edge
        let result = minimize(
            |x| {
                if x[0] < 0.5 {
                    (f64::INFINITY, vec![0.0])
                } else {
                    ((x[0] as f64).powi(2), vec![2.0 * x[0]])
                }
            },
            vec![2.0],
            None,
            &LbfgsOptions::default(),
        );
        assert!(result.value.is_finite());
        assert!(result.x[0] >= 0.5);
    }
}
