/// optimizer.rs — Quasi-Newton minimiser for negative log-likelihoods
///
/// ─────────────────────────────────────────────────────────────────────────
/// ALGORITHM
/// ─────────────────────────────────────────────────────────────────────────
///
/// BFGS on an unconstrained θ with inverse-Hessian update
///
///   s = θ_{k+1} − θ_k,   y = ∇f_{k+1} − ∇f_k,   ρ = 1/(yᵀs)
///   H ← (I − ρ s yᵀ) H (I − ρ y sᵀ) + ρ s sᵀ
///
/// Search direction d = −H ∇f, Armijo backtracking
///   f(θ + t d) ≤ f(θ) + c₁ t ∇fᵀd,   t ∈ {1, ½, ¼, …}
///
/// Gradient by central differences, h_i = 1e-5 · max(|θ_i|, 1).
///
/// Termination
///   Converged     relative improvement |Δf| / max(|f|, 1) < tol on two
///                 consecutive iterations, or ‖∇f‖_∞ < grad_tol
///   MaxIterations iteration cap reached
///   Timeout       deadline passed
///   Cancelled     cancellation token set
///   Stalled       no descent step found even along −∇f
/// ─────────────────────────────────────────────────────────────────────────
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

const ARMIJO_C1: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 60;

/// Shared flag to abort an in-flight estimation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct OptimizerOptions {
    pub max_iterations: usize,
    /// Relative objective improvement treated as convergence
    pub tolerance: f64,
    /// ‖∇f‖_∞ treated as a stationary point
    pub grad_tolerance: f64,
    pub deadline: Option<Instant>,
    pub cancel: Option<CancelToken>,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-9,
            grad_tolerance: 1e-8,
            deadline: None,
            cancel: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    Converged,
    MaxIterations,
    Timeout,
    Cancelled,
    Stalled,
}

#[derive(Debug, Clone)]
pub struct OptimOutcome {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub grad_norm: f64,
    pub termination: Termination,
}

/// Minimise `f` from `x0`.  Non-finite values of `f` are treated as +∞ and
/// rejected by the line search.
pub fn minimize<F>(f: F, x0: Vec<f64>, opts: &OptimizerOptions) -> OptimOutcome
where
    F: Fn(&[f64]) -> f64,
{
    let n = x0.len();
    let mut evals = 0usize;
    let mut eval = |x: &Array1<f64>| -> f64 {
        evals += 1;
        let v = x.as_slice().map_or_else(|| f(&x.to_vec()), |s| f(s));
        if v.is_finite() { v } else { f64::INFINITY }
    };

    let mut x = Array1::from(x0);
    let mut fx = eval(&x);
    let mut g = gradient_with(&mut eval, &x);
    let mut h_inv = Array2::<f64>::eye(n);
    let mut fresh_h = true;
    let mut small_steps = 0usize;
    let mut iterations = 0usize;

    let termination = loop {
        if let Some(c) = &opts.cancel {
            if c.is_cancelled() {
                break Termination::Cancelled;
            }
        }
        if let Some(deadline) = opts.deadline {
            if Instant::now() >= deadline {
                break Termination::Timeout;
            }
        }
        if inf_norm(&g) < opts.grad_tolerance {
            break Termination::Converged;
        }
        if iterations >= opts.max_iterations {
            break Termination::MaxIterations;
        }
        iterations += 1;

        // ── Direction ─────────────────────────────────────────────────────
        let mut d = -h_inv.dot(&g);
        let mut slope = g.dot(&d);
        if !(slope < 0.0) {
            h_inv = Array2::eye(n);
            fresh_h = true;
            d = -g.clone();
            slope = g.dot(&d);
        }

        // ── Armijo backtracking ───────────────────────────────────────────
        let mut t = 1.0;
        let mut accepted = None;
        for _ in 0..MAX_BACKTRACKS {
            let x_new = &x + &(t * &d);
            let f_new = eval(&x_new);
            if f_new <= fx + ARMIJO_C1 * t * slope {
                accepted = Some((x_new, f_new));
                break;
            }
            t *= 0.5;
        }

        let Some((x_new, f_new)) = accepted else {
            if fresh_h {
                break Termination::Stalled;
            }
            h_inv = Array2::eye(n);
            fresh_h = true;
            continue;
        };

        let g_new = gradient_with(&mut eval, &x_new);
        let s = &x_new - &x;
        let y = &g_new - &g;
        let sy = s.dot(&y);

        // ── Inverse-Hessian update ────────────────────────────────────────
        if sy > 1e-12 * s.dot(&s).sqrt() * y.dot(&y).sqrt() && sy > 0.0 {
            if fresh_h {
                h_inv *= sy / y.dot(&y);
                fresh_h = false;
            }
            let hy = h_inv.dot(&y);
            let yhy = y.dot(&hy);
            let rho = 1.0 / sy;
            for i in 0..n {
                for j in 0..n {
                    h_inv[[i, j]] += (sy + yhy) * rho * rho * s[i] * s[j]
                        - rho * (hy[i] * s[j] + s[i] * hy[j]);
                }
            }
        }

        let improvement = (fx - f_new) / fx.abs().max(1.0);
        x = x_new;
        fx = f_new;
        g = g_new;

        if improvement.abs() < opts.tolerance {
            small_steps += 1;
            if small_steps >= 2 {
                break Termination::Converged;
            }
        } else {
            small_steps = 0;
        }
    };

    OptimOutcome {
        grad_norm: inf_norm(&g),
        x: x.to_vec(),
        value: fx,
        iterations,
        evaluations: evals,
        termination,
    }
}

fn gradient_with<E>(eval: &mut E, x: &Array1<f64>) -> Array1<f64>
where
    E: FnMut(&Array1<f64>) -> f64,
{
    let mut g = Array1::zeros(x.len());
    let mut xp = x.clone();
    for i in 0..x.len() {
        let h = 1e-5 * x[i].abs().max(1.0);
        xp[i] = x[i] + h;
        let fp = eval(&xp);
        xp[i] = x[i] - h;
        let fm = eval(&xp);
        xp[i] = x[i];
        g[i] = if fp.is_finite() && fm.is_finite() {
            (fp - fm) / (2.0 * h)
        } else {
            0.0
        };
    }
    g
}

/// Finite-difference Hessian of `f` at `x`.
pub fn hessian<F>(f: F, x: &[f64]) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let n = x.len();
    let steps: Vec<f64> = x.iter().map(|v| 1e-4 * v.abs().max(1.0)).collect();
    let f0 = f(x);
    let mut p = x.to_vec();
    let shifted = |p: &mut Vec<f64>, moves: &[(usize, f64)]| -> f64 {
        for &(i, d) in moves {
            p[i] = x[i] + d;
        }
        let v = f(p.as_slice());
        for &(i, _) in moves {
            p[i] = x[i];
        }
        v
    };

    let mut h = DMatrix::zeros(n, n);
    for i in 0..n {
        let hi = steps[i];
        let fp = shifted(&mut p, &[(i, hi)]);
        let fm = shifted(&mut p, &[(i, -hi)]);
        h[(i, i)] = (fp - 2.0 * f0 + fm) / (hi * hi);
        for j in 0..i {
            let hj = steps[j];
            let fpp = shifted(&mut p, &[(i, hi), (j, hj)]);
            let fpm = shifted(&mut p, &[(i, hi), (j, -hj)]);
            let fmp = shifted(&mut p, &[(i, -hi), (j, hj)]);
            let fmm = shifted(&mut p, &[(i, -hi), (j, -hj)]);
            let v = (fpp - fpm - fmp + fmm) / (4.0 * hi * hj);
            h[(i, j)] = v;
            h[(j, i)] = v;
        }
    }
    h
}

fn inf_norm(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0_f64, |m, x| m.max(x.abs()))
}

/// Positive-definiteness up to finite-difference noise: the smallest
/// eigenvalue may not fall below −`rel_tol` · max |eigenvalue|.
/// Returns the verdict and the smallest eigenvalue.
pub fn is_positive_definite(h: &DMatrix<f64>, rel_tol: f64) -> (bool, f64) {
    if h.iter().any(|v| !v.is_finite()) {
        return (false, f64::NAN);
    }
    let eig = SymmetricEigen::new(h.clone()).eigenvalues;
    let min = eig.iter().copied().fold(f64::INFINITY, f64::min);
    let scale = eig.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    (scale > 0.0 && min > -rel_tol * scale, min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;
    use std::time::Duration;

    fn rosenbrock(x: &[f64]) -> f64 {
        (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2)
    }

    #[test]
    fn minimises_rosenbrock() {
        let out = minimize(rosenbrock, vec![-1.2, 1.0], &OptimizerOptions::default());
        assert_eq!(out.termination, Termination::Converged);
        assert!((out.x[0] - 1.0).abs() < 1e-3, "x = {:?}", out.x);
        assert!((out.x[1] - 1.0).abs() < 2e-3, "x = {:?}", out.x);
    }

    #[test]
    fn iteration_cap_is_reported() {
        let opts = OptimizerOptions { max_iterations: 3, ..Default::default() };
        let out = minimize(rosenbrock, vec![-1.2, 1.0], &opts);
        assert_eq!(out.termination, Termination::MaxIterations);
        assert_eq!(out.iterations, 3);
    }

    #[test]
    fn expired_deadline_times_out() {
        let opts = OptimizerOptions {
            deadline: Some(Instant::now() - Duration::from_millis(1)),
            ..Default::default()
        };
        let out = minimize(rosenbrock, vec![-1.2, 1.0], &opts);
        assert_eq!(out.termination, Termination::Timeout);
    }

    #[test]
    fn cancellation_is_observed() {
        let token = CancelToken::new();
        token.cancel();
        let opts = OptimizerOptions { cancel: Some(token), ..Default::default() };
        let out = minimize(rosenbrock, vec![-1.2, 1.0], &opts);
        assert_eq!(out.termination, Termination::Cancelled);
        assert_eq!(out.iterations, 0);
    }

    #[test]
    fn hessian_of_quadratic() {
        let f = |x: &[f64]| 2.0 * x[0] * x[0] + x[0] * x[1] + 3.0 * x[1] * x[1];
        let h = hessian(f, &[0.3, -0.7]);
        assert_relative_eq!(h[(0, 0)], 4.0, epsilon = 1e-5);
        assert_relative_eq!(h[(0, 1)], 1.0, epsilon = 1e-5);
        assert_relative_eq!(h[(1, 0)], 1.0, epsilon = 1e-5);
        assert_relative_eq!(h[(1, 1)], 6.0, epsilon = 1e-5);
        assert!(is_positive_definite(&h, 1e-6).0);

        let saddle = |x: &[f64]| x[0] * x[0] - x[1] * x[1];
        assert!(!is_positive_definite(&hessian(saddle, &[0.0, 0.0]), 1e-6).0);
    }

    #[test]
    fn definiteness_reports_smallest_eigenvalue() {
        let m = DMatrix::from_row_slice(3, 3, &[2.0, 1.0, 0.0, 1.0, 2.0, 0.0, 0.0, 0.0, 5.0]);
        let (pd, min) = is_positive_definite(&m, 1e-6);
        assert!(pd);
        assert_relative_eq!(min, 1.0, epsilon = 1e-10);

        // Negative curvature within noise of the largest eigenvalue passes.
        let noisy = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1e-7]);
        assert!(is_positive_definite(&noisy, 1e-5).0);
        assert!(!is_positive_definite(&noisy, 1e-8).0);

        assert!(!is_positive_definite(&DMatrix::zeros(2, 2), 1e-5).0);
        let bad = DMatrix::from_row_slice(2, 2, &[1.0, f64::NAN, f64::NAN, 1.0]);
        assert!(is_positive_definite(&bad, 1e-5).1.is_nan());
    }

    #[test]
    fn gradient_of_quadratic() {
        let mut eval = |x: &Array1<f64>| x[0] * x[0] + 3.0 * x[1];
        let g = gradient_with(&mut eval, &array![2.0, 1.0]);
        assert_relative_eq!(g[0], 4.0, epsilon = 1e-6);
        assert_relative_eq!(g[1], 3.0, epsilon = 1e-6);
    }
}
