/// models/params.rs — Estimated parameters and their unconstrained encoding
///
/// ─────────────────────────────────────────────────────────────────────────
/// REPARAMETERISATION  (θ ∈ ℝᵏ → constrained parameters)
/// ─────────────────────────────────────────────────────────────────────────
///
///   μ      = θ                                   (Constant mean only)
///
///   GARCH:  ω = e^θ₀,  P = P̄·σ(θ₁),  s = σ(θ₂)
///           α = P·s,   β = P·(1 − s)               ⇒ α,β ≥ 0, α+β < 1
///
///   GJR:    ω = e^θ₀,  P = P̄·σ(θ₁)
///           (s_α, s_γ, s_β) = softmax(θ₂, θ₃, 0)
///           α = P·s_α,  γ = 2P·s_γ,  β = P·s_β     ⇒ α + γ/2 + β < 1
///
///   EGARCH: ω = θ₀,  α = e^θ₁,  γ = θ₂,  β = P̄·σ(θ₃)
///
///   ν = ν_min + (ν_max − ν_min)·σ(θ),   λ = λ_max·tanh(θ)
///
///   σ(x) = 1/(1+e^{−x}),  P̄ = 1 − STATIONARITY_MARGIN
/// ─────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

use super::distribution::{Innovation, LAMBDA_MAX, NU_MAX, NU_MIN};
use super::garch::VarianceParams;
use super::spec::{Distribution, MeanModel, VolModel, VolatilityModelSpec};

/// Keeps the persistence strictly inside the unit interval.
pub const STATIONARITY_MARGIN: f64 = 1e-4;
const P_MAX: f64 = 1.0 - STATIONARITY_MARGIN;

/// Starting values of the search.
pub const ALPHA_0: f64 = 0.10;
pub const BETA_0: f64 = 0.85;
pub const NU_0: f64 = 8.0;

/// The estimated name → value mapping of a fitted model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub mu: Option<f64>,
    pub omega: f64,
    pub alpha: f64,
    pub gamma: Option<f64>,
    pub beta: f64,
    pub nu: Option<f64>,
    pub lambda: Option<f64>,
}

impl Parameters {
    pub fn mean(&self) -> f64 {
        self.mu.unwrap_or(0.0)
    }

    pub fn variance(&self) -> VarianceParams {
        VarianceParams {
            omega: self.omega,
            alpha: self.alpha,
            gamma: self.gamma.unwrap_or(0.0),
            beta: self.beta,
        }
    }

    pub fn innovation(&self, dist: Distribution) -> Innovation {
        Innovation::new(dist, self.nu, self.lambda)
    }

    /// Present parameters in display order.
    pub fn named(&self) -> Vec<(&'static str, f64)> {
        let mut out = Vec::with_capacity(7);
        if let Some(mu) = self.mu {
            out.push(("mu", mu));
        }
        out.push(("omega", self.omega));
        out.push(("alpha[1]", self.alpha));
        if let Some(gamma) = self.gamma {
            out.push(("gamma[1]", gamma));
        }
        out.push(("beta[1]", self.beta));
        if let Some(nu) = self.nu {
            out.push(("nu", nu));
        }
        if let Some(lambda) = self.lambda {
            out.push(("lambda", lambda));
        }
        out
    }

    /// Number of estimated parameters k.
    pub fn count(&self) -> usize {
        self.named().len()
    }
}

/// Maps between θ ∈ ℝᵏ and [`Parameters`] for one spec.
#[derive(Debug, Clone, Copy)]
pub struct ParamLayout {
    spec: VolatilityModelSpec,
}

impl ParamLayout {
    pub fn new(spec: VolatilityModelSpec) -> Self {
        Self { spec }
    }

    pub fn dim(&self) -> usize {
        self.spec.n_params()
    }

    fn has_mu(&self) -> bool {
        self.spec.mean == MeanModel::Constant
    }

    /// Heuristic starting point from the sample mean and variance.
    pub fn initial(&self, sample_mean: f64, sample_var: f64) -> Parameters {
        let var = sample_var.max(1e-12);
        let (omega, alpha, gamma, beta) = match self.spec.model {
            VolModel::Standard => (var * (1.0 - ALPHA_0 - BETA_0), ALPHA_0, None, BETA_0),
            VolModel::Threshold => {
                let (a, g) = (0.08, 0.04);
                (var * (1.0 - a - 0.5 * g - BETA_0), a, Some(g), BETA_0)
            }
            VolModel::Exponential => (var.ln() * (1.0 - BETA_0), ALPHA_0, Some(0.0), BETA_0),
        };
        let (nu, lambda) = match self.spec.distribution {
            Distribution::Normal => (None, None),
            Distribution::StudentT => (Some(NU_0), None),
            Distribution::SkewedStudentT => (Some(NU_0), Some(0.0)),
        };
        Parameters {
            mu: self.has_mu().then_some(sample_mean),
            omega,
            alpha,
            gamma,
            beta,
            nu,
            lambda,
        }
    }

    pub fn to_unconstrained(&self, p: &Parameters) -> Vec<f64> {
        let mut theta = Vec::with_capacity(self.dim());
        if self.has_mu() {
            theta.push(p.mean());
        }
        let gamma = p.gamma.unwrap_or(0.0);
        match self.spec.model {
            VolModel::Standard => {
                let persistence = (p.alpha + p.beta).max(1e-8);
                theta.push(p.omega.ln());
                theta.push(logit(persistence / P_MAX));
                theta.push(logit(p.alpha / persistence));
            }
            VolModel::Threshold => {
                let persistence = (p.alpha + 0.5 * gamma + p.beta).max(1e-8);
                let s_a = (p.alpha / persistence).max(1e-8);
                let s_g = (0.5 * gamma / persistence).max(1e-8);
                let s_b = (p.beta / persistence).max(1e-8);
                theta.push(p.omega.ln());
                theta.push(logit(persistence / P_MAX));
                theta.push((s_a / s_b).ln());
                theta.push((s_g / s_b).ln());
            }
            VolModel::Exponential => {
                theta.push(p.omega);
                theta.push(p.alpha.max(1e-8).ln());
                theta.push(gamma);
                theta.push(logit(p.beta / P_MAX));
            }
        }
        if let Some(nu) = p.nu {
            theta.push(logit((nu - NU_MIN) / (NU_MAX - NU_MIN)));
        }
        if let Some(lambda) = p.lambda {
            theta.push((lambda / LAMBDA_MAX).clamp(-1.0 + 1e-12, 1.0 - 1e-12).atanh());
        }
        theta
    }

    pub fn from_unconstrained(&self, theta: &[f64]) -> Parameters {
        let mut it = theta.iter().copied();
        let mut next = || it.next().unwrap_or(0.0);

        let mu = self.has_mu().then(&mut next);
        let (omega, alpha, gamma, beta) = match self.spec.model {
            VolModel::Standard => {
                let omega = next().exp();
                let persistence = P_MAX * sigmoid(next());
                let share = sigmoid(next());
                (omega, persistence * share, None, persistence * (1.0 - share))
            }
            VolModel::Threshold => {
                let omega = next().exp();
                let persistence = P_MAX * sigmoid(next());
                let (xa, xg) = (next(), next());
                let m = xa.max(xg).max(0.0);
                let (wa, wg, wb) = ((xa - m).exp(), (xg - m).exp(), (-m).exp());
                let total = wa + wg + wb;
                (
                    omega,
                    persistence * wa / total,
                    Some(2.0 * persistence * wg / total),
                    persistence * wb / total,
                )
            }
            VolModel::Exponential => {
                let omega = next();
                let alpha = next().exp();
                let gamma = next();
                let beta = P_MAX * sigmoid(next());
                (omega, alpha, Some(gamma), beta)
            }
        };
        let nu = match self.spec.distribution {
            Distribution::Normal => None,
            _ => Some(NU_MIN + (NU_MAX - NU_MIN) * sigmoid(next())),
        };
        let lambda = match self.spec.distribution {
            Distribution::SkewedStudentT => Some(LAMBDA_MAX * next().tanh()),
            _ => None,
        };
        Parameters { mu, omega, alpha, gamma, beta, nu, lambda }
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-12, 1.0 - 1e-12);
    (p / (1.0 - p)).ln()
}
