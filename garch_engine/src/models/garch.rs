/// models/garch.rs — GARCH-family variance recursions
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
///   Return innovation:  ε_t = r_t − μ,   z_t = ε_t / σ_t
///
///   GARCH(1,1): Bollerslev (1986)
///       σ²_t = ω + α · ε²_{t-1} + β · σ²_{t-1}
///
///   GJR-GARCH(1,1): Glosten, Jagannathan & Runkle (1993)
///       σ²_t = ω + (α + γ · 1[ε_{t-1} < 0]) · ε²_{t-1} + β · σ²_{t-1}
///
///   EGARCH(1,1): Nelson (1991)
///       ln σ²_t = ω + α · (|z_{t-1}| − E|z|) + γ · z_{t-1} + β · ln σ²_{t-1}
///       with E|z| = √(2/π)
///
///   Persistence P:
///       GARCH: α + β      GJR: α + γ/2 + β      EGARCH: β
///
///   Long-run (unconditional) variance, GARCH and GJR:
///       σ²_∞ = ω / (1 − P)
///
///   Multi-step forecast, GARCH (closed form):
///       σ²_{t+h} = σ²_∞ + (α+β)^(h-1) · (σ²_{t+1} − σ²_∞)
///
///   Start-up: σ²_1 = mean(ε²_t), the sample second moment of the residuals.
/// ─────────────────────────────────────────────────────────────────────────
use serde::{Deserialize, Serialize};

use super::spec::VolModel;
use crate::error::{VolError, VolResult};

/// E|z| for a standard normal z, used as the EGARCH centring constant.
pub const E_ABS_Z: f64 = 0.797_884_560_802_865_4;

/// Coefficients of the variance equation.  `gamma` is zero for GARCH.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarianceParams {
    /// ω: intercept (variance for GARCH/GJR, log-variance for EGARCH)
    pub omega: f64,
    /// α: ARCH (shock) coefficient
    pub alpha: f64,
    /// γ: asymmetry / leverage coefficient
    pub gamma: f64,
    /// β: GARCH (persistence) coefficient
    pub beta: f64,
}

impl VarianceParams {
    /// One-step update σ²_{t-1}, ε_{t-1} → σ²_t.
    #[inline]
    pub fn step(&self, model: VolModel, eps_prev: f64, sigma2_prev: f64) -> f64 {
        match model {
            VolModel::Standard => {
                self.omega + self.alpha * eps_prev * eps_prev + self.beta * sigma2_prev
            }
            VolModel::Threshold => {
                let shock = if eps_prev < 0.0 { self.alpha + self.gamma } else { self.alpha };
                self.omega + shock * eps_prev * eps_prev + self.beta * sigma2_prev
            }
            VolModel::Exponential => {
                let z = eps_prev / sigma2_prev.sqrt();
                let ln_sigma2 = self.omega
                    + self.alpha * (z.abs() - E_ABS_Z)
                    + self.gamma * z
                    + self.beta * sigma2_prev.ln();
                ln_sigma2.exp()
            }
        }
    }

    pub fn persistence(&self, model: VolModel) -> f64 {
        match model {
            VolModel::Standard => self.alpha + self.beta,
            VolModel::Threshold => self.alpha + 0.5 * self.gamma + self.beta,
            VolModel::Exponential => self.beta,
        }
    }

    /// σ²_∞ = ω / (1 − P) for the variance-level recursions; `None` for
    /// EGARCH or a non-stationary parameter set.
    pub fn unconditional_variance(&self, model: VolModel) -> Option<f64> {
        if model == VolModel::Exponential {
            return None;
        }
        let p = self.persistence(model);
        (p < 1.0).then(|| self.omega / (1.0 - p))
    }

    /// h-step ahead GARCH variance forecast given the one-step value.
    ///
    /// σ²_{t+h} = σ²_∞ + (α+β)^(h−1) · (σ²_{t+1} − σ²_∞)
    pub fn forecast_variance(&self, sigma2_next: f64, h: usize) -> f64 {
        let persistence = self.alpha + self.beta;
        let longrun = self.omega / (1.0 - persistence);
        longrun + persistence.powi(h as i32 - 1) * (sigma2_next - longrun)
    }
}

/// Sample second moment of the residuals, used to start the recursion.
pub fn backcast(residuals: &[f64]) -> f64 {
    residuals.iter().map(|e| e * e).sum::<f64>() / residuals.len().max(1) as f64
}

/// Run the recursion over a residual series, return all σ²_t values.
///
/// Fails with `NumericalInstability` at the first σ²_t that is not a
/// strictly positive finite number.
pub fn garch_filter(
    model: VolModel,
    params: &VarianceParams,
    residuals: &[f64],
) -> VolResult<Vec<f64>> {
    let mut variances = Vec::with_capacity(residuals.len());
    let mut sigma2 = backcast(residuals);
    let mut eps_prev = None;
    for (t, &eps) in residuals.iter().enumerate() {
        if let Some(prev) = eps_prev {
            sigma2 = params.step(model, prev, sigma2);
        }
        if !(sigma2.is_finite() && sigma2 > 0.0) {
            return Err(VolError::NumericalInstability(format!(
                "σ²_{t} = {sigma2} ({model}, ω={:.3e} α={:.4} γ={:.4} β={:.4})",
                params.omega, params.alpha, params.gamma, params.beta
            )));
        }
        variances.push(sigma2);
        eps_prev = Some(eps);
    }
    Ok(variances)
}
