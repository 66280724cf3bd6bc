/// diagnostics.rs — Residual checks for a fitted volatility model
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
///   Standardized residuals z_t = ε_t / σ_t,  t = 1..n
///
///   Sample autocorrelation (lag k):
///       ρ_k = Σ_{t>k} (x_t − x̄)(x_{t−k} − x̄) / Σ_t (x_t − x̄)²
///
///   LJUNG-BOX (serial correlation left in z_t, L lags):
///       Q = n (n+2) Σ_{k=1..L} ρ_k² / (n − k)   ~ χ²(L)
///
///   ARCH-LM (Engle 1982, m lags):
///       z²_t = c + Σ_{j=1..m} b_j z²_{t−j} + u_t   (OLS, n − m rows)
///       LM = (n − m) · R²                         ~ χ²(m)
///
///   Q-Q: sorted z_(i) against Φ⁻¹((i − 0.5)/n)
///
///   None of the tests is fatal; the report is always complete.
/// ─────────────────────────────────────────────────────────────────────────
use std::fmt;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use tracing::debug;

use crate::config::EngineConfig;
use crate::data::ReturnSeries;
use crate::error::{VolError, VolResult};
use crate::estimator::FittedModel;

const CONFIDENCE: f64 = 0.95;

/// Outcome of one χ² test.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub statistic: f64,
    pub p_value: f64,
    pub lags: usize,
    /// χ²(lags) quantile at 95%
    pub critical_value: f64,
}

impl TestResult {
    fn chi_squared(statistic: f64, lags: usize) -> VolResult<Self> {
        let chi = ChiSquared::new(lags as f64)
            .map_err(|e| VolError::InvalidSpec(format!("χ²({lags}): {e}")))?;
        Ok(Self {
            statistic,
            p_value: chi.sf(statistic),
            lags,
            critical_value: chi.inverse_cdf(CONFIDENCE),
        })
    }

    /// Null hypothesis rejected at 5%.
    pub fn rejects(&self) -> bool {
        self.p_value < 1.0 - CONFIDENCE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub ljung_box: TestResult,
    /// ρ_1..ρ_L of z_t, the inputs of the Ljung-Box statistic
    pub residual_acf: Vec<f64>,
    pub arch_lm: TestResult,
    /// (theoretical normal quantile, sample quantile)
    pub qq: Vec<(f64, f64)>,
    /// ρ_1..ρ_K of z²_t
    pub squared_acf: Vec<f64>,
    pub n_residuals: usize,
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = |t: &TestResult, yes: &str, no: &str| {
            if t.rejects() { yes.to_string() } else { no.to_string() }
        };
        writeln!(
            f,
            "  Ljung-Box({:>2})  : Q={:.4}  p={:.4}  crit={:.4}  {}",
            self.ljung_box.lags,
            self.ljung_box.statistic,
            self.ljung_box.p_value,
            self.ljung_box.critical_value,
            verdict(&self.ljung_box, "serial correlation remains", "no serial correlation")
        )?;
        writeln!(
            f,
            "  ARCH-LM({:>2})    : LM={:.4} p={:.4}  crit={:.4}  {}",
            self.arch_lm.lags,
            self.arch_lm.statistic,
            self.arch_lm.p_value,
            self.arch_lm.critical_value,
            verdict(&self.arch_lm, "ARCH effects remain", "no ARCH effects")
        )?;
        write!(f, "  Residuals      : {}", self.n_residuals)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticEvaluator {
    pub ljung_box_lags: usize,
    pub arch_lm_lags: usize,
    pub acf_lags: usize,
}

impl Default for DiagnosticEvaluator {
    fn default() -> Self {
        Self { ljung_box_lags: 10, arch_lm_lags: 5, acf_lags: 20 }
    }
}

impl From<&EngineConfig> for DiagnosticEvaluator {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            ljung_box_lags: cfg.ljung_box_lags,
            arch_lm_lags: cfg.arch_lm_lags,
            acf_lags: cfg.acf_lags,
        }
    }
}

impl DiagnosticEvaluator {
    pub fn evaluate(&self, model: &FittedModel, series: &ReturnSeries) -> VolResult<DiagnosticReport> {
        model.ensure_converged()?;
        if series.len() != model.n_obs() || model.conditional_variance().len() != series.len() {
            return Err(VolError::InvalidSpec(format!(
                "series has {} observations, model was fitted on {}",
                series.len(),
                model.n_obs()
            )));
        }
        let z = model.standardized_residuals();
        let n = z.len();
        let max_lag = self.ljung_box_lags.max(self.arch_lm_lags).max(self.acf_lags);
        if n <= max_lag + 1 {
            return Err(VolError::InsufficientData { required: max_lag + 2, actual: n });
        }

        let (ljung_box, residual_acf) = ljung_box(&z, self.ljung_box_lags)?;
        let z2: Vec<f64> = z.iter().map(|v| v * v).collect();
        let arch_lm = arch_lm(&z2, self.arch_lm_lags)?;
        let squared_acf = autocorrelation(&z2, self.acf_lags);
        let qq = qq_pairs(&z)?;

        debug!(
            "{}: Ljung-Box p={:.4}, ARCH-LM p={:.4}",
            model.spec(),
            ljung_box.p_value,
            arch_lm.p_value
        );
        Ok(DiagnosticReport {
            ljung_box,
            residual_acf,
            arch_lm,
            qq,
            squared_acf,
            n_residuals: n,
        })
    }
}

/// ρ_1..ρ_max_lag.  A constant series has zero autocorrelation.
pub fn autocorrelation(x: &[f64], max_lag: usize) -> Vec<f64> {
    let n = x.len();
    let mean = x.iter().sum::<f64>() / n.max(1) as f64;
    let denom: f64 = x.iter().map(|v| (v - mean).powi(2)).sum();
    (1..=max_lag)
        .map(|k| {
            if denom <= f64::MIN_POSITIVE || k >= n {
                return 0.0;
            }
            let num: f64 = (k..n).map(|t| (x[t] - mean) * (x[t - k] - mean)).sum();
            num / denom
        })
        .collect()
}

/// Q statistic from autocorrelations ρ_1..ρ_L of a series of length n.
pub fn ljung_box_statistic(acf: &[f64], n: usize) -> f64 {
    let n = n as f64;
    let tail: f64 = acf
        .iter()
        .enumerate()
        .map(|(i, r)| r * r / (n - (i + 1) as f64))
        .sum();
    n * (n + 2.0) * tail
}

pub fn ljung_box(z: &[f64], lags: usize) -> VolResult<(TestResult, Vec<f64>)> {
    let acf = autocorrelation(z, lags);
    let q = ljung_box_statistic(&acf, z.len());
    Ok((TestResult::chi_squared(q, lags)?, acf))
}

/// Engle's LM test on an already-squared series.
pub fn arch_lm(x: &[f64], lags: usize) -> VolResult<TestResult> {
    let rows = x.len().saturating_sub(lags);
    let cols = lags + 1;
    if rows <= cols {
        return Err(VolError::InsufficientData { required: 2 * lags + 2, actual: x.len() });
    }

    let design = DMatrix::from_fn(rows, cols, |r, j| if j == 0 { 1.0 } else { x[r + lags - j] });
    let y = DVector::from_column_slice(&x[lags..]);

    let xtx = design.transpose() * &design;
    let xty = design.transpose() * &y;
    let y_mean = y.mean();
    let tss: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();

    let r2 = match xtx.lu().solve(&xty) {
        Some(beta) if tss > 0.0 => {
            let rss = (&y - &design * beta).norm_squared();
            if rss.is_finite() { (1.0 - rss / tss).clamp(0.0, 1.0) } else { 0.0 }
        }
        _ => 0.0,
    };
    TestResult::chi_squared(rows as f64 * r2, lags)
}

pub fn qq_pairs(z: &[f64]) -> VolResult<Vec<(f64, f64)>> {
    let normal = Normal::new(0.0, 1.0).map_err(|e| VolError::InvalidSpec(e.to_string()))?;
    let mut sorted = z.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len() as f64;
    Ok(sorted
        .into_iter()
        .enumerate()
        .map(|(i, s)| (normal.inverse_cdf((i as f64 + 0.5) / n), s))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::{ConvergenceStatus, FitFailure};
    use crate::models::{MeanModel, Parameters, VolatilityModelSpec};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution as _, StandardNormal};

    fn noise(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let z: f64 = StandardNormal.sample(&mut rng);
                0.01 * z
            })
            .collect()
    }

    fn fitted(returns: &[f64]) -> (FittedModel, ReturnSeries) {
        let spec = VolatilityModelSpec::default().with_mean(MeanModel::Zero);
        let params = Parameters {
            mu: None,
            omega: 1e-5,
            alpha: 0.05,
            gamma: None,
            beta: 0.85,
            nu: None,
            lambda: None,
        };
        let model =
            FittedModel::from_parts(spec, params, returns, ConvergenceStatus::Converged).unwrap();
        (model, ReturnSeries::from_returns(returns.to_vec()).unwrap())
    }

    #[test]
    fn ljung_box_recomputes_from_reported_acf() {
        let r = noise(500, 3);
        let (model, series) = fitted(&r);
        let report = DiagnosticEvaluator::default().evaluate(&model, &series).unwrap();
        assert_eq!(report.residual_acf.len(), 10);
        let q = ljung_box_statistic(&report.residual_acf, report.n_residuals);
        assert_relative_eq!(q, report.ljung_box.statistic, max_relative = 1e-12);
        assert!(report.ljung_box.p_value > 0.0 && report.ljung_box.p_value <= 1.0);
        assert_relative_eq!(report.ljung_box.critical_value, 18.307, epsilon = 1e-2);
        assert_eq!(report.squared_acf.len(), 20);
        assert_eq!(report.qq.len(), 500);
        assert!(report.qq.windows(2).all(|w| w[0].0 < w[1].0 && w[0].1 <= w[1].1));
    }

    #[test]
    fn arch_lm_detects_volatility_clustering() {
        // Regime switching amplitude: large and small blocks.
        let r: Vec<f64> = noise(1000, 5)
            .into_iter()
            .enumerate()
            .map(|(i, v)| if (i / 50) % 2 == 0 { v * 4.0 } else { v })
            .collect();
        let z2: Vec<f64> = r.iter().map(|v| v * v / 1e-4).collect();
        let test = arch_lm(&z2, 5).unwrap();
        assert!(test.rejects(), "LM={} p={}", test.statistic, test.p_value);

        let calm: Vec<f64> = noise(1000, 6).iter().map(|v| v * v / 1e-4).collect();
        assert!(arch_lm(&calm, 5).unwrap().p_value > 0.001);
    }

    #[test]
    fn single_lag_r2_is_squared_correlation() {
        let x: Vec<f64> = noise(400, 11).iter().map(|v| v * v / 1e-4).collect();
        let (a, b) = (&x[1..], &x[..x.len() - 1]);
        let (ma, mb) = (a.iter().sum::<f64>() / a.len() as f64, b.iter().sum::<f64>() / b.len() as f64);
        let sab: f64 = a.iter().zip(b).map(|(p, q)| (p - ma) * (q - mb)).sum();
        let saa: f64 = a.iter().map(|p| (p - ma).powi(2)).sum();
        let sbb: f64 = b.iter().map(|q| (q - mb).powi(2)).sum();
        let r2 = sab * sab / (saa * sbb);

        let test = arch_lm(&x, 1).unwrap();
        assert_relative_eq!(test.statistic, a.len() as f64 * r2, max_relative = 1e-8);
    }

    #[test]
    fn degenerate_design_yields_zero_statistic() {
        let constant = vec![1.0; 200];
        let test = arch_lm(&constant, 5).unwrap();
        assert_eq!(test.statistic, 0.0);
        assert_relative_eq!(test.p_value, 1.0);
    }

    #[test]
    fn autocorrelation_of_alternating_series() {
        let x: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let acf = autocorrelation(&x, 2);
        assert_relative_eq!(acf[0], -0.99, epsilon = 1e-12);
        assert_relative_eq!(acf[1], 0.98, epsilon = 1e-12);
    }

    #[test]
    fn requires_converged_model_and_matching_series() {
        let r = noise(300, 8);
        let (mut model, series) = fitted(&r);
        let short = ReturnSeries::from_returns(r[..200].to_vec()).unwrap();
        assert!(matches!(
            DiagnosticEvaluator::default().evaluate(&model, &short),
            Err(VolError::InvalidSpec(_))
        ));
        model.status = ConvergenceStatus::Failed(FitFailure::NumericalInstability("σ²".into()));
        assert!(matches!(
            DiagnosticEvaluator::default().evaluate(&model, &series),
            Err(VolError::ModelNotFitted(_))
        ));
    }
}
