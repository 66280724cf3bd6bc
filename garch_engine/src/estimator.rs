/// estimator.rs — Maximum-likelihood estimation of GARCH-family models
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
///   ε_t = r_t − μ,   z_t = ε_t / σ_t
///
///   ln L(θ) = Σ_t [ ln f(z_t) − ½ ln σ²_t ]
///
///   θ̂ = argmin −ln L(θ) / n     (BFGS over the unconstrained encoding)
///
///   Information criteria with k estimated parameters:
///       AIC = −2 ln L + 2k
///       BIC = −2 ln L + k ln n
///
///   A fit is accepted only when the optimizer stopped at a stationary
///   point and the finite-difference Hessian of −ln L/n there is positive
///   definite up to noise.
/// ─────────────────────────────────────────────────────────────────────────
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::data::ReturnSeries;
use crate::error::{VolError, VolResult};
use crate::models::garch::garch_filter;
use crate::models::{ParamLayout, Parameters, VolatilityModelSpec};
use crate::optimizer::{self, CancelToken, OptimizerOptions, Termination};

/// Smallest eigenvalue of the Hessian tolerated, relative to the largest.
const HESSIAN_REL_TOL: f64 = 1e-5;
/// A stalled line search is only accepted this close to a stationary point.
const STALL_GRAD_TOL: f64 = 1e-3;
/// Below this sample variance the likelihood is unbounded (σ² → 0).
const MIN_SAMPLE_VARIANCE: f64 = 1e-14;

/// Knobs of a single estimation call.
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Wall-clock budget; the optimizer gives up once it is spent.
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
    pub min_observations: usize,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-9,
            timeout: None,
            cancel: None,
            min_observations: 100,
        }
    }
}

impl From<&EngineConfig> for FitOptions {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            tolerance: cfg.tolerance,
            timeout: cfg.fit_timeout,
            cancel: None,
            min_observations: cfg.min_observations,
        }
    }
}

/// Why an estimation did not produce a usable model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FitFailure {
    ConvergenceFailure(String),
    NumericalInstability(String),
}

impl FitFailure {
    pub fn into_error(self) -> VolError {
        match self {
            FitFailure::ConvergenceFailure(m) => VolError::ConvergenceFailure(m),
            FitFailure::NumericalInstability(m) => VolError::NumericalInstability(m),
        }
    }
}

impl std::fmt::Display for FitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitFailure::ConvergenceFailure(m) => write!(f, "convergence failure: {m}"),
            FitFailure::NumericalInstability(m) => write!(f, "numerical instability: {m}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    Converged,
    Failed(FitFailure),
}

/// Outcome of one estimation.  Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub(crate) spec: VolatilityModelSpec,
    pub(crate) params: Parameters,
    pub(crate) log_likelihood: f64,
    pub(crate) residuals: Vec<f64>,
    pub(crate) conditional_variance: Vec<f64>,
    pub(crate) n_obs: usize,
    pub(crate) iterations: usize,
    pub(crate) status: ConvergenceStatus,
}

impl FittedModel {
    /// Filter `returns` under fixed parameters and assemble the model.
    pub(crate) fn from_parts(
        spec: VolatilityModelSpec,
        params: Parameters,
        returns: &[f64],
        status: ConvergenceStatus,
    ) -> VolResult<Self> {
        let residuals: Vec<f64> = returns.iter().map(|r| r - params.mean()).collect();
        let conditional_variance = garch_filter(spec.model, &params.variance(), &residuals)?;
        let log_likelihood = log_likelihood_of(&spec, &params, &residuals, &conditional_variance);
        Ok(Self {
            spec,
            params,
            log_likelihood,
            n_obs: residuals.len(),
            residuals,
            conditional_variance,
            iterations: 0,
            status,
        })
    }

    pub fn spec(&self) -> &VolatilityModelSpec {
        &self.spec
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    pub fn conditional_variance(&self) -> &[f64] {
        &self.conditional_variance
    }

    pub fn conditional_volatility(&self) -> Vec<f64> {
        self.conditional_variance.iter().map(|v| v.sqrt()).collect()
    }

    /// z_t = ε_t / σ_t; empty when the variance path is missing.
    pub fn standardized_residuals(&self) -> Vec<f64> {
        self.residuals
            .iter()
            .zip(&self.conditional_variance)
            .map(|(e, v)| e / v.sqrt())
            .collect()
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn status(&self) -> &ConvergenceStatus {
        &self.status
    }

    pub fn is_converged(&self) -> bool {
        self.status == ConvergenceStatus::Converged
    }

    /// `ModelNotFitted` unless the estimation converged.
    pub fn ensure_converged(&self) -> VolResult<()> {
        match &self.status {
            ConvergenceStatus::Converged => Ok(()),
            ConvergenceStatus::Failed(reason) => {
                Err(VolError::ModelNotFitted(format!("{}: {reason}", self.spec)))
            }
        }
    }

    pub fn n_params(&self) -> usize {
        self.params.count()
    }

    pub fn aic(&self) -> f64 {
        -2.0 * self.log_likelihood + 2.0 * self.n_params() as f64
    }

    pub fn bic(&self) -> f64 {
        -2.0 * self.log_likelihood + self.n_params() as f64 * (self.n_obs as f64).ln()
    }

    /// ω/(1 − P) for GARCH and GJR; `None` for EGARCH.
    pub fn unconditional_variance(&self) -> Option<f64> {
        self.params.variance().unconditional_variance(self.spec.model)
    }
}

/// Anything that turns a return series and a spec into a fitted model.
pub trait Estimator: Sync {
    fn fit(&self, series: &ReturnSeries, spec: &VolatilityModelSpec) -> VolResult<FittedModel>;
}

/// Quasi-maximum-likelihood estimator over the GARCH family.
#[derive(Debug, Clone, Default)]
pub struct GarchEstimator {
    pub options: FitOptions,
}

impl GarchEstimator {
    pub fn new(options: FitOptions) -> Self {
        Self { options }
    }
}

impl Estimator for GarchEstimator {
    fn fit(&self, series: &ReturnSeries, spec: &VolatilityModelSpec) -> VolResult<FittedModel> {
        spec.validate()?;
        let returns = series.returns();
        let n = returns.len();
        if n < self.options.min_observations {
            return Err(VolError::InsufficientData {
                required: self.options.min_observations,
                actual: n,
            });
        }
        if returns.iter().any(|r| !r.is_finite()) {
            return Err(VolError::InvalidSpec("return series contains non-finite values".into()));
        }

        let started = Instant::now();
        let layout = ParamLayout::new(*spec);
        let mean = returns.iter().sum::<f64>() / n as f64;
        let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n as f64;
        let start = layout.initial(mean, var);
        if !(var >= MIN_SAMPLE_VARIANCE) {
            let failure = FitFailure::NumericalInstability(format!(
                "sample variance {var:.3e} is below {MIN_SAMPLE_VARIANCE:.0e}; the series is degenerate"
            ));
            warn!("{spec}: {failure}");
            return Ok(failed(*spec, start, n, 0, failure));
        }
        let theta0 = layout.to_unconstrained(&start);

        let objective = |theta: &[f64]| {
            let params = layout.from_unconstrained(theta);
            average_nll(spec, &params, returns)
        };

        if !objective(theta0.as_slice()).is_finite() {
            let failure = FitFailure::NumericalInstability(
                "log-likelihood is not finite at the starting point".into(),
            );
            warn!("{spec}: {failure}");
            return Ok(failed(*spec, start, n, 0, failure));
        }

        let opts = OptimizerOptions {
            max_iterations: self.options.max_iterations,
            tolerance: self.options.tolerance,
            deadline: self.options.timeout.map(|t| started + t),
            cancel: self.options.cancel.clone(),
            ..OptimizerOptions::default()
        };
        let outcome = optimizer::minimize(objective, theta0, &opts);
        let params = layout.from_unconstrained(&outcome.x);
        debug!(
            "{spec}: {:?} after {} iterations ({} evaluations), |∇|∞={:.2e}",
            outcome.termination, outcome.iterations, outcome.evaluations, outcome.grad_norm
        );

        let stop_failure = match outcome.termination {
            Termination::Converged => None,
            Termination::Stalled if outcome.grad_norm <= STALL_GRAD_TOL => None,
            Termination::Stalled => Some(format!(
                "line search stalled away from a stationary point (|∇|∞={:.3e})",
                outcome.grad_norm
            )),
            Termination::MaxIterations => Some(format!(
                "iteration limit {} reached",
                self.options.max_iterations
            )),
            Termination::Timeout => Some(format!(
                "timed out after {:?}",
                started.elapsed()
            )),
            Termination::Cancelled => Some("estimation cancelled".to_string()),
        };
        if let Some(reason) = stop_failure {
            let failure = FitFailure::ConvergenceFailure(reason);
            warn!("{spec}: {failure}");
            return Ok(failed(*spec, params, n, outcome.iterations, failure));
        }

        // Second-order check at the optimum.
        let hess = optimizer::hessian(objective, &outcome.x);
        let (pd, min_eig) = optimizer::is_positive_definite(&hess, HESSIAN_REL_TOL);
        if !pd {
            let failure = FitFailure::ConvergenceFailure(format!(
                "Hessian at the optimum is not positive definite (min eigenvalue {min_eig:.3e}, {:?})",
                outcome.termination
            ));
            warn!("{spec}: {failure}");
            return Ok(failed(*spec, params, n, outcome.iterations, failure));
        }

        let mut model =
            match FittedModel::from_parts(*spec, params, returns, ConvergenceStatus::Converged) {
                Ok(m) => m,
                Err(e) => {
                    let failure = FitFailure::NumericalInstability(e.to_string());
                    warn!("{spec}: {failure}");
                    return Ok(failed(*spec, params, n, outcome.iterations, failure));
                }
            };
        model.iterations = outcome.iterations;

        info!(
            "{spec}: converged in {} iterations, logL={:.4}, AIC={:.4}, BIC={:.4} ({:.0?})",
            model.iterations,
            model.log_likelihood,
            model.aic(),
            model.bic(),
            started.elapsed()
        );
        Ok(model)
    }
}

fn failed(
    spec: VolatilityModelSpec,
    params: Parameters,
    n_obs: usize,
    iterations: usize,
    failure: FitFailure,
) -> FittedModel {
    FittedModel {
        spec,
        params,
        log_likelihood: f64::NAN,
        residuals: Vec::new(),
        conditional_variance: Vec::new(),
        n_obs,
        iterations,
        status: ConvergenceStatus::Failed(failure),
    }
}

fn log_likelihood_of(
    spec: &VolatilityModelSpec,
    params: &Parameters,
    residuals: &[f64],
    variances: &[f64],
) -> f64 {
    let density = params.innovation(spec.distribution).log_density();
    residuals
        .iter()
        .zip(variances)
        .map(|(e, s2)| density.eval(e / s2.sqrt()) - 0.5 * s2.ln())
        .sum()
}

/// −ln L / n evaluated in one streaming pass; +∞ when the recursion
/// leaves the positive reals.
pub fn average_nll(spec: &VolatilityModelSpec, params: &Parameters, returns: &[f64]) -> f64 {
    let n = returns.len();
    if n == 0 {
        return f64::INFINITY;
    }
    let mu = params.mean();
    let vp = params.variance();
    let density = params.innovation(spec.distribution).log_density();

    let mut sigma2 = returns.iter().map(|r| (r - mu) * (r - mu)).sum::<f64>() / n as f64;
    let mut eps_prev = 0.0;
    let mut ll = 0.0;
    for (t, r) in returns.iter().enumerate() {
        let eps = r - mu;
        if t > 0 {
            sigma2 = vp.step(spec.model, eps_prev, sigma2);
        }
        if !(sigma2.is_finite() && sigma2 > 0.0) {
            return f64::INFINITY;
        }
        ll += density.eval(eps / sigma2.sqrt()) - 0.5 * sigma2.ln();
        eps_prev = eps;
    }
    let nll = -ll / n as f64;
    if nll.is_finite() { nll } else { f64::INFINITY }
}

/// ln L for given parameters over a return series.
pub fn log_likelihood(
    spec: &VolatilityModelSpec,
    params: &Parameters,
    returns: &[f64],
) -> VolResult<f64> {
    let residuals: Vec<f64> = returns.iter().map(|r| r - params.mean()).collect();
    let variances = garch_filter(spec.model, &params.variance(), &residuals)?;
    Ok(log_likelihood_of(spec, params, &residuals, &variances))
}
