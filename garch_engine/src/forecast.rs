/// forecast.rs — Multi-step conditional variance forecasts
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
///   One step (all variants, deterministic):
///       σ²_{T+1} = g(ε_T, σ²_T)             g = variance recursion
///
///   GARCH, h > 1 (E[ε²_{T+h−1}] = σ²_{T+h−1}), in closed form:
///       σ²_{T+h} = σ²_∞ + (α+β)^(h−1) · (σ²_{T+1} − σ²_∞)
///       σ²_∞ = ω / (1 − α − β)
///
///   EGARCH and GJR, h > 1 (no closed form used):
///       for each path j:  ε_{T+k} = σ_{T+k} · z_k,   z_k ~ fitted law
///                         σ²_{T+k+1} = g(ε_{T+k}, σ²_{T+k})
///       σ̂²_{T+h} = mean_j σ²_{T+h}^{(j)}
///
///   Paths are split into chunks of CHUNK_PATHS; chunk c draws from
///   StdRng seeded with mix(seed, c) and chunk sums are reduced in chunk
///   order, so the result does not depend on thread scheduling.
/// ─────────────────────────────────────────────────────────────────────────
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{EngineConfig, DEFAULT_SIMULATION_PATHS, DEFAULT_SIMULATION_SEED, MAX_HORIZON};
use crate::error::{VolError, VolResult};
use crate::estimator::FittedModel;
use crate::models::VolModel;

const CHUNK_PATHS: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForecastMethod {
    Analytic,
    Simulation { paths: usize, seed: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub horizon: usize,
    /// σ²_{T+1} ..= σ²_{T+h}
    pub variance: Vec<f64>,
    pub volatility: Vec<f64>,
    pub method: ForecastMethod,
}

impl ForecastResult {
    fn new(variance: Vec<f64>, method: ForecastMethod) -> Self {
        Self {
            horizon: variance.len(),
            volatility: variance.iter().map(|v| v.sqrt()).collect(),
            variance,
            method,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ForecastGenerator {
    pub paths: usize,
    pub seed: u64,
}

impl Default for ForecastGenerator {
    fn default() -> Self {
        Self { paths: DEFAULT_SIMULATION_PATHS, seed: DEFAULT_SIMULATION_SEED }
    }
}

impl From<&EngineConfig> for ForecastGenerator {
    fn from(cfg: &EngineConfig) -> Self {
        Self { paths: cfg.simulation_paths, seed: cfg.simulation_seed }
    }
}

impl ForecastGenerator {
    pub fn forecast(&self, model: &FittedModel, horizon: usize) -> VolResult<ForecastResult> {
        if !(1..=MAX_HORIZON).contains(&horizon) {
            return Err(VolError::InvalidHorizon { horizon, max: MAX_HORIZON });
        }
        model.ensure_converged()?;
        self.variance_path(model, horizon)
    }

    /// Forecast without the horizon cap.
    fn variance_path(&self, model: &FittedModel, horizon: usize) -> VolResult<ForecastResult> {
        let (Some(&eps_t), Some(&sigma2_t)) =
            (model.residuals().last(), model.conditional_variance().last())
        else {
            return Err(VolError::ModelNotFitted(format!(
                "{} has no filtered variance path",
                model.spec()
            )));
        };
        let spec = model.spec();
        let vp = model.params().variance();
        let sigma2_next = vp.step(spec.model, eps_t, sigma2_t);

        let result = match spec.model {
            VolModel::Standard => {
                let path = (1..=horizon).map(|h| vp.forecast_variance(sigma2_next, h)).collect();
                ForecastResult::new(path, ForecastMethod::Analytic)
            }
            VolModel::Exponential | VolModel::Threshold => {
                let mut path = vec![sigma2_next];
                if horizon > 1 {
                    path.extend(self.simulate(model, sigma2_next, horizon - 1)?);
                }
                ForecastResult::new(
                    path,
                    ForecastMethod::Simulation { paths: self.paths, seed: self.seed },
                )
            }
        };

        if let Some(bad) = result.variance.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
            return Err(VolError::NumericalInstability(format!(
                "forecast variance {bad} for {spec}"
            )));
        }
        debug!("{spec}: {}-step forecast via {:?}", horizon, result.method);
        Ok(result)
    }

    /// Mean σ² over simulated paths for steps 2 ..= steps+1.
    fn simulate(&self, model: &FittedModel, sigma2_next: f64, steps: usize) -> VolResult<Vec<f64>> {
        let spec = model.spec();
        let vp = model.params().variance();
        let sampler = model.params().innovation(spec.distribution).sampler()?;
        let paths = self.paths.max(1);
        let n_chunks = paths.div_ceil(CHUNK_PATHS);

        let chunk_sums: Vec<Vec<f64>> = (0..n_chunks)
            .into_par_iter()
            .map(|chunk| {
                let mut rng = StdRng::seed_from_u64(chunk_seed(self.seed, chunk));
                let n = CHUNK_PATHS.min(paths - chunk * CHUNK_PATHS);
                let mut sums = vec![0.0; steps];
                for _ in 0..n {
                    let mut s2 = sigma2_next;
                    for slot in sums.iter_mut() {
                        let eps = s2.sqrt() * sampler.draw(&mut rng);
                        s2 = vp.step(spec.model, eps, s2);
                        *slot += s2;
                    }
                }
                sums
            })
            .collect();

        let mut mean = vec![0.0; steps];
        for sums in &chunk_sums {
            for (m, s) in mean.iter_mut().zip(sums) {
                *m += s;
            }
        }
        mean.iter_mut().for_each(|m| *m /= paths as f64);
        Ok(mean)
    }
}

fn chunk_seed(seed: u64, chunk: usize) -> u64 {
    seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ (chunk as u64).wrapping_add(1)
}
