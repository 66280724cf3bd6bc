/// config.rs — Centralised configuration loaded from .env
///
/// All parameters consumed by the volatility engine are defined here.
/// Loading happens once at startup; every stage borrows &EngineConfig.
use anyhow::Result;
use std::env;
use std::time::Duration;

use crate::models::{Distribution, VolModel};

/// Longest forecast horizon the engine will produce.
pub const MAX_HORIZON: usize = 30;
/// Monte Carlo paths for EGARCH / GJR forecasts.
pub const DEFAULT_SIMULATION_PATHS: usize = 20_000;
pub const DEFAULT_SIMULATION_SEED: u64 = 42;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    // ── Model selection ──────────────────────────────────────────────
    pub model: VolModel,
    pub distribution: Distribution,
    /// Forecast horizon in periods (1 ..= MAX_HORIZON)
    pub forecast_horizon: usize,

    // ── Data cleaning ────────────────────────────────────────────────
    /// Drop |r_t| at or above this value
    pub outlier_threshold: f64,
    /// Minimum number of returns after cleaning
    pub min_observations: usize,

    // ── Diagnostics ──────────────────────────────────────────────────
    pub ljung_box_lags: usize,
    pub arch_lm_lags: usize,
    /// Lags of the squared-residual ACF
    pub acf_lags: usize,

    // ── Forecast simulation ──────────────────────────────────────────
    pub simulation_paths: usize,
    pub simulation_seed: u64,

    // ── Optimizer ────────────────────────────────────────────────────
    pub max_iterations: usize,
    /// Relative log-likelihood improvement that counts as converged
    pub tolerance: f64,
    /// Wall-clock budget per estimation (None = unbounded)
    pub fit_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: VolModel::Standard,
            distribution: Distribution::Normal,
            forecast_horizon: 5,
            outlier_threshold: 0.2,
            min_observations: 100,
            ljung_box_lags: 10,
            arch_lm_lags: 5,
            acf_lags: 20,
            simulation_paths: DEFAULT_SIMULATION_PATHS,
            simulation_seed: DEFAULT_SIMULATION_SEED,
            max_iterations: 1000,
            tolerance: 1e-9,
            fit_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables (after dotenv).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // ignore missing .env

        let d = Self::default();

        let model = match env::var("VOL_MODEL") {
            Ok(v) => v.parse::<VolModel>().map_err(|e| anyhow::anyhow!("Config key VOL_MODEL: {e}"))?,
            Err(_) => d.model,
        };
        let distribution = match env::var("VOL_DIST") {
            Ok(v) => v
                .parse::<Distribution>()
                .map_err(|e| anyhow::anyhow!("Config key VOL_DIST: {e}"))?,
            Err(_) => d.distribution,
        };
        let fit_timeout = match env::var("FIT_TIMEOUT_MS") {
            Ok(v) => Some(Duration::from_millis(
                v.parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("Config key FIT_TIMEOUT_MS: {e}"))?,
            )),
            Err(_) => None,
        };

        let cfg = Self {
            model,
            distribution,
            forecast_horizon: parse_env("FORECAST_HORIZON", d.forecast_horizon)?,

            outlier_threshold: parse_env("OUTLIER_THRESHOLD", d.outlier_threshold)?,
            min_observations:  parse_env("MIN_OBSERVATIONS",  d.min_observations)?,

            ljung_box_lags: parse_env("LJUNG_BOX_LAGS", d.ljung_box_lags)?,
            arch_lm_lags:   parse_env("ARCH_LM_LAGS",   d.arch_lm_lags)?,
            acf_lags:       parse_env("ACF_LAGS",       d.acf_lags)?,

            simulation_paths: parse_env("SIMULATION_PATHS", d.simulation_paths)?,
            simulation_seed:  parse_env("SIMULATION_SEED",  d.simulation_seed)?,

            max_iterations: parse_env("MAX_ITERATIONS", d.max_iterations)?,
            tolerance:      parse_env("TOLERANCE",      d.tolerance)?,
            fit_timeout,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings no stage can work with.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_HORIZON).contains(&self.forecast_horizon) {
            anyhow::bail!(
                "FORECAST_HORIZON must be in 1..={MAX_HORIZON}, got {}",
                self.forecast_horizon
            );
        }
        if !(self.outlier_threshold > 0.0) {
            anyhow::bail!("OUTLIER_THRESHOLD must be positive, got {}", self.outlier_threshold);
        }
        if self.min_observations <= self.ljung_box_lags.max(self.arch_lm_lags).max(self.acf_lags) {
            anyhow::bail!("MIN_OBSERVATIONS must exceed every diagnostic lag");
        }
        if self.ljung_box_lags == 0 || self.arch_lm_lags == 0 || self.acf_lags == 0 {
            anyhow::bail!("diagnostic lags must be positive");
        }
        if self.simulation_paths == 0 || self.max_iterations == 0 {
            anyhow::bail!("SIMULATION_PATHS and MAX_ITERATIONS must be positive");
        }
        if !(self.tolerance > 0.0) {
            anyhow::bail!("TOLERANCE must be positive, got {}", self.tolerance);
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Config key {key}: {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.ljung_box_lags, 10);
        assert_eq!(cfg.arch_lm_lags, 5);
        assert_eq!(cfg.min_observations, 100);
    }

    #[test]
    fn horizon_outside_range_is_rejected() {
        let cfg = EngineConfig { forecast_horizon: 45, ..EngineConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_env_falls_back_to_default() {
        let v: usize = parse_env("GARCH_ENGINE_TEST_UNSET_KEY", 7).unwrap();
        assert_eq!(v, 7);
    }
}
