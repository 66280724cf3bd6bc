/// data.rs — Price series → return series
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
///   Log return:        r_t = ln(P_t / P_{t-1})
///   Outlier guard:     drop r_t when |r_t| ≥ threshold   (default 0.20)
///   Minimum length:    n ≥ min_observations              (default 100)
///
///   Descriptive statistics (population moments as in scipy.stats):
///     skew  = m₃ / m₂^{3/2}
///     kurt  = m₄ / m₂² − 3        (excess)
///     JB    = n/6 · (skew² + kurt²/4),   p = 1 − F_{χ²(2)}(JB)
///     annual mean = 252 · r̄,   annual std = √252 · s,   Sharpe = ratio
/// ─────────────────────────────────────────────────────────────────────────
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{VolError, VolResult};

/// Trading periods per year used for annualisation.
pub const PERIODS_PER_YEAR: f64 = 252.0;

/// Candidate column names, in priority order.
const DATE_COLUMNS: [&str; 5] = ["Date", "date", "Datetime", "timestamp", "time"];
const PRICE_COLUMNS: [&str; 6] = ["Adj Close", "Adj_Close", "adj_close", "Close", "close", "price"];

/// One adjusted-close observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// Cleaned log-return series.  Each return carries the timestamp and the
/// closing price at the end of its period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnSeries {
    timestamps: Vec<DateTime<Utc>>,
    prices: Vec<f64>,
    returns: Vec<f64>,
}

impl ReturnSeries {
    /// Build a series, checking alignment, ordering and finiteness.
    pub fn new(
        timestamps: Vec<DateTime<Utc>>,
        prices: Vec<f64>,
        returns: Vec<f64>,
    ) -> VolResult<Self> {
        if timestamps.len() != returns.len() || prices.len() != returns.len() {
            return Err(VolError::InvalidSpec(format!(
                "misaligned series: {} timestamps, {} prices, {} returns",
                timestamps.len(),
                prices.len(),
                returns.len()
            )));
        }
        if let Some(i) = timestamps.windows(2).position(|w| w[1] <= w[0]) {
            return Err(VolError::InvalidSpec(format!(
                "timestamps must be strictly increasing (index {})",
                i + 1
            )));
        }
        if let Some(i) = returns.iter().position(|r| !r.is_finite()) {
            return Err(VolError::InvalidSpec(format!("non-finite return at index {i}")));
        }
        Ok(Self { timestamps, prices, returns })
    }

    /// Wrap raw returns with synthetic consecutive daily timestamps and the
    /// implied price path (P₀ = 100).
    pub fn from_returns(returns: Vec<f64>) -> VolResult<Self> {
        let start = Utc.with_ymd_and_hms(2000, 1, 3, 0, 0, 0).single().ok_or_else(|| {
            VolError::InvalidSpec("cannot build synthetic start date".into())
        })?;
        let timestamps = (0..returns.len())
            .map(|i| start + Duration::days(i as i64))
            .collect();
        let prices = returns
            .iter()
            .scan(100.0_f64, |p, r| {
                *p *= r.exp();
                Some(*p)
            })
            .collect();
        Self::new(timestamps, prices, returns)
    }

    pub fn returns(&self) -> &[f64] {
        &self.returns
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    /// First and last timestamp.
    pub fn period(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((*self.timestamps.first()?, *self.timestamps.last()?))
    }
}

/// Turns raw prices into a [`ReturnSeries`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnSeriesPreparer {
    /// Returns with |r| at or above this are treated as data errors.
    pub outlier_threshold: f64,
    pub min_observations: usize,
}

impl Default for ReturnSeriesPreparer {
    fn default() -> Self {
        Self { outlier_threshold: 0.2, min_observations: 100 }
    }
}

impl From<&EngineConfig> for ReturnSeriesPreparer {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            outlier_threshold: cfg.outlier_threshold,
            min_observations: cfg.min_observations,
        }
    }
}

impl ReturnSeriesPreparer {
    pub fn prepare(&self, prices: &[PricePoint]) -> VolResult<ReturnSeries> {
        if let Some(i) = prices.iter().position(|p| !(p.price.is_finite() && p.price > 0.0)) {
            return Err(VolError::InvalidSpec(format!(
                "price at index {i} must be positive and finite, got {}",
                prices[i].price
            )));
        }
        if let Some(i) = prices.windows(2).position(|w| w[1].timestamp <= w[0].timestamp) {
            return Err(VolError::InvalidSpec(format!(
                "price timestamps must be strictly increasing (index {})",
                i + 1
            )));
        }

        let n_raw = prices.len().saturating_sub(1);
        let mut timestamps = Vec::with_capacity(n_raw);
        let mut closes = Vec::with_capacity(n_raw);
        let mut returns = Vec::with_capacity(n_raw);

        for w in prices.windows(2) {
            let r = (w[1].price / w[0].price).ln();
            if r.abs() >= self.outlier_threshold {
                continue;
            }
            timestamps.push(w[1].timestamp);
            closes.push(w[1].price);
            returns.push(r);
        }

        let dropped = n_raw - returns.len();
        if dropped > 0 {
            debug!(
                "Dropped {} outlier returns (|r| ≥ {:.2})",
                dropped, self.outlier_threshold
            );
        }

        if returns.len() < self.min_observations {
            return Err(VolError::InsufficientData {
                required: self.min_observations,
                actual: returns.len(),
            });
        }
        ReturnSeries::new(timestamps, closes, returns)
    }
}

/// Descriptive statistics of a return series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReturnStatistics {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub skewness: f64,
    /// Excess kurtosis (normal = 0)
    pub kurtosis: f64,
    pub jarque_bera: f64,
    pub jarque_bera_p: f64,
    pub annual_mean: f64,
    pub annual_std: f64,
    pub sharpe_ratio: f64,
}

impl ReturnStatistics {
    /// `None` for fewer than two observations.
    pub fn from_returns(returns: &[f64]) -> Option<Self> {
        let n = returns.len();
        if n < 2 {
            return None;
        }
        let nf = n as f64;
        let mean = returns.iter().sum::<f64>() / nf;

        // ── Central moments ───────────────────────────────────────────────
        let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
        for r in returns {
            let d = r - mean;
            let d2 = d * d;
            m2 += d2;
            m3 += d2 * d;
            m4 += d2 * d2;
        }
        let std = (m2 / (nf - 1.0)).sqrt();
        let (m2, m3, m4) = (m2 / nf, m3 / nf, m4 / nf);
        let (skewness, kurtosis) = if m2 > 0.0 {
            (m3 / m2.powf(1.5), m4 / (m2 * m2) - 3.0)
        } else {
            (0.0, 0.0)
        };

        // ── Jarque–Bera ───────────────────────────────────────────────────
        let jarque_bera = nf / 6.0 * (skewness * skewness + kurtosis * kurtosis / 4.0);
        let jarque_bera_p = ChiSquared::new(2.0)
            .map(|chi| chi.sf(jarque_bera))
            .unwrap_or(f64::NAN);

        let min = returns.iter().copied().fold(f64::INFINITY, f64::min);
        let max = returns.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let annual_mean = mean * PERIODS_PER_YEAR;
        let annual_std = std * PERIODS_PER_YEAR.sqrt();
        let sharpe_ratio = if annual_std > 0.0 { annual_mean / annual_std } else { 0.0 };

        Some(Self {
            count: n,
            mean,
            std,
            min,
            max,
            skewness,
            kurtosis,
            jarque_bera,
            jarque_bera_p,
            annual_mean,
            annual_std,
            sharpe_ratio,
        })
    }
}

// ── CSV loading ───────────────────────────────────────────────────────────

/// Load (timestamp, adjusted close) rows from a CSV file.
///
/// The date column is the first of `Date`, `date`, `Datetime`, `timestamp`,
/// `time`; the price column the first of `Adj Close`, `Adj_Close`,
/// `adj_close`, `Close`, `close`, `price`.  Rows with a missing value are
/// skipped.
pub fn load_price_csv(path: &Path) -> Result<Vec<PricePoint>> {
    let df = LazyCsvReader::new(path)
        .with_has_header(true)
        .finish()
        .and_then(|lf| lf.collect())
        .with_context(|| format!("reading {}", path.display()))?;

    let date_name = pick_column(&df, &DATE_COLUMNS)?;
    let price_name = pick_column(&df, &PRICE_COLUMNS)?;

    let dates = df.column(date_name)?.cast(&DataType::String)?;
    let dates = dates.str()?;
    let closes = df.column(price_name)?.cast(&DataType::Float64)?;
    let closes = closes.f64()?;

    let mut points = Vec::with_capacity(df.height());
    for (row, (date, price)) in dates.into_iter().zip(closes.into_iter()).enumerate() {
        let (Some(date), Some(price)) = (date, price) else {
            continue;
        };
        let timestamp = parse_timestamp(date)
            .ok_or_else(|| anyhow!("row {row}: cannot parse timestamp '{date}'"))?;
        points.push(PricePoint { timestamp, price });
    }

    info!(
        "Loaded {} price rows from {} (columns '{}', '{}')",
        points.len(),
        path.display(),
        date_name,
        price_name
    );
    Ok(points)
}

fn pick_column<'a>(df: &DataFrame, candidates: &[&'a str]) -> Result<&'a str> {
    let names = df.get_column_names_str();
    candidates
        .iter()
        .copied()
        .find(|c| names.contains(c))
        .ok_or_else(|| anyhow!("none of the columns {candidates:?} found (have {names:?})"))
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[±hh:mm]` and plain `YYYY-MM-DD`.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn price_path(n: usize) -> Vec<PricePoint> {
        let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| PricePoint {
                timestamp: start + Duration::days(i as i64),
                price: 100.0 * (1.0 + 0.01 * ((i % 5) as f64 - 2.0)),
            })
            .collect()
    }

    #[test]
    fn log_returns_are_consecutive_ratios() {
        let prices = price_path(150);
        let series = ReturnSeriesPreparer::default().prepare(&prices).unwrap();
        assert_eq!(series.len(), 149);
        assert_relative_eq!(
            series.returns()[0],
            (prices[1].price / prices[0].price).ln(),
            max_relative = 1e-15
        );
        assert_eq!(series.timestamps()[0], prices[1].timestamp);
    }

    #[test]
    fn synthetic_series_uses_consecutive_days() {
        let returns = vec![0.01, -0.02, 0.005, 0.0, 0.01, 0.02, -0.01];
        let series = ReturnSeries::from_returns(returns).unwrap();
        let ts = series.timestamps();
        assert_eq!(ts.len(), 7);
        assert!(ts.windows(2).all(|w| w[1] - w[0] == Duration::days(1)));
        assert_relative_eq!(series.prices()[0], 100.0 * 0.01_f64.exp(), max_relative = 1e-12);
    }

    #[test]
    fn outliers_are_dropped() {
        let mut prices = price_path(150);
        prices[60].price *= 1.5; // two |r| ≥ 0.2 around the spike
        let series = ReturnSeriesPreparer::default().prepare(&prices).unwrap();
        assert_eq!(series.len(), 147);
        assert!(series.returns().iter().all(|r| r.abs() < 0.2));
    }

    #[test]
    fn short_series_is_insufficient() {
        let prices = price_path(41); // 40 returns
        let err = ReturnSeriesPreparer::default().prepare(&prices).unwrap_err();
        assert_eq!(err, VolError::InsufficientData { required: 100, actual: 40 });
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let mut prices = price_path(150);
        prices[3].price = 0.0;
        assert!(matches!(
            ReturnSeriesPreparer::default().prepare(&prices),
            Err(VolError::InvalidSpec(_))
        ));
    }

    #[test]
    fn unordered_timestamps_are_rejected() {
        let mut prices = price_path(150);
        prices.swap(10, 11);
        assert!(matches!(
            ReturnSeriesPreparer::default().prepare(&prices),
            Err(VolError::InvalidSpec(_))
        ));
    }

    #[test]
    fn statistics_of_symmetric_sample() {
        let r = [-0.02, -0.01, 0.0, 0.01, 0.02];
        let s = ReturnStatistics::from_returns(&r).unwrap();
        assert_relative_eq!(s.mean, 0.0, epsilon = 1e-15);
        assert_relative_eq!(s.skewness, 0.0, epsilon = 1e-12);
        // m2 = 2e-4, m4 = 6.8e-8 → 6.8e-8 / 4e-8 − 3 = −1.3
        assert_relative_eq!(s.kurtosis, -1.3, epsilon = 1e-9);
        assert_relative_eq!(s.std, 0.025_f64.sqrt() / 10.0, max_relative = 1e-12);
        assert!(s.jarque_bera_p > 0.0 && s.jarque_bera_p <= 1.0);
    }

    #[test]
    fn parses_common_timestamp_formats() {
        assert!(parse_timestamp("2023-01-03").is_some());
        assert!(parse_timestamp("2023-01-03 00:00:00-05:00").is_some());
        assert!(parse_timestamp("2023-01-03T14:30:00Z").is_some());
        assert!(parse_timestamp("03/01/2023").is_none());
    }
}
