/// session.rs — One end-to-end analysis run
///
/// prices → returns → fit → forecast → diagnostics → (optional) grid.
/// The session is a plain value; a new request builds a new session.
use serde::Serialize;
use tracing::info;

use crate::config::EngineConfig;
use crate::data::{PricePoint, ReturnSeries, ReturnSeriesPreparer, ReturnStatistics, PERIODS_PER_YEAR};
use crate::diagnostics::{DiagnosticEvaluator, DiagnosticReport};
use crate::error::VolResult;
use crate::estimator::{ConvergenceStatus, Estimator, FitOptions, FittedModel, GarchEstimator};
use crate::forecast::{ForecastGenerator, ForecastResult};
use crate::models::VolatilityModelSpec;
use crate::selection::{ComparisonRow, ModelSelector};

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    /// Ticker or file stem shown in reports.
    pub identifier: String,
    pub prices: Vec<PricePoint>,
    pub spec: VolatilityModelSpec,
    pub horizon: usize,
    /// Also run the variant × distribution comparison.
    pub compare: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSession {
    pub identifier: String,
    pub series: ReturnSeries,
    pub statistics: Option<ReturnStatistics>,
    pub model: FittedModel,
    pub forecast: ForecastResult,
    pub diagnostics: DiagnosticReport,
    pub comparison: Option<Vec<ComparisonRow>>,
}

impl AnalysisSession {
    pub fn run(request: AnalysisRequest, cfg: &EngineConfig, fit: &FitOptions) -> VolResult<Self> {
        let AnalysisRequest { identifier, prices, spec, horizon, compare } = request;
        info!("Analysing {} ({} prices) with {}", identifier, prices.len(), spec);

        let series = ReturnSeriesPreparer::from(cfg).prepare(&prices)?;
        let statistics = ReturnStatistics::from_returns(series.returns());

        let estimator = GarchEstimator::new(fit.clone());
        let model = estimator.fit(&series, &spec)?;
        if let ConvergenceStatus::Failed(reason) = model.status() {
            return Err(reason.clone().into_error());
        }

        let forecast = ForecastGenerator::from(cfg).forecast(&model, horizon)?;
        let diagnostics = DiagnosticEvaluator::from(cfg).evaluate(&model, &series)?;

        let comparison = compare.then(|| ModelSelector::new(estimator).compare_all(&series, spec));

        Ok(Self {
            identifier,
            series,
            statistics,
            model,
            forecast,
            diagnostics,
            comparison,
        })
    }

    /// Forecast volatilities scaled to annual terms (×√252).
    pub fn annualised_forecast(&self) -> Vec<f64> {
        self.forecast
            .volatility
            .iter()
            .map(|v| v * PERIODS_PER_YEAR.sqrt())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VolError;
    use crate::optimizer::CancelToken;
    use chrono::{Duration, TimeZone, Utc};

    fn prices(n: usize) -> Vec<PricePoint> {
        let start = Utc.with_ymd_and_hms(2021, 1, 4, 0, 0, 0).unwrap();
        let mut p = 50.0;
        (0..n)
            .map(|i| {
                p *= (0.012 * ((i as f64) * 1.3).sin() + 0.004 * ((i as f64) * 0.17).cos()).exp();
                PricePoint { timestamp: start + Duration::days(i as i64), price: p }
            })
            .collect()
    }

    fn request(n: usize) -> AnalysisRequest {
        AnalysisRequest {
            identifier: "TEST".into(),
            prices: prices(n),
            spec: VolatilityModelSpec::default(),
            horizon: 5,
            compare: false,
        }
    }

    #[test]
    fn short_history_surfaces_insufficient_data() {
        let err = AnalysisSession::run(request(41), &EngineConfig::default(), &FitOptions::default())
            .unwrap_err();
        assert_eq!(err, VolError::InsufficientData { required: 100, actual: 40 });
    }

    #[test]
    fn failed_fit_surfaces_as_error() {
        let token = CancelToken::new();
        token.cancel();
        let fit = FitOptions { cancel: Some(token), ..FitOptions::default() };
        let err = AnalysisSession::run(request(400), &EngineConfig::default(), &fit).unwrap_err();
        assert!(matches!(err, VolError::ConvergenceFailure(_)), "{err}");
    }
}
