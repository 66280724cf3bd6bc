/// selection.rs — Information-criterion comparison across model variants
///
/// Every (variant, distribution) cell is estimated independently on rayon
/// workers.  A cell that errors or fails to converge becomes a `Failed`
/// row; the rest of the grid is unaffected.  Rows come back in the order
/// the cells were enumerated (variant-major).
///
///   AIC = −2 ln L + 2k        BIC = −2 ln L + k ln n
use std::cmp::Ordering;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::ReturnSeries;
use crate::estimator::{ConvergenceStatus, Estimator};
use crate::models::{Distribution, VolModel, VolatilityModelSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellOutcome {
    Fitted { aic: f64, bic: f64, log_likelihood: f64, k: usize },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub model: VolModel,
    pub distribution: Distribution,
    pub outcome: CellOutcome,
}

impl ComparisonRow {
    pub fn aic(&self) -> Option<f64> {
        match self.outcome {
            CellOutcome::Fitted { aic, .. } => Some(aic),
            CellOutcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, CellOutcome::Failed(_))
    }
}

pub struct ModelSelector<E: Estimator> {
    estimator: E,
}

impl<E: Estimator> ModelSelector<E> {
    pub fn new(estimator: E) -> Self {
        Self { estimator }
    }

    /// Full default grid: every variant × every distribution.
    pub fn compare_all(&self, series: &ReturnSeries, base: VolatilityModelSpec) -> Vec<ComparisonRow> {
        let specs: Vec<VolatilityModelSpec> = VolModel::ALL
            .iter()
            .map(|&model| VolatilityModelSpec { model, ..base })
            .collect();
        self.compare(series, &specs, &Distribution::ALL)
    }

    pub fn compare(
        &self,
        series: &ReturnSeries,
        specs: &[VolatilityModelSpec],
        distributions: &[Distribution],
    ) -> Vec<ComparisonRow> {
        let cells: Vec<VolatilityModelSpec> = specs
            .iter()
            .flat_map(|spec| distributions.iter().map(move |&d| spec.with_distribution(d)))
            .collect();
        info!("Comparing {} model specifications on {} returns", cells.len(), series.len());

        let rows: Vec<ComparisonRow> = cells
            .par_iter()
            .map(|spec| self.evaluate_cell(series, spec))
            .collect();

        let failed = rows.iter().filter(|r| r.is_failed()).count();
        if failed > 0 {
            warn!("{failed} of {} specifications failed", rows.len());
        }
        rows
    }

    fn evaluate_cell(&self, series: &ReturnSeries, spec: &VolatilityModelSpec) -> ComparisonRow {
        let outcome = match self.estimator.fit(series, spec) {
            Ok(model) => match model.status() {
                ConvergenceStatus::Converged => CellOutcome::Fitted {
                    aic: model.aic(),
                    bic: model.bic(),
                    log_likelihood: model.log_likelihood(),
                    k: model.n_params(),
                },
                ConvergenceStatus::Failed(reason) => CellOutcome::Failed(reason.to_string()),
            },
            Err(e) => CellOutcome::Failed(e.to_string()),
        };
        ComparisonRow { model: spec.model, distribution: spec.distribution, outcome }
    }
}

/// Ascending AIC, failed rows last (stable among equals).
pub fn rank_by_aic(rows: &[ComparisonRow]) -> Vec<ComparisonRow> {
    let mut ranked = rows.to_vec();
    ranked.sort_by(|a, b| match (a.aic(), b.aic()) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{VolError, VolResult};
    use crate::estimator::{FittedModel, GarchEstimator};
    use crate::models::MeanModel;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution as _, StandardNormal};

    /// Delegates to the real estimator except for one poisoned cell.
    struct PoisonedCell {
        inner: GarchEstimator,
        model: VolModel,
        distribution: Distribution,
    }

    impl Estimator for PoisonedCell {
        fn fit(&self, series: &ReturnSeries, spec: &VolatilityModelSpec) -> VolResult<FittedModel> {
            if spec.model == self.model && spec.distribution == self.distribution {
                return Err(VolError::NumericalInstability("engineered failure".into()));
            }
            self.inner.fit(series, spec)
        }
    }

    fn series() -> ReturnSeries {
        let (omega, alpha, beta) = (2e-6, 0.07, 0.9);
        let mut rng = StdRng::seed_from_u64(2024);
        let mut s2: f64 = omega / (1.0 - alpha - beta);
        let mut eps: f64 = 0.0;
        let r = (0..1000)
            .map(|_| {
                s2 = omega + alpha * eps * eps + beta * s2;
                let z: f64 = StandardNormal.sample(&mut rng);
                eps = s2.sqrt() * z;
                eps
            })
            .collect();
        ReturnSeries::from_returns(r).unwrap()
    }

    #[test]
    fn grid_isolates_failing_cell() {
        let selector = ModelSelector::new(PoisonedCell {
            inner: GarchEstimator::default(),
            model: VolModel::Exponential,
            distribution: Distribution::StudentT,
        });
        let base = VolatilityModelSpec::default().with_mean(MeanModel::Zero);
        let rows = selector.compare_all(&series(), base);

        assert_eq!(rows.len(), 9);
        let failed: Vec<_> = rows.iter().filter(|r| r.is_failed()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].model, VolModel::Exponential);
        assert_eq!(failed[0].distribution, Distribution::StudentT);

        // variant-major enumeration order
        let order: Vec<_> = rows.iter().map(|r| (r.model, r.distribution)).collect();
        let expected: Vec<_> = VolModel::ALL
            .iter()
            .flat_map(|&m| Distribution::ALL.iter().map(move |&d| (m, d)))
            .collect();
        assert_eq!(order, expected);

        let ranked = rank_by_aic(&rows);
        assert!(ranked.last().is_some_and(|r| r.is_failed()));
        assert!(ranked[..8].windows(2).all(|w| w[0].aic() <= w[1].aic()));
    }

    #[test]
    fn degenerate_series_fails_every_cell() {
        let flat = ReturnSeries::from_returns(vec![0.001; 300]).unwrap();
        let rows = ModelSelector::new(GarchEstimator::default())
            .compare_all(&flat, VolatilityModelSpec::default());
        assert_eq!(rows.len(), 9);
        for row in &rows {
            let CellOutcome::Failed(reason) = &row.outcome else {
                panic!("{:?}/{:?} fitted a constant series", row.model, row.distribution);
            };
            assert!(reason.contains("sample variance"), "{reason}");
        }
        assert!(rank_by_aic(&rows).iter().all(|r| r.aic().is_none()));
    }

    #[test]
    fn criteria_are_exact() {
        let selector = ModelSelector::new(GarchEstimator::default());
        let spec = VolatilityModelSpec::default();
        let rows = selector.compare(&series(), &[spec], &[Distribution::Normal]);
        let CellOutcome::Fitted { aic, bic, log_likelihood, k } = rows[0].outcome.clone() else {
            panic!("fit failed: {:?}", rows[0].outcome);
        };
        assert_eq!(k, 4);
        assert_eq!(aic, -2.0 * log_likelihood + 2.0 * k as f64);
        assert_eq!(bic, -2.0 * log_likelihood + k as f64 * 1000f64.ln());
    }
}
