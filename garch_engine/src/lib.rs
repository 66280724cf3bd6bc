pub mod config;
pub mod data;
pub mod diagnostics;
pub mod error;
pub mod estimator;
pub mod export;
pub mod forecast;
pub mod models;
pub mod optimizer;
pub mod selection;
pub mod session;

pub use config::EngineConfig;
pub use data::{PricePoint, ReturnSeries, ReturnSeriesPreparer, ReturnStatistics};
pub use diagnostics::{DiagnosticEvaluator, DiagnosticReport, TestResult};
pub use error::{VolError, VolResult};
pub use estimator::{ConvergenceStatus, Estimator, FitFailure, FitOptions, FittedModel, GarchEstimator};
pub use forecast::{ForecastGenerator, ForecastMethod, ForecastResult};
pub use models::*;
pub use optimizer::CancelToken;
pub use selection::{rank_by_aic, CellOutcome, ComparisonRow, ModelSelector};
pub use session::{AnalysisRequest, AnalysisSession};
