/// models.rs — Volatility model building blocks
///
/// spec         : what to fit (recursion, order, mean, distribution)
/// garch        : the variance recursions
/// distribution : standardized innovation densities and samplers
/// params       : estimated parameters and their unconstrained encoding
pub mod distribution;
pub mod garch;
pub mod params;
pub mod spec;

pub use distribution::Innovation;
pub use garch::{garch_filter, VarianceParams};
pub use params::{ParamLayout, Parameters};
pub use spec::{Distribution, MeanModel, VolModel, VolatilityModelSpec};
