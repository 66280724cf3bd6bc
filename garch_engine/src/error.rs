/// error.rs — Engine error taxonomy
///
/// Every failure the engine can report maps onto exactly one variant.
/// Preparation and single-fit errors surface to the caller; the model grid
/// turns them into `Failed` rows instead.
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VolError {
    #[error("insufficient data: need at least {required} observations, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("invalid model specification or input series: {0}")]
    InvalidSpec(String),

    #[error("invalid forecast horizon {horizon}: must be between 1 and {max}")]
    InvalidHorizon { horizon: usize, max: usize },

    #[error("model has not been successfully fitted: {0}")]
    ModelNotFitted(String),

    #[error("optimizer failed to converge: {0}")]
    ConvergenceFailure(String),

    #[error("numerical instability in variance recursion: {0}")]
    NumericalInstability(String),
}

pub type VolResult<T> = Result<T, VolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_payload() {
        let e = VolError::InsufficientData { required: 100, actual: 40 };
        let msg = e.to_string();
        assert!(msg.contains("100") && msg.contains("40"), "{msg}");

        let e = VolError::InvalidHorizon { horizon: 45, max: 30 };
        assert!(e.to_string().contains("45"));
    }
}
