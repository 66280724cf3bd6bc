/// models/spec.rs — Volatility model specification
///
/// A spec is a small `Copy` value: which variance recursion, which order,
/// which mean structure and which innovation distribution.  The only
/// supported order is (1, 1); anything else is rejected by `validate`.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{VolError, VolResult};

/// Variance recursion family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolModel {
    /// GARCH: σ²_t = ω + α·ε²_{t-1} + β·σ²_{t-1}
    Standard,
    /// EGARCH: recursion on ln σ²_t with leverage term γ·z_{t-1}
    Exponential,
    /// GJR-GARCH: extra γ·ε²_{t-1} when ε_{t-1} < 0
    Threshold,
}

impl VolModel {
    pub const ALL: [VolModel; 3] = [VolModel::Standard, VolModel::Exponential, VolModel::Threshold];

    pub fn label(&self) -> &'static str {
        match self {
            VolModel::Standard => "GARCH",
            VolModel::Exponential => "EGARCH",
            VolModel::Threshold => "GJR-GARCH",
        }
    }

    /// Whether the recursion carries an asymmetry coefficient γ.
    pub fn has_gamma(&self) -> bool {
        !matches!(self, VolModel::Standard)
    }
}

impl fmt::Display for VolModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for VolModel {
    type Err = VolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" | "garch" => Ok(VolModel::Standard),
            "exponential" | "egarch" => Ok(VolModel::Exponential),
            "threshold" | "gjr" | "gjr-garch" | "tgarch" => Ok(VolModel::Threshold),
            other => Err(VolError::InvalidSpec(format!("unknown volatility model '{other}'"))),
        }
    }
}

/// Innovation distribution of the standardized residual z_t.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Distribution {
    Normal,
    StudentT,
    SkewedStudentT,
}

impl Distribution {
    pub const ALL: [Distribution; 3] = [
        Distribution::Normal,
        Distribution::StudentT,
        Distribution::SkewedStudentT,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Distribution::Normal => "Normal",
            Distribution::StudentT => "Student-t",
            Distribution::SkewedStudentT => "Skewed Student-t",
        }
    }

    /// Number of shape parameters estimated jointly with the recursion.
    pub fn n_shape(&self) -> usize {
        match self {
            Distribution::Normal => 0,
            Distribution::StudentT => 1,
            Distribution::SkewedStudentT => 2,
        }
    }
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Distribution {
    type Err = VolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "normal" | "gaussian" => Ok(Distribution::Normal),
            "t" | "studentt" | "student-t" | "student_t" => Ok(Distribution::StudentT),
            "skewt" | "skew-t" | "skewed-t" | "skewstudent" | "skewed-student-t" => {
                Ok(Distribution::SkewedStudentT)
            }
            other => Err(VolError::InvalidSpec(format!("unknown distribution '{other}'"))),
        }
    }
}

/// Conditional mean structure of r_t.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeanModel {
    /// r_t = ε_t
    Zero,
    /// r_t = μ + ε_t
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolatilityModelSpec {
    pub model: VolModel,
    /// (p, q): ARCH and GARCH lag orders.
    pub order: (usize, usize),
    pub mean: MeanModel,
    pub distribution: Distribution,
}

impl VolatilityModelSpec {
    pub fn new(model: VolModel, distribution: Distribution) -> Self {
        Self {
            model,
            order: (1, 1),
            mean: MeanModel::Constant,
            distribution,
        }
    }

    pub fn with_mean(self, mean: MeanModel) -> Self {
        Self { mean, ..self }
    }

    pub fn with_distribution(self, distribution: Distribution) -> Self {
        Self { distribution, ..self }
    }

    pub fn validate(&self) -> VolResult<()> {
        if self.order != (1, 1) {
            return Err(VolError::InvalidSpec(format!(
                "only order (1, 1) is supported, got ({}, {})",
                self.order.0, self.order.1
            )));
        }
        Ok(())
    }

    /// Number of free parameters k (used by AIC / BIC).
    pub fn n_params(&self) -> usize {
        let mean = match self.mean {
            MeanModel::Zero => 0,
            MeanModel::Constant => 1,
        };
        let recursion = if self.model.has_gamma() { 4 } else { 3 };
        mean + recursion + self.distribution.n_shape()
    }
}

impl Default for VolatilityModelSpec {
    fn default() -> Self {
        Self::new(VolModel::Standard, Distribution::Normal)
    }
}

impl fmt::Display for VolatilityModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({},{}) [{}]",
            self.model, self.order.0, self.order.1, self.distribution
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_counts() {
        let s = VolatilityModelSpec::default();
        assert_eq!(s.n_params(), 4); // μ ω α β
        let s = VolatilityModelSpec::new(VolModel::Threshold, Distribution::SkewedStudentT);
        assert_eq!(s.n_params(), 7); // μ ω α γ β ν λ
        let s = s.with_mean(MeanModel::Zero);
        assert_eq!(s.n_params(), 6);
    }

    #[test]
    fn rejects_higher_orders() {
        let mut s = VolatilityModelSpec::default();
        s.order = (2, 1);
        assert!(matches!(s.validate(), Err(VolError::InvalidSpec(_))));
    }

    #[test]
    fn parses_aliases() {
        assert_eq!("egarch".parse::<VolModel>().unwrap(), VolModel::Exponential);
        assert_eq!("GJR".parse::<VolModel>().unwrap(), VolModel::Threshold);
        assert_eq!("skewt".parse::<Distribution>().unwrap(), Distribution::SkewedStudentT);
        assert!("cauchy".parse::<Distribution>().is_err());
    }
}
