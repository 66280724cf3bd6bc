/// models/distribution.rs — Standardized innovation densities
///
/// ─────────────────────────────────────────────────────────────────────────
/// MATHEMATICAL SPECIFICATION
/// ─────────────────────────────────────────────────────────────────────────
///
/// All densities are for z with E[z] = 0, Var[z] = 1.
///
/// NORMAL
///   ln f(z) = −½ (ln 2π + z²)
///
/// STUDENT-t (ν > 2), rescaled to unit variance
///   ln f(z) = lnΓ((ν+1)/2) − lnΓ(ν/2) − ½ ln(π(ν−2))
///             − (ν+1)/2 · ln(1 + z²/(ν−2))
///
/// HANSEN (1994) SKEWED STUDENT-t (ν > 2, −1 < λ < 1)
///   c  = Γ((ν+1)/2) / (√(π(ν−2)) · Γ(ν/2))
///   a  = 4λc · (ν−2)/(ν−1)
///   b² = 1 + 3λ² − a²
///   ln f(z) = ln(bc) − (ν+1)/2 · ln(1 + ((bz + a)/(1 ∓ λ))² / (ν−2))
///   with (1 − λ) when z < −a/b and (1 + λ) otherwise.
///
/// SAMPLING
///   Student-t:  z = t_ν · √((ν−2)/ν)
///   Skewed-t:   w = |z_t|,  y = −(1−λ)·w  w.p. (1−λ)/2,  y = (1+λ)·w  otherwise,
///               z = (y − a)/b
/// ─────────────────────────────────────────────────────────────────────────
use rand::Rng;
use rand_distr::{Distribution as _, StandardNormal, StudentT};
use statrs::function::gamma::ln_gamma;
use std::f64::consts::PI;

use super::spec::Distribution;
use crate::error::{VolError, VolResult};

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Lower bound on the degrees of freedom.
pub const NU_MIN: f64 = 2.05;
/// Upper bound on the degrees of freedom.
pub const NU_MAX: f64 = 100.0;
/// |λ| bound for the skewed Student-t.
pub const LAMBDA_MAX: f64 = 0.99;

/// A fully parameterised innovation law.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Innovation {
    Normal,
    StudentT { nu: f64 },
    SkewedT { nu: f64, lambda: f64 },
}

impl Innovation {
    /// Build from a distribution family and its (optional) shape parameters.
    pub fn new(dist: Distribution, nu: Option<f64>, lambda: Option<f64>) -> Self {
        match dist {
            Distribution::Normal => Innovation::Normal,
            Distribution::StudentT => Innovation::StudentT { nu: nu.unwrap_or(8.0) },
            Distribution::SkewedStudentT => Innovation::SkewedT {
                nu: nu.unwrap_or(8.0),
                lambda: lambda.unwrap_or(0.0),
            },
        }
    }

    /// Precompute the terms of ln f(z) that do not depend on z.
    pub fn log_density(&self) -> LogDensity {
        match *self {
            Innovation::Normal => LogDensity::Normal,
            Innovation::StudentT { nu } => LogDensity::StudentT {
                nu,
                constant: ln_gamma((nu + 1.0) * 0.5)
                    - ln_gamma(nu * 0.5)
                    - 0.5 * (PI * (nu - 2.0)).ln(),
            },
            Innovation::SkewedT { nu, lambda } => {
                let k = SkewTConstants::new(nu, lambda);
                LogDensity::SkewedT { nu, lambda, k }
            }
        }
    }

    /// Sampler for Monte Carlo propagation.
    pub fn sampler(&self) -> VolResult<InnovationSampler> {
        Ok(match *self {
            Innovation::Normal => InnovationSampler::Normal,
            Innovation::StudentT { nu } => InnovationSampler::StudentT {
                t: student_t(nu)?,
                scale: ((nu - 2.0) / nu).sqrt(),
            },
            Innovation::SkewedT { nu, lambda } => InnovationSampler::SkewedT {
                t: student_t(nu)?,
                scale: ((nu - 2.0) / nu).sqrt(),
                lambda,
                k: SkewTConstants::new(nu, lambda),
            },
        })
    }
}

fn student_t(nu: f64) -> VolResult<StudentT<f64>> {
    if !(nu > 2.0 && nu.is_finite()) {
        return Err(VolError::InvalidSpec(format!("degrees of freedom must exceed 2, got {nu}")));
    }
    StudentT::new(nu).map_err(|e| VolError::InvalidSpec(format!("Student-t(ν={nu}): {e}")))
}

/// Hansen's a, b, ln(bc) for a given (ν, λ).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkewTConstants {
    pub a: f64,
    pub b: f64,
    pub ln_bc: f64,
}

impl SkewTConstants {
    pub fn new(nu: f64, lambda: f64) -> Self {
        let ln_c = ln_gamma((nu + 1.0) * 0.5) - ln_gamma(nu * 0.5) - 0.5 * (PI * (nu - 2.0)).ln();
        let c = ln_c.exp();
        let a = 4.0 * lambda * c * (nu - 2.0) / (nu - 1.0);
        let b = (1.0 + 3.0 * lambda * lambda - a * a).max(1e-12).sqrt();
        Self { a, b, ln_bc: b.ln() + ln_c }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogDensity {
    Normal,
    StudentT { nu: f64, constant: f64 },
    SkewedT { nu: f64, lambda: f64, k: SkewTConstants },
}

impl LogDensity {
    /// ln f(z) of the standardized residual.
    #[inline]
    pub fn eval(&self, z: f64) -> f64 {
        match *self {
            LogDensity::Normal => -0.5 * (LN_2PI + z * z),
            LogDensity::StudentT { nu, constant } => {
                constant - 0.5 * (nu + 1.0) * (z * z / (nu - 2.0)).ln_1p()
            }
            LogDensity::SkewedT { nu, lambda, k } => {
                let side = if z < -k.a / k.b { 1.0 - lambda } else { 1.0 + lambda };
                let u = (k.b * z + k.a) / side;
                k.ln_bc - 0.5 * (nu + 1.0) * (u * u / (nu - 2.0)).ln_1p()
            }
        }
    }
}

pub enum InnovationSampler {
    Normal,
    StudentT { t: StudentT<f64>, scale: f64 },
    SkewedT { t: StudentT<f64>, scale: f64, lambda: f64, k: SkewTConstants },
}

impl InnovationSampler {
    /// Draw one unit-variance innovation.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            InnovationSampler::Normal => StandardNormal.sample(rng),
            InnovationSampler::StudentT { t, scale } => t.sample(rng) * scale,
            InnovationSampler::SkewedT { t, scale, lambda, k } => {
                let w = (t.sample(rng) * scale).abs();
                let u: f64 = rng.gen();
                let y = if u < (1.0 - lambda) * 0.5 {
                    -(1.0 - lambda) * w
                } else {
                    (1.0 + lambda) * w
                };
                (y - k.a) / k.b
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Trapezoidal ∫ exp(ln f) over a wide grid.
    fn integrate(d: &LogDensity, power: i32) -> f64 {
        let (lo, hi, n) = (-60.0, 60.0, 240_000);
        let h = (hi - lo) / n as f64;
        (0..=n)
            .map(|i| {
                let z = lo + i as f64 * h;
                let w = if i == 0 || i == n { 0.5 } else { 1.0 };
                w * z.powi(power) * d.eval(z).exp()
            })
            .sum::<f64>()
            * h
    }

    #[test]
    fn densities_are_standardized() {
        for inn in [
            Innovation::Normal,
            Innovation::StudentT { nu: 6.0 },
            Innovation::SkewedT { nu: 7.0, lambda: -0.3 },
        ] {
            let d = inn.log_density();
            assert_relative_eq!(integrate(&d, 0), 1.0, epsilon = 1e-4);
            assert!(integrate(&d, 1).abs() < 1e-3, "{inn:?} mean");
            assert_relative_eq!(integrate(&d, 2), 1.0, epsilon = 5e-3);
        }
    }

    #[test]
    fn skew_t_with_zero_lambda_matches_student_t() {
        let t = Innovation::StudentT { nu: 5.0 }.log_density();
        let s = Innovation::SkewedT { nu: 5.0, lambda: 0.0 }.log_density();
        for z in [-3.0, -0.4, 0.0, 1.2, 4.0] {
            assert_relative_eq!(t.eval(z), s.eval(z), epsilon = 1e-12);
        }
    }

    #[test]
    fn skewed_draws_have_unit_variance() {
        let sampler = Innovation::SkewedT { nu: 8.0, lambda: 0.4 }.sampler().unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let n = 200_000;
        let draws: Vec<f64> = (0..n).map(|_| sampler.draw(&mut rng)).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|z| (z - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.02, "mean = {mean}");
        assert!((var - 1.0).abs() < 0.05, "var = {var}");
    }
}
