//! Negative log-likelihoods of the data given the model response `r`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::field::Field;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LikelihoodError {
    #[error("unsupported likelihood type '{0}' (expected gaussian, poisson or bernoulli)")]
    Unsupported(String),
    #[error("invalid data for {kind} likelihood: {reason}")]
    InvalidData { kind: LikelihoodKind, reason: String },
    #[error("noise variance must be positive and finite, got {0}")]
    InvalidVariance(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LikelihoodKind {
    Gaussian,
    Poisson,
    Bernoulli,
}

impl LikelihoodKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LikelihoodKind::Gaussian => "gaussian",
            LikelihoodKind::Poisson => "poisson",
            LikelihoodKind::Bernoulli => "bernoulli",
        }
    }
}

impl FromStr for LikelihoodKind {
    type Err = LikelihoodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gauss" | "gaussian" => Ok(LikelihoodKind::Gaussian),
            "poisson" => Ok(LikelihoodKind::Poisson),
            "bernoulli" => Ok(LikelihoodKind::Bernoulli),
            _ => Err(LikelihoodError::Unsupported(s.to_string())),
        }
    }
}

impl TryFrom<String> for LikelihoodKind {
    type Error = LikelihoodError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LikelihoodKind> for String {
    fn from(kind: LikelihoodKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for LikelihoodKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Likelihood bound to observed data.
///
/// Each variant provides the energy `L(r)`, its gradient `∂L/∂r` and the
/// diagonal of the Fisher information metric, all evaluated point-wise.
#[derive(Debug, Clone)]
pub enum Likelihood {
    Gaussian { data: Field, variance: f64 },
    Poisson { data: Field },
    Bernoulli { data: Field },
}

impl Likelihood {
    /// `variance` is only used by the Gaussian likelihood.
    pub fn new(kind: LikelihoodKind, data: Field, variance: f64) -> Result<Self, LikelihoodError> {
        match kind {
            LikelihoodKind::Gaussian => {
                if !(variance > 0.0 && variance.is_finite()) {
                    return Err(LikelihoodError::InvalidVariance(variance));
                }
                Ok(Likelihood::Gaussian { data, variance })
            }
            LikelihoodKind::Poisson => {
                if let Some(bad) = data.as_slice().iter().find(|&&d| !(d >= 0.0 && d.is_finite())) {
                    return Err(LikelihoodError::InvalidData {
                        kind,
                        reason: format!("counts must be non-negative, found {bad}"),
                    });
                }
                Ok(Likelihood::Poisson { data })
            }
            LikelihoodKind::Bernoulli => {
                if let Some(bad) = data.as_slice().iter().find(|&&d| d != 0.0 && d != 1.0) {
                    return Err(LikelihoodError::InvalidData {
                        kind,
                        reason: format!("outcomes must be 0 or 1, found {bad}"),
                    });
                }
                Ok(Likelihood::Bernoulli { data })
            }
        }
    }

    pub fn kind(&self) -> LikelihoodKind {
        match self {
            Likelihood::Gaussian { .. } => LikelihoodKind::Gaussian,
            Likelihood::Poisson { .. } => LikelihoodKind::Poisson,
            Likelihood::Bernoulli { .. } => LikelihoodKind::Bernoulli,
        }
    }

    pub fn data(&self) -> &Field {
        match self {
            Likelihood::Gaussian { data, .. }
            | Likelihood::Poisson { data }
            | Likelihood::Bernoulli { data } => data,
        }
    }

    /// Energy `L(r)`. Responses outside the support give `+∞`.
    pub fn energy(&self, response: &Field) -> f64 {
        let pairs = response.as_slice().iter().zip(self.data().as_slice());
        match self {
            Likelihood::Gaussian { variance, .. } => {
                0.5 * pairs.map(|(r, d)| (r - d) * (r - d)).sum::<f64>() / variance
            }
            Likelihood::Poisson { .. } => pairs
                .map(|(&r, &d)| {
                    if r > 0.0 {
                        r - d * r.ln()
                    } else if r == 0.0 && d == 0.0 {
                        0.0
                    } else {
                        f64::INFINITY
                    }
                })
                .sum(),
            Likelihood::Bernoulli { .. } => pairs
                .map(|(&r, &d)| {
                    if r > 0.0 && r < 1.0 {
                        -(d * r.ln() + (1.0 - d) * (1.0 - r).ln())
                    } else {
                        f64::INFINITY
                    }
                })
                .sum(),
        }
    }

    /// `∂L/∂r`
    pub fn gradient(&self, response: &Field) -> Field {
        match self {
            Likelihood::Gaussian { data, variance } => {
                response.zip_map(data, |r, d| (r - d) / variance)
            }
            Likelihood::Poisson { data } => response.zip_map(data, |r, d| 1.0 - d / r),
            Likelihood::Bernoulli { data } => {
                response.zip_map(data, |r, d| -d / r + (1.0 - d) / (1.0 - r))
            }
        }
    }

    /// Diagonal of the Fisher information metric at `r`.
    pub fn fisher(&self, response: &Field) -> Field {
        match self {
            Likelihood::Gaussian { variance, .. } => response.map(|_| 1.0 / variance),
            Likelihood::Poisson { .. } => response.map(|r| 1.0 / r),
            Likelihood::Bernoulli { .. } => response.map(|r| 1.0 / (r * (1.0 - r))),
        }
    }
}
