//! Convergence controllers for iterative solvers and minimisers.
//!
//! A controller is immutable configuration plus a pure decision function: it
//! looks at the current [`IterationState`] and answers converged, continue or
//! failed. Solvers own the iteration bookkeeping.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The iteration cap was reached before the tolerance was met.
    IterationLimit,
    /// The gradient became NaN or infinite.
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    Converged,
    Continue,
    Failed(FailureReason),
}

/// Snapshot of an iteration handed to a controller.
#[derive(Debug, Clone, Copy)]
pub struct IterationState {
    /// Number of completed iterations.
    pub iteration: usize,
    /// Euclidean norm of the current gradient (or residual).
    pub gradient_norm: f64,
    /// Largest absolute gradient component.
    pub gradient_inf_norm: f64,
    /// Gradient norm before the first iteration.
    pub initial_gradient_norm: f64,
}

pub trait ConvergenceController {
    fn check(&self, state: &IterationState) -> Convergence;
    fn iteration_limit(&self) -> usize;
}

impl<C: ConvergenceController + ?Sized> ConvergenceController for &C {
    fn check(&self, state: &IterationState) -> Convergence {
        (**self).check(state)
    }
    fn iteration_limit(&self) -> usize {
        (**self).iteration_limit()
    }
}

/// Stops once the Euclidean gradient norm drops below an absolute or a
/// relative tolerance.
///
/// Without any tolerance the controller simply runs to its iteration limit,
/// which is then reported as a failure to converge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradientNormController {
    #[serde(default = "default_iteration_limit")]
    pub iteration_limit: usize,
    #[serde(default)]
    pub tol_abs_gradnorm: Option<f64>,
    #[serde(default)]
    pub tol_rel_gradnorm: Option<f64>,
}

impl GradientNormController {
    pub fn new(iteration_limit: usize, tol_abs_gradnorm: f64) -> Self {
        Self {
            iteration_limit,
            tol_abs_gradnorm: Some(tol_abs_gradnorm),
            tol_rel_gradnorm: None,
        }
    }

    pub fn with_limit(iteration_limit: usize) -> Self {
        Self {
            iteration_limit,
            tol_abs_gradnorm: None,
            tol_rel_gradnorm: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.iteration_limit == 0 {
            return Err("iteration_limit must be at least 1".into());
        }
        for (name, tol) in [
            ("tol_abs_gradnorm", self.tol_abs_gradnorm),
            ("tol_rel_gradnorm", self.tol_rel_gradnorm),
        ] {
            if let Some(tol) = tol {
                if !(tol > 0.0 && tol.is_finite()) {
                    return Err(format!("{name} must be positive and finite"));
                }
            }
        }
        Ok(())
    }
}

impl Default for GradientNormController {
    fn default() -> Self {
        Self::new(default_iteration_limit(), 1e-7)
    }
}

impl ConvergenceController for GradientNormController {
    fn check(&self, state: &IterationState) -> Convergence {
        if !state.gradient_norm.is_finite() {
            return Convergence::Failed(FailureReason::NonFinite);
        }
        if let Some(tol) = self.tol_abs_gradnorm {
            if state.gradient_norm <= tol {
                return Convergence::Converged;
            }
        }
        if let Some(tol) = self.tol_rel_gradnorm {
            if state.gradient_norm <= tol * state.initial_gradient_norm {
                return Convergence::Converged;
            }
        }
        if state.iteration >= self.iteration_limit {
            return Convergence::Failed(FailureReason::IterationLimit);
        }
        Convergence::Continue
    }

    fn iteration_limit(&self) -> usize {
        self.iteration_limit
    }
}

/// Stops once the largest gradient component drops below `tol`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradInfNormController {
    pub tol: f64,
    #[serde(default = "default_iteration_limit")]
    pub iteration_limit: usize,
}

impl GradInfNormController {
    pub fn new(tol: f64, iteration_limit: usize) -> Self {
        Self {
            tol,
            iteration_limit,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.iteration_limit == 0 {
            return Err("iteration_limit must be at least 1".into());
        }
        if !(self.tol > 0.0 && self.tol.is_finite()) {
            return Err("tol must be positive and finite".into());
        }
        Ok(())
    }
}

impl ConvergenceController for GradInfNormController {
    fn check(&self, state: &IterationState) -> Convergence {
        if !state.gradient_inf_norm.is_finite() {
            return Convergence::Failed(FailureReason::NonFinite);
        }
        if state.gradient_inf_norm <= self.tol {
            return Convergence::Converged;
        }
        if state.iteration >= self.iteration_limit {
            return Convergence::Failed(FailureReason::IterationLimit);
        }
        Convergence::Continue
    }

    fn iteration_limit(&self) -> usize {
        self.iteration_limit
    }
}

fn default_iteration_limit() -> usize {
    100
}
