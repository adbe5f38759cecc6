//! Newton-CG minimisation of energies with a positive-definite metric.

use log::{debug, warn};
use serde::Serialize;

use crate::cg::{ConjugateGradient, SolverStatus};
use crate::controller::{
    Convergence, ConvergenceController, FailureReason, GradInfNormController,
    GradientNormController, IterationState,
};
use crate::field::{Field, Space};
use crate::operator::{LinearOperator, OperatorError};

/// A scalar objective evaluated at a fixed position.
///
/// Moving to a new position produces a new energy; implementations are
/// free to reuse state (for example KL residual samples) across moves.
pub trait Energy: Sized {
    fn position(&self) -> &Field;
    fn value(&self) -> f64;
    fn gradient(&self) -> &Field;
    /// Apply the (positive-definite) metric at the current position.
    fn apply_metric(&self, input: &Field) -> Result<Field, OperatorError>;
    fn at(&self, position: Field) -> Result<Self, OperatorError>;
}

/// The metric of an energy viewed as an operator.
pub struct MetricOperator<'e, E>(pub &'e E);

impl<E: Energy> LinearOperator for MetricOperator<'_, E> {
    fn domain(&self) -> Space {
        self.0.position().space()
    }
    fn target(&self) -> Space {
        self.0.position().space()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        self.0.apply_metric(input)
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        self.0.apply_metric(input)
    }
    fn name(&self) -> &'static str {
        "MetricOperator"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MinimizationStatus {
    Converged,
    IterationLimit,
    NonFinite,
    /// No step length gave sufficient decrease.
    LineSearchFailed,
}

impl MinimizationStatus {
    pub fn is_converged(self) -> bool {
        matches!(self, MinimizationStatus::Converged)
    }
}

impl From<FailureReason> for MinimizationStatus {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::IterationLimit => MinimizationStatus::IterationLimit,
            FailureReason::NonFinite => MinimizationStatus::NonFinite,
        }
    }
}

impl std::fmt::Display for MinimizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MinimizationStatus::Converged => "converged",
            MinimizationStatus::IterationLimit => "iteration limit reached",
            MinimizationStatus::NonFinite => "non-finite energy",
            MinimizationStatus::LineSearchFailed => "line search failed",
        };
        f.write_str(label)
    }
}

pub struct MinimizationResult<E> {
    pub energy: E,
    pub iterations: usize,
    pub status: MinimizationStatus,
}

const ARMIJO_C1: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 20;
pub const DEFAULT_MAX_CG_ITERATIONS: usize = 200;

/// Newton's method with a truncated-CG direction and Armijo backtracking.
#[derive(Debug, Clone)]
pub struct NewtonCg {
    controller: GradInfNormController,
    max_cg_iterations: usize,
}

impl NewtonCg {
    pub fn new(controller: GradInfNormController) -> Self {
        Self {
            controller,
            max_cg_iterations: DEFAULT_MAX_CG_ITERATIONS,
        }
    }

    pub fn with_max_cg_iterations(mut self, max_cg_iterations: usize) -> Self {
        self.max_cg_iterations = max_cg_iterations.max(1);
        self
    }

    pub fn minimize<E: Energy>(&self, mut energy: E) -> Result<MinimizationResult<E>, OperatorError> {
        let initial_norm = energy.gradient().norm();
        let mut iteration = 0usize;

        let status = loop {
            if !energy.value().is_finite() {
                break MinimizationStatus::NonFinite;
            }
            let gradient = energy.gradient();
            let state = IterationState {
                iteration,
                gradient_norm: gradient.norm(),
                gradient_inf_norm: gradient.max_abs(),
                initial_gradient_norm: initial_norm,
            };
            match self.controller.check(&state) {
                Convergence::Converged => break MinimizationStatus::Converged,
                Convergence::Failed(reason) => break reason.into(),
                Convergence::Continue => {}
            }

            let direction = self.descent_direction(&energy)?;
            let slope = gradient.dot(&direction);
            match line_search(&energy, &direction, slope)? {
                Some(next) => {
                    debug!(
                        "[newton] iteration {}: energy {:.6e} -> {:.6e}, |g|_inf={:.3e}",
                        iteration,
                        energy.value(),
                        next.value(),
                        state.gradient_inf_norm
                    );
                    energy = next;
                    iteration += 1;
                }
                None => break MinimizationStatus::LineSearchFailed,
            }
        };

        if !status.is_converged() {
            warn!(
                "[newton] {} after {} iterations (energy={:.6e}, |g|_inf={:.3e})",
                status,
                iteration,
                energy.value(),
                energy.gradient().max_abs()
            );
        }
        Ok(MinimizationResult {
            energy,
            iterations: iteration,
            status,
        })
    }

    /// Approximate solution of `M p = −g`, falling back to steepest descent
    /// when CG fails to produce a descent direction.
    fn descent_direction<E: Energy>(&self, energy: &E) -> Result<Field, OperatorError> {
        let gradient = energy.gradient();
        let norm = gradient.norm();
        let forcing = norm.sqrt().min(0.5);
        let controller = GradientNormController::new(self.max_cg_iterations, forcing * norm);
        let rhs = gradient.scaled(-1.0);
        let result = ConjugateGradient::new(controller).solve(&MetricOperator(energy), &rhs, None, None)?;
        let usable = result.iterations > 0
            && result.solution.is_finite()
            && gradient.dot(&result.solution) < 0.0;
        if usable {
            if result.status == SolverStatus::Breakdown {
                debug!("[newton] CG curvature breakdown after {} iterations", result.iterations);
            }
            Ok(result.solution)
        } else {
            debug!("[newton] falling back to steepest descent ({})", result.status);
            Ok(rhs)
        }
    }
}

/// Backtracking from the full Newton step until the Armijo condition holds.
fn line_search<E: Energy>(energy: &E, direction: &Field, slope: f64) -> Result<Option<E>, OperatorError> {
    let mut step = 1.0;
    for _ in 0..MAX_BACKTRACKS {
        let mut position = energy.position().clone();
        position.axpy(step, direction);
        let candidate = energy.at(position)?;
        let value = candidate.value();
        if value.is_finite() && value <= energy.value() + ARMIJO_C1 * step * slope {
            return Ok(Some(candidate));
        }
        step *= 0.5;
    }
    Ok(None)
}
