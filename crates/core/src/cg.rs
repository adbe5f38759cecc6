//! Preconditioned conjugate gradient for implicit SPD operators.
//!
//! The solver only ever asks the operator for matrix-vector products. It
//! minimises `½ xᵀAx − bᵀx`, whose gradient is the residual `Ax − b`, and
//! hands the residual norm to a [`ConvergenceController`] after every step.
//! Hitting the iteration cap is not an error: the last iterate is returned
//! together with a [`SolverStatus`] describing why the loop stopped.

use log::debug;
use serde::Serialize;

use crate::controller::{Convergence, ConvergenceController, FailureReason, IterationState};
use crate::field::Field;
use crate::operator::{LinearOperator, OperatorError, check_space};

/// Residual recomputation interval, bounding round-off drift of the
/// recursively updated residual.
pub const DEFAULT_RESET_INTERVAL: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    Converged,
    IterationLimit,
    NonFinite,
    /// The operator (or preconditioner) showed non-positive curvature.
    Breakdown,
}

impl SolverStatus {
    pub fn is_converged(self) -> bool {
        matches!(self, SolverStatus::Converged)
    }
}

impl From<FailureReason> for SolverStatus {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::IterationLimit => SolverStatus::IterationLimit,
            FailureReason::NonFinite => SolverStatus::NonFinite,
        }
    }
}

impl std::fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SolverStatus::Converged => "converged",
            SolverStatus::IterationLimit => "iteration limit reached",
            SolverStatus::NonFinite => "non-finite residual",
            SolverStatus::Breakdown => "curvature breakdown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct CgResult {
    pub solution: Field,
    pub iterations: usize,
    pub residual_norm: f64,
    pub status: SolverStatus,
}

impl CgResult {
    pub fn converged(&self) -> bool {
        self.status.is_converged()
    }
}

#[derive(Debug, Clone)]
pub struct ConjugateGradient<C> {
    controller: C,
    reset_interval: usize,
}

impl<C: ConvergenceController> ConjugateGradient<C> {
    pub fn new(controller: C) -> Self {
        Self {
            controller,
            reset_interval: DEFAULT_RESET_INTERVAL,
        }
    }

    pub fn with_reset_interval(mut self, reset_interval: usize) -> Self {
        self.reset_interval = reset_interval.max(1);
        self
    }

    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Solve `op · x = rhs`.
    ///
    /// `preconditioner` applies an approximation of `op⁻¹` (for example the
    /// prior covariance when inverting a Wiener filter curvature).
    pub fn solve<A: LinearOperator + ?Sized>(
        &self,
        op: &A,
        rhs: &Field,
        initial: Option<Field>,
        preconditioner: Option<&dyn LinearOperator>,
    ) -> Result<CgResult, OperatorError> {
        check_space("ConjugateGradient", op.domain(), rhs)?;
        check_space("ConjugateGradient", op.target(), rhs)?;

        let mut x = match initial {
            Some(x0) => {
                check_space("ConjugateGradient", op.domain(), &x0)?;
                x0
            }
            None => Field::zeros(op.domain()),
        };
        let mut r = residual(op, rhs, &x)?;
        let mut z = precondition(preconditioner, &r)?;
        let mut p = z.clone();
        let mut rz = r.dot(&z);
        let initial_norm = r.norm();
        let mut iteration = 0usize;

        let status = loop {
            let norm = r.norm();
            if norm == 0.0 {
                break SolverStatus::Converged;
            }
            let state = IterationState {
                iteration,
                gradient_norm: norm,
                gradient_inf_norm: r.max_abs(),
                initial_gradient_norm: initial_norm,
            };
            match self.controller.check(&state) {
                Convergence::Converged => break SolverStatus::Converged,
                Convergence::Failed(reason) => break reason.into(),
                Convergence::Continue => {}
            }

            let q = op.apply(&p)?;
            let curvature = p.dot(&q);
            if !(curvature > 0.0) {
                break if curvature.is_finite() {
                    SolverStatus::Breakdown
                } else {
                    SolverStatus::NonFinite
                };
            }
            let alpha = rz / curvature;
            x.axpy(alpha, &p);
            iteration += 1;

            if iteration % self.reset_interval == 0 {
                r = residual(op, rhs, &x)?;
            } else {
                r.axpy(-alpha, &q);
            }
            z = precondition(preconditioner, &r)?;
            let rz_new = r.dot(&z);
            if rz_new < 0.0 {
                break SolverStatus::Breakdown;
            }
            let beta = rz_new / rz;
            p.scale(beta);
            p.axpy(1.0, &z);
            rz = rz_new;
        };

        let residual_norm = r.norm();
        debug!(
            "[cg] {} after {} iterations (residual={:.3e}, initial={:.3e})",
            status, iteration, residual_norm, initial_norm
        );
        Ok(CgResult {
            solution: x,
            iterations: iteration,
            residual_norm,
            status,
        })
    }
}

/// `rhs − op · x`
fn residual<A: LinearOperator + ?Sized>(op: &A, rhs: &Field, x: &Field) -> Result<Field, OperatorError> {
    let mut r = op.apply(x)?;
    r.scale(-1.0);
    r.axpy(1.0, rhs);
    Ok(r)
}

fn precondition(
    preconditioner: Option<&dyn LinearOperator>,
    r: &Field,
) -> Result<Field, OperatorError> {
    match preconditioner {
        Some(op) => op.apply(r),
        None => Ok(r.clone()),
    }
}
