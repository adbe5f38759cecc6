#![cfg(test)]

use super::_tests_support::{DenseOperator, ramp_field};
use super::cg::{ConjugateGradient, SolverStatus};
use super::controller::{
    Convergence, ConvergenceController, FailureReason, GradInfNormController,
    GradientNormController, IterationState,
};
use super::field::{Field, Space};
use super::operator::{DiagonalOperator, LinearOperator, ScalingOperator};

fn residual_norm<A: LinearOperator>(op: &A, x: &Field, rhs: &Field) -> f64 {
    op.apply(x).unwrap().minus(rhs).norm()
}

#[test]
fn converged_solutions_meet_the_tolerance() {
    for (n, shift) in [(4, 0.5), (12, 0.1), (30, 1.0)] {
        let op = DenseOperator::spd(n, shift);
        let rhs = ramp_field(op.space());
        let tol = 1e-9;
        let solver = ConjugateGradient::new(GradientNormController::new(10 * n, tol));
        let result = solver.solve(&op, &rhs, None, None).unwrap();
        assert_eq!(result.status, SolverStatus::Converged, "n={n}");
        assert!(result.residual_norm <= tol);
        // The recursive residual tracks the true one closely.
        assert!(residual_norm(&op, &result.solution, &rhs) <= 10.0 * tol);
    }
}

#[test]
fn capped_solve_returns_last_iterate_and_flags_it() {
    let op = DenseOperator::spd(40, 1e-3);
    let rhs = ramp_field(op.space());
    let solver = ConjugateGradient::new(GradientNormController::new(3, 1e-14));
    let result = solver.solve(&op, &rhs, None, None).unwrap();
    assert_eq!(result.status, SolverStatus::IterationLimit);
    assert_eq!(result.iterations, 3);
    assert!(!result.converged());
    // CG decreases ½xᵀAx − bᵀx monotonically from 0 at x = 0.
    let x = &result.solution;
    let objective = 0.5 * x.dot(&op.apply(x).unwrap()) - rhs.dot(x);
    assert!(objective < 0.0);
}

#[test]
fn either_tolerance_or_cap_holds() {
    for cap in [1, 2, 5, 50] {
        let op = DenseOperator::spd(16, 0.05);
        let rhs = ramp_field(op.space());
        let tol = 1e-8;
        let result = ConjugateGradient::new(GradientNormController::new(cap, tol))
            .solve(&op, &rhs, None, None)
            .unwrap();
        let met = residual_norm(&op, &result.solution, &rhs) <= 10.0 * tol;
        assert!(
            met || result.iterations == cap,
            "cap={cap}: status {} after {} iterations",
            result.status,
            result.iterations
        );
    }
}

#[test]
fn repeated_solves_are_identical() {
    let op = DenseOperator::spd(20, 0.2);
    let rhs = ramp_field(op.space());
    let solver = ConjugateGradient::new(GradientNormController::new(100, 1e-10));
    let first = solver.solve(&op, &rhs, None, None).unwrap();
    let second = solver.solve(&op, &rhs, None, None).unwrap();
    assert_eq!(first.solution, second.solution);
    assert_eq!(first.iterations, second.iterations);
}

#[test]
fn preconditioner_equal_to_inverse_converges_in_one_step() {
    let space = Space::Unstructured(8);
    let diag = ramp_field(space).map(|v| 3.0 + 2.0 * v);
    let op = DiagonalOperator::new(diag.clone());
    let precond = DiagonalOperator::new(diag.map(|d| 1.0 / d));
    let rhs = Field::full(space, 1.0);
    let result = ConjugateGradient::new(GradientNormController::new(50, 1e-12))
        .solve(&op, &rhs, None, Some(&precond))
        .unwrap();
    assert!(result.converged());
    assert_eq!(result.iterations, 1);
}

#[test]
fn zero_rhs_is_immediately_converged() {
    let op = DenseOperator::spd(5, 1.0);
    let rhs = Field::zeros(op.space());
    let result = ConjugateGradient::new(GradientNormController::default())
        .solve(&op, &rhs, None, None)
        .unwrap();
    assert!(result.converged());
    assert_eq!(result.iterations, 0);
    assert_eq!(result.solution, rhs);
}

#[test]
fn warm_start_at_solution_needs_no_iterations() {
    let op = DenseOperator::spd(6, 1.0);
    let x = ramp_field(op.space());
    let rhs = op.apply(&x).unwrap();
    let result = ConjugateGradient::new(GradientNormController::new(10, 1e-10))
        .solve(&op, &rhs, Some(x.clone()), None)
        .unwrap();
    assert!(result.converged());
    assert_eq!(result.iterations, 0);
}

#[test]
fn indefinite_operator_reports_breakdown() {
    let space = Space::Unstructured(3);
    let op = ScalingOperator::new(space, -1.0);
    let result = ConjugateGradient::new(GradientNormController::default())
        .solve(&op, &Field::full(space, 1.0), None, None)
        .unwrap();
    assert_eq!(result.status, SolverStatus::Breakdown);
}

#[test]
fn rhs_on_wrong_space_is_rejected() {
    let op = DenseOperator::spd(3, 1.0);
    let rhs = Field::zeros(Space::Unstructured(4));
    assert!(
        ConjugateGradient::new(GradientNormController::default())
            .solve(&op, &rhs, None, None)
            .is_err()
    );
}

#[test]
fn gradient_norm_controller_decisions() {
    let controller = GradientNormController {
        iteration_limit: 10,
        tol_abs_gradnorm: Some(1e-3),
        tol_rel_gradnorm: Some(1e-2),
    };
    let state = |iteration, norm| IterationState {
        iteration,
        gradient_norm: norm,
        gradient_inf_norm: norm,
        initial_gradient_norm: 1.0,
    };
    assert_eq!(controller.check(&state(0, 1.0)), Convergence::Continue);
    assert_eq!(controller.check(&state(3, 5e-4)), Convergence::Converged);
    assert_eq!(controller.check(&state(3, 5e-3)), Convergence::Converged);
    assert_eq!(
        controller.check(&state(10, 0.5)),
        Convergence::Failed(FailureReason::IterationLimit)
    );
    assert_eq!(
        controller.check(&state(1, f64::NAN)),
        Convergence::Failed(FailureReason::NonFinite)
    );
}

#[test]
fn controller_without_tolerance_runs_to_the_limit() {
    let controller = GradientNormController::with_limit(4);
    let state = IterationState {
        iteration: 3,
        gradient_norm: 1e-300,
        gradient_inf_norm: 1e-300,
        initial_gradient_norm: 1.0,
    };
    assert_eq!(controller.check(&state), Convergence::Continue);
    assert!(GradientNormController::with_limit(0).validate().is_err());
}

#[test]
fn grad_inf_norm_controller_uses_largest_component() {
    let controller = GradInfNormController::new(1e-6, 5);
    let state = IterationState {
        iteration: 2,
        gradient_norm: 1e-3,
        gradient_inf_norm: 1e-7,
        initial_gradient_norm: 1.0,
    };
    assert_eq!(controller.check(&state), Convergence::Converged);
    assert!(GradInfNormController::new(-1.0, 5).validate().is_err());
}
