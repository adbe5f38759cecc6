//! Wiener filter: the posterior mean of a linear Gaussian model.
//!
//! With prior covariance `S`, response `R` and noise covariance `N` the
//! posterior is Gaussian with covariance `D = (S⁻¹ + RᵀN⁻¹R)⁻¹` and mean
//! `m = D j`, where `j = RᵀN⁻¹d` is the information source. `D⁻¹` is only
//! ever applied, and `D` is applied by running conjugate gradient on it.

use log::{info, warn};

use crate::cg::{CgResult, ConjugateGradient, SolverStatus};
use crate::controller::ConvergenceController;
use crate::covariance::Covariance;
use crate::field::{Field, Space};
use crate::operator::{LinearOperator, OperatorError, ScalingOperator, check_space};

/// The posterior curvature `D⁻¹ = S⁻¹ + RᵀN⁻¹R`, applied implicitly.
#[derive(Debug, Clone)]
pub struct WienerCurvature<S, R, N> {
    prior: S,
    response: R,
    noise: N,
}

impl<S, R, N> WienerCurvature<S, R, N>
where
    S: LinearOperator,
    R: LinearOperator,
    N: LinearOperator,
{
    pub fn new(prior: S, response: R, noise: N) -> Result<Self, OperatorError> {
        if response.domain() != prior.domain() {
            return Err(OperatorError::IncompatibleSpaces {
                left: prior.domain(),
                right: response.domain(),
            });
        }
        if response.target() != noise.domain() {
            return Err(OperatorError::IncompatibleSpaces {
                left: noise.domain(),
                right: response.target(),
            });
        }
        Ok(Self {
            prior,
            response,
            noise,
        })
    }

    pub fn prior(&self) -> &S {
        &self.prior
    }

    pub fn response(&self) -> &R {
        &self.response
    }

    pub fn noise(&self) -> &N {
        &self.noise
    }

    /// `RᵀN⁻¹d`
    pub fn information_source(&self, data: &Field) -> Result<Field, OperatorError> {
        check_space("WienerCurvature", self.response.target(), data)?;
        self.response
            .apply_adjoint(&self.noise.apply_inverse(data)?)
    }
}

impl<S, R, N> LinearOperator for WienerCurvature<S, R, N>
where
    S: LinearOperator,
    R: LinearOperator,
    N: LinearOperator,
{
    fn domain(&self) -> Space {
        self.prior.domain()
    }
    fn target(&self) -> Space {
        self.prior.domain()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.domain(), input)?;
        let mut out = self.prior.apply_inverse(input)?;
        let projected = self.response.apply(input)?;
        out.axpy(1.0, &self.information_source(&projected)?);
        Ok(out)
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        self.apply(input)
    }
    fn name(&self) -> &'static str {
        "WienerCurvature"
    }
}

/// Gives an operator an `apply_inverse` by running conjugate gradient.
///
/// A capped solve still returns its last iterate; the status is logged at
/// warn level. Use [`InversionEnabler::solve`] to inspect it directly.
#[derive(Debug, Clone)]
pub struct InversionEnabler<A, P, C> {
    op: A,
    preconditioner: P,
    solver: ConjugateGradient<C>,
}

impl<A, C> InversionEnabler<A, ScalingOperator, C>
where
    A: LinearOperator,
    C: ConvergenceController,
{
    pub fn unpreconditioned(op: A, controller: C) -> Self {
        let preconditioner = ScalingOperator::identity(op.domain());
        Self::new(op, preconditioner, controller)
    }
}

impl<A, P, C> InversionEnabler<A, P, C>
where
    A: LinearOperator,
    P: LinearOperator,
    C: ConvergenceController,
{
    /// `preconditioner` should approximate `op⁻¹`.
    pub fn new(op: A, preconditioner: P, controller: C) -> Self {
        Self {
            op,
            preconditioner,
            solver: ConjugateGradient::new(controller),
        }
    }

    pub fn operator(&self) -> &A {
        &self.op
    }

    pub fn solve(&self, rhs: &Field, initial: Option<Field>) -> Result<CgResult, OperatorError> {
        self.solver
            .solve(&self.op, rhs, initial, Some(&self.preconditioner))
    }
}

impl<A, P, C> LinearOperator for InversionEnabler<A, P, C>
where
    A: LinearOperator,
    P: LinearOperator,
    C: ConvergenceController,
{
    fn domain(&self) -> Space {
        self.op.domain()
    }
    fn target(&self) -> Space {
        self.op.target()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        self.op.apply(input)
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        self.op.apply_adjoint(input)
    }
    fn apply_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        let result = self.solve(input, None)?;
        if !result.converged() {
            warn!(
                "[inversion] {}: {} after {} iterations (residual={:.3e})",
                self.op.name(),
                result.status,
                result.iterations,
                result.residual_norm
            );
        }
        Ok(result.solution)
    }
    fn apply_adjoint_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        self.apply_inverse(input)
    }
    fn name(&self) -> &'static str {
        "InversionEnabler"
    }
}

#[derive(Debug, Clone)]
pub struct WienerResult {
    pub mean: Field,
    pub iterations: usize,
    pub residual_norm: f64,
    pub status: SolverStatus,
}

impl WienerResult {
    pub fn converged(&self) -> bool {
        self.status.is_converged()
    }
}

impl From<CgResult> for WienerResult {
    fn from(result: CgResult) -> Self {
        Self {
            mean: result.solution,
            iterations: result.iterations,
            residual_norm: result.residual_norm,
            status: result.status,
        }
    }
}

/// Linear Gaussian posterior for prior `S`, response `R` and noise `N`.
///
/// The prior covariance doubles as the conjugate-gradient preconditioner:
/// `S · D⁻¹ = 1 + S RᵀN⁻¹R` is close to the identity wherever the data are
/// uninformative.
pub struct WienerFilter<S, R, N, C> {
    curvature: InversionEnabler<WienerCurvature<S, R, N>, S, C>,
}

impl<S, R, N, C> WienerFilter<S, R, N, C>
where
    S: Covariance + Clone,
    R: LinearOperator,
    N: Covariance,
    C: ConvergenceController,
{
    pub fn new(prior: S, response: R, noise: N, controller: C) -> Result<Self, OperatorError> {
        let preconditioner = prior.clone();
        let curvature = WienerCurvature::new(prior, response, noise)?;
        Ok(Self {
            curvature: InversionEnabler::new(curvature, preconditioner, controller),
        })
    }

    pub fn prior(&self) -> &S {
        self.curvature.operator().prior()
    }

    pub fn response(&self) -> &R {
        self.curvature.operator().response()
    }

    pub fn noise(&self) -> &N {
        self.curvature.operator().noise()
    }

    /// `D⁻¹`, solvable through `apply_inverse`.
    pub fn curvature(&self) -> &InversionEnabler<WienerCurvature<S, R, N>, S, C> {
        &self.curvature
    }

    pub fn information_source(&self, data: &Field) -> Result<Field, OperatorError> {
        self.curvature.operator().information_source(data)
    }

    /// Solve `D⁻¹ m = j` for the posterior mean.
    pub fn posterior_mean(&self, data: &Field) -> Result<WienerResult, OperatorError> {
        let j = self.information_source(data)?;
        let result: WienerResult = self.curvature.solve(&j, None)?.into();
        if result.converged() {
            info!(
                "[wiener] converged after {} iterations (residual={:.3e})",
                result.iterations, result.residual_norm
            );
        } else {
            warn!(
                "[wiener] {} after {} iterations (residual={:.3e}); using last iterate",
                result.status, result.iterations, result.residual_norm
            );
        }
        Ok(result)
    }
}
