//! Standard Hamiltonian `H(ξ) = L(r(ξ)) + ½‖ξ‖²` and its curvature.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::backend::SpectralBackend;
use crate::field::{Field, Space};
use crate::likelihood::Likelihood;
use crate::model::{ModelJacobian, SignalModel};
use crate::operator::{LinearOperator, OperatorError, check_space};

pub struct StandardHamiltonian<'a, B, R> {
    model: &'a SignalModel<B, R>,
    likelihood: &'a Likelihood,
}

impl<B, R> Clone for StandardHamiltonian<'_, B, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B, R> Copy for StandardHamiltonian<'_, B, R> {}

impl<'a, B, R> StandardHamiltonian<'a, B, R>
where
    B: SpectralBackend,
    R: LinearOperator,
{
    pub fn new(model: &'a SignalModel<B, R>, likelihood: &'a Likelihood) -> Result<Self, OperatorError> {
        check_space("StandardHamiltonian", model.data_space(), likelihood.data())?;
        Ok(Self { model, likelihood })
    }

    pub fn model(&self) -> &'a SignalModel<B, R> {
        self.model
    }

    pub fn likelihood(&self) -> &'a Likelihood {
        self.likelihood
    }

    /// Evaluate value, gradient and metric ingredients at `position`.
    pub fn at(&self, position: &Field) -> Result<HamiltonianPoint<'a, B, R>, OperatorError> {
        let lin = self.model.linearize(position)?;
        let response = lin.value;
        let value = self.likelihood.energy(&response) + 0.5 * position.dot(position);
        let mut gradient = lin
            .jacobian
            .apply_adjoint(&self.likelihood.gradient(&response))?;
        gradient.axpy(1.0, position);
        let fisher = self.likelihood.fisher(&response);
        Ok(HamiltonianPoint {
            value,
            gradient,
            fisher,
            jacobian: lin.jacobian,
        })
    }
}

/// The Hamiltonian linearised at one latent position.
///
/// As a [`LinearOperator`] it applies the metric `M = 1 + JᵀFJ`.
pub struct HamiltonianPoint<'a, B, R> {
    pub value: f64,
    pub gradient: Field,
    fisher: Field,
    jacobian: ModelJacobian<'a, B, R>,
}

impl<B, R> HamiltonianPoint<'_, B, R>
where
    B: SpectralBackend,
    R: LinearOperator,
{
    /// Zero-mean draw with covariance `M`: `η₀ + Jᵀ(√F ⊙ η₁)`.
    pub fn draw_metric_sample<G: Rng + ?Sized>(&self, rng: &mut G) -> Result<Field, OperatorError> {
        let mut sample = Field::random_normal(self.domain(), rng);
        let weights = self
            .fisher
            .as_slice()
            .iter()
            .map(|f| f.max(0.0).sqrt() * rng.sample::<f64, _>(StandardNormal))
            .collect();
        let weighted = Field::from_vec(self.fisher.space(), weights);
        sample.axpy(1.0, &self.jacobian.apply_adjoint(&weighted)?);
        Ok(sample)
    }
}

impl<B, R> LinearOperator for HamiltonianPoint<'_, B, R>
where
    B: SpectralBackend,
    R: LinearOperator,
{
    fn domain(&self) -> Space {
        self.jacobian.domain()
    }
    fn target(&self) -> Space {
        self.jacobian.domain()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        let projected = self.jacobian.apply(input)?;
        let mut out = self.jacobian.apply_adjoint(&projected.hadamard(&self.fisher))?;
        out.axpy(1.0, input);
        Ok(out)
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        self.apply(input)
    }
    fn name(&self) -> &'static str {
        "HamiltonianMetric"
    }
}
