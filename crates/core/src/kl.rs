//! Metric Gaussian variational inference (MGVI) energy.
//!
//! The posterior around a latent position `p` is approximated by a Gaussian
//! whose covariance is the inverse Hamiltonian metric `M(p)⁻¹`. Residual
//! samples `xᵢ ~ N(0, M⁻¹)` are drawn once and then kept fixed while the
//! mean is optimised, so the energy
//!
//! ```text
//! KL(p) = 1/K Σᵢ H(p + xᵢ)
//! ```
//!
//! is a deterministic function of `p` that Newton-CG can minimise.

use log::{debug, warn};
use rand::Rng;

use crate::backend::SpectralBackend;
use crate::cg::{ConjugateGradient, SolverStatus};
use crate::controller::ConvergenceController;
use crate::field::Field;
use crate::hamiltonian::{HamiltonianPoint, StandardHamiltonian};
use crate::newton::Energy;
use crate::operator::{LinearOperator, OperatorError};

/// Outcome of drawing the residual samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct SamplingReport {
    pub samples: usize,
    pub unconverged: usize,
    pub total_iterations: usize,
}

pub struct MetricGaussianKL<'a, B, R> {
    hamiltonian: StandardHamiltonian<'a, B, R>,
    position: Field,
    residuals: Vec<Field>,
    value: f64,
    gradient: Field,
    points: Vec<HamiltonianPoint<'a, B, R>>,
}

impl<'a, B, R> MetricGaussianKL<'a, B, R>
where
    B: SpectralBackend,
    R: LinearOperator,
{
    /// Draw `n_samples` residuals at `position` (doubled to `±xᵢ` when
    /// `mirror` is set) and evaluate the energy there.
    ///
    /// Each residual solves `M x = y` for a metric draw `y`; a capped solve
    /// is kept and counted in the returned report.
    pub fn new<C, G>(
        hamiltonian: StandardHamiltonian<'a, B, R>,
        position: Field,
        n_samples: usize,
        mirror: bool,
        controller: C,
        rng: &mut G,
    ) -> Result<(Self, SamplingReport), OperatorError>
    where
        C: ConvergenceController,
        G: Rng + ?Sized,
    {
        let center = hamiltonian.at(&position)?;
        let solver = ConjugateGradient::new(controller);
        let mut report = SamplingReport::default();
        let mut residuals = Vec::with_capacity(if mirror { 2 * n_samples } else { n_samples });

        for index in 0..n_samples {
            let draw = center.draw_metric_sample(rng)?;
            let result = solver.solve(&center, &draw, None, None)?;
            report.total_iterations += result.iterations;
            if result.status != SolverStatus::Converged {
                report.unconverged += 1;
                warn!(
                    "[kl] residual sample {index}: {} after {} iterations; keeping it",
                    result.status, result.iterations
                );
            } else {
                debug!("[kl] residual sample {index}: {} iterations", result.iterations);
            }
            if mirror {
                residuals.push(result.solution.scaled(-1.0));
            }
            residuals.push(result.solution);
        }
        report.samples = residuals.len();

        let energy = Self::evaluate(hamiltonian, position, residuals)?;
        Ok((energy, report))
    }

    fn evaluate(
        hamiltonian: StandardHamiltonian<'a, B, R>,
        position: Field,
        residuals: Vec<Field>,
    ) -> Result<Self, OperatorError> {
        let points = if residuals.is_empty() {
            vec![hamiltonian.at(&position)?]
        } else {
            residuals
                .iter()
                .map(|x| hamiltonian.at(&position.plus(x)))
                .collect::<Result<Vec<_>, _>>()?
        };
        let weight = 1.0 / points.len() as f64;
        let value = weight * points.iter().map(|p| p.value).sum::<f64>();
        let mut gradient = Field::zeros(position.space());
        for point in &points {
            gradient.axpy(weight, &point.gradient);
        }
        Ok(Self {
            hamiltonian,
            position,
            residuals,
            value,
            gradient,
            points,
        })
    }

    pub fn residuals(&self) -> &[Field] {
        &self.residuals
    }

    /// Latent positions `p + xᵢ` (just `p` without samples).
    pub fn sample_positions(&self) -> Vec<Field> {
        if self.residuals.is_empty() {
            return vec![self.position.clone()];
        }
        self.residuals
            .iter()
            .map(|x| self.position.plus(x))
            .collect()
    }

    pub fn hamiltonian(&self) -> StandardHamiltonian<'a, B, R> {
        self.hamiltonian
    }
}

impl<B, R> Energy for MetricGaussianKL<'_, B, R>
where
    B: SpectralBackend,
    R: LinearOperator,
{
    fn position(&self) -> &Field {
        &self.position
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn gradient(&self) -> &Field {
        &self.gradient
    }

    fn apply_metric(&self, input: &Field) -> Result<Field, OperatorError> {
        let weight = 1.0 / self.points.len() as f64;
        let mut out = Field::zeros(input.space());
        for point in &self.points {
            out.axpy(weight, &point.apply(input)?);
        }
        Ok(out)
    }

    fn at(&self, position: Field) -> Result<Self, OperatorError> {
        Self::evaluate(self.hamiltonian, position, self.residuals.clone())
    }
}
