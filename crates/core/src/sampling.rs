//! Posterior samples of the Wiener filter and running field statistics.

use log::{debug, warn};
use rand::Rng;

use crate::cg::SolverStatus;
use crate::controller::ConvergenceController;
use crate::covariance::Covariance;
use crate::field::Field;
use crate::operator::{LinearOperator, OperatorError};
use crate::wiener::WienerFilter;

#[derive(Debug, Clone)]
pub struct PosteriorSample {
    /// `m + x` with `x ~ N(0, D)`.
    pub field: Field,
    pub iterations: usize,
    pub status: SolverStatus,
}

impl<S, R, N, C> WienerFilter<S, R, N, C>
where
    S: Covariance + Clone,
    R: LinearOperator,
    N: Covariance,
    C: ConvergenceController,
{
    /// Zero-mean draw from the posterior covariance `D`.
    ///
    /// A prior draw `s ~ S` and a noise draw `n ~ N` give the synthetic
    /// source `y = S⁻¹s + RᵀN⁻¹n`, whose covariance is exactly `D⁻¹`, so
    /// `D y ~ N(0, D)`. The solve reuses the filter's controller; a capped
    /// solve yields a degraded but usable residual.
    pub fn draw_residual<G: Rng + ?Sized>(
        &self,
        rng: &mut G,
    ) -> Result<(Field, usize, SolverStatus), OperatorError> {
        let prior_draw = self.prior().draw_sample(rng);
        self.residual_from(prior_draw, rng)
    }

    fn residual_from<G: Rng + ?Sized>(
        &self,
        prior_draw: Field,
        rng: &mut G,
    ) -> Result<(Field, usize, SolverStatus), OperatorError> {
        let noise_draw = self.noise().draw_sample(rng);
        let mut source = self.prior().apply_inverse(&prior_draw)?;
        source.axpy(1.0, &self.information_source(&noise_draw)?);
        let result = self.curvature().solve(&source, None)?;
        Ok((result.solution, result.iterations, result.status))
    }

    /// `count` independent posterior samples around `mean`.
    pub fn posterior_samples<G: Rng + ?Sized>(
        &self,
        mean: &Field,
        count: usize,
        rng: &mut G,
    ) -> Result<Vec<PosteriorSample>, OperatorError> {
        let mut samples = Vec::with_capacity(count);
        // Prior draws for the whole batch come first.
        let prior_draws = self.prior().draw_samples(count, rng);
        for (index, prior_draw) in prior_draws.into_iter().enumerate() {
            let (residual, iterations, status) = self.residual_from(prior_draw, rng)?;
            if status.is_converged() {
                debug!("[sampling] sample {index}: {iterations} iterations");
            } else {
                warn!("[sampling] sample {index}: {status} after {iterations} iterations; keeping it");
            }
            samples.push(PosteriorSample {
                field: mean.plus(&residual),
                iterations,
                status,
            });
        }
        Ok(samples)
    }
}

/// Welford accumulator for pointwise mean and variance of fields.
#[derive(Debug, Clone, Default)]
pub struct StatCalculator {
    count: usize,
    mean: Option<Field>,
    m2: Option<Field>,
}

impl StatCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: &Field) {
        self.count += 1;
        let n = self.count as f64;
        match (&mut self.mean, &mut self.m2) {
            (Some(mean), Some(m2)) => {
                let delta = value.minus(mean);
                mean.axpy(1.0 / n, &delta);
                let delta_after = value.minus(mean);
                m2.axpy(1.0, &delta.hadamard(&delta_after));
            }
            (mean, m2) => {
                *mean = Some(value.clone());
                *m2 = Some(Field::zeros(value.space()));
            }
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> Option<&Field> {
        self.mean.as_ref()
    }

    /// Unbiased pointwise variance; needs at least two samples.
    pub fn variance(&self) -> Option<Field> {
        if self.count < 2 {
            return None;
        }
        let m2 = self.m2.as_ref()?;
        Some(m2.scaled(1.0 / (self.count - 1) as f64))
    }

    pub fn stddev(&self) -> Option<Field> {
        self.variance().map(|var| var.map(f64::sqrt))
    }
}

impl<'a> Extend<&'a Field> for StatCalculator {
    fn extend<I: IntoIterator<Item = &'a Field>>(&mut self, iter: I) {
        for field in iter {
            self.add(field);
        }
    }
}
