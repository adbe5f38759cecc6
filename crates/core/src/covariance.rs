//! Covariance operators: stationary priors built from a power spectrum and
//! simple noise covariances.

use rand::Rng;
use thiserror::Error;

use crate::backend::SpectralBackend;
use crate::field::{Field, Space};
use crate::grid::Grid2D;
use crate::harmonic::HarmonicTransform;
use crate::operator::{DiagonalOperator, LinearOperator, OperatorError, ScalingOperator, check_space};
use crate::spectrum::{PowerSpectrum, sample_spectrum};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CovarianceError {
    #[error("power spectrum must be positive and finite, got {value} at |k|={k}")]
    NonPositivePower { k: f64, value: f64 },
    #[error("noise variance must be positive and finite, got {0}")]
    InvalidVariance(f64),
    #[error("invalid amplitude prior: {0}")]
    InvalidAmplitudePrior(&'static str),
}

/// Self-adjoint, positive-definite operator that can also be sampled from.
pub trait Covariance: LinearOperator {
    /// Draw a zero-mean Gaussian realisation with this covariance.
    fn draw_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Field;

    /// `count` independent draws, consuming the random stream exactly like
    /// `count` calls to [`Covariance::draw_sample`].
    fn draw_samples<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<Field> {
        (0..count).map(|_| self.draw_sample(rng)).collect()
    }
}

impl<T: Covariance> Covariance for &T {
    fn draw_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Field {
        (**self).draw_sample(rng)
    }

    fn draw_samples<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<Field> {
        (**self).draw_samples(count, rng)
    }
}

/// Diagonal operator `P(|k|)` on the harmonic codomain of `grid`.
pub fn create_power_operator<P: PowerSpectrum + ?Sized>(
    grid: Grid2D,
    spectrum: &P,
) -> Result<DiagonalOperator, CovarianceError> {
    let power = validated_power(grid, spectrum)?;
    Ok(DiagonalOperator::new(Field::from_vec(Space::Harmonic(grid), power)))
}

fn validated_power<P: PowerSpectrum + ?Sized>(
    grid: Grid2D,
    spectrum: &P,
) -> Result<Vec<f64>, CovarianceError> {
    let power = sample_spectrum(grid, spectrum);
    for (&k, &value) in grid.k_lengths().iter().zip(&power) {
        if !(value > 0.0 && value.is_finite()) {
            return Err(CovarianceError::NonPositivePower { k, value });
        }
    }
    Ok(power)
}

/// Stationary prior covariance `S = HT · P · HTᵀ` on position space.
///
/// Applying `S`, its inverse and drawing samples each cost two Hartley
/// transforms (one for sampling); the matrix is never formed.
#[derive(Debug, Clone)]
pub struct PriorCovariance<B> {
    transform: HarmonicTransform<B>,
    power: Vec<f64>,
    amplitude: Vec<f64>,
}

impl<B: SpectralBackend> PriorCovariance<B> {
    pub fn new<P: PowerSpectrum + ?Sized>(
        backend: B,
        grid: Grid2D,
        spectrum: &P,
    ) -> Result<Self, CovarianceError> {
        let power = validated_power(grid, spectrum)?;
        let amplitude = power.iter().map(|p| p.sqrt()).collect();
        Ok(Self {
            transform: HarmonicTransform::new(backend, grid),
            power,
            amplitude,
        })
    }

    pub fn grid(&self) -> Grid2D {
        self.transform.grid()
    }

    pub fn power(&self) -> &[f64] {
        &self.power
    }

    /// `sqrt(P(|k|))`, the harmonic amplitude of a prior draw.
    pub fn amplitude(&self) -> &[f64] {
        &self.amplitude
    }

    pub fn transform(&self) -> &HarmonicTransform<B> {
        &self.transform
    }

    fn scale_harmonic(&self, mut harmonic: Field, scales: impl Fn(usize) -> f64) -> Field {
        for (idx, value) in harmonic.as_mut_slice().iter_mut().enumerate() {
            *value *= scales(idx);
        }
        harmonic
    }
}

impl<B: SpectralBackend> LinearOperator for PriorCovariance<B> {
    fn domain(&self) -> Space {
        self.transform.target()
    }
    fn target(&self) -> Space {
        self.transform.target()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.domain(), input)?;
        let harmonic = self.transform.apply_adjoint(input)?;
        let harmonic = self.scale_harmonic(harmonic, |idx| self.power[idx]);
        self.transform.apply(&harmonic)
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        self.apply(input)
    }
    fn apply_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.domain(), input)?;
        let harmonic = self.transform.apply_inverse(input)?;
        let harmonic = self.scale_harmonic(harmonic, |idx| 1.0 / self.power[idx]);
        self.transform.apply_adjoint_inverse(&harmonic)
    }
    fn apply_adjoint_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        self.apply_inverse(input)
    }
    fn name(&self) -> &'static str {
        "PriorCovariance"
    }
}

impl<B: SpectralBackend> Covariance for PriorCovariance<B> {
    fn draw_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Field {
        let excitation = Field::random_normal(self.transform.domain(), rng);
        let harmonic = self.scale_harmonic(excitation, |idx| self.amplitude[idx]);
        self.transform.synthesize(harmonic.into_vec())
    }

    fn draw_samples<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<Field> {
        let batch = (0..count)
            .map(|_| {
                let excitation = Field::random_normal(self.transform.domain(), rng);
                self.scale_harmonic(excitation, |idx| self.amplitude[idx])
            })
            .collect();
        self.transform.synthesize_batch(batch)
    }
}

/// Noise covariance `σ² · 1`.
pub fn scalar_noise(space: Space, variance: f64) -> Result<ScalingOperator, CovarianceError> {
    if !(variance > 0.0 && variance.is_finite()) {
        return Err(CovarianceError::InvalidVariance(variance));
    }
    Ok(ScalingOperator::new(space, variance))
}

impl Covariance for ScalingOperator {
    fn draw_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Field {
        Field::random_normal(self.domain(), rng).scaled(self.factor().max(0.0).sqrt())
    }
}

impl Covariance for DiagonalOperator {
    fn draw_sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Field {
        Field::random_normal(self.domain(), rng)
            .zip_map(self.diagonal(), |xi, var| xi * var.max(0.0).sqrt())
    }
}
