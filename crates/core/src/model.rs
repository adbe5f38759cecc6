//! Generative signal model for non-linear reconstructions.
//!
//! The latent excitation `ξ` lives on the harmonic codomain of the grid with
//! a standard-normal prior. The model maps it through
//!
//! ```text
//! s = HT(A ⊙ ξ)        correlated Gaussian field, A = sqrt(P(|k|))
//! f = clip(g(s))       point-wise non-linearity
//! r = R f              instrument response
//! ```
//!
//! The amplitude is either fixed by a spectrum or a power law whose slope
//! and intercept are themselves latent:
//!
//! ```text
//! slope     = sm + sv·ξ_s
//! intercept = im + iv·ξ_i
//! A(k)      = exp(½ (intercept + slope · ln sqrt(k² + k0²)))
//! ```
//!
//! In the second case the latent vector is `(ξ, ξ_s, ξ_i)` on
//! [`Space::Latent`], all standard normal a priori.
//!
//! [`SignalModel::linearize`] returns `r` together with the Jacobian
//! `∂r/∂latent` as a [`LinearOperator`].

use serde::{Deserialize, Serialize};

use crate::backend::SpectralBackend;
use crate::covariance::{CovarianceError, PriorCovariance};
use crate::field::{Field, Space};
use crate::grid::Grid2D;
use crate::harmonic::HarmonicTransform;
use crate::operator::{LinearOperator, OperatorError, check_space};
use crate::spectrum::{PowerSpectrum, SpectrumConfig};

/// Range used to keep Bernoulli rates away from 0 and 1.
pub const PROBABILITY_CLIP: (f64, f64) = (1e-5, 1.0 - 1e-5);

/// Latent spectral parameters appended after the excitations.
const SPECTRAL_PARAMETERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Nonlinearity {
    #[default]
    Identity,
    Exp,
    Sigmoid,
}

impl Nonlinearity {
    pub fn value(self, x: f64) -> f64 {
        match self {
            Nonlinearity::Identity => x,
            Nonlinearity::Exp => x.exp(),
            Nonlinearity::Sigmoid => sigmoid(x),
        }
    }

    pub fn derivative(self, x: f64) -> f64 {
        match self {
            Nonlinearity::Identity => 1.0,
            Nonlinearity::Exp => x.exp(),
            Nonlinearity::Sigmoid => {
                let y = sigmoid(x);
                y * (1.0 - y)
            }
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Standard deviations of the latent power-law parameters
/// (the `[amplitude]` table of a KL job).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmplitudeConfig {
    #[serde(default = "default_slope_std")]
    pub slope_std: f64,
    #[serde(default = "default_intercept_std")]
    pub intercept_std: f64,
}

fn default_slope_std() -> f64 {
    0.6
}

fn default_intercept_std() -> f64 {
    2.0
}

impl Default for AmplitudeConfig {
    fn default() -> Self {
        Self {
            slope_std: default_slope_std(),
            intercept_std: default_intercept_std(),
        }
    }
}

/// Gaussian prior on the slope and intercept of a log-log power law.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerLawPrior {
    pub slope_mean: f64,
    pub slope_std: f64,
    pub intercept_mean: f64,
    pub intercept_std: f64,
    pub k0: f64,
}

impl PowerLawPrior {
    /// Combine a `power_law` spectrum (the prior means) with the latent
    /// standard deviations. Other spectrum kinds have no latent form.
    pub fn from_config(spectrum: &SpectrumConfig, amplitude: &AmplitudeConfig) -> Option<Self> {
        match *spectrum {
            SpectrumConfig::PowerLaw {
                slope,
                intercept,
                k0,
            } => Some(Self {
                slope_mean: slope,
                slope_std: amplitude.slope_std,
                intercept_mean: intercept,
                intercept_std: amplitude.intercept_std,
                k0,
            }),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), CovarianceError> {
        let finite = [self.slope_mean, self.intercept_mean]
            .iter()
            .all(|v| v.is_finite());
        if !finite {
            return Err(CovarianceError::InvalidAmplitudePrior("means must be finite"));
        }
        let stds = [self.slope_std, self.intercept_std];
        if !stds.iter().all(|s| s.is_finite() && *s >= 0.0) {
            return Err(CovarianceError::InvalidAmplitudePrior(
                "standard deviations must be finite and non-negative",
            ));
        }
        if !(self.k0 > 0.0) {
            return Err(CovarianceError::InvalidAmplitudePrior("k0 must be positive"));
        }
        Ok(())
    }
}

/// Slope and intercept decoded from a latent vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerLawParameters {
    pub slope: f64,
    pub intercept: f64,
}

enum Amplitude {
    Fixed(Vec<f64>),
    PowerLaw {
        prior: PowerLawPrior,
        /// `ln sqrt(k² + k0²)` per harmonic mode.
        log_k: Vec<f64>,
    },
}

pub struct SignalModel<B, R> {
    transform: HarmonicTransform<B>,
    amplitude: Amplitude,
    nonlinearity: Nonlinearity,
    clip: Option<(f64, f64)>,
    response: R,
}

impl<B, R> SignalModel<B, R>
where
    B: SpectralBackend,
    R: LinearOperator,
{
    /// Model with the amplitude fixed to `sqrt(P(|k|))`.
    pub fn new<P: PowerSpectrum + ?Sized>(
        backend: B,
        grid: Grid2D,
        spectrum: &P,
        nonlinearity: Nonlinearity,
        response: R,
    ) -> Result<Self, CovarianceError> {
        // Reuse the prior's spectrum validation for the amplitudes.
        let prior = PriorCovariance::new(&backend, grid, spectrum)?;
        let amplitude = prior.amplitude().to_vec();
        Ok(Self {
            transform: HarmonicTransform::new(backend, grid),
            amplitude: Amplitude::Fixed(amplitude),
            nonlinearity,
            clip: None,
            response,
        })
    }

    /// Model whose power-law slope and intercept are inferred jointly with
    /// the excitations.
    pub fn with_learned_power_law(
        backend: B,
        grid: Grid2D,
        prior: PowerLawPrior,
        nonlinearity: Nonlinearity,
        response: R,
    ) -> Result<Self, CovarianceError> {
        prior.validate()?;
        let log_k = grid
            .k_lengths()
            .into_iter()
            .map(|k| (k * k + prior.k0 * prior.k0).sqrt().ln())
            .collect();
        Ok(Self {
            transform: HarmonicTransform::new(backend, grid),
            amplitude: Amplitude::PowerLaw { prior, log_k },
            nonlinearity,
            clip: None,
            response,
        })
    }

    /// Clamp `g(s)` into `[lo, hi]`; the derivative vanishes outside.
    pub fn with_clip(mut self, lo: f64, hi: f64) -> Self {
        self.clip = Some((lo, hi));
        self
    }

    pub fn grid(&self) -> Grid2D {
        self.transform.grid()
    }

    pub fn latent_space(&self) -> Space {
        match self.amplitude {
            Amplitude::Fixed(_) => self.transform.domain(),
            Amplitude::PowerLaw { .. } => Space::Latent {
                grid: self.grid(),
                parameters: SPECTRAL_PARAMETERS,
            },
        }
    }

    pub fn learns_spectrum(&self) -> bool {
        matches!(self.amplitude, Amplitude::PowerLaw { .. })
    }

    pub fn data_space(&self) -> Space {
        self.response.target()
    }

    pub fn nonlinearity(&self) -> Nonlinearity {
        self.nonlinearity
    }

    pub fn response(&self) -> &R {
        &self.response
    }

    pub fn backend(&self) -> &B {
        self.transform.backend()
    }

    /// Power-law parameters encoded in `latent`, if the spectrum is learned.
    pub fn power_law_parameters(&self, latent: &Field) -> Option<PowerLawParameters> {
        match &self.amplitude {
            Amplitude::Fixed(_) => None,
            Amplitude::PowerLaw { prior, .. } => {
                let [xi_s, xi_i] = self.spectral_latents(latent);
                Some(PowerLawParameters {
                    slope: prior.slope_mean + prior.slope_std * xi_s,
                    intercept: prior.intercept_mean + prior.intercept_std * xi_i,
                })
            }
        }
    }

    /// Amplitude `A(k)` per harmonic mode at `latent`.
    pub fn amplitude_at(&self, latent: &Field) -> Vec<f64> {
        match &self.amplitude {
            Amplitude::Fixed(amplitude) => amplitude.clone(),
            Amplitude::PowerLaw { prior, log_k } => {
                let [xi_s, xi_i] = self.spectral_latents(latent);
                let slope = prior.slope_mean + prior.slope_std * xi_s;
                let intercept = prior.intercept_mean + prior.intercept_std * xi_i;
                log_k
                    .iter()
                    .map(|lk| (0.5 * (intercept + slope * lk)).exp())
                    .collect()
            }
        }
    }

    /// Power spectrum `A(k)²` per harmonic mode at `latent`.
    pub fn power_at(&self, latent: &Field) -> Vec<f64> {
        self.amplitude_at(latent).into_iter().map(|a| a * a).collect()
    }

    /// Correlated field `s = HT(A ⊙ ξ)`.
    pub fn correlated_field(&self, latent: &Field) -> Result<Field, OperatorError> {
        check_space("SignalModel", self.latent_space(), latent)?;
        let amplitude = self.amplitude_at(latent);
        let scaled = self
            .excitation(latent)
            .iter()
            .zip(&amplitude)
            .map(|(x, a)| x * a)
            .collect();
        Ok(self.transform.synthesize(scaled))
    }

    /// Position-space signal `f = clip(g(s))`.
    pub fn signal(&self, latent: &Field) -> Result<Field, OperatorError> {
        let s = self.correlated_field(latent)?;
        Ok(s.map(|x| self.point_value(x)))
    }

    /// Noiseless data `r = R f`.
    pub fn response_of(&self, latent: &Field) -> Result<Field, OperatorError> {
        self.response.apply(&self.signal(latent)?)
    }

    pub fn linearize(&self, latent: &Field) -> Result<Linearization<'_, B, R>, OperatorError> {
        check_space("SignalModel", self.latent_space(), latent)?;
        let amplitude = self.amplitude_at(latent);
        let modulated: Vec<f64> = self
            .excitation(latent)
            .iter()
            .zip(&amplitude)
            .map(|(x, a)| x * a)
            .collect();
        let s = self.transform.synthesize(modulated.clone());
        let signal = s.map(|x| self.point_value(x));
        let derivative = s.map(|x| self.point_derivative(x));
        let value = self.response.apply(&signal)?;
        let spectral = match &self.amplitude {
            Amplitude::Fixed(_) => None,
            Amplitude::PowerLaw { prior, log_k } => Some(SpectralJacobian {
                modulated,
                log_k,
                slope_std: prior.slope_std,
                intercept_std: prior.intercept_std,
            }),
        };
        Ok(Linearization {
            value,
            jacobian: ModelJacobian {
                model: self,
                derivative,
                amplitude,
                spectral,
            },
        })
    }

    fn excitation<'f>(&self, latent: &'f Field) -> &'f [f64] {
        &latent.as_slice()[..self.grid().len()]
    }

    fn spectral_latents(&self, latent: &Field) -> [f64; 2] {
        let n = self.grid().len();
        let values = latent.as_slice();
        [values[n], values[n + 1]]
    }

    fn point_value(&self, x: f64) -> f64 {
        let y = self.nonlinearity.value(x);
        match self.clip {
            Some((lo, hi)) => y.clamp(lo, hi),
            None => y,
        }
    }

    fn point_derivative(&self, x: f64) -> f64 {
        let y = self.nonlinearity.value(x);
        match self.clip {
            Some((lo, hi)) if y < lo || y > hi => 0.0,
            _ => self.nonlinearity.derivative(x),
        }
    }
}

/// Model output and its Jacobian at one latent position.
pub struct Linearization<'a, B, R> {
    pub value: Field,
    pub jacobian: ModelJacobian<'a, B, R>,
}

/// Sensitivity of the harmonic coefficients to `(ξ_s, ξ_i)`:
/// `∂(A ⊙ ξ)/∂ξ_s = ½·sv·ln√(k²+k0²)·(A ⊙ ξ)` and
/// `∂(A ⊙ ξ)/∂ξ_i = ½·iv·(A ⊙ ξ)`.
struct SpectralJacobian<'a> {
    modulated: Vec<f64>,
    log_k: &'a [f64],
    slope_std: f64,
    intercept_std: f64,
}

impl SpectralJacobian<'_> {
    fn weight(&self, mode: usize, d_slope: f64, d_intercept: f64) -> f64 {
        0.5 * self.modulated[mode]
            * (self.slope_std * self.log_k[mode] * d_slope + self.intercept_std * d_intercept)
    }
}

/// `∂r/∂latent = R · diag(g'(s)) · HT · [diag(A) | ∂(A ⊙ ξ)/∂θ]`
pub struct ModelJacobian<'a, B, R> {
    model: &'a SignalModel<B, R>,
    derivative: Field,
    amplitude: Vec<f64>,
    spectral: Option<SpectralJacobian<'a>>,
}

impl<B, R> LinearOperator for ModelJacobian<'_, B, R>
where
    B: SpectralBackend,
    R: LinearOperator,
{
    fn domain(&self) -> Space {
        self.model.latent_space()
    }
    fn target(&self) -> Space {
        self.model.data_space()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.domain(), input)?;
        let n = self.model.grid().len();
        let values = input.as_slice();
        let mut coefficients: Vec<f64> = values[..n]
            .iter()
            .zip(&self.amplitude)
            .map(|(x, a)| x * a)
            .collect();
        if let Some(spectral) = &self.spectral {
            let (d_slope, d_intercept) = (values[n], values[n + 1]);
            for (mode, c) in coefficients.iter_mut().enumerate() {
                *c += spectral.weight(mode, d_slope, d_intercept);
            }
        }
        let s = self.model.transform.synthesize(coefficients);
        self.model.response.apply(&s.hadamard(&self.derivative))
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        let back = self.model.response.apply_adjoint(input)?;
        let weighted = back.hadamard(&self.derivative);
        let harmonic = self.model.transform.apply_adjoint(&weighted)?;
        let mut out: Vec<f64> = harmonic
            .as_slice()
            .iter()
            .zip(&self.amplitude)
            .map(|(h, a)| h * a)
            .collect();
        if let Some(spectral) = &self.spectral {
            let h = harmonic.as_slice();
            let d_slope: f64 = (0..h.len()).map(|m| h[m] * spectral.weight(m, 1.0, 0.0)).sum();
            let d_intercept: f64 = (0..h.len()).map(|m| h[m] * spectral.weight(m, 0.0, 1.0)).sum();
            out.push(d_slope);
            out.push(d_intercept);
        }
        Ok(Field::from_vec(self.domain(), out))
    }
    fn name(&self) -> &'static str {
        "ModelJacobian"
    }
}
