//! Power spectra and the empirical power of a field.

use serde::{Deserialize, Serialize};

use crate::backend::SpectralBackend;
use crate::field::Field;
use crate::grid::Grid2D;

/// Function from harmonic mode length `|k|` to prior power.
pub trait PowerSpectrum {
    fn power(&self, k: f64) -> f64;
}

impl<F: Fn(f64) -> f64> PowerSpectrum for F {
    fn power(&self, k: f64) -> f64 {
        self(k)
    }
}

/// Spectrum shapes loadable from configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpectrumConfig {
    /// `1 / (offset + k^exponent)`
    InversePowerLaw { offset: f64, exponent: f64 },
    /// `amplitude / ((center² − k²)² + width²·k²)`, a damped resonance.
    Resonance {
        amplitude: f64,
        center: f64,
        width: f64,
    },
    /// `exp(intercept + slope · ln sqrt(k² + k0²))`
    ///
    /// A power law in log-log space that flattens below `k0`.
    PowerLaw {
        slope: f64,
        intercept: f64,
        #[serde(default = "default_k0")]
        k0: f64,
    },
}

fn default_k0() -> f64 {
    0.2
}

impl PowerSpectrum for SpectrumConfig {
    fn power(&self, k: f64) -> f64 {
        match *self {
            SpectrumConfig::InversePowerLaw { offset, exponent } => 1.0 / (offset + k.powf(exponent)),
            SpectrumConfig::Resonance {
                amplitude,
                center,
                width,
            } => {
                let detune = center * center - k * k;
                amplitude / (detune * detune + width * width * k * k)
            }
            SpectrumConfig::PowerLaw {
                slope,
                intercept,
                k0,
            } => (intercept + slope * (k * k + k0 * k0).sqrt().ln()).exp(),
        }
    }
}

impl SpectrumConfig {
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            SpectrumConfig::InversePowerLaw { offset, exponent } => {
                if offset <= 0.0 {
                    return Err("inverse_power_law offset must be positive".into());
                }
                if exponent < 0.0 {
                    return Err("inverse_power_law exponent must be non-negative".into());
                }
            }
            SpectrumConfig::Resonance {
                amplitude,
                center,
                width,
            } => {
                if amplitude <= 0.0 {
                    return Err("resonance amplitude must be positive".into());
                }
                if center == 0.0 && width == 0.0 {
                    return Err("resonance needs a non-zero center or width".into());
                }
            }
            SpectrumConfig::PowerLaw { k0, .. } => {
                if k0 <= 0.0 {
                    return Err("power_law k0 must be positive".into());
                }
            }
        }
        Ok(())
    }
}

/// Evaluate a spectrum on every harmonic mode of `grid`.
pub fn sample_spectrum<P: PowerSpectrum + ?Sized>(grid: Grid2D, spectrum: &P) -> Vec<f64> {
    grid.k_lengths()
        .into_iter()
        .map(|k| spectrum.power(k))
        .collect()
}

/// One bin of an empirical power spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerBin {
    /// Mean mode length of the modes in the bin.
    pub k: f64,
    /// Mean of `H[k]² / N²` over the modes in the bin.
    pub power: f64,
    pub modes: usize,
}

/// Empirical power spectrum of a position-space field, averaged over
/// `n_bins` linear bins in `|k|`. Empty bins are dropped.
///
/// The estimate is normalised so that a draw from a prior with spectrum
/// `P` has expected binned power `P(k)`.
pub fn empirical_power<B: SpectralBackend + ?Sized>(
    backend: &B,
    grid: Grid2D,
    field: &Field,
    n_bins: usize,
) -> Vec<PowerBin> {
    let mut coeffs = field.as_slice().to_vec();
    backend.hartley(grid, &mut coeffs);
    // H·H = N, so a prior draw transforms back to N·sqrt(P)·ξ.
    let norm = grid.len() as f64;
    let per_mode: Vec<f64> = coeffs.iter().map(|c| c * c / (norm * norm)).collect();
    bin_by_k(grid, &per_mode, n_bins)
}

/// Average a per-mode quantity over `n_bins` linear bins in `|k|`.
///
/// Bin edges depend only on the grid, so two calls on the same grid yield
/// bins with identical `k` and `modes`.
pub fn bin_by_k(grid: Grid2D, per_mode: &[f64], n_bins: usize) -> Vec<PowerBin> {
    let n_bins = n_bins.max(1);
    let k_lengths = grid.k_lengths();
    let k_max = k_lengths.iter().copied().fold(0.0, f64::max);
    let width = if k_max > 0.0 { k_max / n_bins as f64 } else { 1.0 };

    let mut k_sum = vec![0.0; n_bins];
    let mut p_sum = vec![0.0; n_bins];
    let mut counts = vec![0usize; n_bins];
    for (&k, &p) in k_lengths.iter().zip(per_mode) {
        let bin = ((k / width) as usize).min(n_bins - 1);
        k_sum[bin] += k;
        p_sum[bin] += p;
        counts[bin] += 1;
    }

    (0..n_bins)
        .filter(|&bin| counts[bin] > 0)
        .map(|bin| PowerBin {
            k: k_sum[bin] / counts[bin] as f64,
            power: p_sum[bin] / counts[bin] as f64,
            modes: counts[bin],
        })
        .collect()
}
