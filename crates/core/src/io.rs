//! Configuration file parsing and validation.
//!
//! A job file selects a pipeline with the top-level `mode` key. Wiener jobs
//! reconstruct a linear Gaussian problem in closed form; KL jobs run the
//! multi-sample variational loop on a non-linear model.
//!
//! # File Format
//!
//! ```toml
//! mode = "wiener"
//! seed = 42
//!
//! [grid]
//! nx = 256
//!
//! [spectrum]
//! kind = "inverse_power_law"
//! offset = 10.0
//! exponent = 2.5
//!
//! [response]
//! kind = "identity"
//!
//! [noise]
//! variance = 0.1
//!
//! [solver]
//! iteration_limit = 100
//! tol_abs_gradnorm = 1e-7
//! ```
//!
//! ```toml
//! mode = "kl"
//! seed = 42
//! nonlinearity = "exp"
//!
//! [grid]
//! nx = 256
//! ny = 256
//!
//! [spectrum]
//! kind = "power_law"
//! slope = -4.0
//! intercept = 0.0
//!
//! [response]
//! kind = "exposure"
//!
//! [likelihood]
//! kind = "poisson"
//!
//! [kl]
//! iterations = 5
//! samples = 5
//! sampling = { iteration_limit = 100 }
//! newton = { tol = 1e-6, iteration_limit = 50 }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    controller::{GradInfNormController, GradientNormController},
    grid::Grid2D,
    likelihood::LikelihoodKind,
    metrics::MetricsConfig,
    model::{AmplitudeConfig, Nonlinearity},
    newton::DEFAULT_MAX_CG_ITERATIONS,
    response::{ResponseConfig, ResponseError},
    spectrum::SpectrumConfig,
};

/// Configuration parsing errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid response: {0}")]
    Response(#[from] ResponseError),
}

// ============================================================================
// Shared sections
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Variance of the white Gaussian noise.
    pub variance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output directory; the CLI `--output-dir` flag overrides it.
    pub directory: Option<PathBuf>,
    /// Number of `|k|` bins for the empirical power spectrum.
    pub power_bins: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: None,
            power_bins: 32,
        }
    }
}

fn default_seed() -> u64 {
    42
}

fn default_wiener_samples() -> usize {
    10
}

fn default_posterior_samples() -> usize {
    30
}

// ============================================================================
// Wiener jobs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WienerJobConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub grid: Grid2D,
    pub spectrum: SpectrumConfig,
    #[serde(default)]
    pub response: ResponseConfig,
    pub noise: NoiseConfig,
    /// Controller for the mean solve and every posterior sample.
    #[serde(default)]
    pub solver: GradientNormController,
    #[serde(default = "default_wiener_samples")]
    pub samples: usize,
    /// Load observed data instead of generating it.
    #[serde(default)]
    pub data_file: Option<PathBuf>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

// ============================================================================
// KL jobs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LikelihoodConfig {
    pub kind: LikelihoodKind,
    /// Noise variance; only read by the Gaussian likelihood.
    #[serde(default = "default_likelihood_variance")]
    pub variance: f64,
}

fn default_likelihood_variance() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewtonConfig {
    #[serde(default = "default_newton_tol")]
    pub tol: f64,
    #[serde(default = "default_newton_iterations")]
    pub iteration_limit: usize,
    #[serde(default = "default_max_cg_iterations")]
    pub max_cg_iterations: usize,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            tol: default_newton_tol(),
            iteration_limit: default_newton_iterations(),
            max_cg_iterations: default_max_cg_iterations(),
        }
    }
}

impl NewtonConfig {
    pub fn controller(&self) -> GradInfNormController {
        GradInfNormController::new(self.tol, self.iteration_limit)
    }
}

fn default_newton_tol() -> f64 {
    1e-6
}

fn default_newton_iterations() -> usize {
    50
}

fn default_max_cg_iterations() -> usize {
    DEFAULT_MAX_CG_ITERATIONS
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KlConfig {
    /// Fixed number of outer iterations; there is no stopping rule.
    pub iterations: usize,
    /// Residual samples per outer iteration (before mirroring).
    pub samples: usize,
    #[serde(default = "default_mirror")]
    pub mirror: bool,
    /// Controller for the residual-sample solves.
    #[serde(default = "default_sampling_controller")]
    pub sampling: GradientNormController,
    #[serde(default)]
    pub newton: NewtonConfig,
}

fn default_mirror() -> bool {
    false
}

fn default_sampling_controller() -> GradientNormController {
    GradientNormController::with_limit(100)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlJobConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub grid: Grid2D,
    pub spectrum: SpectrumConfig,
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub nonlinearity: Nonlinearity,
    /// Learn the power-law slope and intercept around the `spectrum` means.
    #[serde(default)]
    pub amplitude: Option<AmplitudeConfig>,
    pub likelihood: LikelihoodConfig,
    pub kl: KlConfig,
    /// Samples drawn at the final mean for the reported statistics.
    #[serde(default = "default_posterior_samples")]
    pub posterior_samples: usize,
    #[serde(default)]
    pub data_file: Option<PathBuf>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

// ============================================================================
// Job Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum JobConfig {
    Wiener(WienerJobConfig),
    Kl(KlJobConfig),
}

impl std::str::FromStr for JobConfig {
    type Err = ConfigError;

    /// Parse and validate a job file.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: JobConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

impl JobConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    pub fn mode(&self) -> &'static str {
        match self {
            JobConfig::Wiener(_) => "wiener",
            JobConfig::Kl(_) => "kl",
        }
    }

    pub fn seed(&self) -> u64 {
        match self {
            JobConfig::Wiener(cfg) => cfg.seed,
            JobConfig::Kl(cfg) => cfg.seed,
        }
    }

    pub fn set_seed(&mut self, seed: u64) {
        match self {
            JobConfig::Wiener(cfg) => cfg.seed = seed,
            JobConfig::Kl(cfg) => cfg.seed = seed,
        }
    }

    pub fn grid(&self) -> Grid2D {
        match self {
            JobConfig::Wiener(cfg) => cfg.grid,
            JobConfig::Kl(cfg) => cfg.grid,
        }
    }

    pub fn output(&self) -> &OutputConfig {
        match self {
            JobConfig::Wiener(cfg) => &cfg.output,
            JobConfig::Kl(cfg) => &cfg.output,
        }
    }

    pub fn output_mut(&mut self) -> &mut OutputConfig {
        match self {
            JobConfig::Wiener(cfg) => &mut cfg.output,
            JobConfig::Kl(cfg) => &mut cfg.output,
        }
    }

    pub fn metrics(&self) -> &MetricsConfig {
        match self {
            JobConfig::Wiener(cfg) => &cfg.metrics,
            JobConfig::Kl(cfg) => &cfg.metrics,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            JobConfig::Wiener(cfg) => cfg.validate(),
            JobConfig::Kl(cfg) => cfg.validate(),
        }
    }
}

fn validate_problem(
    grid: &Grid2D,
    spectrum: &SpectrumConfig,
    response: &ResponseConfig,
    output: &OutputConfig,
) -> Result<(), ConfigError> {
    if grid.nx == 0 || grid.ny == 0 {
        return Err(ConfigError::InvalidParameter(
            "grid dimensions must be positive".into(),
        ));
    }
    if !(grid.lx > 0.0 && grid.ly > 0.0) {
        return Err(ConfigError::InvalidParameter(
            "grid lengths must be positive".into(),
        ));
    }
    spectrum.validate().map_err(ConfigError::InvalidParameter)?;
    response.validate(*grid)?;
    if output.power_bins == 0 {
        return Err(ConfigError::InvalidParameter(
            "output.power_bins must be at least 1".into(),
        ));
    }
    Ok(())
}

impl WienerJobConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_problem(&self.grid, &self.spectrum, &self.response, &self.output)?;
        if !(self.noise.variance > 0.0 && self.noise.variance.is_finite()) {
            return Err(ConfigError::InvalidParameter(
                "noise.variance must be positive".into(),
            ));
        }
        self.solver
            .validate()
            .map_err(|err| ConfigError::InvalidParameter(format!("solver: {err}")))?;
        Ok(())
    }
}

impl KlJobConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_problem(&self.grid, &self.spectrum, &self.response, &self.output)?;
        if self.likelihood.kind == LikelihoodKind::Gaussian
            && !(self.likelihood.variance > 0.0 && self.likelihood.variance.is_finite())
        {
            return Err(ConfigError::InvalidParameter(
                "likelihood.variance must be positive".into(),
            ));
        }
        if self.likelihood.kind == LikelihoodKind::Bernoulli
            && self.nonlinearity != Nonlinearity::Sigmoid
        {
            return Err(ConfigError::InvalidParameter(
                "bernoulli likelihood requires the sigmoid nonlinearity".into(),
            ));
        }
        if self.likelihood.kind == LikelihoodKind::Poisson && self.nonlinearity != Nonlinearity::Exp
        {
            return Err(ConfigError::InvalidParameter(
                "poisson likelihood requires the exp nonlinearity".into(),
            ));
        }
        if let Some(amplitude) = &self.amplitude {
            if !matches!(self.spectrum, SpectrumConfig::PowerLaw { .. }) {
                return Err(ConfigError::InvalidParameter(
                    "amplitude requires a power_law spectrum".into(),
                ));
            }
            let stds = [amplitude.slope_std, amplitude.intercept_std];
            if !stds.iter().all(|s| s.is_finite() && *s >= 0.0) {
                return Err(ConfigError::InvalidParameter(
                    "amplitude standard deviations must be finite and non-negative".into(),
                ));
            }
        }
        if self.kl.iterations == 0 {
            return Err(ConfigError::InvalidParameter(
                "kl.iterations must be at least 1".into(),
            ));
        }
        self.kl
            .sampling
            .validate()
            .map_err(|err| ConfigError::InvalidParameter(format!("kl.sampling: {err}")))?;
        self.kl
            .newton
            .controller()
            .validate()
            .map_err(|err| ConfigError::InvalidParameter(format!("kl.newton: {err}")))?;
        if self.kl.newton.max_cg_iterations == 0 {
            return Err(ConfigError::InvalidParameter(
                "kl.newton.max_cg_iterations must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
