//! High-level reconstruction job orchestration.

use std::time::Instant;

use log::{info, warn};
use rand::{SeedableRng, rngs::StdRng};
use thiserror::Error;

use crate::{
    backend::SpectralBackend,
    covariance::{CovarianceError, PriorCovariance, scalar_noise},
    datagen::{DataGenError, SyntheticData, generate_model_data, generate_wf_data},
    field::Field,
    hamiltonian::StandardHamiltonian,
    io::{JobConfig, KlJobConfig, WienerJobConfig},
    kl::MetricGaussianKL,
    likelihood::{Likelihood, LikelihoodError, LikelihoodKind},
    metrics::{MetricsEvent, MetricsRecorder, record},
    model::{PROBABILITY_CLIP, PowerLawParameters, PowerLawPrior, SignalModel},
    newton::{Energy, NewtonCg},
    operator::{LinearOperator, OperatorError},
    response::{Response, ResponseError, build_response},
    sampling::StatCalculator,
    spectrum::{PowerBin, bin_by_k, empirical_power},
    storage::{StorageError, load_field},
    wiener::WienerFilter,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Operator(#[from] OperatorError),
    #[error(transparent)]
    Covariance(#[from] CovarianceError),
    #[error(transparent)]
    Response(#[from] ResponseError),
    #[error(transparent)]
    Likelihood(#[from] LikelihoodError),
    #[error(transparent)]
    DataGen(#[from] DataGenError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Everything a finished run reports, all on the position grid.
#[derive(Debug, Clone)]
pub struct Reconstruction {
    /// Present when the data were generated synthetically.
    pub ground_truth: Option<Field>,
    /// Observed data in data space.
    pub data: Field,
    /// `Rᵀd`, the data projected back onto the grid.
    pub back_projected: Field,
    pub mean: Field,
    /// Pointwise posterior standard deviation (needs ≥ 2 samples).
    pub stddev: Option<Field>,
    pub samples: Vec<Field>,
    /// Empirical power of the posterior mean.
    pub power: Vec<PowerBin>,
    /// Prior power spectrum at the posterior position, binned like `power`.
    pub model_power: Vec<PowerBin>,
    /// Model power per posterior sample when the spectrum is learned.
    pub power_samples: Vec<Vec<PowerBin>>,
    /// Inferred power-law parameters at the posterior position.
    pub power_law: Option<PowerLawParameters>,
}

impl Reconstruction {
    /// Mean squared error of the posterior mean against the ground truth.
    pub fn mse_mean(&self) -> Option<f64> {
        self.ground_truth.as_ref().map(|truth| self.mean.mse(truth))
    }

    /// Mean squared error of the back-projected data against the ground
    /// truth.
    pub fn mse_data(&self) -> Option<f64> {
        self.ground_truth
            .as_ref()
            .map(|truth| self.back_projected.mse(truth))
    }
}

pub fn run<B: SpectralBackend + Clone>(
    backend: B,
    job: &JobConfig,
) -> Result<Reconstruction, PipelineError> {
    run_with_metrics(backend, job, None)
}

pub fn run_with_metrics<B: SpectralBackend + Clone>(
    backend: B,
    job: &JobConfig,
    metrics: Option<&MetricsRecorder>,
) -> Result<Reconstruction, PipelineError> {
    let pipeline_start = Instant::now();
    let grid = job.grid();
    info!(
        "[pipeline] mode={} grid={} seed={} backend={}",
        job.mode(),
        grid,
        job.seed(),
        backend.name()
    );

    let result = match job {
        JobConfig::Wiener(cfg) => {
            record(
                metrics,
                MetricsEvent::PipelineStart {
                    mode: job.mode(),
                    backend: backend.name(),
                    grid_nx: grid.nx,
                    grid_ny: grid.ny,
                    seed: cfg.seed,
                    response: cfg.response.label(),
                },
            );
            run_wiener(backend, cfg, metrics)?
        }
        JobConfig::Kl(cfg) => {
            record(
                metrics,
                MetricsEvent::PipelineStart {
                    mode: job.mode(),
                    backend: backend.name(),
                    grid_nx: grid.nx,
                    grid_ny: grid.ny,
                    seed: cfg.seed,
                    response: cfg.response.label(),
                },
            );
            run_kl(backend, cfg, metrics)?
        }
    };

    let duration_ms = pipeline_start.elapsed().as_secs_f64() * 1000.0;
    if let (Some(mse_mean), Some(mse_data)) = (result.mse_mean(), result.mse_data()) {
        info!(
            "[pipeline] done in {:.1} ms: mse(mean)={:.4e} mse(data)={:.4e}",
            duration_ms, mse_mean, mse_data
        );
    } else {
        info!("[pipeline] done in {:.1} ms", duration_ms);
    }
    record(
        metrics,
        MetricsEvent::PipelineDone {
            mse_mean: result.mse_mean(),
            mse_data: result.mse_data(),
            duration_ms,
        },
    );
    Ok(result)
}

/// Generate synthetic ground truth and data for a job without
/// reconstructing. Uses the same random stream as a full run.
pub fn generate<B: SpectralBackend + Clone>(
    backend: B,
    job: &JobConfig,
) -> Result<SyntheticData, PipelineError> {
    match job {
        JobConfig::Wiener(cfg) => {
            let mut rng = StdRng::seed_from_u64(cfg.seed);
            let (prior, response) = wiener_operators(&backend, cfg, &mut rng)?;
            let noise = scalar_noise(response.target(), cfg.noise.variance)?;
            Ok(generate_wf_data(&prior, &response, &noise, &mut rng)?)
        }
        JobConfig::Kl(cfg) => {
            let mut rng = StdRng::seed_from_u64(cfg.seed);
            let model = signal_model(&backend, cfg, &mut rng)?;
            Ok(generate_model_data(
                &model,
                cfg.likelihood.kind,
                cfg.likelihood.variance,
                &mut rng,
            )?)
        }
    }
}

// ============================================================================
// Wiener filter
// ============================================================================

fn wiener_operators<B: SpectralBackend + Clone>(
    backend: &B,
    cfg: &WienerJobConfig,
    rng: &mut StdRng,
) -> Result<(PriorCovariance<B>, Response<B>), PipelineError> {
    let prior = PriorCovariance::new(backend.clone(), cfg.grid, &cfg.spectrum)?;
    let response = build_response(&cfg.response, backend.clone(), cfg.grid, rng)?;
    Ok((prior, response))
}

fn run_wiener<B: SpectralBackend + Clone>(
    backend: B,
    cfg: &WienerJobConfig,
    metrics: Option<&MetricsRecorder>,
) -> Result<Reconstruction, PipelineError> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let (prior, response) = wiener_operators(&backend, cfg, &mut rng)?;
    let noise = scalar_noise(response.target(), cfg.noise.variance)?;

    let data_start = Instant::now();
    let (ground_truth, data, source) = match &cfg.data_file {
        Some(path) => {
            info!("[wiener] loading data from {}", path.display());
            (None, load_field(path, response.target())?, "file")
        }
        None => {
            let synthetic = generate_wf_data(&prior, &response, &noise, &mut rng)?;
            (Some(synthetic.ground_truth), synthetic.data, "synthetic")
        }
    };
    record(
        metrics,
        MetricsEvent::DataReady {
            source,
            data_len: data.len(),
            duration_ms: data_start.elapsed().as_secs_f64() * 1000.0,
        },
    );

    let filter = WienerFilter::new(&prior, &response, &noise, cfg.solver)?;
    let solve_start = Instant::now();
    let result = filter.posterior_mean(&data)?;
    record(
        metrics,
        MetricsEvent::SolverFinished {
            stage: "wiener_mean",
            iterations: result.iterations,
            residual_norm: result.residual_norm,
            status: result.status,
            duration_ms: solve_start.elapsed().as_secs_f64() * 1000.0,
        },
    );

    let posterior = filter.posterior_samples(&result.mean, cfg.samples, &mut rng)?;
    let mut stats = StatCalculator::new();
    let mut samples = Vec::with_capacity(posterior.len());
    for (index, sample) in posterior.into_iter().enumerate() {
        record(
            metrics,
            MetricsEvent::SampleDrawn {
                index,
                iterations: sample.iterations,
                status: sample.status,
            },
        );
        stats.add(&sample.field);
        samples.push(sample.field);
    }
    info!("[wiener] drew {} posterior samples", samples.len());

    let back_projected = response.apply_adjoint(&data)?;
    let power = empirical_power(&backend, cfg.grid, &result.mean, cfg.output.power_bins);
    let model_power = bin_by_k(cfg.grid, prior.power(), cfg.output.power_bins);
    Ok(Reconstruction {
        ground_truth,
        data,
        back_projected,
        stddev: stats.stddev(),
        mean: result.mean,
        samples,
        power,
        model_power,
        power_samples: Vec::new(),
        power_law: None,
    })
}

// ============================================================================
// Metric Gaussian KL
// ============================================================================

fn signal_model<B: SpectralBackend + Clone>(
    backend: &B,
    cfg: &KlJobConfig,
    rng: &mut StdRng,
) -> Result<SignalModel<B, Response<B>>, PipelineError> {
    let response = build_response(&cfg.response, backend.clone(), cfg.grid, rng)?;
    let model = match &cfg.amplitude {
        Some(amplitude) => {
            let prior = PowerLawPrior::from_config(&cfg.spectrum, amplitude).ok_or(
                CovarianceError::InvalidAmplitudePrior("learned amplitude needs a power_law spectrum"),
            )?;
            SignalModel::with_learned_power_law(
                backend.clone(),
                cfg.grid,
                prior,
                cfg.nonlinearity,
                response,
            )?
        }
        None => SignalModel::new(
            backend.clone(),
            cfg.grid,
            &cfg.spectrum,
            cfg.nonlinearity,
            response,
        )?,
    };
    Ok(match cfg.likelihood.kind {
        LikelihoodKind::Bernoulli => model.with_clip(PROBABILITY_CLIP.0, PROBABILITY_CLIP.1),
        _ => model,
    })
}

fn run_kl<B: SpectralBackend + Clone>(
    backend: B,
    cfg: &KlJobConfig,
    metrics: Option<&MetricsRecorder>,
) -> Result<Reconstruction, PipelineError> {
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let model = signal_model(&backend, cfg, &mut rng)?;

    let data_start = Instant::now();
    let (ground_truth, data, source) = match &cfg.data_file {
        Some(path) => {
            info!("[kl] loading data from {}", path.display());
            (None, load_field(path, model.data_space())?, "file")
        }
        None => {
            let synthetic = generate_model_data(
                &model,
                cfg.likelihood.kind,
                cfg.likelihood.variance,
                &mut rng,
            )?;
            (Some(synthetic.ground_truth), synthetic.data, "synthetic")
        }
    };
    record(
        metrics,
        MetricsEvent::DataReady {
            source,
            data_len: data.len(),
            duration_ms: data_start.elapsed().as_secs_f64() * 1000.0,
        },
    );

    let likelihood = Likelihood::new(cfg.likelihood.kind, data.clone(), cfg.likelihood.variance)?;
    let hamiltonian = StandardHamiltonian::new(&model, &likelihood)?;
    let minimizer = NewtonCg::new(cfg.kl.newton.controller())
        .with_max_cg_iterations(cfg.kl.newton.max_cg_iterations);

    let mut position = Field::zeros(model.latent_space());
    for iteration in 0..cfg.kl.iterations {
        let iteration_start = Instant::now();
        let (kl, report) = MetricGaussianKL::new(
            hamiltonian,
            position,
            cfg.kl.samples,
            cfg.kl.mirror,
            cfg.kl.sampling,
            &mut rng,
        )?;
        let outcome = minimizer.minimize(kl)?;
        let energy = outcome.energy;
        info!(
            "[kl] iteration {}/{}: energy={:.6e} |g|_inf={:.3e} newton={} ({})",
            iteration + 1,
            cfg.kl.iterations,
            energy.value(),
            energy.gradient().max_abs(),
            outcome.iterations,
            outcome.status
        );
        if report.unconverged > 0 {
            warn!(
                "[kl] iteration {}: {} of {} residual samples hit the iteration limit",
                iteration + 1,
                report.unconverged,
                report.samples
            );
        }
        record(
            metrics,
            MetricsEvent::KlIteration {
                iteration,
                energy: energy.value(),
                gradient_inf_norm: energy.gradient().max_abs(),
                newton_iterations: outcome.iterations,
                newton_status: outcome.status,
                samples: report.samples,
                unconverged_samples: report.unconverged,
                sampling_iterations: report.total_iterations,
                duration_ms: iteration_start.elapsed().as_secs_f64() * 1000.0,
            },
        );
        position = energy.position().clone();
    }

    // Posterior statistics of the signal from a fresh batch at the final mean.
    let sampling_start = Instant::now();
    let (kl, report) = MetricGaussianKL::new(
        hamiltonian,
        position.clone(),
        cfg.posterior_samples,
        cfg.kl.mirror,
        cfg.kl.sampling,
        &mut rng,
    )?;
    if report.unconverged > 0 {
        warn!(
            "[kl] posterior: {} of {} residual samples hit the iteration limit",
            report.unconverged, report.samples
        );
    }
    record(
        metrics,
        MetricsEvent::PosteriorSampling {
            samples: report.samples,
            unconverged_samples: report.unconverged,
            sampling_iterations: report.total_iterations,
            duration_ms: sampling_start.elapsed().as_secs_f64() * 1000.0,
        },
    );
    let mut stats = StatCalculator::new();
    let mut samples = Vec::new();
    let mut power_samples = Vec::new();
    if cfg.posterior_samples > 0 {
        for latent in kl.sample_positions() {
            let signal = model.signal(&latent)?;
            stats.add(&signal);
            samples.push(signal);
            if model.learns_spectrum() {
                let power = model.power_at(&latent);
                power_samples.push(bin_by_k(cfg.grid, &power, cfg.output.power_bins));
            }
        }
    }
    let mean = match stats.mean() {
        Some(mean) => mean.clone(),
        None => model.signal(&position)?,
    };
    info!("[kl] drew {} posterior samples", samples.len());

    let back_projected = model.response().apply_adjoint(&data)?;
    let power = empirical_power(&backend, cfg.grid, &mean, cfg.output.power_bins);
    let model_power = bin_by_k(cfg.grid, &model.power_at(&position), cfg.output.power_bins);
    let power_law = model.power_law_parameters(&position);
    if let Some(params) = power_law {
        info!(
            "[kl] power law: slope={:.3} intercept={:.3}",
            params.slope, params.intercept
        );
    }
    Ok(Reconstruction {
        ground_truth,
        data,
        back_projected,
        mean,
        stddev: stats.stddev(),
        samples,
        power,
        model_power,
        power_samples,
        power_law,
    })
}
