//! Synthetic ground truth and observations.

use rand::Rng;
use rand_distr::{Bernoulli, Distribution, Poisson, StandardNormal};
use thiserror::Error;

use crate::backend::SpectralBackend;
use crate::covariance::Covariance;
use crate::field::Field;
use crate::likelihood::{LikelihoodError, LikelihoodKind};
use crate::model::SignalModel;
use crate::operator::{LinearOperator, OperatorError};

#[derive(Debug, Clone)]
pub struct SyntheticData {
    /// Position-space signal the data were generated from.
    pub ground_truth: Field,
    /// Latent excitation, present for model-based data.
    pub excitation: Option<Field>,
    pub data: Field,
}

/// `s ~ S`, `d = R s + n` with `n ~ N`.
pub fn generate_wf_data<S, R, N, G>(
    prior: &S,
    response: &R,
    noise: &N,
    rng: &mut G,
) -> Result<SyntheticData, OperatorError>
where
    S: Covariance,
    R: LinearOperator,
    N: Covariance,
    G: Rng + ?Sized,
{
    let ground_truth = prior.draw_sample(rng);
    let mut data = response.apply(&ground_truth)?;
    data.axpy(1.0, &noise.draw_sample(rng));
    Ok(SyntheticData {
        ground_truth,
        excitation: None,
        data,
    })
}

/// Draw `ξ ~ N(0, 1)` and observe `r = R f(ξ)` through the likelihood.
///
/// Gaussian data add noise of standard deviation `sqrt(variance)`; Poisson
/// counts use `r` as the rate; Bernoulli outcomes use `r` as the success
/// probability.
pub fn generate_model_data<B, R, G>(
    model: &SignalModel<B, R>,
    kind: LikelihoodKind,
    variance: f64,
    rng: &mut G,
) -> Result<SyntheticData, DataGenError>
where
    B: SpectralBackend,
    R: LinearOperator,
    G: Rng + ?Sized,
{
    let excitation = Field::random_normal(model.latent_space(), rng);
    let ground_truth = model.signal(&excitation)?;
    let response = model.response().apply(&ground_truth)?;
    let data = observe(&response, kind, variance, rng)?;
    Ok(SyntheticData {
        ground_truth,
        excitation: Some(excitation),
        data,
    })
}

/// Same as [`generate_model_data`] with the likelihood given by name.
pub fn generate_model_data_named<B, R, G>(
    model: &SignalModel<B, R>,
    likelihood: &str,
    variance: f64,
    rng: &mut G,
) -> Result<SyntheticData, DataGenError>
where
    B: SpectralBackend,
    R: LinearOperator,
    G: Rng + ?Sized,
{
    let kind: LikelihoodKind = likelihood.parse()?;
    generate_model_data(model, kind, variance, rng)
}

fn observe<G: Rng + ?Sized>(
    response: &Field,
    kind: LikelihoodKind,
    variance: f64,
    rng: &mut G,
) -> Result<Field, DataGenError> {
    let mut data = Vec::with_capacity(response.len());
    match kind {
        LikelihoodKind::Gaussian => {
            if !(variance > 0.0 && variance.is_finite()) {
                return Err(LikelihoodError::InvalidVariance(variance).into());
            }
            let sigma = variance.sqrt();
            for &r in response.as_slice() {
                let n: f64 = rng.sample(StandardNormal);
                data.push(r + sigma * n);
            }
        }
        LikelihoodKind::Poisson => {
            for &rate in response.as_slice() {
                if rate == 0.0 {
                    data.push(0.0);
                    continue;
                }
                let dist = Poisson::new(rate)
                    .map_err(|_| DataGenError::InvalidRate { kind, value: rate })?;
                data.push(dist.sample(rng));
            }
        }
        LikelihoodKind::Bernoulli => {
            for &p in response.as_slice() {
                let dist =
                    Bernoulli::new(p).map_err(|_| DataGenError::InvalidRate { kind, value: p })?;
                data.push(if dist.sample(rng) { 1.0 } else { 0.0 });
            }
        }
    }
    Ok(Field::from_vec(response.space(), data))
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataGenError {
    #[error(transparent)]
    Likelihood(#[from] LikelihoodError),
    #[error(transparent)]
    Operator(#[from] OperatorError),
    #[error("{kind} observation needs a valid rate, got {value}")]
    InvalidRate { kind: LikelihoodKind, value: f64 },
}
