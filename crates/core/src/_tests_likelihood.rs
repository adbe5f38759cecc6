#![cfg(test)]

use super::field::{Field, Space};
use super::likelihood::{Likelihood, LikelihoodError, LikelihoodKind};

fn field(values: &[f64]) -> Field {
    Field::from_vec(Space::Unstructured(values.len()), values.to_vec())
}

/// Central difference of the energy along each coordinate.
fn numerical_gradient(likelihood: &Likelihood, r: &Field) -> Vec<f64> {
    let h = 1e-6;
    (0..r.len())
        .map(|i| {
            let mut plus = r.clone();
            plus.as_mut_slice()[i] += h;
            let mut minus = r.clone();
            minus.as_mut_slice()[i] -= h;
            (likelihood.energy(&plus) - likelihood.energy(&minus)) / (2.0 * h)
        })
        .collect()
}

fn assert_gradient_matches(likelihood: &Likelihood, r: &Field) {
    let analytic = likelihood.gradient(r);
    for (a, n) in analytic.as_slice().iter().zip(numerical_gradient(likelihood, r)) {
        assert!((a - n).abs() < 1e-5 * a.abs().max(1.0), "{}: {a} vs {n}", likelihood.kind());
    }
}

#[test]
fn gaussian_energy_gradient_and_fisher() {
    let likelihood = Likelihood::new(LikelihoodKind::Gaussian, field(&[1.0, -2.0]), 0.5).unwrap();
    let r = field(&[2.0, 0.0]);
    // ½ (1 + 4) / 0.5
    assert!((likelihood.energy(&r) - 5.0).abs() < 1e-12);
    assert_eq!(likelihood.gradient(&r).as_slice(), &[2.0, 4.0]);
    assert_eq!(likelihood.fisher(&r).as_slice(), &[2.0, 2.0]);
    assert_gradient_matches(&likelihood, &r);
}

#[test]
fn poisson_energy_gradient_and_fisher() {
    let likelihood = Likelihood::new(LikelihoodKind::Poisson, field(&[0.0, 3.0]), 1.0).unwrap();
    let r = field(&[0.5, 2.0]);
    let expected = 0.5 + (2.0 - 3.0 * 2.0_f64.ln());
    assert!((likelihood.energy(&r) - expected).abs() < 1e-12);
    assert_eq!(likelihood.fisher(&r).as_slice(), &[2.0, 0.5]);
    assert_gradient_matches(&likelihood, &r);

    assert_eq!(likelihood.energy(&field(&[-1.0, 2.0])), f64::INFINITY);
    assert!(likelihood.energy(&field(&[0.0, 2.0])).is_finite());
}

#[test]
fn bernoulli_energy_gradient_and_fisher() {
    let likelihood = Likelihood::new(LikelihoodKind::Bernoulli, field(&[1.0, 0.0]), 1.0).unwrap();
    let r = field(&[0.8, 0.25]);
    let expected = -(0.8_f64.ln()) - (0.75_f64).ln();
    assert!((likelihood.energy(&r) - expected).abs() < 1e-12);
    let fisher = likelihood.fisher(&r);
    assert!((fisher.as_slice()[0] - 1.0 / 0.16).abs() < 1e-9);
    assert!((fisher.as_slice()[1] - 1.0 / 0.1875).abs() < 1e-9);
    assert_gradient_matches(&likelihood, &r);

    assert_eq!(likelihood.energy(&field(&[1.0, 0.5])), f64::INFINITY);
}

#[test]
fn likelihood_names_parse() {
    assert_eq!("gauss".parse::<LikelihoodKind>(), Ok(LikelihoodKind::Gaussian));
    assert_eq!("Gaussian".parse::<LikelihoodKind>(), Ok(LikelihoodKind::Gaussian));
    assert_eq!("poisson".parse::<LikelihoodKind>(), Ok(LikelihoodKind::Poisson));
    assert_eq!(" bernoulli ".parse::<LikelihoodKind>(), Ok(LikelihoodKind::Bernoulli));
    let err = "cauchy".parse::<LikelihoodKind>().unwrap_err();
    assert_eq!(err, LikelihoodError::Unsupported("cauchy".into()));
    assert!(err.to_string().contains("cauchy"));
    assert_eq!(LikelihoodKind::Poisson.to_string(), "poisson");
}

#[test]
fn invalid_data_is_rejected() {
    assert!(matches!(
        Likelihood::new(LikelihoodKind::Poisson, field(&[1.0, -1.0]), 1.0),
        Err(LikelihoodError::InvalidData { kind: LikelihoodKind::Poisson, .. })
    ));
    assert!(matches!(
        Likelihood::new(LikelihoodKind::Bernoulli, field(&[0.0, 0.5]), 1.0),
        Err(LikelihoodError::InvalidData { kind: LikelihoodKind::Bernoulli, .. })
    ));
    assert_eq!(
        Likelihood::new(LikelihoodKind::Gaussian, field(&[0.0]), 0.0).err(),
        Some(LikelihoodError::InvalidVariance(0.0))
    );
    // Variance is ignored for count and outcome data.
    assert!(Likelihood::new(LikelihoodKind::Poisson, field(&[2.0]), -1.0).is_ok());
}
