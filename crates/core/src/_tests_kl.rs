#![cfg(test)]

use rand::{SeedableRng, rngs::StdRng};

use super::_tests_support::{DenseOperator, TestBackend, assert_adjoint_consistent, ramp_field};
use super::controller::{GradInfNormController, GradientNormController};
use super::covariance::{PriorCovariance, scalar_noise};
use super::datagen::{DataGenError, generate_model_data, generate_model_data_named, generate_wf_data};
use super::field::{Field, Space};
use super::grid::Grid2D;
use super::hamiltonian::StandardHamiltonian;
use super::kl::MetricGaussianKL;
use super::likelihood::{Likelihood, LikelihoodError, LikelihoodKind};
use super::model::{Nonlinearity, PROBABILITY_CLIP, SignalModel};
use super::newton::{Energy, MinimizationStatus, NewtonCg};
use super::operator::{LinearOperator, OperatorError};
use super::response::{GeometryRemover, MaskResponse};
use super::spectrum::SpectrumConfig;
use super::wiener::WienerFilter;

fn spectrum() -> SpectrumConfig {
    SpectrumConfig::InversePowerLaw {
        offset: 10.0,
        exponent: 2.5,
    }
}

fn build_model<R: LinearOperator>(
    grid: Grid2D,
    nonlinearity: Nonlinearity,
    response: R,
) -> SignalModel<TestBackend, R> {
    SignalModel::new(TestBackend, grid, &spectrum(), nonlinearity, response).unwrap()
}

/// `½xᵀAx − bᵀx` with metric `A`.
struct Quadratic {
    matrix: DenseOperator,
    rhs: Field,
    position: Field,
    value: f64,
    gradient: Field,
}

impl Quadratic {
    fn new(matrix: DenseOperator, rhs: Field, position: Field) -> Self {
        let ax = matrix.apply(&position).unwrap();
        let value = 0.5 * position.dot(&ax) - rhs.dot(&position);
        let gradient = ax.minus(&rhs);
        Self {
            matrix,
            rhs,
            position,
            value,
            gradient,
        }
    }
}

impl Energy for Quadratic {
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
        self.matrix.apply(input)
    }
    fn at(&self, position: Field) -> Result<Self, OperatorError> {
        Ok(Self::new(self.matrix.clone(), self.rhs.clone(), position))
    }
}

/// Energy that is infinite everywhere except at its starting point.
struct Wall {
    position: Field,
    value: f64,
    gradient: Field,
}

impl Energy for Wall {
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
        Ok(input.clone())
    }
    fn at(&self, position: Field) -> Result<Self, OperatorError> {
        Ok(Self {
            gradient: self.gradient.clone(),
            position,
            value: f64::INFINITY,
        })
    }
}

#[test]
fn newton_minimises_a_quadratic() {
    let matrix = DenseOperator::spd(12, 0.5);
    let rhs = ramp_field(matrix.space());
    let start = Quadratic::new(matrix.clone(), rhs.clone(), Field::zeros(matrix.space()));
    let result = NewtonCg::new(GradInfNormController::new(1e-10, 20))
        .minimize(start)
        .unwrap();
    assert_eq!(result.status, MinimizationStatus::Converged);
    let residual = matrix.apply(result.energy.position()).unwrap().minus(&rhs);
    assert!(residual.max_abs() <= 1e-10);
}

#[test]
fn newton_reports_failed_line_search() {
    let space = Space::Unstructured(3);
    let wall = Wall {
        position: Field::zeros(space),
        value: 1.0,
        gradient: Field::full(space, 1.0),
    };
    let result = NewtonCg::new(GradInfNormController::new(1e-8, 10))
        .minimize(wall)
        .unwrap();
    assert_eq!(result.status, MinimizationStatus::LineSearchFailed);
    assert_eq!(result.iterations, 0);
    assert_eq!(result.energy.value(), 1.0);
}

#[test]
fn newton_stops_at_the_iteration_limit() {
    let matrix = DenseOperator::spd(20, 1e-3);
    let rhs = ramp_field(matrix.space());
    let start = Quadratic::new(matrix.clone(), rhs, Field::zeros(matrix.space()));
    let result = NewtonCg::new(GradInfNormController::new(1e-14, 1))
        .with_max_cg_iterations(1)
        .minimize(start)
        .unwrap();
    assert_eq!(result.status, MinimizationStatus::IterationLimit);
    assert_eq!(result.iterations, 1);
    assert!(result.energy.value() < 0.0);
}

#[test]
fn model_jacobian_matches_finite_differences() {
    let grid = Grid2D::line(16);
    let model = build_model(grid, Nonlinearity::Exp, MaskResponse::checkerboard(grid, 4));
    let xi = ramp_field(model.latent_space()).scaled(0.5);
    let lin = model.linearize(&xi).unwrap();
    assert_adjoint_consistent(&lin.jacobian, 1e-10);

    let direction = ramp_field(model.latent_space()).map(|v| 1.0 - v * v);
    let h = 1e-6;
    let mut plus = xi.clone();
    plus.axpy(h, &direction);
    let mut minus = xi.clone();
    minus.axpy(-h, &direction);
    let numeric = model
        .response_of(&plus)
        .unwrap()
        .minus(&model.response_of(&minus).unwrap())
        .scaled(0.5 / h);
    let analytic = lin.jacobian.apply(&direction).unwrap();
    for (a, n) in analytic.as_slice().iter().zip(numeric.as_slice()) {
        assert!((a - n).abs() < 1e-6 * a.abs().max(1.0), "{a} vs {n}");
    }
}

#[test]
fn clipped_sigmoid_has_zero_derivative_outside_range() {
    let grid = Grid2D::line(8);
    let (lo, hi) = PROBABILITY_CLIP;
    let model = build_model(grid, Nonlinearity::Sigmoid, GeometryRemover::new(grid)).with_clip(lo, hi);
    let xi = Field::full(model.latent_space(), 1e4);
    let signal = model.signal(&xi).unwrap();
    assert!(signal.as_slice().iter().all(|&p| (lo..=hi).contains(&p)));
    assert!(Nonlinearity::Sigmoid.value(-800.0) >= 0.0);
    assert!((Nonlinearity::Sigmoid.derivative(0.0) - 0.25).abs() < 1e-15);
}

#[test]
fn hamiltonian_gradient_and_metric() {
    let grid = Grid2D::line(16);
    let model = build_model(grid, Nonlinearity::Exp, GeometryRemover::new(grid));
    let mut rng = StdRng::seed_from_u64(4);
    let synthetic = generate_model_data(&model, LikelihoodKind::Poisson, 1.0, &mut rng).unwrap();
    let likelihood = Likelihood::new(LikelihoodKind::Poisson, synthetic.data, 1.0).unwrap();
    let hamiltonian = StandardHamiltonian::new(&model, &likelihood).unwrap();

    let xi = ramp_field(model.latent_space()).scaled(0.3);
    let point = hamiltonian.at(&xi).unwrap();
    let direction = ramp_field(model.latent_space()).map(|v| v * v - 0.3);
    let h = 1e-6;
    let mut plus = xi.clone();
    plus.axpy(h, &direction);
    let mut minus = xi.clone();
    minus.axpy(-h, &direction);
    let numeric = (hamiltonian.at(&plus).unwrap().value - hamiltonian.at(&minus).unwrap().value) / (2.0 * h);
    let analytic = point.gradient.dot(&direction);
    assert!((numeric - analytic).abs() < 1e-5 * analytic.abs().max(1.0), "{numeric} vs {analytic}");

    // M = 1 + JᵀFJ is symmetric and bounded below by the identity.
    assert_adjoint_consistent(&point, 1e-10);
    assert!(direction.dot(&point.apply(&direction).unwrap()) >= direction.dot(&direction));
    let draw = point.draw_metric_sample(&mut rng).unwrap();
    assert_eq!(draw.space(), model.latent_space());
    assert!(draw.is_finite());
}

#[test]
fn hamiltonian_rejects_mismatched_data() {
    let grid = Grid2D::line(8);
    let model = build_model(grid, Nonlinearity::Identity, GeometryRemover::new(grid));
    let likelihood =
        Likelihood::new(LikelihoodKind::Gaussian, Field::zeros(Space::Unstructured(3)), 1.0).unwrap();
    assert!(StandardHamiltonian::new(&model, &likelihood).is_err());
}

#[test]
fn mirrored_samples_come_in_pairs() {
    let grid = Grid2D::line(8);
    let model = build_model(grid, Nonlinearity::Identity, GeometryRemover::new(grid));
    let likelihood = Likelihood::new(
        LikelihoodKind::Gaussian,
        ramp_field(model.data_space()),
        0.1,
    )
    .unwrap();
    let hamiltonian = StandardHamiltonian::new(&model, &likelihood).unwrap();
    let mut rng = StdRng::seed_from_u64(8);
    let position = Field::zeros(model.latent_space());
    let (kl, report) = MetricGaussianKL::new(
        hamiltonian,
        position.clone(),
        3,
        true,
        GradientNormController::new(100, 1e-10),
        &mut rng,
    )
    .unwrap();
    assert_eq!(report.samples, 6);
    assert_eq!(report.unconverged, 0);
    assert_eq!(kl.residuals().len(), 6);
    for pair in kl.residuals().chunks(2) {
        assert_eq!(pair[0], pair[1].scaled(-1.0));
    }
    assert_eq!(kl.sample_positions().len(), 6);

    let (plain, report) = MetricGaussianKL::new(
        hamiltonian,
        position.clone(),
        0,
        true,
        GradientNormController::default(),
        &mut rng,
    )
    .unwrap();
    assert_eq!(report.samples, 0);
    assert_eq!(plain.sample_positions(), vec![position.clone()]);
    assert_eq!(plain.value(), hamiltonian.at(&position).unwrap().value);
}

#[test]
fn gaussian_kl_recovers_the_wiener_filter() {
    let grid = Grid2D::line(32);
    let variance = 0.1;
    let prior = PriorCovariance::new(TestBackend, grid, &spectrum()).unwrap();
    let response = GeometryRemover::new(grid);
    let noise = scalar_noise(response.target(), variance).unwrap();
    let mut rng = StdRng::seed_from_u64(21);
    let synthetic = generate_wf_data(&prior, &response, &noise, &mut rng).unwrap();

    let filter = WienerFilter::new(&prior, &response, &noise, GradientNormController::new(200, 1e-12))
        .unwrap();
    let wiener_mean = filter.posterior_mean(&synthetic.data).unwrap().mean;

    let model = build_model(grid, Nonlinearity::Identity, response);
    let likelihood = Likelihood::new(LikelihoodKind::Gaussian, synthetic.data, variance).unwrap();
    let hamiltonian = StandardHamiltonian::new(&model, &likelihood).unwrap();
    // The energy is quadratic, so mirrored samples leave the minimum unchanged.
    let (kl, _) = MetricGaussianKL::new(
        hamiltonian,
        Field::zeros(model.latent_space()),
        2,
        true,
        GradientNormController::new(100, 1e-8),
        &mut rng,
    )
    .unwrap();
    let result = NewtonCg::new(GradInfNormController::new(1e-9, 50))
        .minimize(kl)
        .unwrap();
    assert_eq!(result.status, MinimizationStatus::Converged);

    let kl_mean = model.signal(result.energy.position()).unwrap();
    for (a, b) in kl_mean.as_slice().iter().zip(wiener_mean.as_slice()) {
        assert!((a - b).abs() < 1e-6, "{a} vs {b}");
    }
}

fn assert_kl_decreases(nonlinearity: Nonlinearity, kind: LikelihoodKind) {
    let grid = Grid2D::square(8);
    let mut model = build_model(grid, nonlinearity, GeometryRemover::new(grid));
    if kind == LikelihoodKind::Bernoulli {
        let (lo, hi) = PROBABILITY_CLIP;
        model = model.with_clip(lo, hi);
    }
    let mut rng = StdRng::seed_from_u64(99);
    let synthetic = generate_model_data(&model, kind, 1.0, &mut rng).unwrap();
    let likelihood = Likelihood::new(kind, synthetic.data, 1.0).unwrap();
    let hamiltonian = StandardHamiltonian::new(&model, &likelihood).unwrap();

    let mut position = Field::zeros(model.latent_space());
    let newton = NewtonCg::new(GradInfNormController::new(1e-6, 5));
    for round in 0..2 {
        let (kl, report) = MetricGaussianKL::new(
            hamiltonian,
            position.clone(),
            2,
            true,
            GradientNormController::new(50, 1e-6),
            &mut rng,
        )
        .unwrap();
        assert_eq!(report.samples, 4);
        let before = kl.value();
        let result = newton.minimize(kl).unwrap();
        let after = result.energy.value();
        assert!(after.is_finite());
        if round == 0 {
            assert!(after < before, "{kind}: {after} >= {before}");
        } else {
            assert!(after <= before, "{kind}: energy increased");
        }
        position = result.energy.position().clone();
    }
    assert!(position.is_finite());
    assert!(model.signal(&position).unwrap().is_finite());
}

#[test]
fn poisson_kl_decreases_energy() {
    assert_kl_decreases(Nonlinearity::Exp, LikelihoodKind::Poisson);
}

#[test]
fn bernoulli_kl_decreases_energy() {
    assert_kl_decreases(Nonlinearity::Sigmoid, LikelihoodKind::Bernoulli);
}

#[test]
fn unsupported_likelihood_name_fails_data_generation() {
    let grid = Grid2D::line(8);
    let model = build_model(grid, Nonlinearity::Identity, GeometryRemover::new(grid));
    let mut rng = StdRng::seed_from_u64(0);
    let err = generate_model_data_named(&model, "cauchy", 1.0, &mut rng).unwrap_err();
    assert_eq!(
        err,
        DataGenError::Likelihood(LikelihoodError::Unsupported("cauchy".into()))
    );
    assert!(generate_model_data_named(&model, "gauss", 1.0, &mut rng).is_ok());
}
