//! Harmonic transform and harmonic-space smoothing.

use crate::backend::SpectralBackend;
use crate::field::{Field, Space};
use crate::grid::Grid2D;
use crate::operator::{LinearOperator, OperatorError, check_space};

/// Maps harmonic coefficients to position space with the unnormalised
/// Hartley transform.
///
/// Because the Hartley kernel is symmetric the adjoint is the same
/// transform (position → harmonic) and the inverse is the transform divided
/// by the number of pixels.
#[derive(Debug, Clone)]
pub struct HarmonicTransform<B> {
    backend: B,
    grid: Grid2D,
}

impl<B: SpectralBackend> HarmonicTransform<B> {
    pub fn new(backend: B, grid: Grid2D) -> Self {
        Self { backend, grid }
    }

    pub fn grid(&self) -> Grid2D {
        self.grid
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Position-space field from raw harmonic coefficients.
    pub fn synthesize(&self, mut coefficients: Vec<f64>) -> Field {
        assert_eq!(coefficients.len(), self.grid.len(), "coefficient count must match grid size");
        self.backend.hartley(self.grid, &mut coefficients);
        Field::from_vec(Space::Position(self.grid), coefficients)
    }

    /// Position-space fields from a batch of harmonic fields, transformed in
    /// one backend call.
    pub fn synthesize_batch(&self, mut batch: Vec<Field>) -> Vec<Field> {
        for field in &batch {
            assert_eq!(field.space(), self.domain(), "batch fields must be harmonic on the grid");
        }
        self.backend.batch_hartley(self.grid, &mut batch);
        batch
            .into_iter()
            .map(|field| field.relabel(Space::Position(self.grid)))
            .collect()
    }

    fn transform(&self, input: &Field, target: Space, inverse: bool) -> Field {
        let mut data = input.as_slice().to_vec();
        if inverse {
            self.backend.inverse_hartley(self.grid, &mut data);
        } else {
            self.backend.hartley(self.grid, &mut data);
        }
        Field::from_vec(target, data)
    }
}

impl<B: SpectralBackend> LinearOperator for HarmonicTransform<B> {
    fn domain(&self) -> Space {
        Space::Harmonic(self.grid)
    }
    fn target(&self) -> Space {
        Space::Position(self.grid)
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.domain(), input)?;
        Ok(self.transform(input, self.target(), false))
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.target(), input)?;
        Ok(self.transform(input, self.domain(), false))
    }
    fn apply_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.target(), input)?;
        Ok(self.transform(input, self.domain(), true))
    }
    fn apply_adjoint_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.domain(), input)?;
        Ok(self.transform(input, self.target(), true))
    }
    fn name(&self) -> &'static str {
        "HarmonicTransform"
    }
}

/// Gaussian smoothing applied as a diagonal in harmonic space.
///
/// The kernel is `exp(−2π²σ²|k|²)`, the Fourier transform of a unit-mass
/// Gaussian with standard deviation `σ` in position units. The operator is
/// self-adjoint and acts on position space.
#[derive(Debug, Clone)]
pub struct HarmonicSmoothing<B> {
    transform: HarmonicTransform<B>,
    kernel: Vec<f64>,
}

impl<B: SpectralBackend> HarmonicSmoothing<B> {
    pub fn new(backend: B, grid: Grid2D, sigma: f64) -> Self {
        let two_pi_sq_sigma_sq = 2.0 * std::f64::consts::PI.powi(2) * sigma * sigma;
        let kernel = grid
            .k_lengths()
            .into_iter()
            .map(|k| (-two_pi_sq_sigma_sq * k * k).exp())
            .collect();
        Self {
            transform: HarmonicTransform::new(backend, grid),
            kernel,
        }
    }

    pub fn kernel(&self) -> &[f64] {
        &self.kernel
    }
}

impl<B: SpectralBackend> LinearOperator for HarmonicSmoothing<B> {
    fn domain(&self) -> Space {
        self.transform.target()
    }
    fn target(&self) -> Space {
        self.transform.target()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.domain(), input)?;
        let mut harmonic = self.transform.apply_inverse(input)?;
        for (value, &scale) in harmonic.as_mut_slice().iter_mut().zip(&self.kernel) {
            *value *= scale;
        }
        self.transform.apply(&harmonic)
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        self.apply(input)
    }
    fn name(&self) -> &'static str {
        "HarmonicSmoothing"
    }
}
