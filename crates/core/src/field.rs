//! Real-valued field storage tagged with the space it lives on.
//!
//! Every operator checks the [`Space`] of its input before touching the data,
//! so a field can never be silently reinterpreted on a different grid. The
//! arithmetic helpers below (`dot`, `axpy`, ...) assume both operands were
//! produced by checked operators and only assert matching spaces.

use rand::Rng;
use rand_distr::StandardNormal;

use crate::grid::Grid2D;

/// The space a field is defined on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Space {
    /// Pixels of a regular grid.
    Position(Grid2D),
    /// Harmonic modes of a regular grid (its default codomain).
    Harmonic(Grid2D),
    /// A flat data vector without geometry.
    Unstructured(usize),
    /// Harmonic excitations of a grid followed by `parameters` scalar
    /// latent parameters.
    Latent { grid: Grid2D, parameters: usize },
}

impl Space {
    pub fn len(&self) -> usize {
        match self {
            Space::Position(grid) | Space::Harmonic(grid) => grid.len(),
            Space::Unstructured(len) => *len,
            Space::Latent { grid, parameters } => grid.len() + parameters,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn grid(&self) -> Option<Grid2D> {
        match self {
            Space::Position(grid) | Space::Harmonic(grid) => Some(*grid),
            Space::Latent { grid, .. } => Some(*grid),
            Space::Unstructured(_) => None,
        }
    }

    /// Harmonic partner of a position space and vice versa.
    pub fn codomain(&self) -> Option<Space> {
        match self {
            Space::Position(grid) => Some(Space::Harmonic(*grid)),
            Space::Harmonic(grid) => Some(Space::Position(*grid)),
            Space::Unstructured(_) | Space::Latent { .. } => None,
        }
    }
}

impl std::fmt::Display for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Space::Position(grid) => write!(f, "position[{grid}]"),
            Space::Harmonic(grid) => write!(f, "harmonic[{grid}]"),
            Space::Unstructured(len) => write!(f, "unstructured[{len}]"),
            Space::Latent { grid, parameters } => write!(f, "latent[{grid} + {parameters}]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    space: Space,
    data: Vec<f64>,
}

impl Field {
    pub fn zeros(space: Space) -> Self {
        Self::full(space, 0.0)
    }

    pub fn full(space: Space, value: f64) -> Self {
        Self {
            data: vec![value; space.len()],
            space,
        }
    }

    pub fn from_vec(space: Space, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), space.len(), "data length must match space size");
        Self { space, data }
    }

    /// Field of independent standard-normal entries.
    pub fn random_normal<R: Rng + ?Sized>(space: Space, rng: &mut R) -> Self {
        let data = (0..space.len()).map(|_| rng.sample(StandardNormal)).collect();
        Self { space, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn space(&self) -> Space {
        self.space
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// Same values, reinterpreted on a space of equal size.
    pub fn relabel(self, space: Space) -> Self {
        Self::from_vec(space, self.data)
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn dot(&self, other: &Field) -> f64 {
        self.assert_same_space(other);
        self.data.iter().zip(&other.data).map(|(a, b)| a * b).sum()
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Largest absolute entry.
    pub fn max_abs(&self) -> f64 {
        self.data.iter().fold(0.0, |acc, v| acc.max(v.abs()))
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            0.0
        } else {
            self.sum() / self.data.len() as f64
        }
    }

    /// `self += alpha * x`
    pub fn axpy(&mut self, alpha: f64, x: &Field) {
        self.assert_same_space(x);
        for (dst, src) in self.data.iter_mut().zip(&x.data) {
            *dst += alpha * src;
        }
    }

    pub fn scale(&mut self, alpha: f64) {
        for value in &mut self.data {
            *value *= alpha;
        }
    }

    pub fn scaled(&self, alpha: f64) -> Field {
        self.map(|v| alpha * v)
    }

    pub fn plus(&self, other: &Field) -> Field {
        self.zip_map(other, |a, b| a + b)
    }

    pub fn minus(&self, other: &Field) -> Field {
        self.zip_map(other, |a, b| a - b)
    }

    /// Pointwise product.
    pub fn hadamard(&self, other: &Field) -> Field {
        self.zip_map(other, |a, b| a * b)
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Field {
        Field {
            space: self.space,
            data: self.data.iter().copied().map(f).collect(),
        }
    }

    pub fn zip_map(&self, other: &Field, f: impl Fn(f64, f64) -> f64) -> Field {
        self.assert_same_space(other);
        Field {
            space: self.space,
            data: self
                .data
                .iter()
                .zip(&other.data)
                .map(|(&a, &b)| f(a, b))
                .collect(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Mean squared difference to another field on the same space.
    pub fn mse(&self, other: &Field) -> f64 {
        self.assert_same_space(other);
        if self.data.is_empty() {
            return 0.0;
        }
        self.data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            / self.data.len() as f64
    }

    fn assert_same_space(&self, other: &Field) {
        assert_eq!(
            self.space, other.space,
            "field spaces must match ({} vs {})",
            self.space, other.space
        );
    }
}

impl From<Field> for Vec<f64> {
    fn from(field: Field) -> Self {
        field.data
    }
}
