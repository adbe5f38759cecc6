//! Linear operators between field spaces.
//!
//! Operators are pure: `apply` takes a field on the domain and returns a new
//! field on the target. Every application checks the input space first.
//! Composite operators are plain structs built with [`OperatorExt`]:
//!
//! ```ignore
//! // D⁻¹ = S⁻¹ + Rᵀ N⁻¹ R
//! let likelihood_curvature = (&response).adjoint().compose((&noise).inverse().compose(&response)?)?;
//! let curvature = (&prior).inverse().plus(likelihood_curvature)?;
//! ```

use thiserror::Error;

use crate::field::{Field, Space};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperatorError {
    #[error("{operator}: expected a field on {expected}, got {found}")]
    SpaceMismatch {
        operator: &'static str,
        expected: Space,
        found: Space,
    },
    #[error("cannot combine operators: {left} does not match {right}")]
    IncompatibleSpaces { left: Space, right: Space },
    #[error("{0} has no inverse")]
    NotInvertible(&'static str),
}

pub trait LinearOperator {
    fn domain(&self) -> Space;
    fn target(&self) -> Space;
    fn apply(&self, input: &Field) -> Result<Field, OperatorError>;
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError>;

    fn apply_inverse(&self, _input: &Field) -> Result<Field, OperatorError> {
        Err(OperatorError::NotInvertible(self.name()))
    }

    fn apply_adjoint_inverse(&self, _input: &Field) -> Result<Field, OperatorError> {
        Err(OperatorError::NotInvertible(self.name()))
    }

    fn name(&self) -> &'static str {
        "operator"
    }
}

/// Reject `field` unless it lives on `expected`.
pub fn check_space(operator: &'static str, expected: Space, field: &Field) -> Result<(), OperatorError> {
    if field.space() == expected {
        Ok(())
    } else {
        Err(OperatorError::SpaceMismatch {
            operator,
            expected,
            found: field.space(),
        })
    }
}

impl<T: LinearOperator + ?Sized> LinearOperator for &T {
    fn domain(&self) -> Space {
        (**self).domain()
    }
    fn target(&self) -> Space {
        (**self).target()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        (**self).apply(input)
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        (**self).apply_adjoint(input)
    }
    fn apply_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        (**self).apply_inverse(input)
    }
    fn apply_adjoint_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        (**self).apply_adjoint_inverse(input)
    }
    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<T: LinearOperator + ?Sized> LinearOperator for Box<T> {
    fn domain(&self) -> Space {
        (**self).domain()
    }
    fn target(&self) -> Space {
        (**self).target()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        (**self).apply(input)
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        (**self).apply_adjoint(input)
    }
    fn apply_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        (**self).apply_inverse(input)
    }
    fn apply_adjoint_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        (**self).apply_adjoint_inverse(input)
    }
    fn name(&self) -> &'static str {
        (**self).name()
    }
}

// ============================================================================
// Elementary operators
// ============================================================================

/// Pointwise multiplication by a fixed field.
#[derive(Debug, Clone)]
pub struct DiagonalOperator {
    diagonal: Field,
}

impl DiagonalOperator {
    pub fn new(diagonal: Field) -> Self {
        Self { diagonal }
    }

    pub fn diagonal(&self) -> &Field {
        &self.diagonal
    }

    fn invertible(&self) -> bool {
        self.diagonal.as_slice().iter().all(|&v| v != 0.0 && v.is_finite())
    }
}

impl LinearOperator for DiagonalOperator {
    fn domain(&self) -> Space {
        self.diagonal.space()
    }
    fn target(&self) -> Space {
        self.diagonal.space()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.domain(), input)?;
        Ok(input.hadamard(&self.diagonal))
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        self.apply(input)
    }
    fn apply_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.domain(), input)?;
        if !self.invertible() {
            return Err(OperatorError::NotInvertible(self.name()));
        }
        Ok(input.zip_map(&self.diagonal, |x, d| x / d))
    }
    fn apply_adjoint_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        self.apply_inverse(input)
    }
    fn name(&self) -> &'static str {
        "DiagonalOperator"
    }
}

/// `factor · 1` on a single space.
#[derive(Debug, Clone, Copy)]
pub struct ScalingOperator {
    space: Space,
    factor: f64,
}

impl ScalingOperator {
    pub fn new(space: Space, factor: f64) -> Self {
        Self { space, factor }
    }

    pub fn identity(space: Space) -> Self {
        Self::new(space, 1.0)
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl LinearOperator for ScalingOperator {
    fn domain(&self) -> Space {
        self.space
    }
    fn target(&self) -> Space {
        self.space
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.space, input)?;
        Ok(input.scaled(self.factor))
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        self.apply(input)
    }
    fn apply_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.space, input)?;
        if self.factor == 0.0 {
            return Err(OperatorError::NotInvertible(self.name()));
        }
        Ok(input.scaled(1.0 / self.factor))
    }
    fn apply_adjoint_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        self.apply_inverse(input)
    }
    fn name(&self) -> &'static str {
        "ScalingOperator"
    }
}

// ============================================================================
// Combinators
// ============================================================================

/// `outer ∘ inner`
#[derive(Debug, Clone)]
pub struct Composed<O, I> {
    outer: O,
    inner: I,
}

impl<O: LinearOperator, I: LinearOperator> Composed<O, I> {
    pub fn new(outer: O, inner: I) -> Result<Self, OperatorError> {
        if inner.target() != outer.domain() {
            return Err(OperatorError::IncompatibleSpaces {
                left: outer.domain(),
                right: inner.target(),
            });
        }
        Ok(Self { outer, inner })
    }
}

impl<O: LinearOperator, I: LinearOperator> LinearOperator for Composed<O, I> {
    fn domain(&self) -> Space {
        self.inner.domain()
    }
    fn target(&self) -> Space {
        self.outer.target()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        self.outer.apply(&self.inner.apply(input)?)
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        self.inner.apply_adjoint(&self.outer.apply_adjoint(input)?)
    }
    fn apply_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        self.inner.apply_inverse(&self.outer.apply_inverse(input)?)
    }
    fn apply_adjoint_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        self.outer
            .apply_adjoint_inverse(&self.inner.apply_adjoint_inverse(input)?)
    }
    fn name(&self) -> &'static str {
        "Composed"
    }
}

/// `left + right`; never invertible in closed form.
#[derive(Debug, Clone)]
pub struct Sum<L, R> {
    left: L,
    right: R,
}

impl<L: LinearOperator, R: LinearOperator> Sum<L, R> {
    pub fn new(left: L, right: R) -> Result<Self, OperatorError> {
        if left.domain() != right.domain() {
            return Err(OperatorError::IncompatibleSpaces {
                left: left.domain(),
                right: right.domain(),
            });
        }
        if left.target() != right.target() {
            return Err(OperatorError::IncompatibleSpaces {
                left: left.target(),
                right: right.target(),
            });
        }
        Ok(Self { left, right })
    }
}

impl<L: LinearOperator, R: LinearOperator> LinearOperator for Sum<L, R> {
    fn domain(&self) -> Space {
        self.left.domain()
    }
    fn target(&self) -> Space {
        self.left.target()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        let mut out = self.left.apply(input)?;
        out.axpy(1.0, &self.right.apply(input)?);
        Ok(out)
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        let mut out = self.left.apply_adjoint(input)?;
        out.axpy(1.0, &self.right.apply_adjoint(input)?);
        Ok(out)
    }
    fn name(&self) -> &'static str {
        "Sum"
    }
}

/// `factor · op`
#[derive(Debug, Clone)]
pub struct Scaled<T> {
    op: T,
    factor: f64,
}

impl<T: LinearOperator> LinearOperator for Scaled<T> {
    fn domain(&self) -> Space {
        self.op.domain()
    }
    fn target(&self) -> Space {
        self.op.target()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        Ok(self.op.apply(input)?.scaled(self.factor))
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        Ok(self.op.apply_adjoint(input)?.scaled(self.factor))
    }
    fn apply_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        if self.factor == 0.0 {
            return Err(OperatorError::NotInvertible(self.name()));
        }
        Ok(self.op.apply_inverse(input)?.scaled(1.0 / self.factor))
    }
    fn apply_adjoint_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        if self.factor == 0.0 {
            return Err(OperatorError::NotInvertible(self.name()));
        }
        Ok(self.op.apply_adjoint_inverse(input)?.scaled(1.0 / self.factor))
    }
    fn name(&self) -> &'static str {
        "Scaled"
    }
}

/// Adjoint view of an operator.
#[derive(Debug, Clone)]
pub struct Adjoint<T>(T);

impl<T: LinearOperator> LinearOperator for Adjoint<T> {
    fn domain(&self) -> Space {
        self.0.target()
    }
    fn target(&self) -> Space {
        self.0.domain()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        self.0.apply_adjoint(input)
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        self.0.apply(input)
    }
    fn apply_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        self.0.apply_adjoint_inverse(input)
    }
    fn apply_adjoint_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        self.0.apply_inverse(input)
    }
    fn name(&self) -> &'static str {
        "Adjoint"
    }
}

/// Inverse view of an operator. Only usable if the wrapped operator
/// implements `apply_inverse`.
#[derive(Debug, Clone)]
pub struct Inverse<T>(T);

impl<T: LinearOperator> LinearOperator for Inverse<T> {
    fn domain(&self) -> Space {
        self.0.target()
    }
    fn target(&self) -> Space {
        self.0.domain()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        self.0.apply_inverse(input)
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        self.0.apply_adjoint_inverse(input)
    }
    fn apply_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        self.0.apply(input)
    }
    fn apply_adjoint_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        self.0.apply_adjoint(input)
    }
    fn name(&self) -> &'static str {
        "Inverse"
    }
}

pub trait OperatorExt: LinearOperator + Sized {
    /// `self ∘ inner`
    fn compose<I: LinearOperator>(self, inner: I) -> Result<Composed<Self, I>, OperatorError> {
        Composed::new(self, inner)
    }

    fn plus<R: LinearOperator>(self, right: R) -> Result<Sum<Self, R>, OperatorError> {
        Sum::new(self, right)
    }

    fn scaled(self, factor: f64) -> Scaled<Self> {
        Scaled { op: self, factor }
    }

    fn adjoint(self) -> Adjoint<Self> {
        Adjoint(self)
    }

    fn inverse(self) -> Inverse<Self> {
        Inverse(self)
    }
}

impl<T: LinearOperator> OperatorExt for T {}
