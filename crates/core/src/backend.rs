//! Backend trait for spectral operations.
//!
//! Fields are real, so the harmonic representation uses the discrete Hartley
//! transform instead of a complex FFT:
//!
//! ```text
//! H[k] = Σ_n x[n] · cas(2π (kx·x/nx + ky·y/ny)),   cas θ = cos θ + sin θ
//! ```
//!
//! The transform is unnormalised, symmetric and satisfies `H·H = N·I`, so the
//! same routine serves as forward transform, adjoint and (scaled) inverse.
//! Backends compute it however they like; the CPU backend derives it from a
//! complex FFT as `Re − Im`.

use crate::field::Field;
use crate::grid::Grid2D;

pub trait SpectralBackend {
    /// In-place unnormalised 2D Hartley transform of row-major `data`.
    fn hartley(&self, grid: Grid2D, data: &mut [f64]);

    /// Hartley transform followed by division by `N`, the exact inverse.
    fn inverse_hartley(&self, grid: Grid2D, data: &mut [f64]) {
        self.hartley(grid, data);
        let norm = 1.0 / grid.len() as f64;
        for value in data.iter_mut() {
            *value *= norm;
        }
    }

    /// Transform a batch of fields sharing one grid.
    ///
    /// Backends can override this to amortise plan lookups across buffers.
    fn batch_hartley(&self, grid: Grid2D, fields: &mut [Field]) {
        for field in fields.iter_mut() {
            self.hartley(grid, field.as_mut_slice());
        }
    }

    /// Human-readable backend name used in logs and metrics.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<B: SpectralBackend + ?Sized> SpectralBackend for &B {
    fn hartley(&self, grid: Grid2D, data: &mut [f64]) {
        (**self).hartley(grid, data)
    }

    fn batch_hartley(&self, grid: Grid2D, fields: &mut [Field]) {
        (**self).batch_hartley(grid, fields)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
