//! CPU spectral backend built on rustfft.
//!
//! The Hartley transform is taken from a complex 2D FFT: with
//! `X[k] = Σ x[n] e^{-iθ}` the Hartley coefficient is `Re X[k] − Im X[k]`.
//! Row transforms run in place; columns are gathered into a scratch buffer.

use std::sync::Arc;

use num_complex::Complex64;
use parking_lot::Mutex;
use rustfft::{Fft, FftPlanner};
use sigrec_core::backend::SpectralBackend;
use sigrec_core::field::Field;
use sigrec_core::grid::Grid2D;


/// rustfft-backed backend. Clones share one planner, so plans built for a
/// grid are reused by every operator holding the backend.
#[derive(Clone)]
pub struct CpuBackend {
    planner: Arc<Mutex<FftPlanner<f64>>>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            planner: Arc::new(Mutex::new(FftPlanner::new())),
        }
    }

    fn plans(&self, grid: Grid2D) -> (Arc<dyn Fft<f64>>, Arc<dyn Fft<f64>>) {
        let mut planner = self.planner.lock();
        let fft_x = planner.plan_fft_forward(grid.nx);
        let fft_y = planner.plan_fft_forward(grid.ny);
        (fft_x, fft_y)
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuBackend").finish_non_exhaustive()
    }
}

/// Scratch space reused across the fields of one batch.
struct Workspace {
    complex: Vec<Complex64>,
    column: Vec<Complex64>,
}

impl Workspace {
    fn new(grid: Grid2D) -> Self {
        Self {
            complex: vec![Complex64::ZERO; grid.len()],
            column: vec![Complex64::ZERO; grid.ny],
        }
    }
}

fn hartley_with(
    grid: Grid2D,
    fft_x: &dyn Fft<f64>,
    fft_y: &dyn Fft<f64>,
    workspace: &mut Workspace,
    data: &mut [f64],
) {
    let (nx, ny) = (grid.nx, grid.ny);
    assert_eq!(data.len(), nx * ny, "buffer length must match grid size");
    let complex = &mut workspace.complex;
    for (slot, &value) in complex.iter_mut().zip(data.iter()) {
        *slot = Complex64::new(value, 0.0);
    }

    // Row FFTs
    for row in complex.chunks_exact_mut(nx) {
        fft_x.process(row);
    }

    // Column FFTs (gather/scatter)
    if ny > 1 {
        let column = &mut workspace.column;
        for col in 0..nx {
            for row in 0..ny {
                column[row] = complex[row * nx + col];
            }
            fft_y.process(column);
            for row in 0..ny {
                complex[row * nx + col] = column[row];
            }
        }
    }

    for (value, coeff) in data.iter_mut().zip(complex.iter()) {
        *value = coeff.re - coeff.im;
    }
}

impl SpectralBackend for CpuBackend {
    fn hartley(&self, grid: Grid2D, data: &mut [f64]) {
        let (fft_x, fft_y) = self.plans(grid);
        let mut workspace = Workspace::new(grid);
        hartley_with(grid, fft_x.as_ref(), fft_y.as_ref(), &mut workspace, data);
    }

    fn batch_hartley(&self, grid: Grid2D, fields: &mut [Field]) {
        let (fft_x, fft_y) = self.plans(grid);
        let mut workspace = Workspace::new(grid);
        for field in fields.iter_mut() {
            hartley_with(
                grid,
                fft_x.as_ref(),
                fft_y.as_ref(),
                &mut workspace,
                field.as_mut_slice(),
            );
        }
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}
