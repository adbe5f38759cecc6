//! Uniform grid helpers and the harmonic codomain of a position grid.

use serde::{Deserialize, Serialize};

/// Regular grid with periodic boundaries. One-dimensional grids use `ny = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid2D {
    pub nx: usize,
    #[serde(default = "default_extent")]
    pub ny: usize,
    #[serde(default = "default_length")]
    pub lx: f64,
    #[serde(default = "default_length")]
    pub ly: f64,
}

impl Grid2D {
    pub fn new(nx: usize, ny: usize, lx: f64, ly: f64) -> Self {
        Self { nx, ny, lx, ly }
    }

    /// One-dimensional grid of `n` pixels on the unit interval.
    pub fn line(n: usize) -> Self {
        Self::new(n, 1, 1.0, 1.0)
    }

    /// Square grid of `n × n` pixels on the unit square.
    pub fn square(n: usize) -> Self {
        Self::new(n, n, 1.0, 1.0)
    }

    #[inline]
    pub fn idx(&self, ix: usize, iy: usize) -> usize {
        iy * self.nx + ix
    }

    pub fn len(&self) -> usize {
        self.nx * self.ny
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_one_dimensional(&self) -> bool {
        self.ny == 1
    }

    /// Edge lengths of a single pixel.
    pub fn pixel_size(&self) -> [f64; 2] {
        [self.lx / self.nx as f64, self.ly / self.ny as f64]
    }

    /// Length `|k|` of every harmonic mode, in row-major order.
    ///
    /// Wavenumbers count cycles per unit length, so on the unit interval the
    /// mode lengths are the integers `0, 1, …, n/2`.
    pub fn k_lengths(&self) -> Vec<f64> {
        let kx = build_k_vector(self.nx, self.lx);
        let ky = build_k_vector(self.ny, self.ly);
        let mut values = vec![0.0; self.len()];
        for (iy, &ky_val) in ky.iter().enumerate() {
            for (ix, &kx_val) in kx.iter().enumerate() {
                values[self.idx(ix, iy)] = (kx_val * kx_val + ky_val * ky_val).sqrt();
            }
        }
        values
    }

    /// Largest mode length present on the grid.
    pub fn k_max(&self) -> f64 {
        self.k_lengths().into_iter().fold(0.0, f64::max)
    }
}

impl std::fmt::Display for Grid2D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_one_dimensional() {
            write!(f, "{} (L={})", self.nx, self.lx)
        } else {
            write!(f, "{}x{} (L={}x{})", self.nx, self.ny, self.lx, self.ly)
        }
    }
}

fn build_k_vector(n: usize, length: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let centered = if i <= n / 2 {
                i as isize
            } else {
                i as isize - n as isize
            };
            centered as f64 / length
        })
        .collect()
}

fn default_length() -> f64 {
    1.0
}

fn default_extent() -> usize {
    1
}
