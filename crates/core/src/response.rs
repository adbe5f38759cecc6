//! Forward (response) operators mapping a position-space signal to data.
//!
//! Every response ends in an unstructured data space. The variants mirror
//! the instrument models used throughout the reconstruction scenarios:
//!
//! - [`GeometryRemover`]: direct observation of every pixel
//! - [`MaskResponse`]: observe a subset of pixels (checkerboard by default)
//! - [`ExposureResponse`]: pixel-wise exposure weights
//! - [`PsfResponse`]: Gaussian point-spread function
//! - [`LineOfSightResponse`]: integrals along straight lines (tomography)

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::SpectralBackend;
use crate::field::{Field, Space};
use crate::grid::Grid2D;
use crate::harmonic::HarmonicSmoothing;
use crate::operator::{LinearOperator, OperatorError, check_space};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResponseError {
    #[error("{0} requires a two-dimensional grid")]
    RequiresTwoDimensions(&'static str),
    #[error("invalid response parameter: {0}")]
    InvalidParameter(String),
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseConfig {
    /// Observe every pixel.
    #[default]
    Identity,
    /// Observe the even tiles of a `blocks × blocks` checkerboard.
    Checkerboard {
        #[serde(default = "default_blocks")]
        blocks: usize,
    },
    /// Structured exposure (bands of ×2, ×3 and ×0.1 sensitivity).
    Exposure,
    /// Gaussian blur with standard deviation `sigma` in position units.
    Psf { sigma: f64 },
    /// Lines from random starts to the grid centre.
    RadialTomography {
        #[serde(default = "default_lines_of_sight")]
        lines_of_sight: usize,
    },
    /// Lines between random start and end points.
    RandomTomography {
        #[serde(default = "default_lines_of_sight")]
        lines_of_sight: usize,
    },
}

fn default_blocks() -> usize {
    8
}

fn default_lines_of_sight() -> usize {
    100
}

impl ResponseConfig {
    pub fn label(&self) -> &'static str {
        match self {
            ResponseConfig::Identity => "identity",
            ResponseConfig::Checkerboard { .. } => "checkerboard",
            ResponseConfig::Exposure => "exposure",
            ResponseConfig::Psf { .. } => "psf",
            ResponseConfig::RadialTomography { .. } => "radial_tomography",
            ResponseConfig::RandomTomography { .. } => "random_tomography",
        }
    }

    /// Check the parameters against the grid they will be built on.
    pub fn validate(&self, grid: Grid2D) -> Result<(), ResponseError> {
        match *self {
            ResponseConfig::Identity | ResponseConfig::Exposure => Ok(()),
            ResponseConfig::Checkerboard { blocks } => {
                if blocks == 0 || blocks > grid.nx {
                    return Err(ResponseError::InvalidParameter(format!(
                        "checkerboard blocks must be in 1..={}",
                        grid.nx
                    )));
                }
                Ok(())
            }
            ResponseConfig::Psf { sigma } => {
                if !(sigma > 0.0 && sigma.is_finite()) {
                    return Err(ResponseError::InvalidParameter(
                        "psf sigma must be positive".into(),
                    ));
                }
                Ok(())
            }
            ResponseConfig::RadialTomography { lines_of_sight }
            | ResponseConfig::RandomTomography { lines_of_sight } => {
                if grid.is_one_dimensional() {
                    return Err(ResponseError::RequiresTwoDimensions(self.label()));
                }
                if lines_of_sight == 0 {
                    return Err(ResponseError::InvalidParameter(
                        "lines_of_sight must be at least 1".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Instantiate a response for `grid`. Tomography geometries consume
/// randomness from `rng`.
pub fn build_response<B: SpectralBackend, R: Rng + ?Sized>(
    config: &ResponseConfig,
    backend: B,
    grid: Grid2D,
    rng: &mut R,
) -> Result<Response<B>, ResponseError> {
    config.validate(grid)?;
    let response = match *config {
        ResponseConfig::Identity => Response::Identity(GeometryRemover::new(grid)),
        ResponseConfig::Checkerboard { blocks } => {
            Response::Mask(MaskResponse::checkerboard(grid, blocks))
        }
        ResponseConfig::Exposure => Response::Exposure(ExposureResponse::structured(grid)),
        ResponseConfig::Psf { sigma } => Response::Psf(PsfResponse::new(backend, grid, sigma)),
        ResponseConfig::RadialTomography { lines_of_sight } => {
            Response::LineOfSight(LineOfSightResponse::radial(grid, lines_of_sight, rng)?)
        }
        ResponseConfig::RandomTomography { lines_of_sight } => {
            Response::LineOfSight(LineOfSightResponse::random(grid, lines_of_sight, rng)?)
        }
    };
    Ok(response)
}

// ============================================================================
// Dispatch
// ============================================================================

pub enum Response<B> {
    Identity(GeometryRemover),
    Mask(MaskResponse),
    Exposure(ExposureResponse),
    Psf(PsfResponse<B>),
    LineOfSight(LineOfSightResponse),
}

macro_rules! dispatch {
    ($self:ident, $op:ident => $body:expr) => {
        match $self {
            Response::Identity($op) => $body,
            Response::Mask($op) => $body,
            Response::Exposure($op) => $body,
            Response::Psf($op) => $body,
            Response::LineOfSight($op) => $body,
        }
    };
}

impl<B: SpectralBackend> LinearOperator for Response<B> {
    fn domain(&self) -> Space {
        dispatch!(self, op => op.domain())
    }
    fn target(&self) -> Space {
        dispatch!(self, op => op.target())
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        dispatch!(self, op => op.apply(input))
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        dispatch!(self, op => op.apply_adjoint(input))
    }
    fn name(&self) -> &'static str {
        dispatch!(self, op => op.name())
    }
}

// ============================================================================
// Geometry remover
// ============================================================================

/// Identity on the values, dropping the grid geometry.
#[derive(Debug, Clone, Copy)]
pub struct GeometryRemover {
    grid: Grid2D,
}

impl GeometryRemover {
    pub fn new(grid: Grid2D) -> Self {
        Self { grid }
    }
}

impl LinearOperator for GeometryRemover {
    fn domain(&self) -> Space {
        Space::Position(self.grid)
    }
    fn target(&self) -> Space {
        Space::Unstructured(self.grid.len())
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.domain(), input)?;
        Ok(input.clone().relabel(self.target()))
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.target(), input)?;
        Ok(input.clone().relabel(self.domain()))
    }
    fn apply_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        self.apply_adjoint(input)
    }
    fn apply_adjoint_inverse(&self, input: &Field) -> Result<Field, OperatorError> {
        self.apply(input)
    }
    fn name(&self) -> &'static str {
        "GeometryRemover"
    }
}

// ============================================================================
// Mask
// ============================================================================

/// Selects the observed pixels; the adjoint scatters data back with zeros
/// in the flagged pixels.
#[derive(Debug, Clone)]
pub struct MaskResponse {
    grid: Grid2D,
    observed: Vec<usize>,
}

impl MaskResponse {
    /// `flagged[i] == true` removes pixel `i` from the data.
    pub fn from_flags(grid: Grid2D, flagged: &[bool]) -> Self {
        assert_eq!(flagged.len(), grid.len(), "mask length must match grid size");
        let observed = flagged
            .iter()
            .enumerate()
            .filter(|(_, &flag)| !flag)
            .map(|(idx, _)| idx)
            .collect();
        Self { grid, observed }
    }

    /// Checkerboard of `blocks × blocks` tiles; tiles with even `i + j`
    /// are observed. On 1-D grids the tiles become alternating segments.
    pub fn checkerboard(grid: Grid2D, blocks: usize) -> Self {
        let blocks_y = if grid.is_one_dimensional() { 1 } else { blocks };
        let mut flagged = vec![true; grid.len()];
        for iy in 0..grid.ny {
            let j = iy * blocks_y / grid.ny;
            for ix in 0..grid.nx {
                let i = ix * blocks / grid.nx;
                if (i + j) % 2 == 0 {
                    flagged[grid.idx(ix, iy)] = false;
                }
            }
        }
        Self::from_flags(grid, &flagged)
    }

    pub fn observed_pixels(&self) -> &[usize] {
        &self.observed
    }
}

impl LinearOperator for MaskResponse {
    fn domain(&self) -> Space {
        Space::Position(self.grid)
    }
    fn target(&self) -> Space {
        Space::Unstructured(self.observed.len())
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.domain(), input)?;
        let values = input.as_slice();
        let data = self.observed.iter().map(|&idx| values[idx]).collect();
        Ok(Field::from_vec(self.target(), data))
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.target(), input)?;
        let mut out = Field::zeros(self.domain());
        let values = out.as_mut_slice();
        for (&idx, &value) in self.observed.iter().zip(input.as_slice()) {
            values[idx] = value;
        }
        Ok(out)
    }
    fn name(&self) -> &'static str {
        "MaskResponse"
    }
}

// ============================================================================
// Exposure
// ============================================================================

/// Pixel-wise exposure followed by geometry removal.
#[derive(Debug, Clone)]
pub struct ExposureResponse {
    exposure: Field,
}

impl ExposureResponse {
    pub fn new(exposure: Field) -> Self {
        Self { exposure }
    }

    /// Bands of doubled, tripled and strongly reduced sensitivity along each
    /// grid axis; the factors multiply where bands cross.
    pub fn structured(grid: Grid2D) -> Self {
        let x_factors = band_factors(grid.nx);
        let y_factors = if grid.is_one_dimensional() {
            vec![1.0]
        } else {
            band_factors(grid.ny)
        };
        let mut exposure = Field::zeros(Space::Position(grid));
        let values = exposure.as_mut_slice();
        for iy in 0..grid.ny {
            for ix in 0..grid.nx {
                values[grid.idx(ix, iy)] = x_factors[ix] * y_factors[iy];
            }
        }
        Self { exposure }
    }

    pub fn exposure(&self) -> &Field {
        &self.exposure
    }
}

fn band_factors(n: usize) -> Vec<f64> {
    let mut factors = vec![1.0; n];
    let bands = [
        (n / 3, n / 2, 2.0),
        (n * 4 / 5, n, 0.1),
        (n / 2, (n * 3 / 2).min(n), 3.0),
    ];
    for (start, end, factor) in bands {
        for value in &mut factors[start..end] {
            *value *= factor;
        }
    }
    factors
}

impl LinearOperator for ExposureResponse {
    fn domain(&self) -> Space {
        self.exposure.space()
    }
    fn target(&self) -> Space {
        Space::Unstructured(self.exposure.len())
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.domain(), input)?;
        Ok(input.hadamard(&self.exposure).relabel(self.target()))
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.target(), input)?;
        Ok(input.clone().relabel(self.domain()).hadamard(&self.exposure))
    }
    fn name(&self) -> &'static str {
        "ExposureResponse"
    }
}

// ============================================================================
// Point-spread function
// ============================================================================

/// Gaussian blur followed by geometry removal.
pub struct PsfResponse<B> {
    smoothing: HarmonicSmoothing<B>,
    remover: GeometryRemover,
}

impl<B: SpectralBackend> PsfResponse<B> {
    pub fn new(backend: B, grid: Grid2D, sigma: f64) -> Self {
        Self {
            smoothing: HarmonicSmoothing::new(backend, grid, sigma),
            remover: GeometryRemover::new(grid),
        }
    }
}

impl<B: SpectralBackend> LinearOperator for PsfResponse<B> {
    fn domain(&self) -> Space {
        self.remover.domain()
    }
    fn target(&self) -> Space {
        self.remover.target()
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        self.remover.apply(&self.smoothing.apply(input)?)
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        self.smoothing.apply_adjoint(&self.remover.apply_adjoint(input)?)
    }
    fn name(&self) -> &'static str {
        "PsfResponse"
    }
}

// ============================================================================
// Lines of sight
// ============================================================================

/// Number of integration steps per pixel edge along a line of sight.
const LOS_OVERSAMPLING: f64 = 4.0;

/// Line integrals through position space.
///
/// Each datum is `Σ_i w_i · s(x_i)` with `x_i` the pixels crossed by the
/// line and `w_i` the path length spent inside each, found by stepping along
/// the segment at a quarter of the pixel size. Line endpoints are given in
/// units of the grid extent, i.e. in `[0, 1]²`.
#[derive(Debug, Clone)]
pub struct LineOfSightResponse {
    grid: Grid2D,
    rows: Vec<Vec<(usize, f64)>>,
}

impl LineOfSightResponse {
    pub fn new(
        grid: Grid2D,
        starts: &[[f64; 2]],
        ends: &[[f64; 2]],
    ) -> Result<Self, ResponseError> {
        if grid.is_one_dimensional() {
            return Err(ResponseError::RequiresTwoDimensions("line-of-sight response"));
        }
        if starts.len() != ends.len() {
            return Err(ResponseError::InvalidParameter(format!(
                "{} line starts but {} ends",
                starts.len(),
                ends.len()
            )));
        }
        let rows = starts
            .iter()
            .zip(ends)
            .map(|(start, end)| integrate_line(grid, *start, *end))
            .collect();
        Ok(Self { grid, rows })
    }

    /// Lines from uniformly random starts to the centre of the grid.
    pub fn radial<R: Rng + ?Sized>(
        grid: Grid2D,
        lines_of_sight: usize,
        rng: &mut R,
    ) -> Result<Self, ResponseError> {
        let starts: Vec<[f64; 2]> = (0..lines_of_sight)
            .map(|_| [rng.gen::<f64>(), rng.gen::<f64>()])
            .collect();
        let ends = vec![[0.5, 0.5]; lines_of_sight];
        Self::new(grid, &starts, &ends)
    }

    /// Lines between uniformly random start and end points.
    pub fn random<R: Rng + ?Sized>(
        grid: Grid2D,
        lines_of_sight: usize,
        rng: &mut R,
    ) -> Result<Self, ResponseError> {
        let starts: Vec<[f64; 2]> = (0..lines_of_sight)
            .map(|_| [rng.gen::<f64>(), rng.gen::<f64>()])
            .collect();
        let ends: Vec<[f64; 2]> = (0..lines_of_sight)
            .map(|_| [rng.gen::<f64>(), rng.gen::<f64>()])
            .collect();
        Self::new(grid, &starts, &ends)
    }

    pub fn rows(&self) -> &[Vec<(usize, f64)>] {
        &self.rows
    }
}

fn integrate_line(grid: Grid2D, start: [f64; 2], end: [f64; 2]) -> Vec<(usize, f64)> {
    let x0 = start[0] * grid.lx;
    let y0 = start[1] * grid.ly;
    let dx = (end[0] - start[0]) * grid.lx;
    let dy = (end[1] - start[1]) * grid.ly;
    let length = (dx * dx + dy * dy).sqrt();
    if length == 0.0 {
        return Vec::new();
    }
    let [px, py] = grid.pixel_size();
    let steps = ((length / px.min(py)) * LOS_OVERSAMPLING).ceil().max(1.0) as usize;
    let step_length = length / steps as f64;

    let mut weights: Vec<(usize, f64)> = Vec::new();
    for step in 0..steps {
        let t = (step as f64 + 0.5) / steps as f64;
        let ix = (((x0 + t * dx) / px) as usize).min(grid.nx - 1);
        let iy = (((y0 + t * dy) / py) as usize).min(grid.ny - 1);
        let idx = grid.idx(ix, iy);
        match weights.last_mut() {
            Some((last, weight)) if *last == idx => *weight += step_length,
            _ => weights.push((idx, step_length)),
        }
    }
    weights
}

impl LinearOperator for LineOfSightResponse {
    fn domain(&self) -> Space {
        Space::Position(self.grid)
    }
    fn target(&self) -> Space {
        Space::Unstructured(self.rows.len())
    }
    fn apply(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.domain(), input)?;
        let values = input.as_slice();
        let data = self
            .rows
            .iter()
            .map(|row| row.iter().map(|&(idx, w)| w * values[idx]).sum())
            .collect();
        Ok(Field::from_vec(self.target(), data))
    }
    fn apply_adjoint(&self, input: &Field) -> Result<Field, OperatorError> {
        check_space(self.name(), self.target(), input)?;
        let mut out = Field::zeros(self.domain());
        let values = out.as_mut_slice();
        for (row, &datum) in self.rows.iter().zip(input.as_slice()) {
            for &(idx, w) in row {
                values[idx] += w * datum;
            }
        }
        Ok(out)
    }
    fn name(&self) -> &'static str {
        "LineOfSightResponse"
    }
}
