#![cfg(test)]

use super::grid::Grid2D;

#[test]
fn line_grid_is_one_dimensional() {
    let grid = Grid2D::line(16);
    assert!(grid.is_one_dimensional());
    assert_eq!(grid.len(), 16);
    assert_eq!(grid.pixel_size(), [1.0 / 16.0, 1.0]);
}

#[test]
fn idx_is_row_major() {
    let grid = Grid2D::new(4, 3, 1.0, 1.0);
    assert_eq!(grid.idx(0, 0), 0);
    assert_eq!(grid.idx(3, 0), 3);
    assert_eq!(grid.idx(0, 1), 4);
    assert_eq!(grid.idx(3, 2), 11);
}

#[test]
fn k_lengths_on_unit_interval_are_centered_integers() {
    let grid = Grid2D::line(8);
    assert_eq!(
        grid.k_lengths(),
        vec![0.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0, 1.0]
    );
    assert_eq!(grid.k_max(), 4.0);
}

#[test]
fn k_lengths_scale_inversely_with_extent() {
    let grid = Grid2D::new(4, 4, 2.0, 0.5);
    let k = grid.k_lengths();
    assert!((k[grid.idx(1, 0)] - 0.5).abs() < 1e-15);
    assert!((k[grid.idx(0, 1)] - 2.0).abs() < 1e-15);
    let diagonal = (0.25f64 + 4.0).sqrt();
    assert!((k[grid.idx(1, 1)] - diagonal).abs() < 1e-15);
}

#[test]
fn deserializes_with_defaults() {
    let grid: Grid2D = toml::from_str("nx = 32").expect("valid grid");
    assert_eq!(grid, Grid2D::line(32));
    let grid: Grid2D = toml::from_str("nx = 8\nny = 8\nlx = 2.0").expect("valid grid");
    assert_eq!(grid, Grid2D::new(8, 8, 2.0, 1.0));
}

#[test]
fn display_distinguishes_dimensionality() {
    assert_eq!(Grid2D::line(4).to_string(), "4 (L=1)");
    assert_eq!(Grid2D::square(4).to_string(), "4x4 (L=1x1)");
}
