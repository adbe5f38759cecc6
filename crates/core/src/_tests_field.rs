#![cfg(test)]

use rand::{SeedableRng, rngs::StdRng};

use super::field::{Field, Space};
use super::grid::Grid2D;

fn line(n: usize) -> Space {
    Space::Position(Grid2D::line(n))
}

#[test]
fn zeros_has_space_length() {
    let field = Field::zeros(line(5));
    assert_eq!(field.len(), 5);
    assert!(field.as_slice().iter().all(|&v| v == 0.0));
}

#[test]
#[should_panic(expected = "data length must match space size")]
fn from_vec_rejects_mismatched_lengths() {
    let _ = Field::from_vec(line(4), vec![0.0; 3]);
}

#[test]
#[should_panic(expected = "field spaces must match")]
fn arithmetic_rejects_different_spaces() {
    let grid = Grid2D::line(4);
    let a = Field::zeros(Space::Position(grid));
    let b = Field::zeros(Space::Harmonic(grid));
    let _ = a.dot(&b);
}

#[test]
fn axpy_and_dot_follow_linear_algebra() {
    let mut y = Field::from_vec(line(3), vec![1.0, 2.0, 3.0]);
    let x = Field::from_vec(line(3), vec![1.0, -1.0, 0.5]);
    y.axpy(2.0, &x);
    assert_eq!(y.as_slice(), &[3.0, 0.0, 4.0]);
    assert_eq!(y.dot(&x), 5.0);
    assert_eq!(y.norm(), 5.0);
    assert_eq!(y.max_abs(), 4.0);
}

#[test]
fn pointwise_helpers() {
    let a = Field::from_vec(line(2), vec![2.0, -3.0]);
    let b = Field::from_vec(line(2), vec![0.5, 2.0]);
    assert_eq!(a.plus(&b).as_slice(), &[2.5, -1.0]);
    assert_eq!(a.minus(&b).as_slice(), &[1.5, -5.0]);
    assert_eq!(a.hadamard(&b).as_slice(), &[1.0, -6.0]);
    assert_eq!(a.scaled(-1.0).as_slice(), &[-2.0, 3.0]);
    assert_eq!(a.mean(), -0.5);
    assert_eq!(a.mse(&b), (1.5f64.powi(2) + 25.0) / 2.0);
}

#[test]
fn relabel_keeps_values() {
    let grid = Grid2D::line(3);
    let field = Field::from_vec(Space::Position(grid), vec![1.0, 2.0, 3.0]);
    let flat = field.clone().relabel(Space::Unstructured(3));
    assert_eq!(flat.space(), Space::Unstructured(3));
    assert_eq!(flat.as_slice(), field.as_slice());
}

#[test]
fn random_normal_is_reproducible_and_standardised() {
    let space = line(20_000);
    let a = Field::random_normal(space, &mut StdRng::seed_from_u64(3));
    let b = Field::random_normal(space, &mut StdRng::seed_from_u64(3));
    assert_eq!(a, b);
    assert!(a.mean().abs() < 0.05);
    let var = a.dot(&a) / a.len() as f64;
    assert!((var - 1.0).abs() < 0.05, "variance {var}");
}

#[test]
fn finiteness_check_spots_nan() {
    let mut field = Field::full(line(3), 1.0);
    assert!(field.is_finite());
    field.as_mut_slice()[1] = f64::NAN;
    assert!(!field.is_finite());
}

#[test]
fn codomain_swaps_position_and_harmonic() {
    let grid = Grid2D::square(2);
    assert_eq!(Space::Position(grid).codomain(), Some(Space::Harmonic(grid)));
    assert_eq!(Space::Harmonic(grid).codomain(), Some(Space::Position(grid)));
    assert_eq!(Space::Unstructured(4).codomain(), None);
}
