#![cfg(test)]

use std::{fs, path::PathBuf};

use super::field::{Field, Space};
use super::grid::Grid2D;
use super::storage::{StorageError, load_array, load_field, save_array, save_field};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sigrec-storage-{}-{name}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

#[test]
fn field_round_trips_through_disk() {
    let dir = scratch_dir("round-trip");
    let path = dir.join("nested").join("mean.bin");
    let space = Space::Position(Grid2D::new(3, 2, 1.0, 1.0));
    let field = Field::from_vec(space, vec![0.5, -1.25, 3.0, f64::MIN_POSITIVE, 1e300, -0.0]);
    save_field(&path, &field).unwrap();
    assert_eq!(fs::metadata(&path).unwrap().len(), 48);
    let loaded = load_field(&path, space).unwrap();
    assert_eq!(loaded, field);
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn values_are_little_endian() {
    let dir = scratch_dir("endian");
    let path = dir.join("one.bin");
    save_array(&path, &[1.0]).unwrap();
    assert_eq!(fs::read(&path).unwrap(), 1.0f64.to_le_bytes());
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn length_mismatch_is_reported() {
    let dir = scratch_dir("mismatch");
    let path = dir.join("data.bin");
    save_array(&path, &[1.0, 2.0, 3.0]).unwrap();
    match load_field(&path, Space::Unstructured(4)) {
        Err(StorageError::LengthMismatch {
            expected, found, ..
        }) => {
            assert_eq!(expected, 4);
            assert_eq!(found, 3);
        }
        other => panic!("expected LengthMismatch, got {other:?}"),
    }
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn truncated_file_is_rejected() {
    let dir = scratch_dir("truncated");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("short.bin");
    fs::write(&path, [0u8; 12]).unwrap();
    let err = load_array(&path).unwrap_err();
    assert!(matches!(err, StorageError::Truncated { bytes: 12, .. }));
    assert!(err.to_string().contains("short.bin"));
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn missing_file_names_the_path() {
    let path = scratch_dir("missing").join("absent.bin");
    let err = load_array(&path).unwrap_err();
    assert!(matches!(err, StorageError::Io { .. }));
    assert!(err.to_string().contains("absent.bin"));
}
