//! Flat binary array files.
//!
//! A file holds one field as consecutive little-endian `f64` values in
//! row-major order, with no header. Readers must know the expected space.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::field::{Field, Space};

const VALUE_BYTES: usize = std::mem::size_of::<f64>();

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{}: size {bytes} bytes is not a multiple of 8", .path.display())]
    Truncated { path: PathBuf, bytes: usize },
    #[error("{}: expected {expected} values, found {found}", .path.display())]
    LengthMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn save_array(path: &Path, values: &[f64]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_error(path))?;
        }
    }
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);
    for value in values {
        writer.write_all(&value.to_le_bytes()).map_err(io_error(path))?;
    }
    writer.flush().map_err(io_error(path))
}

pub fn load_array(path: &Path) -> Result<Vec<f64>, StorageError> {
    let file = File::open(path).map_err(io_error(path))?;
    let mut bytes = Vec::new();
    BufReader::new(file)
        .read_to_end(&mut bytes)
        .map_err(io_error(path))?;
    if bytes.len() % VALUE_BYTES != 0 {
        return Err(StorageError::Truncated {
            path: path.to_path_buf(),
            bytes: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(VALUE_BYTES)
        .map(|chunk| {
            let mut raw = [0u8; VALUE_BYTES];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect())
}

pub fn save_field(path: &Path, field: &Field) -> Result<(), StorageError> {
    save_array(path, field.as_slice())
}

/// Load a field, checking the value count against `space`.
pub fn load_field(path: &Path, space: Space) -> Result<Field, StorageError> {
    let values = load_array(path)?;
    if values.len() != space.len() {
        return Err(StorageError::LengthMismatch {
            path: path.to_path_buf(),
            expected: space.len(),
            found: values.len(),
        });
    }
    Ok(Field::from_vec(space, values))
}
