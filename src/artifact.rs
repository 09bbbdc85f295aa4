//! Dated batch artifacts: CSV files written once, read many times.
//!
//! Writes go through a temp file in the target directory and are renamed into
//! place, so a reader never observes a half-written batch. Files carry a UTF-8
//! byte-order marker and are read BOM-tolerant.
use chrono::Local;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

use crate::model::BatchKind;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

impl ArtifactError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        ArtifactError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Records read from an artifact plus the count of rows that failed typed
/// deserialization.
#[derive(Debug, Clone)]
pub struct BatchRead<T> {
    pub records: Vec<T>,
    pub rejected: usize,
}

/// Timestamp embedded in artifact file names.
pub fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M").to_string()
}

/// Write `records` as a new `kind` batch in `dir`, stamped with `stamp`.
/// An existing batch is never replaced: a taken name gets a `_2`, `_3`, ...
/// suffix.
pub fn write_batch<T: Serialize>(
    dir: &Path,
    kind: BatchKind,
    stamp: &str,
    records: &[T],
) -> Result<PathBuf, ArtifactError> {
    fs::create_dir_all(dir).map_err(|e| ArtifactError::io(dir, e))?;
    let mut target = dir.join(kind.file_name(stamp));

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ArtifactError::io(dir, e))?;
    tmp.write_all(UTF8_BOM)
        .map_err(|e| ArtifactError::io(&target, e))?;
    {
        let mut writer = csv::Writer::from_writer(&mut tmp);
        for record in records {
            writer
                .serialize(record)
                .map_err(|e| ArtifactError::csv(&target, e))?;
        }
        writer
            .flush()
            .map_err(|e| ArtifactError::io(&target, e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| ArtifactError::io(&target, e))?;

    let mut attempt = 1;
    loop {
        match tmp.persist_noclobber(&target) {
            Ok(_) => return Ok(target),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                attempt += 1;
                tmp = e.file;
                target = dir.join(kind.file_name(&format!("{stamp}_{attempt}")));
            }
            Err(e) => return Err(ArtifactError::io(&target, e.error)),
        }
    }
}

/// Read every row of a batch artifact. Malformed rows are logged and counted,
/// never returned.
pub fn read_batch<T: DeserializeOwned>(path: &Path) -> Result<BatchRead<T>, ArtifactError> {
    let bytes = fs::read(path).map_err(|e| ArtifactError::io(path, e))?;
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);

    let mut reader = csv::ReaderBuilder::new().from_reader(body);
    let mut records = Vec::new();
    let mut rejected = 0;
    for (row, result) in reader.deserialize::<T>().enumerate() {
        match result {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(path = %path.display(), row, %err, "rejecting malformed row");
                rejected += 1;
            }
        }
    }
    Ok(BatchRead { records, rejected })
}
