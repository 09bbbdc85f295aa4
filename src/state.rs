//! Durable publish checkpoint.
//!
//! The state file is the only mutable cross-run record. A single publisher is
//! assumed; there is no locking and the last writer wins.
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Highest confirmed-published index within the batch being consumed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishState {
    #[serde(default = "fresh_index")]
    pub last_index: i64,
    /// File name of the batch `last_index` refers to. Absent in legacy files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<String>,
}

fn fresh_index() -> i64 {
    -1
}

impl Default for PublishState {
    fn default() -> Self {
        Self {
            last_index: fresh_index(),
            batch: None,
        }
    }
}

impl PublishState {
    /// Index of the next post to send. A checkpoint too large to advance
    /// points past any batch.
    pub fn next_index(&self) -> usize {
        match self.last_index.checked_add(1) {
            Some(next) if next < 0 => 0,
            Some(next) => usize::try_from(next).unwrap_or(usize::MAX),
            None => usize::MAX,
        }
    }
}

fn read_state(path: &Path) -> Result<Option<PublishState>, StateError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let state = serde_json::from_str(&raw).map_err(|source| StateError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(state))
}

/// Load the checkpoint. A missing or unreadable file is a fresh start.
pub fn load(path: &Path) -> PublishState {
    match read_state(path) {
        Ok(Some(state)) => state,
        Ok(None) => {
            debug!(path = %path.display(), "no state file; starting fresh");
            PublishState::default()
        }
        Err(err) => {
            warn!(%err, "treating unreadable state as fresh");
            PublishState::default()
        }
    }
}

/// Persist the checkpoint via temp file + rename so a crash mid-write keeps
/// the previous file intact.
pub fn save(path: &Path, state: &PublishState) -> Result<(), StateError> {
    let io_err = |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_err)?;

    let body = serde_json::to_string_pretty(state).map_err(|source| StateError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(body.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}
