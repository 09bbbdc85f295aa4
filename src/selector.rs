//! Picks the newest batch artifact in a directory.
use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Return the file in `dir` matching `pattern` with the greatest modification
/// time. Equal timestamps fall back to the lexicographically greatest path.
/// A missing directory yields `None`.
pub fn latest(dir: &Path, pattern: &str) -> io::Result<Option<PathBuf>> {
    let matcher =
        Pattern::new(pattern).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !matcher.matches(name) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let candidate = (meta.modified()?, entry.path());
        if best.as_ref().map_or(true, |current| candidate > *current) {
            best = Some(candidate);
        }
    }
    Ok(best.map(|(_, path)| path))
}
