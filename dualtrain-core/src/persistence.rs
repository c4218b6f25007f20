//! Run-state persistence: atomic JSON writes and loads.

use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// File holding the state of `run_id` under `dir`.
pub fn run_state_path(dir: &Path, run_id: Uuid) -> PathBuf {
    dir.join(format!("{}.json", run_id))
}

/// Serialize `data` as pretty JSON and move it into place atomically.
///
/// Parent directories are created as needed.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let staged = path.with_extension("json.tmp");
    std::fs::write(&staged, json.as_bytes())?;
    std::fs::rename(&staged, path)
}

/// Load JSON from `path`, returning `Ok(None)` when the file is absent.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
