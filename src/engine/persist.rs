//! Snapshot persistence — versioned JSON envelopes written atomically.
//!
//! `save` writes to `<path>.tmp` and renames over the target, so a reader
//! never observes a half-written file. `load` distinguishes "no snapshot"
//! (`Ok(None)`) from "snapshot exists but is unreadable"
//! ([`AppError::CorruptState`]), which callers must not apply partially.

use std::fs;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::AppError;

/// Bumped when the snapshot layout changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, serde::Deserialize)]
struct Envelope<T> {
    version: u32,
    saved_at: String,
    data: T,
}

/// Serialize `data` into a versioned envelope at `path`, atomically.
pub fn save<T: Serialize>(path: &Path, data: &T) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let envelope = Envelope {
        version: SNAPSHOT_VERSION,
        saved_at: chrono::Utc::now().to_rfc3339(),
        data,
    };
    let json = serde_json::to_string(&envelope)
        .map_err(|e| AppError::CorruptState(format!("snapshot serialization failed: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "snapshot written");
    Ok(())
}

/// Load a snapshot. `Ok(None)` when the file does not exist.
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, AppError> {
    if !path.exists() {
        debug!(path = %path.display(), "no snapshot on disk");
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    let envelope: Envelope<T> = serde_json::from_str(&raw).map_err(|e| {
        warn!(path = %path.display(), error = %e, "snapshot is malformed");
        AppError::CorruptState(format!("malformed snapshot {}: {e}", path.display()))
    })?;
    if envelope.version != SNAPSHOT_VERSION {
        return Err(AppError::CorruptState(format!(
            "snapshot {} has version {}, expected {SNAPSHOT_VERSION}",
            path.display(),
            envelope.version
        )));
    }
    Ok(Some(envelope.data))
}

/// Delete a snapshot file if present. Missing file is not an error.
pub fn remove(path: &Path) -> Result<(), AppError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::Io(e)),
    }
}
