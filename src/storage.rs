//! JSON document storage.
//!
//! Summary and detail documents are plain pretty-printed JSON files.
//! Reads tolerate a missing file (first run); writes create parent
//! directories and land through a temporary file and rename so a crash
//! mid-write never leaves a truncated document behind.

use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access {0}: {1}")]
    Io(PathBuf, #[source] io::Error),

    #[error("invalid JSON in {0}: {1}")]
    Json(PathBuf, #[source] serde_json::Error),
}

/// Reads a JSON file, returning `default` when the file does not exist.
pub async fn read_json_or_default(path: &Path, default: Value) -> Result<Value, StorageError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            serde_json::from_str(&contents).map_err(|e| StorageError::Json(path.to_owned(), e))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(default),
        Err(err) => Err(StorageError::Io(path.to_owned(), err)),
    }
}

/// Writes `data` as pretty-printed JSON, creating parent directories as
/// needed.
pub async fn write_json_path(path: &Path, data: &Value) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(parent.to_owned(), e))?;
        }
    }

    let contents =
        serde_json::to_string_pretty(data).map_err(|e| StorageError::Json(path.to_owned(), e))?;

    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| StorageError::Io(tmp.clone(), e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StorageError::Io(path.to_owned(), e))
}
