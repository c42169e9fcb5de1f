//! JSON bucket store with backup-on-write
//!
//! Each bucket is one pretty-printed JSON file under the store root. Before a
//! bucket is overwritten, the current file is renamed to `<file>.backup`, so a
//! crash in the middle of a write always leaves one readable copy behind.

use crate::storage::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const BACKUP_SUFFIX: &str = ".backup";

/// Durable mapping from bucket names to JSON values
#[derive(Debug, Clone)]
pub struct ProgressStore {
    root: PathBuf,
}

/// Outcome of reading one file
enum ReadOutcome<T> {
    Found(T),
    Missing,
    Unreadable(String),
}

impl ProgressStore {
    /// Opens a store rooted at `root`, creating the directory if needed
    pub fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a bucket's primary file
    ///
    /// Bucket names are `/`-separated segments of ASCII alphanumerics, `_`
    /// and `-`; `report/error_log` maps to `<root>/report/error_log.json`.
    pub fn bucket_path(&self, name: &str) -> StorageResult<PathBuf> {
        let segments: Vec<&str> = name.split('/').collect();
        let valid = segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });
        if !valid {
            return Err(StorageError::InvalidBucket(name.to_string()));
        }

        let mut path = self.root.clone();
        for segment in &segments[..segments.len() - 1] {
            path.push(segment);
        }
        path.push(format!("{}.json", segments[segments.len() - 1]));
        Ok(path)
    }

    /// Reads a bucket, falling back to its backup and then to `default`
    ///
    /// Never fails: unreadable files are logged and skipped.
    pub fn load<T: DeserializeOwned>(&self, name: &str, default: T) -> T {
        let primary = match self.bucket_path(name) {
            Ok(path) => path,
            Err(e) => {
                tracing::error!("Cannot load bucket: {}", e);
                return default;
            }
        };

        match read_json(&primary) {
            ReadOutcome::Found(value) => return value,
            ReadOutcome::Missing => {}
            ReadOutcome::Unreadable(reason) => {
                tracing::error!(
                    "Failed to read {}: {}; trying backup",
                    primary.display(),
                    reason
                );
            }
        }

        let backup = backup_path(&primary);
        match read_json(&backup) {
            ReadOutcome::Found(value) => {
                tracing::warn!("Recovered bucket '{}' from {}", name, backup.display());
                value
            }
            ReadOutcome::Missing => default,
            ReadOutcome::Unreadable(reason) => {
                tracing::error!(
                    "Backup {} is unreadable too: {}; using defaults",
                    backup.display(),
                    reason
                );
                default
            }
        }
    }

    /// Writes a bucket, rotating the previous file into the backup slot
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> StorageResult<()> {
        let primary = self.bucket_path(name)?;

        // serialize before touching the disk so a failure rotates nothing
        let bytes =
            serde_json::to_vec_pretty(value).map_err(|source| StorageError::Serialization {
                bucket: name.to_string(),
                source,
            })?;

        if let Some(parent) = primary.parent() {
            fs::create_dir_all(parent)?;
        }

        match fs::rename(&primary, backup_path(&primary)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut file = File::create(&primary)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        tracing::trace!("Saved bucket '{}' ({} bytes)", name, bytes.len());
        Ok(())
    }
}

fn backup_path(primary: &Path) -> PathBuf {
    let mut name = primary.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> ReadOutcome<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return ReadOutcome::Missing,
        Err(e) => return ReadOutcome::Unreadable(e.to_string()),
    };

    match serde_json::from_slice(&bytes) {
        Ok(value) => ReadOutcome::Found(value),
        Err(e) => ReadOutcome::Unreadable(e.to_string()),
    }
}
