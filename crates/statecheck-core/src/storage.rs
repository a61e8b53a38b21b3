//! Snapshot files in secondary storage.
//!
//! Each offloaded snapshot gets its own file under the store directory,
//! named by a process-local counter.  A file holds one JSON array:
//! `[last_transition, path]`, either of which may be `null`.
//!
//! Files are created exclusively and are deleted by the first successful
//! [`SnapshotStore::load_once`].  Files left behind by an aborted search can
//! be removed with [`SnapshotStore::sweep`].

use crate::config::CoreConfig;
use crate::path::PathStorage;
use crate::transition::TransitionStorage;
use log::{debug, info};
use snafu::{ResultExt, Snafu};
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Errors from snapshot file operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("I/O error on {}", path.display()))]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("JSON error"), context(false))]
    Json { source: serde_json::Error },

    #[snafu(display("snapshot file {} does not exist", path.display()))]
    MissingSnapshot { path: PathBuf },
}

/// Contents of one snapshot file.
pub type SnapshotData = (Option<TransitionStorage>, Option<PathStorage>);

/// Directory of offloaded snapshots.
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    counter: AtomicU64,
}

impl SnapshotStore {
    /// Open (creating if needed) the store at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).context(IoSnafu { path: &dir })?;
        debug!("snapshot store at {}", dir.display());
        Ok(Self {
            dir,
            counter: AtomicU64::new(0),
        })
    }

    /// Open the store at the configured directory.
    pub fn from_config(config: &CoreConfig) -> Result<Self, StorageError> {
        Self::new(config.storage_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a new snapshot file and return its path.
    ///
    /// Names already taken (e.g. by another process sharing the directory)
    /// are skipped.  The file is closed before returning.
    pub fn write(
        &self,
        last: Option<&TransitionStorage>,
        path: Option<&PathStorage>,
    ) -> Result<PathBuf, StorageError> {
        loop {
            let n = self.counter.fetch_add(1, Ordering::Relaxed);
            let file = self.dir.join(n.to_string());
            let handle = match OpenOptions::new().write(true).create_new(true).open(&file) {
                Ok(handle) => handle,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e).context(IoSnafu { path: &file }),
            };

            let mut writer = BufWriter::new(handle);
            let written = serde_json::to_writer(&mut writer, &(last, path))
                .map_err(StorageError::from)
                .and_then(|_| writer.flush().context(IoSnafu { path: &file }));
            if let Err(e) = written {
                drop(writer);
                let _ = fs::remove_file(&file);
                return Err(e);
            }

            debug!("offloaded snapshot to {}", file.display());
            return Ok(file);
        }
    }

    /// Read a snapshot file and delete it.
    ///
    /// On failure the file is left in place.
    pub fn load_once(file: &Path) -> Result<SnapshotData, StorageError> {
        let bytes = match fs::read(file) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return MissingSnapshotSnafu { path: file }.fail()
            }
            Err(e) => return Err(e).context(IoSnafu { path: file }),
        };
        let data: SnapshotData = serde_json::from_slice(&bytes)?;
        fs::remove_file(file).context(IoSnafu { path: file })?;
        debug!("rehydrated snapshot from {}", file.display());
        Ok(data)
    }

    /// Snapshot files currently in the store.
    pub fn snapshot_files(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir).context(IoSnafu { path: &self.dir })? {
            let entry = entry.context(IoSnafu { path: &self.dir })?;
            let is_snapshot = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.parse::<u64>().is_ok());
            if is_snapshot && entry.path().is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Remove orphaned snapshot files. Returns how many were removed.
    pub fn sweep(&self) -> Result<usize, StorageError> {
        let files = self.snapshot_files()?;
        for file in &files {
            fs::remove_file(file).context(IoSnafu { path: file })?;
        }
        if !files.is_empty() {
            info!(
                "swept {} orphaned snapshot file(s) from {}",
                files.len(),
                self.dir.display()
            );
        }
        Ok(files.len())
    }
}
