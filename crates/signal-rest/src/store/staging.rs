//! Staging areas for uploads that accompany a single operation.
//!
//! A [`StagedFile`] owns its file on disk. Releasing it explicitly reports
//! I/O failures; dropping it without a release still deletes the file, so a
//! staged upload cannot outlive the scope that holds it, whichever way that
//! scope exits.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::error::{StorageError, StorageResult};

/// A directory that receives staged uploads.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `bytes` to a freshly named file.
    ///
    /// The name is a ULID, followed by the sanitized `suggested_name` when
    /// one is given, so concurrent stages never collide.
    pub async fn stage(&self, bytes: &[u8], suggested_name: Option<&str>) -> StorageResult<StagedFile> {
        let id = ulid::Ulid::new().to_string();
        let file_name = match suggested_name.and_then(sanitize_file_name) {
            Some(name) => format!("{id}-{name}"),
            None => id.clone(),
        };
        let path = self.dir.join(file_name);

        if let Err(e) = write_new_file(&path, bytes).await {
            let _ = fs::remove_file(&path).await;
            return Err(StorageError::file_io(&path, e));
        }

        debug!(path = %path.display(), size = bytes.len(), "Staged upload");
        Ok(StagedFile {
            id,
            path,
            released: false,
        })
    }
}

async fn write_new_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    Ok(())
}

/// Keep only characters that are safe in a single path component.
fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// A staged upload. Deleted on [`release`](StagedFile::release) or drop.
#[derive(Debug)]
pub struct StagedFile {
    id: String,
    path: PathBuf,
    released: bool,
}

impl StagedFile {
    /// Opaque identifier of this resource.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path to hand to the backend.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the staged file. A file that is already gone is not an error.
    pub async fn release(mut self) -> StorageResult<()> {
        self.released = true;
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "Released staged upload");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::file_io(&self.path, e)),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Released staged upload on drop"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to release staged upload"
            ),
        }
    }
}

/// Release every file, logging failures instead of returning them.
///
/// Cleanup must never turn a finished operation into a failed one.
pub async fn release_all(files: Vec<StagedFile>) {
    for file in files {
        let path = file.path().to_path_buf();
        if let Err(e) = file.release().await {
            warn!(path = %path.display(), error = %e, "Failed to release staged upload");
        }
    }
}
