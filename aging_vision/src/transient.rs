//! Ownership of short-lived files: uploaded images and resized copies.
//!
//! A `TransientFile` removes its file when dropped, so every exit path of a
//! request (success, error, panic unwinding, a dropped future) releases the
//! artifact. Names carry a random prefix so concurrent requests sharing one
//! directory never collide.

use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

const FALLBACK_NAME: &str = "upload";

#[derive(Debug)]
pub struct TransientFile {
    path: PathBuf,
}

impl TransientFile {
    /// Takes ownership of a file that already exists.
    pub fn adopt(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Stores `bytes` under a fresh unique name inside `dir`.
    pub async fn persist(dir: &Path, original_name: &str, bytes: &[u8]) -> io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(unique_name(&sanitize_file_name(original_name)));
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        // From here on the file is ours; the guard cleans up a partial write.
        let guard = Self { path };
        file.write_all(bytes).await?;
        file.flush().await?;
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed transient artifact"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove transient artifact"),
        }
    }
}

/// `<uuid>_<name>`
pub fn unique_name(name: &str) -> String {
    format!("{}_{}", Uuid::new_v4().simple(), name)
}

/// Keeps only the final path component of a client-supplied file name.
pub fn sanitize_file_name(raw: &str) -> String {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_NAME.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Removes every regular file directly inside `dir`. Returns how many were removed.
pub fn purge_dir(dir: &Path) -> io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to purge temporary file"),
        }
    }
    Ok(removed)
}
