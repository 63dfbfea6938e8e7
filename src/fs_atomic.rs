//! Atomic file primitives: retry-on-contention I/O and exclusive-create locks.
//!
//! Everything the frontier and the claim ledger put on disk goes through this
//! module. Transient sharing violations are retried with a short bounded
//! backoff; losing an exclusive-create race is a separate, non-retryable
//! outcome so callers can tell contention from competition.

use std::io;
use std::path::{Path, PathBuf};

use crate::backoff::ExponentialBackoff;
use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("gave up after {attempts} attempts on {path}: {source}")]
    Exhausted {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

impl FsError {
    fn io(path: &Path, source: io::Error) -> Self {
        FsError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// How a failed filesystem operation should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Another process briefly holds the handle; retry.
    Transient,
    /// Another process won an exclusive-create race; not ours, do not retry.
    Competitive,
    /// Anything else; surface to the caller.
    Fatal,
}

/// Classify an I/O error for the retry loops.
pub fn classify(err: &io::Error) -> ErrorClass {
    match err.kind() {
        io::ErrorKind::AlreadyExists => ErrorClass::Competitive,
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => {
            ErrorClass::Transient
        }
        // A writer holding the file open can surface as permission-denied
        // while the handle is live (sharing violation on some platforms).
        io::ErrorKind::PermissionDenied => ErrorClass::Transient,
        _ => match err.raw_os_error() {
            // ERROR_SHARING_VIOLATION / ERROR_LOCK_VIOLATION
            Some(32) | Some(33) => ErrorClass::Transient,
            _ => ErrorClass::Fatal,
        },
    }
}

async fn with_retry<T, F>(path: &Path, mut op: F) -> Result<T, FsError>
where
    F: FnMut() -> io::Result<T>,
{
    let backoff = ExponentialBackoff::new(Config::FS_RETRY_BASE_MS, Config::FS_RETRY_MAX_MS);
    let mut attempt = 0u32;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => match classify(&e) {
                ErrorClass::Transient if attempt + 1 < Config::FS_RETRY_ATTEMPTS => {
                    tokio::time::sleep(backoff.delay(attempt)).await;
                    attempt += 1;
                }
                ErrorClass::Transient => {
                    return Err(FsError::Exhausted {
                        path: path.to_path_buf(),
                        attempts: attempt + 1,
                        source: e,
                    });
                }
                _ => return Err(FsError::io(path, e)),
            },
        }
    }
}

/// Read a file fully, retrying transient contention. Missing file is an error.
pub async fn read_retry(path: &Path) -> Result<Vec<u8>, FsError> {
    with_retry(path, || std::fs::read(path)).await
}

/// Read a file fully, returning empty bytes when the file does not exist yet.
pub async fn read_or_empty(path: &Path) -> Result<Vec<u8>, FsError> {
    match with_retry(path, || std::fs::read(path)).await {
        Ok(v) => Ok(v),
        Err(FsError::Io { ref source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            Ok(Vec::new())
        }
        Err(e) => Err(e),
    }
}

/// Append bytes in one write call, retrying transient contention.
pub async fn append_retry(path: &Path, bytes: &[u8]) -> Result<(), FsError> {
    use std::io::Write;
    with_retry(path, || {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(bytes)
    })
    .await
}

/// Overwrite a file in place, retrying transient contention.
pub async fn write_retry(path: &Path, bytes: &[u8]) -> Result<(), FsError> {
    with_retry(path, || std::fs::write(path, bytes)).await
}

/// Rename, retrying transient contention.
pub async fn rename_retry(from: &Path, to: &Path) -> Result<(), FsError> {
    with_retry(from, || std::fs::rename(from, to)).await
}

/// Crash-safe write: sibling temp path, then rename over the target.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FsError> {
    let tmp = sibling_tmp(path);
    write_retry(&tmp, bytes).await?;
    rename_retry(&tmp, path).await
}

fn sibling_tmp(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Result of an exclusive-create attempt.
pub enum CreateOutcome {
    /// We own the file; handle is open for writing.
    Created(std::fs::File),
    /// Somebody else owns it.
    AlreadyExists,
}

/// Open with create-if-absent-else-fail semantics. One attempt; the caller
/// decides whether a transient error is worth retrying.
pub fn exclusive_create(path: &Path) -> Result<CreateOutcome, io::Error> {
    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => Ok(CreateOutcome::Created(file)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(CreateOutcome::AlreadyExists),
        Err(e) => Err(e),
    }
}
