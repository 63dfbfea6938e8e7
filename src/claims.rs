//! Per-URL exclusive claim ledger backed by the filesystem.
//!
//! A URL is *free* (no file), *claimed* (`{digest}.lock`, created with
//! exclusive-create), or *completed* (`{digest}.done`). Exclusive-create is
//! the mutex: once a `.lock` exists no second creator succeeds. Completion is
//! terminal for the run; release returns the URL to free.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

use crate::config::Tuning;
use crate::fs_atomic::{self, CreateOutcome, ErrorClass, FsError};

/// Stable hex key for a URL's ledger entries.
pub fn claim_digest(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Outcome of a claim attempt.
pub enum ClaimOutcome {
    /// We own the URL until `complete` or `release`.
    Claimed(ClaimTicket),
    /// A completion marker exists; never reprocess in this run.
    AlreadyDone,
    /// Another worker holds the lock, or transient contention outlasted the
    /// retry budget. Either way: not ours, move on.
    Contended,
}

pub struct ClaimLedger {
    dir: PathBuf,
    lock_tries: u32,
    lock_sleep: std::time::Duration,
    max_done: usize,
}

impl ClaimLedger {
    pub fn open(dir: &Path, tuning: &Tuning) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            lock_tries: tuning.lock_tries.max(1),
            lock_sleep: tuning.lock_sleep,
            max_done: tuning.max_done,
        })
    }

    fn lock_path(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", digest))
    }

    fn done_path(&self, digest: &str) -> PathBuf {
        self.dir.join(format!("{}.done", digest))
    }

    /// Whether a completion marker exists for the URL.
    pub fn is_done(&self, url: &str) -> bool {
        self.done_path(&claim_digest(url)).exists()
    }

    /// Attempt an exclusive claim. "Already exists" is competition and is
    /// never retried; transient errors are retried on a bounded budget.
    pub async fn try_claim(&self, url: &str) -> Result<ClaimOutcome, FsError> {
        let digest = claim_digest(url);
        let done = self.done_path(&digest);
        if done.exists() {
            return Ok(ClaimOutcome::AlreadyDone);
        }

        let lock = self.lock_path(&digest);
        for attempt in 0..self.lock_tries {
            match fs_atomic::exclusive_create(&lock) {
                Ok(CreateOutcome::Created(mut file)) => {
                    let stamp = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs();
                    let body = format!("{} {} {}\n", std::process::id(), stamp, url);
                    if let Err(e) = file.write_all(body.as_bytes()) {
                        tracing::debug!(url, error = %e, "claim owner stamp failed");
                    }
                    return Ok(ClaimOutcome::Claimed(ClaimTicket {
                        lock_path: lock,
                        done_path: done,
                        terminal: false,
                    }));
                }
                Ok(CreateOutcome::AlreadyExists) => return Ok(ClaimOutcome::Contended),
                Err(e) => match fs_atomic::classify(&e) {
                    ErrorClass::Transient if attempt + 1 < self.lock_tries => {
                        tokio::time::sleep(self.lock_sleep).await;
                    }
                    ErrorClass::Transient => {
                        tracing::debug!(url, "claim retry budget exhausted");
                        return Ok(ClaimOutcome::Contended);
                    }
                    _ => {
                        return Err(FsError::Io {
                            path: lock,
                            source: e,
                        })
                    }
                },
            }
        }
        Ok(ClaimOutcome::Contended)
    }

    /// Number of outstanding `.lock` files.
    pub fn lock_count(&self) -> usize {
        self.count_ext("lock")
    }

    /// Number of `.done` markers.
    pub fn done_count(&self) -> usize {
        self.count_ext("done")
    }

    fn count_ext(&self, ext: &str) -> usize {
        match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().map(|x| x == ext).unwrap_or(false))
                .count(),
            Err(_) => 0,
        }
    }

    /// Prune the oldest `.done` markers once the count exceeds the cap.
    /// Only `.done` files are ever deleted here; locks are untouchable.
    pub fn trim_done(&self) {
        let mut done: Vec<(SystemTime, PathBuf)> = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().map(|x| x == "done").unwrap_or(false))
                .filter_map(|e| {
                    let mtime = e.metadata().ok()?.modified().ok()?;
                    Some((mtime, e.path()))
                })
                .collect(),
            Err(_) => return,
        };
        if done.len() <= self.max_done {
            return;
        }
        done.sort_by_key(|(mtime, _)| *mtime);
        let excess = done.len() - self.max_done;
        for (_, path) in done.into_iter().take(excess) {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Exclusive right to process one URL. Exactly one of `complete` and
/// `release` should be called; dropping an unresolved ticket releases it.
pub struct ClaimTicket {
    lock_path: PathBuf,
    done_path: PathBuf,
    terminal: bool,
}

impl ClaimTicket {
    /// Promote the lock to a completion marker. Final.
    pub async fn complete(mut self) -> Result<(), FsError> {
        self.terminal = true;
        fs_atomic::rename_retry(&self.lock_path, &self.done_path).await
    }

    /// Give the URL back to the free state.
    pub async fn release(mut self) {
        self.terminal = true;
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

impl Drop for ClaimTicket {
    fn drop(&mut self) {
        if !self.terminal {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}
