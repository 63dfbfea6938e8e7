//! Filesystem-only work queue partitioned into hash-keyed buckets.
//!
//! Each bucket is an append-only NDJSON file of URLs plus a persisted byte
//! cursor marking the consumed region. N workers discover and consume
//! concurrently without a broker: appends are single atomic write calls,
//! scans are serialized per bucket by an owner lease, and the claim ledger
//! provides at-most-once semantics at claim time. Duplicate lines across
//! discovery rounds are expected and harmless.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::claims::{ClaimLedger, ClaimOutcome, ClaimTicket};
use crate::config::Tuning;
use crate::fs_atomic::{self, CreateOutcome, FsError};

/// Liveness fingerprint used by the quiescence detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrontierSnapshot {
    pub pending_bytes: u64,
    pub newest_mtime_ms: u64,
    pub claim_lock_count: usize,
}

/// Exclusive right to scan one bucket; held for a scanning pass.
pub struct BucketLease {
    path: PathBuf,
}

impl Drop for BucketLease {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

pub struct Frontier {
    dir: PathBuf,
    assign_dir: PathBuf,
    buckets: usize,
    max_bytes: u64,
}

impl Frontier {
    pub fn open(frontier_dir: &Path, buckets: usize, tuning: &Tuning) -> std::io::Result<Self> {
        let assign_dir = frontier_dir.join("assign");
        std::fs::create_dir_all(&assign_dir)?;
        Ok(Self {
            dir: frontier_dir.to_path_buf(),
            assign_dir,
            buckets: buckets.max(1),
            max_bytes: tuning.bucket_max_bytes,
        })
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets
    }

    /// Stable partition: the same URL lands in the same bucket in every
    /// process.
    pub fn bucket_of(&self, url: &str) -> usize {
        (crc32fast::hash(url.as_bytes()) as usize) % self.buckets
    }

    fn bucket_path(&self, r: usize) -> PathBuf {
        self.dir.join(format!("bucket.{}.ndjson", r))
    }

    fn offset_path(&self, r: usize) -> PathBuf {
        self.dir.join(format!("bucket.{}.offset", r))
    }

    fn owner_path(&self, r: usize) -> PathBuf {
        self.assign_dir.join(format!("bucket.{}.owner", r))
    }

    /// Create all bucket files (empty if absent) and append the seed batch.
    pub async fn seed(&self, urls: &[String]) -> Result<usize, FsError> {
        for r in 0..self.buckets {
            let path = self.bucket_path(r);
            if !path.exists() {
                fs_atomic::write_retry(&path, b"").await?;
            }
            let offset = self.offset_path(r);
            if !offset.exists() {
                fs_atomic::write_atomic(&offset, b"0").await?;
            }
        }
        self.append(urls).await
    }

    /// Partition a batch by hash and append each per-bucket sub-batch with a
    /// single write call. Oversized buckets rotate to a timestamped sibling.
    pub async fn append(&self, urls: &[String]) -> Result<usize, FsError> {
        let mut per_bucket: Vec<Vec<&str>> = vec![Vec::new(); self.buckets];
        for url in urls {
            let url = url.trim();
            if url.is_empty() {
                continue;
            }
            per_bucket[self.bucket_of(url)].push(url);
        }

        let mut appended = 0usize;
        for (r, batch) in per_bucket.iter().enumerate() {
            if batch.is_empty() {
                continue;
            }
            let path = self.bucket_path(r);
            let mut body = String::with_capacity(batch.iter().map(|u| u.len() + 1).sum());
            for url in batch {
                body.push_str(url);
                body.push('\n');
            }

            let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            if size > 0 && size + body.len() as u64 > self.max_bytes {
                self.rotate(r, &path).await?;
            }

            fs_atomic::append_retry(&path, body.as_bytes()).await?;
            appended += batch.len();
        }
        Ok(appended)
    }

    async fn rotate(&self, r: usize, path: &Path) -> Result<(), FsError> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let rotated = self.dir.join(format!("bucket.{}.{}.ndjson", r, stamp));
        fs_atomic::rename_retry(path, &rotated).await?;
        fs_atomic::write_atomic(&self.offset_path(r), b"0").await?;
        tracing::debug!(bucket = r, rotated = %rotated.display(), "bucket rotated");
        Ok(())
    }

    /// Bytes in the pending (unconsumed) region of bucket `r`.
    pub fn pending_bytes(&self, r: usize) -> u64 {
        let size = std::fs::metadata(self.bucket_path(r))
            .map(|m| m.len())
            .unwrap_or(0);
        let offset = self.read_offset_sync(r).min(size);
        size - offset
    }

    fn read_offset_sync(&self, r: usize) -> u64 {
        std::fs::read_to_string(self.offset_path(r))
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0)
    }

    /// Acquire the owner lease for bucket `r`, or `None` when another worker
    /// is scanning it.
    pub fn try_lease(&self, r: usize) -> Option<BucketLease> {
        let path = self.owner_path(r);
        match fs_atomic::exclusive_create(&path) {
            Ok(CreateOutcome::Created(mut file)) => {
                use std::io::Write;
                let _ = write!(file, "{}", std::process::id());
                Some(BucketLease { path })
            }
            Ok(CreateOutcome::AlreadyExists) => None,
            Err(e) => {
                tracing::debug!(bucket = r, error = %e, "lease attempt failed");
                None
            }
        }
    }

    /// Scan bucket `r` from its cursor and return the first line that passes
    /// `accept` *and* wins a ledger claim. Scanned lines are consumed: the
    /// cursor is persisted after each claim attempt and at pass end, so a
    /// crash re-scans at worst, never silently skips.
    pub async fn claim_next<F>(
        &self,
        r: usize,
        ledger: &ClaimLedger,
        accept: &F,
    ) -> Result<Option<(String, ClaimTicket)>, FsError>
    where
        F: Fn(&str) -> bool,
    {
        let _lease = match self.try_lease(r) {
            Some(lease) => lease,
            None => return Ok(None),
        };

        let path = self.bucket_path(r);
        let data = fs_atomic::read_or_empty(&path).await?;
        // Clamp on truncation (rotation resets the file under us).
        let start = self.read_offset_sync(r).min(data.len() as u64) as usize;

        let mut advanced = 0usize;
        let mut cursor = start;
        while cursor + advanced < data.len() {
            let region = &data[cursor + advanced..];
            let line_len = match region.iter().position(|&b| b == b'\n') {
                Some(i) => i + 1,
                None => region.len(),
            };
            let line_bytes = &region[..line_len];
            advanced += line_len;

            let url = std::str::from_utf8(line_bytes)
                .unwrap_or("")
                .trim_start_matches('\u{feff}')
                .trim();
            if url.is_empty() || !accept(url) {
                continue;
            }

            let outcome = ledger.try_claim(url).await?;
            // Persist past everything scanned so far, win or lose.
            cursor += advanced;
            advanced = 0;
            self.write_offset(r, cursor as u64).await?;

            match outcome {
                ClaimOutcome::Claimed(ticket) => return Ok(Some((url.to_string(), ticket))),
                ClaimOutcome::AlreadyDone | ClaimOutcome::Contended => continue,
            }
        }

        if advanced > 0 {
            cursor += advanced;
            self.write_offset(r, cursor as u64).await?;
        }
        Ok(None)
    }

    /// Work-stealing claim: home bucket first, then every other bucket in
    /// descending pending-bytes order.
    pub async fn claim_next_any<F>(
        &self,
        home: usize,
        ledger: &ClaimLedger,
        accept: &F,
    ) -> Result<Option<(String, ClaimTicket)>, FsError>
    where
        F: Fn(&str) -> bool,
    {
        if let Some(found) = self.claim_next(home % self.buckets, ledger, accept).await? {
            return Ok(Some(found));
        }

        let mut others: Vec<(usize, u64)> = (0..self.buckets)
            .filter(|&r| r != home % self.buckets)
            .map(|r| (r, self.pending_bytes(r)))
            .filter(|&(_, pending)| pending > 0)
            .collect();
        others.sort_by(|a, b| b.1.cmp(&a.1));

        for (r, _) in others {
            if let Some(found) = self.claim_next(r, ledger, accept).await? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    async fn write_offset(&self, r: usize, offset: u64) -> Result<(), FsError> {
        fs_atomic::write_atomic(&self.offset_path(r), offset.to_string().as_bytes()).await
    }

    /// Liveness fingerprint: total pending bytes, newest bucket mtime, and
    /// outstanding claim count.
    pub fn snapshot(&self, ledger: &ClaimLedger) -> FrontierSnapshot {
        let mut pending = 0u64;
        let mut newest = 0u64;
        for r in 0..self.buckets {
            pending += self.pending_bytes(r);
            for path in [self.bucket_path(r), self.offset_path(r)] {
                if let Ok(meta) = std::fs::metadata(&path) {
                    if let Ok(mtime) = meta.modified() {
                        let ms = mtime
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_millis() as u64;
                        newest = newest.max(ms);
                    }
                }
            }
        }
        FrontierSnapshot {
            pending_bytes: pending,
            newest_mtime_ms: newest,
            claim_lock_count: ledger.lock_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn accept_all(_: &str) -> bool {
        true
    }

    fn setup(dir: &TempDir, buckets: usize) -> (Frontier, ClaimLedger) {
        let tuning = Tuning::default();
        let frontier = Frontier::open(&dir.path().join("frontier"), buckets, &tuning).unwrap();
        let ledger = ClaimLedger::open(&dir.path().join("disco-locks"), &tuning).unwrap();
        (frontier, ledger)
    }

    #[test]
    fn test_partition_is_stable() {
        let dir = TempDir::new().unwrap();
        let (frontier, _) = setup(&dir, 8);
        let a = frontier.bucket_of("https://example.com/a");
        assert_eq!(a, frontier.bucket_of("https://example.com/a"));
        assert!(a < 8);
    }

    #[tokio::test]
    async fn test_seed_and_drain_completes_every_url() {
        let dir = TempDir::new().unwrap();
        let (frontier, ledger) = setup(&dir, 4);

        let urls: Vec<String> = (0..20)
            .map(|i| format!("https://example.com/page/{}", i))
            .collect();
        assert_eq!(frontier.seed(&urls).await.unwrap(), 20);

        let mut drained = 0;
        while let Some((_, ticket)) = frontier.claim_next_any(0, &ledger, &accept_all).await.unwrap()
        {
            ticket.complete().await.unwrap();
            drained += 1;
        }
        assert_eq!(drained, 20);
        assert_eq!(ledger.done_count(), 20);

        let snap = frontier.snapshot(&ledger);
        assert_eq!(snap.pending_bytes, 0);
        assert_eq!(snap.claim_lock_count, 0);
    }

    #[tokio::test]
    async fn test_rescan_after_done_claims_nothing() {
        let dir = TempDir::new().unwrap();
        let (frontier, ledger) = setup(&dir, 2);
        let urls = vec!["https://example.com/once".to_string()];
        frontier.seed(&urls).await.unwrap();

        let (_, ticket) = frontier
            .claim_next_any(0, &ledger, &accept_all)
            .await
            .unwrap()
            .unwrap();
        ticket.complete().await.unwrap();

        // Same URL rediscovered in a later round: appended again, but the
        // completion marker blocks a second claim.
        frontier.append(&urls).await.unwrap();
        let again = frontier.claim_next_any(0, &ledger, &accept_all).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_cursor_is_monotone_and_bounded() {
        let dir = TempDir::new().unwrap();
        let (frontier, ledger) = setup(&dir, 1);
        let urls: Vec<String> = (0..5)
            .map(|i| format!("https://example.com/{}", i))
            .collect();
        frontier.seed(&urls).await.unwrap();

        let size = std::fs::metadata(frontier.bucket_path(0)).unwrap().len();
        let mut last_offset = 0u64;
        while let Some((_, ticket)) = frontier.claim_next(0, &ledger, &accept_all).await.unwrap() {
            ticket.complete().await.unwrap();
            let offset = frontier.read_offset_sync(0);
            assert!(offset >= last_offset);
            assert!(offset <= size);
            last_offset = offset;
        }
        assert_eq!(frontier.pending_bytes(0), 0);
    }

    #[tokio::test]
    async fn test_reject_lines_still_advance_cursor() {
        let dir = TempDir::new().unwrap();
        let (frontier, ledger) = setup(&dir, 1);
        frontier
            .seed(&vec![
                "https://example.com/skip.png".to_string(),
                "https://example.com/keep".to_string(),
            ])
            .await
            .unwrap();

        let accept = |url: &str| !url.ends_with(".png");
        let (url, ticket) = frontier
            .claim_next(0, &ledger, &accept)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(url, "https://example.com/keep");
        ticket.complete().await.unwrap();
        assert_eq!(frontier.pending_bytes(0), 0);
    }

    #[tokio::test]
    async fn test_bom_and_crlf_tolerated() {
        let dir = TempDir::new().unwrap();
        let (frontier, ledger) = setup(&dir, 1);
        frontier.seed(&[]).await.unwrap();

        let path = frontier.bucket_path(0);
        std::fs::write(
            &path,
            b"\xEF\xBB\xBFhttps://example.com/first\r\nhttps://example.com/second\r\n",
        )
        .unwrap();

        let (first, t1) = frontier
            .claim_next(0, &ledger, &accept_all)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, "https://example.com/first");
        t1.complete().await.unwrap();

        let (second, t2) = frontier
            .claim_next(0, &ledger, &accept_all)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, "https://example.com/second");
        t2.complete().await.unwrap();
    }

    #[tokio::test]
    async fn test_lease_excludes_second_scanner() {
        let dir = TempDir::new().unwrap();
        let (frontier, ledger) = setup(&dir, 1);
        frontier
            .seed(&vec!["https://example.com/one".to_string()])
            .await
            .unwrap();

        let lease = frontier.try_lease(0).unwrap();
        // A scan cannot start while the lease is held elsewhere.
        let blocked = frontier.claim_next(0, &ledger, &accept_all).await.unwrap();
        assert!(blocked.is_none());
        drop(lease);

        let granted = frontier.claim_next(0, &ledger, &accept_all).await.unwrap();
        assert!(granted.is_some());
    }

    #[tokio::test]
    async fn test_rotation_over_byte_cap() {
        let dir = TempDir::new().unwrap();
        let mut tuning = Tuning::default();
        tuning.bucket_max_bytes = 64;
        let frontier = Frontier::open(&dir.path().join("frontier"), 1, &tuning).unwrap();

        frontier
            .seed(&vec!["https://example.com/aaaaaaaaaaaaaaaaaaaaaaa".to_string()])
            .await
            .unwrap();
        frontier
            .append(&vec![
                "https://example.com/bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_string()
            ])
            .await
            .unwrap();

        let rotated: Vec<_> = std::fs::read_dir(dir.path().join("frontier"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.starts_with("bucket.0.") && name.ends_with(".ndjson") && name != "bucket.0.ndjson"
            })
            .collect();
        assert_eq!(rotated.len(), 1);
        // Fresh file holds only the new batch.
        let fresh = std::fs::read_to_string(frontier.bucket_path(0)).unwrap();
        assert!(fresh.contains("/bbbb"));
        assert!(!fresh.contains("/aaaa"));
    }

    #[tokio::test]
    async fn test_stealing_from_foreign_bucket() {
        let dir = TempDir::new().unwrap();
        let (frontier, ledger) = setup(&dir, 8);

        // Find a URL hashing to a bucket that is not 3, then claim with home 3.
        let mut urls = Vec::new();
        for i in 0..50 {
            let url = format!("https://example.com/steal/{}", i);
            if frontier.bucket_of(&url) != 3 {
                urls.push(url);
            }
        }
        frontier.seed(&urls).await.unwrap();

        let stolen = frontier
            .claim_next_any(3, &ledger, &accept_all)
            .await
            .unwrap();
        assert!(stolen.is_some());
    }
}
