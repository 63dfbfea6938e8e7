//! Worker process: claims URLs from the frontier, loads them through the
//! page engine, extracts and normalizes internal links, and emits per-worker
//! partial artifacts.
//!
//! Lifecycle: `init -> discover -> fetch -> report -> done`. Discovery runs
//! sitemap bootstrap first and falls back to frontier crawling; in
//! explicit-urls mode discovery is skipped entirely. Stop is cooperative: the
//! flag file is polled between URLs, in-flight loads finish, claims are
//! released or completed, then the worker exits.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::backoff::ExponentialBackoff;
use crate::claims::{claim_digest, ClaimLedger, ClaimOutcome, ClaimTicket};
use crate::config::{Config, CrawlConfig, WorkerMode};
use crate::frontier::Frontier;
use crate::fs_atomic::{self, FsError};
use crate::models::{
    AppliedConfig, EdgeRecord, ExistenceRecord, LinkCandidate, OutputKind, PageRecord,
};
use crate::network::HttpClient;
use crate::page_engine::{HttpPageEngine, PageEngine, PageHandle};
use crate::sitemap_seeder::SitemapSeeder;
use crate::telemetry::HubUpdate;
use crate::url_norm;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("filesystem: {0}")]
    Fs(#[from] FsError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("http client: {0}")]
    Client(#[from] crate::network::FetchError),
}

/// Why a processed URL produced no page record.
enum Disposition {
    Recorded,
    OutOfScope,
    Unreachable(u16),
    Abandoned,
}

pub struct Worker {
    cfg: CrawlConfig,
    index: usize,
    total: usize,
    frontier: Arc<Frontier>,
    ledger: Arc<ClaimLedger>,
    http: HttpClient,
    engine: Arc<dyn PageEngine>,
    outputs: Vec<OutputKind>,
    pages: Arc<Mutex<HashMap<String, PageRecord>>>,
    bucket_processed: Mutex<HashMap<usize, u64>>,
    completions: Arc<std::sync::atomic::AtomicUsize>,
}

impl Worker {
    pub async fn new(cfg: CrawlConfig, index: usize, total: usize) -> Result<Self, WorkerError> {
        let frontier = Frontier::open(&cfg.frontier_dir(), cfg.bucket_parts, &cfg.tuning)?;
        let ledger = ClaimLedger::open(&cfg.ledger_dir(), &cfg.tuning)?;
        let http = HttpClient::new(30)?;
        let engine: Arc<dyn PageEngine> = Arc::new(HttpPageEngine::new(http.clone()));

        // Outputs come from the applied Control Channel config; absent config
        // means everything the run permits.
        let config_path = cfg.telemetry_dir().join("config.json");
        let outputs = match std::fs::read(&config_path) {
            Ok(bytes) => serde_json::from_slice::<AppliedConfig>(&bytes)
                .map(|c| c.outputs)
                .unwrap_or_else(|_| OutputKind::ALL.to_vec()),
            Err(_) => OutputKind::ALL.to_vec(),
        };

        let mut pages = HashMap::new();
        if !cfg.drop_cache {
            if let Ok(bytes) = std::fs::read(cfg.out_dir.join(format!("fetch-cache.part{}.json", index)))
            {
                if let Ok(cached) = serde_json::from_slice::<HashMap<String, PageRecord>>(&bytes) {
                    pages = cached;
                }
            }
        }

        Ok(Self {
            cfg,
            index,
            total: total.max(1),
            frontier: Arc::new(frontier),
            ledger: Arc::new(ledger),
            http,
            engine,
            outputs,
            pages: Arc::new(Mutex::new(pages)),
            bucket_processed: Mutex::new(HashMap::new()),
            completions: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        })
    }

    fn part_path(&self, pattern: &str) -> PathBuf {
        self.cfg.out_dir.join(pattern.replace("{k}", &self.index.to_string()))
    }

    fn stop_requested(&self) -> bool {
        self.cfg.stop_flag().exists()
    }

    fn existence_only(&self) -> bool {
        self.outputs == vec![OutputKind::ExistenceCsv]
    }

    async fn push(&self, update: HubUpdate) {
        self.http.push_update(self.cfg.telemetry_port, &update).await;
    }

    async fn push_phase(&self, phase: &str, url: Option<String>, bucket: Option<usize>, idle: u64) {
        self.push(HubUpdate::Thread {
            worker: self.index,
            phase: phase.to_string(),
            url,
            bucket,
            idle_cycles: idle,
        })
        .await;
    }

    /// Whether a frontier line is worth claiming for this run.
    fn accept(&self, url: &str) -> bool {
        let normalized = match url_norm::normalize_url(url, self.cfg.keep_page_param) {
            Some(n) => n,
            None => return false,
        };
        if self.existence_only() || self.cfg.mode == WorkerMode::RootUrls {
            // Input-driven runs test whatever the input listed.
            return true;
        }
        !url_norm::is_asset_path(&normalized)
            && url_norm::same_site(&normalized, &self.cfg.base)
            && url_norm::has_prefix(&normalized, &self.cfg.path_prefix)
    }

    /// Home bucket set `{me, me+W, me+2W, ...}`.
    fn home_buckets(&self) -> Vec<usize> {
        (self.index..self.frontier.bucket_count())
            .step_by(self.total)
            .collect()
    }

    pub async fn run(self) -> Result<(), WorkerError> {
        self.push_phase("init", None, None, 0).await;

        if self.existence_only() {
            // Fast path: probes only, no rendering and no fetch cache.
            self.run_existence().await?;
        } else {
            if self.cfg.mode == WorkerMode::Frontier && self.index == 0 {
                self.discover_sitemap().await;
            }
            self.run_fetch_loop().await?;
            self.flush_cache().await?;
        }
        self.push(HubUpdate::Bump {
            counter: "workersDone".to_string(),
            delta: 1,
        })
        .await;
        self.push(HubUpdate::Event {
            message: format!("worker {} done", self.index + 1),
        })
        .await;
        self.push_phase("done", None, None, 0).await;
        Ok(())
    }

    /// Sitemap bootstrap; an empty yield falls through to frontier crawling.
    async fn discover_sitemap(&self) {
        self.push_phase("sitemap", None, None, 0).await;
        let origin = self.cfg.base.origin().ascii_serialization();
        let seeder = SitemapSeeder::new(self.http.clone());
        let found = seeder.discover(&origin).await;

        let urls: Vec<String> = found
            .iter()
            .filter_map(|u| url_norm::normalize_url(u, self.cfg.keep_page_param))
            .filter(|u| {
                !url_norm::is_asset_path(u)
                    && url_norm::same_site(u, &self.cfg.base)
                    && url_norm::has_prefix(u, &self.cfg.path_prefix)
            })
            .collect();
        if urls.is_empty() {
            return;
        }
        match self.frontier.append(&urls).await {
            Ok(count) => {
                tracing::info!(count, "sitemap URLs appended to frontier");
                self.push(HubUpdate::Bump {
                    counter: "sitemapUrls".to_string(),
                    delta: count as u64,
                })
                .await;
            }
            Err(e) => tracing::warn!(error = %e, "sitemap append failed"),
        }
    }

    /// Main claim/fetch loop with a bounded in-worker page-load pool.
    async fn run_fetch_loop(&self) -> Result<(), WorkerError> {
        let home = self.home_buckets();
        let semaphore = Arc::new(Semaphore::new(self.cfg.concurrency));
        let mut inflight: JoinSet<()> = JoinSet::new();
        let mut empty_claims: HashMap<usize, u32> = HashMap::new();
        let mut idle_cycles = 0u64;

        loop {
            if self.stop_requested() {
                tracing::info!(worker = self.index, "stop flag observed");
                break;
            }

            while inflight.try_join_next().is_some() {}

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            match self.claim_one(&home, &mut empty_claims).await? {
                Some((url, ticket, bucket)) => {
                    idle_cycles = 0;
                    self.push_phase("fetch", Some(url.clone()), Some(bucket), 0).await;
                    self.note_bucket(bucket, &url).await;

                    let worker = self.clone_for_task();
                    inflight.spawn(async move {
                        let _permit = permit;
                        worker.process_claimed(url, ticket).await;
                    });
                }
                None => {
                    drop(permit);
                    idle_cycles += 1;
                    self.push_phase("idle", None, None, idle_cycles).await;
                    tokio::time::sleep(std::time::Duration::from_millis(Config::IDLE_CYCLE_MS))
                        .await;
                }
            }
        }

        // Finish what is already in flight; claims in flight resolve to
        // complete or release before exit.
        while inflight.join_next().await.is_some() {}
        Ok(())
    }

    /// Claim from home buckets first, stealing on a dry pass. A bucket that
    /// comes up empty six times in a row is left unleased for a cycle so
    /// another worker can take it over.
    async fn claim_one(
        &self,
        home: &[usize],
        empty_claims: &mut HashMap<usize, u32>,
    ) -> Result<Option<(String, ClaimTicket, usize)>, FsError> {
        let accept = |url: &str| self.accept(url);

        for &r in home {
            if empty_claims.get(&r).copied().unwrap_or(0) >= Config::EMPTY_CLAIMS_PER_BUCKET {
                continue;
            }
            match self.frontier.claim_next(r, &self.ledger, &accept).await? {
                Some((url, ticket)) => {
                    empty_claims.insert(r, 0);
                    return Ok(Some((url, ticket, r)));
                }
                None => {
                    *empty_claims.entry(r).or_insert(0) += 1;
                }
            }
        }

        if home
            .iter()
            .all(|r| empty_claims.get(r).copied().unwrap_or(0) >= Config::EMPTY_CLAIMS_PER_BUCKET)
        {
            empty_claims.clear();
        }

        self.push_phase("stealing", None, None, 0).await;
        let stolen = self
            .frontier
            .claim_next_any(home.first().copied().unwrap_or(0), &self.ledger, &accept)
            .await?;
        Ok(stolen.map(|(url, ticket)| {
            let bucket = self.frontier.bucket_of(&url);
            (url, ticket, bucket)
        }))
    }

    async fn note_bucket(&self, bucket: usize, url: &str) {
        let processed = {
            let mut counts = self.bucket_processed.lock();
            let entry = counts.entry(bucket).or_insert(0);
            *entry += 1;
            *entry
        };
        self.push(HubUpdate::Bucket {
            bucket,
            owner: Some(self.index),
            processed,
            pending: self.frontier.pending_bytes(bucket),
            last_url: Some(url.to_string()),
        })
        .await;
    }

    // JoinSet tasks need owned state; everything heavy is behind an Arc.
    fn clone_for_task(&self) -> TaskWorker {
        TaskWorker {
            cfg: self.cfg.clone(),
            index: self.index,
            frontier: Arc::clone(&self.frontier),
            ledger: Arc::clone(&self.ledger),
            http: self.http.clone(),
            engine: Arc::clone(&self.engine),
            outputs: self.outputs.clone(),
            pages: Arc::clone(&self.pages),
            completions: Arc::clone(&self.completions),
        }
    }

    async fn flush_cache(&self) -> Result<(), FsError> {
        flush_cache(&self.cfg.out_dir, self.index, &self.pages).await
    }

    /// Existence fast path: no rendering, one probe per claimed input URL.
    async fn run_existence(&self) -> Result<(), WorkerError> {
        let home = self.home_buckets();
        let mut empty_claims: HashMap<usize, u32> = HashMap::new();
        let mut idle_cycles = 0u64;

        let csv_path = self.part_path("url-existence.part{k}.csv");
        if !csv_path.exists() {
            fs_atomic::write_retry(&csv_path, b"input_url,exists,http_status,final_url\n").await?;
        }

        loop {
            if self.stop_requested() {
                break;
            }
            match self.claim_one(&home, &mut empty_claims).await? {
                Some((url, ticket, bucket)) => {
                    idle_cycles = 0;
                    self.push_phase("probe", Some(url.clone()), Some(bucket), 0).await;
                    self.note_bucket(bucket, &url).await;
                    self.probe_and_record(&url).await?;
                    ticket.complete().await?;
                }
                None => {
                    idle_cycles += 1;
                    self.push_phase("idle", None, None, idle_cycles).await;
                    tokio::time::sleep(std::time::Duration::from_millis(Config::IDLE_CYCLE_MS))
                        .await;
                }
            }
        }
        Ok(())
    }

    async fn probe_and_record(&self, url: &str) -> Result<(), FsError> {
        let record = match self.http.probe(url).await {
            Ok(outcome) => ExistenceRecord {
                input_url: url.to_string(),
                exists: outcome.reachable(),
                http_status: outcome.status,
                final_url: outcome.final_url,
            },
            Err(e) => {
                tracing::debug!(url, error = %e, "probe failed");
                ExistenceRecord {
                    input_url: url.to_string(),
                    exists: false,
                    http_status: 0,
                    final_url: String::new(),
                }
            }
        };
        write_existence_part(&self.cfg.out_dir, self.index, &record).await?;
        self.push(HubUpdate::Bump {
            counter: if record.exists {
                "urlsWorking".to_string()
            } else {
                "urlsNotWorking".to_string()
            },
            delta: 1,
        })
        .await;
        Ok(())
    }
}

/// Per-task view of the worker used inside the page-load pool.
struct TaskWorker {
    cfg: CrawlConfig,
    index: usize,
    frontier: Arc<Frontier>,
    ledger: Arc<ClaimLedger>,
    http: HttpClient,
    engine: Arc<dyn PageEngine>,
    outputs: Vec<OutputKind>,
    pages: Arc<Mutex<HashMap<String, PageRecord>>>,
    completions: Arc<std::sync::atomic::AtomicUsize>,
}

impl TaskWorker {
    fn part_path(&self, pattern: &str) -> PathBuf {
        self.cfg.out_dir.join(pattern.replace("{k}", &self.index.to_string()))
    }

    async fn push(&self, update: HubUpdate) {
        self.http.push_update(self.cfg.telemetry_port, &update).await;
    }

    /// Process one claimed URL end to end. Failures are recorded, never
    /// propagated; the claim always resolves.
    async fn process_claimed(&self, url: String, ticket: ClaimTicket) {
        if !self.cfg.tuning.polite_delay.is_zero() {
            tokio::time::sleep(self.cfg.tuning.polite_delay).await;
        }

        match self.process_url(&url, ticket).await {
            Ok(Disposition::Recorded) => {
                self.push(HubUpdate::Bump {
                    counter: "urlsFound".to_string(),
                    delta: 1,
                })
                .await;

                let done = self
                    .completions
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
                    + 1;
                if done % Config::CACHE_FLUSH_EVERY == 0 {
                    if let Err(e) = flush_cache(&self.cfg.out_dir, self.index, &self.pages).await {
                        tracing::warn!(error = %e, "periodic cache flush failed");
                    }
                    // Space-only maintenance; never touches .lock files.
                    self.ledger.trim_done();
                }
            }
            Ok(Disposition::OutOfScope) => {
                tracing::debug!(url = %url, "final URL out of scope, dropped");
            }
            Ok(Disposition::Unreachable(status)) => {
                tracing::debug!(url = %url, status, "unreachable");
                self.push(HubUpdate::Bump {
                    counter: "urlsFailed".to_string(),
                    delta: 1,
                })
                .await;
            }
            Ok(Disposition::Abandoned) => {
                tracing::debug!(url = %url, "redirect target owned by another worker");
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "per-URL failure");
            }
        }
    }

    async fn process_url(&self, url: &str, ticket: ClaimTicket) -> Result<Disposition, WorkerError> {
        // Cached record short-circuits the load unless links are being rebuilt.
        if !self.cfg.rebuild_links {
            let cached = self.pages.lock().get(url).cloned();
            if let Some(record) = cached {
                self.emit_record(&record).await?;
                ticket.complete().await?;
                return Ok(Disposition::Recorded);
            }
        }

        let handle = match self.load_with_retries(url).await {
            Some(handle) => handle,
            None => {
                // Distinguish unreachable from loaded-but-empty with a cheap
                // probe; either way the outcome is recorded, not raised.
                let status = match self.http.probe(url).await {
                    Ok(outcome) => outcome.status,
                    Err(_) => 0,
                };
                self.record_existence(url, status, "").await?;
                ticket.complete().await?;
                return Ok(Disposition::Unreachable(status));
            }
        };

        if handle.status >= 400 || handle.status == 0 {
            self.record_existence(url, handle.status, &handle.final_url).await?;
            ticket.complete().await?;
            return Ok(Disposition::Unreachable(handle.status));
        }

        let final_url = match url_norm::normalize_url(&handle.final_url, self.cfg.keep_page_param) {
            Some(n) => n,
            None => {
                ticket.complete().await?;
                return Ok(Disposition::OutOfScope);
            }
        };

        // A redirect lands on a different claim key: claim the final URL too,
        // or yield to whichever worker already has it.
        let mut final_ticket = None;
        if claim_digest(&final_url) != claim_digest(url) {
            match self.ledger.try_claim(&final_url).await? {
                ClaimOutcome::Claimed(t) => final_ticket = Some(t),
                ClaimOutcome::AlreadyDone | ClaimOutcome::Contended => {
                    ticket.release().await;
                    return Ok(Disposition::Abandoned);
                }
            }
        }

        // Out-of-scope after redirect is a silent drop.
        if !url_norm::same_site(&final_url, &self.cfg.base)
            || !url_norm::has_prefix(&final_url, &self.cfg.path_prefix)
        {
            ticket.complete().await?;
            if let Some(t) = final_ticket {
                t.complete().await?;
            }
            return Ok(Disposition::OutOfScope);
        }

        let meta = handle.read_meta().clone();
        let candidates = self.normalize_candidates(&final_url, handle.extract_links());
        let status = handle.status;
        handle.close();

        let record = PageRecord {
            url: final_url.clone(),
            title: meta.title.clone(),
            description: meta.description.clone(),
            title_normalized: crate::text_norm::normalize_text(&meta.title),
            links: candidates.clone(),
            last_fetched: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };

        self.emit_record(&record).await?;
        self.record_existence(url, status, &final_url).await?;

        self.pages.lock().insert(final_url.clone(), record);

        ticket.complete().await?;
        if let Some(t) = final_ticket {
            t.complete().await?;
        }
        Ok(Disposition::Recorded)
    }

    async fn load_with_retries(&self, url: &str) -> Option<PageHandle> {
        let backoff = ExponentialBackoff::new(Config::NAV_RETRY_BASE_MS, 5_000).with_jitter(0.0);
        for attempt in 0..=Config::NAV_RETRIES {
            match self.engine.load(url).await {
                Ok(handle) => return Some(handle),
                Err(e) => {
                    tracing::debug!(url, attempt, error = %e, "navigation failed");
                    if attempt < Config::NAV_RETRIES {
                        tokio::time::sleep(backoff.delay(attempt)).await;
                    }
                }
            }
        }
        None
    }

    /// Absolute, normalized, filtered link candidates for one page.
    fn normalize_candidates(
        &self,
        page_url: &str,
        raw: &[LinkCandidate],
    ) -> Vec<LinkCandidate> {
        let mut seen = std::collections::HashSet::new();
        raw.iter()
            .filter_map(|candidate| {
                let absolute = url_norm::resolve(page_url, &candidate.url)?;
                let normalized = url_norm::normalize_url(&absolute, self.cfg.keep_page_param)?;
                if url_norm::is_asset_path(&normalized)
                    || !url_norm::same_site(&normalized, &self.cfg.base)
                    || !url_norm::has_prefix(&normalized, &self.cfg.path_prefix)
                {
                    return None;
                }
                if !seen.insert(normalized.clone()) {
                    return None;
                }
                Some(LinkCandidate {
                    url: normalized,
                    text: candidate.text.clone(),
                    kind: candidate.kind,
                })
            })
            .collect()
    }

    /// Emit the per-page artifacts: URL list line, edge records, frontier
    /// appends (discovery only), and the telemetry tree path.
    async fn emit_record(&self, record: &PageRecord) -> Result<(), WorkerError> {
        fs_atomic::append_retry(
            &self.part_path("urls-final.part{k}.json"),
            format!("{}\n", record.url).as_bytes(),
        )
        .await?;

        if !record.links.is_empty() {
            let mut edges = String::new();
            for link in &record.links {
                let edge = EdgeRecord {
                    page_url: record.url.clone(),
                    link_url: link.url.clone(),
                    text: link.text.clone(),
                    kind: link.kind,
                };
                if let Ok(line) = serde_json::to_string(&edge) {
                    edges.push_str(&line);
                    edges.push('\n');
                }
            }
            fs_atomic::append_retry(
                &self.part_path("internal-links.part{k}.ndjson"),
                edges.as_bytes(),
            )
            .await?;

            self.push(HubUpdate::Bump {
                counter: "internalEdges".to_string(),
                delta: record.links.len() as u64,
            })
            .await;

            if self.cfg.mode == WorkerMode::Frontier {
                let urls: Vec<String> = record.links.iter().map(|l| l.url.clone()).collect();
                self.frontier.append(&urls).await?;
            }
        }

        if let Ok(parsed) = url::Url::parse(&record.url) {
            self.push(HubUpdate::Tree {
                path: parsed.path().to_string(),
            })
            .await;
        }
        Ok(())
    }

    /// Existence rows are only meaningful for input-driven URLs.
    async fn record_existence(
        &self,
        input_url: &str,
        status: u16,
        final_url: &str,
    ) -> Result<(), FsError> {
        if self.cfg.mode != WorkerMode::RootUrls
            || !self.outputs.contains(&OutputKind::ExistenceCsv)
        {
            return Ok(());
        }
        let record = ExistenceRecord {
            input_url: input_url.to_string(),
            exists: (200..400).contains(&status),
            http_status: status,
            final_url: final_url.to_string(),
        };
        write_existence_part(&self.cfg.out_dir, self.index, &record).await
    }
}

async fn flush_cache(
    out_dir: &std::path::Path,
    index: usize,
    pages: &Mutex<HashMap<String, PageRecord>>,
) -> Result<(), FsError> {
    let body = {
        let pages = pages.lock();
        serde_json::to_vec_pretty(&*pages).unwrap_or_else(|_| b"{}".to_vec())
    };
    fs_atomic::write_atomic(
        &out_dir.join(format!("fetch-cache.part{}.json", index)),
        &body,
    )
    .await
}

/// Append one existence record to the CSV, JSON, and working/not-working
/// part files.
async fn write_existence_part(
    out_dir: &std::path::Path,
    index: usize,
    record: &ExistenceRecord,
) -> Result<(), FsError> {
    let csv_path = out_dir.join(format!("url-existence.part{}.csv", index));
    if !csv_path.exists() {
        fs_atomic::write_retry(&csv_path, b"input_url,exists,http_status,final_url\n").await?;
    }
    let row = format!(
        "{},{},{},{}\n",
        crate::reports::csv_escape(&record.input_url),
        record.exists,
        record.http_status,
        crate::reports::csv_escape(&record.final_url),
    );
    fs_atomic::append_retry(&csv_path, row.as_bytes()).await?;

    if let Ok(line) = serde_json::to_string(record) {
        fs_atomic::append_retry(
            &out_dir.join(format!("url-existence.part{}.json", index)),
            format!("{}\n", line).as_bytes(),
        )
        .await?;
    }

    let bucket_file = if record.exists {
        format!("working-urls.part{}.txt", index)
    } else {
        format!("not-working-urls.part{}.txt", index)
    };
    fs_atomic::append_retry(
        &out_dir.join(bucket_file),
        format!("{}\n", record.input_url).as_bytes(),
    )
    .await
}

/// Entry point for the `--worker-index` child process role.
pub async fn run_worker(cfg: CrawlConfig, index: usize, total: usize) -> Result<(), WorkerError> {
    let worker = Worker::new(cfg, index, total).await?;
    worker.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LinkKind;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir, mode: WorkerMode) -> CrawlConfig {
        CrawlConfig::build(
            "https://example.com",
            None,
            String::new(),
            dir.path().join("dist"),
            2,
            4,
            2,
            false,
            false,
            false,
            true,
            0,
            mode,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_home_bucket_round_robin() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir, WorkerMode::Frontier);
        let worker = Worker::new(cfg, 1, 2).await.unwrap();
        assert_eq!(worker.home_buckets(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_accept_enforces_scope_in_frontier_mode() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir, WorkerMode::Frontier);
        let worker = Worker::new(cfg, 0, 1).await.unwrap();

        assert!(worker.accept("https://example.com/docs"));
        assert!(!worker.accept("https://other.org/docs"));
        assert!(!worker.accept("https://example.com/logo.png"));
        assert!(!worker.accept("mailto:hi@example.com"));
    }

    #[tokio::test]
    async fn test_accept_is_permissive_for_input_urls() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir, WorkerMode::RootUrls);
        let worker = Worker::new(cfg, 0, 1).await.unwrap();
        // Input-driven runs may test off-site URLs.
        assert!(worker.accept("https://other.org/page"));
        assert!(!worker.accept("not a url"));
    }

    #[tokio::test]
    async fn test_candidate_normalization_filters_and_dedupes() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir, WorkerMode::Frontier);
        let worker = Worker::new(cfg, 0, 1).await.unwrap();
        let task = worker.clone_for_task();

        let raw = vec![
            LinkCandidate {
                url: "/docs/intro#top".to_string(),
                text: "Intro".to_string(),
                kind: LinkKind::A,
            },
            LinkCandidate {
                url: "/docs/intro".to_string(),
                text: "Intro again".to_string(),
                kind: LinkKind::Button,
            },
            LinkCandidate {
                url: "https://elsewhere.org/x".to_string(),
                text: "Other".to_string(),
                kind: LinkKind::A,
            },
            LinkCandidate {
                url: "/logo.svg".to_string(),
                text: "Logo".to_string(),
                kind: LinkKind::A,
            },
        ];
        let normalized = task.normalize_candidates("https://example.com/docs", &raw);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].url, "https://example.com/docs/intro");
    }

    #[tokio::test]
    async fn test_existence_part_files() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("dist");
        std::fs::create_dir_all(&out).unwrap();

        write_existence_part(
            &out,
            0,
            &ExistenceRecord {
                input_url: "https://example.com/ok".to_string(),
                exists: true,
                http_status: 200,
                final_url: "https://example.com/ok".to_string(),
            },
        )
        .await
        .unwrap();
        write_existence_part(
            &out,
            0,
            &ExistenceRecord {
                input_url: "https://example.com/gone".to_string(),
                exists: false,
                http_status: 404,
                final_url: "https://example.com/gone".to_string(),
            },
        )
        .await
        .unwrap();

        let csv = std::fs::read_to_string(out.join("url-existence.part0.csv")).unwrap();
        assert!(csv.starts_with("input_url,exists,http_status,final_url\n"));
        assert_eq!(csv.lines().count(), 3);

        let working = std::fs::read_to_string(out.join("working-urls.part0.txt")).unwrap();
        assert_eq!(working.trim(), "https://example.com/ok");
        let broken = std::fs::read_to_string(out.join("not-working-urls.part0.txt")).unwrap();
        assert_eq!(broken.trim(), "https://example.com/gone");
    }
}
