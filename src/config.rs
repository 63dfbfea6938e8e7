//! Fixed constants, environment-tuned knobs, and the validated run config.

use std::path::PathBuf;
use std::time::Duration;

use crate::models::RunMode;

pub struct Config;

impl Config {
    /// Retry bound for the atomic file primitives (~1-2s total).
    pub const FS_RETRY_ATTEMPTS: u32 = 40;
    pub const FS_RETRY_BASE_MS: u64 = 20;
    pub const FS_RETRY_MAX_MS: u64 = 60;

    /// Quiescence detector tick.
    pub const QUIESCENCE_TICK_MS: u64 = 200;
    /// Snapshot fingerprint must hold this many ticks before quiescence.
    pub const QUIESCENT_STABLE_CYCLES: u32 = 5;
    /// Alternative quiescence trigger: all workers idle this many cycles.
    pub const QUIESCENT_IDLE_CYCLES: u64 = 50;

    /// Telemetry snapshot persistence cadence.
    pub const SNAPSHOT_TICK_MS: u64 = 700;
    /// Bounded ring of recent telemetry events.
    pub const EVENT_RING_CAPACITY: usize = 256;

    /// Empty claim attempts on one bucket before the lease is released.
    pub const EMPTY_CLAIMS_PER_BUCKET: u32 = 6;
    /// Navigation retries per URL beyond the first attempt.
    pub const NAV_RETRIES: u32 = 2;
    pub const NAV_RETRY_BASE_MS: u64 = 600;

    /// Page records flushed to the on-disk cache every this many completions.
    pub const CACHE_FLUSH_EVERY: usize = 20;

    /// Worker sleep between empty claim cycles.
    pub const IDLE_CYCLE_MS: u64 = 200;

    /// Classifier samples this many non-empty lines for delimiter detection.
    pub const CLASSIFIER_SAMPLE_LINES: usize = 50;

    /// Comparison matching defaults.
    pub const TITLE_PREFIX_TOKENS: usize = 4;
    pub const TITLE_FUZZY_THRESHOLD: f64 = 0.6;
    pub const TITLE_CHAR_LIMIT: usize = 60;
    pub const DESCRIPTION_CHAR_LIMIT: usize = 160;
}

/// Knobs read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Claim acquisition retries on transient contention.
    pub lock_tries: u32,
    /// Sleep between claim retries.
    pub lock_sleep: Duration,
    /// Completion markers kept before the ledger trims the oldest.
    pub max_done: usize,
    /// Bucket file rotation threshold.
    pub bucket_max_bytes: u64,
    /// Post-claim sleep for gentle-crawl mode.
    pub polite_delay: Duration,
}

impl Tuning {
    pub fn from_env() -> Self {
        Self {
            lock_tries: env_parse("MC_LOCK_TRIES", 60),
            lock_sleep: Duration::from_millis(env_parse("MC_LOCK_SLEEP", 100)),
            max_done: env_parse("MC_MAX_DONE", 50_000),
            bucket_max_bytes: env_parse("MC_BUCKET_MAX_BYTES", 8 * 1024 * 1024),
            polite_delay: Duration::from_millis(env_parse("MC_POLITE_DELAY_MS", 0)),
        }
    }
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            lock_tries: 60,
            lock_sleep: Duration::from_millis(100),
            max_done: 50_000,
            bucket_max_bytes: 8 * 1024 * 1024,
            polite_delay: Duration::from_millis(0),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Which discovery strategy a worker runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkerMode {
    /// Frontier crawl with sitemap bootstrap and work stealing.
    Frontier,
    /// Process exactly the seeded URL set, no discovery appends.
    RootUrls,
}

/// Validated run configuration. Built once from the CLI, then read-only.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub base: url::Url,
    pub input: Option<PathBuf>,
    pub path_prefix: String,
    pub out_dir: PathBuf,
    pub shards: usize,
    pub bucket_parts: usize,
    pub concurrency: usize,
    pub keep_page_param: bool,
    pub rebuild_links: bool,
    pub drop_cache: bool,
    pub headless: bool,
    pub telemetry_port: u16,
    pub mode: WorkerMode,
    pub tuning: Tuning,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base origin '{0}': {1}")]
    BadBase(String, String),
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),
    #[error("output directory is not writable: {0}")]
    UnwritableOutDir(PathBuf),
}

impl CrawlConfig {
    /// Parse-then-validate. Fatal problems surface as a single error.
    pub fn build(
        base: &str,
        input: Option<PathBuf>,
        path_prefix: String,
        out_dir: PathBuf,
        shards: usize,
        bucket_parts: usize,
        concurrency: usize,
        keep_page_param: bool,
        rebuild_links: bool,
        drop_cache: bool,
        headless: bool,
        telemetry_port: u16,
        mode: WorkerMode,
    ) -> Result<Self, ConfigError> {
        let base = url::Url::parse(base)
            .map_err(|e| ConfigError::BadBase(base.to_string(), e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ConfigError::BadBase(
                base.to_string(),
                "scheme must be http or https".to_string(),
            ));
        }

        if let Some(ref path) = input {
            if !path.is_file() {
                return Err(ConfigError::MissingInput(path.clone()));
            }
        }

        std::fs::create_dir_all(&out_dir)
            .map_err(|_| ConfigError::UnwritableOutDir(out_dir.clone()))?;
        let probe = out_dir.join(".write-probe");
        std::fs::write(&probe, b"ok").map_err(|_| ConfigError::UnwritableOutDir(out_dir.clone()))?;
        let _ = std::fs::remove_file(&probe);

        // Normalize the prefix to "/segment" form; empty means whole site.
        let path_prefix = match path_prefix.trim() {
            "" | "/" => String::new(),
            p => {
                let p = p.trim_end_matches('/');
                if p.starts_with('/') {
                    p.to_string()
                } else {
                    format!("/{}", p)
                }
            }
        };

        Ok(Self {
            base,
            input,
            path_prefix,
            out_dir,
            shards: shards.max(1),
            bucket_parts: bucket_parts.max(1),
            concurrency: concurrency.max(1),
            keep_page_param,
            rebuild_links,
            drop_cache,
            headless,
            telemetry_port,
            mode,
            tuning: Tuning::from_env(),
        })
    }

    /// The seed URL: base origin joined with the configured prefix.
    pub fn seed_url(&self) -> String {
        let origin = self.base.origin().ascii_serialization();
        if self.path_prefix.is_empty() {
            format!("{}/", origin)
        } else {
            format!("{}{}", origin, self.path_prefix)
        }
    }

    /// Worker mode string passed on the child command line.
    pub fn mode_flag(&self, run_mode: RunMode) -> &'static str {
        match run_mode {
            RunMode::ExplicitUrls => "root-urls",
            _ => "frontier",
        }
    }

    pub fn telemetry_dir(&self) -> PathBuf {
        self.out_dir.join("telemetry")
    }

    pub fn frontier_dir(&self) -> PathBuf {
        self.out_dir.join("frontier")
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.out_dir.join("disco-locks")
    }

    pub fn stop_flag(&self) -> PathBuf {
        self.telemetry_dir().join("stop.flag")
    }
}
