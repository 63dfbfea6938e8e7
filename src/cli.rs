use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::{ConfigError, CrawlConfig, WorkerMode};

/// metacrawl cli
#[derive(Parser, Debug)]
#[command(name = "metacrawl")]
#[command(about = "Distributed site meta-content crawler and validation reports")]
#[command(version)]
pub struct Cli {
    /// Base origin to crawl, e.g. https://example.com
    #[arg(long, help = "Base origin to crawl (scheme + host)")]
    pub base: String,

    /// Optional delimited input file of URLs and/or expected titles
    #[arg(long, help = "Delimited input file driving explicit-URL or comparison runs")]
    pub input: Option<PathBuf>,

    /// Restrict the crawl to paths under this prefix
    #[arg(long = "pathPrefix", default_value = "", help = "Only crawl paths under this prefix")]
    pub path_prefix: String,

    /// Artifact and state directory
    #[arg(long = "outDir", default_value = "./dist", help = "Output directory for reports and run state")]
    pub out_dir: PathBuf,

    /// Worker process count
    #[arg(long, default_value_t = 4, help = "Number of worker processes")]
    pub shards: usize,

    /// Frontier bucket count
    #[arg(long = "bucketParts", default_value_t = 16, help = "Number of frontier buckets")]
    pub bucket_parts: usize,

    /// Concurrent page loads per worker
    #[arg(long, default_value_t = 4, help = "Concurrent page loads within one worker")]
    pub concurrency: usize,

    /// Keep the `page` query parameter during URL normalization
    #[arg(long = "keepPageParam", action = ArgAction::Set, default_value_t = false, help = "Keep the page query parameter (pagination)")]
    pub keep_page_param: bool,

    /// Refetch cached pages to rebuild link data
    #[arg(long = "rebuildLinks", action = ArgAction::Set, default_value_t = false, help = "Ignore cached page records and refetch")]
    pub rebuild_links: bool,

    /// Delete the fetch cache during cleanup
    #[arg(long = "dropCache", action = ArgAction::Set, default_value_t = false, help = "Remove fetch-cache parts after the run")]
    pub drop_cache: bool,

    /// Run the page engine headless
    #[arg(long, action = ArgAction::Set, default_value_t = true, help = "Run the page engine headless")]
    pub headless: bool,

    /// Control Channel port (0 picks a free port)
    #[arg(long = "telemetryPort", default_value_t = 0, help = "Control Channel port; 0 selects a free port")]
    pub telemetry_port: u16,

    /// Worker discovery strategy (worker internal)
    #[arg(long, value_enum, default_value_t = WorkerMode::Frontier, hide = true)]
    pub mode: WorkerMode,

    /// 0-based worker index; presence selects the worker role (internal)
    #[arg(long = "worker-index", hide = true)]
    pub worker_index: Option<usize>,

    /// Total worker count (internal)
    #[arg(long = "worker-total", default_value_t = 1, hide = true)]
    pub worker_total: usize,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Parse-then-validate into the typed run config. Worker children read
    /// the hub port from their environment.
    pub fn into_config(self) -> Result<(CrawlConfig, Option<(usize, usize)>), ConfigError> {
        let worker = self.worker_index.map(|index| (index, self.worker_total));

        let telemetry_port = if worker.is_some() {
            std::env::var("TELEMETRY_PORT")
                .ok()
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(0)
        } else {
            self.telemetry_port
        };

        let cfg = CrawlConfig::build(
            &self.base,
            self.input,
            self.path_prefix,
            self.out_dir,
            self.shards,
            self.bucket_parts,
            self.concurrency,
            self.keep_page_param,
            self.rebuild_links,
            self.drop_cache,
            self.headless,
            telemetry_port,
            self.mode,
        )?;
        Ok((cfg, worker))
    }
}
