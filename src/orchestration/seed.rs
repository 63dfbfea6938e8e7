//! Frontier seeding: the base-prefix URL plus a one-shot scan of the base
//! page's first-level section links, or the explicit input URL list.

use crate::classifier::{self, ClassifiedInput};
use crate::config::CrawlConfig;
use crate::frontier::Frontier;
use crate::fs_atomic::FsError;
use crate::models::RunMode;
use crate::page_engine::PageEngine;
use crate::url_norm;

/// Seed the frontier for the resolved run mode. Returns the seeded count.
pub async fn seed_frontier(
    cfg: &CrawlConfig,
    run_mode: RunMode,
    input: &ClassifiedInput,
    frontier: &Frontier,
    engine: &dyn PageEngine,
) -> Result<usize, FsError> {
    match run_mode {
        RunMode::ExplicitUrls => {
            // Malformed input URLs drop out in normalization.
            let urls: Vec<String> = classifier::input_urls(input)
                .iter()
                .filter_map(|raw| absolutize(cfg, raw))
                .collect();
            tracing::info!(count = urls.len(), "seeding explicit URL list");
            frontier.seed(&urls).await
        }
        _ => {
            let seed_url = cfg.seed_url();
            let mut urls = vec![seed_url.clone()];
            urls.extend(scan_sections(cfg, engine, &seed_url).await);
            urls.sort();
            urls.dedup();
            tracing::info!(count = urls.len(), "seeding base prefix");
            frontier.seed(&urls).await
        }
    }
}

/// Resolve an input cell to a normalized absolute URL. Site-rooted paths are
/// taken against the configured base origin.
fn absolutize(cfg: &CrawlConfig, raw: &str) -> Option<String> {
    let raw = raw.trim();
    let absolute = if raw.starts_with('/') {
        format!("{}{}", cfg.base.origin().ascii_serialization(), raw)
    } else if raw.starts_with("//") {
        format!("{}:{}", cfg.base.scheme(), raw)
    } else {
        raw.to_string()
    };
    url_norm::normalize_url(&absolute, cfg.keep_page_param)
}

/// One-shot scan of the base page for first-level section links. Total
/// failure is tolerated; the frontier then starts from the base URL alone.
async fn scan_sections(cfg: &CrawlConfig, engine: &dyn PageEngine, seed_url: &str) -> Vec<String> {
    let handle = match engine.load(seed_url).await {
        Ok(handle) if handle.status < 400 => handle,
        Ok(handle) => {
            tracing::warn!(status = handle.status, "seed scan got error status");
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!(error = %e, "seed scan failed");
            return Vec::new();
        }
    };

    let prefix_depth = cfg
        .path_prefix
        .split('/')
        .filter(|s| !s.is_empty())
        .count();

    handle
        .extract_links()
        .iter()
        .filter_map(|candidate| {
            let absolute = url_norm::resolve(seed_url, &candidate.url)?;
            let normalized = url_norm::normalize_url(&absolute, cfg.keep_page_param)?;
            if url_norm::is_asset_path(&normalized)
                || !url_norm::same_site(&normalized, &cfg.base)
                || !url_norm::has_prefix(&normalized, &cfg.path_prefix)
            {
                return None;
            }
            // First-level sections only: exactly one segment below the prefix.
            let depth = url_norm::path_segments(&normalized).len();
            (depth == prefix_depth + 1).then_some(normalized)
        })
        .collect()
}
