//! Post-merge cleanup of run-scoped state.

use crate::config::CrawlConfig;

const PART_PREFIXES: &[&str] = &[
    "urls-final.part",
    "internal-links.part",
    "url-existence.part",
    "working-urls.part",
    "not-working-urls.part",
    "site_catalog.part",
];

/// Remove the frontier, the claim ledger, and per-worker partials. The fetch
/// cache survives unless the run asked to drop it.
pub fn cleanup(cfg: &CrawlConfig) {
    for dir in [cfg.frontier_dir(), cfg.ledger_dir()] {
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %dir.display(), error = %e, "cleanup failed");
            }
        }
    }

    let entries = match std::fs::read_dir(&cfg.out_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_part = PART_PREFIXES.iter().any(|p| name.starts_with(p));
        let is_cache = name.starts_with("fetch-cache.part");
        if is_part || (is_cache && cfg.drop_cache) {
            let _ = std::fs::remove_file(entry.path());
        }
    }
}
