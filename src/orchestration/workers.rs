//! Worker child-process spawning and supervision.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::config::CrawlConfig;
use crate::models::RunMode;

/// Spawn `shards` worker children of the current binary. Each worker gets its
/// 0-based index, the total, and the hub port in its environment.
pub fn spawn_workers(
    cfg: &CrawlConfig,
    run_mode: RunMode,
    telemetry_port: u16,
) -> std::io::Result<Vec<Child>> {
    let exe = std::env::current_exe()?;
    let mut children = Vec::with_capacity(cfg.shards);

    for index in 0..cfg.shards {
        let mut command = Command::new(&exe);
        command
            .arg("--base")
            .arg(cfg.base.as_str())
            .arg("--outDir")
            .arg(&cfg.out_dir)
            .arg("--pathPrefix")
            .arg(&cfg.path_prefix)
            .arg("--shards")
            .arg(cfg.shards.to_string())
            .arg("--bucketParts")
            .arg(cfg.bucket_parts.to_string())
            .arg("--concurrency")
            .arg(cfg.concurrency.to_string())
            .arg("--keepPageParam")
            .arg(cfg.keep_page_param.to_string())
            .arg("--rebuildLinks")
            .arg(cfg.rebuild_links.to_string())
            .arg("--dropCache")
            .arg(cfg.drop_cache.to_string())
            .arg("--headless")
            .arg(cfg.headless.to_string())
            .arg("--mode")
            .arg(cfg.mode_flag(run_mode))
            .arg("--worker-index")
            .arg(index.to_string())
            .arg("--worker-total")
            .arg(cfg.shards.to_string())
            .env("TELEMETRY_PORT", telemetry_port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = command.spawn()?;
        tracing::info!(worker = index, pid = ?child.id(), "worker spawned");
        children.push(child);
    }
    Ok(children)
}

/// True once every child has exited.
pub fn all_exited(children: &mut [Child]) -> bool {
    children
        .iter_mut()
        .all(|c| matches!(c.try_wait(), Ok(Some(_))))
}

/// Wait for all children within the deadline, then kill stragglers. Worker
/// "done" is observed here, before any merge of that worker's partials.
pub async fn drain(children: &mut Vec<Child>, deadline: Duration) {
    let waited = tokio::time::timeout(deadline, async {
        for child in children.iter_mut() {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    tracing::warn!(code = status.code(), "worker exited non-zero");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "worker wait failed"),
            }
        }
    })
    .await;

    if waited.is_err() {
        tracing::warn!("drain deadline exceeded, killing remaining workers");
        for child in children.iter_mut() {
            let _ = child.start_kill();
        }
        for child in children.iter_mut() {
            let _ = child.wait().await;
        }
    }
    children.clear();
}
