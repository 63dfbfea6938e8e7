//! Orchestrator entry: resolve config, seed, spawn workers, watch for
//! quiescence or Stop, then merge, report, and clean up.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::claims::ClaimLedger;
use crate::classifier;
use crate::config::{Config, ConfigError, CrawlConfig};
use crate::control::{self, ControlState};
use crate::frontier::Frontier;
use crate::fs_atomic::{self, FsError};
use crate::gate;
use crate::models::{AppliedConfig, OutputKind};
use crate::network::{FetchError, HttpClient};
use crate::page_engine::HttpPageEngine;
use crate::reports::{self, ReportInputs};
use crate::telemetry::{self, TelemetryHub};

use super::{cleanup, merge, quiescence::QuiescenceDetector, seed, workers};

const DRAIN_DEADLINE: Duration = Duration::from_secs(30);
const PROGRESS_EVERY_TICKS: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Quiescence reached; reports written.
    Completed,
    /// Stop requested; partials left in place, merge and cleanup skipped.
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("filesystem: {0}")]
    Fs(#[from] FsError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("http client: {0}")]
    Net(#[from] FetchError),
}

#[derive(Serialize)]
struct Session {
    run_id: String,
    started_at_ms: u64,
    base: String,
    mode: String,
    shards: usize,
    bucket_parts: usize,
    outputs: Vec<OutputKind>,
    outcome: Option<String>,
    finished_at_ms: Option<u64>,
}

pub async fn run(cfg: CrawlConfig) -> Result<RunOutcome, OrchestratorError> {
    let started = Instant::now();
    std::fs::create_dir_all(cfg.telemetry_dir())?;
    // A stop flag left over from a previous run must not kill this one.
    let _ = std::fs::remove_file(cfg.stop_flag());

    // Classify the input once; shape drives mode and gating for the run.
    let input = classifier::classify_file(cfg.input.as_deref());
    let run_mode = classifier::run_mode(&input.shape);
    tracing::info!(mode = run_mode.as_str(), "run mode resolved");

    let applied = resolve_outputs(&cfg, &input.shape).await?;
    tracing::info!(outputs = ?applied.outputs, "outputs selected");

    let hub = Arc::new(TelemetryHub::with_default_steps());
    hub.set_mode(run_mode.as_str());

    let cancel = CancellationToken::new();
    let control_state = Arc::new(ControlState::new(
        Arc::clone(&hub),
        cfg.out_dir.clone(),
        input.shape.clone(),
    ));
    *control_state.applied.write() = Some(applied.clone());
    control_state
        .started
        .store(true, std::sync::atomic::Ordering::Relaxed);
    let port = control::serve(Arc::clone(&control_state), cfg.telemetry_port, cancel.clone())
        .await?;
    tracing::info!(port, "control channel listening");

    let snapshot_task = telemetry::spawn_snapshot_task(
        Arc::clone(&hub),
        cfg.telemetry_dir().join("state.json"),
        cancel.clone(),
    );

    let mut session = Session {
        run_id: format!("{}-{}", std::process::id(), now_ms()),
        started_at_ms: now_ms(),
        base: cfg.base.to_string(),
        mode: run_mode.as_str().to_string(),
        shards: cfg.shards,
        bucket_parts: cfg.bucket_parts,
        outputs: applied.outputs.clone(),
        outcome: None,
        finished_at_ms: None,
    };
    write_session(&cfg, &session).await?;

    // Seed the frontier before any worker exists.
    hub.set_step(0);
    let frontier = Frontier::open(&cfg.frontier_dir(), cfg.bucket_parts, &cfg.tuning)?;
    let ledger = ClaimLedger::open(&cfg.ledger_dir(), &cfg.tuning)?;
    let engine = HttpPageEngine::new(HttpClient::new(30)?);
    let seeded = seed::seed_frontier(&cfg, run_mode, &input, &frontier, &engine).await?;
    hub.bump("urlsSeeded", seeded as u64);
    hub.event(format!("seeded {} URLs", seeded));

    hub.set_step(1);
    let mut children = workers::spawn_workers(&cfg, run_mode, port)?;
    spawn_signal_handler(&cfg);

    // Watch for Stop or quiescence.
    let mut detector = QuiescenceDetector::new();
    let mut tick = tokio::time::interval(Duration::from_millis(Config::QUIESCENCE_TICK_MS));
    let mut ticks = 0u32;
    let stopped = loop {
        tick.tick().await;
        ticks += 1;

        if cfg.stop_flag().exists() {
            tracing::info!("stop flag observed");
            break true;
        }

        let snapshot = frontier.snapshot(&ledger);
        let idle = hub.min_worker_idle_cycles(cfg.shards);

        if ticks % PROGRESS_EVERY_TICKS == 0 {
            tracing::info!(
                pending_bytes = snapshot.pending_bytes,
                claims = snapshot.claim_lock_count,
                urls_found = hub.total("urlsFound"),
                stable_cycles = detector.stable_cycles(),
                "progress"
            );
        }

        if detector.observe(snapshot, idle) {
            tracing::info!("quiescence declared");
            hub.event("quiescence declared");
            break false;
        }

        if workers::all_exited(&mut children) {
            tracing::warn!("all workers exited before quiescence");
            break false;
        }
    };

    // Drain: signal workers via the flag, then wait for their exits; a
    // worker's partials are merged only after its exit is observed.
    fs_atomic::write_atomic(&cfg.stop_flag(), b"drain").await?;
    workers::drain(&mut children, DRAIN_DEADLINE).await;

    let outcome = if stopped {
        hub.event("stopped by request; merge and cleanup skipped");
        session.outcome = Some("stopped".to_string());
        RunOutcome::Stopped
    } else {
        run_merge_and_reports(&cfg, &hub, &input, &applied, started.elapsed()).await?;
        session.outcome = Some("completed".to_string());
        RunOutcome::Completed
    };

    session.finished_at_ms = Some(now_ms());
    write_session(&cfg, &session).await?;

    // Final snapshot is flushed by the snapshot task on cancellation.
    cancel.cancel();
    let _ = snapshot_task.await;

    tracing::info!(?outcome, elapsed_secs = started.elapsed().as_secs(), "run finished");
    Ok(outcome)
}

async fn run_merge_and_reports(
    cfg: &CrawlConfig,
    hub: &TelemetryHub,
    input: &classifier::ClassifiedInput,
    applied: &AppliedConfig,
    elapsed: Duration,
) -> Result<(), OrchestratorError> {
    hub.set_step(2);
    let concat_links = applied.outputs.contains(&OutputKind::InternalLinks);
    let merged = merge::merge_partials(&cfg.out_dir, cfg.shards, concat_links).await?;
    hub.event(format!(
        "merged {} URLs, {} pages, {} edges",
        merged.urls.len(),
        merged.pages.len(),
        merged.edge_count
    ));

    hub.set_step(3);
    let totals = reports::write_all(&ReportInputs {
        out_dir: &cfg.out_dir,
        selected: &applied.outputs,
        urls: &merged.urls,
        pages: &merged.pages,
        edge_count: merged.edge_count,
        existence: &merged.existence,
        input,
        keep_page_param: cfg.keep_page_param,
        duration_secs: elapsed.as_secs(),
    })
    .await?;
    tracing::info!(
        urls = totals.urls,
        pages = totals.pages,
        comparison_rows = totals.comparison_rows,
        "reports written"
    );

    hub.set_step(4);
    cleanup::cleanup(cfg);
    Ok(())
}

/// Use an applied Control Channel config when a valid one is on disk;
/// otherwise select everything the input shape permits, and persist that so
/// workers see the same decision.
async fn resolve_outputs(
    cfg: &CrawlConfig,
    shape: &classifier::InputShape,
) -> Result<AppliedConfig, FsError> {
    let path = cfg.telemetry_dir().join("config.json");
    if let Ok(bytes) = std::fs::read(&path) {
        if let Ok(existing) = serde_json::from_slice::<AppliedConfig>(&bytes) {
            if gate::validate(shape, &existing.outputs).ok {
                return Ok(existing);
            }
            tracing::warn!("persisted config no longer passes the gate, reselecting");
        }
    }

    let applied = AppliedConfig {
        outputs: gate::permitted(shape),
        meta: serde_json::Value::Null,
    };
    let body = serde_json::to_vec_pretty(&applied).unwrap_or_else(|_| b"{}".to_vec());
    fs_atomic::write_atomic(&path, &body).await?;
    Ok(applied)
}

async fn write_session(cfg: &CrawlConfig, session: &Session) -> Result<(), FsError> {
    let body = serde_json::to_vec_pretty(session).unwrap_or_else(|_| b"{}".to_vec());
    fs_atomic::write_atomic(&cfg.telemetry_dir().join("session.json"), &body).await
}

/// First Ctrl+C requests a cooperative stop; the second exits immediately.
fn spawn_signal_handler(cfg: &CrawlConfig) {
    let flag = cfg.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C: requesting cooperative stop");
            let _ = std::fs::write(&flag, b"stop");
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("force quit");
                std::process::exit(1);
            }
        }
    });
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
