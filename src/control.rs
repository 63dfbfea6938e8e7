//! Control Channel: the HTTP surface for preflight, config apply, start,
//! stop, reset, worker updates, snapshots, and scoped file download.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::classifier::InputShape;
use crate::fs_atomic;
use crate::gate;
use crate::models::{AppliedConfig, OutputKind};
use crate::telemetry::{HubUpdate, TelemetryHub};

pub struct ControlState {
    pub hub: Arc<TelemetryHub>,
    pub out_dir: PathBuf,
    pub shape: InputShape,
    pub applied: RwLock<Option<AppliedConfig>>,
    pub started: AtomicBool,
}

impl ControlState {
    pub fn new(hub: Arc<TelemetryHub>, out_dir: PathBuf, shape: InputShape) -> Self {
        Self {
            hub,
            out_dir,
            shape,
            applied: RwLock::new(None),
            started: AtomicBool::new(false),
        }
    }

    fn stop_flag(&self) -> PathBuf {
        self.out_dir.join("telemetry").join("stop.flag")
    }

    fn config_path(&self) -> PathBuf {
        self.out_dir.join("telemetry").join("config.json")
    }
}

pub fn router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/preflight", get(preflight))
        .route("/config", post(apply_config))
        .route("/start", post(start))
        .route("/stop", post(stop))
        .route("/reset", post(reset))
        .route("/update", post(update))
        .route("/snapshot", get(snapshot))
        .route("/files", get(files))
        .route("/download", get(download))
        .with_state(state)
}

/// Bind and serve until cancelled. Returns the bound port (useful when the
/// configured port is 0).
pub async fn serve(
    state: Arc<ControlState>,
    port: u16,
    cancel: CancellationToken,
) -> std::io::Result<u16> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    let bound = listener.local_addr()?.port();
    let app = router(state);

    tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::warn!(error = %e, "control channel server error");
        }
    });
    Ok(bound)
}

async fn preflight(State(state): State<Arc<ControlState>>) -> Json<serde_json::Value> {
    let applied = state.applied.read().clone();
    let selected = applied
        .as_ref()
        .map(|c| c.outputs.clone())
        .unwrap_or_else(|| gate::permitted(&state.shape));
    Json(json!({
        "shape": state.shape.clone(),
        "options": OutputKind::ALL,
        "selected": selected,
        "meta": applied.as_ref().map(|c| c.meta.clone()).unwrap_or(serde_json::Value::Null),
        "applied": applied.is_some(),
        "started": state.started.load(Ordering::Relaxed),
    }))
}

async fn apply_config(
    State(state): State<Arc<ControlState>>,
    Json(config): Json<AppliedConfig>,
) -> Json<serde_json::Value> {
    let result = gate::validate(&state.shape, &config.outputs);
    if !result.ok {
        return Json(json!({ "valid": false, "errors": result.errors }));
    }

    let path = state.config_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let body = serde_json::to_vec_pretty(&config).unwrap_or_else(|_| b"{}".to_vec());
    if let Err(e) = fs_atomic::write_atomic(&path, &body).await {
        tracing::warn!(error = %e, "config persist failed");
        return Json(json!({
            "valid": false,
            "errors": [{ "key": null, "reason": "failed to persist config" }],
        }));
    }
    *state.applied.write() = Some(config);
    Json(json!({ "valid": true, "errors": [] }))
}

async fn start(State(state): State<Arc<ControlState>>) -> Json<serde_json::Value> {
    if state.applied.read().is_none() && !state.started.load(Ordering::Relaxed) {
        return Json(json!({ "ok": false, "reason": "no valid applied config" }));
    }
    state.started.store(true, Ordering::Relaxed);
    Json(json!({ "ok": true }))
}

async fn stop(State(state): State<Arc<ControlState>>) -> Json<serde_json::Value> {
    let flag = state.stop_flag();
    if let Some(parent) = flag.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    match fs_atomic::write_atomic(&flag, b"stop").await {
        Ok(()) => Json(json!({ "ok": true })),
        Err(e) => {
            tracing::warn!(error = %e, "stop flag write failed");
            Json(json!({ "ok": false }))
        }
    }
}

async fn reset(State(state): State<Arc<ControlState>>) -> Json<serde_json::Value> {
    state.hub.reset();
    let _ = std::fs::remove_file(state.stop_flag());
    Json(json!({ "ok": true }))
}

async fn update(
    State(state): State<Arc<ControlState>>,
    Json(update): Json<HubUpdate>,
) -> Json<serde_json::Value> {
    state.hub.apply(update);
    Json(json!({ "ok": true }))
}

async fn snapshot(State(state): State<Arc<ControlState>>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.hub.snapshot()).unwrap_or(serde_json::Value::Null))
}

async fn files(State(state): State<Arc<ControlState>>) -> Json<serde_json::Value> {
    let mut listing = Vec::new();
    walk_files(&state.out_dir, &state.out_dir, &mut listing);
    listing.sort();
    Json(json!({ "files": listing }))
}

fn walk_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            walk_files(root, &path, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
}

#[derive(Deserialize)]
struct DownloadQuery {
    file: String,
}

/// Download is scope-restricted to outDir; traversal attempts are rejected.
async fn download(
    State(state): State<Arc<ControlState>>,
    Query(query): Query<DownloadQuery>,
) -> Result<Vec<u8>, StatusCode> {
    let requested = Path::new(&query.file);
    if requested.is_absolute()
        || requested
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(StatusCode::FORBIDDEN);
    }

    let path = state.out_dir.join(requested);
    let canonical = path.canonicalize().map_err(|_| StatusCode::NOT_FOUND)?;
    let root = state
        .out_dir
        .canonicalize()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if !canonical.starts_with(&root) {
        return Err(StatusCode::FORBIDDEN);
    }

    std::fs::read(&canonical).map_err(|_| StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::classify_bytes;

    fn state(dir: &tempfile::TempDir) -> Arc<ControlState> {
        let hub = Arc::new(TelemetryHub::with_default_steps());
        let input = classify_bytes(b"https://a.test/1,Home\nhttps://a.test/2,About\n");
        Arc::new(ControlState::new(
            hub,
            dir.path().to_path_buf(),
            input.shape,
        ))
    }

    #[tokio::test]
    async fn test_config_apply_validates_through_gate() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = state(&dir);

        let good = AppliedConfig {
            outputs: vec![OutputKind::Urls, OutputKind::ExistenceCsv],
            meta: serde_json::Value::Null,
        };
        let response = apply_config(State(state.clone()), Json(good)).await;
        assert_eq!(response.0["valid"], true);
        assert!(state.applied.read().is_some());
        assert!(dir.path().join("telemetry/config.json").exists());
    }

    #[tokio::test]
    async fn test_start_requires_applied_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = state(&dir);

        let refused = start(State(state.clone())).await;
        assert_eq!(refused.0["ok"], false);

        *state.applied.write() = Some(AppliedConfig {
            outputs: vec![OutputKind::Urls],
            meta: serde_json::Value::Null,
        });
        let accepted = start(State(state.clone())).await;
        assert_eq!(accepted.0["ok"], true);
        assert!(state.started.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_stop_and_reset_cycle_flag() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = state(&dir);

        stop(State(state.clone())).await;
        assert!(state.stop_flag().exists());

        reset(State(state.clone())).await;
        assert!(!state.stop_flag().exists());
    }

    #[tokio::test]
    async fn test_update_reaches_hub() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = state(&dir);

        update(
            State(state.clone()),
            Json(HubUpdate::Bump {
                counter: "urlsFound".to_string(),
                delta: 2,
            }),
        )
        .await;
        assert_eq!(state.hub.total("urlsFound"), 2);
    }

    #[tokio::test]
    async fn test_download_rejects_traversal() {
        let dir = tempfile::TempDir::new().unwrap();
        let state = state(&dir);

        let err = download(
            State(state.clone()),
            Query(DownloadQuery {
                file: "../secrets".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err, StatusCode::FORBIDDEN);

        std::fs::write(dir.path().join("summary.txt"), b"hello").unwrap();
        let body = download(
            State(state),
            Query(DownloadQuery {
                file: "summary.txt".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(body, b"hello");
    }
}
