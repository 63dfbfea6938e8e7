//! Process-local telemetry hub.
//!
//! Workers push tagged updates over the Control Channel's `/update` endpoint;
//! the hub aggregates them and persists an atomic JSON snapshot on a fixed
//! cadence so dashboards and tests can observe state without live RPC.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::fs_atomic;

fn default_delta() -> u64 {
    1
}

/// Wire message for the hub. JSON with a `type` discriminator, one handler
/// per variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HubUpdate {
    Thread {
        worker: usize,
        phase: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        bucket: Option<usize>,
        #[serde(default)]
        idle_cycles: u64,
    },
    Bucket {
        bucket: usize,
        #[serde(default)]
        owner: Option<usize>,
        processed: u64,
        pending: u64,
        #[serde(default)]
        last_url: Option<String>,
    },
    Tree {
        path: String,
    },
    Bump {
        counter: String,
        #[serde(default = "default_delta")]
        delta: u64,
    },
    Step {
        index: usize,
    },
    Mode {
        mode: String,
    },
    Event {
        message: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadRecord {
    /// 1-based display tag; indices stay 0-based internally.
    pub label: String,
    pub phase: String,
    pub url: Option<String>,
    pub bucket: Option<usize>,
    pub idle_cycles: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketRecord {
    pub owner: Option<usize>,
    pub processed: u64,
    pub pending: u64,
    pub last_url: Option<String>,
}

/// Discovered path segments organized by depth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    fn insert(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedEvent {
    pub at_ms: u64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stepper {
    pub steps: Vec<String>,
    pub current: usize,
}

/// Serialized view of the whole hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub mode: String,
    pub stepper: Stepper,
    pub totals: BTreeMap<String, u64>,
    pub threads: BTreeMap<usize, ThreadRecord>,
    pub buckets: BTreeMap<usize, BucketRecord>,
    pub tree: TreeNode,
    pub events: Vec<TimedEvent>,
}

pub struct TelemetryHub {
    mode: RwLock<String>,
    stepper: RwLock<Stepper>,
    totals: DashMap<String, u64>,
    threads: DashMap<usize, ThreadRecord>,
    buckets: DashMap<usize, BucketRecord>,
    tree: Mutex<TreeNode>,
    events: Mutex<VecDeque<TimedEvent>>,
}

impl TelemetryHub {
    pub fn new(steps: Vec<String>) -> Self {
        Self {
            mode: RwLock::new(String::new()),
            stepper: RwLock::new(Stepper { steps, current: 0 }),
            totals: DashMap::new(),
            threads: DashMap::new(),
            buckets: DashMap::new(),
            tree: Mutex::new(TreeNode::default()),
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_default_steps() -> Self {
        Self::new(
            ["seed", "crawl", "merge", "report", "cleanup"]
                .into_iter()
                .map(String::from)
                .collect(),
        )
    }

    pub fn apply(&self, update: HubUpdate) {
        match update {
            HubUpdate::Thread {
                worker,
                phase,
                url,
                bucket,
                idle_cycles,
            } => {
                self.threads.insert(
                    worker,
                    ThreadRecord {
                        label: format!("worker {}", worker + 1),
                        phase,
                        url,
                        bucket,
                        idle_cycles,
                    },
                );
            }
            HubUpdate::Bucket {
                bucket,
                owner,
                processed,
                pending,
                last_url,
            } => {
                self.buckets.insert(
                    bucket,
                    BucketRecord {
                        owner,
                        processed,
                        pending,
                        last_url,
                    },
                );
            }
            HubUpdate::Tree { path } => {
                self.tree.lock().insert(&path);
            }
            HubUpdate::Bump { counter, delta } => {
                *self.totals.entry(counter).or_insert(0) += delta;
            }
            HubUpdate::Step { index } => {
                let mut stepper = self.stepper.write();
                if index < stepper.steps.len() {
                    stepper.current = index;
                }
            }
            HubUpdate::Mode { mode } => {
                *self.mode.write() = mode;
            }
            HubUpdate::Event { message } => {
                let mut events = self.events.lock();
                if events.len() >= Config::EVENT_RING_CAPACITY {
                    events.pop_front();
                }
                events.push_back(TimedEvent {
                    at_ms: now_ms(),
                    message,
                });
            }
        }
    }

    pub fn set_mode(&self, mode: &str) {
        self.apply(HubUpdate::Mode {
            mode: mode.to_string(),
        });
    }

    pub fn set_step(&self, index: usize) {
        self.apply(HubUpdate::Step { index });
    }

    pub fn bump(&self, counter: &str, delta: u64) {
        self.apply(HubUpdate::Bump {
            counter: counter.to_string(),
            delta,
        });
    }

    pub fn event(&self, message: impl Into<String>) {
        self.apply(HubUpdate::Event {
            message: message.into(),
        });
    }

    pub fn total(&self, counter: &str) -> u64 {
        self.totals.get(counter).map(|v| *v).unwrap_or(0)
    }

    /// Smallest consecutive-idle count across all reporting workers, or
    /// `None` until every expected worker has reported at least once.
    pub fn min_worker_idle_cycles(&self, expected_workers: usize) -> Option<u64> {
        if self.threads.len() < expected_workers {
            return None;
        }
        self.threads.iter().map(|r| r.idle_cycles).min()
    }

    /// Clear aggregated state (Reset).
    pub fn reset(&self) {
        *self.mode.write() = String::new();
        self.stepper.write().current = 0;
        self.totals.clear();
        self.threads.clear();
        self.buckets.clear();
        *self.tree.lock() = TreeNode::default();
        self.events.lock().clear();
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            mode: self.mode.read().clone(),
            stepper: self.stepper.read().clone(),
            totals: self
                .totals
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
            threads: self
                .threads
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect(),
            buckets: self
                .buckets
                .iter()
                .map(|e| (*e.key(), e.value().clone()))
                .collect(),
            tree: self.tree.lock().clone(),
            events: self.events.lock().iter().cloned().collect(),
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Persist the snapshot atomically at a fixed cadence until cancelled. One
/// final snapshot is written on the way out.
pub fn spawn_snapshot_task(
    hub: Arc<TelemetryHub>,
    path: PathBuf,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick =
            tokio::time::interval(std::time::Duration::from_millis(Config::SNAPSHOT_TICK_MS));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    persist(&hub, &path).await;
                }
                _ = cancel.cancelled() => {
                    persist(&hub, &path).await;
                    break;
                }
            }
        }
    })
}

async fn persist(hub: &TelemetryHub, path: &std::path::Path) {
    match serde_json::to_vec_pretty(&hub.snapshot()) {
        Ok(bytes) => {
            if let Err(e) = fs_atomic::write_atomic(path, &bytes).await {
                tracing::debug!(error = %e, "snapshot persist failed");
            }
        }
        Err(e) => tracing::debug!(error = %e, "snapshot serialize failed"),
    }
}
