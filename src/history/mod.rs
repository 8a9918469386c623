//! Run history and activity logging.
//!
//! While a run is active a background ticker snapshots progress at a
//! fixed interval; the snapshots, final state, and statistics persist to
//! `history/run_<id>.json` for post-mortems. An append-only activity log
//! (item completions, failures, rate-limit detections) is kept alongside
//! in `history/activity.json`.
//!
//! Restarting the ticker requires a fresh stop signal: `stop_run` cancels
//! the old token and joins the ticker task before a new run may create
//! another, so a stale ticker can never write into a new run.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::HistoryConfig;
use crate::error::Result;
use crate::plan::PlanStatistics;

/// Hard cap on snapshots kept per run (FIFO beyond this).
const MAX_SNAPSHOTS: usize = 10_000;

/// Hard cap on in-memory activity entries (FIFO beyond this).
const MAX_ACTIVITY_ENTRIES: usize = 1_000;

/// One progress observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub progress_percent: f64,
    pub statistics: PlanStatistics,
    pub state: String,
    pub phase: String,
}

/// A persisted run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistory {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub final_state: String,
    pub final_phase: String,
    pub statistics: PlanStatistics,
    pub snapshots: Vec<Snapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Kinds of activity-log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    RunStarted,
    RunCompleted,
    ItemCompleted,
    ItemFailed,
    RateLimitDetected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

struct TickerHandle {
    stop: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// Records progress snapshots and activity for the current run.
pub struct HistoryTracker {
    directory: PathBuf,
    snapshot_interval: Duration,
    retention: usize,
    current: RwLock<Option<RunHistory>>,
    latest: RwLock<Option<(PlanStatistics, String, String)>>,
    activity: RwLock<Vec<ActivityEntry>>,
    next_activity_id: AtomicU64,
    ticker: Mutex<Option<TickerHandle>>,
}

impl HistoryTracker {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            directory: config.directory.clone(),
            snapshot_interval: Duration::from_secs(config.snapshot_interval_seconds.max(1)),
            retention: config.retention,
            current: RwLock::new(None),
            latest: RwLock::new(None),
            activity: RwLock::new(Vec::new()),
            next_activity_id: AtomicU64::new(1),
            ticker: Mutex::new(None),
        }
    }

    /// Open a run record and start the snapshot ticker.
    pub async fn start_run(self: &Arc<Self>, run_id: impl Into<String>) {
        let run_id = run_id.into();
        self.join_ticker().await;

        *self.current.write() = Some(RunHistory {
            run_id: run_id.clone(),
            started_at: Utc::now(),
            completed_at: None,
            final_state: "running".to_string(),
            final_phase: "generate".to_string(),
            statistics: PlanStatistics::default(),
            snapshots: Vec::new(),
            error: None,
        });
        *self.latest.write() = None;

        let stop = CancellationToken::new();
        let ticker_stop = stop.clone();
        let tracker = Arc::clone(self);
        let interval = self.snapshot_interval;
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ticker_stop.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let latest = tracker.latest.read().clone();
                        if let Some((stats, state, phase)) = latest {
                            tracker.add_snapshot(&stats, &state, &phase);
                        }
                    }
                }
            }
        });
        *self.ticker.lock() = Some(TickerHandle { stop, task });

        self.log_activity(ActivityKind::RunStarted, format!("Run {} started", run_id), BTreeMap::new());
    }

    /// Append a snapshot, dropping the oldest past the cap.
    pub fn add_snapshot(&self, statistics: &PlanStatistics, state: &str, phase: &str) {
        let mut guard = self.current.write();
        let Some(run) = guard.as_mut() else {
            return;
        };
        run.snapshots.push(Snapshot {
            timestamp: Utc::now(),
            progress_percent: statistics.progress_percent,
            statistics: statistics.clone(),
            state: state.to_string(),
            phase: phase.to_string(),
        });
        if run.snapshots.len() > MAX_SNAPSHOTS {
            let excess = run.snapshots.len() - MAX_SNAPSHOTS;
            run.snapshots.drain(..excess);
        }
    }

    /// Record the state the ticker will snapshot next.
    pub fn update_progress(&self, statistics: &PlanStatistics, state: &str, phase: &str) {
        *self.latest.write() =
            Some((statistics.clone(), state.to_string(), phase.to_string()));
        if let Some(run) = self.current.write().as_mut() {
            run.statistics = statistics.clone();
            run.final_phase = phase.to_string();
        }
    }

    /// Close the run: stop the ticker, persist, and apply retention.
    pub async fn stop_run(
        &self,
        final_state: &str,
        final_phase: &str,
        statistics: &PlanStatistics,
        error: Option<&str>,
    ) -> Result<()> {
        self.join_ticker().await;

        let run = {
            let mut guard = self.current.write();
            let Some(mut run) = guard.take() else {
                return Ok(());
            };
            run.completed_at = Some(Utc::now());
            run.final_state = final_state.to_string();
            run.final_phase = final_phase.to_string();
            run.statistics = statistics.clone();
            run.error = error.map(str::to_string);
            run
        };

        std::fs::create_dir_all(&self.directory)?;
        let path = self.directory.join(format!("run_{}.json", run.run_id));
        std::fs::write(&path, serde_json::to_string_pretty(&run)?)?;
        tracing::info!(path = %path.display(), "Persisted run history");

        self.log_activity(
            ActivityKind::RunCompleted,
            format!("Run {} finished: {}", run.run_id, final_state),
            BTreeMap::new(),
        );
        self.apply_retention();
        Ok(())
    }

    /// Cancel and join the ticker task, leaving no stale stop signal.
    async fn join_ticker(&self) {
        let handle = self.ticker.lock().take();
        if let Some(handle) = handle {
            handle.stop.cancel();
            if let Err(e) = handle.task.await {
                tracing::warn!(error = %e, "Snapshot ticker panicked");
            }
        }
    }

    /// Delete the oldest run files beyond the retention limit.
    fn apply_retention(&self) {
        if self.retention == 0 {
            return;
        }
        let Ok(entries) = std::fs::read_dir(&self.directory) else {
            return;
        };
        let mut runs: Vec<(DateTime<Utc>, PathBuf)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("run_") || !name.ends_with(".json") {
                continue;
            }
            let Some(started_at) = read_started_at(&path) else {
                continue;
            };
            runs.push((started_at, path));
        }
        if runs.len() <= self.retention {
            return;
        }
        runs.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in runs.split_off(self.retention) {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Retention delete failed");
            } else {
                tracing::debug!(path = %path.display(), "Retention deleted old run");
            }
        }
    }

    // ------------------------------------------------------------------
    // Activity log
    // ------------------------------------------------------------------

    /// Append an activity entry and persist the log (best-effort).
    pub fn log_activity(
        &self,
        kind: ActivityKind,
        message: impl Into<String>,
        details: BTreeMap<String, serde_json::Value>,
    ) {
        let entry = ActivityEntry {
            id: self.next_activity_id.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            kind,
            message: message.into(),
            details,
        };
        let snapshot = {
            let mut activity = self.activity.write();
            activity.push(entry);
            if activity.len() > MAX_ACTIVITY_ENTRIES {
                let excess = activity.len() - MAX_ACTIVITY_ENTRIES;
                activity.drain(..excess);
            }
            activity.clone()
        };
        if let Err(e) = self.persist_activity(&snapshot) {
            tracing::debug!(error = %e, "Activity log persist failed");
        }
    }

    pub fn log_item_completed(&self, item_id: &str, name: &str) {
        let mut details = BTreeMap::new();
        details.insert("item_id".to_string(), serde_json::Value::String(item_id.to_string()));
        self.log_activity(ActivityKind::ItemCompleted, format!("Completed {}", name), details);
    }

    pub fn log_item_failed(&self, item_id: &str, name: &str, error: &str) {
        let mut details = BTreeMap::new();
        details.insert("item_id".to_string(), serde_json::Value::String(item_id.to_string()));
        details.insert("error".to_string(), serde_json::Value::String(error.to_string()));
        self.log_activity(ActivityKind::ItemFailed, format!("Failed {}", name), details);
    }

    pub fn log_rate_limit(&self, origin: &str, seconds: f64) {
        let mut details = BTreeMap::new();
        details.insert("origin".to_string(), serde_json::Value::String(origin.to_string()));
        details.insert("retry_after_seconds".to_string(), seconds.into());
        self.log_activity(
            ActivityKind::RateLimitDetected,
            format!("Rate limited by {}", origin),
            details,
        );
    }

    fn persist_activity(&self, entries: &[ActivityEntry]) -> Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        let path = self.directory.join("activity.json");
        std::fs::write(&path, serde_json::to_string_pretty(entries)?)?;
        Ok(())
    }

    /// Load persisted run summaries, newest first.
    pub fn list_runs(&self) -> Vec<RunHistory> {
        let Ok(entries) = std::fs::read_dir(&self.directory) else {
            return Vec::new();
        };
        let mut runs: Vec<RunHistory> = entries
            .flatten()
            .filter(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.starts_with("run_") && name.ends_with(".json")
            })
            .filter_map(|e| {
                let contents = std::fs::read_to_string(e.path()).ok()?;
                serde_json::from_str(&contents).ok()
            })
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }
}

fn read_started_at(path: &std::path::Path) -> Option<DateTime<Utc>> {
    #[derive(Deserialize)]
    struct StartedAt {
        started_at: DateTime<Utc>,
    }
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str::<StartedAt>(&contents)
        .ok()
        .map(|s| s.started_at)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(dir: &std::path::Path, retention: usize) -> Arc<HistoryTracker> {
        Arc::new(HistoryTracker::new(&HistoryConfig {
            directory: dir.to_path_buf(),
            snapshot_interval_seconds: 1,
            retention,
        }))
    }

    fn stats(completed: usize) -> PlanStatistics {
        PlanStatistics {
            total: 10,
            completed,
            progress_percent: completed as f64 * 10.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_lifecycle_persists_file() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path(), 0);

        tracker.start_run("r1").await;
        tracker.update_progress(&stats(5), "running", "execute");
        tracker.add_snapshot(&stats(5), "running", "execute");
        tracker
            .stop_run("completed", "execute", &stats(10), None)
            .await
            .unwrap();

        let path = dir.path().join("run_r1.json");
        assert!(path.exists());
        let run: RunHistory =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(run.run_id, "r1");
        assert_eq!(run.final_state, "completed");
        assert!(run.completed_at.is_some());
        assert_eq!(run.snapshots.len(), 1);
        assert_eq!(run.statistics.completed, 10);
    }

    #[tokio::test]
    async fn test_ticker_restart_after_stop() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path(), 0);

        // Two full cycles must not panic or leak a stale ticker.
        tracker.start_run("r1").await;
        tracker.stop_run("completed", "execute", &stats(1), None).await.unwrap();
        tracker.start_run("r2").await;
        tracker.stop_run("cancelled", "execute", &stats(2), Some("ctrl-c")).await.unwrap();

        assert!(dir.path().join("run_r1.json").exists());
        assert!(dir.path().join("run_r2.json").exists());
        let runs = tracker.list_runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "r2");
        assert_eq!(runs[0].error.as_deref(), Some("ctrl-c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_snapshots_latest_progress() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path(), 0);

        tracker.start_run("r1").await;
        tracker.update_progress(&stats(3), "running", "execute");
        // Let a few ticks elapse on the paused clock.
        tokio::time::sleep(Duration::from_secs(3)).await;
        tracker.stop_run("completed", "execute", &stats(10), None).await.unwrap();

        let runs = tracker.list_runs();
        assert!(!runs[0].snapshots.is_empty());
        assert_eq!(runs[0].snapshots[0].statistics.completed, 3);
    }

    #[tokio::test]
    async fn test_snapshot_cap_is_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path(), 0);
        tracker.start_run("r1").await;

        for i in 0..(MAX_SNAPSHOTS + 5) {
            tracker.add_snapshot(&stats(i % 10), "running", "execute");
        }
        let guard = tracker.current.read();
        let run = guard.as_ref().unwrap();
        assert_eq!(run.snapshots.len(), MAX_SNAPSHOTS);
        // The first five snapshots were dropped.
        assert_eq!(run.snapshots[0].statistics.completed, 5 % 10);
        drop(guard);
        tracker.stop_run("completed", "execute", &stats(1), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_retention_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path(), 2);

        for id in ["a", "b", "c"] {
            tracker.start_run(id).await;
            tracker.stop_run("completed", "execute", &stats(1), None).await.unwrap();
            // Distinct started_at stamps.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let runs = tracker.list_runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].run_id, "c");
        assert_eq!(runs[1].run_id, "b");
        assert!(!dir.path().join("run_a.json").exists());
    }

    #[tokio::test]
    async fn test_activity_log_caps_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(dir.path(), 0);

        for i in 0..(MAX_ACTIVITY_ENTRIES + 10) {
            tracker.log_item_completed(&format!("track:spotify:{}", i), "Track");
        }
        assert_eq!(tracker.activity.read().len(), MAX_ACTIVITY_ENTRIES);

        let persisted: Vec<ActivityEntry> = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("activity.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(persisted.len(), MAX_ACTIVITY_ENTRIES);
        // FIFO: the oldest ten entries are gone.
        assert_eq!(persisted[0].id, 11);
    }
}
