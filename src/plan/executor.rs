//! Plan execution: a bounded worker pool over dispatchable track items.
//!
//! Workers run [`TrackDownloader::download_track`] and report through a
//! single result channel; the executor loop is the only writer of item
//! status, so plan mutation is serialized without a lock. Containers are
//! never dispatched; they settle once their children reach terminal
//! states.
//!
//! Cancellation stops new dispatches, lets in-flight workers observe the
//! token and return, moves interrupted items back to `pending`, and
//! persists the plan when persistence is configured.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ItemStatus, Plan, PlanStatistics};
use crate::downloader::{DownloadOutcome, OutcomeKind, TrackDownloader};
use crate::error::{Error, Result};
use crate::history::HistoryTracker;

/// Progress observer invoked after every settled item.
pub type ProgressFn = Arc<dyn Fn(&PlanStatistics) + Send + Sync>;

pub struct PlanExecutor {
    downloader: Arc<TrackDownloader>,
    threads: usize,
    allow_partial_containers: bool,
    persist_path: Option<PathBuf>,
    history: Option<Arc<HistoryTracker>>,
    progress: Option<ProgressFn>,
}

impl PlanExecutor {
    pub fn new(downloader: Arc<TrackDownloader>, threads: usize) -> Self {
        Self {
            downloader,
            threads: threads.clamp(1, 16),
            allow_partial_containers: true,
            persist_path: None,
            history: None,
            progress: None,
        }
    }

    /// Mark containers failed when any child failed.
    pub fn with_strict_containers(mut self) -> Self {
        self.allow_partial_containers = false;
        self
    }

    /// Save the plan after completion or cancellation.
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    pub fn with_history(mut self, history: Arc<HistoryTracker>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run the plan to completion (or cancellation).
    pub async fn execute(
        &self,
        plan: &mut Plan,
        cancel: &CancellationToken,
    ) -> Result<PlanStatistics> {
        plan.reset_in_progress();
        settle_containers(plan, self.allow_partial_containers);
        plan.compute_statistics();

        let (tx, mut rx) = mpsc::channel::<(usize, Result<DownloadOutcome>)>(self.threads);
        let mut in_flight = 0usize;

        loop {
            if !cancel.is_cancelled() {
                while in_flight < self.threads {
                    let Some(idx) = next_dispatchable(plan) else {
                        break;
                    };
                    plan.items[idx].status = ItemStatus::InProgress;
                    tracing::debug!(item = %plan.items[idx].id, "Dispatching");

                    let item = plan.items[idx].clone();
                    let downloader = Arc::clone(&self.downloader);
                    let tx = tx.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        let result = downloader.download_track(&item, &cancel).await;
                        // The receiver only drops when the loop is done, so
                        // a failed send just means shutdown is underway.
                        let _ = tx.send((idx, result)).await;
                    });
                    in_flight += 1;
                }
            }

            if in_flight == 0 {
                break;
            }
            let Some((idx, result)) = rx.recv().await else {
                break;
            };
            in_flight -= 1;

            self.apply_result(plan, idx, result);
            settle_containers(plan, self.allow_partial_containers);
            plan.compute_statistics();
            self.report_progress(plan);
        }

        if cancel.is_cancelled() {
            plan.reset_in_progress();
        }
        settle_containers(plan, self.allow_partial_containers);
        plan.compute_statistics();

        if let Some(path) = &self.persist_path
            && let Err(e) = plan.save(path)
        {
            tracing::error!(path = %path.display(), error = %e, "Failed to persist plan");
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(plan.statistics.clone())
    }

    /// Apply one worker outcome; the single point of status mutation.
    fn apply_result(&self, plan: &mut Plan, idx: usize, result: Result<DownloadOutcome>) {
        let item = &mut plan.items[idx];
        match result {
            Ok(outcome) => {
                item.attempts += outcome.attempts;
                item.output_path = Some(outcome.path.clone());
                item.last_error = None;
                item.status = match outcome.kind {
                    OutcomeKind::AlreadyDownloaded => ItemStatus::Skipped,
                    _ => ItemStatus::Completed,
                };
                tracing::info!(item = %item.id, path = %outcome.path.display(), "Item completed");
                if let Some(history) = &self.history {
                    history.log_item_completed(&item.id, &item.name);
                }
            }
            Err(Error::Cancelled) => {
                item.status = ItemStatus::Pending;
                tracing::debug!(item = %item.id, "Worker cancelled, item back to pending");
            }
            Err(e) => {
                item.attempts += 1;
                item.status = ItemStatus::Failed;
                item.last_error = Some(e.to_string());
                tracing::error!(item = %item.id, error = %e, "Item failed");
                if let Some(history) = &self.history {
                    history.log_item_failed(&item.id, &item.name, &e.to_string());
                }
            }
        }
    }

    fn report_progress(&self, plan: &Plan) {
        if let Some(progress) = &self.progress {
            progress(&plan.statistics);
        }
        if let Some(history) = &self.history {
            history.update_progress(&plan.statistics, "running", "execute");
        }
    }
}

/// Index of the next pending track whose dependencies are all terminal.
fn next_dispatchable(plan: &Plan) -> Option<usize> {
    let terminal: std::collections::HashSet<&str> = plan
        .items
        .iter()
        .filter(|i| i.status.is_terminal())
        .map(|i| i.id.as_str())
        .collect();

    plan.items.iter().position(|item| {
        item.is_track()
            && item.status == ItemStatus::Pending
            && item
                .dependencies
                .iter()
                .all(|dep| terminal.contains(dep.as_str()))
    })
}

/// Settle containers whose children have all reached terminal states.
///
/// Runs to fixpoint so nested containers (artist → album → track) cascade
/// in one pass. With partial success allowed a container completes even
/// when some children failed; otherwise any failed child fails it.
fn settle_containers(plan: &mut Plan, allow_partial: bool) {
    loop {
        let status_of: std::collections::HashMap<String, ItemStatus> = plan
            .items
            .iter()
            .map(|i| (i.id.clone(), i.status))
            .collect();

        let mut changed = false;
        for item in &mut plan.items {
            if !item.is_container() || item.status.is_terminal() {
                continue;
            }
            let deps: Vec<ItemStatus> = item
                .dependencies
                .iter()
                .filter_map(|d| status_of.get(d).copied())
                .collect();
            if !deps.iter().all(|s| s.is_terminal()) {
                continue;
            }
            let any_failed = deps.iter().any(|s| *s == ItemStatus::Failed);
            item.status = if any_failed && !allow_partial {
                ItemStatus::Failed
            } else {
                ItemStatus::Completed
            };
            tracing::debug!(item = %item.id, status = ?item.status, "Container settled");
            changed = true;
        }
        if !changed {
            break;
        }
    }
}
