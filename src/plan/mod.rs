//! The acquisition plan: a persisted, dependency-linked set of work items.
//!
//! A plan is produced by the generator, optionally rewritten by the
//! optimizer, and consumed by the executor. Items reference each other by
//! ID only (container → child dependencies form a DAG); traversal is by
//! lookup, never by pointer.
//!
//! Status lifecycle:
//!
//! ```text
//! pending ──dispatch──▶ in_progress ──ok────▶ completed
//!                                    └─err──▶ failed
//! pending ──skip──────▶ skipped   (a prior run already produced the file)
//! ```
//!
//! `completed`, `failed`, and `skipped` are terminal for the run.

pub mod executor;
pub mod generator;
pub mod m3u;
pub mod optimizer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Plan file format version.
pub const PLAN_VERSION: &str = "1";

/// Metadata bag keys recognized across the pipeline.
pub mod meta_keys {
    /// Pre-fetched video metadata for direct audio items
    pub const YOUTUBE_METADATA: &str = "youtube_metadata";
    /// Metadata-service record attached to a direct audio item
    pub const SPOTIFY_ENHANCEMENT: &str = "spotify_enhancement";
    pub const ARTIST: &str = "artist";
    pub const ALBUM: &str = "album";
    pub const ALBUM_ID: &str = "album_id";
    pub const ALBUM_ARTIST: &str = "album_artist";
    pub const TRACK_NUMBER: &str = "track_number";
    pub const DISC_NUMBER: &str = "disc_number";
    pub const YEAR: &str = "year";
    pub const COVER_URL: &str = "cover_url";
    pub const TOTAL_TRACKS: &str = "total_tracks";
    /// Playlist containers: emit an .m3u sidecar after execution
    pub const CREATE_M3U: &str = "create_m3u";
}

/// What a plan item is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Track,
    Album,
    Playlist,
    Artist,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Album => "album",
            Self::Playlist => "playlist",
            Self::Artist => "artist",
        }
    }
}

/// Where an item is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl ItemStatus {
    /// Terminal states are final for the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// One unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    /// Stable identifier: `{kind}:{origin}:{external_id}`
    pub id: String,
    pub kind: ItemKind,
    /// Human label
    pub name: String,
    /// Metadata-service URL, when the item resolves through the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Direct audio URL, when the item bypasses the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Containers this item belongs to
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub parent_ids: BTreeSet<String>,
    /// Items that must reach a terminal state before this one settles
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub dependencies: BTreeSet<String>,
    pub status: ItemStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Identity for dedup (normalized artist + title + external id)
    pub fingerprint: String,
    /// Opaque handoff bag between generator and downloader
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl PlanItem {
    pub fn new(
        kind: ItemKind,
        origin: &str,
        external_id: &str,
        name: impl Into<String>,
    ) -> Self {
        let id = format!("{}:{}:{}", kind.as_str(), origin, external_id);
        Self {
            id,
            kind,
            name: name.into(),
            source_url: None,
            audio_url: None,
            parent_ids: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            status: ItemStatus::Pending,
            output_path: None,
            attempts: 0,
            last_error: None,
            fingerprint: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn is_track(&self) -> bool {
        self.kind == ItemKind::Track
    }

    pub fn is_container(&self) -> bool {
        !self.is_track()
    }

    /// Read a string value from the metadata bag.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Read an integer value from the metadata bag.
    pub fn meta_u32(&self, key: &str) -> Option<u32> {
        self.metadata.get(key).and_then(|v| v.as_u64()).map(|v| v as u32)
    }
}

/// Counts by status, plus overall progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanStatistics {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub progress_percent: f64,
}

/// A full run description: items plus identity and bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub version: String,
    pub created_at: DateTime<Utc>,
    /// Hash of the config this plan was generated under
    pub config_hash: String,
    pub items: Vec<PlanItem>,
    #[serde(default)]
    pub statistics: PlanStatistics,
}

impl Plan {
    pub fn new(config_hash: impl Into<String>) -> Self {
        Self {
            version: PLAN_VERSION.to_string(),
            created_at: Utc::now(),
            config_hash: config_hash.into(),
            items: Vec::new(),
            statistics: PlanStatistics::default(),
        }
    }

    /// Add an item, merging parents/dependencies if the ID already exists.
    pub fn upsert(&mut self, item: PlanItem) {
        if let Some(existing) = self.items.iter_mut().find(|i| i.id == item.id) {
            existing.parent_ids.extend(item.parent_ids);
            existing.dependencies.extend(item.dependencies);
            for (key, value) in item.metadata {
                existing.metadata.entry(key).or_insert(value);
            }
        } else {
            self.items.push(item);
        }
    }

    pub fn get(&self, id: &str) -> Option<&PlanItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Recompute the counts-by-status block.
    ///
    /// Progress is completed over everything that will ever settle.
    pub fn compute_statistics(&mut self) {
        let mut stats = PlanStatistics {
            total: self.items.len(),
            ..Default::default()
        };
        for item in &self.items {
            match item.status {
                ItemStatus::Pending => stats.pending += 1,
                ItemStatus::InProgress => stats.in_progress += 1,
                ItemStatus::Completed => stats.completed += 1,
                ItemStatus::Failed => stats.failed += 1,
                ItemStatus::Skipped => stats.skipped += 1,
            }
        }
        stats.progress_percent = if stats.total == 0 {
            0.0
        } else {
            stats.completed as f64 / stats.total as f64 * 100.0
        };
        self.statistics = stats;
    }

    /// Verify the dependency graph is acyclic and references are known.
    pub fn validate_dag(&self) -> Result<()> {
        let index: HashMap<&str, usize> = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id.as_str(), i))
            .collect();

        for item in &self.items {
            for dep in &item.dependencies {
                if !index.contains_key(dep.as_str()) {
                    return Err(Error::upstream(format!(
                        "plan item {} depends on unknown item {}",
                        item.id, dep
                    )));
                }
            }
        }

        // Iterative three-color DFS over dependency edges.
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }
        let mut marks = vec![Mark::White; self.items.len()];
        for start in 0..self.items.len() {
            if marks[start] != Mark::White {
                continue;
            }
            let mut stack = vec![(start, false)];
            while let Some((node, children_done)) = stack.pop() {
                if children_done {
                    marks[node] = Mark::Black;
                    continue;
                }
                if marks[node] == Mark::Black {
                    continue;
                }
                marks[node] = Mark::Gray;
                stack.push((node, true));
                for dep in &self.items[node].dependencies {
                    let next = index[dep.as_str()];
                    match marks[next] {
                        Mark::Gray => {
                            return Err(Error::upstream(format!(
                                "plan contains a dependency cycle through {}",
                                self.items[next].id
                            )));
                        }
                        Mark::White => stack.push((next, false)),
                        Mark::Black => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Move any `in_progress` item back to `pending` (resume after a stop).
    pub fn reset_in_progress(&mut self) {
        for item in &mut self.items {
            if item.status == ItemStatus::InProgress {
                item.status = ItemStatus::Pending;
            }
        }
    }

    /// Whether this plan was generated under a different config.
    pub fn is_stale(&self, config_hash: &str) -> bool {
        self.config_hash != config_hash
    }

    /// Atomic write: temp file, fsync, rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let temp_path = path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&temp_path)?;
            let json = serde_json::to_string_pretty(self)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&temp_path, path)?;
        tracing::debug!(path = %path.display(), items = self.items.len(), "Saved plan");
        Ok(())
    }

    /// Load, validate, and recompute statistics.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut plan: Plan = serde_json::from_str(&contents)?;
        plan.validate_dag()?;
        plan.compute_statistics();
        Ok(plan)
    }
}
