//! .m3u sidecar generation for flagged playlists.
//!
//! After execution, each playlist container whose source requested a
//! sidecar gets an `#EXTM3U` file listing the resolved output paths of its
//! completed children, in plan order.

use std::path::{Path, PathBuf};

use super::{meta_keys, ItemKind, Plan};
use crate::downloader::template::sanitize_component;
use crate::error::Result;

/// Write sidecars for every flagged playlist; returns the files written.
pub fn write_sidecars(plan: &Plan, directory: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for container in &plan.items {
        if container.kind != ItemKind::Playlist {
            continue;
        }
        if container.metadata.get(meta_keys::CREATE_M3U) != Some(&serde_json::Value::Bool(true)) {
            continue;
        }

        let entries: Vec<&Path> = plan
            .items
            .iter()
            .filter(|item| item.is_track() && item.parent_ids.contains(&container.id))
            .filter_map(|item| item.output_path.as_deref())
            .collect();
        if entries.is_empty() {
            tracing::warn!(playlist = %container.name, "No completed tracks, skipping sidecar");
            continue;
        }

        let mut contents = String::from("#EXTM3U\n");
        for path in &entries {
            contents.push_str(&path.display().to_string());
            contents.push('\n');
        }

        std::fs::create_dir_all(directory)?;
        let path = directory.join(format!("{}.m3u", sanitize_component(&container.name)));
        std::fs::write(&path, contents)?;
        tracing::info!(path = %path.display(), tracks = entries.len(), "Wrote playlist sidecar");
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ItemStatus, PlanItem};

    #[test]
    fn test_sidecar_written_for_flagged_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = Plan::new("hash");

        let mut container = PlanItem::new(ItemKind::Playlist, "spotify", "pl1", "My Mix");
        container
            .metadata
            .insert(meta_keys::CREATE_M3U.to_string(), serde_json::Value::Bool(true));
        let mut t1 = PlanItem::new(ItemKind::Track, "spotify", "t1", "One");
        t1.parent_ids.insert(container.id.clone());
        t1.status = ItemStatus::Completed;
        t1.output_path = Some(PathBuf::from("music/A/One.mp3"));
        let mut t2 = PlanItem::new(ItemKind::Track, "spotify", "t2", "Two");
        t2.parent_ids.insert(container.id.clone());
        t2.status = ItemStatus::Failed;
        plan.upsert(t1);
        plan.upsert(t2);
        plan.upsert(container);

        let written = write_sidecars(&plan, dir.path()).unwrap();
        assert_eq!(written.len(), 1);
        let contents = std::fs::read_to_string(&written[0]).unwrap();
        assert!(contents.starts_with("#EXTM3U\n"));
        assert!(contents.contains("music/A/One.mp3"));
        // Failed track has no output path and is absent.
        assert!(!contents.contains("Two"));
    }

    #[test]
    fn test_unflagged_playlist_gets_no_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = Plan::new("hash");
        plan.upsert(PlanItem::new(ItemKind::Playlist, "spotify", "pl1", "Mix"));
        let written = write_sidecars(&plan, dir.path()).unwrap();
        assert!(written.is_empty());
    }

    #[test]
    fn test_sidecar_name_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = Plan::new("hash");
        let mut container = PlanItem::new(ItemKind::Playlist, "spotify", "pl1", "Mix: A/B");
        container
            .metadata
            .insert(meta_keys::CREATE_M3U.to_string(), serde_json::Value::Bool(true));
        let mut t1 = PlanItem::new(ItemKind::Track, "spotify", "t1", "One");
        t1.parent_ids.insert(container.id.clone());
        t1.output_path = Some(PathBuf::from("music/One.mp3"));
        plan.upsert(t1);
        plan.upsert(container);

        let written = write_sidecars(&plan, dir.path()).unwrap();
        let name = written[0].file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name, "Mix_ A_B.m3u");
    }
}
