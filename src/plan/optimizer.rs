//! Plan optimization: dedup by track identity, reorder for locality.
//!
//! Both passes are deterministic for a given input plan, so optimizing the
//! same plan twice yields the same result.

use std::collections::HashMap;

use super::{meta_keys, Plan};
use crate::config::FeaturesConfig;

/// Dedup + reorder, gated by the feature flags.
pub fn optimize(plan: &mut Plan, features: &FeaturesConfig) {
    if !features.optimize_plan {
        return;
    }
    let removed = dedup(plan);
    reorder(plan);
    plan.compute_statistics();
    if removed > 0 {
        tracing::info!(removed, "Optimizer removed duplicate tracks");
    }
}

/// Remove track items sharing a fingerprint, keeping the first encountered.
///
/// Dependencies and parent links of the removed duplicates are redirected
/// to the survivor, so containers still settle correctly. Returns the
/// number of items removed.
pub fn dedup(plan: &mut Plan) -> usize {
    let mut survivor_by_fingerprint: HashMap<String, String> = HashMap::new();
    // dup id -> survivor id
    let mut redirects: HashMap<String, String> = HashMap::new();

    for item in &plan.items {
        if !item.is_track() || item.fingerprint.is_empty() {
            continue;
        }
        match survivor_by_fingerprint.get(&item.fingerprint) {
            None => {
                survivor_by_fingerprint.insert(item.fingerprint.clone(), item.id.clone());
            }
            Some(survivor) => {
                redirects.insert(item.id.clone(), survivor.clone());
            }
        }
    }
    if redirects.is_empty() {
        return 0;
    }

    // Merge the duplicates' parent links into their survivors.
    let mut inherited_parents: HashMap<String, Vec<String>> = HashMap::new();
    for item in &plan.items {
        if let Some(survivor) = redirects.get(&item.id) {
            inherited_parents
                .entry(survivor.clone())
                .or_default()
                .extend(item.parent_ids.iter().cloned());
        }
    }

    plan.items.retain(|item| !redirects.contains_key(&item.id));

    for item in &mut plan.items {
        if let Some(parents) = inherited_parents.get(&item.id) {
            item.parent_ids.extend(parents.iter().cloned());
        }
        if item.dependencies.iter().any(|d| redirects.contains_key(d)) {
            item.dependencies = item
                .dependencies
                .iter()
                .map(|d| redirects.get(d).unwrap_or(d).clone())
                .collect();
        }
    }
    redirects.len()
}

/// Stable-sort track items by `(album_id, disc, track)` for cache locality.
///
/// Non-track items keep their positions; only the track slots are
/// rewritten, so container/child interleaving is preserved.
pub fn reorder(plan: &mut Plan) {
    let track_slots: Vec<usize> = plan
        .items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.is_track())
        .map(|(i, _)| i)
        .collect();

    let mut tracks: Vec<_> = track_slots
        .iter()
        .map(|&i| plan.items[i].clone())
        .collect();
    tracks.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));

    for (slot, track) in track_slots.into_iter().zip(tracks) {
        plan.items[slot] = track;
    }
}

fn sort_key(item: &super::PlanItem) -> (String, u32, u32) {
    (
        item.meta_str(meta_keys::ALBUM_ID).unwrap_or("").to_string(),
        item.meta_u32(meta_keys::DISC_NUMBER).unwrap_or(1),
        item.meta_u32(meta_keys::TRACK_NUMBER).unwrap_or(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ItemKind, PlanItem};

    fn track(id: &str, fingerprint: &str) -> PlanItem {
        let mut item = PlanItem::new(ItemKind::Track, "spotify", id, id);
        item.fingerprint = fingerprint.to_string();
        item
    }

    fn track_in_album(id: &str, album: &str, disc: u32, number: u32) -> PlanItem {
        let mut item = track(id, &format!("fp-{}", id));
        item.metadata
            .insert(meta_keys::ALBUM_ID.to_string(), album.into());
        item.metadata
            .insert(meta_keys::DISC_NUMBER.to_string(), disc.into());
        item.metadata
            .insert(meta_keys::TRACK_NUMBER.to_string(), number.into());
        item
    }

    #[test]
    fn test_dedup_keeps_first_and_redirects_dependencies() {
        let mut plan = Plan::new("hash");
        let mut first = track("t1", "same");
        first.parent_ids.insert("album:spotify:al1".to_string());
        plan.upsert(first);

        let mut dup = track("t2", "same");
        dup.parent_ids.insert("playlist:spotify:pl1".to_string());
        plan.upsert(dup);

        let mut playlist = PlanItem::new(ItemKind::Playlist, "spotify", "pl1", "Mix");
        playlist.dependencies.insert("track:spotify:t2".to_string());
        plan.upsert(playlist);

        let removed = dedup(&mut plan);
        assert_eq!(removed, 1);
        assert!(plan.get("track:spotify:t2").is_none());

        let survivor = plan.get("track:spotify:t1").unwrap();
        assert!(survivor.parent_ids.contains("playlist:spotify:pl1"));
        assert!(survivor.parent_ids.contains("album:spotify:al1"));

        let playlist = plan.get("playlist:spotify:pl1").unwrap();
        assert!(playlist.dependencies.contains("track:spotify:t1"));
        assert!(!playlist.dependencies.contains("track:spotify:t2"));
    }

    #[test]
    fn test_dedup_distinct_fingerprints_untouched() {
        let mut plan = Plan::new("hash");
        plan.upsert(track("t1", "fp-a"));
        plan.upsert(track("t2", "fp-b"));
        assert_eq!(dedup(&mut plan), 0);
        assert_eq!(plan.items.len(), 2);
    }

    #[test]
    fn test_reorder_groups_by_album_then_disc_then_track() {
        let mut plan = Plan::new("hash");
        plan.upsert(track_in_album("t1", "al2", 1, 2));
        plan.upsert(track_in_album("t2", "al1", 2, 1));
        plan.upsert(track_in_album("t3", "al1", 1, 5));
        plan.upsert(track_in_album("t4", "al1", 1, 1));
        reorder(&mut plan);

        let order: Vec<&str> = plan.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "track:spotify:t4",
                "track:spotify:t3",
                "track:spotify:t2",
                "track:spotify:t1",
            ]
        );
    }

    #[test]
    fn test_reorder_leaves_containers_in_place() {
        let mut plan = Plan::new("hash");
        plan.upsert(track_in_album("t1", "al2", 1, 1));
        plan.upsert(PlanItem::new(ItemKind::Album, "spotify", "al1", "Album"));
        plan.upsert(track_in_album("t2", "al1", 1, 1));
        reorder(&mut plan);

        assert_eq!(plan.items[1].id, "album:spotify:al1");
        assert_eq!(plan.items[0].id, "track:spotify:t2");
        assert_eq!(plan.items[2].id, "track:spotify:t1");
    }

    #[test]
    fn test_optimize_is_deterministic() {
        let build = || {
            let mut plan = Plan::new("hash");
            plan.upsert(track_in_album("t1", "al2", 1, 1));
            plan.upsert(track_in_album("t2", "al1", 1, 2));
            plan.upsert(track("t3", "fp-t2"));
            plan
        };
        let features = FeaturesConfig::default();

        let mut once = build();
        optimize(&mut once, &features);
        let mut twice = build();
        optimize(&mut twice, &features);
        optimize(&mut twice, &features);

        let ids = |p: &Plan| p.items.iter().map(|i| i.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&once), ids(&twice));
    }

    #[test]
    fn test_optimize_respects_feature_flag() {
        let mut plan = Plan::new("hash");
        plan.upsert(track("t1", "same"));
        plan.upsert(track("t2", "same"));
        let features = FeaturesConfig {
            optimize_plan: false,
            ..Default::default()
        };
        optimize(&mut plan, &features);
        assert_eq!(plan.items.len(), 2);
    }
}
