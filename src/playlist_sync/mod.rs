//! Playlist Sync Pipeline (C8).
//!
//! Shared by public-playlist-URL sources and curated recommender playlists.
//! Grounded on `original_source/commands/playlist_sync.py` (full/additive
//! sync) and `playlist_sync_listenbrainz_curated.py` (pre-sync dedup,
//! retention pruning by playlist kind).

use crate::library_cache::LibrarySnapshot;
use crate::service_client::{MediaServerClient, PlaylistSource};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Additive,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub action: String,
    pub total_tracks: usize,
    pub matched_tracks: usize,
    pub added_tracks: usize,
    pub unmatched: Vec<String>,
}

/// Pre-sync validation: for playlists sharing a name, keep the one with the
/// most tracks and delete the rest; delete any that are empty.
pub async fn validate_existing_playlists(
    target: &dyn MediaServerClient,
    prefix: &str,
    playlist_names: &[(String, String)],
) -> anyhow::Result<()> {
    let mut by_name: std::collections::HashMap<String, Vec<(String, usize)>> = std::collections::HashMap::new();
    for (id, name) in playlist_names {
        if !name.starts_with(prefix) {
            continue;
        }
        let tracks = target.get_playlist_tracks(id).await?;
        by_name.entry(name.clone()).or_default().push((id.clone(), tracks.len()));
    }

    for (_name, mut members) in by_name {
        if members.len() > 1 {
            members.sort_by(|a, b| b.1.cmp(&a.1));
            for (id, _count) in members.iter().skip(1) {
                target.delete_playlist(id).await?;
            }
        }
        if let Some((id, count)) = members.first() {
            if *count == 0 {
                target.delete_playlist(id).await?;
            }
        }
    }
    Ok(())
}

fn resolve_tracks(
    snapshot: &LibrarySnapshot,
    tracks: &[crate::service_client::PlaylistTrack],
) -> (Vec<String>, Vec<String>) {
    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for track in tracks {
        let album = if track.album.is_empty() { None } else { Some(track.album.as_str()) };
        match snapshot.search(&track.track, &track.artist, album) {
            Some(m) => matched.push(snapshot.tracks[m.track_index].id.clone()),
            None => unmatched.push(format!("{} - {}", track.artist, track.track)),
        }
    }
    (matched, unmatched)
}

pub async fn sync_playlist(
    target: &dyn MediaServerClient,
    source: &dyn PlaylistSource,
    snapshot: &LibrarySnapshot,
    url: &str,
    playlist_title: &str,
    summary: &str,
    mode: SyncMode,
    cleanup_empty: bool,
    prune_additive: bool,
) -> anyhow::Result<SyncResult> {
    let tracks = source.playlist_tracks(url).await?;
    let (matched_ids, unmatched) = resolve_tracks(snapshot, &tracks);

    if matched_ids.is_empty() && cleanup_empty {
        return Ok(SyncResult {
            action: "skipped_empty".into(),
            total_tracks: tracks.len(),
            matched_tracks: 0,
            added_tracks: 0,
            unmatched,
        });
    }

    match mode {
        SyncMode::Full => sync_full(target, playlist_title, &matched_ids, summary, tracks.len(), unmatched).await,
        SyncMode::Additive => {
            sync_additive(target, playlist_title, &matched_ids, summary, tracks.len(), unmatched, prune_additive).await
        }
    }
}

async fn create_hybrid(target: &dyn MediaServerClient, title: &str, ids: &[String], summary: &str) -> anyhow::Result<String> {
    let (first, rest) = ids.split_first().expect("caller checked matched_ids is non-empty");
    let playlist_id = target.create_playlist(title, std::slice::from_ref(first), summary).await?;
    for id in rest {
        target.add_tracks(&playlist_id, std::slice::from_ref(id)).await?;
    }
    Ok(playlist_id)
}

async fn sync_full(
    target: &dyn MediaServerClient,
    title: &str,
    matched_ids: &[String],
    summary: &str,
    total_tracks: usize,
    unmatched: Vec<String>,
) -> anyhow::Result<SyncResult> {
    if let Some(existing_id) = target.find_playlist_by_name(title).await? {
        let existing_tracks = target.get_playlist_tracks(&existing_id).await?;
        let existing_set: HashSet<_> = existing_tracks.into_iter().collect();
        let desired_set: HashSet<_> = matched_ids.iter().cloned().collect();
        if existing_set == desired_set {
            return Ok(SyncResult {
                action: "unchanged".into(),
                total_tracks,
                matched_tracks: matched_ids.len(),
                added_tracks: 0,
                unmatched,
            });
        }
        target.delete_playlist(&existing_id).await?;
    }

    if matched_ids.is_empty() {
        return Ok(SyncResult {
            action: "skipped_empty".into(),
            total_tracks,
            matched_tracks: 0,
            added_tracks: 0,
            unmatched,
        });
    }

    create_hybrid(target, title, matched_ids, summary).await?;
    Ok(SyncResult { action: "full_sync".into(), total_tracks, matched_tracks: matched_ids.len(), added_tracks: matched_ids.len(), unmatched })
}

/// Additive sync only adds tracks newly present in the source by default —
/// tracks that vanished from the source stay on the target playlist. Per
/// §9's open question, pruning them is opt-in via `prune_additive` (default
/// `false`, matching the reference implementation's current behaviour).
async fn sync_additive(
    target: &dyn MediaServerClient,
    title: &str,
    matched_ids: &[String],
    summary: &str,
    total_tracks: usize,
    unmatched: Vec<String>,
    prune_additive: bool,
) -> anyhow::Result<SyncResult> {
    let Some(existing_id) = target.find_playlist_by_name(title).await? else {
        return sync_full(target, title, matched_ids, summary, total_tracks, unmatched).await;
    };

    let existing_tracks = target.get_playlist_tracks(&existing_id).await?;
    let existing_set: HashSet<_> = existing_tracks.iter().cloned().collect();
    let desired_set: HashSet<&String> = matched_ids.iter().collect();
    let to_add: Vec<String> = matched_ids.iter().filter(|id| !existing_set.contains(*id)).cloned().collect();
    let to_remove: Vec<String> =
        if prune_additive { existing_tracks.iter().filter(|id| !desired_set.contains(id)).cloned().collect() } else { Vec::new() };

    if to_add.is_empty() && to_remove.is_empty() {
        return Ok(SyncResult {
            action: "unchanged".into(),
            total_tracks,
            matched_tracks: existing_tracks.len(),
            added_tracks: 0,
            unmatched,
        });
    }

    for id in &to_add {
        target.add_tracks(&existing_id, std::slice::from_ref(id)).await?;
    }

    if !to_remove.is_empty() {
        // No per-track removal primitive in MediaServerClient; pruning
        // recreates the playlist from the desired set instead.
        target.delete_playlist(&existing_id).await?;
        if !matched_ids.is_empty() {
            create_hybrid(target, title, matched_ids, summary).await?;
        }
    }

    Ok(SyncResult {
        action: "additive_sync".into(),
        total_tracks,
        matched_tracks: existing_tracks.len() + to_add.len() - to_remove.len(),
        added_tracks: to_add.len(),
        unmatched,
    })
}

/// Retention pruning: for a playlist kind, keep the `keep_count` most
/// recent playlists (by embedded date) and delete the rest.
pub async fn prune_retention(
    target: &dyn MediaServerClient,
    kind_playlists: &[(String, chrono::NaiveDate)],
    keep_count: usize,
) -> anyhow::Result<usize> {
    let mut sorted = kind_playlists.to_vec();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));
    let mut deleted = 0;
    for (id, _date) in sorted.into_iter().skip(keep_count) {
        target.delete_playlist(&id).await?;
        deleted += 1;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library_cache::Track;

    #[test]
    fn resolve_tracks_splits_matched_and_unmatched() {
        let tracks = vec![Track::new("1", "Song A", "Artist A", "Album A", 180)];
        let snapshot = LibrarySnapshot::build("lib", tracks, 0);
        let playlist_tracks = vec![
            crate::service_client::PlaylistTrack { artist: "Artist A".into(), album: "Album A".into(), track: "Song A".into() },
            crate::service_client::PlaylistTrack { artist: "Nobody".into(), album: "".into(), track: "Nothing".into() },
        ];
        let (matched, unmatched) = resolve_tracks(&snapshot, &playlist_tracks);
        assert_eq!(matched, vec!["1".to_string()]);
        assert_eq!(unmatched.len(), 1);
    }

    #[tokio::test]
    async fn prune_retention_deletes_beyond_keep_count() {
        use async_trait::async_trait;

        struct RecordingClient {
            deleted: std::sync::Mutex<Vec<String>>,
        }

        #[async_trait]
        impl crate::library_cache::LibrarySourceClient for RecordingClient {
            async fn build_library_cache(&self, _library_key: &str) -> anyhow::Result<Vec<Track>> {
                Ok(vec![])
            }
            async fn tracks_added_since(&self, _library_key: &str, _since_unix: i64) -> anyhow::Result<Vec<Track>> {
                Ok(vec![])
            }
            async fn verify_track_exists(&self, _id: &str) -> anyhow::Result<bool> {
                Ok(true)
            }
            fn cache_ttl_days(&self) -> i64 {
                7
            }
        }

        #[async_trait]
        impl MediaServerClient for RecordingClient {
            fn base_url(&self) -> &str {
                "http://host"
            }
            fn library_key(&self) -> &str {
                "1"
            }
            async fn find_playlist_by_name(&self, _name: &str) -> anyhow::Result<Option<String>> {
                Ok(None)
            }
            async fn create_playlist(&self, _name: &str, _ids: &[String], _summary: &str) -> anyhow::Result<String> {
                Ok("new".into())
            }
            async fn add_tracks(&self, _playlist_id: &str, _ids: &[String]) -> anyhow::Result<()> {
                Ok(())
            }
            async fn delete_playlist(&self, id: &str) -> anyhow::Result<()> {
                self.deleted.lock().unwrap().push(id.to_string());
                Ok(())
            }
            async fn get_playlist_tracks(&self, _id: &str) -> anyhow::Result<Vec<String>> {
                Ok(vec![])
            }
            async fn close(&self) {}
        }

        let client = RecordingClient { deleted: std::sync::Mutex::new(vec![]) };
        let playlists = vec![
            ("a".to_string(), chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()),
            ("b".to_string(), chrono::NaiveDate::from_ymd_opt(2026, 1, 8).unwrap()),
            ("c".to_string(), chrono::NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()),
        ];
        let deleted = prune_retention(&client, &playlists, 2).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(client.deleted.lock().unwrap().as_slice(), &["a".to_string()]);
    }
}
