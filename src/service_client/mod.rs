//! Service Capability Layer (C4).
//!
//! Trait-only definitions for the six capability sets the core depends on.
//! An external client is any object that provides the capabilities its role
//! demands; the core never imports a concrete client. Grounded on the
//! `ManagerClient`/`RecommenderClient`/`MetadataClient` split already present
//! in `original_source/clients/` (Plex/Jellyfin as managers+media servers,
//! Last.fm/ListenBrainz as recommenders, MusicBrainz as metadata).

use crate::library_cache::{LibrarySourceClient, SearchMatch};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtistRef {
    pub identifier: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlbumRef {
    pub identifier: String,
    pub title: String,
    pub artist: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Similar {
    pub name: String,
    pub identifier: Option<String>,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtistMatch {
    pub identifier: String,
    pub canonical_name: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaylistInfo {
    pub name: String,
    pub track_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaylistTrack {
    pub artist: String,
    pub album: String,
    pub track: String,
}

/// Library manager capabilities (artist/album listing, exclusions).
#[async_trait]
pub trait ManagerClient: Send + Sync {
    async fn list_artists(&self) -> anyhow::Result<Vec<ArtistRef>>;
    async fn list_albums(&self) -> anyhow::Result<Vec<AlbumRef>>;
    async fn list_exclusions(&self) -> anyhow::Result<std::collections::HashSet<String>>;
    async fn add_artist(&self, identifier: &str, name: &str) -> anyhow::Result<()>;
    async fn test_connection(&self) -> anyhow::Result<bool>;
    async fn close(&self);
}

/// Similar-artist recommender. `rejected` holds candidates lacking a
/// resolvable identifier, which the core attempts to recover via
/// `MetadataClient::fuzzy_search_artist`.
#[async_trait]
pub trait RecommenderClient: Send + Sync {
    async fn get_similar(
        &self,
        identifier: &str,
        name: &str,
        limit: usize,
    ) -> anyhow::Result<(Vec<Similar>, Vec<Similar>)>;
    async fn close(&self);
}

/// MusicBrainz-like metadata lookup. `artist_release_groups` returns `None`
/// to signal a transient error distinct from an empty result — callers MUST
/// NOT cache a `None` as a negative lookup.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn fuzzy_search_artist(&self, name: &str) -> anyhow::Result<Option<ArtistMatch>>;
    async fn artist_release_groups(&self, identifier: &str) -> anyhow::Result<Option<Vec<String>>>;
    async fn close(&self);
}

/// A playlist source (e.g. a streaming service exposing curated playlists).
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn playlist_info(&self, url: &str) -> anyhow::Result<PlaylistInfo>;
    async fn playlist_tracks(&self, url: &str) -> anyhow::Result<Vec<PlaylistTrack>>;
    /// Not every source supports curated playlists; implementors that don't
    /// return an empty map.
    async fn curated_playlists(&self, user: &str) -> anyhow::Result<std::collections::HashMap<String, String>>;
    async fn close(&self);
}

/// A playlist target: the library-cache capabilities, plus playlist CRUD.
#[async_trait]
pub trait MediaServerClient: LibrarySourceClient {
    fn base_url(&self) -> &str;
    fn library_key(&self) -> &str;
    async fn search_in_snapshot(
        &self,
        snapshot: &crate::library_cache::LibrarySnapshot,
        title: &str,
        artist: &str,
        album: Option<&str>,
    ) -> Option<SearchMatch> {
        snapshot.search(title, artist, album)
    }
    async fn find_playlist_by_name(&self, name: &str) -> anyhow::Result<Option<String>>;
    async fn create_playlist(&self, name: &str, track_ids: &[String], summary: &str) -> anyhow::Result<String>;
    async fn add_tracks(&self, playlist_id: &str, track_ids: &[String]) -> anyhow::Result<()>;
    async fn delete_playlist(&self, playlist_id: &str) -> anyhow::Result<()>;
    async fn get_playlist_tracks(&self, playlist_id: &str) -> anyhow::Result<Vec<String>>;
    async fn close(&self);
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReleaseRef {
    pub title: String,
    pub release_type: String,
}

/// A streaming provider's recent-releases feed, backing
/// `GET /api/new-releases`. Kept separate from `RecommenderClient` since not
/// every recommender exposes a release feed.
#[async_trait]
pub trait NewReleaseSource: Send + Sync {
    async fn recent_releases(&self, artist_name: &str, album_types: &[String]) -> anyhow::Result<Vec<ReleaseRef>>;
}

/// A named connectivity check for `/api/config/test-connectivity`. Any
/// configured client implements this alongside its capability trait; the
/// server surface depends only on this, never on the concrete clients.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    fn service_name(&self) -> &str;
    async fn test_connection(&self) -> anyhow::Result<bool>;
}

/// Writes a discovery artifact file, replacing it atomically.
#[async_trait]
pub trait DiscoveryArtifactWriter: Send + Sync {
    async fn write(&self, path: &std::path::Path, artifacts: &[serde_json::Value]) -> anyhow::Result<()>;
}

/// Default atomic-replace writer: write to a sibling temp file, then rename.
pub struct AtomicFileWriter;

#[async_trait]
impl DiscoveryArtifactWriter for AtomicFileWriter {
    async fn write(&self, path: &std::path::Path, artifacts: &[serde_json::Value]) -> anyhow::Result<()> {
        let body = serde_json::to_vec_pretty(artifacts)?;
        let dir = path.parent().ok_or_else(|| anyhow::anyhow!("artifact path has no parent directory"))?;
        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        tokio::fs::write(tmp.path(), &body).await?;
        tmp.persist(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_writer_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.json");
        tokio::fs::write(&path, b"stale").await.unwrap();

        let writer = AtomicFileWriter;
        let artifacts = vec![serde_json::json!({"MusicBrainzId": "abc", "ArtistName": "Test"})];
        writer.write(&path, &artifacts).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("MusicBrainzId"));
    }
}
