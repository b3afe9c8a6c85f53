//! Library Cache (C3) — the most performance-critical component.
//!
//! Persists one [`LibrarySnapshot`] per (service, base URL, library
//! identifier) and keeps an optional in-memory copy while `BatchMode` is
//! active. Grounded on `original_source/utils/library_cache_manager.py` and
//! `original_source/clients/client_plex.py`.

mod schema;
mod snapshot;

pub use schema::LIBRARY_CACHE_VERSIONED_SCHEMAS;
pub use snapshot::{LibrarySnapshot, SearchMatch, Track};

use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

const MEMORY_CEILING_BYTES_DEFAULT: usize = 500 * 1024 * 1024;
const SMART_REFRESH_WINDOW_HOURS: i64 = 36;
const VERIFY_MISSING_THRESHOLD: f64 = 0.2;

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn cache_key(service: &str, base_url: &str, library_key: &str) -> String {
    format!("{service}:{base_url}:{library_key}")
}

/// Whatever backs a library (a media-server client) must expose this much
/// to the cache manager. Implemented by concrete `MediaServerClient`s (C4).
#[async_trait]
pub trait LibrarySourceClient: Send + Sync {
    async fn build_library_cache(&self, library_key: &str) -> anyhow::Result<Vec<Track>>;
    async fn tracks_added_since(&self, library_key: &str, since_unix: i64) -> anyhow::Result<Vec<Track>>;
    async fn verify_track_exists(&self, id: &str) -> anyhow::Result<bool>;
    fn cache_ttl_days(&self) -> i64;
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LibraryCacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct StatsCounters {
    inner: RwLock<HashMap<String, LibraryCacheStats>>,
}

impl StatsCounters {
    fn new() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }
    fn hit(&self, service: &str) {
        self.inner.write().unwrap().entry(service.to_string()).or_default().hits += 1;
    }
    fn miss(&self, service: &str) {
        self.inner.write().unwrap().entry(service.to_string()).or_default().misses += 1;
    }
    fn get(&self, service: &str) -> LibraryCacheStats {
        self.inner.read().unwrap().get(service).cloned().unwrap_or_default()
    }
}

pub struct LibraryCacheManager {
    conn: Mutex<Connection>,
    memory: RwLock<HashMap<String, LibrarySnapshot>>,
    batch_active: std::sync::atomic::AtomicBool,
    memory_ceiling_bytes: usize,
    stats: StatsCounters,
}

impl LibraryCacheManager {
    pub fn new(db_path: impl AsRef<Path>, memory_ceiling_bytes: usize) -> anyhow::Result<Self> {
        Self::from_connection(Connection::open(db_path)?, memory_ceiling_bytes)
    }

    #[cfg(test)]
    pub fn new_in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, MEMORY_CEILING_BYTES_DEFAULT)
    }

    fn from_connection(conn: Connection, memory_ceiling_bytes: usize) -> anyhow::Result<Self> {
        let schema = LIBRARY_CACHE_VERSIONED_SCHEMAS.last().expect("at least one schema version");
        schema.create(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            memory: RwLock::new(HashMap::new()),
            batch_active: std::sync::atomic::AtomicBool::new(false),
            memory_ceiling_bytes,
            stats: StatsCounters::new(),
        })
    }

    pub fn batch_mode(&self) {
        self.batch_active.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn end_batch(&self) {
        self.batch_active.store(false, std::sync::atomic::Ordering::SeqCst);
        self.memory.write().unwrap().clear();
    }

    fn is_batch_active(&self) -> bool {
        self.batch_active.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn memory_resident_bytes(&self) -> usize {
        self.memory.read().unwrap().values().map(|s| s.estimated_bytes()).sum()
    }

    fn maybe_memoise(&self, key: &str, snapshot: &LibrarySnapshot) {
        if !self.is_batch_active() {
            return;
        }
        let estimated = (snapshot.estimated_bytes() as f64 * 1.5) as usize;
        if self.memory_resident_bytes() + estimated > self.memory_ceiling_bytes {
            return;
        }
        self.memory.write().unwrap().insert(key.to_string(), snapshot.clone());
    }

    pub fn get(&self, service: &str, base_url: &str, library_key: &str) -> anyhow::Result<Option<LibrarySnapshot>> {
        let key = cache_key(service, base_url, library_key);

        if self.is_batch_active() {
            if let Some(snap) = self.memory.read().unwrap().get(&key).cloned() {
                self.stats.hit(service);
                return Ok(Some(snap));
            }
        }

        let conn = self.conn.lock().unwrap();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT payload, expires_at FROM library_cache WHERE cache_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();
        drop(conn);

        match row {
            Some((payload, expires_at)) if expires_at > now() => {
                self.stats.hit(service);
                let snapshot: LibrarySnapshot = serde_json::from_str(&payload)?;
                self.maybe_memoise(&key, &snapshot);
                Ok(Some(snapshot))
            }
            _ => {
                self.stats.miss(service);
                Ok(None)
            }
        }
    }

    pub fn set(
        &self,
        service: &str,
        base_url: &str,
        library_key: &str,
        snapshot: &LibrarySnapshot,
        ttl_days: i64,
    ) -> anyhow::Result<()> {
        let key = cache_key(service, base_url, library_key);
        let created_at = now();
        let expires_at = created_at + ttl_days * 86_400;
        let payload = serde_json::to_string(snapshot)?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO library_cache
                (cache_key, service, base_url, library_key, schema_version, payload, track_count, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?8)
             ON CONFLICT(cache_key) DO UPDATE SET
                payload = excluded.payload, track_count = excluded.track_count,
                created_at = excluded.created_at, expires_at = excluded.expires_at",
            params![key, service, base_url, library_key, payload, snapshot.total_tracks as i64, created_at, expires_at],
        )?;
        drop(conn);

        self.maybe_memoise(&key, snapshot);
        Ok(())
    }

    pub async fn build(
        &self,
        service: &str,
        base_url: &str,
        library_key: &str,
        client: &dyn LibrarySourceClient,
    ) -> anyhow::Result<LibrarySnapshot> {
        let tracks = client.build_library_cache(library_key).await?;
        let snapshot = LibrarySnapshot::build(library_key, tracks, now());
        self.set(service, base_url, library_key, &snapshot, client.cache_ttl_days())?;
        Ok(snapshot)
    }

    /// If no snapshot exists, a full build; otherwise merge tracks added in
    /// the last 36 hours by id (add new, replace metadata-changed).
    pub async fn smart_refresh(
        &self,
        service: &str,
        base_url: &str,
        library_key: &str,
        client: &dyn LibrarySourceClient,
    ) -> anyhow::Result<LibrarySnapshot> {
        let existing = self.get(service, base_url, library_key)?;
        let Some(mut snapshot) = existing else {
            return self.build(service, base_url, library_key, client).await;
        };

        let since = now() - SMART_REFRESH_WINDOW_HOURS * 3600;
        let updates = client.tracks_added_since(library_key, since).await?;

        let mut by_id: HashMap<String, usize> =
            snapshot.tracks.iter().enumerate().map(|(i, t)| (t.id.clone(), i)).collect();

        for updated in updates {
            match by_id.get(&updated.id) {
                Some(&idx) if snapshot.tracks[idx] == updated => {
                    // unchanged, nothing to do
                }
                Some(&idx) => {
                    snapshot.tracks[idx] = updated;
                }
                None => {
                    by_id.insert(updated.id.clone(), snapshot.tracks.len());
                    snapshot.tracks.push(updated);
                }
            }
        }

        snapshot = LibrarySnapshot::build(library_key, snapshot.tracks, now());
        self.set(service, base_url, library_key, &snapshot, client.cache_ttl_days())?;
        Ok(snapshot)
    }

    /// Checks `sample_ids` against the live client; invalidates and rebuilds
    /// if more than 20% are missing. Returns `true` if the cache was (and
    /// remains) valid, `false` if it was rebuilt.
    pub async fn verify_and_refresh(
        &self,
        service: &str,
        base_url: &str,
        library_key: &str,
        sample_ids: &[String],
        client: &dyn LibrarySourceClient,
    ) -> anyhow::Result<bool> {
        if sample_ids.is_empty() {
            return Ok(true);
        }

        let mut missing = 0usize;
        for id in sample_ids {
            if !client.verify_track_exists(id).await? {
                missing += 1;
            }
        }

        let ratio = missing as f64 / sample_ids.len() as f64;
        if ratio > VERIFY_MISSING_THRESHOLD {
            self.invalidate(service, base_url, library_key)?;
            self.build(service, base_url, library_key, client).await?;
            return Ok(false);
        }

        Ok(true)
    }

    pub fn invalidate(&self, service: &str, base_url: &str, library_key: &str) -> anyhow::Result<()> {
        let key = cache_key(service, base_url, library_key);
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM library_cache WHERE cache_key = ?1", params![key])?;
        drop(conn);
        self.memory.write().unwrap().remove(&key);
        Ok(())
    }

    pub fn cleanup(&self) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM library_cache WHERE expires_at <= ?1", params![now()])?;
        Ok(deleted)
    }

    pub fn stats(&self, service: &str) -> LibraryCacheStats {
        self.stats.get(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeClient {
        tracks: Vec<Track>,
        calls: AtomicUsize,
        missing_ids: Vec<String>,
    }

    #[async_trait]
    impl LibrarySourceClient for FakeClient {
        async fn build_library_cache(&self, _library_key: &str) -> anyhow::Result<Vec<Track>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tracks.clone())
        }
        async fn tracks_added_since(&self, _library_key: &str, _since_unix: i64) -> anyhow::Result<Vec<Track>> {
            Ok(vec![])
        }
        async fn verify_track_exists(&self, id: &str) -> anyhow::Result<bool> {
            Ok(!self.missing_ids.contains(&id.to_string()))
        }
        fn cache_ttl_days(&self) -> i64 {
            7
        }
    }

    fn client(tracks: Vec<Track>) -> FakeClient {
        FakeClient { tracks, calls: AtomicUsize::new(0), missing_ids: vec![] }
    }

    #[tokio::test]
    async fn build_persists_and_get_returns_it() {
        let mgr = LibraryCacheManager::new_in_memory().unwrap();
        let c = client(vec![Track::new("1", "Song", "Artist", "Album", 180)]);
        mgr.build("plex", "http://host", "1", &c).await.unwrap();
        let got = mgr.get("plex", "http://host", "1").unwrap().unwrap();
        assert_eq!(got.total_tracks, 1);
    }

    #[tokio::test]
    async fn get_is_miss_when_absent() {
        let mgr = LibraryCacheManager::new_in_memory().unwrap();
        assert!(mgr.get("plex", "http://host", "1").unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_mode_memoises_in_memory() {
        let mgr = LibraryCacheManager::new_in_memory().unwrap();
        let c = client(vec![Track::new("1", "Song", "Artist", "Album", 180)]);
        mgr.batch_mode();
        mgr.build("plex", "http://host", "1", &c).await.unwrap();
        assert!(mgr.memory.read().unwrap().contains_key(&cache_key("plex", "http://host", "1")));
        mgr.end_batch();
        assert!(mgr.memory.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn verify_and_refresh_rebuilds_when_mostly_missing() {
        let mgr = LibraryCacheManager::new_in_memory().unwrap();
        let mut c = client(vec![Track::new("1", "Song", "Artist", "Album", 180)]);
        mgr.build("plex", "http://host", "1", &c).await.unwrap();
        c.missing_ids = vec!["a".into(), "b".into(), "c".into()];
        let sample = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let valid = mgr.verify_and_refresh("plex", "http://host", "1", &sample, &c).await.unwrap();
        assert!(!valid);
        assert_eq!(c.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cleanup_removes_expired_rows() {
        let mgr = LibraryCacheManager::new_in_memory().unwrap();
        let c = client(vec![Track::new("1", "Song", "Artist", "Album", 180)]);
        let snap = LibrarySnapshot::build("1", c.tracks.clone(), 0);
        mgr.set("plex", "http://host", "1", &snap, -1).unwrap();
        assert_eq!(mgr.cleanup().unwrap(), 1);
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let mgr = LibraryCacheManager::new_in_memory().unwrap();
        let c = client(vec![Track::new("1", "Song", "Artist", "Album", 180)]);
        mgr.build("plex", "http://host", "1", &c).await.unwrap();
        let _ = mgr.get("plex", "http://host", "1").unwrap();
        let _ = mgr.get("plex", "http://host", "missing").unwrap();
        let stats = mgr.stats("plex");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
