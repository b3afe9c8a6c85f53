//! Response/Failure Cache (C2).
//!
//! A single namespace keyed by opaque fingerprint strings of the form
//! `<op>:<arg>:<arg>...`, backed by SQLite and safe for concurrent access
//! (last-writer-wins on `Set`, per spec §4.2).

mod schema;

pub use schema::CACHE_VERSIONED_SCHEMAS;

use rusqlite::{params, Connection};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::Mutex;

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

pub trait CacheManager: Send + Sync {
    fn get(&self, key: &str, source: &str) -> anyhow::Result<Option<JsonValue>>;
    fn set(&self, key: &str, source: &str, value: &JsonValue, ttl_days: i64) -> anyhow::Result<()>;
    fn is_failed(&self, key: &str, source: &str) -> anyhow::Result<bool>;
    fn mark_failed(&self, key: &str, source: &str, reason: &str, ttl_days: i64) -> anyhow::Result<()>;
    fn cleanup_expired(&self) -> anyhow::Result<usize>;
    fn clear_source(&self, source: &str) -> anyhow::Result<usize>;
    fn stats(&self, source: &str) -> CacheStats;
    fn record_hit(&self, source: &str);
    fn record_miss(&self, source: &str);
    fn reset_stats(&self);
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct StatsCounters {
    inner: std::sync::RwLock<std::collections::HashMap<String, CacheStats>>,
}

impl StatsCounters {
    fn new() -> Self {
        Self { inner: std::sync::RwLock::new(std::collections::HashMap::new()) }
    }

    fn hit(&self, source: &str) {
        self.inner.write().unwrap().entry(source.to_string()).or_default().hits += 1;
    }

    fn miss(&self, source: &str) {
        self.inner.write().unwrap().entry(source.to_string()).or_default().misses += 1;
    }

    fn get(&self, source: &str) -> CacheStats {
        self.inner.read().unwrap().get(source).cloned().unwrap_or_default()
    }

    fn reset(&self) {
        self.inner.write().unwrap().clear();
    }
}

/// Builds the opaque fingerprint `<op>:<arg>:<arg>...` used as a cache key.
pub fn fingerprint(op: &str, args: &[&str]) -> String {
    let mut parts = vec![op];
    parts.extend_from_slice(args);
    parts.join(":")
}

pub struct SqliteCacheManager {
    conn: Mutex<Connection>,
    stats: StatsCounters,
}

impl SqliteCacheManager {
    pub fn new(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    #[cfg(test)]
    pub fn new_in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        let schema = CACHE_VERSIONED_SCHEMAS.last().expect("at least one schema version");
        schema.create(&conn)?;
        Ok(Self { conn: Mutex::new(conn), stats: StatsCounters::new() })
    }
}

impl CacheManager for SqliteCacheManager {
    fn get(&self, key: &str, source: &str) -> anyhow::Result<Option<JsonValue>> {
        let conn = self.conn.lock().unwrap();
        let result: Option<(String, i64)> = conn
            .query_row(
                "SELECT payload, expires_at FROM cache_entries WHERE fingerprint = ?1 AND source = ?2",
                params![key, source],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .ok();
        drop(conn);

        match result {
            Some((payload, expires_at)) if expires_at > now() => {
                self.stats.hit(source);
                Ok(Some(serde_json::from_str(&payload)?))
            }
            Some(_) => {
                self.stats.miss(source);
                Ok(None)
            }
            None => {
                self.stats.miss(source);
                Ok(None)
            }
        }
    }

    fn set(&self, key: &str, source: &str, value: &JsonValue, ttl_days: i64) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let created_at = now();
        let expires_at = created_at + ttl_days * 86_400;
        conn.execute(
            "INSERT INTO cache_entries (fingerprint, source, payload, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(fingerprint) DO UPDATE SET
                source = excluded.source, payload = excluded.payload,
                created_at = excluded.created_at, expires_at = excluded.expires_at",
            params![key, source, serde_json::to_string(value)?, created_at, expires_at],
        )?;
        Ok(())
    }

    fn is_failed(&self, key: &str, source: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let expires_at: Option<i64> = conn
            .query_row(
                "SELECT expires_at FROM failed_lookups WHERE fingerprint = ?1 AND source = ?2",
                params![key, source],
                |row| row.get(0),
            )
            .ok();
        Ok(expires_at.map(|e| e > now()).unwrap_or(false))
    }

    fn mark_failed(&self, key: &str, source: &str, reason: &str, ttl_days: i64) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let created_at = now();
        let expires_at = created_at + ttl_days * 86_400;
        conn.execute(
            "INSERT INTO failed_lookups (fingerprint, source, error_reason, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(fingerprint) DO UPDATE SET
                source = excluded.source, error_reason = excluded.error_reason,
                created_at = excluded.created_at, expires_at = excluded.expires_at",
            params![key, source, reason, created_at, expires_at],
        )?;
        Ok(())
    }

    fn cleanup_expired(&self) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = now();
        let mut deleted = conn.execute("DELETE FROM cache_entries WHERE expires_at <= ?1", params![cutoff])?;
        deleted += conn.execute("DELETE FROM failed_lookups WHERE expires_at <= ?1", params![cutoff])?;
        Ok(deleted)
    }

    fn clear_source(&self, source: &str) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let mut deleted = conn.execute("DELETE FROM cache_entries WHERE source = ?1", params![source])?;
        deleted += conn.execute("DELETE FROM failed_lookups WHERE source = ?1", params![source])?;
        Ok(deleted)
    }

    fn stats(&self, source: &str) -> CacheStats {
        self.stats.get(source)
    }

    fn record_hit(&self, source: &str) {
        self.stats.hit(source);
    }

    fn record_miss(&self, source: &str) {
        self.stats.miss(source);
    }

    fn reset_stats(&self) {
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_joins_op_and_args() {
        assert_eq!(fingerprint("artist_lookup", &["abc123", "en"]), "artist_lookup:abc123:en");
    }

    #[test]
    fn get_returns_none_for_missing_key() {
        let cache = SqliteCacheManager::new_in_memory().unwrap();
        assert!(cache.get("missing", "metadata").unwrap().is_none());
    }

    #[test]
    fn set_then_get_round_trips() {
        let cache = SqliteCacheManager::new_in_memory().unwrap();
        cache.set("k1", "metadata", &json!({"a": 1}), 7).unwrap();
        let got = cache.get("k1", "metadata").unwrap().unwrap();
        assert_eq!(got, json!({"a": 1}));
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let cache = SqliteCacheManager::new_in_memory().unwrap();
        cache.set("k1", "metadata", &json!(1), -1).unwrap();
        assert!(cache.get("k1", "metadata").unwrap().is_none());
    }

    #[test]
    fn is_failed_true_only_while_unexpired() {
        let cache = SqliteCacheManager::new_in_memory().unwrap();
        cache.mark_failed("k1", "metadata", "not found", 1).unwrap();
        assert!(cache.is_failed("k1", "metadata").unwrap());
        cache.mark_failed("k2", "metadata", "not found", -1).unwrap();
        assert!(!cache.is_failed("k2", "metadata").unwrap());
    }

    #[test]
    fn cleanup_expired_removes_stale_rows_from_both_tables() {
        let cache = SqliteCacheManager::new_in_memory().unwrap();
        cache.set("k1", "metadata", &json!(1), -1).unwrap();
        cache.mark_failed("k2", "metadata", "x", -1).unwrap();
        let deleted = cache.cleanup_expired().unwrap();
        assert_eq!(deleted, 2);
    }

    #[test]
    fn clear_source_only_touches_matching_rows() {
        let cache = SqliteCacheManager::new_in_memory().unwrap();
        cache.set("k1", "metadata", &json!(1), 7).unwrap();
        cache.set("k2", "recommender", &json!(1), 7).unwrap();
        let deleted = cache.clear_source("metadata").unwrap();
        assert_eq!(deleted, 1);
        assert!(cache.get("k2", "recommender").unwrap().is_some());
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = SqliteCacheManager::new_in_memory().unwrap();
        cache.set("k1", "metadata", &json!(1), 7).unwrap();
        let _ = cache.get("k1", "metadata").unwrap();
        let _ = cache.get("missing", "metadata").unwrap();
        let stats = cache.stats("metadata");
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
