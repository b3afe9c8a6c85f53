//! Queried-ledger cooldown bookkeeping (§GLOSSARY: *Cooldown*).
//!
//! One JSON file per discovery command, mapping artist identifier to the
//! ISO timestamp it was last sampled. Grounded on
//! `original_source/commands/discovery_lastfm.py`'s
//! `_load_queried_artists`/`_save_queried_artists`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub struct QueriedLedger {
    path: PathBuf,
}

impl QueriedLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_raw(&self) -> HashMap<String, DateTime<Utc>> {
        let Ok(contents) = std::fs::read_to_string(&self.path) else {
            return HashMap::new();
        };
        serde_json::from_str(&contents).unwrap_or_default()
    }

    fn write_raw(&self, data: &HashMap<String, DateTime<Utc>>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string(data)?)?;
        Ok(())
    }

    /// Identifiers queried within `cooldown_days`. Prunes expired entries as
    /// a side effect.
    pub fn recently_queried(&self, cooldown_days: i64) -> anyhow::Result<std::collections::HashSet<String>> {
        let data = self.read_raw();
        let cutoff = Utc::now() - chrono::Duration::days(cooldown_days);

        let mut recent = std::collections::HashSet::new();
        let mut pruned = HashMap::new();
        for (identifier, queried_at) in data.iter() {
            if *queried_at >= cutoff {
                recent.insert(identifier.clone());
                pruned.insert(identifier.clone(), *queried_at);
            }
        }
        if pruned.len() < data.len() {
            self.write_raw(&pruned)?;
        }
        Ok(recent)
    }

    /// Appends `identifiers` with the current timestamp, pruning entries
    /// older than `cooldown_days`.
    pub fn record_queried(&self, identifiers: &[String], cooldown_days: i64) -> anyhow::Result<()> {
        let mut data = self.read_raw();
        let now = Utc::now();
        for id in identifiers {
            data.insert(id.clone(), now);
        }
        let cutoff = now - chrono::Duration::days(cooldown_days);
        data.retain(|_, queried_at| *queried_at >= cutoff);
        self.write_raw(&data)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_recently_queried_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = QueriedLedger::new(dir.path().join("queried.json"));
        ledger.record_queried(&["mbid-1".to_string(), "mbid-2".to_string()], 30).unwrap();
        let recent = ledger.recently_queried(30).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.contains("mbid-1"));
    }

    #[test]
    fn expired_entries_are_pruned_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queried.json");
        let mut stale = HashMap::new();
        stale.insert("old".to_string(), Utc::now() - chrono::Duration::days(40));
        stale.insert("fresh".to_string(), Utc::now());
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        let ledger = QueriedLedger::new(path);
        let recent = ledger.recently_queried(30).unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent.contains("fresh"));
    }

    #[test]
    fn missing_file_is_an_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = QueriedLedger::new(dir.path().join("missing.json"));
        assert!(ledger.recently_queried(30).unwrap().is_empty());
    }
}
