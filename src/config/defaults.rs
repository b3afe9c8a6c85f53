//! Code-declared default configuration settings.
//!
//! Seeded into `config_settings` on first start; rows already present are
//! never overwritten (spec §4.1).

use super::{ConfigSetting, DataType};

/// A single seed entry: (key, default, data_type, category, description, sensitive, required).
struct Seed {
    key: &'static str,
    default: &'static str,
    data_type: DataType,
    category: &'static str,
    description: &'static str,
    is_sensitive: bool,
    is_required: bool,
    enum_options: Option<&'static [&'static str]>,
}

macro_rules! seed {
    ($key:expr, $default:expr, $ty:expr, $cat:expr, $desc:expr) => {
        Seed {
            key: $key,
            default: $default,
            data_type: $ty,
            category: $cat,
            description: $desc,
            is_sensitive: false,
            is_required: false,
            enum_options: None,
        }
    };
    ($key:expr, $default:expr, $ty:expr, $cat:expr, $desc:expr, sensitive) => {
        Seed {
            key: $key,
            default: $default,
            data_type: $ty,
            category: $cat,
            description: $desc,
            is_sensitive: true,
            is_required: true,
            enum_options: None,
        }
    };
    ($key:expr, $default:expr, $ty:expr, $cat:expr, $desc:expr, required) => {
        Seed {
            key: $key,
            default: $default,
            data_type: $ty,
            category: $cat,
            description: $desc,
            is_sensitive: false,
            is_required: true,
            enum_options: None,
        }
    };
}

fn seeds() -> Vec<Seed> {
    use DataType::*;
    vec![
        // Scheduler (C6)
        seed!("MAX_PARALLEL_COMMANDS", "3", Int, "scheduler", "Global concurrency cap on simultaneously running commands"),
        seed!("SHUTDOWN_GRACE_SECONDS", "30", Int, "scheduler", "Grace period for running commands to finish after Stop()"),
        seed!("EXECUTION_RETENTION_PER_COMMAND", "50", Int, "scheduler", "Most-recent execution rows kept per command"),
        seed!("EXECUTION_CLEANUP_INTERVAL_MINUTES", "5", Int, "scheduler", "Interval between registry cleanup passes"),
        seed!("RUNAWAY_TIMEOUT_HOURS", "2", Int, "scheduler", "Fallback timeout for commands with no configured timeout"),
        // Discovery (C7)
        seed!("DISCOVERY_ARTISTS_TO_QUERY", "3", Int, "discovery", "Artists sampled per discovery run"),
        seed!("DISCOVERY_SIMILAR_PER_ARTIST", "20", Int, "discovery", "Similar-artist candidates requested per sampled artist"),
        seed!("DISCOVERY_COOLDOWN_DAYS", "30", Int, "discovery", "Days before a sampled artist may be resampled"),
        seed!("DISCOVERY_MIN_SIMILARITY", "0.85", Float, "discovery", "Minimum fuzzy-search similarity to adopt a recovered identifier"),
        seed!("DISCOVERY_MIN_MATCH_SCORE", "0.9", Float, "discovery", "Minimum recommender match-score to keep a candidate"),
        seed!("DISCOVERY_LIMIT", "5", Int, "discovery", "Maximum artifact entries emitted per run"),
        // Playlist sync (C8)
        seed!("PLAYLIST_SYNC_PREFIX", "[LB] ", String, "playlist", "Name prefix identifying managed target playlists"),
        seed!("PLAYLIST_PRUNE_ADDITIVE", "false", Bool, "playlist", "Whether additive-mode sync also removes vanished tracks"),
        seed!("PLAYLIST_CLEANUP_EMPTY", "true", Bool, "playlist", "Skip (rather than create) a playlist with zero matched tracks"),
        // Cache (C2/C3)
        seed!("CACHE_TTL_RECOMMENDER_DAYS", "7", Int, "cache", "Response cache TTL for recommender lookups"),
        seed!("CACHE_TTL_METADATA_DAYS", "7", Int, "cache", "Response cache TTL for metadata-service lookups"),
        seed!("CACHE_TTL_MEDIA_DAYS", "1", Int, "cache", "Response cache TTL for media-server lookups"),
        seed!("CACHE_TTL_FAILED_DAYS", "1", Int, "cache", "Negative-cache TTL for failed lookups"),
        seed!("LIBRARY_CACHE_MEMORY_CEILING_MB", "500", Int, "cache", "Process-wide ceiling for memory-tier library snapshots"),
        seed!("LIBRARY_CACHE_SMART_REFRESH_HOURS", "36", Int, "cache", "Lookback window used by SmartRefresh"),
        seed!("LIBRARY_CACHE_VERIFY_MISSING_THRESHOLD", "0.2", Float, "cache", "Fraction of missing sampled ids that triggers a rebuild"),
        // Core / bootstrap
        seed!("DISCOVERY_ARTIFACT_DIR", "./data/import_lists", String, "core", "Directory discovery artifacts are written to", required),
        seed!("DB_DIR", "./data", String, "core", "Directory holding the sqlite databases", required),
    ]
}

pub fn default_settings() -> Vec<ConfigSetting> {
    seeds()
        .into_iter()
        .map(|s| ConfigSetting {
            key: s.key.to_string(),
            value: None,
            default_value: s.default.to_string(),
            data_type: s.data_type,
            category: s.category.to_string(),
            description: s.description.to_string(),
            is_sensitive: s.is_sensitive,
            is_required: s.is_required,
            is_hidden: false,
            enum_options: s.enum_options.map(|o| o.iter().map(|s| s.to_string()).collect()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_have_unique_keys() {
        let settings = default_settings();
        let mut keys: Vec<_> = settings.iter().map(|s| s.key.clone()).collect();
        keys.sort();
        let mut dedup = keys.clone();
        dedup.dedup();
        assert_eq!(keys, dedup);
    }

    #[test]
    fn max_parallel_commands_seeded() {
        let settings = default_settings();
        let setting = settings.iter().find(|s| s.key == "MAX_PARALLEL_COMMANDS").unwrap();
        assert_eq!(setting.default_value, "3");
        assert_eq!(setting.data_type, DataType::Int);
    }
}
