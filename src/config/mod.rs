//! Configuration Store (C1).
//!
//! A schema-typed key/value store with strict three-tier precedence
//! (environment > persisted value > declared default), backed by SQLite and
//! fronted by a short-lived in-memory memo.

mod defaults;
mod schema;

pub use schema::CONFIG_VERSIONED_SCHEMAS;

use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;

const MEMO_TTL: Duration = Duration::from_secs(5 * 60);
const REDACTED_PLACEHOLDER: &str = "********";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Int,
    Float,
    Bool,
    Json,
    Enum,
}

impl DataType {
    fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Int => "int",
            DataType::Float => "float",
            DataType::Bool => "bool",
            DataType::Json => "json",
            DataType::Enum => "enum",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "string" => DataType::String,
            "int" => DataType::Int,
            "float" => DataType::Float,
            "bool" => DataType::Bool,
            "json" => DataType::Json,
            "enum" => DataType::Enum,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ConfigSetting {
    pub key: String,
    pub value: Option<String>,
    pub default_value: String,
    pub data_type: DataType,
    pub category: String,
    pub description: String,
    pub is_sensitive: bool,
    pub is_required: bool,
    pub is_hidden: bool,
    pub enum_options: Option<Vec<String>>,
}

impl ConfigSetting {
    /// The value that would be persisted/returned ignoring environment overrides.
    fn stored_value(&self) -> &str {
        self.value.as_deref().unwrap_or(&self.default_value)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("invalid value for key {key} (expected {expected_type}): {raw}")]
    InvalidValue {
        key: String,
        expected_type: &'static str,
        raw: String,
    },
    #[error("value {raw:?} is not a declared option for enum key {key}")]
    InvalidEnumOption { key: String, raw: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Coerce a raw string according to its declared data type, validating shape.
fn coerce(key: &str, data_type: DataType, raw: &str, enum_options: &Option<Vec<String>>) -> Result<(), ConfigError> {
    match data_type {
        DataType::String => Ok(()),
        DataType::Int => raw
            .parse::<i64>()
            .map(|_| ())
            .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), expected_type: "int", raw: raw.to_string() }),
        DataType::Float => raw
            .parse::<f64>()
            .map(|_| ())
            .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), expected_type: "float", raw: raw.to_string() }),
        DataType::Bool => {
            if matches!(raw.to_lowercase().as_str(), "true" | "1" | "yes" | "on" | "false" | "0" | "no" | "off") {
                Ok(())
            } else {
                Err(ConfigError::InvalidValue { key: key.to_string(), expected_type: "bool", raw: raw.to_string() })
            }
        }
        DataType::Json => serde_json::from_str::<serde_json::Value>(raw)
            .map(|_| ())
            .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), expected_type: "json", raw: raw.to_string() }),
        DataType::Enum => {
            let options = enum_options.as_deref().unwrap_or(&[]);
            if options.iter().any(|o| o == raw) {
                Ok(())
            } else {
                Err(ConfigError::InvalidEnumOption { key: key.to_string(), raw: raw.to_string() })
            }
        }
    }
}

/// Parses a bool the way the reference implementation does:
/// {true,1,yes,on} (case-insensitive) are truthy, everything else falsy.
pub fn parse_bool(raw: &str) -> bool {
    matches!(raw.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Result<String, ConfigError>;
    fn get_int(&self, key: &str) -> Result<i64, ConfigError>;
    fn get_float(&self, key: &str) -> Result<f64, ConfigError>;
    fn get_bool(&self, key: &str) -> Result<bool, ConfigError>;
    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;
    fn get_category(&self, category: &str) -> Result<Vec<ConfigSetting>, ConfigError>;
    fn get_all(&self, redacted: bool) -> Result<Vec<ConfigSetting>, ConfigError>;
    fn validate_required(&self) -> Result<Vec<String>, ConfigError>;
    fn refresh(&self);
}

/// SQLite-backed configuration store with a 5-minute resolved-value memo.
pub struct SqliteConfigStore {
    conn: Mutex<Connection>,
    memo: RwLock<HashMap<String, (String, Instant)>>,
}

impl SqliteConfigStore {
    pub fn new(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)?;
        let schema = CONFIG_VERSIONED_SCHEMAS.last().expect("at least one schema version");
        schema.create(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
            memo: RwLock::new(HashMap::new()),
        };
        store.seed_defaults()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let schema = CONFIG_VERSIONED_SCHEMAS.last().expect("at least one schema version");
        schema.create(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
            memo: RwLock::new(HashMap::new()),
        };
        store.seed_defaults()?;
        Ok(store)
    }

    fn seed_defaults(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        for setting in defaults::default_settings() {
            conn.execute(
                "INSERT OR IGNORE INTO config_settings
                 (key, value, default_value, data_type, category, description, is_sensitive, is_required, is_hidden, enum_options)
                 VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    setting.key,
                    setting.default_value,
                    setting.data_type.as_str(),
                    setting.category,
                    setting.description,
                    setting.is_sensitive as i64,
                    setting.is_required as i64,
                    setting.is_hidden as i64,
                    setting.enum_options.map(|o| o.join(",")),
                ],
            )?;
        }
        Ok(())
    }

    fn row_by_key(conn: &Connection, key: &str) -> rusqlite::Result<Option<ConfigSetting>> {
        conn.query_row(
            "SELECT key, value, default_value, data_type, category, description, is_sensitive, is_required, is_hidden, enum_options
             FROM config_settings WHERE key = ?1",
            params![key],
            |row| {
                let data_type_raw: String = row.get(3)?;
                let enum_options_raw: Option<String> = row.get(9)?;
                Ok(ConfigSetting {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    default_value: row.get(2)?,
                    data_type: DataType::parse(&data_type_raw).unwrap_or(DataType::String),
                    category: row.get(4)?,
                    description: row.get(5)?,
                    is_sensitive: row.get::<_, i64>(6)? != 0,
                    is_required: row.get::<_, i64>(7)? != 0,
                    is_hidden: row.get::<_, i64>(8)? != 0,
                    enum_options: enum_options_raw.map(|s| s.split(',').map(|x| x.to_string()).collect()),
                })
            },
        )
        .map(Some)
        .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(None) } else { Err(e) })
    }

    fn resolve(&self, key: &str) -> Result<String, ConfigError> {
        if let Ok(env_value) = std::env::var(key) {
            return Ok(env_value);
        }

        if let Some((cached, set_at)) = self.memo.read().unwrap().get(key).cloned() {
            if set_at.elapsed() < MEMO_TTL {
                return Ok(cached);
            }
        }

        let conn = self.conn.lock().unwrap();
        let setting = Self::row_by_key(&conn, key)?.ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        let resolved = setting.stored_value().to_string();
        drop(conn);

        self.memo.write().unwrap().insert(key.to_string(), (resolved.clone(), Instant::now()));
        Ok(resolved)
    }
}

impl ConfigStore for SqliteConfigStore {
    fn get(&self, key: &str) -> Result<String, ConfigError> {
        self.resolve(key)
    }

    fn get_int(&self, key: &str) -> Result<i64, ConfigError> {
        let raw = self.resolve(key)?;
        raw.parse().map_err(|_| ConfigError::InvalidValue { key: key.to_string(), expected_type: "int", raw })
    }

    fn get_float(&self, key: &str) -> Result<f64, ConfigError> {
        let raw = self.resolve(key)?;
        raw.parse().map_err(|_| ConfigError::InvalidValue { key: key.to_string(), expected_type: "float", raw })
    }

    fn get_bool(&self, key: &str) -> Result<bool, ConfigError> {
        Ok(parse_bool(&self.resolve(key)?))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let conn = self.conn.lock().unwrap();
        let setting = Self::row_by_key(&conn, key)?.ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        coerce(key, setting.data_type, value, &setting.enum_options)?;
        conn.execute(
            "UPDATE config_settings SET value = ?1 WHERE key = ?2",
            params![value, key],
        )?;
        drop(conn);
        self.memo.write().unwrap().remove(key);
        Ok(())
    }

    fn get_category(&self, category: &str) -> Result<Vec<ConfigSetting>, ConfigError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT key, value, default_value, data_type, category, description, is_sensitive, is_required, is_hidden, enum_options
             FROM config_settings WHERE category = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![category], |row| {
            let data_type_raw: String = row.get(3)?;
            let enum_options_raw: Option<String> = row.get(9)?;
            Ok(ConfigSetting {
                key: row.get(0)?,
                value: row.get(1)?,
                default_value: row.get(2)?,
                data_type: DataType::parse(&data_type_raw).unwrap_or(DataType::String),
                category: row.get(4)?,
                description: row.get(5)?,
                is_sensitive: row.get::<_, i64>(6)? != 0,
                is_required: row.get::<_, i64>(7)? != 0,
                is_hidden: row.get::<_, i64>(8)? != 0,
                enum_options: enum_options_raw.map(|s| s.split(',').map(|x| x.to_string()).collect()),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn get_all(&self, redacted: bool) -> Result<Vec<ConfigSetting>, ConfigError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT key, value, default_value, data_type, category, description, is_sensitive, is_required, is_hidden, enum_options
             FROM config_settings ORDER BY category, key",
        )?;
        let rows = stmt.query_map([], |row| {
            let data_type_raw: String = row.get(3)?;
            let enum_options_raw: Option<String> = row.get(9)?;
            Ok(ConfigSetting {
                key: row.get(0)?,
                value: row.get(1)?,
                default_value: row.get(2)?,
                data_type: DataType::parse(&data_type_raw).unwrap_or(DataType::String),
                category: row.get(4)?,
                description: row.get(5)?,
                is_sensitive: row.get::<_, i64>(6)? != 0,
                is_required: row.get::<_, i64>(7)? != 0,
                is_hidden: row.get::<_, i64>(8)? != 0,
                enum_options: enum_options_raw.map(|s| s.split(',').map(|x| x.to_string()).collect()),
            })
        })?;
        let mut settings: Vec<ConfigSetting> = rows.collect::<Result<Vec<_>, _>>()?;
        if redacted {
            for setting in settings.iter_mut() {
                if setting.is_sensitive {
                    setting.value = Some(REDACTED_PLACEHOLDER.to_string());
                }
            }
        }
        Ok(settings)
    }

    fn validate_required(&self) -> Result<Vec<String>, ConfigError> {
        let all = self.get_all(false)?;
        Ok(all
            .into_iter()
            .filter(|s| s.is_required && s.value.is_none() && std::env::var(&s.key).is_err())
            .map(|s| s.key)
            .collect())
    }

    fn refresh(&self) {
        self.memo.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_returned_when_unset() {
        let store = SqliteConfigStore::new_in_memory().unwrap();
        assert_eq!(store.get_int("MAX_PARALLEL_COMMANDS").unwrap(), 3);
    }

    #[test]
    fn set_overrides_persisted_value() {
        let store = SqliteConfigStore::new_in_memory().unwrap();
        store.set("MAX_PARALLEL_COMMANDS", "7").unwrap();
        assert_eq!(store.get_int("MAX_PARALLEL_COMMANDS").unwrap(), 7);
    }

    #[test]
    fn env_overrides_persisted_value() {
        let store = SqliteConfigStore::new_in_memory().unwrap();
        store.set("MAX_PARALLEL_COMMANDS", "7").unwrap();
        std::env::set_var("MAX_PARALLEL_COMMANDS", "42");
        assert_eq!(store.get_int("MAX_PARALLEL_COMMANDS").unwrap(), 42);
        std::env::remove_var("MAX_PARALLEL_COMMANDS");
    }

    #[test]
    fn unknown_key_is_an_error() {
        let store = SqliteConfigStore::new_in_memory().unwrap();
        assert!(matches!(store.get("NOT_A_KEY"), Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn invalid_coercion_leaves_prior_value_untouched() {
        let store = SqliteConfigStore::new_in_memory().unwrap();
        store.set("MAX_PARALLEL_COMMANDS", "7").unwrap();
        let err = store.set("MAX_PARALLEL_COMMANDS", "not-an-int");
        assert!(err.is_err());
        assert_eq!(store.get_int("MAX_PARALLEL_COMMANDS").unwrap(), 7);
    }

    #[test]
    fn sensitive_values_are_redacted_in_get_all() {
        let store = SqliteConfigStore::new_in_memory().unwrap();
        let all = store.get_all(true).unwrap();
        assert!(all.iter().all(|s| !s.is_sensitive || s.value.as_deref() == Some(REDACTED_PLACEHOLDER) || s.value.is_none()));
    }

    #[test]
    fn refresh_clears_memo_and_picks_up_new_value() {
        let store = SqliteConfigStore::new_in_memory().unwrap();
        store.set("MAX_PARALLEL_COMMANDS", "7").unwrap();
        let _ = store.get_int("MAX_PARALLEL_COMMANDS").unwrap();
        store.refresh();
        assert_eq!(store.get_int("MAX_PARALLEL_COMMANDS").unwrap(), 7);
    }

    #[test]
    fn validate_required_lists_missing_keys() {
        let store = SqliteConfigStore::new_in_memory().unwrap();
        let missing = store.validate_required().unwrap();
        assert!(missing.contains(&"DISCOVERY_ARTIFACT_DIR".to_string()));
        store.set("DISCOVERY_ARTIFACT_DIR", "/tmp/artifacts").unwrap();
        store.set("DB_DIR", "/tmp/db").unwrap();
        let missing = store.validate_required().unwrap();
        assert!(missing.is_empty());
    }

    #[test]
    fn bool_coercion_accepts_expected_truthy_forms() {
        assert!(parse_bool("true"));
        assert!(parse_bool("1"));
        assert!(parse_bool("yes"));
        assert!(parse_bool("On"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("nope"));
    }
}
