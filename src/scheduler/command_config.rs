//! `CommandConfig` persistence: display metadata, schedule, timeout, and the
//! run-history summary fields the status surface reads (§3, §6).

use crate::registry::CommandTimeoutSource;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandSchedule {
    Cron { expression: String },
    IntervalHours { hours: u32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandConfig {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub enabled: bool,
    pub schedule: CommandSchedule,
    pub timeout_minutes: Option<u32>,
    pub config_json: serde_json::Value,
    pub is_internal: bool,
    pub last_run: Option<i64>,
    pub last_success: Option<bool>,
    pub last_duration: Option<i64>,
    pub last_error: Option<String>,
}

impl CommandConfig {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let cron_expr: Option<String> = row.get("cron_expr")?;
        let interval_hours: Option<i64> = row.get("interval_hours")?;
        let schedule = match cron_expr {
            Some(expression) => CommandSchedule::Cron { expression },
            None => CommandSchedule::IntervalHours { hours: interval_hours.unwrap_or(24) as u32 },
        };
        let last_success: Option<i64> = row.get("last_success")?;
        let config_json: String = row.get("config_json")?;
        Ok(Self {
            name: row.get("name")?,
            display_name: row.get("display_name")?,
            description: row.get("description")?,
            enabled: row.get::<_, i64>("enabled")? != 0,
            schedule,
            timeout_minutes: row.get::<_, Option<i64>>("timeout_minutes")?.map(|v| v as u32),
            config_json: serde_json::from_str(&config_json).unwrap_or(serde_json::Value::Null),
            is_internal: row.get::<_, i64>("is_internal")? != 0,
            last_run: row.get("last_run")?,
            last_success: last_success.map(|v| v != 0),
            last_duration: row.get("last_duration")?,
            last_error: row.get("last_error")?,
        })
    }
}

#[derive(Debug, Error)]
pub enum CommandConfigError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("timeout must be strictly positive")]
    NonPositiveTimeout,
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

pub struct CommandConfigStore {
    conn: Mutex<Connection>,
}

impl CommandConfigStore {
    pub fn new(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::from_connection(Connection::open(db_path)?)
    }

    #[cfg(test)]
    pub fn new_in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        let schema = super::schema::SCHEDULER_VERSIONED_SCHEMAS.last().expect("at least one schema version");
        schema.create(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Registers a command's static config on first start; already-present
    /// rows are left untouched (their enabled/schedule/timeout may have been
    /// edited by the user since).
    pub fn register_default(
        &self,
        name: &str,
        display_name: &str,
        description: &str,
        schedule: CommandSchedule,
        timeout_minutes: Option<u32>,
        is_internal: bool,
    ) -> Result<(), CommandConfigError> {
        if let Some(minutes) = timeout_minutes {
            if minutes == 0 {
                return Err(CommandConfigError::NonPositiveTimeout);
            }
        }
        let (cron_expr, interval_hours) = match &schedule {
            CommandSchedule::Cron { expression } => (Some(expression.clone()), None),
            CommandSchedule::IntervalHours { hours } => (None, Some(*hours as i64)),
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO command_configs
                (name, display_name, description, enabled, cron_expr, interval_hours,
                 timeout_minutes, config_json, is_internal)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, '{}', ?7)",
            params![name, display_name, description, cron_expr, interval_hours, timeout_minutes, is_internal as i64],
        )?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<CommandConfig, CommandConfigError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM command_configs WHERE name = ?1", params![name], CommandConfig::from_row)
            .map_err(|_| CommandConfigError::UnknownCommand(name.to_string()))
    }

    pub fn list(&self) -> Result<Vec<CommandConfig>, CommandConfigError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM command_configs ORDER BY name")?;
        let rows = stmt.query_map([], CommandConfig::from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), CommandConfigError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE command_configs SET enabled = ?1 WHERE name = ?2",
            params![enabled as i64, name],
        )?;
        if affected == 0 {
            return Err(CommandConfigError::UnknownCommand(name.to_string()));
        }
        Ok(())
    }

    pub fn record_run(&self, name: &str, started_at: i64, success: bool, duration: i64, error: Option<&str>) -> Result<(), CommandConfigError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE command_configs SET last_run = ?1, last_success = ?2, last_duration = ?3, last_error = ?4
             WHERE name = ?5",
            params![started_at, success as i64, duration, error, name],
        )?;
        Ok(())
    }
}

impl CommandTimeoutSource for CommandConfigStore {
    fn timeout_minutes(&self, command_name: &str) -> Option<u32> {
        self.get(command_name).ok().and_then(|c| c.timeout_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_default_is_idempotent() {
        let store = CommandConfigStore::new_in_memory().unwrap();
        let schedule = CommandSchedule::IntervalHours { hours: 24 };
        store.register_default("sync_playlists", "Sync Playlists", "desc", schedule.clone(), None, false).unwrap();
        store.set_enabled("sync_playlists", false).unwrap();
        store.register_default("sync_playlists", "Sync Playlists", "desc", schedule, None, false).unwrap();
        assert!(!store.get("sync_playlists").unwrap().enabled);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let store = CommandConfigStore::new_in_memory().unwrap();
        let err = store
            .register_default("x", "X", "d", CommandSchedule::IntervalHours { hours: 1 }, Some(0), false)
            .unwrap_err();
        assert!(matches!(err, CommandConfigError::NonPositiveTimeout));
    }

    #[test]
    fn timeout_minutes_reads_through_trait() {
        let store = CommandConfigStore::new_in_memory().unwrap();
        store
            .register_default("x", "X", "d", CommandSchedule::IntervalHours { hours: 1 }, Some(30), false)
            .unwrap();
        let source: &dyn CommandTimeoutSource = &store;
        assert_eq!(source.timeout_minutes("x"), Some(30));
        assert_eq!(source.timeout_minutes("unknown"), None);
    }
}
