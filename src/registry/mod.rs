//! Execution Registry (C5).
//!
//! Tracks every command execution and acts as the sole concurrency gate: a
//! command cannot begin a second run while an earlier one is still
//! `running`. Grounded on the now-superseded `server_store` job-run
//! tracking methods (`record_job_start`/`record_job_finish`/
//! `mark_stale_jobs_failed`) from the teacher, reshaped to spec §4.5.

mod schema;

pub use schema::REGISTRY_VERSIONED_SCHEMAS;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Scheduler,
    Manual,
    Startup,
}

impl TriggeredBy {
    fn as_str(&self) -> &'static str {
        match self {
            TriggeredBy::Scheduler => "scheduler",
            TriggeredBy::Manual => "manual",
            TriggeredBy::Startup => "startup",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "manual" => TriggeredBy::Manual,
            "startup" => TriggeredBy::Startup,
            _ => TriggeredBy::Scheduler,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "completed" => ExecutionStatus::Completed,
            "failed" => ExecutionStatus::Failed,
            _ => ExecutionStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub id: i64,
    pub command_name: String,
    pub started_at: i64,
    pub completed_at: Option<i64>,
    pub success: Option<bool>,
    pub duration_seconds: Option<i64>,
    pub triggered_by: TriggeredBy,
    pub error_message: Option<String>,
    pub status: ExecutionStatus,
    pub output_summary: Option<serde_json::Value>,
}

impl Execution {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let triggered_by: String = row.get("triggered_by")?;
        let status: String = row.get("status")?;
        let success: Option<i64> = row.get("success")?;
        let output_summary: Option<String> = row.get("output_summary")?;
        Ok(Self {
            id: row.get("id")?,
            command_name: row.get("command_name")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            success: success.map(|v| v != 0),
            duration_seconds: row.get("duration_seconds")?,
            triggered_by: TriggeredBy::parse(&triggered_by),
            error_message: row.get("error_message")?,
            status: ExecutionStatus::parse(&status),
            output_summary: output_summary.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("command '{0}' already has a running execution")]
    AlreadyRunning(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Looked up by the cleanup pass to know how long a command is allowed to
/// run before it's considered timed out / runaway. Implemented by the
/// scheduler's command-config store.
pub trait CommandTimeoutSource: Send + Sync {
    fn timeout_minutes(&self, command_name: &str) -> Option<u32>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub timed_out: usize,
    pub runaway: usize,
    pub retained_pruned: usize,
}

const RUNAWAY_THRESHOLD_SECONDS: i64 = 2 * 3600;

pub struct ExecutionRegistry {
    conn: Mutex<Connection>,
}

impl ExecutionRegistry {
    pub fn new(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        Self::from_connection(Connection::open(db_path)?)
    }

    #[cfg(test)]
    pub fn new_in_memory() -> anyhow::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        let schema = REGISTRY_VERSIONED_SCHEMAS.last().expect("at least one schema version");
        schema.create(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Concurrency gate: the check and the insert happen inside one
    /// transaction so no two callers can both observe "no running row".
    pub fn begin(&self, command_name: &str, triggered_by: TriggeredBy) -> Result<i64, RegistryError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let already_running: Option<i64> = tx
            .query_row(
                "SELECT id FROM command_executions WHERE command_name = ?1 AND status = 'running'",
                params![command_name],
                |row| row.get(0),
            )
            .optional()?;

        if already_running.is_some() {
            return Err(RegistryError::AlreadyRunning(command_name.to_string()));
        }

        tx.execute(
            "INSERT INTO command_executions (command_name, started_at, triggered_by, status)
             VALUES (?1, ?2, ?3, 'running')",
            params![command_name, now(), triggered_by.as_str()],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    pub fn complete(
        &self,
        id: i64,
        success: bool,
        output_summary: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<(), RegistryError> {
        let conn = self.conn.lock().unwrap();
        let started_at: i64 = conn.query_row(
            "SELECT started_at FROM command_executions WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let completed_at = now();
        let duration = completed_at - started_at;
        let status = if success { ExecutionStatus::Completed } else { ExecutionStatus::Failed };
        let output_json = output_summary.map(|v| v.to_string());

        conn.execute(
            "UPDATE command_executions SET
                completed_at = ?1, success = ?2, duration_seconds = ?3,
                status = ?4, output_summary = ?5, error_message = ?6
             WHERE id = ?7",
            params![completed_at, success as i64, duration, status.as_str(), output_json, error, id],
        )?;
        Ok(())
    }

    pub fn list_running(&self) -> Result<Vec<Execution>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM command_executions WHERE status = 'running' ORDER BY started_at DESC",
        )?;
        let rows = stmt.query_map([], Execution::from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_recent(&self, n: usize) -> Result<Vec<Execution>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM command_executions ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![n as i64], Execution::from_row)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_for(&self, command_name: &str, n: usize) -> Result<Vec<Execution>, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM command_executions WHERE command_name = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![command_name, n as i64], Execution::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// For each command, keep the `retention_per_command` most recent rows;
    /// delete the rest.
    pub fn prune(&self, retention_per_command: usize) -> Result<usize, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let mut names_stmt = conn.prepare("SELECT DISTINCT command_name FROM command_executions")?;
        let names: Vec<String> = names_stmt.query_map([], |row| row.get(0))?.collect::<Result<_, _>>()?;
        drop(names_stmt);

        let mut pruned = 0usize;
        for name in names {
            pruned += conn.execute(
                "DELETE FROM command_executions
                 WHERE command_name = ?1 AND id NOT IN (
                    SELECT id FROM command_executions WHERE command_name = ?1
                    ORDER BY started_at DESC LIMIT ?2
                 )",
                params![name, retention_per_command as i64],
            )?;
        }
        Ok(pruned)
    }

    /// Startup pass: every row still `running` is a crash victim.
    pub fn recover_after_restart(&self) -> Result<usize, RegistryError> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE command_executions SET
                status = 'failed', success = 0, completed_at = ?1,
                error_message = 'Command was running when application restarted'
             WHERE status = 'running'",
            params![now()],
        )?;
        Ok(affected)
    }

    /// Runs the three cleanup passes in order: timed-out, runaway, retention.
    pub fn cleanup_once(
        &self,
        timeouts: &dyn CommandTimeoutSource,
        retention_per_command: usize,
    ) -> Result<CleanupReport, RegistryError> {
        let running = self.list_running()?;
        let mut report = CleanupReport::default();
        let current = now();

        for execution in running {
            let age = current - execution.started_at;
            match timeouts.timeout_minutes(&execution.command_name) {
                Some(minutes) if age > minutes as i64 * 60 => {
                    self.fail_timed_out(execution.id, &format!("Command timed out after {minutes} minutes"))?;
                    report.timed_out += 1;
                }
                None if age > RUNAWAY_THRESHOLD_SECONDS => {
                    self.fail_timed_out(
                        execution.id,
                        "Command timed out after 2 hours (no timeout configured)",
                    )?;
                    report.runaway += 1;
                }
                _ => {}
            }
        }

        report.retained_pruned = self.prune(retention_per_command)?;
        Ok(report)
    }

    fn fail_timed_out(&self, id: i64, reason: &str) -> Result<(), RegistryError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE command_executions SET
                status = 'failed', success = 0, completed_at = ?1,
                duration_seconds = ?1 - started_at, error_message = ?2
             WHERE id = ?3",
            params![now(), reason, id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoTimeouts;
    impl CommandTimeoutSource for NoTimeouts {
        fn timeout_minutes(&self, _command_name: &str) -> Option<u32> {
            None
        }
    }

    #[test]
    fn begin_then_complete_round_trips() {
        let reg = ExecutionRegistry::new_in_memory().unwrap();
        let id = reg.begin("sync_playlists", TriggeredBy::Manual).unwrap();
        reg.complete(id, true, Some(&serde_json::json!({"synced": 3})), None).unwrap();
        let recent = reg.list_recent(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, ExecutionStatus::Completed);
        assert_eq!(recent[0].success, Some(true));
    }

    #[test]
    fn begin_refuses_duplicate_running_command() {
        let reg = ExecutionRegistry::new_in_memory().unwrap();
        reg.begin("sync_playlists", TriggeredBy::Scheduler).unwrap();
        let err = reg.begin("sync_playlists", TriggeredBy::Scheduler).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRunning(_)));
    }

    #[test]
    fn list_running_only_returns_unfinished_rows() {
        let reg = ExecutionRegistry::new_in_memory().unwrap();
        let id1 = reg.begin("a", TriggeredBy::Scheduler).unwrap();
        reg.begin("b", TriggeredBy::Scheduler).unwrap();
        reg.complete(id1, true, None, None).unwrap();
        let running = reg.list_running().unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].command_name, "b");
    }

    #[test]
    fn recover_after_restart_fails_all_running_rows() {
        let reg = ExecutionRegistry::new_in_memory().unwrap();
        reg.begin("a", TriggeredBy::Scheduler).unwrap();
        let affected = reg.recover_after_restart().unwrap();
        assert_eq!(affected, 1);
        let recent = reg.list_recent(10).unwrap();
        assert_eq!(recent[0].status, ExecutionStatus::Failed);
        assert_eq!(recent[0].error_message.as_deref(), Some("Command was running when application restarted"));
    }

    #[test]
    fn prune_keeps_only_n_most_recent_per_command() {
        let reg = ExecutionRegistry::new_in_memory().unwrap();
        for _ in 0..5 {
            let id = reg.begin("a", TriggeredBy::Scheduler).unwrap();
            reg.complete(id, true, None, None).unwrap();
        }
        let pruned = reg.prune(2).unwrap();
        assert_eq!(pruned, 3);
        assert_eq!(reg.list_for("a", 100).unwrap().len(), 2);
    }

    #[test]
    fn cleanup_marks_runaway_rows_with_no_timeout_configured() {
        let reg = ExecutionRegistry::new_in_memory().unwrap();
        let id = reg.begin("a", TriggeredBy::Scheduler).unwrap();
        {
            let conn = reg.conn.lock().unwrap();
            conn.execute(
                "UPDATE command_executions SET started_at = ?1 WHERE id = ?2",
                params![now() - RUNAWAY_THRESHOLD_SECONDS - 10, id],
            )
            .unwrap();
        }
        let report = reg.cleanup_once(&NoTimeouts, 50).unwrap();
        assert_eq!(report.runaway, 1);
    }
}
