//! SQLite schema for the execution registry (C5).

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const COMMAND_EXECUTIONS_TABLE_V1: Table = Table {
    name: "command_executions",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("command_name", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer, non_null = true),
        sqlite_column!("completed_at", &SqlType::Integer),
        sqlite_column!("success", &SqlType::Integer),
        sqlite_column!("duration_seconds", &SqlType::Integer),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("output_summary", &SqlType::Text),
    ],
    indices: &[
        ("idx_command_executions_command_name", "command_name"),
        ("idx_command_executions_status", "status"),
    ],
    unique_constraints: &[],
};

pub const REGISTRY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[COMMAND_EXECUTIONS_TABLE_V1],
    migration: None,
}];
