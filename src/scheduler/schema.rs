//! SQLite schema for command configuration (C6).

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const COMMAND_CONFIGS_TABLE_V1: Table = Table {
    name: "command_configs",
    columns: &[
        sqlite_column!("name", &SqlType::Text, is_primary_key = true),
        sqlite_column!("display_name", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text, non_null = true),
        sqlite_column!("enabled", &SqlType::Integer, non_null = true),
        sqlite_column!("cron_expr", &SqlType::Text),
        sqlite_column!("interval_hours", &SqlType::Integer),
        sqlite_column!("timeout_minutes", &SqlType::Integer),
        sqlite_column!("config_json", &SqlType::Text, non_null = true),
        sqlite_column!("is_internal", &SqlType::Integer, non_null = true),
        sqlite_column!("last_run", &SqlType::Integer),
        sqlite_column!("last_success", &SqlType::Integer),
        sqlite_column!("last_duration", &SqlType::Integer),
        sqlite_column!("last_error", &SqlType::Text),
    ],
    indices: &[],
    unique_constraints: &[],
};

pub const SCHEDULER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[COMMAND_CONFIGS_TABLE_V1],
    migration: None,
}];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn schema_creates_successfully() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = &SCHEDULER_VERSIONED_SCHEMAS[0];
        schema.create(&conn).unwrap();
        schema.validate(&conn).unwrap();
    }
}
