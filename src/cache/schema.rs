//! SQLite schema for the response/failure cache (C2).

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const CACHE_ENTRIES_TABLE_V1: Table = Table {
    name: "cache_entries",
    columns: &[
        sqlite_column!("fingerprint", &SqlType::Text, is_primary_key = true),
        sqlite_column!("source", &SqlType::Text, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("expires_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_cache_entries_source", "source"),
        ("idx_cache_entries_expires_at", "expires_at"),
    ],
    unique_constraints: &[],
};

const FAILED_LOOKUPS_TABLE_V1: Table = Table {
    name: "failed_lookups",
    columns: &[
        sqlite_column!("fingerprint", &SqlType::Text, is_primary_key = true),
        sqlite_column!("source", &SqlType::Text, non_null = true),
        sqlite_column!("error_reason", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("expires_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_failed_lookups_source", "source"),
        ("idx_failed_lookups_expires_at", "expires_at"),
    ],
    unique_constraints: &[],
};

pub const CACHE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[CACHE_ENTRIES_TABLE_V1, FAILED_LOOKUPS_TABLE_V1],
    migration: None,
}];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn schema_creates_successfully() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = &CACHE_VERSIONED_SCHEMAS[0];
        schema.create(&conn).unwrap();
        schema.validate(&conn).unwrap();
    }
}
