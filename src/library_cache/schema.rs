//! SQLite schema for the library cache (C3).

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const LIBRARY_CACHE_TABLE_V1: Table = Table {
    name: "library_cache",
    columns: &[
        sqlite_column!("cache_key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("service", &SqlType::Text, non_null = true),
        sqlite_column!("base_url", &SqlType::Text, non_null = true),
        sqlite_column!("library_key", &SqlType::Text, non_null = true),
        sqlite_column!("schema_version", &SqlType::Integer, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!("track_count", &SqlType::Integer, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("expires_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_library_cache_service", "service")],
    unique_constraints: &[],
};

pub const LIBRARY_CACHE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[LIBRARY_CACHE_TABLE_V1],
    migration: None,
}];
