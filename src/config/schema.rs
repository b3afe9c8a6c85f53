//! SQLite schema for the configuration store.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const CONFIG_SETTINGS_TABLE_V1: Table = Table {
    name: "config_settings",
    columns: &[
        sqlite_column!("key", &SqlType::Text, is_primary_key = true),
        sqlite_column!("value", &SqlType::Text),
        sqlite_column!("default_value", &SqlType::Text, non_null = true),
        sqlite_column!("data_type", &SqlType::Text, non_null = true),
        sqlite_column!("category", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text, non_null = true),
        sqlite_column!("is_sensitive", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("is_required", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("is_hidden", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("enum_options", &SqlType::Text),
    ],
    indices: &[("idx_config_settings_category", "category")],
    unique_constraints: &[],
};

pub const CONFIG_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[CONFIG_SETTINGS_TABLE_V1],
    migration: None,
}];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn schema_creates_successfully() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = &CONFIG_VERSIONED_SCHEMAS[0];
        schema.create(&conn).unwrap();
        schema.validate(&conn).unwrap();
    }
}
