//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 1;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get::<_, i32>(0).map(|flag| flag != 0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Migration to version 1: Initial schema
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "BEGIN;
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        -- Parent entities mirrored from the remote zone
        CREATE TABLE IF NOT EXISTS countries (
            record_name TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            metadata BLOB,
            dirty INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_countries_dirty ON countries(dirty);

        -- Child entities; the resolved link cascades like the remote's
        -- delete-self reference action
        CREATE TABLE IF NOT EXISTS cities (
            record_name TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            country_record_name TEXT REFERENCES countries(record_name) ON DELETE CASCADE,
            parent_ref TEXT,
            photo BLOB,
            pending_photo_upload INTEGER NOT NULL DEFAULT 0,
            asset_ref TEXT,
            metadata BLOB,
            dirty INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_cities_country ON cities(country_record_name);
        CREATE INDEX IF NOT EXISTS idx_cities_parent_ref ON cities(parent_ref);
        CREATE INDEX IF NOT EXISTS idx_cities_dirty ON cities(dirty);

        -- Deletions awaiting confirmation against the remote store
        CREATE TABLE IF NOT EXISTS tombstones (
            zone_name TEXT NOT NULL,
            record_name TEXT NOT NULL,
            record_type TEXT NOT NULL,
            PRIMARY KEY (zone_name, record_name)
        );

        -- Process-wide replication state (flags, change tokens, selection)
        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL
        );

        INSERT INTO schema_version (version) VALUES (1);
        COMMIT;",
    )?;

    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}
