//! Tombstone repository implementation

use crate::error::Result;
use crate::models::{RecordName, RecordType, Tombstone};
use rusqlite::{params, Connection};

/// Trait for tombstone storage operations
pub trait TombstoneRepository {
    /// Record a deletion awaiting remote confirmation. Re-recording the same
    /// identity is a no-op.
    fn insert(&self, tombstone: &Tombstone) -> Result<()>;

    /// List pending tombstones for a zone
    fn list(&self, zone_name: &str) -> Result<Vec<Tombstone>>;

    /// Whether a pending tombstone exists for this identity
    fn contains(&self, zone_name: &str, record_name: &RecordName) -> Result<bool>;

    /// Remove a tombstone once the remote deletion is confirmed
    fn remove(&self, zone_name: &str, record_name: &RecordName) -> Result<()>;
}

/// `SQLite` implementation of `TombstoneRepository`
pub struct SqliteTombstoneRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteTombstoneRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl TombstoneRepository for SqliteTombstoneRepository<'_> {
    fn insert(&self, tombstone: &Tombstone) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO tombstones (zone_name, record_name, record_type) VALUES (?, ?, ?)",
            params![
                tombstone.zone_name,
                tombstone.record_name.as_str(),
                tombstone.record_type.as_str()
            ],
        )?;
        Ok(())
    }

    fn list(&self, zone_name: &str) -> Result<Vec<Tombstone>> {
        let mut stmt = self.conn.prepare(
            "SELECT zone_name, record_name, record_type FROM tombstones WHERE zone_name = ?",
        )?;
        let tombstones = stmt
            .query_map(params![zone_name], |row| {
                let record_name: String = row.get(1)?;
                let record_type: String = row.get(2)?;
                Ok((row.get::<_, String>(0)?, record_name, record_type))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        tombstones
            .into_iter()
            .map(|(zone_name, record_name, record_type)| {
                let record_type = RecordType::parse(&record_type).ok_or_else(|| {
                    crate::error::Error::InvalidInput(format!(
                        "unknown tombstone record type: {record_type}"
                    ))
                })?;
                Ok(Tombstone::new(zone_name, record_name.into(), record_type))
            })
            .collect()
    }

    fn contains(&self, zone_name: &str, record_name: &RecordName) -> Result<bool> {
        let exists: i32 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM tombstones WHERE zone_name = ? AND record_name = ?)",
            params![zone_name, record_name.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists != 0)
    }

    fn remove(&self, zone_name: &str, record_name: &RecordName) -> Result<()> {
        self.conn.execute(
            "DELETE FROM tombstones WHERE zone_name = ? AND record_name = ?",
            params![zone_name, record_name.as_str()],
        )?;
        Ok(())
    }
}
