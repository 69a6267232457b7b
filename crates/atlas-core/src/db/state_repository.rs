//! Replication state repository implementation
//!
//! Persists the process-wide flags and change cursors the engine depends on.
//! Injected explicitly (never ambient) so tests can run each case against a
//! fresh store.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::models::RecordName;
use crate::remote::ChangeToken;

/// Documented keys of the replication state store.
pub mod state_keys {
    /// Whether the change subscription was created on the remote store
    pub const SUBSCRIPTION_SAVED: &str = "subscription_saved";
    /// Whether the custom zone was created on the remote store
    pub const ZONE_CREATED: &str = "zone_created";
    /// Whether the remote account is currently usable
    pub const REMOTE_AVAILABLE: &str = "remote_available";
    /// Database-scoped change cursor
    pub const DATABASE_CHANGE_TOKEN: &str = "database_change_token";
    /// Zone-scoped change cursor
    pub const ZONE_CHANGE_TOKEN: &str = "zone_change_token";
    /// Currently selected country (scopes which city deltas are accepted)
    pub const SELECTED_COUNTRY: &str = "selected_country";
    /// When the last pull committed
    pub const LAST_SYNC_AT: &str = "last_sync_at";
}

/// Trait for replication state storage operations
pub trait SyncStateRepository {
    /// Read a boolean flag; absent means false
    fn get_flag(&self, key: &str) -> Result<bool>;

    /// Store a boolean flag
    fn set_flag(&self, key: &str, value: bool) -> Result<()>;

    /// Read a change cursor; absent means "fetch everything"
    fn get_token(&self, key: &str) -> Result<Option<ChangeToken>>;

    /// Store a change cursor
    fn set_token(&self, key: &str, token: &ChangeToken) -> Result<()>;

    /// Discard both persisted cursors so the next pull is a full re-fetch
    fn clear_tokens(&self) -> Result<()>;

    /// Read a timestamp; absent means never
    fn get_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>>;

    /// Store a timestamp
    fn set_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<()>;

    /// Read the selected country scoping city deltas
    fn selected_country(&self) -> Result<Option<RecordName>>;

    /// Store or clear the selected country
    fn set_selected_country(&self, country: Option<&RecordName>) -> Result<()>;
}

/// `SQLite` implementation of `SyncStateRepository` over the `sync_state`
/// key/value table.
pub struct SqliteSyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    fn set_blob(&self, key: &str, value: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_state WHERE key = ?", params![key])?;
        Ok(())
    }
}

impl SyncStateRepository for SqliteSyncStateRepository<'_> {
    fn get_flag(&self, key: &str) -> Result<bool> {
        Ok(self.get_blob(key)?.is_some_and(|value| value == b"1"))
    }

    fn set_flag(&self, key: &str, value: bool) -> Result<()> {
        self.set_blob(key, if value { b"1" } else { b"0" })
    }

    fn get_token(&self, key: &str) -> Result<Option<ChangeToken>> {
        Ok(self.get_blob(key)?.map(ChangeToken::new))
    }

    fn set_token(&self, key: &str, token: &ChangeToken) -> Result<()> {
        self.set_blob(key, token.as_bytes())
    }

    fn clear_tokens(&self) -> Result<()> {
        self.remove(state_keys::DATABASE_CHANGE_TOKEN)?;
        self.remove(state_keys::ZONE_CHANGE_TOKEN)?;
        Ok(())
    }

    fn get_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.get_blob(key)?.and_then(|value| {
            let text = String::from_utf8_lossy(&value).into_owned();
            DateTime::parse_from_rfc3339(&text)
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc))
        }))
    }

    fn set_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        self.set_blob(key, at.to_rfc3339().as_bytes())
    }

    fn selected_country(&self) -> Result<Option<RecordName>> {
        Ok(self
            .get_blob(state_keys::SELECTED_COUNTRY)?
            .map(|value| RecordName::from(String::from_utf8_lossy(&value).into_owned())))
    }

    fn set_selected_country(&self, country: Option<&RecordName>) -> Result<()> {
        match country {
            Some(country) => self.set_blob(state_keys::SELECTED_COUNTRY, country.as_str().as_bytes()),
            None => self.remove(state_keys::SELECTED_COUNTRY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_flags_default_false() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStateRepository::new(db.connection());

        assert!(!repo.get_flag(state_keys::SUBSCRIPTION_SAVED).unwrap());
        assert!(!repo.get_flag(state_keys::REMOTE_AVAILABLE).unwrap());

        repo.set_flag(state_keys::ZONE_CREATED, true).unwrap();
        assert!(repo.get_flag(state_keys::ZONE_CREATED).unwrap());

        repo.set_flag(state_keys::ZONE_CREATED, false).unwrap();
        assert!(!repo.get_flag(state_keys::ZONE_CREATED).unwrap());
    }

    #[test]
    fn test_tokens_absent_then_cleared() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStateRepository::new(db.connection());

        assert!(repo
            .get_token(state_keys::DATABASE_CHANGE_TOKEN)
            .unwrap()
            .is_none());

        let token = ChangeToken::new(vec![1, 2, 3]);
        repo.set_token(state_keys::DATABASE_CHANGE_TOKEN, &token)
            .unwrap();
        repo.set_token(state_keys::ZONE_CHANGE_TOKEN, &token).unwrap();
        assert_eq!(
            repo.get_token(state_keys::DATABASE_CHANGE_TOKEN).unwrap(),
            Some(token)
        );

        repo.clear_tokens().unwrap();
        assert!(repo
            .get_token(state_keys::DATABASE_CHANGE_TOKEN)
            .unwrap()
            .is_none());
        assert!(repo
            .get_token(state_keys::ZONE_CHANGE_TOKEN)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_timestamp_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStateRepository::new(db.connection());

        assert!(repo.get_timestamp(state_keys::LAST_SYNC_AT).unwrap().is_none());

        let now = Utc::now();
        repo.set_timestamp(state_keys::LAST_SYNC_AT, now).unwrap();
        let stored = repo.get_timestamp(state_keys::LAST_SYNC_AT).unwrap().unwrap();
        assert_eq!(stored.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_selected_country_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStateRepository::new(db.connection());

        assert!(repo.selected_country().unwrap().is_none());

        let country = RecordName::new_country();
        repo.set_selected_country(Some(&country)).unwrap();
        assert_eq!(repo.selected_country().unwrap(), Some(country));

        repo.set_selected_country(None).unwrap();
        assert!(repo.selected_country().unwrap().is_none());
    }
}
