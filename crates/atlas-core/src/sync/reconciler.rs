//! Applies accumulated remote deltas to the local store.
//!
//! Each operation batches its writes inside a single transaction so a crash
//! or store error leaves either the whole batch applied or none of it. The
//! cursors covering a batch are persisted by the caller only after the batch
//! commits.

use std::collections::HashMap;

use rusqlite::Connection;

use crate::db::{
    CityRepository, CountryRepository, SqliteCityRepository, SqliteCountryRepository,
    SqliteTombstoneRepository, TombstoneRepository,
};
use crate::error::Result;
use crate::models::{RecordName, RecordType};
use crate::remote::{AssetRef, DeletedRecord, RemoteRecord};

/// Reconciles remote deltas with local entities.
pub struct Reconciler<'a> {
    conn: &'a Connection,
}

impl<'a> Reconciler<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Upsert a batch of changed records by remote identity.
    ///
    /// Remote-sourced writes overwrite name, metadata, and type-specific
    /// fields, and never leave an entity dirty: the remote has superseded any
    /// local pending change to the same fields. City photos arrive
    /// pre-downloaded in `photos`, keyed by record identity, so no network
    /// work happens inside the transaction.
    ///
    /// A record whose identity carries a pending local tombstone is skipped:
    /// the local deletion has not reached the remote yet and must not be
    /// undone by a delta that predates it.
    pub fn apply_updates(
        &self,
        records: &[RemoteRecord],
        photos: &HashMap<RecordName, Vec<u8>>,
    ) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut applied = 0;
        {
            let countries = SqliteCountryRepository::new(&tx);
            let cities = SqliteCityRepository::new(&tx);
            let tombstones = SqliteTombstoneRepository::new(&tx);

            for record in records {
                if tombstones.contains(&record.zone_name, &record.record_name)? {
                    tracing::debug!(
                        record_name = record.record_name.as_str(),
                        "Skipping update for locally-deleted record"
                    );
                    continue;
                }
                let metadata = record.metadata.as_deref().unwrap_or_default();
                match record.record_type {
                    RecordType::Country => {
                        countries.upsert_from_remote(&record.record_name, &record.name, metadata)?;
                    }
                    RecordType::City => {
                        // Resolve the ownership link inline when the country
                        // row is already local; otherwise keep the transient
                        // reference for the relink pass.
                        let (country, parent_ref) = match &record.parent {
                            Some(parent) if countries.get(parent)?.is_some() => {
                                (Some(parent), None)
                            }
                            Some(parent) => (None, Some(parent)),
                            None => (None, None),
                        };
                        cities.upsert_from_remote(
                            &record.record_name,
                            &record.name,
                            metadata,
                            photos.get(&record.record_name).map(Vec::as_slice),
                            record.asset.as_ref().map(AssetRef::as_str),
                            country,
                            parent_ref,
                        )?;
                    }
                }
                applied += 1;
            }
        }
        tx.commit()?;
        Ok(applied)
    }

    /// Remove local entities for a batch of remotely-deleted identities.
    ///
    /// No tombstones are written: the deletion originated remotely, so there
    /// is nothing left to propagate. Absent identities are skipped.
    pub fn apply_deletions(&self, deletions: &[DeletedRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut removed = 0;
        {
            let countries = SqliteCountryRepository::new(&tx);
            let cities = SqliteCityRepository::new(&tx);

            for deleted in deletions {
                let existed = match deleted.record_type {
                    RecordType::Country => countries.delete(&deleted.record_name)?,
                    RecordType::City => cities.delete(&deleted.record_name)?,
                };
                if existed {
                    removed += 1;
                }
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Resolve transient city-to-country references now that the batch is
    /// applied. Deltas may deliver a city before its country (or vice versa)
    /// depending on page ordering; this pass is idempotent and runs after
    /// every successful pull.
    pub fn relink_orphans(&self) -> Result<usize> {
        let cities = SqliteCityRepository::new(self.conn);
        let linked = cities.relink_orphans()?;
        if linked > 0 {
            tracing::debug!(linked, "Relinked orphaned cities");
        }
        Ok(linked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    const ZONE: &str = "places";

    fn country_record(record_name: &RecordName, name: &str, version: u8) -> RemoteRecord {
        RemoteRecord::country(ZONE, record_name.clone(), name, Some(vec![version]))
    }

    fn city_record(record_name: &RecordName, name: &str, parent: &RecordName) -> RemoteRecord {
        RemoteRecord::city(
            ZONE,
            record_name.clone(),
            name,
            Some(parent.clone()),
            None,
            Some(vec![1]),
        )
    }

    #[test]
    fn apply_updates_is_an_idempotent_upsert() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = Reconciler::new(db.connection());
        let record_name = RecordName::new_country();

        let record = country_record(&record_name, "Norway", 1);
        reconciler.apply_updates(&[record.clone()], &HashMap::new()).unwrap();
        // Re-delivery after a crash-before-token-persist applies cleanly.
        reconciler.apply_updates(&[record], &HashMap::new()).unwrap();

        let countries = SqliteCountryRepository::new(db.connection());
        let all = countries.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Norway");
        assert!(!all[0].dirty);
    }

    #[test]
    fn apply_updates_overwrites_local_pending_change() {
        let db = Database::open_in_memory().unwrap();
        let countries = SqliteCountryRepository::new(db.connection());
        let record_name = RecordName::new_country();
        countries.upsert_from_remote(&record_name, "Norway", &[1]).unwrap();
        countries.rename(&record_name, "My Edit").unwrap();

        let reconciler = Reconciler::new(db.connection());
        reconciler
            .apply_updates(&[country_record(&record_name, "Norge", 2)], &HashMap::new())
            .unwrap();

        let fetched = countries.get(&record_name).unwrap().unwrap();
        assert_eq!(fetched.name, "Norge");
        assert!(!fetched.dirty, "remote write must not leave the row dirty");
    }

    #[test]
    fn apply_updates_links_city_inline_when_country_is_local() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = Reconciler::new(db.connection());
        let parent = RecordName::new_country();
        let child = RecordName::new_city();

        reconciler
            .apply_updates(
                &[
                    country_record(&parent, "Norway", 1),
                    city_record(&child, "Oslo", &parent),
                ],
                &HashMap::new(),
            )
            .unwrap();

        let cities = SqliteCityRepository::new(db.connection());
        let fetched = cities.get(&child).unwrap().unwrap();
        assert_eq!(fetched.country, Some(parent));
        assert!(fetched.parent_ref.is_none());
    }

    #[test]
    fn city_before_country_is_resolved_by_relink() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = Reconciler::new(db.connection());
        let parent = RecordName::new_country();
        let child = RecordName::new_city();

        // Page ordering delivered the city first.
        reconciler
            .apply_updates(&[city_record(&child, "Oslo", &parent)], &HashMap::new())
            .unwrap();
        let cities = SqliteCityRepository::new(db.connection());
        assert!(cities.get(&child).unwrap().unwrap().is_orphan());

        reconciler
            .apply_updates(&[country_record(&parent, "Norway", 1)], &HashMap::new())
            .unwrap();
        assert_eq!(reconciler.relink_orphans().unwrap(), 1);

        let fetched = cities.get(&child).unwrap().unwrap();
        assert_eq!(fetched.country, Some(parent));
        assert!(!fetched.is_orphan());
    }

    #[test]
    fn apply_updates_skips_identities_with_pending_tombstones() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = Reconciler::new(db.connection());
        let record_name = RecordName::new_country();
        reconciler
            .apply_updates(&[country_record(&record_name, "Norway", 1)], &HashMap::new())
            .unwrap();

        // Local deletion recorded but not yet confirmed by the remote.
        let countries = SqliteCountryRepository::new(db.connection());
        countries.delete(&record_name).unwrap();
        let tombstones = SqliteTombstoneRepository::new(db.connection());
        tombstones
            .insert(&crate::models::Tombstone::new(
                ZONE,
                record_name.clone(),
                RecordType::Country,
            ))
            .unwrap();

        // A delta that predates the deletion must not bring the row back.
        let applied = reconciler
            .apply_updates(&[country_record(&record_name, "Norge", 2)], &HashMap::new())
            .unwrap();
        assert_eq!(applied, 0);
        assert!(countries.get(&record_name).unwrap().is_none());
        assert!(tombstones.contains(ZONE, &record_name).unwrap());
    }

    #[test]
    fn apply_updates_materializes_photo_bytes() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = Reconciler::new(db.connection());
        let parent = RecordName::new_country();
        let child = RecordName::new_city();

        let mut record = city_record(&child, "Oslo", &parent);
        record.asset = Some(crate::remote::AssetRef::new("asset-1"));
        let mut photos = HashMap::new();
        photos.insert(child.clone(), vec![5, 5, 5]);

        reconciler.apply_updates(&[record], &photos).unwrap();

        let cities = SqliteCityRepository::new(db.connection());
        let fetched = cities.get(&child).unwrap().unwrap();
        assert_eq!(fetched.photo, Some(vec![5, 5, 5]));
        assert!(!fetched.pending_photo_upload);
        assert_eq!(fetched.asset_ref.as_deref(), Some("asset-1"));
    }

    #[test]
    fn apply_deletions_removes_without_tombstones() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = Reconciler::new(db.connection());
        let record_name = RecordName::new_country();
        reconciler
            .apply_updates(&[country_record(&record_name, "Norway", 1)], &HashMap::new())
            .unwrap();

        let removed = reconciler
            .apply_deletions(&[DeletedRecord {
                record_name: record_name.clone(),
                record_type: RecordType::Country,
            }])
            .unwrap();
        assert_eq!(removed, 1);

        let tombstones: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM tombstones", [], |row| row.get(0))
            .unwrap();
        assert_eq!(tombstones, 0);

        // Deleting an identity that is already gone is not an error.
        let removed = reconciler
            .apply_deletions(&[DeletedRecord {
                record_name,
                record_type: RecordType::Country,
            }])
            .unwrap();
        assert_eq!(removed, 0);
    }
}
