//! Pushes locally-authored changes to the remote store.
//!
//! The outbox is implicit: dirty rows are pending saves, tombstone rows are
//! pending deletions. A push never clears a flag it did not upload in the
//! same call, so edits made while a push is in flight stay pending.

use rusqlite::Connection;

use crate::db::{
    CityRepository, CountryRepository, SqliteCityRepository, SqliteCountryRepository,
    SqliteTombstoneRepository, TombstoneRepository,
};
use crate::error::Result;
use crate::models::{City, Country, RecordName, RecordType};
use crate::remote::{AssetRef, RemoteError, RemoteRecord, RemoteStore};

/// What a single push accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushSummary {
    /// Records the remote accepted this call
    pub saved: usize,
    /// Tombstones the remote confirmed this call
    pub deleted: usize,
    /// Records the remote rejected and that remain pending
    pub rejected: usize,
}

impl PushSummary {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.saved == 0 && self.deleted == 0 && self.rejected == 0
    }
}

/// Uploads dirty entities and pending tombstones.
pub struct OutboxUploader<'a, R: RemoteStore> {
    conn: &'a Connection,
    remote: &'a R,
    zone_name: &'a str,
}

impl<'a, R: RemoteStore> OutboxUploader<'a, R> {
    pub const fn new(conn: &'a Connection, remote: &'a R, zone_name: &'a str) -> Self {
        Self { conn, remote, zone_name }
    }

    /// Upload every pending local change: dirty countries and cities as
    /// saves, tombstones as deletions.
    ///
    /// Pending city photos are uploaded as assets before the record save so
    /// the record already carries its asset reference. A record whose save
    /// the remote rejects keeps its dirty flag and is retried on the next
    /// push; a rejection carrying the remote's copy of the record is
    /// resubmitted once within this call using the remote's envelope.
    pub async fn push(&self) -> Result<PushSummary> {
        let mut summary = PushSummary::default();

        let records = self.collect_dirty().await?;
        if !records.is_empty() {
            summary = self.save_batch(records).await?;
        }

        summary.deleted = self.push_tombstones().await?;
        Ok(summary)
    }

    /// Gather dirty rows as wire records, uploading pending photos first.
    async fn collect_dirty(&self) -> Result<Vec<RemoteRecord>> {
        let countries = SqliteCountryRepository::new(self.conn);
        let cities = SqliteCityRepository::new(self.conn);

        let mut records = Vec::new();
        for country in countries.list_dirty()? {
            records.push(self.country_record(&country));
        }
        for city in cities.list_dirty()? {
            records.push(self.city_record(&city).await?);
        }
        Ok(records)
    }

    fn country_record(&self, country: &Country) -> RemoteRecord {
        RemoteRecord::country(
            self.zone_name,
            country.record_name.clone(),
            country.name.clone(),
            country.metadata.clone(),
        )
    }

    /// Build the wire record for a dirty city.
    ///
    /// A pending photo is uploaded first and its fresh reference persisted
    /// immediately, so a save rejected later in this push can still be
    /// rebuilt with it. Otherwise the stored reference rides along: a push
    /// that does not change the photo must not strip the record's asset.
    async fn city_record(&self, city: &City) -> Result<RemoteRecord> {
        let asset = match (&city.photo, city.pending_photo_upload) {
            (Some(bytes), true) => {
                let uploaded = self.remote.upload_asset(bytes.clone()).await?;
                SqliteCityRepository::new(self.conn)
                    .set_asset_ref(&city.record_name, uploaded.as_str())?;
                Some(uploaded)
            }
            _ => city.asset_ref.clone().map(AssetRef::new),
        };
        Ok(RemoteRecord::city(
            self.zone_name,
            city.record_name.clone(),
            city.name.clone(),
            city.country.clone().or_else(|| city.parent_ref.clone()),
            asset,
            city.metadata.clone(),
        ))
    }

    async fn save_batch(&self, records: Vec<RemoteRecord>) -> Result<PushSummary> {
        let mut summary = PushSummary::default();
        match self.remote.save_records(records).await {
            Ok(saved) => {
                summary.saved = saved.len();
                self.confirm_saved(&saved)?;
            }
            Err(RemoteError::PartialFailure { saved, failures }) => {
                summary.saved = saved.len();
                self.confirm_saved(&saved)?;

                // Rejections that include the remote's copy lost a version
                // race; resubmit once carrying the remote's envelope.
                let resubmit: Vec<RemoteRecord> = failures
                    .iter()
                    .filter_map(|failure| {
                        let server = failure.server_record.as_ref()?;
                        self.local_record_with_envelope(server)
                    })
                    .collect();
                summary.rejected = failures.len() - resubmit.len();
                for failure in failures
                    .iter()
                    .filter(|failure| failure.server_record.is_none())
                {
                    tracing::warn!(
                        record_name = failure.record_name.as_str(),
                        reason = %failure.reason,
                        "Record rejected by remote; left pending"
                    );
                }

                if !resubmit.is_empty() {
                    match self.remote.save_records(resubmit).await {
                        Ok(saved) => {
                            summary.saved += saved.len();
                            self.confirm_saved(&saved)?;
                        }
                        Err(RemoteError::PartialFailure { saved, failures }) => {
                            summary.saved += saved.len();
                            summary.rejected += failures.len();
                            self.confirm_saved(&saved)?;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
            }
            Err(err) => return Err(err.into()),
        }
        Ok(summary)
    }

    /// Rebuild the pending local record with the remote's version envelope.
    fn local_record_with_envelope(&self, server: &RemoteRecord) -> Option<RemoteRecord> {
        let record = match server.record_type {
            RecordType::Country => {
                let countries = SqliteCountryRepository::new(self.conn);
                let country = countries.get(&server.record_name).ok()??;
                let mut record = self.country_record(&country);
                record.metadata = server.metadata.clone();
                record
            }
            RecordType::City => {
                let cities = SqliteCityRepository::new(self.conn);
                let city = cities.get(&server.record_name).ok()??;
                let mut record = RemoteRecord::city(
                    self.zone_name,
                    city.record_name.clone(),
                    city.name.clone(),
                    city.country.clone().or_else(|| city.parent_ref.clone()),
                    city.asset_ref.clone().map(AssetRef::new),
                    city.metadata.clone(),
                );
                record.metadata = server.metadata.clone();
                record
            }
        };
        Some(record)
    }

    /// Persist the envelopes the remote returned and clear the dirty flags
    /// of exactly the accepted records.
    fn confirm_saved(&self, saved: &[RemoteRecord]) -> Result<()> {
        let countries = SqliteCountryRepository::new(self.conn);
        let cities = SqliteCityRepository::new(self.conn);
        for record in saved {
            let metadata = record.metadata.as_deref().unwrap_or_default();
            match record.record_type {
                RecordType::Country => countries.confirm_uploaded(&record.record_name, metadata)?,
                RecordType::City => cities.confirm_uploaded(&record.record_name, metadata)?,
            }
        }
        Ok(())
    }

    /// Propagate local deletions, dropping each tombstone only once the
    /// remote confirms it.
    async fn push_tombstones(&self) -> Result<usize> {
        let tombstones = SqliteTombstoneRepository::new(self.conn);
        let pending = tombstones.list(self.zone_name)?;
        if pending.is_empty() {
            return Ok(0);
        }

        let names: Vec<RecordName> = pending
            .iter()
            .map(|tombstone| tombstone.record_name.clone())
            .collect();
        let confirmed = self
            .remote
            .delete_records(self.zone_name, names)
            .await?;
        for record_name in &confirmed {
            tombstones.remove(self.zone_name, record_name)?;
        }
        Ok(confirmed.len())
    }
}
