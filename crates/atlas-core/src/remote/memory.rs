//! In-process remote store fake.
//!
//! Backs the engine tests: keeps a change log with sequence-numbered tokens,
//! serves paged delta queries (including historical re-delivery of every saved
//! version), enforces envelope-based conflict checks on bulk saves, and lets
//! tests script failures and token expiry.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use crate::models::RecordName;

use super::record::{AssetRef, ChangeToken, DeletedRecord, RemoteRecord};
use super::{
    DatabaseChangePage, RecordFailure, RemoteError, RemoteResult, RemoteStore, ZoneChangePage,
};

#[derive(Debug, Clone)]
enum LogEvent {
    /// Snapshot of the record as it was saved; re-delivered verbatim so a
    /// single pull can observe multiple versions of the same identity
    Saved(RemoteRecord),
    Deleted(DeletedRecord),
}

#[derive(Debug, Clone)]
struct LogEntry {
    seq: u64,
    zone_name: String,
    event: LogEvent,
}

#[derive(Debug, Default)]
struct Inner {
    zones: HashSet<String>,
    subscriptions: HashSet<String>,
    records: HashMap<RecordName, RemoteRecord>,
    log: Vec<LogEntry>,
    next_seq: u64,
    /// Tokens referring to sequence numbers below this are expired
    min_token_seq: u64,
    page_size: usize,
    assets: HashMap<String, Vec<u8>>,
    next_asset: u64,
    zone_create_calls: u64,
    subscription_create_calls: u64,
    scripted_errors: VecDeque<(FailurePoint, RemoteError)>,
}

/// Operation a scripted error fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    CreateZone,
    CreateSubscription,
    DatabaseChanges,
    ZoneChanges,
    Save,
    Delete,
    AssetUpload,
    AssetDownload,
}

/// In-memory [`RemoteStore`] implementation for tests.
#[derive(Clone)]
pub struct MemoryRemote {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                page_size: usize::MAX,
                ..Inner::default()
            })),
        }
    }

    /// Limit change queries to `page_size` log entries per page.
    #[must_use]
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.inner.lock().unwrap().page_size = page_size.max(1);
        self
    }

    /// Queue an error to be returned by the next operation at `point`.
    pub fn fail_next(&self, point: FailurePoint, error: RemoteError) {
        self.inner
            .lock()
            .unwrap()
            .scripted_errors
            .push_back((point, error));
    }

    /// Invalidate every token issued so far; the next delta query presenting
    /// one fails with [`RemoteError::TokenExpired`].
    pub fn expire_tokens(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.min_token_seq = inner.next_seq;
    }

    /// Current server-side snapshot of a record, if it exists.
    #[must_use]
    pub fn record(&self, record_name: &RecordName) -> Option<RemoteRecord> {
        self.inner.lock().unwrap().records.get(record_name).cloned()
    }

    /// Number of records currently held by the fake.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    /// How many zone-creation calls the fake has observed.
    #[must_use]
    pub fn zone_create_calls(&self) -> u64 {
        self.inner.lock().unwrap().zone_create_calls
    }

    /// How many subscription-creation calls the fake has observed.
    #[must_use]
    pub fn subscription_create_calls(&self) -> u64 {
        self.inner.lock().unwrap().subscription_create_calls
    }

    fn take_scripted(&self, point: FailurePoint) -> Option<RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .scripted_errors
            .front()
            .is_some_and(|(queued, _)| *queued == point)
        {
            return inner.scripted_errors.pop_front().map(|(_, error)| error);
        }
        None
    }
}

fn encode_token(seq: u64) -> ChangeToken {
    ChangeToken::new(seq.to_le_bytes().to_vec())
}

fn decode_token(token: Option<&ChangeToken>, min_valid: u64) -> RemoteResult<u64> {
    let Some(token) = token else {
        // Absent token means "fetch everything"; it can never expire.
        return Ok(0);
    };

    let bytes: [u8; 8] = token
        .as_bytes()
        .try_into()
        .map_err(|_| RemoteError::Api("malformed change token".to_string()))?;
    let seq = u64::from_le_bytes(bytes);
    if seq < min_valid {
        return Err(RemoteError::TokenExpired);
    }
    Ok(seq)
}

impl RemoteStore for MemoryRemote {
    async fn create_zone(&self, zone_name: &str) -> RemoteResult<()> {
        self.inner.lock().unwrap().zone_create_calls += 1;
        if let Some(error) = self.take_scripted(FailurePoint::CreateZone) {
            return Err(error);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.zones.insert(zone_name.to_string());
        Ok(())
    }

    async fn create_subscription(&self, subscription_id: &str) -> RemoteResult<()> {
        self.inner.lock().unwrap().subscription_create_calls += 1;
        if let Some(error) = self.take_scripted(FailurePoint::CreateSubscription) {
            return Err(error);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.subscriptions.insert(subscription_id.to_string());
        Ok(())
    }

    async fn fetch_database_changes(
        &self,
        since: Option<&ChangeToken>,
    ) -> RemoteResult<DatabaseChangePage> {
        if let Some(error) = self.take_scripted(FailurePoint::DatabaseChanges) {
            return Err(error);
        }
        let inner = self.inner.lock().unwrap();
        let since_seq = decode_token(since, inner.min_token_seq)?;

        let pending: Vec<&LogEntry> = inner
            .log
            .iter()
            .filter(|entry| entry.seq > since_seq)
            .collect();
        let page: Vec<&LogEntry> = pending.iter().take(inner.page_size).copied().collect();
        let more = pending.len() > page.len();

        let mut changed_zones = Vec::new();
        for entry in &page {
            if !changed_zones.contains(&entry.zone_name) {
                changed_zones.push(entry.zone_name.clone());
            }
        }
        let token = encode_token(page.last().map_or(inner.next_seq, |entry| entry.seq));

        Ok(DatabaseChangePage {
            changed_zones,
            token,
            more,
        })
    }

    async fn fetch_zone_changes(
        &self,
        zone_name: &str,
        since: Option<&ChangeToken>,
    ) -> RemoteResult<ZoneChangePage> {
        if let Some(error) = self.take_scripted(FailurePoint::ZoneChanges) {
            return Err(error);
        }
        let inner = self.inner.lock().unwrap();
        let since_seq = decode_token(since, inner.min_token_seq)?;

        let pending: Vec<&LogEntry> = inner
            .log
            .iter()
            .filter(|entry| entry.seq > since_seq && entry.zone_name == zone_name)
            .collect();
        let page: Vec<&LogEntry> = pending.iter().take(inner.page_size).copied().collect();
        let more = pending.len() > page.len();

        let mut changed = Vec::new();
        let mut deleted = Vec::new();
        for entry in &page {
            match &entry.event {
                LogEvent::Saved(record) => changed.push(record.clone()),
                LogEvent::Deleted(record) => deleted.push(record.clone()),
            }
        }
        let token = encode_token(page.last().map_or(inner.next_seq, |entry| entry.seq));

        Ok(ZoneChangePage {
            changed,
            deleted,
            token,
            more,
        })
    }

    async fn save_records(&self, records: Vec<RemoteRecord>) -> RemoteResult<Vec<RemoteRecord>> {
        if let Some(error) = self.take_scripted(FailurePoint::Save) {
            return Err(error);
        }
        let mut inner = self.inner.lock().unwrap();

        let mut saved = Vec::new();
        let mut failures = Vec::new();
        for mut record in records {
            if !inner.zones.contains(&record.zone_name) {
                failures.push(RecordFailure {
                    record_name: record.record_name.clone(),
                    reason: format!("unknown zone: {}", record.zone_name),
                    server_record: None,
                });
                continue;
            }

            match inner.records.get(&record.record_name) {
                Some(existing) if existing.metadata != record.metadata => {
                    // Envelope mismatch: another writer got there first.
                    failures.push(RecordFailure {
                        record_name: record.record_name.clone(),
                        reason: "server record changed".to_string(),
                        server_record: Some(existing.clone()),
                    });
                    continue;
                }
                None if record.metadata.is_some() => {
                    failures.push(RecordFailure {
                        record_name: record.record_name.clone(),
                        reason: "record not found".to_string(),
                        server_record: None,
                    });
                    continue;
                }
                _ => {}
            }

            inner.next_seq += 1;
            let seq = inner.next_seq;
            record.metadata = Some(seq.to_le_bytes().to_vec());
            inner.records.insert(record.record_name.clone(), record.clone());
            inner.log.push(LogEntry {
                seq,
                zone_name: record.zone_name.clone(),
                event: LogEvent::Saved(record.clone()),
            });
            saved.push(record);
        }

        if failures.is_empty() {
            Ok(saved)
        } else {
            Err(RemoteError::PartialFailure { saved, failures })
        }
    }

    async fn delete_records(
        &self,
        zone_name: &str,
        record_names: Vec<RecordName>,
    ) -> RemoteResult<Vec<RecordName>> {
        if let Some(error) = self.take_scripted(FailurePoint::Delete) {
            return Err(error);
        }
        let mut inner = self.inner.lock().unwrap();

        let mut confirmed = Vec::new();
        for record_name in record_names {
            if let Some(existing) = inner.records.remove(&record_name) {
                inner.next_seq += 1;
                let seq = inner.next_seq;
                inner.log.push(LogEntry {
                    seq,
                    zone_name: zone_name.to_string(),
                    event: LogEvent::Deleted(DeletedRecord {
                        record_name: record_name.clone(),
                        record_type: existing.record_type,
                    }),
                });
            }
            // Deleting an already-absent record is confirmed as well; the
            // caller only needs to know the identity no longer exists.
            confirmed.push(record_name);
        }
        Ok(confirmed)
    }

    async fn upload_asset(&self, data: Vec<u8>) -> RemoteResult<AssetRef> {
        if let Some(error) = self.take_scripted(FailurePoint::AssetUpload) {
            return Err(error);
        }
        let mut inner = self.inner.lock().unwrap();
        inner.next_asset += 1;
        let reference = format!("asset-{}", inner.next_asset);
        inner.assets.insert(reference.clone(), data);
        Ok(AssetRef::new(reference))
    }

    async fn download_asset(&self, asset: &AssetRef) -> RemoteResult<Vec<u8>> {
        if let Some(error) = self.take_scripted(FailurePoint::AssetDownload) {
            return Err(error);
        }
        let inner = self.inner.lock().unwrap();
        inner
            .assets
            .get(asset.as_str())
            .cloned()
            .ok_or_else(|| RemoteError::Api(format!("unknown asset: {}", asset.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn country(name: &str) -> RemoteRecord {
        RemoteRecord::country("places", RecordName::new_country(), name, None)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_then_fetch_changes_round_trip() {
        let remote = MemoryRemote::new();
        remote.create_zone("places").await.unwrap();

        let saved = remote.save_records(vec![country("Norway")]).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].metadata.is_some());

        let db_page = remote.fetch_database_changes(None).await.unwrap();
        assert_eq!(db_page.changed_zones, vec!["places".to_string()]);
        assert!(!db_page.more);

        let zone_page = remote.fetch_zone_changes("places", None).await.unwrap();
        assert_eq!(zone_page.changed.len(), 1);
        assert!(zone_page.deleted.is_empty());

        // Nothing new after the returned token.
        let quiet = remote
            .fetch_database_changes(Some(&db_page.token))
            .await
            .unwrap();
        assert!(quiet.changed_zones.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_with_stale_envelope_reports_partial_failure() {
        let remote = MemoryRemote::new();
        remote.create_zone("places").await.unwrap();

        let saved = remote.save_records(vec![country("Norway")]).await.unwrap();
        let mut first = saved[0].clone();

        // A second writer updates the record, invalidating the first envelope.
        let mut second = remote.record(&first.record_name).unwrap();
        second.name = "Noreg".to_string();
        remote.save_records(vec![second]).await.unwrap();

        first.name = "Norge".to_string();
        let error = remote.save_records(vec![first]).await.unwrap_err();
        match error {
            RemoteError::PartialFailure { saved, failures } => {
                assert!(saved.is_empty());
                assert_eq!(failures.len(), 1);
                let server = failures[0].server_record.as_ref().unwrap();
                assert_eq!(server.name, "Noreg");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn expired_token_is_a_distinct_error() {
        let remote = MemoryRemote::new();
        remote.create_zone("places").await.unwrap();
        remote.save_records(vec![country("Norway")]).await.unwrap();

        let page = remote.fetch_database_changes(None).await.unwrap();
        remote.expire_tokens();

        let error = remote
            .fetch_database_changes(Some(&page.token))
            .await
            .unwrap_err();
        assert_eq!(error, RemoteError::TokenExpired);

        // Absent token still works and re-enumerates from the start.
        assert!(remote.fetch_database_changes(None).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn paging_splits_the_log_and_sets_more() {
        let remote = MemoryRemote::new().with_page_size(2);
        remote.create_zone("places").await.unwrap();
        for name in ["Norway", "Sweden", "Denmark"] {
            remote.save_records(vec![country(name)]).await.unwrap();
        }

        let first = remote.fetch_zone_changes("places", None).await.unwrap();
        assert_eq!(first.changed.len(), 2);
        assert!(first.more);

        let second = remote
            .fetch_zone_changes("places", Some(&first.token))
            .await
            .unwrap();
        assert_eq!(second.changed.len(), 1);
        assert!(!second.more);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scripted_errors_fire_once() {
        let remote = MemoryRemote::new();
        remote.create_zone("places").await.unwrap();
        remote.fail_next(
            FailurePoint::Save,
            RemoteError::Network("socket reset".to_string()),
        );

        let error = remote.save_records(vec![country("Norway")]).await.unwrap_err();
        assert!(matches!(error, RemoteError::Network(_)));

        assert!(remote.save_records(vec![country("Norway")]).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn asset_round_trip() {
        let remote = MemoryRemote::new();
        let asset = remote.upload_asset(vec![9, 9, 9]).await.unwrap();
        assert_eq!(remote.download_asset(&asset).await.unwrap(), vec![9, 9, 9]);
        assert!(remote
            .download_asset(&AssetRef::new("missing"))
            .await
            .is_err());
    }
}
