//! Crash-safe replication between the local store and a remote store.
//!
//! [`SyncEngine`] ties the pieces together: one-time provisioning
//! ([`SyncCoordinator`]), cursor-driven pulls ([`DeltaFetcher`] feeding the
//! [`Reconciler`]), dirty-flag pushes ([`OutboxUploader`]), and a single
//! error-to-recovery mapping ([`classify`]). Cursors are persisted only
//! after the deltas they cover are committed locally, so any crash replays
//! a window instead of skipping one.

pub mod classifier;
pub mod coordinator;
pub mod fetcher;
pub mod outbox;
pub mod reconciler;

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::broadcast;

use crate::db::{state_keys, SqliteSyncStateRepository, SyncStateRepository};
use crate::error::{Error, Result};
use crate::remote::{RemoteError, RemoteStore};

pub use classifier::{classify, RecoveryAction, RESYNC_DELAY};
pub use coordinator::SyncCoordinator;
pub use fetcher::{DeltaFetcher, FetchOutcome, FetchedChanges};
pub use outbox::{OutboxUploader, PushSummary};
pub use reconciler::Reconciler;

/// Notifications emitted by the engine for the surrounding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// A pull committed remote changes into the local store
    DataChanged,
    /// Cursors were discarded; run a full resync after `delay`
    ResyncScheduled { delay: Duration },
    /// The remote reported the account unavailable; sync is suspended
    /// until provisioning succeeds again
    RemoteUnavailable,
}

/// Result of a pull cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// Remote deltas were committed locally
    NewData { applied: usize, removed: usize },
    /// The remote had nothing new
    NoData,
    /// Nothing ran: another cycle held the gate, or the remote is not
    /// currently available
    Skipped,
}

/// Replication engine over one zone of a remote store.
///
/// At most one sync cycle runs at a time; a cycle requested while another
/// is in flight is skipped rather than queued, since the running cycle
/// already covers the change window.
pub struct SyncEngine<'a, R: RemoteStore> {
    conn: &'a Connection,
    remote: &'a R,
    zone_name: String,
    gate: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
}

impl<'a, R: RemoteStore> SyncEngine<'a, R> {
    pub fn new(conn: &'a Connection, remote: &'a R, zone_name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            conn,
            remote,
            zone_name: zone_name.into(),
            gate: tokio::sync::Mutex::new(()),
            events,
        }
    }

    /// Subscribe to engine notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Ensure the remote zone and subscription exist and mark the remote
    /// available. Must succeed once before pull or push will run.
    pub async fn provision(&self) -> Result<()> {
        let coordinator = SyncCoordinator::new(self.conn, self.remote, &self.zone_name);
        match coordinator.provision().await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.apply_recovery(&err)?;
                Err(err)
            }
        }
    }

    /// Push pending local changes, then pull remote deltas.
    pub async fn sync(&self) -> Result<PullOutcome> {
        let Ok(_guard) = self.gate.try_lock() else {
            tracing::debug!("Sync already in flight; skipping");
            return Ok(PullOutcome::Skipped);
        };
        if !self.remote_available()? {
            return Ok(PullOutcome::Skipped);
        }
        self.push_locked().await?;
        self.pull_locked().await
    }

    /// Pull remote deltas and commit them locally.
    pub async fn pull(&self) -> Result<PullOutcome> {
        let Ok(_guard) = self.gate.try_lock() else {
            tracing::debug!("Sync already in flight; skipping pull");
            return Ok(PullOutcome::Skipped);
        };
        if !self.remote_available()? {
            return Ok(PullOutcome::Skipped);
        }
        self.pull_locked().await
    }

    /// Push pending local changes. Returns `None` when skipped.
    pub async fn push(&self) -> Result<Option<PushSummary>> {
        let Ok(_guard) = self.gate.try_lock() else {
            tracing::debug!("Sync already in flight; skipping push");
            return Ok(None);
        };
        if !self.remote_available()? {
            return Ok(None);
        }
        self.push_locked().await.map(Some)
    }

    /// Discard both cursors and pull everything from the beginning.
    ///
    /// The idempotent upsert makes re-applying the full record set safe.
    pub async fn resync(&self) -> Result<PullOutcome> {
        let Ok(_guard) = self.gate.try_lock() else {
            tracing::debug!("Sync already in flight; skipping resync");
            return Ok(PullOutcome::Skipped);
        };
        let state = SqliteSyncStateRepository::new(self.conn);
        state.clear_tokens()?;
        if !self.remote_available()? {
            return Ok(PullOutcome::Skipped);
        }
        self.pull_locked().await
    }

    async fn pull_locked(&self) -> Result<PullOutcome> {
        let state = SqliteSyncStateRepository::new(self.conn);
        let database_token = state.get_token(state_keys::DATABASE_CHANGE_TOKEN)?;
        let zone_token = state.get_token(state_keys::ZONE_CHANGE_TOKEN)?;
        let scope = state.selected_country()?;

        let fetcher = DeltaFetcher::new(self.remote, &self.zone_name, scope);
        let outcome = match fetcher.pull(database_token, zone_token).await {
            Ok(outcome) => outcome,
            Err(err) => return Err(self.remote_failure(err)?),
        };

        match outcome {
            FetchOutcome::NoChanges { database_token } => {
                state.set_token(state_keys::DATABASE_CHANGE_TOKEN, &database_token)?;
                state.set_timestamp(state_keys::LAST_SYNC_AT, Utc::now())?;
                Ok(PullOutcome::NoData)
            }
            FetchOutcome::Changes(changes) => {
                // Photo assets come down before the transaction opens.
                let mut photos = HashMap::new();
                for record in &changes.updates {
                    if let Some(asset) = &record.asset {
                        match self.remote.download_asset(asset).await {
                            Ok(bytes) => {
                                photos.insert(record.record_name.clone(), bytes);
                            }
                            Err(err) => return Err(self.remote_failure(err)?),
                        }
                    }
                }

                let reconciler = Reconciler::new(self.conn);
                let applied = reconciler.apply_updates(&changes.updates, &photos)?;
                let removed = reconciler.apply_deletions(&changes.deletions)?;
                reconciler.relink_orphans()?;

                // Deltas are committed; only now may the cursors advance.
                state.set_token(state_keys::DATABASE_CHANGE_TOKEN, &changes.database_token)?;
                state.set_token(state_keys::ZONE_CHANGE_TOKEN, &changes.zone_token)?;
                state.set_timestamp(state_keys::LAST_SYNC_AT, Utc::now())?;

                tracing::info!(applied, removed, "Pull committed");
                let _ = self.events.send(SyncEvent::DataChanged);
                Ok(PullOutcome::NewData { applied, removed })
            }
        }
    }

    async fn push_locked(&self) -> Result<PushSummary> {
        let uploader = OutboxUploader::new(self.conn, self.remote, &self.zone_name);
        match uploader.push().await {
            Ok(summary) => {
                if !summary.is_empty() {
                    tracing::info!(
                        saved = summary.saved,
                        deleted = summary.deleted,
                        rejected = summary.rejected,
                        "Push complete"
                    );
                }
                Ok(summary)
            }
            Err(err) => {
                self.apply_recovery(&err)?;
                Err(err)
            }
        }
    }

    fn remote_available(&self) -> Result<bool> {
        let state = SqliteSyncStateRepository::new(self.conn);
        let available = state.get_flag(state_keys::REMOTE_AVAILABLE)?;
        if !available {
            tracing::debug!("Remote not available; sync suspended");
        }
        Ok(available)
    }

    /// Apply the classified recovery for a remote failure and hand the
    /// error back for propagation.
    fn remote_failure(&self, error: RemoteError) -> Result<Error> {
        let error = Error::Remote(error);
        self.apply_recovery(&error)?;
        Ok(error)
    }

    fn apply_recovery(&self, error: &Error) -> Result<()> {
        let Error::Remote(remote_error) = error else {
            return Ok(());
        };
        let state = SqliteSyncStateRepository::new(self.conn);
        match classify(remote_error) {
            RecoveryAction::Suspend => {
                state.set_flag(state_keys::REMOTE_AVAILABLE, false)?;
                let _ = self.events.send(SyncEvent::RemoteUnavailable);
            }
            RecoveryAction::FullResync { delay } => {
                state.clear_tokens()?;
                let _ = self.events.send(SyncEvent::ResyncScheduled { delay });
            }
            RecoveryAction::RetryLater => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        CityRepository, CountryRepository, Database, SqliteCityRepository,
        SqliteCountryRepository,
    };
    use crate::models::Country;
    use crate::remote::{FailurePoint, MemoryRemote};
    use pretty_assertions::assert_eq;

    const ZONE: &str = "places";

    async fn provisioned_engine<'a>(
        db: &'a Database,
        remote: &'a MemoryRemote,
    ) -> SyncEngine<'a, MemoryRemote> {
        let engine = SyncEngine::new(db.connection(), remote, ZONE);
        engine.provision().await.unwrap();
        engine
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_round_trip_between_two_devices() {
        let remote = MemoryRemote::new();
        let db_a = Database::open_in_memory().unwrap();
        let db_b = Database::open_in_memory().unwrap();
        let engine_a = provisioned_engine(&db_a, &remote).await;
        let engine_b = provisioned_engine(&db_b, &remote).await;

        let countries_a = SqliteCountryRepository::new(db_a.connection());
        let country = Country::new("Norway").unwrap();
        countries_a.insert(&country).unwrap();

        engine_a.sync().await.unwrap();
        let outcome = engine_b.sync().await.unwrap();
        assert!(matches!(outcome, PullOutcome::NewData { applied: 1, .. }));

        let countries_b = SqliteCountryRepository::new(db_b.connection());
        let synced = countries_b.get(&country.record_name).unwrap().unwrap();
        assert_eq!(synced.name, "Norway");
        assert!(!synced.dirty);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pull_without_provisioning_is_skipped() {
        let remote = MemoryRemote::new();
        let db = Database::open_in_memory().unwrap();
        let engine = SyncEngine::new(db.connection(), &remote, ZONE);

        assert_eq!(engine.pull().await.unwrap(), PullOutcome::Skipped);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_remote_changes_reports_no_data() {
        let remote = MemoryRemote::new();
        let db = Database::open_in_memory().unwrap();
        let engine = provisioned_engine(&db, &remote).await;

        assert_eq!(engine.pull().await.unwrap(), PullOutcome::NoData);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_auth_failure_suspends_until_reprovisioned() {
        let remote = MemoryRemote::new();
        let db = Database::open_in_memory().unwrap();
        let engine = provisioned_engine(&db, &remote).await;
        let mut events = engine.subscribe();

        let countries = SqliteCountryRepository::new(db.connection());
        countries.insert(&Country::new("Norway").unwrap()).unwrap();

        remote.fail_next(FailurePoint::Save, RemoteError::NotAuthenticated);
        assert!(engine.sync().await.is_err());
        assert_eq!(events.try_recv().unwrap(), SyncEvent::RemoteUnavailable);

        // Suspended: further cycles skip without touching the remote.
        assert_eq!(engine.sync().await.unwrap(), PullOutcome::Skipped);

        // Successful provisioning lifts the suspension.
        engine.provision().await.unwrap();
        assert!(matches!(
            engine.sync().await.unwrap(),
            PullOutcome::NewData { .. } | PullOutcome::NoData
        ));
        assert!(remote.record(&countries.list().unwrap()[0].record_name).is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_expired_cursor_clears_tokens_and_resync_recovers() {
        let remote = MemoryRemote::new();
        let db = Database::open_in_memory().unwrap();
        let engine = provisioned_engine(&db, &remote).await;

        let countries = SqliteCountryRepository::new(db.connection());
        countries.insert(&Country::new("Norway").unwrap()).unwrap();
        engine.sync().await.unwrap();

        remote.expire_tokens();
        let mut events = engine.subscribe();
        assert!(engine.pull().await.is_err());
        assert_eq!(
            events.try_recv().unwrap(),
            SyncEvent::ResyncScheduled { delay: RESYNC_DELAY }
        );

        let state = SqliteSyncStateRepository::new(db.connection());
        assert!(state.get_token(state_keys::DATABASE_CHANGE_TOKEN).unwrap().is_none());

        let outcome = engine.resync().await.unwrap();
        assert!(matches!(outcome, PullOutcome::NewData { applied: 1, .. }));
        assert_eq!(countries.list().unwrap().len(), 1, "resync does not duplicate");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_pull_does_not_advance_cursors() {
        let remote = MemoryRemote::new();
        let db_a = Database::open_in_memory().unwrap();
        let db_b = Database::open_in_memory().unwrap();
        let engine_a = provisioned_engine(&db_a, &remote).await;
        let engine_b = provisioned_engine(&db_b, &remote).await;

        let catalog_a = crate::Catalog::new(db_a.connection(), ZONE);
        let country = catalog_a.add_country("Norway").unwrap();
        let city = catalog_a.add_city("Oslo", &country.record_name).unwrap();
        catalog_a.set_city_photo(&city.record_name, vec![7, 7]).unwrap();
        engine_a.sync().await.unwrap();

        // The pull dies after fetching deltas but before anything commits.
        remote.fail_next(
            FailurePoint::AssetDownload,
            RemoteError::Network("offline".into()),
        );
        assert!(engine_b.pull().await.is_err());

        let state_b = SqliteSyncStateRepository::new(db_b.connection());
        assert!(
            state_b.get_token(state_keys::DATABASE_CHANGE_TOKEN).unwrap().is_none(),
            "cursor must not advance past unprocessed deltas"
        );

        // The retry re-delivers the same window and commits it whole.
        let outcome = engine_b.pull().await.unwrap();
        assert!(matches!(outcome, PullOutcome::NewData { applied: 2, removed: 0 }));
        let cities_b = SqliteCityRepository::new(db_b.connection());
        let pulled = cities_b.get(&city.record_name).unwrap().unwrap();
        assert_eq!(pulled.photo, Some(vec![7, 7]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remote_deletion_removes_local_row() {
        let remote = MemoryRemote::new();
        let db_a = Database::open_in_memory().unwrap();
        let db_b = Database::open_in_memory().unwrap();
        let engine_a = provisioned_engine(&db_a, &remote).await;
        let engine_b = provisioned_engine(&db_b, &remote).await;

        let countries_a = SqliteCountryRepository::new(db_a.connection());
        let country = Country::new("Norway").unwrap();
        countries_a.insert(&country).unwrap();
        engine_a.sync().await.unwrap();
        engine_b.sync().await.unwrap();

        // Device A deletes and propagates the tombstone.
        countries_a.delete(&country.record_name).unwrap();
        let tombstones = crate::db::SqliteTombstoneRepository::new(db_a.connection());
        crate::db::TombstoneRepository::insert(
            &tombstones,
            &crate::models::Tombstone::new(
                ZONE,
                country.record_name.clone(),
                crate::models::RecordType::Country,
            ),
        )
        .unwrap();
        engine_a.sync().await.unwrap();

        let outcome = engine_b.sync().await.unwrap();
        assert!(matches!(outcome, PullOutcome::NewData { removed: 1, .. }));
        let countries_b = SqliteCountryRepository::new(db_b.connection());
        assert!(countries_b.get(&country.record_name).unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rename_after_photo_sync_keeps_photo() {
        let remote = MemoryRemote::new();
        let db = Database::open_in_memory().unwrap();
        let engine = provisioned_engine(&db, &remote).await;

        let catalog = crate::Catalog::new(db.connection(), ZONE);
        let country = catalog.add_country("Norway").unwrap();
        let city = catalog.add_city("Oslo", &country.record_name).unwrap();
        catalog.set_city_photo(&city.record_name, vec![8, 8]).unwrap();
        engine.sync().await.unwrap();

        catalog.rename_city(&city.record_name, "Christiania").unwrap();
        engine.sync().await.unwrap();

        let uploaded = remote.record(&city.record_name).unwrap();
        let asset = uploaded.asset.expect("rename sync must not strip the remote asset");
        assert_eq!(remote.download_asset(&asset).await.unwrap(), vec![8, 8]);

        // A full refetch rebuilds the row from the remote record; the photo
        // must come back with it.
        engine.resync().await.unwrap();
        let cities = SqliteCityRepository::new(db.connection());
        let refetched = cities.get(&city.record_name).unwrap().unwrap();
        assert_eq!(refetched.photo, Some(vec![8, 8]));
        assert_eq!(refetched.name, "Christiania");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pull_does_not_resurrect_locally_deleted_entity() {
        let remote = MemoryRemote::new();
        let db_a = Database::open_in_memory().unwrap();
        let db_b = Database::open_in_memory().unwrap();
        let engine_a = provisioned_engine(&db_a, &remote).await;
        let engine_b = provisioned_engine(&db_b, &remote).await;

        let catalog_a = crate::Catalog::new(db_a.connection(), ZONE);
        let country = catalog_a.add_country("Norway").unwrap();
        engine_a.sync().await.unwrap();
        engine_b.sync().await.unwrap();

        // Device B renames and uploads while device A deletes locally.
        let countries_b = SqliteCountryRepository::new(db_b.connection());
        countries_b.rename(&country.record_name, "Norge").unwrap();
        engine_b.sync().await.unwrap();
        catalog_a.delete_country(&country.record_name).unwrap();

        // A pulls B's rename before its own tombstone has been pushed.
        engine_a.pull().await.unwrap();
        let countries_a = SqliteCountryRepository::new(db_a.connection());
        assert!(
            countries_a.get(&country.record_name).unwrap().is_none(),
            "pending local deletion must win over an incoming update"
        );
        let tombstones = crate::db::SqliteTombstoneRepository::new(db_a.connection());
        assert!(crate::db::TombstoneRepository::contains(
            &tombstones,
            ZONE,
            &country.record_name
        )
        .unwrap());

        // The deletion still propagates on the next push.
        engine_a.push().await.unwrap();
        assert!(remote.record(&country.record_name).is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_first_pull_spans_multiple_pages() {
        let remote = MemoryRemote::new().with_page_size(2);
        let db_a = Database::open_in_memory().unwrap();
        let db_b = Database::open_in_memory().unwrap();
        let engine_a = provisioned_engine(&db_a, &remote).await;
        let engine_b = provisioned_engine(&db_b, &remote).await;

        let catalog_a = crate::Catalog::new(db_a.connection(), ZONE);
        for name in ["Norway", "Sweden", "Denmark"] {
            let country = catalog_a.add_country(name).unwrap();
            catalog_a.add_city(&format!("{name} City"), &country.record_name).unwrap();
        }
        // Listing is name-ordered: Denmark, Norway, Sweden.
        let extra = catalog_a.list_countries().unwrap();
        catalog_a.add_city("Bergen", &extra[1].record_name).unwrap();
        catalog_a.add_city("Malmo", &extra[2].record_name).unwrap();
        engine_a.sync().await.unwrap();

        let outcome = engine_b.sync().await.unwrap();
        assert!(matches!(outcome, PullOutcome::NewData { applied: 8, removed: 0 }));

        let catalog_b = crate::Catalog::new(db_b.connection(), ZONE);
        let countries = catalog_b.list_countries().unwrap();
        assert_eq!(countries.len(), 3);
        let cities: usize = countries
            .iter()
            .map(|country| catalog_b.list_cities(&country.record_name).unwrap().len())
            .sum();
        assert_eq!(cities, 5, "every city resolved to its country across pages");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_selected_country_scopes_city_pull() {
        let remote = MemoryRemote::new();
        let db_a = Database::open_in_memory().unwrap();
        let db_b = Database::open_in_memory().unwrap();
        let engine_a = provisioned_engine(&db_a, &remote).await;
        let engine_b = provisioned_engine(&db_b, &remote).await;

        let countries_a = SqliteCountryRepository::new(db_a.connection());
        let cities_a = SqliteCityRepository::new(db_a.connection());
        let norway = Country::new("Norway").unwrap();
        let sweden = Country::new("Sweden").unwrap();
        countries_a.insert(&norway).unwrap();
        countries_a.insert(&sweden).unwrap();
        cities_a
            .insert(&crate::models::City::new("Oslo", norway.record_name.clone()).unwrap())
            .unwrap();
        cities_a
            .insert(&crate::models::City::new("Stockholm", sweden.record_name.clone()).unwrap())
            .unwrap();
        engine_a.sync().await.unwrap();

        let state_b = SqliteSyncStateRepository::new(db_b.connection());
        state_b.set_selected_country(Some(&norway.record_name)).unwrap();
        engine_b.sync().await.unwrap();

        let cities_b = SqliteCityRepository::new(db_b.connection());
        let pulled = cities_b.list_by_country(&norway.record_name).unwrap();
        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].name, "Oslo");
        assert!(cities_b.list_by_country(&sweden.record_name).unwrap().is_empty());
    }
}
