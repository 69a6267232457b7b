//! Two-stage cursor-driven delta fetch.
//!
//! Stage 1 asks the database which zones changed since the persisted database
//! cursor; stage 2, only when zones did change, asks those zones what changed
//! since the zone cursor. Both stages are paged; every page carries an updated
//! cursor which is retained as the new candidate so an interrupted fetch can
//! resume without re-reading completed pages.

use std::collections::HashMap;

use crate::models::{RecordName, RecordType};
use crate::remote::{ChangeToken, DeletedRecord, RemoteRecord, RemoteResult, RemoteStore};

/// Result of a completed pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Stage 1 reported no changed zones; stage 2 was skipped entirely.
    ///
    /// The database cursor still advances: it reflects only zone-changed
    /// bookkeeping, never record content.
    NoChanges {
        /// Final database cursor
        database_token: ChangeToken,
    },
    /// Stage 2 accumulated record-level deltas.
    Changes(FetchedChanges),
}

/// Accumulated record deltas plus the cursors that cover them.
///
/// Neither cursor may be persisted until the deltas are applied to the local
/// store; a crash before that re-fetches the same window, and the idempotent
/// upsert absorbs the re-delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedChanges {
    /// Changed or created records, one entry per identity (last delivered
    /// version wins)
    pub updates: Vec<RemoteRecord>,
    /// Deleted record identities, deduplicated
    pub deletions: Vec<DeletedRecord>,
    /// Final database cursor
    pub database_token: ChangeToken,
    /// Final zone cursor
    pub zone_token: ChangeToken,
    /// Zone identifiers stage 1 reported as changed
    pub changed_zones: Vec<String>,
}

/// In-memory accumulator for one pull.
///
/// The remote may deliver several versions of the same record across pages;
/// an in-place upsert keyed by identity keeps only the last one. A deletion
/// supersedes any earlier update for the same identity within the pull.
#[derive(Debug, Default)]
struct Accumulator {
    updates: Vec<Option<RemoteRecord>>,
    index: HashMap<RecordName, usize>,
    deletions: Vec<DeletedRecord>,
}

impl Accumulator {
    fn record_changed(&mut self, record: RemoteRecord) {
        // A re-created identity supersedes its earlier deletion.
        self.deletions
            .retain(|deleted| deleted.record_name != record.record_name);

        if let Some(&slot) = self.index.get(&record.record_name) {
            self.updates[slot] = Some(record);
        } else {
            self.index
                .insert(record.record_name.clone(), self.updates.len());
            self.updates.push(Some(record));
        }
    }

    fn record_deleted(&mut self, deleted: DeletedRecord) {
        if let Some(slot) = self.index.remove(&deleted.record_name) {
            self.updates[slot] = None;
        }
        if !self
            .deletions
            .iter()
            .any(|existing| existing.record_name == deleted.record_name)
        {
            self.deletions.push(deleted);
        }
    }

    fn finish(self) -> (Vec<RemoteRecord>, Vec<DeletedRecord>) {
        (self.updates.into_iter().flatten().collect(), self.deletions)
    }
}

/// Cursor-driven delta fetcher. One instance serves one pull; the caller
/// enforces that at most one pull is in flight.
pub struct DeltaFetcher<'a, R> {
    remote: &'a R,
    zone_name: &'a str,
    /// Active parent selection scoping which city deltas are accepted
    scope: Option<RecordName>,
}

impl<'a, R: RemoteStore> DeltaFetcher<'a, R> {
    pub fn new(remote: &'a R, zone_name: &'a str, scope: Option<RecordName>) -> Self {
        Self {
            remote,
            zone_name,
            scope,
        }
    }

    /// Run both stages and return the accumulated deltas.
    pub async fn pull(
        &self,
        database_token: Option<ChangeToken>,
        zone_token: Option<ChangeToken>,
    ) -> RemoteResult<FetchOutcome> {
        // Stage 1: which zones changed. The candidate cursor advances on
        // every page so an interrupted stage 1 resumes mid-way.
        let mut candidate_db_token = database_token;
        let mut changed_zones: Vec<String> = Vec::new();
        loop {
            let page = self
                .remote
                .fetch_database_changes(candidate_db_token.as_ref())
                .await?;
            for zone in page.changed_zones {
                if !changed_zones.contains(&zone) {
                    changed_zones.push(zone);
                }
            }
            candidate_db_token = Some(page.token);
            if !page.more {
                break;
            }
        }
        let database_token =
            candidate_db_token.unwrap_or_else(|| ChangeToken::new(Vec::new()));

        if !changed_zones.iter().any(|zone| zone == self.zone_name) {
            tracing::debug!("No changed zones since last pull");
            return Ok(FetchOutcome::NoChanges { database_token });
        }

        // Stage 2: what changed within the zone.
        let mut accumulator = Accumulator::default();
        let mut candidate_zone_token = zone_token;
        loop {
            let page = self
                .remote
                .fetch_zone_changes(self.zone_name, candidate_zone_token.as_ref())
                .await?;
            for record in page.changed {
                if self.accepts(&record) {
                    accumulator.record_changed(record);
                } else {
                    tracing::debug!(record = %record.record_name, "Discarded out-of-scope city delta");
                }
            }
            for deleted in page.deleted {
                accumulator.record_deleted(deleted);
            }
            candidate_zone_token = Some(page.token);
            if !page.more {
                break;
            }
        }
        let zone_token = candidate_zone_token.unwrap_or_else(|| ChangeToken::new(Vec::new()));

        let (updates, deletions) = accumulator.finish();
        tracing::debug!(
            updates = updates.len(),
            deletions = deletions.len(),
            "Delta fetch complete"
        );
        Ok(FetchOutcome::Changes(FetchedChanges {
            updates,
            deletions,
            database_token,
            zone_token,
            changed_zones,
        }))
    }

    /// Ownership filter for city deltas: with an active country selection,
    /// only cities referencing it are accepted. Country deltas always pass.
    fn accepts(&self, record: &RemoteRecord) -> bool {
        if record.record_type != RecordType::City {
            return true;
        }
        match &self.scope {
            Some(selected) => record.parent.as_ref() == Some(selected),
            None => true,
        }
    }
}
