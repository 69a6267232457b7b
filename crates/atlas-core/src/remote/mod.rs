//! Remote record store contract.
//!
//! The engine is generic over [`RemoteStore`]: a zone-scoped, bulk-operation
//! record service with cursor-based change tracking. [`HttpRemote`] speaks a
//! JSON protocol over HTTP; [`MemoryRemote`] is an in-process fake used by
//! the engine tests.

mod http;
mod memory;
mod record;

use thiserror::Error;

pub use http::HttpRemote;
pub use memory::{FailurePoint, MemoryRemote};
pub use record::{AssetRef, ChangeToken, DeletedRecord, RemoteRecord};

use crate::models::RecordName;

/// Result type alias for remote store operations
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// A single record rejected by a bulk save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// Identity of the rejected record
    pub record_name: RecordName,
    /// Remote-supplied reason, for logs only
    pub reason: String,
    /// The remote's authoritative record, present when the rejection was a
    /// version mismatch
    pub server_record: Option<RemoteRecord>,
}

/// Remote failure categories the recovery policy is written against.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// No authenticated account is available to the remote store
    #[error("Remote account is not authenticated")]
    NotAuthenticated,

    /// A presented change token is expired or unknown to the remote store
    #[error("Change token expired or unknown")]
    TokenExpired,

    /// The account is out of remote storage space
    #[error("Remote storage quota exceeded")]
    QuotaExceeded,

    /// A bulk save was applied for some records and rejected for others
    #[error("Bulk save partially failed: {} record(s) rejected", failures.len())]
    PartialFailure {
        /// Records the remote accepted, carrying fresh metadata envelopes
        saved: Vec<RemoteRecord>,
        /// Records the remote rejected
        failures: Vec<RecordFailure>,
    },

    /// Transport-level failure, including timeouts; retryable on the next
    /// scheduled attempt with no state mutated
    #[error("Network failure: {0}")]
    Network(String),

    /// Any other remote error
    #[error("Remote API error: {0}")]
    Api(String),
}

/// One page of the database-level "which zones changed" query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseChangePage {
    /// Identifiers of zones with record changes since the presented token
    pub changed_zones: Vec<String>,
    /// Cursor covering everything up to and including this page
    pub token: ChangeToken,
    /// Whether further pages remain
    pub more: bool,
}

/// One page of the zone-level "what changed" query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneChangePage {
    /// Changed or created records, in delivery order
    pub changed: Vec<RemoteRecord>,
    /// Deleted record identities
    pub deleted: Vec<DeletedRecord>,
    /// Cursor covering everything up to and including this page
    pub token: ChangeToken,
    /// Whether further pages remain
    pub more: bool,
}

/// Asynchronous remote record store.
///
/// All operations are fallible with [`RemoteError`] categories; the engine
/// never inspects backend specifics beyond them.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Create the custom record zone. Idempotent on the remote side.
    async fn create_zone(&self, zone_name: &str) -> RemoteResult<()>;

    /// Create the change subscription. Idempotent on the remote side.
    async fn create_subscription(&self, subscription_id: &str) -> RemoteResult<()>;

    /// Fetch one page of zone identifiers changed since `since`.
    ///
    /// `None` means "from the beginning" (full enumeration).
    async fn fetch_database_changes(
        &self,
        since: Option<&ChangeToken>,
    ) -> RemoteResult<DatabaseChangePage>;

    /// Fetch one page of record changes within `zone_name` since `since`.
    async fn fetch_zone_changes(
        &self,
        zone_name: &str,
        since: Option<&ChangeToken>,
    ) -> RemoteResult<ZoneChangePage>;

    /// Save records as one bulk operation.
    ///
    /// Returns the accepted records with fresh metadata envelopes. A mixed
    /// result is reported as [`RemoteError::PartialFailure`], which still
    /// carries the accepted subset.
    async fn save_records(&self, records: Vec<RemoteRecord>) -> RemoteResult<Vec<RemoteRecord>>;

    /// Delete records by identity as one bulk operation; returns the
    /// identities the remote confirmed as deleted.
    async fn delete_records(
        &self,
        zone_name: &str,
        record_names: Vec<RecordName>,
    ) -> RemoteResult<Vec<RecordName>>;

    /// Upload binary asset content; returns the reference to attach to a
    /// record.
    async fn upload_asset(&self, data: Vec<u8>) -> RemoteResult<AssetRef>;

    /// Download binary asset content by reference.
    async fn download_asset(&self, asset: &AssetRef) -> RemoteResult<Vec<u8>>;
}
