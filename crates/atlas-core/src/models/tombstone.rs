//! Tombstone model

use serde::{Deserialize, Serialize};

use super::identity::{RecordName, RecordType};

/// Marker for a locally-deleted entity whose deletion has not yet been
/// confirmed against the remote store.
///
/// Recorded at delete time, independent of connectivity; removed only after
/// the remote deletion is confirmed. The (zone, record) pair is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Zone the record lived in
    pub zone_name: String,
    /// Identity of the deleted record
    pub record_name: RecordName,
    /// Kind of the deleted record
    pub record_type: RecordType,
}

impl Tombstone {
    /// Create a tombstone for a deleted entity.
    pub fn new(
        zone_name: impl Into<String>,
        record_name: RecordName,
        record_type: RecordType,
    ) -> Self {
        Self {
            zone_name: zone_name.into(),
            record_name,
            record_type,
        }
    }
}
