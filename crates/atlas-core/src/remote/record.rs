//! Wire-level record types shared by all remote store backends.

use serde::{Deserialize, Serialize};

use crate::models::{RecordName, RecordType};

/// Opaque continuation cursor issued by the remote store.
///
/// Never interpreted locally; stored and replayed verbatim. Presenting an
/// expired token is a distinct remote error, not a silent no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeToken(Vec<u8>);

impl ChangeToken {
    #[must_use]
    pub const fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Reference to a binary asset held by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetRef(String);

impl AssetRef {
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A named (type, zone, id) record with an open field map, as the remote
/// store ships it.
///
/// `metadata` is the remote's version/identity envelope. It permits a
/// conflict-aware overwrite instead of a blind create and is treated as an
/// uninterpreted byte payload end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub record_type: RecordType,
    pub record_name: RecordName,
    pub zone_name: String,
    /// Display name field (`countryName` / `cityName` equivalent)
    pub name: String,
    /// One-directional child-to-parent reference; the remote cascades the
    /// child's deletion when the parent is deleted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<RecordName>,
    /// Binary asset reference (city photo)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<AssetRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<u8>>,
}

impl RemoteRecord {
    /// Build a country record.
    pub fn country(
        zone_name: impl Into<String>,
        record_name: RecordName,
        name: impl Into<String>,
        metadata: Option<Vec<u8>>,
    ) -> Self {
        Self {
            record_type: RecordType::Country,
            record_name,
            zone_name: zone_name.into(),
            name: name.into(),
            parent: None,
            asset: None,
            metadata,
        }
    }

    /// Build a city record.
    pub fn city(
        zone_name: impl Into<String>,
        record_name: RecordName,
        name: impl Into<String>,
        parent: Option<RecordName>,
        asset: Option<AssetRef>,
        metadata: Option<Vec<u8>>,
    ) -> Self {
        Self {
            record_type: RecordType::City,
            record_name,
            zone_name: zone_name.into(),
            name: name.into(),
            parent,
            asset,
            metadata,
        }
    }
}

/// Identity of a record reported as deleted by a zone-level delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRecord {
    pub record_name: RecordName,
    pub record_type: RecordType,
}
