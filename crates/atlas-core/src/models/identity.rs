//! Remote record identity

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of record tracked by the replication engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    /// Parent entity
    Country,
    /// Child entity, owned by a Country
    City,
}

impl RecordType {
    /// Stable string form used in the local store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Country => "country",
            Self::City => "city",
        }
    }

    /// Parse the stable string form back into a type.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "country" => Some(Self::Country),
            "city" => Some(Self::City),
            _ => None,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The remote-assigned record name: unique, stable, immutable once created.
///
/// Locally-created entities mint their name up front (UUID v7 with a type
/// prefix) so identity never changes across the first upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordName(String);

impl RecordName {
    /// Mint a record name for a new Country.
    #[must_use]
    pub fn new_country() -> Self {
        Self(format!("idcountry-{}", Uuid::now_v7()))
    }

    /// Mint a record name for a new City.
    #[must_use]
    pub fn new_city() -> Self {
        Self(format!("idcity-{}", Uuid::now_v7()))
    }

    /// Get the string representation of this name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RecordName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecordName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RecordName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_names_unique() {
        assert_ne!(RecordName::new_country(), RecordName::new_country());
        assert_ne!(RecordName::new_city(), RecordName::new_city());
    }

    #[test]
    fn test_record_name_prefixes() {
        assert!(RecordName::new_country().as_str().starts_with("idcountry-"));
        assert!(RecordName::new_city().as_str().starts_with("idcity-"));
    }

    #[test]
    fn test_record_type_round_trip() {
        for ty in [RecordType::Country, RecordType::City] {
            assert_eq!(RecordType::parse(ty.as_str()), Some(ty));
        }
        assert_eq!(RecordType::parse("planet"), None);
    }
}
