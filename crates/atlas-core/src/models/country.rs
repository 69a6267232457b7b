//! Country model

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::identity::RecordName;

/// A country mirrored from (or pending upload to) the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    /// Remote record identity
    pub record_name: RecordName,
    /// Display name
    pub name: String,
    /// Opaque remote version/identity envelope; absent until the first
    /// successful upload returns one
    pub metadata: Option<Vec<u8>>,
    /// Local change awaiting upload
    pub dirty: bool,
}

impl Country {
    /// Create a new locally-authored country.
    ///
    /// The name is trimmed; an empty result is rejected. The entity starts
    /// dirty and without remote metadata.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidInput(
                "Country name cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            record_name: RecordName::new_country(),
            name,
            metadata: None,
            dirty: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_new() {
        let country = Country::new("  Norway ").unwrap();
        assert_eq!(country.name, "Norway");
        assert!(country.dirty);
        assert!(country.metadata.is_none());
    }

    #[test]
    fn test_country_rejects_blank_name() {
        assert!(Country::new("   ").is_err());
        assert!(Country::new("").is_err());
    }
}
