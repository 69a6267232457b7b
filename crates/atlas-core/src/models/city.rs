//! City model

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::identity::RecordName;

/// A city mirrored from (or pending upload to) the remote store.
///
/// The ownership link to its country is resolved in two steps: deltas may
/// deliver a city before its country exists locally, in which case only
/// `parent_ref` is recorded and a later relink pass resolves it. A city never
/// has both `parent_ref` set and `country` resolved at rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    /// Remote record identity
    pub record_name: RecordName,
    /// Display name
    pub name: String,
    /// Resolved ownership link to a local country row
    pub country: Option<RecordName>,
    /// Transient remote parent identity, kept only until the country row is
    /// known locally
    pub parent_ref: Option<RecordName>,
    /// Locally materialized photo bytes
    pub photo: Option<Vec<u8>>,
    /// Photo bytes changed locally and still need to reach the remote store
    pub pending_photo_upload: bool,
    /// Remote reference for the current photo asset, kept so a push that
    /// does not change the photo still carries it
    pub asset_ref: Option<String>,
    /// Opaque remote version/identity envelope
    pub metadata: Option<Vec<u8>>,
    /// Local change awaiting upload
    pub dirty: bool,
}

impl City {
    /// Create a new locally-authored city under an already-known country.
    ///
    /// The name is trimmed; an empty result is rejected. The entity starts
    /// dirty, resolved, and without remote metadata.
    pub fn new(name: impl Into<String>, country: RecordName) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidInput("City name cannot be empty".to_string()));
        }

        Ok(Self {
            record_name: RecordName::new_city(),
            name,
            country: Some(country),
            parent_ref: None,
            photo: None,
            pending_photo_upload: false,
            asset_ref: None,
            metadata: None,
            dirty: true,
        })
    }

    /// Attach photo bytes authored locally; marks the photo for upload.
    pub fn with_photo(mut self, photo: Vec<u8>) -> Self {
        self.photo = Some(photo);
        self.pending_photo_upload = true;
        self
    }

    /// Whether the ownership link still awaits a local country row.
    #[must_use]
    pub const fn is_orphan(&self) -> bool {
        self.country.is_none() && self.parent_ref.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_city_new() {
        let country = RecordName::new_country();
        let city = City::new(" Oslo ", country.clone()).unwrap();
        assert_eq!(city.name, "Oslo");
        assert_eq!(city.country, Some(country));
        assert!(city.parent_ref.is_none());
        assert!(city.dirty);
        assert!(!city.is_orphan());
    }

    #[test]
    fn test_city_rejects_blank_name() {
        assert!(City::new("  ", RecordName::new_country()).is_err());
    }

    #[test]
    fn test_city_with_photo_marks_pending_upload() {
        let city = City::new("Oslo", RecordName::new_country())
            .unwrap()
            .with_photo(vec![1, 2, 3]);
        assert_eq!(city.photo.as_deref(), Some(&[1u8, 2, 3][..]));
        assert!(city.pending_photo_upload);
    }
}
