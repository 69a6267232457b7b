//! Local-first catalog operations.
//!
//! Every mutation commits locally and marks the affected row for upload;
//! deletions leave a tombstone so the next push propagates them. Nothing
//! here touches the network, so edits work offline and survive restarts.

use rusqlite::Connection;

use crate::db::{
    CityRepository, CountryRepository, SqliteCityRepository, SqliteCountryRepository,
    SqliteSyncStateRepository, SqliteTombstoneRepository, SyncStateRepository,
    TombstoneRepository,
};
use crate::error::{Error, Result};
use crate::models::{City, Country, RecordName, RecordType, Tombstone};

/// Country and city catalog backed by the local store.
pub struct Catalog<'a> {
    conn: &'a Connection,
    zone_name: &'a str,
}

impl<'a> Catalog<'a> {
    pub const fn new(conn: &'a Connection, zone_name: &'a str) -> Self {
        Self { conn, zone_name }
    }

    pub fn add_country(&self, name: &str) -> Result<Country> {
        let country = Country::new(name)?;
        SqliteCountryRepository::new(self.conn).insert(&country)?;
        tracing::debug!(record_name = country.record_name.as_str(), "Added country");
        Ok(country)
    }

    pub fn rename_country(&self, record_name: &RecordName, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Country name cannot be empty".to_string()));
        }
        SqliteCountryRepository::new(self.conn).rename(record_name, name)
    }

    /// Delete a country and, through the ownership link, its cities.
    ///
    /// Locally the city rows go with the country row in the same call. Only
    /// the country gets a tombstone: the remote cascades the deletion to
    /// children itself, and a child tombstone would race that cascade.
    pub fn delete_country(&self, record_name: &RecordName) -> Result<()> {
        let countries = SqliteCountryRepository::new(self.conn);
        if !countries.delete(record_name)? {
            return Err(Error::NotFound(format!("country {record_name}")));
        }

        let state = SqliteSyncStateRepository::new(self.conn);
        if state.selected_country()?.as_ref() == Some(record_name) {
            state.set_selected_country(None)?;
        }

        SqliteTombstoneRepository::new(self.conn).insert(&Tombstone::new(
            self.zone_name,
            record_name.clone(),
            RecordType::Country,
        ))?;
        tracing::debug!(record_name = record_name.as_str(), "Deleted country");
        Ok(())
    }

    pub fn list_countries(&self) -> Result<Vec<Country>> {
        SqliteCountryRepository::new(self.conn).list()
    }

    /// Set or clear the active country selection. The selection scopes
    /// which city deltas a pull accepts, and survives restarts.
    pub fn select_country(&self, record_name: Option<&RecordName>) -> Result<()> {
        if let Some(record_name) = record_name {
            let countries = SqliteCountryRepository::new(self.conn);
            if countries.get(record_name)?.is_none() {
                return Err(Error::NotFound(format!("country {record_name}")));
            }
        }
        SqliteSyncStateRepository::new(self.conn).set_selected_country(record_name)
    }

    pub fn selected_country(&self) -> Result<Option<Country>> {
        let state = SqliteSyncStateRepository::new(self.conn);
        let Some(record_name) = state.selected_country()? else {
            return Ok(None);
        };
        SqliteCountryRepository::new(self.conn).get(&record_name)
    }

    pub fn add_city(&self, name: &str, country: &RecordName) -> Result<City> {
        let countries = SqliteCountryRepository::new(self.conn);
        if countries.get(country)?.is_none() {
            return Err(Error::NotFound(format!("country {country}")));
        }
        let city = City::new(name, country.clone())?;
        SqliteCityRepository::new(self.conn).insert(&city)?;
        tracing::debug!(record_name = city.record_name.as_str(), "Added city");
        Ok(city)
    }

    pub fn rename_city(&self, record_name: &RecordName, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("City name cannot be empty".to_string()));
        }
        SqliteCityRepository::new(self.conn).rename(record_name, name)
    }

    /// Attach a photo to a city; queued for asset upload on the next push.
    pub fn set_city_photo(&self, record_name: &RecordName, photo: Vec<u8>) -> Result<()> {
        SqliteCityRepository::new(self.conn).set_photo(record_name, &photo)
    }

    pub fn delete_city(&self, record_name: &RecordName) -> Result<()> {
        let cities = SqliteCityRepository::new(self.conn);
        if !cities.delete(record_name)? {
            return Err(Error::NotFound(format!("city {record_name}")));
        }
        SqliteTombstoneRepository::new(self.conn).insert(&Tombstone::new(
            self.zone_name,
            record_name.clone(),
            RecordType::City,
        ))?;
        tracing::debug!(record_name = record_name.as_str(), "Deleted city");
        Ok(())
    }

    pub fn list_cities(&self, country: &RecordName) -> Result<Vec<City>> {
        SqliteCityRepository::new(self.conn).list_by_country(country)
    }
}
