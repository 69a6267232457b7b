//! Country and city repository implementations

use crate::error::{Error, Result};
use crate::models::{City, Country, RecordName};
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for country storage operations
pub trait CountryRepository {
    /// Insert a locally-authored country
    fn insert(&self, country: &Country) -> Result<()>;

    /// Get a country by remote identity
    fn get(&self, record_name: &RecordName) -> Result<Option<Country>>;

    /// List all countries, by name
    fn list(&self) -> Result<Vec<Country>>;

    /// List countries with local changes awaiting upload
    fn list_dirty(&self) -> Result<Vec<Country>>;

    /// Create-or-overwrite from a remote delta; clears the dirty flag since
    /// the write originated remotely
    fn upsert_from_remote(
        &self,
        record_name: &RecordName,
        name: &str,
        metadata: &[u8],
    ) -> Result<()>;

    /// Rename by user edit; marks the row dirty
    fn rename(&self, record_name: &RecordName, name: &str) -> Result<()>;

    /// Record a confirmed upload: store the fresh envelope, clear dirty
    fn confirm_uploaded(&self, record_name: &RecordName, metadata: &[u8]) -> Result<()>;

    /// Remove the row; returns whether it existed
    fn delete(&self, record_name: &RecordName) -> Result<bool>;
}

/// Trait for city storage operations
pub trait CityRepository {
    /// Insert a locally-authored city
    fn insert(&self, city: &City) -> Result<()>;

    /// Get a city by remote identity
    fn get(&self, record_name: &RecordName) -> Result<Option<City>>;

    /// List cities owned by the given country, by name
    fn list_by_country(&self, country: &RecordName) -> Result<Vec<City>>;

    /// List cities with local changes awaiting upload
    fn list_dirty(&self) -> Result<Vec<City>>;

    /// Create-or-overwrite from a remote delta; clears dirty and
    /// pending-photo flags since the write originated remotely.
    ///
    /// Exactly one of `country` / `parent_ref` may be set, depending on
    /// whether the owning country row was already known at apply time.
    #[allow(clippy::too_many_arguments)]
    fn upsert_from_remote(
        &self,
        record_name: &RecordName,
        name: &str,
        metadata: &[u8],
        photo: Option<&[u8]>,
        asset_ref: Option<&str>,
        country: Option<&RecordName>,
        parent_ref: Option<&RecordName>,
    ) -> Result<()>;

    /// Rename by user edit; marks the row dirty
    fn rename(&self, record_name: &RecordName, name: &str) -> Result<()>;

    /// Replace the photo by user edit; marks the row dirty and the photo
    /// pending upload
    fn set_photo(&self, record_name: &RecordName, photo: &[u8]) -> Result<()>;

    /// Record the remote reference assigned to an uploaded photo asset.
    /// Leaves the dirty and pending-photo flags untouched
    fn set_asset_ref(&self, record_name: &RecordName, asset_ref: &str) -> Result<()>;

    /// Record a confirmed upload: store the fresh envelope, clear dirty and
    /// pending-photo flags
    fn confirm_uploaded(&self, record_name: &RecordName, metadata: &[u8]) -> Result<()>;

    /// Resolve transient parent references against the countries now present
    /// locally. Idempotent; returns the number of cities linked.
    fn relink_orphans(&self) -> Result<usize>;

    /// Remove the row; returns whether it existed
    fn delete(&self, record_name: &RecordName) -> Result<bool>;
}

/// `SQLite` implementation of `CountryRepository`
pub struct SqliteCountryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCountryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_country(row: &rusqlite::Row<'_>) -> rusqlite::Result<Country> {
        let record_name: String = row.get(0)?;
        Ok(Country {
            record_name: record_name.into(),
            name: row.get(1)?,
            metadata: row.get(2)?,
            dirty: row.get::<_, i32>(3)? != 0,
        })
    }
}

impl CountryRepository for SqliteCountryRepository<'_> {
    fn insert(&self, country: &Country) -> Result<()> {
        self.conn.execute(
            "INSERT INTO countries (record_name, name, metadata, dirty) VALUES (?, ?, ?, ?)",
            params![
                country.record_name.as_str(),
                country.name,
                country.metadata,
                i32::from(country.dirty)
            ],
        )?;
        Ok(())
    }

    fn get(&self, record_name: &RecordName) -> Result<Option<Country>> {
        self.conn
            .query_row(
                "SELECT record_name, name, metadata, dirty FROM countries WHERE record_name = ?",
                params![record_name.as_str()],
                Self::parse_country,
            )
            .optional()
            .map_err(Into::into)
    }

    fn list(&self) -> Result<Vec<Country>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_name, name, metadata, dirty FROM countries ORDER BY name ASC",
        )?;
        let countries = stmt
            .query_map([], Self::parse_country)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(countries)
    }

    fn list_dirty(&self) -> Result<Vec<Country>> {
        let mut stmt = self.conn.prepare(
            "SELECT record_name, name, metadata, dirty FROM countries WHERE dirty = 1",
        )?;
        let countries = stmt
            .query_map([], Self::parse_country)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(countries)
    }

    fn upsert_from_remote(
        &self,
        record_name: &RecordName,
        name: &str,
        metadata: &[u8],
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO countries (record_name, name, metadata, dirty) VALUES (?, ?, ?, 0)
             ON CONFLICT(record_name) DO UPDATE SET
                 name = excluded.name,
                 metadata = excluded.metadata,
                 dirty = 0",
            params![record_name.as_str(), name, metadata],
        )?;
        Ok(())
    }

    fn rename(&self, record_name: &RecordName, name: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE countries SET name = ?, dirty = 1 WHERE record_name = ?",
            params![name, record_name.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(record_name.to_string()));
        }
        Ok(())
    }

    fn confirm_uploaded(&self, record_name: &RecordName, metadata: &[u8]) -> Result<()> {
        self.conn.execute(
            "UPDATE countries SET metadata = ?, dirty = 0 WHERE record_name = ?",
            params![metadata, record_name.as_str()],
        )?;
        Ok(())
    }

    fn delete(&self, record_name: &RecordName) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM countries WHERE record_name = ?",
            params![record_name.as_str()],
        )?;
        Ok(rows > 0)
    }
}

/// `SQLite` implementation of `CityRepository`
pub struct SqliteCityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_city(row: &rusqlite::Row<'_>) -> rusqlite::Result<City> {
        let record_name: String = row.get(0)?;
        let country: Option<String> = row.get(2)?;
        let parent_ref: Option<String> = row.get(3)?;
        Ok(City {
            record_name: record_name.into(),
            name: row.get(1)?,
            country: country.map(Into::into),
            parent_ref: parent_ref.map(Into::into),
            photo: row.get(4)?,
            pending_photo_upload: row.get::<_, i32>(5)? != 0,
            asset_ref: row.get(6)?,
            metadata: row.get(7)?,
            dirty: row.get::<_, i32>(8)? != 0,
        })
    }
}

const CITY_COLUMNS: &str = "record_name, name, country_record_name, parent_ref, photo, \
                            pending_photo_upload, asset_ref, metadata, dirty";

impl CityRepository for SqliteCityRepository<'_> {
    fn insert(&self, city: &City) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cities (record_name, name, country_record_name, parent_ref, photo, \
                                 pending_photo_upload, asset_ref, metadata, dirty)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                city.record_name.as_str(),
                city.name,
                city.country.as_ref().map(RecordName::as_str),
                city.parent_ref.as_ref().map(RecordName::as_str),
                city.photo,
                i32::from(city.pending_photo_upload),
                city.asset_ref,
                city.metadata,
                i32::from(city.dirty)
            ],
        )?;
        Ok(())
    }

    fn get(&self, record_name: &RecordName) -> Result<Option<City>> {
        self.conn
            .query_row(
                &format!("SELECT {CITY_COLUMNS} FROM cities WHERE record_name = ?"),
                params![record_name.as_str()],
                Self::parse_city,
            )
            .optional()
            .map_err(Into::into)
    }

    fn list_by_country(&self, country: &RecordName) -> Result<Vec<City>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CITY_COLUMNS} FROM cities WHERE country_record_name = ? ORDER BY name ASC"
        ))?;
        let cities = stmt
            .query_map(params![country.as_str()], Self::parse_city)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cities)
    }

    fn list_dirty(&self) -> Result<Vec<City>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CITY_COLUMNS} FROM cities WHERE dirty = 1"))?;
        let cities = stmt
            .query_map([], Self::parse_city)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(cities)
    }

    fn upsert_from_remote(
        &self,
        record_name: &RecordName,
        name: &str,
        metadata: &[u8],
        photo: Option<&[u8]>,
        asset_ref: Option<&str>,
        country: Option<&RecordName>,
        parent_ref: Option<&RecordName>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cities (record_name, name, country_record_name, parent_ref, photo, \
                                 pending_photo_upload, asset_ref, metadata, dirty)
             VALUES (?, ?, ?, ?, ?, 0, ?, ?, 0)
             ON CONFLICT(record_name) DO UPDATE SET
                 name = excluded.name,
                 country_record_name = excluded.country_record_name,
                 parent_ref = excluded.parent_ref,
                 photo = excluded.photo,
                 pending_photo_upload = 0,
                 asset_ref = excluded.asset_ref,
                 metadata = excluded.metadata,
                 dirty = 0",
            params![
                record_name.as_str(),
                name,
                country.map(RecordName::as_str),
                parent_ref.map(RecordName::as_str),
                photo,
                asset_ref,
                metadata
            ],
        )?;
        Ok(())
    }

    fn rename(&self, record_name: &RecordName, name: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE cities SET name = ?, dirty = 1 WHERE record_name = ?",
            params![name, record_name.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(record_name.to_string()));
        }
        Ok(())
    }

    fn set_photo(&self, record_name: &RecordName, photo: &[u8]) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE cities SET photo = ?, pending_photo_upload = 1, dirty = 1 WHERE record_name = ?",
            params![photo, record_name.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(record_name.to_string()));
        }
        Ok(())
    }

    fn set_asset_ref(&self, record_name: &RecordName, asset_ref: &str) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE cities SET asset_ref = ? WHERE record_name = ?",
            params![asset_ref, record_name.as_str()],
        )?;
        if rows == 0 {
            return Err(Error::NotFound(record_name.to_string()));
        }
        Ok(())
    }

    fn confirm_uploaded(&self, record_name: &RecordName, metadata: &[u8]) -> Result<()> {
        self.conn.execute(
            "UPDATE cities SET metadata = ?, dirty = 0, pending_photo_upload = 0 WHERE record_name = ?",
            params![metadata, record_name.as_str()],
        )?;
        Ok(())
    }

    fn relink_orphans(&self) -> Result<usize> {
        // Resolution is monotonic: transient ref -> resolved link, never back.
        let rows = self.conn.execute(
            "UPDATE cities
             SET country_record_name = parent_ref, parent_ref = NULL
             WHERE parent_ref IS NOT NULL
               AND parent_ref IN (SELECT record_name FROM countries)",
            [],
        )?;
        Ok(rows)
    }

    fn delete(&self, record_name: &RecordName) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM cities WHERE record_name = ?",
            params![record_name.as_str()],
        )?;
        Ok(rows > 0)
    }
}
