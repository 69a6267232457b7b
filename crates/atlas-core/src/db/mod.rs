//! Local store layer for Atlas

mod connection;
mod migrations;
mod repository;
mod state_repository;
mod tombstone_repository;

pub use connection::Database;
pub use repository::{
    CityRepository, CountryRepository, SqliteCityRepository, SqliteCountryRepository,
};
pub use state_repository::{state_keys, SqliteSyncStateRepository, SyncStateRepository};
pub use tombstone_repository::{SqliteTombstoneRepository, TombstoneRepository};
