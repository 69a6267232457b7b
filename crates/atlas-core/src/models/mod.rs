//! Data models for Atlas

mod city;
mod country;
mod identity;
mod tombstone;

pub use city::City;
pub use country::Country;
pub use identity::{RecordName, RecordType};
pub use tombstone::Tombstone;
