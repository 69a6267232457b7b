//! Atlas CLI - a replicated country and city catalog
//!
//! Every edit commits to the local store first; `atlas sync` exchanges
//! pending changes with the configured remote record store.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use atlas_core::db::{
    state_keys, Database, SqliteSyncStateRepository, SyncStateRepository,
};
use atlas_core::remote::HttpRemote;
use atlas_core::{Catalog, City, Country, PullOutcome, RecordName, SyncEngine, SyncEvent};
use clap::{Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;

/// Remote zone holding the catalog records.
const ZONE_NAME: &str = "places";

#[derive(Parser)]
#[command(name = "atlas")]
#[command(about = "Country and city catalog replicated through a remote record store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage countries
    Country {
        #[command(subcommand)]
        command: CountryCommands,
    },
    /// Manage cities
    City {
        #[command(subcommand)]
        command: CityCommands,
    },
    /// Set the active country; city pulls only accept its cities
    Select {
        /// Country ID or unique ID prefix; omit to clear the selection
        id: Option<String>,
    },
    /// Exchange pending changes with the remote store
    Sync,
    /// Discard change cursors and refetch everything
    Resync,
    /// Show local store and replication state
    Status,
}

#[derive(Subcommand)]
enum CountryCommands {
    /// Create a new country
    #[command(alias = "new")]
    Add {
        /// Country name
        name: Vec<String>,
    },
    /// List countries
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename an existing country
    Rename {
        /// Country ID or unique ID prefix
        id: String,
        /// New name
        name: Vec<String>,
    },
    /// Delete a country and its cities
    Delete {
        /// Country ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
enum CityCommands {
    /// Create a new city under a country
    #[command(alias = "new")]
    Add {
        /// City name
        name: Vec<String>,
        /// Owning country ID or prefix; defaults to the active selection
        #[arg(long, value_name = "ID")]
        country: Option<String>,
    },
    /// List cities of a country
    List {
        /// Country ID or prefix; defaults to the active selection
        #[arg(long, value_name = "ID")]
        country: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename an existing city
    Rename {
        /// City ID or unique ID prefix
        id: String,
        /// New name
        name: Vec<String>,
    },
    /// Attach a photo to a city
    Photo {
        /// City ID or unique ID prefix
        id: String,
        /// Path to the image file
        path: PathBuf,
    },
    /// Delete a city
    Delete {
        /// City ID or unique ID prefix
        id: String,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] atlas_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No name provided")]
    EmptyName,
    #[error("Country not found for id/prefix: {0}")]
    CountryNotFound(String),
    #[error("City not found for id/prefix: {0}")]
    CityNotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("No country selected. Pass --country or run `atlas select` first.")]
    NoSelection,
    #[error("Sync is not configured. Set ATLAS_REMOTE_URL to enable `atlas sync`.")]
    SyncNotConfigured,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("atlas=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Country { command } => run_country(command, &db_path),
        Commands::City { command } => run_city(command, &db_path),
        Commands::Select { id } => run_select(id.as_deref(), &db_path),
        Commands::Sync => run_sync(&db_path).await,
        Commands::Resync => run_resync(&db_path).await,
        Commands::Status => run_status(&db_path),
    }
}

fn run_country(command: CountryCommands, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let catalog = Catalog::new(db.connection(), ZONE_NAME);

    match command {
        CountryCommands::Add { name } => {
            let country = catalog.add_country(&resolve_name(&name)?)?;
            println!("{}", country.record_name);
        }
        CountryCommands::List { json } => {
            let countries = catalog.list_countries()?;
            if json {
                let items: Vec<CountryListItem> =
                    countries.iter().map(CountryListItem::from).collect();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for country in &countries {
                    println!("{}", format_country_line(country));
                }
            }
        }
        CountryCommands::Rename { id, name } => {
            let country = resolve_country(&catalog, &id)?;
            catalog.rename_country(&country.record_name, &resolve_name(&name)?)?;
            println!("{}", country.record_name);
        }
        CountryCommands::Delete { id } => {
            let country = resolve_country(&catalog, &id)?;
            catalog.delete_country(&country.record_name)?;
            println!("{}", country.record_name);
        }
    }
    Ok(())
}

fn run_city(command: CityCommands, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let catalog = Catalog::new(db.connection(), ZONE_NAME);

    match command {
        CityCommands::Add { name, country } => {
            let owner = resolve_owner(&catalog, country.as_deref())?;
            let city = catalog.add_city(&resolve_name(&name)?, &owner)?;
            println!("{}", city.record_name);
        }
        CityCommands::List { country, json } => {
            let owner = resolve_owner(&catalog, country.as_deref())?;
            let cities = catalog.list_cities(&owner)?;
            if json {
                let items: Vec<CityListItem> = cities.iter().map(CityListItem::from).collect();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                for city in &cities {
                    println!("{}", format_city_line(city));
                }
            }
        }
        CityCommands::Rename { id, name } => {
            let city = resolve_city(&catalog, &id)?;
            catalog.rename_city(&city.record_name, &resolve_name(&name)?)?;
            println!("{}", city.record_name);
        }
        CityCommands::Photo { id, path } => {
            let city = resolve_city(&catalog, &id)?;
            let photo = std::fs::read(&path)?;
            catalog.set_city_photo(&city.record_name, photo)?;
            println!("{}", city.record_name);
        }
        CityCommands::Delete { id } => {
            let city = resolve_city(&catalog, &id)?;
            catalog.delete_city(&city.record_name)?;
            println!("{}", city.record_name);
        }
    }
    Ok(())
}

fn run_select(id: Option<&str>, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let catalog = Catalog::new(db.connection(), ZONE_NAME);

    match id {
        Some(query) => {
            let country = resolve_country(&catalog, query)?;
            catalog.select_country(Some(&country.record_name))?;
            println!("{}", country.record_name);
        }
        None => {
            catalog.select_country(None)?;
            println!("Selection cleared");
        }
    }
    Ok(())
}

async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let remote = remote_from_env()?;
    let engine = SyncEngine::new(db.connection(), &remote, ZONE_NAME);
    let mut events = engine.subscribe();

    engine.provision().await?;
    match engine.sync().await {
        Ok(outcome) => {
            print_outcome(outcome);
            Ok(())
        }
        Err(error) => {
            // An expired cursor already cleared the local tokens; honor the
            // scheduled delay, then refetch from scratch.
            if let Ok(SyncEvent::ResyncScheduled { delay }) = events.try_recv() {
                println!("Change cursor expired; resyncing in {}s", delay.as_secs());
                tokio::time::sleep(delay).await;
                print_outcome(engine.resync().await?);
                return Ok(());
            }
            Err(error.into())
        }
    }
}

async fn run_resync(db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let remote = remote_from_env()?;
    let engine = SyncEngine::new(db.connection(), &remote, ZONE_NAME);

    engine.provision().await?;
    print_outcome(engine.resync().await?);
    Ok(())
}

fn run_status(db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path)?;
    let catalog = Catalog::new(db.connection(), ZONE_NAME);
    let state = SqliteSyncStateRepository::new(db.connection());

    let countries = catalog.list_countries()?;
    let pending: usize = countries.iter().filter(|country| country.dirty).count();
    println!("Countries: {} ({pending} pending upload)", countries.len());

    match catalog.selected_country()? {
        Some(country) => println!("Selected: {} [{}]", country.name, country.record_name),
        None => println!("Selected: (none)"),
    }

    let provisioned = state.get_flag(state_keys::ZONE_CREATED)?
        && state.get_flag(state_keys::SUBSCRIPTION_SAVED)?;
    println!("Provisioned: {}", if provisioned { "yes" } else { "no" });
    println!(
        "Remote available: {}",
        if state.get_flag(state_keys::REMOTE_AVAILABLE)? { "yes" } else { "no" }
    );

    let has_cursor = state.get_token(state_keys::DATABASE_CHANGE_TOKEN)?.is_some();
    println!("Change cursor: {}", if has_cursor { "present" } else { "none" });

    match state.get_timestamp(state_keys::LAST_SYNC_AT)? {
        Some(at) => println!("Last sync: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Last sync: never"),
    }
    Ok(())
}

fn print_outcome(outcome: PullOutcome) {
    match outcome {
        PullOutcome::NewData { applied, removed } => {
            println!("Sync completed: {applied} applied, {removed} removed");
        }
        PullOutcome::NoData => println!("Sync completed: already up to date"),
        PullOutcome::Skipped => println!("Sync skipped"),
    }
}

#[derive(Debug, Serialize)]
struct CountryListItem {
    id: String,
    name: String,
    pending_upload: bool,
}

impl From<&Country> for CountryListItem {
    fn from(country: &Country) -> Self {
        Self {
            id: country.record_name.to_string(),
            name: country.name.clone(),
            pending_upload: country.dirty,
        }
    }
}

#[derive(Debug, Serialize)]
struct CityListItem {
    id: String,
    name: String,
    has_photo: bool,
    pending_upload: bool,
}

impl From<&City> for CityListItem {
    fn from(city: &City) -> Self {
        Self {
            id: city.record_name.to_string(),
            name: city.name.clone(),
            has_photo: city.photo.is_some(),
            pending_upload: city.dirty,
        }
    }
}

fn format_country_line(country: &Country) -> String {
    let marker = if country.dirty { "*" } else { " " };
    format!("{marker} {}  {}", country.record_name, country.name)
}

fn format_city_line(city: &City) -> String {
    let marker = if city.dirty { "*" } else { " " };
    format!("{marker} {}  {}", city.record_name, city.name)
}

fn resolve_name(parts: &[String]) -> Result<String, CliError> {
    let name = parts.join(" ").trim().to_string();
    if name.is_empty() {
        return Err(CliError::EmptyName);
    }
    Ok(name)
}

/// Resolve a country by exact ID or unique ID prefix.
fn resolve_country(catalog: &Catalog<'_>, query: &str) -> Result<Country, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::CountryNotFound(String::new()));
    }
    let countries = catalog.list_countries()?;
    if let Some(country) = countries
        .iter()
        .find(|country| country.record_name.as_str() == query)
    {
        return Ok(country.clone());
    }

    let matches: Vec<&Country> = countries
        .iter()
        .filter(|country| country.record_name.as_str().starts_with(query))
        .collect();
    match matches.as_slice() {
        [country] => Ok((*country).clone()),
        [] => Err(CliError::CountryNotFound(query.to_string())),
        _ => Err(CliError::AmbiguousId(format!(
            "Prefix '{query}' matches {} countries",
            matches.len()
        ))),
    }
}

/// Resolve a city by exact ID or unique ID prefix, across all countries.
fn resolve_city(catalog: &Catalog<'_>, query: &str) -> Result<City, CliError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::CityNotFound(String::new()));
    }
    let mut matches: Vec<City> = Vec::new();
    for country in catalog.list_countries()? {
        for city in catalog.list_cities(&country.record_name)? {
            if city.record_name.as_str() == query {
                return Ok(city);
            }
            if city.record_name.as_str().starts_with(query) {
                matches.push(city);
            }
        }
    }
    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(CliError::CityNotFound(query.to_string())),
        count => Err(CliError::AmbiguousId(format!(
            "Prefix '{query}' matches {count} cities"
        ))),
    }
}

/// Owning country for a city command: explicit `--country`, else selection.
fn resolve_owner(catalog: &Catalog<'_>, country: Option<&str>) -> Result<RecordName, CliError> {
    match country {
        Some(query) => Ok(resolve_country(catalog, query)?.record_name),
        None => catalog
            .selected_country()?
            .map(|country| country.record_name)
            .ok_or(CliError::NoSelection),
    }
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("ATLAS_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("atlas")
        .join("atlas.db")
}

fn remote_from_env() -> Result<HttpRemote, CliError> {
    let url = env::var("ATLAS_REMOTE_URL").map_err(|_| CliError::SyncNotConfigured)?;
    if url.is_empty() {
        return Err(CliError::SyncNotConfigured);
    }
    let remote = HttpRemote::new(url).map_err(atlas_core::Error::Remote)?;
    tracing::info!("Sync enabled against remote store");
    Ok(match env::var("ATLAS_AUTH_TOKEN") {
        Ok(token) if !token.is_empty() => remote.with_auth_token(token),
        _ => remote,
    })
}

fn open_database(path: &Path) -> Result<Database, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Database::open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seeded_catalog(db: &Database) -> Catalog<'_> {
        Catalog::new(db.connection(), ZONE_NAME)
    }

    #[test]
    fn resolve_country_supports_exact_and_prefix_id() {
        let db = Database::open_in_memory().unwrap();
        let catalog = seeded_catalog(&db);
        let country = catalog.add_country("Norway").unwrap();

        let exact = resolve_country(&catalog, country.record_name.as_str()).unwrap();
        assert_eq!(exact.record_name, country.record_name);

        let prefix = &country.record_name.as_str()[..15];
        let matched = resolve_country(&catalog, prefix).unwrap();
        assert_eq!(matched.record_name, country.record_name);
    }

    #[test]
    fn resolve_country_rejects_ambiguous_prefix() {
        let db = Database::open_in_memory().unwrap();
        let catalog = seeded_catalog(&db);
        catalog.add_country("Norway").unwrap();
        catalog.add_country("Sweden").unwrap();

        // Every country ID shares the type prefix.
        let error = resolve_country(&catalog, "idcountry-").unwrap_err();
        assert!(matches!(error, CliError::AmbiguousId(_)));
    }

    #[test]
    fn resolve_country_rejects_missing_id() {
        let db = Database::open_in_memory().unwrap();
        let catalog = seeded_catalog(&db);

        let error = resolve_country(&catalog, "idcountry-missing").unwrap_err();
        assert!(matches!(error, CliError::CountryNotFound(_)));
    }

    #[test]
    fn resolve_city_scans_all_countries() {
        let db = Database::open_in_memory().unwrap();
        let catalog = seeded_catalog(&db);
        let norway = catalog.add_country("Norway").unwrap();
        let sweden = catalog.add_country("Sweden").unwrap();
        catalog.add_city("Oslo", &norway.record_name).unwrap();
        let stockholm = catalog.add_city("Stockholm", &sweden.record_name).unwrap();

        let found = resolve_city(&catalog, stockholm.record_name.as_str()).unwrap();
        assert_eq!(found.name, "Stockholm");

        let error = resolve_city(&catalog, "idcity-").unwrap_err();
        assert!(matches!(error, CliError::AmbiguousId(_)));
    }

    #[test]
    fn resolve_name_joins_and_trims() {
        let parts = vec![" New".to_string(), "Zealand ".to_string()];
        assert_eq!(resolve_name(&parts).unwrap(), "New Zealand");
        assert!(matches!(resolve_name(&[]).unwrap_err(), CliError::EmptyName));
        assert!(matches!(
            resolve_name(&["  ".to_string()]).unwrap_err(),
            CliError::EmptyName
        ));
    }

    #[test]
    fn resolve_owner_prefers_explicit_country() {
        let db = Database::open_in_memory().unwrap();
        let catalog = seeded_catalog(&db);
        let norway = catalog.add_country("Norway").unwrap();
        let sweden = catalog.add_country("Sweden").unwrap();
        catalog.select_country(Some(&norway.record_name)).unwrap();

        let explicit = resolve_owner(&catalog, Some(sweden.record_name.as_str())).unwrap();
        assert_eq!(explicit, sweden.record_name);

        let fallback = resolve_owner(&catalog, None).unwrap();
        assert_eq!(fallback, norway.record_name);

        catalog.select_country(None).unwrap();
        assert!(matches!(
            resolve_owner(&catalog, None).unwrap_err(),
            CliError::NoSelection
        ));
    }
}
