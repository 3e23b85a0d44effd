#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the opportunity map.
//!
//! `locate` runs a descriptor through geocoding, a headless map over a
//! local census tract file, and the opportunity scorer, then names the
//! place through a reverse lookup. `score` and `tract` expose the scorer
//! and the point-in-tract lookup on their own.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use opportunity_map_geocoder::LocationResolver;
use opportunity_map_geocoder::mapbox::MapboxGeocoder;
use opportunity_map_geography_models::{Coordinate, PlaceContext, TractFeature};
use opportunity_map_locator::{LocateOutcome, OpportunityLocator};
use opportunity_map_map::layers::TRACT_TILESET_URL;
use opportunity_map_map::{HeadlessMapFactory, MapContainer, MapLayerController, TileStore};
use opportunity_map_scoring::{OpportunityScore, score_from_income};
use opportunity_map_session::{SessionScoreSync, SessionStore};
use opportunity_map_spatial::TractLayerIndex;
use tokio::sync::Mutex;

/// Size of the headless viewport used by `locate`.
const VIEWPORT: MapContainer = MapContainer::new(1024.0, 768.0);

// ---------------------------------------------------------------------------
// CLI definitions
// ---------------------------------------------------------------------------

/// Locate addresses on the census tract opportunity map.
#[derive(Parser)]
#[command(name = "opportunity_map")]
#[command(about = "Locate addresses on the census tract opportunity map")]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Resolve a location and score the census tract it falls in.
    Locate {
        /// Address, ZIP code, or "neighborhood, town, ZIP".
        descriptor: String,

        /// `GeoJSON` `FeatureCollection` of census tracts.
        #[arg(long)]
        tracts: PathBuf,
    },

    /// Print the opportunity score and color for an income.
    Score {
        /// Household income at age 35.
        income: f64,
    },

    /// Look up the census tract containing a point.
    Tract {
        /// Longitude.
        #[arg(allow_negative_numbers = true)]
        lng: f64,

        /// Latitude.
        #[arg(allow_negative_numbers = true)]
        lat: f64,

        /// `GeoJSON` `FeatureCollection` of census tracts.
        #[arg(long)]
        tracts: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Locate { descriptor, tracts } => cmd_locate(&descriptor, &tracts).await,
        Commands::Score { income } => {
            cmd_score(income);
            Ok(())
        }
        Commands::Tract { lng, lat, tracts } => cmd_tract(Coordinate::new(lng, lat), &tracts),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_locate(descriptor: &str, tracts: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let geocoder = MapboxGeocoder::from_env()?;
    let country = geocoder.country().to_string();
    let index = TractLayerIndex::from_path(tracts)?;
    log::info!("Loaded {} tracts from {}", index.len(), tracts.display());

    let tiles = TileStore::new().with_tileset(TRACT_TILESET_URL, index);
    let mut map = MapLayerController::new(Arc::new(HeadlessMapFactory::new(tiles)));
    map.initialize(VIEWPORT)?;
    map.wait_until_ready().await?;

    let store = SessionStore::new();
    let locator = OpportunityLocator::new(
        LocationResolver::new(geocoder).with_country(&country),
        Arc::new(Mutex::new(map)),
        SessionScoreSync::new(store.clone()),
    );

    match locator.locate(descriptor).await? {
        LocateOutcome::Located {
            coordinate,
            strategy,
            tract,
            score,
        } => {
            println!("Location: {coordinate} (via {strategy})");
            if let Some(place) = locator.resolver().place_at(coordinate).await? {
                println!("Place:    {}", place_label(&place));
            }
            match tract {
                Some(tract) => print_tract(&tract),
                None => println!("Tract:    none at this location"),
            }
            print_score(score);

            let record = store.snapshot();
            log::debug!("Session score record: {record:?}");
        }
        LocateOutcome::NotFound => {
            println!("Could not find location {descriptor:?}");
        }
        outcome @ (LocateOutcome::Superseded | LocateOutcome::MapNotReady) => {
            log::warn!("Lookup for {descriptor:?} did not complete: {outcome:?}");
        }
    }

    Ok(())
}

fn cmd_score(income: f64) {
    print_score(score_from_income(Some(income)));
}

fn cmd_tract(coordinate: Coordinate, tracts: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let index = TractLayerIndex::from_path(tracts)?;

    match index.tract_at(coordinate) {
        Some(tract) => {
            print_tract(&tract);
            print_score(score_from_income(tract.income));
        }
        None => println!("No tract contains {coordinate}"),
    }

    Ok(())
}

fn print_tract(tract: &TractFeature) {
    let id = if tract.tract_id.is_empty() {
        "(unknown)"
    } else {
        tract.tract_id.as_str()
    };
    println!("Tract:    {id}");
    if let Some(state) = tract.state_abbr() {
        println!("State:    {state}");
    }
    match tract.income {
        Some(income) => println!("Income:   {income}"),
        None => println!("Income:   n/a"),
    }
}

/// "City, County, ST", skipping the parts the lookup did not report.
fn place_label(place: &PlaceContext) -> String {
    let mut parts: Vec<&str> = Vec::new();
    parts.extend(place.city.as_deref());
    parts.extend(place.county.as_deref());
    parts.push(&place.state_code);
    parts.join(", ")
}

fn print_score(score: Option<OpportunityScore>) {
    match score {
        Some(score) => println!("Score:    {} ({})", score.value(), score.color()),
        None => println!("Score:    n/a"),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn tract_accepts_negative_longitude() {
        let cli = Cli::try_parse_from([
            "opportunity_map",
            "tract",
            "-71.5",
            "42.25",
            "--tracts",
            "tracts.geojson",
        ])
        .unwrap();

        let Commands::Tract { lng, lat, tracts } = cli.command else {
            panic!("expected the tract subcommand");
        };
        assert!((lng + 71.5).abs() < f64::EPSILON);
        assert!((lat - 42.25).abs() < f64::EPSILON);
        assert_eq!(tracts, PathBuf::from("tracts.geojson"));
    }

    #[test]
    fn locate_takes_descriptor_and_tracts() {
        let cli = Cli::try_parse_from([
            "opportunity_map",
            "locate",
            "Downtown, Springfield, 01103",
            "--tracts",
            "tracts.geojson",
        ])
        .unwrap();

        let Commands::Locate { descriptor, .. } = cli.command else {
            panic!("expected the locate subcommand");
        };
        assert_eq!(descriptor, "Downtown, Springfield, 01103");
    }

    #[test]
    fn place_label_skips_missing_parts() {
        let mut place = PlaceContext {
            city: Some("Springfield".to_string()),
            state: "Massachusetts".to_string(),
            state_code: "MA".to_string(),
            county: Some("Hampden County".to_string()),
        };
        assert_eq!(place_label(&place), "Springfield, Hampden County, MA");

        place.county = None;
        assert_eq!(place_label(&place), "Springfield, MA");

        place.city = None;
        assert_eq!(place_label(&place), "MA");
    }
}
