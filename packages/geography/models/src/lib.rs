#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Coordinate, place, and census tract feature types.
//!
//! These are the plain values that flow between the geocoder, the map
//! layer, and the scorer. Tract features are read-only projections of
//! rendered vector-tile features; nothing here mutates map data.

pub mod states;

use geojson::{Geometry, JsonObject};
use serde::{Deserialize, Serialize};

/// Property keys that have carried the household income attribute across
/// tileset revisions, in lookup order.
pub const INCOME_KEYS: &[&str] = &[
    "Household_Income_at_Age_35_rP_gP_p25",
    "household_income_at_age_35_rp_gp_p25",
    "Household_Income_at_Age_35-rP_gP_p25",
];

/// Property keys that carry the tract GEOID, in lookup order.
pub const TRACT_ID_KEYS: &[&str] = &["GEOID", "GEO_ID"];

/// A WGS84 longitude/latitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Longitude in degrees.
    pub lng: f64,
    /// Latitude in degrees.
    pub lat: f64,
}

impl Coordinate {
    #[must_use]
    pub const fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lng, self.lat)
    }
}

/// A pixel position in the map viewport, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Place breadcrumbs returned by a ZIP code or reverse lookup.
///
/// Only used to scope follow-up geocoding attempts; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceContext {
    /// City or town name.
    pub city: Option<String>,
    /// Full state name (e.g. "Massachusetts").
    pub state: String,
    /// USPS state abbreviation (e.g. "MA").
    pub state_code: String,
    /// County name, when the provider reports one.
    pub county: Option<String>,
}

/// A feature as returned by a rendered-feature query at a screen pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedFeature {
    /// Style layer the feature was rendered in.
    pub layer_id: String,
    /// Source the layer draws from.
    pub source_id: String,
    /// Feature attributes.
    pub properties: JsonObject,
    /// Feature geometry, when the renderer exposes it.
    pub geometry: Option<Geometry>,
}

/// A census tract projected out of a rendered feature.
#[derive(Debug, Clone, PartialEq)]
pub struct TractFeature {
    /// Census GEOID, empty when the feature carries none.
    pub tract_id: String,
    /// Tract outline.
    pub geometry: Option<Geometry>,
    /// Household income at age 35, `None` when the attribute is absent.
    pub income: Option<f64>,
}

impl TractFeature {
    /// Projects a rendered feature into a tract, coalescing the tract id
    /// and income attribute across their historical key names.
    #[must_use]
    pub fn from_rendered(feature: &RenderedFeature) -> Self {
        Self::from_properties(&feature.properties, feature.geometry.clone())
    }

    /// Builds a tract from raw feature attributes.
    #[must_use]
    pub fn from_properties(properties: &JsonObject, geometry: Option<Geometry>) -> Self {
        let tract_id = first_defined(properties, TRACT_ID_KEYS)
            .and_then(value_as_string)
            .unwrap_or_default();

        let income = first_defined(properties, INCOME_KEYS).and_then(value_as_f64);

        Self {
            tract_id,
            geometry,
            income,
        }
    }

    /// State abbreviation derived from the GEOID's FIPS prefix.
    #[must_use]
    pub fn state_abbr(&self) -> Option<&'static str> {
        states::abbreviation_for_geoid(&self.tract_id)
    }
}

/// Returns the value of the first key in `keys` that is present and not
/// `null` in `properties`.
#[must_use]
pub fn first_defined<'a>(
    properties: &'a JsonObject,
    keys: &[&str],
) -> Option<&'a serde_json::Value> {
    keys.iter()
        .filter_map(|key| properties.get(*key))
        .find(|value| !value.is_null())
}

/// Reads a number out of a property value. Vector tiles sometimes encode
/// numeric attributes as strings.
fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: serde_json::Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    fn rendered(properties: serde_json::Value) -> RenderedFeature {
        RenderedFeature {
            layer_id: "census-tracts-layer".to_string(),
            source_id: "ct-opportunity-data".to_string(),
            properties: props(properties),
            geometry: None,
        }
    }

    #[test]
    fn first_defined_respects_key_order() {
        let p = props(json!({ "b": 2, "a": 1 }));
        assert_eq!(first_defined(&p, &["a", "b"]), Some(&json!(1)));
        assert_eq!(first_defined(&p, &["b", "a"]), Some(&json!(2)));
    }

    #[test]
    fn first_defined_skips_null() {
        let p = props(json!({ "a": null, "b": 2 }));
        assert_eq!(first_defined(&p, &["a", "b"]), Some(&json!(2)));
        assert_eq!(first_defined(&p, &["c"]), None);
    }

    #[test]
    fn income_from_canonical_key() {
        let tract = TractFeature::from_rendered(&rendered(json!({
            "GEOID": "25025070101",
            "Household_Income_at_Age_35_rP_gP_p25": 36000
        })));
        assert_eq!(tract.tract_id, "25025070101");
        assert_eq!(tract.income, Some(36000.0));
        assert_eq!(tract.state_abbr(), Some("MA"));
    }

    #[test]
    fn income_from_lowercase_and_hyphenated_keys() {
        let lower = TractFeature::from_rendered(&rendered(json!({
            "household_income_at_age_35_rp_gp_p25": 28500.5
        })));
        assert_eq!(lower.income, Some(28500.5));

        let hyphen = TractFeature::from_rendered(&rendered(json!({
            "Household_Income_at_Age_35-rP_gP_p25": "41000"
        })));
        assert_eq!(hyphen.income, Some(41000.0));
    }

    #[test]
    fn canonical_key_wins_over_variants() {
        let tract = TractFeature::from_rendered(&rendered(json!({
            "Household_Income_at_Age_35-rP_gP_p25": 1,
            "household_income_at_age_35_rp_gp_p25": 2,
            "Household_Income_at_Age_35_rP_gP_p25": 3
        })));
        assert_eq!(tract.income, Some(3.0));
    }

    #[test]
    fn missing_income_is_none() {
        let tract = TractFeature::from_rendered(&rendered(json!({ "GEO_ID": "17031010100" })));
        assert_eq!(tract.tract_id, "17031010100");
        assert_eq!(tract.income, None);
    }

    #[test]
    fn place_context_serializes_camel_case() {
        let ctx = PlaceContext {
            city: Some("Springfield".to_string()),
            state: "Massachusetts".to_string(),
            state_code: "MA".to_string(),
            county: None,
        };
        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value["stateCode"], "MA");
    }
}
