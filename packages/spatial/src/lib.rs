#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory spatial index for census tract layers.
//!
//! Loads tract polygons from a `GeoJSON` `FeatureCollection`, builds an
//! R-tree over their envelopes, and answers point-in-polygon lookups.
//! The map engine serves rendered-feature queries out of this index, and
//! [`query::find_enclosing_tract`] turns those rendered features back
//! into [`TractFeature`]s.

pub mod query;

use std::path::Path;

use geo::{BoundingRect, Contains, MultiPolygon};
use geojson::{GeoJson, Geometry, JsonObject};
use opportunity_map_geography_models::{Coordinate, RenderedFeature, TractFeature};
use rstar::{AABB, RTree, RTreeObject};
use thiserror::Error;

pub use query::{RenderedFeatureQuery, find_enclosing_tract};

/// Errors from loading a tract layer.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// The layer file could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The layer is not valid `GeoJSON`.
    #[error("Invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    /// The layer parsed but is not a `FeatureCollection`.
    #[error("Expected a FeatureCollection, got a {kind}")]
    NotFeatureCollection {
        /// What was found instead.
        kind: &'static str,
    },
}

/// A polygon stored in the R-tree, pointing back at its feature.
struct TractEntry {
    ordinal: usize,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for TractEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// A tract feature as loaded from the layer, attributes untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedFeature {
    pub properties: JsonObject,
    pub geometry: Geometry,
}

impl IndexedFeature {
    /// This feature as a renderer would report it from `layer_id`.
    #[must_use]
    pub fn to_rendered(&self, layer_id: &str, source_id: &str) -> RenderedFeature {
        RenderedFeature {
            layer_id: layer_id.to_string(),
            source_id: source_id.to_string(),
            properties: self.properties.clone(),
            geometry: Some(self.geometry.clone()),
        }
    }
}

/// R-tree index over one tract layer.
///
/// Features keep their load order. Lookups that hit several overlapping
/// polygons return them in that order, so "first match" is stable across
/// runs.
pub struct TractLayerIndex {
    features: Vec<IndexedFeature>,
    tree: RTree<TractEntry>,
}

impl std::fmt::Debug for TractLayerIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TractLayerIndex")
            .field("features", &self.features.len())
            .finish_non_exhaustive()
    }
}

impl TractLayerIndex {
    /// Builds an index from a `GeoJSON` `FeatureCollection` string.
    ///
    /// Features without a polygonal geometry are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the input is not valid `GeoJSON` or is
    /// not a `FeatureCollection`.
    pub fn from_geojson_str(input: &str) -> Result<Self, SpatialError> {
        let collection = match input.parse::<GeoJson>()? {
            GeoJson::FeatureCollection(collection) => collection,
            GeoJson::Feature(_) => {
                return Err(SpatialError::NotFeatureCollection { kind: "Feature" });
            }
            GeoJson::Geometry(_) => {
                return Err(SpatialError::NotFeatureCollection { kind: "Geometry" });
            }
        };

        let mut features = Vec::with_capacity(collection.features.len());
        let mut entries = Vec::with_capacity(collection.features.len());

        for feature in collection.features {
            let Some(geometry) = feature.geometry else {
                log::warn!("Skipping tract feature without geometry");
                continue;
            };

            let Some(polygon) = to_multipolygon(&geometry) else {
                log::warn!("Skipping non-polygon tract feature");
                continue;
            };

            entries.push(TractEntry {
                ordinal: features.len(),
                envelope: compute_envelope(&polygon),
                polygon,
            });
            features.push(IndexedFeature {
                properties: feature.properties.unwrap_or_default(),
                geometry,
            });
        }

        log::info!("Loaded {} tracts into spatial index", features.len());

        Ok(Self {
            features,
            tree: RTree::bulk_load(entries),
        })
    }

    /// Reads and indexes a `GeoJSON` file.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError`] if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SpatialError> {
        let input = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Indexing tract layer {}", path.as_ref().display());
        Self::from_geojson_str(&input)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// All features whose polygon contains `coordinate`, in load order.
    #[must_use]
    pub fn features_at(&self, coordinate: Coordinate) -> Vec<&IndexedFeature> {
        let point = geo::Point::new(coordinate.lng, coordinate.lat);
        let query_env = AABB::from_point([coordinate.lng, coordinate.lat]);

        let mut ordinals: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| entry.polygon.contains(&point))
            .map(|entry| entry.ordinal)
            .collect();
        ordinals.sort_unstable();

        ordinals.into_iter().map(|i| &self.features[i]).collect()
    }

    /// The first tract containing `coordinate`.
    #[must_use]
    pub fn tract_at(&self, coordinate: Coordinate) -> Option<TractFeature> {
        self.features_at(coordinate)
            .first()
            .map(|f| TractFeature::from_properties(&f.properties, Some(f.geometry.clone())))
    }
}

/// Handles both `Polygon` and `MultiPolygon` geometries.
fn to_multipolygon(geometry: &Geometry) -> Option<MultiPolygon<f64>> {
    let geo_geom: geo::Geometry<f64> = geometry.clone().try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::json;

    /// A closed square ring from `(x0, y0)` to `(x1, y1)`.
    pub fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> serde_json::Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]]
        })
    }

    /// Two side-by-side Boston tracts plus a point feature.
    pub fn boston() -> String {
        json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {
                        "GEOID": "25025070101",
                        "Household_Income_at_Age_35_rP_gP_p25": 36000
                    },
                    "geometry": square(-71.10, 42.30, -71.00, 42.40)
                },
                {
                    "type": "Feature",
                    "properties": {
                        "GEOID": "25025070200",
                        "household_income_at_age_35_rp_gp_p25": 47000
                    },
                    "geometry": square(-71.00, 42.30, -70.90, 42.40)
                },
                {
                    "type": "Feature",
                    "properties": { "name": "marker" },
                    "geometry": { "type": "Point", "coordinates": [-71.05, 42.35] }
                }
            ]
        })
        .to_string()
    }
}
