//! Source and layer definitions for the census tract view.
//!
//! Paint values and filters are Mapbox style-spec expressions held as
//! JSON, so the same definitions can drive a real renderer or the
//! headless engine.

use geojson::{Feature, GeoJson, Geometry, JsonObject};
use opportunity_map_geography_models::{Coordinate, INCOME_KEYS};
use opportunity_map_scoring::{INCOME_BREAKPOINTS, RAMP_CEILING, color_ramp};
use serde_json::{Value, json};
use strum_macros::{AsRefStr, Display};

use crate::MapError;

pub const TRACT_SOURCE_ID: &str = "ct-opportunity-data";
pub const TRACT_TILESET_URL: &str = "mapbox://mahiar.bdsxlspn";
pub const TRACT_SOURCE_LAYER: &str = "ct_tract_kfr_rP_gP_p25-8tx22d";

pub const TRACT_FILL_LAYER_ID: &str = "census-tracts-layer";
pub const TRACT_OUTLINE_LAYER_ID: &str = "census-tracts-outline";
pub const TRACT_HIGHLIGHT_LAYER_ID: &str = "census-tracts-hover";

pub const USER_LOCATION_SOURCE_ID: &str = "user-location-source";
pub const USER_LOCATION_LAYER_ID: &str = "user-location-symbol";
pub const USER_TRACT_SOURCE_ID: &str = "user-tract-source";
pub const USER_TRACT_LAYER_ID: &str = "user-tract-outline";

/// Attribute the highlight filter matches on.
pub const HIGHLIGHT_KEY: &str = "GEOID";

/// Layers shown and hidden together when the census view is toggled.
pub const TRACT_VIEW_LAYER_IDS: &[&str] = &[
    TRACT_FILL_LAYER_ID,
    TRACT_OUTLINE_LAYER_ID,
    TRACT_HIGHLIGHT_LAYER_ID,
    USER_LOCATION_LAYER_ID,
    USER_TRACT_LAYER_ID,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum LayerKind {
    Fill,
    Line,
    Circle,
}

/// Where a source's features come from.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceData {
    /// A vector tileset, addressed by URL.
    Vector { url: String },
    /// Inline `GeoJSON`, replaceable at runtime.
    GeoJson(GeoJson),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub id: String,
    pub data: SourceData,
}

impl SourceSpec {
    #[must_use]
    pub fn vector(id: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            data: SourceData::Vector {
                url: url.to_string(),
            },
        }
    }

    #[must_use]
    pub fn geojson(id: &str, data: GeoJson) -> Self {
        Self {
            id: id.to_string(),
            data: SourceData::GeoJson(data),
        }
    }
}

/// A style layer definition.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub id: String,
    pub kind: LayerKind,
    /// Id of the source the layer draws from.
    pub source: String,
    /// Layer inside a vector tileset.
    pub source_layer: Option<String>,
    /// Below this zoom the layer is not rendered.
    pub min_zoom: Option<f64>,
    pub paint: JsonObject,
    pub filter: Option<Value>,
    pub visible: bool,
}

impl LayerSpec {
    #[must_use]
    pub fn new(id: &str, kind: LayerKind, source: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            source: source.to_string(),
            source_layer: None,
            min_zoom: None,
            paint: JsonObject::new(),
            filter: None,
            visible: true,
        }
    }

    #[must_use]
    pub fn source_layer(mut self, source_layer: &str) -> Self {
        self.source_layer = Some(source_layer.to_string());
        self
    }

    #[must_use]
    pub fn min_zoom(mut self, zoom: f64) -> Self {
        self.min_zoom = Some(zoom);
        self
    }

    #[must_use]
    pub fn paint(mut self, property: &str, value: Value) -> Self {
        self.paint.insert(property.to_string(), value);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// A source plus the layers drawn from it, added together.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerGroup {
    pub source: SourceSpec,
    pub layers: Vec<LayerSpec>,
}

/// The sources and layers set up when the map loads, bottom to top.
#[must_use]
pub fn default_layer_groups() -> Vec<LayerGroup> {
    vec![
        LayerGroup {
            source: SourceSpec::vector(TRACT_SOURCE_ID, TRACT_TILESET_URL),
            layers: vec![
                LayerSpec::new(TRACT_FILL_LAYER_ID, LayerKind::Fill, TRACT_SOURCE_ID)
                    .source_layer(TRACT_SOURCE_LAYER)
                    .paint("fill-color", default_fill_color())
                    .paint("fill-opacity", json!(0.8))
                    .paint("fill-outline-color", json!("#000000")),
                LayerSpec::new(TRACT_OUTLINE_LAYER_ID, LayerKind::Line, TRACT_SOURCE_ID)
                    .source_layer(TRACT_SOURCE_LAYER)
                    .paint("line-color", json!("#000000"))
                    .paint("line-width", json!(0.75))
                    .paint("line-opacity", json!(0.7)),
                LayerSpec::new(TRACT_HIGHLIGHT_LAYER_ID, LayerKind::Line, TRACT_SOURCE_ID)
                    .source_layer(TRACT_SOURCE_LAYER)
                    .paint("line-color", json!("#000"))
                    .paint("line-width", json!(3))
                    .paint("line-opacity", json!(0.9))
                    .filter(highlight_filter(None)),
            ],
        },
        LayerGroup {
            source: SourceSpec::geojson(
                USER_LOCATION_SOURCE_ID,
                point_data(Coordinate::new(0.0, 0.0)),
            ),
            layers: vec![
                LayerSpec::new(USER_LOCATION_LAYER_ID, LayerKind::Circle, USER_LOCATION_SOURCE_ID)
                    .paint("circle-radius", json!(10))
                    .paint("circle-color", json!("#000000"))
                    .paint("circle-stroke-width", json!(3))
                    .paint("circle-stroke-color", json!("#ffffff")),
            ],
        },
        LayerGroup {
            source: SourceSpec::geojson(USER_TRACT_SOURCE_ID, outline_data(None)),
            layers: vec![
                LayerSpec::new(USER_TRACT_LAYER_ID, LayerKind::Line, USER_TRACT_SOURCE_ID)
                    .paint("line-color", json!("#000000"))
                    .paint(
                        "line-width",
                        json!(["interpolate", ["linear"], ["zoom"], 8, 3, 10, 5, 12, 8, 14, 12]),
                    ),
            ],
        },
    ]
}

/// The income attribute, coalesced across its historical key names.
#[must_use]
pub fn income_expression() -> Value {
    let mut expression = vec![json!("coalesce")];
    expression.extend(INCOME_KEYS.iter().map(|key| json!(["get", key])));
    expression.push(json!(0));
    Value::Array(expression)
}

fn default_fill_color() -> Value {
    build_fill_color(&INCOME_BREAKPOINTS)
}

/// Builds the 11-stop fill color interpolation for `breakpoints`.
///
/// # Errors
///
/// Returns [`MapError::InvalidFillScale`] unless there is exactly one
/// finite breakpoint per score boundary, strictly ascending and below the
/// ramp ceiling. Every ramp color always gets a stop.
pub fn fill_color_expression(breakpoints: &[f64]) -> Result<Value, MapError> {
    let invalid = |message: &str| MapError::InvalidFillScale {
        message: message.to_string(),
    };

    if breakpoints.len() != INCOME_BREAKPOINTS.len() {
        return Err(MapError::InvalidFillScale {
            message: format!(
                "expected {} breakpoints, got {}",
                INCOME_BREAKPOINTS.len(),
                breakpoints.len()
            ),
        });
    }
    if breakpoints.iter().any(|b| !b.is_finite()) {
        return Err(invalid("breakpoints must be finite"));
    }
    if breakpoints.windows(2).any(|w| w[0] >= w[1]) {
        return Err(invalid("breakpoints must be strictly ascending"));
    }
    if breakpoints.last().is_some_and(|&last| last >= RAMP_CEILING) {
        return Err(invalid("breakpoints must stay below the ramp ceiling"));
    }

    Ok(build_fill_color(breakpoints))
}

fn build_fill_color(breakpoints: &[f64]) -> Value {
    let mut expression = vec![json!("interpolate"), json!(["linear"]), income_expression()];
    for (stop, color) in color_ramp(breakpoints) {
        expression.push(json!(stop));
        expression.push(json!(color));
    }
    Value::Array(expression)
}

/// Filter selecting a single tract. `None` selects nothing.
#[must_use]
pub fn highlight_filter(tract_id: Option<&str>) -> Value {
    json!(["==", HIGHLIGHT_KEY, tract_id.unwrap_or_default()])
}

/// Evaluates the subset of filter expressions the tract layers use:
/// `["==" | "!=", key, literal]`, where `key` is a bare property name or
/// a `["get", key]` expression. Anything else passes.
#[must_use]
pub fn filter_matches(filter: &Value, properties: &JsonObject) -> bool {
    let Some([op, key, expected]) = filter.as_array().map(Vec::as_slice) else {
        return true;
    };

    let key = match key {
        Value::String(key) => Some(key.as_str()),
        Value::Array(get) => match get.as_slice() {
            [Value::String(op), Value::String(key)] if op == "get" => Some(key.as_str()),
            _ => None,
        },
        _ => None,
    };
    let Some(key) = key else {
        return true;
    };

    let actual = properties.get(key).unwrap_or(&Value::Null);
    match op.as_str() {
        Some("==") => actual == expected,
        Some("!=") => actual != expected,
        _ => true,
    }
}

/// A single point feature.
#[must_use]
pub fn point_data(coordinate: Coordinate) -> GeoJson {
    feature(geojson::Value::Point(vec![coordinate.lng, coordinate.lat]))
}

/// A tract outline feature. `None` yields an empty polygon.
#[must_use]
pub fn outline_data(geometry: Option<&Geometry>) -> GeoJson {
    geometry.map_or_else(
        || feature(geojson::Value::Polygon(vec![vec![]])),
        |geometry| feature(geometry.value.clone()),
    )
}

fn feature(value: geojson::Value) -> GeoJson {
    GeoJson::Feature(Feature {
        bbox: None,
        geometry: Some(Geometry::new(value)),
        id: None,
        properties: Some(JsonObject::new()),
        foreign_members: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn default_layers_have_unique_ids() {
        let groups = default_layer_groups();
        let mut ids: Vec<&str> = groups
            .iter()
            .flat_map(|g| g.layers.iter().map(|l| l.id.as_str()))
            .collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total);
        for id in TRACT_VIEW_LAYER_IDS {
            assert!(ids.contains(id), "missing layer {id}");
        }
    }

    #[test]
    fn layers_reference_their_group_source() {
        for group in default_layer_groups() {
            for layer in &group.layers {
                assert_eq!(layer.source, group.source.id);
            }
        }
    }

    #[test]
    fn fill_color_has_eleven_stops() {
        let expression = fill_color_expression(&INCOME_BREAKPOINTS).unwrap();
        let parts = expression.as_array().unwrap();
        // "interpolate", ["linear"], input, then stop/color pairs.
        assert_eq!(parts.len(), 3 + 11 * 2);
        assert_eq!(parts[3], json!(10_000.0));
        assert_eq!(parts[4], json!("#9b252f"));
        assert_eq!(parts[parts.len() - 2], json!(60_000.0));
        assert_eq!(parts[parts.len() - 1], json!("#34687e"));
    }

    #[test]
    fn income_input_coalesces_in_key_order() {
        let expression = income_expression();
        let parts = expression.as_array().unwrap();
        assert_eq!(parts[0], "coalesce");
        assert_eq!(parts[1], json!(["get", "Household_Income_at_Age_35_rP_gP_p25"]));
        assert_eq!(parts[4], json!(0));
    }

    #[test]
    fn rejects_unusable_breakpoints() {
        let with = |index: usize, value: f64| {
            let mut breakpoints = INCOME_BREAKPOINTS;
            breakpoints[index] = value;
            breakpoints
        };

        assert!(fill_color_expression(&[]).is_err());
        assert!(fill_color_expression(&with(3, 20_000.0)).is_err());
        assert!(fill_color_expression(&with(5, f64::NAN)).is_err());
        assert!(fill_color_expression(&with(9, 70_000.0)).is_err());
        assert!(fill_color_expression(&[0.0; 11]).is_err());
    }

    #[test]
    fn partial_scale_cannot_drop_ramp_colors() {
        assert!(matches!(
            fill_color_expression(&[15_000.0, 30_000.0, 45_000.0]),
            Err(MapError::InvalidFillScale { .. })
        ));
        assert!(fill_color_expression(&INCOME_BREAKPOINTS[..9]).is_err());
    }

    #[test]
    fn shifted_scale_keeps_eleven_stops() {
        use opportunity_map_scoring::SCORE_COLORS;

        let shifted = INCOME_BREAKPOINTS.map(|b| b + 1_000.0);
        let expression = fill_color_expression(&shifted).unwrap();
        let parts = expression.as_array().unwrap();
        assert_eq!(parts.len(), 3 + SCORE_COLORS.len() * 2);
        assert_eq!(parts[3], json!(11_000.0));
        assert_eq!(parts[parts.len() - 1], json!(SCORE_COLORS[10]));
    }

    #[test]
    fn highlight_filter_matches_one_tract() {
        let filter = highlight_filter(Some("25025070101"));
        assert!(filter_matches(&filter, &props(json!({ "GEOID": "25025070101" }))));
        assert!(!filter_matches(&filter, &props(json!({ "GEOID": "25025070200" }))));

        let cleared = highlight_filter(None);
        assert!(!filter_matches(&cleared, &props(json!({ "GEOID": "25025070101" }))));
    }

    #[test]
    fn get_expression_and_unknown_filters() {
        let filter = json!(["!=", ["get", "kind"], "water"]);
        assert!(filter_matches(&filter, &props(json!({ "kind": "land" }))));
        assert!(!filter_matches(&filter, &props(json!({ "kind": "water" }))));
        assert!(filter_matches(&json!(["has", "kind"]), &JsonObject::new()));
    }

    #[test]
    fn empty_outline_is_empty_polygon() {
        let GeoJson::Feature(feature) = outline_data(None) else {
            panic!("expected a feature");
        };
        assert_eq!(
            feature.geometry.unwrap().value,
            geojson::Value::Polygon(vec![vec![]])
        );
    }
}
