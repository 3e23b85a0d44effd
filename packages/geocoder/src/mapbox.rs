//! Mapbox Geocoding v5 client.
//!
//! Forward queries go to `{base_url}/{text}.json`, reverse queries to
//! `{base_url}/{lng},{lat}.json`. Both return a `GeoJSON`
//! `FeatureCollection` whose features carry `center`, `place_type`,
//! `relevance`, and a `context` breadcrumb list.
//!
//! The client issues exactly one request per call. Non-2xx answers become
//! [`GeocodeError::Status`]; retry and fallback belong to the resolver.
//!
//! See <https://docs.mapbox.com/api/search/geocoding-v5/>

use async_trait::async_trait;
use opportunity_map_geography_models::{Coordinate, PlaceContext};
use serde::Deserialize;

use crate::service_registry::{self, GeocodingService, ProviderConfig};
use crate::{CandidateMatch, ContextEntry, ForwardOptions, GeocodeError, GeocodeProvider};

/// Place types requested on reverse lookups.
const REVERSE_TYPES: &str = "postcode,place,district,region";

/// A Mapbox geocoding client.
#[derive(Debug, Clone)]
pub struct MapboxGeocoder {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    country: String,
    limit: u32,
}

impl MapboxGeocoder {
    /// Creates a client against `base_url` with the given token.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: &str, access_token: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            country: "us".to_string(),
            limit: 1,
        }
    }

    /// Creates a client from a registry entry, reading the access token
    /// from the environment variable the entry names.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Config`] if the token variable is unset or
    /// empty.
    pub fn from_service(
        client: reqwest::Client,
        service: &GeocodingService,
    ) -> Result<Self, GeocodeError> {
        let ProviderConfig::Mapbox {
            base_url,
            country,
            limit,
            access_token_env,
        } = &service.provider;

        let access_token = std::env::var(access_token_env)
            .ok()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| GeocodeError::Config {
                message: format!("{access_token_env} environment variable not set"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
            country: country.clone(),
            limit: *limit,
        })
    }

    /// Creates a client from the highest-priority enabled service.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Config`] if no service is enabled or its
    /// access token is not set.
    pub fn from_env() -> Result<Self, GeocodeError> {
        let service = service_registry::primary_service()?;
        log::debug!(
            "Using geocoding service '{}' at {}",
            service.name,
            service.base_url()
        );
        Self::from_service(reqwest::Client::new(), &service)
    }

    /// Country filter applied when a request does not specify one.
    #[must_use]
    pub fn country(&self) -> &str {
        &self.country
    }

    fn endpoint(&self, path_segment: &str) -> Result<reqwest::Url, GeocodeError> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| GeocodeError::Config {
            message: format!("invalid base URL '{}': {e}", self.base_url),
        })?;

        url.path_segments_mut()
            .map_err(|()| GeocodeError::Config {
                message: format!("base URL '{}' cannot take a path", self.base_url),
            })?
            .push(&format!("{path_segment}.json"));

        Ok(url)
    }

    fn reverse_endpoint(&self, coordinate: Coordinate) -> Result<reqwest::Url, GeocodeError> {
        self.endpoint(&format!("{},{}", coordinate.lng, coordinate.lat))
    }

    async fn get(
        &self,
        url: reqwest::Url,
        params: &[(&str, String)],
    ) -> Result<Vec<CandidateMatch>, GeocodeError> {
        let resp = self
            .client
            .get(url)
            .query(&[("access_token", self.access_token.as_str())])
            .query(params)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(GeocodeError::Status {
                status: resp.status().as_u16(),
            });
        }

        let body = resp.text().await?;
        parse_response(&body)
    }
}

#[async_trait]
impl GeocodeProvider for MapboxGeocoder {
    async fn forward_geocode(
        &self,
        text: &str,
        options: &ForwardOptions,
    ) -> Result<Vec<CandidateMatch>, GeocodeError> {
        // Mapbox has no state filter, so the state rides along in the text.
        let search = options
            .state
            .as_ref()
            .map_or_else(|| text.to_string(), |state| format!("{text}, {state}"));

        let mut params = vec![
            (
                "country",
                options
                    .country
                    .clone()
                    .unwrap_or_else(|| self.country.clone()),
            ),
            ("limit", self.limit.to_string()),
        ];
        if !options.types.is_empty() {
            params.push(("types", options.types.join(",")));
        }

        log::trace!("Mapbox forward geocode: {search:?} {params:?}");
        self.get(self.endpoint(&search)?, &params).await
    }

    async fn reverse_geocode(
        &self,
        coordinate: Coordinate,
    ) -> Result<Option<PlaceContext>, GeocodeError> {
        let params = [("types", REVERSE_TYPES.to_string())];

        log::trace!("Mapbox reverse geocode: {coordinate}");
        let candidates = self.get(self.reverse_endpoint(coordinate)?, &params).await?;
        Ok(first_place_context(&candidates))
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    center: [f64; 2],
    place_type: Vec<String>,
    #[serde(default)]
    relevance: f64,
    #[serde(default)]
    text: String,
    #[serde(default)]
    place_name: Option<String>,
    #[serde(default)]
    context: Vec<ContextEntry>,
}

impl From<Feature> for CandidateMatch {
    fn from(feature: Feature) -> Self {
        let [lng, lat] = feature.center;
        Self {
            center: Coordinate::new(lng, lat),
            place_types: feature.place_type,
            relevance: feature.relevance,
            text: feature.text,
            place_name: feature.place_name,
            context: feature.context,
        }
    }
}

/// Place context of the first reverse-lookup feature that has a region.
fn first_place_context(candidates: &[CandidateMatch]) -> Option<PlaceContext> {
    candidates.iter().find_map(CandidateMatch::place_context)
}

/// Parses a Mapbox `FeatureCollection` response body.
fn parse_response(body: &str) -> Result<Vec<CandidateMatch>, GeocodeError> {
    let collection: FeatureCollection =
        serde_json::from_str(body).map_err(|e| GeocodeError::Parse {
            message: format!("Mapbox response: {e}"),
        })?;

    Ok(collection
        .features
        .into_iter()
        .map(CandidateMatch::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_address_feature() {
        let body = serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "id": "address.123",
                "type": "Feature",
                "place_type": ["address"],
                "relevance": 0.98,
                "text": "Main Street",
                "place_name": "123 Main Street, Boston, Massachusetts 02108, United States",
                "center": [-71.06, 42.36],
                "context": [
                    { "id": "postcode.1", "text": "02108" },
                    { "id": "place.2", "text": "Boston" },
                    { "id": "region.3", "text": "Massachusetts", "short_code": "US-MA" }
                ]
            }]
        });

        let candidates = parse_response(&body.to_string()).unwrap();
        assert_eq!(candidates.len(), 1);
        let first = &candidates[0];
        assert!((first.center.lng - -71.06).abs() < 1e-9);
        assert!((first.center.lat - 42.36).abs() < 1e-9);
        assert!(first.has_place_type("address"));
        assert!((first.relevance - 0.98).abs() < 1e-9);
        assert_eq!(first.context_of("place").unwrap().text, "Boston");
    }

    #[test]
    fn parses_empty_collection() {
        let body = r#"{ "type": "FeatureCollection", "features": [] }"#;
        assert!(parse_response(body).unwrap().is_empty());
    }

    #[test]
    fn malformed_body_is_parse_error() {
        let err = parse_response("<html>oops</html>").unwrap_err();
        assert!(matches!(err, GeocodeError::Parse { .. }));
        assert!(!err.is_transport());
    }

    #[test]
    fn missing_center_is_parse_error() {
        let body = r#"{ "features": [{ "place_type": ["address"], "relevance": 1.0 }] }"#;
        assert!(matches!(
            parse_response(body),
            Err(GeocodeError::Parse { .. })
        ));
    }

    #[test]
    fn endpoint_encodes_text() {
        let geocoder = MapboxGeocoder::new(
            reqwest::Client::new(),
            "https://api.mapbox.com/geocoding/v5/mapbox.places/",
            "token",
        );
        let url = geocoder.endpoint("123 Main St, Boston").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.mapbox.com/geocoding/v5/mapbox.places/123%20Main%20St,%20Boston.json"
        );
    }

    #[test]
    fn reverse_endpoint_is_lng_lat() {
        let geocoder = MapboxGeocoder::new(
            reqwest::Client::new(),
            "https://api.mapbox.com/geocoding/v5/mapbox.places",
            "token",
        );
        let url = geocoder
            .reverse_endpoint(Coordinate::new(-71.06, 42.36))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.mapbox.com/geocoding/v5/mapbox.places/-71.06,42.36.json"
        );
    }

    #[test]
    fn reverse_body_yields_place_context() {
        let body = r#"{
            "type": "FeatureCollection",
            "query": [-71.06, 42.36],
            "features": [
                {
                    "id": "postcode.7",
                    "type": "Feature",
                    "place_type": ["postcode"],
                    "relevance": 1,
                    "text": "02108",
                    "center": [-71.0657, 42.3577],
                    "context": [
                        { "id": "place.8", "text": "Boston" },
                        { "id": "district.9", "text": "Suffolk County" },
                        { "id": "region.10", "text": "Massachusetts", "short_code": "US-MA" }
                    ]
                },
                {
                    "id": "place.8",
                    "type": "Feature",
                    "place_type": ["place"],
                    "relevance": 1,
                    "text": "Boston",
                    "center": [-71.0596, 42.3605],
                    "context": [
                        { "id": "region.10", "text": "Massachusetts", "short_code": "US-MA" }
                    ]
                }
            ]
        }"#;

        let candidates = parse_response(body).unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].has_place_type("postcode"));

        let place = first_place_context(&candidates).unwrap();
        assert_eq!(place.city.as_deref(), Some("Boston"));
        assert_eq!(place.county.as_deref(), Some("Suffolk County"));
        assert_eq!(place.state, "Massachusetts");
        assert_eq!(place.state_code, "MA");
    }

    #[test]
    fn reverse_without_region_has_no_place() {
        let body = r#"{
            "features": [{
                "place_type": ["place"],
                "relevance": 1,
                "text": "Nowhere",
                "center": [0.0, 0.0]
            }]
        }"#;
        assert_eq!(first_place_context(&parse_response(body).unwrap()), None);
    }
}
