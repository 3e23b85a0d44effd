//! Geocoding services bundled with the binary.
//!
//! Services are TOML files under `services/`, embedded at compile time.
//! [`primary_service`] picks the one the resolver talks to: the enabled
//! entry with the lowest `priority`.

use serde::Deserialize;

use crate::GeocodeError;

/// One bundled geocoding service.
#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingService {
    /// Registry key, e.g. `"mapbox"`.
    pub id: String,
    /// Display name used in logs.
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Lower wins.
    pub priority: u32,
    pub provider: ProviderConfig,
}

/// Wire settings, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Mapbox Geocoding v5 (`mapbox.places`).
    Mapbox {
        base_url: String,
        /// ISO country filter sent with every request.
        country: String,
        /// Candidates requested per query. Only the first is ever used.
        #[serde(default = "single_candidate")]
        limit: u32,
        /// Environment variable holding the access token.
        access_token_env: String,
    },
}

const fn enabled_by_default() -> bool {
    true
}

const fn single_candidate() -> u32 {
    1
}

impl GeocodingService {
    #[must_use]
    pub fn base_url(&self) -> &str {
        let ProviderConfig::Mapbox { base_url, .. } = &self.provider;
        base_url
    }
}

const BUNDLED: &[(&str, &str)] = &[("mapbox", include_str!("../services/mapbox.toml"))];

fn parse_service(key: &str, source: &str) -> Result<GeocodingService, GeocodeError> {
    toml::de::from_str(source).map_err(|e| GeocodeError::Config {
        message: format!("geocoding service '{key}': {e}"),
    })
}

/// Every bundled service, enabled or not, in registry order.
///
/// # Errors
///
/// Returns [`GeocodeError::Config`] if an embedded file does not parse.
pub fn services() -> Result<Vec<GeocodingService>, GeocodeError> {
    BUNDLED
        .iter()
        .map(|(key, source)| parse_service(key, source))
        .collect()
}

/// The enabled service with the lowest priority.
///
/// # Errors
///
/// Returns [`GeocodeError::Config`] if nothing is enabled or an embedded
/// file does not parse.
pub fn primary_service() -> Result<GeocodingService, GeocodeError> {
    services()?
        .into_iter()
        .filter(|service| service.enabled)
        .min_by_key(|service| service.priority)
        .ok_or_else(|| GeocodeError::Config {
            message: "no geocoding service enabled".to_string(),
        })
}
