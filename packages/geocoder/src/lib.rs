#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Location resolution for the opportunity map.
//!
//! Turns a free-text location descriptor (street address, ZIP code, or
//! `"neighborhood, town, ZIP"`) into a coordinate:
//!
//! 1. [`address`] rejects unusable descriptors before any network call
//!    and tags each query with its shape.
//! 2. [`resolver::LocationResolver`] runs the ordered resolution
//!    strategies, stopping at the first usable match.
//! 3. [`GeocodeProvider`] is the wire seam. [`mapbox::MapboxGeocoder`] is
//!    the production implementation, configured from the embedded
//!    [`service_registry`].
//!
//! Providers never retry. Fallback between strategies is entirely the
//! resolver's job.

pub mod address;
pub mod mapbox;
pub mod resolver;
pub mod service_registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use opportunity_map_geography_models::{Coordinate, PlaceContext, states};
use serde::Deserialize;
use thiserror::Error;

pub use address::{LocationQuery, QueryShape};
pub use resolver::{LocationResolver, Resolution, Strategy};

/// Errors from geocoding operations.
#[derive(Debug, Error)]
pub enum GeocodeError {
    /// HTTP request failed before a response body was read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status code.
    #[error("Provider returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Response body could not be understood.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Provider configuration is missing or invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },
}

impl GeocodeError {
    /// Whether this is a transport-level failure (unreachable provider or
    /// non-2xx answer), as opposed to a malformed response.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status { .. })
    }
}

/// A breadcrumb in a candidate's place hierarchy (postcode, place,
/// district, region, country).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContextEntry {
    /// Provider id, prefixed by the place type (e.g. `"region.8647"`).
    pub id: String,
    /// Display text (e.g. `"Massachusetts"`).
    pub text: String,
    /// ISO short code, when present (e.g. `"US-MA"`).
    #[serde(default)]
    pub short_code: Option<String>,
}

impl ContextEntry {
    /// The place type encoded in the id prefix.
    #[must_use]
    pub fn kind(&self) -> &str {
        self.id.split('.').next().unwrap_or_default()
    }
}

/// One ranked forward-geocoding candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMatch {
    /// Candidate point.
    pub center: Coordinate,
    /// Place types (e.g. `["address"]`, `["postcode"]`, `["region"]`).
    pub place_types: Vec<String>,
    /// Provider relevance score in `0.0..=1.0`.
    pub relevance: f64,
    /// Display text of the candidate itself (e.g. `"01103"`).
    pub text: String,
    /// Full display name.
    pub place_name: Option<String>,
    /// Enclosing places, smallest first.
    pub context: Vec<ContextEntry>,
}

impl CandidateMatch {
    /// Whether any of the candidate's place types is `place_type`.
    #[must_use]
    pub fn has_place_type(&self, place_type: &str) -> bool {
        self.place_types.iter().any(|t| t == place_type)
    }

    /// The first context entry of the given kind.
    #[must_use]
    pub fn context_of(&self, kind: &str) -> Option<&ContextEntry> {
        self.context.iter().find(|entry| entry.kind() == kind)
    }

    /// Extracts city/state/county breadcrumbs.
    ///
    /// The candidate's own text counts when it is itself a place or
    /// district. Returns `None` when no state can be determined.
    #[must_use]
    pub fn place_context(&self) -> Option<PlaceContext> {
        let own = |kind: &str| self.has_place_type(kind).then(|| self.text.clone());

        let region = self.context_of("region")?;
        let state_code = region
            .short_code
            .as_deref()
            .and_then(states::abbreviation)
            .or_else(|| states::abbreviation(&region.text))
            .map_or_else(|| region.text.clone(), str::to_string);

        Some(PlaceContext {
            city: own("place").or_else(|| self.context_of("place").map(|e| e.text.clone())),
            state: region.text.clone(),
            state_code,
            county: own("district").or_else(|| self.context_of("district").map(|e| e.text.clone())),
        })
    }
}

/// Options for a forward-geocoding request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardOptions {
    /// Restrict results to these place types (e.g. `["postcode"]`).
    pub types: Vec<String>,
    /// ISO country filter (e.g. `"us"`).
    pub country: Option<String>,
    /// Scope the search to a US state (full name or abbreviation).
    pub state: Option<String>,
}

impl ForwardOptions {
    /// Options for a postal-code lookup.
    #[must_use]
    pub fn postcode(country: &str) -> Self {
        Self {
            types: vec!["postcode".to_string()],
            country: Some(country.to_string()),
            state: None,
        }
    }

    /// Options for a free-text search scoped to a state.
    #[must_use]
    pub fn within_state(country: &str, state: &str) -> Self {
        Self {
            types: Vec::new(),
            country: Some(country.to_string()),
            state: Some(state.to_string()),
        }
    }

    /// Options for an unconstrained free-text search within a country.
    #[must_use]
    pub fn country(country: &str) -> Self {
        Self {
            types: Vec::new(),
            country: Some(country.to_string()),
            state: None,
        }
    }
}

/// A forward/reverse geocoding backend.
///
/// Implementations are thin wire adapters: they perform exactly one
/// request per call and never retry. An empty candidate list is a valid
/// "no match" answer, not an error.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    /// Returns ranked candidates for `text`.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the request fails, the provider answers
    /// with a non-success status, or the body cannot be parsed.
    async fn forward_geocode(
        &self,
        text: &str,
        options: &ForwardOptions,
    ) -> Result<Vec<CandidateMatch>, GeocodeError>;

    /// Returns the place breadcrumbs around `coordinate`.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the request fails, the provider answers
    /// with a non-success status, or the body cannot be parsed.
    async fn reverse_geocode(
        &self,
        coordinate: Coordinate,
    ) -> Result<Option<PlaceContext>, GeocodeError>;
}

#[async_trait]
impl<P: GeocodeProvider + ?Sized> GeocodeProvider for Arc<P> {
    async fn forward_geocode(
        &self,
        text: &str,
        options: &ForwardOptions,
    ) -> Result<Vec<CandidateMatch>, GeocodeError> {
        (**self).forward_geocode(text, options).await
    }

    async fn reverse_geocode(
        &self,
        coordinate: Coordinate,
    ) -> Result<Option<PlaceContext>, GeocodeError> {
        (**self).reverse_geocode(coordinate).await
    }
}
