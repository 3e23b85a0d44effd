//! Ordered, fallback-driven location resolution.
//!
//! Strategy order (first success wins):
//!
//! 1. **Neighborhood scoped by ZIP**: only for
//!    [`crate::QueryShape::NeighborhoodTownZip`] queries. The trailing ZIP is
//!    looked up (postcode-only) to learn the state, then
//!    `"{neighborhood}, {town}"` (or `"{neighborhood}"`) is geocoded
//!    within that state, degrading to `"{town}"` alone.
//! 2. **Free text**: the whole descriptor, unconstrained.
//!
//! Every provider call goes through the same acceptance filter: matches
//! that are only a country/region/state, or whose relevance is below
//! [`MIN_RELEVANCE`], are treated as no match. Transport failures count
//! as that attempt's failure and never abort the chain; malformed
//! responses propagate.

use opportunity_map_geography_models::{Coordinate, PlaceContext, states};
use strum_macros::{AsRefStr, Display};

use crate::address::{self, LocationQuery, NeighborhoodParts};
use crate::{CandidateMatch, ForwardOptions, GeocodeError, GeocodeProvider};

/// Minimum provider relevance for a match to count.
pub const MIN_RELEVANCE: f64 = 0.75;

/// Place types too generic to be a usable point.
pub const GENERIC_PLACE_TYPES: &[&str] = &["country", "region", "state"];

/// Default country filter for every request.
pub const DEFAULT_COUNTRY: &str = "us";

/// Which strategy produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Strategy {
    /// `"{neighborhood}, {town}"` within the ZIP's state.
    NeighborhoodTown,
    /// `"{neighborhood}"` within the ZIP's state (no town segment).
    Neighborhood,
    /// `"{town}"` within the ZIP's state.
    Town,
    /// The full descriptor, unconstrained.
    FreeText,
}

/// A successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Resolved point.
    pub coordinate: Coordinate,
    /// Strategy that produced it.
    pub strategy: Strategy,
    /// State context from the ZIP lookup, for ZIP-scoped strategies.
    pub place: Option<PlaceContext>,
}

/// Resolves location descriptors to coordinates through a
/// [`GeocodeProvider`].
#[derive(Debug, Clone)]
pub struct LocationResolver<P> {
    provider: P,
    country: String,
}

impl<P: GeocodeProvider> LocationResolver<P> {
    #[must_use]
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            country: DEFAULT_COUNTRY.to_string(),
        }
    }

    /// Overrides the country filter (ISO code).
    #[must_use]
    pub fn with_country(mut self, country: &str) -> Self {
        self.country = country.to_string();
        self
    }

    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Parses and resolves a raw descriptor.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve`].
    pub async fn resolve_str(&self, raw: &str) -> Result<Option<Resolution>, GeocodeError> {
        self.resolve(&LocationQuery::parse(raw)).await
    }

    /// Resolves a query, returning `None` when every strategy fails.
    ///
    /// Strategies run strictly one after another; each provider call
    /// settles before the next starts.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] only for non-transport failures (e.g. a
    /// malformed provider response). Unreachable providers and error
    /// statuses are absorbed as failed attempts.
    pub async fn resolve(
        &self,
        query: &LocationQuery,
    ) -> Result<Option<Resolution>, GeocodeError> {
        if let Err(rejection) = address::prefilter(query.raw()) {
            log::debug!("Skipping resolution for {:?}: {rejection}", query.raw());
            return Ok(None);
        }

        if let Some(parts) = query.neighborhood_parts() {
            if let Some(resolution) = self.resolve_neighborhood(parts).await? {
                return Ok(Some(resolution));
            }
            log::debug!(
                "ZIP-scoped resolution failed for {:?}, falling back to free text",
                query.raw()
            );
        }

        let options = ForwardOptions::country(&self.country);
        if let Some(candidate) = self.attempt(query.raw(), &options).await? {
            return Ok(Some(Resolution {
                coordinate: candidate.center,
                strategy: Strategy::FreeText,
                place: None,
            }));
        }

        log::info!("Could not resolve location {:?}", query.raw());
        Ok(None)
    }

    /// Looks up a ZIP code's place context (postcode-restricted).
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] only for non-transport failures.
    pub async fn lookup_zip(&self, zip: &str) -> Result<Option<PlaceContext>, GeocodeError> {
        let options = ForwardOptions::postcode(&self.country);
        Ok(self
            .attempt(zip, &options)
            .await?
            .and_then(|candidate| candidate.place_context()))
    }

    /// Reverse-geocodes a coordinate to its city, county and state.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] only for non-transport failures.
    pub async fn place_at(
        &self,
        coordinate: Coordinate,
    ) -> Result<Option<PlaceContext>, GeocodeError> {
        match self.provider.reverse_geocode(coordinate).await {
            Ok(place) => Ok(place),
            Err(e) if e.is_transport() => {
                log::warn!("Reverse geocoding {coordinate} failed: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn resolve_neighborhood(
        &self,
        parts: NeighborhoodParts<'_>,
    ) -> Result<Option<Resolution>, GeocodeError> {
        let Some(place) = self.lookup_zip(parts.zip).await? else {
            log::debug!("ZIP lookup failed for {}", parts.zip);
            return Ok(None);
        };

        let scoped = ForwardOptions::within_state(&self.country, &place.state);

        let (text, strategy) = match parts.town {
            Some(town) => (
                format!("{}, {town}", parts.neighborhood),
                Strategy::NeighborhoodTown,
            ),
            None => (parts.neighborhood.to_string(), Strategy::Neighborhood),
        };

        let mut attempts = vec![(text, strategy)];
        if let Some(town) = parts.town {
            attempts.push((town.to_string(), Strategy::Town));
        }

        for (text, strategy) in attempts {
            if let Some(candidate) = self.attempt(&text, &scoped).await? {
                log::debug!("Resolved {text:?} in {} via {strategy}", place.state_code);
                return Ok(Some(Resolution {
                    coordinate: candidate.center,
                    strategy,
                    place: Some(place),
                }));
            }
        }

        Ok(None)
    }

    /// One provider call plus the acceptance filter.
    async fn attempt(
        &self,
        text: &str,
        options: &ForwardOptions,
    ) -> Result<Option<CandidateMatch>, GeocodeError> {
        let candidates = match self.provider.forward_geocode(text, options).await {
            Ok(candidates) => candidates,
            Err(e) if e.is_transport() => {
                log::warn!("Geocoding {text:?} failed: {e}");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let Some(first) = candidates.into_iter().next() else {
            log::debug!("No match for {text:?}");
            return Ok(None);
        };

        if !is_specific(&first) {
            log::debug!(
                "Match for {text:?} too generic or low relevance: {:?} {}",
                first.place_types,
                first.relevance
            );
            return Ok(None);
        }

        if let Some(state) = &options.state {
            if let Some(region) = first.context_of("region") {
                let region_state = region.short_code.as_deref().unwrap_or(&region.text);
                if !states::same_state(region_state, state) {
                    log::debug!("Match for {text:?} is in {}, not {state}", region.text);
                    return Ok(None);
                }
            }
        }

        Ok(Some(first))
    }
}

/// Whether a candidate is specific and confident enough to use as a point.
#[must_use]
pub fn is_specific(candidate: &CandidateMatch) -> bool {
    !GENERIC_PLACE_TYPES
        .iter()
        .any(|generic| candidate.has_place_type(generic))
        && candidate.relevance >= MIN_RELEVANCE
}
