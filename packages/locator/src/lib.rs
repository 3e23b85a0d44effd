#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ties location resolution to the map and the session score.
//!
//! A located descriptor goes through:
//!
//! 1. [`LocationResolver`] turns it into a coordinate.
//! 2. The map flies there and the move is waited out without holding
//!    the map lock.
//! 3. The tract rendered under the coordinate is looked up.
//! 4. The tract is highlighted, then its income is scored and published
//!    through [`SessionScoreSync`].
//!
//! Requests can overlap. Only the most recently issued one may touch the
//! map or the session; older ones finish as [`LocateOutcome::Superseded`].

pub mod debounce;
pub mod request;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use opportunity_map_geocoder::{GeocodeError, GeocodeProvider, LocationResolver, Strategy};
use opportunity_map_geography_models::{Coordinate, ScreenPoint, TractFeature};
use opportunity_map_map::{FLY_TO_ZOOM, MapError, MapLayerController, MapLayerState};
use opportunity_map_scoring::{OpportunityScore, score_from_income};
use opportunity_map_session::SessionScoreSync;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

pub use debounce::DEBOUNCE;
pub use request::{RequestToken, RequestTracker};

/// How often a waiting request looks at a map that is still loading or
/// moving.
pub const MAP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Errors that abort a locate or selection.
#[derive(Debug, Error)]
pub enum LocateError {
    /// The provider answered with something unusable. Map and session
    /// are left as they were.
    #[error(transparent)]
    Geocode(#[from] GeocodeError),

    #[error(transparent)]
    Map(#[from] MapError),
}

/// How a locate request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LocateOutcome {
    /// The descriptor resolved and the result was applied.
    Located {
        coordinate: Coordinate,
        strategy: Strategy,
        /// Tract under the coordinate, `None` outside coverage.
        tract: Option<TractFeature>,
        score: Option<OpportunityScore>,
    },
    /// Every resolution strategy failed. Nothing was changed.
    NotFound,
    /// A newer request was issued before this one finished.
    Superseded,
    /// The map was never initialized or was torn down.
    MapNotReady,
}

/// A tract picked by clicking the map.
#[derive(Debug, Clone, PartialEq)]
pub struct TractSelection {
    pub tract: TractFeature,
    pub score: Option<OpportunityScore>,
}

/// Result of waiting on the map for a request.
enum Settled<'a> {
    Map(MutexGuard<'a, MapLayerController>),
    Superseded,
    MapNotReady,
}

/// Runs descriptors and clicks through resolution, map and session.
pub struct OpportunityLocator<P> {
    resolver: Arc<LocationResolver<P>>,
    map: Arc<Mutex<MapLayerController>>,
    session: SessionScoreSync,
    requests: Arc<RequestTracker>,
}

impl<P> Clone for OpportunityLocator<P> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            map: self.map.clone(),
            session: self.session.clone(),
            requests: self.requests.clone(),
        }
    }
}

impl<P: GeocodeProvider + 'static> OpportunityLocator<P> {
    #[must_use]
    pub fn new(
        resolver: LocationResolver<P>,
        map: Arc<Mutex<MapLayerController>>,
        session: SessionScoreSync,
    ) -> Self {
        Self {
            resolver: Arc::new(resolver),
            map,
            session,
            requests: Arc::new(RequestTracker::new()),
        }
    }

    #[must_use]
    pub fn resolver(&self) -> &LocationResolver<P> {
        &self.resolver
    }

    #[must_use]
    pub const fn map(&self) -> &Arc<Mutex<MapLayerController>> {
        &self.map
    }

    #[must_use]
    pub const fn session(&self) -> &SessionScoreSync {
        &self.session
    }

    /// Locates `descriptor` and applies the result.
    ///
    /// The request token is issued when this is called, not when the
    /// returned future is first polled, so call order decides which
    /// request is the latest.
    ///
    /// # Errors
    ///
    /// [`LocateError::Geocode`] if the provider response is malformed,
    /// [`LocateError::Map`] if the map fails mid-update.
    pub fn locate(
        &self,
        descriptor: &str,
    ) -> impl Future<Output = Result<LocateOutcome, LocateError>> + Send + use<P> {
        let token = self.requests.issue();
        let locator = self.clone();
        let descriptor = descriptor.to_string();

        async move { locator.run(token, &descriptor).await }
    }

    /// Selects the tract rendered at `point`, e.g. under a click.
    ///
    /// Returns `None` without changing anything when the map is not ready
    /// or there is no tract at that pixel. A selection supersedes every
    /// pending locate request.
    ///
    /// # Errors
    ///
    /// Returns [`LocateError::Map`] if the map rejects the update.
    pub async fn select_at(
        &self,
        point: ScreenPoint,
    ) -> Result<Option<TractSelection>, LocateError> {
        let token = self.requests.issue();
        let mut map = self.map.lock().await;

        let Some(tract) = map.tract_at_point(point) else {
            log::debug!("No tract at ({}, {})", point.x, point.y);
            return Ok(None);
        };

        if !self.requests.is_current(token) {
            log::debug!("Discarding stale selection {token}");
            return Ok(None);
        }

        let score = self.apply(&mut map, Some(&tract), None)?;
        Ok(Some(TractSelection { tract, score }))
    }

    async fn run(
        &self,
        token: RequestToken,
        descriptor: &str,
    ) -> Result<LocateOutcome, LocateError> {
        let resolution = self.resolver.resolve_str(descriptor).await?;

        if !self.requests.is_current(token) {
            log::debug!("Discarding stale resolution {token} for {descriptor:?}");
            return Ok(LocateOutcome::Superseded);
        }

        let Some(resolution) = resolution else {
            return Ok(LocateOutcome::NotFound);
        };

        let mut map = match self
            .lock_when(token, descriptor, MapLayerController::is_ready)
            .await?
        {
            Settled::Map(map) => map,
            Settled::Superseded => return Ok(LocateOutcome::Superseded),
            Settled::MapNotReady => return Ok(LocateOutcome::MapNotReady),
        };
        if !map.fly_to(resolution.coordinate, FLY_TO_ZOOM)? {
            return Ok(LocateOutcome::MapNotReady);
        }
        drop(map);

        let mut map = match self
            .lock_when(token, descriptor, |map| map.is_ready() && !map.is_moving())
            .await?
        {
            Settled::Map(map) => map,
            Settled::Superseded => return Ok(LocateOutcome::Superseded),
            Settled::MapNotReady => return Ok(LocateOutcome::MapNotReady),
        };

        let tract = map.find_enclosing_tract(resolution.coordinate);
        let score = self.apply(&mut map, tract.as_ref(), Some(resolution.coordinate))?;

        Ok(LocateOutcome::Located {
            coordinate: resolution.coordinate,
            strategy: resolution.strategy,
            tract,
            score,
        })
    }

    /// Locks the map once `settled` holds for it.
    ///
    /// The lock is released between checks, so teardown and newer requests
    /// are never blocked by a map that is still loading or moving. Each
    /// check drains pending map events first and gives up as soon as
    /// `token` is stale or the map is gone.
    async fn lock_when(
        &self,
        token: RequestToken,
        descriptor: &str,
        settled: fn(&MapLayerController) -> bool,
    ) -> Result<Settled<'_>, LocateError> {
        loop {
            let mut map = self.map.lock().await;
            map.pump_events()?;

            if !self.requests.is_current(token) {
                log::debug!("Discarding stale request {token} for {descriptor:?}");
                return Ok(Settled::Superseded);
            }
            if map.state() == MapLayerState::Uninitialized {
                log::debug!("Map not initialized, dropping result for {descriptor:?}");
                return Ok(Settled::MapNotReady);
            }
            if settled(&map) {
                return Ok(Settled::Map(map));
            }

            drop(map);
            tokio::time::sleep(MAP_POLL_INTERVAL).await;
        }
    }

    /// Mirrors the tract on the map, then publishes its score. With no
    /// tract the score is cleared and nothing is highlighted. A map error
    /// leaves the session untouched.
    fn apply(
        &self,
        map: &mut MapLayerController,
        tract: Option<&TractFeature>,
        location: Option<Coordinate>,
    ) -> Result<Option<OpportunityScore>, LocateError> {
        let income = tract.and_then(|tract| tract.income);
        let score = score_from_income(income);

        map.highlight(tract.map(|tract| tract.tract_id.as_str()))?;
        map.set_user_tract(tract.and_then(|tract| tract.geometry.as_ref()))?;
        if let Some(location) = location {
            map.set_user_location(location)?;
        }
        self.session.publish(score, income);

        Ok(score)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use opportunity_map_geocoder::LocationResolver;
    use opportunity_map_geocoder::testing::ScriptedProvider;
    use opportunity_map_map::layers::TRACT_TILESET_URL;
    use opportunity_map_map::{
        HeadlessMapFactory, MapContainer, MapEngineFactory, MapLayerController, TileStore,
    };
    use opportunity_map_session::{SessionScoreSync, SessionStore};
    use opportunity_map_spatial::TractLayerIndex;
    use serde_json::json;
    use tokio::sync::Mutex;

    use crate::OpportunityLocator;

    pub const MAIN_ST: &str = "123 Main St, Boston, MA";
    pub const ELM_ST: &str = "12 Elm St, Boston, MA";
    pub const MAIN_ST_TRACT: &str = "25025070101";
    pub const ELM_ST_TRACT: &str = "25025070200";

    pub fn tiles() -> TileStore {
        let square = |x0: f64, x1: f64| {
            json!({
                "type": "Polygon",
                "coordinates": [[[x0, 42.30], [x1, 42.30], [x1, 42.40], [x0, 42.40], [x0, 42.30]]]
            })
        };
        let layer = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {
                        "GEOID": MAIN_ST_TRACT,
                        "Household_Income_at_Age_35_rP_gP_p25": 36000
                    },
                    "geometry": square(-71.10, -71.00)
                },
                {
                    "type": "Feature",
                    "properties": { "GEOID": ELM_ST_TRACT },
                    "geometry": square(-71.00, -70.90)
                }
            ]
        });
        let index = TractLayerIndex::from_geojson_str(&layer.to_string()).unwrap();
        TileStore::new().with_tileset(TRACT_TILESET_URL, index)
    }

    pub struct Harness {
        pub provider: Arc<ScriptedProvider>,
        pub store: Arc<SessionStore>,
        pub locator: OpportunityLocator<Arc<ScriptedProvider>>,
    }

    pub fn harness() -> Harness {
        harness_with(Arc::new(HeadlessMapFactory::new(tiles())))
    }

    /// A harness whose map stays loading until the test delivers
    /// [`opportunity_map_map::MapEvent::Load`].
    pub fn deferred_harness() -> Harness {
        harness_with(Arc::new(HeadlessMapFactory::new(tiles()).deferred_load()))
    }

    pub fn harness_with(factory: Arc<dyn MapEngineFactory>) -> Harness {
        let provider = Arc::new(ScriptedProvider::new());
        let store = SessionStore::new();
        let map = MapLayerController::new(factory);
        let locator = OpportunityLocator::new(
            LocationResolver::new(provider.clone()),
            Arc::new(Mutex::new(map)),
            SessionScoreSync::new(store.clone()),
        );
        Harness {
            provider,
            store,
            locator,
        }
    }

    pub async fn ready_harness() -> Harness {
        let harness = harness();
        {
            let mut map = harness.locator.map().lock().await;
            map.initialize(MapContainer::new(800.0, 600.0)).unwrap();
            map.wait_until_ready().await.unwrap();
        }
        harness
    }
}
