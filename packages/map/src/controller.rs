//! The map lifecycle state machine.
//!
//! ```text
//! Uninitialized --initialize()--> Loading --MapEvent::Load--> Ready
//!       ^                                                      |
//!       +--------------------------teardown()-------------------+
//! ```
//!
//! Layer mutations only reach the engine in `Ready`. Before that,
//! `highlight` and `set_fill_scale` are remembered and applied right
//! after the load-time layer setup; everything else is a no-op.

use std::sync::Arc;

use geojson::Geometry;
use opportunity_map_geography_models::{Coordinate, ScreenPoint, TractFeature};
use opportunity_map_spatial::RenderedFeatureQuery;
use tokio::sync::mpsc;

use crate::engine::{Camera, MapContainer, MapEngine, MapEngineFactory};
use crate::layers::{
    LayerSpec, SourceSpec, TRACT_FILL_LAYER_ID, TRACT_HIGHLIGHT_LAYER_ID, TRACT_VIEW_LAYER_IDS,
    USER_LOCATION_SOURCE_ID, USER_TRACT_SOURCE_ID, default_layer_groups, fill_color_expression,
    highlight_filter, outline_data, point_data,
};
use crate::{MapError, MapEvent, MapLayerState};

/// Intent recorded before the map was ready.
#[derive(Debug, Default)]
struct PendingIntent {
    highlight: Option<Option<String>>,
    fill_scale: Option<Vec<f64>>,
}

/// Owns a map engine and guards every mutation by lifecycle state.
pub struct MapLayerController {
    factory: Arc<dyn MapEngineFactory>,
    engine: Option<Box<dyn MapEngine>>,
    events: Option<mpsc::UnboundedReceiver<MapEvent>>,
    state: MapLayerState,
    selected_tract: Option<String>,
    moving: bool,
    pending: PendingIntent,
}

impl std::fmt::Debug for MapLayerController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapLayerController")
            .field("state", &self.state)
            .field("selected_tract", &self.selected_tract)
            .field("moving", &self.moving)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl MapLayerController {
    #[must_use]
    pub fn new(factory: Arc<dyn MapEngineFactory>) -> Self {
        Self {
            factory,
            engine: None,
            events: None,
            state: MapLayerState::Uninitialized,
            selected_tract: None,
            moving: false,
            pending: PendingIntent::default(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> MapLayerState {
        self.state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == MapLayerState::Ready
    }

    /// GEOID of the highlighted tract.
    #[must_use]
    pub fn selected_tract(&self) -> Option<&str> {
        self.selected_tract.as_deref()
    }

    /// Whether a camera move started by [`Self::fly_to`] has not yet
    /// reported its end.
    #[must_use]
    pub const fn is_moving(&self) -> bool {
        self.moving
    }

    /// The live engine, if one has been created.
    #[must_use]
    pub fn engine(&self) -> Option<&dyn MapEngine> {
        self.engine.as_deref()
    }

    /// Creates the engine for `container` and starts loading.
    ///
    /// Calling this again while an engine exists does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] if the engine cannot be created.
    pub fn initialize(&mut self, container: MapContainer) -> Result<(), MapError> {
        if self.state != MapLayerState::Uninitialized {
            log::debug!("Map already initialized ({})", self.state);
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.engine = Some(self.factory.create(container, tx)?);
        self.events = Some(rx);
        self.transition(MapLayerState::Loading);
        Ok(())
    }

    /// Applies one engine event.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] if the load-time layer setup fails.
    pub fn handle_event(&mut self, event: MapEvent) -> Result<(), MapError> {
        match event {
            MapEvent::Load if self.state == MapLayerState::Loading => {
                self.transition(MapLayerState::Ready);
                self.on_load()
            }
            MapEvent::Load => {
                log::debug!("Ignoring load event in state {}", self.state);
                Ok(())
            }
            MapEvent::MoveEnd => {
                self.moving = false;
                Ok(())
            }
        }
    }

    /// Handles every event already queued, without waiting.
    ///
    /// # Errors
    ///
    /// See [`Self::handle_event`].
    pub fn pump_events(&mut self) -> Result<(), MapError> {
        loop {
            let Some(events) = self.events.as_mut() else {
                return Ok(());
            };
            let Ok(event) = events.try_recv() else {
                return Ok(());
            };
            self.handle_event(event)?;
        }
    }

    /// Waits for the load event if the map is still loading.
    ///
    /// # Errors
    ///
    /// [`MapError::NotInitialized`] before [`Self::initialize`], and
    /// [`MapError::EngineClosed`] if the engine goes away first.
    pub async fn wait_until_ready(&mut self) -> Result<(), MapError> {
        loop {
            match self.state {
                MapLayerState::Ready => return Ok(()),
                MapLayerState::Uninitialized => return Err(MapError::NotInitialized),
                MapLayerState::Loading => {}
            }
            let event = self.next_event().await?;
            self.handle_event(event)?;
        }
    }

    /// Adds `source` and each of `layers` unless one with the same id is
    /// already present. Returns the number of layers added.
    ///
    /// Returns `Ok(0)` without touching the engine unless the map is ready.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] if the engine rejects an addition.
    pub fn ensure_layers(
        &mut self,
        source: &SourceSpec,
        layers: &[LayerSpec],
    ) -> Result<usize, MapError> {
        let Some(engine) = self.ready_engine_mut() else {
            log::debug!("Skipping layer setup for '{}': map not ready", source.id);
            return Ok(0);
        };

        if !engine.has_source(&source.id) {
            engine.add_source(source)?;
        }

        let mut added = 0;
        for layer in layers {
            if engine.has_layer(&layer.id) {
                continue;
            }
            engine.add_layer(layer)?;
            added += 1;
        }

        Ok(added)
    }

    /// Starts a camera move to `center`. Returns `false` (and does
    /// nothing) unless the map is ready.
    ///
    /// Move-end events from earlier moves are drained first, so the next
    /// [`Self::wait_for_move_end`] observes this move.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] if the engine refuses the move.
    pub fn fly_to(&mut self, center: Coordinate, zoom: f64) -> Result<bool, MapError> {
        if !self.is_ready() {
            log::debug!("Not flying to {center}: map not ready");
            return Ok(false);
        }

        self.pump_events()?;

        let engine = self.engine.as_mut().ok_or(MapError::NotInitialized)?;
        engine.fly_to(Camera { center, zoom })?;
        self.moving = true;
        Ok(true)
    }

    /// Waits until the current camera move settles.
    ///
    /// # Errors
    ///
    /// [`MapError::NotInitialized`] without an engine, and
    /// [`MapError::EngineClosed`] if the engine goes away first.
    pub async fn wait_for_move_end(&mut self) -> Result<(), MapError> {
        if self.engine.is_none() {
            return Err(MapError::NotInitialized);
        }
        while self.moving {
            let event = self.next_event().await?;
            self.handle_event(event)?;
        }
        Ok(())
    }

    /// The tract rendered under `coordinate`. Call after a move end.
    #[must_use]
    pub fn find_enclosing_tract(&self, coordinate: Coordinate) -> Option<TractFeature> {
        let engine = self.ready_engine()?;
        opportunity_map_spatial::find_enclosing_tract(engine, coordinate, TRACT_FILL_LAYER_ID)
    }

    /// The tract rendered at a viewport pixel, e.g. under a click.
    #[must_use]
    pub fn tract_at_point(&self, point: ScreenPoint) -> Option<TractFeature> {
        let engine = self.ready_engine()?;
        engine
            .query_rendered_features(point, &[TRACT_FILL_LAYER_ID])
            .first()
            .map(TractFeature::from_rendered)
    }

    /// Highlights one tract, or clears the highlight with `None`.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] if the engine rejects the filter.
    pub fn highlight(&mut self, tract_id: Option<&str>) -> Result<(), MapError> {
        let Some(engine) = self.ready_engine_mut() else {
            log::debug!("Queueing highlight {tract_id:?} until the map is ready");
            self.pending.highlight = Some(tract_id.map(str::to_string));
            return Ok(());
        };

        engine.set_filter(TRACT_HIGHLIGHT_LAYER_ID, Some(highlight_filter(tract_id)))?;
        self.selected_tract = tract_id.filter(|id| !id.is_empty()).map(str::to_string);
        Ok(())
    }

    /// Replaces the fill color ramp breakpoints.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::InvalidFillScale`] for unusable breakpoints,
    /// whether or not the map is ready.
    pub fn set_fill_scale(&mut self, breakpoints: &[f64]) -> Result<(), MapError> {
        let expression = fill_color_expression(breakpoints)?;

        let Some(engine) = self.ready_engine_mut() else {
            log::debug!("Queueing fill scale until the map is ready");
            self.pending.fill_scale = Some(breakpoints.to_vec());
            return Ok(());
        };

        engine.set_paint_property(TRACT_FILL_LAYER_ID, "fill-color", expression)
    }

    /// Moves the user location marker.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] if the marker source is missing.
    pub fn set_user_location(&mut self, coordinate: Coordinate) -> Result<(), MapError> {
        match self.ready_engine_mut() {
            Some(engine) => engine.set_source_data(USER_LOCATION_SOURCE_ID, point_data(coordinate)),
            None => Ok(()),
        }
    }

    /// Outlines the user's tract, or clears the outline with `None`.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] if the outline source is missing.
    pub fn set_user_tract(&mut self, geometry: Option<&Geometry>) -> Result<(), MapError> {
        match self.ready_engine_mut() {
            Some(engine) => engine.set_source_data(USER_TRACT_SOURCE_ID, outline_data(geometry)),
            None => Ok(()),
        }
    }

    /// Shows or hides the census tract view layers together.
    ///
    /// # Errors
    ///
    /// Returns [`MapError`] if the engine rejects a layout change.
    pub fn set_tract_layers_visible(&mut self, visible: bool) -> Result<(), MapError> {
        let Some(engine) = self.ready_engine_mut() else {
            return Ok(());
        };

        for layer_id in TRACT_VIEW_LAYER_IDS {
            if engine.has_layer(layer_id) {
                engine.set_visibility(layer_id, visible)?;
            }
        }
        Ok(())
    }

    /// Removes the engine and drops every reference and listener.
    pub fn teardown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.remove();
        }
        self.events = None;
        self.selected_tract = None;
        self.moving = false;
        self.pending = PendingIntent::default();

        if self.state != MapLayerState::Uninitialized {
            self.transition(MapLayerState::Uninitialized);
        }
    }

    fn transition(&mut self, next: MapLayerState) {
        log::debug!("Map state {} -> {next}", self.state);
        self.state = next;
    }

    fn on_load(&mut self) -> Result<(), MapError> {
        for group in default_layer_groups() {
            self.ensure_layers(&group.source, &group.layers)?;
        }

        let pending = std::mem::take(&mut self.pending);
        if let Some(breakpoints) = pending.fill_scale {
            self.set_fill_scale(&breakpoints)?;
        }
        if let Some(tract_id) = pending.highlight {
            self.highlight(tract_id.as_deref())?;
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Result<MapEvent, MapError> {
        let events = self.events.as_mut().ok_or(MapError::NotInitialized)?;
        events.recv().await.ok_or(MapError::EngineClosed)
    }

    fn ready_engine(&self) -> Option<&dyn MapEngine> {
        if self.is_ready() {
            self.engine.as_deref()
        } else {
            None
        }
    }

    fn ready_engine_mut(&mut self) -> Option<&mut Box<dyn MapEngine>> {
        if self.is_ready() {
            self.engine.as_mut()
        } else {
            None
        }
    }
}

impl Drop for MapLayerController {
    fn drop(&mut self) {
        self.teardown();
    }
}
