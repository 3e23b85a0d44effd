//! The renderer seam.
//!
//! A [`MapEngine`] is the imperative map object: it holds the style
//! (sources and layers), owns the camera, and answers rendered-feature
//! queries. Engines report lifecycle events through the channel they are
//! created with. The controller decides when each mutation is legal.

use geojson::GeoJson;
use opportunity_map_geography_models::Coordinate;
use opportunity_map_spatial::RenderedFeatureQuery;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::layers::{LayerSpec, SourceSpec};
use crate::{MapError, MapEvent};

/// Initial view over the contiguous US.
pub const DEFAULT_CENTER: Coordinate = Coordinate::new(-98.5795, 39.8283);
pub const DEFAULT_ZOOM: f64 = 3.0;

/// The element a map renders into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapContainer {
    /// Width in pixels.
    pub width: f64,
    /// Height in pixels.
    pub height: f64,
}

impl MapContainer {
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub center: Coordinate,
    pub zoom: f64,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
        }
    }
}

/// A map renderer instance.
///
/// Mutations mirror a style-spec renderer and fail the way one does:
/// adding a source or layer whose id already exists is an error, as is
/// touching an unknown id.
pub trait MapEngine: RenderedFeatureQuery + Send {
    /// # Errors
    ///
    /// [`MapError::DuplicateSource`] if the id is taken.
    fn add_source(&mut self, source: &SourceSpec) -> Result<(), MapError>;

    fn has_source(&self, source_id: &str) -> bool;

    /// Appends a layer on top of the existing ones.
    ///
    /// # Errors
    ///
    /// [`MapError::DuplicateLayer`] if the id is taken,
    /// [`MapError::UnknownSource`] if its source is missing.
    fn add_layer(&mut self, layer: &LayerSpec) -> Result<(), MapError>;

    fn has_layer(&self, layer_id: &str) -> bool;

    /// Current definition of a layer, including runtime changes.
    fn layer(&self, layer_id: &str) -> Option<&LayerSpec>;

    /// Layer ids, bottom to top.
    fn layer_ids(&self) -> Vec<String>;

    /// # Errors
    ///
    /// [`MapError::UnknownLayer`] if the layer is missing.
    fn set_filter(&mut self, layer_id: &str, filter: Option<Value>) -> Result<(), MapError>;

    /// # Errors
    ///
    /// [`MapError::UnknownLayer`] if the layer is missing.
    fn set_paint_property(
        &mut self,
        layer_id: &str,
        property: &str,
        value: Value,
    ) -> Result<(), MapError>;

    /// # Errors
    ///
    /// [`MapError::UnknownLayer`] if the layer is missing.
    fn set_visibility(&mut self, layer_id: &str, visible: bool) -> Result<(), MapError>;

    /// Replaces the data of a `GeoJSON` source.
    ///
    /// # Errors
    ///
    /// [`MapError::UnknownSource`] if the source is missing,
    /// [`MapError::NotGeoJsonSource`] if it is a tileset.
    fn set_source_data(&mut self, source_id: &str, data: GeoJson) -> Result<(), MapError>;

    /// Current data of a `GeoJSON` source.
    fn source_data(&self, source_id: &str) -> Option<&GeoJson>;

    fn camera(&self) -> Camera;

    /// Starts a camera move. [`MapEvent::MoveEnd`] is delivered once it
    /// settles.
    ///
    /// # Errors
    ///
    /// [`MapError::Removed`] if the engine has been removed.
    fn fly_to(&mut self, camera: Camera) -> Result<(), MapError>;

    /// Destroys the instance: drops the style, stops delivering events.
    fn remove(&mut self);
}

/// Creates engines bound to a container.
pub trait MapEngineFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns [`MapError`] if the engine cannot be created.
    fn create(
        &self,
        container: MapContainer,
        events: mpsc::UnboundedSender<MapEvent>,
    ) -> Result<Box<dyn MapEngine>, MapError>;
}
