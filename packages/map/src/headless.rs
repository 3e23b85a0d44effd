//! A renderer-free [`MapEngine`].
//!
//! Vector tilesets are served from a [`TileStore`] of in-memory
//! [`TractLayerIndex`]es keyed by tileset URL. Screen positions use Web
//! Mercator with 512 px tiles, the same as a GL renderer, so a projected
//! coordinate hits the same tract a browser would. Only fill layers take
//! part in rendered-feature queries. Camera moves settle immediately and
//! emit [`MapEvent::MoveEnd`].

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::sync::Arc;

use geojson::GeoJson;
use opportunity_map_geography_models::{Coordinate, RenderedFeature, ScreenPoint};
use opportunity_map_spatial::{RenderedFeatureQuery, TractLayerIndex};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::engine::{Camera, MapContainer, MapEngine, MapEngineFactory};
use crate::layers::{LayerKind, LayerSpec, SourceData, SourceSpec, filter_matches};
use crate::{MapError, MapEvent};

const TILE_SIZE: f64 = 512.0;

/// Web Mercator latitude limit.
const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Tilesets available to headless maps, keyed by URL.
#[derive(Debug, Clone, Default)]
pub struct TileStore {
    tilesets: BTreeMap<String, Arc<TractLayerIndex>>,
}

impl TileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tileset(mut self, url: &str, index: TractLayerIndex) -> Self {
        self.insert(url, index);
        self
    }

    pub fn insert(&mut self, url: &str, index: TractLayerIndex) {
        self.tilesets.insert(url.to_string(), Arc::new(index));
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<Arc<TractLayerIndex>> {
        self.tilesets.get(url).cloned()
    }
}

/// Creates [`HeadlessMap`]s over a shared [`TileStore`].
#[derive(Debug, Clone)]
pub struct HeadlessMapFactory {
    tiles: TileStore,
    load_on_create: bool,
}

impl HeadlessMapFactory {
    /// Maps from this factory report [`MapEvent::Load`] as soon as they are
    /// created.
    #[must_use]
    pub const fn new(tiles: TileStore) -> Self {
        Self {
            tiles,
            load_on_create: true,
        }
    }

    /// Maps from this factory never report [`MapEvent::Load`] on their
    /// own; the caller delivers it.
    #[must_use]
    pub const fn deferred_load(mut self) -> Self {
        self.load_on_create = false;
        self
    }
}

impl MapEngineFactory for HeadlessMapFactory {
    fn create(
        &self,
        container: MapContainer,
        events: mpsc::UnboundedSender<MapEvent>,
    ) -> Result<Box<dyn MapEngine>, MapError> {
        let map = HeadlessMap::new(container, self.tiles.clone(), events);
        if self.load_on_create {
            map.emit(MapEvent::Load);
        }
        Ok(Box::new(map))
    }
}

#[derive(Debug)]
enum SourceState {
    Vector {
        url: String,
        tiles: Option<Arc<TractLayerIndex>>,
    },
    GeoJson(GeoJson),
}

/// An in-process map with a style, a camera, and a viewport.
#[derive(Debug)]
pub struct HeadlessMap {
    container: MapContainer,
    camera: Camera,
    tiles: TileStore,
    sources: BTreeMap<String, SourceState>,
    layers: Vec<LayerSpec>,
    events: Option<mpsc::UnboundedSender<MapEvent>>,
}

impl HeadlessMap {
    #[must_use]
    pub fn new(
        container: MapContainer,
        tiles: TileStore,
        events: mpsc::UnboundedSender<MapEvent>,
    ) -> Self {
        Self {
            container,
            camera: Camera::default(),
            tiles,
            sources: BTreeMap::new(),
            layers: Vec::new(),
            events: Some(events),
        }
    }

    /// The geographic coordinate under a viewport pixel.
    #[must_use]
    pub fn unproject(&self, point: ScreenPoint) -> Coordinate {
        let (cx, cy) = mercator(self.camera.center, self.camera.zoom);
        let x = point.x - self.container.width / 2.0 + cx;
        let y = point.y - self.container.height / 2.0 + cy;
        inverse_mercator(x, y, self.camera.zoom)
    }

    fn emit(&self, event: MapEvent) {
        if let Some(events) = &self.events
            && events.send(event).is_err()
        {
            log::debug!("Dropped {event:?}: controller is gone");
        }
    }

    fn ensure_live(&self) -> Result<(), MapError> {
        if self.events.is_none() {
            return Err(MapError::Removed);
        }
        Ok(())
    }

    fn in_viewport(&self, point: ScreenPoint) -> bool {
        (0.0..self.container.width).contains(&point.x)
            && (0.0..self.container.height).contains(&point.y)
    }

    fn layer_mut(&mut self, layer_id: &str) -> Result<&mut LayerSpec, MapError> {
        self.layers
            .iter_mut()
            .find(|layer| layer.id == layer_id)
            .ok_or_else(|| MapError::UnknownLayer(layer_id.to_string()))
    }

    fn is_rendered(&self, layer: &LayerSpec) -> bool {
        layer.visible && layer.min_zoom.is_none_or(|min| self.camera.zoom >= min)
    }
}

impl RenderedFeatureQuery for HeadlessMap {
    fn project(&self, coordinate: Coordinate) -> ScreenPoint {
        let (cx, cy) = mercator(self.camera.center, self.camera.zoom);
        let (x, y) = mercator(coordinate, self.camera.zoom);
        ScreenPoint::new(
            x - cx + self.container.width / 2.0,
            y - cy + self.container.height / 2.0,
        )
    }

    fn query_rendered_features(
        &self,
        point: ScreenPoint,
        layer_ids: &[&str],
    ) -> Vec<RenderedFeature> {
        if self.events.is_none() || !self.in_viewport(point) {
            return Vec::new();
        }

        let coordinate = self.unproject(point);
        let mut rendered = Vec::new();

        for layer in self.layers.iter().rev() {
            if !layer_ids.is_empty() && !layer_ids.contains(&layer.id.as_str()) {
                continue;
            }
            if layer.kind != LayerKind::Fill || !self.is_rendered(layer) {
                continue;
            }
            let Some(SourceState::Vector {
                tiles: Some(tiles), ..
            }) = self.sources.get(&layer.source)
            else {
                continue;
            };

            rendered.extend(
                tiles
                    .features_at(coordinate)
                    .into_iter()
                    .filter(|f| {
                        layer
                            .filter
                            .as_ref()
                            .is_none_or(|filter| filter_matches(filter, &f.properties))
                    })
                    .map(|f| f.to_rendered(&layer.id, &layer.source)),
            );
        }

        rendered
    }
}

impl MapEngine for HeadlessMap {
    fn add_source(&mut self, source: &SourceSpec) -> Result<(), MapError> {
        self.ensure_live()?;
        if self.sources.contains_key(&source.id) {
            return Err(MapError::DuplicateSource(source.id.clone()));
        }

        let state = match &source.data {
            SourceData::Vector { url } => {
                let tiles = self.tiles.get(url);
                if tiles.is_none() {
                    log::warn!(
                        "No tiles available for {url}; source '{}' renders empty",
                        source.id
                    );
                }
                SourceState::Vector {
                    url: url.clone(),
                    tiles,
                }
            }
            SourceData::GeoJson(data) => SourceState::GeoJson(data.clone()),
        };

        self.sources.insert(source.id.clone(), state);
        Ok(())
    }

    fn has_source(&self, source_id: &str) -> bool {
        self.sources.contains_key(source_id)
    }

    fn add_layer(&mut self, layer: &LayerSpec) -> Result<(), MapError> {
        self.ensure_live()?;
        if self.has_layer(&layer.id) {
            return Err(MapError::DuplicateLayer(layer.id.clone()));
        }
        if !self.has_source(&layer.source) {
            return Err(MapError::UnknownSource(layer.source.clone()));
        }

        self.layers.push(layer.clone());
        Ok(())
    }

    fn has_layer(&self, layer_id: &str) -> bool {
        self.layers.iter().any(|layer| layer.id == layer_id)
    }

    fn layer(&self, layer_id: &str) -> Option<&LayerSpec> {
        self.layers.iter().find(|layer| layer.id == layer_id)
    }

    fn layer_ids(&self) -> Vec<String> {
        self.layers.iter().map(|layer| layer.id.clone()).collect()
    }

    fn set_filter(&mut self, layer_id: &str, filter: Option<Value>) -> Result<(), MapError> {
        self.layer_mut(layer_id)?.filter = filter;
        Ok(())
    }

    fn set_paint_property(
        &mut self,
        layer_id: &str,
        property: &str,
        value: Value,
    ) -> Result<(), MapError> {
        self.layer_mut(layer_id)?
            .paint
            .insert(property.to_string(), value);
        Ok(())
    }

    fn set_visibility(&mut self, layer_id: &str, visible: bool) -> Result<(), MapError> {
        self.layer_mut(layer_id)?.visible = visible;
        Ok(())
    }

    fn set_source_data(&mut self, source_id: &str, data: GeoJson) -> Result<(), MapError> {
        match self.sources.get_mut(source_id) {
            Some(SourceState::GeoJson(current)) => {
                *current = data;
                Ok(())
            }
            Some(SourceState::Vector { url, .. }) => {
                log::debug!("Refusing to replace tileset {url} with inline data");
                Err(MapError::NotGeoJsonSource(source_id.to_string()))
            }
            None => Err(MapError::UnknownSource(source_id.to_string())),
        }
    }

    fn source_data(&self, source_id: &str) -> Option<&GeoJson> {
        match self.sources.get(source_id) {
            Some(SourceState::GeoJson(data)) => Some(data),
            _ => None,
        }
    }

    fn camera(&self) -> Camera {
        self.camera
    }

    fn fly_to(&mut self, camera: Camera) -> Result<(), MapError> {
        self.ensure_live()?;
        self.camera = camera;
        self.emit(MapEvent::MoveEnd);
        Ok(())
    }

    fn remove(&mut self) {
        self.layers.clear();
        self.sources.clear();
        self.events = None;
    }
}

fn world_size(zoom: f64) -> f64 {
    TILE_SIZE * zoom.exp2()
}

/// World pixel coordinates of `coordinate` at `zoom`.
fn mercator(coordinate: Coordinate, zoom: f64) -> (f64, f64) {
    let size = world_size(zoom);
    let lat = coordinate.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let x = (coordinate.lng + 180.0) / 360.0 * size;
    let y = (1.0 - lat.tan().asinh() / PI) / 2.0 * size;
    (x, y)
}

fn inverse_mercator(x: f64, y: f64, zoom: f64) -> Coordinate {
    let size = world_size(zoom);
    let lng = x / size * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y / size)).sinh().atan().to_degrees();
    Coordinate::new(lng, lat)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::layers::{TRACT_FILL_LAYER_ID, TRACT_SOURCE_ID, TRACT_TILESET_URL, highlight_filter};

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]]
        })
    }

    fn boston_tiles() -> TileStore {
        let layer = json!({
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": { "GEOID": "25025070101", "Household_Income_at_Age_35_rP_gP_p25": 36000 },
                    "geometry": square(-71.10, 42.30, -71.00, 42.40)
                },
                {
                    "type": "Feature",
                    "properties": { "GEOID": "25025070200", "Household_Income_at_Age_35_rP_gP_p25": 47000 },
                    "geometry": square(-71.00, 42.30, -70.90, 42.40)
                }
            ]
        });
        let index = TractLayerIndex::from_geojson_str(&layer.to_string()).unwrap();
        TileStore::new().with_tileset(TRACT_TILESET_URL, index)
    }

    fn map_with_fill() -> (HeadlessMap, mpsc::UnboundedReceiver<MapEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut map = HeadlessMap::new(MapContainer::new(800.0, 600.0), boston_tiles(), tx);
        map.add_source(&SourceSpec::vector(TRACT_SOURCE_ID, TRACT_TILESET_URL))
            .unwrap();
        map.add_layer(&LayerSpec::new(
            TRACT_FILL_LAYER_ID,
            LayerKind::Fill,
            TRACT_SOURCE_ID,
        ))
        .unwrap();
        (map, rx)
    }

    fn fly(map: &mut HeadlessMap, lng: f64, lat: f64, zoom: f64) {
        map.fly_to(Camera {
            center: Coordinate::new(lng, lat),
            zoom,
        })
        .unwrap();
    }

    #[test]
    fn camera_center_projects_to_viewport_center() {
        let (mut map, _rx) = map_with_fill();
        fly(&mut map, -71.06, 42.36, 12.0);
        let point = map.project(Coordinate::new(-71.06, 42.36));
        assert!((point.x - 400.0).abs() < 1e-6);
        assert!((point.y - 300.0).abs() < 1e-6);
    }

    #[test]
    fn project_and_unproject_agree() {
        let (mut map, _rx) = map_with_fill();
        fly(&mut map, -71.06, 42.36, 12.0);
        let coordinate = Coordinate::new(-71.05, 42.37);
        let back = map.unproject(map.project(coordinate));
        assert!((back.lng - coordinate.lng).abs() < 1e-9);
        assert!((back.lat - coordinate.lat).abs() < 1e-9);
    }

    #[test]
    fn north_is_up() {
        let (mut map, _rx) = map_with_fill();
        fly(&mut map, -71.06, 42.36, 12.0);
        let north = map.project(Coordinate::new(-71.06, 42.40));
        let east = map.project(Coordinate::new(-71.00, 42.36));
        assert!(north.y < 300.0);
        assert!(east.x > 400.0);
    }

    #[test]
    fn queries_tract_under_pixel() {
        let (mut map, _rx) = map_with_fill();
        fly(&mut map, -71.06, 42.36, 12.0);

        let features = map.query_rendered_features(
            map.project(Coordinate::new(-71.06, 42.36)),
            &[TRACT_FILL_LAYER_ID],
        );
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].properties["GEOID"], "25025070101");
        assert_eq!(features[0].layer_id, TRACT_FILL_LAYER_ID);
    }

    #[test]
    fn points_off_screen_are_culled() {
        let (mut map, _rx) = map_with_fill();
        fly(&mut map, -71.06, 42.36, 12.0);

        // Inside the eastern tract but far outside an 800x600 view at z12.
        let point = map.project(Coordinate::new(-70.91, 42.31));
        assert!(point.x > 800.0);
        assert!(
            map.query_rendered_features(point, &[TRACT_FILL_LAYER_ID])
                .is_empty()
        );
    }

    #[test]
    fn hidden_and_min_zoom_layers_are_not_queryable() {
        let (mut map, _rx) = map_with_fill();
        fly(&mut map, -71.06, 42.36, 12.0);
        let point = map.project(Coordinate::new(-71.06, 42.36));

        map.set_visibility(TRACT_FILL_LAYER_ID, false).unwrap();
        assert!(map.query_rendered_features(point, &[]).is_empty());

        map.set_visibility(TRACT_FILL_LAYER_ID, true).unwrap();
        map.layer_mut(TRACT_FILL_LAYER_ID).unwrap().min_zoom = Some(13.0);
        assert!(map.query_rendered_features(point, &[]).is_empty());
    }

    #[test]
    fn layer_filter_applies_to_queries() {
        let (mut map, _rx) = map_with_fill();
        fly(&mut map, -71.06, 42.36, 12.0);
        let point = map.project(Coordinate::new(-71.06, 42.36));

        map.set_filter(TRACT_FILL_LAYER_ID, Some(highlight_filter(Some("nope"))))
            .unwrap();
        assert!(map.query_rendered_features(point, &[]).is_empty());

        map.set_filter(TRACT_FILL_LAYER_ID, None).unwrap();
        assert_eq!(map.query_rendered_features(point, &[]).len(), 1);
    }

    #[test]
    fn duplicate_ids_are_errors() {
        let (mut map, _rx) = map_with_fill();
        assert!(matches!(
            map.add_source(&SourceSpec::vector(TRACT_SOURCE_ID, TRACT_TILESET_URL)),
            Err(MapError::DuplicateSource(_))
        ));
        assert!(matches!(
            map.add_layer(&LayerSpec::new(TRACT_FILL_LAYER_ID, LayerKind::Fill, TRACT_SOURCE_ID)),
            Err(MapError::DuplicateLayer(_))
        ));
        assert!(matches!(
            map.add_layer(&LayerSpec::new("orphan", LayerKind::Line, "missing")),
            Err(MapError::UnknownSource(_))
        ));
    }

    #[test]
    fn tileset_sources_reject_inline_data() {
        let (mut map, _rx) = map_with_fill();
        assert!(matches!(
            map.set_source_data(TRACT_SOURCE_ID, crate::layers::outline_data(None)),
            Err(MapError::NotGeoJsonSource(_))
        ));
    }

    #[tokio::test]
    async fn fly_to_emits_move_end() {
        let (mut map, mut rx) = map_with_fill();
        fly(&mut map, -71.06, 42.36, 12.0);
        assert_eq!(rx.recv().await, Some(MapEvent::MoveEnd));
        assert!((map.camera().zoom - 12.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn removed_map_is_inert() {
        let (mut map, mut rx) = map_with_fill();
        map.remove();

        assert!(map.layer_ids().is_empty());
        assert!(matches!(
            map.fly_to(Camera::default()),
            Err(MapError::Removed)
        ));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn factory_reports_load() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _map = HeadlessMapFactory::new(TileStore::new())
            .create(MapContainer::new(800.0, 600.0), tx)
            .unwrap();
        assert_eq!(rx.recv().await, Some(MapEvent::Load));
    }
}
