//! Point-in-tract lookup through a renderer's feature query.

use opportunity_map_geography_models::{Coordinate, RenderedFeature, ScreenPoint, TractFeature};

/// The read side of a map renderer: screen projection plus rendered
/// feature lookup.
pub trait RenderedFeatureQuery {
    /// Projects a geographic coordinate to a pixel in the current view.
    fn project(&self, coordinate: Coordinate) -> ScreenPoint;

    /// Features rendered at `point` in any of `layer_ids`, topmost layer
    /// first and in source order within a layer.
    fn query_rendered_features(&self, point: ScreenPoint, layer_ids: &[&str])
    -> Vec<RenderedFeature>;
}

/// Finds the tract rendered under `coordinate` in `fill_layer_id`.
///
/// Only meaningful once the camera has settled: callers run this after a
/// move-end signal. Returns `None` when nothing is rendered at that pixel,
/// which covers zoomed-out views, unloaded tiles, and points outside
/// coverage alike. When several features share the pixel the first one
/// wins.
pub fn find_enclosing_tract<Q: RenderedFeatureQuery + ?Sized>(
    map: &Q,
    coordinate: Coordinate,
    fill_layer_id: &str,
) -> Option<TractFeature> {
    let point = map.project(coordinate);
    let features = map.query_rendered_features(point, &[fill_layer_id]);

    let Some(first) = features.first() else {
        log::info!("No census tract rendered at {coordinate}");
        return None;
    };

    if features.len() > 1 {
        log::debug!(
            "{} features at {coordinate}, using the first",
            features.len()
        );
    }

    Some(TractFeature::from_rendered(first))
}
