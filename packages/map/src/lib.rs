#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Map lifecycle and census tract layers.
//!
//! [`controller::MapLayerController`] owns a [`engine::MapEngine`] and
//! walks it through `Uninitialized -> Loading -> Ready`. Every layer
//! mutation is guarded by that state: calls made before the map has
//! loaded are deferred or dropped, never applied to a half-built style.
//!
//! [`headless::HeadlessMap`] is an in-process engine backed by
//! [`opportunity_map_spatial::TractLayerIndex`] tiles, used by the CLI and
//! tests.

pub mod controller;
pub mod engine;
pub mod headless;
pub mod layers;

use strum_macros::{AsRefStr, Display};
use thiserror::Error;

pub use controller::MapLayerController;
pub use engine::{Camera, MapContainer, MapEngine, MapEngineFactory};
pub use headless::{HeadlessMap, HeadlessMapFactory, TileStore};

/// Zoom level used when flying to a resolved location.
pub const FLY_TO_ZOOM: f64 = 12.0;

/// Errors from map operations.
#[derive(Debug, Error)]
pub enum MapError {
    /// An operation needed a map that was never created or was torn down.
    #[error("Map has not been initialized")]
    NotInitialized,

    /// The engine dropped its event channel before the awaited event.
    #[error("Map engine closed its event channel")]
    EngineClosed,

    /// The engine instance has been removed.
    #[error("Map has been removed")]
    Removed,

    #[error("Source '{0}' already exists")]
    DuplicateSource(String),

    #[error("Layer '{0}' already exists")]
    DuplicateLayer(String),

    #[error("Unknown source '{0}'")]
    UnknownSource(String),

    #[error("Unknown layer '{0}'")]
    UnknownLayer(String),

    /// `set_source_data` on a source that does not hold `GeoJSON`.
    #[error("Source '{0}' is not a GeoJSON source")]
    NotGeoJsonSource(String),

    /// Fill scale breakpoints are unusable as interpolation stops.
    #[error("Invalid fill scale: {message}")]
    InvalidFillScale {
        /// What is wrong with the breakpoints.
        message: String,
    },
}

/// Signals an engine delivers to its controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapEvent {
    /// Style and sources are ready for mutation.
    Load,
    /// A camera movement has finished; rendered features are queryable.
    MoveEnd,
}

/// Lifecycle state of the map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum MapLayerState {
    #[default]
    Uninitialized,
    Loading,
    Ready,
}
