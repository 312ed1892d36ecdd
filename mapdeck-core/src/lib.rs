//! # mapdeck-core
//!
//! Data model shared by the map overlay bridge: host identity, rendering
//! modes, the camera transform adapter, and configuration props.
//!
//! ## Crate modules
//!
//! - [`camera`] — host camera state → engine view state (pure)
//! - [`config`] — user configuration props and partial updates

pub mod camera;
pub mod config;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use camera::{
    raster_view, vector_view, CameraSnapshot, HostCamera, LngLat, PaneOffset, RasterView,
    ViewState, ViewportSize, MAX_LATITUDE,
};
pub use config::{
    is_reserved_key, ConfigError, ConfigProps, ConfigUpdate, Style, DEFAULT_RASTER_ALTITUDE,
};

/// Identity of a map host instance.
///
/// Two handles with the same id refer to the same host; attaching the
/// same host twice is a no-op.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostId(pub Uuid);

impl HostId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HostId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host-{}", self.0)
    }
}

/// Integration mode reported by the host.
///
/// `Uninitialized` is transitional: the host resolves it later and
/// signals the change through its mode listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderingMode {
    #[default]
    Uninitialized,
    /// Shared graphics context, per-frame GPU camera data.
    VectorGpu,
    /// DOM compositing only, polled camera state.
    RasterDom,
}

impl RenderingMode {
    /// `true` once the host has settled on a concrete mode.
    pub fn is_resolved(self) -> bool {
        !matches!(self, RenderingMode::Uninitialized)
    }
}
