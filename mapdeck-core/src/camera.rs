//! Camera transform adapter: converts host camera state into the engine's
//! view state.
//!
//! Two entry points, one per host mode:
//!
//! 1. **Raster** ([`raster_view`]) — polled camera state plus the offset
//!    of the host's overlay pane. The host exposes no perspective
//!    distance, so the altitude is synthesized.
//!
//! 2. **Vector** ([`vector_view`]) — per-frame camera parameters handed to
//!    GPU overlays. The projection is rebuilt to match the host's own
//!    perspective so depth sorting lines up with host geometry.
//!
//! Everything here is pure; nothing is cached between frames.

use glam::DMat4;
use serde::{Deserialize, Serialize};

/// Latitude limit of the Web Mercator projection, in degrees.
pub const MAX_LATITUDE: f64 = 85.051_129;

/// Vertical field of view of the host's vector camera, in degrees.
const HOST_FOVY_DEGREES: f64 = 25.0;
/// Host depth range. Must match for correct z-sorting against host geometry.
const HOST_NEAR: f64 = 0.75;
const HOST_FAR: f64 = 300_000_000_000_000.0;

/// Geographic position in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

/// Host viewport size in CSS pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

impl ViewportSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width over height, or `1.0` for a zero-height viewport.
    pub fn aspect(&self) -> f64 {
        if self.height == 0 {
            1.0
        } else {
            f64::from(self.width) / f64::from(self.height)
        }
    }
}

/// Camera state as reported by the host.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostCamera {
    pub center: LngLat,
    pub zoom: f64,
    /// Heading in degrees, clockwise from north.
    pub bearing: f64,
    /// Tilt in degrees from nadir.
    pub tilt: f64,
}

/// Offset of the host's overlay pane from the viewport's top-left corner.
///
/// Hosts move the pane during drags instead of re-rendering, so the
/// engine output must follow it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PaneOffset {
    pub left: f64,
    pub top: f64,
}

/// Per-frame camera derived from host state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraSnapshot {
    pub width: u32,
    pub height: u32,
    pub offset_left: f64,
    pub offset_top: f64,
    pub center: LngLat,
    pub zoom: f64,
    pub bearing: f64,
    pub tilt: f64,
    pub altitude: Option<f64>,
}

impl CameraSnapshot {
    /// Engine view state for this snapshot. `fallback_altitude` is used
    /// when the host did not supply one.
    pub fn view_state(&self, fallback_altitude: f64) -> ViewState {
        ViewState {
            longitude: self.center.lng,
            latitude: self.center.lat,
            zoom: self.zoom,
            bearing: self.bearing,
            pitch: self.tilt,
            altitude: self.altitude.unwrap_or(fallback_altitude),
            projection_matrix: None,
            repeat: false,
        }
    }
}

/// Camera in the engine's representation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub longitude: f64,
    pub latitude: f64,
    pub zoom: f64,
    pub bearing: f64,
    pub pitch: f64,
    pub altitude: f64,
    /// Column-major projection override; `None` lets the engine derive one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection_matrix: Option<[f64; 16]>,
    /// Render world copies across the antimeridian.
    pub repeat: bool,
}

/// Output of the raster path: surface size, container position, camera.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterView {
    pub width: u32,
    pub height: u32,
    pub left: f64,
    pub top: f64,
    pub view_state: ViewState,
}

/// Derive the raster-mode view from polled host state.
///
/// `left` is snapped to whole pixels, matching how hosts place the
/// overlay pane horizontally; `top` stays fractional. Latitude is clamped
/// to the Mercator limit.
pub fn raster_view(
    size: ViewportSize,
    camera: &HostCamera,
    offset: PaneOffset,
    altitude: f64,
) -> RasterView {
    let snapshot = CameraSnapshot {
        width: size.width,
        height: size.height,
        offset_left: offset.left.round(),
        offset_top: offset.top,
        center: LngLat::new(
            camera.center.lng,
            camera.center.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE),
        ),
        zoom: camera.zoom,
        bearing: camera.bearing,
        tilt: camera.tilt,
        altitude: None,
    };

    RasterView {
        width: snapshot.width,
        height: snapshot.height,
        left: snapshot.offset_left,
        top: snapshot.offset_top,
        view_state: snapshot.view_state(altitude),
    }
}

/// Derive the vector-mode view state from per-frame host camera params.
///
/// Host zoom levels count 256px tiles; the engine counts 512px tiles,
/// hence `zoom - 1`.
pub fn vector_view(size: ViewportSize, camera: &HostCamera) -> ViewState {
    let projection = host_projection(size.aspect());

    ViewState {
        longitude: camera.center.lng,
        latitude: camera.center.lat,
        zoom: camera.zoom - 1.0,
        bearing: camera.bearing,
        pitch: camera.tilt,
        altitude: focal_distance(&projection),
        projection_matrix: Some(projection.to_cols_array()),
        repeat: true,
    }
}

/// Perspective projection matching the host's vector camera.
fn host_projection(aspect: f64) -> DMat4 {
    DMat4::perspective_rh_gl(HOST_FOVY_DEGREES.to_radians(), aspect, HOST_NEAR, HOST_FAR)
}

/// Camera distance in viewport heights implied by a projection matrix.
fn focal_distance(projection: &DMat4) -> f64 {
    0.5 * projection.y_axis.y
}

// ===================================================================
// Tests
// ===================================================================
