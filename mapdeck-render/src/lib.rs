//! # mapdeck-render
//!
//! Bridge between a map host with pluggable overlays and a GPU
//! visualization engine.
//!
//! ## Architecture
//!
//! ```text
//!  MapHost (host glue)
//!       │  overlay callbacks, mode/pointer signals
//!       ▼
//!  RenderBridge.dispatch()          ◀─── routes by overlay role
//!       │
//!       ├─▶ ContextLifecycle        ◀─── shared context acquired / lost
//!       ├─▶ PositioningContainer    ◀─── DOM stacking in vector mode
//!       ▼
//!  scheduler::draw_raster()         ◀─── polled camera, own surface
//!  scheduler::draw_vector()         ◀─── frame camera, shared context
//!       │
//!       ▼
//!  Engine.draw_layers()             ◀─── inside a ParameterScope
//! ```
//!
//! ## Crate modules
//!
//! - [`host`] — the `MapHost` seam and overlay events
//! - [`engine`] — the `Engine` seam and the single-instance slot
//! - [`gpu_state`] — shared-context parameters and isolation scopes
//! - [`container`] — positioning container for vector hosts
//! - [`context`] — shared-context acquisition and loss
//! - [`scheduler`] — per-frame raster and vector draw paths
//! - [`bridge`] — the orchestrating state machine
//! - `testing` — in-memory host, context and engine doubles (`test-util` feature)

pub mod bridge;
pub mod container;
pub mod context;
pub mod engine;
pub mod gpu_state;
pub mod host;
pub mod scheduler;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use bridge::{BridgeError, Overlays, RenderBridge};
pub use engine::{
    DrawOptions, Engine, EngineConfig, EngineFactory, LayerFilter, PickQuery, PropsUpdate,
    Redraw, RegionQuery, RenderHook, SurfaceSize,
};
pub use gpu_state::{GpuParameters, GraphicsContext, ParameterOverrides, ParameterScope};
pub use host::{
    Element, MapHost, OverlayEvent, OverlayId, OverlayKind, PointerEvent, PointerEventKind,
    VectorFrame,
};
pub use scheduler::FrameOutcome;
