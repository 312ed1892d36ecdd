//! The map host seam.
//!
//! A host is any map component with a pluggable overlay mechanism. Host
//! glue implements [`MapHost`] and forwards every overlay callback it
//! receives to [`RenderBridge::dispatch`](crate::RenderBridge::dispatch)
//! as an [`OverlayEvent`], tagged with the [`OverlayId`] the host handed
//! out at registration.

use mapdeck_core::{HostCamera, HostId, LngLat, PaneOffset, RenderingMode, ViewportSize};

use crate::gpu_state::GraphicsContext;

/// Host-side overlay registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OverlayId(pub u64);

/// Host-side event listener registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Capability requested when registering an overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayKind {
    /// DOM-compositing overlay: attach, layout/draw, detach.
    Dom,
    /// GPU overlay: context acquired/lost and per-frame camera data.
    Gpu,
}

/// A host lifecycle callback, addressed to one overlay.
#[derive(Clone, Debug)]
pub enum OverlayEvent<C> {
    /// The overlay was added to the host.
    Attach,
    /// Host frame. GPU overlays carry the shared context and camera.
    Draw(Option<VectorFrame<C>>),
    /// DOM layout pass (positioning overlays in vector mode).
    Layout,
    ContextAcquired(C),
    ContextLost,
    /// The overlay was removed from the host.
    Detach,
}

impl<C> OverlayEvent<C> {
    pub fn name(&self) -> &'static str {
        match self {
            OverlayEvent::Attach => "attach",
            OverlayEvent::Draw(_) => "draw",
            OverlayEvent::Layout => "layout",
            OverlayEvent::ContextAcquired(_) => "context-acquired",
            OverlayEvent::ContextLost => "context-lost",
            OverlayEvent::Detach => "detach",
        }
    }
}

/// Per-frame data a GPU overlay receives.
#[derive(Clone, Debug)]
pub struct VectorFrame<C> {
    pub context: C,
    pub camera: HostCamera,
}

/// A DOM element owned by the host or the engine.
pub trait Element {
    fn set_style(&mut self, property: &str, value: &str);

    /// Detach from the document.
    fn remove(&mut self) {}
}

/// Pointer events forwarded from the host to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PointerEventKind {
    Click,
    DoubleClick,
    MouseMove,
    DragStart,
    Drag,
    DragEnd,
    MouseOut,
}

impl PointerEventKind {
    pub const ALL: [PointerEventKind; 7] = [
        PointerEventKind::Click,
        PointerEventKind::DoubleClick,
        PointerEventKind::MouseMove,
        PointerEventKind::DragStart,
        PointerEventKind::Drag,
        PointerEventKind::DragEnd,
        PointerEventKind::MouseOut,
    ];

    /// Event name on the host's listener API.
    pub fn host_event_name(self) -> &'static str {
        match self {
            PointerEventKind::Click => "click",
            PointerEventKind::DoubleClick => "dblclick",
            PointerEventKind::MouseMove => "mousemove",
            PointerEventKind::DragStart => "dragstart",
            PointerEventKind::Drag => "drag",
            PointerEventKind::DragEnd => "dragend",
            PointerEventKind::MouseOut => "mouseout",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PointerEvent {
    pub kind: PointerEventKind,
    /// Position in viewport pixels.
    pub x: f64,
    pub y: f64,
    pub lng_lat: Option<LngLat>,
}

/// The map host, as seen by the bridge.
///
/// Queries return `None` while the host is not ready; the bridge treats
/// that as "skip this callback", never as an error.
pub trait MapHost {
    /// Shared graphics context handed to GPU overlays.
    type Context: GraphicsContext + Clone + 'static;
    /// DOM element type for containers created in the host's panes.
    type Element: Element;

    fn id(&self) -> HostId;

    fn rendering_mode(&self) -> RenderingMode;

    /// Whether GPU overlays are available. A vector host without them is
    /// driven through the raster path.
    fn supports_gpu_overlay(&self) -> bool {
        true
    }

    /// Listen once for the host resolving its rendering mode. The glue
    /// calls [`RenderBridge::on_rendering_mode_resolved`](crate::RenderBridge::on_rendering_mode_resolved).
    fn add_mode_listener(&mut self) -> ListenerId;

    /// Listen for a pointer event. The glue calls
    /// [`RenderBridge::on_pointer_event`](crate::RenderBridge::on_pointer_event).
    fn add_pointer_listener(&mut self, kind: PointerEventKind) -> ListenerId;

    fn remove_listener(&mut self, listener: ListenerId);

    fn register_overlay(&mut self, kind: OverlayKind) -> OverlayId;

    fn unregister_overlay(&mut self, overlay: OverlayId);

    /// Ask the host to schedule a frame for a GPU overlay.
    fn request_redraw(&mut self, overlay: OverlayId);

    /// A callback that requests a frame for `overlay`, for handing to the
    /// engine.
    fn redraw_callback(&self, overlay: OverlayId) -> Box<dyn Fn()>;

    fn viewport_size(&self) -> Option<ViewportSize>;

    fn camera(&self) -> Option<HostCamera>;

    /// Offset of the overlay pane relative to the viewport.
    fn overlay_pane_offset(&self) -> Option<PaneOffset>;

    /// Append a new element to the host's overlay pane.
    fn create_overlay_container(&mut self) -> Option<Self::Element>;
}
