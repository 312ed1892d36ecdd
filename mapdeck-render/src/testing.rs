//! In-memory host, context and engine doubles.
//!
//! [`MockMap`] plays the host's side of the overlay protocol: registering
//! an overlay queues its `Attach` (and, for GPU overlays on a vector host,
//! `ContextAcquired`), and [`MockMap::pump`] delivers the queue to a
//! bridge. [`MockMap::draw`] runs one host frame. All handles are cheap
//! clones sharing state, so a test can keep one while the bridge owns
//! another.
//!
//! Compiled for unit tests and behind the `test-util` feature.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use mapdeck_core::{HostCamera, HostId, LngLat, PaneOffset, RenderingMode, Style, ViewportSize};
use serde_json::{Map, Value};

use crate::bridge::RenderBridge;
use crate::engine::{
    DrawOptions, Engine, EngineConfig, EngineFactory, LayerFilter, PickQuery, PropsUpdate,
    Redraw, RegionQuery, RenderHook,
};
use crate::gpu_state::{BufferBinding, DrawTarget, GpuParameters, GraphicsContext};
use crate::host::{
    Element, ListenerId, MapHost, OverlayEvent, OverlayId, OverlayKind, PointerEvent,
    PointerEventKind, VectorFrame,
};

/// Array buffer the mock engine binds while rendering.
pub const ENGINE_ARRAY_BUFFER: u32 = 0xE0;

// ===================================================================
// Context
// ===================================================================

#[derive(Debug)]
struct GlState {
    parameters: GpuParameters,
    array_buffer: BufferBinding,
    draw_target: DrawTarget,
    canvas: ViewportSize,
}

/// Shared graphics context. Clones see the same state.
#[derive(Clone, Debug)]
pub struct MockContext {
    state: Rc<RefCell<GlState>>,
}

impl MockContext {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Rc::new(RefCell::new(GlState {
                parameters: GpuParameters::default(),
                array_buffer: None,
                draw_target: DrawTarget::Default,
                canvas: ViewportSize::new(width, height),
            })),
        }
    }

    pub fn bind_framebuffer(&mut self, target: DrawTarget) {
        self.state.borrow_mut().draw_target = target;
    }

    /// Whether both handles refer to the same context.
    pub fn same_as(&self, other: &MockContext) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

impl GraphicsContext for MockContext {
    fn parameters(&self) -> GpuParameters {
        self.state.borrow().parameters
    }

    fn set_parameters(&mut self, parameters: &GpuParameters) {
        self.state.borrow_mut().parameters = *parameters;
    }

    fn array_buffer_binding(&self) -> BufferBinding {
        self.state.borrow().array_buffer
    }

    fn bind_array_buffer(&mut self, binding: BufferBinding) {
        self.state.borrow_mut().array_buffer = binding;
    }

    fn bound_draw_target(&self) -> DrawTarget {
        self.state.borrow().draw_target
    }

    fn canvas_size(&self) -> ViewportSize {
        self.state.borrow().canvas
    }
}

// ===================================================================
// Element
// ===================================================================

#[derive(Debug, Default)]
struct ElementState {
    styles: Style,
    removed: bool,
}

#[derive(Clone, Debug, Default)]
pub struct MockElement {
    state: Rc<RefCell<ElementState>>,
}

impl MockElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn style(&self, property: &str) -> Option<String> {
        self.state.borrow().styles.get(property).cloned()
    }

    pub fn styles(&self) -> Style {
        self.state.borrow().styles.clone()
    }

    pub fn is_removed(&self) -> bool {
        self.state.borrow().removed
    }
}

impl Element for MockElement {
    fn set_style(&mut self, property: &str, value: &str) {
        self.state
            .borrow_mut()
            .styles
            .insert(property.to_string(), value.to_string());
    }

    fn remove(&mut self) {
        self.state.borrow_mut().removed = true;
    }
}

// ===================================================================
// Host
// ===================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Listener {
    Mode,
    Pointer(PointerEventKind),
}

struct MapState {
    mode: RenderingMode,
    gpu_overlays: bool,
    viewport: Option<ViewportSize>,
    camera: Option<HostCamera>,
    pane_offset: Option<PaneOffset>,
    panes_available: bool,
    context: MockContext,
    next_id: u64,
    overlays: BTreeMap<u64, OverlayKind>,
    listeners: BTreeMap<u64, Listener>,
    redraw_requests: BTreeMap<u64, usize>,
    containers: Vec<MockElement>,
    /// Host callbacks not yet delivered.
    queue: Vec<(OverlayId, Pending)>,
}

#[derive(Clone, Copy, Debug)]
enum Pending {
    Attach,
    ContextAcquired,
}

impl MapState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A map host driven by hand from tests.
#[derive(Clone)]
pub struct MockMap {
    id: HostId,
    state: Rc<RefCell<MapState>>,
}

impl MockMap {
    /// A host in `mode` with a viewport of `size`, centered on Greenwich
    /// at zoom 4.
    pub fn new(mode: RenderingMode, size: ViewportSize) -> Self {
        Self {
            id: HostId::new(),
            state: Rc::new(RefCell::new(MapState {
                mode,
                gpu_overlays: true,
                viewport: Some(size),
                camera: Some(HostCamera {
                    center: LngLat::new(0.0, 51.47),
                    zoom: 4.0,
                    bearing: 0.0,
                    tilt: 0.0,
                }),
                pane_offset: Some(PaneOffset::default()),
                panes_available: true,
                context: MockContext::new(size.width, size.height),
                next_id: 0,
                overlays: BTreeMap::new(),
                listeners: BTreeMap::new(),
                redraw_requests: BTreeMap::new(),
                containers: Vec::new(),
                queue: Vec::new(),
            })),
        }
    }

    pub fn raster(width: u32, height: u32) -> Self {
        Self::new(RenderingMode::RasterDom, ViewportSize::new(width, height))
    }

    pub fn vector(width: u32, height: u32) -> Self {
        Self::new(RenderingMode::VectorGpu, ViewportSize::new(width, height))
    }

    // -- host state ------------------------------------------------------

    pub fn set_mode(&self, mode: RenderingMode) {
        self.state.borrow_mut().mode = mode;
    }

    pub fn set_gpu_overlays_supported(&self, supported: bool) {
        self.state.borrow_mut().gpu_overlays = supported;
    }

    pub fn set_viewport(&self, size: Option<ViewportSize>) {
        self.state.borrow_mut().viewport = size;
    }

    pub fn set_camera(&self, camera: HostCamera) {
        self.state.borrow_mut().camera = Some(camera);
    }

    pub fn clear_camera(&self) {
        self.state.borrow_mut().camera = None;
    }

    pub fn set_pane_offset(&self, offset: PaneOffset) {
        self.state.borrow_mut().pane_offset = Some(offset);
    }

    pub fn set_panes_available(&self, available: bool) {
        self.state.borrow_mut().panes_available = available;
    }

    /// The host's current shared context.
    pub fn context(&self) -> MockContext {
        self.state.borrow().context.clone()
    }

    // -- inspection ------------------------------------------------------

    /// Registered overlays in registration order.
    pub fn overlays(&self) -> Vec<(OverlayId, OverlayKind)> {
        self.state
            .borrow()
            .overlays
            .iter()
            .map(|(&id, &kind)| (OverlayId(id), kind))
            .collect()
    }

    pub fn overlay_count(&self) -> usize {
        self.state.borrow().overlays.len()
    }

    pub fn mode_listener_count(&self) -> usize {
        self.count_listeners(|l| l == Listener::Mode)
    }

    pub fn pointer_listener_count(&self) -> usize {
        self.count_listeners(|l| matches!(l, Listener::Pointer(_)))
    }

    fn count_listeners(&self, pred: impl Fn(Listener) -> bool) -> usize {
        self.state
            .borrow()
            .listeners
            .values()
            .filter(|&&l| pred(l))
            .count()
    }

    pub fn redraw_requests(&self, overlay: OverlayId) -> usize {
        self.state
            .borrow()
            .redraw_requests
            .get(&overlay.0)
            .copied()
            .unwrap_or(0)
    }

    /// Elements created in the overlay pane, removed ones included.
    pub fn overlay_containers(&self) -> Vec<MockElement> {
        self.state.borrow().containers.clone()
    }

    // -- host callbacks --------------------------------------------------

    /// Deliver queued registration callbacks.
    pub fn pump<F>(&self, bridge: &mut RenderBridge<MockMap, F>)
    where
        F: EngineFactory<MockContext>,
    {
        let queue = std::mem::take(&mut self.state.borrow_mut().queue);
        for (overlay, pending) in queue {
            let event = match pending {
                Pending::Attach => OverlayEvent::Attach,
                Pending::ContextAcquired => OverlayEvent::ContextAcquired(self.context()),
            };
            bridge.dispatch(overlay, event);
        }
    }

    /// Run one host frame over every registered overlay.
    pub fn draw<F>(&self, bridge: &mut RenderBridge<MockMap, F>)
    where
        F: EngineFactory<MockContext>,
    {
        self.pump(bridge);
        let (mode, camera) = {
            let state = self.state.borrow();
            (state.mode, state.camera)
        };
        for (overlay, kind) in self.overlays() {
            let event = match (kind, mode) {
                (OverlayKind::Gpu, _) => match camera {
                    Some(camera) => OverlayEvent::Draw(Some(VectorFrame {
                        context: self.context(),
                        camera,
                    })),
                    None => continue,
                },
                (OverlayKind::Dom, RenderingMode::VectorGpu) => OverlayEvent::Layout,
                (OverlayKind::Dom, _) => OverlayEvent::Draw(None),
            };
            bridge.dispatch(overlay, event);
        }
    }

    /// Resolve a pending rendering mode and notify the listener, if any.
    pub fn resolve_mode<F>(&self, mode: RenderingMode, bridge: &mut RenderBridge<MockMap, F>)
    where
        F: EngineFactory<MockContext>,
    {
        self.set_mode(mode);
        if self.mode_listener_count() > 0 {
            bridge.on_rendering_mode_resolved();
        }
    }

    /// Revoke the shared context from every GPU overlay.
    pub fn lose_context<F>(&self, bridge: &mut RenderBridge<MockMap, F>)
    where
        F: EngineFactory<MockContext>,
    {
        for (overlay, kind) in self.overlays() {
            if kind == OverlayKind::Gpu {
                bridge.dispatch(overlay, OverlayEvent::ContextLost);
            }
        }
    }

    /// Hand a fresh context to every GPU overlay.
    pub fn restore_context<F>(&self, bridge: &mut RenderBridge<MockMap, F>)
    where
        F: EngineFactory<MockContext>,
    {
        {
            let mut state = self.state.borrow_mut();
            let canvas = state.context.canvas_size();
            state.context = MockContext::new(canvas.width, canvas.height);
        }
        for (overlay, kind) in self.overlays() {
            if kind == OverlayKind::Gpu {
                bridge.dispatch(overlay, OverlayEvent::ContextAcquired(self.context()));
            }
        }
    }

    /// Host-initiated removal of every overlay.
    pub fn remove_overlays<F>(&self, bridge: &mut RenderBridge<MockMap, F>)
    where
        F: EngineFactory<MockContext>,
    {
        for (overlay, _) in self.overlays() {
            bridge.dispatch(overlay, OverlayEvent::Detach);
        }
    }

    /// Emit a pointer event if anything listens for its kind.
    pub fn emit_pointer<F>(
        &self,
        kind: PointerEventKind,
        x: f64,
        y: f64,
        bridge: &mut RenderBridge<MockMap, F>,
    ) -> bool
    where
        F: EngineFactory<MockContext>,
    {
        if self.count_listeners(|l| l == Listener::Pointer(kind)) == 0 {
            return false;
        }
        bridge.on_pointer_event(&PointerEvent {
            kind,
            x,
            y,
            lng_lat: None,
        });
        true
    }
}

impl MapHost for MockMap {
    type Context = MockContext;
    type Element = MockElement;

    fn id(&self) -> HostId {
        self.id
    }

    fn rendering_mode(&self) -> RenderingMode {
        self.state.borrow().mode
    }

    fn supports_gpu_overlay(&self) -> bool {
        self.state.borrow().gpu_overlays
    }

    fn add_mode_listener(&mut self) -> ListenerId {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.listeners.insert(id, Listener::Mode);
        ListenerId(id)
    }

    fn add_pointer_listener(&mut self, kind: PointerEventKind) -> ListenerId {
        let mut state = self.state.borrow_mut();
        let id = state.next_id();
        state.listeners.insert(id, Listener::Pointer(kind));
        ListenerId(id)
    }

    fn remove_listener(&mut self, listener: ListenerId) {
        self.state.borrow_mut().listeners.remove(&listener.0);
    }

    fn register_overlay(&mut self, kind: OverlayKind) -> OverlayId {
        let mut state = self.state.borrow_mut();
        let overlay = OverlayId(state.next_id());
        state.overlays.insert(overlay.0, kind);
        state.queue.push((overlay, Pending::Attach));
        if kind == OverlayKind::Gpu && state.mode == RenderingMode::VectorGpu {
            state.queue.push((overlay, Pending::ContextAcquired));
        }
        overlay
    }

    fn unregister_overlay(&mut self, overlay: OverlayId) {
        let mut state = self.state.borrow_mut();
        state.overlays.remove(&overlay.0);
        state.queue.retain(|(id, _)| *id != overlay);
    }

    fn request_redraw(&mut self, overlay: OverlayId) {
        *self
            .state
            .borrow_mut()
            .redraw_requests
            .entry(overlay.0)
            .or_insert(0) += 1;
    }

    fn redraw_callback(&self, overlay: OverlayId) -> Box<dyn Fn()> {
        let state = Rc::clone(&self.state);
        Box::new(move || {
            *state
                .borrow_mut()
                .redraw_requests
                .entry(overlay.0)
                .or_insert(0) += 1;
        })
    }

    fn viewport_size(&self) -> Option<ViewportSize> {
        self.state.borrow().viewport
    }

    fn camera(&self) -> Option<HostCamera> {
        self.state.borrow().camera
    }

    fn overlay_pane_offset(&self) -> Option<PaneOffset> {
        self.state.borrow().pane_offset
    }

    fn create_overlay_container(&mut self) -> Option<MockElement> {
        let mut state = self.state.borrow_mut();
        if !state.panes_available {
            return None;
        }
        let element = MockElement::new();
        state.containers.push(element.clone());
        Some(element)
    }
}

// ===================================================================
// Engine
// ===================================================================

#[derive(Debug, Default)]
struct FactoryState {
    created: usize,
    alive: Vec<Rc<Cell<bool>>>,
}

/// Builds [`MockEngine`]s and tracks how many are alive.
#[derive(Clone, Debug, Default)]
pub struct MockEngineFactory {
    state: Rc<RefCell<FactoryState>>,
}

impl MockEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engines built so far.
    pub fn created(&self) -> usize {
        self.state.borrow().created
    }

    /// Engines built and not yet destroyed.
    pub fn live_count(&self) -> usize {
        self.state
            .borrow()
            .alive
            .iter()
            .filter(|alive| alive.get())
            .count()
    }
}

impl EngineFactory<MockContext> for MockEngineFactory {
    type Engine = MockEngine;

    fn create(&mut self, config: EngineConfig<MockContext>) -> MockEngine {
        let mut state = self.state.borrow_mut();
        state.created += 1;
        let alive = Rc::new(Cell::new(true));
        state.alive.push(Rc::clone(&alive));

        let mut container = MockElement::new();
        for (property, value) in &config.style {
            container.set_style(property, value);
        }

        MockEngine {
            serial: state.created,
            alive,
            host: config.host,
            context: config.context,
            interleaved: config.interleaved,
            initial_props: config.props,
            render_hook: config.render_hook,
            custom_render: config.custom_render,
            container,
            container_mounted: true,
            initialized: true,
            needs_redraw: false,
            layer_filter: LayerFilter::ShowAll,
            props: Vec::new(),
            redraws: Vec::new(),
            draws: Vec::new(),
            dirty_draws: 0,
            pointer_events: Vec::new(),
            renders: 0,
        }
    }
}

/// Records everything the bridge asks of it.
pub struct MockEngine {
    serial: usize,
    alive: Rc<Cell<bool>>,
    host: HostId,
    context: Option<MockContext>,
    interleaved: bool,
    initial_props: Map<String, Value>,
    render_hook: Option<RenderHook>,
    custom_render: Option<Box<dyn Fn()>>,
    container: MockElement,
    container_mounted: bool,
    initialized: bool,
    needs_redraw: bool,
    layer_filter: LayerFilter,
    props: Vec<PropsUpdate>,
    redraws: Vec<Redraw>,
    draws: Vec<(String, GpuParameters)>,
    dirty_draws: usize,
    pointer_events: Vec<PointerEvent>,
    renders: usize,
}

impl MockEngine {
    /// 1-based creation order within its factory.
    pub fn serial(&self) -> usize {
        self.serial
    }

    pub fn host(&self) -> HostId {
        self.host
    }

    pub fn has_shared_context(&self) -> bool {
        self.context.is_some()
    }

    pub fn shared_context(&self) -> Option<&MockContext> {
        self.context.as_ref()
    }

    pub fn has_render_hook(&self) -> bool {
        self.render_hook.is_some()
    }

    pub fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    pub fn initial_props(&self) -> &Map<String, Value> {
        &self.initial_props
    }

    pub fn container(&self) -> MockElement {
        self.container.clone()
    }

    pub fn set_container_mounted(&mut self, mounted: bool) {
        self.container_mounted = mounted;
    }

    pub fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    pub fn layer_filter(&self) -> LayerFilter {
        self.layer_filter
    }

    pub fn last_props(&self) -> Option<&PropsUpdate> {
        self.props.last()
    }

    pub fn props_history(&self) -> &[PropsUpdate] {
        &self.props
    }

    pub fn redraws(&self) -> &[Redraw] {
        &self.redraws
    }

    /// Draw target and the context parameters seen by each draw.
    pub fn draws(&self) -> &[(String, GpuParameters)] {
        &self.draws
    }

    /// Draws issued while the redraw flag was still set.
    pub fn dirty_draws(&self) -> usize {
        self.dirty_draws
    }

    pub fn pointer_events(&self) -> &[PointerEvent] {
        &self.pointer_events
    }

    /// Frames rendered on the engine's own initiative or by redraw.
    pub fn renders(&self) -> usize {
        self.renders
    }

    pub fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    /// One animation-loop tick. A dirty engine with a custom render
    /// callback asks the host for a frame; otherwise it renders through
    /// its render hook. Returns `false` when there was nothing to do.
    pub fn tick(&mut self) -> bool {
        if !self.needs_redraw {
            return false;
        }
        self.needs_redraw = false;

        let custom_render = self.custom_render.as_deref();
        let context = self.context.clone();
        let mut rendered = false;
        let mut frame = || match custom_render {
            Some(request) => request(),
            None => {
                rendered = true;
                if let Some(mut ctx) = context.clone() {
                    ctx.bind_array_buffer(Some(ENGINE_ARRAY_BUFFER));
                    ctx.set_parameters(&GpuParameters::default());
                }
            }
        };
        match self.render_hook.as_mut() {
            Some(hook) => hook(&mut frame),
            None => frame(),
        }
        if rendered {
            self.renders += 1;
        }
        true
    }
}

impl Engine for MockEngine {
    type Picked = String;

    fn update_props(&mut self, update: PropsUpdate) {
        if update.view_state.is_some() || !update.props.is_empty() {
            self.needs_redraw = true;
        }
        if let Some(filter) = update.layer_filter {
            self.layer_filter = filter;
            self.needs_redraw = true;
        }
        self.props.push(update);
    }

    fn redraw(&mut self, mode: Redraw) {
        self.redraws.push(mode);
        if mode == Redraw::Force || self.needs_redraw {
            self.needs_redraw = false;
            self.renders += 1;
        }
    }

    fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    fn clear_redraw_flags(&mut self) {
        self.needs_redraw = false;
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn draw_layers(&mut self, target: &str, _options: DrawOptions) {
        let seen = self
            .context
            .as_ref()
            .map(|ctx| ctx.parameters())
            .unwrap_or_default();
        if self.needs_redraw {
            self.dirty_draws += 1;
        }
        self.draws.push((target.to_string(), seen));
    }

    fn output_container(&mut self) -> Option<&mut dyn Element> {
        if !self.container_mounted {
            return None;
        }
        Some(&mut self.container)
    }

    fn pick_object(&mut self, query: &PickQuery) -> Option<String> {
        (self.layer_filter == LayerFilter::ShowAll)
            .then(|| format!("object@{},{}", query.x, query.y))
    }

    fn pick_objects(&mut self, query: &RegionQuery) -> Vec<String> {
        if self.layer_filter == LayerFilter::HideAll {
            return Vec::new();
        }
        vec![format!(
            "object@{},{}+{}x{}",
            query.x, query.y, query.width, query.height
        )]
    }

    fn pick_multiple_objects(&mut self, query: &PickQuery) -> Vec<String> {
        self.pick_object(query).into_iter().collect()
    }

    fn handle_pointer_event(&mut self, event: &PointerEvent) {
        self.pointer_events.push(event.clone());
    }

    fn destroy(self) {
        self.alive.set(false);
    }
}
