//! The visualization engine seam and the slot that owns its instance.

use std::fmt;

use mapdeck_core::{ConfigProps, HostId, Style, ViewState};
use serde_json::{Map, Value};

use crate::gpu_state::DrawTarget;
use crate::host::{Element, ListenerId, MapHost, PointerEvent, PointerEventKind};

/// Wraps the engine's per-frame render entry point. The engine calls the
/// hook with its own render routine instead of rendering directly.
pub type RenderHook = Box<dyn FnMut(&mut dyn FnMut())>;

/// Draw target id used for frames drawn inside the host's vector frame.
pub const VECTOR_DRAW_TARGET: &str = "host-vector";

/// Size of the engine's drawing surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceSize {
    /// CSS pixel size.
    Pixels { width: u32, height: u32 },
    /// No CSS size; the shared context is authoritative.
    Inherit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerFilter {
    ShowAll,
    HideAll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Redraw {
    /// Draw only if the engine has pending changes.
    IfNeeded,
    Force,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawOptions {
    pub clear_canvas: bool,
}

/// Partial engine props pushed by the bridge.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropsUpdate {
    pub size: Option<SurfaceSize>,
    pub view_state: Option<ViewState>,
    pub draw_target: Option<DrawTarget>,
    pub layer_filter: Option<LayerFilter>,
    /// Pass-through user props.
    pub props: Map<String, Value>,
}

impl PropsUpdate {
    pub fn view(size: SurfaceSize, view_state: ViewState) -> Self {
        Self {
            size: Some(size),
            view_state: Some(view_state),
            ..Self::default()
        }
    }

    pub fn layer_filter(filter: LayerFilter) -> Self {
        Self {
            layer_filter: Some(filter),
            ..Self::default()
        }
    }

    pub fn draw_target(target: DrawTarget) -> Self {
        Self {
            draw_target: Some(target),
            ..Self::default()
        }
    }

    pub fn pass_through(props: Map<String, Value>) -> Self {
        Self {
            props,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Single-point pick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PickQuery {
    pub x: f64,
    pub y: f64,
    pub radius: u32,
    /// Restrict to these layers; `None` picks from all.
    pub layer_ids: Option<Vec<String>>,
}

/// Rectangular pick.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegionQuery {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub layer_ids: Option<Vec<String>>,
}

/// Everything the engine needs at creation.
pub struct EngineConfig<C> {
    pub host: HostId,
    /// Shared context to draw into. `None` means an independent surface.
    pub context: Option<C>,
    pub interleaved: bool,
    pub style: Style,
    pub props: Map<String, Value>,
    pub render_hook: Option<RenderHook>,
    /// Called instead of drawing when the engine wants a new frame.
    pub custom_render: Option<Box<dyn Fn()>>,
}

impl<C> EngineConfig<C> {
    pub fn from_props(host: HostId, props: &ConfigProps) -> Self {
        Self {
            host,
            context: None,
            interleaved: props.interleaved,
            style: props.style.clone(),
            props: props.engine.clone(),
            render_hook: None,
            custom_render: None,
        }
    }
}

impl<C> fmt::Debug for EngineConfig<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("host", &self.host)
            .field("shared_context", &self.context.is_some())
            .field("interleaved", &self.interleaved)
            .field("style", &self.style)
            .field("props", &self.props)
            .field("render_hook", &self.render_hook.is_some())
            .field("custom_render", &self.custom_render.is_some())
            .finish()
    }
}

/// A live engine instance.
pub trait Engine {
    type Picked;

    fn update_props(&mut self, update: PropsUpdate);

    fn redraw(&mut self, mode: Redraw);

    fn needs_redraw(&self) -> bool;

    /// Mark the current state as drawn.
    fn clear_redraw_flags(&mut self);

    /// `false` until the engine has its GPU resources.
    fn is_initialized(&self) -> bool;

    fn draw_layers(&mut self, target: &str, options: DrawOptions);

    /// DOM container wrapping the output surface, once mounted.
    fn output_container(&mut self) -> Option<&mut dyn Element>;

    fn pick_object(&mut self, query: &PickQuery) -> Option<Self::Picked>;

    fn pick_objects(&mut self, query: &RegionQuery) -> Vec<Self::Picked>;

    fn pick_multiple_objects(&mut self, query: &PickQuery) -> Vec<Self::Picked>;

    fn handle_pointer_event(&mut self, event: &PointerEvent);

    /// Release GPU and DOM resources.
    fn destroy(self);
}

pub trait EngineFactory<C> {
    type Engine: Engine;

    fn create(&mut self, config: EngineConfig<C>) -> Self::Engine;
}

/// Whether [`EngineSlot::ensure`] built a new instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineStatus {
    Created,
    Reused,
}

struct LiveEngine<E> {
    host: HostId,
    engine: E,
    listeners: Vec<ListenerId>,
}

/// Holds at most one live engine, tagged with the host it was built for,
/// together with the pointer listeners registered on its behalf.
pub struct EngineSlot<E> {
    live: Option<LiveEngine<E>>,
}

impl<E> Default for EngineSlot<E> {
    fn default() -> Self {
        Self { live: None }
    }
}

impl<E: Engine> EngineSlot<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_alive(&self) -> bool {
        self.live.is_some()
    }

    /// Host the live engine was created for.
    pub fn host(&self) -> Option<HostId> {
        self.live.as_ref().map(|live| live.host)
    }

    pub fn get(&self) -> Option<&E> {
        self.live.as_ref().map(|live| &live.engine)
    }

    pub fn get_mut(&mut self) -> Option<&mut E> {
        self.live.as_mut().map(|live| &mut live.engine)
    }

    /// Whether host pointer events are currently routed to the engine.
    pub fn is_listening(&self) -> bool {
        self.live
            .as_ref()
            .is_some_and(|live| !live.listeners.is_empty())
    }

    /// Reuse the live engine if it was built for `host`, otherwise replace
    /// it with a new one.
    pub fn ensure<H, F>(
        &mut self,
        host: &mut H,
        factory: &mut F,
        config: impl FnOnce() -> EngineConfig<H::Context>,
    ) -> EngineStatus
    where
        H: MapHost,
        F: EngineFactory<H::Context, Engine = E>,
    {
        if let Some(live) = self.live.as_mut() {
            if live.host == host.id() {
                if live.listeners.is_empty() {
                    live.listeners = listen(host);
                }
                return EngineStatus::Reused;
            }
        }
        self.replace(host, factory, config());
        EngineStatus::Created
    }

    /// Destroy any live engine and build a new one from `config`.
    pub fn replace<H, F>(&mut self, host: &mut H, factory: &mut F, config: EngineConfig<H::Context>)
    where
        H: MapHost,
        F: EngineFactory<H::Context, Engine = E>,
    {
        self.destroy(host);
        log::debug!("Creating engine for {}", config.host);
        let engine = factory.create(config);
        self.live = Some(LiveEngine {
            host: host.id(),
            engine,
            listeners: listen(host),
        });
    }

    /// Unregister the engine's pointer listeners from `host`. The engine
    /// itself stays alive.
    pub fn release_listeners<H: MapHost>(&mut self, host: &mut H) {
        let Some(live) = self.live.as_mut() else {
            return;
        };
        if live.host != host.id() {
            // Listeners live on the engine's own host, which is gone.
            live.listeners.clear();
            return;
        }
        for listener in live.listeners.drain(..) {
            host.remove_listener(listener);
        }
    }

    /// Destroy the live engine, unregistering its listeners from `host`.
    /// Returns `false` if there was nothing to destroy.
    pub fn destroy<H: MapHost>(&mut self, host: &mut H) -> bool {
        self.release_listeners(host);
        self.discard()
    }

    /// Destroy the live engine without a host at hand.
    pub fn discard(&mut self) -> bool {
        let Some(live) = self.live.take() else {
            return false;
        };
        if !live.listeners.is_empty() {
            log::warn!(
                "Destroying engine with {} pointer listeners still registered",
                live.listeners.len()
            );
        }
        log::debug!("Destroying engine for {}", live.host);
        live.engine.destroy();
        true
    }
}

fn listen<H: MapHost>(host: &mut H) -> Vec<ListenerId> {
    PointerEventKind::ALL
        .iter()
        .map(|&kind| host.add_pointer_listener(kind))
        .collect()
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEngineFactory, MockMap};
    use mapdeck_core::{RenderingMode, ViewportSize};

    fn config_for(host: &MockMap) -> EngineConfig<crate::testing::MockContext> {
        EngineConfig::from_props(host.id(), &ConfigProps::default())
    }

    #[test]
    fn test_ensure_creates_once_per_host() {
        let mut host = MockMap::new(RenderingMode::RasterDom, ViewportSize::new(800, 600));
        let mut factory = MockEngineFactory::new();
        let mut slot = EngineSlot::new();

        let cfg = config_for(&host);
        assert_eq!(slot.ensure(&mut host, &mut factory, || cfg), EngineStatus::Created);
        let cfg = config_for(&host);
        assert_eq!(slot.ensure(&mut host, &mut factory, || cfg), EngineStatus::Reused);

        assert_eq!(factory.created(), 1);
        assert_eq!(factory.live_count(), 1);
        assert_eq!(slot.host(), Some(host.id()));
        assert!(slot.is_listening());
        assert_eq!(host.pointer_listener_count(), PointerEventKind::ALL.len());
    }

    #[test]
    fn test_ensure_replaces_engine_of_other_host() {
        let mut first = MockMap::new(RenderingMode::RasterDom, ViewportSize::new(800, 600));
        let mut second = MockMap::new(RenderingMode::RasterDom, ViewportSize::new(800, 600));
        let mut factory = MockEngineFactory::new();
        let mut slot = EngineSlot::new();

        let cfg = config_for(&first);
        slot.ensure(&mut first, &mut factory, || cfg);
        slot.release_listeners(&mut first);
        let cfg = config_for(&second);
        assert_eq!(slot.ensure(&mut second, &mut factory, || cfg), EngineStatus::Created);

        assert_eq!(factory.created(), 2);
        assert_eq!(factory.live_count(), 1);
        assert_eq!(first.pointer_listener_count(), 0);
        assert_eq!(slot.host(), Some(second.id()));
    }

    #[test]
    fn test_destroy_releases_listeners() {
        let mut host = MockMap::new(RenderingMode::RasterDom, ViewportSize::new(800, 600));
        let mut factory = MockEngineFactory::new();
        let mut slot = EngineSlot::new();

        let cfg = config_for(&host);
        slot.ensure(&mut host, &mut factory, || cfg);
        assert!(slot.destroy(&mut host));
        assert!(!slot.destroy(&mut host));

        assert!(!slot.is_alive());
        assert_eq!(factory.live_count(), 0);
        assert_eq!(host.pointer_listener_count(), 0);
    }

    #[test]
    fn test_reuse_relistens_after_release() {
        let mut host = MockMap::new(RenderingMode::RasterDom, ViewportSize::new(800, 600));
        let mut factory = MockEngineFactory::new();
        let mut slot = EngineSlot::new();

        let cfg = config_for(&host);
        slot.ensure(&mut host, &mut factory, || cfg);
        slot.release_listeners(&mut host);
        assert!(!slot.is_listening());

        let cfg = config_for(&host);
        slot.ensure(&mut host, &mut factory, || cfg);
        assert!(slot.is_listening());
        assert_eq!(host.pointer_listener_count(), PointerEventKind::ALL.len());
    }

    #[test]
    fn test_props_update_constructors() {
        assert!(PropsUpdate::default().is_empty());
        let update = PropsUpdate::layer_filter(LayerFilter::HideAll);
        assert_eq!(update.layer_filter, Some(LayerFilter::HideAll));
        assert!(update.view_state.is_none());
        assert!(!update.is_empty());
    }
}
