//! Render bridge: binds one engine to one map host at a time.
//!
//! The bridge owns the host handle, the overlays registered on it, the
//! engine slot and the shared-context state. Host glue feeds it overlay
//! callbacks through [`RenderBridge::dispatch`]; everything else happens
//! in response to those callbacks.
//!
//! ```text
//!  host callbacks ──► dispatch(overlay, event)
//!                          │
//!          ┌───────────────┼────────────────────┐
//!          ▼               ▼                    ▼
//!   ContextLifecycle  PositioningContainer  scheduler::draw_*
//!          │                                    │
//!          └──────────► EngineSlot ◄────────────┘
//! ```

use mapdeck_core::{is_reserved_key, ConfigProps, ConfigUpdate, RenderingMode};
use thiserror::Error;

use crate::container::PositioningContainer;
use crate::context::ContextLifecycle;
use crate::engine::{
    Engine, EngineConfig, EngineFactory, EngineSlot, EngineStatus, LayerFilter, PickQuery,
    PropsUpdate, RegionQuery,
};
use crate::host::{ListenerId, MapHost, OverlayEvent, OverlayId, OverlayKind, PointerEvent, VectorFrame};
use crate::scheduler;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Render bridge has been finalized")]
    Finalized,
}

/// Overlays registered on the attached host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Overlays {
    #[default]
    None,
    Raster {
        single: OverlayId,
    },
    Vector {
        /// DOM overlay that hosts the positioning container.
        positioning: OverlayId,
        /// GPU overlay that receives the shared context and frames.
        draw: OverlayId,
        /// Whether the engine shares the host's context. Fixed at setup.
        interleaved: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Role {
    Raster,
    Positioning,
    Draw,
}

impl Overlays {
    fn role_of(&self, overlay: OverlayId) -> Option<Role> {
        match *self {
            Overlays::Raster { single } if single == overlay => Some(Role::Raster),
            Overlays::Vector { positioning, .. } if positioning == overlay => Some(Role::Positioning),
            Overlays::Vector { draw, .. } if draw == overlay => Some(Role::Draw),
            _ => None,
        }
    }

    /// Registered overlay ids, in teardown order.
    pub fn ids(&self) -> Vec<OverlayId> {
        match *self {
            Overlays::None => Vec::new(),
            Overlays::Raster { single } => vec![single],
            Overlays::Vector { positioning, draw, .. } => vec![draw, positioning],
        }
    }

    /// Whether these overlays were set up for interleaved drawing.
    pub fn is_interleaved(&self) -> bool {
        matches!(self, Overlays::Vector { interleaved: true, .. })
    }

    pub fn is_empty(&self) -> bool {
        *self == Overlays::None
    }
}

pub struct RenderBridge<H, F>
where
    H: MapHost,
    F: EngineFactory<H::Context>,
{
    config: ConfigProps,
    factory: F,
    host: Option<H>,
    mode: RenderingMode,
    mode_listener: Option<ListenerId>,
    overlays: Overlays,
    engine: EngineSlot<F::Engine>,
    context: ContextLifecycle<H::Context>,
    container: PositioningContainer<H::Element>,
    finalized: bool,
}

impl<H, F> RenderBridge<H, F>
where
    H: MapHost,
    F: EngineFactory<H::Context>,
{
    pub fn new(factory: F, config: ConfigProps) -> Self {
        Self {
            config,
            factory,
            host: None,
            mode: RenderingMode::Uninitialized,
            mode_listener: None,
            overlays: Overlays::None,
            engine: EngineSlot::new(),
            context: ContextLifecycle::new(),
            container: PositioningContainer::new(),
            finalized: false,
        }
    }

    /// Bridge configured from a partial update over the defaults.
    pub fn with_update(factory: F, update: &ConfigUpdate) -> Self {
        Self::new(factory, ConfigProps::with_update(update))
    }

    // -- accessors -------------------------------------------------------

    pub fn host(&self) -> Option<&H> {
        self.host.as_ref()
    }

    pub fn config(&self) -> &ConfigProps {
        &self.config
    }

    /// Mode the overlays were set up for; `Uninitialized` until setup.
    pub fn mode(&self) -> RenderingMode {
        self.mode
    }

    pub fn overlays(&self) -> Overlays {
        self.overlays
    }

    pub fn engine(&self) -> Option<&F::Engine> {
        self.engine.get()
    }

    pub fn engine_mut(&mut self) -> Option<&mut F::Engine> {
        self.engine.get_mut()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn is_attached(&self) -> bool {
        self.host.is_some()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Whether a shared graphics context is currently held.
    pub fn has_shared_context(&self) -> bool {
        self.context.is_valid()
    }

    pub fn is_listening(&self) -> bool {
        self.engine.is_listening()
    }

    // -- lifecycle -------------------------------------------------------

    /// Attach to `host`, detaching any other host first. Attaching the
    /// host already attached is a no-op.
    pub fn attach(&mut self, host: H) -> Result<(), BridgeError> {
        if self.finalized {
            return Err(BridgeError::Finalized);
        }
        if self.host.as_ref().is_some_and(|current| current.id() == host.id()) {
            return Ok(());
        }
        self.detach();

        let id = host.id();
        let mode = host.rendering_mode();
        self.host = Some(host);
        log::info!("Attached to {id} ({mode:?})");

        if mode.is_resolved() {
            self.setup_overlays();
        } else if let Some(host) = self.host.as_mut() {
            self.mode_listener = Some(host.add_mode_listener());
            log::debug!("Rendering mode pending; setup deferred");
        }
        Ok(())
    }

    /// Release the host. The engine survives so a later attach can reuse
    /// it; its layers are hidden until then.
    pub fn detach(&mut self) {
        let Some(mut host) = self.host.take() else {
            return;
        };

        if let Overlays::Vector { draw, interleaved: true, .. } = self.overlays {
            host.request_redraw(draw);
        }
        if let Some(listener) = self.mode_listener.take() {
            host.remove_listener(listener);
        }
        for overlay in self.overlays.ids() {
            host.unregister_overlay(overlay);
        }
        // Removal callbacks for the unregistered overlays never reach us.
        if !self.overlays.is_empty() {
            self.hide_layers();
        }
        self.overlays = Overlays::None;
        self.mode = RenderingMode::Uninitialized;

        self.engine.release_listeners(&mut host);
        self.container.unmount();
        self.context.forget();
        log::info!("Detached from {}", host.id());
    }

    /// Detach and destroy the engine. The bridge cannot be attached again.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.detach();
        if self.engine.discard() {
            log::debug!("Engine destroyed on finalize");
        }
        self.finalized = true;
    }

    /// Merge `update` into the configuration and forward it to a live
    /// engine. Style goes to the engine's output container, never to the
    /// engine itself.
    pub fn update_config(&mut self, update: ConfigUpdate) {
        if self.finalized {
            log::warn!("Ignoring config update on a finalized bridge");
            return;
        }
        self.config.merge(&update);

        let Some(engine) = self.engine.get_mut() else {
            return;
        };
        if let Some(style) = &update.style {
            match engine.output_container() {
                Some(container) => {
                    for (property, value) in style {
                        container.set_style(property, value);
                    }
                }
                None => log::debug!("No output container yet; style kept for creation"),
            }
        }
        let engine_props = update
            .engine
            .into_iter()
            .filter(|(key, _)| !is_reserved_key(key))
            .collect();
        let forwarded = PropsUpdate::pass_through(engine_props);
        if !forwarded.is_empty() {
            engine.update_props(forwarded);
        }
    }

    /// The host resolved its rendering mode.
    pub fn on_rendering_mode_resolved(&mut self) {
        let Some(host) = self.host.as_mut() else {
            return;
        };
        if !host.rendering_mode().is_resolved() {
            log::debug!("Mode signal received but mode still pending");
            return;
        }
        if let Some(listener) = self.mode_listener.take() {
            host.remove_listener(listener);
        }
        self.setup_overlays();
    }

    fn setup_overlays(&mut self) {
        if !self.overlays.is_empty() {
            return;
        }
        let Some(host) = self.host.as_mut() else {
            return;
        };

        self.overlays = match host.rendering_mode() {
            RenderingMode::Uninitialized => return,
            RenderingMode::VectorGpu if host.supports_gpu_overlay() => Overlays::Vector {
                positioning: host.register_overlay(OverlayKind::Dom),
                draw: host.register_overlay(OverlayKind::Gpu),
                interleaved: self.config.interleaved,
            },
            RenderingMode::VectorGpu => {
                log::warn!("Vector host without GPU overlays; using the raster path");
                Overlays::Raster {
                    single: host.register_overlay(OverlayKind::Dom),
                }
            }
            RenderingMode::RasterDom => Overlays::Raster {
                single: host.register_overlay(OverlayKind::Dom),
            },
        };
        self.mode = match self.overlays {
            Overlays::Vector { .. } => RenderingMode::VectorGpu,
            _ => RenderingMode::RasterDom,
        };
        log::debug!("Overlays set up: {:?}", self.overlays);
    }

    // -- host callbacks --------------------------------------------------

    /// Route a host overlay callback. Callbacks for overlays this bridge
    /// has not registered (or has already unregistered) are dropped.
    pub fn dispatch(&mut self, overlay: OverlayId, event: OverlayEvent<H::Context>) {
        let Some(role) = self.overlays.role_of(overlay) else {
            log::trace!("Dropping {} for unknown overlay {overlay:?}", event.name());
            return;
        };
        // Later config changes apply at the next setup.
        let interleaved = self.overlays.is_interleaved();

        match (role, event) {
            (Role::Raster, OverlayEvent::Attach) => self.ensure_engine(),
            (Role::Raster, OverlayEvent::Draw(_) | OverlayEvent::Layout) => self.draw_raster(),
            (Role::Positioning, OverlayEvent::Attach) => {
                if let Some(host) = self.host.as_mut() {
                    self.container.mount(host);
                }
                if !interleaved {
                    self.ensure_engine();
                }
            }
            (Role::Positioning, OverlayEvent::Layout | OverlayEvent::Draw(_)) => {
                let viewport = self.host.as_ref().and_then(|host| host.viewport_size());
                self.container.layout(viewport);
            }
            (Role::Draw, OverlayEvent::ContextAcquired(context)) if interleaved => {
                if let Some(host) = self.host.as_mut() {
                    self.context.acquire(
                        context,
                        host,
                        overlay,
                        &mut self.engine,
                        &mut self.factory,
                        &self.config,
                    );
                }
            }
            (Role::Draw, OverlayEvent::ContextLost) if interleaved => {
                if let Some(host) = self.host.as_mut() {
                    self.context.lose(host, &mut self.engine);
                }
            }
            (Role::Draw, OverlayEvent::Draw(Some(frame))) => self.draw_vector(frame),
            (Role::Raster | Role::Positioning, OverlayEvent::Detach) => self.hide_layers(),
            (Role::Draw, OverlayEvent::Detach) if interleaved => self.hide_layers(),
            (role, event) => log::trace!("Ignoring {} on {role:?} overlay", event.name()),
        }
    }

    /// Forward a host pointer event to the engine.
    pub fn on_pointer_event(&mut self, event: &PointerEvent) {
        if !self.engine.is_listening() {
            return;
        }
        if let Some(engine) = self.engine.get_mut() {
            engine.handle_pointer_event(event);
        }
    }

    fn ensure_engine(&mut self) {
        let Some(host) = self.host.as_mut() else {
            return;
        };
        let host_id = host.id();
        let config = &self.config;
        let interleaved = self.overlays.is_interleaved();
        let status = self.engine.ensure(host, &mut self.factory, || EngineConfig {
            interleaved,
            ..EngineConfig::from_props(host_id, config)
        });
        if status == EngineStatus::Reused {
            // Layers were hidden when the previous overlay went away.
            if let Some(engine) = self.engine.get_mut() {
                engine.update_props(PropsUpdate::layer_filter(LayerFilter::ShowAll));
            }
        }
        log::debug!("Engine {status:?} for {host_id}");
    }

    fn hide_layers(&mut self) {
        if let Some(engine) = self.engine.get_mut() {
            engine.update_props(PropsUpdate::layer_filter(LayerFilter::HideAll));
        }
    }

    fn draw_raster(&mut self) {
        let (Some(host), Some(engine)) = (self.host.as_ref(), self.engine.get_mut()) else {
            return;
        };
        scheduler::draw_raster(host, engine, self.config.raster_altitude);
    }

    fn draw_vector(&mut self, frame: VectorFrame<H::Context>) {
        let (Some(host), Some(engine)) = (self.host.as_ref(), self.engine.get_mut()) else {
            log::trace!("Vector frame before engine creation");
            return;
        };
        let interleaved = self.overlays.is_interleaved();
        let outcome = scheduler::draw_vector(host.viewport_size(), engine, interleaved, frame);
        log::trace!("Vector frame: {outcome:?}");
    }

    // -- picking ---------------------------------------------------------

    pub fn pick_object(&mut self, query: &PickQuery) -> Option<<F::Engine as Engine>::Picked> {
        self.engine.get_mut()?.pick_object(query)
    }

    pub fn pick_objects(&mut self, query: &RegionQuery) -> Vec<<F::Engine as Engine>::Picked> {
        self.engine
            .get_mut()
            .map(|engine| engine.pick_objects(query))
            .unwrap_or_default()
    }

    pub fn pick_multiple_objects(&mut self, query: &PickQuery) -> Vec<<F::Engine as Engine>::Picked> {
        self.engine
            .get_mut()
            .map(|engine| engine.pick_multiple_objects(query))
            .unwrap_or_default()
    }
}

impl<H, F> Drop for RenderBridge<H, F>
where
    H: MapHost,
    F: EngineFactory<H::Context>,
{
    fn drop(&mut self) {
        self.finalize();
    }
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Redraw;
    use crate::testing::{MockEngineFactory, MockMap};
    use mapdeck_core::ViewportSize;
    use serde_json::json;

    type Bridge = RenderBridge<MockMap, MockEngineFactory>;

    fn bridge() -> (Bridge, MockEngineFactory) {
        let factory = MockEngineFactory::new();
        (Bridge::new(factory.clone(), ConfigProps::default()), factory)
    }

    #[test]
    fn test_raster_setup_registers_one_overlay() {
        let (mut bridge, factory) = bridge();
        let host = MockMap::raster(800, 600);
        bridge.attach(host.clone()).unwrap();

        assert!(matches!(bridge.overlays(), Overlays::Raster { .. }));
        assert_eq!(bridge.mode(), RenderingMode::RasterDom);
        assert_eq!(host.overlay_count(), 1);
        assert_eq!(factory.created(), 0);

        host.pump(&mut bridge);
        assert_eq!(factory.created(), 1);
        assert!(bridge.is_listening());
    }

    #[test]
    fn test_attach_same_host_is_noop() {
        let (mut bridge, _factory) = bridge();
        let host = MockMap::raster(800, 600);
        bridge.attach(host.clone()).unwrap();
        let overlays = bridge.overlays();
        bridge.attach(host.clone()).unwrap();

        assert_eq!(bridge.overlays(), overlays);
        assert_eq!(host.overlay_count(), 1);
    }

    #[test]
    fn test_attach_after_finalize_fails() {
        let (mut bridge, _factory) = bridge();
        bridge.finalize();
        assert_eq!(bridge.attach(MockMap::raster(10, 10)), Err(BridgeError::Finalized));
        assert!(!bridge.is_attached());
    }

    #[test]
    fn test_vector_setup_registers_two_overlays() {
        let (mut bridge, factory) = bridge();
        let host = MockMap::vector(800, 600);
        bridge.attach(host.clone()).unwrap();
        host.pump(&mut bridge);

        let Overlays::Vector { positioning, draw, interleaved } = bridge.overlays() else {
            panic!("expected vector overlays, got {:?}", bridge.overlays());
        };
        assert_ne!(positioning, draw);
        assert!(interleaved);
        assert_eq!(
            host.overlays(),
            vec![(positioning, OverlayKind::Dom), (draw, OverlayKind::Gpu)]
        );
        // Interleaved: the engine comes from the context, not the attach.
        assert_eq!(factory.created(), 1);
        assert!(bridge.has_shared_context());
        assert!(bridge.engine().unwrap().has_shared_context());
    }

    #[test]
    fn test_standalone_vector_engine_comes_from_positioning_attach() {
        let factory = MockEngineFactory::new();
        let update = ConfigUpdate::new().interleaved(false);
        let mut bridge = Bridge::with_update(factory.clone(), &update);
        let host = MockMap::vector(800, 600);
        bridge.attach(host.clone()).unwrap();
        host.pump(&mut bridge);

        assert_eq!(factory.created(), 1);
        assert!(!bridge.has_shared_context());
        assert!(!bridge.engine().unwrap().has_shared_context());

        host.draw(&mut bridge);
        assert_eq!(bridge.engine().unwrap().redraws(), &[Redraw::Force]);
    }

    #[test]
    fn test_interleaved_change_waits_for_next_setup() {
        let (mut bridge, factory) = bridge();
        let host = MockMap::vector(800, 600);
        bridge.attach(host.clone()).unwrap();
        host.pump(&mut bridge);
        assert!(bridge.overlays().is_interleaved());

        bridge.update_config(ConfigUpdate::new().interleaved(false));
        assert!(!bridge.config().interleaved);
        assert!(bridge.overlays().is_interleaved());

        // The overlays still follow the interleaved setup.
        host.lose_context(&mut bridge);
        assert!(bridge.engine().is_none());
        assert_eq!(factory.live_count(), 0);

        host.restore_context(&mut bridge);
        assert_eq!(factory.live_count(), 1);
        host.draw(&mut bridge);
        let engine = bridge.engine().unwrap();
        assert!(engine.has_shared_context());
        assert!(engine.is_interleaved());
        assert!(engine.redraws().is_empty());
        assert_eq!(engine.draws().len(), 1);

        // A fresh setup picks up the new value.
        bridge.detach();
        bridge.attach(host.clone()).unwrap();
        host.pump(&mut bridge);
        assert!(!bridge.overlays().is_interleaved());
        host.draw(&mut bridge);
        assert_eq!(bridge.engine().unwrap().redraws().last(), Some(&Redraw::Force));
    }

    #[test]
    fn test_vector_without_gpu_overlays_falls_back_to_raster() {
        let (mut bridge, _factory) = bridge();
        let host = MockMap::vector(800, 600);
        host.set_gpu_overlays_supported(false);
        bridge.attach(host.clone()).unwrap();

        assert!(matches!(bridge.overlays(), Overlays::Raster { .. }));
        assert_eq!(bridge.mode(), RenderingMode::RasterDom);
    }

    #[test]
    fn test_stale_events_are_dropped() {
        let (mut bridge, factory) = bridge();
        let host = MockMap::raster(800, 600);
        bridge.attach(host.clone()).unwrap();
        bridge.dispatch(OverlayId(9_999), OverlayEvent::Attach);
        assert_eq!(factory.created(), 0);
    }

    #[test]
    fn test_detach_hides_layers_and_keeps_engine() {
        let (mut bridge, factory) = bridge();
        let host = MockMap::raster(800, 600);
        bridge.attach(host.clone()).unwrap();
        host.pump(&mut bridge);
        bridge.detach();

        assert!(!bridge.is_attached());
        assert_eq!(host.overlay_count(), 0);
        assert_eq!(host.pointer_listener_count(), 0);
        assert_eq!(factory.live_count(), 1);
        assert_eq!(bridge.engine().unwrap().layer_filter(), LayerFilter::HideAll);

        bridge.detach();
        assert_eq!(factory.live_count(), 1);
    }

    #[test]
    fn test_update_config_forwards_engine_props() {
        let (mut bridge, _factory) = bridge();
        let host = MockMap::raster(800, 600);
        bridge.attach(host.clone()).unwrap();
        host.pump(&mut bridge);

        bridge.update_config(
            ConfigUpdate::new()
                .engine_prop("pickingRadius", json!(5))
                .style([("zIndex", "3")]),
        );

        let engine = bridge.engine().unwrap();
        let update = engine.last_props().unwrap();
        assert_eq!(update.props.get("pickingRadius"), Some(&json!(5)));
        assert!(!update.props.contains_key("style"));
        assert_eq!(engine.container().style("zIndex").as_deref(), Some("3"));
        assert_eq!(bridge.config().style.get("zIndex").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_update_config_never_forwards_reserved_props() {
        let (mut bridge, _factory) = bridge();
        let host = MockMap::raster(800, 600);
        bridge.attach(host.clone()).unwrap();
        host.pump(&mut bridge);

        let mut update = ConfigUpdate::new().engine_prop("pickingRadius", json!(5));
        update.engine.insert("viewState".to_string(), json!({"zoom": 1}));
        bridge.update_config(update);

        let props = &bridge.engine().unwrap().last_props().unwrap().props;
        assert!(props.contains_key("pickingRadius"));
        assert!(!props.contains_key("viewState"));
        assert!(!bridge.config().engine.contains_key("viewState"));
    }

    #[test]
    fn test_update_config_before_engine_is_recorded() {
        let (mut bridge, _factory) = bridge();
        bridge.update_config(ConfigUpdate::new().raster_altitude(2_000.0));
        assert_eq!(bridge.config().raster_altitude, 2_000.0);
    }

    #[test]
    fn test_picking_without_engine() {
        let (mut bridge, _factory) = bridge();
        let query = PickQuery { x: 1.0, y: 2.0, ..PickQuery::default() };
        assert!(bridge.pick_object(&query).is_none());
        assert!(bridge.pick_multiple_objects(&query).is_empty());
        assert!(bridge.pick_objects(&RegionQuery::default()).is_empty());
    }

    #[test]
    fn test_picking_passes_through() {
        let (mut bridge, _factory) = bridge();
        let host = MockMap::raster(800, 600);
        bridge.attach(host.clone()).unwrap();
        host.pump(&mut bridge);

        let query = PickQuery { x: 10.0, y: 20.0, radius: 2, layer_ids: None };
        assert_eq!(bridge.pick_object(&query).as_deref(), Some("object@10,20"));
        assert_eq!(bridge.pick_multiple_objects(&query).len(), 1);
    }

    #[test]
    fn test_drop_finalizes() {
        let factory = MockEngineFactory::new();
        let host = MockMap::new(RenderingMode::RasterDom, ViewportSize::new(800, 600));
        {
            let mut bridge = Bridge::new(factory.clone(), ConfigProps::default());
            bridge.attach(host.clone()).unwrap();
            host.pump(&mut bridge);
            assert_eq!(factory.live_count(), 1);
        }
        assert_eq!(factory.live_count(), 0);
        assert_eq!(host.overlay_count(), 0);
    }
}
