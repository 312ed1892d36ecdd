//! Shared graphics-context lifecycle.
//!
//! The host hands its context over on acquisition and may revoke it at
//! any time. Each acquisition rebuilds the engine against the new
//! context; each loss tears the engine down, since no GPU object survives
//! a lost context.
//!
//! Teardown on loss is best-effort: the host may reclaim the context
//! before the engine has released everything.

use mapdeck_core::ConfigProps;

use crate::engine::{Engine, EngineConfig, EngineFactory, EngineSlot};
use crate::gpu_state::{isolating_render_hook, GraphicsContext};
use crate::host::{MapHost, OverlayId};

pub struct ContextLifecycle<C> {
    context: Option<C>,
    acquisitions: u64,
}

impl<C> Default for ContextLifecycle<C> {
    fn default() -> Self {
        Self {
            context: None,
            acquisitions: 0,
        }
    }
}

impl<C: GraphicsContext + Clone + 'static> ContextLifecycle<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.context.is_some()
    }

    pub fn context(&self) -> Option<&C> {
        self.context.as_ref()
    }

    /// Number of acquisitions seen so far.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions
    }

    /// Take over `context` and rebuild the engine to draw into it.
    ///
    /// The new engine renders through [`isolating_render_hook`] and routes
    /// its own redraw requests to the host's `draw_overlay`.
    pub fn acquire<H, F>(
        &mut self,
        context: C,
        host: &mut H,
        draw_overlay: OverlayId,
        slot: &mut EngineSlot<F::Engine>,
        factory: &mut F,
        props: &ConfigProps,
    ) where
        H: MapHost<Context = C>,
        F: EngineFactory<C>,
    {
        let mut config = EngineConfig::from_props(host.id(), props);
        config.context = Some(context.clone());
        config.interleaved = true;
        config.render_hook = Some(isolating_render_hook(context.clone()));
        config.custom_render = Some(host.redraw_callback(draw_overlay));

        slot.replace(host, factory, config);
        self.context = Some(context);
        self.acquisitions += 1;
        log::debug!("Graphics context acquired (#{})", self.acquisitions);
    }

    /// The context is gone: destroy the engine bound to it.
    pub fn lose<H, E>(&mut self, host: &mut H, slot: &mut EngineSlot<E>)
    where
        H: MapHost<Context = C>,
        E: Engine,
    {
        self.context = None;
        if slot.destroy(host) {
            log::info!("Graphics context lost; engine destroyed");
        } else {
            log::debug!("Graphics context lost with no engine alive");
        }
    }

    /// Drop the handle without touching the engine (host detached).
    pub fn forget(&mut self) {
        self.context = None;
    }
}

// ===================================================================
// Tests
// ===================================================================
