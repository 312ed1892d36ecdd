//! Shared graphics-context state and the isolation scopes around it.
//!
//! In interleaved mode the host and the engine draw into the same
//! context. Every engine draw runs inside a scope that snapshots the
//! ambient state, applies overrides, and restores the snapshot when the
//! scope ends, including on early return and unwinding.

use mapdeck_core::ViewportSize;
use wgpu::{BlendState, CompareFunction};

use crate::engine::RenderHook;

/// Integer pixel rectangle (viewport, scissor box).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    /// Rectangle covering a whole canvas.
    pub fn full(size: ViewportSize) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.width,
            height: size.height,
        }
    }
}

/// Stencil test function, applied to front and back faces alike.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StencilFunc {
    pub compare: CompareFunction,
    pub reference: u32,
    pub mask: u32,
}

impl Default for StencilFunc {
    fn default() -> Self {
        Self {
            compare: CompareFunction::Always,
            reference: 0,
            mask: u32::MAX,
        }
    }
}

/// Target the context currently renders into.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DrawTarget {
    /// The canvas itself.
    #[default]
    Default,
    /// An off-screen framebuffer.
    Framebuffer(u32),
}

/// Buffer bound to the array-buffer slot, if any.
pub type BufferBinding = Option<u32>;

/// Snapshot of the ambient pipeline state of a shared context.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GpuParameters {
    /// `None` means blending is disabled.
    pub blend: Option<BlendState>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
    pub viewport: PixelRect,
    pub scissor: PixelRect,
    pub stencil: StencilFunc,
}

impl Default for GpuParameters {
    fn default() -> Self {
        Self {
            blend: None,
            depth_test: false,
            depth_write: true,
            depth_compare: CompareFunction::Less,
            viewport: PixelRect::default(),
            scissor: PixelRect::default(),
            stencil: StencilFunc::default(),
        }
    }
}

/// A partial set of parameters to apply on top of the ambient state.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ParameterOverrides {
    pub blend: Option<Option<BlendState>>,
    pub depth_test: Option<bool>,
    pub depth_write: Option<bool>,
    pub depth_compare: Option<CompareFunction>,
    pub viewport: Option<PixelRect>,
    pub scissor: Option<PixelRect>,
    pub stencil: Option<StencilFunc>,
}

/// State the engine draws with inside the host's frame: blending on with
/// source-over, depth test and depth writes on.
pub const ENGINE_DRAW_STATE: ParameterOverrides = ParameterOverrides {
    blend: Some(Some(BlendState::ALPHA_BLENDING)),
    depth_test: Some(true),
    depth_write: Some(true),
    depth_compare: None,
    viewport: None,
    scissor: None,
    stencil: None,
};

impl ParameterOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Viewport, scissor and stencil reset to cover the whole canvas.
    ///
    /// Hosts can leave these regions stale when handing the context over.
    pub fn full_canvas(size: ViewportSize) -> Self {
        let rect = PixelRect::full(size);
        Self {
            viewport: Some(rect),
            scissor: Some(rect),
            stencil: Some(StencilFunc {
                compare: CompareFunction::Always,
                reference: 0,
                mask: 0xFF,
            }),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, base: GpuParameters) -> GpuParameters {
        GpuParameters {
            blend: self.blend.unwrap_or(base.blend),
            depth_test: self.depth_test.unwrap_or(base.depth_test),
            depth_write: self.depth_write.unwrap_or(base.depth_write),
            depth_compare: self.depth_compare.unwrap_or(base.depth_compare),
            viewport: self.viewport.unwrap_or(base.viewport),
            scissor: self.scissor.unwrap_or(base.scissor),
            stencil: self.stencil.unwrap_or(base.stencil),
        }
    }
}

/// A graphics context shared between host and engine.
pub trait GraphicsContext {
    fn parameters(&self) -> GpuParameters;

    fn set_parameters(&mut self, parameters: &GpuParameters);

    fn array_buffer_binding(&self) -> BufferBinding;

    fn bind_array_buffer(&mut self, binding: BufferBinding);

    /// The framebuffer the host currently has bound.
    fn bound_draw_target(&self) -> DrawTarget;

    /// Drawing-buffer size of the canvas, in device pixels.
    fn canvas_size(&self) -> ViewportSize;

    /// Apply overrides permanently (no restore).
    fn apply(&mut self, overrides: &ParameterOverrides) {
        let next = overrides.apply_to(self.parameters());
        self.set_parameters(&next);
    }
}

/// Restores the context's parameters when dropped.
pub struct ParameterScope<'a, C: GraphicsContext> {
    context: &'a mut C,
    saved: GpuParameters,
}

impl<'a, C: GraphicsContext> ParameterScope<'a, C> {
    /// Snapshot the current parameters, then apply `overrides`.
    pub fn enter(context: &'a mut C, overrides: &ParameterOverrides) -> Self {
        let saved = context.parameters();
        if !overrides.is_empty() {
            context.set_parameters(&overrides.apply_to(saved));
        }
        Self { context, saved }
    }

    pub fn context(&mut self) -> &mut C {
        self.context
    }
}

impl<C: GraphicsContext> Drop for ParameterScope<'_, C> {
    fn drop(&mut self) {
        self.context.set_parameters(&self.saved);
    }
}

/// Restores the array-buffer binding when dropped.
pub struct ArrayBufferScope<'a, C: GraphicsContext> {
    context: &'a mut C,
    saved: BufferBinding,
}

impl<'a, C: GraphicsContext> ArrayBufferScope<'a, C> {
    pub fn enter(context: &'a mut C) -> Self {
        let saved = context.array_buffer_binding();
        Self { context, saved }
    }

    pub fn context(&mut self) -> &mut C {
        self.context
    }
}

impl<C: GraphicsContext> Drop for ArrayBufferScope<'_, C> {
    fn drop(&mut self) {
        self.context.bind_array_buffer(self.saved);
    }
}

/// Run `f` with `overrides` applied, restoring the previous parameters
/// afterwards.
pub fn with_parameters<C, R>(
    context: &mut C,
    overrides: &ParameterOverrides,
    f: impl FnOnce() -> R,
) -> R
where
    C: GraphicsContext,
{
    let _scope = ParameterScope::enter(context, overrides);
    f()
}

/// Render hook for engines sharing `context` with the host.
///
/// Wraps each engine frame so that the array-buffer binding and all
/// pipeline parameters the engine touches are put back afterwards.
pub fn isolating_render_hook<C>(mut context: C) -> RenderHook
where
    C: GraphicsContext + 'static,
{
    Box::new(move |render: &mut dyn FnMut()| {
        let mut buffers = ArrayBufferScope::enter(&mut context);
        let _parameters = ParameterScope::enter(buffers.context(), &ParameterOverrides::default());
        render();
    })
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockContext;
    use std::panic::{self, AssertUnwindSafe};

    fn host_state() -> GpuParameters {
        GpuParameters {
            blend: None,
            depth_test: false,
            depth_write: false,
            depth_compare: CompareFunction::Greater,
            viewport: PixelRect { x: 5, y: 5, width: 10, height: 10 },
            scissor: PixelRect { x: 1, y: 2, width: 3, height: 4 },
            stencil: StencilFunc {
                compare: CompareFunction::Equal,
                reference: 1,
                mask: 0x0F,
            },
        }
    }

    #[test]
    fn test_scope_applies_and_restores() {
        let mut ctx = MockContext::new(800, 600);
        ctx.set_parameters(&host_state());
        {
            let mut scope = ParameterScope::enter(&mut ctx, &ENGINE_DRAW_STATE);
            let inside = scope.context().parameters();
            assert_eq!(inside.blend, Some(BlendState::ALPHA_BLENDING));
            assert!(inside.depth_test);
            assert!(inside.depth_write);
            // Untouched fields keep the ambient value.
            assert_eq!(inside.depth_compare, CompareFunction::Greater);
        }
        assert_eq!(ctx.parameters(), host_state());
    }

    #[test]
    fn test_scope_restores_on_early_return() {
        let mut ctx = MockContext::new(800, 600);
        ctx.set_parameters(&host_state());

        let draw = |ctx: &mut MockContext, fail: bool| -> Result<(), &'static str> {
            let mut scope = ParameterScope::enter(ctx, &ENGINE_DRAW_STATE);
            scope.context().set_parameters(&GpuParameters::default());
            if fail {
                return Err("draw failed");
            }
            Ok(())
        };
        assert!(draw(&mut ctx, true).is_err());
        assert_eq!(ctx.parameters(), host_state());
    }

    #[test]
    fn test_scope_restores_on_panic() {
        let mut ctx = MockContext::new(800, 600);
        ctx.set_parameters(&host_state());
        let mut inner = ctx.clone();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            with_parameters(&mut inner, &ENGINE_DRAW_STATE, || panic!("engine blew up"));
        }));
        assert!(result.is_err());
        assert_eq!(ctx.parameters(), host_state());
    }

    #[test]
    fn test_full_canvas_reset() {
        let mut ctx = MockContext::new(1024, 768);
        ctx.set_parameters(&host_state());
        ctx.apply(&ParameterOverrides::full_canvas(ctx.canvas_size()));

        let params = ctx.parameters();
        assert_eq!(params.viewport, PixelRect { x: 0, y: 0, width: 1024, height: 768 });
        assert_eq!(params.scissor, params.viewport);
        assert_eq!(params.stencil.compare, CompareFunction::Always);
        assert_eq!(params.stencil.mask, 0xFF);
        assert_eq!(params.depth_compare, CompareFunction::Greater);
    }

    #[test]
    fn test_render_hook_restores_bindings() {
        let mut ctx = MockContext::new(800, 600);
        ctx.bind_array_buffer(Some(7));
        ctx.set_parameters(&host_state());

        let mut hook = isolating_render_hook(ctx.clone());
        let mut engine_side = ctx.clone();
        let mut rendered = false;
        hook(&mut || {
            engine_side.bind_array_buffer(Some(42));
            engine_side.set_parameters(&GpuParameters::default());
            rendered = true;
        });

        assert!(rendered);
        assert_eq!(ctx.array_buffer_binding(), Some(7));
        assert_eq!(ctx.parameters(), host_state());
    }

    #[test]
    fn test_empty_overrides() {
        assert!(ParameterOverrides::default().is_empty());
        assert!(!ENGINE_DRAW_STATE.is_empty());
        let base = host_state();
        assert_eq!(ParameterOverrides::default().apply_to(base), base);
    }
}
