//! Per-frame draw scheduling, one path per host mode.
//!
//! Both paths run synchronously inside the host's draw callback. The
//! vector path additionally owns the shared-context discipline: the
//! engine only ever touches host GPU state inside a [`ParameterScope`].

use mapdeck_core::{raster_view, vector_view, ViewportSize};

use crate::container::px;
use crate::engine::{DrawOptions, Engine, PropsUpdate, Redraw, SurfaceSize, VECTOR_DRAW_TARGET};
use crate::gpu_state::{GraphicsContext, ParameterOverrides, ParameterScope, ENGINE_DRAW_STATE};
use crate::host::{MapHost, VectorFrame};

/// What a scheduled frame ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Host state not ready; nothing pushed.
    Skipped,
    /// Camera pushed and a redraw requested from the engine.
    Redrawn,
    /// Camera pushed, engine not initialized yet; nothing drawn.
    Deferred,
    /// Drawn into the host's shared context.
    DrawnInterleaved,
}

/// Raster path: follow the host's overlay pane and polled camera.
pub fn draw_raster<H, E>(host: &H, engine: &mut E, altitude: f64) -> FrameOutcome
where
    H: MapHost,
    E: Engine,
{
    let (Some(size), Some(camera)) = (host.viewport_size(), host.camera()) else {
        log::trace!("Raster frame skipped: host viewport or camera not ready");
        return FrameOutcome::Skipped;
    };
    let offset = host.overlay_pane_offset().unwrap_or_default();
    let view = raster_view(size, &camera, offset, altitude);

    if let Some(container) = engine.output_container() {
        container.set_style("left", &px(view.left));
        container.set_style("top", &px(view.top));
    }

    engine.update_props(PropsUpdate::view(
        SurfaceSize::Pixels {
            width: view.width,
            height: view.height,
        },
        view.view_state,
    ));
    engine.redraw(Redraw::IfNeeded);
    FrameOutcome::Redrawn
}

/// Vector path: push the frame's camera, then draw inside the host frame
/// (interleaved) or redraw the engine's own surface.
pub fn draw_vector<C, E>(
    viewport: Option<ViewportSize>,
    engine: &mut E,
    interleaved: bool,
    frame: VectorFrame<C>,
) -> FrameOutcome
where
    C: GraphicsContext,
    E: Engine,
{
    let Some(size) = viewport else {
        log::trace!("Vector frame skipped: host viewport not ready");
        return FrameOutcome::Skipped;
    };

    let surface = if interleaved {
        SurfaceSize::Inherit
    } else {
        SurfaceSize::Pixels {
            width: size.width,
            height: size.height,
        }
    };
    engine.update_props(PropsUpdate::view(surface, vector_view(size, &frame.camera)));

    if !interleaved {
        engine.redraw(Redraw::Force);
        return FrameOutcome::Redrawn;
    }
    if !engine.is_initialized() {
        return FrameOutcome::Deferred;
    }

    let mut context = frame.context;
    // Hosts may render to an off-screen framebuffer.
    engine.update_props(PropsUpdate::draw_target(context.bound_draw_target()));

    // The host repaints right after this callback for the camera change
    // it just applied; a pending flag would make the engine ask again.
    engine.clear_redraw_flags();

    let canvas = context.canvas_size();
    context.apply(&ParameterOverrides::full_canvas(canvas));
    {
        let _scope = ParameterScope::enter(&mut context, &ENGINE_DRAW_STATE);
        engine.draw_layers(VECTOR_DRAW_TARGET, DrawOptions { clear_canvas: false });
    }
    FrameOutcome::DrawnInterleaved
}

// ===================================================================
// Tests
// ===================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, EngineFactory};
    use crate::gpu_state::{DrawTarget, GpuParameters, PixelRect};
    use crate::testing::{MockContext, MockEngine, MockEngineFactory, MockMap};
    use mapdeck_core::{ConfigProps, HostCamera, LngLat, PaneOffset, RenderingMode, ViewState};

    fn camera() -> HostCamera {
        HostCamera {
            center: LngLat::new(0.45, 51.47),
            zoom: 4.0,
            bearing: 0.0,
            tilt: 30.0,
        }
    }

    fn make_engine(host: &MockMap, context: Option<MockContext>) -> (MockEngineFactory, MockEngine) {
        let mut factory = MockEngineFactory::new();
        let mut config = EngineConfig::from_props(host.id(), &ConfigProps::default());
        config.context = context;
        let engine = factory.create(config);
        (factory, engine)
    }

    #[test]
    fn test_raster_frame_pushes_camera_and_moves_container() {
        let host = MockMap::new(RenderingMode::RasterDom, ViewportSize::new(800, 600));
        host.set_camera(camera());
        host.set_pane_offset(PaneOffset { left: 25.0, top: -10.0 });
        let (_factory, mut engine) = make_engine(&host, None);

        assert_eq!(draw_raster(&host, &mut engine, 10_000.0), FrameOutcome::Redrawn);

        let update = engine.last_props().unwrap();
        assert_eq!(update.size, Some(SurfaceSize::Pixels { width: 800, height: 600 }));
        assert_eq!(
            update.view_state,
            Some(ViewState {
                longitude: 0.45,
                latitude: 51.47,
                zoom: 4.0,
                bearing: 0.0,
                pitch: 30.0,
                altitude: 10_000.0,
                projection_matrix: None,
                repeat: false,
            })
        );
        assert_eq!(engine.container().style("left").as_deref(), Some("25px"));
        assert_eq!(engine.container().style("top").as_deref(), Some("-10px"));
        assert_eq!(engine.redraws(), vec![Redraw::IfNeeded]);
    }

    #[test]
    fn test_raster_frame_waits_for_camera() {
        let host = MockMap::new(RenderingMode::RasterDom, ViewportSize::new(800, 600));
        host.clear_camera();
        let (_factory, mut engine) = make_engine(&host, None);

        assert_eq!(draw_raster(&host, &mut engine, 10_000.0), FrameOutcome::Skipped);
        assert!(engine.last_props().is_none());
        assert!(engine.redraws().is_empty());
    }

    #[test]
    fn test_interleaved_frame_isolates_state() {
        let host = MockMap::new(RenderingMode::VectorGpu, ViewportSize::new(800, 600));
        let mut ctx = host.context();
        ctx.set_parameters(&GpuParameters {
            viewport: PixelRect { x: 3, y: 3, width: 1, height: 1 },
            ..GpuParameters::default()
        });
        ctx.bind_framebuffer(DrawTarget::Framebuffer(9));
        let (_factory, mut engine) = make_engine(&host, Some(ctx.clone()));

        let outcome = draw_vector(
            Some(ViewportSize::new(800, 600)),
            &mut engine,
            true,
            VectorFrame { context: ctx.clone(), camera: camera() },
        );
        assert_eq!(outcome, FrameOutcome::DrawnInterleaved);

        // Engine saw the fixed draw state and a full-canvas viewport.
        let seen = engine.draws()[0].1;
        assert_eq!(seen.blend, Some(wgpu::BlendState::ALPHA_BLENDING));
        assert!(seen.depth_test && seen.depth_write);
        assert_eq!(seen.viewport, PixelRect::full(ctx.canvas_size()));

        // Afterwards only the canvas reset persists.
        let after = ctx.parameters();
        assert_eq!(after.blend, None);
        assert!(!after.depth_test);
        assert_eq!(after.viewport, PixelRect::full(ctx.canvas_size()));

        let updates = engine.props_history();
        assert_eq!(updates[0].size, Some(SurfaceSize::Inherit));
        assert_eq!(updates[1].draw_target, Some(DrawTarget::Framebuffer(9)));
        // The view update dirtied the engine; the flags were cleared
        // before the layers were drawn.
        assert_eq!(engine.dirty_draws(), 0);
        assert!(!engine.needs_redraw());
        assert_eq!(engine.draws()[0].0, VECTOR_DRAW_TARGET);
    }

    #[test]
    fn test_interleaved_frame_defers_until_initialized() {
        let host = MockMap::new(RenderingMode::VectorGpu, ViewportSize::new(800, 600));
        let ctx = host.context();
        let (_factory, mut engine) = make_engine(&host, Some(ctx.clone()));
        engine.set_initialized(false);

        let outcome = draw_vector(
            Some(ViewportSize::new(800, 600)),
            &mut engine,
            true,
            VectorFrame { context: ctx, camera: camera() },
        );
        assert_eq!(outcome, FrameOutcome::Deferred);
        assert!(engine.draws().is_empty());
        assert!(engine.needs_redraw());
    }

    #[test]
    fn test_standalone_vector_frame_forces_redraw() {
        let host = MockMap::new(RenderingMode::VectorGpu, ViewportSize::new(800, 600));
        let ctx = host.context();
        let before = ctx.parameters();
        let (_factory, mut engine) = make_engine(&host, None);

        let outcome = draw_vector(
            Some(ViewportSize::new(800, 600)),
            &mut engine,
            false,
            VectorFrame { context: ctx.clone(), camera: camera() },
        );
        assert_eq!(outcome, FrameOutcome::Redrawn);
        assert_eq!(engine.redraws(), vec![Redraw::Force]);
        assert!(engine.draws().is_empty());
        assert_eq!(
            engine.last_props().unwrap().size,
            Some(SurfaceSize::Pixels { width: 800, height: 600 })
        );
        assert_eq!(ctx.parameters(), before);
    }

    #[test]
    fn test_vector_frame_without_viewport() {
        let host = MockMap::new(RenderingMode::VectorGpu, ViewportSize::new(800, 600));
        let ctx = host.context();
        let (_factory, mut engine) = make_engine(&host, Some(ctx.clone()));

        let outcome = draw_vector(None, &mut engine, true, VectorFrame { context: ctx, camera: camera() });
        assert_eq!(outcome, FrameOutcome::Skipped);
        assert!(engine.props_history().is_empty());
    }
}
