//! Frame-loop behavior against the headless backend.

use ash::vk;
use glam::Vec3;

use renderer_core::RendererConfig;
use renderer_renderer::render_graph::BINDING_TEXTURES;
use renderer_renderer::{
    FrameStatus, MAX_FRAMES_IN_FLIGHT, OverlayPainter, PipelineVariant, RenderMode, Renderer,
    RendererAssets, RendererError, SlotState,
};
use renderer_resources::TexturePixels;
use renderer_rhi::headless::{BoundResource, Command, HeadlessEvent, HeadlessGpu, ScriptedAcquire};
use renderer_rhi::physical_device::DeviceCapabilities;
use renderer_rhi::{Gpu, PresentOutcome};
use renderer_scene::Transform;

const EXTENT: vk::Extent2D = vk::Extent2D {
    width: 640,
    height: 480,
};

fn renderer_with(gpu: HeadlessGpu, config: &RendererConfig) -> Renderer<HeadlessGpu> {
    Renderer::new(gpu, config, &RendererAssets::placeholder()).unwrap()
}

fn renderer(image_count: usize) -> Renderer<HeadlessGpu> {
    renderer_with(HeadlessGpu::new(EXTENT, image_count), &RendererConfig::default())
}

fn texture() -> TexturePixels {
    TexturePixels::solid(4, 4, [200, 100, 50, 255])
}

fn geometry_draws(renderer: &Renderer<HeadlessGpu>, image_index: u32) -> usize {
    let cmd = renderer.recorder().command_buffer(image_index).unwrap();
    renderer
        .gpu()
        .commands(cmd)
        .iter()
        .filter(|c| matches!(c, Command::DrawIndexed { .. }))
        .count()
}

fn bound_pipelines(renderer: &Renderer<HeadlessGpu>, image_index: u32) -> Vec<vk::Pipeline> {
    let cmd = renderer.recorder().command_buffer(image_index).unwrap();
    renderer
        .gpu()
        .commands(cmd)
        .iter()
        .filter_map(|c| match c {
            Command::BindPipeline(p) => Some(*p),
            _ => None,
        })
        .collect()
}

#[test]
fn test_in_flight_frames_are_bounded_and_images_never_race() {
    for image_count in [2, 3, 4] {
        let mut renderer = renderer(image_count);
        for _ in 0..24 {
            assert_eq!(renderer.update().unwrap(), FrameStatus::Presented);
        }
        assert_eq!(renderer.frame_count(), 24);
        assert!(renderer.gpu().max_in_flight() <= MAX_FRAMES_IN_FLIGHT);
        assert_eq!(renderer.gpu().image_races(), 0);
    }
}

#[test]
fn test_steady_state_hundred_frames() {
    let mut renderer = renderer(3);
    renderer.load_instance_pixels(&texture(), Transform::IDENTITY).unwrap();
    let rebuilds = renderer.rebuild_count();
    renderer.gpu_mut().clear_events();

    for _ in 0..100 {
        renderer.update().unwrap();
    }

    assert_eq!(renderer.frame_count(), 100);
    assert_eq!(renderer.rebuild_count(), rebuilds);
    assert_eq!(renderer.recreation_count(), 0);
    let events = renderer.gpu().events();
    assert!(!events.iter().any(|e| matches!(e, HeadlessEvent::WaitFence { timed_out: true, .. })));
    assert!(!events.iter().any(|e| matches!(e, HeadlessEvent::WaitIdle)));
}

#[test]
fn test_fence_reset_happens_right_before_submit() {
    let mut renderer = renderer(3);
    for _ in 0..4 {
        renderer.update().unwrap();
    }
    let events = renderer.gpu().events();
    for (i, event) in events.iter().enumerate() {
        if let HeadlessEvent::Submit { fence, .. } = event {
            assert_eq!(events[i - 1], HeadlessEvent::ResetFence(*fence));
        }
    }
}

#[test]
fn test_cycle_render_mode_changes_draws_and_returns_after_three() {
    let mut renderer = renderer(2);
    for x in [-0.5, 0.5] {
        renderer
            .load_instance_pixels(&texture(), Transform::from_position(Vec3::new(x, 0.0, 0.0)))
            .unwrap();
    }
    let start = renderer.render_mode();
    assert_eq!(start, RenderMode::Solid);
    assert_eq!(geometry_draws(&renderer, 0), 2);

    assert_eq!(renderer.cycle_render_mode().unwrap(), RenderMode::Both);
    assert_eq!(geometry_draws(&renderer, 0), 4);
    assert_eq!(geometry_draws(&renderer, 1), 4);

    assert_eq!(renderer.cycle_render_mode().unwrap(), RenderMode::Wireframe);
    assert_eq!(geometry_draws(&renderer, 0), 2);
    let wireframe = renderer.graph().pipeline(PipelineVariant::Wireframe).unwrap();
    assert_eq!(bound_pipelines(&renderer, 0)[0], wireframe);

    assert_eq!(renderer.cycle_render_mode().unwrap(), start);
    assert_eq!(geometry_draws(&renderer, 0), 2);
    let solid = renderer.graph().pipeline(PipelineVariant::Solid).unwrap();
    assert_eq!(bound_pipelines(&renderer, 0)[0], solid);
}

#[test]
fn test_modes_fall_back_to_solid_without_wireframe_support() {
    let capabilities = DeviceCapabilities {
        wireframe: false,
        ..Default::default()
    };
    let gpu = HeadlessGpu::with_capabilities(EXTENT, 2, capabilities);
    let mut renderer = renderer_with(gpu, &RendererConfig::default());
    renderer.load_instance_pixels(&texture(), Transform::IDENTITY).unwrap();
    let solid = renderer.graph().pipeline(PipelineVariant::Solid).unwrap();

    for _ in 0..3 {
        renderer.cycle_render_mode().unwrap();
        assert_eq!(geometry_draws(&renderer, 0), 1);
        assert_eq!(bound_pipelines(&renderer, 0)[0], solid);
    }
}

#[test]
fn test_recording_layout() {
    let mut renderer = renderer(2);
    renderer.load_instance_pixels(&texture(), Transform::IDENTITY).unwrap();
    let cmd = renderer.recorder().command_buffer(1).unwrap();
    let commands = renderer.gpu().commands(cmd);

    match &commands[0] {
        Command::BeginRenderPass(begin) => {
            assert_eq!(begin.render_pass, renderer.graph().render_pass());
            assert_eq!(begin.clear_values.len(), 3);
            assert_eq!(begin.extent, EXTENT);
        }
        other => panic!("expected render pass begin, got {other:?}"),
    }
    let next = commands
        .iter()
        .position(|c| *c == Command::NextSubpass)
        .unwrap();
    assert!(commands[..next]
        .iter()
        .any(|c| matches!(c, Command::DrawIndexed { index_count: 6, instance_count: 1 })));
    assert_eq!(
        commands[next + 1],
        Command::BindPipeline(renderer.graph().pipeline(PipelineVariant::Composition).unwrap())
    );
    assert_eq!(
        commands[next + 2],
        Command::Draw {
            vertex_count: 3,
            instance_count: 1
        }
    );
    assert_eq!(commands.last(), Some(&Command::EndRenderPass));
}

#[test]
fn test_load_instance_appends_and_binds_texture() {
    let mut renderer = renderer(3);
    let first = Transform::from_position(Vec3::new(-1.0, 0.0, 0.0));
    let second = Transform::from_position(Vec3::new(1.0, 0.5, 0.0));

    assert_eq!(renderer.load_instance_pixels(&texture(), first).unwrap(), 0);
    let before = renderer.rebuild_count();
    assert_eq!(renderer.load_instance_pixels(&texture(), second).unwrap(), 1);

    assert_eq!(renderer.instance_count(), 2);
    assert_eq!(renderer.rebuild_count(), before + 1);
    let instances = renderer.registry().instances();
    assert_eq!(instances.get(0).unwrap().transform, first);
    assert_eq!(instances.get(1).unwrap().transform, second);

    let view = instances.get(1).unwrap().texture();
    for image in 0..renderer.registry().image_count() as u32 {
        let set = renderer.registry().descriptor_set(image).unwrap();
        assert_eq!(
            renderer.gpu().bound(set, BINDING_TEXTURES, 1),
            Some(BoundResource::SampledImage(view))
        );
        assert_eq!(geometry_draws(&renderer, image), 2);
    }
}

#[test]
fn test_capacity_exceeded_changes_nothing() {
    let mut config = RendererConfig::default();
    config.renderer.instance_capacity = 2;
    let mut renderer = renderer_with(HeadlessGpu::new(EXTENT, 2), &config);
    renderer.load_instance_pixels(&texture(), Transform::IDENTITY).unwrap();
    renderer.load_instance_pixels(&texture(), Transform::IDENTITY).unwrap();

    let textures = renderer.gpu().texture_count();
    let rebuilds = renderer.rebuild_count();
    renderer.gpu_mut().clear_events();

    let err = renderer
        .load_instance_pixels(&texture(), Transform::IDENTITY)
        .unwrap_err();
    assert!(matches!(err, RendererError::CapacityExceeded { capacity: 2 }));
    assert!(!err.is_fatal());

    // Checked before the path is touched.
    let err = renderer
        .load_instance("does/not/exist.png", Vec3::ZERO)
        .unwrap_err();
    assert!(matches!(err, RendererError::CapacityExceeded { .. }));

    assert_eq!(renderer.instance_count(), 2);
    assert_eq!(renderer.gpu().texture_count(), textures);
    assert_eq!(renderer.rebuild_count(), rebuilds);
    assert!(renderer.gpu().events().is_empty());
}

#[test]
fn test_missing_texture_is_reported() {
    let mut renderer = renderer(2);
    let err = renderer
        .load_instance("does/not/exist.png", Vec3::ZERO)
        .unwrap_err();
    assert!(matches!(err, RendererError::Resource(_)));
    assert_eq!(renderer.instance_count(), 0);
}

#[test]
fn test_stale_acquire_recreates_without_submitting() {
    let mut renderer = renderer(3);
    renderer.update().unwrap();
    renderer.update().unwrap();

    renderer.gpu_mut().set_next_image_count(4);
    renderer.gpu_mut().script_acquire([ScriptedAcquire::Stale]);
    renderer.gpu_mut().clear_events();

    assert_eq!(renderer.update().unwrap(), FrameStatus::Recreated);
    assert_eq!(renderer.frame_count(), 2);
    let events = renderer.gpu().events();
    assert!(!events.iter().any(|e| matches!(e, HeadlessEvent::Submit { .. })));
    assert!(events.contains(&HeadlessEvent::RecreateSwapchain { image_count: 4 }));

    assert_eq!(renderer.synchronizer().slot_count(), MAX_FRAMES_IN_FLIGHT);
    for image in 0..4 {
        assert_eq!(renderer.synchronizer().image_owner(image), None);
    }
    assert_eq!(renderer.registry().image_count(), 4);
    assert_eq!(renderer.recorder().command_buffer_count(), 4);

    for _ in 0..8 {
        assert_eq!(renderer.update().unwrap(), FrameStatus::Presented);
    }
    assert_eq!(renderer.gpu().image_races(), 0);
}

#[test]
fn test_stale_present_counts_the_frame_and_recreates() {
    let mut renderer = renderer(2);
    renderer.gpu_mut().script_present([PresentOutcome::Stale]);

    assert_eq!(renderer.update().unwrap(), FrameStatus::Recreated);
    assert_eq!(renderer.frame_count(), 1);
    assert_eq!(renderer.recreation_count(), 1);
    assert_eq!(renderer.update().unwrap(), FrameStatus::Presented);
}

#[test]
fn test_suboptimal_acquire_presents_then_recreates() {
    let mut renderer = renderer(3);
    renderer.update().unwrap();
    renderer.update().unwrap();

    renderer.gpu_mut().script_acquire([ScriptedAcquire::Suboptimal(2)]);
    renderer.gpu_mut().clear_events();
    assert_eq!(renderer.update().unwrap(), FrameStatus::Recreated);
    assert_eq!(renderer.frame_count(), 3);
    assert_eq!(renderer.recreation_count(), 1);

    let events = renderer.gpu().events();
    let present = events
        .iter()
        .position(|e| matches!(e, HeadlessEvent::Present { image_index: 2, .. }))
        .expect("suboptimal frame is still presented");
    let recreate = events
        .iter()
        .position(|e| matches!(e, HeadlessEvent::RecreateSwapchain { .. }))
        .expect("swapchain recreated");
    assert!(present < recreate);
    for image in 0..3 {
        assert_eq!(renderer.synchronizer().image_owner(image), None);
    }

    assert_eq!(renderer.update().unwrap(), FrameStatus::Presented);
    assert_eq!(renderer.gpu().image_races(), 0);
}

#[test]
fn test_failed_recreation_is_retried_by_next_update() {
    let mut renderer = renderer(3);
    renderer.update().unwrap();

    renderer.gpu_mut().fail_next_swapchain_recreate();
    renderer.gpu_mut().script_acquire([ScriptedAcquire::Stale]);
    let err = renderer.update().unwrap_err();
    assert!(matches!(err, RendererError::Rhi(_)));
    assert_eq!(renderer.recorder().command_buffer_count(), 0);

    assert!(matches!(
        renderer.cycle_render_mode(),
        Err(RendererError::SurfaceStale)
    ));
    assert_eq!(renderer.render_mode(), RenderMode::Solid);
    assert!(matches!(
        renderer.load_instance_pixels(&texture(), Transform::IDENTITY),
        Err(RendererError::SurfaceStale)
    ));
    assert_eq!(renderer.instance_count(), 0);

    renderer.gpu_mut().clear_events();
    assert_eq!(renderer.update().unwrap(), FrameStatus::Recreated);
    assert!(renderer
        .gpu()
        .events()
        .contains(&HeadlessEvent::RecreateSwapchain { image_count: 3 }));
    assert_eq!(renderer.recreation_count(), 1);
    assert_eq!(renderer.recorder().command_buffer_count(), 3);
    assert_eq!(renderer.update().unwrap(), FrameStatus::Presented);
    assert_eq!(renderer.cycle_render_mode().unwrap(), RenderMode::Both);

    renderer.shutdown().unwrap();
    let swapchain_views = renderer.gpu().swapchain().image_count();
    assert_eq!(renderer.gpu().live_objects(), swapchain_views);
    assert_eq!(renderer.gpu().invalid_destroys(), 0);
}

#[test]
fn test_frame_failing_after_acquire_is_abandoned() {
    let mut renderer = renderer(3);
    renderer.update().unwrap();
    let live = renderer.gpu().live_objects();

    // Slot 1 acquires the image slot 0 still renders, and slot 0 never retires.
    renderer.gpu_mut().set_hung(true);
    renderer.gpu_mut().script_acquire([ScriptedAcquire::Image(0)]);
    renderer.gpu_mut().clear_events();
    let err = renderer.update().unwrap_err();
    assert!(matches!(err, RendererError::DeviceUnresponsive { .. }));

    let events = renderer.gpu().events();
    assert!(events.iter().any(|e| matches!(e, HeadlessEvent::Acquire(_))));
    assert!(!events.iter().any(|e| matches!(e, HeadlessEvent::Submit { .. })));
    assert_eq!(renderer.synchronizer().slot_state(1), Some(SlotState::Idle));
    assert_eq!(renderer.gpu().live_objects(), live);
    assert_eq!(renderer.frame_count(), 1);

    renderer.gpu_mut().set_hung(false);
    assert_eq!(renderer.update().unwrap(), FrameStatus::Presented);
    assert_eq!(renderer.gpu().image_races(), 0);
}

#[test]
fn test_resize_is_deferred_and_zero_area_skips() {
    let mut renderer = renderer(2);
    renderer.update().unwrap();

    renderer.resize(0, 0);
    renderer.gpu_mut().clear_events();
    assert_eq!(renderer.update().unwrap(), FrameStatus::Skipped);
    assert!(renderer.gpu().events().is_empty());

    renderer.resize(800, 600);
    assert_eq!(renderer.update().unwrap(), FrameStatus::Recreated);
    assert_eq!(
        renderer.registry().extent(),
        vk::Extent2D {
            width: 800,
            height: 600
        }
    );
    assert_eq!(renderer.update().unwrap(), FrameStatus::Presented);

    assert!(matches!(
        renderer.recreate_surface(vk::Extent2D {
            width: 0,
            height: 10
        }),
        Err(RendererError::SurfaceStale)
    ));
}

#[test]
fn test_hung_device_reports_unresponsive() {
    let mut renderer = renderer(3);
    renderer.update().unwrap();
    renderer.update().unwrap();

    renderer.gpu_mut().set_hung(true);
    let err = renderer.update().unwrap_err();
    assert!(matches!(err, RendererError::DeviceUnresponsive { .. }));
    assert!(err.is_fatal());
    assert!(matches!(
        renderer.cycle_render_mode(),
        Err(RendererError::DeviceUnresponsive { .. })
    ));
    assert_eq!(renderer.render_mode(), RenderMode::Solid);

    renderer.gpu_mut().set_hung(false);
    assert_eq!(renderer.update().unwrap(), FrameStatus::Presented);
}

#[test]
fn test_shutdown_releases_everything() {
    let mut renderer = renderer(3);
    renderer.load_instance_pixels(&texture(), Transform::IDENTITY).unwrap();
    for _ in 0..5 {
        renderer.update().unwrap();
    }
    renderer.shutdown().unwrap();
    renderer.shutdown().unwrap();

    let swapchain_views = renderer.gpu().swapchain().image_count();
    assert_eq!(renderer.gpu().live_objects(), swapchain_views);
    assert_eq!(renderer.gpu().invalid_destroys(), 0);
}

struct CountingOverlay;

impl OverlayPainter for CountingOverlay {
    fn record(&mut self, gpu: &mut dyn Gpu, cmd: vk::CommandBuffer, _extent: vk::Extent2D) {
        gpu.cmd_draw(cmd, 6, 1, 0, 0);
    }
}

#[test]
fn test_overlay_pass_follows_composition() {
    let mut config = RendererConfig::default();
    config.renderer.overlay = true;
    let mut renderer = renderer_with(HeadlessGpu::new(EXTENT, 2), &config);
    renderer.set_overlay_painter(Box::new(CountingOverlay)).unwrap();

    let overlay_pass = renderer.graph().overlay_pass().unwrap();
    let cmd = renderer.recorder().command_buffer(0).unwrap();
    let commands = renderer.gpu().commands(cmd);
    let begins: Vec<&Command> = commands
        .iter()
        .filter(|c| matches!(c, Command::BeginRenderPass(_)))
        .collect();
    assert_eq!(begins.len(), 2);
    match begins[1] {
        Command::BeginRenderPass(begin) => {
            assert_eq!(begin.render_pass, overlay_pass);
            assert!(begin.clear_values.is_empty());
        }
        _ => unreachable!(),
    }
    let n = commands.len();
    assert_eq!(
        commands[n - 2],
        Command::Draw {
            vertex_count: 6,
            instance_count: 1
        }
    );
    assert_eq!(commands[n - 1], Command::EndRenderPass);

    for _ in 0..4 {
        renderer.update().unwrap();
    }
}
