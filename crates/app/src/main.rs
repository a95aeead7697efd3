//! Subpass renderer viewer.
//!
//! Usage: `renderer [config.toml]` (defaults to `renderer.toml`, falling back
//! to built-in defaults when the file is absent).
//!
//! Keys: Space cycles the render mode, L loads the next queued instance,
//! A/D orbit the camera, Escape quits.
//!
//! The SPIR-V binaries are not checked in. Run `assets/shaders/compile.sh`
//! (needs `glslc`) before the first launch; until then startup fails with a
//! resource error naming the missing `.spv` file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use glam::Vec3;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::window::WindowId;

use renderer_core::config::PresentModePreference;
use renderer_core::RendererConfig;
use renderer_platform::{Action, InputState, Window};
use renderer_renderer::{Renderer, RendererAssets, RendererError};
use renderer_rhi::context::{VulkanGpu, VulkanSettings};
use renderer_rhi::vk;

const DEFAULT_CONFIG_PATH: &str = "renderer.toml";

/// Orbit step per frame while A or D is held, in radians.
const ORBIT_STEP: f32 = 0.1;

struct App {
    config: RendererConfig,
    // Declared before the window so it drops first.
    renderer: Option<Renderer<VulkanGpu>>,
    window: Option<Window>,
    input: InputState,
    next_instance: usize,
}

impl App {
    fn new(config: RendererConfig) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            input: InputState::new(),
            next_instance: 0,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, &self.config.window)?;
        let (display, handle) = window.raw_handles()?;
        let (width, height) = window.size();

        let settings = VulkanSettings {
            application_name: self.config.window.title.clone(),
            enable_validation: self.config.renderer.validation,
            prefer_mailbox: self.config.renderer.present_mode == PresentModePreference::Mailbox,
            upload_timeout: std::time::Duration::from_millis(self.config.renderer.fence_timeout_ms),
        };
        let gpu = VulkanGpu::new(display, handle, vk::Extent2D { width, height }, &settings)
            .context("failed to initialize Vulkan")?;

        let assets = RendererAssets::load(&self.config.assets).context("failed to load assets")?;
        let renderer = Renderer::new(gpu, &self.config, &assets)?;

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn on_action(&mut self, action: Action, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        let result = match action {
            Action::Exit => {
                info!("Escape pressed, shutting down");
                event_loop.exit();
                return;
            }
            Action::CycleRenderMode => renderer.cycle_render_mode().map(|_| ()),
            Action::LoadNextInstance => {
                let queue = &self.config.assets.load_queue;
                if queue.is_empty() {
                    info!("No instances configured in assets.load_queue");
                    return;
                }
                let entry = &queue[self.next_instance % queue.len()];
                let result = renderer.load_instance(&entry.path, Vec3::from(entry.position));
                if result.is_ok() {
                    self.next_instance += 1;
                }
                result.map(|_| ())
            }
        };
        self.report(result, event_loop);
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        let axis = self.input.orbit_axis();
        if axis != 0.0 {
            renderer.rotate_camera(axis * ORBIT_STEP);
        }
        let result = renderer.update().map(|_| ());
        self.report(result, event_loop);
    }

    fn report(&self, result: std::result::Result<(), RendererError>, event_loop: &ActiveEventLoop) {
        match result {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                error!("Fatal renderer error: {}", e);
                event_loop.exit();
            }
            Err(e) => warn!("{}", e),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok(()) => info!("Initialization complete, entering main loop"),
            Err(e) => {
                error!("Initialization failed: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(key) = event.physical_key else {
                    return;
                };
                if event.state.is_pressed() {
                    if let Some(action) = self.input.on_key_pressed(key) {
                        self.on_action(action, event_loop);
                    }
                } else {
                    self.input.on_key_released(key);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        self.input.begin_frame();
        if let Some(window) = &self.window
            && !window.is_minimized()
        {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut renderer) = self.renderer.take()
            && let Err(e) = renderer.shutdown()
        {
            error!("Renderer shutdown failed: {}", e);
        }
    }
}

fn main() -> Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let (config, config_error) = RendererConfig::load_or_default(&config_path);

    renderer_core::init_logging(&config.logging.level);
    if let Some(e) = config_error {
        warn!("{}; using default configuration", e);
    }
    info!("Starting renderer with config {}", config_path.display());

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(())
}
