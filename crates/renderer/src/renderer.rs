//! Frame-loop facade.
//!
//! [`Renderer`] owns a [`Gpu`] backend and everything built on it. Each call to
//! [`Renderer::update`] runs one frame:
//!
//! ```text
//! pending resize or
//! failed recreation? ──► recreate surface
//! begin_frame      ──► wait slot fence, acquire image   (stale ─► recreate)
//! track_image      ──► wait the image's previous owner
//! write uniforms   ──► camera view-projection and time
//! submit_and_present ► prerecorded command buffer       (stale/suboptimal ─► recreate)
//! ```
//!
//! # Resource Destruction Order
//!
//! Command buffers, then the resource registry, then the render graph, then the
//! frame slots. The backend itself goes last when the renderer is dropped.

use std::path::Path;
use std::time::Duration;

use ash::vk;
use glam::Vec3;
use tracing::{debug, error, info, warn};

use renderer_core::Timer;
use renderer_core::config::RendererConfig;
use renderer_resources::TexturePixels;
use renderer_rhi::{Gpu, PresentOutcome};
use renderer_scene::{Camera, OrbitController, Transform};

use crate::assets::RendererAssets;
use crate::error::{RendererError, RendererResult};
use crate::frame_sync::{FrameStart, FrameSynchronizer, FrameTicket};
use crate::overlay::{NoOverlay, OverlayPainter};
use crate::recorder::{CommandRecorder, RecordContext, RenderMode};
use crate::registry::ResourceRegistry;
use crate::render_graph::RenderGraph;

/// What one call to [`Renderer::update`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was submitted and queued for presentation.
    Presented,
    /// The surface has no area; nothing was done.
    Skipped,
    /// The surface was stale or suboptimal and has been rebuilt.
    Recreated,
}

pub struct Renderer<G: Gpu> {
    gpu: G,
    sync: FrameSynchronizer,
    graph: RenderGraph,
    registry: ResourceRegistry,
    recorder: CommandRecorder,
    overlay: Box<dyn OverlayPainter>,
    camera: Camera,
    orbit: OrbitController,
    timer: Timer,
    extent: vk::Extent2D,
    pending_extent: Option<vk::Extent2D>,
    /// Set while swapchain-dependent state is torn down and not yet rebuilt.
    needs_recreate: bool,
    recreations: u64,
    shut_down: bool,
}

impl<G: Gpu> Renderer<G> {
    /// Builds frame slots, the render graph, the resource registry and the
    /// initial command buffers on top of `gpu`.
    ///
    /// # Errors
    ///
    /// Returns an error if any stage fails; stages already built are destroyed.
    pub fn new(mut gpu: G, config: &RendererConfig, assets: &RendererAssets) -> RendererResult<Self> {
        let swapchain = gpu.swapchain().clone();
        if swapchain.image_count() == 0 {
            return Err(RendererError::Init("swapchain has no images".into()));
        }
        let timeout = Duration::from_millis(config.renderer.fence_timeout_ms);

        let mut sync = FrameSynchronizer::new(&mut gpu, swapchain.image_count(), timeout)?;

        let mut graph = match RenderGraph::new(&mut gpu, assets, config.renderer.overlay) {
            Ok(graph) => graph,
            Err(e) => {
                sync.destroy(&mut gpu);
                return Err(e);
            }
        };

        let mut registry = match ResourceRegistry::new(
            &mut gpu,
            &graph,
            &swapchain,
            &assets.default_texture,
            config.instance_capacity() as usize,
        ) {
            Ok(registry) => registry,
            Err(e) => {
                graph.destroy(&mut gpu);
                sync.destroy(&mut gpu);
                return Err(e);
            }
        };

        let mut overlay: Box<dyn OverlayPainter> = Box::new(NoOverlay);
        let recorder = CommandRecorder::new(
            &mut gpu,
            swapchain.image_count(),
            RenderMode::default(),
            config.renderer.clear_color,
        )
        .and_then(|mut recorder| {
            let ctx = RecordContext {
                graph: &graph,
                registry: &registry,
                overlay: overlay.as_mut(),
            };
            match recorder.rebuild_all(&mut gpu, ctx) {
                Ok(()) => Ok(recorder),
                Err(e) => {
                    recorder.free(&mut gpu);
                    Err(e)
                }
            }
        });
        let recorder = match recorder {
            Ok(recorder) => recorder,
            Err(e) => {
                registry.destroy(&mut gpu);
                graph.destroy(&mut gpu);
                sync.destroy(&mut gpu);
                return Err(e);
            }
        };

        let mut camera = Camera::default();
        camera.set_viewport(swapchain.extent.width, swapchain.extent.height);

        info!(
            "Renderer ready: {} swapchain image(s), {} frame slot(s), {} mode",
            swapchain.image_count(),
            sync.slot_count(),
            recorder.mode()
        );

        Ok(Self {
            gpu,
            sync,
            graph,
            registry,
            recorder,
            overlay,
            camera,
            orbit: OrbitController::default(),
            timer: Timer::new(),
            extent: swapchain.extent,
            pending_extent: None,
            needs_recreate: false,
            recreations: 0,
            shut_down: false,
        })
    }

    /// Runs one frame.
    ///
    /// # Errors
    ///
    /// [`RendererError::DeviceUnresponsive`] when a bounded wait expires; other
    /// errors when recording, submission or surface recreation fails. A frame
    /// that fails after its image was acquired is abandoned, and a failed
    /// surface recreation is retried by the next call, so the renderer stays
    /// usable once the cause clears.
    pub fn update(&mut self) -> RendererResult<FrameStatus> {
        if let Some(extent) = self.pending_extent {
            if extent.width == 0 || extent.height == 0 {
                return Ok(FrameStatus::Skipped);
            }
            self.pending_extent = None;
            if extent != self.registry.extent() {
                self.recreate_surface(extent)?;
                return Ok(FrameStatus::Recreated);
            }
        }
        if self.needs_recreate {
            self.recreate_surface(self.extent)?;
            return Ok(FrameStatus::Recreated);
        }

        let ticket = match self.sync.begin_frame(&mut self.gpu)? {
            FrameStart::Ready(ticket) => ticket,
            FrameStart::Stale => {
                self.recreate_surface(self.extent)?;
                return Ok(FrameStatus::Recreated);
            }
        };

        let cmd = match self.prepare_frame(&ticket) {
            Ok(cmd) => cmd,
            Err(e) => {
                if let Err(abandon) = self.sync.abandon_frame(&mut self.gpu, &ticket) {
                    warn!("Could not release the abandoned frame: {}", abandon);
                }
                return Err(e);
            }
        };
        let outcome = self.sync.submit_and_present(&mut self.gpu, &ticket, cmd)?;
        self.timer.tick();

        if outcome == PresentOutcome::Stale || ticket.suboptimal {
            self.recreate_surface(self.extent)?;
            return Ok(FrameStatus::Recreated);
        }
        Ok(FrameStatus::Presented)
    }

    /// Claims the acquired image, writes its uniforms and picks its command buffer.
    fn prepare_frame(&mut self, ticket: &FrameTicket) -> RendererResult<vk::CommandBuffer> {
        self.sync.track_image(&mut self.gpu, ticket)?;

        self.orbit.apply(&mut self.camera);
        self.registry.update_frame_uniforms(
            &mut self.gpu,
            ticket.image_index,
            self.camera.view_projection_matrix(),
            self.timer.elapsed_secs(),
        )?;

        self.recorder.command_buffer(ticket.image_index).ok_or_else(|| {
            RendererError::Init(format!(
                "no command buffer for swapchain image {}",
                ticket.image_index
            ))
        })
    }

    /// Rebuilds everything that depends on the swapchain.
    ///
    /// Idles the device, frees command buffers and per-image resources, then
    /// rebuilds swapchain, render graph, per-image resources and command
    /// buffers in that order. The frame slot count is unchanged; the image
    /// ownership map starts empty.
    ///
    /// # Errors
    ///
    /// [`RendererError::SurfaceStale`] for a zero-area `extent`, with nothing
    /// released. Any failure after the old state was released leaves the
    /// renderer without swapchain resources: [`update`](Self::update) retries
    /// the recreation, and mutations return [`RendererError::SurfaceStale`]
    /// until it succeeds.
    pub fn recreate_surface(&mut self, extent: vk::Extent2D) -> RendererResult<()> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RendererError::SurfaceStale);
        }
        info!("Recreating surface at {}x{}", extent.width, extent.height);
        self.gpu.wait_idle()?;

        self.needs_recreate = true;
        self.recorder.free(&mut self.gpu);
        self.registry.release_per_image(&mut self.gpu);
        self.graph.release(&mut self.gpu);

        let swapchain = self.gpu.recreate_swapchain(extent)?;
        self.graph.rebuild(&mut self.gpu, swapchain.format)?;
        self.registry
            .build_per_image(&mut self.gpu, &self.graph, &swapchain)?;
        self.recorder
            .reallocate(&mut self.gpu, swapchain.image_count())?;
        self.recorder.rebuild_all(
            &mut self.gpu,
            RecordContext {
                graph: &self.graph,
                registry: &self.registry,
                overlay: self.overlay.as_mut(),
            },
        )?;
        self.sync.on_swapchain_recreated(swapchain.image_count());
        self.needs_recreate = false;

        self.extent = swapchain.extent;
        self.camera
            .set_viewport(swapchain.extent.width, swapchain.extent.height);
        self.recreations += 1;
        debug!(
            "Surface recreated with {} image(s) ({} recreation(s) so far)",
            swapchain.image_count(),
            self.recreations
        );
        Ok(())
    }

    /// Records a new window size; the surface is rebuilt on the next update.
    /// A zero-area size pauses rendering until a non-zero size arrives.
    pub fn resize(&mut self, width: u32, height: u32) {
        let extent = vk::Extent2D { width, height };
        if self.pending_extent != Some(extent) {
            debug!("Resize requested: {}x{}", width, height);
        }
        self.pending_extent = Some(extent);
        if width > 0 && height > 0 {
            self.extent = extent;
        }
    }

    /// Advances wireframe → solid → both and re-records every command buffer.
    pub fn cycle_render_mode(&mut self) -> RendererResult<RenderMode> {
        self.ensure_surface()?;
        self.recorder.cycle_render_mode(
            &mut self.gpu,
            RecordContext {
                graph: &self.graph,
                registry: &self.registry,
                overlay: self.overlay.as_mut(),
            },
        )
    }

    /// Loads a texture from disk and adds a quad instance at `position`.
    ///
    /// # Errors
    ///
    /// [`RendererError::CapacityExceeded`] when the table is full, checked
    /// before the file is read. [`RendererError::Resource`] when the file is
    /// missing or cannot be decoded. No state changes on error.
    pub fn load_instance(&mut self, path: impl AsRef<Path>, position: Vec3) -> RendererResult<u32> {
        self.ensure_surface()?;
        self.registry.instances().next_slot()?;
        let texture = TexturePixels::load(path.as_ref())?;
        self.load_instance_pixels(&texture, Transform::from_position(position))
    }

    /// Adds a quad instance textured with already decoded pixels.
    pub fn load_instance_pixels(
        &mut self,
        texture: &TexturePixels,
        transform: Transform,
    ) -> RendererResult<u32> {
        self.ensure_surface()?;
        let slot = self.registry.add_instance(&mut self.gpu, texture, transform)?;
        self.recorder.rebuild_all(
            &mut self.gpu,
            RecordContext {
                graph: &self.graph,
                registry: &self.registry,
                overlay: self.overlay.as_mut(),
            },
        )?;
        Ok(slot)
    }

    /// Replaces the overlay painter and re-records so its draws take effect.
    pub fn set_overlay_painter(&mut self, painter: Box<dyn OverlayPainter>) -> RendererResult<()> {
        if !self.graph.overlay_enabled() {
            warn!("Overlay painter set but the overlay pass is disabled");
        }
        self.overlay = painter;
        if self.needs_recreate {
            // Recorded with the new painter once the surface is rebuilt.
            return Ok(());
        }
        self.gpu.wait_idle()?;
        self.recorder.rebuild_all(
            &mut self.gpu,
            RecordContext {
                graph: &self.graph,
                registry: &self.registry,
                overlay: self.overlay.as_mut(),
            },
        )
    }

    fn ensure_surface(&self) -> RendererResult<()> {
        if self.needs_recreate {
            return Err(RendererError::SurfaceStale);
        }
        Ok(())
    }

    /// Sets the orbit angle around the scene origin, in radians.
    pub fn set_camera_angle(&mut self, radians: f32) {
        self.orbit.angle = radians.rem_euclid(std::f32::consts::TAU);
    }

    pub fn rotate_camera(&mut self, delta: f32) {
        self.orbit.rotate(delta);
    }

    #[inline]
    pub fn camera_angle(&self) -> f32 {
        self.orbit.angle
    }

    #[inline]
    pub fn render_mode(&self) -> RenderMode {
        self.recorder.mode()
    }

    #[inline]
    pub fn instance_count(&self) -> usize {
        self.registry.instances().len()
    }

    /// Frames submitted so far.
    #[inline]
    pub fn frame_count(&self) -> u64 {
        self.sync.frame_counter()
    }

    /// Times the command buffers were re-recorded, including the initial recording.
    #[inline]
    pub fn rebuild_count(&self) -> u64 {
        self.recorder.rebuild_count()
    }

    #[inline]
    pub fn recreation_count(&self) -> u64 {
        self.recreations
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    /// Direct backend access, mainly for scripting a test device.
    #[inline]
    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    #[inline]
    pub fn synchronizer(&self) -> &FrameSynchronizer {
        &self.sync
    }

    #[inline]
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    #[inline]
    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    #[inline]
    pub fn recorder(&self) -> &CommandRecorder {
        &self.recorder
    }

    /// Waits for every frame slot, idles the device and destroys everything
    /// except the backend.
    ///
    /// Destruction runs even if a wait fails; the wait's error is returned
    /// afterwards. Later calls do nothing.
    pub fn shutdown(&mut self) -> RendererResult<()> {
        if self.shut_down {
            return Ok(());
        }
        let idle = self
            .sync
            .wait_all(&mut self.gpu)
            .and_then(|()| self.gpu.wait_idle().map_err(RendererError::from));
        if let Err(e) = &idle {
            warn!("Device did not idle before shutdown: {}", e);
        }

        self.recorder.free(&mut self.gpu);
        self.registry.destroy(&mut self.gpu);
        self.graph.destroy(&mut self.gpu);
        self.sync.destroy(&mut self.gpu);
        self.shut_down = true;

        info!("Renderer shut down after {} frame(s)", self.frame_count());
        idle
    }
}

impl<G: Gpu> Drop for Renderer<G> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Renderer shutdown failed: {}", e);
        }
    }
}
