//! Multi-pass renderer core.
//!
//! - [`FrameSynchronizer`]: frames in flight and per-image ownership
//! - [`RenderGraph`]: the two-subpass main pass, optional overlay pass, pipelines
//! - [`ResourceRegistry`]: buffers, images, descriptor sets, framebuffers, instances
//! - [`CommandRecorder`]: one prerecorded command buffer per swapchain image
//! - [`Renderer`]: the frame loop tying them together over any [`Gpu`](renderer_rhi::Gpu)

mod error;

pub mod assets;
pub mod frame_sync;
pub mod overlay;
pub mod recorder;
pub mod registry;
pub mod render_graph;
pub mod renderer;
pub mod ubo;

pub use assets::RendererAssets;
pub use error::{RendererError, RendererResult};
pub use frame_sync::{FrameStart, FrameSynchronizer, FrameTicket, SlotState};
pub use overlay::{NoOverlay, OverlayPainter};
pub use recorder::{CommandRecorder, RenderMode};
pub use registry::{Instance, InstanceTable, ResourceRegistry};
pub use render_graph::{PipelineVariant, RenderGraph};
pub use renderer::{FrameStatus, Renderer};

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
