//! Render hardware interface.
//!
//! The renderer talks to the GPU exclusively through the [`Gpu`] trait. Two
//! implementations live here:
//! - [`context::VulkanGpu`], built on `ash` and `gpu-allocator`
//! - [`headless::HeadlessGpu`], an in-memory device that simulates fences and
//!   records every submission, used to exercise frame ordering without hardware
//!
//! The remaining modules are the thin Vulkan wrappers `VulkanGpu` is assembled from.

mod error;

pub mod backend;
pub mod buffer;
pub mod command;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod headless;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use backend::{AcquireOutcome, FrameSubmit, Gpu, PresentOutcome, SwapchainInfo};
pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
