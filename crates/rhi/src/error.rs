//! RHI-specific error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the render hardware interface.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// No physical device satisfies the renderer's requirements
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// A bounded wait on a fence or acquire elapsed without a signal
    #[error("GPU wait timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid SPIR-V or shader module creation failure
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Surface creation or query error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain creation error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// A handle that this backend does not own
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Render pass or pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RhiError {
    /// Returns true for errors that mean the device stopped answering.
    pub fn is_device_unresponsive(&self) -> bool {
        matches!(
            self,
            RhiError::Timeout(_) | RhiError::VulkanError(ash::vk::Result::ERROR_DEVICE_LOST)
        )
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
