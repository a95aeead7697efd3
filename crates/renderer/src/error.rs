//! Renderer error kinds.

use std::time::Duration;

use renderer_resources::ResourceError;
use renderer_rhi::RhiError;
use thiserror::Error;

/// Errors surfaced by the frame loop and resource mutation.
#[derive(Error, Debug)]
pub enum RendererError {
    /// Startup could not produce a usable renderer.
    #[error("renderer initialization failed: {0}")]
    Init(String),

    /// The surface cannot back a swapchain right now, e.g. a zero-area window
    /// or a recreation that failed and waits for the next update.
    /// Stale acquires and presents are recovered inside
    /// [`Renderer::update`](crate::Renderer::update) without surfacing this.
    #[error("surface is stale and must be recreated")]
    SurfaceStale,

    /// The instance table is full.
    #[error("instance table is full ({capacity} slots)")]
    CapacityExceeded { capacity: usize },

    /// A bounded GPU wait expired or the device was lost.
    #[error("GPU did not respond within {waited:?}")]
    DeviceUnresponsive { waited: Duration },

    /// A shader or texture could not be read or decoded.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Rhi(RhiError),
}

impl From<RhiError> for RendererError {
    fn from(e: RhiError) -> Self {
        match e {
            RhiError::Timeout(waited) => RendererError::DeviceUnresponsive { waited },
            e if e.is_device_unresponsive() => RendererError::DeviceUnresponsive {
                waited: Duration::ZERO,
            },
            e => RendererError::Rhi(e),
        }
    }
}

impl RendererError {
    /// Errors the frame loop cannot recover from.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            RendererError::SurfaceStale
                | RendererError::CapacityExceeded { .. }
                | RendererError::Resource(_)
        )
    }
}

/// Result type alias for renderer operations.
pub type RendererResult<T> = std::result::Result<T, RendererError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn test_timeout_maps_to_device_unresponsive() {
        let err: RendererError = RhiError::Timeout(Duration::from_millis(250)).into();
        assert!(matches!(
            err,
            RendererError::DeviceUnresponsive { waited } if waited == Duration::from_millis(250)
        ));
    }

    #[test]
    fn test_device_lost_maps_to_device_unresponsive() {
        let err: RendererError = RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST).into();
        assert!(matches!(err, RendererError::DeviceUnresponsive { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_capacity_is_recoverable() {
        let err = RendererError::CapacityExceeded { capacity: 64 };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "instance table is full (64 slots)");
    }
}
