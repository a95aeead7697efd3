//! Semaphore and fence wrappers.
//!
//! - [`Semaphore`] orders GPU work against GPU work (acquire → render → present).
//! - [`Fence`] lets the host observe that a submission retired.
//!
//! Every host wait is bounded. A fence that fails to signal within the caller's
//! timeout yields [`RhiError::Timeout`] instead of blocking forever, which is
//! how a lost or hung device becomes visible to the frame loop.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Converts a timeout to the nanosecond count Vulkan expects, saturating.
pub fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Vulkan semaphore wrapper.
///
/// Created unsignaled; destroyed on drop.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new binary semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created semaphore {:?}", semaphore);

        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed semaphore {:?}", self.semaphore);
    }
}

/// Vulkan fence wrapper.
///
/// Fences guard reuse of per-frame resources: a frame slot's command buffer,
/// uniform memory and semaphores may only be touched again once the fence of
/// the submission that used them has signaled.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `signaled` - Create in the signaled state, so the first wait returns at once
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        debug!(
            "Created fence {:?} ({})",
            fence,
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Waits for the fence, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`] if the fence did not signal in time, or the
    /// underlying Vulkan error (e.g. `ERROR_DEVICE_LOST`).
    pub fn wait(&self, timeout: Duration) -> RhiResult<()> {
        wait_for_fence(&self.device, self.fence, timeout)
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// The fence must not be pending on any queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset operation fails.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
        debug!("Destroyed fence {:?}", self.fence);
    }
}

/// Bounded `vkWaitForFences` on a single fence.
pub(crate) fn wait_for_fence(device: &Device, fence: vk::Fence, timeout: Duration) -> RhiResult<()> {
    let fences = [fence];
    let result = unsafe {
        device
            .handle()
            .wait_for_fences(&fences, true, timeout_nanos(timeout))
    };

    match result {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(RhiError::Timeout(timeout)),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_nanos() {
        assert_eq!(timeout_nanos(Duration::from_millis(5)), 5_000_000);
        assert_eq!(timeout_nanos(Duration::ZERO), 0);
        assert_eq!(timeout_nanos(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_semaphore_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
    }

    #[test]
    fn test_fence_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fence>();
    }
}
