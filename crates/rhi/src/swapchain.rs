//! Swapchain creation, recreation, acquire and present.
//!
//! Staleness (`ERROR_OUT_OF_DATE_KHR`, or `SUBOPTIMAL_KHR` on present) is
//! reported as [`AcquireOutcome::Stale`] / [`PresentOutcome::Stale`] rather
//! than as an error: it is the normal trigger for a rebuild.

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, warn};

use crate::backend::{AcquireOutcome, PresentOutcome, SwapchainInfo};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::surface::Surface;
use crate::sync::timeout_nanos;

/// What a surface supports on one physical device.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// # Errors
    ///
    /// Returns an error if any surface query fails.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Surface support: {} format(s), {} present mode(s), images {}..{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// At least one format and one present mode.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// The presentable images of a surface and their views.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    info: SwapchainInfo,
    prefer_mailbox: bool,
}

impl Swapchain {
    /// Creates a swapchain sized from the surface, or from `extent` when the
    /// surface leaves the size to the application.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] if the surface offers no format or
    /// present mode, or the Vulkan error if creation fails.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: &Surface,
        extent: vk::Extent2D,
        prefer_mailbox: bool,
    ) -> RhiResult<Self> {
        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        Self::create(
            device,
            loader,
            surface,
            extent,
            prefer_mailbox,
            vk::SwapchainKHR::null(),
        )
    }

    fn create(
        device: Arc<Device>,
        loader: ash::khr::swapchain::Device,
        surface: &Surface,
        requested: vk::Extent2D,
        prefer_mailbox: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<Self> {
        let support = SwapchainSupportDetails::query(
            device.physical_device(),
            surface.handle(),
            surface.loader(),
        )?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "surface offers no format or present mode".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes, prefer_mailbox);
        let extent = choose_extent(&support.capabilities, requested);
        let image_count = determine_image_count(&support.capabilities);

        let families = device.queue_families();
        let graphics_family = families.graphics_family.ok_or(RhiError::NoSuitableGpu)?;
        let present_family = families.present_family.ok_or(RhiError::NoSuitableGpu)?;
        let family_indices = [graphics_family, present_family];
        let (sharing_mode, shared_families) = if graphics_family != present_family {
            (vk::SharingMode::CONCURRENT, &family_indices[..])
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };

        // Views are pushed into `this` one by one so `Drop` cleans up a partial set.
        let mut this = Self {
            device,
            loader,
            swapchain,
            images,
            info: SwapchainInfo {
                format: surface_format.format,
                extent,
                image_views: Vec::new(),
            },
            prefer_mailbox,
        };
        for i in 0..this.images.len() {
            let view = create_image_view(&this.device, this.images[i], surface_format.format)?;
            this.info.image_views.push(view);
        }

        info!(
            "Swapchain created: {}x{}, {:?}, {:?}, {} image(s)",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            this.images.len()
        );

        Ok(this)
    }

    /// Replaces this swapchain with a new one for `extent`.
    ///
    /// The caller must have idled the device and released every object that
    /// references the current image views.
    ///
    /// # Errors
    ///
    /// Returns an error if the new swapchain cannot be created; the old one is
    /// kept in that case.
    pub fn recreate(&mut self, surface: &Surface, extent: vk::Extent2D) -> RhiResult<()> {
        let replacement = Self::create(
            self.device.clone(),
            self.loader.clone(),
            surface,
            extent,
            self.prefer_mailbox,
            self.swapchain,
        )?;
        // Dropping the old value retires the old swapchain and its views.
        drop(std::mem::replace(self, replacement));
        Ok(())
    }

    /// Acquires the next image, signaling `semaphore` when it is ready.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`] if no image becomes available in time.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                timeout_nanos(timeout),
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(RhiError::Timeout(timeout)),
            Err(e) => Err(e.into()),
        }
    }

    /// Queues `image_index` for presentation after `wait` signals.
    ///
    /// # Errors
    ///
    /// Returns the Vulkan error for anything other than staleness.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RhiResult<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn info(&self) -> &SwapchainInfo {
        &self.info
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        for &view in &self.info.image_views {
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
        unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
        debug!(
            "Swapchain destroyed ({}x{}, {} image(s))",
            self.info.extent.width,
            self.info.extent.height,
            self.images.len()
        );
    }
}

/// Prefers `B8G8R8A8_SRGB`, then `B8G8R8A8_UNORM`, then whatever comes first.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> RhiResult<vk::SurfaceFormatKHR> {
    let find = |format: vk::Format| {
        formats
            .iter()
            .copied()
            .find(|f| f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
    };

    if let Some(format) = find(vk::Format::B8G8R8A8_SRGB) {
        return Ok(format);
    }
    if let Some(format) = find(vk::Format::B8G8R8A8_UNORM) {
        warn!("B8G8R8A8_SRGB unavailable, using B8G8R8A8_UNORM");
        return Ok(format);
    }
    let first = formats.first().copied().ok_or_else(|| {
        RhiError::SwapchainError("surface reports no formats".to_string())
    })?;
    warn!("Using first available surface format {:?}", first.format);
    Ok(first)
}

/// FIFO unless mailbox is preferred and offered. FIFO is always supported.
fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    prefer_mailbox: bool,
) -> vk::PresentModeKHR {
    if prefer_mailbox && present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Uses the surface's current extent unless it is the `u32::MAX` sentinel,
/// in which case `requested` is clamped to the surface limits.
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, requested: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
) -> RhiResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1),
        );

    unsafe {
        device
            .handle()
            .create_image_view(&create_info, None)
            .map_err(|e| RhiError::SwapchainError(format!("failed to create image view: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = [
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_fallbacks() {
        let formats = [surface_format(vk::Format::R8G8B8A8_UNORM)];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..Default::default()
        };
        let extent = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 640,
                height: 480,
            },
        );
        assert_eq!((extent.width, extent.height), (1280, 720));
    }

    #[test]
    fn test_choose_extent_clamps_sentinel() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let small = choose_extent(&capabilities, vk::Extent2D { width: 10, height: 10 });
        assert_eq!((small.width, small.height), (100, 100));

        let large = choose_extent(
            &capabilities,
            vk::Extent2D {
                width: 4000,
                height: 4000,
            },
        );
        assert_eq!((large.width, large.height), (1920, 1080));
    }

    #[test]
    fn test_determine_image_count() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capped), 2);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unbounded), 3);
    }

    #[test]
    fn test_support_adequacy() {
        let support = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![surface_format(vk::Format::B8G8R8A8_SRGB)],
            present_modes: vec![],
        };
        assert!(!support.is_adequate());
    }
}
