//! Device-local images and samplers.
//!
//! Two kinds of image exist in the renderer:
//! - sampled textures, uploaded once through a staging buffer
//! - attachments (offscreen color, depth), sized to the swapchain and rebuilt with it

use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error, info};

use crate::buffer::{Buffer, BufferUsage};
use crate::command::CommandPool;
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::physical_device::DeviceCapabilities;

/// Format every texture is uploaded in.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Tightly packed RGBA8 pixels to upload.
#[derive(Clone, Copy, Debug)]
pub struct TextureDesc<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a [u8],
    pub label: &'a str,
}

impl TextureDesc<'_> {
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// Checks that the dimensions are non-zero and match the pixel data.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] describing the mismatch.
    pub fn validate(&self) -> RhiResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "texture '{}' has zero size {}x{}",
                self.label, self.width, self.height
            )));
        }
        let expected = self.width as usize * self.height as usize * 4;
        if self.pixels.len() != expected {
            return Err(RhiError::InvalidHandle(format!(
                "texture '{}' has {} bytes of pixels, expected {}",
                self.label,
                self.pixels.len(),
                expected
            )));
        }
        Ok(())
    }
}

/// An attachment image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTargetDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

impl RenderTargetDesc {
    /// Color target written by one subpass and read by a later one.
    pub fn input_color(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::INPUT_ATTACHMENT,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    pub fn depth(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
        }
    }
}

/// Sampler parameters. Filtering is linear with repeat addressing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplerDesc {
    /// Maximum anisotropy, or `None` to disable anisotropic filtering.
    pub anisotropy: Option<f32>,
}

impl SamplerDesc {
    /// Enables the device's maximum anisotropy when the feature is present.
    pub fn for_capabilities(capabilities: &DeviceCapabilities) -> Self {
        let anisotropy = capabilities
            .sampler_anisotropy
            .then_some(capabilities.max_sampler_anisotropy as f32);
        Self { anisotropy }
    }
}

/// A `VkImage`, its single view and its GPU-only allocation.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    extent: vk::Extent2D,
}

impl Image {
    /// Creates an attachment image in `UNDEFINED` layout.
    ///
    /// # Errors
    ///
    /// Returns an error for a zero extent or if image, memory or view creation fails.
    pub fn new_render_target(device: Arc<Device>, desc: &RenderTargetDesc) -> RhiResult<Self> {
        Self::create(
            device,
            desc.extent,
            desc.format,
            desc.usage,
            desc.aspect,
            "render_target",
        )
    }

    /// Creates a sampled texture and uploads `desc.pixels` into it.
    ///
    /// The upload is recorded on `upload_pool` and waited for (bounded by
    /// `timeout`) before returning; the image ends in `SHADER_READ_ONLY_OPTIMAL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the description is invalid, any allocation fails, or
    /// the upload does not complete within `timeout`.
    pub fn new_texture(
        device: Arc<Device>,
        upload_pool: &CommandPool,
        queue: vk::Queue,
        desc: &TextureDesc<'_>,
        timeout: Duration,
    ) -> RhiResult<Self> {
        desc.validate()?;

        let staging = Buffer::new_with_data(device.clone(), BufferUsage::Staging, desc.pixels)?;
        let image = Self::create(
            device,
            desc.extent(),
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
            "texture",
        )?;

        upload_pool.submit_one_time(queue, timeout, |cmd| {
            cmd.transition_image_layout(
                image.image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );
            cmd.copy_buffer_to_image(staging.handle(), image.image, image.extent);
            cmd.transition_image_layout(
                image.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })?;

        info!(
            "Uploaded texture '{}' ({}x{})",
            desc.label, desc.width, desc.height
        );
        Ok(image)
    }

    fn create(
        device: Arc<Device>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        name: &'static str,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "{name} extent must be non-zero, got {}x{}",
                extent.width, extent.height
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e.into());
            }
        };

        // From here on `Drop` releases whatever was created.
        let mut this = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            extent,
        };

        if let Some(allocation) = &this.allocation {
            unsafe {
                this.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .level_count(1)
                    .layer_count(1),
            );
        this.view = unsafe { this.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created {} {}x{} ({:?})",
            name, extent.width, extent.height, format
        );
        Ok(this)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
        }

        if let Some(allocation) = self.allocation.take()
            && let Err(e) = self.device.allocator().free(allocation)
        {
            error!("Failed to free image allocation: {:?}", e);
        }

        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }
    }
}

/// RAII `VkSampler`.
pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// # Errors
    ///
    /// Returns an error if sampler creation fails.
    pub fn new(device: Arc<Device>, desc: &SamplerDesc) -> RhiResult<Self> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(desc.anisotropy.is_some())
            .max_anisotropy(desc.anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .compare_op(vk::CompareOp::ALWAYS);

        let sampler = unsafe { device.handle().create_sampler(&create_info, None)? };
        debug!("Created sampler (anisotropy: {:?})", desc.anisotropy);
        Ok(Self { device, sampler })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_desc_validation() {
        let pixels = [255u8; 2 * 2 * 4];
        let desc = TextureDesc {
            width: 2,
            height: 2,
            pixels: &pixels,
            label: "checker",
        };
        assert!(desc.validate().is_ok());

        let short = TextureDesc {
            pixels: &pixels[..12],
            ..desc
        };
        assert!(short.validate().is_err());

        let empty = TextureDesc {
            width: 0,
            pixels: &[],
            ..desc
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_input_color_target_usage() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let desc = RenderTargetDesc::input_color(extent, vk::Format::B8G8R8A8_SRGB);
        assert!(desc.usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(desc.usage.contains(vk::ImageUsageFlags::INPUT_ATTACHMENT));
        assert_eq!(desc.aspect, vk::ImageAspectFlags::COLOR);

        let depth = RenderTargetDesc::depth(extent, vk::Format::D32_SFLOAT);
        assert_eq!(depth.aspect, vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn test_sampler_follows_capabilities() {
        let mut caps = DeviceCapabilities {
            sampler_anisotropy: true,
            max_sampler_anisotropy: 16,
            ..Default::default()
        };
        assert_eq!(SamplerDesc::for_capabilities(&caps).anisotropy, Some(16.0));

        caps.sampler_anisotropy = false;
        assert_eq!(SamplerDesc::for_capabilities(&caps).anisotropy, None);
    }
}
