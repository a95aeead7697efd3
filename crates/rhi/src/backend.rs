//! The [`Gpu`] trait: the single seam between frame orchestration and a graphics API.
//!
//! Resources are identified by plain `ash::vk` handles. The backend owns the
//! objects behind those handles and releases them on the matching `destroy_*`
//! call; callers never free a handle they did not create through the trait.
//!
//! All methods take `&mut self`: the renderer drives the device from a single
//! thread and GPU progress is observed only through fences.

use std::time::Duration;

use ash::vk;

use crate::buffer::BufferUsage;
use crate::descriptor::DescriptorWrite;
use crate::error::RhiResult;
use crate::image::{RenderTargetDesc, SamplerDesc, TextureDesc};
use crate::physical_device::DeviceCapabilities;
use crate::pipeline::GraphicsPipelineDesc;
use crate::render_pass::{RenderPassBegin, RenderPassDesc};

/// Result of asking the presentation engine for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image was acquired; its acquire semaphore will be signaled.
    Acquired { image_index: u32, suboptimal: bool },
    /// The surface no longer matches the swapchain and nothing was acquired.
    Stale,
}

/// Result of queueing an image for presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented (or dropped) but the swapchain must be rebuilt.
    Stale,
}

/// One queue submission for a frame.
#[derive(Clone, Copy, Debug)]
pub struct FrameSubmit {
    pub command_buffer: vk::CommandBuffer,
    /// Swapchain image the command buffer renders into.
    pub image_index: u32,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    /// Fence signaled when the submission retires.
    pub fence: vk::Fence,
}

/// Current presentable images.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapchainInfo {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub image_views: Vec<vk::ImageView>,
}

impl SwapchainInfo {
    #[inline]
    pub fn image_count(&self) -> usize {
        self.image_views.len()
    }
}

/// A graphics device the renderer can drive.
pub trait Gpu {
    /// Capabilities resolved once at device selection.
    fn capabilities(&self) -> &DeviceCapabilities;

    // ===== Synchronization =====

    fn create_semaphore(&mut self) -> RhiResult<vk::Semaphore>;
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);

    fn create_fence(&mut self, signaled: bool) -> RhiResult<vk::Fence>;
    fn destroy_fence(&mut self, fence: vk::Fence);

    /// Blocks until `fence` signals.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Timeout`](crate::RhiError::Timeout) when `timeout`
    /// elapses first.
    fn wait_for_fence(&mut self, fence: vk::Fence, timeout: Duration) -> RhiResult<()>;

    /// Returns `fence` to the unsignaled state. It must not be pending.
    fn reset_fence(&mut self, fence: vk::Fence) -> RhiResult<()>;

    /// Blocks until every queue is idle.
    fn wait_idle(&mut self) -> RhiResult<()>;

    // ===== Presentation =====

    fn swapchain(&self) -> &SwapchainInfo;

    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome>;

    fn submit(&mut self, submit: &FrameSubmit) -> RhiResult<()>;

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> RhiResult<PresentOutcome>;

    /// Rebuilds the swapchain for `extent`. The caller has already idled the device
    /// and released everything that referenced the old image views.
    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> RhiResult<SwapchainInfo>;

    // ===== Memory =====

    fn create_buffer(&mut self, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<vk::Buffer>;

    fn write_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> RhiResult<()>;

    fn destroy_buffer(&mut self, buffer: vk::Buffer);

    fn create_buffer_with_data(&mut self, usage: BufferUsage, data: &[u8]) -> RhiResult<vk::Buffer> {
        let buffer = self.create_buffer(usage, data.len() as vk::DeviceSize)?;
        if let Err(e) = self.write_buffer(buffer, 0, data) {
            self.destroy_buffer(buffer);
            return Err(e);
        }
        Ok(buffer)
    }

    /// Uploads RGBA8 pixels into a sampled image and returns its view.
    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> RhiResult<vk::ImageView>;

    /// Creates a device-local attachment image and returns its view.
    fn create_render_target(&mut self, desc: &RenderTargetDesc) -> RhiResult<vk::ImageView>;

    /// Destroys an image created by `create_texture` or `create_render_target`.
    fn destroy_image(&mut self, view: vk::ImageView);

    fn create_sampler(&mut self, desc: &SamplerDesc) -> RhiResult<vk::Sampler>;
    fn destroy_sampler(&mut self, sampler: vk::Sampler);

    // ===== Descriptors =====

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[vk::DescriptorSetLayoutBinding<'static>],
    ) -> RhiResult<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout);

    fn create_descriptor_pool(
        &mut self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool>;

    /// Destroys the pool and every set allocated from it.
    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool);

    fn allocate_descriptor_sets(
        &mut self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> RhiResult<Vec<vk::DescriptorSet>>;

    fn update_descriptor_sets(&mut self, writes: &[DescriptorWrite]);

    // ===== Passes and pipelines =====

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass>;
    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass);

    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer>;
    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer);

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout);

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> RhiResult<vk::Pipeline>;
    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline);

    // ===== Command recording =====

    fn allocate_command_buffers(&mut self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&mut self, command_buffers: &[vk::CommandBuffer]);

    /// Resets and begins a reusable recording.
    fn cmd_begin(&mut self, cmd: vk::CommandBuffer) -> RhiResult<()>;
    fn cmd_end(&mut self, cmd: vk::CommandBuffer) -> RhiResult<()>;

    fn cmd_begin_render_pass(&mut self, cmd: vk::CommandBuffer, begin: &RenderPassBegin);
    fn cmd_next_subpass(&mut self, cmd: vk::CommandBuffer);
    fn cmd_end_render_pass(&mut self, cmd: vk::CommandBuffer);

    fn cmd_bind_pipeline(&mut self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );
    fn cmd_bind_vertex_buffer(&mut self, cmd: vk::CommandBuffer, buffer: vk::Buffer, offset: u64);
    fn cmd_bind_index_buffer(
        &mut self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    );

    fn cmd_set_viewport(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D);
    fn cmd_set_scissor(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D);

    fn cmd_push_constants(
        &mut self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );

    fn cmd_draw(
        &mut self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    fn cmd_draw_indexed(
        &mut self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
}
