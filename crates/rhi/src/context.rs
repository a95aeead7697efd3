//! [`VulkanGpu`]: the Vulkan implementation of [`Gpu`].
//!
//! Every object handed out through the trait is owned by one of the handle
//! maps below as its RAII wrapper. `destroy_*` removes the wrapper, which
//! destroys the object. Field order is drop order: dependent objects first,
//! then the swapchain, device, surface and instance.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{error, info, warn};

use crate::backend::{AcquireOutcome, FrameSubmit, Gpu, PresentOutcome, SwapchainInfo};
use crate::buffer::{Buffer, BufferUsage};
use crate::command::{CommandBuffer, CommandPool};
use crate::descriptor::{self, DescriptorPool, DescriptorSetLayout, DescriptorWrite};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::image::{Image, RenderTargetDesc, Sampler, SamplerDesc, TextureDesc};
use crate::instance::{Instance, InstanceDesc};
use crate::physical_device::{DeviceCapabilities, select_physical_device};
use crate::pipeline::{GraphicsPipelineDesc, Pipeline, PipelineLayout};
use crate::render_pass::{Framebuffer, RenderPass, RenderPassBegin, RenderPassDesc};
use crate::surface::Surface;
use crate::swapchain::Swapchain;
use crate::sync::{Fence, Semaphore};

/// Startup parameters for [`VulkanGpu::new`].
#[derive(Clone, Debug)]
pub struct VulkanSettings {
    pub application_name: String,
    pub enable_validation: bool,
    /// Use mailbox presentation when the surface offers it.
    pub prefer_mailbox: bool,
    /// Bound on waits outside the frame loop, such as texture uploads.
    pub upload_timeout: Duration,
}

impl Default for VulkanSettings {
    fn default() -> Self {
        Self {
            application_name: "renderer".to_string(),
            enable_validation: cfg!(debug_assertions),
            prefer_mailbox: false,
            upload_timeout: Duration::from_secs(5),
        }
    }
}

/// Owned objects keyed by the raw handle the trait hands out.
struct HandleMap<H, T> {
    kind: &'static str,
    entries: HashMap<H, T>,
}

impl<H: Copy + Eq + Hash + std::fmt::Debug, T> HandleMap<H, T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, handle: H, value: T) -> H {
        self.entries.insert(handle, value);
        handle
    }

    fn get(&self, handle: H) -> RhiResult<&T> {
        self.entries
            .get(&handle)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown {} {:?}", self.kind, handle)))
    }

    fn remove(&mut self, handle: H) {
        if self.entries.remove(&handle).is_none() {
            warn!("Ignoring destroy of unknown {} {:?}", self.kind, handle);
        }
    }
}

/// A window-backed Vulkan device.
pub struct VulkanGpu {
    fences: HandleMap<vk::Fence, Fence>,
    semaphores: HandleMap<vk::Semaphore, Semaphore>,
    framebuffers: HandleMap<vk::Framebuffer, Framebuffer>,
    pipelines: HandleMap<vk::Pipeline, Pipeline>,
    pipeline_layouts: HandleMap<vk::PipelineLayout, PipelineLayout>,
    render_passes: HandleMap<vk::RenderPass, RenderPass>,
    descriptor_pools: HandleMap<vk::DescriptorPool, DescriptorPool>,
    descriptor_set_layouts: HandleMap<vk::DescriptorSetLayout, DescriptorSetLayout>,
    samplers: HandleMap<vk::Sampler, Sampler>,
    images: HandleMap<vk::ImageView, Image>,
    buffers: HandleMap<vk::Buffer, Buffer>,
    command_pool: CommandPool,
    upload_pool: CommandPool,
    swapchain: Swapchain,
    device: Arc<Device>,
    surface: Surface,
    _instance: Instance,
    upload_timeout: Duration,
}

impl VulkanGpu {
    /// Brings up instance, surface, device and swapchain for a window.
    ///
    /// # Errors
    ///
    /// Returns an error if any stage fails; [`RhiError::NoSuitableGpu`] when no
    /// GPU can render to the window.
    pub fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        extent: vk::Extent2D,
        settings: &VulkanSettings,
    ) -> RhiResult<Self> {
        let instance = Instance::new(&InstanceDesc {
            application_name: &settings.application_name,
            enable_validation: settings.enable_validation,
            display,
        })?;
        let surface = Surface::new(&instance, display, window)?;

        let physical =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        info!(
            "Selected GPU: {} ({}), capabilities {:?}",
            physical.device_name(),
            physical.device_type_name(),
            physical.capabilities
        );

        let device = Device::new(&instance, &physical)?;
        let graphics_family = device
            .queue_families()
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;

        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            &surface,
            extent,
            settings.prefer_mailbox,
        )?;
        let command_pool = CommandPool::new(device.clone(), graphics_family)?;
        // Uploads finish in SHADER_READ_ONLY_OPTIMAL, which needs the graphics queue.
        let upload_pool = CommandPool::new_transient(device.clone(), graphics_family)?;

        Ok(Self {
            fences: HandleMap::new("fence"),
            semaphores: HandleMap::new("semaphore"),
            framebuffers: HandleMap::new("framebuffer"),
            pipelines: HandleMap::new("pipeline"),
            pipeline_layouts: HandleMap::new("pipeline layout"),
            render_passes: HandleMap::new("render pass"),
            descriptor_pools: HandleMap::new("descriptor pool"),
            descriptor_set_layouts: HandleMap::new("descriptor set layout"),
            samplers: HandleMap::new("sampler"),
            images: HandleMap::new("image"),
            buffers: HandleMap::new("buffer"),
            command_pool,
            upload_pool,
            swapchain,
            device,
            surface,
            _instance: instance,
            upload_timeout: settings.upload_timeout,
        })
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn cmd(&self, cmd: vk::CommandBuffer) -> CommandBuffer<'_> {
        CommandBuffer::new(&self.device, cmd)
    }
}

impl Drop for VulkanGpu {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to idle device before teardown: {e}");
        }
        info!("Tearing down Vulkan backend");
    }
}

impl Gpu for VulkanGpu {
    fn capabilities(&self) -> &DeviceCapabilities {
        self.device.capabilities()
    }

    // ===== Synchronization =====

    fn create_semaphore(&mut self) -> RhiResult<vk::Semaphore> {
        let semaphore = Semaphore::new(self.device.clone())?;
        Ok(self.semaphores.insert(semaphore.handle(), semaphore))
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.semaphores.remove(semaphore);
    }

    fn create_fence(&mut self, signaled: bool) -> RhiResult<vk::Fence> {
        let fence = Fence::new(self.device.clone(), signaled)?;
        Ok(self.fences.insert(fence.handle(), fence))
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        self.fences.remove(fence);
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout: Duration) -> RhiResult<()> {
        self.fences.get(fence)?.wait(timeout)
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> RhiResult<()> {
        self.fences.get(fence)?.reset()
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        self.device.wait_idle()
    }

    // ===== Presentation =====

    fn swapchain(&self) -> &SwapchainInfo {
        self.swapchain.info()
    }

    fn acquire_next_image(
        &mut self,
        signal: vk::Semaphore,
        timeout: Duration,
    ) -> RhiResult<AcquireOutcome> {
        self.swapchain.acquire_next_image(signal, timeout)
    }

    fn submit(&mut self, submit: &FrameSubmit) -> RhiResult<()> {
        let wait_semaphores = [submit.wait_semaphore];
        let wait_stages = [submit.wait_stage];
        let command_buffers = [submit.command_buffer];
        let signal_semaphores = [submit.signal_semaphore];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the recorder finished every command buffer it hands out, and the
        // synchronizer resets the fence only after it signaled.
        unsafe { self.device.submit_graphics(&[submit_info], submit.fence) }
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> RhiResult<PresentOutcome> {
        self.swapchain
            .present(self.device.present_queue(), image_index, wait)
    }

    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> RhiResult<SwapchainInfo> {
        self.swapchain.recreate(&self.surface, extent)?;
        Ok(self.swapchain.info().clone())
    }

    // ===== Memory =====

    fn create_buffer(&mut self, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<vk::Buffer> {
        let buffer = Buffer::new(self.device.clone(), usage, size)?;
        Ok(self.buffers.insert(buffer.handle(), buffer))
    }

    fn write_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> RhiResult<()> {
        self.buffers.get(buffer)?.write_data(offset, data)
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        self.buffers.remove(buffer);
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> RhiResult<vk::ImageView> {
        let image = Image::new_texture(
            self.device.clone(),
            &self.upload_pool,
            self.device.graphics_queue(),
            desc,
            self.upload_timeout,
        )?;
        Ok(self.images.insert(image.view(), image))
    }

    fn create_render_target(&mut self, desc: &RenderTargetDesc) -> RhiResult<vk::ImageView> {
        let image = Image::new_render_target(self.device.clone(), desc)?;
        Ok(self.images.insert(image.view(), image))
    }

    fn destroy_image(&mut self, view: vk::ImageView) {
        self.images.remove(view);
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> RhiResult<vk::Sampler> {
        let sampler = Sampler::new(self.device.clone(), desc)?;
        Ok(self.samplers.insert(sampler.handle(), sampler))
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        self.samplers.remove(sampler);
    }

    // ===== Descriptors =====

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[vk::DescriptorSetLayoutBinding<'static>],
    ) -> RhiResult<vk::DescriptorSetLayout> {
        let layout = DescriptorSetLayout::new(self.device.clone(), bindings)?;
        Ok(self.descriptor_set_layouts.insert(layout.handle(), layout))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        self.descriptor_set_layouts.remove(layout);
    }

    fn create_descriptor_pool(
        &mut self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        let pool = DescriptorPool::new(self.device.clone(), max_sets, pool_sizes)?;
        Ok(self.descriptor_pools.insert(pool.handle(), pool))
    }

    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool) {
        self.descriptor_pools.remove(pool);
    }

    fn allocate_descriptor_sets(
        &mut self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        self.descriptor_pools.get(pool)?.allocate(layout, count)
    }

    fn update_descriptor_sets(&mut self, writes: &[DescriptorWrite]) {
        descriptor::apply_writes(&self.device, writes);
    }

    // ===== Passes and pipelines =====

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass> {
        let render_pass = RenderPass::new(self.device.clone(), desc)?;
        Ok(self.render_passes.insert(render_pass.handle(), render_pass))
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        self.render_passes.remove(render_pass);
    }

    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer> {
        let framebuffer = Framebuffer::new(self.device.clone(), render_pass, attachments, extent)?;
        Ok(self.framebuffers.insert(framebuffer.handle(), framebuffer))
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        self.framebuffers.remove(framebuffer);
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout> {
        let layout = PipelineLayout::new(self.device.clone(), set_layouts, push_constant_ranges)?;
        Ok(self.pipeline_layouts.insert(layout.handle(), layout))
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        self.pipeline_layouts.remove(layout);
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> RhiResult<vk::Pipeline> {
        let pipeline = Pipeline::new_graphics(self.device.clone(), desc, layout, render_pass)?;
        Ok(self.pipelines.insert(pipeline.handle(), pipeline))
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.pipelines.remove(pipeline);
    }

    // ===== Command recording =====

    fn allocate_command_buffers(&mut self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        self.command_pool.allocate_command_buffers(count)
    }

    fn free_command_buffers(&mut self, command_buffers: &[vk::CommandBuffer]) {
        self.command_pool.free_command_buffers(command_buffers);
    }

    fn cmd_begin(&mut self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        self.cmd(cmd).begin_reusable()
    }

    fn cmd_end(&mut self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        self.cmd(cmd).end()
    }

    fn cmd_begin_render_pass(&mut self, cmd: vk::CommandBuffer, begin: &RenderPassBegin) {
        self.cmd(cmd).begin_render_pass(begin);
    }

    fn cmd_next_subpass(&mut self, cmd: vk::CommandBuffer) {
        self.cmd(cmd).next_subpass();
    }

    fn cmd_end_render_pass(&mut self, cmd: vk::CommandBuffer) {
        self.cmd(cmd).end_render_pass();
    }

    fn cmd_bind_pipeline(&mut self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.cmd(cmd).bind_graphics_pipeline(pipeline);
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.cmd(cmd).bind_descriptor_set(layout, set);
    }

    fn cmd_bind_vertex_buffer(&mut self, cmd: vk::CommandBuffer, buffer: vk::Buffer, offset: u64) {
        self.cmd(cmd).bind_vertex_buffer(buffer, offset);
    }

    fn cmd_bind_index_buffer(
        &mut self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    ) {
        self.cmd(cmd).bind_index_buffer(buffer, offset, index_type);
    }

    fn cmd_set_viewport(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        self.cmd(cmd).set_viewport(extent);
    }

    fn cmd_set_scissor(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        self.cmd(cmd).set_scissor(extent);
    }

    fn cmd_push_constants(
        &mut self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        self.cmd(cmd).push_constants(layout, stages, offset, data);
    }

    fn cmd_draw(
        &mut self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.cmd(cmd)
            .draw(vertex_count, instance_count, first_vertex, first_instance);
    }

    fn cmd_draw_indexed(
        &mut self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.cmd(cmd).draw_indexed(
            index_count,
            instance_count,
            first_index,
            vertex_offset,
            first_instance,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_handle_map_lookup_and_remove() {
        let mut map: HandleMap<vk::Buffer, u32> = HandleMap::new("buffer");
        let handle = vk::Buffer::from_raw(42);
        map.insert(handle, 7);
        assert_eq!(map.get(handle).ok(), Some(&7));

        map.remove(handle);
        assert!(matches!(map.get(handle), Err(RhiError::InvalidHandle(_))));

        // A second remove only warns.
        map.remove(handle);
    }

    #[test]
    fn test_default_settings_bound_uploads() {
        let settings = VulkanSettings::default();
        assert_eq!(settings.upload_timeout, Duration::from_secs(5));
        assert!(!settings.prefer_mailbox);
    }
}
