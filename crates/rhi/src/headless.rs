//! [`HeadlessGpu`]: an in-memory [`Gpu`] with a simulated GPU timeline.
//!
//! Nothing is rendered. Instead the backend keeps enough state to check the
//! ordering rules a real device would enforce:
//! - a submitted fence stays *pending* until the host waits on it (or idles the
//!   device), at which point the submission retires
//! - submitting with a fence that is not unsignaled, or resetting a pending
//!   fence, is rejected
//! - two pending submissions that render the same swapchain image count as an
//!   image race
//!
//! Every acquire, submit, present and fence operation is logged as a
//! [`HeadlessEvent`], every command buffer keeps its recorded [`Command`]s, and
//! descriptor writes are applied to a binding table tests can query.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use ash::vk::{self, Handle};
use tracing::{debug, warn};

use crate::backend::{AcquireOutcome, FrameSubmit, Gpu, PresentOutcome, SwapchainInfo};
use crate::buffer::{BufferUsage, check_write_range};
use crate::descriptor::DescriptorWrite;
use crate::error::{RhiError, RhiResult};
use crate::image::{RenderTargetDesc, SamplerDesc, TextureDesc};
use crate::physical_device::DeviceCapabilities;
use crate::pipeline::GraphicsPipelineDesc;
use crate::render_pass::{RenderPassBegin, RenderPassDesc};

const SWAPCHAIN_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceState {
    Unsignaled,
    /// Submitted and not yet observed complete.
    Pending,
    Signaled,
}

/// Host-visible operations, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeadlessEvent {
    WaitFence {
        fence: vk::Fence,
        timed_out: bool,
    },
    ResetFence(vk::Fence),
    Acquire(AcquireOutcome),
    Submit {
        image_index: u32,
        command_buffer: vk::CommandBuffer,
        fence: vk::Fence,
    },
    Present {
        image_index: u32,
        outcome: PresentOutcome,
    },
    WaitIdle,
    RecreateSwapchain {
        image_count: usize,
    },
}

/// One recorded command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BeginRenderPass(RenderPassBegin),
    NextSubpass,
    EndRenderPass,
    BindPipeline(vk::Pipeline),
    BindDescriptorSet(vk::DescriptorSet),
    BindVertexBuffer {
        buffer: vk::Buffer,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    },
    SetViewport(vk::Extent2D),
    SetScissor(vk::Extent2D),
    PushConstants {
        stages: vk::ShaderStageFlags,
        data: Vec<u8>,
    },
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
}

/// What one descriptor array element currently points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundResource {
    Buffer(vk::Buffer),
    SampledImage(vk::ImageView),
    InputAttachment(vk::ImageView),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ObjectKind {
    Semaphore,
    Fence,
    Buffer,
    Image,
    Sampler,
    DescriptorSetLayout,
    DescriptorPool,
    RenderPass,
    Framebuffer,
    PipelineLayout,
    Pipeline,
    CommandBuffer,
    SwapchainView,
}

/// Scripted result for the next acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptedAcquire {
    Image(u32),
    /// Acquires the image but reports the swapchain as no longer matching the surface.
    Suboptimal(u32),
    Stale,
}

#[derive(Clone, Copy, Debug)]
struct InFlight {
    fence: vk::Fence,
    image_index: u32,
}

/// Deterministic device for tests and tools without a GPU.
pub struct HeadlessGpu {
    capabilities: DeviceCapabilities,
    swapchain: SwapchainInfo,
    next_handle: u64,
    live: HashMap<u64, ObjectKind>,
    fences: HashMap<vk::Fence, FenceState>,
    in_flight: Vec<InFlight>,
    buffers: HashMap<vk::Buffer, Vec<u8>>,
    textures: HashMap<vk::ImageView, (u32, u32)>,
    render_passes: HashMap<vk::RenderPass, RenderPassDesc>,
    pipelines: HashMap<vk::Pipeline, GraphicsPipelineDesc>,
    descriptor_writes: Vec<DescriptorWrite>,
    bindings: HashMap<(vk::DescriptorSet, u32, u32), BoundResource>,
    commands: HashMap<vk::CommandBuffer, Vec<Command>>,
    events: Vec<HeadlessEvent>,
    acquire_script: VecDeque<ScriptedAcquire>,
    present_script: VecDeque<PresentOutcome>,
    next_image: u32,
    next_image_count: Option<usize>,
    fail_next_recreate: bool,
    hung: bool,
    recordings: u64,
    max_in_flight: usize,
    image_races: usize,
    invalid_destroys: usize,
}

impl HeadlessGpu {
    /// A device with default capabilities and `image_count` swapchain images.
    pub fn new(extent: vk::Extent2D, image_count: usize) -> Self {
        Self::with_capabilities(extent, image_count, DeviceCapabilities::default())
    }

    pub fn with_capabilities(
        extent: vk::Extent2D,
        image_count: usize,
        capabilities: DeviceCapabilities,
    ) -> Self {
        let mut gpu = Self {
            capabilities,
            swapchain: SwapchainInfo {
                format: SWAPCHAIN_FORMAT,
                extent,
                image_views: Vec::new(),
            },
            next_handle: 1,
            live: HashMap::new(),
            fences: HashMap::new(),
            in_flight: Vec::new(),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            render_passes: HashMap::new(),
            pipelines: HashMap::new(),
            descriptor_writes: Vec::new(),
            bindings: HashMap::new(),
            commands: HashMap::new(),
            events: Vec::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            next_image: 0,
            next_image_count: None,
            fail_next_recreate: false,
            hung: false,
            recordings: 0,
            max_in_flight: 0,
            image_races: 0,
            invalid_destroys: 0,
        };
        gpu.swapchain.image_views = gpu.make_swapchain_views(image_count);
        gpu
    }

    // ===== Scripting =====

    /// Queues the results of upcoming acquires; afterwards images rotate round-robin.
    pub fn script_acquire(&mut self, outcomes: impl IntoIterator<Item = ScriptedAcquire>) {
        self.acquire_script.extend(outcomes);
    }

    /// Queues the results of upcoming presents; afterwards presents succeed.
    pub fn script_present(&mut self, outcomes: impl IntoIterator<Item = PresentOutcome>) {
        self.present_script.extend(outcomes);
    }

    /// Image count the next swapchain recreation produces.
    pub fn set_next_image_count(&mut self, count: usize) {
        self.next_image_count = Some(count);
    }

    /// Makes the next swapchain recreation fail before touching the old swapchain.
    pub fn fail_next_swapchain_recreate(&mut self) {
        self.fail_next_recreate = true;
    }

    /// While hung, pending submissions never retire and waits on them time out.
    pub fn set_hung(&mut self, hung: bool) {
        self.hung = hung;
    }

    // ===== Inspection =====

    pub fn events(&self) -> &[HeadlessEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn fence_state(&self, fence: vk::Fence) -> Option<FenceState> {
        self.fences.get(&fence).copied()
    }

    /// Commands recorded into `cmd` since its last `cmd_begin`.
    pub fn commands(&self, cmd: vk::CommandBuffer) -> &[Command] {
        self.commands.get(&cmd).map_or(&[], Vec::as_slice)
    }

    /// Total number of `cmd_begin` calls.
    pub fn recordings(&self) -> u64 {
        self.recordings
    }

    /// Largest number of simultaneously pending submissions seen.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Submissions made while another pending submission targeted the same image.
    pub fn image_races(&self) -> usize {
        self.image_races
    }

    pub fn invalid_destroys(&self) -> usize {
        self.invalid_destroys
    }

    pub fn descriptor_writes(&self) -> &[DescriptorWrite] {
        &self.descriptor_writes
    }

    pub fn bound(&self, set: vk::DescriptorSet, binding: u32, element: u32) -> Option<BoundResource> {
        self.bindings.get(&(set, binding, element)).copied()
    }

    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn render_pass_desc(&self, render_pass: vk::RenderPass) -> Option<&RenderPassDesc> {
        self.render_passes.get(&render_pass)
    }

    pub fn pipeline_desc(&self, pipeline: vk::Pipeline) -> Option<&GraphicsPipelineDesc> {
        self.pipelines.get(&pipeline)
    }

    /// Objects created through the trait and not yet destroyed, swapchain views included.
    pub fn live_objects(&self) -> usize {
        self.live.len()
    }

    // ===== Internals =====

    fn alloc(&mut self, kind: ObjectKind) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        self.live.insert(raw, kind);
        raw
    }

    fn release(&mut self, raw: u64, kind: ObjectKind) {
        match self.live.get(&raw) {
            Some(&k) if k == kind => {
                self.live.remove(&raw);
            }
            _ => {
                warn!("Headless: destroy of unknown {:?} {:#x}", kind, raw);
                self.invalid_destroys += 1;
            }
        }
    }

    fn make_swapchain_views(&mut self, count: usize) -> Vec<vk::ImageView> {
        (0..count)
            .map(|_| vk::ImageView::from_raw(self.alloc(ObjectKind::SwapchainView)))
            .collect()
    }

    fn retire(&mut self, fence: vk::Fence) {
        self.in_flight.retain(|s| s.fence != fence);
        self.fences.insert(fence, FenceState::Signaled);
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: Command) {
        self.commands.entry(cmd).or_default().push(command);
    }
}

impl Gpu for HeadlessGpu {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    // ===== Synchronization =====

    fn create_semaphore(&mut self) -> RhiResult<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(self.alloc(ObjectKind::Semaphore)))
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.release(semaphore.as_raw(), ObjectKind::Semaphore);
    }

    fn create_fence(&mut self, signaled: bool) -> RhiResult<vk::Fence> {
        let fence = vk::Fence::from_raw(self.alloc(ObjectKind::Fence));
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        self.fences.insert(fence, state);
        Ok(fence)
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        self.fences.remove(&fence);
        self.release(fence.as_raw(), ObjectKind::Fence);
    }

    fn wait_for_fence(&mut self, fence: vk::Fence, timeout: Duration) -> RhiResult<()> {
        let state = self
            .fences
            .get(&fence)
            .copied()
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown fence {fence:?}")))?;

        let timed_out = match state {
            FenceState::Signaled => false,
            FenceState::Pending if !self.hung => {
                self.retire(fence);
                false
            }
            // Never submitted, or the device is hung: nothing will signal it.
            FenceState::Pending | FenceState::Unsignaled => true,
        };

        self.events.push(HeadlessEvent::WaitFence { fence, timed_out });
        if timed_out {
            return Err(RhiError::Timeout(timeout));
        }
        Ok(())
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> RhiResult<()> {
        match self.fences.get(&fence) {
            Some(FenceState::Pending) => Err(RhiError::InvalidHandle(format!(
                "reset of pending fence {fence:?}"
            ))),
            Some(_) => {
                self.fences.insert(fence, FenceState::Unsignaled);
                self.events.push(HeadlessEvent::ResetFence(fence));
                Ok(())
            }
            None => Err(RhiError::InvalidHandle(format!("unknown fence {fence:?}"))),
        }
    }

    fn wait_idle(&mut self) -> RhiResult<()> {
        self.events.push(HeadlessEvent::WaitIdle);
        if self.hung && !self.in_flight.is_empty() {
            return Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST));
        }
        let pending: Vec<vk::Fence> = self.in_flight.iter().map(|s| s.fence).collect();
        for fence in pending {
            self.retire(fence);
        }
        Ok(())
    }

    // ===== Presentation =====

    fn swapchain(&self) -> &SwapchainInfo {
        &self.swapchain
    }

    fn acquire_next_image(
        &mut self,
        _signal: vk::Semaphore,
        _timeout: Duration,
    ) -> RhiResult<AcquireOutcome> {
        let image_count = self.swapchain.image_count() as u32;
        let outcome = match self.acquire_script.pop_front() {
            Some(ScriptedAcquire::Stale) => AcquireOutcome::Stale,
            Some(ScriptedAcquire::Image(image_index)) => AcquireOutcome::Acquired {
                image_index: image_index % image_count.max(1),
                suboptimal: false,
            },
            Some(ScriptedAcquire::Suboptimal(image_index)) => AcquireOutcome::Acquired {
                image_index: image_index % image_count.max(1),
                suboptimal: true,
            },
            None => {
                let image_index = self.next_image % image_count.max(1);
                self.next_image = image_index + 1;
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal: false,
                }
            }
        };
        self.events.push(HeadlessEvent::Acquire(outcome));
        Ok(outcome)
    }

    fn submit(&mut self, submit: &FrameSubmit) -> RhiResult<()> {
        match self.fences.get(&submit.fence) {
            Some(FenceState::Unsignaled) => {}
            Some(state) => {
                return Err(RhiError::InvalidHandle(format!(
                    "submit with {state:?} fence {:?}",
                    submit.fence
                )));
            }
            None => {
                return Err(RhiError::InvalidHandle(format!(
                    "unknown fence {:?}",
                    submit.fence
                )));
            }
        }
        if submit.image_index as usize >= self.swapchain.image_count() {
            return Err(RhiError::InvalidHandle(format!(
                "submit for image {} of {}",
                submit.image_index,
                self.swapchain.image_count()
            )));
        }

        if self
            .in_flight
            .iter()
            .any(|s| s.image_index == submit.image_index)
        {
            warn!("Headless: image {} submitted while still in flight", submit.image_index);
            self.image_races += 1;
        }

        self.fences.insert(submit.fence, FenceState::Pending);
        self.in_flight.push(InFlight {
            fence: submit.fence,
            image_index: submit.image_index,
        });
        self.max_in_flight = self.max_in_flight.max(self.in_flight.len());

        self.events.push(HeadlessEvent::Submit {
            image_index: submit.image_index,
            command_buffer: submit.command_buffer,
            fence: submit.fence,
        });
        Ok(())
    }

    fn present(&mut self, image_index: u32, _wait: vk::Semaphore) -> RhiResult<PresentOutcome> {
        let outcome = self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented);
        self.events.push(HeadlessEvent::Present {
            image_index,
            outcome,
        });
        Ok(outcome)
    }

    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> RhiResult<SwapchainInfo> {
        if std::mem::take(&mut self.fail_next_recreate) {
            return Err(RhiError::SwapchainError(
                "scripted recreation failure".to_string(),
            ));
        }
        let count = self
            .next_image_count
            .take()
            .unwrap_or(self.swapchain.image_count());

        let old_views = std::mem::take(&mut self.swapchain.image_views);
        for view in old_views {
            self.release(view.as_raw(), ObjectKind::SwapchainView);
        }

        self.swapchain.image_views = self.make_swapchain_views(count);
        self.swapchain.extent = extent;
        self.next_image = 0;

        debug!("Headless swapchain recreated with {} image(s)", count);
        self.events.push(HeadlessEvent::RecreateSwapchain { image_count: count });
        Ok(self.swapchain.clone())
    }

    // ===== Memory =====

    fn create_buffer(&mut self, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<vk::Buffer> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(format!(
                "{} buffer size must be greater than 0",
                usage.name()
            )));
        }
        let buffer = vk::Buffer::from_raw(self.alloc(ObjectKind::Buffer));
        self.buffers.insert(buffer, vec![0; size as usize]);
        Ok(buffer)
    }

    fn write_buffer(
        &mut self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> RhiResult<()> {
        let contents = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown buffer {buffer:?}")))?;
        check_write_range(contents.len() as vk::DeviceSize, offset, data.len())?;
        let start = offset as usize;
        contents[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: vk::Buffer) {
        self.buffers.remove(&buffer);
        self.release(buffer.as_raw(), ObjectKind::Buffer);
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> RhiResult<vk::ImageView> {
        desc.validate()?;
        let view = vk::ImageView::from_raw(self.alloc(ObjectKind::Image));
        self.textures.insert(view, (desc.width, desc.height));
        Ok(view)
    }

    fn create_render_target(&mut self, desc: &RenderTargetDesc) -> RhiResult<vk::ImageView> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RhiError::InvalidHandle(
                "render target extent must be non-zero".to_string(),
            ));
        }
        Ok(vk::ImageView::from_raw(self.alloc(ObjectKind::Image)))
    }

    fn destroy_image(&mut self, view: vk::ImageView) {
        self.textures.remove(&view);
        self.release(view.as_raw(), ObjectKind::Image);
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc) -> RhiResult<vk::Sampler> {
        Ok(vk::Sampler::from_raw(self.alloc(ObjectKind::Sampler)))
    }

    fn destroy_sampler(&mut self, sampler: vk::Sampler) {
        self.release(sampler.as_raw(), ObjectKind::Sampler);
    }

    // ===== Descriptors =====

    fn create_descriptor_set_layout(
        &mut self,
        _bindings: &[vk::DescriptorSetLayoutBinding<'static>],
    ) -> RhiResult<vk::DescriptorSetLayout> {
        Ok(vk::DescriptorSetLayout::from_raw(
            self.alloc(ObjectKind::DescriptorSetLayout),
        ))
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        self.release(layout.as_raw(), ObjectKind::DescriptorSetLayout);
    }

    fn create_descriptor_pool(
        &mut self,
        _max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        Ok(vk::DescriptorPool::from_raw(
            self.alloc(ObjectKind::DescriptorPool),
        ))
    }

    fn destroy_descriptor_pool(&mut self, pool: vk::DescriptorPool) {
        self.release(pool.as_raw(), ObjectKind::DescriptorPool);
    }

    fn allocate_descriptor_sets(
        &mut self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        if self.live.get(&pool.as_raw()) != Some(&ObjectKind::DescriptorPool) {
            return Err(RhiError::InvalidHandle(format!("unknown pool {pool:?}")));
        }
        // Sets are not live objects: they die with their pool.
        let sets = (0..count)
            .map(|_| {
                let raw = self.next_handle;
                self.next_handle += 1;
                vk::DescriptorSet::from_raw(raw)
            })
            .collect();
        Ok(sets)
    }

    fn update_descriptor_sets(&mut self, writes: &[DescriptorWrite]) {
        for write in writes {
            match write {
                DescriptorWrite::UniformBuffer {
                    set,
                    binding,
                    buffer,
                    ..
                } => {
                    self.bindings
                        .insert((*set, *binding, 0), BoundResource::Buffer(*buffer));
                }
                DescriptorWrite::SampledImages {
                    set,
                    binding,
                    first_element,
                    images,
                } => {
                    for (i, &(view, _)) in images.iter().enumerate() {
                        self.bindings.insert(
                            (*set, *binding, first_element + i as u32),
                            BoundResource::SampledImage(view),
                        );
                    }
                }
                DescriptorWrite::InputAttachment { set, binding, view } => {
                    self.bindings
                        .insert((*set, *binding, 0), BoundResource::InputAttachment(*view));
                }
            }
        }
        self.descriptor_writes.extend_from_slice(writes);
    }

    // ===== Passes and pipelines =====

    fn create_render_pass(&mut self, desc: &RenderPassDesc) -> RhiResult<vk::RenderPass> {
        desc.validate()?;
        let render_pass = vk::RenderPass::from_raw(self.alloc(ObjectKind::RenderPass));
        self.render_passes.insert(render_pass, desc.clone());
        Ok(render_pass)
    }

    fn destroy_render_pass(&mut self, render_pass: vk::RenderPass) {
        self.render_passes.remove(&render_pass);
        self.release(render_pass.as_raw(), ObjectKind::RenderPass);
    }

    fn create_framebuffer(
        &mut self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer> {
        let desc = self
            .render_passes
            .get(&render_pass)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown render pass {render_pass:?}")))?;
        if desc.attachments.len() != attachments.len() {
            return Err(RhiError::InvalidHandle(format!(
                "framebuffer has {} attachment(s), render pass expects {}",
                attachments.len(),
                desc.attachments.len()
            )));
        }
        for view in attachments {
            if !self.live.contains_key(&view.as_raw()) {
                return Err(RhiError::InvalidHandle(format!(
                    "framebuffer attachment {view:?} is not a live image"
                )));
            }
        }
        Ok(vk::Framebuffer::from_raw(
            self.alloc(ObjectKind::Framebuffer),
        ))
    }

    fn destroy_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        self.release(framebuffer.as_raw(), ObjectKind::Framebuffer);
    }

    fn create_pipeline_layout(
        &mut self,
        _set_layouts: &[vk::DescriptorSetLayout],
        _push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<vk::PipelineLayout> {
        Ok(vk::PipelineLayout::from_raw(
            self.alloc(ObjectKind::PipelineLayout),
        ))
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        self.release(layout.as_raw(), ObjectKind::PipelineLayout);
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
        _layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> RhiResult<vk::Pipeline> {
        let pass = self
            .render_passes
            .get(&render_pass)
            .ok_or_else(|| RhiError::InvalidHandle(format!("unknown render pass {render_pass:?}")))?;
        if desc.subpass as usize >= pass.subpasses.len() {
            return Err(RhiError::PipelineError(format!(
                "'{}' targets subpass {} of a {}-subpass render pass",
                desc.label,
                desc.subpass,
                pass.subpasses.len()
            )));
        }
        let pipeline = vk::Pipeline::from_raw(self.alloc(ObjectKind::Pipeline));
        self.pipelines.insert(pipeline, desc.clone());
        Ok(pipeline)
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.pipelines.remove(&pipeline);
        self.release(pipeline.as_raw(), ObjectKind::Pipeline);
    }

    // ===== Command recording =====

    fn allocate_command_buffers(&mut self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(self.alloc(ObjectKind::CommandBuffer)))
            .collect())
    }

    fn free_command_buffers(&mut self, command_buffers: &[vk::CommandBuffer]) {
        for &cmd in command_buffers {
            self.commands.remove(&cmd);
            self.release(cmd.as_raw(), ObjectKind::CommandBuffer);
        }
    }

    fn cmd_begin(&mut self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        if self.live.get(&cmd.as_raw()) != Some(&ObjectKind::CommandBuffer) {
            return Err(RhiError::InvalidHandle(format!(
                "unknown command buffer {cmd:?}"
            )));
        }
        self.commands.insert(cmd, Vec::new());
        self.recordings += 1;
        Ok(())
    }

    fn cmd_end(&mut self, _cmd: vk::CommandBuffer) -> RhiResult<()> {
        Ok(())
    }

    fn cmd_begin_render_pass(&mut self, cmd: vk::CommandBuffer, begin: &RenderPassBegin) {
        self.record(cmd, Command::BeginRenderPass(begin.clone()));
    }

    fn cmd_next_subpass(&mut self, cmd: vk::CommandBuffer) {
        self.record(cmd, Command::NextSubpass);
    }

    fn cmd_end_render_pass(&mut self, cmd: vk::CommandBuffer) {
        self.record(cmd, Command::EndRenderPass);
    }

    fn cmd_bind_pipeline(&mut self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record(cmd, Command::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.record(cmd, Command::BindDescriptorSet(set));
    }

    fn cmd_bind_vertex_buffer(&mut self, cmd: vk::CommandBuffer, buffer: vk::Buffer, offset: u64) {
        self.record(cmd, Command::BindVertexBuffer { buffer, offset });
    }

    fn cmd_bind_index_buffer(
        &mut self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: u64,
        index_type: vk::IndexType,
    ) {
        self.record(
            cmd,
            Command::BindIndexBuffer {
                buffer,
                offset,
                index_type,
            },
        );
    }

    fn cmd_set_viewport(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        self.record(cmd, Command::SetViewport(extent));
    }

    fn cmd_set_scissor(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        self.record(cmd, Command::SetScissor(extent));
    }

    fn cmd_push_constants(
        &mut self,
        cmd: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        _offset: u32,
        data: &[u8],
    ) {
        self.record(
            cmd,
            Command::PushConstants {
                stages,
                data: data.to_vec(),
            },
        );
    }

    fn cmd_draw(
        &mut self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.record(
            cmd,
            Command::Draw {
                vertex_count,
                instance_count,
            },
        );
    }

    fn cmd_draw_indexed(
        &mut self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.record(
            cmd,
            Command::DrawIndexed {
                index_count,
                instance_count,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 320,
        height: 240,
    };
    const TIMEOUT: Duration = Duration::from_millis(10);

    fn submit_for(gpu: &mut HeadlessGpu, fence: vk::Fence, image_index: u32) -> RhiResult<()> {
        gpu.submit(&FrameSubmit {
            command_buffer: vk::CommandBuffer::null(),
            image_index,
            wait_semaphore: vk::Semaphore::null(),
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: vk::Semaphore::null(),
            fence,
        })
    }

    #[test]
    fn test_fence_lifecycle() {
        let mut gpu = HeadlessGpu::new(EXTENT, 3);
        let fence = gpu.create_fence(true).unwrap();
        gpu.wait_for_fence(fence, TIMEOUT).unwrap();
        gpu.reset_fence(fence).unwrap();
        assert_eq!(gpu.fence_state(fence), Some(FenceState::Unsignaled));

        submit_for(&mut gpu, fence, 0).unwrap();
        assert_eq!(gpu.fence_state(fence), Some(FenceState::Pending));
        assert!(gpu.reset_fence(fence).is_err());

        gpu.wait_for_fence(fence, TIMEOUT).unwrap();
        assert_eq!(gpu.fence_state(fence), Some(FenceState::Signaled));
    }

    #[test]
    fn test_unsubmitted_fence_times_out() {
        let mut gpu = HeadlessGpu::new(EXTENT, 2);
        let fence = gpu.create_fence(false).unwrap();
        assert!(matches!(
            gpu.wait_for_fence(fence, TIMEOUT),
            Err(RhiError::Timeout(t)) if t == TIMEOUT
        ));
    }

    #[test]
    fn test_hung_device_never_retires() {
        let mut gpu = HeadlessGpu::new(EXTENT, 2);
        let fence = gpu.create_fence(false).unwrap();
        submit_for(&mut gpu, fence, 0).unwrap();
        gpu.set_hung(true);
        assert!(gpu.wait_for_fence(fence, TIMEOUT).is_err());
        assert!(gpu.wait_idle().is_err());

        gpu.set_hung(false);
        gpu.wait_idle().unwrap();
        assert_eq!(gpu.fence_state(fence), Some(FenceState::Signaled));
    }

    #[test]
    fn test_submit_requires_unsignaled_fence() {
        let mut gpu = HeadlessGpu::new(EXTENT, 2);
        let fence = gpu.create_fence(true).unwrap();
        assert!(submit_for(&mut gpu, fence, 0).is_err());
    }

    #[test]
    fn test_image_race_detection() {
        let mut gpu = HeadlessGpu::new(EXTENT, 2);
        let a = gpu.create_fence(false).unwrap();
        let b = gpu.create_fence(false).unwrap();
        submit_for(&mut gpu, a, 1).unwrap();
        submit_for(&mut gpu, b, 1).unwrap();
        assert_eq!(gpu.image_races(), 1);
        assert_eq!(gpu.max_in_flight(), 2);
    }

    #[test]
    fn test_acquire_round_robin_and_script() {
        let mut gpu = HeadlessGpu::new(EXTENT, 3);
        let sem = gpu.create_semaphore().unwrap();
        gpu.script_acquire([ScriptedAcquire::Stale, ScriptedAcquire::Image(2)]);

        assert_eq!(
            gpu.acquire_next_image(sem, TIMEOUT).unwrap(),
            AcquireOutcome::Stale
        );
        let indices: Vec<u32> = (0..4)
            .map(|_| match gpu.acquire_next_image(sem, TIMEOUT).unwrap() {
                AcquireOutcome::Acquired { image_index, .. } => image_index,
                AcquireOutcome::Stale => u32::MAX,
            })
            .collect();
        assert_eq!(indices, vec![2, 0, 1, 2]);
    }

    #[test]
    fn test_recreate_replaces_views() {
        let mut gpu = HeadlessGpu::new(EXTENT, 2);
        let old = gpu.swapchain().image_views.clone();
        gpu.set_next_image_count(4);
        let info = gpu
            .recreate_swapchain(vk::Extent2D {
                width: 640,
                height: 480,
            })
            .unwrap();
        assert_eq!(info.image_count(), 4);
        assert_eq!(info.extent.width, 640);
        assert!(info.image_views.iter().all(|v| !old.contains(v)));
        assert_eq!(gpu.live_objects(), 4);
    }

    #[test]
    fn test_descriptor_binding_table() {
        let mut gpu = HeadlessGpu::new(EXTENT, 2);
        let pool = gpu.create_descriptor_pool(2, &[]).unwrap();
        let layout = gpu.create_descriptor_set_layout(&[]).unwrap();
        let sets = gpu.allocate_descriptor_sets(pool, layout, 2).unwrap();
        let view = vk::ImageView::from_raw(99);

        gpu.update_descriptor_sets(&[DescriptorWrite::SampledImages {
            set: sets[1],
            binding: 1,
            first_element: 5,
            images: vec![(view, vk::Sampler::null())],
        }]);

        assert_eq!(
            gpu.bound(sets[1], 1, 5),
            Some(BoundResource::SampledImage(view))
        );
        assert_eq!(gpu.bound(sets[0], 1, 5), None);
    }

    #[test]
    fn test_buffer_writes_are_range_checked() {
        let mut gpu = HeadlessGpu::new(EXTENT, 2);
        let buffer = gpu.create_buffer(BufferUsage::Uniform, 8).unwrap();
        gpu.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(gpu.buffer_contents(buffer), Some(&[0, 0, 0, 0, 1, 2, 3, 4][..]));
        assert!(gpu.write_buffer(buffer, 6, &[0; 4]).is_err());
    }

    #[test]
    fn test_double_destroy_is_counted() {
        let mut gpu = HeadlessGpu::new(EXTENT, 2);
        let sampler = gpu.create_sampler(&SamplerDesc { anisotropy: None }).unwrap();
        gpu.destroy_sampler(sampler);
        gpu.destroy_sampler(sampler);
        assert_eq!(gpu.invalid_destroys(), 1);
    }
}
