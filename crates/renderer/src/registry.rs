//! GPU resources shared by every pass, most of them indexed by swapchain image.
//!
//! Persistent (created once):
//! - the quad geometry buffer (vertices followed by `u16` indices)
//! - the sampler and the default texture
//! - the [`InstanceTable`] and each instance's texture
//!
//! Per swapchain image (rebuilt with the swapchain):
//! - a [`FrameUniforms`] buffer
//! - scene color and depth attachments, the main framebuffer and, with the
//!   overlay enabled, the overlay framebuffer
//! - one descriptor set binding the uniform buffer, the full sampler array and
//!   the scene color input attachment
//!
//! Structural changes ([`ResourceRegistry::add_instance`]) idle the device
//! before touching descriptor sets, since command buffers that reference them
//! may still be executing.

use ash::vk;
use glam::Mat4;
use tracing::{debug, info};

use renderer_core::config::MAX_INSTANCE_TEXTURES;
use renderer_resources::TexturePixels;
use renderer_rhi::buffer::BufferUsage;
use renderer_rhi::descriptor::{DescriptorWrite, pool_sizes_for};
use renderer_rhi::image::{RenderTargetDesc, SamplerDesc, TextureDesc};
use renderer_rhi::vertex::quad_geometry_bytes;
use renderer_rhi::{Gpu, RhiError, SwapchainInfo};
use renderer_scene::Transform;

use crate::error::{RendererError, RendererResult};
use crate::render_graph::{
    BINDING_FRAME_UNIFORMS, BINDING_SCENE_COLOR, BINDING_TEXTURES, RenderGraph,
    descriptor_bindings,
};
use crate::ubo::FrameUniforms;

/// A drawable copy of the quad.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instance {
    pub transform: Transform,
    /// Index into the sampler array; equal to the instance's position in the table.
    pub texture_slot: u32,
    texture: vk::ImageView,
}

impl Instance {
    #[inline]
    pub fn texture(&self) -> vk::ImageView {
        self.texture
    }
}

/// Append-only instance list with a checked capacity.
#[derive(Debug)]
pub struct InstanceTable {
    capacity: usize,
    entries: Vec<Instance>,
}

impl InstanceTable {
    /// `capacity` is clamped to the sampler array size.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_INSTANCE_TEXTURES as usize);
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Slot the next instance would take.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::CapacityExceeded`] when the table is full.
    pub fn next_slot(&self) -> RendererResult<u32> {
        if self.is_full() {
            return Err(RendererError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        Ok(self.entries.len() as u32)
    }

    fn push(&mut self, transform: Transform, texture: vk::ImageView) -> RendererResult<u32> {
        let texture_slot = self.next_slot()?;
        self.entries.push(Instance {
            transform,
            texture_slot,
            texture,
        });
        Ok(texture_slot)
    }

    pub fn get(&self, slot: usize) -> Option<&Instance> {
        self.entries.get(slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.entries.iter()
    }
}

/// Resources owned by one swapchain image. Null handles were never created.
#[derive(Clone, Copy, Debug, Default)]
struct ImageResources {
    uniform_buffer: vk::Buffer,
    scene_color: vk::ImageView,
    depth: vk::ImageView,
    framebuffer: vk::Framebuffer,
    overlay_framebuffer: vk::Framebuffer,
    descriptor_set: vk::DescriptorSet,
}

/// Owner of buffers, images, descriptor sets and framebuffers.
pub struct ResourceRegistry {
    geometry: vk::Buffer,
    sampler: vk::Sampler,
    default_texture: vk::ImageView,
    instances: InstanceTable,
    descriptor_pool: Option<vk::DescriptorPool>,
    images: Vec<ImageResources>,
    extent: vk::Extent2D,
}

impl ResourceRegistry {
    /// Creates the persistent resources and everything the current swapchain needs.
    ///
    /// # Errors
    ///
    /// Returns an error if any allocation or upload fails; partial work is destroyed.
    pub fn new(
        gpu: &mut dyn Gpu,
        graph: &RenderGraph,
        swapchain: &SwapchainInfo,
        default_texture: &TexturePixels,
        capacity: usize,
    ) -> RendererResult<Self> {
        let mut registry = Self {
            geometry: vk::Buffer::null(),
            sampler: vk::Sampler::null(),
            default_texture: vk::ImageView::null(),
            instances: InstanceTable::new(capacity),
            descriptor_pool: None,
            images: Vec::new(),
            extent: swapchain.extent,
        };

        if let Err(e) = registry.create_persistent(gpu, default_texture) {
            registry.destroy(gpu);
            return Err(e);
        }
        if let Err(e) = registry.build_per_image(gpu, graph, swapchain) {
            registry.destroy(gpu);
            return Err(e);
        }

        info!(
            "Resource registry created: {} image(s), instance capacity {}",
            registry.images.len(),
            registry.instances.capacity()
        );
        Ok(registry)
    }

    fn create_persistent(
        &mut self,
        gpu: &mut dyn Gpu,
        default_texture: &TexturePixels,
    ) -> RendererResult<()> {
        self.geometry = gpu.create_buffer_with_data(BufferUsage::Geometry, &quad_geometry_bytes())?;
        let sampler_desc = SamplerDesc::for_capabilities(gpu.capabilities());
        self.sampler = gpu.create_sampler(&sampler_desc)?;
        self.default_texture = gpu.create_texture(&TextureDesc {
            width: default_texture.width,
            height: default_texture.height,
            pixels: &default_texture.pixels,
            label: "default",
        })?;
        Ok(())
    }

    /// Creates the per-image resources and writes every descriptor set.
    ///
    /// # Errors
    ///
    /// Returns an error if any creation fails. Resources created before the
    /// failure stay tracked and are freed by the next
    /// [`release_per_image`](Self::release_per_image).
    pub fn build_per_image(
        &mut self,
        gpu: &mut dyn Gpu,
        graph: &RenderGraph,
        swapchain: &SwapchainInfo,
    ) -> RendererResult<()> {
        let count = swapchain.image_count() as u32;
        let extent = swapchain.extent;
        self.extent = extent;

        let pool = gpu.create_descriptor_pool(count, &pool_sizes_for(&descriptor_bindings(), count))?;
        self.descriptor_pool = Some(pool);
        let sets = gpu.allocate_descriptor_sets(pool, graph.set_layout(), count)?;

        for (&swapchain_view, &descriptor_set) in swapchain.image_views.iter().zip(&sets) {
            self.images.push(ImageResources {
                descriptor_set,
                ..Default::default()
            });
            let index = self.images.len() - 1;

            let uniform_buffer = gpu.create_buffer(BufferUsage::Uniform, FrameUniforms::SIZE as u64)?;
            self.images[index].uniform_buffer = uniform_buffer;

            let scene_color = gpu.create_render_target(&RenderTargetDesc::input_color(
                extent,
                graph.swapchain_format(),
            ))?;
            self.images[index].scene_color = scene_color;

            let depth =
                gpu.create_render_target(&RenderTargetDesc::depth(extent, graph.depth_format()))?;
            self.images[index].depth = depth;

            self.images[index].framebuffer = gpu.create_framebuffer(
                graph.render_pass(),
                &[scene_color, depth, swapchain_view],
                extent,
            )?;

            if let Some(overlay_pass) = graph.overlay_pass() {
                self.images[index].overlay_framebuffer =
                    gpu.create_framebuffer(overlay_pass, &[swapchain_view], extent)?;
            }
        }

        let mut writes = Vec::with_capacity(self.images.len() * 3);
        for image in &self.images {
            writes.push(DescriptorWrite::UniformBuffer {
                set: image.descriptor_set,
                binding: BINDING_FRAME_UNIFORMS,
                buffer: image.uniform_buffer,
                range: FrameUniforms::SIZE as u64,
            });
            writes.push(self.texture_array_write(image.descriptor_set));
            writes.push(DescriptorWrite::InputAttachment {
                set: image.descriptor_set,
                binding: BINDING_SCENE_COLOR,
                view: image.scene_color,
            });
        }
        gpu.update_descriptor_sets(&writes);

        debug!(
            "Built per-image resources for {} image(s) at {}x{}",
            self.images.len(),
            extent.width,
            extent.height
        );
        Ok(())
    }

    /// Every sampler slot: the owning instance's texture, else the default texture.
    fn texture_array_write(&self, set: vk::DescriptorSet) -> DescriptorWrite {
        let images = (0..MAX_INSTANCE_TEXTURES as usize)
            .map(|slot| {
                let view = self
                    .instances
                    .get(slot)
                    .map_or(self.default_texture, Instance::texture);
                (view, self.sampler)
            })
            .collect();
        DescriptorWrite::SampledImages {
            set,
            binding: BINDING_TEXTURES,
            first_element: 0,
            images,
        }
    }

    /// Destroys the per-image resources and the descriptor pool. The device must be idle.
    pub fn release_per_image(&mut self, gpu: &mut dyn Gpu) {
        for image in self.images.drain(..) {
            if image.overlay_framebuffer != vk::Framebuffer::null() {
                gpu.destroy_framebuffer(image.overlay_framebuffer);
            }
            if image.framebuffer != vk::Framebuffer::null() {
                gpu.destroy_framebuffer(image.framebuffer);
            }
            if image.depth != vk::ImageView::null() {
                gpu.destroy_image(image.depth);
            }
            if image.scene_color != vk::ImageView::null() {
                gpu.destroy_image(image.scene_color);
            }
            if image.uniform_buffer != vk::Buffer::null() {
                gpu.destroy_buffer(image.uniform_buffer);
            }
        }
        if let Some(pool) = self.descriptor_pool.take() {
            gpu.destroy_descriptor_pool(pool);
        }
    }

    /// Writes the per-frame uniform block of `image_index`.
    ///
    /// The caller must have confirmed through
    /// [`FrameSynchronizer::track_image`](crate::FrameSynchronizer::track_image)
    /// that no unretired submission reads this image's buffer.
    pub fn update_frame_uniforms(
        &self,
        gpu: &mut dyn Gpu,
        image_index: u32,
        view_projection: Mat4,
        time: f32,
    ) -> RendererResult<()> {
        let image = self.image(image_index)?;
        let uniforms = FrameUniforms::new(view_projection, time);
        gpu.write_buffer(image.uniform_buffer, 0, bytemuck::bytes_of(&uniforms))?;
        Ok(())
    }

    /// Uploads `texture`, appends an instance and points every descriptor set's
    /// sampler array at the new texture.
    ///
    /// The capacity check runs first: a full table returns
    /// [`RendererError::CapacityExceeded`] with nothing modified. Otherwise the
    /// device is idled before the upload and the descriptor rewrite. Command
    /// buffers must be re-recorded afterwards.
    pub fn add_instance(
        &mut self,
        gpu: &mut dyn Gpu,
        texture: &TexturePixels,
        transform: Transform,
    ) -> RendererResult<u32> {
        let slot = self.instances.next_slot()?;
        let desc = TextureDesc {
            width: texture.width,
            height: texture.height,
            pixels: &texture.pixels,
            label: "instance",
        };
        desc.validate()?;

        gpu.wait_idle()?;
        let view = gpu.create_texture(&desc)?;
        if let Err(e) = self.instances.push(transform, view) {
            gpu.destroy_image(view);
            return Err(e);
        }

        let writes: Vec<DescriptorWrite> = self
            .images
            .iter()
            .map(|image| self.texture_array_write(image.descriptor_set))
            .collect();
        gpu.update_descriptor_sets(&writes);

        info!(
            "Instance {} added at {:?} ({}x{} texture)",
            slot, transform.position, texture.width, texture.height
        );
        Ok(slot)
    }

    /// Destroys everything. The device must be idle.
    pub fn destroy(&mut self, gpu: &mut dyn Gpu) {
        self.release_per_image(gpu);
        for instance in self.instances.entries.drain(..) {
            gpu.destroy_image(instance.texture);
        }
        if self.default_texture != vk::ImageView::null() {
            gpu.destroy_image(std::mem::take(&mut self.default_texture));
        }
        if self.sampler != vk::Sampler::null() {
            gpu.destroy_sampler(std::mem::take(&mut self.sampler));
        }
        if self.geometry != vk::Buffer::null() {
            gpu.destroy_buffer(std::mem::take(&mut self.geometry));
        }
    }

    fn image(&self, image_index: u32) -> RendererResult<&ImageResources> {
        self.images.get(image_index as usize).ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "swapchain image {} of {}",
                image_index,
                self.images.len()
            ))
            .into()
        })
    }

    #[inline]
    pub fn instances(&self) -> &InstanceTable {
        &self.instances
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn geometry_buffer(&self) -> vk::Buffer {
        self.geometry
    }

    #[inline]
    pub fn default_texture(&self) -> vk::ImageView {
        self.default_texture
    }

    pub fn descriptor_set(&self, image_index: u32) -> Option<vk::DescriptorSet> {
        self.images.get(image_index as usize).map(|i| i.descriptor_set)
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.images.get(image_index as usize).map(|i| i.framebuffer)
    }

    /// Overlay framebuffer, when the overlay pass is enabled.
    pub fn overlay_framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.images
            .get(image_index as usize)
            .map(|i| i.overlay_framebuffer)
            .filter(|fb| *fb != vk::Framebuffer::null())
    }

    pub fn uniform_buffer(&self, image_index: u32) -> Option<vk::Buffer> {
        self.images.get(image_index as usize).map(|i| i.uniform_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::RendererAssets;
    use glam::Vec3;
    use renderer_rhi::headless::{BoundResource, HeadlessGpu};

    fn setup(capacity: usize) -> (HeadlessGpu, RenderGraph, ResourceRegistry) {
        let mut gpu = HeadlessGpu::new(
            vk::Extent2D {
                width: 64,
                height: 48,
            },
            3,
        );
        let assets = RendererAssets::placeholder();
        let graph = RenderGraph::new(&mut gpu, &assets, false).unwrap();
        let swapchain = gpu.swapchain().clone();
        let registry = ResourceRegistry::new(
            &mut gpu,
            &graph,
            &swapchain,
            &assets.default_texture,
            capacity,
        )
        .unwrap();
        (gpu, graph, registry)
    }

    #[test]
    fn test_instance_table_capacity() {
        let mut table = InstanceTable::new(2);
        assert_eq!(table.next_slot().unwrap(), 0);
        table.push(Transform::IDENTITY, vk::ImageView::null()).unwrap();
        table.push(Transform::IDENTITY, vk::ImageView::null()).unwrap();
        assert!(table.is_full());
        assert!(matches!(
            table.next_slot(),
            Err(RendererError::CapacityExceeded { capacity: 2 })
        ));
        assert_eq!(InstanceTable::new(1000).capacity(), MAX_INSTANCE_TEXTURES as usize);
    }

    #[test]
    fn test_initial_sets_use_default_texture_everywhere() {
        let (gpu, _graph, registry) = setup(4);
        for image in 0..registry.image_count() as u32 {
            let set = registry.descriptor_set(image).unwrap();
            for slot in [0, 1, MAX_INSTANCE_TEXTURES - 1] {
                assert_eq!(
                    gpu.bound(set, BINDING_TEXTURES, slot),
                    Some(BoundResource::SampledImage(registry.default_texture()))
                );
            }
            assert!(matches!(
                gpu.bound(set, BINDING_SCENE_COLOR, 0),
                Some(BoundResource::InputAttachment(_))
            ));
        }
    }

    #[test]
    fn test_add_instance_rewrites_every_set() {
        let (mut gpu, _graph, mut registry) = setup(4);
        let texture = TexturePixels::solid(2, 2, [1, 2, 3, 4]);

        let slot = registry
            .add_instance(&mut gpu, &texture, Transform::from_position(Vec3::X))
            .unwrap();
        assert_eq!(slot, 0);

        let view = registry.instances().get(0).unwrap().texture();
        for image in 0..registry.image_count() as u32 {
            let set = registry.descriptor_set(image).unwrap();
            assert_eq!(
                gpu.bound(set, BINDING_TEXTURES, 0),
                Some(BoundResource::SampledImage(view))
            );
            assert_eq!(
                gpu.bound(set, BINDING_TEXTURES, 1),
                Some(BoundResource::SampledImage(registry.default_texture()))
            );
        }
    }

    #[test]
    fn test_bad_texture_leaves_table_untouched() {
        let (mut gpu, _graph, mut registry) = setup(4);
        let broken = TexturePixels {
            width: 4,
            height: 4,
            pixels: vec![0; 3],
        };
        assert!(registry.add_instance(&mut gpu, &broken, Transform::IDENTITY).is_err());
        assert!(registry.instances().is_empty());
    }

    #[test]
    fn test_uniform_write() {
        let (mut gpu, _graph, registry) = setup(1);
        registry
            .update_frame_uniforms(&mut gpu, 2, Mat4::IDENTITY, 1.5)
            .unwrap();
        let contents = gpu.buffer_contents(registry.uniform_buffer(2).unwrap()).unwrap();
        assert_eq!(&contents[64..68], &1.5f32.to_le_bytes());
        assert!(registry.update_frame_uniforms(&mut gpu, 3, Mat4::IDENTITY, 0.0).is_err());
    }

    #[test]
    fn test_release_and_destroy_leave_nothing_behind() {
        let (mut gpu, mut graph, mut registry) = setup(2);
        registry
            .add_instance(&mut gpu, &TexturePixels::solid(1, 1, [0; 4]), Transform::IDENTITY)
            .unwrap();
        let views = gpu.swapchain().image_views.len();

        registry.destroy(&mut gpu);
        graph.destroy(&mut gpu);
        assert_eq!(gpu.live_objects(), views);
        assert_eq!(gpu.invalid_destroys(), 0);
    }
}
