//! Descriptor set layouts, pools and set updates.
//!
//! Writes are described by the owned [`DescriptorWrite`] enum so that both
//! backends (Vulkan and headless) can consume the same update list. The
//! Vulkan side turns them into `VkWriteDescriptorSet`s in [`apply_writes`].

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// One descriptor update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DescriptorWrite {
    UniformBuffer {
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        range: vk::DeviceSize,
    },
    /// Consecutive elements of a combined-image-sampler array, starting at
    /// `first_element`. Images are expected in `SHADER_READ_ONLY_OPTIMAL`.
    SampledImages {
        set: vk::DescriptorSet,
        binding: u32,
        first_element: u32,
        images: Vec<(vk::ImageView, vk::Sampler)>,
    },
    /// An attachment read through `subpassLoad`.
    InputAttachment {
        set: vk::DescriptorSet,
        binding: u32,
        view: vk::ImageView,
    },
}

impl DescriptorWrite {
    pub fn set(&self) -> vk::DescriptorSet {
        match self {
            DescriptorWrite::UniformBuffer { set, .. }
            | DescriptorWrite::SampledImages { set, .. }
            | DescriptorWrite::InputAttachment { set, .. } => *set,
        }
    }

    pub fn binding(&self) -> u32 {
        match self {
            DescriptorWrite::UniformBuffer { binding, .. }
            | DescriptorWrite::SampledImages { binding, .. }
            | DescriptorWrite::InputAttachment { binding, .. } => *binding,
        }
    }
}

/// RAII descriptor set layout.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
        debug!("Destroyed descriptor set layout");
    }
}

/// RAII descriptor pool. Sets allocated from it die with it.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocates `count` sets sharing one layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is exhausted.
    pub fn allocate(
        &self,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };
        debug!("Allocated {} descriptor set(s)", sets.len());
        Ok(sets)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Applies a batch of writes with a single `vkUpdateDescriptorSets`.
pub fn apply_writes(device: &Device, writes: &[DescriptorWrite]) {
    if writes.is_empty() {
        return;
    }

    // Info arrays must stay alive until the update call, so they are built first.
    let buffer_infos: Vec<Vec<vk::DescriptorBufferInfo>> = writes
        .iter()
        .map(|write| match write {
            DescriptorWrite::UniformBuffer { buffer, range, .. } => {
                vec![buffer_info(*buffer, 0, *range)]
            }
            _ => Vec::new(),
        })
        .collect();

    let image_infos: Vec<Vec<vk::DescriptorImageInfo>> = writes
        .iter()
        .map(|write| match write {
            DescriptorWrite::SampledImages { images, .. } => images
                .iter()
                .map(|&(view, sampler)| {
                    image_info(sampler, view, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                })
                .collect(),
            DescriptorWrite::InputAttachment { view, .. } => vec![image_info(
                vk::Sampler::null(),
                *view,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )],
            DescriptorWrite::UniformBuffer { .. } => Vec::new(),
        })
        .collect();

    let vk_writes: Vec<vk::WriteDescriptorSet> = writes
        .iter()
        .enumerate()
        .map(|(i, write)| {
            let base = vk::WriteDescriptorSet::default()
                .dst_set(write.set())
                .dst_binding(write.binding());
            match write {
                DescriptorWrite::UniformBuffer { .. } => base
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_infos[i]),
                DescriptorWrite::SampledImages { first_element, .. } => base
                    .dst_array_element(*first_element)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_infos[i]),
                DescriptorWrite::InputAttachment { .. } => base
                    .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
                    .image_info(&image_infos[i]),
            }
        })
        .collect();

    unsafe {
        device.handle().update_descriptor_sets(&vk_writes, &[]);
    }

    debug!("Applied {} descriptor write(s)", vk_writes.len());
}

#[inline]
pub fn buffer_info(
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    range: vk::DeviceSize,
) -> vk::DescriptorBufferInfo {
    vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range)
}

#[inline]
pub fn image_info(
    sampler: vk::Sampler,
    image_view: vk::ImageView,
    image_layout: vk::ImageLayout,
) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .sampler(sampler)
        .image_view(image_view)
        .image_layout(image_layout)
}

/// Shorthand constructors for layout bindings.
pub struct DescriptorBindingBuilder;

impl DescriptorBindingBuilder {
    #[inline]
    pub fn uniform_buffer(
        binding: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(stage_flags)
    }

    /// An array of `count` combined image samplers indexed in the shader.
    #[inline]
    pub fn combined_image_sampler_array(
        binding: u32,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(count)
            .stage_flags(stage_flags)
    }

    /// Input attachments are only visible to fragment shaders.
    #[inline]
    pub fn input_attachment(binding: u32) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::INPUT_ATTACHMENT)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
    }
}

/// Pool sizes covering `sets` copies of `bindings`.
pub fn pool_sizes_for(
    bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    sets: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in bindings {
        let count = binding.descriptor_count * sets;
        match sizes.iter_mut().find(|s| s.ty == binding.descriptor_type) {
            Some(size) => size.descriptor_count += count,
            None => sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(binding.descriptor_type)
                    .descriptor_count(count),
            ),
        }
    }
    sizes
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_sampler_array_binding() {
        let binding = DescriptorBindingBuilder::combined_image_sampler_array(
            1,
            64,
            vk::ShaderStageFlags::FRAGMENT,
        );
        assert_eq!(binding.binding, 1);
        assert_eq!(
            binding.descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(binding.descriptor_count, 64);
    }

    #[test]
    fn test_input_attachment_binding_is_fragment_only() {
        let binding = DescriptorBindingBuilder::input_attachment(2);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::INPUT_ATTACHMENT);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_pool_sizes_merge_types() {
        let bindings = [
            DescriptorBindingBuilder::uniform_buffer(0, vk::ShaderStageFlags::VERTEX),
            DescriptorBindingBuilder::combined_image_sampler_array(
                1,
                64,
                vk::ShaderStageFlags::FRAGMENT,
            ),
            DescriptorBindingBuilder::input_attachment(2),
        ];
        let sizes = pool_sizes_for(&bindings, 3);
        assert_eq!(sizes.len(), 3);
        let samplers = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .map(|s| s.descriptor_count);
        assert_eq!(samplers, Some(192));
    }

    #[test]
    fn test_write_accessors() {
        let set = vk::DescriptorSet::from_raw(7);
        let write = DescriptorWrite::InputAttachment {
            set,
            binding: 2,
            view: vk::ImageView::null(),
        };
        assert_eq!(write.set(), set);
        assert_eq!(write.binding(), 2);
    }
}
