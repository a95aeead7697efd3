//! Render pass and framebuffer descriptions.
//!
//! A [`RenderPassDesc`] is plain data: attachments, subpasses referring to
//! attachments by index, and the dependencies between subpasses. The Vulkan
//! backend turns it into a `VkRenderPass` with [`RenderPass::new`]; the
//! headless backend stores it as-is so tests can inspect the graph.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// One attachment slot of a render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

impl AttachmentDesc {
    fn to_vk(self) -> vk::AttachmentDescription {
        vk::AttachmentDescription::default()
            .format(self.format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(self.load_op)
            .store_op(self.store_op)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(self.initial_layout)
            .final_layout(self.final_layout)
    }
}

/// Attachment indices used by one subpass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubpassDesc {
    pub color_attachments: Vec<u32>,
    pub depth_attachment: Option<u32>,
    /// Attachments read with `subpassLoad`.
    pub input_attachments: Vec<u32>,
}

/// An execution and memory dependency between two subpasses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DependencyDesc {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub by_region: bool,
}

impl DependencyDesc {
    fn to_vk(self) -> vk::SubpassDependency {
        let flags = if self.by_region {
            vk::DependencyFlags::BY_REGION
        } else {
            vk::DependencyFlags::empty()
        };
        vk::SubpassDependency::default()
            .src_subpass(self.src_subpass)
            .dst_subpass(self.dst_subpass)
            .src_stage_mask(self.src_stage)
            .dst_stage_mask(self.dst_stage)
            .src_access_mask(self.src_access)
            .dst_access_mask(self.dst_access)
            .dependency_flags(flags)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderPassDesc {
    pub attachments: Vec<AttachmentDesc>,
    pub subpasses: Vec<SubpassDesc>,
    pub dependencies: Vec<DependencyDesc>,
}

impl RenderPassDesc {
    /// Checks that every subpass refers to existing attachments and every
    /// dependency to existing subpasses.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] naming the first bad reference.
    pub fn validate(&self) -> RhiResult<()> {
        if self.subpasses.is_empty() {
            return Err(RhiError::PipelineError(
                "render pass has no subpasses".to_string(),
            ));
        }

        let attachment_count = self.attachments.len() as u32;
        for (i, subpass) in self.subpasses.iter().enumerate() {
            let refs = subpass
                .color_attachments
                .iter()
                .chain(subpass.input_attachments.iter())
                .chain(subpass.depth_attachment.iter());
            for &index in refs {
                if index >= attachment_count {
                    return Err(RhiError::PipelineError(format!(
                        "subpass {i} references attachment {index}, only {attachment_count} exist"
                    )));
                }
            }
        }

        let subpass_count = self.subpasses.len() as u32;
        let in_range = |s: u32| s == vk::SUBPASS_EXTERNAL || s < subpass_count;
        for dep in &self.dependencies {
            if !in_range(dep.src_subpass) || !in_range(dep.dst_subpass) {
                return Err(RhiError::PipelineError(format!(
                    "dependency {} -> {} references a missing subpass",
                    dep.src_subpass, dep.dst_subpass
                )));
            }
        }
        Ok(())
    }
}

/// Clear value for one attachment, in attachment order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl ClearValue {
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            ClearValue::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
            },
        }
    }
}

/// Arguments for beginning a render pass over a whole framebuffer.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_values: Vec<ClearValue>,
}

/// RAII `VkRenderPass`.
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
}

impl RenderPass {
    /// # Errors
    ///
    /// Returns an error if the description is inconsistent or creation fails.
    pub fn new(device: Arc<Device>, desc: &RenderPassDesc) -> RhiResult<Self> {
        desc.validate()?;

        let attachments: Vec<vk::AttachmentDescription> =
            desc.attachments.iter().map(|a| a.to_vk()).collect();

        // Reference arrays per subpass; they must outlive `subpasses` below.
        let color_refs: Vec<Vec<vk::AttachmentReference>> = desc
            .subpasses
            .iter()
            .map(|s| {
                s.color_attachments
                    .iter()
                    .map(|&a| attachment_ref(a, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL))
                    .collect()
            })
            .collect();
        let input_refs: Vec<Vec<vk::AttachmentReference>> = desc
            .subpasses
            .iter()
            .map(|s| {
                s.input_attachments
                    .iter()
                    .map(|&a| attachment_ref(a, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL))
                    .collect()
            })
            .collect();
        let depth_refs: Vec<Option<vk::AttachmentReference>> = desc
            .subpasses
            .iter()
            .map(|s| {
                s.depth_attachment.map(|a| {
                    attachment_ref(a, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                })
            })
            .collect();

        let subpasses: Vec<vk::SubpassDescription> = (0..desc.subpasses.len())
            .map(|i| {
                let mut subpass = vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&color_refs[i])
                    .input_attachments(&input_refs[i]);
                if let Some(depth) = &depth_refs[i] {
                    subpass = subpass.depth_stencil_attachment(depth);
                }
                subpass
            })
            .collect();

        let dependencies: Vec<vk::SubpassDependency> =
            desc.dependencies.iter().map(|d| d.to_vk()).collect();

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        debug!(
            "Created render pass: {} attachment(s), {} subpass(es), {} dependencies",
            attachments.len(),
            subpasses.len(),
            dependencies.len()
        );

        Ok(Self {
            device,
            render_pass,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
        debug!("Destroyed render pass");
    }
}

/// RAII `VkFramebuffer`.
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
}

impl Framebuffer {
    /// # Errors
    ///
    /// Returns an error if framebuffer creation fails.
    pub fn new(
        device: Arc<Device>,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };
        Ok(Self {
            device,
            framebuffer,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[inline]
fn attachment_ref(attachment: u32, layout: vk::ImageLayout) -> vk::AttachmentReference {
    vk::AttachmentReference::default()
        .attachment(attachment)
        .layout(layout)
}
