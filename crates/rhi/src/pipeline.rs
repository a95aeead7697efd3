//! Graphics pipelines bound to a render-pass subpass.
//!
//! [`GraphicsPipelineDesc`] owns its SPIR-V and fixed-function state so it can
//! be handed to any [`Gpu`](crate::Gpu) backend. Viewport and scissor are
//! always dynamic, so pipelines survive nothing but their render pass: they
//! are rebuilt with it on swapchain recreation.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::{Shader, ShaderStage};
use crate::vertex::Vertex;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PolygonMode {
    #[default]
    Fill,
    /// Edges only. Requires the `wireframe` device capability.
    Line,
}

impl PolygonMode {
    pub fn to_vk(self) -> vk::PolygonMode {
        match self {
            PolygonMode::Fill => vk::PolygonMode::FILL,
            PolygonMode::Line => vk::PolygonMode::LINE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    None,
    #[default]
    Back,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Back => vk::CullModeFlags::BACK,
        }
    }
}

/// Vertex input consumed by a pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VertexInput {
    /// Vertices are generated in the shader from `gl_VertexIndex`.
    #[default]
    None,
    /// [`Vertex`] at binding 0.
    Mesh,
}

impl VertexInput {
    fn descriptions(
        self,
    ) -> (
        Vec<vk::VertexInputBindingDescription>,
        Vec<vk::VertexInputAttributeDescription>,
    ) {
        match self {
            VertexInput::None => (Vec::new(), Vec::new()),
            VertexInput::Mesh => (
                vec![Vertex::binding_description()],
                Vertex::attribute_descriptions().to_vec(),
            ),
        }
    }
}

/// Everything needed to build one graphics pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphicsPipelineDesc {
    pub label: String,
    pub vertex_spirv: Vec<u32>,
    pub fragment_spirv: Vec<u32>,
    pub vertex_input: VertexInput,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub depth_test: bool,
    pub depth_write: bool,
    /// Subpass of the render pass the pipeline is used in.
    pub subpass: u32,
    pub color_attachment_count: u32,
}

impl GraphicsPipelineDesc {
    /// Counter-clockwise front faces, triangle lists, no blending.
    pub fn new(label: impl Into<String>, vertex_spirv: Vec<u32>, fragment_spirv: Vec<u32>) -> Self {
        Self {
            label: label.into(),
            vertex_spirv,
            fragment_spirv,
            vertex_input: VertexInput::None,
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            depth_test: false,
            depth_write: false,
            subpass: 0,
            color_attachment_count: 1,
        }
    }

    pub fn vertex_input(mut self, input: VertexInput) -> Self {
        self.vertex_input = input;
        self
    }

    pub fn polygon_mode(mut self, mode: PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    /// Enables depth testing (`LESS`) and optionally writes.
    pub fn depth(mut self, test: bool, write: bool) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self
    }

    pub fn subpass(mut self, subpass: u32) -> Self {
        self.subpass = subpass;
        self
    }
}

/// RAII pipeline layout.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(
        device: Arc<Device>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout: {} set layout(s), {} push constant range(s)",
            set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// RAII graphics pipeline.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    /// Builds `desc` for `subpass` of `render_pass`.
    ///
    /// # Errors
    ///
    /// Returns an error if either shader is not SPIR-V or pipeline creation fails.
    pub fn new_graphics(
        device: Arc<Device>,
        desc: &GraphicsPipelineDesc,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> RhiResult<Self> {
        let vertex = Shader::from_spirv_words(device.clone(), &desc.vertex_spirv, ShaderStage::Vertex)?;
        let fragment =
            Shader::from_spirv_words(device.clone(), &desc.fragment_spirv, ShaderStage::Fragment)?;
        let stages = [vertex.stage_create_info(), fragment.stage_create_info()];

        let (bindings, attributes) = desc.vertex_input.descriptions();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(desc.polygon_mode.to_vk())
            .line_width(1.0)
            .cull_mode(desc.cull_mode.to_vk())
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(vk::CompareOp::LESS);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = (0..desc
            .color_attachment_count)
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(desc.subpass);

        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, e)| {
                    RhiError::PipelineError(format!("failed to create '{}': {e}", desc.label))
                })?
        };
        let pipeline = pipelines.into_iter().next().ok_or_else(|| {
            RhiError::PipelineError(format!("no pipeline returned for '{}'", desc.label))
        })?;

        debug!(
            "Created pipeline '{}' (subpass {}, {:?})",
            desc.label, desc.subpass, desc.polygon_mode
        );

        Ok(Self { device, pipeline })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polygon_mode_to_vk() {
        assert_eq!(PolygonMode::Fill.to_vk(), vk::PolygonMode::FILL);
        assert_eq!(PolygonMode::Line.to_vk(), vk::PolygonMode::LINE);
    }

    #[test]
    fn test_desc_builder() {
        let desc = GraphicsPipelineDesc::new("scene", vec![1], vec![2])
            .vertex_input(VertexInput::Mesh)
            .polygon_mode(PolygonMode::Line)
            .depth(true, true)
            .subpass(0);
        assert_eq!(desc.vertex_input, VertexInput::Mesh);
        assert_eq!(desc.polygon_mode, PolygonMode::Line);
        assert!(desc.depth_test && desc.depth_write);
        assert_eq!(desc.color_attachment_count, 1);
    }

    #[test]
    fn test_vertex_input_descriptions() {
        let (bindings, attributes) = VertexInput::None.descriptions();
        assert!(bindings.is_empty() && attributes.is_empty());

        let (bindings, attributes) = VertexInput::Mesh.descriptions();
        assert_eq!(bindings.len(), 1);
        assert_eq!(attributes.len(), 3);
    }
}
