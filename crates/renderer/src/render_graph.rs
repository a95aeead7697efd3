//! The pass graph: render passes, subpass dependencies and the pipelines bound to them.
//!
//! The main render pass has three attachments and two subpasses:
//!
//! ```text
//! attachment 0  scene color   CLEAR  written by geometry, read as input attachment by composition
//! attachment 1  depth         CLEAR  geometry only
//! attachment 2  swapchain     CLEAR  written by composition
//!
//! EXTERNAL --(color output)--> GEOMETRY --(color write -> input read, by region)--> COMPOSITION --> EXTERNAL
//! EXTERNAL --(color output, swapchain layout transition)----------------------------> COMPOSITION
//! ```
//!
//! With the overlay enabled a second render pass loads the swapchain image,
//! and the main pass leaves it in `COLOR_ATTACHMENT_OPTIMAL` for it.
//!
//! The descriptor set layout and pipeline layout outlive the swapchain. The
//! render passes and pipelines depend on its format and are rebuilt with it.

use ash::vk;
use tracing::{debug, info};

use renderer_core::config::MAX_INSTANCE_TEXTURES;
use renderer_rhi::Gpu;
use renderer_rhi::descriptor::DescriptorBindingBuilder;
use renderer_rhi::pipeline::{CullMode, GraphicsPipelineDesc, PolygonMode, VertexInput};
use renderer_rhi::render_pass::{AttachmentDesc, DependencyDesc, RenderPassDesc, SubpassDesc};

use crate::assets::RendererAssets;
use crate::error::RendererResult;
use crate::ubo::InstancePush;

pub const ATTACHMENT_SCENE_COLOR: u32 = 0;
pub const ATTACHMENT_DEPTH: u32 = 1;
pub const ATTACHMENT_SWAPCHAIN: u32 = 2;

pub const SUBPASS_GEOMETRY: u32 = 0;
pub const SUBPASS_COMPOSITION: u32 = 1;

pub const BINDING_FRAME_UNIFORMS: u32 = 0;
pub const BINDING_TEXTURES: u32 = 1;
pub const BINDING_SCENE_COLOR: u32 = 2;

/// The closed set of pipelines the graph can build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineVariant {
    Solid,
    /// Only built when the device supports line polygon mode.
    Wireframe,
    Composition,
}

impl PipelineVariant {
    pub fn subpass(self) -> u32 {
        match self {
            PipelineVariant::Solid | PipelineVariant::Wireframe => SUBPASS_GEOMETRY,
            PipelineVariant::Composition => SUBPASS_COMPOSITION,
        }
    }
}

/// Set 0 layout shared by both subpasses.
pub fn descriptor_bindings() -> [vk::DescriptorSetLayoutBinding<'static>; 3] {
    [
        DescriptorBindingBuilder::uniform_buffer(
            BINDING_FRAME_UNIFORMS,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        ),
        DescriptorBindingBuilder::combined_image_sampler_array(
            BINDING_TEXTURES,
            MAX_INSTANCE_TEXTURES,
            vk::ShaderStageFlags::FRAGMENT,
        ),
        DescriptorBindingBuilder::input_attachment(BINDING_SCENE_COLOR),
    ]
}

/// Push constant range carrying [`InstancePush`].
pub fn push_constant_range() -> vk::PushConstantRange {
    vk::PushConstantRange::default()
        .stage_flags(instance_push_stages())
        .offset(0)
        .size(InstancePush::SIZE as u32)
}

#[inline]
pub fn instance_push_stages() -> vk::ShaderStageFlags {
    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
}

/// Geometry + composition render pass.
///
/// `overlay` decides whether the swapchain image ends ready for present or for
/// another color pass.
pub fn main_pass_desc(
    swapchain_format: vk::Format,
    depth_format: vk::Format,
    overlay: bool,
) -> RenderPassDesc {
    let swapchain_final = if overlay {
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
    } else {
        vk::ImageLayout::PRESENT_SRC_KHR
    };

    let attachments = vec![
        AttachmentDesc {
            format: swapchain_format,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        },
        AttachmentDesc {
            format: depth_format,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        },
        AttachmentDesc {
            format: swapchain_format,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: swapchain_final,
        },
    ];

    let subpasses = vec![
        SubpassDesc {
            color_attachments: vec![ATTACHMENT_SCENE_COLOR],
            depth_attachment: Some(ATTACHMENT_DEPTH),
            input_attachments: vec![],
        },
        SubpassDesc {
            color_attachments: vec![ATTACHMENT_SWAPCHAIN],
            depth_attachment: None,
            input_attachments: vec![ATTACHMENT_SCENE_COLOR],
        },
    ];

    let (present_stage, present_access) = if overlay {
        (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
    } else {
        (
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        )
    };

    let dependencies = vec![
        DependencyDesc {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: SUBPASS_GEOMETRY,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            src_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            by_region: false,
        },
        // The swapchain image is first touched here; its layout transition
        // must wait for the acquire semaphore at color output.
        DependencyDesc {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: SUBPASS_COMPOSITION,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            by_region: false,
        },
        DependencyDesc {
            src_subpass: SUBPASS_GEOMETRY,
            dst_subpass: SUBPASS_COMPOSITION,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags::INPUT_ATTACHMENT_READ,
            by_region: true,
        },
        DependencyDesc {
            src_subpass: SUBPASS_COMPOSITION,
            dst_subpass: vk::SUBPASS_EXTERNAL,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: present_stage,
            src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: present_access,
            by_region: true,
        },
    ];

    RenderPassDesc {
        attachments,
        subpasses,
        dependencies,
    }
}

/// Single-subpass pass drawing on top of the composed swapchain image.
pub fn overlay_pass_desc(swapchain_format: vk::Format) -> RenderPassDesc {
    RenderPassDesc {
        attachments: vec![AttachmentDesc {
            format: swapchain_format,
            load_op: vk::AttachmentLoadOp::LOAD,
            store_op: vk::AttachmentStoreOp::STORE,
            initial_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        }],
        subpasses: vec![SubpassDesc {
            color_attachments: vec![0],
            ..Default::default()
        }],
        dependencies: vec![DependencyDesc {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags::COLOR_ATTACHMENT_READ
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            by_region: false,
        }],
    }
}

/// Pipeline descriptions, kept so pipelines can be rebuilt without reloading shaders.
#[derive(Clone, Debug)]
struct PipelineDescs {
    solid: GraphicsPipelineDesc,
    wireframe: Option<GraphicsPipelineDesc>,
    composition: GraphicsPipelineDesc,
}

impl PipelineDescs {
    fn new(assets: &RendererAssets, wireframe: bool) -> Self {
        let solid = GraphicsPipelineDesc::new(
            "geometry-solid",
            assets.geometry_vertex.clone(),
            assets.geometry_fragment.clone(),
        )
        .vertex_input(VertexInput::Mesh)
        .cull_mode(CullMode::None)
        .depth(true, true)
        .subpass(SUBPASS_GEOMETRY);

        let wireframe = wireframe.then(|| {
            let mut desc = solid
                .clone()
                .polygon_mode(PolygonMode::Line)
                .depth(false, false);
            desc.label = "geometry-wireframe".to_string();
            desc
        });

        let composition = GraphicsPipelineDesc::new(
            "composition",
            assets.composition_vertex.clone(),
            assets.composition_fragment.clone(),
        )
        .cull_mode(CullMode::None)
        .subpass(SUBPASS_COMPOSITION);

        Self {
            solid,
            wireframe,
            composition,
        }
    }
}

/// Owner of the render passes, layouts and pipelines.
pub struct RenderGraph {
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    descs: PipelineDescs,
    depth_format: vk::Format,
    overlay: bool,

    // Swapchain-dependent
    swapchain_format: vk::Format,
    render_pass: Option<vk::RenderPass>,
    overlay_pass: Option<vk::RenderPass>,
    solid: Option<vk::Pipeline>,
    wireframe: Option<vk::Pipeline>,
    composition: Option<vk::Pipeline>,
}

impl RenderGraph {
    /// Creates the layouts and builds passes and pipelines for the current swapchain.
    ///
    /// # Errors
    ///
    /// Returns an error if any object fails to build; everything created so far
    /// is destroyed.
    pub fn new(gpu: &mut dyn Gpu, assets: &RendererAssets, overlay: bool) -> RendererResult<Self> {
        let capabilities = *gpu.capabilities();
        let descs = PipelineDescs::new(assets, capabilities.wireframe);
        if !capabilities.wireframe {
            info!("Device lacks line polygon mode; wireframe pipeline not built");
        }

        let set_layout = gpu.create_descriptor_set_layout(&descriptor_bindings())?;
        let pipeline_layout =
            match gpu.create_pipeline_layout(&[set_layout], &[push_constant_range()]) {
                Ok(layout) => layout,
                Err(e) => {
                    gpu.destroy_descriptor_set_layout(set_layout);
                    return Err(e.into());
                }
            };

        let mut graph = Self {
            set_layout,
            pipeline_layout,
            descs,
            depth_format: capabilities.depth_format,
            overlay,
            swapchain_format: gpu.swapchain().format,
            render_pass: None,
            overlay_pass: None,
            solid: None,
            wireframe: None,
            composition: None,
        };

        let format = graph.swapchain_format;
        if let Err(e) = graph.build(gpu, format) {
            graph.destroy(gpu);
            return Err(e);
        }
        Ok(graph)
    }

    fn build(&mut self, gpu: &mut dyn Gpu, swapchain_format: vk::Format) -> RendererResult<()> {
        self.swapchain_format = swapchain_format;

        let main = main_pass_desc(swapchain_format, self.depth_format, self.overlay);
        let render_pass = gpu.create_render_pass(&main)?;
        self.render_pass = Some(render_pass);

        if self.overlay {
            self.overlay_pass = Some(gpu.create_render_pass(&overlay_pass_desc(swapchain_format))?);
        }

        self.solid = Some(gpu.create_graphics_pipeline(
            &self.descs.solid,
            self.pipeline_layout,
            render_pass,
        )?);
        if let Some(desc) = &self.descs.wireframe {
            self.wireframe =
                Some(gpu.create_graphics_pipeline(desc, self.pipeline_layout, render_pass)?);
        }
        self.composition = Some(gpu.create_graphics_pipeline(
            &self.descs.composition,
            self.pipeline_layout,
            render_pass,
        )?);

        info!(
            "Render graph built: {:?} swapchain, {:?} depth, overlay {}",
            swapchain_format, self.depth_format, self.overlay
        );
        Ok(())
    }

    /// Destroys passes and pipelines. The device must be idle.
    pub fn release(&mut self, gpu: &mut dyn Gpu) {
        for pipeline in [
            self.composition.take(),
            self.wireframe.take(),
            self.solid.take(),
        ]
        .into_iter()
        .flatten()
        {
            gpu.destroy_pipeline(pipeline);
        }
        if let Some(pass) = self.overlay_pass.take() {
            gpu.destroy_render_pass(pass);
        }
        if let Some(pass) = self.render_pass.take() {
            gpu.destroy_render_pass(pass);
        }
        debug!("Render graph passes and pipelines released");
    }

    /// Rebuilds passes and pipelines for a new swapchain format.
    pub fn rebuild(&mut self, gpu: &mut dyn Gpu, swapchain_format: vk::Format) -> RendererResult<()> {
        self.release(gpu);
        self.build(gpu, swapchain_format)
    }

    /// Destroys everything including the layouts.
    pub fn destroy(&mut self, gpu: &mut dyn Gpu) {
        self.release(gpu);
        if self.pipeline_layout != vk::PipelineLayout::null() {
            gpu.destroy_pipeline_layout(self.pipeline_layout);
            self.pipeline_layout = vk::PipelineLayout::null();
        }
        if self.set_layout != vk::DescriptorSetLayout::null() {
            gpu.destroy_descriptor_set_layout(self.set_layout);
            self.set_layout = vk::DescriptorSetLayout::null();
        }
    }

    #[inline]
    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout
    }

    #[inline]
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    /// Main render pass; `null` while released.
    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.unwrap_or_default()
    }

    #[inline]
    pub fn overlay_pass(&self) -> Option<vk::RenderPass> {
        self.overlay_pass
    }

    #[inline]
    pub fn overlay_enabled(&self) -> bool {
        self.overlay
    }

    pub fn pipeline(&self, variant: PipelineVariant) -> Option<vk::Pipeline> {
        match variant {
            PipelineVariant::Solid => self.solid,
            PipelineVariant::Wireframe => self.wireframe,
            PipelineVariant::Composition => self.composition,
        }
    }

    #[inline]
    pub fn has_wireframe(&self) -> bool {
        self.descs.wireframe.is_some()
    }

    #[inline]
    pub fn swapchain_format(&self) -> vk::Format {
        self.swapchain_format
    }

    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer_rhi::headless::HeadlessGpu;
    use renderer_rhi::physical_device::DeviceCapabilities;

    const FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;

    fn gpu(wireframe: bool) -> HeadlessGpu {
        HeadlessGpu::with_capabilities(
            vk::Extent2D {
                width: 32,
                height: 32,
            },
            2,
            DeviceCapabilities {
                wireframe,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_main_pass_orders_geometry_before_composition() {
        let desc = main_pass_desc(FORMAT, DEPTH, false);
        desc.validate().unwrap();

        let composition = &desc.subpasses[SUBPASS_COMPOSITION as usize];
        assert_eq!(composition.input_attachments, vec![ATTACHMENT_SCENE_COLOR]);
        assert_eq!(composition.color_attachments, vec![ATTACHMENT_SWAPCHAIN]);

        let edge = desc
            .dependencies
            .iter()
            .find(|d| d.src_subpass == SUBPASS_GEOMETRY && d.dst_subpass == SUBPASS_COMPOSITION)
            .expect("geometry -> composition dependency");
        assert!(edge.src_access.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
        assert!(edge.dst_access.contains(vk::AccessFlags::INPUT_ATTACHMENT_READ));
        assert!(edge.dst_stage.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
        assert!(edge.by_region);

        assert!(desc.dependencies.iter().any(|d| d.src_subpass == vk::SUBPASS_EXTERNAL
            && d.dst_subpass == SUBPASS_GEOMETRY));
        assert!(desc.dependencies.iter().any(|d| d.src_subpass == SUBPASS_COMPOSITION
            && d.dst_subpass == vk::SUBPASS_EXTERNAL));
    }

    #[test]
    fn test_swapchain_transition_waits_for_acquire_stage() {
        for overlay in [false, true] {
            let desc = main_pass_desc(FORMAT, DEPTH, overlay);
            let first_use = desc
                .subpasses
                .iter()
                .position(|s| {
                    s.color_attachments.contains(&ATTACHMENT_SWAPCHAIN)
                        || s.input_attachments.contains(&ATTACHMENT_SWAPCHAIN)
                })
                .expect("swapchain attachment is used") as u32;
            assert_eq!(first_use, SUBPASS_COMPOSITION);

            let edge = desc
                .dependencies
                .iter()
                .find(|d| d.src_subpass == vk::SUBPASS_EXTERNAL && d.dst_subpass == first_use)
                .expect("external edge into the first swapchain subpass");
            assert!(edge.src_stage.contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
            assert!(edge.dst_stage.contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
            assert!(edge.dst_access.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
        }
    }

    #[test]
    fn test_every_attachment_is_cleared_in_main_pass() {
        let desc = main_pass_desc(FORMAT, DEPTH, false);
        assert!(desc
            .attachments
            .iter()
            .all(|a| a.load_op == vk::AttachmentLoadOp::CLEAR));
    }

    #[test]
    fn test_overlay_changes_swapchain_final_layout() {
        let plain = main_pass_desc(FORMAT, DEPTH, false);
        let layered = main_pass_desc(FORMAT, DEPTH, true);
        let swap = ATTACHMENT_SWAPCHAIN as usize;
        assert_eq!(plain.attachments[swap].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(
            layered.attachments[swap].final_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );

        let overlay = overlay_pass_desc(FORMAT);
        overlay.validate().unwrap();
        assert_eq!(overlay.attachments[0].load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(
            overlay.attachments[0].initial_layout,
            layered.attachments[swap].final_layout
        );
        assert_eq!(overlay.attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn test_descriptor_bindings() {
        let bindings = descriptor_bindings();
        assert_eq!(bindings[1].descriptor_count, MAX_INSTANCE_TEXTURES);
        assert_eq!(bindings[2].descriptor_type, vk::DescriptorType::INPUT_ATTACHMENT);
    }

    #[test]
    fn test_pipelines_bound_to_subpasses() {
        let mut gpu = gpu(true);
        let mut graph = RenderGraph::new(&mut gpu, &RendererAssets::placeholder(), false).unwrap();

        for variant in [
            PipelineVariant::Solid,
            PipelineVariant::Wireframe,
            PipelineVariant::Composition,
        ] {
            let pipeline = graph.pipeline(variant).expect("pipeline built");
            let desc = gpu.pipeline_desc(pipeline).unwrap();
            assert_eq!(desc.subpass, variant.subpass());
        }
        let wire = graph.pipeline(PipelineVariant::Wireframe).unwrap();
        assert_eq!(gpu.pipeline_desc(wire).unwrap().polygon_mode, PolygonMode::Line);

        graph.destroy(&mut gpu);
    }

    #[test]
    fn test_no_wireframe_without_capability() {
        let mut gpu = gpu(false);
        let mut graph = RenderGraph::new(&mut gpu, &RendererAssets::placeholder(), true).unwrap();
        assert!(!graph.has_wireframe());
        assert!(graph.pipeline(PipelineVariant::Wireframe).is_none());
        assert!(graph.overlay_pass().is_some());
        graph.destroy(&mut gpu);
    }

    #[test]
    fn test_rebuild_replaces_handles_and_destroy_is_clean() {
        let mut gpu = gpu(true);
        let baseline = gpu.live_objects();
        let mut graph = RenderGraph::new(&mut gpu, &RendererAssets::placeholder(), true).unwrap();
        let old_pass = graph.render_pass();

        graph.rebuild(&mut gpu, vk::Format::R8G8B8A8_SRGB).unwrap();
        assert_ne!(graph.render_pass(), old_pass);
        assert_eq!(graph.swapchain_format(), vk::Format::R8G8B8A8_SRGB);
        assert!(gpu.render_pass_desc(old_pass).is_none());

        graph.destroy(&mut gpu);
        assert_eq!(gpu.live_objects(), baseline);
        assert_eq!(gpu.invalid_destroys(), 0);
    }
}
