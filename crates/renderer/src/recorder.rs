//! Pre-recorded command buffers, one per swapchain image.
//!
//! Buffers are recorded once and resubmitted every frame. They are re-recorded
//! only when something they reference changes: the render mode, the instance
//! table, or the swapchain.

use ash::vk;
use tracing::{debug, info, warn};

use renderer_rhi::render_pass::{ClearValue, RenderPassBegin};
use renderer_rhi::vertex::{QUAD_INDEX_TYPE, QUAD_INDICES, quad_index_offset};
use renderer_rhi::{Gpu, RhiError};

use crate::error::{RendererError, RendererResult};
use crate::overlay::OverlayPainter;
use crate::registry::ResourceRegistry;
use crate::render_graph::{PipelineVariant, RenderGraph, instance_push_stages};
use crate::ubo::InstancePush;

/// Which geometry pipelines draw the instances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RenderMode {
    Wireframe,
    #[default]
    Solid,
    /// Solid fill with the wireframe drawn over it.
    Both,
}

impl RenderMode {
    /// Cycle order: wireframe, solid, both, wireframe.
    pub fn next(self) -> Self {
        match self {
            RenderMode::Wireframe => RenderMode::Solid,
            RenderMode::Solid => RenderMode::Both,
            RenderMode::Both => RenderMode::Wireframe,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RenderMode::Wireframe => "wireframe",
            RenderMode::Solid => "solid",
            RenderMode::Both => "solid+wireframe",
        }
    }

    /// Pipelines bound in the geometry subpass, in draw order. Without
    /// wireframe support every mode draws solid once.
    pub fn geometry_variants(self, wireframe_available: bool) -> &'static [PipelineVariant] {
        match (self, wireframe_available) {
            (RenderMode::Solid, _) | (_, false) => &[PipelineVariant::Solid],
            (RenderMode::Wireframe, true) => &[PipelineVariant::Wireframe],
            (RenderMode::Both, true) => &[PipelineVariant::Solid, PipelineVariant::Wireframe],
        }
    }
}

impl std::fmt::Display for RenderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a recording reads.
pub struct RecordContext<'a> {
    pub graph: &'a RenderGraph,
    pub registry: &'a ResourceRegistry,
    pub overlay: &'a mut dyn OverlayPainter,
}

pub struct CommandRecorder {
    command_buffers: Vec<vk::CommandBuffer>,
    mode: RenderMode,
    clear_color: [f32; 4],
    rebuilds: u64,
    fallback_logged: bool,
}

impl CommandRecorder {
    pub fn new(
        gpu: &mut dyn Gpu,
        image_count: usize,
        mode: RenderMode,
        clear_color: [f32; 4],
    ) -> RendererResult<Self> {
        let command_buffers = gpu.allocate_command_buffers(image_count as u32)?;
        Ok(Self {
            command_buffers,
            mode,
            clear_color,
            rebuilds: 0,
            fallback_logged: false,
        })
    }

    /// Frees the current buffers and allocates `image_count` new ones. The device must be idle.
    pub fn reallocate(&mut self, gpu: &mut dyn Gpu, image_count: usize) -> RendererResult<()> {
        self.free(gpu);
        self.command_buffers = gpu.allocate_command_buffers(image_count as u32)?;
        Ok(())
    }

    /// Frees every command buffer. The device must be idle.
    pub fn free(&mut self, gpu: &mut dyn Gpu) {
        if !self.command_buffers.is_empty() {
            gpu.free_command_buffers(&self.command_buffers);
            self.command_buffers.clear();
        }
    }

    /// Re-records every buffer. Callers idle the device first.
    pub fn rebuild_all(&mut self, gpu: &mut dyn Gpu, ctx: RecordContext<'_>) -> RendererResult<()> {
        let RecordContext {
            graph,
            registry,
            overlay,
        } = ctx;

        if self.mode != RenderMode::Solid && !graph.has_wireframe() && !self.fallback_logged {
            warn!(
                "Render mode {} needs wireframe fill, drawing solid instead",
                self.mode
            );
            self.fallback_logged = true;
        }

        for image_index in 0..self.command_buffers.len() {
            self.record(gpu, image_index as u32, graph, registry, &mut *overlay)?;
        }
        self.rebuilds += 1;

        debug!(
            "Recorded {} command buffer(s) in {} mode with {} instance(s)",
            self.command_buffers.len(),
            self.mode,
            registry.instances().len()
        );
        Ok(())
    }

    /// Idles the device, advances the render mode and re-records.
    pub fn cycle_render_mode(
        &mut self,
        gpu: &mut dyn Gpu,
        ctx: RecordContext<'_>,
    ) -> RendererResult<RenderMode> {
        gpu.wait_idle()?;
        self.mode = self.mode.next();
        info!("Render mode: {}", self.mode);
        self.rebuild_all(gpu, ctx)?;
        Ok(self.mode)
    }

    fn record(
        &self,
        gpu: &mut dyn Gpu,
        image_index: u32,
        graph: &RenderGraph,
        registry: &ResourceRegistry,
        overlay: &mut dyn OverlayPainter,
    ) -> RendererResult<()> {
        let cmd = self.command_buffers[image_index as usize];
        let missing = |what: &str| {
            RendererError::from(RhiError::InvalidHandle(format!(
                "{} for swapchain image {}",
                what, image_index
            )))
        };
        let framebuffer = registry.framebuffer(image_index).ok_or_else(|| missing("framebuffer"))?;
        let descriptor_set = registry
            .descriptor_set(image_index)
            .ok_or_else(|| missing("descriptor set"))?;
        let composition = graph
            .pipeline(PipelineVariant::Composition)
            .ok_or_else(|| missing("composition pipeline"))?;
        let extent = registry.extent();
        let layout = graph.pipeline_layout();

        gpu.cmd_begin(cmd)?;

        gpu.cmd_begin_render_pass(
            cmd,
            &RenderPassBegin {
                render_pass: graph.render_pass(),
                framebuffer,
                extent,
                clear_values: vec![
                    ClearValue::Color(self.clear_color),
                    ClearValue::DepthStencil {
                        depth: 1.0,
                        stencil: 0,
                    },
                    ClearValue::Color(self.clear_color),
                ],
            },
        );
        gpu.cmd_set_viewport(cmd, extent);
        gpu.cmd_set_scissor(cmd, extent);
        gpu.cmd_bind_descriptor_set(cmd, layout, descriptor_set);

        // Geometry subpass
        let buffer = registry.geometry_buffer();
        gpu.cmd_bind_vertex_buffer(cmd, buffer, 0);
        gpu.cmd_bind_index_buffer(cmd, buffer, quad_index_offset(), QUAD_INDEX_TYPE);
        for &variant in self.mode.geometry_variants(graph.has_wireframe()) {
            let Some(pipeline) = graph.pipeline(variant) else {
                continue;
            };
            gpu.cmd_bind_pipeline(cmd, pipeline);
            for instance in registry.instances().iter() {
                let push = InstancePush::new(instance.transform.matrix(), instance.texture_slot);
                gpu.cmd_push_constants(
                    cmd,
                    layout,
                    instance_push_stages(),
                    0,
                    bytemuck::bytes_of(&push),
                );
                gpu.cmd_draw_indexed(cmd, QUAD_INDICES.len() as u32, 1, 0, 0, 0);
            }
        }

        // Composition subpass: fullscreen triangle reading the scene color
        gpu.cmd_next_subpass(cmd);
        gpu.cmd_bind_pipeline(cmd, composition);
        gpu.cmd_draw(cmd, 3, 1, 0, 0);
        gpu.cmd_end_render_pass(cmd);

        if let (Some(overlay_pass), Some(overlay_framebuffer)) =
            (graph.overlay_pass(), registry.overlay_framebuffer(image_index))
        {
            gpu.cmd_begin_render_pass(
                cmd,
                &RenderPassBegin {
                    render_pass: overlay_pass,
                    framebuffer: overlay_framebuffer,
                    extent,
                    clear_values: Vec::new(),
                },
            );
            overlay.record(gpu, cmd, extent);
            gpu.cmd_end_render_pass(cmd);
        }

        gpu.cmd_end(cmd)?;
        Ok(())
    }

    pub fn command_buffer(&self, image_index: u32) -> Option<vk::CommandBuffer> {
        self.command_buffers.get(image_index as usize).copied()
    }

    #[inline]
    pub fn command_buffer_count(&self) -> usize {
        self.command_buffers.len()
    }

    #[inline]
    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Number of completed [`rebuild_all`](Self::rebuild_all) passes.
    #[inline]
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_cycle_returns_after_three() {
        for start in [RenderMode::Wireframe, RenderMode::Solid, RenderMode::Both] {
            assert_ne!(start.next(), start);
            assert_eq!(start.next().next().next(), start);
        }
    }

    #[test]
    fn test_geometry_variants() {
        assert_eq!(
            RenderMode::Both.geometry_variants(true),
            &[PipelineVariant::Solid, PipelineVariant::Wireframe]
        );
        assert_eq!(
            RenderMode::Wireframe.geometry_variants(true),
            &[PipelineVariant::Wireframe]
        );
        for mode in [RenderMode::Wireframe, RenderMode::Solid, RenderMode::Both] {
            assert_eq!(mode.geometry_variants(false), &[PipelineVariant::Solid]);
        }
    }
}
