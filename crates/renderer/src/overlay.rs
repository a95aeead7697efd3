//! Hook for UI drawn on top of the composed frame.

use ash::vk;
use renderer_rhi::Gpu;

/// Records draws into the overlay pass.
///
/// Called once per swapchain image whenever command buffers are re-recorded,
/// between the overlay pass begin and end. The overlay pass loads the composed
/// image, so anything recorded here is drawn over the scene.
pub trait OverlayPainter {
    fn record(&mut self, gpu: &mut dyn Gpu, cmd: vk::CommandBuffer, extent: vk::Extent2D);
}

/// Paints nothing. The overlay pass still runs when enabled.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOverlay;

impl OverlayPainter for NoOverlay {
    fn record(&mut self, _gpu: &mut dyn Gpu, _cmd: vk::CommandBuffer, _extent: vk::Extent2D) {}
}
