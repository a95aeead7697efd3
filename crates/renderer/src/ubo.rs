//! GPU-visible data blocks shared with the shaders.
//!
//! Both structs are `#[repr(C)]` and `Pod` so they can be written with
//! `bytemuck::bytes_of`. Layouts must match `shaders/geometry.vert`.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Per-image uniform block (set 0, binding 0).
///
/// # Memory Layout
///
/// - Offset 0: view-projection matrix (64 bytes)
/// - Offset 64: time in seconds (4 bytes)
/// - Offset 68: padding (12 bytes)
/// - Total size: 80 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view_projection: Mat4,
    pub time: f32,
    /// Rounds the block up to a 16-byte multiple for std140.
    pub _padding: [f32; 3],
}

impl FrameUniforms {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(view_projection: Mat4, time: f32) -> Self {
        Self {
            view_projection,
            time,
            _padding: [0.0; 3],
        }
    }
}

/// Per-draw push constant for the geometry subpass.
///
/// - Offset 0: model matrix (64 bytes)
/// - Offset 64: index into the sampler array (4 bytes)
/// - Offset 68: padding (12 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct InstancePush {
    pub model: Mat4,
    pub texture_slot: u32,
    pub _padding: [u32; 3],
}

impl InstancePush {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(model: Mat4, texture_slot: u32) -> Self {
        Self {
            model,
            texture_slot,
            _padding: [0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_uniforms_layout() {
        assert_eq!(FrameUniforms::SIZE, 80);
        assert_eq!(std::mem::offset_of!(FrameUniforms, time), 64);
    }

    #[test]
    fn test_instance_push_layout() {
        assert_eq!(InstancePush::SIZE, 80);
        assert_eq!(std::mem::offset_of!(InstancePush, texture_slot), 64);
        // Vulkan guarantees at least 128 bytes of push constants.
        assert!(InstancePush::SIZE <= 128);
    }

    #[test]
    fn test_bytes_round_trip_slot() {
        let push = InstancePush::new(Mat4::IDENTITY, 7);
        let bytes = bytemuck::bytes_of(&push);
        assert_eq!(&bytes[64..68], &7u32.to_le_bytes());
    }
}
