//! Vertex layout and the built-in quad.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Geometry-pass vertex.
///
/// | location | field      | offset |
/// |----------|------------|--------|
/// | 0        | `position` | 0      |
/// | 1        | `color`    | 12     |
/// | 2        | `uv`       | 24     |
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub color: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec3, color: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            color,
            uv,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 3] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, uv) as u32,
            },
        ]
    }
}

/// Unit quad in the XY plane, centered on the origin.
pub const QUAD_VERTICES: [Vertex; 4] = [
    Vertex::new(
        Vec3::new(-0.5, -0.5, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
        Vec2::new(1.0, 0.0),
    ),
    Vertex::new(
        Vec3::new(0.5, -0.5, 0.0),
        Vec3::new(0.0, 1.0, 0.0),
        Vec2::new(0.0, 0.0),
    ),
    Vertex::new(
        Vec3::new(0.5, 0.5, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
        Vec2::new(0.0, 1.0),
    ),
    Vertex::new(
        Vec3::new(-0.5, 0.5, 0.0),
        Vec3::new(1.0, 1.0, 1.0),
        Vec2::new(1.0, 1.0),
    ),
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Index type matching [`QUAD_INDICES`].
pub const QUAD_INDEX_TYPE: vk::IndexType = vk::IndexType::UINT16;

/// Vertices followed by indices, the layout of the shared geometry buffer.
pub fn quad_geometry_bytes() -> Vec<u8> {
    let mut bytes = Vec::with_capacity(quad_index_offset() as usize + 12);
    bytes.extend_from_slice(bytemuck::cast_slice(&QUAD_VERTICES));
    bytes.extend_from_slice(bytemuck::cast_slice(&QUAD_INDICES));
    bytes
}

/// Byte offset of the index data inside [`quad_geometry_bytes`].
#[inline]
pub const fn quad_index_offset() -> vk::DeviceSize {
    std::mem::size_of::<[Vertex; 4]>() as vk::DeviceSize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 32);
        let attrs = Vertex::attribute_descriptions();
        assert_eq!(attrs[1].offset, 12);
        assert_eq!(attrs[2].offset, 24);
        assert_eq!(attrs[2].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(Vertex::binding_description().stride, 32);
    }

    #[test]
    fn test_quad_geometry_layout() {
        let bytes = quad_geometry_bytes();
        assert_eq!(bytes.len(), 4 * 32 + 6 * 2);
        assert_eq!(quad_index_offset(), 128);

        let index_bytes: &[u8] = bytemuck::cast_slice(&QUAD_INDICES);
        assert_eq!(&bytes[128..], index_bytes);
    }

    #[test]
    fn test_quad_indices_reference_every_vertex() {
        for v in 0..QUAD_VERTICES.len() as u16 {
            assert!(QUAD_INDICES.contains(&v));
        }
    }
}
