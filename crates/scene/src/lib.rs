//! Scene data consumed by the renderer.
//!
//! - [`Transform`] places each drawable instance
//! - [`Camera`] and [`OrbitController`] produce the view-projection matrix

pub mod camera;
pub mod transform;

pub use camera::{Camera, OrbitController};
pub use transform::Transform;
