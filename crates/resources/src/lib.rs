//! Asset loading for the renderer.
//!
//! Everything here produces plain CPU-side data; uploading is the renderer's job.
//! - [`TexturePixels`]: decoded RGBA8 images
//! - [`load_spirv`]: compiled shader bytecode as 32-bit words

mod error;
pub mod shader;
pub mod texture;

pub use error::{ResourceError, ResourceResult};
pub use shader::{load_spirv, spirv_from_bytes};
pub use texture::TexturePixels;
