//! Shader bytecode and the default texture the renderer cannot start without.

use tracing::info;

use renderer_core::config::AssetConfig;
use renderer_resources::{TexturePixels, load_spirv};
use renderer_rhi::shader::SPIRV_MAGIC;

use crate::error::RendererResult;

/// Everything loaded from disk before the first frame.
#[derive(Clone, Debug)]
pub struct RendererAssets {
    pub geometry_vertex: Vec<u32>,
    pub geometry_fragment: Vec<u32>,
    pub composition_vertex: Vec<u32>,
    pub composition_fragment: Vec<u32>,
    /// Bound to every sampler slot no instance occupies.
    pub default_texture: TexturePixels,
}

impl RendererAssets {
    /// Loads the four shaders and the default texture named by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::Resource`](crate::RendererError::Resource) for the
    /// first file that cannot be read or decoded. There is no fallback.
    pub fn load(config: &AssetConfig) -> RendererResult<Self> {
        let assets = Self {
            geometry_vertex: load_spirv(&config.geometry_vertex_shader)?,
            geometry_fragment: load_spirv(&config.geometry_fragment_shader)?,
            composition_vertex: load_spirv(&config.composition_vertex_shader)?,
            composition_fragment: load_spirv(&config.composition_fragment_shader)?,
            default_texture: TexturePixels::load(&config.default_texture)?,
        };
        info!(
            "Loaded shaders and default texture ({}x{})",
            assets.default_texture.width, assets.default_texture.height
        );
        Ok(assets)
    }

    /// Header-only shader modules and a 1x1 white texture.
    ///
    /// Enough for backends that never compile shaders, such as
    /// [`HeadlessGpu`](renderer_rhi::headless::HeadlessGpu).
    pub fn placeholder() -> Self {
        let module = vec![SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        Self {
            geometry_vertex: module.clone(),
            geometry_fragment: module.clone(),
            composition_vertex: module.clone(),
            composition_fragment: module,
            default_texture: TexturePixels::solid(1, 1, [255; 4]),
        }
    }
}
