//! Renderer configuration, loaded from `renderer.toml`.
//!
//! Every field carries a default so a partial (or missing) file still yields a
//! usable configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Size of the sampler array compiled into the geometry shader.
pub const MAX_INSTANCE_TEXTURES: u32 = 64;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RendererConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub renderer: RenderSettings,
    #[serde(default)]
    pub assets: AssetConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Enable the Khronos validation layer when present.
    #[serde(default = "default_validation")]
    pub validation: bool,
    /// Upper bound for any fence wait before the device is declared unresponsive.
    #[serde(default = "default_fence_timeout_ms")]
    pub fence_timeout_ms: u64,
    /// Number of drawable instances; clamped to [`MAX_INSTANCE_TEXTURES`].
    #[serde(default = "default_instance_capacity")]
    pub instance_capacity: u32,
    /// Record the overlay pass after the main render pass.
    #[serde(default)]
    pub overlay: bool,
    #[serde(default)]
    pub present_mode: PresentModePreference,
    #[serde(default = "default_clear_color")]
    pub clear_color: [f32; 4],
}

/// Preferred presentation mode; FIFO is always available as a fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentModePreference {
    #[default]
    #[serde(rename = "fifo")]
    Fifo,
    #[serde(rename = "mailbox")]
    Mailbox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    #[serde(default = "default_geometry_vert")]
    pub geometry_vertex_shader: PathBuf,
    #[serde(default = "default_geometry_frag")]
    pub geometry_fragment_shader: PathBuf,
    #[serde(default = "default_composition_vert")]
    pub composition_vertex_shader: PathBuf,
    #[serde(default = "default_composition_frag")]
    pub composition_fragment_shader: PathBuf,
    #[serde(default = "default_texture")]
    pub default_texture: PathBuf,
    /// Instances the application may hot-load, in order.
    #[serde(default)]
    pub load_queue: Vec<InstanceEntry>,
}

/// A texture file placed at a world position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceEntry {
    pub path: PathBuf,
    #[serde(default)]
    pub position: [f32; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            width: default_width(),
            height: default_height(),
        }
    }
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            validation: default_validation(),
            fence_timeout_ms: default_fence_timeout_ms(),
            instance_capacity: default_instance_capacity(),
            overlay: false,
            present_mode: PresentModePreference::default(),
            clear_color: default_clear_color(),
        }
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            geometry_vertex_shader: default_geometry_vert(),
            geometry_fragment_shader: default_geometry_frag(),
            composition_vertex_shader: default_composition_vert(),
            composition_fragment_shader: default_composition_frag(),
            default_texture: default_texture(),
            load_queue: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RendererConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigRead`] when the file cannot be read and
    /// [`Error::ConfigParse`] when it is not valid TOML for this schema.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RendererConfig =
            toml::from_str(&content).map_err(|source| Error::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration if the file exists, otherwise returns defaults.
    ///
    /// A file that exists but cannot be loaded is replaced by defaults and its
    /// error handed back. This runs before logging is initialized, so the
    /// caller reports it once a subscriber is installed.
    pub fn load_or_default(path: impl AsRef<Path>) -> (Self, Option<Error>) {
        let path = path.as_ref();
        if !path.exists() {
            return (Self::default(), None);
        }
        match Self::load(path) {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: RendererConfig = toml::from_str(content).map_err(|source| Error::ConfigParse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Instance capacity after clamping to the shader's sampler array size.
    pub fn instance_capacity(&self) -> u32 {
        self.renderer.instance_capacity.min(MAX_INSTANCE_TEXTURES)
    }

    fn validate(&self) -> Result<()> {
        if self.renderer.fence_timeout_ms == 0 {
            return Err(Error::Config(
                "renderer.fence_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.renderer.instance_capacity == 0 {
            return Err(Error::Config(
                "renderer.instance_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_title() -> String {
    "Subpass Renderer".to_string()
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_validation() -> bool {
    cfg!(debug_assertions)
}

fn default_fence_timeout_ms() -> u64 {
    5000
}

fn default_instance_capacity() -> u32 {
    MAX_INSTANCE_TEXTURES
}

fn default_clear_color() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

fn default_geometry_vert() -> PathBuf {
    PathBuf::from("assets/shaders/geometry.vert.spv")
}

fn default_geometry_frag() -> PathBuf {
    PathBuf::from("assets/shaders/geometry.frag.spv")
}

fn default_composition_vert() -> PathBuf {
    PathBuf::from("assets/shaders/composition.vert.spv")
}

fn default_composition_frag() -> PathBuf {
    PathBuf::from("assets/shaders/composition.frag.spv")
}

fn default_texture() -> PathBuf {
    PathBuf::from("assets/textures/default.png")
}

fn default_log_level() -> String {
    crate::logging::DEFAULT_FILTER.to_string()
}
