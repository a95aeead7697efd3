//! SPIR-V shader modules.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Entry point every shader uses.
pub const ENTRY_POINT: &CStr = c"main";

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Rejects word streams that are empty or do not start with the SPIR-V magic.
///
/// # Errors
///
/// Returns [`RhiError::ShaderError`].
pub fn check_spirv(words: &[u32], stage: ShaderStage) -> RhiResult<()> {
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(()),
        Some(&word) => Err(RhiError::ShaderError(format!(
            "{stage} shader starts with {word:#010x}, not the SPIR-V magic"
        ))),
        None => Err(RhiError::ShaderError(format!("{stage} shader is empty"))),
    }
}

/// RAII `VkShaderModule`. Only needs to live until the pipeline is built.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl Shader {
    /// # Errors
    ///
    /// Returns an error if the words are not SPIR-V or module creation fails.
    pub fn from_spirv_words(
        device: Arc<Device>,
        words: &[u32],
        stage: ShaderStage,
    ) -> RhiResult<Self> {
        check_spirv(words, stage)?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(words);
        let module = unsafe {
            device
                .handle()
                .create_shader_module(&create_info, None)
                .map_err(|e| {
                    RhiError::ShaderError(format!("failed to create {stage} shader module: {e}"))
                })?
        };

        debug!("Created {} shader module ({} words)", stage, words.len());

        Ok(Self {
            device,
            module,
            stage,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_stage_flags() {
        assert_eq!(
            ShaderStage::Vertex.to_vk_stage(),
            vk::ShaderStageFlags::VERTEX
        );
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
    }

    #[test]
    fn test_check_spirv() {
        assert!(check_spirv(&[SPIRV_MAGIC, 0x0001_0000], ShaderStage::Vertex).is_ok());
        assert!(check_spirv(&[], ShaderStage::Vertex).is_err());
        assert!(check_spirv(&[0xdead_beef], ShaderStage::Fragment).is_err());
    }
}
