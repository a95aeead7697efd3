//! SPIR-V bytecode loading.
//!
//! Shaders are compiled ahead of time (`glslc shaders/*.vert -o assets/shaders/...`);
//! at runtime they are only read and sanity-checked.

use std::path::Path;

use tracing::debug;

use crate::error::{ResourceError, ResourceResult};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Reads a `.spv` file into little-endian 32-bit words.
///
/// # Errors
///
/// Returns [`ResourceError::FileNotFound`] or [`ResourceError::Io`] when the file
/// cannot be read and [`ResourceError::InvalidSpirv`] when its contents are not a
/// SPIR-V module.
pub fn load_spirv(path: impl AsRef<Path>) -> ResourceResult<Vec<u32>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ResourceError::FileNotFound(path.to_path_buf()));
    }

    let bytes = std::fs::read(path).map_err(|source| ResourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let words = spirv_from_bytes(&bytes).map_err(|reason| ResourceError::InvalidSpirv {
        path: path.to_path_buf(),
        reason,
    })?;

    debug!("Loaded shader {:?} ({} words)", path, words.len());
    Ok(words)
}

/// Converts raw bytecode to words, checking length and magic number.
pub fn spirv_from_bytes(bytes: &[u8]) -> Result<Vec<u32>, String> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(format!(
            "length {} is not a non-zero multiple of 4",
            bytes.len()
        ));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    if words[0] != SPIRV_MAGIC {
        return Err(format!("bad magic number {:#010x}", words[0]));
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_header() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x0001_0000u32.to_le_bytes());
        let words = spirv_from_bytes(&bytes).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000]);
    }

    #[test]
    fn test_rejects_truncated() {
        assert!(spirv_from_bytes(&[0x03, 0x02, 0x23]).is_err());
        assert!(spirv_from_bytes(&[]).is_err());
    }

    #[test]
    fn test_rejects_wrong_magic() {
        assert!(spirv_from_bytes(&[0, 0, 0, 0]).is_err());
    }
}
