//! Texture decoding.

use std::path::Path;

use tracing::debug;

use crate::error::{ResourceError, ResourceResult};

/// A decoded image, always four 8-bit channels per pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TexturePixels {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA8, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
}

impl TexturePixels {
    /// Decodes an image file (PNG or JPEG) and converts it to RGBA8.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::FileNotFound`] for a missing file,
    /// [`ResourceError::Io`] when it cannot be read and
    /// [`ResourceError::Image`] when it cannot be decoded.
    pub fn load(path: impl AsRef<Path>) -> ResourceResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ResourceError::FileNotFound(path.to_path_buf()));
        }

        let bytes = std::fs::read(path).map_err(|source| ResourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let texture = Self::from_memory(&bytes).map_err(|source| ResourceError::Image {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(
            "Decoded texture {:?}: {}x{}",
            path, texture.width, texture.height
        );
        Ok(texture)
    }

    /// Decodes an in-memory encoded image.
    pub fn from_memory(bytes: &[u8]) -> Result<Self, image::ImageError> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    /// A single-color texture.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_fills_every_pixel() {
        let texture = TexturePixels::solid(3, 2, [10, 20, 30, 255]);
        assert_eq!(texture.byte_len(), 3 * 2 * 4);
        assert!(texture.pixels.chunks_exact(4).all(|p| p == [10, 20, 30, 255]));
    }

    #[test]
    fn test_missing_file() {
        let err = TexturePixels::load("no/such/texture.png").unwrap_err();
        assert!(matches!(err, ResourceError::FileNotFound(_)));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        assert!(TexturePixels::from_memory(b"definitely not an image").is_err());
    }
}
