//! Integration tests for loading assets from disk.

use std::path::PathBuf;

use renderer_resources::{ResourceError, TexturePixels, load_spirv};

fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("renderer-resources-{}-{name}", std::process::id()))
}

#[test]
fn test_load_png_as_rgba() {
    let path = scratch_path("texture.png");
    let image = image::RgbaImage::from_pixel(4, 2, image::Rgba([200, 100, 50, 255]));
    image.save(&path).expect("failed to write test png");

    let texture = TexturePixels::load(&path).expect("failed to load png");
    assert_eq!((texture.width, texture.height), (4, 2));
    assert_eq!(texture.byte_len(), 4 * 2 * 4);
    assert_eq!(&texture.pixels[..4], &[200, 100, 50, 255]);

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_corrupt_texture_reports_path() {
    let path = scratch_path("corrupt.png");
    std::fs::write(&path, b"\x89PNG not really").expect("failed to write file");

    match TexturePixels::load(&path) {
        Err(ResourceError::Image { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected an image error, got {other:?}"),
    }

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_load_spirv_file() {
    let path = scratch_path("shader.spv");
    let words = [0x0723_0203u32, 0x0001_0000, 0, 1, 0];
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    std::fs::write(&path, bytes).expect("failed to write file");

    assert_eq!(load_spirv(&path).expect("valid module"), words.to_vec());

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_compiled_shaders_when_present() {
    let path = PathBuf::from("../../assets/shaders/geometry.vert.spv");
    if !path.exists() {
        eprintln!("Skipping test: compiled shader not found at {path:?}");
        return;
    }
    let words = load_spirv(&path).expect("compiled shader should be valid SPIR-V");
    assert!(words.len() > 5);
}
