//! Full compile jobs through the orchestrator, preset bag to DDS file

use anyhow::Result;
use texture_rc_core::{CubemapKind, ImageObject, ImageProperties, PixelFormat, PropertySet};
use texture_rc_pipeline::{read_dds, TextureCompiler};

fn props(pairs: &[(&str, &str)]) -> ImageProperties {
    let mut set = PropertySet::new();
    for (k, v) in pairs {
        set.set_from_pair(k, v);
    }
    ImageProperties::new(set)
}

/// BGRA8 source with a per-pixel color and alpha callback
fn bgra_source(w: u32, h: u32, f: impl Fn(u32, u32) -> [u8; 4]) -> ImageObject {
    let mut image = ImageObject::new(w, h, 1, PixelFormat::A8R8G8B8, CubemapKind::No).unwrap();
    let (data, pitch) = image.mip_data_mut(0);
    for y in 0..h {
        for x in 0..w {
            let [r, g, b, a] = f(x, y);
            let off = y as usize * pitch + x as usize * 4;
            data[off] = b;
            data[off + 1] = g;
            data[off + 2] = r;
            data[off + 3] = a;
        }
    }
    image
}

fn float_source(w: u32, h: u32, f: impl Fn(u32, u32) -> [f32; 4]) -> ImageObject {
    let mut image =
        ImageObject::new(w, h, 1, PixelFormat::A32B32G32R32F, CubemapKind::No).unwrap();
    let mut view = image.float_view_mut(0).unwrap();
    for y in 0..h {
        for x in 0..w {
            view.set(x, y, f(x, y));
        }
    }
    image
}

#[test]
fn opaque_diffuse_compiles_to_dxt1_with_full_mip_chain() -> Result<()> {
    let compiler = TextureCompiler::new();
    let source = bgra_source(256, 256, |x, y| {
        [(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8, 255]
    });
    let mut p = props(&[("pixelformat", "DXT1")]);

    let result = compiler.run_with_properties(&source, &mut p)?.into_image();
    assert_eq!(result.format(), PixelFormat::DXT1);
    assert_eq!(result.mip_count(), 9);
    assert_eq!(result.width(8), 1);
    // Opaque alpha never produces an attached image
    assert!(result.attached_image().is_none());
    assert!(!result.flags().attached_alpha);
    Ok(())
}

#[test]
fn translucent_dxt1_splits_alpha_into_attached_image() -> Result<()> {
    let compiler = TextureCompiler::new();
    let source = bgra_source(128, 128, |x, _| [200, 100, 50, (x * 2) as u8]);
    let mut p = props(&[("pixelformat", "DXT1")]);

    let result = compiler.run_with_properties(&source, &mut p)?.into_image();
    assert_eq!(result.format(), PixelFormat::DXT1);
    assert_eq!(result.mip_count(), 8);
    assert!(result.flags().attached_alpha);

    let attached = result.attached_image().expect("attached alpha image");
    assert_eq!(attached.format(), PixelFormat::A8);
    assert_eq!(attached.mip_count(), result.mip_count());
    for mip in 0..result.mip_count() {
        assert_eq!(attached.width(mip), result.width(mip), "mip {}", mip);
        assert_eq!(attached.height(mip), result.height(mip), "mip {}", mip);
    }
    Ok(())
}

#[test]
fn rgbk_uniform_color_reconstructs_within_one_step() -> Result<()> {
    let compiler = TextureCompiler::new();
    let source = float_source(16, 16, |_, _| [2.0, 2.0, 2.0, 1.0]);
    let mut p = props(&[
        ("pixelformat", "A8R8G8B8"),
        ("rgbk", "2"),
        ("rgbkmax", "4"),
        ("mipmaps", "0"),
    ]);

    let result = compiler.run_with_properties(&source, &mut p)?.into_image();
    assert_eq!(result.format(), PixelFormat::A8R8G8B8);

    let (data, pitch) = result.mip_data(0);
    for y in 0..16usize {
        for x in 0..16usize {
            let off = y * pitch + x * 4;
            let k = data[off + 3] as f32 / 255.0;
            let scale = k * k * 4.0;
            for c in 0..3 {
                let decoded = data[off + c] as f32 / 255.0 * scale;
                assert!(
                    (decoded - 2.0).abs() <= 1.0 / 255.0,
                    "channel {} decoded {} at {},{}",
                    c,
                    decoded,
                    x,
                    y
                );
            }
        }
    }
    Ok(())
}

#[test]
fn alpha_coverage_survives_mip_generation() -> Result<()> {
    let compiler = TextureCompiler::new();
    // Left half covered, right half clear: exactly 50% above threshold
    let source = bgra_source(128, 128, |x, _| {
        let a = if x < 64 { 255 } else { 0 };
        [128, 128, 128, a]
    });
    let mut p = props(&[
        ("pixelformat", "A8R8G8B8"),
        ("mipmapalphacoverage", "1"),
        ("mipgentype", "lanczos"),
    ]);

    let result = compiler.run_with_properties(&source, &mut p)?.into_image();
    let mip = 3;
    let w = result.width(mip) as usize;
    let h = result.height(mip) as usize;
    let (data, pitch) = result.mip_data(mip);
    let mut covered = 0usize;
    for y in 0..h {
        for x in 0..w {
            if data[y * pitch + x * 4 + 3] > 127 {
                covered += 1;
            }
        }
    }
    let coverage = covered as f64 / (w * h) as f64;
    assert!(
        (coverage - 0.5).abs() <= 0.01,
        "coverage {} at mip {}",
        coverage,
        mip
    );
    Ok(())
}

#[test]
fn compiled_file_round_trips_through_dds() -> Result<()> {
    let compiler = TextureCompiler::new();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("translucent.dds");

    let source = bgra_source(64, 64, |x, y| [x as u8 * 4, y as u8 * 4, 128, (x * 4) as u8]);
    let mut p = props(&[("pixelformat", "DXT1")]);
    compiler.compile_to_file(&source, &mut p, &path)?;

    let mut file = std::fs::File::open(&path)?;
    let restored = read_dds(&mut file)?;
    assert_eq!(restored.format(), PixelFormat::DXT1);
    assert_eq!(restored.mip_count(), 7);
    assert!(restored.flags().attached_alpha);
    let attached = restored.attached_image().expect("attached alpha image");
    assert_eq!(attached.format(), PixelFormat::A8);
    assert_eq!(attached.width(0), 64);
    Ok(())
}

#[test]
fn cubemap_preset_produces_filtered_strip() -> Result<()> {
    let compiler = TextureCompiler::new();
    // 6:1 strip source, 16x16 faces
    let source = float_source(96, 16, |x, _| {
        let face = x / 16;
        [face as f32 / 5.0, 0.5, 1.0 - face as f32 / 5.0, 1.0]
    });
    let mut p = props(&[
        ("pixelformat", "A8R8G8B8"),
        ("cubemap", "1"),
        ("cm_ftype", "gaussian"),
    ]);

    let mut cubemap_source = source;
    cubemap_source.set_cubemap(CubemapKind::Yes);
    let result = compiler
        .run_with_properties(&cubemap_source, &mut p)?
        .into_image();
    assert_eq!(result.cubemap(), CubemapKind::Yes);
    assert_eq!(result.width(0), 96);
    assert_eq!(result.height(0), 16);
    assert_eq!(result.mip_count(), 5);
    assert!(result.flags().cubemap);
    Ok(())
}
