//! Uncompressed format conversion through a float RGBA hub
//!
//! Every uncompressed pixel decodes to `[f32; 4]` and re-encodes into
//! the destination layout, so N formats need N codecs instead of N^2
//! pairwise converters. Byte order follows the catalog convention:
//! 8-bit formats are BGR(A) in memory, wider formats RGB(A).

use half::f16;
use texture_rc_core::{ImageObject, PixelFormat, Result, TextureError};

fn u8n(v: u8) -> f32 {
    v as f32 / 255.0
}

fn u16n(v: u16) -> f32 {
    v as f32 / 65535.0
}

fn q8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

fn q16(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0 + 0.5) as u16
}

fn read_u16(px: &[u8]) -> u16 {
    u16::from_le_bytes([px[0], px[1]])
}

fn read_half(px: &[u8]) -> f32 {
    f16::from_le_bytes([px[0], px[1]]).to_f32()
}

fn read_f32(px: &[u8]) -> f32 {
    f32::from_le_bytes([px[0], px[1], px[2], px[3]])
}

/// Luminance weights used when collapsing RGB into one channel.
/// The 11/50/39 split is applied as R, G, B; the channel assignment is
/// an assumption (see DESIGN.md).
fn luminance(px: [f32; 4]) -> f32 {
    0.11 * px[0] + 0.50 * px[1] + 0.39 * px[2]
}

// R9G9B9E5 shared-exponent parameters (9-bit mantissas, bias 15)
const RGB9E5_MANTISSA_BITS: i32 = 9;
const RGB9E5_EXP_BIAS: i32 = 15;
const RGB9E5_MAX: f32 = 65408.0;

fn pack_rgb9e5(r: f32, g: f32, b: f32) -> u32 {
    let r = r.clamp(0.0, RGB9E5_MAX);
    let g = g.clamp(0.0, RGB9E5_MAX);
    let b = b.clamp(0.0, RGB9E5_MAX);
    let max_c = r.max(g).max(b);

    let mut exp_shared =
        (max_c.log2().floor() as i32).max(-RGB9E5_EXP_BIAS - 1) + 1 + RGB9E5_EXP_BIAS;
    let mut denom = 2.0f32.powi(exp_shared - RGB9E5_EXP_BIAS - RGB9E5_MANTISSA_BITS);
    if (max_c / denom + 0.5).floor() as u32 == 1 << RGB9E5_MANTISSA_BITS {
        denom *= 2.0;
        exp_shared += 1;
    }

    let rm = (r / denom + 0.5).floor() as u32;
    let gm = (g / denom + 0.5).floor() as u32;
    let bm = (b / denom + 0.5).floor() as u32;
    rm | (gm << 9) | (bm << 18) | ((exp_shared as u32) << 27)
}

fn unpack_rgb9e5(bits: u32) -> (f32, f32, f32) {
    let rm = bits & 0x1ff;
    let gm = (bits >> 9) & 0x1ff;
    let bm = (bits >> 18) & 0x1ff;
    let exp = (bits >> 27) as i32;
    let scale = 2.0f32.powi(exp - RGB9E5_EXP_BIAS - RGB9E5_MANTISSA_BITS);
    (rm as f32 * scale, gm as f32 * scale, bm as f32 * scale)
}

/// Decode one pixel of an uncompressed format to linear float RGBA
///
/// Single-channel color formats replicate into RGB; missing alpha
/// decodes as fully opaque.
pub fn decode_pixel(format: PixelFormat, px: &[u8]) -> Result<[f32; 4]> {
    use PixelFormat::*;
    let out = match format {
        A8R8G8B8 => [u8n(px[2]), u8n(px[1]), u8n(px[0]), u8n(px[3])],
        X8R8G8B8 => [u8n(px[2]), u8n(px[1]), u8n(px[0]), 1.0],
        R8G8B8 => [u8n(px[2]), u8n(px[1]), u8n(px[0]), 1.0],
        A8 => [0.0, 0.0, 0.0, u8n(px[0])],
        L8 => [u8n(px[0]), u8n(px[0]), u8n(px[0]), 1.0],
        A8L8 => [u8n(px[0]), u8n(px[0]), u8n(px[0]), u8n(px[1])],
        R8 => [u8n(px[0]), u8n(px[0]), u8n(px[0]), 1.0],

        A16B16G16R16 => [
            u16n(read_u16(&px[0..2])),
            u16n(read_u16(&px[2..4])),
            u16n(read_u16(&px[4..6])),
            u16n(read_u16(&px[6..8])),
        ],
        G16R16 => {
            let r = u16n(read_u16(&px[0..2]));
            [r, u16n(read_u16(&px[2..4])), 0.0, 1.0]
        }
        R16 => {
            let r = u16n(read_u16(&px[0..2]));
            [r, r, r, 1.0]
        }

        A16B16G16R16F => [
            read_half(&px[0..2]),
            read_half(&px[2..4]),
            read_half(&px[4..6]),
            read_half(&px[6..8]),
        ],
        G16R16F => [read_half(&px[0..2]), read_half(&px[2..4]), 0.0, 1.0],
        R16F => {
            let r = read_half(&px[0..2]);
            [r, r, r, 1.0]
        }

        A32B32G32R32F => [
            read_f32(&px[0..4]),
            read_f32(&px[4..8]),
            read_f32(&px[8..12]),
            read_f32(&px[12..16]),
        ],
        G32R32F => [read_f32(&px[0..4]), read_f32(&px[4..8]), 0.0, 1.0],
        R32F => {
            let r = read_f32(&px[0..4]);
            [r, r, r, 1.0]
        }

        R9G9B9E5 => {
            let bits = u32::from_le_bytes([px[0], px[1], px[2], px[3]]);
            let (r, g, b) = unpack_rgb9e5(bits);
            [r, g, b, 1.0]
        }

        other => {
            return Err(TextureError::unsupported(format!(
                "{} is not an uncompressed format",
                other.info().name
            )))
        }
    };
    Ok(out)
}

/// Encode linear float RGBA into one pixel of an uncompressed format
///
/// Integer formats clamp to [0,1] and round to nearest. Luminance
/// formats collapse RGB with fixed weights.
pub fn encode_pixel(format: PixelFormat, value: [f32; 4], px: &mut [u8]) -> Result<()> {
    use PixelFormat::*;
    let [r, g, b, a] = value;
    match format {
        A8R8G8B8 => {
            px[0] = q8(b);
            px[1] = q8(g);
            px[2] = q8(r);
            px[3] = q8(a);
        }
        X8R8G8B8 => {
            px[0] = q8(b);
            px[1] = q8(g);
            px[2] = q8(r);
            px[3] = 255;
        }
        R8G8B8 => {
            px[0] = q8(b);
            px[1] = q8(g);
            px[2] = q8(r);
        }
        A8 => px[0] = q8(a),
        L8 => px[0] = q8(luminance(value)),
        A8L8 => {
            px[0] = q8(luminance(value));
            px[1] = q8(a);
        }
        R8 => px[0] = q8(r),

        A16B16G16R16 => {
            px[0..2].copy_from_slice(&q16(r).to_le_bytes());
            px[2..4].copy_from_slice(&q16(g).to_le_bytes());
            px[4..6].copy_from_slice(&q16(b).to_le_bytes());
            px[6..8].copy_from_slice(&q16(a).to_le_bytes());
        }
        G16R16 => {
            px[0..2].copy_from_slice(&q16(r).to_le_bytes());
            px[2..4].copy_from_slice(&q16(g).to_le_bytes());
        }
        R16 => px[0..2].copy_from_slice(&q16(r).to_le_bytes()),

        A16B16G16R16F => {
            px[0..2].copy_from_slice(&f16::from_f32(r).to_le_bytes());
            px[2..4].copy_from_slice(&f16::from_f32(g).to_le_bytes());
            px[4..6].copy_from_slice(&f16::from_f32(b).to_le_bytes());
            px[6..8].copy_from_slice(&f16::from_f32(a).to_le_bytes());
        }
        G16R16F => {
            px[0..2].copy_from_slice(&f16::from_f32(r).to_le_bytes());
            px[2..4].copy_from_slice(&f16::from_f32(g).to_le_bytes());
        }
        R16F => px[0..2].copy_from_slice(&f16::from_f32(r).to_le_bytes()),

        A32B32G32R32F => {
            px[0..4].copy_from_slice(&r.to_le_bytes());
            px[4..8].copy_from_slice(&g.to_le_bytes());
            px[8..12].copy_from_slice(&b.to_le_bytes());
            px[12..16].copy_from_slice(&a.to_le_bytes());
        }
        G32R32F => {
            px[0..4].copy_from_slice(&r.to_le_bytes());
            px[4..8].copy_from_slice(&g.to_le_bytes());
        }
        R32F => px[0..4].copy_from_slice(&r.to_le_bytes()),

        R9G9B9E5 => {
            px[0..4].copy_from_slice(&pack_rgb9e5(r, g, b).to_le_bytes());
        }

        other => {
            return Err(TextureError::unsupported(format!(
                "{} is not an uncompressed format",
                other.info().name
            )))
        }
    }
    Ok(())
}

/// Convert between any two uncompressed formats, all mips
///
/// Metadata travels with the pixels; the attached alpha image (already
/// in its own final format) is carried over unchanged.
pub fn convert_uncompressed(src: &ImageObject, dst_format: PixelFormat) -> Result<ImageObject> {
    if src.format().is_compressed() || dst_format.is_compressed() {
        return Err(TextureError::unsupported(format!(
            "uncompressed conversion asked for {} -> {}",
            src.format().info().name,
            dst_format.info().name
        )));
    }
    if src.format() == dst_format {
        return Ok(src.copy_image());
    }

    let src_bpp = src.format().info().bits_per_block as usize / 8;
    let dst_bpp = dst_format.info().bits_per_block as usize / 8;

    let mut dst = ImageObject::new(
        src.width(0),
        src.height(0),
        src.mip_count(),
        dst_format,
        src.cubemap(),
    )?;
    dst.set_color_range(src.color_range());
    dst.set_average_brightness(src.average_brightness());
    *dst.flags_mut() = src.flags();
    dst.set_color_model(src.color_model());
    if let Some(attached) = src.attached_image() {
        dst.set_attached_image(Some(Box::new(attached.copy_image())));
    }

    for mip in 0..src.mip_count() {
        let w = src.width(mip) as usize;
        let h = src.height(mip) as usize;
        let (src_data, src_pitch) = src.mip_data(mip);
        let src_fmt = src.format();

        let level = dst.mip_mut(mip);
        let dst_pitch = level.pitch;
        for y in 0..h {
            let src_row = &src_data[y * src_pitch..];
            let dst_row = &mut level.data[y * dst_pitch..];
            for x in 0..w {
                let value = decode_pixel(src_fmt, &src_row[x * src_bpp..x * src_bpp + src_bpp])?;
                encode_pixel(
                    dst_format,
                    value,
                    &mut dst_row[x * dst_bpp..x * dst_bpp + dst_bpp],
                )?;
            }
        }
    }
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use texture_rc_core::CubemapKind;

    #[test]
    fn test_bgra_byte_order_for_8bit() {
        let mut px = [0u8; 4];
        encode_pixel(PixelFormat::A8R8G8B8, [1.0, 0.5, 0.0, 1.0], &mut px).unwrap();
        // Red lands in byte 2, blue in byte 0
        assert_eq!(px, [0, 128, 255, 255]);
        let back = decode_pixel(PixelFormat::A8R8G8B8, &px).unwrap();
        assert!((back[0] - 1.0).abs() < 1e-6);
        assert!((back[2] - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_rgba_byte_order_for_wide() {
        let mut px = [0u8; 8];
        encode_pixel(PixelFormat::A16B16G16R16, [1.0, 0.0, 0.0, 1.0], &mut px).unwrap();
        // Red is the first u16 for 16-bit formats
        assert_eq!(read_u16(&px[0..2]), 65535);
        assert_eq!(read_u16(&px[4..6]), 0);
    }

    #[test]
    fn test_luminance_collapse() {
        let mut px = [0u8; 1];
        encode_pixel(PixelFormat::L8, [1.0, 1.0, 1.0, 0.5], &mut px).unwrap();
        assert_eq!(px[0], 255);
        encode_pixel(PixelFormat::L8, [0.0, 1.0, 0.0, 1.0], &mut px).unwrap();
        assert_eq!(px[0], q8(0.50));
    }

    #[test]
    fn test_single_channel_replicates_on_decode() {
        let px = [200u8];
        let v = decode_pixel(PixelFormat::R8, &px).unwrap();
        assert_eq!(v[0], v[1]);
        assert_eq!(v[1], v[2]);
        assert_eq!(v[3], 1.0);
    }

    #[test]
    fn test_rgb9e5_roundtrip() {
        for &(r, g, b) in &[(1.0f32, 0.5, 0.25), (100.0, 3.0, 0.001), (0.0, 0.0, 0.0)] {
            let bits = pack_rgb9e5(r, g, b);
            let (ur, ug, ub) = unpack_rgb9e5(bits);
            let tol = r.max(g).max(b) / 256.0 + 1e-4;
            assert!((ur - r).abs() <= tol, "r: {} vs {}", ur, r);
            assert!((ug - g).abs() <= tol, "g: {} vs {}", ug, g);
            assert!((ub - b).abs() <= tol, "b: {} vs {}", ub, b);
        }
    }

    #[test]
    fn test_full_image_conversion_preserves_color() {
        let mut src =
            ImageObject::new(4, 4, 3, PixelFormat::A32B32G32R32F, CubemapKind::No).unwrap();
        for mip in 0..src.mip_count() {
            let w = src.width(mip);
            let h = src.height(mip);
            let mut view = src.float_view_mut(mip).unwrap();
            for y in 0..h {
                for x in 0..w {
                    view.set(x, y, [0.25, 0.5, 0.75, 1.0]);
                }
            }
        }

        let dst = convert_uncompressed(&src, PixelFormat::A8R8G8B8).unwrap();
        assert_eq!(dst.format(), PixelFormat::A8R8G8B8);
        assert_eq!(dst.mip_count(), 3);
        let (data, _) = dst.mip_data(0);
        assert_eq!(&data[0..4], &[q8(0.75), q8(0.5), q8(0.25), 255]);
    }

    #[test]
    fn test_compressed_formats_rejected() {
        let src = ImageObject::new(4, 4, 1, PixelFormat::A8R8G8B8, CubemapKind::No).unwrap();
        assert!(convert_uncompressed(&src, PixelFormat::DXT1).is_err());
    }
}
