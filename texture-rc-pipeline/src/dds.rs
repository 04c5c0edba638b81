//! DDS container: writer and reader, including the attached-alpha trailer
//!
//! Standard layout ("DDS " magic, 124-byte header, optional DX10
//! extension) with the engine's extras packed into the header's reserved
//! block: image flag word, average brightness and the HDR color range.
//! The first reserved dword stores the exact pixel format tag so alias
//! formats (DXT1a, DXT5t, ...) survive a round trip that FourCC alone
//! could not distinguish.
//!
//! Cubemaps store face-major: all mips of face 0, then face 1, and so
//! on; each face row is a `pitch / 6` slice of the strip row. After the
//! pixel data an optional trailer carries the attached alpha image:
//! `"CExt"`, then `"AttC"` chunks (u32 length + nested DDS blob),
//! terminated by `"CEnd"`.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use texture_rc_core::{
    ColorRange, CubemapKind, ImageFlags, ImageObject, PixelFormat, Result, TextureError, Vec4,
};

const DDS_MAGIC: &[u8; 4] = b"DDS ";
const HEADER_SIZE: u32 = 124;
const PIXELFORMAT_SIZE: u32 = 32;

// DDSD_* header flags
const DDSD_CAPS: u32 = 0x1;
const DDSD_HEIGHT: u32 = 0x2;
const DDSD_WIDTH: u32 = 0x4;
const DDSD_PITCH: u32 = 0x8;
const DDSD_PIXELFORMAT: u32 = 0x1000;
const DDSD_MIPMAPCOUNT: u32 = 0x20000;
const DDSD_LINEARSIZE: u32 = 0x80000;

// DDPF_* pixel format flags
const DDPF_ALPHAPIXELS: u32 = 0x1;
const DDPF_ALPHA: u32 = 0x2;
const DDPF_FOURCC: u32 = 0x4;
const DDPF_RGB: u32 = 0x40;
const DDPF_LUMINANCE: u32 = 0x20000;

const DDSCAPS_COMPLEX: u32 = 0x8;
const DDSCAPS_TEXTURE: u32 = 0x1000;
const DDSCAPS_MIPMAP: u32 = 0x400000;
const DDSCAPS2_CUBEMAP_ALL: u32 = 0xFE00;

const FOURCC_DX10: [u8; 4] = *b"DX10";

/// Write the image (and its attached alpha trailer) as a DDS stream
pub fn write_dds<W: Write>(image: &ImageObject, writer: &mut W) -> Result<()> {
    write_dds_body(image, writer)?;

    if let Some(attached) = image.attached_image() {
        writer.write_all(b"CExt")?;
        let mut blob = Vec::new();
        write_dds_body(attached, &mut blob)?;
        writer.write_all(b"AttC")?;
        writer.write_u32::<LittleEndian>(blob.len() as u32)?;
        writer.write_all(&blob)?;
        writer.write_all(b"CEnd")?;
    }
    Ok(())
}

fn write_dds_body<W: Write>(image: &ImageObject, writer: &mut W) -> Result<()> {
    let format = image.format();
    let is_cubemap = image.cubemap() == CubemapKind::Yes;
    let header_width = if is_cubemap {
        image.width(0) / 6
    } else {
        image.width(0)
    };

    writer.write_all(DDS_MAGIC)?;
    writer.write_u32::<LittleEndian>(HEADER_SIZE)?;

    let mut flags = DDSD_CAPS | DDSD_HEIGHT | DDSD_WIDTH | DDSD_PIXELFORMAT;
    if image.mip_count() > 1 {
        flags |= DDSD_MIPMAPCOUNT;
    }
    let pitch_or_linear = if format.is_compressed() {
        flags |= DDSD_LINEARSIZE;
        format.mip_size(image.width(0), image.height(0)) as u32
    } else {
        flags |= DDSD_PITCH;
        format.row_pitch(header_width) as u32
    };
    writer.write_u32::<LittleEndian>(flags)?;
    writer.write_u32::<LittleEndian>(image.height(0))?;
    writer.write_u32::<LittleEndian>(header_width)?;
    writer.write_u32::<LittleEndian>(pitch_or_linear)?;
    writer.write_u32::<LittleEndian>(0)?; // depth
    writer.write_u32::<LittleEndian>(image.mip_count())?;

    // Reserved block (11 dwords): exact format tag, flag word, average
    // brightness and the color range
    writer.write_u32::<LittleEndian>(format as u32 + 1)?;
    writer.write_u32::<LittleEndian>(image.flags().to_bits(image.color_model()))?;
    writer.write_f32::<LittleEndian>(image.average_brightness())?;
    let range = image.color_range();
    for c in 0..4 {
        writer.write_f32::<LittleEndian>(range.min.get(c))?;
    }
    for c in 0..4 {
        writer.write_f32::<LittleEndian>(range.max.get(c))?;
    }

    write_pixel_format_block(format, writer)?;

    let mut caps = DDSCAPS_TEXTURE;
    if image.mip_count() > 1 {
        caps |= DDSCAPS_MIPMAP | DDSCAPS_COMPLEX;
    }
    if is_cubemap {
        caps |= DDSCAPS_COMPLEX;
    }
    writer.write_u32::<LittleEndian>(caps)?;
    writer.write_u32::<LittleEndian>(if is_cubemap { DDSCAPS2_CUBEMAP_ALL } else { 0 })?;
    writer.write_u32::<LittleEndian>(0)?;
    writer.write_u32::<LittleEndian>(0)?;
    writer.write_u32::<LittleEndian>(0)?;

    if needs_dx10_header(format) {
        writer.write_u32::<LittleEndian>(dxgi_format(format))?;
        writer.write_u32::<LittleEndian>(3)?; // 2D resource
        writer.write_u32::<LittleEndian>(if is_cubemap { 0x4 } else { 0 })?;
        writer.write_u32::<LittleEndian>(1)?; // array size
        writer.write_u32::<LittleEndian>(0)?;
    }

    if is_cubemap {
        write_cubemap_data(image, writer)?;
    } else {
        for mip in 0..image.mip_count() {
            let (data, _) = image.mip_data(mip);
            writer.write_all(data)?;
        }
    }
    Ok(())
}

fn write_pixel_format_block<W: Write>(format: PixelFormat, writer: &mut W) -> Result<()> {
    writer.write_u32::<LittleEndian>(PIXELFORMAT_SIZE)?;

    let (pf_flags, four_cc, bit_count, masks) = pixel_format_fields(format);
    writer.write_u32::<LittleEndian>(pf_flags)?;
    writer.write_all(&four_cc)?;
    writer.write_u32::<LittleEndian>(bit_count)?;
    for mask in masks {
        writer.write_u32::<LittleEndian>(mask)?;
    }
    Ok(())
}

fn needs_dx10_header(format: PixelFormat) -> bool {
    format.is_extended_dds_only()
}

/// (flags, fourcc, bit count, [r, g, b, a] masks)
fn pixel_format_fields(format: PixelFormat) -> (u32, [u8; 4], u32, [u32; 4]) {
    use PixelFormat::*;
    if needs_dx10_header(format) {
        return (DDPF_FOURCC, FOURCC_DX10, 0, [0; 4]);
    }
    if let Some(four_cc) = format.info().four_cc {
        return (DDPF_FOURCC, four_cc, 0, [0; 4]);
    }
    match format {
        A8R8G8B8 => (
            DDPF_RGB | DDPF_ALPHAPIXELS,
            [0; 4],
            32,
            [0x00ff0000, 0x0000ff00, 0x000000ff, 0xff000000],
        ),
        X8R8G8B8 => (
            DDPF_RGB,
            [0; 4],
            32,
            [0x00ff0000, 0x0000ff00, 0x000000ff, 0],
        ),
        R8G8B8 => (
            DDPF_RGB,
            [0; 4],
            24,
            [0x00ff0000, 0x0000ff00, 0x000000ff, 0],
        ),
        A8 => (DDPF_ALPHA, [0; 4], 8, [0, 0, 0, 0xff]),
        A8L8 => (
            DDPF_LUMINANCE | DDPF_ALPHAPIXELS,
            [0; 4],
            16,
            [0xff, 0, 0, 0xff00],
        ),
        // L8 and R8 share the single-channel luminance layout
        _ => (DDPF_LUMINANCE, [0; 4], 8, [0xff, 0, 0, 0]),
    }
}

fn dxgi_format(format: PixelFormat) -> u32 {
    use PixelFormat::*;
    match format {
        A32B32G32R32F => 2,
        A16B16G16R16F => 10,
        A16B16G16R16 => 11,
        G32R32F => 16,
        G16R16F => 34,
        G16R16 => 35,
        R32F => 41,
        R16F => 54,
        R16 => 56,
        R8 => 61,
        R9G9B9E5 => 67,
        BC1 | BC1a => 71,
        BC2 | BC2t => 74,
        BC3 | BC3t => 77,
        BC4 => 80,
        BC4s => 81,
        BC5 => 83,
        BC5s => 84,
        BC6UH => 95,
        BC7 | BC7t => 98,
        // Mobile formats have no DXGI code; the reserved format tag is
        // authoritative on read
        _ => 0,
    }
}

fn write_cubemap_data<W: Write>(image: &ImageObject, writer: &mut W) -> Result<()> {
    for face in 0..6usize {
        for mip in 0..image.mip_count() {
            let (data, pitch) = image.mip_data(mip);
            if pitch % 6 != 0 {
                return Err(TextureError::invalid_data(format!(
                    "cubemap mip {} pitch {} is not face-separable",
                    mip, pitch
                )));
            }
            let face_pitch = pitch / 6;
            let level = image.mip(mip);
            for row in 0..level.row_count {
                let start = row * pitch + face * face_pitch;
                writer.write_all(&data[start..start + face_pitch])?;
            }
        }
    }
    Ok(())
}

/// Read a DDS stream back into an image, restoring the attached trailer
pub fn read_dds<R: Read>(reader: &mut R) -> Result<ImageObject> {
    let mut image = read_dds_body(reader)?;

    let mut marker = [0u8; 4];
    if read_exact_or_eof(reader, &mut marker)? {
        if &marker != b"CExt" {
            return Err(TextureError::invalid_signature(
                "CExt".to_string(),
                String::from_utf8_lossy(&marker).into_owned(),
            ));
        }
        loop {
            reader.read_exact(&mut marker)?;
            match &marker {
                b"AttC" => {
                    let size = reader.read_u32::<LittleEndian>()? as usize;
                    let mut blob = vec![0u8; size];
                    reader.read_exact(&mut blob)?;
                    let attached = read_dds_body(&mut blob.as_slice())?;
                    image.flags_mut().attached_alpha = true;
                    image.set_attached_image(Some(Box::new(attached)));
                }
                b"CEnd" => break,
                other => {
                    return Err(TextureError::invalid_signature(
                        "AttC or CEnd".to_string(),
                        String::from_utf8_lossy(other).into_owned(),
                    ))
                }
            }
        }
    }
    Ok(image)
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8; 4]) -> Result<bool> {
    let mut filled = 0;
    while filled < 4 {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(TextureError::invalid_data("truncated trailer marker"));
        }
        filled += n;
    }
    Ok(true)
}

fn read_dds_body<R: Read>(reader: &mut R) -> Result<ImageObject> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != DDS_MAGIC {
        return Err(TextureError::invalid_signature(
            String::from_utf8_lossy(DDS_MAGIC).into_owned(),
            String::from_utf8_lossy(&magic).into_owned(),
        ));
    }
    let header_size = reader.read_u32::<LittleEndian>()?;
    if header_size != HEADER_SIZE {
        return Err(TextureError::invalid_data(format!(
            "bad DDS header size {}",
            header_size
        )));
    }
    let _flags = reader.read_u32::<LittleEndian>()?;
    let height = reader.read_u32::<LittleEndian>()?;
    let width = reader.read_u32::<LittleEndian>()?;
    let _pitch_or_linear = reader.read_u32::<LittleEndian>()?;
    let _depth = reader.read_u32::<LittleEndian>()?;
    let mip_count = reader.read_u32::<LittleEndian>()?.max(1);

    let format_tag = reader.read_u32::<LittleEndian>()?;
    let flag_word = reader.read_u32::<LittleEndian>()?;
    let average_brightness = reader.read_f32::<LittleEndian>()?;
    let mut range = ColorRange::default();
    let mut min = Vec4::splat(0.0);
    let mut max = Vec4::splat(0.0);
    for c in 0..4 {
        min.set(c, reader.read_f32::<LittleEndian>()?);
    }
    for c in 0..4 {
        max.set(c, reader.read_f32::<LittleEndian>()?);
    }
    range.min = min;
    range.max = max;

    // Pixel format block
    let pf_size = reader.read_u32::<LittleEndian>()?;
    if pf_size != PIXELFORMAT_SIZE {
        return Err(TextureError::invalid_data(format!(
            "bad pixel format block size {}",
            pf_size
        )));
    }
    let pf_flags = reader.read_u32::<LittleEndian>()?;
    let mut four_cc = [0u8; 4];
    reader.read_exact(&mut four_cc)?;
    let _bit_count = reader.read_u32::<LittleEndian>()?;
    let mut _masks = [0u32; 4];
    for m in _masks.iter_mut() {
        *m = reader.read_u32::<LittleEndian>()?;
    }

    let _caps = reader.read_u32::<LittleEndian>()?;
    let caps2 = reader.read_u32::<LittleEndian>()?;
    let _ = reader.read_u32::<LittleEndian>()?;
    let _ = reader.read_u32::<LittleEndian>()?;
    let _ = reader.read_u32::<LittleEndian>()?;

    if pf_flags & DDPF_FOURCC != 0 && four_cc == FOURCC_DX10 {
        // DX10 extension; the reserved tag already names the format
        for _ in 0..5 {
            let _ = reader.read_u32::<LittleEndian>()?;
        }
    }

    let format = resolve_format(format_tag, pf_flags, four_cc)?;
    let is_cubemap = caps2 & DDSCAPS2_CUBEMAP_ALL != 0;
    let (full_width, cubemap) = if is_cubemap {
        (width * 6, CubemapKind::Yes)
    } else {
        (width, CubemapKind::No)
    };

    let mut image = ImageObject::new(full_width, height, mip_count, format, cubemap)?;
    if image.mip_count() != mip_count {
        return Err(TextureError::invalid_data(format!(
            "header claims {} mips, format allows {}",
            mip_count,
            image.mip_count()
        )));
    }
    let (flags, color_model) = ImageFlags::from_bits(flag_word);
    *image.flags_mut() = flags;
    image.set_color_model(color_model);
    image.set_average_brightness(average_brightness);
    image.set_color_range(range);

    if is_cubemap {
        read_cubemap_data(&mut image, reader)?;
    } else {
        for mip in 0..image.mip_count() {
            let level = image.mip_mut(mip);
            reader.read_exact(&mut level.data)?;
        }
    }
    Ok(image)
}

fn resolve_format(format_tag: u32, pf_flags: u32, four_cc: [u8; 4]) -> Result<PixelFormat> {
    if format_tag > 0 && (format_tag - 1) < PixelFormat::ALL.len() as u32 {
        return Ok(PixelFormat::ALL[(format_tag - 1) as usize]);
    }
    // Foreign DDS without the reserved tag: fall back on the FourCC
    if pf_flags & DDPF_FOURCC != 0 {
        for format in PixelFormat::ALL {
            if format.info().four_cc == Some(four_cc) {
                return Ok(format);
            }
        }
    }
    Err(TextureError::unsupported(format!(
        "cannot resolve pixel format (tag {}, fourcc {:?})",
        format_tag,
        String::from_utf8_lossy(&four_cc)
    )))
}

fn read_cubemap_data<R: Read>(image: &mut ImageObject, reader: &mut R) -> Result<()> {
    for face in 0..6usize {
        for mip in 0..image.mip_count() {
            let level = image.mip_mut(mip);
            let pitch = level.pitch;
            if pitch % 6 != 0 {
                return Err(TextureError::invalid_data(format!(
                    "cubemap mip {} pitch {} is not face-separable",
                    mip, pitch
                )));
            }
            let face_pitch = pitch / 6;
            let mut row = vec![0u8; face_pitch];
            for r in 0..level.row_count {
                reader.read_exact(&mut row)?;
                let start = r * pitch + face * face_pitch;
                level.data[start..start + face_pitch].copy_from_slice(&row);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use texture_rc_core::ColorModel;

    fn filled_image(w: u32, h: u32, mips: u32, format: PixelFormat) -> ImageObject {
        let mut image = ImageObject::new(w, h, mips, format, CubemapKind::No).unwrap();
        for mip in 0..image.mip_count() {
            let (data, _) = image.mip_data_mut(mip);
            for (i, byte) in data.iter_mut().enumerate() {
                *byte = ((i * 7 + mip as usize * 13) % 251) as u8;
            }
        }
        image
    }

    fn roundtrip(image: &ImageObject) -> ImageObject {
        let mut buffer = Vec::new();
        write_dds(image, &mut buffer).unwrap();
        read_dds(&mut buffer.as_slice()).unwrap()
    }

    #[test]
    fn test_plain_roundtrip() {
        let image = filled_image(16, 8, 4, PixelFormat::A8R8G8B8);
        let restored = roundtrip(&image);
        assert_eq!(restored.format(), PixelFormat::A8R8G8B8);
        assert_eq!(restored.mip_count(), 4);
        for mip in 0..4 {
            assert_eq!(restored.mip(mip).data, image.mip(mip).data, "mip {}", mip);
        }
    }

    #[test]
    fn test_metadata_roundtrip() {
        let mut image = filled_image(8, 8, 1, PixelFormat::A32B32G32R32F);
        image.flags_mut().renormalized = true;
        image.flags_mut().greyscale = true;
        image.set_color_model(ColorModel::YFbFr);
        image.set_average_brightness(0.42);
        let mut range = ColorRange::default();
        range.min = Vec4::new(0.1, 0.2, 0.3, 0.0);
        range.max = Vec4::new(2.0, 3.0, 4.0, 1.0);
        image.set_color_range(range);

        let restored = roundtrip(&image);
        assert!(restored.flags().renormalized);
        assert!(restored.flags().greyscale);
        assert_eq!(restored.color_model(), ColorModel::YFbFr);
        assert!((restored.average_brightness() - 0.42).abs() < 1e-6);
        assert_eq!(restored.color_range().max.z, 4.0);
    }

    #[test]
    fn test_alias_format_survives() {
        // DXT1a shares DXT1's FourCC; only the reserved tag tells them apart
        let image = filled_image(8, 8, 2, PixelFormat::DXT1a);
        let restored = roundtrip(&image);
        assert_eq!(restored.format(), PixelFormat::DXT1a);
    }

    #[test]
    fn test_dx10_format_roundtrip() {
        let image = filled_image(8, 8, 1, PixelFormat::BC7);
        let restored = roundtrip(&image);
        assert_eq!(restored.format(), PixelFormat::BC7);
        assert_eq!(restored.mip(0).data, image.mip(0).data);
    }

    #[test]
    fn test_attached_alpha_trailer() {
        let mut image = filled_image(16, 16, 2, PixelFormat::DXT1);
        let alpha = filled_image(16, 16, 2, PixelFormat::A8);
        image.flags_mut().attached_alpha = true;
        image.set_attached_image(Some(Box::new(alpha)));

        let restored = roundtrip(&image);
        assert!(restored.flags().attached_alpha);
        let attached = restored.attached_image().expect("attached image");
        assert_eq!(attached.format(), PixelFormat::A8);
        assert_eq!(attached.mip_count(), 2);
        assert_eq!(
            attached.mip(0).data,
            image.attached_image().unwrap().mip(0).data
        );
    }

    #[test]
    fn test_cubemap_face_major_roundtrip() {
        let mut image =
            ImageObject::new(24, 4, 2, PixelFormat::A8R8G8B8, CubemapKind::Yes).unwrap();
        for mip in 0..image.mip_count() {
            let face_w = image.width(mip) / 6;
            let h = image.height(mip);
            let (data, pitch) = image.mip_data_mut(mip);
            for y in 0..h {
                for x in 0..image_width_px(pitch) {
                    let face = (x / face_w.max(1)) as u8;
                    let off = y as usize * pitch + x as usize * 4;
                    data[off] = face;
                    data[off + 3] = 255;
                }
            }
        }
        let restored = roundtrip(&image);
        assert_eq!(restored.cubemap(), CubemapKind::Yes);
        assert_eq!(restored.width(0), 24);
        for mip in 0..2 {
            assert_eq!(restored.mip(mip).data, image.mip(mip).data, "mip {}", mip);
        }
    }

    fn image_width_px(pitch: usize) -> u32 {
        (pitch / 4) as u32
    }

    #[test]
    fn test_bad_magic_rejected() {
        let data = b"RIFF\x00\x00\x00\x00";
        assert!(matches!(
            read_dds(&mut data.as_slice()),
            Err(TextureError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_truncated_data_rejected() {
        let image = filled_image(16, 16, 1, PixelFormat::A8R8G8B8);
        let mut buffer = Vec::new();
        write_dds(&image, &mut buffer).unwrap();
        buffer.truncate(buffer.len() - 64);
        assert!(read_dds(&mut buffer.as_slice()).is_err());
    }
}
