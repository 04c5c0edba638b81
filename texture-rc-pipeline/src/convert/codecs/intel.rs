//! ISPC texture compressor backend (BC1/BC3/BC4/BC5/BC6H/BC7)
//!
//! Encode-only; decompression always reports `Unsupported` so the chain
//! falls through to the decoder backend.

use std::panic::{catch_unwind, AssertUnwindSafe};

use texture_rc_core::{ImageObject, PixelFormat, Quality};

use super::{padded_rgba, BlockCodec, CodecOutcome};

pub struct IntelTexCodec;

impl IntelTexCodec {
    fn compress_mips(
        &self,
        src: &ImageObject,
        dst_format: PixelFormat,
        quality: Quality,
    ) -> Result<ImageObject, String> {
        let expected_input = match dst_format {
            PixelFormat::BC6UH => PixelFormat::A16B16G16R16F,
            _ => PixelFormat::A8R8G8B8,
        };
        if src.format() != expected_input {
            return Err(format!(
                "compressor expects {} input, got {}",
                expected_input.info().name,
                src.format().info().name
            ));
        }

        let mut dst = ImageObject::new(
            src.width(0),
            src.height(0),
            src.mip_count(),
            dst_format,
            src.cubemap(),
        )
        .map_err(|e| e.to_string())?;
        dst.set_color_range(src.color_range());
        dst.set_average_brightness(src.average_brightness());
        *dst.flags_mut() = src.flags();
        dst.set_color_model(src.color_model());

        for mip in 0..src.mip_count() {
            let (data, pitch) = src.mip_data(mip);
            let w = src.width(mip);
            let h = src.height(mip);
            let blocks = compress_one_mip(dst_format, data, pitch, w, h, quality)?;
            let level = dst.mip_mut(mip);
            if blocks.len() != level.data.len() {
                return Err(format!(
                    "compressor returned {} bytes for a {}-byte mip",
                    blocks.len(),
                    level.data.len()
                ));
            }
            level.data = blocks;
        }
        Ok(dst)
    }
}

fn compress_one_mip(
    dst_format: PixelFormat,
    data: &[u8],
    pitch: usize,
    width: u32,
    height: u32,
    quality: Quality,
) -> Result<Vec<u8>, String> {
    // The native kernels assert on their input; treat a panic as a codec
    // failure rather than letting it unwind through the pipeline.
    catch_unwind(AssertUnwindSafe(|| {
        compress_one_mip_inner(dst_format, data, pitch, width, height, quality)
    }))
    .map_err(|_| format!("{} kernel panicked", dst_format.info().name))?
}

fn compress_one_mip_inner(
    dst_format: PixelFormat,
    data: &[u8],
    pitch: usize,
    width: u32,
    height: u32,
    quality: Quality,
) -> Result<Vec<u8>, String> {
    let blocks_x = (width as usize).div_ceil(4);
    let blocks_y = (height as usize).div_ceil(4);
    let block_bytes = dst_format.info().bits_per_block as usize / 8;
    let mut output = vec![0u8; blocks_x * blocks_y * block_bytes];

    match dst_format {
        PixelFormat::BC1 => {
            let (rgba, pw, ph) = padded_rgba(data, pitch, width, height);
            let surface = intel_tex_2::RgbaSurface {
                width: pw,
                height: ph,
                stride: pw * 4,
                data: &rgba,
            };
            intel_tex_2::bc1::compress_blocks_into(&surface, &mut output);
        }
        PixelFormat::BC3 => {
            let (rgba, pw, ph) = padded_rgba(data, pitch, width, height);
            let surface = intel_tex_2::RgbaSurface {
                width: pw,
                height: ph,
                stride: pw * 4,
                data: &rgba,
            };
            intel_tex_2::bc3::compress_blocks_into(&surface, &mut output);
        }
        PixelFormat::BC4 => {
            let (rgba, pw, ph) = padded_rgba(data, pitch, width, height);
            let r_data: Vec<u8> = rgba.chunks_exact(4).map(|px| px[0]).collect();
            let surface = intel_tex_2::RSurface {
                width: pw,
                height: ph,
                stride: pw,
                data: &r_data,
            };
            intel_tex_2::bc4::compress_blocks_into(&surface, &mut output);
        }
        PixelFormat::BC5 => {
            let (rgba, pw, ph) = padded_rgba(data, pitch, width, height);
            let mut rg_data = Vec::with_capacity(rgba.len() / 2);
            for px in rgba.chunks_exact(4) {
                rg_data.push(px[0]);
                rg_data.push(px[1]);
            }
            let surface = intel_tex_2::RgSurface {
                width: pw,
                height: ph,
                stride: pw * 2,
                data: &rg_data,
            };
            intel_tex_2::bc5::compress_blocks_into(&surface, &mut output);
        }
        PixelFormat::BC6UH => {
            let (half_data, pw, ph) = padded_half_rgba(data, pitch, width, height);
            let surface = intel_tex_2::RgbaSurface {
                width: pw,
                height: ph,
                stride: pw * 8,
                data: &half_data,
            };
            let settings = match quality {
                Quality::Fast => intel_tex_2::bc6h::very_fast_settings(),
                Quality::Normal => intel_tex_2::bc6h::basic_settings(),
                Quality::Slow => intel_tex_2::bc6h::very_slow_settings(),
            };
            intel_tex_2::bc6h::compress_blocks_into(&settings, &surface, &mut output);
        }
        PixelFormat::BC7 => {
            let (rgba, pw, ph) = padded_rgba(data, pitch, width, height);
            let surface = intel_tex_2::RgbaSurface {
                width: pw,
                height: ph,
                stride: pw * 4,
                data: &rgba,
            };
            let settings = match quality {
                Quality::Fast => intel_tex_2::bc7::alpha_fast_settings(),
                Quality::Normal => intel_tex_2::bc7::alpha_basic_settings(),
                Quality::Slow => intel_tex_2::bc7::alpha_slow_settings(),
            };
            intel_tex_2::bc7::compress_blocks_into(&settings, &surface, &mut output);
        }
        other => return Err(format!("no kernel for {}", other.info().name)),
    }
    Ok(output)
}

/// Pad an A16B16G16R16F mip to block granularity (RGBA half, 8 bytes/pixel)
fn padded_half_rgba(data: &[u8], pitch: usize, width: u32, height: u32) -> (Vec<u8>, u32, u32) {
    let w = width as usize;
    let h = height as usize;
    let padded_w = w.div_ceil(4) * 4;
    let padded_h = h.div_ceil(4) * 4;

    let mut out = vec![0u8; padded_w * padded_h * 8];
    for y in 0..padded_h {
        let src_y = y.min(h - 1);
        let row = &data[src_y * pitch..];
        for x in 0..padded_w {
            let src_x = x.min(w - 1);
            let px = &row[src_x * 8..src_x * 8 + 8];
            out[(y * padded_w + x) * 8..(y * padded_w + x) * 8 + 8].copy_from_slice(px);
        }
    }
    (out, padded_w as u32, padded_h as u32)
}

impl BlockCodec for IntelTexCodec {
    fn name(&self) -> &'static str {
        "intel-tex"
    }

    fn try_compress(
        &self,
        src: &ImageObject,
        dst_format: PixelFormat,
        quality: Quality,
    ) -> CodecOutcome {
        match dst_format {
            PixelFormat::BC1
            | PixelFormat::BC3
            | PixelFormat::BC4
            | PixelFormat::BC5
            | PixelFormat::BC6UH
            | PixelFormat::BC7 => match self.compress_mips(src, dst_format, quality) {
                Ok(image) => CodecOutcome::Success(image),
                Err(msg) => CodecOutcome::Failed(msg),
            },
            _ => CodecOutcome::Unsupported,
        }
    }

    fn try_decompress(&self, _src: &ImageObject) -> CodecOutcome {
        CodecOutcome::Unsupported
    }
}
