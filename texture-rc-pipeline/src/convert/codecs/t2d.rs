//! Software block decoder backend (BC, ETC2, EAC, ASTC, PVRTC)
//!
//! Decode-only counterpart to the ISPC compressor. Every supported
//! format decodes to A8R8G8B8; the decoder emits one packed u32 per
//! pixel whose little-endian byte order is exactly our BGRA memory
//! layout, so the output copies straight into the mip.

use texture_rc_core::{ImageObject, PixelFormat, Quality};

use super::{BlockCodec, CodecOutcome};

pub struct Texture2dCodec;

impl Texture2dCodec {
    fn decompress_mips(&self, src: &ImageObject) -> Result<ImageObject, String> {
        let (canonical, _) = src.format().canonical_block_format();

        let mut dst = ImageObject::new(
            src.width(0),
            src.height(0),
            src.mip_count(),
            PixelFormat::A8R8G8B8,
            src.cubemap(),
        )
        .map_err(|e| e.to_string())?;
        dst.set_color_range(src.color_range());
        dst.set_average_brightness(src.average_brightness());
        *dst.flags_mut() = src.flags();
        dst.set_color_model(src.color_model());

        for mip in 0..src.mip_count() {
            let (data, _) = src.mip_data(mip);
            let w = src.width(mip) as usize;
            let h = src.height(mip) as usize;
            let mut pixels = vec![0u32; w * h];
            decode_one_mip(canonical, data, w, h, &mut pixels)?;

            let level = dst.mip_mut(mip);
            for (px, out) in pixels.iter().zip(level.data.chunks_exact_mut(4)) {
                out.copy_from_slice(&px.to_le_bytes());
            }
        }
        Ok(dst)
    }
}

fn decode_one_mip(
    format: PixelFormat,
    data: &[u8],
    w: usize,
    h: usize,
    pixels: &mut Vec<u32>,
) -> Result<(), String> {
    let result = match format {
        PixelFormat::BC1 => texture2ddecoder::decode_bc1(data, w, h, pixels),
        PixelFormat::BC3 => texture2ddecoder::decode_bc3(data, w, h, pixels),
        PixelFormat::BC4 => texture2ddecoder::decode_bc4(data, w, h, pixels),
        PixelFormat::BC5 => texture2ddecoder::decode_bc5(data, w, h, pixels),
        PixelFormat::BC6UH => texture2ddecoder::decode_bc6_unsigned(data, w, h, pixels),
        PixelFormat::BC7 => texture2ddecoder::decode_bc7(data, w, h, pixels),
        PixelFormat::ETC2 => texture2ddecoder::decode_etc2_rgb(data, w, h, pixels),
        PixelFormat::ETC2a => texture2ddecoder::decode_etc2_rgba8(data, w, h, pixels),
        PixelFormat::EAC_R11 => texture2ddecoder::decode_eacr(data, w, h, pixels),
        PixelFormat::EAC_RG11 => texture2ddecoder::decode_eacrg(data, w, h, pixels),
        PixelFormat::ASTC_4x4 => texture2ddecoder::decode_astc(data, w, h, 4, 4, pixels),
        PixelFormat::ASTC_6x6 => texture2ddecoder::decode_astc(data, w, h, 6, 6, pixels),
        PixelFormat::ASTC_8x8 => texture2ddecoder::decode_astc(data, w, h, 8, 8, pixels),
        PixelFormat::PVRTC2 => texture2ddecoder::decode_pvrtc(data, w, h, pixels, true),
        PixelFormat::PVRTC4 => texture2ddecoder::decode_pvrtc(data, w, h, pixels, false),
        other => return Err(format!("no decoder for {}", other.info().name)),
    };
    result.map_err(|e| format!("{} decode failed: {e}", format.info().name))
}

fn can_decode(format: PixelFormat) -> bool {
    matches!(
        format,
        PixelFormat::BC1
            | PixelFormat::BC3
            | PixelFormat::BC4
            | PixelFormat::BC5
            | PixelFormat::BC6UH
            | PixelFormat::BC7
            | PixelFormat::ETC2
            | PixelFormat::ETC2a
            | PixelFormat::EAC_R11
            | PixelFormat::EAC_RG11
            | PixelFormat::ASTC_4x4
            | PixelFormat::ASTC_6x6
            | PixelFormat::ASTC_8x8
            | PixelFormat::PVRTC2
            | PixelFormat::PVRTC4
    )
}

impl BlockCodec for Texture2dCodec {
    fn name(&self) -> &'static str {
        "texture2ddecoder"
    }

    fn try_compress(
        &self,
        _src: &ImageObject,
        _dst_format: PixelFormat,
        _quality: Quality,
    ) -> CodecOutcome {
        CodecOutcome::Unsupported
    }

    fn try_decompress(&self, src: &ImageObject) -> CodecOutcome {
        let (canonical, _) = src.format().canonical_block_format();
        if !can_decode(canonical) {
            return CodecOutcome::Unsupported;
        }
        match self.decompress_mips(src) {
            Ok(image) => CodecOutcome::Success(image),
            Err(msg) => CodecOutcome::Failed(msg),
        }
    }
}
