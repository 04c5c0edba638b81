//! Block codec capability interface and the stock codec chain
//!
//! Every native compressor/decompressor sits behind [`BlockCodec`] and
//! reports a tri-state outcome. The dispatcher walks the chain in order
//! and only `Unsupported` lets it fall through to the next codec; a
//! `Failed` outcome is terminal for the conversion.

mod intel;
mod t2d;

pub use intel::IntelTexCodec;
pub use t2d::Texture2dCodec;

use texture_rc_core::{ImageObject, PixelFormat, Quality};

/// Outcome of asking one codec to handle a format
pub enum CodecOutcome {
    /// The codec produced the converted image
    Success(ImageObject),
    /// The codec owns this format but could not process the data
    Failed(String),
    /// The codec does not implement this format; try the next one
    Unsupported,
}

/// Capability interface over a native block compressor/decompressor
///
/// Compression input is the canonical uncompressed image the dispatcher
/// prepared (A8R8G8B8, or A16B16G16R16F for HDR block formats);
/// decompression output is always A8R8G8B8.
pub trait BlockCodec: Send + Sync {
    fn name(&self) -> &'static str;

    fn try_compress(
        &self,
        src: &ImageObject,
        dst_format: PixelFormat,
        quality: Quality,
    ) -> CodecOutcome;

    fn try_decompress(&self, src: &ImageObject) -> CodecOutcome;
}

/// The stock codec chain, in dispatch order
pub fn default_codecs() -> Vec<Box<dyn BlockCodec>> {
    vec![Box::new(IntelTexCodec), Box::new(Texture2dCodec)]
}

/// Copy one BGRA8 mip into a 4x4-padded RGBA buffer with edge extension
///
/// Block compressors only accept whole blocks; partial edge blocks repeat
/// the last row/column so the padding doesn't bleed new colors in.
pub(crate) fn padded_rgba(data: &[u8], pitch: usize, width: u32, height: u32) -> (Vec<u8>, u32, u32) {
    let w = width as usize;
    let h = height as usize;
    let padded_w = w.div_ceil(4) * 4;
    let padded_h = h.div_ceil(4) * 4;

    let mut rgba = vec![0u8; padded_w * padded_h * 4];
    for y in 0..padded_h {
        let src_y = y.min(h - 1);
        let row = &data[src_y * pitch..];
        for x in 0..padded_w {
            let src_x = x.min(w - 1);
            let px = &row[src_x * 4..src_x * 4 + 4];
            let dst = &mut rgba[(y * padded_w + x) * 4..(y * padded_w + x) * 4 + 4];
            // BGRA in memory -> RGBA for the compressor
            dst[0] = px[2];
            dst[1] = px[1];
            dst[2] = px[0];
            dst[3] = px[3];
        }
    }
    (rgba, padded_w as u32, padded_h as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padded_rgba_extends_edges() {
        // 2x2 BGRA image, padded to 4x4
        let data = vec![
            1, 2, 3, 4, 5, 6, 7, 8, // row 0: two pixels
            9, 10, 11, 12, 13, 14, 15, 16, // row 1
        ];
        let (rgba, pw, ph) = padded_rgba(&data, 8, 2, 2);
        assert_eq!((pw, ph), (4, 4));
        assert_eq!(rgba.len(), 4 * 4 * 4);
        // Pixel (0,0): BGRA 1,2,3,4 -> RGBA 3,2,1,4
        assert_eq!(&rgba[0..4], &[3, 2, 1, 4]);
        // Padding column repeats pixel (1,0): BGRA 5,6,7,8 -> RGBA 7,6,5,8
        assert_eq!(&rgba[3 * 4..3 * 4 + 4], &[7, 6, 5, 8]);
        // Padding row repeats row 1
        assert_eq!(&rgba[(3 * 4) * 4..(3 * 4) * 4 + 4], &[11, 10, 9, 12]);
    }
}
