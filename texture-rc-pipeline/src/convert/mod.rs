//! Format conversion: dispatch engine over per-format converters and
//! the block codec chain
//!
//! Conversion never partially succeeds. [`ImageToProcess`] owns the
//! in-flight image; a failed conversion leaves it invalid and every
//! caller checks validity before continuing.

pub mod codecs;
pub mod uncompressed;

use tracing::{error, warn};

use texture_rc_core::{
    CubemapKind, ImageObject, PixelFormat, Quality, Result, TextureError,
};

pub use codecs::{default_codecs, BlockCodec, CodecOutcome, IntelTexCodec, Texture2dCodec};
pub use uncompressed::{convert_uncompressed, decode_pixel, encode_pixel};

/// Cap on intermediate-format hops during one conversion
const MAX_CONVERSION_DEPTH: u32 = 4;

/// Deliberately off-center 1-bit alpha threshold; 128 would let rounding
/// ties flip after mip-averaging of pure black/white alpha
const ALPHA_THRESHOLD: u8 = 127;

/// Owner of the image flowing through the pipeline
///
/// `None` is the invalid sentinel a failed conversion leaves behind.
pub struct ImageToProcess {
    image: Option<ImageObject>,
}

impl ImageToProcess {
    pub fn new(image: ImageObject) -> Self {
        Self { image: Some(image) }
    }

    pub fn is_valid(&self) -> bool {
        self.image.is_some()
    }

    pub fn get(&self) -> Option<&ImageObject> {
        self.image.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut ImageObject> {
        self.image.as_mut()
    }

    pub fn take(&mut self) -> Option<ImageObject> {
        self.image.take()
    }

    pub fn set(&mut self, image: ImageObject) {
        self.image = Some(image);
    }

    pub fn invalidate(&mut self) {
        self.image = None;
    }

    pub fn into_inner(self) -> Option<ImageObject> {
        self.image
    }
}

/// The dispatch engine: rules in priority order, codec chain at the end
pub struct FormatConverter {
    codecs: Vec<Box<dyn BlockCodec>>,
}

impl Default for FormatConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatConverter {
    pub fn new() -> Self {
        Self {
            codecs: default_codecs(),
        }
    }

    /// Replace the codec chain; used by tests to stub out native codecs
    pub fn with_codecs(codecs: Vec<Box<dyn BlockCodec>>) -> Self {
        Self { codecs }
    }

    /// Convert the owned image to `dst_format` in place
    ///
    /// On error the image is left invalid; the caller must check
    /// [`ImageToProcess::is_valid`] before using it again. When
    /// `preserve_alpha` is set and the destination cannot carry full
    /// alpha, the alpha channel is split off into an attached A8 image
    /// before it is destroyed.
    pub fn convert_format(
        &self,
        image: &mut ImageToProcess,
        dst_format: PixelFormat,
        quality: Quality,
        preserve_alpha: bool,
    ) -> Result<()> {
        let src = image
            .take()
            .ok_or(TextureError::InvalidImage)?;
        match self.convert(src, dst_format, quality, preserve_alpha, 0) {
            Ok(converted) => {
                image.set(converted);
                Ok(())
            }
            Err(e) => {
                error!(target = dst_format.info().name, error = %e, "format conversion failed");
                Err(e)
            }
        }
    }

    fn convert(
        &self,
        src: ImageObject,
        dst_format: PixelFormat,
        quality: Quality,
        preserve_alpha: bool,
        depth: u32,
    ) -> Result<ImageObject> {
        if depth > MAX_CONVERSION_DEPTH {
            return Err(TextureError::generic(format!(
                "conversion {} -> {} exceeded the recursion limit",
                src.format().info().name,
                dst_format.info().name
            )));
        }

        // Identity
        if src.format() == dst_format {
            return Ok(src);
        }

        // Signed block formats have no codec in the stock build
        if dst_format.is_signed() || src.format().is_signed() {
            return Err(TextureError::unsupported(format!(
                "no codec for signed format {}",
                if dst_format.is_signed() {
                    dst_format.info().name
                } else {
                    src.format().info().name
                }
            )));
        }

        // Dimension guard: fall back to the layout-equivalent uncompressed
        // format instead of emitting corrupt blocks
        if dst_format.is_compressed() && !fits_format_constraints(&src, dst_format) {
            let fallback = dst_format.fallback_uncompressed();
            warn!(
                requested = dst_format.info().name,
                fallback = fallback.info().name,
                width = src.width(0),
                height = src.height(0),
                "image does not satisfy format constraints, storing uncompressed"
            );
            return self.convert(src, fallback, quality, preserve_alpha, depth + 1);
        }

        // Compressed source: decompress first, then continue toward the
        // destination (one hop each way covers compressed -> compressed)
        if src.format().is_compressed() {
            let decompressed = self.decompress(src)?;
            return self.convert(decompressed, dst_format, quality, preserve_alpha, depth + 1);
        }

        // Uncompressed -> uncompressed goes through the float hub
        if dst_format.is_uncompressed() {
            return convert_uncompressed(&src, dst_format);
        }

        // Uncompressed -> compressed: prepare canonical compressor input
        let (canonical, _) = dst_format.canonical_block_format();
        let input_format = match canonical {
            PixelFormat::BC6UH => PixelFormat::A16B16G16R16F,
            _ => PixelFormat::A8R8G8B8,
        };
        let mut prepared = if src.format() == input_format {
            src
        } else {
            convert_uncompressed(&src, input_format)?
        };

        // Split the alpha channel off before preconditioning destroys it
        let mut attached = prepared.take_attached_image();
        if attached.is_none()
            && preserve_alpha
            && (dst_format.is_without_alpha() || dst_format.is_threshold_alpha())
            && prepared.format() == PixelFormat::A8R8G8B8
            && prepared.has_non_opaque_alpha()
        {
            attached = Some(Box::new(extract_alpha_image(&prepared)?));
        }

        if prepared.format() == PixelFormat::A8R8G8B8 {
            if dst_format.is_threshold_alpha() {
                apply_alpha_threshold(&mut prepared);
            } else if dst_format.is_without_alpha() {
                force_opaque_alpha(&mut prepared);
            }
        }

        let mut result = self.compress(&prepared, canonical, quality)?;
        if canonical != dst_format {
            result.retag_format(dst_format);
        }
        if let Some(alpha) = attached {
            result.flags_mut().attached_alpha = true;
            result.set_attached_image(Some(alpha));
        }
        Ok(result)
    }

    fn compress(
        &self,
        src: &ImageObject,
        canonical: PixelFormat,
        quality: Quality,
    ) -> Result<ImageObject> {
        for codec in &self.codecs {
            match codec.try_compress(src, canonical, quality) {
                CodecOutcome::Success(image) => return Ok(image),
                CodecOutcome::Failed(msg) => {
                    return Err(TextureError::codec_failure(format!(
                        "{}: {}",
                        codec.name(),
                        msg
                    )))
                }
                CodecOutcome::Unsupported => continue,
            }
        }
        Err(TextureError::unsupported(format!(
            "no codec compresses {}",
            canonical.info().name
        )))
    }

    fn decompress(&self, mut src: ImageObject) -> Result<ImageObject> {
        let attached = src.take_attached_image();
        let src_name = src.format().info().name;
        for codec in &self.codecs {
            match codec.try_decompress(&src) {
                CodecOutcome::Success(mut image) => {
                    if let Some(alpha) = attached {
                        image.set_attached_image(Some(alpha));
                    }
                    return Ok(image);
                }
                CodecOutcome::Failed(msg) => {
                    return Err(TextureError::codec_failure(format!(
                        "{}: {}",
                        codec.name(),
                        msg
                    )))
                }
                CodecOutcome::Unsupported => continue,
            }
        }
        Err(TextureError::unsupported(format!(
            "no codec decompresses {}",
            src_name
        )))
    }
}

fn fits_format_constraints(src: &ImageObject, dst_format: PixelFormat) -> bool {
    let info = dst_format.info();
    let w = src.width(0);
    let h = src.height(0);
    if w < info.min_width || h < info.min_height {
        return false;
    }
    if info.square_pow2 && (w != h || !w.is_power_of_two()) {
        return false;
    }
    true
}

/// Build the A8 attached alpha image from a BGRA8 source, all mips
fn extract_alpha_image(src: &ImageObject) -> Result<ImageObject> {
    src.expect_format(PixelFormat::A8R8G8B8)?;
    let mut alpha = ImageObject::new(
        src.width(0),
        src.height(0),
        src.mip_count(),
        PixelFormat::A8,
        CubemapKind::No,
    )?;
    for mip in 0..src.mip_count() {
        let w = src.width(mip) as usize;
        let h = src.height(mip) as usize;
        let (src_data, src_pitch) = src.mip_data(mip);
        let level = alpha.mip_mut(mip);
        let dst_pitch = level.pitch;
        for y in 0..h {
            let src_row = &src_data[y * src_pitch..];
            let dst_row = &mut level.data[y * dst_pitch..];
            for x in 0..w {
                dst_row[x] = src_row[x * 4 + 3];
            }
        }
    }
    Ok(alpha)
}

fn apply_alpha_threshold(image: &mut ImageObject) {
    for mip in 0..image.mip_count() {
        let h = image.height(mip) as usize;
        let w = image.width(mip) as usize;
        let (data, pitch) = image.mip_data_mut(mip);
        for y in 0..h {
            let row = &mut data[y * pitch..];
            for x in 0..w {
                let a = &mut row[x * 4 + 3];
                *a = if *a > ALPHA_THRESHOLD { 255 } else { 0 };
            }
        }
    }
}

fn force_opaque_alpha(image: &mut ImageObject) {
    for mip in 0..image.mip_count() {
        let h = image.height(mip) as usize;
        let w = image.width(mip) as usize;
        let (data, pitch) = image.mip_data_mut(mip);
        for y in 0..h {
            let row = &mut data[y * pitch..];
            for x in 0..w {
                row[x * 4 + 3] = 255;
            }
        }
    }
}
