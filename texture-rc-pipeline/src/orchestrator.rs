//! The compile-job state machine
//!
//! [`TextureCompiler`] sequences one image through the whole pipeline
//! according to a preset property bag: canonical float decode, the
//! optional shaping stages, mip/cubemap generation, color encoding and
//! the final format conversion. Every optional stage is gated by a
//! property; a stage that fails short-circuits the job with its reason.
//!
//! A failed file job never leaves a partial output behind.

use std::fs;
use std::io::{BufWriter, Write as _};
use std::path::Path;

use tracing::{debug, info, warn};

use texture_rc_core::{
    AlphaContent, AlphaNormalization, ColorNormalization, ColorModel, CubemapKind, ImageObject,
    ImageProperties, InputColorSpace, OutputColorSpace, PixelFormat, Result, TextureError,
};

use crate::bumpmap;
use crate::colormodel::convert_model;
use crate::convert::{FormatConverter, ImageToProcess};
use crate::cubemap::{create_cubemap_mip_maps, reshape_to_strip, CubemapFilterParams, FilterEngine};
use crate::dds::write_dds;
use crate::mips::{create_mip_maps, high_pass, scale_image, MipGenParams};
use crate::rgbk::{compress_rgb32f_to_rgbk8, RgbkMode};

/// Mips that are never streamed, counted from the tail of the chain
const NUM_LAST_MIPS: u32 = 3;

/// Luminance histogram bin below which the median marks a dark image
const DARK_MEDIAN_BIN: usize = 116;

/// Result of one compile job
pub enum CompileOutcome {
    /// The image ran through the full pipeline
    Compiled(ImageObject),
    /// The source was passed through untouched (already compressed, or
    /// a volume texture the pipeline does not process)
    Passthrough(ImageObject),
}

impl CompileOutcome {
    pub fn image(&self) -> &ImageObject {
        match self {
            CompileOutcome::Compiled(image) => image,
            CompileOutcome::Passthrough(image) => image,
        }
    }

    pub fn into_image(self) -> ImageObject {
        match self {
            CompileOutcome::Compiled(image) => image,
            CompileOutcome::Passthrough(image) => image,
        }
    }
}

/// Runs compile jobs; owns the format converter and the cubemap
/// filtering engine shared by the jobs it executes
pub struct TextureCompiler {
    converter: FormatConverter,
    filter_engine: FilterEngine,
}

impl Default for TextureCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureCompiler {
    pub fn new() -> Self {
        Self {
            converter: FormatConverter::new(),
            filter_engine: FilterEngine::new(),
        }
    }

    /// Compile and write the result as a DDS file
    ///
    /// Honors the `nooutput` switch. If anything fails after the file
    /// was created, the partial file is removed.
    pub fn compile_to_file(
        &self,
        source: &ImageObject,
        props: &mut ImageProperties,
        path: &Path,
    ) -> Result<()> {
        let outcome = self.run_with_properties(source, props)?;
        if props.set.get_as_bool("nooutput", false) {
            info!(path = %path.display(), "output suppressed by preset");
            return Ok(());
        }
        let written = (|| -> Result<()> {
            let file = fs::File::create(path)?;
            let mut writer = BufWriter::new(file);
            write_dds(outcome.image(), &mut writer)?;
            writer.flush()?;
            Ok(())
        })();
        if written.is_err() {
            let _ = fs::remove_file(path);
        }
        written
    }

    /// Run the full stage sequence on one image
    pub fn run_with_properties(
        &self,
        source: &ImageObject,
        props: &mut ImageProperties,
    ) -> Result<CompileOutcome> {
        if source.format().is_compressed() {
            info!(
                format = source.format().info().name,
                "source is already block-compressed, passing through"
            );
            return Ok(CompileOutcome::Passthrough(source.copy_image()));
        }
        if source.flags().volume {
            info!("volume texture, passing through");
            return Ok(CompileOutcome::Passthrough(source.copy_image()));
        }

        let (input_space, output_space) = props.color_space();
        if props.mip_renormalize() && output_space != OutputColorSpace::Linear {
            return Err(TextureError::config_conflict(
                "mip renormalization cannot be combined with sRGB output",
            ));
        }
        let mut dest_format = props.dest_pixel_format();
        if props.mip_renormalize() && matches!(dest_format, PixelFormat::DXT1 | PixelFormat::BC1) {
            warn!(
                format = dest_format.info().name,
                "normal maps compress poorly to an opaque 4bpp format"
            );
        }

        let mut work = ImageToProcess::new(source.copy_image());

        // Canonical float32 RGBA, de-gammaed into linear space
        self.converter.convert_format(
            &mut work,
            PixelFormat::A32B32G32R32F,
            props.quality(),
            false,
        )?;
        if input_space == InputColorSpace::Srgb {
            apply_gamma(image_mut(&mut work)?, srgb_to_linear)?;
        }

        props.preserve_alpha =
            !props.discard_alpha() && image_mut(&mut work)?.has_non_opaque_alpha();

        if props.set.get_as_bool("colorchart", false) {
            match extract_color_chart(image_mut(&mut work)?)? {
                Some(chart) => work.set(chart),
                None => warn!("color chart marker not found, image left unchanged"),
            }
        }

        let swizzle_spec = props.set.get_as_string("swizzle", "");
        if !swizzle_spec.is_empty() {
            image_mut(&mut work)?.swizzle(&swizzle_spec)?;
        }
        if props.discard_alpha() {
            image_mut(&mut work)?.swizzle("rgb1")?;
            props.preserve_alpha = false;
        }

        let is_cubemap = props.cubemap();
        if is_cubemap {
            let reshaped = {
                let image = image_mut(&mut work)?;
                let face = probe_face_size(image.width(0), image.height(0))?;
                reshape_to_strip(image, face)?
            };
            work.set(reshaped);
            let image = image_mut(&mut work)?;
            image.set_cubemap(CubemapKind::Yes);
            image.flags_mut().cubemap = true;
            if !image.has_cubemap_compatible_sizes() {
                return Err(TextureError::invalid_dimensions(format!(
                    "{}x{} is not a valid cubemap strip",
                    image.width(0),
                    image.height(0)
                )));
            }
        } else if props.pow_of_2() && !image_mut(&mut work)?.has_power_of_two_sizes() {
            let scaled = {
                let image = image_mut(&mut work)?;
                let w = image.width(0).next_power_of_two();
                let h = image.height(0).next_power_of_two();
                debug!(w, h, "scaling to power-of-two dimensions");
                scale_image(image, w, h, props.mip_filter())?
            };
            work.set(scaled);
        }

        let min_alpha = props.minimum_alpha();
        if min_alpha > 0 {
            image_mut(&mut work)?.clamp_minimum_alpha(min_alpha as f32 / 255.0)?;
        }

        if props.bump_to_normal_filter() > 0 {
            bumpmap::bump_to_normal(image_mut(&mut work)?, props.bump_strength())?;
        }
        if props.alpha_as_bump_filter() > 0 {
            bumpmap::alpha_as_bump(image_mut(&mut work)?, props.bump_strength())?;
            props.preserve_alpha = false;
        }
        if props.set.get_as_bool("lumintoalpha", false) {
            image_mut(&mut work)?.get_luminance_into_alpha()?;
            props.preserve_alpha = true;
        }

        // Mip chain generation
        let reduce = {
            let image = image_mut(&mut work)?;
            props.requested_resolution_reduce(image.width(0), image.height(0))
        };
        let renormalize_in_mips = props.mip_renormalize() && !props.gloss_from_normals();
        let mipped = {
            let image = image_mut(&mut work)?;
            if is_cubemap {
                let params = CubemapFilterParams {
                    filter: props.cubemap_filter_type(),
                    base_filter_angle: props.cubemap_filter_angle(),
                    initial_mip_angle: props.cubemap_mip_filter_angle(),
                    mip_angle_scale: props.cubemap_mip_filter_slope(),
                    edge_fixup_width: props.cubemap_edge_fixup_width(),
                    sample_count: props.cubemap_ggx_sample_count(),
                    gloss_scale: props.brdf_gloss_scale(),
                    gloss_bias: props.brdf_gloss_bias(),
                };
                let remove = if props.mipmaps() { 0 } else { u32::MAX };
                create_cubemap_mip_maps(&self.filter_engine, image, &params, reduce, remove)?
            } else {
                let params = MipGenParams {
                    filter: props.mip_filter(),
                    reduce_resolution: reduce,
                    remove_mips: 0,
                    single_mip: !props.mipmaps(),
                    renormalize: renormalize_in_mips,
                    maintain_alpha_coverage: props.maintain_alpha_coverage(),
                    min_texture_size: props.min_texture_size().max(1),
                    max_texture_size: match props.max_texture_size() {
                        0 => 16384,
                        n => n,
                    },
                };
                create_mip_maps(image, &params)?
            }
        };
        work.set(mipped);

        if props.gloss_from_normals() {
            // Must see the unnormalized averaged normals
            bumpmap::gloss_from_normals(image_mut(&mut work)?)?;
            if props.mip_renormalize() {
                let image = image_mut(&mut work)?;
                let count = image.mip_count();
                image.normalize_vectors(0, count)?;
            }
        }

        let high_pass_mips = props.high_pass();
        if high_pass_mips > 0 {
            high_pass(
                image_mut(&mut work)?,
                high_pass_mips as u32,
                props.mip_filter(),
            )?;
        }

        {
            let image = image_mut(&mut work)?;
            let brightness = image.calculate_average_brightness()?;
            image.set_average_brightness(brightness);
        }

        // HDR packing or color-model encode, mutually exclusive
        if let Some(mode) = RgbkMode::from_preset(props.rgbk_compression() as i32) {
            let coherent = matches!(
                dest_format,
                PixelFormat::DXT5 | PixelFormat::DXT5t | PixelFormat::BC3 | PixelFormat::BC3t
            );
            compress_rgb32f_to_rgbk8(
                image_mut(&mut work)?,
                props.rgbk_max_value(),
                coherent,
                mode,
            )?;
            // The scale channel must survive even into alpha-less targets
            props.preserve_alpha = true;
        } else if props.color_model() != ColorModel::Rgb {
            convert_model(image_mut(&mut work)?, props.color_model())?;
        }

        if props.normalize_range() {
            let exponent_bits = if dest_format.is_floating_point(true) {
                4
            } else {
                0
            };
            let alpha_norm = if props.normalize_range_alpha() {
                AlphaNormalization::Normalize
            } else if props.discard_alpha() {
                AlphaNormalization::SetToZero
            } else {
                AlphaNormalization::PassThrough
            };
            image_mut(&mut work)?.normalize_image_range(
                ColorNormalization::Normalize,
                alpha_norm,
                false,
                exponent_bits,
            )?;
        }

        let encode_srgb = match output_space {
            OutputColorSpace::Linear => false,
            OutputColorSpace::Srgb => true,
            OutputColorSpace::Auto => {
                self.auto_srgb_pays_off(image_mut(&mut work)?, dest_format, props)?
            }
        };
        if encode_srgb {
            let image = image_mut(&mut work)?;
            apply_gamma(image, linear_to_srgb)?;
            image.flags_mut().srgb_read = true;
        }

        if props.set.get_as_bool("outputuncompressed", false) && dest_format.is_compressed() {
            let demoted = dest_format.fallback_uncompressed();
            debug!(
                from = dest_format.info().name,
                to = demoted.info().name,
                "uncompressed output requested"
            );
            dest_format = demoted;
        }

        if props.auto_detect_luminance() && image_mut(&mut work)?.is_perfect_greyscale() {
            image_mut(&mut work)?.flags_mut().greyscale = true;
            dest_format = if dest_format.is_extended_dds_only() {
                PixelFormat::BC7
            } else if dest_format.has_alpha() {
                PixelFormat::A8L8
            } else {
                PixelFormat::L8
            };
            debug!(format = dest_format.info().name, "greyscale source detected");
        }

        if props.auto_detect_black_and_white_alpha() {
            let content = image_mut(&mut work)?.classify_alpha_content();
            let five_to_one = matches!(
                dest_format,
                PixelFormat::DXT5 | PixelFormat::DXT5t | PixelFormat::BC3 | PixelFormat::BC3t
            );
            match content {
                AlphaContent::OnlyWhite | AlphaContent::Absent => {
                    if five_to_one || dest_format == PixelFormat::DXT1a {
                        dest_format = PixelFormat::DXT1;
                    }
                }
                AlphaContent::OnlyBlack | AlphaContent::OnlyBlackAndWhite => {
                    if five_to_one {
                        dest_format = PixelFormat::DXT1a;
                    }
                }
                _ => {}
            }
        }

        self.converter.convert_format(
            &mut work,
            dest_format,
            props.quality(),
            props.preserve_alpha,
        )?;

        let reduce_alpha = props.reduce_alpha();
        if reduce_alpha > 0 {
            if let Some(attached) = image_mut(&mut work)?.attached_image_mut() {
                for _ in 0..reduce_alpha {
                    attached.drop_top_mip();
                }
            }
        }

        // Flag bookkeeping across the attached chain, then streaming split
        {
            let image = image_mut(&mut work)?;
            let flags = image.flags();
            if let Some(attached) = image.attached_image_mut() {
                attached.flags_mut().cubemap = flags.cubemap;
                attached.flags_mut().renormalized = flags.renormalized;
                attached.flags_mut().attached_alpha = true;
                if flags.cubemap {
                    attached.set_cubemap(CubemapKind::Yes);
                }
            }
            let persistent = persistent_mip_count(
                image.width(0),
                image.height(0),
                image.mip_count(),
                props.num_streamable_mips(),
            );
            image.set_persistent_mips(persistent);
        }

        let image = work.into_inner().ok_or(TextureError::InvalidImage)?;
        Ok(CompileOutcome::Compiled(image))
    }

    /// Decide whether sRGB output encoding pays off for this image
    ///
    /// Dark images lose most of their tonal resolution in linear 8-bit;
    /// the luminance histogram's median bin detects that. For DXT1 at
    /// block-aligned sizes the answer is measured instead of guessed: the
    /// top mip is compressed both ways and the smaller round-trip error
    /// wins.
    fn auto_srgb_pays_off(
        &self,
        image: &ImageObject,
        dest_format: PixelFormat,
        props: &ImageProperties,
    ) -> Result<bool> {
        let dark = {
            let view = image.float_view(0)?;
            let (w, h) = (image.width(0), image.height(0));
            let mut histogram = [0u64; 256];
            for y in 0..h {
                for x in 0..w {
                    let [r, g, b, _] = view.get(x, y);
                    let lum = 0.299 * r + 0.587 * g + 0.114 * b;
                    histogram[(lum.clamp(0.0, 1.0) * 255.0) as usize] += 1;
                }
            }
            let total = (w as u64) * (h as u64);
            let mut acc = 0u64;
            let mut median = 255usize;
            for (bin, count) in histogram.iter().enumerate() {
                acc += count;
                if acc * 2 >= total {
                    median = bin;
                    break;
                }
            }
            median < DARK_MEDIAN_BIN
        };

        let dxt1 = matches!(dest_format, PixelFormat::DXT1 | PixelFormat::BC1);
        if !dxt1 || image.width(0) % 4 != 0 || image.height(0) % 4 != 0 {
            return Ok(dark);
        }

        let linear_error = self.dxt1_roundtrip_error(image, false, props)?;
        let srgb_error = self.dxt1_roundtrip_error(image, true, props)?;
        debug!(linear_error, srgb_error, "auto colorspace DXT1 comparison");
        Ok(srgb_error < linear_error)
    }

    /// Mean squared linear-space error of one DXT1 round trip
    fn dxt1_roundtrip_error(
        &self,
        original: &ImageObject,
        through_srgb: bool,
        props: &ImageProperties,
    ) -> Result<f64> {
        let mut probe = original.copy_image();
        if through_srgb {
            apply_gamma(&mut probe, linear_to_srgb)?;
        }
        let mut work = ImageToProcess::new(probe);
        self.converter
            .convert_format(&mut work, PixelFormat::DXT1, props.quality(), false)?;
        self.converter.convert_format(
            &mut work,
            PixelFormat::A32B32G32R32F,
            props.quality(),
            false,
        )?;
        let mut decoded = work.into_inner().ok_or(TextureError::InvalidImage)?;
        if through_srgb {
            apply_gamma(&mut decoded, srgb_to_linear)?;
        }

        let a = original.float_view(0)?;
        let b = decoded.float_view(0)?;
        let (w, h) = (original.width(0), original.height(0));
        let mut sum = 0.0f64;
        for y in 0..h {
            for x in 0..w {
                let pa = a.get(x, y);
                let pb = b.get(x, y);
                for c in 0..3 {
                    let d = (pa[c] - pb[c]) as f64;
                    sum += d * d;
                }
            }
        }
        Ok(sum / (w as f64 * h as f64 * 3.0))
    }
}

fn image_mut(work: &mut ImageToProcess) -> Result<&mut ImageObject> {
    work.get_mut().ok_or(TextureError::InvalidImage)
}

/// Face size for the probe reshape, from the source layout
fn probe_face_size(w: u32, h: u32) -> Result<u32> {
    if w == 6 * h {
        Ok(h)
    } else if w == 2 * h {
        Ok((h / 2).max(1))
    } else if w * 3 == h * 4 {
        Ok((w / 4).max(1))
    } else {
        Err(TextureError::invalid_dimensions(format!(
            "{}x{} cannot be reshaped into a cubemap",
            w, h
        )))
    }
}

/// Mips kept resident when the rest of the chain is streamable
fn persistent_mip_count(w: u32, h: u32, mip_count: u32, num_streamable: u32) -> u32 {
    if w.min(h) <= 1 << (NUM_LAST_MIPS + 2) {
        return mip_count;
    }
    let streamable = num_streamable.min(mip_count.saturating_sub(NUM_LAST_MIPS));
    mip_count - streamable
}

fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// Apply a transfer curve to the color channels of every mip
fn apply_gamma(image: &mut ImageObject, curve: fn(f32) -> f32) -> Result<()> {
    image.expect_format(PixelFormat::A32B32G32R32F)?;
    for mip in 0..image.mip_count() {
        let w = image.width(mip);
        let h = image.height(mip);
        let mut view = image.float_view_mut(mip)?;
        for y in 0..h {
            for x in 0..w {
                let mut px = view.get(x, y);
                for c in 0..3 {
                    px[c] = curve(px[c]);
                }
                view.set(x, y, px);
            }
        }
    }
    Ok(())
}

const CHART_WIDTH: u32 = 256;
const CHART_HEIGHT: u32 = 16;

/// Find and cut out an embedded 256x16 color chart
///
/// The chart is bracketed by two full-height magenta columns, one
/// immediately left and one immediately right of the chart block.
/// Returns `None` when no marker is present.
fn extract_color_chart(image: &ImageObject) -> Result<Option<ImageObject>> {
    let view = image.float_view(0)?;
    let (w, h) = (image.width(0), image.height(0));
    if w < CHART_WIDTH + 2 || h < CHART_HEIGHT {
        return Ok(None);
    }

    let is_marker = |x: u32, y: u32| {
        let [r, g, b, _] = view.get(x, y);
        r > 0.99 && g < 0.01 && b > 0.99
    };
    let column_is_marker = |x: u32, y: u32| (0..CHART_HEIGHT).all(|dy| is_marker(x, y + dy));

    for y in 0..=(h - CHART_HEIGHT) {
        for x in 0..(w - CHART_WIDTH - 1) {
            if !column_is_marker(x, y) || !column_is_marker(x + CHART_WIDTH + 1, y) {
                continue;
            }
            let mut chart = ImageObject::new(
                CHART_WIDTH,
                CHART_HEIGHT,
                1,
                PixelFormat::A32B32G32R32F,
                CubemapKind::No,
            )?;
            {
                let mut out = chart.float_view_mut(0)?;
                for cy in 0..CHART_HEIGHT {
                    for cx in 0..CHART_WIDTH {
                        out.set(cx, cy, view.get(x + 1 + cx, y + cy));
                    }
                }
            }
            info!(x, y, "color chart extracted");
            return Ok(Some(chart));
        }
    }
    Ok(None)
}
