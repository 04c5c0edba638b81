//! Mip chain generation: separable resampling, alpha-coverage transfer,
//! normal renormalization, high-pass extraction and pow2 rescaling
//!
//! Every destination mip is filtered from the full-resolution mip 0, not
//! from the previous mip, so repeated halving error never accumulates.

use texture_rc_core::{
    CubemapKind, ImageObject, MipFilterKind, PixelFormat, Result, TextureError,
};

/// Alpha-test reference used for coverage measurement
const COVERAGE_THRESHOLD: f32 = 0.5;

/// Binary-search depth for the coverage scale factor
const COVERAGE_SEARCH_ITERATIONS: u32 = 10;

/// Settings for one [`create_mip_maps`] run
#[derive(Debug, Clone)]
pub struct MipGenParams {
    pub filter: MipFilterKind,
    /// Number of times to halve the top-level resolution
    pub reduce_resolution: u32,
    /// Mips to strip from the end of the allowed chain; the result always
    /// keeps at least one level
    pub remove_mips: u32,
    /// Generate only the top level
    pub single_mip: bool,
    pub renormalize: bool,
    pub maintain_alpha_coverage: bool,
    pub min_texture_size: u32,
    pub max_texture_size: u32,
}

impl Default for MipGenParams {
    fn default() -> Self {
        Self {
            filter: MipFilterKind::Box,
            reduce_resolution: 0,
            remove_mips: 0,
            single_mip: false,
            renormalize: false,
            maintain_alpha_coverage: false,
            min_texture_size: 1,
            max_texture_size: 16384,
        }
    }
}

/// Build a fresh mip chain from the image's top level
///
/// The source must be float32 RGBA and not a cubemap strip. The top
/// level is halved `reduce_resolution` times, then iteratively adjusted
/// until it fits the min/max texture size window.
pub fn create_mip_maps(image: &ImageObject, params: &MipGenParams) -> Result<ImageObject> {
    image.expect_format(PixelFormat::A32B32G32R32F)?;
    if image.cubemap() == CubemapKind::Yes {
        return Err(TextureError::unsupported(
            "plain mip generation cannot run on a cubemap strip",
        ));
    }

    let (top_w, top_h) = fit_top_level(
        image.width(0),
        image.height(0),
        params.reduce_resolution,
        params.min_texture_size,
        params.max_texture_size,
    );

    let allowed = PixelFormat::A32B32G32R32F.compute_max_mip_count(top_w, top_h, false);
    let mip_count = if params.single_mip {
        1
    } else {
        allowed.saturating_sub(params.remove_mips).max(1)
    };

    let mut dst = ImageObject::new(
        top_w,
        top_h,
        mip_count,
        PixelFormat::A32B32G32R32F,
        image.cubemap(),
    )?;
    dst.set_color_range(image.color_range());
    dst.set_average_brightness(image.average_brightness());
    *dst.flags_mut() = image.flags();
    dst.set_color_model(image.color_model());

    let src_pixels = read_pixels(image, 0)?;
    let sw = image.width(0);
    let sh = image.height(0);

    let source_coverage = if params.maintain_alpha_coverage {
        Some(alpha_coverage(&src_pixels, 1.0))
    } else {
        None
    };

    for mip in 0..dst.mip_count() {
        let dw = dst.width(mip);
        let dh = dst.height(mip);
        let mut pixels = resample(&src_pixels, sw, sh, dw, dh, params.filter);
        if let Some(target) = source_coverage {
            transfer_alpha_coverage(&mut pixels, target);
        }
        write_pixels(&mut dst, mip, &pixels)?;
    }

    if params.renormalize {
        dst.normalize_vectors(0, dst.mip_count())?;
    }
    Ok(dst)
}

/// Halve `reduce` times, then walk the result into the size window
fn fit_top_level(width: u32, height: u32, reduce: u32, min_size: u32, max_size: u32) -> (u32, u32) {
    let mut w = width;
    let mut h = height;
    for _ in 0..reduce {
        if w <= 1 && h <= 1 {
            break;
        }
        w = (w / 2).max(1);
        h = (h / 2).max(1);
    }
    while (w > max_size || h > max_size) && (w > 1 || h > 1) {
        w = (w / 2).max(1);
        h = (h / 2).max(1);
    }
    while (w < min_size || h < min_size) && w < width.max(min_size) && h < height.max(min_size) {
        w *= 2;
        h *= 2;
    }
    (w, h)
}

/// Fraction of pixels whose scaled alpha exceeds the reference threshold
fn alpha_coverage(pixels: &[f32], alpha_scale: f32) -> f32 {
    let count = pixels.len() / 4;
    if count == 0 {
        return 0.0;
    }
    let covered = pixels
        .chunks_exact(4)
        .filter(|px| (px[3] * alpha_scale).min(1.0) > COVERAGE_THRESHOLD)
        .count();
    covered as f32 / count as f32
}

/// Scale alpha so the mip's coverage at the fixed threshold matches the
/// source's; keeps alpha-tested silhouettes from shrinking in blurry mips
fn transfer_alpha_coverage(pixels: &mut [f32], target_coverage: f32) {
    let mut lo = 0.0f32;
    let mut hi = 4.0f32;
    let mut best = 1.0f32;
    for _ in 0..COVERAGE_SEARCH_ITERATIONS {
        let mid = (lo + hi) * 0.5;
        let coverage = alpha_coverage(pixels, mid);
        best = mid;
        if coverage < target_coverage {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    for px in pixels.chunks_exact_mut(4) {
        px[3] = (px[3] * best).min(1.0);
    }
}

/// High-pass detail extraction: subtract the image blurred down by
/// `mips_down` halvings and re-center around mid-grey
pub fn high_pass(image: &mut ImageObject, mips_down: u32, filter: MipFilterKind) -> Result<()> {
    image.expect_format(PixelFormat::A32B32G32R32F)?;
    if mips_down == 0 {
        return Ok(());
    }
    let w = image.width(0);
    let h = image.height(0);
    let low_w = (w >> mips_down).max(1);
    let low_h = (h >> mips_down).max(1);

    let pixels = read_pixels(image, 0)?;
    let low = resample(&pixels, w, h, low_w, low_h, filter);
    let low_up = resample(&low, low_w, low_h, w, h, filter);

    let mut out = pixels;
    for (px, lp) in out.chunks_exact_mut(4).zip(low_up.chunks_exact(4)) {
        for c in 0..3 {
            px[c] = (px[c] - lp[c] + 0.5).clamp(0.0, 1.0);
        }
    }
    write_pixels(image, 0, &out)?;

    // Lower mips are stale detail, regenerate from the filtered top
    for mip in 1..image.mip_count() {
        let dw = image.width(mip);
        let dh = image.height(mip);
        let resampled = resample(&out, w, h, dw, dh, filter);
        write_pixels(image, mip, &resampled)?;
    }
    Ok(())
}

/// Resample the top level to new dimensions, producing a single-mip image
///
/// Used by the square-up stage (pow2 upscale/downscale) and the probe
/// reshape; metadata is carried over.
pub fn scale_image(
    image: &ImageObject,
    new_width: u32,
    new_height: u32,
    filter: MipFilterKind,
) -> Result<ImageObject> {
    image.expect_format(PixelFormat::A32B32G32R32F)?;
    let pixels = read_pixels(image, 0)?;
    let resampled = resample(
        &pixels,
        image.width(0),
        image.height(0),
        new_width,
        new_height,
        filter,
    );

    let mut dst = ImageObject::new(
        new_width,
        new_height,
        1,
        PixelFormat::A32B32G32R32F,
        image.cubemap(),
    )?;
    dst.set_color_range(image.color_range());
    dst.set_average_brightness(image.average_brightness());
    *dst.flags_mut() = image.flags();
    dst.set_color_model(image.color_model());
    write_pixels(&mut dst, 0, &resampled)?;
    Ok(dst)
}

/// Read one mip into an interleaved RGBA f32 buffer
pub(crate) fn read_pixels(image: &ImageObject, mip: u32) -> Result<Vec<f32>> {
    let view = image.float_view(mip)?;
    let w = image.width(mip);
    let h = image.height(mip);
    let mut out = Vec::with_capacity((w * h * 4) as usize);
    for y in 0..h {
        for x in 0..w {
            out.extend_from_slice(&view.get(x, y));
        }
    }
    Ok(out)
}

/// Write an interleaved RGBA f32 buffer back into one mip
pub(crate) fn write_pixels(image: &mut ImageObject, mip: u32, pixels: &[f32]) -> Result<()> {
    let w = image.width(mip);
    let h = image.height(mip);
    let mut view = image.float_view_mut(mip)?;
    for y in 0..h {
        for x in 0..w {
            let off = ((y * w + x) * 4) as usize;
            view.set(
                x,
                y,
                [
                    pixels[off],
                    pixels[off + 1],
                    pixels[off + 2],
                    pixels[off + 3],
                ],
            );
        }
    }
    Ok(())
}

fn kernel_support(filter: MipFilterKind) -> f32 {
    match filter {
        MipFilterKind::Box => 0.5,
        MipFilterKind::Triangle => 1.0,
        MipFilterKind::Lanczos => 3.0,
    }
}

fn kernel_weight(filter: MipFilterKind, x: f32) -> f32 {
    let x = x.abs();
    match filter {
        MipFilterKind::Box => {
            if x <= 0.5 {
                1.0
            } else {
                0.0
            }
        }
        MipFilterKind::Triangle => (1.0 - x).max(0.0),
        MipFilterKind::Lanczos => {
            if x < 1e-6 {
                1.0
            } else if x < 3.0 {
                let px = std::f32::consts::PI * x;
                3.0 * px.sin() * (px / 3.0).sin() / (px * px)
            } else {
                0.0
            }
        }
    }
}

/// Separable resample of an interleaved RGBA f32 buffer
pub(crate) fn resample(
    src: &[f32],
    sw: u32,
    sh: u32,
    dw: u32,
    dh: u32,
    filter: MipFilterKind,
) -> Vec<f32> {
    if sw == dw && sh == dh {
        return src.to_vec();
    }
    let horizontal = resample_axis(src, sw, sh, dw, filter, true);
    resample_axis(&horizontal, dw, sh, dh, filter, false)
}

fn resample_axis(
    src: &[f32],
    width: u32,
    height: u32,
    new_len: u32,
    filter: MipFilterKind,
    horizontal: bool,
) -> Vec<f32> {
    let (old_len, lines) = if horizontal {
        (width, height)
    } else {
        (height, width)
    };
    let out_w = if horizontal { new_len } else { width };
    let out_h = if horizontal { height } else { new_len };
    let mut out = vec![0.0f32; (out_w * out_h * 4) as usize];

    let scale = old_len as f32 / new_len as f32;
    let filter_scale = scale.max(1.0);
    let support = kernel_support(filter) * filter_scale;

    for d in 0..new_len {
        let center = (d as f32 + 0.5) * scale - 0.5;
        let first = ((center - support).floor() as i64).max(0) as u32;
        let last = ((center + support).ceil() as i64).min(old_len as i64 - 1) as u32;

        // Precompute weights for this output coordinate
        let mut weights = Vec::with_capacity((last - first + 1) as usize);
        let mut total = 0.0f32;
        for s in first..=last {
            let w = kernel_weight(filter, (s as f32 - center) / filter_scale);
            weights.push(w);
            total += w;
        }
        if total <= 0.0 {
            let nearest = (center.round() as i64).clamp(0, old_len as i64 - 1) as u32;
            weights.clear();
            weights.resize((last - first + 1) as usize, 0.0);
            weights[(nearest - first) as usize] = 1.0;
            total = 1.0;
        }

        for line in 0..lines {
            let mut acc = [0.0f32; 4];
            for (i, s) in (first..=last).enumerate() {
                let (x, y) = if horizontal { (s, line) } else { (line, s) };
                let off = ((y * width + x) * 4) as usize;
                let w = weights[i];
                for c in 0..4 {
                    acc[c] += src[off + c] * w;
                }
            }
            let (ox, oy) = if horizontal { (d, line) } else { (line, d) };
            let off = ((oy * out_w + ox) * 4) as usize;
            for c in 0..4 {
                out[off + c] = acc[c] / total;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_image(w: u32, h: u32, f: impl Fn(u32, u32) -> [f32; 4]) -> ImageObject {
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
    fn test_full_chain_from_256() {
        let image = float_image(256, 256, |_, _| [0.5, 0.5, 0.5, 1.0]);
        let result = create_mip_maps(&image, &MipGenParams::default()).unwrap();
        assert_eq!(result.mip_count(), 9);
        assert_eq!(result.width(0), 256);
        assert_eq!(result.width(8), 1);
    }

    #[test]
    fn test_reduce_resolution_halves_top() {
        let image = float_image(64, 32, |_, _| [0.0, 0.0, 0.0, 1.0]);
        let params = MipGenParams {
            reduce_resolution: 2,
            ..Default::default()
        };
        let result = create_mip_maps(&image, &params).unwrap();
        assert_eq!(result.width(0), 16);
        assert_eq!(result.height(0), 8);
    }

    #[test]
    fn test_max_texture_size_clamps() {
        let image = float_image(128, 128, |_, _| [0.0, 0.0, 0.0, 1.0]);
        let params = MipGenParams {
            max_texture_size: 32,
            ..Default::default()
        };
        let result = create_mip_maps(&image, &params).unwrap();
        assert_eq!(result.width(0), 32);
    }

    #[test]
    fn test_flat_color_survives_every_filter() {
        for filter in [
            MipFilterKind::Box,
            MipFilterKind::Triangle,
            MipFilterKind::Lanczos,
        ] {
            let image = float_image(16, 16, |_, _| [0.25, 0.5, 0.75, 1.0]);
            let params = MipGenParams {
                filter,
                ..Default::default()
            };
            let result = create_mip_maps(&image, &params).unwrap();
            for mip in 0..result.mip_count() {
                let px = result.float_view(mip).unwrap().get(0, 0);
                assert!((px[0] - 0.25).abs() < 1e-3, "{:?} mip {}", filter, mip);
                assert!((px[2] - 0.75).abs() < 1e-3, "{:?} mip {}", filter, mip);
            }
        }
    }

    #[test]
    fn test_alpha_coverage_is_preserved() {
        // Left half opaque, right half transparent: coverage 50%
        let image = float_image(64, 64, |x, _| {
            if x < 32 {
                [1.0, 1.0, 1.0, 1.0]
            } else {
                [1.0, 1.0, 1.0, 0.0]
            }
        });
        let params = MipGenParams {
            filter: MipFilterKind::Lanczos,
            maintain_alpha_coverage: true,
            ..Default::default()
        };
        let result = create_mip_maps(&image, &params).unwrap();
        // Check a blurry mip: coverage at the fixed threshold stays near 50%
        let pixels = read_pixels(&result, 3).unwrap();
        let coverage = alpha_coverage(&pixels, 1.0);
        assert!(
            (coverage - 0.5).abs() <= 0.01 + 1.0 / 8.0 / 8.0,
            "coverage {}",
            coverage
        );
    }

    #[test]
    fn test_renormalize_produces_unit_vectors() {
        let image = float_image(8, 8, |x, _| {
            if x % 2 == 0 {
                [1.0, 0.5, 0.5, 1.0] // +X
            } else {
                [0.5, 1.0, 0.5, 1.0] // +Y
            }
        });
        let params = MipGenParams {
            renormalize: true,
            ..Default::default()
        };
        let result = create_mip_maps(&image, &params).unwrap();
        let px = result.float_view(1).unwrap().get(0, 0);
        let v = [px[0] * 2.0 - 1.0, px[1] * 2.0 - 1.0, px[2] * 2.0 - 1.0];
        let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        assert!((len - 1.0).abs() < 1e-3, "length {}", len);
    }

    #[test]
    fn test_cubemap_strip_rejected() {
        let mut image = float_image(24, 4, |_, _| [0.0, 0.0, 0.0, 1.0]);
        image.set_cubemap(CubemapKind::Yes);
        assert!(create_mip_maps(&image, &MipGenParams::default()).is_err());
    }

    #[test]
    fn test_scale_image_resizes() {
        let image = float_image(24, 24, |_, _| [0.4, 0.4, 0.4, 1.0]);
        let scaled = scale_image(&image, 32, 32, MipFilterKind::Triangle).unwrap();
        assert_eq!(scaled.width(0), 32);
        let px = scaled.float_view(0).unwrap().get(16, 16);
        assert!((px[0] - 0.4).abs() < 1e-3);
    }

    #[test]
    fn test_high_pass_flattens_uniform_image() {
        let mut image = float_image(32, 32, |_, _| [0.7, 0.7, 0.7, 1.0]);
        high_pass(&mut image, 2, MipFilterKind::Box).unwrap();
        // Uniform input has no detail: everything lands on mid-grey
        let px = image.float_view(0).unwrap().get(5, 5);
        assert!((px[0] - 0.5).abs() < 1e-3);
        assert_eq!(px[3], 1.0);
    }
}
