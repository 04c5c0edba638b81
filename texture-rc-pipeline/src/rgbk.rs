//! HDR-in-LDR encodings: RGBK per-pixel scale and RGBE shared exponent
//!
//! Both operate in place on the float RGBA representation, leaving all
//! channels in [0,1] so a subsequent 8-bit format conversion quantizes
//! them directly. The scale/exponent lives in the alpha channel.

use texture_rc_core::{ImageObject, PixelFormat, Result, TextureError};

/// Which HDR packing the "rgbk" preset value selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RgbkMode {
    /// Squared per-pixel scale, k snapped to the coarse lattice
    SparseK,
    /// Squared per-pixel scale, continuous k
    ContinuousK,
    /// Radiance-style shared exponent
    Rgbe,
}

impl RgbkMode {
    /// Map the preset integer (1..=3); 0 means no RGBK compression
    pub fn from_preset(value: i32) -> Option<RgbkMode> {
        match value {
            1 => Some(RgbkMode::SparseK),
            2 => Some(RgbkMode::ContinuousK),
            3 => Some(RgbkMode::Rgbe),
            _ => None,
        }
    }
}

/// Coarse k lattice: 7 steps so the block compressor's typical +-6 alpha
/// quantization error cannot shift the reconstructed scale perceptibly
const SPARSE_K_STEPS: u32 = 7;

fn snap_k_up(k: u32) -> u32 {
    let step = 255.0 / SPARSE_K_STEPS as f32;
    let slot = (k as f32 / step).ceil().max(1.0);
    (slot * step).round().min(255.0) as u32
}

/// Closed-form smallest k in 1..=255 with `value <= (k/255)^2`
fn k_for(value: f32) -> u32 {
    let k = (value.max(0.0).sqrt() * 255.0).ceil() as u32;
    k.clamp(1, 255)
}

/// Encode an HDR float image into RGBK, in place
///
/// Colors are divided by `max_value` first; per pixel the scale `k`
/// (stored in alpha as k/255) satisfies `color / (k/255)^2 <= 1`.
/// With `dxt5_coherent` every 4x4 block shares its maximum k, so the
/// flat alpha blocks survive BC3 alpha compression unharmed.
pub fn compress_rgb32f_to_rgbk8(
    image: &mut ImageObject,
    max_value: f32,
    dxt5_coherent: bool,
    mode: RgbkMode,
) -> Result<()> {
    image.expect_format(PixelFormat::A32B32G32R32F)?;
    if mode == RgbkMode::Rgbe {
        return compress_rgbe(image);
    }
    if max_value <= 0.0 {
        return Err(TextureError::invalid_data(format!(
            "rgbk max value must be positive, got {}",
            max_value
        )));
    }

    for mip in 0..image.mip_count() {
        let w = image.width(mip);
        let h = image.height(mip);

        // First pass: per-pixel k, optionally pooled per block
        let mut k_map = vec![0u32; (w * h) as usize];
        {
            let view = image.float_view(mip)?;
            for y in 0..h {
                for x in 0..w {
                    let [r, g, b, _] = view.get(x, y);
                    let maxc = (r.max(g).max(b) / max_value).min(1.0);
                    let mut k = k_for(maxc);
                    if mode == RgbkMode::SparseK {
                        k = snap_k_up(k);
                    }
                    k_map[(y * w + x) as usize] = k;
                }
            }
        }
        if dxt5_coherent {
            pool_block_max(&mut k_map, w, h);
        }

        let mut view = image.float_view_mut(mip)?;
        for y in 0..h {
            for x in 0..w {
                let k = k_map[(y * w + x) as usize];
                let kf = k as f32 / 255.0;
                let scale = kf * kf;
                let mut px = view.get(x, y);
                for c in 0..3 {
                    px[c] = ((px[c] / max_value) / scale).clamp(0.0, 1.0);
                }
                px[3] = kf;
                view.set(x, y, px);
            }
        }
    }
    Ok(())
}

/// Exact inverse of [`compress_rgb32f_to_rgbk8`] up to quantization
pub fn decompress_rgbk8_to_rgb32f(
    image: &mut ImageObject,
    max_value: f32,
    mode: RgbkMode,
) -> Result<()> {
    image.expect_format(PixelFormat::A32B32G32R32F)?;
    if mode == RgbkMode::Rgbe {
        return decompress_rgbe(image);
    }

    for mip in 0..image.mip_count() {
        let w = image.width(mip);
        let h = image.height(mip);
        let mut view = image.float_view_mut(mip)?;
        for y in 0..h {
            for x in 0..w {
                let mut px = view.get(x, y);
                let scale = px[3] * px[3];
                for c in 0..3 {
                    px[c] = px[c] * scale * max_value;
                }
                px[3] = 1.0;
                view.set(x, y, px);
            }
        }
    }
    Ok(())
}

/// Replace every k in a 4x4 block with the block maximum
fn pool_block_max(k_map: &mut [u32], w: u32, h: u32) {
    for by in (0..h).step_by(4) {
        for bx in (0..w).step_by(4) {
            let mut block_max = 0;
            for y in by..(by + 4).min(h) {
                for x in bx..(bx + 4).min(w) {
                    block_max = block_max.max(k_map[(y * w + x) as usize]);
                }
            }
            for y in by..(by + 4).min(h) {
                for x in bx..(bx + 4).min(w) {
                    k_map[(y * w + x) as usize] = block_max;
                }
            }
        }
    }
}

fn compress_rgbe(image: &mut ImageObject) -> Result<()> {
    for mip in 0..image.mip_count() {
        let w = image.width(mip);
        let h = image.height(mip);
        let mut view = image.float_view_mut(mip)?;
        for y in 0..h {
            for x in 0..w {
                let [r, g, b, _] = view.get(x, y);
                let maxc = r.max(g).max(b);
                let px = if maxc < 1e-32 {
                    [0.0, 0.0, 0.0, 0.0]
                } else {
                    // frexp: maxc = f * 2^e with f in [0.5, 1)
                    let e = maxc.log2().floor() as i32 + 1;
                    let scale = 2.0f32.powi(-e);
                    [
                        (r * scale).clamp(0.0, 1.0),
                        (g * scale).clamp(0.0, 1.0),
                        (b * scale).clamp(0.0, 1.0),
                        (e + 128) as f32 / 255.0,
                    ]
                };
                view.set(x, y, px);
            }
        }
    }
    Ok(())
}

fn decompress_rgbe(image: &mut ImageObject) -> Result<()> {
    for mip in 0..image.mip_count() {
        let w = image.width(mip);
        let h = image.height(mip);
        let mut view = image.float_view_mut(mip)?;
        for y in 0..h {
            for x in 0..w {
                let [r, g, b, a] = view.get(x, y);
                let px = if a == 0.0 {
                    [0.0, 0.0, 0.0, 1.0]
                } else {
                    let e = (a * 255.0).round() as i32 - 128;
                    let scale = 2.0f32.powi(e);
                    [r * scale, g * scale, b * scale, 1.0]
                };
                view.set(x, y, px);
            }
        }
    }
    Ok(())
}
