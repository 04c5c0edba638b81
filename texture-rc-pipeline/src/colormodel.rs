//! Color model transforms on the float RGBA representation
//!
//! Each model is a bijective per-pixel remapping of the RGB channels;
//! alpha always passes through untouched. There is no model-to-model
//! path: everything converts through RGB, and the image's color-model
//! field always states what the pixels currently store.

use texture_rc_core::{ColorModel, ImageObject, PixelFormat, Result};

/// Convert the image's pixel data to `target`, updating the model field
///
/// Requires the float32 RGBA representation. A no-op when the image is
/// already in the target model.
pub fn convert_model(image: &mut ImageObject, target: ColorModel) -> Result<()> {
    if image.color_model() == target {
        return Ok(());
    }
    image.expect_format(PixelFormat::A32B32G32R32F)?;

    if image.color_model() != ColorModel::Rgb {
        let from = image.color_model();
        apply(image, |px| to_rgb(from, px))?;
        image.set_color_model(ColorModel::Rgb);
    }
    if target != ColorModel::Rgb {
        apply(image, |px| from_rgb(target, px))?;
        image.set_color_model(target);
    }
    Ok(())
}

fn apply(image: &mut ImageObject, f: impl Fn([f32; 4]) -> [f32; 4]) -> Result<()> {
    for mip in 0..image.mip_count() {
        let w = image.width(mip);
        let h = image.height(mip);
        let mut view = image.float_view_mut(mip)?;
        for y in 0..h {
            for x in 0..w {
                view.set(x, y, f(view.get(x, y)));
            }
        }
    }
    Ok(())
}

fn from_rgb(model: ColorModel, px: [f32; 4]) -> [f32; 4] {
    match model {
        ColorModel::Rgb => px,
        ColorModel::Cie => rgb_to_cie(px),
        ColorModel::YCbCr => rgb_to_ycbcr(px),
        ColorModel::YFbFr => rgb_to_yfbfr(px),
        ColorModel::Irb => rgb_to_irb(px),
    }
}

fn to_rgb(model: ColorModel, px: [f32; 4]) -> [f32; 4] {
    match model {
        ColorModel::Rgb => px,
        ColorModel::Cie => cie_to_rgb(px),
        ColorModel::YCbCr => ycbcr_to_rgb(px),
        ColorModel::YFbFr => yfbfr_to_rgb(px),
        ColorModel::Irb => irb_to_rgb(px),
    }
}

// BT.601 luma weights, shared by the luma-based models
fn luma(r: f32, g: f32, b: f32) -> f32 {
    0.299 * r + 0.587 * g + 0.114 * b
}

/// CIE xyY chromaticity: channels hold (x, y, Y)
///
/// Black degenerates to the equal-energy white point so the inverse
/// stays well-defined.
fn rgb_to_cie([r, g, b, a]: [f32; 4]) -> [f32; 4] {
    let x = 0.4124 * r + 0.3576 * g + 0.1805 * b;
    let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
    let z = 0.0193 * r + 0.1192 * g + 0.9505 * b;
    let sum = x + y + z;
    if sum <= 1e-9 {
        return [1.0 / 3.0, 1.0 / 3.0, 0.0, a];
    }
    [x / sum, y / sum, y, a]
}

fn cie_to_rgb([cx, cy, lum, a]: [f32; 4]) -> [f32; 4] {
    if cy <= 1e-9 {
        return [0.0, 0.0, 0.0, a];
    }
    let x = cx * lum / cy;
    let y = lum;
    let z = (1.0 - cx - cy) * lum / cy;
    [
        3.2406 * x - 1.5372 * y - 0.4986 * z,
        -0.9689 * x + 1.8758 * y + 0.0415 * z,
        0.0557 * x - 0.2040 * y + 1.0570 * z,
        a,
    ]
}

/// BT.601 YCbCr: channels hold (Y, Cb, Cr), chroma biased around 0.5
fn rgb_to_ycbcr([r, g, b, a]: [f32; 4]) -> [f32; 4] {
    let y = luma(r, g, b);
    let cb = 0.5 + (b - y) * (0.5 / (1.0 - 0.114));
    let cr = 0.5 + (r - y) * (0.5 / (1.0 - 0.299));
    [y, cb, cr, a]
}

fn ycbcr_to_rgb([y, cb, cr, a]: [f32; 4]) -> [f32; 4] {
    let r = y + (cr - 0.5) * ((1.0 - 0.299) / 0.5);
    let b = y + (cb - 0.5) * ((1.0 - 0.114) / 0.5);
    let g = (y - 0.299 * r - 0.114 * b) / 0.587;
    [r, g, b, a]
}

/// Full-range chroma variant with luma stored in the green channel,
/// where block compressors spend the most bits: (Fr, Y, Fb)
fn rgb_to_yfbfr([r, g, b, a]: [f32; 4]) -> [f32; 4] {
    let y = luma(r, g, b);
    let fb = 0.5 + (b - y) * 0.5;
    let fr = 0.5 + (r - y) * 0.5;
    [fr, y, fb, a]
}

fn yfbfr_to_rgb([fr, y, fb, a]: [f32; 4]) -> [f32; 4] {
    let r = y + (fr - 0.5) * 2.0;
    let b = y + (fb - 0.5) * 2.0;
    let g = (y - 0.299 * r - 0.114 * b) / 0.587;
    [r, g, b, a]
}

/// Intensity plus red/blue shares: (R/s, s/3, B/s) with s = R+G+B
///
/// Green is implicit (s - R - B); black stores the neutral 1/3 shares.
fn rgb_to_irb([r, g, b, a]: [f32; 4]) -> [f32; 4] {
    let s = r + g + b;
    if s <= 1e-9 {
        return [1.0 / 3.0, 0.0, 1.0 / 3.0, a];
    }
    [r / s, s / 3.0, b / s, a]
}

fn irb_to_rgb([rs, i, bs, a]: [f32; 4]) -> [f32; 4] {
    let s = i * 3.0;
    let r = rs * s;
    let b = bs * s;
    [r, s - r - b, b, a]
}

#[cfg(test)]
mod tests {
    use super::*;
    use texture_rc_core::CubemapKind;

    fn sample_colors() -> Vec<[f32; 4]> {
        let mut colors = vec![
            [0.0, 0.0, 0.0, 1.0],
            [1.0, 1.0, 1.0, 0.5],
            [1.0, 0.0, 0.0, 1.0],
            [0.0, 1.0, 0.0, 1.0],
            [0.0, 0.0, 1.0, 1.0],
            [0.25, 0.5, 0.75, 0.3],
        ];
        for i in 0..20 {
            let t = i as f32 / 19.0;
            colors.push([t, 1.0 - t, (t * 7.0).fract(), t]);
        }
        colors
    }

    #[test]
    fn test_per_pixel_roundtrips() {
        for model in [
            ColorModel::Cie,
            ColorModel::YCbCr,
            ColorModel::YFbFr,
            ColorModel::Irb,
        ] {
            for color in sample_colors() {
                let encoded = from_rgb(model, color);
                let back = to_rgb(model, encoded);
                for c in 0..4 {
                    assert!(
                        (back[c] - color[c]).abs() < 1e-3,
                        "{:?} channel {}: {} vs {}",
                        model,
                        c,
                        back[c],
                        color[c]
                    );
                }
            }
        }
    }

    #[test]
    fn test_yfbfr_keeps_luma_in_green() {
        let encoded = rgb_to_yfbfr([0.2, 0.6, 0.1, 1.0]);
        let expected = luma(0.2, 0.6, 0.1);
        assert!((encoded[1] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_convert_model_tracks_state() {
        let mut image =
            ImageObject::new(2, 2, 1, PixelFormat::A32B32G32R32F, CubemapKind::No).unwrap();
        {
            let mut view = image.float_view_mut(0).unwrap();
            view.set(0, 0, [0.3, 0.6, 0.9, 1.0]);
        }
        convert_model(&mut image, ColorModel::YCbCr).unwrap();
        assert_eq!(image.color_model(), ColorModel::YCbCr);

        // Model-to-model goes through RGB implicitly
        convert_model(&mut image, ColorModel::Irb).unwrap();
        assert_eq!(image.color_model(), ColorModel::Irb);

        convert_model(&mut image, ColorModel::Rgb).unwrap();
        let px = image.float_view(0).unwrap().get(0, 0);
        assert!((px[0] - 0.3).abs() < 1e-3);
        assert!((px[1] - 0.6).abs() < 1e-3);
        assert!((px[2] - 0.9).abs() < 1e-3);
    }

    #[test]
    fn test_wrong_format_rejected() {
        let mut image =
            ImageObject::new(2, 2, 1, PixelFormat::A8R8G8B8, CubemapKind::No).unwrap();
        assert!(convert_model(&mut image, ColorModel::Cie).is_err());
    }
}
