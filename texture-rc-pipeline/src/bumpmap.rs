//! Normal map derivation: height-to-normal, alpha-as-bump combination
//! and gloss adjustment from per-mip normal variance
//!
//! All operations work on the float RGBA representation with normals
//! stored in [0,1] (0.5 = zero component). Height sampling wraps, so
//! tileable textures produce tileable normal maps.

use texture_rc_core::{ImageObject, PixelFormat, Result};

use crate::mips::{read_pixels, write_pixels};

fn height_at(pixels: &[f32], w: u32, h: u32, x: i64, y: i64) -> f32 {
    let x = x.rem_euclid(w as i64) as u32;
    let y = y.rem_euclid(h as i64) as u32;
    let off = ((y * w + x) * 4) as usize;
    // Luminance as height
    0.299 * pixels[off] + 0.587 * pixels[off + 1] + 0.114 * pixels[off + 2]
}

fn alpha_at(pixels: &[f32], w: u32, h: u32, x: i64, y: i64) -> f32 {
    let x = x.rem_euclid(w as i64) as u32;
    let y = y.rem_euclid(h as i64) as u32;
    pixels[((y * w + x) * 4 + 3) as usize]
}

fn sobel(
    sample: &impl Fn(i64, i64) -> f32,
    x: i64,
    y: i64,
    strength: f32,
) -> (f32, f32, f32) {
    let tl = sample(x - 1, y - 1);
    let t = sample(x, y - 1);
    let tr = sample(x + 1, y - 1);
    let l = sample(x - 1, y);
    let r = sample(x + 1, y);
    let bl = sample(x - 1, y + 1);
    let b = sample(x, y + 1);
    let br = sample(x + 1, y + 1);

    let dx = (tr + 2.0 * r + br) - (tl + 2.0 * l + bl);
    let dy = (bl + 2.0 * b + br) - (tl + 2.0 * t + tr);

    let vx = -dx * strength;
    let vy = -dy * strength;
    let len = (vx * vx + vy * vy + 1.0).sqrt();
    (vx / len, vy / len, 1.0 / len)
}

/// Derive a tangent-space normal map from the image's luminance heights
///
/// Alpha passes through. `strength` scales the gradients; 0 yields a
/// flat +Z map.
pub fn bump_to_normal(image: &mut ImageObject, strength: f32) -> Result<()> {
    image.expect_format(PixelFormat::A32B32G32R32F)?;
    for mip in 0..image.mip_count() {
        let w = image.width(mip);
        let h = image.height(mip);
        let pixels = read_pixels(image, mip)?;
        let mut out = pixels.clone();
        let sample = |x: i64, y: i64| height_at(&pixels, w, h, x, y);
        for y in 0..h {
            for x in 0..w {
                let (nx, ny, nz) = sobel(&sample, x as i64, y as i64, strength);
                let off = ((y * w + x) * 4) as usize;
                out[off] = nx * 0.5 + 0.5;
                out[off + 1] = ny * 0.5 + 0.5;
                out[off + 2] = nz * 0.5 + 0.5;
            }
        }
        write_pixels(image, mip, &out)?;
    }
    Ok(())
}

/// Derive a detail normal map from the alpha channel and fold it into
/// the existing normal map
///
/// The combination adds the tangent-plane components and rescales, so a
/// flat detail map leaves the base unchanged. Alpha is left alone; the
/// caller decides whether it still means anything afterwards.
pub fn alpha_as_bump(image: &mut ImageObject, strength: f32) -> Result<()> {
    image.expect_format(PixelFormat::A32B32G32R32F)?;
    for mip in 0..image.mip_count() {
        let w = image.width(mip);
        let h = image.height(mip);
        let pixels = read_pixels(image, mip)?;
        let mut out = pixels.clone();
        let sample = |x: i64, y: i64| alpha_at(&pixels, w, h, x, y);
        for y in 0..h {
            for x in 0..w {
                let (dx, dy, dz) = sobel(&sample, x as i64, y as i64, strength);
                let off = ((y * w + x) * 4) as usize;
                let bx = pixels[off] * 2.0 - 1.0;
                let by = pixels[off + 1] * 2.0 - 1.0;
                let bz = pixels[off + 2] * 2.0 - 1.0;

                let vx = bx + dx;
                let vy = by + dy;
                let vz = bz * dz;
                let len = (vx * vx + vy * vy + vz * vz).sqrt();
                let (nx, ny, nz) = if len > 1e-6 {
                    (vx / len, vy / len, vz / len)
                } else {
                    (0.0, 0.0, 1.0)
                };
                out[off] = nx * 0.5 + 0.5;
                out[off + 1] = ny * 0.5 + 0.5;
                out[off + 2] = nz * 0.5 + 0.5;
            }
        }
        write_pixels(image, mip, &out)?;
    }
    Ok(())
}

/// Largest specular power the gloss ladder maps to (gloss 1.0 = 2^11)
const MAX_GLOSS_POWER_LOG2: f32 = 11.0;

/// Adjust the gloss channel of lower mips from normal shortening
///
/// Mip filtering averages normals; the averaged vector's sub-unit
/// length measures how much the normals varied inside the footprint.
/// The Toksvig factor converts that variance into a specular power
/// reduction, keeping highlight size perceptually stable across mips.
/// Must run before the mips are renormalized, while the length
/// information still exists.
pub fn gloss_from_normals(image: &mut ImageObject) -> Result<()> {
    image.expect_format(PixelFormat::A32B32G32R32F)?;
    for mip in 1..image.mip_count() {
        let w = image.width(mip);
        let h = image.height(mip);
        let mut view = image.float_view_mut(mip)?;
        for y in 0..h {
            for x in 0..w {
                let mut px = view.get(x, y);
                let vx = px[0] * 2.0 - 1.0;
                let vy = px[1] * 2.0 - 1.0;
                let vz = px[2] * 2.0 - 1.0;
                let len = (vx * vx + vy * vy + vz * vz).sqrt().clamp(1e-3, 1.0);

                let power = 2.0f32.powf(px[3] * MAX_GLOSS_POWER_LOG2);
                let toksvig = len / (len + power * (1.0 - len));
                let adjusted = (toksvig * power).max(1.0);
                px[3] = (adjusted.log2() / MAX_GLOSS_POWER_LOG2).clamp(0.0, 1.0);
                view.set(x, y, px);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use texture_rc_core::CubemapKind;

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

    fn unpack(px: [f32; 4]) -> [f32; 3] {
        [px[0] * 2.0 - 1.0, px[1] * 2.0 - 1.0, px[2] * 2.0 - 1.0]
    }

    #[test]
    fn test_flat_height_gives_flat_normals() {
        let mut image = float_image(8, 8, |_, _| [0.5, 0.5, 0.5, 1.0]);
        bump_to_normal(&mut image, 4.0).unwrap();
        let n = unpack(image.float_view(0).unwrap().get(3, 3));
        assert!(n[0].abs() < 1e-5);
        assert!(n[1].abs() < 1e-5);
        assert!((n[2] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_gradient_tilts_normals() {
        // Height rises with x, so normals lean toward -X
        let mut image = float_image(8, 8, |x, _| {
            let v = x as f32 / 16.0;
            [v, v, v, 1.0]
        });
        bump_to_normal(&mut image, 4.0).unwrap();
        let n = unpack(image.float_view(0).unwrap().get(3, 3));
        assert!(n[0] < -0.1, "x component {}", n[0]);
        assert!(n[2] > 0.0);
    }

    #[test]
    fn test_normals_are_unit_length() {
        let mut image = float_image(8, 8, |x, y| {
            let v = ((x * 7 + y * 13) % 10) as f32 / 10.0;
            [v, v, v, 1.0]
        });
        bump_to_normal(&mut image, 6.0).unwrap();
        let view = image.float_view(0).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                let n = unpack(view.get(x, y));
                let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
                assert!((len - 1.0).abs() < 1e-4, "length {} at {},{}", len, x, y);
            }
        }
    }

    #[test]
    fn test_flat_alpha_leaves_base_normals() {
        let mut image = float_image(8, 8, |_, _| [0.75, 0.5, 0.933, 0.5]);
        let before = unpack(image.float_view(0).unwrap().get(4, 4));
        alpha_as_bump(&mut image, 4.0).unwrap();
        let after = unpack(image.float_view(0).unwrap().get(4, 4));
        for c in 0..3 {
            assert!((before[c] - after[c]).abs() < 1e-3, "component {}", c);
        }
    }

    #[test]
    fn test_gloss_drops_where_normals_vary() {
        let mut image =
            ImageObject::new(4, 4, 2, PixelFormat::A32B32G32R32F, CubemapKind::No).unwrap();
        {
            // Mip 1 holds an averaged, shortened normal with full gloss
            let mut view = image.float_view_mut(1).unwrap();
            for y in 0..2 {
                for x in 0..2 {
                    view.set(x, y, [0.5, 0.5, 0.8, 1.0]); // length 0.6
                }
            }
        }
        gloss_from_normals(&mut image).unwrap();
        let gloss = image.float_view(1).unwrap().get(0, 0)[3];
        assert!(gloss < 0.5, "gloss {}", gloss);
    }

    #[test]
    fn test_unit_normals_keep_gloss() {
        let mut image =
            ImageObject::new(4, 4, 2, PixelFormat::A32B32G32R32F, CubemapKind::No).unwrap();
        for mip in 0..2 {
            let w = image.width(mip);
            let h = image.height(mip);
            let mut view = image.float_view_mut(mip).unwrap();
            for y in 0..h {
                for x in 0..w {
                    view.set(x, y, [0.5, 0.5, 1.0, 0.8]);
                }
            }
        }
        gloss_from_normals(&mut image).unwrap();
        let gloss = image.float_view(1).unwrap().get(0, 0)[3];
        assert!((gloss - 0.8).abs() < 0.02, "gloss {}", gloss);
    }
}
