//! Cubemap mip generation: per-face resampling plus angular convolution
//!
//! The source is a horizontal face strip (width = 6 * height, face order
//! +X -X +Y -Y +Z -Z). Mip 0 resamples each face independently so no
//! colors bleed across seams; lower mips convolve over the sphere with a
//! widening kernel. The convolution runs on a shared filter engine in a
//! background thread; callers poll its status and may abort.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use texture_rc_core::{
    CubeFilterKind, CubemapKind, ImageObject, MipFilterKind, PixelFormat, Result, TextureError,
};

use crate::mips::{read_pixels, resample, write_pixels};

/// Knobs for one cubemap filtering run
#[derive(Debug, Clone)]
pub struct CubemapFilterParams {
    pub filter: CubeFilterKind,
    /// Cone half-angle applied to mip 0, in degrees; 0 leaves it unfiltered
    pub base_filter_angle: f32,
    /// Cone half-angle for mip 1, in degrees
    pub initial_mip_angle: f32,
    /// Per-mip multiplier on the cone angle
    pub mip_angle_scale: f32,
    /// Texels of edge pull-in hiding the per-face resampling seam
    pub edge_fixup_width: u32,
    /// Importance samples per texel for the GGX kernel
    pub sample_count: u32,
    /// Gloss-to-roughness mapping for the GGX mip ladder
    pub gloss_scale: f32,
    pub gloss_bias: f32,
}

impl Default for CubemapFilterParams {
    fn default() -> Self {
        Self {
            filter: CubeFilterKind::AngularGaussian,
            base_filter_angle: 3.0,
            initial_mip_angle: 1.0,
            mip_angle_scale: 2.0,
            edge_fixup_width: 1,
            sample_count: 128,
            gloss_scale: 1.0,
            gloss_bias: 0.0,
        }
    }
}

/// Completion state of a background filtering job
#[derive(Debug, Clone, PartialEq)]
pub enum FilterStatus {
    InProgress,
    Done,
    Error(String),
    Cancelled,
}

/// Serializes job initiation; the convolution holds internal working
/// state, so only one job per engine may run at a time
pub struct FilterEngine {
    busy: Arc<Mutex<()>>,
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterEngine {
    pub fn new() -> Self {
        Self {
            busy: Arc::new(Mutex::new(())),
        }
    }

    /// Start filtering in a background thread
    pub fn start(
        &self,
        image: ImageObject,
        params: CubemapFilterParams,
        reduce_resolution: u32,
        remove_mips: u32,
    ) -> FilterJob {
        let status = Arc::new(Mutex::new(FilterStatus::InProgress));
        let abort = Arc::new(AtomicBool::new(false));
        let result = Arc::new(Mutex::new(None));

        let gate = Arc::clone(&self.busy);
        let thread_status = Arc::clone(&status);
        let thread_abort = Arc::clone(&abort);
        let thread_result = Arc::clone(&result);
        let handle = thread::spawn(move || {
            let _guard = match gate.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            let outcome = filter_cubemap(&image, &params, reduce_resolution, remove_mips, {
                let abort = Arc::clone(&thread_abort);
                move || abort.load(Ordering::Relaxed)
            });
            let mut status = thread_status.lock().unwrap_or_else(|p| p.into_inner());
            match outcome {
                Ok(filtered) => {
                    *thread_result.lock().unwrap_or_else(|p| p.into_inner()) = Some(filtered);
                    *status = FilterStatus::Done;
                }
                Err(TextureError::Cancelled) => *status = FilterStatus::Cancelled,
                Err(e) => *status = FilterStatus::Error(e.to_string()),
            }
        });

        FilterJob {
            status,
            abort,
            result,
            handle: Some(handle),
        }
    }
}

/// Handle to a running cubemap filter; poll or wait for the result
pub struct FilterJob {
    status: Arc<Mutex<FilterStatus>>,
    abort: Arc<AtomicBool>,
    result: Arc<Mutex<Option<ImageObject>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl FilterJob {
    pub fn status(&self) -> FilterStatus {
        self.status.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Request cancellation; the job stops at the next face boundary
    pub fn cancel(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    /// Poll until the job leaves the in-progress state and take the result
    pub fn wait(mut self) -> Result<ImageObject> {
        loop {
            match self.status() {
                FilterStatus::InProgress => thread::sleep(Duration::from_millis(10)),
                FilterStatus::Done => break,
                FilterStatus::Cancelled => {
                    self.join();
                    return Err(TextureError::Cancelled);
                }
                FilterStatus::Error(msg) => {
                    self.join();
                    return Err(TextureError::generic(msg));
                }
            }
        }
        self.join();
        let mut slot = self.result.lock().unwrap_or_else(|p| p.into_inner());
        slot.take()
            .ok_or_else(|| TextureError::generic("filter job finished without a result"))
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FilterJob {
    fn drop(&mut self) {
        self.cancel();
        self.join();
    }
}

/// Generate the filtered mip chain for a cubemap strip, synchronously
///
/// Convenience wrapper over the engine: starts the background job and
/// polls it to completion.
pub fn create_cubemap_mip_maps(
    engine: &FilterEngine,
    image: &ImageObject,
    params: &CubemapFilterParams,
    reduce_resolution: u32,
    remove_mips: u32,
) -> Result<ImageObject> {
    image.expect_format(PixelFormat::A32B32G32R32F)?;
    if image.cubemap() != CubemapKind::Yes {
        return Err(TextureError::unsupported(
            "cubemap filtering requires a cubemap strip image",
        ));
    }
    engine
        .start(
            image.copy_image(),
            params.clone(),
            reduce_resolution,
            remove_mips,
        )
        .wait()
}

fn filter_cubemap(
    image: &ImageObject,
    params: &CubemapFilterParams,
    reduce_resolution: u32,
    remove_mips: u32,
    cancelled: impl Fn() -> bool,
) -> Result<ImageObject> {
    let src_face = image.height(0);
    let mut face = src_face;
    for _ in 0..reduce_resolution {
        if face <= 1 {
            break;
        }
        face /= 2;
    }

    let allowed = PixelFormat::A32B32G32R32F.compute_max_mip_count(face * 6, face, true);
    let mip_count = allowed.saturating_sub(remove_mips).max(1);

    let mut dst = ImageObject::new(
        face * 6,
        face,
        mip_count,
        PixelFormat::A32B32G32R32F,
        CubemapKind::Yes,
    )?;
    dst.set_color_range(image.color_range());
    dst.set_average_brightness(image.average_brightness());
    *dst.flags_mut() = image.flags();
    dst.flags_mut().cubemap = true;
    dst.set_color_model(image.color_model());

    // Mip 0: independent per-face resample, never across seams
    let src_pixels = read_pixels(image, 0)?;
    let mut top = CubeFaces::resampled(&src_pixels, src_face, face);
    if params.base_filter_angle > 0.0 {
        top = convolve(
            &top,
            face,
            params,
            params.base_filter_angle,
            0,
            mip_count,
            &cancelled,
        )?;
    }
    write_pixels(&mut dst, 0, &top.to_strip())?;

    let mut previous = top;
    let mut angle = params.initial_mip_angle.max(0.1);
    for mip in 1..mip_count {
        let size = dst.height(mip);
        let source = CubeFaces::resampled(&previous.to_strip(), previous.size, size * 2);
        let filtered = convolve(
            &source,
            size,
            params,
            angle.min(90.0),
            mip,
            mip_count,
            &cancelled,
        )?;
        write_pixels(&mut dst, mip, &filtered.to_strip())?;
        previous = filtered;
        angle *= params.mip_angle_scale.max(1.0);
    }
    Ok(dst)
}

/// Six square faces in strip order, each an interleaved RGBA buffer
struct CubeFaces {
    size: u32,
    faces: [Vec<f32>; 6],
}

impl CubeFaces {
    fn from_strip(strip: &[f32], face: u32) -> Self {
        let mut faces: [Vec<f32>; 6] = Default::default();
        for (i, out) in faces.iter_mut().enumerate() {
            let mut data = Vec::with_capacity((face * face * 4) as usize);
            for y in 0..face {
                let row_start = ((y * face * 6 + i as u32 * face) * 4) as usize;
                data.extend_from_slice(&strip[row_start..row_start + (face * 4) as usize]);
            }
            *out = data;
        }
        Self { size: face, faces }
    }

    /// Split a strip and resample each face independently
    fn resampled(strip: &[f32], src_face: u32, dst_face: u32) -> Self {
        let split = Self::from_strip(strip, src_face);
        if src_face == dst_face {
            return split;
        }
        let faces = split.faces.map(|data| {
            resample(
                &data,
                src_face,
                src_face,
                dst_face,
                dst_face,
                MipFilterKind::Triangle,
            )
        });
        Self {
            size: dst_face,
            faces,
        }
    }

    fn to_strip(&self) -> Vec<f32> {
        let face = self.size;
        let mut strip = vec![0.0f32; (face * face * 6 * 4) as usize];
        for (i, data) in self.faces.iter().enumerate() {
            for y in 0..face {
                let src_start = ((y * face) * 4) as usize;
                let dst_start = ((y * face * 6 + i as u32 * face) * 4) as usize;
                strip[dst_start..dst_start + (face * 4) as usize]
                    .copy_from_slice(&data[src_start..src_start + (face * 4) as usize]);
            }
        }
        strip
    }

    /// Bilinear sample along a direction vector
    fn sample(&self, dir: [f32; 3]) -> [f32; 4] {
        let (face, u, v) = direction_to_face_uv(dir);
        let size = self.size as f32;
        let x = (u * size - 0.5).clamp(0.0, size - 1.0);
        let y = (v * size - 0.5).clamp(0.0, size - 1.0);
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.size - 1);
        let y1 = (y0 + 1).min(self.size - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let texel = |px: u32, py: u32| -> [f32; 4] {
            let off = ((py * self.size + px) * 4) as usize;
            let d = &self.faces[face];
            [d[off], d[off + 1], d[off + 2], d[off + 3]]
        };
        let a = texel(x0, y0);
        let b = texel(x1, y0);
        let c = texel(x0, y1);
        let d = texel(x1, y1);
        let mut out = [0.0f32; 4];
        for ch in 0..4 {
            let top = a[ch] * (1.0 - fx) + b[ch] * fx;
            let bot = c[ch] * (1.0 - fx) + d[ch] * fx;
            out[ch] = top * (1.0 - fy) + bot * fy;
        }
        out
    }
}

/// Direction for the center of texel (x, y) on a face
///
/// With edge fixup the grid is stretched so border texel centers land
/// exactly on the cube edge and adjacent faces agree along the seam.
fn face_texel_direction(face: usize, x: u32, y: u32, size: u32, fixup: u32) -> [f32; 3] {
    let (u, v) = if fixup > 0 && size > 1 {
        (
            2.0 * x as f32 / (size - 1) as f32 - 1.0,
            2.0 * y as f32 / (size - 1) as f32 - 1.0,
        )
    } else {
        (
            2.0 * (x as f32 + 0.5) / size as f32 - 1.0,
            2.0 * (y as f32 + 0.5) / size as f32 - 1.0,
        )
    };
    face_uv_to_direction(face, u, v)
}

fn face_uv_to_direction(face: usize, u: f32, v: f32) -> [f32; 3] {
    // Strip order +X -X +Y -Y +Z -Z, DDS face orientation
    let d = match face {
        0 => [1.0, -v, -u],
        1 => [-1.0, -v, u],
        2 => [u, 1.0, v],
        3 => [u, -1.0, -v],
        4 => [u, -v, 1.0],
        _ => [-u, -v, -1.0],
    };
    normalize(d)
}

fn direction_to_face_uv(dir: [f32; 3]) -> (usize, f32, f32) {
    let ax = dir[0].abs();
    let ay = dir[1].abs();
    let az = dir[2].abs();
    let (face, u, v, ma) = if ax >= ay && ax >= az {
        if dir[0] > 0.0 {
            (0, -dir[2], -dir[1], ax)
        } else {
            (1, dir[2], -dir[1], ax)
        }
    } else if ay >= az {
        if dir[1] > 0.0 {
            (2, dir[0], dir[2], ay)
        } else {
            (3, dir[0], -dir[2], ay)
        }
    } else if dir[2] > 0.0 {
        (4, dir[0], -dir[1], az)
    } else {
        (5, -dir[0], -dir[1], az)
    };
    ((face), (u / ma + 1.0) * 0.5, (v / ma + 1.0) * 0.5)
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt().max(1e-9);
    [v[0] / len, v[1] / len, v[2] / len]
}

fn convolve(
    source: &CubeFaces,
    dst_size: u32,
    params: &CubemapFilterParams,
    angle_deg: f32,
    mip: u32,
    mip_count: u32,
    cancelled: &impl Fn() -> bool,
) -> Result<CubeFaces> {
    let mut out: [Vec<f32>; 6] = Default::default();
    for (face, buffer) in out.iter_mut().enumerate() {
        if cancelled() {
            return Err(TextureError::Cancelled);
        }
        let mut data = vec![0.0f32; (dst_size * dst_size * 4) as usize];
        for y in 0..dst_size {
            for x in 0..dst_size {
                let dir = face_texel_direction(face, x, y, dst_size, params.edge_fixup_width);
                let px = match params.filter {
                    CubeFilterKind::Disc => filter_cone(source, dir, angle_deg, false),
                    CubeFilterKind::AngularGaussian => filter_cone(source, dir, angle_deg, true),
                    CubeFilterKind::Ggx => {
                        filter_ggx(source, dir, mip, mip_count, params)
                    }
                };
                let off = ((y * dst_size + x) * 4) as usize;
                data[off..off + 4].copy_from_slice(&px);
            }
        }
        *buffer = data;
    }
    Ok(CubeFaces {
        size: dst_size,
        faces: out,
    })
}

/// Cone filter over all source texels: flat disc or angular Gaussian
fn filter_cone(source: &CubeFaces, center: [f32; 3], angle_deg: f32, gaussian: bool) -> [f32; 4] {
    let cos_cone = angle_deg.to_radians().cos();
    let sigma = angle_deg.to_radians() / 2.0;
    let size = source.size;

    let mut acc = [0.0f32; 4];
    let mut total = 0.0f32;
    for face in 0..6 {
        for y in 0..size {
            for x in 0..size {
                let dir = face_texel_direction(face, x, y, size, 0);
                let dot = center[0] * dir[0] + center[1] * dir[1] + center[2] * dir[2];
                if dot < cos_cone {
                    continue;
                }
                let weight = if gaussian {
                    let a = dot.clamp(-1.0, 1.0).acos();
                    (-(a * a) / (2.0 * sigma * sigma)).exp()
                } else {
                    1.0
                };
                let off = ((y * size + x) * 4) as usize;
                let d = &source.faces[face];
                for c in 0..4 {
                    acc[c] += d[off + c] * weight;
                }
                total += weight;
            }
        }
    }
    if total <= 0.0 {
        return source.sample(center);
    }
    for c in acc.iter_mut() {
        *c /= total;
    }
    acc
}

/// GGX importance sampling along the normal, roughness from the mip ladder
fn filter_ggx(
    source: &CubeFaces,
    normal: [f32; 3],
    mip: u32,
    mip_count: u32,
    params: &CubemapFilterParams,
) -> [f32; 4] {
    let ladder = if mip_count > 1 {
        mip as f32 / (mip_count - 1) as f32
    } else {
        0.0
    };
    let gloss = ((1.0 - ladder) * params.gloss_scale + params.gloss_bias).clamp(0.0, 1.0);
    let roughness = ((1.0 - gloss) * (1.0 - gloss)).max(1e-3);
    let a = roughness * roughness;

    // Orthonormal basis around the normal
    let up = if normal[2].abs() < 0.99 {
        [0.0, 0.0, 1.0]
    } else {
        [1.0, 0.0, 0.0]
    };
    let tx = normalize(cross(up, normal));
    let ty = cross(normal, tx);

    let n = params.sample_count.max(1);
    let mut acc = [0.0f32; 4];
    let mut total = 0.0f32;
    for i in 0..n {
        let (e1, e2) = hammersley(i, n);
        // GGX half-vector distribution
        let phi = 2.0 * std::f32::consts::PI * e1;
        let cos_theta = ((1.0 - e2) / (1.0 + (a * a - 1.0) * e2)).sqrt();
        let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
        let h = [
            sin_theta * phi.cos(),
            sin_theta * phi.sin(),
            cos_theta,
        ];
        let dir = normalize([
            tx[0] * h[0] + ty[0] * h[1] + normal[0] * h[2],
            tx[1] * h[0] + ty[1] * h[1] + normal[1] * h[2],
            tx[2] * h[0] + ty[2] * h[1] + normal[2] * h[2],
        ]);
        let n_dot_l = dir[0] * normal[0] + dir[1] * normal[1] + dir[2] * normal[2];
        if n_dot_l <= 0.0 {
            continue;
        }
        let px = source.sample(dir);
        for c in 0..4 {
            acc[c] += px[c] * n_dot_l;
        }
        total += n_dot_l;
    }
    if total <= 0.0 {
        return source.sample(normal);
    }
    for c in acc.iter_mut() {
        *c /= total;
    }
    acc
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

fn hammersley(i: u32, n: u32) -> (f32, f32) {
    let bits = i.reverse_bits();
    (i as f32 / n as f32, bits as f32 * 2.3283064365386963e-10)
}

/// Reshape a panorama or cross layout into the canonical 6-face strip
///
/// Accepts 2:1 lat-long and 4:3 horizontal cross inputs; a 6:1 strip
/// passes through untouched.
pub fn reshape_to_strip(image: &ImageObject, face_size: u32) -> Result<ImageObject> {
    image.expect_format(PixelFormat::A32B32G32R32F)?;
    let w = image.width(0);
    let h = image.height(0);

    if w == 6 * h {
        return Ok(image.copy_image());
    }
    if !(w == 2 * h || w * 3 == h * 4) {
        return Err(TextureError::invalid_dimensions(format!(
            "{}x{} is neither a strip, a 2:1 panorama nor a 4:3 cross",
            w, h
        )));
    }

    let face = face_size.max(1).next_power_of_two();
    let pixels = read_pixels(image, 0)?;

    let mut dst = ImageObject::new(
        face * 6,
        face,
        1,
        PixelFormat::A32B32G32R32F,
        CubemapKind::Yes,
    )?;
    *dst.flags_mut() = image.flags();
    dst.flags_mut().cubemap = true;
    dst.set_color_model(image.color_model());

    let latlong = w == 2 * h;
    let mut strip = vec![0.0f32; (face * face * 6 * 4) as usize];
    for f in 0..6usize {
        for y in 0..face {
            for x in 0..face {
                let dir = face_texel_direction(f, x, y, face, 0);
                let px = if latlong {
                    sample_latlong(&pixels, w, h, dir)
                } else {
                    sample_cross(&pixels, w, h, dir)
                };
                let off = (((y * face * 6) + f as u32 * face + x) * 4) as usize;
                strip[off..off + 4].copy_from_slice(&px);
            }
        }
    }
    write_pixels(&mut dst, 0, &strip)?;
    Ok(dst)
}

fn bilinear(pixels: &[f32], w: u32, h: u32, x: f32, y: f32) -> [f32; 4] {
    let x = x.clamp(0.0, w as f32 - 1.0);
    let y = y.clamp(0.0, h as f32 - 1.0);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let texel = |px: u32, py: u32| {
        let off = ((py * w + px) * 4) as usize;
        [
            pixels[off],
            pixels[off + 1],
            pixels[off + 2],
            pixels[off + 3],
        ]
    };
    let a = texel(x0, y0);
    let b = texel(x1, y0);
    let c = texel(x0, y1);
    let d = texel(x1, y1);
    let mut out = [0.0f32; 4];
    for ch in 0..4 {
        let top = a[ch] * (1.0 - fx) + b[ch] * fx;
        let bot = c[ch] * (1.0 - fx) + d[ch] * fx;
        out[ch] = top * (1.0 - fy) + bot * fy;
    }
    out
}

fn sample_latlong(pixels: &[f32], w: u32, h: u32, dir: [f32; 3]) -> [f32; 4] {
    let phi = dir[2].atan2(dir[0]);
    let theta = dir[1].clamp(-1.0, 1.0).acos();
    let u = (phi / (2.0 * std::f32::consts::PI) + 0.5) * w as f32;
    let v = theta / std::f32::consts::PI * h as f32;
    bilinear(pixels, w, h, u - 0.5, v - 0.5)
}

/// Horizontal cross: faces at (2,1)=+X (0,1)=-X (1,0)=+Y (1,2)=-Y
/// (1,1)=+Z (3,1)=-Z in a 4x3 cell grid
fn sample_cross(pixels: &[f32], w: u32, h: u32, dir: [f32; 3]) -> [f32; 4] {
    let (face, u, v) = direction_to_face_uv(dir);
    let cell = w as f32 / 4.0;
    let (cx, cy) = match face {
        0 => (2.0, 1.0),
        1 => (0.0, 1.0),
        2 => (1.0, 0.0),
        3 => (1.0, 2.0),
        4 => (1.0, 1.0),
        _ => (3.0, 1.0),
    };
    bilinear(
        pixels,
        w,
        h,
        (cx + u) * cell - 0.5,
        (cy + v) * cell - 0.5,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cubemap_strip(face: u32, colors: [[f32; 4]; 6]) -> ImageObject {
        let mut image = ImageObject::new(
            face * 6,
            face,
            1,
            PixelFormat::A32B32G32R32F,
            CubemapKind::Yes,
        )
        .unwrap();
        let mut view = image.float_view_mut(0).unwrap();
        for y in 0..face {
            for x in 0..face * 6 {
                view.set(x, y, colors[(x / face) as usize]);
            }
        }
        image
    }

    const FACE_COLORS: [[f32; 4]; 6] = [
        [1.0, 0.0, 0.0, 1.0],
        [0.0, 1.0, 0.0, 1.0],
        [0.0, 0.0, 1.0, 1.0],
        [1.0, 1.0, 0.0, 1.0],
        [1.0, 0.0, 1.0, 1.0],
        [0.0, 1.0, 1.0, 1.0],
    ];

    #[test]
    fn test_direction_uv_roundtrip() {
        for face in 0..6usize {
            for &(u, v) in &[(0.3f32, 0.7f32), (0.5, 0.5), (0.9, 0.1)] {
                let dir = face_uv_to_direction(face, u * 2.0 - 1.0, v * 2.0 - 1.0);
                let (rf, ru, rv) = direction_to_face_uv(dir);
                assert_eq!(rf, face, "face {} uv {},{}", face, u, v);
                assert!((ru - u).abs() < 1e-4, "u {} vs {}", ru, u);
                assert!((rv - v).abs() < 1e-4, "v {} vs {}", rv, v);
            }
        }
    }

    #[test]
    fn test_mip0_has_no_cross_face_bleed() {
        let image = cubemap_strip(16, FACE_COLORS);
        let params = CubemapFilterParams {
            base_filter_angle: 0.0,
            ..Default::default()
        };
        let result =
            create_cubemap_mip_maps(&FilterEngine::new(), &image, &params, 0, 0).unwrap();
        let view = result.float_view(0).unwrap();
        // Edge texel of face 1 is pure green despite face 0 being red
        let px = view.get(16, 0);
        assert_eq!(px[0], 0.0);
        assert_eq!(px[1], 1.0);
    }

    #[test]
    fn test_chain_shape_and_metadata() {
        let image = cubemap_strip(16, FACE_COLORS);
        let result = create_cubemap_mip_maps(
            &FilterEngine::new(),
            &image,
            &CubemapFilterParams::default(),
            0,
            0,
        )
        .unwrap();
        assert_eq!(result.cubemap(), CubemapKind::Yes);
        assert!(result.flags().cubemap);
        assert_eq!(result.mip_count(), 5); // 16 -> 1 per face
        assert_eq!(result.width(0), 96);
        assert_eq!(result.width(4), 6);
        assert_eq!(result.height(4), 1);
    }

    #[test]
    fn test_wide_angle_mixes_faces() {
        let image = cubemap_strip(8, FACE_COLORS);
        let params = CubemapFilterParams {
            filter: CubeFilterKind::AngularGaussian,
            initial_mip_angle: 45.0,
            mip_angle_scale: 2.0,
            ..Default::default()
        };
        let result =
            create_cubemap_mip_maps(&FilterEngine::new(), &image, &params, 0, 0).unwrap();
        // The last mip's +X face saw neighboring faces' colors
        let last = result.mip_count() - 1;
        let px = result.float_view(last).unwrap().get(0, 0);
        assert!(px[0] < 1.0 && px[0] > 0.0, "red {}", px[0]);
        assert!(px[1] > 0.0, "green {}", px[1]);
    }

    #[test]
    fn test_ggx_preserves_flat_environment() {
        let image = cubemap_strip(8, [[0.3, 0.6, 0.9, 1.0]; 6]);
        let params = CubemapFilterParams {
            filter: CubeFilterKind::Ggx,
            sample_count: 32,
            ..Default::default()
        };
        let result =
            create_cubemap_mip_maps(&FilterEngine::new(), &image, &params, 0, 0).unwrap();
        for mip in 0..result.mip_count() {
            let px = result.float_view(mip).unwrap().get(0, 0);
            assert!((px[0] - 0.3).abs() < 0.02, "mip {} red {}", mip, px[0]);
            assert!((px[2] - 0.9).abs() < 0.02, "mip {} blue {}", mip, px[2]);
        }
    }

    #[test]
    fn test_cancellation_through_abort_flag() {
        let image = cubemap_strip(32, FACE_COLORS);
        let engine = FilterEngine::new();
        let job = engine.start(
            image,
            CubemapFilterParams {
                filter: CubeFilterKind::AngularGaussian,
                initial_mip_angle: 30.0,
                ..Default::default()
            },
            0,
            0,
        );
        job.cancel();
        match job.wait() {
            Err(TextureError::Cancelled) => {}
            Ok(_) => {} // finished before the flag was seen; also fine
            Err(e) => panic!("unexpected error {e}"),
        }
    }

    #[test]
    fn test_latlong_reshape() {
        let mut pano =
            ImageObject::new(64, 32, 1, PixelFormat::A32B32G32R32F, CubemapKind::No).unwrap();
        {
            // Top half white, bottom half black
            let mut view = pano.float_view_mut(0).unwrap();
            for y in 0..32 {
                let v = if y < 16 { 1.0 } else { 0.0 };
                for x in 0..64 {
                    view.set(x, y, [v, v, v, 1.0]);
                }
            }
        }
        let strip = reshape_to_strip(&pano, 16).unwrap();
        assert_eq!(strip.cubemap(), CubemapKind::Yes);
        assert_eq!(strip.width(0), 96);
        // +Y face looks up into the white hemisphere
        let view = strip.float_view(0).unwrap();
        let py = view.get(2 * 16 + 8, 8);
        assert!(py[0] > 0.9, "up {}", py[0]);
        // -Y face looks down into the black hemisphere
        let ny = view.get(3 * 16 + 8, 8);
        assert!(ny[0] < 0.1, "down {}", ny[0]);
    }

    #[test]
    fn test_non_cubemap_rejected() {
        let image =
            ImageObject::new(16, 16, 1, PixelFormat::A32B32G32R32F, CubemapKind::No).unwrap();
        assert!(create_cubemap_mip_maps(
            &FilterEngine::new(),
            &image,
            &CubemapFilterParams::default(),
            0,
            0
        )
        .is_err());
    }
}
