//! The image object: a mip chain in one pixel format plus metadata
//!
//! This is the single data structure the whole pipeline operates on.
//! Images are passed by single-owner transfer; the only internal link is
//! the attached alpha image, exclusively owned by its parent.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TextureError};
use crate::pixel_format::{PixelFormat, SampleType};

/// Four-component color vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Vec4 {
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub const fn splat(v: f32) -> Self {
        Self::new(v, v, v, v)
    }

    pub fn get(self, channel: usize) -> f32 {
        match channel {
            0 => self.x,
            1 => self.y,
            2 => self.z,
            _ => self.w,
        }
    }

    pub fn set(&mut self, channel: usize, value: f32) {
        match channel {
            0 => self.x = value,
            1 => self.y = value,
            2 => self.z = value,
            _ => self.w = value,
        }
    }
}

/// Affine mapping recorded when an HDR range was compressed into [0,1]
///
/// Required to invert the transform on load. The identity mapping is
/// min = 0, max = 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorRange {
    pub min: Vec4,
    pub max: Vec4,
}

impl Default for ColorRange {
    fn default() -> Self {
        Self {
            min: Vec4::splat(0.0),
            max: Vec4::splat(1.0),
        }
    }
}

impl ColorRange {
    /// True when the range differs from the identity mapping
    pub fn is_renormalized(&self) -> bool {
        for c in 0..4 {
            let mn = self.min.get(c);
            let mx = self.max.get(c);
            if (mn != 0.0 && mn != 1.0) || (mx != 0.0 && mx != 1.0) {
                return true;
            }
        }
        false
    }
}

/// Cubemap tri-state: not yet decided, yes, or definitely not
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CubemapKind {
    #[default]
    UnknownYet,
    Yes,
    No,
}

/// Which color model the pixel data currently stores
///
/// Code must not assume RGB without checking this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ColorModel {
    #[default]
    Rgb,
    Cie,
    YCbCr,
    YFbFr,
    Irb,
}

/// Independent boolean image flags
///
/// Kept as explicit fields rather than a packed bitmask; the DDS flag
/// word is assembled only at the container boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageFlags {
    pub cubemap: bool,
    pub volume: bool,
    pub decal: bool,
    pub greyscale: bool,
    pub srgb_read: bool,
    pub renormalized: bool,
    pub attached_alpha: bool,
    pub suppress_engine_reduce: bool,
}

impl ImageFlags {
    pub const CUBEMAP: u32 = 1 << 0;
    pub const VOLUME: u32 = 1 << 1;
    pub const DECAL: u32 = 1 << 2;
    pub const GREYSCALE: u32 = 1 << 3;
    pub const SRGB_READ: u32 = 1 << 4;
    pub const RENORMALIZED: u32 = 1 << 5;
    pub const ATTACHED_ALPHA: u32 = 1 << 6;
    pub const SUPPRESS_ENGINE_REDUCE: u32 = 1 << 7;
    const COLOR_MODEL_SHIFT: u32 = 8;
    const COLOR_MODEL_MASK: u32 = 0x7 << Self::COLOR_MODEL_SHIFT;

    /// Pack flags and color model into the serialized flag word
    pub fn to_bits(self, model: ColorModel) -> u32 {
        let mut bits = 0;
        if self.cubemap {
            bits |= Self::CUBEMAP;
        }
        if self.volume {
            bits |= Self::VOLUME;
        }
        if self.decal {
            bits |= Self::DECAL;
        }
        if self.greyscale {
            bits |= Self::GREYSCALE;
        }
        if self.srgb_read {
            bits |= Self::SRGB_READ;
        }
        if self.renormalized {
            bits |= Self::RENORMALIZED;
        }
        if self.attached_alpha {
            bits |= Self::ATTACHED_ALPHA;
        }
        if self.suppress_engine_reduce {
            bits |= Self::SUPPRESS_ENGINE_REDUCE;
        }
        let model_bits = match model {
            ColorModel::Rgb => 0,
            ColorModel::Cie => 1,
            ColorModel::YCbCr => 2,
            ColorModel::YFbFr => 3,
            ColorModel::Irb => 4,
        };
        bits | (model_bits << Self::COLOR_MODEL_SHIFT)
    }

    /// Inverse of [`to_bits`](Self::to_bits)
    pub fn from_bits(bits: u32) -> (Self, ColorModel) {
        let flags = Self {
            cubemap: bits & Self::CUBEMAP != 0,
            volume: bits & Self::VOLUME != 0,
            decal: bits & Self::DECAL != 0,
            greyscale: bits & Self::GREYSCALE != 0,
            srgb_read: bits & Self::SRGB_READ != 0,
            renormalized: bits & Self::RENORMALIZED != 0,
            attached_alpha: bits & Self::ATTACHED_ALPHA != 0,
            suppress_engine_reduce: bits & Self::SUPPRESS_ENGINE_REDUCE != 0,
        };
        let model = match (bits & Self::COLOR_MODEL_MASK) >> Self::COLOR_MODEL_SHIFT {
            1 => ColorModel::Cie,
            2 => ColorModel::YCbCr,
            3 => ColorModel::YFbFr,
            4 => ColorModel::Irb,
            _ => ColorModel::Rgb,
        };
        (flags, model)
    }
}

/// Result of scanning every alpha sample of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaContent {
    /// The format carries no alpha channel
    Absent,
    OnlyWhite,
    OnlyBlack,
    OnlyBlackAndWhite,
    Greyscale,
    /// The data can't be scanned (e.g. block-compressed)
    Indeterminate,
}

/// Channel normalization mode for [`ImageObject::normalize_image_range`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorNormalization {
    Normalize,
    PassThrough,
}

/// Alpha normalization mode for [`ImageObject::normalize_image_range`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaNormalization {
    Normalize,
    PassThrough,
    SetToZero,
}

/// One mip level: dimensions plus an owned pixel buffer
///
/// `row_count` is less than `height` for block-compressed formats; the
/// buffer is always exactly `pitch * row_count` bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub row_count: usize,
    pub pitch: usize,
    pub data: Vec<u8>,
}

impl MipLevel {
    fn allocate(format: PixelFormat, width: u32, height: u32) -> Self {
        let pitch = format.row_pitch(width);
        let row_count = format.row_count(height);
        Self {
            width,
            height,
            row_count,
            pitch,
            data: vec![0u8; pitch * row_count],
        }
    }
}

/// Bounds-checked accessor for float32 RGBA mip data
pub struct FloatView<'a> {
    data: &'a [u8],
    width: u32,
    pitch: usize,
}

impl<'a> FloatView<'a> {
    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        assert!(x < self.width);
        let off = y as usize * self.pitch + x as usize * 16;
        let px = &self.data[off..off + 16];
        [
            f32::from_le_bytes([px[0], px[1], px[2], px[3]]),
            f32::from_le_bytes([px[4], px[5], px[6], px[7]]),
            f32::from_le_bytes([px[8], px[9], px[10], px[11]]),
            f32::from_le_bytes([px[12], px[13], px[14], px[15]]),
        ]
    }
}

/// Mutable bounds-checked accessor for float32 RGBA mip data
pub struct FloatViewMut<'a> {
    data: &'a mut [u8],
    width: u32,
    pitch: usize,
}

impl<'a> FloatViewMut<'a> {
    pub fn get(&self, x: u32, y: u32) -> [f32; 4] {
        assert!(x < self.width);
        let off = y as usize * self.pitch + x as usize * 16;
        let px = &self.data[off..off + 16];
        [
            f32::from_le_bytes([px[0], px[1], px[2], px[3]]),
            f32::from_le_bytes([px[4], px[5], px[6], px[7]]),
            f32::from_le_bytes([px[8], px[9], px[10], px[11]]),
            f32::from_le_bytes([px[12], px[13], px[14], px[15]]),
        ]
    }

    pub fn set(&mut self, x: u32, y: u32, value: [f32; 4]) {
        assert!(x < self.width);
        let off = y as usize * self.pitch + x as usize * 16;
        let px = &mut self.data[off..off + 16];
        px[0..4].copy_from_slice(&value[0].to_le_bytes());
        px[4..8].copy_from_slice(&value[1].to_le_bytes());
        px[8..12].copy_from_slice(&value[2].to_le_bytes());
        px[12..16].copy_from_slice(&value[3].to_le_bytes());
    }
}

/// Texture image: ordered mip chain, format, metadata and the optional
/// attached alpha image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageObject {
    format: PixelFormat,
    mips: Vec<MipLevel>,
    cubemap: CubemapKind,
    color_range: ColorRange,
    average_brightness: f32,
    flags: ImageFlags,
    color_model: ColorModel,
    persistent_mips: u32,
    attached: Option<Box<ImageObject>>,
}

impl ImageObject {
    /// Construct an image with an eagerly allocated mip chain
    ///
    /// Mip dimensions halve top-down (floor, minimum 1). The requested mip
    /// count is clamped against the format's minimum dimensions. Dimension
    /// violations are checked errors, not silent truncation.
    pub fn new(
        width: u32,
        height: u32,
        max_mip_count: u32,
        format: PixelFormat,
        cubemap: CubemapKind,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(TextureError::invalid_dimensions(format!(
                "zero-sized image {}x{}",
                width, height
            )));
        }
        let info = format.info();
        if width < info.min_width || height < info.min_height {
            return Err(TextureError::invalid_dimensions(format!(
                "{}x{} below the {} minimum of {}x{}",
                width, height, info.name, info.min_width, info.min_height
            )));
        }
        if cubemap == CubemapKind::Yes {
            if width != height * 6 || !height.is_power_of_two() {
                return Err(TextureError::invalid_dimensions(format!(
                    "cubemap strip must be 6 power-of-two faces, got {}x{}",
                    width, height
                )));
            }
        }

        let is_cube = cubemap == CubemapKind::Yes;
        let mips_allowed = format.compute_max_mip_count(width, height, is_cube);
        let mip_count = max_mip_count.clamp(1, mips_allowed);

        let mut mips = Vec::with_capacity(mip_count as usize);
        let mut w = width;
        let mut h = height;
        for _ in 0..mip_count {
            mips.push(MipLevel::allocate(format, w, h));
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }

        Ok(Self {
            format,
            mips,
            cubemap,
            color_range: ColorRange::default(),
            average_brightness: 0.0,
            flags: ImageFlags::default(),
            color_model: ColorModel::Rgb,
            persistent_mips: 0,
            attached: None,
        })
    }

    /// Deep clone of pixel data, metadata and the attached image
    ///
    /// Transient state (persistent-mip count) is not copied.
    pub fn copy_image(&self) -> Self {
        let mut copy = self.clone();
        copy.persistent_mips = 0;
        copy
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Replace the format tag without touching pixel data.
    ///
    /// Only valid between formats with identical memory layout (e.g.
    /// threshold-alpha aliases of the same block format).
    pub fn retag_format(&mut self, format: PixelFormat) {
        self.format = format;
    }

    pub fn mip_count(&self) -> u32 {
        self.mips.len() as u32
    }

    pub fn width(&self, mip: u32) -> u32 {
        self.mips[mip as usize].width
    }

    pub fn height(&self, mip: u32) -> u32 {
        self.mips[mip as usize].height
    }

    pub fn mip(&self, mip: u32) -> &MipLevel {
        &self.mips[mip as usize]
    }

    pub fn mip_mut(&mut self, mip: u32) -> &mut MipLevel {
        &mut self.mips[mip as usize]
    }

    /// Direct access for pixel-level algorithms: (buffer, row pitch)
    ///
    /// Callers must respect the pitch, not assume packed width * channels.
    pub fn mip_data(&self, mip: u32) -> (&[u8], usize) {
        let level = &self.mips[mip as usize];
        (&level.data, level.pitch)
    }

    pub fn mip_data_mut(&mut self, mip: u32) -> (&mut [u8], usize) {
        let level = &mut self.mips[mip as usize];
        (&mut level.data, level.pitch)
    }

    /// Bounds-checked float32 RGBA read access to one mip
    pub fn float_view(&self, mip: u32) -> Result<FloatView<'_>> {
        self.expect_format(PixelFormat::A32B32G32R32F)?;
        let level = &self.mips[mip as usize];
        Ok(FloatView {
            data: &level.data,
            width: level.width,
            pitch: level.pitch,
        })
    }

    /// Bounds-checked float32 RGBA write access to one mip
    pub fn float_view_mut(&mut self, mip: u32) -> Result<FloatViewMut<'_>> {
        self.expect_format(PixelFormat::A32B32G32R32F)?;
        let level = &mut self.mips[mip as usize];
        Ok(FloatViewMut {
            data: &mut level.data,
            width: level.width,
            pitch: level.pitch,
        })
    }

    /// Guard for algorithms implemented only against one representation
    pub fn expect_format(&self, format: PixelFormat) -> Result<()> {
        if self.format != format {
            return Err(TextureError::unsupported(format!(
                "operation requires {}, image is {}",
                format.info().name,
                self.format.info().name
            )));
        }
        Ok(())
    }

    pub fn cubemap(&self) -> CubemapKind {
        self.cubemap
    }

    pub fn set_cubemap(&mut self, kind: CubemapKind) {
        self.cubemap = kind;
    }

    pub fn color_range(&self) -> ColorRange {
        self.color_range
    }

    pub fn set_color_range(&mut self, range: ColorRange) {
        self.color_range = range;
    }

    pub fn average_brightness(&self) -> f32 {
        self.average_brightness
    }

    pub fn set_average_brightness(&mut self, brightness: f32) {
        self.average_brightness = brightness;
    }

    pub fn flags(&self) -> ImageFlags {
        self.flags
    }

    pub fn flags_mut(&mut self) -> &mut ImageFlags {
        &mut self.flags
    }

    pub fn color_model(&self) -> ColorModel {
        self.color_model
    }

    pub fn set_color_model(&mut self, model: ColorModel) {
        self.color_model = model;
    }

    pub fn persistent_mips(&self) -> u32 {
        self.persistent_mips
    }

    pub fn set_persistent_mips(&mut self, count: u32) {
        self.persistent_mips = count;
    }

    /// Attach an alpha image; the previous attachment is destroyed
    pub fn set_attached_image(&mut self, image: Option<Box<ImageObject>>) {
        self.attached = image;
    }

    pub fn attached_image(&self) -> Option<&ImageObject> {
        self.attached.as_deref()
    }

    pub fn attached_image_mut(&mut self) -> Option<&mut ImageObject> {
        self.attached.as_deref_mut()
    }

    pub fn take_attached_image(&mut self) -> Option<Box<ImageObject>> {
        self.attached.take()
    }

    pub fn has_power_of_two_sizes(&self) -> bool {
        self.width(0).is_power_of_two() && self.height(0).is_power_of_two()
    }

    /// Sizes a probe/cubemap reshape can work with: a 6:1 face strip,
    /// a 2:1 lat-long panorama, or a 4:3 horizontal cross
    pub fn has_cubemap_compatible_sizes(&self) -> bool {
        let w = self.width(0);
        let h = self.height(0);
        (w == 6 * h && h.is_power_of_two())
            || (w == 2 * h)
            || (w * 3 == h * 4)
    }

    /// Remove the largest mip level; at least one level always remains
    pub fn drop_top_mip(&mut self) {
        if self.mips.len() > 1 {
            self.mips.remove(0);
        }
    }

    /// Scan every alpha sample and classify the channel's content
    ///
    /// Short-circuits to `Greyscale` on the first sample that is neither
    /// fully transparent nor fully opaque.
    pub fn classify_alpha_content(&self) -> AlphaContent {
        if self.format.is_without_alpha() {
            return AlphaContent::Absent;
        }

        let mut seen_black = false;
        let mut seen_white = false;

        match (self.format, self.format.info().sample_type) {
            (PixelFormat::A8R8G8B8, _) => {
                for level in &self.mips {
                    for y in 0..level.row_count {
                        let row = &level.data[y * level.pitch..];
                        for x in 0..level.width as usize {
                            match row[x * 4 + 3] {
                                0 => seen_black = true,
                                255 => seen_white = true,
                                _ => return AlphaContent::Greyscale,
                            }
                        }
                    }
                }
            }
            (PixelFormat::A8, _) => {
                for level in &self.mips {
                    for y in 0..level.row_count {
                        let row = &level.data[y * level.pitch..];
                        for x in 0..level.width as usize {
                            match row[x] {
                                0 => seen_black = true,
                                255 => seen_white = true,
                                _ => return AlphaContent::Greyscale,
                            }
                        }
                    }
                }
            }
            (PixelFormat::A32B32G32R32F, _) => {
                for level in &self.mips {
                    for y in 0..level.row_count {
                        for x in 0..level.width {
                            let off = y * level.pitch + x as usize * 16;
                            let a = f32::from_le_bytes([
                                level.data[off + 12],
                                level.data[off + 13],
                                level.data[off + 14],
                                level.data[off + 15],
                            ]);
                            if a == 0.0 {
                                seen_black = true;
                            } else if a == 1.0 {
                                seen_white = true;
                            } else {
                                return AlphaContent::Greyscale;
                            }
                        }
                    }
                }
            }
            _ => return AlphaContent::Indeterminate,
        }

        match (seen_black, seen_white) {
            (true, true) => AlphaContent::OnlyBlackAndWhite,
            (true, false) => AlphaContent::OnlyBlack,
            (false, true) => AlphaContent::OnlyWhite,
            (false, false) => AlphaContent::Absent,
        }
    }

    /// Whether any alpha sample is not fully opaque
    pub fn has_non_opaque_alpha(&self) -> bool {
        !matches!(
            self.classify_alpha_content(),
            AlphaContent::Absent | AlphaContent::OnlyWhite
        )
    }

    /// True when every pixel has r == g == b (float32 RGBA only)
    pub fn is_perfect_greyscale(&self) -> bool {
        if self.format != PixelFormat::A32B32G32R32F {
            return false;
        }
        for mip in 0..self.mip_count() {
            let view = match self.float_view(mip) {
                Ok(v) => v,
                Err(_) => return false,
            };
            for y in 0..self.height(mip) {
                for x in 0..self.width(mip) {
                    let [r, g, b, _] = view.get(x, y);
                    if r != g || g != b {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Mean RGB brightness over mip 0 (float32 RGBA only)
    pub fn calculate_average_brightness(&self) -> Result<f32> {
        let view = self.float_view(0)?;
        let w = self.width(0);
        let h = self.height(0);
        let mut sum = 0.0f64;
        for y in 0..h {
            for x in 0..w {
                let [r, g, b, _] = view.get(x, y);
                sum += ((r + g + b) / 3.0) as f64;
            }
        }
        Ok((sum / (w as f64 * h as f64)) as f32)
    }

    /// Raise every alpha sample to at least `min_alpha` (float32 RGBA only)
    pub fn clamp_minimum_alpha(&mut self, min_alpha: f32) -> Result<()> {
        for mip in 0..self.mip_count() {
            let w = self.width(mip);
            let h = self.height(mip);
            let mut view = self.float_view_mut(mip)?;
            for y in 0..h {
                for x in 0..w {
                    let mut px = view.get(x, y);
                    if px[3] < min_alpha {
                        px[3] = min_alpha;
                        view.set(x, y, px);
                    }
                }
            }
        }
        Ok(())
    }

    /// Channel rearrangement on the float representation
    ///
    /// `spec` is four characters out of `rgba01`, destination order.
    /// An empty spec is a no-op.
    pub fn swizzle(&mut self, spec: &str) -> Result<()> {
        if spec.is_empty() {
            return Ok(());
        }
        if spec.len() != 4 || !spec.chars().all(|c| "rgba01".contains(c)) {
            return Err(TextureError::invalid_data(format!(
                "bad swizzle spec '{}'",
                spec
            )));
        }
        let selectors: Vec<char> = spec.chars().collect();
        for mip in 0..self.mip_count() {
            let w = self.width(mip);
            let h = self.height(mip);
            let mut view = self.float_view_mut(mip)?;
            for y in 0..h {
                for x in 0..w {
                    let src = view.get(x, y);
                    let mut dst = [0.0f32; 4];
                    for (i, &sel) in selectors.iter().enumerate() {
                        dst[i] = match sel {
                            'r' => src[0],
                            'g' => src[1],
                            'b' => src[2],
                            'a' => src[3],
                            '0' => 0.0,
                            _ => 1.0,
                        };
                    }
                    view.set(x, y, dst);
                }
            }
        }
        Ok(())
    }

    /// Store the RGB luminance of every pixel in its alpha channel
    pub fn get_luminance_into_alpha(&mut self) -> Result<()> {
        for mip in 0..self.mip_count() {
            let w = self.width(mip);
            let h = self.height(mip);
            let mut view = self.float_view_mut(mip)?;
            for y in 0..h {
                for x in 0..w {
                    let mut px = view.get(x, y);
                    px[3] = 0.299 * px[0] + 0.587 * px[1] + 0.114 * px[2];
                    view.set(x, y, px);
                }
            }
        }
        Ok(())
    }

    /// Renormalize RGB direction vectors stored in [0,1]
    ///
    /// Degenerate (zero-length) vectors fall back to +Z.
    pub fn normalize_vectors(&mut self, first_mip: u32, mip_count: u32) -> Result<()> {
        let last = (first_mip + mip_count).min(self.mip_count());
        for mip in first_mip..last {
            let w = self.width(mip);
            let h = self.height(mip);
            let mut view = self.float_view_mut(mip)?;
            for y in 0..h {
                for x in 0..w {
                    let mut px = view.get(x, y);
                    let vx = px[0] * 2.0 - 1.0;
                    let vy = px[1] * 2.0 - 1.0;
                    let vz = px[2] * 2.0 - 1.0;
                    let len = (vx * vx + vy * vy + vz * vz).sqrt();
                    let (nx, ny, nz) = if len > 1e-6 {
                        (vx / len, vy / len, vz / len)
                    } else {
                        (0.0, 0.0, 1.0)
                    };
                    px[0] = nx * 0.5 + 0.5;
                    px[1] = ny * 0.5 + 0.5;
                    px[2] = nz * 0.5 + 0.5;
                    view.set(x, y, px);
                }
            }
        }
        Ok(())
    }

    /// Rescale all channels into [0, 2^exponent_bits], recording the
    /// original per-channel range for [`expand_image_range`](Self::expand_image_range)
    ///
    /// Degenerate ranges (narrower than 3/255) are widened by ±2/255 to
    /// avoid dividing by a near-zero span.
    pub fn normalize_image_range(
        &mut self,
        color_norm: ColorNormalization,
        alpha_norm: AlphaNormalization,
        maintain_black: bool,
        exponent_bits: u32,
    ) -> Result<()> {
        self.expect_format(PixelFormat::A32B32G32R32F)?;

        let mut min = Vec4::splat(f32::MAX);
        let mut max = Vec4::splat(f32::MIN);
        for mip in 0..self.mip_count() {
            let view = self.float_view(mip)?;
            for y in 0..self.height(mip) {
                for x in 0..self.width(mip) {
                    let px = view.get(x, y);
                    for c in 0..4 {
                        min.set(c, min.get(c).min(px[c]));
                        max.set(c, max.get(c).max(px[c]));
                    }
                }
            }
        }

        if maintain_black {
            for c in 0..3 {
                min.set(c, 0.0);
            }
        }
        for c in 0..4 {
            if max.get(c) - min.get(c) < 3.0 / 255.0 {
                min.set(c, min.get(c) - 2.0 / 255.0);
                max.set(c, max.get(c) + 2.0 / 255.0);
            }
        }

        let scale = (1u32 << exponent_bits) as f32;
        let normalize_color = color_norm == ColorNormalization::Normalize;

        let mut recorded = ColorRange::default();
        if normalize_color {
            for c in 0..3 {
                recorded.min.set(c, min.get(c));
                recorded.max.set(c, max.get(c));
            }
        }
        if alpha_norm == AlphaNormalization::Normalize {
            recorded.min.w = min.w;
            recorded.max.w = max.w;
        }

        for mip in 0..self.mip_count() {
            let w = self.width(mip);
            let h = self.height(mip);
            let mut view = self.float_view_mut(mip)?;
            for y in 0..h {
                for x in 0..w {
                    let mut px = view.get(x, y);
                    if normalize_color {
                        for c in 0..3 {
                            let span = max.get(c) - min.get(c);
                            px[c] = (px[c] - min.get(c)) / span * scale;
                        }
                    }
                    match alpha_norm {
                        AlphaNormalization::Normalize => {
                            let span = max.w - min.w;
                            px[3] = (px[3] - min.w) / span * scale;
                        }
                        AlphaNormalization::SetToZero => px[3] = 0.0,
                        AlphaNormalization::PassThrough => {}
                    }
                    view.set(x, y, px);
                }
            }
        }

        self.color_range = recorded;
        self.flags.renormalized = recorded.is_renormalized();
        Ok(())
    }

    /// Exact inverse of [`normalize_image_range`](Self::normalize_image_range)
    ///
    /// A no-op unless the renormalized flag is set.
    pub fn expand_image_range(
        &mut self,
        color_norm: ColorNormalization,
        alpha_norm: AlphaNormalization,
        exponent_bits: u32,
    ) -> Result<()> {
        if !self.flags.renormalized {
            return Ok(());
        }
        self.expect_format(PixelFormat::A32B32G32R32F)?;

        let range = self.color_range;
        let scale = (1u32 << exponent_bits) as f32;
        let expand_color = color_norm == ColorNormalization::Normalize;
        let expand_alpha = alpha_norm == AlphaNormalization::Normalize;

        for mip in 0..self.mip_count() {
            let w = self.width(mip);
            let h = self.height(mip);
            let mut view = self.float_view_mut(mip)?;
            for y in 0..h {
                for x in 0..w {
                    let mut px = view.get(x, y);
                    if expand_color {
                        for c in 0..3 {
                            let span = range.max.get(c) - range.min.get(c);
                            px[c] = px[c] / scale * span + range.min.get(c);
                        }
                    }
                    if expand_alpha {
                        let span = range.max.w - range.min.w;
                        px[3] = px[3] / scale * span + range.min.w;
                    }
                    view.set(x, y, px);
                }
            }
        }

        self.color_range = ColorRange::default();
        self.flags.renormalized = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_image(w: u32, h: u32) -> ImageObject {
        ImageObject::new(w, h, 1, PixelFormat::A32B32G32R32F, CubemapKind::No).unwrap()
    }

    #[test]
    fn test_allocation_halves_mips() {
        let image = ImageObject::new(16, 8, 10, PixelFormat::A8R8G8B8, CubemapKind::No).unwrap();
        assert_eq!(image.mip_count(), 5);
        assert_eq!(image.width(0), 16);
        assert_eq!(image.height(0), 8);
        assert_eq!(image.width(4), 1);
        assert_eq!(image.height(4), 1);
        assert_eq!(image.mip(0).data.len(), 16 * 8 * 4);
    }

    #[test]
    fn test_cubemap_squareness_enforced() {
        assert!(ImageObject::new(384, 64, 1, PixelFormat::A8R8G8B8, CubemapKind::Yes).is_ok());
        assert!(ImageObject::new(256, 64, 1, PixelFormat::A8R8G8B8, CubemapKind::Yes).is_err());
        // Non-pow2 faces are rejected too
        assert!(ImageObject::new(360, 60, 1, PixelFormat::A8R8G8B8, CubemapKind::Yes).is_err());
    }

    #[test]
    fn test_copy_image_drops_persistent_mips() {
        let mut image = float_image(4, 4);
        image.set_persistent_mips(3);
        let copy = image.copy_image();
        assert_eq!(copy.persistent_mips(), 0);
        assert_eq!(copy.mip_count(), image.mip_count());
    }

    #[test]
    fn test_attached_image_ownership() {
        let mut image = float_image(8, 8);
        let alpha = ImageObject::new(8, 8, 1, PixelFormat::A8, CubemapKind::No).unwrap();
        image.set_attached_image(Some(Box::new(alpha)));
        assert!(image.attached_image().is_some());
        let replacement = ImageObject::new(8, 8, 1, PixelFormat::A8, CubemapKind::No).unwrap();
        image.set_attached_image(Some(Box::new(replacement)));
        assert_eq!(image.attached_image().unwrap().format(), PixelFormat::A8);
        image.set_attached_image(None);
        assert!(image.attached_image().is_none());
    }

    fn fill_alpha(image: &mut ImageObject, f: impl Fn(u32, u32) -> f32) {
        let w = image.width(0);
        let h = image.height(0);
        let mut view = image.float_view_mut(0).unwrap();
        for y in 0..h {
            for x in 0..w {
                view.set(x, y, [0.5, 0.5, 0.5, f(x, y)]);
            }
        }
    }

    #[test]
    fn test_alpha_classification_totality() {
        let mut image = float_image(8, 8);
        fill_alpha(&mut image, |_, _| 1.0);
        assert_eq!(image.classify_alpha_content(), AlphaContent::OnlyWhite);

        fill_alpha(&mut image, |_, _| 0.0);
        assert_eq!(image.classify_alpha_content(), AlphaContent::OnlyBlack);

        fill_alpha(&mut image, |x, y| if (x + y) % 2 == 0 { 0.0 } else { 1.0 });
        assert_eq!(image.classify_alpha_content(), AlphaContent::OnlyBlackAndWhite);

        fill_alpha(&mut image, |x, y| if x == 3 && y == 5 { 0.25 } else { 1.0 });
        assert_eq!(image.classify_alpha_content(), AlphaContent::Greyscale);

        let opaque_format =
            ImageObject::new(8, 8, 1, PixelFormat::X8R8G8B8, CubemapKind::No).unwrap();
        assert_eq!(opaque_format.classify_alpha_content(), AlphaContent::Absent);
    }

    #[test]
    fn test_has_non_opaque_alpha() {
        let mut image = float_image(4, 4);
        fill_alpha(&mut image, |_, _| 1.0);
        assert!(!image.has_non_opaque_alpha());
        fill_alpha(&mut image, |x, _| if x == 0 { 0.5 } else { 1.0 });
        assert!(image.has_non_opaque_alpha());
    }

    #[test]
    fn test_normalize_expand_inverse_law() {
        let mut image = float_image(8, 8);
        {
            let mut view = image.float_view_mut(0).unwrap();
            for y in 0..8 {
                for x in 0..8 {
                    let v = (x + y * 8) as f32 / 10.0;
                    view.set(x, y, [v, v * 2.0, 5.0 - v, (v * 0.13).fract()]);
                }
            }
        }
        let original = image.copy_image();

        image
            .normalize_image_range(
                ColorNormalization::Normalize,
                AlphaNormalization::Normalize,
                false,
                4,
            )
            .unwrap();
        assert!(image.flags().renormalized);

        image
            .expand_image_range(ColorNormalization::Normalize, AlphaNormalization::Normalize, 4)
            .unwrap();
        assert!(!image.flags().renormalized);

        let a = image.float_view(0).unwrap();
        let b = original.float_view(0).unwrap();
        for y in 0..8 {
            for x in 0..8 {
                let pa = a.get(x, y);
                let pb = b.get(x, y);
                for c in 0..4 {
                    assert!(
                        (pa[c] - pb[c]).abs() < 1e-4,
                        "channel {} at {},{}: {} vs {}",
                        c,
                        x,
                        y,
                        pa[c],
                        pb[c]
                    );
                }
            }
        }
    }

    #[test]
    fn test_expand_without_normalize_is_noop() {
        let mut image = float_image(4, 4);
        fill_alpha(&mut image, |_, _| 0.7);
        let before = image.mip(0).data.clone();
        image
            .expand_image_range(ColorNormalization::Normalize, AlphaNormalization::Normalize, 4)
            .unwrap();
        assert_eq!(image.mip(0).data, before);
    }

    #[test]
    fn test_swizzle_rgb1() {
        let mut image = float_image(2, 2);
        {
            let mut view = image.float_view_mut(0).unwrap();
            view.set(0, 0, [0.1, 0.2, 0.3, 0.4]);
        }
        image.swizzle("rgb1").unwrap();
        let view = image.float_view(0).unwrap();
        assert_eq!(view.get(0, 0), [0.1, 0.2, 0.3, 1.0]);
        assert!(image.swizzle("xyzw").is_err());
    }

    #[test]
    fn test_flags_roundtrip_bits() {
        let flags = ImageFlags {
            cubemap: true,
            attached_alpha: true,
            renormalized: true,
            ..Default::default()
        };
        let bits = flags.to_bits(ColorModel::Irb);
        let (restored, model) = ImageFlags::from_bits(bits);
        assert_eq!(restored, flags);
        assert_eq!(model, ColorModel::Irb);
    }

    #[test]
    fn test_normalize_vectors_degenerate_fallback() {
        let mut image = float_image(1, 1);
        {
            let mut view = image.float_view_mut(0).unwrap();
            view.set(0, 0, [0.5, 0.5, 0.5, 1.0]);
        }
        image.normalize_vectors(0, 1).unwrap();
        let px = image.float_view(0).unwrap().get(0, 0);
        assert_eq!(px[2], 1.0); // +Z
    }
}
