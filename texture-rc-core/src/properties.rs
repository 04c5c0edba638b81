//! Preset property bag and the typed view the pipeline reads
//!
//! A preset is a flat mapping of string keys to typed values. Every
//! pipeline knob is read through a typed getter with a documented default,
//! so an empty bag is a valid (plain diffuse) preset.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::image::ColorModel;
use crate::pixel_format::PixelFormat;

/// One property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            PropertyValue::Int(i) => Some(*i != 0),
            PropertyValue::String(s) => match s.as_str() {
                "1" | "true" | "yes" => Some(true),
                "0" | "false" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            PropertyValue::Bool(b) => Some(*b as i64),
            PropertyValue::Float(f) => Some(*f as i64),
            PropertyValue::String(s) => s.parse().ok(),
        }
    }

    fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Int(i) => Some(*i as f64),
            PropertyValue::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Flat key-value preset configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertySet {
    values: IndexMap<String, PropertyValue>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<S: Into<String>>(&mut self, key: S, value: PropertyValue) {
        self.values.insert(key.into().to_lowercase(), value);
    }

    pub fn set_bool<S: Into<String>>(&mut self, key: S, value: bool) {
        self.set(key, PropertyValue::Bool(value));
    }

    pub fn set_int<S: Into<String>>(&mut self, key: S, value: i64) {
        self.set(key, PropertyValue::Int(value));
    }

    pub fn set_float<S: Into<String>>(&mut self, key: S, value: f64) {
        self.set(key, PropertyValue::Float(value));
    }

    pub fn set_string<S: Into<String>, V: Into<String>>(&mut self, key: S, value: V) {
        self.set(key, PropertyValue::String(value.into()));
    }

    /// Parse a `key=value` override as produced by the CLI
    pub fn set_from_pair(&mut self, key: &str, value: &str) {
        self.set_string(key, value);
    }

    pub fn get_as_bool(&self, key: &str, default: bool) -> bool {
        self.values
            .get(key)
            .and_then(PropertyValue::as_bool)
            .unwrap_or(default)
    }

    pub fn get_as_int(&self, key: &str, default: i64) -> i64 {
        self.values
            .get(key)
            .and_then(PropertyValue::as_int)
            .unwrap_or(default)
    }

    pub fn get_as_float(&self, key: &str, default: f64) -> f64 {
        self.values
            .get(key)
            .and_then(PropertyValue::as_float)
            .unwrap_or(default)
    }

    pub fn get_as_string(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .and_then(PropertyValue::as_str)
            .unwrap_or(default)
            .to_string()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.values.iter()
    }
}

/// Input color space declared by the preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputColorSpace {
    Linear,
    Srgb,
}

/// Output color space requested by the preset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputColorSpace {
    Linear,
    Srgb,
    /// Encode sRGB only when a dark-pixel histogram says it pays off
    Auto,
}

/// Mip resampling kernel selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MipFilterKind {
    Box,
    Triangle,
    Lanczos,
}

/// Cubemap convolution kernel selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeFilterKind {
    /// Plain per-face resample, no angular spread
    Disc,
    AngularGaussian,
    Ggx,
}

/// Compression effort knob passed to codecs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Fast,
    Normal,
    Slow,
}

/// Typed per-job view over a [`PropertySet`]
///
/// `preserve_alpha` is working state the orchestrator rewrites as it
/// learns about the image; everything else reads the bag on demand.
#[derive(Debug, Clone, Default)]
pub struct ImageProperties {
    pub set: PropertySet,
    pub preserve_alpha: bool,
}

impl ImageProperties {
    pub fn new(set: PropertySet) -> Self {
        Self {
            set,
            preserve_alpha: false,
        }
    }

    /// The final pixel format the preset asks for
    pub fn dest_pixel_format(&self) -> PixelFormat {
        let name = self.set.get_as_string("pixelformat", "DXT1");
        parse_pixel_format(&name).unwrap_or(PixelFormat::DXT1)
    }

    pub fn mipmaps(&self) -> bool {
        self.set.get_as_bool("mipmaps", true)
    }

    pub fn mip_filter(&self) -> MipFilterKind {
        match self.set.get_as_string("mipgentype", "triangle").as_str() {
            "box" | "average" => MipFilterKind::Box,
            "lanczos" | "sinc" => MipFilterKind::Lanczos,
            _ => MipFilterKind::Triangle,
        }
    }

    pub fn cubemap(&self) -> bool {
        self.set.get_as_bool("cubemap", false)
    }

    pub fn pow_of_2(&self) -> bool {
        self.set.get_as_bool("powof2", false)
    }

    pub fn color_space(&self) -> (InputColorSpace, OutputColorSpace) {
        let spec = self.set.get_as_string("colorspace", "linear,linear");
        let mut parts = spec.split(',');
        let input = match parts.next().map(str::trim) {
            Some("srgb") | Some("sRGB") => InputColorSpace::Srgb,
            _ => InputColorSpace::Linear,
        };
        let output = match parts.next().map(str::trim) {
            Some("srgb") | Some("sRGB") => OutputColorSpace::Srgb,
            Some("auto") => OutputColorSpace::Auto,
            _ => OutputColorSpace::Linear,
        };
        (input, output)
    }

    pub fn color_model(&self) -> ColorModel {
        match self.set.get_as_string("colormodel", "rgb").as_str() {
            "cie" => ColorModel::Cie,
            "ycbcr" => ColorModel::YCbCr,
            "yfbfr" => ColorModel::YFbFr,
            "irb" => ColorModel::Irb,
            _ => ColorModel::Rgb,
        }
    }

    pub fn quality(&self) -> Quality {
        match self.set.get_as_string("quality", "normal").as_str() {
            "fast" | "preview" => Quality::Fast,
            "slow" | "high" => Quality::Slow,
            _ => Quality::Normal,
        }
    }

    pub fn mip_renormalize(&self) -> bool {
        self.set.get_as_bool("miprenormalize", false)
    }

    pub fn maintain_alpha_coverage(&self) -> bool {
        self.set.get_as_bool("mipmapalphacoverage", false)
    }

    pub fn discard_alpha(&self) -> bool {
        self.set.get_as_bool("discardalpha", false)
    }

    pub fn minimum_alpha(&self) -> i64 {
        self.set.get_as_int("minalpha", 0).clamp(0, 255)
    }

    pub fn max_texture_size(&self) -> u32 {
        self.set.get_as_int("maxtexturesize", 0).max(0) as u32
    }

    pub fn min_texture_size(&self) -> u32 {
        self.set.get_as_int("mintexturesize", 0).max(0) as u32
    }

    /// Mip levels to drop from the top, derived from the reduce setting
    pub fn requested_resolution_reduce(&self, _width: u32, _height: u32) -> u32 {
        self.set.get_as_int("reduce", 0).clamp(0, 8) as u32
    }

    pub fn rgbk_compression(&self) -> i64 {
        self.set.get_as_int("rgbk", 0).clamp(0, 3)
    }

    pub fn rgbk_max_value(&self) -> f32 {
        self.set.get_as_float("rgbkmax", 4.0) as f32
    }

    pub fn normalize_range(&self) -> bool {
        self.set.get_as_bool("normalizerange", false)
    }

    pub fn normalize_range_alpha(&self) -> bool {
        self.set.get_as_bool("normalizerangealpha", false)
    }

    pub fn high_pass(&self) -> i64 {
        self.set.get_as_int("highpass", 0).clamp(0, 8)
    }

    pub fn gloss_from_normals(&self) -> bool {
        self.set.get_as_bool("glossfromnormals", false)
    }

    pub fn bump_to_normal_filter(&self) -> i64 {
        self.set.get_as_int("bumptype", 0)
    }

    pub fn bump_strength(&self) -> f32 {
        self.set.get_as_float("bumpstrength", 5.0) as f32
    }

    pub fn alpha_as_bump_filter(&self) -> i64 {
        self.set.get_as_int("bumptypealpha", 0)
    }

    pub fn auto_detect_luminance(&self) -> bool {
        self.set.get_as_bool("autodetectluminance", false)
    }

    pub fn auto_detect_black_and_white_alpha(&self) -> bool {
        self.set.get_as_bool("autodetectblackandwhitealpha", false)
    }

    pub fn reduce_alpha(&self) -> i64 {
        self.set.get_as_int("reducealpha", 0).clamp(0, 8)
    }

    pub fn num_streamable_mips(&self) -> u32 {
        self.set.get_as_int("numstreamablemips", 100).max(0) as u32
    }

    // Cubemap convolution knobs

    pub fn cubemap_filter_type(&self) -> CubeFilterKind {
        match self.set.get_as_string("cm_ftype", "disc").as_str() {
            "gaussian" | "angular" => CubeFilterKind::AngularGaussian,
            "ggx" => CubeFilterKind::Ggx,
            _ => CubeFilterKind::Disc,
        }
    }

    pub fn cubemap_filter_angle(&self) -> f32 {
        self.set.get_as_float("cm_fangle", 3.0) as f32
    }

    pub fn cubemap_mip_filter_angle(&self) -> f32 {
        self.set.get_as_float("cm_fmipangle", 1.0) as f32
    }

    pub fn cubemap_mip_filter_slope(&self) -> f32 {
        self.set.get_as_float("cm_fmipslope", 2.0) as f32
    }

    pub fn cubemap_edge_fixup_width(&self) -> u32 {
        self.set.get_as_int("cm_edgefixup", 0).max(0) as u32
    }

    pub fn cubemap_ggx_sample_count(&self) -> u32 {
        self.set.get_as_int("cm_ggxsamples", 128).max(1) as u32
    }

    pub fn brdf_gloss_scale(&self) -> f32 {
        self.set.get_as_float("cm_glossscale", 1.0) as f32
    }

    pub fn brdf_gloss_bias(&self) -> f32 {
        self.set.get_as_float("cm_glossbias", 0.0) as f32
    }
}

/// Parse a pixel format name as written in presets
pub fn parse_pixel_format(name: &str) -> Option<PixelFormat> {
    PixelFormat::ALL
        .iter()
        .copied()
        .find(|f| f.info().name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters_with_defaults() {
        let mut set = PropertySet::new();
        set.set_bool("mipmaps", false);
        set.set_string("pixelformat", "DXT5");
        set.set_int("reduce", 2);

        let props = ImageProperties::new(set);
        assert!(!props.mipmaps());
        assert_eq!(props.dest_pixel_format(), PixelFormat::DXT5);
        assert_eq!(props.requested_resolution_reduce(256, 256), 2);
        // Unset keys fall back to documented defaults
        assert_eq!(props.rgbk_max_value(), 4.0);
        assert_eq!(props.quality(), Quality::Normal);
    }

    #[test]
    fn test_string_values_coerce() {
        let mut set = PropertySet::new();
        set.set_from_pair("mipmaps", "0");
        set.set_from_pair("reduce", "3");
        set.set_from_pair("rgbkmax", "8.0");
        assert!(!set.get_as_bool("mipmaps", true));
        assert_eq!(set.get_as_int("reduce", 0), 3);
        assert_eq!(set.get_as_float("rgbkmax", 0.0), 8.0);
    }

    #[test]
    fn test_color_space_parsing() {
        let mut set = PropertySet::new();
        set.set_string("colorspace", "srgb,auto");
        let props = ImageProperties::new(set);
        assert_eq!(
            props.color_space(),
            (InputColorSpace::Srgb, OutputColorSpace::Auto)
        );
        let default = ImageProperties::default();
        assert_eq!(
            default.color_space(),
            (InputColorSpace::Linear, OutputColorSpace::Linear)
        );
    }

    #[test]
    fn test_parse_pixel_format_names() {
        assert_eq!(parse_pixel_format("DXT1"), Some(PixelFormat::DXT1));
        assert_eq!(parse_pixel_format("dxt5"), Some(PixelFormat::DXT5));
        assert_eq!(parse_pixel_format("A32B32G32R32F"), Some(PixelFormat::A32B32G32R32F));
        assert_eq!(parse_pixel_format("nope"), None);
    }
}
