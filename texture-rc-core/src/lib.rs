//! Texture Resource Compiler — core data model
//!
//! Fundamental building blocks shared by the conversion pipeline and the
//! CLI: the pixel-format catalog, the image object (mip chain + attached
//! alpha), the preset property bag and the error taxonomy.

pub mod error;
pub mod image;
pub mod pixel_format;
pub mod properties;

// Re-export main types
pub use error::{Result, TextureError};
pub use image::{
    AlphaContent, AlphaNormalization, ColorModel, ColorNormalization, ColorRange, CubemapKind,
    FloatView, FloatViewMut, ImageFlags, ImageObject, MipLevel, Vec4,
};
pub use pixel_format::{FormatInfo, PixelFormat, SampleType};
pub use properties::{
    parse_pixel_format, CubeFilterKind, ImageProperties, InputColorSpace, MipFilterKind,
    OutputColorSpace, PropertySet, PropertyValue, Quality,
};
