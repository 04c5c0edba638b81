//! Texture Resource Compiler — processing pipeline
//!
//! Everything between a decoded source image and the finished DDS file:
//! format conversion through the block-codec chain, mip and cubemap
//! generation, color-model and RGBK transforms, normal-map derivation,
//! the DDS container and the orchestrator that sequences a compile job
//! from a preset property bag.

pub mod bumpmap;
pub mod colormodel;
pub mod convert;
pub mod cubemap;
pub mod dds;
pub mod mips;
pub mod orchestrator;
pub mod rgbk;

// Re-export main types
pub use convert::{
    codecs::{BlockCodec, CodecOutcome},
    FormatConverter, ImageToProcess,
};
pub use cubemap::{
    create_cubemap_mip_maps, reshape_to_strip, CubemapFilterParams, FilterEngine, FilterJob,
    FilterStatus,
};
pub use dds::{read_dds, write_dds};
pub use mips::{create_mip_maps, high_pass, scale_image, MipGenParams};
pub use orchestrator::{CompileOutcome, TextureCompiler};
pub use rgbk::RgbkMode;
