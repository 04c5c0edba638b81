//! Pixel format definitions and the shared format catalog
//!
//! Every format the compiler can read or write is described by an immutable
//! [`FormatInfo`] entry. The catalog is built once and shared read-only;
//! all conversion strategy decisions are made by querying it.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Pixel formats supported by the compiler
///
/// Memory-order convention carried over from the DDS ecosystem: 8-bit
/// integer formats are stored in BGR(A) byte order, 16-bit-and-wider
/// formats in RGB(A) order. Converters must preserve this asymmetry.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u32)]
pub enum PixelFormat {
    // Uncompressed 8-bit (BGR(A) byte order)
    #[default]
    A8R8G8B8 = 0,
    X8R8G8B8,
    R8G8B8,
    A8,
    L8,
    A8L8,
    R8,

    // Uncompressed 16-bit integer (RGB(A) byte order)
    A16B16G16R16,
    G16R16,
    R16,

    // Half-float
    A16B16G16R16F,
    G16R16F,
    R16F,

    // Float
    A32B32G32R32F,
    G32R32F,
    R32F,

    // Packed shared-exponent HDR
    R9G9B9E5,

    // Legacy DXT (FourCC headers)
    DXT1,
    DXT1a,
    DXT3,
    DXT3t,
    DXT5,
    DXT5t,

    // BC family (DX10 headers)
    BC1,
    BC1a,
    BC2,
    BC2t,
    BC3,
    BC3t,
    BC4,
    BC4s,
    BC5,
    BC5s,
    BC6UH,
    BC7,
    BC7t,

    // ATI 3Dc family
    CTX3Dc,
    CTX3DcP,

    // Mobile block formats
    PVRTC2,
    PVRTC4,
    ETC2,
    ETC2a,
    EAC_R11,
    EAC_RG11,
    ASTC_4x4,
    ASTC_6x6,
    ASTC_8x8,
}

/// How one sample (channel value) is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleType {
    Uint8,
    Uint16,
    Half,
    Float,
    Compressed,
}

/// Immutable description of one pixel format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatInfo {
    pub name: &'static str,
    /// Number of meaningful channels (1-4)
    pub channels: u32,
    pub sample_type: SampleType,
    /// Bits consumed by one block (one pixel for uncompressed formats)
    pub bits_per_block: u32,
    pub block_width: u32,
    pub block_height: u32,
    /// Smallest legal mip dimensions
    pub min_width: u32,
    pub min_height: u32,
    pub has_alpha: bool,
    /// Alpha is stored as a 1-bit mask rather than full range
    pub threshold_alpha: bool,
    /// Format requires square power-of-two dimensions
    pub square_pow2: bool,
    /// Format can only be expressed with a DX10 extension header
    pub dx10_only: bool,
    /// Legacy FourCC, when one exists
    pub four_cc: Option<[u8; 4]>,
}

impl PixelFormat {
    /// Every format, in catalog order
    pub const ALL: [PixelFormat; 47] = [
        PixelFormat::A8R8G8B8,
        PixelFormat::X8R8G8B8,
        PixelFormat::R8G8B8,
        PixelFormat::A8,
        PixelFormat::L8,
        PixelFormat::A8L8,
        PixelFormat::R8,
        PixelFormat::A16B16G16R16,
        PixelFormat::G16R16,
        PixelFormat::R16,
        PixelFormat::A16B16G16R16F,
        PixelFormat::G16R16F,
        PixelFormat::R16F,
        PixelFormat::A32B32G32R32F,
        PixelFormat::G32R32F,
        PixelFormat::R32F,
        PixelFormat::R9G9B9E5,
        PixelFormat::DXT1,
        PixelFormat::DXT1a,
        PixelFormat::DXT3,
        PixelFormat::DXT3t,
        PixelFormat::DXT5,
        PixelFormat::DXT5t,
        PixelFormat::BC1,
        PixelFormat::BC1a,
        PixelFormat::BC2,
        PixelFormat::BC2t,
        PixelFormat::BC3,
        PixelFormat::BC3t,
        PixelFormat::BC4,
        PixelFormat::BC4s,
        PixelFormat::BC5,
        PixelFormat::BC5s,
        PixelFormat::BC6UH,
        PixelFormat::BC7,
        PixelFormat::BC7t,
        PixelFormat::CTX3Dc,
        PixelFormat::CTX3DcP,
        PixelFormat::PVRTC2,
        PixelFormat::PVRTC4,
        PixelFormat::ETC2,
        PixelFormat::ETC2a,
        PixelFormat::EAC_R11,
        PixelFormat::EAC_RG11,
        PixelFormat::ASTC_4x4,
        PixelFormat::ASTC_6x6,
        PixelFormat::ASTC_8x8,
    ];

    fn build_info(self) -> FormatInfo {
        use PixelFormat::*;
        use SampleType::*;

        let uncompressed = |name, channels, sample_type: SampleType, bits, has_alpha| FormatInfo {
            name,
            channels,
            sample_type,
            bits_per_block: bits,
            block_width: 1,
            block_height: 1,
            min_width: 1,
            min_height: 1,
            has_alpha,
            threshold_alpha: false,
            square_pow2: false,
            dx10_only: !matches!(sample_type, Uint8),
            four_cc: None,
        };
        // Block formats pad partial blocks, so mips may shrink to 1x1;
        // only the storage granularity is 4x4.
        let block = |name, channels, bits, has_alpha, threshold, dx10, four_cc| FormatInfo {
            name,
            channels,
            sample_type: Compressed,
            bits_per_block: bits,
            block_width: 4,
            block_height: 4,
            min_width: 1,
            min_height: 1,
            has_alpha,
            threshold_alpha: threshold,
            square_pow2: false,
            dx10_only: dx10,
            four_cc,
        };

        match self {
            A8R8G8B8 => uncompressed("A8R8G8B8", 4, Uint8, 32, true),
            X8R8G8B8 => uncompressed("X8R8G8B8", 3, Uint8, 32, false),
            R8G8B8 => uncompressed("R8G8B8", 3, Uint8, 24, false),
            A8 => uncompressed("A8", 1, Uint8, 8, true),
            L8 => uncompressed("L8", 1, Uint8, 8, false),
            A8L8 => uncompressed("A8L8", 2, Uint8, 16, true),
            R8 => uncompressed("R8", 1, Uint8, 8, false),

            A16B16G16R16 => uncompressed("A16B16G16R16", 4, Uint16, 64, true),
            G16R16 => uncompressed("G16R16", 2, Uint16, 32, false),
            R16 => uncompressed("R16", 1, Uint16, 16, false),

            A16B16G16R16F => uncompressed("A16B16G16R16F", 4, Half, 64, true),
            G16R16F => uncompressed("G16R16F", 2, Half, 32, false),
            R16F => uncompressed("R16F", 1, Half, 16, false),

            A32B32G32R32F => uncompressed("A32B32G32R32F", 4, Float, 128, true),
            G32R32F => uncompressed("G32R32F", 2, Float, 64, false),
            R32F => uncompressed("R32F", 1, Float, 32, false),

            R9G9B9E5 => uncompressed("R9G9B9E5", 3, Float, 32, false),

            DXT1 => block("DXT1", 3, 64, false, false, false, Some(*b"DXT1")),
            DXT1a => block("DXT1a", 4, 64, true, true, false, Some(*b"DXT1")),
            DXT3 => block("DXT3", 4, 128, true, false, false, Some(*b"DXT3")),
            DXT3t => block("DXT3t", 4, 128, true, true, false, Some(*b"DXT3")),
            DXT5 => block("DXT5", 4, 128, true, false, false, Some(*b"DXT5")),
            DXT5t => block("DXT5t", 4, 128, true, true, false, Some(*b"DXT5")),

            BC1 => block("BC1", 3, 64, false, false, true, None),
            BC1a => block("BC1a", 4, 64, true, true, true, None),
            BC2 => block("BC2", 4, 128, true, false, true, None),
            BC2t => block("BC2t", 4, 128, true, true, true, None),
            BC3 => block("BC3", 4, 128, true, false, true, None),
            BC3t => block("BC3t", 4, 128, true, true, true, None),
            BC4 => block("BC4", 1, 64, false, false, true, None),
            BC4s => block("BC4s", 1, 64, false, false, true, None),
            BC5 => block("BC5", 2, 128, false, false, true, None),
            BC5s => block("BC5s", 2, 128, false, false, true, None),
            BC6UH => block("BC6UH", 3, 128, false, false, true, None),
            BC7 => block("BC7", 4, 128, true, false, true, None),
            BC7t => block("BC7t", 4, 128, true, true, true, None),

            CTX3Dc => block("3Dc", 2, 128, false, false, false, Some(*b"ATI2")),
            CTX3DcP => block("3DCp", 1, 64, false, false, false, Some(*b"ATI1")),

            PVRTC2 => FormatInfo {
                name: "PVRTC2",
                channels: 4,
                sample_type: Compressed,
                bits_per_block: 64,
                block_width: 8,
                block_height: 4,
                min_width: 16,
                min_height: 8,
                has_alpha: true,
                threshold_alpha: false,
                square_pow2: true,
                dx10_only: true,
                four_cc: None,
            },
            PVRTC4 => FormatInfo {
                name: "PVRTC4",
                channels: 4,
                sample_type: Compressed,
                bits_per_block: 64,
                block_width: 4,
                block_height: 4,
                min_width: 8,
                min_height: 8,
                has_alpha: true,
                threshold_alpha: false,
                square_pow2: true,
                dx10_only: true,
                four_cc: None,
            },
            ETC2 => block("ETC2", 3, 64, false, false, true, None),
            ETC2a => block("ETC2a", 4, 128, true, false, true, None),
            EAC_R11 => block("EAC_R11", 1, 64, false, false, true, None),
            EAC_RG11 => block("EAC_RG11", 2, 128, false, false, true, None),
            ASTC_4x4 => block("ASTC_4x4", 4, 128, true, false, true, None),
            ASTC_6x6 => FormatInfo {
                block_width: 6,
                block_height: 6,
                min_width: 6,
                min_height: 6,
                ..block("ASTC_6x6", 4, 128, true, false, true, None)
            },
            ASTC_8x8 => FormatInfo {
                block_width: 8,
                block_height: 8,
                min_width: 8,
                min_height: 8,
                ..block("ASTC_8x8", 4, 128, true, false, true, None)
            },
        }
    }

    /// Look up format metadata; pure and total for every enum value
    pub fn info(self) -> &'static FormatInfo {
        static CATALOG: Lazy<Vec<FormatInfo>> = Lazy::new(|| {
            PixelFormat::ALL.iter().map(|f| f.build_info()).collect()
        });
        &CATALOG[self as usize]
    }

    /// Largest mip chain respecting the format's minimum dimensions
    ///
    /// For cubemaps the constraint applies per face (width / 6).
    pub fn compute_max_mip_count(self, width: u32, height: u32, cubemap: bool) -> u32 {
        let info = self.info();
        let mut w = if cubemap { (width / 6).max(1) } else { width.max(1) };
        let mut h = height.max(1);

        let mut count = 1;
        loop {
            let nw = (w / 2).max(1);
            let nh = (h / 2).max(1);
            if nw == w && nh == h {
                break;
            }
            if nw < info.min_width || nh < info.min_height {
                break;
            }
            w = nw;
            h = nh;
            count += 1;
        }
        count
    }

    /// Row pitch in bytes for one mip row of the given width
    ///
    /// For block formats a "row" is one row of blocks.
    pub fn row_pitch(self, width: u32) -> usize {
        let info = self.info();
        let blocks = width.max(1).div_ceil(info.block_width) as usize;
        blocks * (info.bits_per_block as usize / 8)
    }

    /// Number of stored rows for a mip of the given height
    pub fn row_count(self, height: u32) -> usize {
        let info = self.info();
        height.max(1).div_ceil(info.block_height) as usize
    }

    /// Total byte size of one mip level
    pub fn mip_size(self, width: u32, height: u32) -> usize {
        self.row_pitch(width) * self.row_count(height)
    }

    pub fn is_uncompressed(self) -> bool {
        self.info().sample_type != SampleType::Compressed
    }

    pub fn is_compressed(self) -> bool {
        !self.is_uncompressed()
    }

    pub fn has_alpha(self) -> bool {
        self.info().has_alpha
    }

    pub fn is_without_alpha(self) -> bool {
        !self.info().has_alpha
    }

    pub fn is_threshold_alpha(self) -> bool {
        self.info().threshold_alpha
    }

    /// Uncompressed formats with a red/green/blue interpretation (3-4 channels)
    pub fn is_any_rgb(self) -> bool {
        self.is_uncompressed() && self.info().channels >= 3
    }

    /// Uncompressed two-channel (RG) formats
    pub fn is_any_rg(self) -> bool {
        matches!(
            self,
            PixelFormat::G16R16 | PixelFormat::G16R16F | PixelFormat::G32R32F
        )
    }

    pub fn is_single_channel(self) -> bool {
        self.is_uncompressed() && self.info().channels == 1
    }

    /// Formats storing float or half samples; `include_packed` also accepts
    /// the shared-exponent and BC6 HDR encodings
    pub fn is_floating_point(self, include_packed: bool) -> bool {
        match self.info().sample_type {
            SampleType::Half | SampleType::Float => {
                !matches!(self, PixelFormat::R9G9B9E5) || include_packed
            }
            _ => include_packed && matches!(self, PixelFormat::BC6UH | PixelFormat::R9G9B9E5),
        }
    }

    /// Formats that can only appear in a DX10-extended DDS
    pub fn is_extended_dds_only(self) -> bool {
        self.info().dx10_only
    }

    /// Block formats whose alpha weights the color endpoints during
    /// compression (normalizing such alpha would skew the color encode)
    pub fn is_weighting_alpha(self) -> bool {
        matches!(
            self,
            PixelFormat::DXT5
                | PixelFormat::DXT5t
                | PixelFormat::BC3
                | PixelFormat::BC3t
                | PixelFormat::BC7
                | PixelFormat::BC7t
        )
    }

    /// Signed block formats (no codec in the stock build)
    pub fn is_signed(self) -> bool {
        matches!(self, PixelFormat::BC4s | PixelFormat::BC5s)
    }

    /// Canonicalize destination aliases to the codec-level format
    ///
    /// DXT tags and thresholded variants collapse onto the BC family entry
    /// the codecs actually implement; the bool reports whether the alias
    /// requested 1-bit alpha treatment.
    pub fn canonical_block_format(self) -> (PixelFormat, bool) {
        use PixelFormat::*;
        match self {
            DXT1 => (BC1, false),
            DXT1a | BC1a => (BC1, true),
            DXT3 | BC2 => (BC2, false),
            DXT3t | BC2t => (BC2, true),
            DXT5 | BC3 => (BC3, false),
            DXT5t | BC3t => (BC3, true),
            BC7t => (BC7, true),
            CTX3DcP => (BC4, false),
            CTX3Dc => (BC5, false),
            other => (other, false),
        }
    }

    /// The uncompressed format with an equivalent channel/alpha layout,
    /// used as the fallback when a block format can't be applied
    pub fn fallback_uncompressed(self) -> PixelFormat {
        use PixelFormat::*;
        match self {
            DXT1 | BC1 | ETC2 | PVRTC2 | PVRTC4 => X8R8G8B8,
            DXT1a | DXT3 | DXT3t | DXT5 | DXT5t | BC1a | BC2 | BC2t | BC3 | BC3t | BC7 | BC7t
            | ETC2a | ASTC_4x4 | ASTC_6x6 | ASTC_8x8 => A8R8G8B8,
            BC4 | BC4s | CTX3DcP | EAC_R11 => R8,
            BC5 | BC5s | CTX3Dc | EAC_RG11 => G16R16F,
            BC6UH | R9G9B9E5 => A16B16G16R16F,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_total() {
        for format in PixelFormat::ALL {
            let info = format.info();
            assert!(!info.name.is_empty());
            assert!(info.channels >= 1 && info.channels <= 4);
            assert!(info.bits_per_block > 0);
        }
    }

    #[test]
    fn test_mip_count_respects_minimum() {
        for format in PixelFormat::ALL {
            let info = format.info();
            for &(w, h) in &[(1u32, 1u32), (4, 4), (16, 16), (256, 256), (640, 480), (1024, 32)] {
                let mips = format.compute_max_mip_count(w, h, false);
                let mut mw = w;
                let mut mh = h;
                for _ in 1..mips {
                    mw = (mw / 2).max(1);
                    mh = (mh / 2).max(1);
                }
                assert!(
                    mw >= info.min_width && mh >= info.min_height,
                    "{}: {}x{} gave {} mips",
                    info.name,
                    w,
                    h,
                    mips
                );
            }
        }
    }

    #[test]
    fn test_mip_count_plain_chain() {
        assert_eq!(PixelFormat::A8R8G8B8.compute_max_mip_count(256, 256, false), 9);
        assert_eq!(PixelFormat::A8R8G8B8.compute_max_mip_count(1, 1, false), 1);
        // Block formats pad partial blocks, so the chain still reaches 1x1
        assert_eq!(PixelFormat::BC1.compute_max_mip_count(256, 256, false), 9);
        // PVRTC genuinely can't go below its minimum
        assert_eq!(PixelFormat::PVRTC4.compute_max_mip_count(256, 256, false), 6);
    }

    #[test]
    fn test_cubemap_mip_count_uses_face_size() {
        // 6*64 x 64 strip: faces are 64x64
        assert_eq!(PixelFormat::A8R8G8B8.compute_max_mip_count(384, 64, true), 7);
    }

    #[test]
    fn test_row_pitch_block_granularity() {
        assert_eq!(PixelFormat::A8R8G8B8.row_pitch(16), 64);
        assert_eq!(PixelFormat::R8G8B8.row_pitch(16), 48);
        // DXT1: 4 blocks of 8 bytes
        assert_eq!(PixelFormat::DXT1.row_pitch(16), 32);
        assert_eq!(PixelFormat::DXT1.row_count(16), 4);
        // Non-multiple-of-4 rounds up to block granularity
        assert_eq!(PixelFormat::DXT1.row_pitch(17), 40);
    }

    #[test]
    fn test_canonical_aliases() {
        assert_eq!(PixelFormat::DXT1.canonical_block_format(), (PixelFormat::BC1, false));
        assert_eq!(PixelFormat::DXT1a.canonical_block_format(), (PixelFormat::BC1, true));
        assert_eq!(PixelFormat::DXT5.canonical_block_format(), (PixelFormat::BC3, false));
        assert_eq!(PixelFormat::CTX3Dc.canonical_block_format(), (PixelFormat::BC5, false));
    }

    #[test]
    fn test_classification_queries() {
        assert!(PixelFormat::A8R8G8B8.is_any_rgb());
        assert!(!PixelFormat::A8.is_any_rgb());
        assert!(PixelFormat::R16F.is_floating_point(false));
        assert!(!PixelFormat::R9G9B9E5.is_floating_point(false));
        assert!(PixelFormat::R9G9B9E5.is_floating_point(true));
        assert!(PixelFormat::BC6UH.is_floating_point(true));
        assert!(PixelFormat::DXT1a.is_threshold_alpha());
        assert!(PixelFormat::DXT1.is_without_alpha());
    }
}
