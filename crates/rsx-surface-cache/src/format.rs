//! Guest render surface formats.
//!
//! The guest GPU addresses colour and depth surfaces by format code. The cache only needs three
//! things from a format: whether it is depth, how many bytes one texel occupies in guest memory,
//! and what bytes a clear leaves behind once the surface has been written back.
//!
//! All multi-byte texels are encoded little-endian.

use core::fmt;

use half::f16;

/// Colour render target formats.
///
/// `Z`/`O` suffixes name the value forced into the unused `X` bits (zero or one).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    X1R5G5B5Z,
    X1R5G5B5O,
    R5G6B5,
    X8R8G8B8Z,
    X8R8G8B8O,
    A8R8G8B8,
    B8,
    G8B8,
    /// Four half-float channels (x = R, y = G, z = B, w = A).
    W16Z16Y16X16,
    /// Four single-float channels (x = R, y = G, z = B, w = A).
    W32Z32Y32X32,
    /// One single-float channel holding R.
    X32,
    X8B8G8R8Z,
    X8B8G8R8O,
    A8B8G8R8,
}

impl ColorFormat {
    pub const ALL: [ColorFormat; 14] = [
        ColorFormat::X1R5G5B5Z,
        ColorFormat::X1R5G5B5O,
        ColorFormat::R5G6B5,
        ColorFormat::X8R8G8B8Z,
        ColorFormat::X8R8G8B8O,
        ColorFormat::A8R8G8B8,
        ColorFormat::B8,
        ColorFormat::G8B8,
        ColorFormat::W16Z16Y16X16,
        ColorFormat::W32Z32Y32X32,
        ColorFormat::X32,
        ColorFormat::X8B8G8R8Z,
        ColorFormat::X8B8G8R8O,
        ColorFormat::A8B8G8R8,
    ];

    pub fn texel_size(self) -> u32 {
        match self {
            ColorFormat::B8 => 1,
            ColorFormat::X1R5G5B5Z
            | ColorFormat::X1R5G5B5O
            | ColorFormat::R5G6B5
            | ColorFormat::G8B8 => 2,
            ColorFormat::X8R8G8B8Z
            | ColorFormat::X8R8G8B8O
            | ColorFormat::A8R8G8B8
            | ColorFormat::X32
            | ColorFormat::X8B8G8R8Z
            | ColorFormat::X8B8G8R8O
            | ColorFormat::A8B8G8R8 => 4,
            ColorFormat::W16Z16Y16X16 => 8,
            ColorFormat::W32Z32Y32X32 => 16,
        }
    }

    /// Encode a guest `0xAARRGGBB` clear colour as one texel of this format.
    pub fn encode_argb(self, argb: u32) -> Vec<u8> {
        let [b, g, r, a] = argb.to_le_bytes();
        match self {
            ColorFormat::X1R5G5B5Z | ColorFormat::X1R5G5B5O => {
                let x = u16::from(self == ColorFormat::X1R5G5B5O);
                let packed = (x << 15)
                    | (u16::from(r >> 3) << 10)
                    | (u16::from(g >> 3) << 5)
                    | u16::from(b >> 3);
                packed.to_le_bytes().to_vec()
            }
            ColorFormat::R5G6B5 => {
                let packed =
                    (u16::from(r >> 3) << 11) | (u16::from(g >> 2) << 5) | u16::from(b >> 3);
                packed.to_le_bytes().to_vec()
            }
            ColorFormat::X8R8G8B8Z => vec![b, g, r, 0x00],
            ColorFormat::X8R8G8B8O => vec![b, g, r, 0xFF],
            ColorFormat::A8R8G8B8 => vec![b, g, r, a],
            ColorFormat::B8 => vec![b],
            ColorFormat::G8B8 => vec![b, g],
            ColorFormat::W16Z16Y16X16 => [r, g, b, a]
                .into_iter()
                .flat_map(|c| f16::from_f32(unorm8_to_f32(c)).to_le_bytes())
                .collect(),
            ColorFormat::W32Z32Y32X32 => [r, g, b, a]
                .into_iter()
                .flat_map(|c| unorm8_to_f32(c).to_le_bytes())
                .collect(),
            ColorFormat::X32 => unorm8_to_f32(r).to_le_bytes().to_vec(),
            ColorFormat::X8B8G8R8Z => vec![r, g, b, 0x00],
            ColorFormat::X8B8G8R8O => vec![r, g, b, 0xFF],
            ColorFormat::A8B8G8R8 => vec![r, g, b, a],
        }
    }
}

/// Depth/stencil render target formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthFormat {
    Z16,
    /// 24-bit depth in the high bits, 8-bit stencil in the low byte.
    Z24S8,
}

impl DepthFormat {
    pub fn texel_size(self) -> u32 {
        match self {
            DepthFormat::Z16 => 2,
            DepthFormat::Z24S8 => 4,
        }
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, DepthFormat::Z24S8)
    }

    /// Encode a guest `depth24 << 8 | stencil8` clear value as one texel of this format.
    pub fn encode_z24s8(self, z24s8: u32) -> Vec<u8> {
        match self {
            // Keep the top 16 bits of the 24-bit depth value.
            DepthFormat::Z16 => ((z24s8 >> 16) as u16).to_le_bytes().to_vec(),
            DepthFormat::Z24S8 => z24s8.to_le_bytes().to_vec(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceFormat {
    Color(ColorFormat),
    Depth(DepthFormat),
}

impl SurfaceFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, SurfaceFormat::Depth(_))
    }

    pub fn texel_size(self) -> u32 {
        match self {
            SurfaceFormat::Color(fmt) => fmt.texel_size(),
            SurfaceFormat::Depth(fmt) => fmt.texel_size(),
        }
    }

    /// Bytes of a tightly packed `width` x `height` surface, or `None` if that does not fit in
    /// `usize`.
    pub fn surface_len(self, width: u32, height: u32) -> Option<usize> {
        usize::try_from(width)
            .ok()?
            .checked_mul(usize::try_from(height).ok()?)?
            .checked_mul(self.texel_size() as usize)
    }

    /// Texel bytes a clear with `value` produces, or `None` when the clear targets the other
    /// surface kind (colour value on a depth surface or vice versa).
    pub fn encode_clear(self, value: ClearValue) -> Option<Vec<u8>> {
        match (self, value) {
            (SurfaceFormat::Color(fmt), ClearValue::Color(argb)) => Some(fmt.encode_argb(argb)),
            (SurfaceFormat::Depth(fmt), ClearValue::DepthStencil(z24s8)) => {
                Some(fmt.encode_z24s8(z24s8))
            }
            _ => None,
        }
    }
}

impl From<ColorFormat> for SurfaceFormat {
    fn from(fmt: ColorFormat) -> Self {
        SurfaceFormat::Color(fmt)
    }
}

impl From<DepthFormat> for SurfaceFormat {
    fn from(fmt: DepthFormat) -> Self {
        SurfaceFormat::Depth(fmt)
    }
}

impl fmt::Display for SurfaceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceFormat::Color(fmt) => write!(f, "color:{fmt:?}"),
            SurfaceFormat::Depth(fmt) => write!(f, "depth:{fmt:?}"),
        }
    }
}

/// Value written by a surface clear, as latched from the guest's clear registers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearValue {
    /// `0xAARRGGBB`.
    Color(u32),
    /// `depth24 << 8 | stencil8`.
    DepthStencil(u32),
}

fn unorm8_to_f32(v: u8) -> f32 {
    f32::from(v) / 255.0
}
