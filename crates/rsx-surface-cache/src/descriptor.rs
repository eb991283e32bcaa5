//! Guest surface descriptors: the per-slot view of the guest's bound render targets.

use core::fmt;

use crate::format::{ColorFormat, DepthFormat, SurfaceFormat};

/// Number of simultaneously bound colour render targets.
pub const COLOR_SLOT_COUNT: usize = 4;

/// Total number of surface slots (colour targets + one depth/stencil target).
pub const SURFACE_SLOT_COUNT: usize = COLOR_SLOT_COUNT + 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceSlot {
    /// Colour target `0..COLOR_SLOT_COUNT`.
    Color(u8),
    Depth,
}

impl SurfaceSlot {
    pub const ALL: [SurfaceSlot; SURFACE_SLOT_COUNT] = [
        SurfaceSlot::Color(0),
        SurfaceSlot::Color(1),
        SurfaceSlot::Color(2),
        SurfaceSlot::Color(3),
        SurfaceSlot::Depth,
    ];

    /// Dense index in `0..SURFACE_SLOT_COUNT`, or `None` for an out-of-range colour index.
    pub fn index(self) -> Option<usize> {
        match self {
            SurfaceSlot::Color(i) if usize::from(i) < COLOR_SLOT_COUNT => Some(usize::from(i)),
            SurfaceSlot::Color(_) => None,
            SurfaceSlot::Depth => Some(COLOR_SLOT_COUNT),
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, SurfaceSlot::Depth)
    }
}

impl fmt::Display for SurfaceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceSlot::Color(i) => write!(f, "color{i}"),
            SurfaceSlot::Depth => f.write_str("depth"),
        }
    }
}

/// Half-open guest address range `[start, end)`.
///
/// `end` is 64-bit so a surface ending exactly at the top of the 32-bit guest space is
/// representable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GuestRange {
    pub start: u32,
    pub end: u64,
}

impl GuestRange {
    pub fn new(start: u32, len: u64) -> Self {
        Self {
            start,
            end: u64::from(start) + len,
        }
    }

    pub fn len(&self) -> u64 {
        self.end - u64::from(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.start && u64::from(address) < self.end
    }

    pub fn overlaps(&self, other: &GuestRange) -> bool {
        u64::from(self.start) < other.end && u64::from(other.start) < self.end
    }
}

impl fmt::Display for GuestRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}

/// One bound surface slot as described by the guest's surface registers.
///
/// Rebuilt on every bind and compared by value against the previous descriptor of the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GuestSurfaceDescriptor {
    pub address: u32,
    /// Bytes between the starts of consecutive rows in guest memory.
    pub pitch: u32,
    pub format: SurfaceFormat,
    pub width: u16,
    pub height: u16,
}

impl GuestSurfaceDescriptor {
    pub fn color(address: u32, pitch: u32, format: ColorFormat, width: u16, height: u16) -> Self {
        Self {
            address,
            pitch,
            format: SurfaceFormat::Color(format),
            width,
            height,
        }
    }

    pub fn depth(address: u32, pitch: u32, format: DepthFormat, width: u16, height: u16) -> Self {
        Self {
            address,
            pitch,
            format: SurfaceFormat::Depth(format),
            width,
            height,
        }
    }

    pub fn is_depth(&self) -> bool {
        self.format.is_depth()
    }

    /// Zero-area descriptors never create a resource.
    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0 || self.pitch == 0
    }

    /// Bytes of texel data in one row (without pitch padding).
    pub fn row_bytes(&self) -> u32 {
        u32::from(self.width) * self.format.texel_size()
    }

    /// Bytes of guest memory the surface spans (`pitch * height`).
    pub fn size_bytes(&self) -> u64 {
        u64::from(self.pitch) * u64::from(self.height)
    }

    /// Tightly packed texel bytes (`row_bytes * height`), the host-side resource layout.
    pub fn packed_size_bytes(&self) -> usize {
        self.row_bytes() as usize * usize::from(self.height)
    }

    /// Guest address of the first byte of row `row`.
    pub fn row_address(&self, row: u16) -> u64 {
        u64::from(self.address) + u64::from(self.pitch) * u64::from(row)
    }

    pub fn range(&self) -> GuestRange {
        GuestRange::new(self.address, self.size_bytes())
    }

    /// Checks a non-degenerate descriptor for layouts the cache cannot represent.
    pub fn validate(&self) -> Result<GuestRange, &'static str> {
        if self.pitch < self.row_bytes() {
            return Err("pitch is smaller than one row of texels");
        }
        let range = self.range();
        if range.end > 1u64 << 32 {
            return Err("surface extends past the end of the 32-bit guest address space");
        }
        Ok(range)
    }
}

/// The full set of surface slots bound for a draw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SurfaceSet {
    pub color: [Option<GuestSurfaceDescriptor>; COLOR_SLOT_COUNT],
    pub depth: Option<GuestSurfaceDescriptor>,
}

impl SurfaceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color(mut self, index: usize, desc: GuestSurfaceDescriptor) -> Self {
        self.color[index] = Some(desc);
        self
    }

    pub fn with_depth(mut self, desc: GuestSurfaceDescriptor) -> Self {
        self.depth = Some(desc);
        self
    }

    pub fn get(&self, slot: SurfaceSlot) -> Option<GuestSurfaceDescriptor> {
        match slot {
            SurfaceSlot::Color(i) => self.color.get(usize::from(i)).copied().flatten(),
            SurfaceSlot::Depth => self.depth,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SurfaceSlot, Option<GuestSurfaceDescriptor>)> + '_ {
        SurfaceSlot::ALL.into_iter().map(|slot| (slot, self.get(slot)))
    }
}
