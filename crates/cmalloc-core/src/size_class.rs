//! Size class bins for small allocations.
//!
//! Defines size classes from 16 bytes to 32KB. Each size class owns a set of
//! slabs carved into equal blocks. The bin index is computed by rounding up the
//! requested size to the nearest size class boundary.

use crate::header::HEADER_SIZE;
use crate::os;

/// Minimum allocation size (bytes).
pub const MIN_SIZE: usize = 16;

/// Maximum size for small allocations (bytes). Above this, use the large/mmap path.
pub const MAX_SMALL_SIZE: usize = 32 * 1024; // 32KB

/// Number of size class bins.
pub const NUM_SIZE_CLASSES: usize = 32;

/// Smallest slab mapped for any class.
const MIN_SLAB_BYTES: usize = 64 * 1024;

/// Lower bound on blocks carved from one slab, so the big classes still amortize a mapping.
const MIN_BLOCKS_PER_SLAB: usize = 8;

/// Describes a single size class bin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeClass {
    /// Usable payload bytes for this class.
    pub size: usize,
    /// Distance between consecutive blocks (header + payload).
    pub stride: usize,
    /// Bytes mapped per slab.
    pub slab_bytes: usize,
    /// Number of blocks carved from one slab.
    pub objects_per_slab: usize,
}

impl SizeClass {
    /// Creates the descriptor for bin `index`.
    pub fn new(index: usize) -> Self {
        let slab_bytes = slab_bytes(index);
        let stride = block_stride(index);
        Self {
            size: bin_size(index),
            stride,
            slab_bytes,
            objects_per_slab: slab_bytes.checked_div(stride).unwrap_or(0),
        }
    }
}

/// Size class table following a geometric progression.
///
/// Bins 0-7: 16-byte increments (16, 32, 48, 64, 80, 96, 112, 128)
/// Bins 8-15: 32-byte increments (160, 192, 224, 256, 288, 320, 352, 384)
/// Bins 16-23: wider steps (448 .. 1536)
/// Bins 24-31: 2KB up to 32KB
const SIZE_TABLE: [usize; NUM_SIZE_CLASSES] = [
    16, 32, 48, 64, 80, 96, 112, 128, // 16-byte steps
    160, 192, 224, 256, 288, 320, 352, 384, // 32-byte steps
    448, 512, 640, 768, 896, 1024, 1280, 1536, // wider steps
    2048, 2560, 3072, 4096, 8192, 16384, 24576, 32768, // large small classes
];

/// Sizes up to this bound resolve through [`GRANULE_LOOKUP`].
const LOOKUP_LIMIT: usize = 1024;

const GRANULE_SHIFT: u32 = 4;

const LOOKUP_LEN: usize = (LOOKUP_LIMIT >> GRANULE_SHIFT) + 1;

/// Bin index for every 16-byte granule up to [`LOOKUP_LIMIT`].
const GRANULE_LOOKUP: [u8; LOOKUP_LEN] = build_granule_lookup();

const fn build_granule_lookup() -> [u8; LOOKUP_LEN] {
    let mut table = [0u8; LOOKUP_LEN];
    let mut granule = 0;
    let mut class = 0;
    while granule < LOOKUP_LEN {
        let size = granule << GRANULE_SHIFT;
        while SIZE_TABLE[class] < size {
            class += 1;
        }
        table[granule] = class as u8;
        granule += 1;
    }
    table
}

/// Computes the bin index for a given allocation size.
///
/// Rounds `size` up to the nearest size class boundary and returns
/// the corresponding bin index. Zero maps to the smallest class. Sizes above
/// `MAX_SMALL_SIZE` return `NUM_SIZE_CLASSES` to signal the large-allocation path.
#[inline]
pub fn bin_index(size: usize) -> usize {
    if size > MAX_SMALL_SIZE {
        return NUM_SIZE_CLASSES;
    }
    if size <= LOOKUP_LIMIT {
        let granule = (size + (1 << GRANULE_SHIFT) - 1) >> GRANULE_SHIFT;
        return GRANULE_LOOKUP[granule] as usize;
    }
    SIZE_TABLE.partition_point(|&class_size| class_size < size)
}

/// Returns the allocation size for a given bin index.
///
/// This is the usable number of bytes behind every block in this bin.
/// Returns 0 for out-of-range indices.
#[inline]
pub fn bin_size(index: usize) -> usize {
    if index < NUM_SIZE_CLASSES {
        SIZE_TABLE[index]
    } else {
        0
    }
}

/// Distance between two consecutive blocks of bin `index`, header included.
#[inline]
pub fn block_stride(index: usize) -> usize {
    bin_size(index) + HEADER_SIZE
}

/// Bytes mapped for one slab of bin `index`, rounded to whole pages.
pub fn slab_bytes(index: usize) -> usize {
    let wanted = MIN_SLAB_BYTES.max(block_stride(index) * MIN_BLOCKS_PER_SLAB);
    os::page_align(wanted).unwrap_or(wanted)
}

/// Initializes and returns the full table of size classes.
pub fn init_size_classes() -> Vec<SizeClass> {
    (0..NUM_SIZE_CLASSES).map(SizeClass::new).collect()
}
