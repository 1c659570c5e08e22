//! Block header stored immediately before every payload.
//!
//! The header lets `release` and `resize` recover, from the user pointer
//! alone, whether a block came from a size-class slab or from its own
//! mapping, how many bytes it can hold, and which slab owns it.
//!
//! ```text
//!   small:  | size = class bytes | kind=01 | class (8 bits) | slab id |  payload ...
//!   large:  | size = usable      | kind=10 | offset from mapping base  |  payload ...
//! ```

#![allow(unsafe_code)]

use core::ptr::NonNull;

/// Alignment of every payload handed out by the default entry points.
pub const ALIGNMENT: usize = 16;

/// Bytes reserved in front of each payload.
pub const HEADER_SIZE: usize = core::mem::size_of::<BlockHeader>();

const KIND_MASK: usize = 0b11;
const KIND_SMALL: usize = 0b01;
const KIND_LARGE: usize = 0b10;

const CLASS_SHIFT: u32 = 2;
const CLASS_MASK: usize = 0xff;
const SLAB_SHIFT: u32 = 10;

const LARGE_OFFSET_SHIFT: u32 = 2;

/// Where a block lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Block carved from slab `slab` of size class `class`.
    Small { class: usize, slab: u32 },
    /// Stand-alone mapping; the payload sits `offset` bytes past the mapping base.
    Large { offset: usize },
}

/// Per-block metadata.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    size: usize,
    meta: usize,
}

impl BlockHeader {
    /// Header for a block of class `class` inside slab `slab`.
    #[must_use]
    pub const fn small(class: usize, slab: u32, size: usize) -> Self {
        Self {
            size,
            meta: ((slab as usize) << SLAB_SHIFT)
                | ((class & CLASS_MASK) << CLASS_SHIFT)
                | KIND_SMALL,
        }
    }

    /// Header for a payload placed `offset` bytes into its own mapping.
    #[must_use]
    pub const fn large(offset: usize, usable: usize) -> Self {
        Self {
            size: usable,
            meta: (offset << LARGE_OFFSET_SHIFT) | KIND_LARGE,
        }
    }

    /// Decodes the block classification.
    #[must_use]
    pub const fn kind(&self) -> BlockKind {
        if self.meta & KIND_MASK == KIND_LARGE {
            BlockKind::Large {
                offset: self.meta >> LARGE_OFFSET_SHIFT,
            }
        } else {
            BlockKind::Small {
                class: (self.meta >> CLASS_SHIFT) & CLASS_MASK,
                slab: (self.meta >> SLAB_SHIFT) as u32,
            }
        }
    }

    /// Bytes the caller may use behind the payload pointer.
    #[must_use]
    pub const fn usable_size(&self) -> usize {
        self.size
    }

    /// Reads the header in front of `payload`.
    ///
    /// # Safety
    ///
    /// `payload` must be a live pointer previously produced by this allocator.
    #[inline]
    #[must_use]
    pub unsafe fn read(payload: NonNull<u8>) -> Self {
        // SAFETY: every payload is preceded by HEADER_SIZE bytes of header, and
        // payloads are ALIGNMENT-aligned so the header is too.
        unsafe { payload.sub(HEADER_SIZE).cast::<Self>().read() }
    }

    /// Writes `header` in front of `payload`.
    ///
    /// # Safety
    ///
    /// The `HEADER_SIZE` bytes before `payload` must be owned by the allocator
    /// and writable, and `payload` must be `ALIGNMENT`-aligned.
    #[inline]
    pub unsafe fn write(payload: NonNull<u8>, header: Self) {
        // SAFETY: guaranteed by the caller.
        unsafe { payload.sub(HEADER_SIZE).cast::<Self>().write(header) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_one_alignment_unit() {
        assert_eq!(HEADER_SIZE, ALIGNMENT);
        assert_eq!(core::mem::align_of::<BlockHeader>(), ALIGNMENT);
    }

    #[test]
    fn small_header_decodes() {
        let header = BlockHeader::small(31, 0x00ab_cdef, 32768);
        assert_eq!(
            header.kind(),
            BlockKind::Small {
                class: 31,
                slab: 0x00ab_cdef
            }
        );
        assert_eq!(header.usable_size(), 32768);
    }

    #[test]
    fn large_header_decodes() {
        let header = BlockHeader::large(4096, 1 << 20);
        assert_eq!(header.kind(), BlockKind::Large { offset: 4096 });
        assert_eq!(header.usable_size(), 1 << 20);
    }

    #[test]
    fn read_back_written_header() {
        #[repr(C, align(16))]
        struct Backing([u8; 64]);

        let mut backing = Backing([0; 64]);
        let payload = NonNull::new(backing.0.as_mut_ptr().wrapping_add(HEADER_SIZE)).unwrap();
        let header = BlockHeader::small(3, 7, 64);
        // SAFETY: the backing buffer covers header + payload and is 16-aligned.
        unsafe {
            BlockHeader::write(payload, header);
            assert_eq!(BlockHeader::read(payload), header);
        }
    }
}
