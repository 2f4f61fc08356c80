//! Boundary-tag node layout.
//!
//! Every chunk of a region, allocated or free, starts with an [`AllocNode`].
//! The `size` of a node reaches the next node and the `preceding` tag reaches
//! back to the previous one, so a region can be walked in both directions
//! without any external index:
//!
//! ```text
//!  heapstart                                                     heapend
//!  +-------+----------------+------------------+-------------+-------+
//!  | guard | AllocNode  ... | FreeNode     ... | AllocNode ..| guard |
//!  +-------+----------------+------------------+-------------+-------+
//!  |<-16-->|<---- size ---->|<------ size ---->|
//! ```
//!
//! A free chunk reuses the diagnostic words of its header for the free-list
//! links, so both headers have the same footprint.

use bitfield_struct::bitfield;
use core::ptr::null_mut;

#[cfg(feature = "heapinfo")]
use crate::task::Pid;

/// log2 of the allocation granule.
pub const MM_MIN_SHIFT: usize = 4;
/// Allocation granule; every chunk size and region bound is a multiple of it.
pub const MM_MIN_CHUNK: usize = 1 << MM_MIN_SHIFT;
pub const MM_GRAN_MASK: usize = MM_MIN_CHUNK - 1;

/// log2 of the largest representable chunk.
pub const MM_MAX_SHIFT: usize = 31;
/// Number of free-list size classes.
pub const MM_NNODES: usize = MM_MAX_SHIFT - MM_MIN_SHIFT + 1;
/// Largest chunk the 32-bit size field can describe.
#[allow(clippy::cast_possible_truncation)]
pub const MM_MAX_CHUNK: usize = u32::MAX as usize & !MM_GRAN_MASK;

/// `preceding` word of every chunk header.
///
/// Stores the size of the physically preceding chunk in granules and the
/// allocation state of the chunk that owns this header.
#[bitfield(u32)]
pub struct Preceding {
    /// Chunk is allocated (bit 0).
    pub alloc: bool,
    #[bits(3)]
    __: u8,
    /// Size of the preceding chunk in granules (bits 4..32).
    #[bits(28)]
    granules: u32,
}

impl Preceding {
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn tag(preceding_size: usize, alloc: bool) -> Self {
        Self::new()
            .with_alloc(alloc)
            .with_granules((preceding_size >> MM_MIN_SHIFT) as u32)
    }

    /// Size of the preceding chunk in bytes.
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        (self.granules() as usize) << MM_MIN_SHIFT
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_size(self, preceding_size: usize) -> Self {
        self.with_granules((preceding_size >> MM_MIN_SHIFT) as u32)
    }
}

/// Per-chunk diagnostic flags.
#[cfg(feature = "heapinfo")]
#[bitfield(u32)]
pub struct NodeFlags {
    /// Chunk is the stack of the task in `pid` (bit 0).
    pub stack: bool,
    #[bits(31)]
    __: u32,
}

/// Header of every chunk.
#[repr(C, align(16))]
#[derive(Debug)]
pub struct AllocNode {
    /// Bytes in this chunk, header included.
    pub size: u32,
    pub preceding: Preceding,
    /// Address of the allocating call site.
    #[cfg(feature = "heapinfo")]
    pub alloc_call_addr: usize,
    /// Owning task, or one of the `HEAPINFO_*` sentinels.
    #[cfg(feature = "heapinfo")]
    pub pid: Pid,
    #[cfg(feature = "heapinfo")]
    pub flags: NodeFlags,
}

/// Header of a free chunk.
#[repr(C, align(16))]
#[derive(Debug)]
pub struct FreeNode {
    pub size: u32,
    pub preceding: Preceding,
    pub flink: *mut FreeNode,
    pub blink: *mut FreeNode,
}

pub const SIZEOF_ALLOCNODE: usize = size_of::<AllocNode>();
pub const SIZEOF_FREENODE: usize = size_of::<FreeNode>();

/// Smallest chunk that can be put back on the free list.
pub const MM_MIN_CHUNK_SIZE: usize = if SIZEOF_FREENODE > SIZEOF_ALLOCNODE {
    SIZEOF_FREENODE
} else {
    SIZEOF_ALLOCNODE
};

/// Smallest aligned span [`Heap::add_region`](crate::Heap::add_region) accepts:
/// two guard nodes around one free chunk.
pub const MM_MIN_REGION_SIZE: usize = 2 * SIZEOF_ALLOCNODE + MM_MIN_CHUNK_SIZE;

const _: () = assert!(SIZEOF_ALLOCNODE % MM_MIN_CHUNK == 0);
const _: () = assert!(MM_MIN_CHUNK_SIZE % MM_MIN_CHUNK == 0);
#[cfg(feature = "heapinfo")]
const _: () = assert!(SIZEOF_FREENODE <= SIZEOF_ALLOCNODE);

/// Rounds `addr` up to the granule. Wraps on overflow so callers can detect it.
#[inline]
#[must_use]
pub const fn mm_align_up(addr: usize) -> usize {
    addr.wrapping_add(MM_GRAN_MASK) & !MM_GRAN_MASK
}

#[inline]
#[must_use]
pub const fn mm_align_down(addr: usize) -> usize {
    addr & !MM_GRAN_MASK
}

/// Chunk size needed to serve a request of `request` payload bytes.
#[must_use]
pub const fn chunk_size(request: usize) -> Option<usize> {
    let Some(raw) = request.checked_add(SIZEOF_ALLOCNODE + MM_GRAN_MASK) else {
        return None;
    };
    let size = mm_align_down(raw);
    let size = if size < MM_MIN_CHUNK_SIZE {
        MM_MIN_CHUNK_SIZE
    } else {
        size
    };
    if size > MM_MAX_CHUNK {
        None
    } else {
        Some(size)
    }
}

impl AllocNode {
    /// Fresh header with cleared diagnostic fields.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(size: usize, preceding: Preceding) -> Self {
        Self {
            size: size as u32,
            preceding,
            #[cfg(feature = "heapinfo")]
            alloc_call_addr: 0,
            #[cfg(feature = "heapinfo")]
            pid: 0,
            #[cfg(feature = "heapinfo")]
            flags: NodeFlags::new(),
        }
    }

    /// # Safety
    /// `node` must point at a valid header inside a region.
    #[inline]
    pub(crate) const unsafe fn next(node: *mut Self) -> *mut Self {
        unsafe { node.byte_add((*node).size as usize) }
    }

    /// # Safety
    /// `node` must point at a valid header other than a head guard.
    #[inline]
    pub(crate) const unsafe fn prev(node: *mut Self) -> *mut Self {
        unsafe { node.byte_sub((*node).preceding.size()) }
    }

    #[inline]
    pub(crate) const fn payload(node: *mut Self) -> *mut u8 {
        node.wrapping_byte_add(SIZEOF_ALLOCNODE).cast()
    }

    #[inline]
    pub(crate) const fn from_payload(mem: *mut u8) -> *mut Self {
        mem.wrapping_byte_sub(SIZEOF_ALLOCNODE).cast()
    }
}

impl FreeNode {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(size: usize, preceding: Preceding) -> Self {
        Self {
            size: size as u32,
            preceding,
            flink: null_mut(),
            blink: null_mut(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preceding_packs_size_and_alloc_bit() {
        let p = Preceding::tag(0x1230, true);
        assert!(p.alloc());
        assert_eq!(p.size(), 0x1230);
        assert_eq!(p.into_bits() & 1, 1);

        let p = p.with_size(MM_MAX_CHUNK).with_alloc(false);
        assert!(!p.alloc());
        assert_eq!(p.size(), MM_MAX_CHUNK);
    }

    #[test]
    fn chunk_size_rounds_and_bounds() {
        assert_eq!(chunk_size(1), Some(mm_align_up(1 + SIZEOF_ALLOCNODE).max(MM_MIN_CHUNK_SIZE)));
        assert_eq!(chunk_size(MM_MIN_CHUNK).map(|s| s % MM_MIN_CHUNK), Some(0));
        assert!(chunk_size(usize::MAX).is_none());
        assert!(chunk_size(MM_MAX_CHUNK).is_none());
    }

    #[test]
    fn align_up_wraps_on_overflow() {
        assert_eq!(mm_align_up(17), 32);
        assert_eq!(mm_align_up(32), 32);
        assert!(mm_align_up(usize::MAX - 3) < usize::MAX - 3);
        assert_eq!(mm_align_down(31), 16);
    }

    #[test]
    fn headers_are_granule_sized() {
        assert_eq!(SIZEOF_ALLOCNODE % MM_MIN_CHUNK, 0);
        assert!(MM_MIN_CHUNK_SIZE >= SIZEOF_FREENODE);
    }
}
