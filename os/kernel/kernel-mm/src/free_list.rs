use crate::node::{FreeNode, MM_MIN_SHIFT, MM_NNODES};
use core::ptr::null_mut;

/// Free chunks bucketed by size class.
///
/// Bucket `n` holds chunks of `2^(n + MM_MIN_SHIFT)` bytes up to twice that;
/// the last bucket takes everything larger. Each bucket is a doubly-linked
/// list kept in ascending size order, so the first node that fits is also
/// the best fit within its bucket.
///
/// # Invariants
/// - Every linked node lies in a region of the owning heap and has its
///   allocation bit clear.
/// - A node must be removed **before** its `size` changes, since the size
///   selects the bucket.
pub(crate) struct FreeNodeList {
    heads: [*mut FreeNode; MM_NNODES],
}

// Safety: only touched while the heap lock is held.
unsafe impl Send for FreeNodeList {}

impl FreeNodeList {
    pub(crate) const fn new() -> Self {
        Self {
            heads: [null_mut(); MM_NNODES],
        }
    }

    /// Size class for a chunk of `size` bytes (`size >= MM_MIN_CHUNK`).
    #[inline]
    pub(crate) const fn bucket(size: usize) -> usize {
        let ndx = (size.ilog2() as usize).saturating_sub(MM_MIN_SHIFT);
        if ndx < MM_NNODES { ndx } else { MM_NNODES - 1 }
    }

    /// Links `node` into its bucket.
    ///
    /// # Safety
    /// `node` must be a valid, currently unlinked free chunk.
    pub(crate) unsafe fn add(&mut self, node: *mut FreeNode) {
        unsafe {
            let size = (*node).size;
            let ndx = Self::bucket(size as usize);

            let mut prev: *mut FreeNode = null_mut();
            let mut next = self.heads[ndx];
            while !next.is_null() && (*next).size < size {
                prev = next;
                next = (*next).flink;
            }

            (*node).flink = next;
            (*node).blink = prev;
            if prev.is_null() {
                self.heads[ndx] = node;
            } else {
                (*prev).flink = node;
            }
            if !next.is_null() {
                (*next).blink = node;
            }
        }
    }

    /// Unlinks `node`.
    ///
    /// # Safety
    /// `node` must currently be linked into this list with an unchanged size.
    pub(crate) unsafe fn remove(&mut self, node: *mut FreeNode) {
        unsafe {
            let ndx = Self::bucket((*node).size as usize);
            let (prev, next) = ((*node).blink, (*node).flink);
            if prev.is_null() {
                self.heads[ndx] = next;
            } else {
                (*prev).flink = next;
            }
            if !next.is_null() {
                (*next).blink = prev;
            }
            (*node).flink = null_mut();
            (*node).blink = null_mut();
        }
    }

    /// Unlinks and returns the first chunk of at least `size` bytes.
    ///
    /// # Safety
    /// The list must satisfy the type invariants.
    pub(crate) unsafe fn take_fit(&mut self, size: usize) -> Option<*mut FreeNode> {
        for ndx in Self::bucket(size)..MM_NNODES {
            let mut node = self.heads[ndx];
            unsafe {
                while !node.is_null() && ((*node).size as usize) < size {
                    node = (*node).flink;
                }
                if !node.is_null() {
                    self.remove(node);
                    return Some(node);
                }
            }
        }
        None
    }

    /// Number of linked chunks.
    pub(crate) fn len(&self) -> usize {
        let mut count = 0;
        for &head in &self.heads {
            let mut node = head;
            while !node.is_null() {
                count += 1;
                node = unsafe { (*node).flink };
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{MM_MIN_CHUNK, Preceding};

    #[repr(C, align(16))]
    struct Slots([FreeNode; 4]);

    fn nodes(sizes: [usize; 4]) -> Slots {
        Slots(sizes.map(|s| FreeNode::new(s, Preceding::new())))
    }

    #[test]
    fn bucket_index_follows_log2() {
        assert_eq!(FreeNodeList::bucket(MM_MIN_CHUNK), 0);
        assert_eq!(FreeNodeList::bucket(31), 0);
        assert_eq!(FreeNodeList::bucket(32), 1);
        assert_eq!(FreeNodeList::bucket(usize::MAX), MM_NNODES - 1);
    }

    #[test]
    fn buckets_are_sorted_and_fit_is_first_large_enough() {
        let mut slots = nodes([112, 80, 96, 64]);
        let mut list = FreeNodeList::new();
        for n in &mut slots.0 {
            unsafe { list.add(n) };
        }
        assert_eq!(list.len(), 4);

        // All four land in the 64..128 class.
        let mut sizes = [0u32; 4];
        let mut node = list.heads[FreeNodeList::bucket(64)];
        for size in &mut sizes {
            unsafe {
                *size = (*node).size;
                node = (*node).flink;
            }
        }
        assert_eq!(sizes, [64, 80, 96, 112]);
        assert!(node.is_null());

        let fit = unsafe { list.take_fit(90) }.expect("fit");
        assert_eq!(unsafe { (*fit).size }, 96);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn take_fit_moves_to_larger_buckets() {
        let mut slots = nodes([64, 64, 64, 1024]);
        let mut list = FreeNodeList::new();
        for n in &mut slots.0 {
            unsafe { list.add(n) };
        }
        let fit = unsafe { list.take_fit(200) }.expect("fit");
        assert_eq!(unsafe { (*fit).size }, 1024);
        assert!(unsafe { list.take_fit(2048) }.is_none());
    }

    #[test]
    fn remove_relinks_neighbours() {
        let mut slots = nodes([80, 96, 112, 64]);
        let mut list = FreeNodeList::new();
        for n in &mut slots.0 {
            unsafe { list.add(n) };
        }
        unsafe { list.remove(&raw mut slots.0[1]) };
        let head = list.heads[FreeNodeList::bucket(64)];
        unsafe {
            let second = (*head).flink;
            assert_eq!((*second).size, 80);
            assert_eq!((*(*second).flink).size, 112);
            assert_eq!((*(*second).flink).blink, second);
        }
        assert_eq!(list.len(), 3);
    }
}
