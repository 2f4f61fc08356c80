//! Allocation entry points.
//!
//! All of them lock the heap, so none may be called while a [`Heap::walk`]
//! callback runs.

use crate::heap::{Heap, HeapState};
use crate::node::{AllocNode, FreeNode, MM_MIN_CHUNK_SIZE, Preceding, SIZEOF_ALLOCNODE, chunk_size};
use crate::task::Scheduler;
use core::ptr::{self, NonNull};
use log::warn;

#[cfg(feature = "heapinfo")]
use crate::heapinfo::HeapInfo;

/// Address of the allocating call site.
#[track_caller]
#[inline]
fn caller_addr() -> usize {
    ptr::from_ref(core::panic::Location::caller()).addr()
}

impl HeapState {
    /// Carves a chunk of exactly `size` bytes (already granule-rounded).
    ///
    /// # Safety
    /// Heap lock held; `size` came from [`chunk_size`].
    #[cfg_attr(not(feature = "heapinfo"), allow(unused_variables))]
    unsafe fn allocate<S: Scheduler + ?Sized>(
        &mut self,
        sched: &S,
        size: usize,
        caller: usize,
    ) -> Option<NonNull<u8>> {
        unsafe {
            let node = self.nodelist.take_fit(size)?.cast::<AllocNode>();
            self.split_tail(node, size);
            (*node).preceding = (*node).preceding.with_alloc(true);

            #[cfg(feature = "heapinfo")]
            {
                let size = (*node).size as usize;
                HeapInfo::update_node(node, sched, caller);
                self.info.add_size(sched, (*node).pid, size);
                self.info.update_total_size(size.cast_signed());
            }

            NonNull::new(AllocNode::payload(node))
        }
    }

    /// Cuts `node` down to `keep` bytes and frees the tail when it is large
    /// enough to stand alone. The tail merges with a free successor.
    ///
    /// # Safety
    /// Heap lock held; `node` is not on the free list.
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn split_tail(&mut self, node: *mut AllocNode, keep: usize) {
        unsafe {
            let size = (*node).size as usize;
            if size < keep + MM_MIN_CHUNK_SIZE {
                return;
            }

            let mut rest = size - keep;
            let mut next = AllocNode::next(node);
            if !(*next).preceding.alloc() {
                self.nodelist.remove(next.cast());
                rest += (*next).size as usize;
                next = AllocNode::next(next);
            }

            let tail = node.byte_add(keep).cast::<FreeNode>();
            tail.write(FreeNode::new(rest, Preceding::tag(keep, false)));
            (*next).preceding = (*next).preceding.with_size(rest);
            (*node).size = keep as u32;
            self.nodelist.add(tail);
        }
    }

    /// Returns the chunk at `mem` to the free list, merging with free
    /// neighbours.
    ///
    /// # Safety
    /// Heap lock held; `mem` was returned by this heap.
    #[allow(clippy::cast_possible_truncation)]
    #[cfg_attr(not(feature = "heapinfo"), allow(unused_variables))]
    pub(crate) unsafe fn free_chunk<S: Scheduler + ?Sized>(&mut self, sched: &S, mem: *mut u8) {
        unsafe {
            let mut node = AllocNode::from_payload(mem);
            if !(*node).preceding.alloc() {
                warn!("heap: ignoring free of unallocated chunk {mem:p}");
                return;
            }
            let mut size = (*node).size as usize;

            #[cfg(feature = "heapinfo")]
            {
                if !(*node).flags.stack() {
                    self.info.subtract_size(sched, (*node).pid, size);
                }
                self.info.update_total_size(-size.cast_signed());
            }

            (*node).preceding = (*node).preceding.with_alloc(false);

            let mut next = AllocNode::next(node);
            if !(*next).preceding.alloc() {
                self.nodelist.remove(next.cast());
                size += (*next).size as usize;
                next = AllocNode::next(next);
            }

            let prev = AllocNode::prev(node);
            if !(*prev).preceding.alloc() {
                self.nodelist.remove(prev.cast());
                size += (*prev).size as usize;
                node = prev;
            }

            (*node).size = size as u32;
            (*next).preceding = (*next).preceding.with_size(size);
            self.nodelist.add(node.cast());
        }
    }
}

impl Heap {
    /// Allocates `size` bytes aligned to the granule.
    ///
    /// Returns `None` for a zero-sized request, when no free chunk fits, or
    /// when called from interrupt context while the heap is locked.
    #[must_use = "dropping the pointer leaks the chunk"]
    #[track_caller]
    pub fn malloc<S: Scheduler + ?Sized>(&self, sched: &S, size: usize) -> Option<NonNull<u8>> {
        let caller = caller_addr();
        let mut st = self.lock_state(sched)?;
        self.drain_delayed(&mut st, sched);
        if size == 0 {
            return None;
        }
        let chunk = chunk_size(size)?;
        unsafe { st.allocate(sched, chunk, caller) }
    }

    /// [`malloc`](Self::malloc), zero-filled.
    #[must_use = "dropping the pointer leaks the chunk"]
    #[track_caller]
    pub fn zalloc<S: Scheduler + ?Sized>(&self, sched: &S, size: usize) -> Option<NonNull<u8>> {
        let mem = self.malloc(sched, size)?;
        unsafe { mem.as_ptr().write_bytes(0, size) };
        Some(mem)
    }

    /// Zero-filled array of `n` elements of `size` bytes.
    #[track_caller]
    pub fn calloc<S: Scheduler + ?Sized>(
        &self,
        sched: &S,
        n: usize,
        size: usize,
    ) -> Option<NonNull<u8>> {
        self.zalloc(sched, n.checked_mul(size)?)
    }

    /// Resizes the allocation at `mem`.
    ///
    /// Shrinks in place, grows in place into a free successor, and otherwise
    /// moves the contents to a fresh chunk. A null `mem` behaves like
    /// [`malloc`](Self::malloc); a zero `size` frees `mem` and returns `None`.
    /// On failure the original allocation is left untouched.
    ///
    /// # Safety
    /// `mem` must be null or a live allocation of this heap.
    #[track_caller]
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn realloc<S: Scheduler + ?Sized>(
        &self,
        sched: &S,
        mem: *mut u8,
        size: usize,
    ) -> Option<NonNull<u8>> {
        if mem.is_null() {
            return self.malloc(sched, size);
        }
        if size == 0 {
            unsafe { self.free(sched, mem) };
            return None;
        }
        let newsize = chunk_size(size)?;

        let oldsize = {
            let mut st = self.lock_state(sched)?;
            unsafe {
                let node = AllocNode::from_payload(mem);
                let oldsize = (*node).size as usize;

                if newsize <= oldsize {
                    st.split_tail(node, newsize);
                    st.account_resize(sched, node, oldsize);
                    return NonNull::new(mem);
                }

                let next = AllocNode::next(node);
                let combined = oldsize + (*next).size as usize;
                if !(*next).preceding.alloc() && combined >= newsize {
                    st.nodelist.remove(next.cast());
                    let after = AllocNode::next(next);
                    (*node).size = combined as u32;
                    (*after).preceding = (*after).preceding.with_size(combined);
                    st.split_tail(node, newsize);
                    st.account_resize(sched, node, oldsize);
                    return NonNull::new(mem);
                }
                oldsize
            }
        };

        let new = self.malloc(sched, size)?;
        unsafe {
            ptr::copy_nonoverlapping(mem, new.as_ptr(), oldsize - SIZEOF_ALLOCNODE);
            self.free(sched, mem);
        }
        Some(new)
    }

    /// Releases the allocation at `mem`; null is ignored.
    ///
    /// From interrupt context, a free that finds the heap locked is parked on
    /// the CPU's delayed list and performed by the next allocation or walk.
    ///
    /// # Safety
    /// `mem` must be null or a live allocation of this heap.
    pub unsafe fn free<S: Scheduler + ?Sized>(&self, sched: &S, mem: *mut u8) {
        if mem.is_null() {
            return;
        }
        match self.lock_state(sched) {
            Some(mut st) => unsafe { st.free_chunk(sched, mem) },
            None => self.add_delaylist(sched, mem),
        }
    }

    /// Payload bytes usable in the allocation at `mem`.
    ///
    /// # Safety
    /// `mem` must be a live allocation of this heap.
    #[must_use]
    pub unsafe fn usable_size(mem: NonNull<u8>) -> usize {
        unsafe { (*AllocNode::from_payload(mem.as_ptr())).size as usize - SIZEOF_ALLOCNODE }
    }
}

impl HeapState {
    /// Moves the accounting of `node` from `oldsize` to its current size.
    #[cfg_attr(not(feature = "heapinfo"), allow(unused_variables))]
    unsafe fn account_resize<S: Scheduler + ?Sized>(
        &mut self,
        sched: &S,
        node: *mut AllocNode,
        oldsize: usize,
    ) {
        #[cfg(feature = "heapinfo")]
        unsafe {
            let newsize = (*node).size as usize;
            if !(*node).flags.stack() {
                self.info.subtract_size(sched, (*node).pid, oldsize);
                self.info.add_size(sched, (*node).pid, newsize);
            }
            self.info
                .update_total_size(newsize.cast_signed() - oldsize.cast_signed());
        };
    }
}
