use crate::config::{CONFIG_MM_REGIONS, CONFIG_SMP_NCPUS};
use crate::error::HeapError;
use crate::free_list::FreeNodeList;
use crate::node::{
    AllocNode, FreeNode, MM_MAX_CHUNK, MM_MIN_REGION_SIZE, Preceding, SIZEOF_ALLOCNODE,
    mm_align_down, mm_align_up,
};
use crate::task::Scheduler;
use core::ptr::null_mut;
use kernel_sync::{MutexGuard, RawSpin, SpinMutex};
use log::{debug, warn};

#[cfg(feature = "heapinfo")]
use crate::heapinfo::{HEAPINFO_HEAD_GUARD, HEAPINFO_TAIL_GUARD, HeapInfo};
#[cfg(feature = "heapinfo")]
use crate::task::Pid;

/// One contiguous span of managed memory, bounded by two guard nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapRegion {
    pub start: *mut AllocNode,
    pub end: *mut AllocNode,
}

impl HeapRegion {
    const EMPTY: Self = Self {
        start: null_mut(),
        end: null_mut(),
    };

    /// Bytes covered by the region, guards included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.end.addr() + SIZEOF_ALLOCNODE - self.start.addr()
    }
}

/// Snapshot of one chunk header, as seen by [`Heap::walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeView {
    pub addr: usize,
    pub size: usize,
    pub allocated: bool,
    #[cfg(feature = "heapinfo")]
    pub pid: Pid,
    #[cfg(feature = "heapinfo")]
    pub caller: usize,
    #[cfg(feature = "heapinfo")]
    pub stack: bool,
}

impl NodeView {
    /// # Safety
    /// `node` must point at a valid header.
    unsafe fn read(node: *mut AllocNode) -> Self {
        unsafe {
            let allocated = (*node).preceding.alloc();
            Self {
                addr: node.addr(),
                size: (*node).size as usize,
                allocated,
                #[cfg(feature = "heapinfo")]
                pid: (*node).pid,
                #[cfg(feature = "heapinfo")]
                caller: (*node).alloc_call_addr,
                #[cfg(feature = "heapinfo")]
                stack: allocated && (*node).flags.stack(),
            }
        }
    }

    /// Guard nodes are allocated, header-sized and pinned to region bounds.
    #[cfg(feature = "heapinfo")]
    #[must_use]
    pub const fn is_guard(&self) -> bool {
        self.allocated && matches!(self.pid, HEAPINFO_HEAD_GUARD | HEAPINFO_TAIL_GUARD)
    }
}

/// Everything guarded by the heap lock.
pub(crate) struct HeapState {
    pub heapsize: usize,
    pub regions: [HeapRegion; CONFIG_MM_REGIONS],
    pub nregions: usize,
    pub nodelist: FreeNodeList,
    #[cfg(feature = "heapinfo")]
    pub info: HeapInfo,
}

// Safety: the raw pointers refer into regions handed over to the heap and
// are only dereferenced while the heap lock is held.
unsafe impl Send for HeapState {}

impl HeapState {
    const fn new() -> Self {
        Self {
            heapsize: 0,
            regions: [HeapRegion::EMPTY; CONFIG_MM_REGIONS],
            nregions: 0,
            nodelist: FreeNodeList::new(),
            #[cfg(feature = "heapinfo")]
            info: HeapInfo::new(),
        }
    }

    pub(crate) fn regions(&self) -> &[HeapRegion] {
        &self.regions[..self.nregions]
    }
}

/// Frees parked by interrupt handlers that found the heap locked.
///
/// The link lives in the payload of the parked chunk.
pub(crate) struct DelayList {
    head: *mut DelayNode,
}

struct DelayNode {
    next: *mut DelayNode,
}

// Safety: only touched under the delay-list lock with interrupts masked.
unsafe impl Send for DelayList {}

impl DelayList {
    const EMPTY: Self = Self { head: null_mut() };
}

/// A boundary-tag heap over up to [`CONFIG_MM_REGIONS`] regions.
///
/// The heap is a plain value; the kernel keeps a single instance (usually
/// a `static`) and passes it by reference together with the scheduler
/// capability.
pub struct Heap {
    pub(crate) state: SpinMutex<HeapState>,
    pub(crate) delaylist: SpinMutex<[DelayList; CONFIG_SMP_NCPUS]>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    /// An empty heap; call [`initialize`](Self::initialize) before use.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SpinMutex::new(HeapState::new()),
            delaylist: SpinMutex::new([DelayList::EMPTY; CONFIG_SMP_NCPUS]),
        }
    }

    /// Resets all heap state and adds the first region.
    ///
    /// Every accounting slot is set back to its "unclaimed" sentinel, so no
    /// statistics survive a re-initialization.
    ///
    /// # Errors
    /// Propagates the failure of [`add_region`](Self::add_region); the heap
    /// must not be used afterwards.
    ///
    /// # Safety
    /// See [`add_region`](Self::add_region). Any memory previously handed to
    /// this heap is forgotten.
    pub unsafe fn initialize(&self, start: *mut u8, size: usize) -> Result<(), HeapError> {
        debug!("heap: initialize at {start:p}, {size} bytes");
        *self.state.lock() = HeapState::new();
        *self.delaylist.lock() = [DelayList::EMPTY; CONFIG_SMP_NCPUS];
        unsafe { self.add_region(start, size) }
    }

    /// Hands `[start, start + size)` to the heap as a new region.
    ///
    /// The span is shrunk to the allocation granule, bracketed with two
    /// permanently allocated guard nodes and the remainder is linked into the
    /// free list as one chunk.
    ///
    /// # Errors
    /// Any [`HeapError`] argument variant. On error the heap is unchanged.
    ///
    /// # Safety
    /// The memory must be valid for reads and writes, must not be used by
    /// anything else and must outlive the heap.
    pub unsafe fn add_region(&self, start: *mut u8, size: usize) -> Result<(), HeapError> {
        let mut st = self.state.lock();
        let res = unsafe { Self::add_region_locked(&mut st, start, size) };
        if let Err(e) = res {
            warn!("heap: rejecting region {start:p}+{size}: {e}");
        }
        res
    }

    unsafe fn add_region_locked(
        st: &mut HeapState,
        start: *mut u8,
        size: usize,
    ) -> Result<(), HeapError> {
        if start.is_null() {
            return Err(HeapError::NullStart);
        }
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }
        if st.nregions >= CONFIG_MM_REGIONS {
            return Err(HeapError::TooManyRegions(st.nregions));
        }

        let raw = start.addr();
        let base = mm_align_up(raw);
        if base < raw {
            return Err(HeapError::AlignmentOverflow { start: raw });
        }
        let end = raw
            .checked_add(size)
            .map(mm_align_down)
            .ok_or(HeapError::AlignmentOverflow { start: raw })?;
        let heapsize = end.saturating_sub(base);
        if heapsize < MM_MIN_REGION_SIZE {
            return Err(HeapError::RegionTooSmall { size: heapsize });
        }
        if heapsize > MM_MAX_CHUNK {
            return Err(HeapError::RegionTooLarge { size: heapsize });
        }

        let free_size = heapsize - 2 * SIZEOF_ALLOCNODE;
        unsafe {
            let heapstart = start.byte_add(base - raw).cast::<AllocNode>();
            heapstart.write(AllocNode::new(SIZEOF_ALLOCNODE, Preceding::tag(0, true)));

            let node = heapstart.byte_add(SIZEOF_ALLOCNODE).cast::<FreeNode>();
            node.write(FreeNode::new(
                free_size,
                Preceding::tag(SIZEOF_ALLOCNODE, false),
            ));

            let heapend = heapstart.byte_add(heapsize - SIZEOF_ALLOCNODE);
            heapend.write(AllocNode::new(SIZEOF_ALLOCNODE, Preceding::tag(free_size, true)));

            #[cfg(feature = "heapinfo")]
            {
                HeapInfo::stamp_guard(heapstart, HEAPINFO_HEAD_GUARD);
                HeapInfo::stamp_guard(heapend, HEAPINFO_TAIL_GUARD);
            }

            st.nodelist.add(node);
            st.regions[st.nregions] = HeapRegion {
                start: heapstart,
                end: heapend,
            };
            debug!(
                "heap: region {} at {heapstart:p}..{heapend:p}, {heapsize} bytes",
                st.nregions
            );
        }
        st.nregions += 1;
        st.heapsize += heapsize;

        #[cfg(feature = "heapinfo")]
        st.info.update_total_size(2 * SIZEOF_ALLOCNODE.cast_signed());

        Ok(())
    }

    /// Sum of all region sizes.
    #[must_use]
    pub fn heapsize(&self) -> usize {
        self.state.lock().heapsize
    }

    #[must_use]
    pub fn nregions(&self) -> usize {
        self.state.lock().nregions
    }

    #[must_use]
    pub fn region(&self, index: usize) -> Option<HeapRegion> {
        self.state.lock().regions().get(index).copied()
    }

    /// Visits every node of every region in address order.
    ///
    /// The heap lock is held for one region at a time and released in
    /// between, so allocations from other tasks can interleave with a long
    /// walk. `f` runs with the lock held and must not call into the heap.
    ///
    /// # Errors
    /// [`HeapError::Corrupted`] when a region's size links don't add up.
    pub fn walk<S, F>(&self, sched: &S, mut f: F) -> Result<(), HeapError>
    where
        S: Scheduler + ?Sized,
        F: FnMut(usize, &NodeView),
    {
        for index in 0..CONFIG_MM_REGIONS {
            let mut st = self.state.lock();
            if index == 0 {
                self.drain_delayed(&mut st, sched);
            }
            let Some(&region) = st.regions().get(index) else {
                break;
            };
            unsafe { walk_region(&region, |node| f(index, &NodeView::read(node)))? };
        }
        Ok(())
    }

    /// Takes the heap lock; from interrupt context only if it is free.
    pub(crate) fn lock_state<S: Scheduler + ?Sized>(
        &self,
        sched: &S,
    ) -> Option<MutexGuard<'_, HeapState, RawSpin>> {
        if sched.in_interrupt_context() {
            self.state.try_lock()
        } else {
            Some(self.state.lock())
        }
    }

    /// Parks `mem` on the calling CPU's delayed free list.
    pub(crate) fn add_delaylist<S: Scheduler + ?Sized>(&self, sched: &S, mem: *mut u8) {
        let cpu = sched.cpu_index() % CONFIG_SMP_NCPUS;
        let mut lists = self.delaylist.lock_irq(sched);
        let node = mem.cast::<DelayNode>();
        unsafe { node.write(DelayNode { next: lists[cpu].head }) };
        lists[cpu].head = node;
    }

    /// Frees everything parked on the calling CPU's delayed list.
    pub(crate) fn drain_delayed<S: Scheduler + ?Sized>(&self, st: &mut HeapState, sched: &S) {
        let cpu = sched.cpu_index() % CONFIG_SMP_NCPUS;
        let mut node = {
            let mut lists = self.delaylist.lock_irq(sched);
            core::mem::replace(&mut lists[cpu].head, null_mut())
        };
        while !node.is_null() {
            let next = unsafe { (*node).next };
            unsafe { st.free_chunk(sched, node.cast()) };
            node = next;
        }
    }

    /// Number of chunks waiting on any delayed free list.
    #[must_use]
    pub fn delayed_frees(&self) -> usize {
        let lists = self.delaylist.lock();
        lists
            .iter()
            .map(|list| {
                let mut count = 0;
                let mut node = list.head;
                while !node.is_null() {
                    count += 1;
                    node = unsafe { (*node).next };
                }
                count
            })
            .sum()
    }
}

/// Walks one region from its head guard to its tail guard via `size` links.
///
/// Every step is bounds-checked: a node smaller than a header, a link past
/// the tail guard or a `preceding` tag that doesn't point back ends the walk
/// with [`HeapError::Corrupted`].
///
/// # Safety
/// `region` must have been produced by [`Heap::add_region`] and the heap
/// lock must be held.
pub(crate) unsafe fn walk_region(
    region: &HeapRegion,
    mut f: impl FnMut(*mut AllocNode),
) -> Result<(), HeapError> {
    let mut node = region.start;
    loop {
        f(node);
        if node == region.end {
            return Ok(());
        }
        let size = unsafe { (*node).size } as usize;
        if size < SIZEOF_ALLOCNODE || size > region.end.addr() - node.addr() {
            return Err(HeapError::Corrupted { addr: node.addr() });
        }
        let next = unsafe { AllocNode::next(node) };
        if unsafe { (*next).preceding.size() } != size {
            return Err(HeapError::Corrupted { addr: next.addr() });
        }
        node = next;
    }
}
