//! Per-task and per-group heap accounting.
//!
//! Every allocation stamps its chunk with the owning pid and call site, and
//! bumps three counters: the owner's running total, the owner's user group
//! (if any) and the heap-wide total. Each counter keeps its own peak.
//!
//! Accounting is best effort. A task that exited between allocation and
//! accounting simply isn't charged.

use crate::config::{
    CONFIG_MAX_TASKS, HEAPINFO_GROUP_MEMBERS, HEAPINFO_USER_GROUP_NUM, pid_hash,
};
use crate::error::HeapError;
use crate::heap::Heap;
use crate::node::{AllocNode, NodeFlags};
use crate::task::{Pid, Scheduler};
use core::ptr::NonNull;

/// Owner of chunks allocated from interrupt context.
pub const HEAPINFO_INT: Pid = -1;
/// Owner tag of the guard at the start of a region.
pub const HEAPINFO_HEAD_GUARD: Pid = -2;
/// Owner tag of the guard at the end of a region.
pub const HEAPINFO_TAIL_GUARD: Pid = -3;
/// Pid of an `alloc_list` slot no task has claimed since initialization.
pub const HEAPINFO_INIT_INFO: Pid = -4;
/// Pid of an unused group-member slot.
pub const INVALID_PROCESS_ID: Pid = -1;

/// Call-site tag written into guard nodes.
pub const HEAPINFO_GUARD_CALLER: usize = 0xDEAD_DEAD;

/// Accounting of one task, as stored in the pid-hashed `alloc_list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapinfoTcbInfo {
    pub pid: Pid,
    pub curr_alloc_size: usize,
    pub peak_alloc_size: usize,
    /// Allocations minus frees charged to this task.
    pub num_alloc_free: isize,
}

impl HeapinfoTcbInfo {
    const UNCLAIMED: Self = Self::claimed(HEAPINFO_INIT_INFO);

    const fn claimed(pid: Pid) -> Self {
        Self {
            pid,
            curr_alloc_size: 0,
            peak_alloc_size: 0,
            num_alloc_free: 0,
        }
    }
}

/// Running totals of one user group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapinfoGroupInfo {
    pub curr_size: usize,
    pub peak_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeapinfoGroupMember {
    pub pid: Pid,
    pub group: usize,
}

impl HeapinfoGroupMember {
    const EMPTY: Self = Self {
        pid: INVALID_PROCESS_ID,
        group: 0,
    };
}

pub(crate) struct HeapInfo {
    pub total_alloc_size: usize,
    pub peak_alloc_size: usize,
    pub alloc_list: [HeapinfoTcbInfo; CONFIG_MAX_TASKS],
    pub groups: [HeapinfoGroupInfo; HEAPINFO_USER_GROUP_NUM],
    pub group_members: [HeapinfoGroupMember; HEAPINFO_GROUP_MEMBERS],
    /// Task names belonging to each group.
    pub user_groups: &'static [&'static [&'static str]],
}

impl HeapInfo {
    pub(crate) const fn new() -> Self {
        Self {
            total_alloc_size: 0,
            peak_alloc_size: 0,
            alloc_list: [HeapinfoTcbInfo::UNCLAIMED; CONFIG_MAX_TASKS],
            groups: [HeapinfoGroupInfo {
                curr_size: 0,
                peak_size: 0,
            }; HEAPINFO_USER_GROUP_NUM],
            group_members: [HeapinfoGroupMember::EMPTY; HEAPINFO_GROUP_MEMBERS],
            user_groups: &[],
        }
    }

    /// Tags a fresh allocation with its owner and call site.
    ///
    /// # Safety
    /// `node` must be a valid, allocated chunk header.
    pub(crate) unsafe fn update_node<S: Scheduler + ?Sized>(
        node: *mut AllocNode,
        sched: &S,
        caller: usize,
    ) {
        let pid = if sched.in_interrupt_context() {
            HEAPINFO_INT
        } else {
            sched.getpid()
        };
        unsafe {
            (*node).alloc_call_addr = caller;
            (*node).pid = pid;
            (*node).flags = NodeFlags::new();
        }
    }

    /// # Safety
    /// `node` must be a guard header written by `add_region`.
    pub(crate) unsafe fn stamp_guard(node: *mut AllocNode, pid: Pid) {
        unsafe {
            (*node).alloc_call_addr = HEAPINFO_GUARD_CALLER;
            (*node).pid = pid;
            (*node).flags = NodeFlags::new();
        }
    }

    pub(crate) fn add_size<S: Scheduler + ?Sized>(&mut self, sched: &S, pid: Pid, size: usize) {
        if pid < 0 || !sched.is_alive(pid) {
            return;
        }
        // A slot owned by another live task is never taken over; `pid` then
        // goes uncharged here, like its frees below.
        let slot = &mut self.alloc_list[pid_hash(pid)];
        if slot.pid == pid || !Self::owned_by_live(sched, slot.pid) {
            if slot.pid != pid {
                *slot = HeapinfoTcbInfo::claimed(pid);
            }
            slot.curr_alloc_size += size;
            slot.num_alloc_free += 1;
            slot.peak_alloc_size = slot.peak_alloc_size.max(slot.curr_alloc_size);
        }

        if let Some(group) = self.group_of(pid) {
            let info = &mut self.groups[group];
            info.curr_size += size;
            info.peak_size = info.peak_size.max(info.curr_size);
        }
    }

    pub(crate) fn subtract_size<S: Scheduler + ?Sized>(
        &mut self,
        sched: &S,
        pid: Pid,
        size: usize,
    ) {
        if pid < 0 || !sched.is_alive(pid) {
            return;
        }
        let slot = &mut self.alloc_list[pid_hash(pid)];
        if slot.pid == pid {
            slot.curr_alloc_size = slot.curr_alloc_size.saturating_sub(size);
            slot.num_alloc_free -= 1;
        }

        if let Some(group) = self.group_of(pid) {
            let info = &mut self.groups[group];
            info.curr_size = info.curr_size.saturating_sub(size);
        }
    }

    /// Zeroes the counters of `pid`. A slot held by another pid is left as is.
    pub(crate) fn reset_task(&mut self, pid: Pid) {
        if pid < 0 {
            return;
        }
        let slot = &mut self.alloc_list[pid_hash(pid)];
        if slot.pid == pid {
            *slot = HeapinfoTcbInfo::claimed(pid);
        }
    }

    fn owned_by_live<S: Scheduler + ?Sized>(sched: &S, owner: Pid) -> bool {
        owner >= 0 && sched.is_alive(owner)
    }

    pub(crate) fn update_total_size(&mut self, delta: isize) {
        self.total_alloc_size = self.total_alloc_size.saturating_add_signed(delta);
        self.peak_alloc_size = self.peak_alloc_size.max(self.total_alloc_size);
    }

    pub(crate) fn set_user_groups(
        &mut self,
        groups: &'static [&'static [&'static str]],
    ) -> Result<(), HeapError> {
        if groups.len() > HEAPINFO_USER_GROUP_NUM {
            return Err(HeapError::TooManyGroups(groups.len()));
        }
        self.user_groups = groups;
        self.groups = [HeapinfoGroupInfo::default(); HEAPINFO_USER_GROUP_NUM];
        self.group_members = [HeapinfoGroupMember::EMPTY; HEAPINFO_GROUP_MEMBERS];
        Ok(())
    }

    /// Registers `pid` as a member of the first group listing `name`.
    pub(crate) fn check_group_list(&mut self, pid: Pid, name: &str) {
        let Some(group) = self
            .user_groups
            .iter()
            .position(|members| members.contains(&name))
        else {
            return;
        };
        let slot = match self.group_members.iter().position(|m| m.pid == pid) {
            Some(ndx) => Some(ndx),
            None => self
                .group_members
                .iter()
                .position(|m| m.pid == INVALID_PROCESS_ID),
        };
        if let Some(ndx) = slot {
            self.group_members[ndx] = HeapinfoGroupMember { pid, group };
        }
    }

    pub(crate) fn delete_group_list(&mut self, pid: Pid) {
        for slot in &mut self.group_members {
            if slot.pid == pid {
                *slot = HeapinfoGroupMember::EMPTY;
            }
        }
    }

    pub(crate) fn group_of(&self, pid: Pid) -> Option<usize> {
        if pid < 0 {
            return None;
        }
        self.group_members
            .iter()
            .find(|m| m.pid == pid)
            .map(|m| m.group)
    }

    /// Claimed accounting slot of `pid`, if any.
    pub(crate) fn task(&self, pid: Pid) -> Option<&HeapinfoTcbInfo> {
        if pid < 0 {
            return None;
        }
        let slot = &self.alloc_list[pid_hash(pid)];
        (slot.pid == pid).then_some(slot)
    }
}

impl Heap {
    /// Charges `size` bytes to `pid`. Dead or sentinel pids are ignored.
    pub fn heapinfo_add_size<S: Scheduler + ?Sized>(&self, sched: &S, pid: Pid, size: usize) {
        self.state.lock().info.add_size(sched, pid, size);
    }

    /// Releases `size` bytes from `pid`. Dead or unknown pids are ignored.
    pub fn heapinfo_subtract_size<S: Scheduler + ?Sized>(&self, sched: &S, pid: Pid, size: usize) {
        self.state.lock().info.subtract_size(sched, pid, size);
    }

    /// Moves the heap-wide total by `delta` bytes and advances its peak.
    pub fn heapinfo_update_total_size(&self, delta: isize) {
        self.state.lock().info.update_total_size(delta);
    }

    /// Starts `pid` over with empty counters.
    ///
    /// Called when a task is created, so a reused pid doesn't inherit what
    /// its previous owner left behind.
    pub fn heapinfo_reset_task(&self, pid: Pid) {
        self.state.lock().info.reset_task(pid);
    }

    /// Accounting slot currently held by `pid`.
    #[must_use]
    pub fn heapinfo_task(&self, pid: Pid) -> Option<HeapinfoTcbInfo> {
        self.state.lock().info.task(pid).copied()
    }

    /// Bytes allocated right now, guard nodes included.
    #[must_use]
    pub fn total_alloc_size(&self) -> usize {
        self.state.lock().info.total_alloc_size
    }

    #[must_use]
    pub fn peak_alloc_size(&self) -> usize {
        self.state.lock().info.peak_alloc_size
    }

    /// Configures the user groups; each entry lists the task names of one group.
    ///
    /// Group totals and memberships start over.
    ///
    /// # Errors
    /// [`HeapError::TooManyGroups`] if more than
    /// [`HEAPINFO_USER_GROUP_NUM`] groups are given.
    pub fn set_user_groups(
        &self,
        groups: &'static [&'static [&'static str]],
    ) -> Result<(), HeapError> {
        self.state.lock().info.set_user_groups(groups)
    }

    #[must_use]
    pub fn heapinfo_group(&self, index: usize) -> Option<HeapinfoGroupInfo> {
        let st = self.state.lock();
        (index < st.info.user_groups.len()).then(|| st.info.groups[index])
    }

    /// Enrolls a newly created task in the group listing its name, if any.
    pub fn heapinfo_check_group_list(&self, pid: Pid, name: &str) {
        self.state.lock().info.check_group_list(pid, name);
    }

    /// Drops the group membership of an exiting task.
    pub fn heapinfo_delete_group_list(&self, pid: Pid) {
        self.state.lock().info.delete_group_list(pid);
    }

    /// Flags the allocation at `mem` as the stack of `owner`.
    ///
    /// The chunk stops counting towards the allocating task and is reported
    /// as `owner`'s stack instead. Marking twice only moves the owner.
    ///
    /// # Safety
    /// `mem` must be a live allocation of this heap.
    pub unsafe fn mark_stack<S: Scheduler + ?Sized>(&self, sched: &S, mem: NonNull<u8>, owner: Pid) {
        let mut st = self.state.lock();
        let node = AllocNode::from_payload(mem.as_ptr());
        unsafe {
            if !(*node).preceding.alloc() {
                return;
            }
            if !(*node).flags.stack() {
                st.info.subtract_size(sched, (*node).pid, (*node).size as usize);
                (*node).flags.set_stack(true);
            }
            (*node).pid = owner;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use kernel_sync::{InterruptControl, SoftInterrupts};

    struct OneLiveTask {
        irq: SoftInterrupts,
        alive: Cell<Pid>,
    }

    impl InterruptControl for OneLiveTask {
        fn save_and_disable(&self) -> bool {
            self.irq.save_and_disable()
        }
        fn enable(&self) {
            self.irq.enable();
        }
        fn enabled(&self) -> bool {
            self.irq.enabled()
        }
    }

    impl Scheduler for OneLiveTask {
        fn getpid(&self) -> Pid {
            self.alive.get()
        }
        fn is_alive(&self, pid: Pid) -> bool {
            pid == self.alive.get()
        }
        fn in_interrupt_context(&self) -> bool {
            false
        }
        fn task_name(&self, _pid: Pid) -> Option<crate::TaskName> {
            None
        }
    }

    fn sched(pid: Pid) -> OneLiveTask {
        OneLiveTask {
            irq: SoftInterrupts::new(),
            alive: Cell::new(pid),
        }
    }

    #[test]
    fn slots_start_unclaimed() {
        let info = HeapInfo::new();
        assert!(info.alloc_list.iter().all(|s| s.pid == HEAPINFO_INIT_INFO));
        assert!(info.group_members.iter().all(|m| m.pid == INVALID_PROCESS_ID));
    }

    #[test]
    fn dead_pid_is_not_charged() {
        let s = sched(3);
        let mut info = HeapInfo::new();
        info.add_size(&s, 3, 64);
        info.add_size(&s, 4, 64);
        info.subtract_size(&s, 4, 64);
        assert_eq!(info.task(3).map(|t| t.curr_alloc_size), Some(64));
        assert!(info.task(4).is_none());
    }

    #[test]
    fn hash_collision_reclaims_slot() {
        let mut info = HeapInfo::new();
        let a = 5;
        let b = a + Pid::try_from(CONFIG_MAX_TASKS).unwrap_or(0);
        info.add_size(&sched(a), a, 100);
        info.add_size(&sched(b), b, 10);
        assert!(info.task(a).is_none());
        assert_eq!(info.task(b).map(|t| t.curr_alloc_size), Some(10));
    }

    struct AllAlive(SoftInterrupts);

    impl InterruptControl for AllAlive {
        fn save_and_disable(&self) -> bool {
            self.0.save_and_disable()
        }
        fn enable(&self) {
            self.0.enable();
        }
        fn enabled(&self) -> bool {
            self.0.enabled()
        }
    }

    impl Scheduler for AllAlive {
        fn getpid(&self) -> Pid {
            0
        }
        fn is_alive(&self, pid: Pid) -> bool {
            pid >= 0
        }
        fn in_interrupt_context(&self) -> bool {
            false
        }
        fn task_name(&self, _pid: Pid) -> Option<crate::TaskName> {
            None
        }
    }

    #[test]
    fn live_owner_keeps_its_slot() {
        let s = AllAlive(SoftInterrupts::new());
        let mut info = HeapInfo::new();
        let a = 5;
        let b = a + Pid::try_from(CONFIG_MAX_TASKS).unwrap_or(0);
        info.add_size(&s, a, 100);
        info.add_size(&s, b, 10);
        info.subtract_size(&s, b, 10);
        assert_eq!(info.task(a).map(|t| t.curr_alloc_size), Some(100));
        assert!(info.task(b).is_none());
    }

    #[test]
    fn reset_gives_a_reused_pid_fresh_counters() {
        let s = sched(5);
        let mut info = HeapInfo::new();
        info.add_size(&s, 5, 1088);
        info.reset_task(5);
        assert_eq!(info.task(5), Some(&HeapinfoTcbInfo::claimed(5)));

        info.add_size(&s, 5, 48);
        info.subtract_size(&s, 5, 48);
        let t = info.task(5).copied();
        assert_eq!(t.map(|t| (t.curr_alloc_size, t.num_alloc_free)), Some((0, 0)));
        assert_eq!(t.map(|t| t.peak_alloc_size), Some(48));
    }

    #[test]
    fn reset_leaves_a_live_neighbour_alone() {
        let s = AllAlive(SoftInterrupts::new());
        let mut info = HeapInfo::new();
        info.add_size(&s, 5, 100);
        info.reset_task(5 + Pid::try_from(CONFIG_MAX_TASKS).unwrap_or(0));
        assert_eq!(info.task(5).map(|t| t.curr_alloc_size), Some(100));
    }

    #[test]
    fn interrupt_owner_is_never_charged() {
        let s = sched(1);
        let mut info = HeapInfo::new();
        info.add_size(&s, HEAPINFO_INT, 64);
        assert!(info.alloc_list.iter().all(|t| t.curr_alloc_size == 0));
    }

    #[test]
    fn groups_follow_membership() {
        static GROUPS: &[&[&str]] = &[&["net", "wifi"], &["ui"]];
        let s = sched(9);
        let mut info = HeapInfo::new();
        info.set_user_groups(GROUPS).unwrap();
        info.check_group_list(9, "wifi");
        info.add_size(&s, 9, 128);
        info.subtract_size(&s, 9, 28);
        assert_eq!(
            info.groups[0],
            HeapinfoGroupInfo {
                curr_size: 100,
                peak_size: 128
            }
        );
        info.delete_group_list(9);
        assert_eq!(info.group_of(9), None);
    }

    #[test]
    fn too_many_groups_rejected() {
        const ONE: &[&str] = &["a"];
        static GROUPS: [&[&str]; HEAPINFO_USER_GROUP_NUM + 1] = [ONE; HEAPINFO_USER_GROUP_NUM + 1];
        let mut info = HeapInfo::new();
        assert_eq!(
            info.set_user_groups(&GROUPS),
            Err(HeapError::TooManyGroups(HEAPINFO_USER_GROUP_NUM + 1))
        );
    }
}
