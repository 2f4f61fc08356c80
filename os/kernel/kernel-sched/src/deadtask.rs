//! Names of exited tasks.
//!
//! Memory can outlive its owner. To still say who allocated it, the name
//! of every deleted task is kept until a new task reuses its pid:
//!
//! ```text
//!   absent ──(task deleted)──▶ recorded ──(pid reused)──▶ absent
//! ```
//!
//! Two singly-linked lists live in slabs: one node per recorded pid, and
//! one reference-counted node per distinct name, shared by every pid that
//! carried that name. Both are mutated only inside an interrupt-masked
//! critical section.
//!
//! Recording and forgetting are requested from the task create/delete
//! paths but applied later by the low-priority worker
//! ([`DeadTaskRegistry::process_deferred`]), in submission order. A reused
//! pid is therefore always forgotten before it can be recorded again.

use crate::slab::{Handle, Slab};
use crate::work_queue::WorkQueue;
use crate::{DEADTASK_NAME_NODES, DEADTASK_PID_NODES, DEADTASK_QUEUE_DEPTH};
use alloc::vec::Vec;
use kernel_mm::{DeadTaskNames, Pid, TaskName};
use kernel_sync::{InterruptControl, SpinMutex};
use log::{error, trace};

struct DeadPidNode {
    pid: Pid,
    /// Set once the name node is linked; never `None` outside `insert`.
    name: Option<Handle>,
    next: Option<Handle>,
}

struct DeadNameNode {
    name: TaskName,
    ref_cnt: usize,
    next: Option<Handle>,
}

/// Deferred registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadTaskWork {
    Insert { pid: Pid, name: TaskName },
    Remove { pid: Pid },
}

struct DeadTaskLists {
    pids: Slab<DeadPidNode>,
    names: Slab<DeadNameNode>,
    pid_head: Option<Handle>,
    name_head: Option<Handle>,
}

impl DeadTaskLists {
    fn find_pid(&self, pid: Pid) -> Option<&DeadPidNode> {
        let mut cursor = self.pid_head;
        while let Some(h) = cursor {
            let node = self.pids.get(h)?;
            if node.pid == pid {
                return Some(node);
            }
            cursor = node.next;
        }
        None
    }

    fn find_name(&self, name: &TaskName) -> Option<Handle> {
        let mut cursor = self.name_head;
        while let Some(h) = cursor {
            let node = self.names.get(h)?;
            if node.name == *name {
                return Some(h);
            }
            cursor = node.next;
        }
        None
    }

    /// Unlinks `target` from the pid list and frees it.
    fn unlink_pid(&mut self, target: Handle) -> Option<DeadPidNode> {
        let next = self.pids.get(target)?.next;
        if self.pid_head == Some(target) {
            self.pid_head = next;
        } else {
            let mut cursor = self.pid_head;
            while let Some(h) = cursor {
                let node = self.pids.get_mut(h)?;
                if node.next == Some(target) {
                    node.next = next;
                    break;
                }
                cursor = node.next;
            }
        }
        self.pids.remove(target)
    }

    fn unlink_name(&mut self, target: Handle) -> Option<DeadNameNode> {
        let next = self.names.get(target)?.next;
        if self.name_head == Some(target) {
            self.name_head = next;
        } else {
            let mut cursor = self.name_head;
            while let Some(h) = cursor {
                let node = self.names.get_mut(h)?;
                if node.next == Some(target) {
                    node.next = next;
                    break;
                }
                cursor = node.next;
            }
        }
        self.names.remove(target)
    }

    fn insert(&mut self, pid: Pid, name: TaskName) {
        let node = match self.pids.insert(DeadPidNode {
            pid,
            name: None,
            next: self.pid_head,
        }) {
            Ok(h) => h,
            Err(e) => {
                error!("deadtask: cannot record pid {pid}: {e}");
                return;
            }
        };
        self.pid_head = Some(node);

        let name_node = if let Some(h) = self.find_name(&name) {
            if let Some(n) = self.names.get_mut(h) {
                n.ref_cnt += 1;
            }
            h
        } else {
            match self.names.insert(DeadNameNode {
                name,
                ref_cnt: 1,
                next: self.name_head,
            }) {
                Ok(h) => {
                    self.name_head = Some(h);
                    h
                }
                Err(e) => {
                    self.unlink_pid(node);
                    error!("deadtask: cannot record name of pid {pid}: {e}");
                    return;
                }
            }
        };

        if let Some(n) = self.pids.get_mut(node) {
            n.name = Some(name_node);
        }
        trace!("deadtask: recorded pid {pid} as {name}");
    }

    fn remove(&mut self, pid: Pid) {
        let mut cursor = self.pid_head;
        let target = loop {
            let Some(h) = cursor else {
                return;
            };
            let Some(node) = self.pids.get(h) else {
                return;
            };
            if node.pid == pid {
                break h;
            }
            cursor = node.next;
        };

        let Some(node) = self.unlink_pid(target) else {
            return;
        };
        if let Some(name) = node.name {
            let orphaned = self.names.get_mut(name).is_some_and(|n| {
                n.ref_cnt -= 1;
                n.ref_cnt == 0
            });
            if orphaned {
                self.unlink_name(name);
            }
        }
        trace!("deadtask: forgot pid {pid}");
    }
}

/// Pid to name records of exited tasks.
pub struct DeadTaskRegistry<I: InterruptControl> {
    irq: I,
    lists: SpinMutex<DeadTaskLists>,
    work: WorkQueue<DeadTaskWork>,
}

impl<I: InterruptControl> DeadTaskRegistry<I> {
    /// A registry sized with the default node and queue capacities.
    #[must_use]
    pub fn new(irq: I) -> Self {
        Self::with_capacity(
            irq,
            DEADTASK_PID_NODES,
            DEADTASK_NAME_NODES,
            DEADTASK_QUEUE_DEPTH,
        )
    }

    #[must_use]
    pub fn with_capacity(irq: I, pid_nodes: usize, name_nodes: usize, queue_depth: usize) -> Self {
        Self {
            irq,
            lists: SpinMutex::new(DeadTaskLists {
                pids: Slab::with_capacity(pid_nodes),
                names: Slab::with_capacity(name_nodes),
                pid_head: None,
                name_head: None,
            }),
            work: WorkQueue::with_capacity(queue_depth),
        }
    }

    /// Requests that `pid` be remembered as `name`.
    ///
    /// Called on the task deletion path; returns without touching the
    /// lists. If the request can't be queued the record is lost and only
    /// logged.
    pub fn save_dead_task_info(&self, pid: Pid, name: &str) {
        let name = TaskName::new(name);
        if let Err(e) = self.work.queue(DeadTaskWork::Insert { pid, name }) {
            error!("deadtask: dropping record of pid {pid} ({name}): {e}");
        }
    }

    /// Requests that any record of `pid` be forgotten.
    ///
    /// Called whenever a task is created so a reused pid never resolves to
    /// the name of its previous owner.
    pub fn remove_dead_task_info(&self, pid: Pid) {
        if let Err(e) = self.work.queue(DeadTaskWork::Remove { pid }) {
            error!("deadtask: dropping removal of pid {pid}: {e}");
        }
    }

    /// Applies every queued request, oldest first. Returns how many ran.
    ///
    /// This is the body of the low-priority worker. Each request runs in its
    /// own critical section.
    pub fn process_deferred(&self) -> usize {
        self.work.process(|work| self.apply(work))
    }

    fn apply(&self, work: DeadTaskWork) {
        let mut lists = self.lists.lock_irq(&self.irq);
        match work {
            DeadTaskWork::Insert { pid, name } => lists.insert(pid, name),
            DeadTaskWork::Remove { pid } => lists.remove(pid),
        }
    }

    /// Recorded name of `pid`, or [`TaskName::NOT_AVAILABLE`].
    ///
    /// The name is copied out inside the critical section.
    #[must_use]
    pub fn get_dead_task_name(&self, pid: Pid) -> TaskName {
        self.dead_task_name(pid).unwrap_or(TaskName::NOT_AVAILABLE)
    }

    /// Number of requests waiting for the worker.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.work.pending()
    }

    /// Recorded pids, most recent first.
    #[must_use]
    pub fn recorded_pids(&self) -> Vec<Pid> {
        let lists = self.lists.lock_irq(&self.irq);
        let mut pids = Vec::with_capacity(lists.pids.len());
        let mut cursor = lists.pid_head;
        while let Some(node) = cursor.and_then(|h| lists.pids.get(h)) {
            pids.push(node.pid);
            cursor = node.next;
        }
        pids
    }

    /// Number of pids sharing the name node for `name`, if one exists.
    #[must_use]
    pub fn name_ref_count(&self, name: &str) -> Option<usize> {
        let lists = self.lists.lock_irq(&self.irq);
        let h = lists.find_name(&TaskName::new(name))?;
        lists.names.get(h).map(|n| n.ref_cnt)
    }

    /// Allocated name nodes.
    #[must_use]
    pub fn name_nodes(&self) -> usize {
        self.lists.lock_irq(&self.irq).names.len()
    }
}

impl<I: InterruptControl> DeadTaskNames for DeadTaskRegistry<I> {
    fn dead_task_name(&self, pid: Pid) -> Option<TaskName> {
        let lists = self.lists.lock_irq(&self.irq);
        let node = lists.find_pid(pid)?;
        lists.names.get(node.name?).map(|n| n.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_sync::SoftInterrupts;

    fn registry() -> DeadTaskRegistry<SoftInterrupts> {
        DeadTaskRegistry::new(SoftInterrupts::new())
    }

    #[test]
    fn nothing_happens_until_processed() {
        let reg = registry();
        reg.save_dead_task_info(7, "alpha");
        assert_eq!(reg.pending(), 1);
        assert_eq!(reg.get_dead_task_name(7), TaskName::NOT_AVAILABLE);
        assert_eq!(reg.process_deferred(), 1);
        assert_eq!(reg.get_dead_task_name(7).as_str(), "alpha");
    }

    #[test]
    fn removing_unknown_pid_is_a_no_op() {
        let reg = registry();
        reg.save_dead_task_info(1, "a");
        reg.remove_dead_task_info(99);
        reg.process_deferred();
        assert_eq!(reg.recorded_pids(), [1]);
    }

    #[test]
    fn middle_of_list_unlinks_cleanly() {
        let reg = registry();
        for (pid, name) in [(1, "a"), (2, "b"), (3, "c")] {
            reg.save_dead_task_info(pid, name);
        }
        reg.remove_dead_task_info(2);
        reg.process_deferred();
        assert_eq!(reg.recorded_pids(), [3, 1]);
        assert_eq!(reg.name_ref_count("b"), None);
        assert_eq!(reg.name_nodes(), 2);
    }

    #[test]
    fn critical_sections_restore_interrupts() {
        let reg = registry();
        reg.save_dead_task_info(4, "x");
        reg.process_deferred();
        let _ = reg.get_dead_task_name(4);
        assert!(reg.irq.enabled());
        assert!(reg.irq.sections_entered() >= 2);
    }
}
