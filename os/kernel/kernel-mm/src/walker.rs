//! Heap-info diagnostics.
//!
//! [`Heap::heapinfo_parse`] walks every region and sorts allocated memory by
//! owner. Memory whose owner has no live task control block ends up in the
//! "non-scheduled" buckets: it may be held by a parent for an exited child,
//! be shared within a group, or simply be leaked. The walker can't tell
//! these apart, so it only reports them.

use crate::config::{CONFIG_MAX_TASKS, pid_hash};
use crate::error::HeapError;
use crate::heap::{Heap, NodeView};
use crate::heapinfo::HEAPINFO_INT;
use crate::task::{DeadTaskNames, Pid, Scheduler, TaskName};
use alloc::string::ToString;
use alloc::vec::Vec;
use core::fmt;
use log::info;

/// How much detail [`Heap::heapinfo_parse`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapinfoMode {
    /// Summary only.
    Simple,
    /// Summary plus one line per allocated node.
    DetailAll,
    /// Like [`DetailAll`](Self::DetailAll), meant with a pid filter.
    /// Without one it lists every allocated node, same as `DetailAll`.
    DetailPid,
    /// Summary plus one line per free node.
    DetailFree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeLine {
    pub addr: usize,
    pub size: usize,
    pub allocated: bool,
    pub stack: bool,
    pub caller: usize,
    pub pid: Pid,
}

impl From<&NodeView> for NodeLine {
    fn from(node: &NodeView) -> Self {
        Self {
            addr: node.addr,
            size: node.size,
            allocated: node.allocated,
            stack: node.stack,
            caller: node.caller,
            pid: node.pid,
        }
    }
}

/// Usage of one live task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskLine {
    pub pid: Pid,
    pub name: TaskName,
    pub curr_alloc_size: usize,
    pub peak_alloc_size: usize,
    pub stack_size: usize,
    pub num_alloc_free: isize,
}

/// Memory of tasks without a live TCB, hashed by `pid & (CONFIG_MAX_TASKS - 1)`.
///
/// Buckets don't chain. `pid` is the first owner seen in the bucket and
/// `collided` is set once a different owner lands in it; `size` always
/// covers every owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonSchedBucket {
    pub index: usize,
    pub pid: Pid,
    pub size: usize,
    pub name: TaskName,
    pub collided: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLine {
    pub index: usize,
    pub members: &'static [&'static str],
    pub curr_size: usize,
    pub peak_size: usize,
    pub stack_size: usize,
}

/// Result of one heap walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapinfoReport {
    pub mode: HeapinfoMode,
    pub pid: Option<Pid>,
    pub nodes: Vec<NodeLine>,
    pub heap_size: usize,
    pub current_alloc_size: usize,
    pub peak_alloc_size: usize,
    pub free_size: usize,
    pub largest_free: usize,
    pub free_nodes: usize,
    pub interrupt_alloc_size: usize,
    pub tasks: Vec<TaskLine>,
    pub nonsched: Vec<NonSchedBucket>,
    pub groups: Vec<GroupLine>,
}

#[derive(Clone, Copy)]
struct Bucket {
    pid: Pid,
    size: usize,
    collided: bool,
}

impl Bucket {
    const EMPTY: Self = Self {
        pid: 0,
        size: 0,
        collided: false,
    };
}

impl Heap {
    /// Walks the heap and builds a [`HeapinfoReport`].
    ///
    /// `pid` restricts node lines and attribution to one owner. `dead` names
    /// the owners of non-scheduled memory; without it they show as `NA`.
    /// The heap lock is taken once per region, never for the whole walk.
    ///
    /// # Errors
    /// [`HeapError::Corrupted`] if a region can't be walked.
    pub fn heapinfo_parse<S: Scheduler + ?Sized>(
        &self,
        sched: &S,
        mode: HeapinfoMode,
        pid: Option<Pid>,
        dead: Option<&dyn DeadTaskNames>,
    ) -> Result<HeapinfoReport, HeapError> {
        let mut nodes = Vec::new();
        let (mut free_size, mut largest_free, mut free_nodes) = (0, 0, 0);
        let mut interrupt_alloc_size = 0;
        let mut stacks: Vec<(Pid, usize)> = Vec::new();
        let mut buckets = [Bucket::EMPTY; CONFIG_MAX_TASKS];

        self.walk(sched, |_, node| {
            if !node.allocated {
                free_nodes += 1;
                free_size += node.size;
                largest_free = largest_free.max(node.size);
                if mode == HeapinfoMode::DetailFree {
                    nodes.push(NodeLine::from(node));
                }
                return;
            }
            if node.is_guard() || pid.is_some_and(|p| p != node.pid) {
                return;
            }
            if matches!(mode, HeapinfoMode::DetailAll | HeapinfoMode::DetailPid) {
                nodes.push(NodeLine::from(node));
            }

            if node.pid == HEAPINFO_INT {
                interrupt_alloc_size += node.size;
            } else if !sched.is_alive(node.pid) {
                let bucket = &mut buckets[pid_hash(node.pid)];
                if bucket.size == 0 {
                    bucket.pid = node.pid;
                } else if bucket.pid != node.pid {
                    bucket.collided = true;
                }
                bucket.size += node.size;
            } else if node.stack {
                match stacks.iter_mut().find(|(p, _)| *p == node.pid) {
                    Some((_, size)) => *size += node.size,
                    None => stacks.push((node.pid, node.size)),
                }
            }
        })?;

        let stack_of = |p: Pid| {
            stacks
                .iter()
                .find(|(owner, _)| *owner == p)
                .map_or(0, |&(_, size)| size)
        };

        let st = self.state.lock();
        let mut tasks: Vec<TaskLine> = st
            .info
            .alloc_list
            .iter()
            .filter(|t| t.pid >= 0 && pid.is_none_or(|p| p == t.pid) && sched.is_alive(t.pid))
            .map(|t| TaskLine {
                pid: t.pid,
                name: sched.task_name(t.pid).unwrap_or(TaskName::NOT_AVAILABLE),
                curr_alloc_size: t.curr_alloc_size,
                peak_alloc_size: t.peak_alloc_size,
                stack_size: stack_of(t.pid),
                num_alloc_free: t.num_alloc_free,
            })
            .collect();
        let groups = st
            .info
            .user_groups
            .iter()
            .enumerate()
            .map(|(index, &members)| GroupLine {
                index,
                members,
                curr_size: st.info.groups[index].curr_size,
                peak_size: st.info.groups[index].peak_size,
                stack_size: stacks
                    .iter()
                    .filter(|(p, _)| st.info.group_of(*p) == Some(index))
                    .map(|(_, size)| size)
                    .sum(),
            })
            .collect();
        let (heap_size, current_alloc_size, peak_alloc_size) = (
            st.heapsize,
            st.info.total_alloc_size,
            st.info.peak_alloc_size,
        );
        drop(st);

        // Tasks that own a stack but never allocated themselves.
        for &(p, size) in &stacks {
            if !tasks.iter().any(|t| t.pid == p) {
                tasks.push(TaskLine {
                    pid: p,
                    name: sched.task_name(p).unwrap_or(TaskName::NOT_AVAILABLE),
                    curr_alloc_size: 0,
                    peak_alloc_size: 0,
                    stack_size: size,
                    num_alloc_free: 0,
                });
            }
        }
        tasks.sort_by_key(|t| t.pid);

        let nonsched = buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| b.size > 0)
            .map(|(index, b)| NonSchedBucket {
                index,
                pid: b.pid,
                size: b.size,
                name: dead
                    .and_then(|d| d.dead_task_name(b.pid))
                    .unwrap_or(TaskName::NOT_AVAILABLE),
                collided: b.collided,
            })
            .collect();

        Ok(HeapinfoReport {
            mode,
            pid,
            nodes,
            heap_size,
            current_alloc_size,
            peak_alloc_size,
            free_size,
            largest_free,
            free_nodes,
            interrupt_alloc_size,
            tasks,
            nonsched,
            groups,
        })
    }
}

impl HeapinfoReport {
    #[must_use]
    pub fn task(&self, pid: Pid) -> Option<&TaskLine> {
        self.tasks.iter().find(|t| t.pid == pid)
    }

    #[must_use]
    pub fn nonsched_bucket(&self, index: usize) -> Option<&NonSchedBucket> {
        self.nonsched.iter().find(|b| b.index == index)
    }

    /// Bytes held by owners without a live TCB.
    #[must_use]
    pub fn nonsched_total(&self) -> usize {
        self.nonsched.iter().map(|b| b.size).sum()
    }

    /// Emits the rendered report through the `log` facade, line by line.
    pub fn log(&self) {
        for line in self.to_string().lines() {
            info!("{line}");
        }
    }
}

const RULE: &str = "****************************************************************";

fn percent(part: usize, whole: usize) -> usize {
    if whole == 0 { 0 } else { part * 100 / whole }
}

impl fmt::Display for HeapinfoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.nodes.is_empty() {
            writeln!(f, "{:>18} {:>10} {:>6} {:>18} {:>6}", "Addr", "Size", "Status", "Caller", "Pid")?;
            for n in &self.nodes {
                let status = match (n.allocated, n.stack) {
                    (false, _) => "F",
                    (true, false) => "A",
                    (true, true) => "S",
                };
                if n.allocated {
                    writeln!(
                        f,
                        "{:>#18x} {:>10} {status:>6} {:>#18x} {:>6}",
                        n.addr, n.size, n.caller, n.pid
                    )?;
                } else {
                    writeln!(f, "{:>#18x} {:>10} {status:>6}", n.addr, n.size)?;
                }
            }
        }

        writeln!(f, "{RULE}")?;
        writeln!(f, "     Summary of Heap Usages (Size in Bytes)")?;
        writeln!(f, "{RULE}")?;
        let total = self.heap_size;
        writeln!(f, "Total                           : {total} (100%)")?;
        writeln!(
            f,
            "  - Allocated (Current / Peak)  : {} ({}%) / {} ({}%)",
            self.current_alloc_size,
            percent(self.current_alloc_size, total),
            self.peak_alloc_size,
            percent(self.peak_alloc_size, total),
        )?;
        writeln!(
            f,
            "  - Free (Current)              : {} ({}%)",
            self.free_size,
            percent(self.free_size, total)
        )?;
        writeln!(f, "  - Largest free chunk          : {}", self.largest_free)?;
        writeln!(f, "  - Free nodes                  : {}", self.free_nodes)?;
        writeln!(f, "  - Interrupt allocations       : {}", self.interrupt_alloc_size)?;

        writeln!(f)?;
        writeln!(f, "< Tasks >")?;
        writeln!(
            f,
            "{:>6} {:<width$} {:>10} {:>10} {:>10} {:>10}",
            "Pid",
            "Name",
            "Current",
            "Peak",
            "Stack",
            "Alloc-Free",
            width = crate::config::CONFIG_TASK_NAME_SIZE
        )?;
        for t in &self.tasks {
            writeln!(
                f,
                "{:>6} {:<width$} {:>10} {:>10} {:>10} {:>10}",
                t.pid,
                t.name,
                t.curr_alloc_size,
                t.peak_alloc_size,
                t.stack_size,
                t.num_alloc_free,
                width = crate::config::CONFIG_TASK_NAME_SIZE
            )?;
        }

        if !self.nonsched.is_empty() {
            writeln!(f)?;
            writeln!(f, "< Non-scheduled task resources >")?;
            for b in &self.nonsched {
                write!(f, "{:>6} {:<width$} {:>10}", b.pid, b.name, b.size, width = crate::config::CONFIG_TASK_NAME_SIZE)?;
                if b.collided {
                    write!(f, " (bucket {} shared)", b.index)?;
                }
                writeln!(f)?;
            }
            writeln!(f, "Non-scheduled total : {}", self.nonsched_total())?;
        }

        if !self.groups.is_empty() {
            writeln!(f)?;
            writeln!(f, "< User groups >")?;
            for g in &self.groups {
                writeln!(
                    f,
                    "{:>6} {:>10} {:>10} {:>10}  {}",
                    g.index,
                    g.curr_size,
                    g.peak_size,
                    g.stack_size,
                    g.members.join(",")
                )?;
            }
        }
        Ok(())
    }
}
