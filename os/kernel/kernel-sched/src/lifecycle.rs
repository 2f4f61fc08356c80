use crate::deadtask::DeadTaskRegistry;
use kernel_mm::{DeadTaskNames, Heap, HeapError, HeapinfoMode, HeapinfoReport, Pid, Scheduler};
use kernel_sync::InterruptControl;
use log::debug;

/// Task create/delete hooks that keep heap accounting and the dead-task
/// registry in step with the scheduler.
pub struct TaskLifecycle<'a, I: InterruptControl> {
    heap: &'a Heap,
    registry: &'a DeadTaskRegistry<I>,
}

impl<'a, I: InterruptControl> TaskLifecycle<'a, I> {
    #[must_use]
    pub const fn new(heap: &'a Heap, registry: &'a DeadTaskRegistry<I>) -> Self {
        Self { heap, registry }
    }

    /// A new task got `pid`; any previous owner's record and counters are
    /// dropped.
    pub fn task_created(&self, pid: Pid, name: &str) {
        debug!("task {pid} ({name}) created");
        self.registry.remove_dead_task_info(pid);
        self.heap.heapinfo_reset_task(pid);
        self.heap.heapinfo_check_group_list(pid, name);
    }

    /// Task `pid` exited; its name is kept for the memory it leaves behind.
    pub fn task_deleted(&self, pid: Pid, name: &str) {
        debug!("task {pid} ({name}) deleted");
        self.heap.heapinfo_delete_group_list(pid);
        self.registry.save_dead_task_info(pid, name);
    }

    /// Walks the heap, naming dead owners from the registry.
    ///
    /// # Errors
    /// Propagates [`HeapError::Corrupted`] from the walk.
    pub fn heapinfo_parse<S: Scheduler + ?Sized>(
        &self,
        sched: &S,
        mode: HeapinfoMode,
        pid: Option<Pid>,
    ) -> Result<HeapinfoReport, HeapError> {
        let dead: &dyn DeadTaskNames = self.registry;
        self.heap.heapinfo_parse(sched, mode, pid, Some(dead))
    }

    #[must_use]
    pub const fn registry(&self) -> &'a DeadTaskRegistry<I> {
        self.registry
    }
}
