//! # Scheduler-side bookkeeping for the kernel heap
//!
//! The heap in [`kernel_mm`] attributes memory to pids. Once a task exits,
//! its pid stops resolving through the scheduler, yet memory it allocated
//! may live on. This crate keeps the names of exited tasks so the heap
//! walker can still say who owned that memory.
//!
//! * [`DeadTaskRegistry`]: pid to name records of exited tasks, mutated by
//!   a deferred worker inside interrupt-masked critical sections.
//! * [`TaskLifecycle`]: the create/delete hooks wiring the registry and
//!   heap group membership together.
//! * [`Slab`] and [`WorkQueue`]: the fixed-capacity storage behind the
//!   registry.
//!
//! ```rust
//! use kernel_mm::Heap;
//! use kernel_sched::{DeadTaskRegistry, TaskLifecycle};
//! use kernel_sync::SoftInterrupts;
//!
//! let heap = Heap::new();
//! let registry = DeadTaskRegistry::new(SoftInterrupts::new());
//! let hooks = TaskLifecycle::new(&heap, &registry);
//!
//! hooks.task_created(5, "worker");
//! hooks.task_deleted(5, "worker");
//! registry.process_deferred();
//! assert_eq!(registry.get_dead_task_name(5).as_str(), "worker");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod deadtask;
mod lifecycle;
mod slab;
mod work_queue;

pub use deadtask::{DeadTaskRegistry, DeadTaskWork};
pub use lifecycle::TaskLifecycle;
pub use slab::{Handle, Slab, SlabFull};
pub use work_queue::{WorkQueue, WorkQueueError};

/// Default capacity of the dead pid list.
pub const DEADTASK_PID_NODES: usize = 64;

/// Default capacity of the distinct dead name list.
pub const DEADTASK_NAME_NODES: usize = 64;

/// Default number of registry requests awaiting the worker.
pub const DEADTASK_QUEUE_DEPTH: usize = 32;
