//! # Kernel Heap with Per-Task Accounting
//!
//! This crate implements the kernel heap: a boundary-tag allocator over one
//! or more memory regions, plus (behind the `heapinfo` feature) per-task
//! allocation accounting and a diagnostic walker that attributes every live
//! chunk to its owner.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Heap ([`Heap`])                     │
//! │    • malloc / zalloc / calloc / realloc / free      │
//! │    • per-CPU delayed free lists                     │
//! │    • mallinfo, heap-info walker                     │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Regions and free-node list                │
//! │    • guard nodes at both ends of every region       │
//! │    • free chunks bucketed by log2(size)             │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Node layout ([`node`])                 │
//! │    • size + preceding boundary tags                 │
//! │    • owner pid, call site and flags (`heapinfo`)    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduler Coupling
//!
//! The heap never reaches into scheduler state directly. Every entry point
//! takes a [`Scheduler`] that reports the running pid, TCB liveness and
//! interrupt context, and masks interrupts for the short critical sections
//! around the delayed free lists.
//!
//! ## Accounting
//!
//! With `heapinfo` enabled, each allocation is charged to the running task,
//! its user group and the heap-wide total, all with their own peaks.
//! Interrupt-context allocations are tagged [`HEAPINFO_INT`] and never
//! charged to a task. Accounting for a pid without a live TCB is a silent
//! no-op.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_mm::{Heap, Pid, Scheduler, TaskName};
//! use kernel_sync::{InterruptControl, SoftInterrupts};
//!
//! struct Boot(SoftInterrupts);
//!
//! impl InterruptControl for Boot {
//!     fn save_and_disable(&self) -> bool { self.0.save_and_disable() }
//!     fn enable(&self) { self.0.enable() }
//!     fn enabled(&self) -> bool { self.0.enabled() }
//! }
//!
//! impl Scheduler for Boot {
//!     fn getpid(&self) -> Pid { 0 }
//!     fn is_alive(&self, pid: Pid) -> bool { pid == 0 }
//!     fn in_interrupt_context(&self) -> bool { false }
//!     fn task_name(&self, _pid: Pid) -> Option<TaskName> { Some(TaskName::new("idle")) }
//! }
//!
//! static HEAP: Heap = Heap::new();
//!
//! let mut backing = vec![0u128; 256];
//! let sched = Boot(SoftInterrupts::new());
//! unsafe { HEAP.initialize(backing.as_mut_ptr().cast(), 4096) }.unwrap();
//!
//! let mem = HEAP.malloc(&sched, 100).unwrap();
//! unsafe { HEAP.free(&sched, mem.as_ptr()) };
//! assert_eq!(HEAP.mallinfo(&sched).unwrap().ordblks, 1);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod config;
mod error;
mod free_list;
mod heap;
#[cfg(feature = "heapinfo")]
mod heapinfo;
mod mallinfo;
mod malloc;
pub mod node;
mod task;
#[cfg(feature = "heapinfo")]
mod walker;

pub use error::HeapError;
pub use heap::{Heap, HeapRegion, NodeView};
#[cfg(feature = "heapinfo")]
pub use heapinfo::{
    HEAPINFO_GUARD_CALLER, HEAPINFO_HEAD_GUARD, HEAPINFO_INIT_INFO, HEAPINFO_INT,
    HEAPINFO_TAIL_GUARD, HeapinfoGroupInfo, HeapinfoTcbInfo, INVALID_PROCESS_ID,
};
pub use mallinfo::MallInfo;
pub use task::{DeadTaskNames, Pid, Scheduler, TaskName};
#[cfg(feature = "heapinfo")]
pub use walker::{GroupLine, HeapinfoMode, HeapinfoReport, NodeLine, NonSchedBucket, TaskLine};
