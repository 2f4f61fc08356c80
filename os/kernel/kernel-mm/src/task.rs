//! The scheduler as seen from the memory manager.
//!
//! The heap never owns task control blocks. It only needs to know who is
//! running, whether a pid still has a live TCB, and how to mask interrupts.

use crate::config::CONFIG_TASK_NAME_SIZE;
use core::fmt;
use kernel_sync::InterruptControl;

/// Task / thread identifier.
pub type Pid = i32;

/// Capabilities the allocator borrows from the scheduler.
///
/// Per-task accounting keeps one slot per [`pid_hash`](crate::config::pid_hash)
/// value. Pid allocation is expected to keep live pids in distinct slots;
/// if two live tasks do collide, the first one keeps the slot and the other
/// is not charged.
pub trait Scheduler: InterruptControl {
    /// Pid of the running task.
    fn getpid(&self) -> Pid;

    /// Returns `true` if `pid` currently has a live task control block.
    fn is_alive(&self, pid: Pid) -> bool;

    /// Returns `true` when called from an interrupt handler.
    fn in_interrupt_context(&self) -> bool;

    /// Index of the calling CPU.
    fn cpu_index(&self) -> usize {
        0
    }

    /// Name of a live task.
    fn task_name(&self, pid: Pid) -> Option<TaskName>;
}

/// Historical names of tasks that have already exited.
pub trait DeadTaskNames {
    fn dead_task_name(&self, pid: Pid) -> Option<TaskName>;
}

/// Fixed-size, NUL-padded task name.
///
/// Two names are equal when all [`CONFIG_TASK_NAME_SIZE`] bytes match,
/// padding included.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskName([u8; CONFIG_TASK_NAME_SIZE]);

impl TaskName {
    /// Reported for pids with no recorded name.
    pub const NOT_AVAILABLE: Self = Self::new("NA");

    /// Copies `name`, truncating it to fit the buffer and its NUL terminator.
    ///
    /// Truncation never splits a UTF-8 sequence.
    #[must_use]
    pub const fn new(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut len = if bytes.len() < CONFIG_TASK_NAME_SIZE {
            bytes.len()
        } else {
            CONFIG_TASK_NAME_SIZE - 1
        };
        if len < bytes.len() {
            while len > 0 && (bytes[len] & 0xC0) == 0x80 {
                len -= 1;
            }
        }
        let mut buf = [0u8; CONFIG_TASK_NAME_SIZE];
        let mut i = 0;
        while i < len {
            buf[i] = bytes[i];
            i += 1;
        }
        Self(buf)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        let len = self
            .0
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(CONFIG_TASK_NAME_SIZE);
        core::str::from_utf8(&self.0[..len]).unwrap_or_default()
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; CONFIG_TASK_NAME_SIZE] {
        &self.0
    }
}

impl Default for TaskName {
    fn default() -> Self {
        Self([0; CONFIG_TASK_NAME_SIZE])
    }
}

impl fmt::Debug for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_to_buffer_size() {
        let long = "x".repeat(CONFIG_TASK_NAME_SIZE * 2);
        let name = TaskName::new(&long);
        assert_eq!(name.as_str().len(), CONFIG_TASK_NAME_SIZE - 1);
        assert_eq!(name.as_bytes()[CONFIG_TASK_NAME_SIZE - 1], 0);
    }

    #[test]
    fn truncation_keeps_utf8_intact() {
        // 'é' is two bytes; make it straddle the cut.
        let mut s = "a".repeat(CONFIG_TASK_NAME_SIZE - 2);
        s.push('é');
        let name = TaskName::new(&s);
        assert_eq!(name.as_str(), "a".repeat(CONFIG_TASK_NAME_SIZE - 2));
    }

    #[test]
    fn equality_is_exact() {
        assert_eq!(TaskName::new("worker"), TaskName::new("worker"));
        assert_ne!(TaskName::new("worker"), TaskName::new("worker2"));
        assert_eq!(TaskName::NOT_AVAILABLE.as_str(), "NA");
    }
}
