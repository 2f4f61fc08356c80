//! Compile-time heap configuration.

use crate::task::Pid;

/// Maximum number of regions a single heap can aggregate.
pub const CONFIG_MM_REGIONS: usize = 4;

/// Size of the task table; pids are hashed into it. Must be a power of two.
pub const CONFIG_MAX_TASKS: usize = 32;

/// Number of CPUs, i.e. number of per-CPU delayed free lists.
pub const CONFIG_SMP_NCPUS: usize = 1;

/// Bytes reserved for a task name, including the terminating NUL.
pub const CONFIG_TASK_NAME_SIZE: usize = 32;

/// Maximum number of heap-info user groups.
pub const HEAPINFO_USER_GROUP_NUM: usize = 4;

/// Maximum number of live tasks tracked as members of a user group.
pub const HEAPINFO_GROUP_MEMBERS: usize = 16;

const _: () = assert!(CONFIG_MAX_TASKS.is_power_of_two());
const _: () = assert!(CONFIG_MM_REGIONS > 0);
const _: () = assert!(CONFIG_SMP_NCPUS > 0);
const _: () = assert!(CONFIG_TASK_NAME_SIZE > 1);

/// Slot of `pid` in any table sized [`CONFIG_MAX_TASKS`].
#[inline]
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub const fn pid_hash(pid: Pid) -> usize {
    (pid as u32 as usize) & (CONFIG_MAX_TASKS - 1)
}
