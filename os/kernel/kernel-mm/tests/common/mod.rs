#![allow(dead_code)]

use kernel_mm::{DeadTaskNames, Pid, Scheduler, TaskName};
use kernel_sync::{InterruptControl, SoftInterrupts};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

/// 16-byte aligned backing memory for a heap region.
pub struct Arena(Vec<u128>);

impl Arena {
    pub fn new(bytes: usize) -> Self {
        Self(vec![0; bytes.div_ceil(16)])
    }

    pub fn ptr(&mut self) -> *mut u8 {
        self.0.as_mut_ptr().cast()
    }

    pub fn len(&self) -> usize {
        self.0.len() * 16
    }
}

/// Single-CPU scheduler double with a table of live tasks.
pub struct TestSched {
    irq: SoftInterrupts,
    current: Cell<Pid>,
    alive: RefCell<BTreeMap<Pid, TaskName>>,
    in_irq: Cell<bool>,
}

impl TestSched {
    pub fn new() -> Self {
        let sched = Self {
            irq: SoftInterrupts::new(),
            current: Cell::new(0),
            alive: RefCell::new(BTreeMap::new()),
            in_irq: Cell::new(false),
        };
        sched.spawn(0, "idle");
        sched
    }

    pub fn spawn(&self, pid: Pid, name: &str) {
        self.alive.borrow_mut().insert(pid, TaskName::new(name));
    }

    pub fn kill(&self, pid: Pid) {
        self.alive.borrow_mut().remove(&pid);
    }

    pub fn run_as(&self, pid: Pid) {
        self.current.set(pid);
    }

    pub fn set_interrupt(&self, on: bool) {
        self.in_irq.set(on);
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.irq.enabled()
    }
}

impl InterruptControl for TestSched {
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

impl Scheduler for TestSched {
    fn getpid(&self) -> Pid {
        self.current.get()
    }

    fn is_alive(&self, pid: Pid) -> bool {
        self.alive.borrow().contains_key(&pid)
    }

    fn in_interrupt_context(&self) -> bool {
        self.in_irq.get()
    }

    fn task_name(&self, pid: Pid) -> Option<TaskName> {
        self.alive.borrow().get(&pid).copied()
    }
}

/// Names of exited tasks, as a registry would report them.
#[derive(Default)]
pub struct Graveyard(BTreeMap<Pid, TaskName>);

impl Graveyard {
    pub fn bury(&mut self, pid: Pid, name: &str) {
        self.0.insert(pid, TaskName::new(name));
    }
}

impl DeadTaskNames for Graveyard {
    fn dead_task_name(&self, pid: Pid) -> Option<TaskName> {
        self.0.get(&pid).copied()
    }
}
