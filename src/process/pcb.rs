//! The Process Control Block: identity, FID table, children/exited lists,
//! and the `child_exit` condvar WaitChild blocks on (SPEC_FULL §3/§4.5).

use std::collections::VecDeque;
use std::sync::Condvar;

use crate::fs::FidTable;
use crate::ids::Pid;
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Free,
    Alive,
    Zombie,
}

/// One process table slot. `processes: Vec<Pcb>` is allocated once at
/// `MAX_PROC` length and never resized — `child_exit` must keep a stable
/// address for the lifetime of the kernel, since `sync::wait_while` parks a
/// raw pointer into it (see `arena::Arena`'s note for the same invariant
/// applied to heap-allocated slots). Reuse on Exec mutates fields in place
/// through [`Pcb::exec_into`]/[`Pcb::reset_to_free`] rather than replacing
/// the whole struct, so `child_exit` itself is never reconstructed either.
pub struct Pcb {
    pub state: ProcessState,
    pub parent: Option<Pid>,
    pub exit_value: i32,
    pub main_task: Option<Task>,
    pub argl: i32,
    pub args: Vec<u8>,
    pub fids: FidTable,
    /// Still-ALIVE children, most recently Exec'd first.
    pub children: VecDeque<Pid>,
    /// ZOMBIE children not yet reaped, most recently exited first.
    pub exited: VecDeque<Pid>,
    pub thread_count: u32,
    pub(crate) child_exit: Condvar,
}

impl Pcb {
    pub fn free() -> Self {
        Self {
            state: ProcessState::Free,
            parent: None,
            exit_value: 0,
            main_task: None,
            argl: 0,
            args: Vec::new(),
            fids: FidTable::new(),
            children: VecDeque::new(),
            exited: VecDeque::new(),
            thread_count: 0,
            child_exit: Condvar::new(),
        }
    }

    /// Populate a freed slot for a newly Exec'd process. Never touches
    /// `child_exit` — see the struct doc comment.
    pub fn exec_into(&mut self, parent: Option<Pid>, main_task: Option<Task>, argl: i32, args: Vec<u8>) {
        self.state = ProcessState::Alive;
        self.parent = parent;
        self.exit_value = 0;
        self.main_task = main_task;
        self.argl = argl;
        self.args = args;
        self.fids.clear();
        self.children.clear();
        self.exited.clear();
        self.thread_count = 0;
    }

    /// Return a reaped slot to FREE. Never touches `child_exit`.
    pub fn reset_to_free(&mut self) {
        self.state = ProcessState::Free;
        self.parent = None;
        self.exit_value = 0;
        self.main_task = None;
        self.argl = 0;
        self.args = Vec::new();
        self.fids.clear();
        self.children.clear();
        self.exited.clear();
        self.thread_count = 0;
    }
}
