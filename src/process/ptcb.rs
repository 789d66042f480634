//! The per-thread control block: join/detach/exit state for one thread of
//! a process (SPEC_FULL §3/§4.7).

use std::sync::Condvar;

use crate::ids::Pid;
use crate::task::Task;

/// One thread's join state. Arena slots holding a `Ptcb` are never freed
/// (see `arena::Arena::remove`'s note): the source frees a PTCB right after
/// broadcasting `joined`, which races an in-flight joiner's wait the same
/// way a freed pipe or socket slot would — this crate keeps the slot
/// resident instead, which also sidesteps that source bug outright.
pub struct Ptcb {
    pub owner: Pid,
    pub task: Task,
    pub argl: i32,
    pub args: Vec<u8>,
    pub exit_value: i32,
    pub exited: bool,
    pub detached: bool,
    joiners: u32,
    pub(crate) joined: Condvar,
}

impl Ptcb {
    pub fn new(owner: Pid, task: Task, argl: i32, args: Vec<u8>) -> Self {
        Self {
            owner,
            task,
            argl,
            args,
            exit_value: 0,
            exited: false,
            detached: false,
            joiners: 0,
            joined: Condvar::new(),
        }
    }

    pub fn has_joiners(&self) -> bool {
        self.joiners > 0
    }

    pub fn incref(&mut self) {
        self.joiners += 1;
    }

    pub fn decref(&mut self) {
        self.joiners = self.joiners.saturating_sub(1);
    }
}
