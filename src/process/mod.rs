//! Process and thread lifecycle: Exec, Exit, WaitChild, reparenting to
//! init, and the CreateThread/ThreadJoin/ThreadDetach/ThreadExit family
//! (SPEC_FULL §4.5/§4.7).

pub mod pcb;
pub mod ptcb;

use std::sync::Mutex;

use log::debug;

use crate::error::{KernelError, KernelResult};
use crate::fs::FcbId;
use crate::ids::{Pid, Tid};
use crate::kernel::KernelState;
use crate::sync::wait_while;
use crate::task::Task;

use pcb::{Pcb, ProcessState};
use ptcb::Ptcb;

pub fn get_pcb(state: &KernelState, pid: Pid) -> KernelResult<&Pcb> {
    let pcb = state
        .processes
        .get(pid.as_usize())
        .ok_or(KernelError::InvalidHandle { kind: "pid" })?;
    if pcb.state == ProcessState::Free {
        return Err(KernelError::InvalidHandle { kind: "pid" });
    }
    Ok(pcb)
}

pub fn get_pcb_mut(state: &mut KernelState, pid: Pid) -> KernelResult<&mut Pcb> {
    let pcb = state
        .processes
        .get_mut(pid.as_usize())
        .ok_or(KernelError::InvalidHandle { kind: "pid" })?;
    if pcb.state == ProcessState::Free {
        return Err(KernelError::InvalidHandle { kind: "pid" });
    }
    Ok(pcb)
}

fn get_ptcb(state: &KernelState, tid: Tid) -> KernelResult<&Ptcb> {
    state
        .ptcbs
        .get(tid)
        .ok_or(KernelError::InvalidHandle { kind: "tid" })
}

fn get_ptcb_mut(state: &mut KernelState, tid: Tid) -> KernelResult<&mut Ptcb> {
    state
        .ptcbs
        .get_mut(tid)
        .ok_or(KernelError::InvalidHandle { kind: "tid" })
}

/// Pop a free pid off the free-list, or `None` if the process table is
/// full ("we have run out of PIDs").
pub fn acquire_pid(state: &mut KernelState) -> Option<Pid> {
    state.free_pids.pop_front()
}

fn release_pid(state: &mut KernelState, pid: Pid) {
    if let Some(pcb) = state.processes.get_mut(pid.as_usize()) {
        pcb.reset_to_free();
    }
    state.free_pids.push_back(pid);
}

/// Install pid 0 (idle) or pid 1 (init) as a permanently ALIVE, taskless,
/// parentless process, bypassing the ordinary acquire/Exec path real
/// processes go through.
pub fn bootstrap(state: &mut KernelState, pid: Pid) {
    state.processes[pid.as_usize()].exec_into(None, None, 0, Vec::new());
}

/// `Exec`: acquire a pid, link it under `parent`, and inherit `parent`'s
/// open FIDs. The main thread itself (a real `std::thread::spawn`, plus its
/// owning PTCB) is started by the caller in `kernel.rs`, which is also
/// where the FCB/Fid-table machinery for every other syscall lives — this
/// function only does the process-table bookkeeping under the lock.
pub fn exec(
    state: &mut KernelState,
    parent: Option<Pid>,
    task: Option<Task>,
    argl: i32,
    args: Vec<u8>,
) -> KernelResult<Pid> {
    let pid = acquire_pid(state).ok_or(KernelError::ResourceExhausted { resource: "pid" })?;

    let parent_fids = match parent {
        Some(p) => Some(get_pcb(state, p)?.fids.clone()),
        None => None,
    };

    state.processes[pid.as_usize()].exec_into(parent, task, argl, args);

    if let (Some(parent_pid), Some(parent_fids)) = (parent, parent_fids) {
        {
            let crate::kernel::KernelState {
                processes, fcbs, ..
            } = state;
            processes[pid.as_usize()].fids.inherit_from(&parent_fids, fcbs);
        }
        get_pcb_mut(state, parent_pid)?.children.push_front(pid);
    }

    debug!("exec: pid {} under parent {:?}", pid, parent);
    Ok(pid)
}

/// `Exit`: close every open FID, reparent still-alive children and hand
/// off already-exited ones to init, then become a ZOMBIE and wake the
/// parent's `WaitChild`.
pub fn exit(state: &mut KernelState, pid: Pid, exit_value: i32) -> KernelResult<()> {
    {
        let pcb = get_pcb(state, pid)?;
        if pcb.state != ProcessState::Alive {
            return Err(KernelError::InvalidArgument { name: "pid" });
        }
    }

    let open_fcbs: Vec<FcbId> = get_pcb(state, pid)?.fids.iter_open().collect();
    for fcb_id in open_fcbs {
        let _ = crate::kernel::close_fcb(state, fcb_id);
    }
    get_pcb_mut(state, pid)?.fids.clear();

    let init = Pid::INIT;
    let still_alive: Vec<Pid> = get_pcb_mut(state, pid)?.children.drain(..).collect();
    for &child in &still_alive {
        get_pcb_mut(state, child)?.parent = Some(init);
    }
    for child in still_alive {
        get_pcb_mut(state, init)?.children.push_front(child);
    }

    let already_exited: Vec<Pid> = get_pcb_mut(state, pid)?.exited.drain(..).collect();
    if !already_exited.is_empty() {
        {
            let init_pcb = get_pcb_mut(state, init)?;
            for child in already_exited {
                init_pcb.exited.push_back(child);
            }
        }
        get_pcb_mut(state, init)?.child_exit.notify_all();
    }

    {
        let pcb = get_pcb_mut(state, pid)?;
        pcb.state = ProcessState::Zombie;
        pcb.exit_value = exit_value;
    }

    if let Some(parent) = get_pcb(state, pid)?.parent {
        let parent_pcb = get_pcb_mut(state, parent)?;
        parent_pcb.children.retain(|&c| c != pid);
        parent_pcb.exited.push_front(pid);
        parent_pcb.child_exit.notify_all();
    }

    debug!("exit: pid {} exited with {}", pid, exit_value);
    Ok(())
}

/// `WaitChild`: wait for `target` (or, if `None`, any child) to become a
/// ZOMBIE, then reap it.
pub fn wait_child(
    mutex: &Mutex<KernelState>,
    caller: Pid,
    target: Option<Pid>,
) -> KernelResult<(Pid, i32)> {
    match target {
        Some(cpid) => wait_for_specific_child(mutex, caller, cpid),
        None => wait_for_any_child(mutex, caller),
    }
}

fn wait_for_specific_child(
    mutex: &Mutex<KernelState>,
    caller: Pid,
    cpid: Pid,
) -> KernelResult<(Pid, i32)> {
    let mut guard = mutex.lock().expect("kernel mutex poisoned");
    {
        let child = get_pcb(&guard, cpid)?;
        if child.parent != Some(caller) {
            return Err(KernelError::InvalidArgument { name: "pid" });
        }
    }
    guard = wait_while(
        guard,
        |s: &KernelState| &s.processes[caller.as_usize()].child_exit,
        |s| s.processes[cpid.as_usize()].state == ProcessState::Alive,
    );
    reap(&mut guard, caller, cpid)
}

fn wait_for_any_child(mutex: &Mutex<KernelState>, caller: Pid) -> KernelResult<(Pid, i32)> {
    let mut guard = mutex.lock().expect("kernel mutex poisoned");
    {
        let parent = get_pcb(&guard, caller)?;
        if parent.children.is_empty() && parent.exited.is_empty() {
            return Err(KernelError::InvalidArgument { name: "pid" });
        }
    }
    guard = wait_while(
        guard,
        |s: &KernelState| &s.processes[caller.as_usize()].child_exit,
        |s| s.processes[caller.as_usize()].exited.is_empty(),
    );
    let cpid = *get_pcb(&guard, caller)?
        .exited
        .front()
        .expect("woke with non-empty exited list");
    reap(&mut guard, caller, cpid)
}

fn reap(state: &mut KernelState, caller: Pid, cpid: Pid) -> KernelResult<(Pid, i32)> {
    get_pcb_mut(state, caller)?.exited.retain(|&c| c != cpid);
    let exit_value = get_pcb(state, cpid)?.exit_value;
    release_pid(state, cpid);
    Ok((cpid, exit_value))
}

/// `CreateThread`: allocate a PTCB under `owner`. The caller (`kernel.rs`)
/// spawns the real OS thread after this returns, once the PTCB is visible
/// to `ThreadSelf`/`ThreadJoin`.
pub fn create_thread_slot(
    state: &mut KernelState,
    owner: Pid,
    task: Task,
    argl: i32,
    args: Vec<u8>,
) -> KernelResult<Tid> {
    {
        let pcb = get_pcb_mut(state, owner)?;
        pcb.thread_count += 1;
    }
    Ok(state.ptcbs.insert(Ptcb::new(owner, task, argl, args)))
}

/// `ThreadJoin`: wait for `tid` to exit (or be detached, which fails the
/// join rather than returning a stale exit value — see SPEC_FULL §4.7).
/// Rejects a target outside `caller`'s own process and a self-join.
pub fn join(mutex: &Mutex<KernelState>, caller: Pid, self_tid: Option<Tid>, tid: Tid) -> KernelResult<i32> {
    let mut guard = mutex.lock().expect("kernel mutex poisoned");
    {
        if self_tid == Some(tid) {
            return Err(KernelError::InvalidJoinTarget {
                reason: "cannot join self",
            });
        }
        let ptcb = get_ptcb(&guard, tid)?;
        if ptcb.owner != caller {
            return Err(KernelError::InvalidJoinTarget {
                reason: "not in caller's process",
            });
        }
        if ptcb.detached {
            return Err(KernelError::InvalidJoinTarget {
                reason: "already detached",
            });
        }
    }
    get_ptcb_mut(&mut guard, tid)?.incref();
    guard = wait_while(
        guard,
        |s: &KernelState| &s.ptcbs.get(tid).expect("ptcb vanished under lock").joined,
        |s| {
            let ptcb = s.ptcbs.get(tid).expect("ptcb vanished under lock");
            !ptcb.exited && !ptcb.detached
        },
    );
    let ptcb = get_ptcb_mut(&mut guard, tid)?;
    let result = if ptcb.exited {
        Ok(ptcb.exit_value)
    } else {
        Err(KernelError::InvalidJoinTarget {
            reason: "detached while waiting",
        })
    };
    ptcb.decref();
    ptcb.joined.notify_all();
    result
}

/// `ThreadDetach`: refuses an already-exited target, matching the source's
/// `tcb == NULL || state == EXITED` rejection, and a target outside
/// `caller`'s own process.
pub fn detach(state: &mut KernelState, caller: Pid, tid: Tid) -> KernelResult<()> {
    let ptcb = get_ptcb_mut(state, tid)?;
    if ptcb.owner != caller {
        return Err(KernelError::InvalidJoinTarget {
            reason: "not in caller's process",
        });
    }
    if ptcb.exited {
        return Err(KernelError::InvalidJoinTarget {
            reason: "already exited",
        });
    }
    ptcb.detached = true;
    if ptcb.has_joiners() {
        ptcb.joined.notify_all();
    }
    Ok(())
}

/// `ThreadExit`: mark the PTCB exited and wake any joiners. The slot stays
/// in the arena forever (see `ptcb::Ptcb`'s doc comment).
pub fn thread_exit(state: &mut KernelState, tid: Tid, exit_value: i32) {
    let owner = match state.ptcbs.get_mut(tid) {
        Some(ptcb) => {
            ptcb.exited = true;
            ptcb.exit_value = exit_value;
            if ptcb.has_joiners() {
                ptcb.joined.notify_all();
            }
            ptcb.owner
        }
        None => return,
    };
    if let Some(pcb) = state.processes.get_mut(owner.as_usize()) {
        pcb.thread_count = pcb.thread_count.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Kernel;
    use std::sync::Arc;

    #[test]
    fn exec_assigns_distinct_pids_and_links_parent() {
        let kernel = Kernel::new();
        let noop: Task = Arc::new(|_, _| 0);

        let a = kernel.exec(Pid::INIT, noop.clone(), 0, Vec::new()).unwrap();
        let b = kernel.exec(Pid::INIT, noop, 0, Vec::new()).unwrap();

        assert_ne!(a, b);
        assert_eq!(kernel.get_ppid(a).unwrap(), Some(Pid::INIT));
        assert_eq!(kernel.get_ppid(b).unwrap(), Some(Pid::INIT));
    }

    #[test]
    fn bootstrap_processes_are_permanently_alive() {
        let kernel = Kernel::new();
        assert_eq!(kernel.get_ppid(Pid::IDLE).unwrap(), None);
        assert_eq!(kernel.get_ppid(Pid::INIT).unwrap(), None);
    }
}
