//! End-to-end process/thread scenarios: WaitChild ordering, reparenting to
//! init, reap idempotence, and thread join/detach.

mod support;

use std::sync::{Arc, Mutex};

use nanokernel_core::error::KernelError;
use nanokernel_core::ids::Pid;
use nanokernel_core::kernel::Kernel;
use nanokernel_core::task::Task;

use support::Gate;

fn gated_task(gate: Gate, exit_value: i32) -> Task {
    Arc::new(move |_argl: i32, _args: &[u8]| -> i32 {
        gate.wait();
        exit_value
    })
}

/// WaitChild(Some(pid)) reaps exactly the named child regardless of what
/// else is pending in the exited list; WaitChild(None) then reaps whatever
/// is left.
#[test]
fn wait_child_specific_then_any() {
    let kernel = Kernel::new();

    let gate_a = Gate::new();
    let gate_b = Gate::new();
    let pid_a = kernel.exec(Pid::INIT, gated_task(gate_a.clone(), 10), 0, Vec::new()).unwrap();
    let pid_b = kernel.exec(Pid::INIT, gated_task(gate_b.clone(), 20), 0, Vec::new()).unwrap();

    gate_a.release();
    gate_b.release();

    let (reaped, status) = kernel.wait_child(Pid::INIT, Some(pid_a)).unwrap();
    assert_eq!(reaped, pid_a);
    assert_eq!(status, 10);

    let (reaped, status) = kernel.wait_child(Pid::INIT, None).unwrap();
    assert_eq!(reaped, pid_b);
    assert_eq!(status, 20);
}

/// Reaping the same pid twice fails the second time: the slot has already
/// returned to the free list and no longer belongs to this parent.
#[test]
fn reap_is_not_idempotent_on_a_stale_pid() {
    let kernel = Kernel::new();
    let gate = Gate::new();
    let pid = kernel.exec(Pid::INIT, gated_task(gate.clone(), 0), 0, Vec::new()).unwrap();
    gate.release();

    kernel.wait_child(Pid::INIT, Some(pid)).unwrap();
    let err = kernel.wait_child(Pid::INIT, Some(pid)).unwrap_err();
    assert_eq!(err, KernelError::InvalidArgument { name: "pid" });
}

/// A process that exits while its own child is still alive reparents that
/// child to init; the grandchild is then reaped by init, two generations
/// removed from its original parent.
#[test]
fn exit_reparents_grandchild_to_init() {
    let kernel = Kernel::new();

    let gate_parent = Gate::new();
    let parent_pid = kernel
        .exec(Pid::INIT, gated_task(gate_parent.clone(), 42), 0, Vec::new())
        .unwrap();

    let gate_child = Gate::new();
    let child_pid = kernel
        .exec(parent_pid, gated_task(gate_child.clone(), 7), 0, Vec::new())
        .unwrap();

    assert_eq!(kernel.get_ppid(child_pid).unwrap(), Some(parent_pid));

    gate_parent.release();
    let (reaped_parent, status) = kernel.wait_child(Pid::INIT, Some(parent_pid)).unwrap();
    assert_eq!(reaped_parent, parent_pid);
    assert_eq!(status, 42);

    assert_eq!(kernel.get_ppid(child_pid).unwrap(), Some(Pid::INIT));

    gate_child.release();
    let (reaped_child, status) = kernel.wait_child(Pid::INIT, Some(child_pid)).unwrap();
    assert_eq!(reaped_child, child_pid);
    assert_eq!(status, 7);
}

/// ThreadJoin observes the exit value of a CreateThread-spawned thread;
/// ThreadDetach on a still-running thread fails any concurrent joiner
/// instead of handing back a stale value.
#[test]
fn thread_join_and_detach() {
    let kernel = Kernel::new();
    let gate = Gate::new();
    let tid = kernel
        .create_thread(Pid::INIT, gated_task(gate.clone(), 99), 0, Vec::new())
        .unwrap();

    let joiner = {
        let kernel = kernel.clone();
        std::thread::spawn(move || kernel.thread_join(Pid::INIT, tid))
    };
    gate.release();
    assert_eq!(joiner.join().unwrap().unwrap(), 99);
}

#[test]
fn thread_detach_fails_a_concurrent_join() {
    let kernel = Kernel::new();
    let gate = Gate::new();
    let tid = kernel
        .create_thread(Pid::INIT, gated_task(gate.clone(), 1), 0, Vec::new())
        .unwrap();

    kernel.thread_detach(Pid::INIT, tid).unwrap();
    gate.release();
    let err = kernel.thread_join(Pid::INIT, tid).unwrap_err();
    assert_eq!(err, KernelError::InvalidJoinTarget { reason: "already detached" });
}

/// ThreadJoin/ThreadDetach refuse a target thread owned by a different
/// process even when the caller holds a valid `Tid` for it.
#[test]
fn thread_join_and_detach_reject_a_foreign_process() {
    let kernel = Kernel::new();
    let gate = Gate::new();
    let owner = kernel.exec(Pid::INIT, gated_task(gate.clone(), 0), 0, Vec::new()).unwrap();
    let tid = kernel
        .create_thread(owner, gated_task(gate.clone(), 5), 0, Vec::new())
        .unwrap();

    let join_err = kernel.thread_join(Pid::INIT, tid).unwrap_err();
    assert_eq!(join_err, KernelError::InvalidJoinTarget { reason: "not in caller's process" });

    let detach_err = kernel.thread_detach(Pid::INIT, tid).unwrap_err();
    assert_eq!(detach_err, KernelError::InvalidJoinTarget { reason: "not in caller's process" });

    gate.release();
}

/// A thread joining its own `ThreadSelf()` handle is rejected rather than
/// deadlocking on a condvar it can never be woken from.
#[test]
fn thread_join_rejects_a_self_join() {
    let kernel = Kernel::new();
    let outcome: Arc<Mutex<Option<Result<i32, KernelError>>>> = Arc::new(Mutex::new(None));
    let outcome_in_task = outcome.clone();
    let kernel_in_task = kernel.clone();
    let task: Task = Arc::new(move |_argl, _args| {
        let self_tid = kernel_in_task.thread_self().unwrap();
        let result = kernel_in_task.thread_join(Pid::INIT, self_tid);
        *outcome_in_task.lock().unwrap() = Some(result);
        0
    });

    let tid = kernel.create_thread(Pid::INIT, task, 0, Vec::new()).unwrap();
    kernel.thread_join(Pid::INIT, tid).unwrap();

    assert_eq!(
        *outcome.lock().unwrap(),
        Some(Err(KernelError::InvalidJoinTarget { reason: "cannot join self" }))
    );
}
