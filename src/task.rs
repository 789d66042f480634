//! The `Task` a process or thread runs.
//!
//! The distilled spec's `Task` is a C function pointer `int (*)(int argl,
//! void* args)`. Rust closures aren't a `void*`-compatible calling
//! convention, so a `Task` here is a boxed, cloneable `Fn(i32, &[u8]) -> i32`
//! — cloneable because the PTCB keeps its own snapshot of the task
//! independent of the PCB that spawned it (see SPEC_FULL §3, PTCB).

use std::sync::Arc;

pub type Task = Arc<dyn Fn(i32, &[u8]) -> i32 + Send + Sync>;

/// A stable, process-unique-enough value to report as `main_task` in a
/// `ProcInfoRecord`, since Rust gives no portable way to expose a trait
/// object's address as a C-style `void*`.
pub fn task_address(task: &Task) -> u64 {
    Arc::as_ptr(task) as *const () as u64
}
