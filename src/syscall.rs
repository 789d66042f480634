//! The raw, sentinel-returning syscall surface from SPEC_FULL §6.1, layered
//! over [`Kernel`]'s `Result`-returning methods for callers porting from the
//! original C-style ABI (`NOFILE`, `NOPROC`, `0`/`-1`).
//!
//! The `Thread*` family is the one place this surface doesn't reduce to a
//! raw integer: `Tid` is an opaque generation-checked handle (SPEC_FULL §9),
//! not a pointer with a natural zero/null value, so there is no honest raw
//! sentinel to invent for it. Those functions keep `Kernel`'s `Option`/
//! `Result` return types instead of forcing one.

use std::time::Duration;

use crate::error::KernelError;
use crate::ids::{Fid, Pid, Tid};
use crate::kernel::Kernel;
use crate::socket::ShutdownMode;
use crate::task::Task;

/// No valid file id.
pub const NOFILE: i64 = -1;
/// No valid process id.
pub const NOPROC: i64 = -1;

pub fn pipe(kernel: &Kernel, owner: Pid) -> Result<(Fid, Fid), KernelError> {
    kernel.pipe(owner)
}

pub fn socket(kernel: &Kernel, owner: Pid, port: u16) -> i64 {
    kernel
        .socket(owner, port)
        .map(|fid| fid.as_usize() as i64)
        .unwrap_or(NOFILE)
}

pub fn listen(kernel: &Kernel, owner: Pid, fid: Fid) -> i32 {
    match kernel.listen(owner, fid) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn accept(kernel: &Kernel, owner: Pid, fid: Fid) -> i64 {
    kernel
        .accept(owner, fid)
        .map(|fid| fid.as_usize() as i64)
        .unwrap_or(NOFILE)
}

pub fn connect(kernel: &Kernel, owner: Pid, fid: Fid, port: u16, timeout: Option<Duration>) -> i32 {
    match kernel.connect(owner, fid, port, timeout) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn shutdown(kernel: &Kernel, owner: Pid, fid: Fid, how: ShutdownMode) -> i32 {
    match kernel.shutdown(owner, fid, how) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn read(kernel: &Kernel, owner: Pid, fid: Fid, buf: &mut [u8]) -> i64 {
    kernel.read(owner, fid, buf).map(|n| n as i64).unwrap_or(-1)
}

pub fn write(kernel: &Kernel, owner: Pid, fid: Fid, buf: &[u8]) -> i64 {
    kernel.write(owner, fid, buf).map(|n| n as i64).unwrap_or(-1)
}

pub fn close(kernel: &Kernel, owner: Pid, fid: Fid) -> i32 {
    match kernel.close(owner, fid) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn exec(kernel: &Kernel, parent: Pid, task: Task, argl: i32, args: Vec<u8>) -> i64 {
    kernel
        .exec(parent, task, argl, args)
        .map(|pid| pid.as_usize() as i64)
        .unwrap_or(NOPROC)
}

pub fn exit(kernel: &Kernel, pid: Pid, exit_value: i32) {
    kernel.exit(pid, exit_value);
}

pub fn wait_child(kernel: &Kernel, caller: Pid, target: Option<Pid>) -> (i64, i32) {
    match kernel.wait_child(caller, target) {
        Ok((pid, status)) => (pid.as_usize() as i64, status),
        Err(_) => (NOPROC, 0),
    }
}

pub fn get_pid(kernel: &Kernel, owner: Pid) -> i64 {
    kernel.get_pid(owner).as_usize() as i64
}

pub fn get_ppid(kernel: &Kernel, owner: Pid) -> i64 {
    kernel
        .get_ppid(owner)
        .ok()
        .flatten()
        .map(|pid| pid.as_usize() as i64)
        .unwrap_or(NOPROC)
}

pub fn open_info(kernel: &Kernel, owner: Pid) -> i64 {
    kernel
        .open_info(owner)
        .map(|fid| fid.as_usize() as i64)
        .unwrap_or(NOFILE)
}

pub fn create_thread(kernel: &Kernel, owner: Pid, task: Task, argl: i32, args: Vec<u8>) -> Option<Tid> {
    kernel.create_thread(owner, task, argl, args).ok()
}

pub fn thread_self(kernel: &Kernel) -> Option<Tid> {
    kernel.thread_self()
}

pub fn thread_join(kernel: &Kernel, owner: Pid, tid: Tid) -> Result<i32, KernelError> {
    kernel.thread_join(owner, tid)
}

pub fn thread_detach(kernel: &Kernel, owner: Pid, tid: Tid) -> i32 {
    match kernel.thread_detach(owner, tid) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

pub fn thread_exit(kernel: &Kernel, tid: Tid, exit_value: i32) {
    kernel.thread_exit(tid, exit_value);
}
