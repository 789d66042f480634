//! Process/thread lifecycle and stream IPC core for a small educational
//! kernel.
//!
//! `kernel::Kernel` is the single entry point: construct one with
//! [`kernel::Kernel::new`] and drive every syscall through its methods.
//! `syscall` re-exposes the same operations behind the raw sentinel-returning
//! surface (`NOFILE`/`NOPROC`/`-1`) a caller porting from the original C
//! interface would expect.

pub mod arena;
pub mod error;
pub mod fs;
pub mod ids;
pub mod kernel;
pub mod process;
pub mod socket;
pub mod sync;
pub mod syscall;
pub mod task;
