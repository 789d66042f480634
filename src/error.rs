//! Kernel error types.
//!
//! Mirrors the error taxonomy a VeridianOS-style kernel uses (one flat enum,
//! `Display` + `std::error::Error`), but scoped to what the process/stream
//! subsystems in this crate can actually produce.

use std::fmt;

/// Result type for every fallible kernel operation.
pub type KernelResult<T> = Result<T, KernelError>;

/// Main error type returned by [`crate::kernel::Kernel`] methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// A `Fid`, `Pid`, or `Tid` did not refer to a live object.
    InvalidHandle { kind: &'static str },
    /// An argument was out of its documented range (bad port, zero timeout,
    /// wrong socket state for the call).
    InvalidArgument { name: &'static str },
    /// No free slot was available (PCB table full, FID table full, port
    /// already bound).
    ResourceExhausted { resource: &'static str },
    /// The peer half of a pipe or socket has been shut down or dropped.
    BrokenPipe,
    /// A `Connect` timed out before the listener admitted it.
    Timeout,
    /// A thread-join target was detached, exited, or not ours to join.
    InvalidJoinTarget { reason: &'static str },
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidHandle { kind } => write!(f, "invalid {kind} handle"),
            Self::InvalidArgument { name } => write!(f, "invalid argument: {name}"),
            Self::ResourceExhausted { resource } => {
                write!(f, "resource exhausted: {resource}")
            }
            Self::BrokenPipe => write!(f, "broken pipe: peer is gone"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::InvalidJoinTarget { reason } => write!(f, "cannot join thread: {reason}"),
        }
    }
}

impl std::error::Error for KernelError {}
