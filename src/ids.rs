//! Identifier types and the small integer constants from SPEC_FULL §3/§6.

use std::fmt;

use crate::arena::Id;

/// Maximum number of simultaneously live processes. Pid 0 is the idle task,
/// Pid 1 is init.
pub const MAX_PROC: usize = 128;
/// Per-process file-id table size.
pub const MAX_FILEID: usize = 16;
/// Highest legal port number; port 0 (`NOPORT`) is reserved for anonymous
/// peer sockets.
pub const MAX_PORT: usize = 1023;
/// Pipe ring-buffer capacity in bytes.
pub const BUFFER_SIZE: usize = 8192;
/// Max bytes of a process's argument blob carried in a `ProcInfoRecord`.
pub const PROCINFO_MAX_ARGS_SIZE: usize = 128;

/// Port value meaning "anonymous, not bound to a listener".
pub const NOPORT: u16 = 0;

/// Process id: a small integer in `[0, MAX_PROC)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub(crate) u32);

impl Pid {
    pub const IDLE: Pid = Pid(0);
    pub const INIT: Pid = Pid(1);

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_usize(index: usize) -> Self {
        Pid(index as u32)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-scoped file id: an index into that process's FID table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fid(pub(crate) u32);

impl Fid {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-thread handle — a generation-checked handle into the PTCB
/// arena, standing in for "a pointer to the PTCB" in the distilled spec.
pub type Tid = Id<crate::process::ptcb::Ptcb>;
