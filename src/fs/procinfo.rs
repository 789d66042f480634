//! The ProcInfo cursor: a read-only stream over the PCB table (SPEC_FULL
//! §4.6), grounded on the teacher's `/proc`-style process status records.

use crate::ids::{Pid, MAX_PROC, PROCINFO_MAX_ARGS_SIZE};
use crate::kernel::KernelState;

/// One fixed-size binary record, matching SPEC_FULL §6.2's layout.
#[derive(Debug, Clone)]
pub struct ProcInfoRecord {
    pub pid: i32,
    pub ppid: i32,
    pub alive: bool,
    pub thread_count: u32,
    pub main_task: u64,
    pub argl: i32,
    pub args: [u8; PROCINFO_MAX_ARGS_SIZE],
}

impl ProcInfoRecord {
    /// Encode as the fixed-width blob a `Read` on this stream hands back.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&self.pid.to_le_bytes());
        out.extend_from_slice(&self.ppid.to_le_bytes());
        out.push(self.alive as u8);
        out.extend_from_slice(&self.thread_count.to_le_bytes());
        out.extend_from_slice(&self.main_task.to_le_bytes());
        out.extend_from_slice(&self.argl.to_le_bytes());
        out.extend_from_slice(&self.args);
        out
    }

    pub const ENCODED_LEN: usize = 4 + 4 + 1 + 4 + 8 + 4 + PROCINFO_MAX_ARGS_SIZE;
}

/// Cursor state for one open ProcInfo stream: the next table slot to
/// consider. Reaching the end of the table resets the cursor to the start so
/// a subsequent reopen-less re-read starts over, matching SPEC_FULL §4.6.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcInfoCursor {
    next: usize,
}

impl ProcInfoCursor {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Produce the next non-FREE PCB's record and advance, or `None` at the
    /// end of the table (and reset to the start for next time).
    pub fn advance(&mut self, state: &KernelState) -> Option<ProcInfoRecord> {
        while self.next < MAX_PROC {
            let pid = Pid::from_usize(self.next);
            self.next += 1;
            if let Some(record) = state.procinfo_record(pid) {
                return Some(record);
            }
        }
        self.next = 0;
        None
    }
}

/// Read up to `buf.len()` bytes from a ProcInfo stream, one whole record at
/// a time: a caller whose buffer is smaller than [`ProcInfoRecord::ENCODED_LEN`]
/// gets nothing even if the table isn't exhausted, mirroring a `Read` of
/// `sizeof(procinfo)` bytes producing exactly one record.
pub fn read_procinfo(state: &KernelState, cursor: &mut ProcInfoCursor, buf: &mut [u8]) -> usize {
    if buf.len() < ProcInfoRecord::ENCODED_LEN {
        return 0;
    }
    match cursor.advance(state) {
        Some(record) => {
            let encoded = record.encode();
            buf[..encoded.len()].copy_from_slice(&encoded);
            encoded.len()
        }
        None => 0,
    }
}
