//! The bounded pipe: a ring buffer with one reader and one writer endpoint,
//! blocking on two condition variables (SPEC_FULL §4.2).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use log::{debug, warn};

use crate::arena::Id;
use crate::error::{KernelError, KernelResult};
use crate::ids::BUFFER_SIZE;
use crate::kernel::KernelState;
use crate::sync::wait_while;

pub type PipeId = Id<PipeObj>;

/// The shared ring buffer behind a pipe's two endpoints.
pub struct PipeObj {
    buffer: VecDeque<u8>,
    reader_open: bool,
    writer_open: bool,
    producer: Condvar,
    consumer: Condvar,
}

impl PipeObj {
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::with_capacity(BUFFER_SIZE),
            reader_open: true,
            writer_open: true,
            producer: Condvar::new(),
            consumer: Condvar::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.buffer.len() == BUFFER_SIZE
    }
    fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Both endpoints gone: the pipe's arena slot may be reclaimed.
    pub fn is_orphaned(&self) -> bool {
        !self.reader_open && !self.writer_open
    }
}

impl Default for PipeObj {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocate a fresh pipe with both endpoints open.
pub fn spawn_pipe(state: &mut KernelState) -> PipeId {
    state.pipes.insert(PipeObj::new())
}

/// Write up to `buf.len()` bytes, blocking while the buffer is full and the
/// reader is still open. Returns the count written, which may be a short
/// write if the buffer filled mid-copy. Returns `Err(BrokenPipe)` if the pipe
/// is gone or the reader has already closed.
pub fn write_pipe(
    mutex: &Mutex<KernelState>,
    pipe_id: PipeId,
    buf: &[u8],
) -> KernelResult<usize> {
    let mut guard = mutex.lock().expect("kernel mutex poisoned");

    {
        let pipe = pipe_obj(&guard, pipe_id)?;
        if !pipe.reader_open {
            warn!("pipe {:?}: write to closed reader", pipe_id);
            return Err(KernelError::BrokenPipe);
        }
    }

    guard = wait_while(
        guard,
        |s: &KernelState| &s.pipes.get(pipe_id).expect("pipe vanished under lock").producer,
        |s| {
            let pipe = s.pipes.get(pipe_id).expect("pipe vanished under lock");
            pipe.is_full() && pipe.reader_open
        },
    );

    let pipe = pipe_obj_mut(&mut guard, pipe_id)?;
    if !pipe.reader_open {
        return Err(KernelError::BrokenPipe);
    }
    let mut written = 0;
    while written < buf.len() {
        if pipe.is_full() {
            pipe.consumer.notify_all();
            debug!("pipe {:?}: short write of {} bytes (buffer full)", pipe_id, written);
            return Ok(written);
        }
        pipe.buffer.push_back(buf[written]);
        written += 1;
    }
    pipe.consumer.notify_all();
    Ok(written)
}

/// Read up to `buf.len()` bytes, blocking while the buffer is empty and the
/// writer is still open. Returns 0 on EOF (empty buffer, writer closed).
pub fn read_pipe(mutex: &Mutex<KernelState>, pipe_id: PipeId, buf: &mut [u8]) -> KernelResult<usize> {
    let mut guard = mutex.lock().expect("kernel mutex poisoned");

    {
        let pipe = pipe_obj(&guard, pipe_id)?;
        if pipe.is_empty() && !pipe.writer_open {
            return Ok(0);
        }
    }

    guard = wait_while(
        guard,
        |s: &KernelState| &s.pipes.get(pipe_id).expect("pipe vanished under lock").consumer,
        |s| {
            let pipe = s.pipes.get(pipe_id).expect("pipe vanished under lock");
            pipe.is_empty() && pipe.writer_open
        },
    );

    let pipe = pipe_obj_mut(&mut guard, pipe_id)?;
    if pipe.is_empty() {
        // Writer must have closed while we held the lock between checks.
        return Ok(0);
    }
    let mut read = 0;
    while read < buf.len() {
        match pipe.buffer.pop_front() {
            Some(byte) => {
                buf[read] = byte;
                read += 1;
            }
            None => {
                if pipe.writer_open {
                    pipe.producer.notify_all();
                }
                return Ok(read);
            }
        }
    }
    pipe.producer.notify_all();
    Ok(read)
}

/// Close the read endpoint and wake any blocked writer.
///
/// The arena slot itself is never reclaimed: a writer can still be mid-wait
/// on `producer` (parked, lock released) at the instant both endpoints have
/// closed, and freeing the slot out from under that wait would dangle the
/// raw pointer `sync::wait_while` holds into it. Orphaned pipes are cheap
/// and bounded by the number of pipes a run creates, so this crate leaks the
/// slot rather than reclaiming it — see `arena::Arena`'s slot-boxing note.
pub fn close_reader(state: &mut KernelState, pipe_id: PipeId) {
    if let Some(pipe) = state.pipes.get_mut(pipe_id) {
        pipe.reader_open = false;
        pipe.producer.notify_all();
        if pipe.is_orphaned() {
            debug!("pipe {:?}: orphaned, retaining slot", pipe_id);
        }
    }
}

/// Close the write endpoint and wake any blocked reader. See
/// [`close_reader`] for why the slot is never reclaimed.
pub fn close_writer(state: &mut KernelState, pipe_id: PipeId) {
    if let Some(pipe) = state.pipes.get_mut(pipe_id) {
        pipe.writer_open = false;
        pipe.consumer.notify_all();
        if pipe.is_orphaned() {
            debug!("pipe {:?}: orphaned, retaining slot", pipe_id);
        }
    }
}

fn pipe_obj(state: &KernelState, id: PipeId) -> KernelResult<&PipeObj> {
    state
        .pipes
        .get(id)
        .ok_or(KernelError::InvalidHandle { kind: "pipe" })
}

fn pipe_obj_mut(state: &mut KernelState, id: PipeId) -> KernelResult<&mut PipeObj> {
    state
        .pipes
        .get_mut(id)
        .ok_or(KernelError::InvalidHandle { kind: "pipe" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Pid;
    use crate::kernel::Kernel;

    #[test]
    fn write_then_read_is_in_order() {
        let kernel = Kernel::new();
        let (read_fid, write_fid) = kernel.pipe(Pid::INIT).unwrap();

        kernel.write(Pid::INIT, write_fid, b"abc").unwrap();
        kernel.write(Pid::INIT, write_fid, b"def").unwrap();

        let mut buf = [0u8; 6];
        let n = kernel.read(Pid::INIT, read_fid, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"abcdef");
    }

    #[test]
    fn closing_both_ends_does_not_panic() {
        let kernel = Kernel::new();
        let (read_fid, write_fid) = kernel.pipe(Pid::INIT).unwrap();
        kernel.close(Pid::INIT, write_fid).unwrap();
        kernel.close(Pid::INIT, read_fid).unwrap();
    }
}
