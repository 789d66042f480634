//! The stream table: open-file objects (FCBs) shared across processes via a
//! reference count, each carrying a tagged stream kind standing in for the
//! `{open, read, write, close}` vtable of SPEC_FULL §4.1.

pub mod pipe;
pub mod procinfo;

use crate::arena::{Arena, Id};
use crate::error::{KernelError, KernelResult};
use crate::ids::{Fid, Pid, MAX_FILEID};
use crate::socket::SocketId;

use pipe::PipeId;
use procinfo::ProcInfoCursor;

/// A generation-checked handle to a stream table entry.
pub type FcbId = Id<FcbEntry>;

/// What an open FCB is backed by, and which half of its vtable is wired in.
/// `PipeWriteEnd`/`SocketDefault` read as the "null read" half; `PipeReadEnd`
/// with writes rejected is the "null write" half — see SPEC_FULL §4.1/§4.2.
#[derive(Debug, Clone, Copy)]
pub enum StreamKind {
    PipeReadEnd(PipeId),
    PipeWriteEnd(PipeId),
    /// Unbound or Listener socket: both halves are still the null-ops.
    SocketDefault(SocketId),
    /// Socket promoted to Peer by `Accept`/`Connect` admission: both halves
    /// dispatch through the peer's pipes.
    SocketPeer(SocketId),
    ProcInfo(ProcInfoCursor),
}

/// One entry in the global stream table.
pub struct FcbEntry {
    pub kind: StreamKind,
    refcount: u32,
}

impl FcbEntry {
    fn new(kind: StreamKind) -> Self {
        Self { kind, refcount: 1 }
    }
}

/// The process-global stream table plus every process's FID table is
/// threaded through here as plain arguments rather than owned by this type,
/// since both live inside the single `KernelState` guarded by the kernel
/// mutex (see `crate::kernel`).
pub struct StreamTable {
    fcbs: Arena<FcbEntry>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self { fcbs: Arena::new() }
    }

    pub fn get(&self, id: FcbId) -> Option<&FcbEntry> {
        self.fcbs.get(id)
    }

    pub fn get_mut(&mut self, id: FcbId) -> Option<&mut FcbEntry> {
        self.fcbs.get_mut(id)
    }

    /// Allocate one fresh FCB with refcount 1, independent of any process's
    /// FID table (callers wire it into a FID table slot themselves).
    pub fn alloc(&mut self, kind: StreamKind) -> FcbId {
        self.fcbs.insert(FcbEntry::new(kind))
    }

    /// Increment an FCB's reference count (fork-style FID table inheritance).
    pub fn incref(&mut self, id: FcbId) {
        if let Some(entry) = self.fcbs.get_mut(id) {
            entry.refcount += 1;
        }
    }

    /// Decrement an FCB's reference count, returning `true` if it just
    /// dropped to zero (the caller must then run the stream's `close` and
    /// drop the slot via [`Self::free`]).
    pub fn decref(&mut self, id: FcbId) -> bool {
        match self.fcbs.get_mut(id) {
            Some(entry) => {
                entry.refcount -= 1;
                entry.refcount == 0
            }
            None => false,
        }
    }

    pub fn free(&mut self, id: FcbId) {
        self.fcbs.remove(id);
    }
}

impl Default for StreamTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A process's FID table: `MAX_FILEID` slots, each optionally referencing a
/// shared FCB.
#[derive(Clone)]
pub struct FidTable {
    slots: [Option<FcbId>; MAX_FILEID],
}

impl FidTable {
    pub fn new() -> Self {
        Self {
            slots: [None; MAX_FILEID],
        }
    }

    pub fn get(&self, fid: Fid) -> Option<FcbId> {
        self.slots.get(fid.as_usize()).copied().flatten()
    }

    /// All-or-nothing reservation of `n` free slots. On success, returns the
    /// fids in ascending order and marks the slots occupied by `placeholder`
    /// — callers must immediately overwrite each with the real FCB id.
    pub fn reserve(&mut self, n: usize, fcbs: &[FcbId]) -> KernelResult<Vec<Fid>> {
        debug_assert_eq!(n, fcbs.len());
        let free: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i)
            .take(n)
            .collect();
        if free.len() < n {
            return Err(KernelError::ResourceExhausted {
                resource: "fid table",
            });
        }
        for (&idx, &fcb) in free.iter().zip(fcbs) {
            self.slots[idx] = Some(fcb);
        }
        Ok(free.into_iter().map(|i| Fid(i as u32)).collect())
    }

    pub fn close(&mut self, fid: Fid) -> Option<FcbId> {
        self.slots.get_mut(fid.as_usize()).and_then(Option::take)
    }

    pub fn iter_open(&self) -> impl Iterator<Item = FcbId> + '_ {
        self.slots.iter().filter_map(|s| *s)
    }

    pub fn clear(&mut self) {
        self.slots = [None; MAX_FILEID];
    }

    /// Copy `parent`'s open slots verbatim and bump each referenced FCB's
    /// refcount, mirroring Exec's FID-table inheritance.
    pub fn inherit_from(&mut self, parent: &FidTable, fcbs: &mut StreamTable) {
        self.slots = parent.slots;
        for slot in self.slots.iter().flatten() {
            fcbs.incref(*slot);
        }
    }
}

impl Default for FidTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Tag identifying the owning process of a Pid-scoped operation; kept here
/// only for doc clarity at call sites in `kernel.rs`.
pub type Owner = Pid;

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_fcbs(table: &mut StreamTable, n: usize) -> Vec<FcbId> {
        (0..n)
            .map(|_| table.alloc(StreamKind::ProcInfo(ProcInfoCursor::new())))
            .collect()
    }

    #[test]
    fn reserve_is_all_or_nothing() {
        let mut table = StreamTable::new();
        let mut fids = FidTable::new();
        let fcbs = dummy_fcbs(&mut table, MAX_FILEID);
        fids.reserve(MAX_FILEID, &fcbs).unwrap();

        let overflow = table.alloc(StreamKind::ProcInfo(ProcInfoCursor::new()));
        let err = fids.reserve(1, &[overflow]);
        assert!(err.is_err(), "a full fid table must refuse a new reservation");
    }

    #[test]
    fn inherit_from_increments_the_shared_refcount() {
        let mut table = StreamTable::new();
        let fcb = table.alloc(StreamKind::ProcInfo(ProcInfoCursor::new()));
        let mut parent = FidTable::new();
        parent.reserve(1, &[fcb]).unwrap();

        let mut child = FidTable::new();
        child.inherit_from(&parent, &mut table);

        // Two references now: the parent's slot and the child's inherited copy.
        assert!(!table.decref(fcb), "one reference remains after dropping the first");
        assert!(table.decref(fcb), "dropping the second reference frees the fcb");
    }
}
