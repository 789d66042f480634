//! The `Kernel`: the single entry point a caller constructs, owning the
//! process table and port map as explicit fields (SPEC_FULL §2/§3) rather
//! than lazy statics, and tying the FID/FCB machinery together with the
//! lower-level `process`/`fs`/`socket` modules for every syscall.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};

use crate::arena::Arena;
use crate::error::{KernelError, KernelResult};
use crate::fs::pipe::{self, PipeObj};
use crate::fs::procinfo::{self, ProcInfoCursor, ProcInfoRecord};
use crate::fs::{FcbId, StreamKind, StreamTable};
use crate::ids::{Fid, Pid, Tid, MAX_PORT, MAX_PROC, PROCINFO_MAX_ARGS_SIZE};
use crate::process::pcb::{Pcb, ProcessState};
use crate::process::ptcb::Ptcb;
use crate::process::{self};
use crate::socket::{self, RequestObj, ShutdownMode, SocketId, SocketObj};
use crate::task::{task_address, Task};

thread_local! {
    /// The `Tid` owning whichever OS thread is currently executing, set by
    /// the trampoline before invoking the caller's `Task`. `ThreadSelf` reads
    /// this rather than being passed a handle, since a `Task` closure has no
    /// other way to learn its own identity.
    static CURRENT_TID: Cell<Option<Tid>> = const { Cell::new(None) };
}

/// The current OS thread's own `Tid`, or `None` if it was not spawned by
/// this kernel (e.g. the thread driving the test harness itself).
pub fn thread_self() -> Option<Tid> {
    CURRENT_TID.with(Cell::get)
}

/// Every kernel object table, guarded by one mutex per SPEC_FULL §5's
/// "mutex held across the syscall body except during an explicit wait"
/// model. `processes` is preallocated at `MAX_PROC` and never resized —
/// see `process::pcb::Pcb`'s doc comment.
pub struct KernelState {
    pub(crate) processes: Vec<Pcb>,
    pub(crate) free_pids: VecDeque<Pid>,
    pub(crate) ptcbs: Arena<Ptcb>,
    pub(crate) fcbs: StreamTable,
    pub(crate) pipes: Arena<PipeObj>,
    pub(crate) sockets: Arena<SocketObj>,
    pub(crate) requests: Arena<RequestObj>,
    pub(crate) port_map: Vec<Option<SocketId>>,
}

impl KernelState {
    fn new() -> Self {
        let mut processes = Vec::with_capacity(MAX_PROC);
        processes.resize_with(MAX_PROC, Pcb::free);
        let free_pids = (2..MAX_PROC).map(Pid::from_usize).collect();
        Self {
            processes,
            free_pids,
            ptcbs: Arena::new(),
            fcbs: StreamTable::new(),
            pipes: Arena::new(),
            sockets: Arena::new(),
            requests: Arena::new(),
            port_map: vec![None; MAX_PORT + 1],
        }
    }

    /// Assemble one `ProcInfoRecord` for `pid`, or `None` if the slot is
    /// FREE (`ProcInfoCursor::advance` skips those).
    pub(crate) fn procinfo_record(&self, pid: Pid) -> Option<ProcInfoRecord> {
        let pcb = self.processes.get(pid.as_usize())?;
        if pcb.state == ProcessState::Free {
            return None;
        }
        let mut args = [0u8; PROCINFO_MAX_ARGS_SIZE];
        let n = pcb.args.len().min(PROCINFO_MAX_ARGS_SIZE);
        args[..n].copy_from_slice(&pcb.args[..n]);
        Some(ProcInfoRecord {
            pid: pid.as_usize() as i32,
            ppid: pcb.parent.map(|p| p.as_usize() as i32).unwrap_or(-1),
            alive: pcb.state == ProcessState::Alive,
            thread_count: pcb.thread_count,
            main_task: pcb.main_task.as_ref().map(task_address).unwrap_or(0),
            argl: pcb.argl,
            args,
        })
    }
}

/// Decrement `fcb_id`'s refcount and, if it just reached zero, run the
/// backing stream's close and return the slot to the stream table's free
/// list. The FCB slot itself (unlike pipe/socket/request slots) is safe to
/// reclaim: nothing ever waits on a condvar embedded in an `FcbEntry`.
pub(crate) fn close_fcb(state: &mut KernelState, fcb_id: FcbId) -> KernelResult<()> {
    let kind = state
        .fcbs
        .get(fcb_id)
        .ok_or(KernelError::InvalidHandle { kind: "fid" })?
        .kind;
    if !state.fcbs.decref(fcb_id) {
        return Ok(());
    }
    match kind {
        StreamKind::PipeReadEnd(pipe_id) => pipe::close_reader(state, pipe_id),
        StreamKind::PipeWriteEnd(pipe_id) => pipe::close_writer(state, pipe_id),
        StreamKind::SocketDefault(socket_id) | StreamKind::SocketPeer(socket_id) => {
            socket::close_socket(state, socket_id)?;
        }
        StreamKind::ProcInfo(_) => {}
    }
    state.fcbs.free(fcb_id);
    Ok(())
}

/// Reserve `n` fresh FCBs of `kind` (identical for every slot) in `owner`'s
/// FID table, all-or-nothing. On failure, nothing is reserved and no FCB is
/// left dangling.
fn reserve_fids(
    state: &mut KernelState,
    owner: Pid,
    kinds: &[StreamKind],
) -> KernelResult<Vec<Fid>> {
    let fcb_ids: Vec<FcbId> = kinds.iter().map(|&kind| state.fcbs.alloc(kind)).collect();
    let result = process::get_pcb_mut(state, owner)?.fids.reserve(fcb_ids.len(), &fcb_ids);
    if result.is_err() {
        for fcb_id in fcb_ids {
            state.fcbs.free(fcb_id);
        }
    }
    result
}

fn lookup_fid(state: &KernelState, owner: Pid, fid: Fid) -> KernelResult<FcbId> {
    process::get_pcb(state, owner)?
        .fids
        .get(fid)
        .ok_or(KernelError::InvalidHandle { kind: "fid" })
}

/// The kernel handle a caller constructs once and shares across every
/// thread it spawns; `Exec`/`CreateThread` clone it into the trampoline so
/// the spawned thread can report its own exit back through the same state.
#[derive(Clone)]
pub struct Kernel {
    state: Arc<Mutex<KernelState>>,
}

impl Kernel {
    /// Bootstrap pid 0 (idle) and pid 1 (init) as permanently ALIVE,
    /// taskless, parentless processes, then return a ready-to-use kernel.
    pub fn new() -> Self {
        let mut state = KernelState::new();
        process::bootstrap(&mut state, Pid::IDLE);
        process::bootstrap(&mut state, Pid::INIT);
        info!("kernel: bootstrapped pid 0 (idle) and pid 1 (init)");
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, KernelState> {
        self.state.lock().expect("kernel mutex poisoned")
    }

    // ---- Pipe ---------------------------------------------------------

    pub fn pipe(&self, owner: Pid) -> KernelResult<(Fid, Fid)> {
        let mut guard = self.lock();
        let pipe_id = pipe::spawn_pipe(&mut guard);
        let fids = reserve_fids(
            &mut guard,
            owner,
            &[StreamKind::PipeReadEnd(pipe_id), StreamKind::PipeWriteEnd(pipe_id)],
        )?;
        debug!("pipe: pid {} got fids {}/{}", owner, fids[0], fids[1]);
        Ok((fids[0], fids[1]))
    }

    // ---- Stream read/write/close (pipe ends, sockets, procinfo) -------

    pub fn write(&self, owner: Pid, fid: Fid, buf: &[u8]) -> KernelResult<usize> {
        let kind = {
            let guard = self.lock();
            let fcb_id = lookup_fid(&guard, owner, fid)?;
            guard.fcbs.get(fcb_id).ok_or(KernelError::InvalidHandle { kind: "fid" })?.kind
        };
        match kind {
            StreamKind::PipeWriteEnd(pipe_id) => pipe::write_pipe(&self.state, pipe_id, buf),
            // The null-write half of a read-end FCB: discard, report success.
            StreamKind::PipeReadEnd(_) | StreamKind::SocketDefault(_) => Ok(buf.len()),
            StreamKind::SocketPeer(socket_id) => socket::write_socket(&self.state, socket_id, buf),
            StreamKind::ProcInfo(_) => Err(KernelError::InvalidArgument { name: "fid" }),
        }
    }

    pub fn read(&self, owner: Pid, fid: Fid, buf: &mut [u8]) -> KernelResult<usize> {
        let kind = {
            let guard = self.lock();
            let fcb_id = lookup_fid(&guard, owner, fid)?;
            guard.fcbs.get(fcb_id).ok_or(KernelError::InvalidHandle { kind: "fid" })?.kind
        };
        match kind {
            StreamKind::PipeReadEnd(pipe_id) => pipe::read_pipe(&self.state, pipe_id, buf),
            // The null-read half of a write-end FCB: zero-fill, report success.
            StreamKind::PipeWriteEnd(_) | StreamKind::SocketDefault(_) => {
                buf.fill(0);
                Ok(buf.len())
            }
            StreamKind::SocketPeer(socket_id) => socket::read_socket(&self.state, socket_id, buf),
            StreamKind::ProcInfo(mut cursor) => {
                let mut guard = self.lock();
                let n = procinfo::read_procinfo(&guard, &mut cursor, buf);
                let fcb_id = lookup_fid(&guard, owner, fid)?;
                if let Some(entry) = guard.fcbs.get_mut(fcb_id) {
                    entry.kind = StreamKind::ProcInfo(cursor);
                }
                Ok(n)
            }
        }
    }

    /// Close `fid` in `owner`'s FID table, running the backing stream's
    /// close once the last reference is gone.
    pub fn close(&self, owner: Pid, fid: Fid) -> KernelResult<()> {
        let mut guard = self.lock();
        let fcb_id = process::get_pcb_mut(&mut guard, owner)?
            .fids
            .close(fid)
            .ok_or(KernelError::InvalidHandle { kind: "fid" })?;
        close_fcb(&mut guard, fcb_id)
    }

    // ---- Socket ---------------------------------------------------------

    pub fn socket(&self, owner: Pid, port: u16) -> KernelResult<Fid> {
        let mut guard = self.lock();
        let socket_id = socket::spawn_socket(&mut guard, port)?;
        let fcb_id = guard.fcbs.alloc(StreamKind::SocketDefault(socket_id));
        socket::bind_fcb(&mut guard, socket_id, fcb_id)?;
        match process::get_pcb_mut(&mut guard, owner)?.fids.reserve(1, &[fcb_id]) {
            Ok(fids) => {
                debug!("socket: pid {} got fid {} on port {}", owner, fids[0], port);
                Ok(fids[0])
            }
            Err(e) => {
                guard.fcbs.free(fcb_id);
                Err(e)
            }
        }
    }

    fn socket_id_of(&self, guard: &KernelState, owner: Pid, fid: Fid) -> KernelResult<SocketId> {
        let fcb_id = lookup_fid(guard, owner, fid)?;
        match guard.fcbs.get(fcb_id).ok_or(KernelError::InvalidHandle { kind: "fid" })?.kind {
            StreamKind::SocketDefault(id) | StreamKind::SocketPeer(id) => Ok(id),
            _ => Err(KernelError::InvalidArgument { name: "fid" }),
        }
    }

    pub fn listen(&self, owner: Pid, fid: Fid) -> KernelResult<()> {
        let mut guard = self.lock();
        let socket_id = self.socket_id_of(&guard, owner, fid)?;
        socket::listen(&mut guard, socket_id)
    }

    pub fn accept(&self, owner: Pid, fid: Fid) -> KernelResult<Fid> {
        let listener_id = {
            let guard = self.lock();
            self.socket_id_of(&guard, owner, fid)?
        };
        let request_id = socket::wait_for_request(&self.state, listener_id)?;

        let mut guard = self.lock();
        let client_id = guard
            .requests
            .get(request_id)
            .ok_or(KernelError::InvalidHandle { kind: "request" })?
            .client();

        let server_id = match socket::spawn_socket(&mut guard, 0) {
            Ok(id) => id,
            Err(_) => {
                socket::resolve_request(&mut guard, request_id, crate::socket::AdmitState::Refused);
                return Err(KernelError::ResourceExhausted { resource: "fid" });
            }
        };
        let server_fcb = guard.fcbs.alloc(StreamKind::SocketDefault(server_id));
        if socket::bind_fcb(&mut guard, server_id, server_fcb).is_err() {
            guard.fcbs.free(server_fcb);
            socket::resolve_request(&mut guard, request_id, crate::socket::AdmitState::Refused);
            return Err(KernelError::ResourceExhausted { resource: "fid" });
        }

        let fids = match process::get_pcb_mut(&mut guard, owner)?.fids.reserve(1, &[server_fcb]) {
            Ok(fids) => fids,
            Err(e) => {
                guard.fcbs.free(server_fcb);
                socket::resolve_request(&mut guard, request_id, crate::socket::AdmitState::Refused);
                return Err(e);
            }
        };

        socket::admit_peers(&mut guard, client_id, server_id)?;
        socket::resolve_request(&mut guard, request_id, crate::socket::AdmitState::Admitted);
        debug!("accept: pid {} got fid {} (peer of {:?})", owner, fids[0], client_id);
        Ok(fids[0])
    }

    pub fn connect(
        &self,
        owner: Pid,
        fid: Fid,
        port: u16,
        timeout: Option<Duration>,
    ) -> KernelResult<()> {
        let client_id = {
            let guard = self.lock();
            self.socket_id_of(&guard, owner, fid)?
        };
        socket::connect(&self.state, client_id, port, timeout)
    }

    pub fn shutdown(&self, owner: Pid, fid: Fid, how: ShutdownMode) -> KernelResult<()> {
        let mut guard = self.lock();
        let socket_id = self.socket_id_of(&guard, owner, fid)?;
        socket::shutdown(&mut guard, socket_id, how)
    }

    // ---- Process --------------------------------------------------------

    pub fn get_pid(&self, owner: Pid) -> Pid {
        owner
    }

    pub fn get_ppid(&self, owner: Pid) -> KernelResult<Option<Pid>> {
        Ok(process::get_pcb(&self.lock(), owner)?.parent)
    }

    /// `Exec`: register the process-table slot, then spawn the real OS
    /// thread that runs `task` and reports `Exit`/`ThreadExit` back through
    /// this same kernel.
    pub fn exec(&self, parent: Pid, task: Task, argl: i32, args: Vec<u8>) -> KernelResult<Pid> {
        let pid = {
            let mut guard = self.lock();
            process::exec(&mut guard, Some(parent), Some(task.clone()), argl, args.clone())?
        };
        let tid = {
            let mut guard = self.lock();
            process::create_thread_slot(&mut guard, pid, task.clone(), argl, args.clone())?
        };
        self.spawn_trampoline(pid, tid, task, argl, args, true);
        debug!("exec: pid {} spawned under parent {}", pid, parent);
        Ok(pid)
    }

    pub fn exit(&self, pid: Pid, exit_value: i32) {
        let mut guard = self.lock();
        let _ = process::exit(&mut guard, pid, exit_value);
    }

    pub fn wait_child(&self, caller: Pid, target: Option<Pid>) -> KernelResult<(Pid, i32)> {
        process::wait_child(&self.state, caller, target)
    }

    pub fn open_info(&self, owner: Pid) -> KernelResult<Fid> {
        let mut guard = self.lock();
        let fcb_id = guard.fcbs.alloc(StreamKind::ProcInfo(ProcInfoCursor::new()));
        match process::get_pcb_mut(&mut guard, owner)?.fids.reserve(1, &[fcb_id]) {
            Ok(fids) => Ok(fids[0]),
            Err(e) => {
                guard.fcbs.free(fcb_id);
                Err(e)
            }
        }
    }

    // ---- Threads ----------------------------------------------------------

    pub fn create_thread(&self, owner: Pid, task: Task, argl: i32, args: Vec<u8>) -> KernelResult<Tid> {
        let tid = {
            let mut guard = self.lock();
            process::create_thread_slot(&mut guard, owner, task.clone(), argl, args.clone())?
        };
        self.spawn_trampoline(owner, tid, task, argl, args, false);
        Ok(tid)
    }

    pub fn thread_self(&self) -> Option<Tid> {
        thread_self()
    }

    pub fn thread_join(&self, caller: Pid, tid: Tid) -> KernelResult<i32> {
        process::join(&self.state, caller, thread_self(), tid)
    }

    pub fn thread_detach(&self, caller: Pid, tid: Tid) -> KernelResult<()> {
        process::detach(&mut self.lock(), caller, tid)
    }

    pub fn thread_exit(&self, tid: Tid, exit_value: i32) {
        process::thread_exit(&mut self.lock(), tid, exit_value);
    }

    /// Spawn the real OS thread backing a main task (`is_main == true`) or a
    /// `CreateThread`-spawned thread. Registers `tid` in thread-local storage
    /// before running `task`, then performs the matching `Exit`/`ThreadExit`
    /// bookkeeping on return — the "sleep in Exited, never resumed" step
    /// from SPEC_FULL §10.3 is modeled by simply letting this thread end.
    fn spawn_trampoline(&self, owner: Pid, tid: Tid, task: Task, argl: i32, args: Vec<u8>, is_main: bool) {
        let kernel = self.clone();
        std::thread::spawn(move || {
            CURRENT_TID.with(|c| c.set(Some(tid)));
            let exit_value = task(argl, &args);
            kernel.thread_exit(tid, exit_value);
            if is_main {
                kernel.exit(owner, exit_value);
            }
        });
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
