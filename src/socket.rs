//! The socket layer: unbound/listener/peer endpoints, the accept/connect
//! rendezvous protocol, and full-duplex peering built from two pipes
//! (SPEC_FULL §4.3/§4.4).
//!
//! `SocketKind` is a proper sum type rather than the tagged union the
//! distilled spec's source carries, so reaching for listener-only or
//! peer-only fields on the wrong variant doesn't typecheck.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use log::{debug, warn};

use crate::arena::Id;
use crate::error::{KernelError, KernelResult};
use crate::fs::{pipe, FcbId, StreamKind};
use crate::ids::MAX_PORT;
use crate::kernel::KernelState;
use crate::sync::{wait_while, wait_while_timeout, WaitOutcome};

pub type SocketId = Id<SocketObj>;
pub type RequestId = Id<RequestObj>;

/// The two pipes and peer back-pointer that make a socket a full-duplex
/// peer endpoint. `send`/`receive` go to `None` individually under
/// `ShutDown`, independent of the other half.
pub struct PeerLinks {
    pub send: Option<pipe::PipeId>,
    pub receive: Option<pipe::PipeId>,
    pub peer: SocketId,
}

/// What kind of endpoint a socket currently is. `Closed` has no source
/// counterpart: it lets a parked `Accept` distinguish "still waiting" from
/// "the listener is gone" without resurrecting a freed slot (see
/// `arena::Arena::remove`'s note — socket slots are never reclaimed).
pub enum SocketKind {
    Unbound,
    Listener,
    Peer(PeerLinks),
    Closed,
}

/// One socket endpoint. The listener's request queue and its "non-empty"
/// condvar are always-present fields rather than nested inside
/// `SocketKind::Listener`, so closing a listener can swap `kind` away from
/// `Listener` without ever dropping a condvar a parked `Accept` still holds
/// a raw pointer into.
pub struct SocketObj {
    port: u16,
    kind: SocketKind,
    /// The FCB this socket is reached through. Set once by [`bind_fcb`]
    /// right after the socket and its FCB are both allocated — the two
    /// can't be constructed in either order alone, since each needs the
    /// other's id.
    fcb: Option<FcbId>,
    queue: VecDeque<RequestId>,
    queue_non_empty: Condvar,
}

impl SocketObj {
    fn is_listener(&self) -> bool {
        matches!(self.kind, SocketKind::Listener)
    }

    fn is_peer(&self) -> bool {
        matches!(self.kind, SocketKind::Peer(_))
    }
}

/// Outcome of a Connect handshake, replacing the source's overloaded
/// `admit_flag - 1` return value (0 = timeout-or-unset, 1 = admitted) with
/// an explicit enum (SPEC_FULL §9 open question).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitState {
    Pending,
    Admitted,
    Refused,
    TimedOut,
}

/// A queued connect attempt: one per `Connect` call sitting on a listener's
/// queue until `Accept` dequeues it or it times out.
pub struct RequestObj {
    client: SocketId,
    admit: AdmitState,
    connected: Condvar,
}

impl RequestObj {
    pub fn client(&self) -> SocketId {
        self.client
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    Read,
    Write,
    Both,
}

/// Allocate a fresh UNBOUND socket at `port`. `port == 0` (`NOPORT`) is
/// legal and means "anonymous, never listened on". The caller must follow
/// up with [`bind_fcb`] once it has allocated the owning FCB.
pub fn spawn_socket(state: &mut KernelState, port: u16) -> KernelResult<SocketId> {
    if port as usize > MAX_PORT {
        return Err(KernelError::InvalidArgument { name: "port" });
    }
    Ok(state.sockets.insert(SocketObj {
        port,
        kind: SocketKind::Unbound,
        fcb: None,
        queue: VecDeque::new(),
        queue_non_empty: Condvar::new(),
    }))
}

/// Record which FCB a freshly spawned socket is reached through.
pub fn bind_fcb(state: &mut KernelState, socket_id: SocketId, fcb: FcbId) -> KernelResult<()> {
    socket_obj_mut(state, socket_id)?.fcb = Some(fcb);
    Ok(())
}

fn fcb_of_obj(socket: &SocketObj) -> KernelResult<FcbId> {
    socket.fcb.ok_or(KernelError::InvalidHandle { kind: "socket" })
}

/// The FCB a socket is currently reached through.
pub fn fcb_of(state: &KernelState, socket_id: SocketId) -> KernelResult<FcbId> {
    fcb_of_obj(socket_obj(state, socket_id)?)
}

fn socket_obj(state: &KernelState, id: SocketId) -> KernelResult<&SocketObj> {
    state
        .sockets
        .get(id)
        .ok_or(KernelError::InvalidHandle { kind: "socket" })
}

fn socket_obj_mut(state: &mut KernelState, id: SocketId) -> KernelResult<&mut SocketObj> {
    state
        .sockets
        .get_mut(id)
        .ok_or(KernelError::InvalidHandle { kind: "socket" })
}

/// Transition an UNBOUND socket with a valid, unoccupied port to LISTENER
/// and publish it in the port map.
pub fn listen(state: &mut KernelState, socket_id: SocketId) -> KernelResult<()> {
    let port = {
        let socket = socket_obj(state, socket_id)?;
        if !matches!(socket.kind, SocketKind::Unbound) {
            return Err(KernelError::InvalidArgument { name: "socket" });
        }
        if socket.port == 0 || socket.port as usize > MAX_PORT {
            return Err(KernelError::InvalidArgument { name: "port" });
        }
        socket.port
    };
    if state.port_map[port as usize].is_some() {
        return Err(KernelError::ResourceExhausted { resource: "port" });
    }
    state.port_map[port as usize] = Some(socket_id);
    socket_obj_mut(state, socket_id)?.kind = SocketKind::Listener;
    Ok(())
}

/// Block until `listener_id`'s request queue is non-empty, then pop and
/// return the head request. Re-checks `kind == Listener` on every wakeup:
/// a broadcast can also come from the listener being closed.
pub fn wait_for_request(
    mutex: &Mutex<KernelState>,
    listener_id: SocketId,
) -> KernelResult<RequestId> {
    let mut guard = mutex.lock().expect("kernel mutex poisoned");
    loop {
        {
            let socket = socket_obj(&guard, listener_id)?;
            if !matches!(socket.kind, SocketKind::Listener) {
                return Err(KernelError::InvalidHandle { kind: "listener" });
            }
            if let Some(req) = socket.queue.front().copied() {
                socket_obj_mut(&mut guard, listener_id)?.queue.pop_front();
                return Ok(req);
            }
        }
        guard = wait_while(
            guard,
            |s: &KernelState| {
                &s.sockets
                    .get(listener_id)
                    .expect("listener vanished under lock")
                    .queue_non_empty
            },
            |s| {
                let socket = s
                    .sockets
                    .get(listener_id)
                    .expect("listener vanished under lock");
                matches!(socket.kind, SocketKind::Listener) && socket.queue.is_empty()
            },
        );
    }
}

/// Allocate the two cross-wired pipes for a freshly admitted peer pair and
/// promote both sockets to PEER, swapping their owning FCBs' `StreamKind`
/// to `SocketPeer` so reads/writes stop dispatching through the null-op
/// vtable.
pub fn admit_peers(
    state: &mut KernelState,
    client_id: SocketId,
    server_id: SocketId,
) -> KernelResult<()> {
    let client_to_server = pipe::spawn_pipe(state);
    let server_to_client = pipe::spawn_pipe(state);

    let client_fcb = fcb_of(state, client_id)?;
    let server_fcb = fcb_of(state, server_id)?;

    socket_obj_mut(state, client_id)?.kind = SocketKind::Peer(PeerLinks {
        send: Some(client_to_server),
        receive: Some(server_to_client),
        peer: server_id,
    });
    socket_obj_mut(state, server_id)?.kind = SocketKind::Peer(PeerLinks {
        send: Some(server_to_client),
        receive: Some(client_to_server),
        peer: client_id,
    });

    if let Some(entry) = state.fcbs.get_mut(client_fcb) {
        entry.kind = StreamKind::SocketPeer(client_id);
    }
    if let Some(entry) = state.fcbs.get_mut(server_fcb) {
        entry.kind = StreamKind::SocketPeer(server_id);
    }
    debug!("sockets {:?}/{:?}: admitted as peers", client_id, server_id);
    Ok(())
}

/// Mark `request_id`'s admission outcome and wake its Connect caller.
pub fn resolve_request(state: &mut KernelState, request_id: RequestId, admit: AdmitState) {
    if let Some(request) = state.requests.get_mut(request_id) {
        request.admit = admit;
        request.connected.notify_all();
    }
}

/// Allocate a request token for `client_id` and queue it for `listener_id`.
pub fn spawn_request(state: &mut KernelState, client_id: SocketId) -> RequestId {
    state.requests.insert(RequestObj {
        client: client_id,
        admit: AdmitState::Pending,
        connected: Condvar::new(),
    })
}

/// `Connect`: queue a request on `port`'s listener and wait for admission,
/// optionally with a timeout. On timeout, atomically unlinks the request
/// from the listener's queue before returning so a subsequent `Accept`
/// never dequeues an abandoned request — the correctness fix SPEC_FULL
/// calls out against the source's behavior.
pub fn connect(
    mutex: &Mutex<KernelState>,
    client_id: SocketId,
    port: u16,
    timeout: Option<Duration>,
) -> KernelResult<()> {
    if port == 0 || port as usize > MAX_PORT {
        return Err(KernelError::InvalidArgument { name: "port" });
    }
    let mut guard = mutex.lock().expect("kernel mutex poisoned");

    let listener_id = guard.port_map[port as usize]
        .ok_or(KernelError::InvalidArgument { name: "port" })?;
    {
        let listener = socket_obj(&guard, listener_id)?;
        if !matches!(listener.kind, SocketKind::Listener) {
            return Err(KernelError::InvalidArgument { name: "port" });
        }
        let client = socket_obj(&guard, client_id)?;
        if !matches!(client.kind, SocketKind::Unbound) || client_id == listener_id {
            return Err(KernelError::InvalidArgument { name: "socket" });
        }
    }

    let request_id = spawn_request(&mut guard, client_id);
    socket_obj_mut(&mut guard, listener_id)?
        .queue
        .push_back(request_id);
    socket_obj_mut(&mut guard, listener_id)?
        .queue_non_empty
        .notify_all();

    let outcome = match timeout {
        Some(timeout) => {
            let (next_guard, outcome) = wait_while_timeout(
                guard,
                |s: &KernelState| {
                    &s.requests
                        .get(request_id)
                        .expect("request vanished under lock")
                        .connected
                },
                timeout,
                |s| {
                    s.requests
                        .get(request_id)
                        .expect("request vanished under lock")
                        .admit
                        == AdmitState::Pending
                },
            );
            guard = next_guard;
            outcome
        }
        None => {
            guard = wait_while(
                guard,
                |s: &KernelState| {
                    &s.requests
                        .get(request_id)
                        .expect("request vanished under lock")
                        .connected
                },
                |s| {
                    s.requests
                        .get(request_id)
                        .expect("request vanished under lock")
                        .admit
                        == AdmitState::Pending
                },
            );
            WaitOutcome::Signaled
        }
    };

    if outcome == WaitOutcome::TimedOut {
        if let Some(listener) = guard.sockets.get_mut(listener_id) {
            listener.queue.retain(|&r| r != request_id);
        }
        resolve_request(&mut guard, request_id, AdmitState::TimedOut);
        warn!("connect: request {:?} timed out, unlinked from queue", request_id);
        return Err(KernelError::Timeout);
    }

    match guard
        .requests
        .get(request_id)
        .expect("request vanished under lock")
        .admit
    {
        AdmitState::Admitted => Ok(()),
        _ => Err(KernelError::InvalidHandle { kind: "request" }),
    }
}

/// `ShutDown`: half- or fully-close a PEER socket's pipes. `Read` tears
/// down the receive pipe's reader end; `Write` the send pipe's writer end;
/// `Both` does both. Either half can already be `None` from a prior call.
pub fn shutdown(state: &mut KernelState, socket_id: SocketId, how: ShutdownMode) -> KernelResult<()> {
    let (receive, send) = {
        let socket = socket_obj_mut(state, socket_id)?;
        let links = match &mut socket.kind {
            SocketKind::Peer(links) => links,
            _ => return Err(KernelError::InvalidArgument { name: "socket" }),
        };
        let receive = if matches!(how, ShutdownMode::Read | ShutdownMode::Both) {
            links.receive.take()
        } else {
            None
        };
        let send = if matches!(how, ShutdownMode::Write | ShutdownMode::Both) {
            links.send.take()
        } else {
            None
        };
        (receive, send)
    };
    if let Some(pipe_id) = receive {
        pipe::close_reader(state, pipe_id);
    }
    if let Some(pipe_id) = send {
        pipe::close_writer(state, pipe_id);
    }
    Ok(())
}

/// `Close` on a socket FCB: drops the last reference. UNBOUND is a no-op
/// beyond the generic FCB teardown; LISTENER wakes every parked `Accept`
/// and drains its queue, refusing every pending request rather than
/// leaving them to time out (SPEC_FULL §4.3's close-semantics note); PEER
/// shuts down both pipe halves. The `SocketObj` arena slot itself is never
/// freed (see `SocketKind::Closed`'s doc comment).
pub fn close_socket(state: &mut KernelState, socket_id: SocketId) -> KernelResult<()> {
    let was_listener = socket_obj(state, socket_id)?.is_listener();
    let was_peer = socket_obj(state, socket_id)?.is_peer();
    if was_listener {
        let port = socket_obj(state, socket_id)?.port;
        let pending: Vec<RequestId> = {
            let socket = socket_obj_mut(state, socket_id)?;
            socket.queue.drain(..).collect()
        };
        for request_id in pending {
            resolve_request(state, request_id, AdmitState::Refused);
        }
        if state.port_map[port as usize] == Some(socket_id) {
            state.port_map[port as usize] = None;
        }
        let socket = socket_obj_mut(state, socket_id)?;
        socket.queue_non_empty.notify_all();
        socket.kind = SocketKind::Closed;
    } else if was_peer {
        let (send, receive) = match &socket_obj(state, socket_id)?.kind {
            SocketKind::Peer(links) => (links.send, links.receive),
            _ => unreachable!("discriminant matched Peer above"),
        };
        if let Some(pipe_id) = receive {
            pipe::close_reader(state, pipe_id);
        }
        if let Some(pipe_id) = send {
            pipe::close_writer(state, pipe_id);
        }
        socket_obj_mut(state, socket_id)?.kind = SocketKind::Closed;
    } else {
        socket_obj_mut(state, socket_id)?.kind = SocketKind::Closed;
    }
    Ok(())
}

/// Dispatch a peer write through its send pipe.
pub fn write_socket(mutex: &Mutex<KernelState>, socket_id: SocketId, buf: &[u8]) -> KernelResult<usize> {
    let send_pipe = {
        let guard = mutex.lock().expect("kernel mutex poisoned");
        let socket = socket_obj(&guard, socket_id)?;
        match &socket.kind {
            SocketKind::Peer(links) => links.send.ok_or(KernelError::BrokenPipe)?,
            _ => return Err(KernelError::InvalidArgument { name: "socket" }),
        }
    };
    pipe::write_pipe(mutex, send_pipe, buf)
}

/// Dispatch a peer read through its receive pipe.
pub fn read_socket(mutex: &Mutex<KernelState>, socket_id: SocketId, buf: &mut [u8]) -> KernelResult<usize> {
    let receive_pipe = {
        let guard = mutex.lock().expect("kernel mutex poisoned");
        let socket = socket_obj(&guard, socket_id)?;
        match &socket.kind {
            SocketKind::Peer(links) => links.receive.ok_or(KernelError::BrokenPipe)?,
            _ => return Err(KernelError::InvalidArgument { name: "socket" }),
        }
    };
    pipe::read_pipe(mutex, receive_pipe, buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Pid;
    use crate::kernel::Kernel;

    #[test]
    fn socket_rejects_port_above_max() {
        let kernel = Kernel::new();
        let err = kernel.socket(Pid::INIT, (MAX_PORT + 1) as u16).unwrap_err();
        assert_eq!(err, KernelError::InvalidArgument { name: "port" });
    }

    #[test]
    fn listen_rejects_noport() {
        let kernel = Kernel::new();
        let fid = kernel.socket(Pid::INIT, 0).unwrap();
        let err = kernel.listen(Pid::INIT, fid).unwrap_err();
        assert_eq!(err, KernelError::InvalidArgument { name: "port" });
    }

    #[test]
    fn connect_rejects_unlisted_port() {
        let kernel = Kernel::new();
        let client_fid = kernel.socket(Pid::IDLE, 0).unwrap();
        let err = kernel
            .connect(Pid::IDLE, client_fid, 999, Some(std::time::Duration::from_millis(10)))
            .unwrap_err();
        assert_eq!(err, KernelError::InvalidArgument { name: "port" });
    }
}
