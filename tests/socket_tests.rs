//! End-to-end socket scenarios: accept/connect rendezvous, connect timeout,
//! and half-close.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use nanokernel_core::error::KernelError;
use nanokernel_core::ids::Pid;
use nanokernel_core::kernel::Kernel;
use nanokernel_core::socket::ShutdownMode;

/// A full accept/connect handshake yields a full-duplex peer pair: bytes
/// written on one side arrive on the other in both directions.
#[test]
fn accept_connect_handshake_is_full_duplex() {
    let kernel = Kernel::new();
    let server_fid = kernel.socket(Pid::INIT, 42).unwrap();
    kernel.listen(Pid::INIT, server_fid).unwrap();

    let accept_kernel = kernel.clone();
    let accept_thread = thread::spawn(move || accept_kernel.accept(Pid::INIT, server_fid).unwrap());
    thread::sleep(Duration::from_millis(20));

    let client_fid = kernel.socket(Pid::IDLE, 0).unwrap();
    kernel
        .connect(Pid::IDLE, client_fid, 42, Some(Duration::from_secs(1)))
        .unwrap();

    let peer_fid = accept_thread.join().unwrap();

    kernel.write(Pid::IDLE, client_fid, b"ping").unwrap();
    let mut buf = [0u8; 8];
    let n = kernel.read(Pid::INIT, peer_fid, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"ping");

    kernel.write(Pid::INIT, peer_fid, b"pong").unwrap();
    let n = kernel.read(Pid::IDLE, client_fid, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"pong");

    kernel.close(Pid::IDLE, client_fid).unwrap();
    kernel.close(Pid::INIT, peer_fid).unwrap();
}

/// A Connect that times out must unlink its own request from the listener's
/// queue, so a later Accept never resolves off a stale, abandoned request.
#[test]
fn connect_timeout_leaves_no_stale_request() {
    let kernel = Kernel::new();
    let server_fid = kernel.socket(Pid::INIT, 77).unwrap();
    kernel.listen(Pid::INIT, server_fid).unwrap();

    let client_fid = kernel.socket(Pid::IDLE, 0).unwrap();
    let err = kernel
        .connect(Pid::IDLE, client_fid, 77, Some(Duration::from_millis(60)))
        .unwrap_err();
    assert_eq!(err, KernelError::Timeout);

    let (tx, rx) = mpsc::channel();
    let accept_kernel = kernel.clone();
    thread::spawn(move || {
        let result = accept_kernel.accept(Pid::INIT, server_fid);
        let _ = tx.send(result);
    });

    thread::sleep(Duration::from_millis(50));
    assert!(
        rx.try_recv().is_err(),
        "accept resolved off the timed-out client's abandoned request"
    );

    kernel.close(Pid::INIT, server_fid).unwrap();
    let result = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(result.is_err(), "accept on a closed listener must fail");

    kernel.close(Pid::IDLE, client_fid).unwrap();
}

/// ShutdownWrite on one peer closes that half only: the other side sees EOF
/// on read, and the shut-down side can no longer write.
#[test]
fn shutdown_write_produces_eof_on_peer() {
    let kernel = Kernel::new();
    let server_fid = kernel.socket(Pid::INIT, 9).unwrap();
    kernel.listen(Pid::INIT, server_fid).unwrap();

    let accept_kernel = kernel.clone();
    let accept_thread = thread::spawn(move || accept_kernel.accept(Pid::INIT, server_fid).unwrap());
    thread::sleep(Duration::from_millis(20));

    let client_fid = kernel.socket(Pid::IDLE, 0).unwrap();
    kernel
        .connect(Pid::IDLE, client_fid, 9, Some(Duration::from_secs(1)))
        .unwrap();
    let peer_fid = accept_thread.join().unwrap();

    kernel
        .shutdown(Pid::IDLE, client_fid, ShutdownMode::Write)
        .unwrap();

    let mut buf = [0u8; 8];
    let n = kernel.read(Pid::INIT, peer_fid, &mut buf).unwrap();
    assert_eq!(n, 0, "peer must observe EOF once the writer half is shut down");

    let err = kernel.write(Pid::IDLE, client_fid, b"late").unwrap_err();
    assert_eq!(err, KernelError::BrokenPipe);

    kernel.close(Pid::IDLE, client_fid).unwrap();
    kernel.close(Pid::INIT, peer_fid).unwrap();
}
