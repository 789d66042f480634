//! End-to-end pipe scenarios: FIFO ordering, back-pressure, and EOF.

mod support;

use std::thread;

use nanokernel_core::error::KernelError;
use nanokernel_core::ids::{Pid, BUFFER_SIZE};
use nanokernel_core::kernel::Kernel;

/// A write larger than `BUFFER_SIZE` must block until the reader drains the
/// buffer in chunks, and every byte must arrive in order.
#[test]
fn pipe_back_pressure_with_chunked_reads() {
    let kernel = Kernel::new();
    let (read_fid, write_fid) = kernel.pipe(Pid::INIT).unwrap();

    let payload: Vec<u8> = (0..(BUFFER_SIZE as u32 + 1))
        .map(|i| (i % 251) as u8)
        .collect();

    let writer = {
        let kernel = kernel.clone();
        let payload = payload.clone();
        thread::spawn(move || {
            let mut total = 0;
            while total < payload.len() {
                let n = kernel
                    .write(Pid::INIT, write_fid, &payload[total..])
                    .unwrap();
                assert!(n > 0, "write must make progress once the reader drains");
                total += n;
            }
            kernel.close(Pid::INIT, write_fid).unwrap();
        })
    };

    let mut received = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = kernel.read(Pid::INIT, read_fid, &mut chunk).unwrap();
        if n == 0 {
            break;
        }
        received.extend_from_slice(&chunk[..n]);
    }

    writer.join().unwrap();
    assert_eq!(received, payload);
    kernel.close(Pid::INIT, read_fid).unwrap();
}

/// Closing the writer while the reader still has buffered bytes drains them
/// first; only an empty buffer with the writer gone reports EOF.
#[test]
fn pipe_eof_after_writer_closes() {
    let kernel = Kernel::new();
    let (read_fid, write_fid) = kernel.pipe(Pid::INIT).unwrap();

    kernel.write(Pid::INIT, write_fid, b"tail bytes").unwrap();
    kernel.close(Pid::INIT, write_fid).unwrap();

    let mut buf = [0u8; 32];
    let n = kernel.read(Pid::INIT, read_fid, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"tail bytes");

    let n = kernel.read(Pid::INIT, read_fid, &mut buf).unwrap();
    assert_eq!(n, 0, "empty buffer + closed writer must report EOF, not block");

    kernel.close(Pid::INIT, read_fid).unwrap();
}

/// Writing once the reader has gone away fails instead of blocking forever.
#[test]
fn pipe_write_after_reader_closed() {
    let kernel = Kernel::new();
    let (read_fid, write_fid) = kernel.pipe(Pid::INIT).unwrap();

    kernel.close(Pid::INIT, read_fid).unwrap();
    let err = kernel.write(Pid::INIT, write_fid, b"x").unwrap_err();
    assert_eq!(err, KernelError::BrokenPipe);

    kernel.close(Pid::INIT, write_fid).unwrap();
}
