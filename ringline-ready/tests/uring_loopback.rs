#![cfg(target_os = "linux")]
//! Integration tests: the io_uring backend against a real TCP peer.
//!
//! Each test starts a std echo server on a loopback port, drives the adapter
//! over `UringBackend`, and checks the echoed bytes. Tests are skipped when
//! io_uring is unavailable (old kernel, seccomp).

use std::cell::{Cell, RefCell};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::rc::Rc;
use std::time::Duration;

use ringline_ready::{Adapter, ConfigBuilder, HandleState, SockError, UringBackend};

// ── Helpers ─────────────────────────────────────────────────────────

fn adapter(read_cap: usize, write_cap: usize) -> Option<Adapter<UringBackend>> {
    let config = ConfigBuilder::new()
        .max_handles(16)
        .sq_entries(64)
        .read_ahead_capacity(read_cap)
        .write_capacity(write_cap)
        .build()
        .unwrap();
    match UringBackend::new(&config) {
        Ok(backend) => Some(Adapter::new(backend, &config).unwrap()),
        Err(e) => {
            eprintln!("skipping: io_uring unavailable: {e}");
            None
        }
    }
}

/// Echo every byte of one connection back until the peer closes.
fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut buf = [0u8; 8192];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
    });
    addr
}

/// Stop the loop after `timeout` so a broken test fails instead of hanging.
fn watchdog(adapter: &Adapter<UringBackend>, timeout: Duration) {
    let stop = adapter.stop_handle();
    std::thread::spawn(move || {
        std::thread::sleep(timeout);
        stop.stop();
    });
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Send `msg` through the adapter and collect the echo.
fn round_trip(a: &mut Adapter<UringBackend>, addr: SocketAddr, msg: Vec<u8>) -> Vec<u8> {
    let h = a.connect(addr).unwrap();
    let received = Rc::new(RefCell::new(Vec::new()));
    let sent = Rc::new(Cell::new(0usize));
    {
        let received = received.clone();
        let total = msg.len();
        a.register_callback(h, move |a, h, r| {
            if r.writable {
                while sent.get() < total {
                    match a.send(h, &msg[sent.get()..]) {
                        Ok(n) => sent.set(sent.get() + n),
                        Err(_) => break,
                    }
                }
            }
            if r.readable {
                let mut buf = [0u8; 1024];
                loop {
                    match a.recv(h, &mut buf) {
                        Ok(n) => received.borrow_mut().extend_from_slice(&buf[..n]),
                        Err(SockError::WouldBlock) => break,
                        Err(_) => {
                            a.stop();
                            break;
                        }
                    }
                }
                if received.borrow().len() >= total {
                    a.stop();
                }
            }
        })
        .unwrap();
    }

    watchdog(a, Duration::from_secs(10));
    a.run().unwrap();
    a.close(h).unwrap();
    received.take()
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn echo_small_message() {
    let Some(mut a) = adapter(4096, 4096) else {
        return;
    };
    let addr = echo_server();
    let msg = b"Hello, ringline-ready!".to_vec();
    let response = round_trip(&mut a, addr, msg.clone());
    assert_eq!(response, msg);
    a.shutdown().unwrap();
    assert_eq!(a.handle_count(), 0);
}

#[test]
fn echo_large_transfer_with_small_buffers() {
    let Some(mut a) = adapter(1024, 1024) else {
        return;
    };
    let addr = echo_server();
    let msg = pattern(256 * 1024);
    let response = round_trip(&mut a, addr, msg.clone());
    assert_eq!(response.len(), msg.len());
    assert!(response == msg, "echoed bytes differ");
    a.shutdown().unwrap();
}

#[test]
fn connect_refused_reports_error() {
    let Some(mut a) = adapter(4096, 4096) else {
        return;
    };
    // Bind then drop to get a port nobody listens on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let h = a.connect(addr).unwrap();
    let error = Rc::new(Cell::new(false));
    {
        let error = error.clone();
        a.register_callback(h, move |a, _, r| {
            if r.error {
                error.set(true);
                a.stop();
            }
        })
        .unwrap();
    }
    watchdog(&a, Duration::from_secs(10));
    a.run().unwrap();

    assert!(error.get());
    assert_eq!(a.state(h), HandleState::Error);
    assert_eq!(a.pending_error(h), Some(libc::ECONNREFUSED));
    let mut buf = [0u8; 8];
    assert_eq!(
        a.recv(h, &mut buf),
        Err(SockError::Backend(libc::ECONNREFUSED))
    );
    a.close(h).unwrap();
    assert_eq!(a.handle_count(), 0);
}
