//! Boundary to the completion-style I/O backend.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::completion::UserData;

/// Backend-visible socket identifier.
///
/// Held exclusively by one handle and returned to the backend with
/// [`Backend::release`] only when that handle is destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub u32);

/// Outcome of one backend operation.
///
/// `result` follows io_uring CQE conventions: `>= 0` is a byte count
/// (0 for a successful connect, 0 for end-of-stream on a read), `< 0` is a
/// negated errno.
#[derive(Debug)]
pub struct Completion {
    /// The `user_data` the operation was issued with.
    pub user_data: UserData,
    pub result: i32,
    /// For reads: the buffer handed to [`Backend::read`], truncated to the
    /// bytes received.
    pub buf: Option<BytesMut>,
}

impl Completion {
    pub fn new(user_data: UserData, result: i32) -> Self {
        Completion {
            user_data,
            result,
            buf: None,
        }
    }

    pub fn with_buf(user_data: UserData, result: i32, buf: BytesMut) -> Self {
        Completion {
            user_data,
            result,
            buf: Some(buf),
        }
    }
}

/// A completion-style I/O backend.
///
/// Every operation that returns `Ok` produces exactly one [`Completion`]
/// carrying the same `user_data`, delivered from [`wait`](Backend::wait) in
/// issue order for a given socket. An operation that returns `Err` was not
/// issued and produces no completion.
pub trait Backend {
    /// Create a socket and start an asynchronous connect to `addr`.
    fn connect(&mut self, addr: SocketAddr, user_data: UserData) -> io::Result<SocketId>;

    /// Start an asynchronous read into `buf[..]`.
    ///
    /// The backend owns `buf` until the completion hands it back.
    fn read(&mut self, socket: SocketId, buf: BytesMut, user_data: UserData) -> io::Result<()>;

    /// Start an asynchronous write of `data`. A short write completes with
    /// the number of bytes actually written.
    fn write(&mut self, socket: SocketId, data: Bytes, user_data: UserData) -> io::Result<()>;

    /// Make an in-flight read on `socket` complete promptly (end-of-stream
    /// or error) instead of waiting for the peer. Called when the consumer
    /// closes a handle whose standing read is still in flight. Writes are
    /// not affected.
    fn shutdown_read(&mut self, socket: SocketId);

    /// Close the socket. Called once, after every operation on it completed.
    fn release(&mut self, socket: SocketId);

    /// Drive the backend, appending finished operations to `completions`.
    ///
    /// `None` blocks until at least one completion is available,
    /// `Some(Duration::ZERO)` never blocks.
    fn wait(&mut self, timeout: Option<Duration>, completions: &mut Vec<Completion>)
    -> io::Result<()>;
}
