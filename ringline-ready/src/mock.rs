//! Scripted in-memory backend.
//!
//! Operations issued by the adapter are parked per socket until the caller
//! completes them explicitly (`complete_connect`, `deliver`,
//! `complete_write`, ...). Completions are handed out by the next
//! [`Backend::wait`] in the order they were scripted, which makes every
//! interleaving of consumer calls and completions reproducible.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::backend::{Backend, Completion, SocketId};
use crate::completion::UserData;

#[derive(Debug)]
struct MockSocket {
    addr: SocketAddr,
    connect: Option<UserData>,
    reads: VecDeque<(UserData, BytesMut)>,
    writes: VecDeque<(UserData, Bytes)>,
    /// Sizes of every write issued, in order.
    issued: Vec<usize>,
    /// Bytes confirmed written.
    written: Vec<u8>,
    read_shutdown: bool,
    released: bool,
}

/// Completion backend driven by test code.
#[derive(Debug, Default)]
pub struct MockBackend {
    sockets: Vec<MockSocket>,
    ready: VecDeque<(SocketId, Completion)>,
    refuse_next: Option<i32>,
    released_with_pending: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `connect`, `read` or `write` call fail with `errno`
    /// without issuing anything.
    pub fn refuse_next(&mut self, errno: i32) {
        self.refuse_next = Some(errno);
    }

    /// Complete the pending connect with `result` (0 or a negated errno).
    pub fn complete_connect(&mut self, socket: SocketId, result: i32) -> bool {
        let Some(ud) = self.socket_mut(socket).and_then(|s| s.connect.take()) else {
            return false;
        };
        self.ready.push_back((socket, Completion::new(ud, result)));
        true
    }

    /// Complete the oldest pending read with as much of `data` as fits in
    /// its buffer. Returns the number of bytes delivered.
    pub fn deliver(&mut self, socket: SocketId, data: &[u8]) -> Option<usize> {
        let (ud, mut buf) = self.socket_mut(socket)?.reads.pop_front()?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        buf.truncate(n);
        self.ready.push_back((socket, Completion::with_buf(ud, n as i32, buf)));
        Some(n)
    }

    /// Complete the oldest pending read with end-of-stream.
    pub fn deliver_eof(&mut self, socket: SocketId) -> bool {
        let Some((ud, mut buf)) = self.socket_mut(socket).and_then(|s| s.reads.pop_front()) else {
            return false;
        };
        buf.clear();
        self.ready.push_back((socket, Completion::with_buf(ud, 0, buf)));
        true
    }

    /// Complete the oldest pending read with `-errno`.
    pub fn fail_read(&mut self, socket: SocketId, errno: i32) -> bool {
        let Some((ud, _)) = self.socket_mut(socket).and_then(|s| s.reads.pop_front()) else {
            return false;
        };
        self.ready.push_back((socket, Completion::new(ud, -errno)));
        true
    }

    /// Complete the oldest pending write with `result`. A positive result
    /// records that many bytes as written.
    pub fn complete_write(&mut self, socket: SocketId, result: i32) -> bool {
        let Some(s) = self.socket_mut(socket) else {
            return false;
        };
        let Some((ud, data)) = s.writes.pop_front() else {
            return false;
        };
        if result > 0 {
            let n = (result as usize).min(data.len());
            s.written.extend_from_slice(&data[..n]);
        }
        self.ready.push_back((socket, Completion::new(ud, result)));
        true
    }

    /// Complete the oldest pending write in full. Returns its size.
    pub fn complete_write_all(&mut self, socket: SocketId) -> Option<usize> {
        let len = self.socket(socket)?.writes.front()?.1.len();
        self.complete_write(socket, len as i32).then_some(len)
    }

    /// Complete the oldest pending write with `-errno`.
    pub fn fail_write(&mut self, socket: SocketId, errno: i32) -> bool {
        self.complete_write(socket, -errno)
    }

    pub fn connect_pending(&self, socket: SocketId) -> bool {
        self.socket(socket).is_some_and(|s| s.connect.is_some())
    }

    pub fn pending_reads(&self, socket: SocketId) -> usize {
        self.socket(socket).map_or(0, |s| s.reads.len())
    }

    pub fn pending_writes(&self, socket: SocketId) -> usize {
        self.socket(socket).map_or(0, |s| s.writes.len())
    }

    /// Operations issued on `socket` and not yet completed.
    pub fn pending_ops(&self, socket: SocketId) -> usize {
        self.socket(socket).map_or(0, |s| {
            usize::from(s.connect.is_some()) + s.reads.len() + s.writes.len()
        })
    }

    /// Size of the buffer handed to the oldest pending read.
    pub fn read_len(&self, socket: SocketId) -> Option<usize> {
        self.socket(socket)?.reads.front().map(|(_, buf)| buf.len())
    }

    /// Sizes of every write issued on `socket`, in order (resubmissions
    /// included).
    pub fn writes_issued(&self, socket: SocketId) -> &[usize] {
        self.socket(socket).map_or(&[], |s| s.issued.as_slice())
    }

    /// Bytes confirmed written on `socket`.
    pub fn written(&self, socket: SocketId) -> &[u8] {
        self.socket(socket).map_or(&[], |s| s.written.as_slice())
    }

    pub fn addr(&self, socket: SocketId) -> Option<SocketAddr> {
        self.socket(socket).map(|s| s.addr)
    }

    /// Whether the adapter asked for the read side to be shut down.
    pub fn is_read_shutdown(&self, socket: SocketId) -> bool {
        self.socket(socket).is_some_and(|s| s.read_shutdown)
    }

    pub fn is_released(&self, socket: SocketId) -> bool {
        self.socket(socket).is_some_and(|s| s.released)
    }

    /// Whether any socket was released while it still had operations in
    /// flight.
    pub fn released_with_pending(&self) -> bool {
        self.released_with_pending
    }

    /// Completions scripted but not yet handed out by `wait`.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    fn socket(&self, socket: SocketId) -> Option<&MockSocket> {
        self.sockets.get(socket.0 as usize)
    }

    fn socket_mut(&mut self, socket: SocketId) -> Option<&mut MockSocket> {
        self.sockets.get_mut(socket.0 as usize)
    }

    fn check_refused(&mut self) -> io::Result<()> {
        match self.refuse_next.take() {
            Some(errno) => Err(io::Error::from_raw_os_error(errno)),
            None => Ok(()),
        }
    }

    fn live_socket(&mut self, socket: SocketId) -> io::Result<&mut MockSocket> {
        self.socket_mut(socket)
            .filter(|s| !s.released)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }
}

impl Backend for MockBackend {
    fn connect(&mut self, addr: SocketAddr, user_data: UserData) -> io::Result<SocketId> {
        self.check_refused()?;
        let id = SocketId(self.sockets.len() as u32);
        self.sockets.push(MockSocket {
            addr,
            connect: Some(user_data),
            reads: VecDeque::new(),
            writes: VecDeque::new(),
            issued: Vec::new(),
            written: Vec::new(),
            read_shutdown: false,
            released: false,
        });
        Ok(id)
    }

    fn read(&mut self, socket: SocketId, buf: BytesMut, user_data: UserData) -> io::Result<()> {
        self.check_refused()?;
        self.live_socket(socket)?.reads.push_back((user_data, buf));
        Ok(())
    }

    fn write(&mut self, socket: SocketId, data: Bytes, user_data: UserData) -> io::Result<()> {
        self.check_refused()?;
        let s = self.live_socket(socket)?;
        s.issued.push(data.len());
        s.writes.push_back((user_data, data));
        Ok(())
    }

    fn shutdown_read(&mut self, socket: SocketId) {
        // Pending reads stay parked; tests complete them explicitly.
        if let Some(s) = self.socket_mut(socket) {
            s.read_shutdown = true;
        }
    }

    fn release(&mut self, socket: SocketId) {
        let mut pending = false;
        if let Some(s) = self.socket_mut(socket) {
            pending = s.connect.is_some() || !s.reads.is_empty() || !s.writes.is_empty();
            s.released = true;
        }
        let undelivered = self.ready.iter().any(|(s, _)| *s == socket);
        self.released_with_pending |= pending || undelivered;
    }

    fn wait(
        &mut self,
        _timeout: Option<Duration>,
        completions: &mut Vec<Completion>,
    ) -> io::Result<()> {
        completions.extend(self.ready.drain(..).map(|(_, c)| c));
        Ok(())
    }
}
