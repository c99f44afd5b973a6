//! io_uring implementation of [`Backend`].
//!
//! Each submitted operation owns an entry in an in-flight slab that keeps
//! its buffers (and, for connects, the socket address) alive until the CQE
//! arrives. The slab key is the kernel-side `user_data`; the adapter's
//! [`UserData`] is stored alongside and handed back in the [`Completion`].

use std::io;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use io_uring::types::{Fd, Timespec};
use io_uring::{IoUring, cqueue, opcode, squeue};
use slab::Slab;
use tracing::{debug, warn};

use crate::backend::{Backend, Completion, SocketId};
use crate::completion::UserData;
use crate::config::Config;
use crate::error::Error;

/// Kernel `user_data` of the loop tick timeout.
const TICK_KEY: u64 = u64::MAX;

enum InFlight {
    Connect {
        user_data: UserData,
        // Must stay valid until the connect CQE arrives.
        _addr: Box<libc::sockaddr_storage>,
    },
    Read {
        user_data: UserData,
        buf: BytesMut,
    },
    Write {
        user_data: UserData,
        _data: Bytes,
    },
}

/// Convert a `SocketAddr` to a `sockaddr_storage`. Returns the address length.
fn socket_addr_to_sockaddr(addr: SocketAddr, storage: &mut libc::sockaddr_storage) -> u32 {
    // Zero the storage to avoid uninitialised padding bytes.
    unsafe {
        std::ptr::write_bytes(
            storage as *mut _ as *mut u8,
            0,
            std::mem::size_of::<libc::sockaddr_storage>(),
        );
    }
    match addr {
        SocketAddr::V4(v4) => {
            let sa = storage as *mut _ as *mut libc::sockaddr_in;
            unsafe {
                (*sa).sin_family = libc::AF_INET as libc::sa_family_t;
                (*sa).sin_port = v4.port().to_be();
                (*sa).sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            }
            std::mem::size_of::<libc::sockaddr_in>() as u32
        }
        SocketAddr::V6(v6) => {
            let sa = storage as *mut _ as *mut libc::sockaddr_in6;
            unsafe {
                (*sa).sin6_family = libc::AF_INET6 as libc::sa_family_t;
                (*sa).sin6_port = v6.port().to_be();
                (*sa).sin6_flowinfo = v6.flowinfo();
                (*sa).sin6_addr.s6_addr = v6.ip().octets();
                (*sa).sin6_scope_id = v6.scope_id();
            }
            std::mem::size_of::<libc::sockaddr_in6>() as u32
        }
    }
}

/// Completion backend over a single io_uring instance.
pub struct UringBackend {
    ring: IoUring,
    sockets: Slab<OwnedFd>,
    ops: Slab<InFlight>,
    /// Reusable CQE drain buffer: (kernel user_data, result).
    cqe_batch: Vec<(u64, i32)>,
    /// Tick timespec; must stay put while the timeout SQE is armed.
    tick_ts: Box<Timespec>,
    tick_armed: bool,
    tcp_nodelay: bool,
}

impl UringBackend {
    /// Create and configure the io_uring instance.
    pub fn new(config: &Config) -> Result<Self, Error> {
        config.validate()?;
        let cq_entries = config
            .sq_entries
            .checked_mul(4)
            .unwrap_or(config.sq_entries);

        let mut builder = IoUring::<squeue::Entry, cqueue::Entry>::builder();
        builder.setup_cqsize(cq_entries);
        builder.setup_coop_taskrun();
        builder.setup_single_issuer();
        let ring = match builder.build(config.sq_entries) {
            Ok(ring) => ring,
            Err(e) => {
                // Older kernels reject the taskrun flags; retry without them.
                debug!(error = %e, "io_uring setup flags rejected, retrying plain");
                IoUring::<squeue::Entry, cqueue::Entry>::builder()
                    .setup_cqsize(cq_entries)
                    .build(config.sq_entries)
                    .map_err(|e| Error::RingSetup(e.to_string()))?
            }
        };

        Ok(UringBackend {
            ring,
            sockets: Slab::with_capacity(config.max_handles as usize),
            ops: Slab::with_capacity(config.max_handles as usize * 2),
            cqe_batch: Vec::with_capacity(cq_entries as usize),
            tick_ts: Box::new(Timespec::new()),
            tick_armed: false,
            tcp_nodelay: config.tcp_nodelay,
        })
    }

    /// Number of operations submitted and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.ops.len()
    }

    fn raw_fd(&self, socket: SocketId) -> io::Result<i32> {
        self.sockets
            .get(socket.0 as usize)
            .map(|fd| fd.as_raw_fd())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
    }

    /// Push an SQE; on a full SQ, submit first to make room.
    ///
    /// # Safety
    /// The SQE must reference valid memory for the lifetime of the operation.
    unsafe fn push_sqe(&mut self, entry: squeue::Entry) -> io::Result<()> {
        unsafe {
            if self.ring.submission().push(&entry).is_err() {
                self.ring.submit()?;
                if self.ring.submission().push(&entry).is_err() {
                    return Err(io::Error::other("SQ still full after submit"));
                }
            }
        }
        Ok(())
    }

    fn open_socket(&self, addr: SocketAddr) -> io::Result<OwnedFd> {
        let domain = match addr {
            SocketAddr::V4(_) => libc::AF_INET,
            SocketAddr::V6(_) => libc::AF_INET6,
        };
        let raw = unsafe {
            libc::socket(
                domain,
                libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                0,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: `raw` is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        if self.tcp_nodelay {
            let one: libc::c_int = 1;
            let rc = unsafe {
                libc::setsockopt(
                    fd.as_raw_fd(),
                    libc::IPPROTO_TCP,
                    libc::TCP_NODELAY,
                    &one as *const libc::c_int as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                )
            };
            if rc < 0 {
                warn!(error = %io::Error::last_os_error(), "failed to set TCP_NODELAY");
            }
        }
        Ok(fd)
    }

    fn arm_tick(&mut self, timeout: Duration) {
        if self.tick_armed {
            return;
        }
        *self.tick_ts = Timespec::new()
            .sec(timeout.as_secs())
            .nsec(timeout.subsec_nanos());
        let entry = opcode::Timeout::new(&*self.tick_ts as *const Timespec)
            .build()
            .user_data(TICK_KEY);
        // Safety: `tick_ts` is boxed and not replaced while armed.
        if unsafe { self.push_sqe(entry) }.is_ok() {
            self.tick_armed = true;
        }
    }
}

impl Backend for UringBackend {
    fn connect(&mut self, addr: SocketAddr, user_data: UserData) -> io::Result<SocketId> {
        let fd = self.open_socket(addr)?;
        let raw = fd.as_raw_fd();

        let mut storage: Box<libc::sockaddr_storage> = Box::new(unsafe { std::mem::zeroed() });
        let addrlen = socket_addr_to_sockaddr(addr, &mut storage);
        let addr_ptr = &*storage as *const libc::sockaddr_storage as *const libc::sockaddr;

        let key = self.ops.insert(InFlight::Connect {
            user_data,
            _addr: storage,
        });
        let entry = opcode::Connect::new(Fd(raw), addr_ptr, addrlen)
            .build()
            .user_data(key as u64);
        // Safety: the address lives in the in-flight slab until the CQE.
        if let Err(e) = unsafe { self.push_sqe(entry) } {
            self.ops.remove(key);
            return Err(e);
        }
        Ok(SocketId(self.sockets.insert(fd) as u32))
    }

    fn read(&mut self, socket: SocketId, mut buf: BytesMut, user_data: UserData) -> io::Result<()> {
        let raw = self.raw_fd(socket)?;
        let ptr = buf.as_mut_ptr();
        let len = buf.len() as u32;
        let key = self.ops.insert(InFlight::Read { user_data, buf });
        let entry = opcode::Recv::new(Fd(raw), ptr, len)
            .build()
            .user_data(key as u64);
        // Safety: the buffer's heap allocation does not move with the
        // BytesMut and lives in the in-flight slab until the CQE.
        if let Err(e) = unsafe { self.push_sqe(entry) } {
            self.ops.remove(key);
            return Err(e);
        }
        Ok(())
    }

    fn write(&mut self, socket: SocketId, data: Bytes, user_data: UserData) -> io::Result<()> {
        let raw = self.raw_fd(socket)?;
        let ptr = data.as_ptr();
        let len = data.len() as u32;
        let key = self.ops.insert(InFlight::Write {
            user_data,
            _data: data,
        });
        let entry = opcode::Send::new(Fd(raw), ptr, len)
            .flags(libc::MSG_NOSIGNAL)
            .build()
            .user_data(key as u64);
        // Safety: the bytes live in the in-flight slab until the CQE.
        if let Err(e) = unsafe { self.push_sqe(entry) } {
            self.ops.remove(key);
            return Err(e);
        }
        Ok(())
    }

    fn shutdown_read(&mut self, socket: SocketId) {
        let Ok(raw) = self.raw_fd(socket) else {
            return;
        };
        // A pending recv completes with 0 once the read side is shut down.
        if unsafe { libc::shutdown(raw, libc::SHUT_RD) } < 0 {
            debug!(
                socket = socket.0,
                error = %io::Error::last_os_error(),
                "read shutdown failed"
            );
        }
    }

    fn release(&mut self, socket: SocketId) {
        // Dropping the OwnedFd closes the socket.
        if self.sockets.try_remove(socket.0 as usize).is_none() {
            warn!(socket = socket.0, "release of unknown socket");
        }
    }

    fn wait(
        &mut self,
        timeout: Option<Duration>,
        completions: &mut Vec<Completion>,
    ) -> io::Result<()> {
        let submitted = match timeout {
            Some(d) if d.is_zero() => self.ring.submit().map(|_| ()),
            Some(d) => {
                self.arm_tick(d);
                self.ring.submit_and_wait(1).map(|_| ())
            }
            None => self.ring.submit_and_wait(1).map(|_| ()),
        };
        if let Err(e) = submitted
            && !matches!(e.raw_os_error(), Some(libc::EINTR) | Some(libc::EBUSY))
        {
            return Err(e);
        }

        self.cqe_batch.clear();
        for cqe in self.ring.completion() {
            self.cqe_batch.push((cqe.user_data(), cqe.result()));
        }

        for i in 0..self.cqe_batch.len() {
            let (key, result) = self.cqe_batch[i];
            if key == TICK_KEY {
                self.tick_armed = false;
                continue;
            }
            let Some(op) = self.ops.try_remove(key as usize) else {
                warn!(key, result, "CQE for unknown operation");
                continue;
            };
            completions.push(match op {
                InFlight::Connect { user_data, .. } => Completion::new(user_data, result),
                InFlight::Read { user_data, mut buf } => {
                    buf.truncate(result.max(0) as usize);
                    Completion::with_buf(user_data, result, buf)
                }
                InFlight::Write { user_data, .. } => Completion::new(user_data, result),
            });
        }
        Ok(())
    }
}

impl Drop for UringBackend {
    fn drop(&mut self) {
        // The kernel may still touch buffers of operations that never
        // completed; leak them rather than free memory under it.
        let ops = std::mem::take(&mut self.ops);
        if !ops.is_empty() {
            warn!(in_flight = ops.len(), "dropping ring with operations in flight");
            std::mem::forget(ops);
        }
        if self.tick_armed {
            let ts = std::mem::replace(&mut self.tick_ts, Box::new(Timespec::new()));
            std::mem::forget(ts);
        }
    }
}
