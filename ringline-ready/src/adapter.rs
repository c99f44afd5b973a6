use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::backend::{Backend, Completion, SocketId};
use crate::completion::{OpTag, UserData};
use crate::config::Config;
use crate::error::{Error, SockError};
use crate::handle::{HandleId, HandleState, HandleTable};
use crate::metrics;
use crate::readiness::{Interest, Readiness};

/// Consumer readiness callback.
///
/// Receives the adapter itself so it can call `recv`, `send`, `close` or
/// `set_interest` re-entrantly.
pub type ReadinessCallback<B> = Box<dyn FnMut(&mut Adapter<B>, HandleId, Readiness)>;

/// Upper bound on loop passes [`Adapter::shutdown`] spends draining.
const SHUTDOWN_PASSES: usize = 100;

/// Handle for stopping [`Adapter::run`] from another thread.
///
/// The stop is observed after the current loop pass, so it takes effect
/// within one tick timeout.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// Readiness-style socket API driven by a completion-style [`Backend`].
///
/// Single-threaded: every consumer call and every completion runs on the
/// thread that owns the adapter.
pub struct Adapter<B: Backend> {
    pub(crate) backend: B,
    /// Registry resolving `user_data` back to handles.
    pub(crate) handles: HandleTable,
    /// Parallel to the handle slots. A callback is `None` while it runs.
    pub(crate) callbacks: Vec<Option<ReadinessCallback<B>>>,
    /// Slot indices with a flush scheduled for the next loop pass.
    pub(crate) flush_queue: Vec<HandleId>,
    /// Handles whose re-requested notification waits for the next pass.
    notify_queue: Vec<HandleId>,
    /// Pre-allocated batch buffer for draining completions.
    completions: Vec<Completion>,
    read_ahead_capacity: usize,
    write_capacity: usize,
    tick_timeout: Option<Duration>,
    stop_flag: Arc<AtomicBool>,
}

impl<B: Backend> Adapter<B> {
    /// Create an adapter over `backend`.
    pub fn new(backend: B, config: &Config) -> Result<Self, Error> {
        config.validate()?;
        let mut callbacks = Vec::with_capacity(config.max_handles as usize);
        callbacks.resize_with(config.max_handles as usize, || None);
        Ok(Adapter {
            backend,
            handles: HandleTable::new(config.max_handles),
            callbacks,
            flush_queue: Vec::new(),
            notify_queue: Vec::new(),
            completions: Vec::with_capacity(config.sq_entries as usize * 4),
            read_ahead_capacity: config.read_ahead_capacity,
            write_capacity: config.write_capacity,
            tick_timeout: if config.tick_timeout_us > 0 {
                Some(Duration::from_micros(config.tick_timeout_us))
            } else {
                None
            },
            stop_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    // ── Consumer API ─────────────────────────────────────────────────

    /// Create a handle and start connecting it to `addr`.
    ///
    /// The handle becomes writable once the connect completes; read-ahead
    /// starts at the same moment.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<HandleId, Error> {
        let id = self
            .handles
            .allocate(self.read_ahead_capacity, self.write_capacity)
            .ok_or(Error::HandleLimitReached)?;
        self.callbacks[id.index()] = None;
        metrics::HANDLES_OPENED.increment();
        metrics::HANDLES_ACTIVE.increment();

        let user_data = UserData::encode(OpTag::Connect, id.index, id.generation);
        match self.backend.connect(addr, user_data) {
            Ok(socket) => {
                if let Some(h) = self.handles.get_mut(id) {
                    h.socket = Some(socket);
                    h.acquire();
                }
                debug!(handle = id.index, ?socket, %addr, "handle connecting");
                Ok(id)
            }
            Err(e) => {
                // Nothing was issued; drop the consumer hold right away.
                self.release_ref(id);
                Err(Error::Io(e))
            }
        }
    }

    /// Replace the interest mask. If a newly requested direction is already
    /// ready, the callback fires before this returns.
    pub fn set_interest(&mut self, id: HandleId, interest: Interest) -> Result<(), SockError> {
        let h = self
            .handles
            .get_open_mut(id)
            .ok_or(SockError::InvalidHandle)?;
        h.notifier.set_interest(interest);
        self.synthesize(id);
        Ok(())
    }

    /// Current interest mask.
    pub fn interest(&self, id: HandleId) -> Result<Interest, SockError> {
        self.handles
            .get(id)
            .filter(|h| h.is_open())
            .map(|h| h.notifier.interest())
            .ok_or(SockError::InvalidHandle)
    }

    /// Install the readiness callback, replacing any previous one. The new
    /// callback is told about every interested condition that already holds.
    pub fn register_callback<F>(&mut self, id: HandleId, callback: F) -> Result<(), SockError>
    where
        F: FnMut(&mut Adapter<B>, HandleId, Readiness) + 'static,
    {
        let h = self
            .handles
            .get_open_mut(id)
            .ok_or(SockError::InvalidHandle)?;
        h.notifier.rearm(Interest::BOTH);
        self.callbacks[id.index()] = Some(Box::new(callback));
        self.synthesize(id);
        Ok(())
    }

    /// Non-blocking receive.
    ///
    /// Returns the number of bytes copied (possibly fewer than `buf.len()`),
    /// `WouldBlock` when nothing is buffered yet, the pending backend error
    /// once buffered bytes are drained, or `EndOfStream` after the peer
    /// closed and every byte was read.
    pub fn recv(&mut self, id: HandleId, buf: &mut [u8]) -> Result<usize, SockError> {
        let h = self
            .handles
            .get_open_mut(id)
            .ok_or(SockError::InvalidHandle)?;
        if !h.connected && h.error.is_none() {
            h.notifier.rearm(Interest::READABLE);
            return Err(SockError::WouldBlock);
        }
        let result = h.read.recv(buf, h.error);
        match result {
            Ok(n) if n > 0 => {
                // Drain first, then refill.
                self.issue_read(id);
            }
            Err(SockError::WouldBlock) => h.notifier.rearm(Interest::READABLE),
            _ => {}
        }
        result
    }

    /// Non-blocking send.
    ///
    /// Accepts as many bytes as the write buffer has room for and returns
    /// that count; the caller retries the remainder after the next writable
    /// notification. Bytes go out in one batched backend write on the next
    /// loop pass.
    pub fn send(&mut self, id: HandleId, data: &[u8]) -> Result<usize, SockError> {
        let h = self
            .handles
            .get_open_mut(id)
            .ok_or(SockError::InvalidHandle)?;
        if !h.connected && h.error.is_none() {
            h.notifier.rearm(Interest::WRITABLE);
            return Err(SockError::WouldBlock);
        }
        let result = h.write.send(data, h.error);
        match result {
            Ok(n) if n > 0 => self.schedule_flush(id),
            Err(SockError::WouldBlock) => h.notifier.rearm(Interest::WRITABLE),
            _ => {}
        }
        result
    }

    /// Close the handle.
    ///
    /// The handle becomes invalid for the consumer immediately. Memory and
    /// the backend socket are released once every in-flight operation has
    /// completed. Bytes already accepted by `send` are still flushed unless
    /// an error is pending.
    pub fn close(&mut self, id: HandleId) -> Result<(), SockError> {
        let h = self
            .handles
            .get_open_mut(id)
            .ok_or(SockError::InvalidHandle)?;
        h.state = HandleState::Closing;
        h.read.clear();
        h.notifier.set_interest(Interest::NONE);
        if h.error.is_some() {
            h.write.clear();
        }
        if h.read.in_flight()
            && let Some(socket) = h.socket
        {
            self.backend.shutdown_read(socket);
        }
        debug!(handle = id.index, refs = h.refs, "handle closed by consumer");
        // The callback may be running right now; it is dropped when it
        // returns instead.
        self.callbacks[id.index()] = None;
        self.release_ref(id);
        Ok(())
    }

    // ── Loop hooks ───────────────────────────────────────────────────

    /// Run one loop pass: deliver notifications deferred by the previous
    /// pass, submit scheduled flushes, wait up to `timeout` for backend
    /// completions, and route each one. Returns the number of completions
    /// processed.
    pub fn run_once(&mut self, timeout: Option<Duration>) -> Result<usize, Error> {
        self.notify_deferred();
        self.flush_scheduled();

        // Work left for the next pass must not wait on the backend.
        let timeout = if self.notify_queue.is_empty() && self.flush_queue.is_empty() {
            timeout
        } else {
            Some(Duration::ZERO)
        };
        let mut batch = std::mem::take(&mut self.completions);
        batch.clear();
        if let Err(e) = self.backend.wait(timeout, &mut batch) {
            self.completions = batch;
            return Err(Error::Io(e));
        }
        let count = batch.len();
        for completion in batch.drain(..) {
            self.dispatch(completion);
        }
        self.completions = batch;
        Ok(count)
    }

    /// Run loop passes until [`stop`](Self::stop) is called (from a callback)
    /// or a [`StopHandle`] fires. The stop request is consumed on return.
    pub fn run(&mut self) -> Result<(), Error> {
        while !self.stop_flag.load(Ordering::Relaxed) {
            self.run_once(self.tick_timeout)?;
        }
        self.stop_flag.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Ask [`run`](Self::run) to return after the current pass.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    /// Cross-thread stop handle.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: self.stop_flag.clone(),
        }
    }

    /// Close every open handle and drive the backend until all handles are
    /// destroyed (bounded number of passes).
    pub fn shutdown(&mut self) -> Result<(), Error> {
        for id in self.handles.open_ids() {
            if let Err(e) = self.close(id) {
                debug!(handle = id.index, error = %e, "close during shutdown failed");
            }
        }
        for _ in 0..SHUTDOWN_PASSES {
            if self.handles.live_count() == 0 {
                break;
            }
            self.run_once(Some(Duration::from_millis(10)))?;
        }
        debug!(remaining = self.handles.live_count(), "adapter shutdown");
        Ok(())
    }

    // ── Inspection ───────────────────────────────────────────────────

    /// Lifecycle state. Destroyed (or unknown) handles report `Destroyed`.
    pub fn state(&self, id: HandleId) -> HandleState {
        self.handles
            .get(id)
            .map_or(HandleState::Destroyed, |h| h.state)
    }

    /// Current reference count, including holds of in-flight operations.
    pub fn ref_count(&self, id: HandleId) -> Option<u32> {
        self.handles.get(id).map(|h| h.refs)
    }

    /// Captured backend error, if any.
    pub fn pending_error(&self, id: HandleId) -> Option<i32> {
        self.handles.get(id).and_then(|h| h.error)
    }

    /// Bytes waiting in the read-ahead buffer.
    pub fn buffered(&self, id: HandleId) -> usize {
        self.handles.get(id).map_or(0, |h| h.read.len())
    }

    /// Bytes accepted by `send` and not yet confirmed by the backend.
    pub fn queued(&self, id: HandleId) -> usize {
        self.handles
            .get(id)
            .map_or(0, |h| h.write.queued() + h.write.in_flight_len())
    }

    /// Backend socket held by the handle.
    pub fn socket(&self, id: HandleId) -> Option<SocketId> {
        self.handles.get(id).and_then(|h| h.socket)
    }

    /// Number of live handles (open or closing).
    pub fn handle_count(&self) -> usize {
        self.handles.live_count()
    }

    /// Maximum number of live handles.
    pub fn max_handles(&self) -> u32 {
        self.handles.max_slots()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // ── Lifecycle internals ──────────────────────────────────────────

    /// Drop one reference; destroys the handle when it was the last.
    pub(crate) fn release_ref(&mut self, id: HandleId) {
        let Some(h) = self.handles.get_mut(id) else {
            return;
        };
        if !h.release() {
            return;
        }
        let socket = self.handles.destroy(id.index);
        self.callbacks[id.index()] = None;
        if let Some(socket) = socket {
            self.backend.release(socket);
        }
        metrics::HANDLES_DESTROYED.increment();
        metrics::HANDLES_ACTIVE.decrement();
        debug!(handle = id.index, "handle destroyed");
    }

    /// Deliver pending readiness for `id` to its callback.
    ///
    /// The callback is taken out of its slot while it runs and the handle
    /// holds an extra reference, so the callback may close the handle or
    /// trigger further notifications on it. The first such notification is
    /// delivered once it returns; any raised by that re-delivery wait for
    /// the next loop pass.
    pub(crate) fn synthesize(&mut self, id: HandleId) {
        let mut redelivered = false;
        loop {
            let Some(h) = self.handles.get_mut(id) else {
                return;
            };
            if !h.is_open() {
                return;
            }
            if h.in_callback {
                h.notify_pending = true;
                return;
            }
            if self.callbacks[id.index()].is_none() {
                return;
            }
            let conditions = h.conditions();
            let Some(readiness) = h.notifier.poll(conditions) else {
                return;
            };
            let Some(mut callback) = self.callbacks[id.index()].take() else {
                return;
            };
            h.in_callback = true;
            h.acquire();
            metrics::NOTIFICATIONS_FIRED.increment();

            callback(self, id, readiness);

            // The reference taken above keeps the slot alive.
            let Some(h) = self.handles.get_mut(id) else {
                return;
            };
            h.in_callback = false;
            let again = std::mem::take(&mut h.notify_pending);
            let open = h.is_open();
            if open && self.callbacks[id.index()].is_none() {
                self.callbacks[id.index()] = Some(callback);
            }
            self.release_ref(id);
            if !again || !open {
                return;
            }
            if redelivered {
                self.defer_notify(id);
                return;
            }
            redelivered = true;
        }
    }

    fn defer_notify(&mut self, id: HandleId) {
        let Some(h) = self.handles.get_mut(id) else {
            return;
        };
        if !h.notify_deferred {
            h.notify_deferred = true;
            self.notify_queue.push(id);
        }
    }

    /// Deliver what the previous pass deferred. Anything these callbacks
    /// defer again lands in the fresh queue for the pass after.
    fn notify_deferred(&mut self) {
        let queue = std::mem::take(&mut self.notify_queue);
        for id in queue {
            if let Some(h) = self.handles.get_mut(id) {
                h.notify_deferred = false;
            }
            self.synthesize(id);
        }
    }
}
