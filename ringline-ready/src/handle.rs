use crate::backend::SocketId;
use crate::read_ahead::ReadAhead;
use crate::readiness::{Conditions, Interest, Notifier};
use crate::write_batch::WriteBatch;

/// Lifecycle state of a socket handle.
///
/// `Connecting → Active → {Error, Closing} → Closing → Destroyed`.
/// `Error` is not terminal: buffered reads can still be drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Backend connect in flight.
    Connecting,
    /// Connected; read-ahead running.
    Active,
    /// A backend error is pending. Buffered bytes are still readable.
    Error,
    /// The consumer closed the handle; waiting for in-flight operations.
    Closing,
    /// Slot released (or the handle never existed).
    Destroyed,
}

/// Opaque handle token given to the consumer.
/// Encodes the slot index and generation for stale detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl HandleId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        HandleId { index, generation }
    }

    /// Returns the slot index. Useful for indexing into per-handle arrays.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Per-handle state owned by the registry.
pub(crate) struct SocketHandle {
    pub state: HandleState,
    /// Generation counter to detect stale HandleIds and completions.
    pub generation: u32,
    /// Holders: the consumer (until close), each in-flight backend
    /// operation, each scheduled flush, each running callback.
    pub refs: u32,
    pub socket: Option<SocketId>,
    /// Set once the backend connect succeeded.
    pub connected: bool,
    pub error: Option<i32>,
    pub read: ReadAhead,
    pub write: WriteBatch,
    pub notifier: Notifier,
    /// The consumer callback is running (it is out of its slot).
    pub in_callback: bool,
    /// A notification was requested while the callback was running.
    pub notify_pending: bool,
    /// Queued for delivery on the next loop pass.
    pub notify_deferred: bool,
}

impl SocketHandle {
    fn new() -> Self {
        SocketHandle {
            state: HandleState::Destroyed,
            generation: 0,
            refs: 0,
            socket: None,
            connected: false,
            error: None,
            read: ReadAhead::new(0),
            write: WriteBatch::new(0),
            notifier: Notifier::default(),
            in_callback: false,
            notify_pending: false,
            notify_deferred: false,
        }
    }

    pub fn id(&self, index: u32) -> HandleId {
        HandleId::new(index, self.generation)
    }

    fn is_live(&self) -> bool {
        self.state != HandleState::Destroyed
    }

    /// Visible to the consumer: not yet closed.
    pub fn is_open(&self) -> bool {
        matches!(
            self.state,
            HandleState::Connecting | HandleState::Active | HandleState::Error
        )
    }

    pub fn is_closing(&self) -> bool {
        self.state == HandleState::Closing
    }

    pub fn acquire(&mut self) {
        self.refs += 1;
    }

    /// Drop one reference. Returns true when the last one is gone.
    pub fn release(&mut self) -> bool {
        debug_assert!(self.refs > 0, "handle reference count underflow");
        self.refs = self.refs.saturating_sub(1);
        self.refs == 0
    }

    /// Record a backend error. The first error wins and is never cleared.
    /// A new error re-arms both directions so it is always reported.
    pub fn fail(&mut self, errno: i32) {
        if self.error.is_none() {
            self.error = Some(errno);
            self.notifier.rearm(Interest::BOTH);
        }
        if matches!(self.state, HandleState::Connecting | HandleState::Active) {
            self.state = HandleState::Error;
        }
    }

    /// Current readable/writable/error truth for the synthesizer.
    pub fn conditions(&self) -> Conditions {
        let error = self.error.is_some();
        Conditions {
            readable: error || (self.connected && (!self.read.is_empty() || self.read.eof())),
            writable: error || (self.connected && self.write.writable()),
            error,
        }
    }
}

/// Registry of socket handles with a free list for O(1) allocation.
///
/// Slots are never reused while any reference to them exists, so a
/// `(index, generation)` pair always identifies one handle.
pub(crate) struct HandleTable {
    slots: Vec<SocketHandle>,
    free_list: Vec<u32>,
}

impl HandleTable {
    pub fn new(max_handles: u32) -> Self {
        let mut slots = Vec::with_capacity(max_handles as usize);
        for _ in 0..max_handles {
            slots.push(SocketHandle::new());
        }
        // Free list: indices in reverse order so pop gives lowest first.
        let free_list: Vec<u32> = (0..max_handles).rev().collect();
        HandleTable { slots, free_list }
    }

    /// Allocate a slot in `Connecting` state holding the consumer's
    /// reference. New handles are interested in both directions.
    pub fn allocate(&mut self, read_capacity: usize, write_capacity: usize) -> Option<HandleId> {
        let idx = self.free_list.pop()?;
        let h = &mut self.slots[idx as usize];
        h.state = HandleState::Connecting;
        h.refs = 1;
        h.socket = None;
        h.connected = false;
        h.error = None;
        h.read = ReadAhead::new(read_capacity);
        h.write = WriteBatch::new(write_capacity);
        h.notifier = Notifier::default();
        h.notifier.set_interest(Interest::BOTH);
        h.in_callback = false;
        h.notify_pending = false;
        h.notify_deferred = false;
        Some(h.id(idx))
    }

    /// Release a slot back to the free list. Returns the backend socket the
    /// handle held, if any.
    pub fn destroy(&mut self, idx: u32) -> Option<SocketId> {
        let h = self.slots.get_mut(idx as usize)?;
        if !h.is_live() {
            return None; // Already released, never double-push to the free list
        }
        debug_assert_eq!(h.refs, 0, "destroying a referenced handle");
        h.state = HandleState::Destroyed;
        h.read = ReadAhead::new(0);
        h.write = WriteBatch::new(0);
        h.notifier = Notifier::default();
        h.generation = h.generation.wrapping_add(1);
        let socket = h.socket.take();
        self.free_list.push(idx);
        socket
    }

    /// Any live handle (including `Closing`) matching `id`.
    pub fn get(&self, id: HandleId) -> Option<&SocketHandle> {
        self.slots
            .get(id.index as usize)
            .filter(|h| h.is_live() && h.generation == id.generation)
    }

    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut SocketHandle> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|h| h.is_live() && h.generation == id.generation)
    }

    /// A handle the consumer may still operate on.
    pub fn get_open_mut(&mut self, id: HandleId) -> Option<&mut SocketHandle> {
        self.get_mut(id).filter(|h| h.is_open())
    }

    /// Ids of every handle the consumer has not closed yet.
    pub fn open_ids(&self) -> Vec<HandleId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_open())
            .map(|(i, h)| h.id(i as u32))
            .collect()
    }

    /// Number of live handles (open or closing).
    pub fn live_count(&self) -> usize {
        self.slots.len().saturating_sub(self.free_list.len())
    }

    /// Total number of slots (max_handles).
    pub fn max_slots(&self) -> u32 {
        self.slots.len() as u32
    }
}
