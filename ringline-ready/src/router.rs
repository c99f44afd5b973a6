//! Backend-facing half of the adapter: issuing standing reads and write
//! flushes, and routing completions back to their handles.

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use crate::adapter::Adapter;
use crate::backend::{Backend, Completion};
use crate::completion::{OpTag, UserData};
use crate::handle::{HandleId, HandleState};
use crate::metrics;
use crate::read_ahead::ReadOutcome;
use crate::readiness::Interest;
use crate::write_batch::WriteOutcome;

fn errno_of(e: &std::io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

impl<B: Backend> Adapter<B> {
    // ── Issuing ──────────────────────────────────────────────────────

    /// Issue the standing read if the handle is connected, has room, and
    /// has no read in flight.
    pub(crate) fn issue_read(&mut self, id: HandleId) {
        let Some(h) = self.handles.get_mut(id) else {
            return;
        };
        if !h.connected || !h.read.can_issue(h.error.is_some(), !h.is_open()) {
            return;
        }
        let Some(socket) = h.socket else {
            return;
        };
        let buf = h.read.begin();
        let user_data = UserData::encode(OpTag::Read, id.index, id.generation);
        match self.backend.read(socket, buf, user_data) {
            Ok(()) => {
                h.acquire();
                metrics::READS_ISSUED.increment();
            }
            Err(e) => {
                h.read.abort();
                h.fail(errno_of(&e));
                metrics::BACKEND_ERRORS.increment();
                debug!(handle = id.index, error = %e, "read submission failed");
                self.synthesize(id);
            }
        }
    }

    /// Schedule a flush for the next loop pass. The scheduled flush holds a
    /// reference until it runs.
    pub(crate) fn schedule_flush(&mut self, id: HandleId) {
        let Some(h) = self.handles.get_mut(id) else {
            return;
        };
        if !h.write.needs_flush() {
            return;
        }
        h.write.set_scheduled(true);
        h.acquire();
        self.flush_queue.push(id);
    }

    /// Submit every flush scheduled since the previous pass.
    pub(crate) fn flush_scheduled(&mut self) {
        let queue = std::mem::take(&mut self.flush_queue);
        for id in queue {
            self.issue_flush(id);
        }
    }

    /// Submit everything queued on `id` as one backend write, then drop the
    /// scheduled-flush reference.
    fn issue_flush(&mut self, id: HandleId) {
        let Some(h) = self.handles.get_mut(id) else {
            return;
        };
        h.write.set_scheduled(false);
        let mut failed = false;
        if h.error.is_none()
            && let Some(socket) = h.socket
            && let Some(batch) = h.write.take_batch()
        {
            let len = batch.len();
            let user_data = UserData::encode(OpTag::Write, id.index, id.generation);
            match self.backend.write(socket, batch, user_data) {
                Ok(()) => {
                    h.acquire();
                    metrics::FLUSHES_ISSUED.increment();
                    trace!(handle = id.index, bytes = len, "flush issued");
                }
                Err(e) => {
                    let errno = errno_of(&e);
                    h.write.abort(errno);
                    h.fail(errno);
                    metrics::BACKEND_ERRORS.increment();
                    debug!(handle = id.index, error = %e, "write submission failed");
                    failed = true;
                }
            }
        }
        self.release_ref(id);
        if failed {
            self.synthesize(id);
        }
    }

    // ── Routing ──────────────────────────────────────────────────────

    /// Route one backend completion to its handle.
    pub(crate) fn dispatch(&mut self, completion: Completion) {
        metrics::COMPLETIONS_PROCESSED.increment();
        let user_data = completion.user_data;
        let id = HandleId::new(user_data.index(), user_data.generation());

        let Some(tag) = user_data.tag() else {
            warn!(user_data = user_data.raw(), "completion with unknown op tag");
            return;
        };
        if self.handles.get(id).is_none() {
            warn!(
                handle = id.index,
                generation = id.generation,
                ?tag,
                "completion for a destroyed handle"
            );
            return;
        }

        match tag {
            OpTag::Connect => self.handle_connect(id, completion.result),
            OpTag::Read => self.handle_read(id, completion.result, completion.buf),
            OpTag::Write => self.handle_write(id, user_data, completion.result),
        }
    }

    fn handle_connect(&mut self, id: HandleId, result: i32) {
        let Some(h) = self.handles.get_mut(id) else {
            return;
        };
        if h.is_closing() {
            self.release_ref(id);
            return;
        }
        let ok = result >= 0;
        if ok {
            h.connected = true;
            if h.state == HandleState::Connecting {
                h.state = HandleState::Active;
            }
            debug!(handle = id.index, "handle connected");
        } else {
            h.fail(-result);
            metrics::BACKEND_ERRORS.increment();
            debug!(
                handle = id.index,
                error = %std::io::Error::from_raw_os_error(-result),
                "connect failed"
            );
        }
        self.release_ref(id);
        if ok {
            self.issue_read(id);
        }
        self.synthesize(id);
    }

    fn handle_read(&mut self, id: HandleId, result: i32, buf: Option<BytesMut>) {
        let Some(h) = self.handles.get_mut(id) else {
            return;
        };
        if h.is_closing() {
            h.read.abort();
            self.release_ref(id);
            return;
        }
        match h.read.complete(result, buf.as_deref()) {
            ReadOutcome::Data(n) => {
                metrics::BYTES_RECEIVED.add(n as u64);
                h.notifier.rearm(Interest::READABLE);
                trace!(handle = id.index, bytes = n, "read completed");
            }
            ReadOutcome::Eof => {
                debug!(handle = id.index, "peer closed stream");
            }
            ReadOutcome::Error(errno) => {
                h.fail(errno);
                metrics::BACKEND_ERRORS.increment();
                debug!(
                    handle = id.index,
                    error = %std::io::Error::from_raw_os_error(errno),
                    "read failed"
                );
            }
        }
        self.release_ref(id);
        self.issue_read(id);
        self.synthesize(id);
    }

    fn handle_write(&mut self, id: HandleId, user_data: UserData, result: i32) {
        let Some(h) = self.handles.get_mut(id) else {
            return;
        };
        match h.write.complete(result) {
            WriteOutcome::Partial { written, remainder } => {
                metrics::BYTES_SENT.add(written as u64);
                // Same flush, same reference.
                let resubmit = match h.socket {
                    Some(socket) => self.backend.write(socket, remainder, user_data),
                    None => Err(std::io::Error::from_raw_os_error(libc::ENOTCONN)),
                };
                match resubmit {
                    Ok(()) => {
                        trace!(handle = id.index, written, "short write resubmitted");
                        return;
                    }
                    Err(e) => {
                        let errno = errno_of(&e);
                        if let Some(h) = self.handles.get_mut(id) {
                            h.write.abort(errno);
                            h.fail(errno);
                        }
                        metrics::BACKEND_ERRORS.increment();
                        debug!(handle = id.index, error = %e, "write resubmission failed");
                    }
                }
            }
            WriteOutcome::Done { written, more } => {
                metrics::BYTES_SENT.add(written as u64);
                h.notifier.rearm(Interest::WRITABLE);
                if more {
                    self.schedule_flush(id);
                }
            }
            WriteOutcome::Error(errno) => {
                h.fail(errno);
                metrics::BACKEND_ERRORS.increment();
                debug!(
                    handle = id.index,
                    error = %std::io::Error::from_raw_os_error(errno),
                    "write failed"
                );
            }
        }
        self.release_ref(id);
        self.synthesize(id);
    }
}
