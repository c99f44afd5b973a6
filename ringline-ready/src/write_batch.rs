//! Per-handle write batching.
//!
//! `send` copies caller bytes into a bounded buffer. At most one backend
//! write is in flight per handle; everything queued when the flush runs is
//! submitted as a single operation. The in-flight batch is kept as frozen
//! [`Bytes`] so a short write can resubmit the remainder without copying.
use bytes::{Buf, Bytes, BytesMut};

use crate::error::SockError;

/// What a write completion did to the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The whole batch has been written. `more` is true if bytes were
    /// queued while it was in flight.
    Done { written: usize, more: bool },
    /// Short write; `remainder` must be resubmitted as the same flush.
    Partial { written: usize, remainder: Bytes },
    /// The backend reported an error (errno). Queued bytes were discarded.
    Error(i32),
}

pub struct WriteBatch {
    queued: BytesMut,
    in_flight: Option<Bytes>,
    capacity: usize,
    scheduled: bool,
}

impl WriteBatch {
    /// Create an empty write buffer bounded at `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        WriteBatch {
            queued: BytesMut::with_capacity(capacity),
            in_flight: None,
            capacity,
            scheduled: false,
        }
    }

    /// Bytes accepted but not yet submitted.
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Bytes submitted to the backend and not yet confirmed.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.as_ref().map_or(0, Bytes::len)
    }

    /// Space left for new `send` calls. In-flight bytes count against it.
    pub fn room(&self) -> usize {
        self.capacity
            .saturating_sub(self.queued.len() + self.in_flight_len())
    }

    /// Whether a flush is currently in flight.
    pub fn flushing(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn set_scheduled(&mut self, scheduled: bool) {
        self.scheduled = scheduled;
    }

    /// Whether the next loop pass should get a flush for this handle.
    pub fn needs_flush(&self) -> bool {
        !self.scheduled && self.in_flight.is_none() && !self.queued.is_empty()
    }

    /// Writable for readiness purposes: nothing in flight and room left.
    pub fn writable(&self) -> bool {
        self.in_flight.is_none() && self.room() > 0
    }

    /// Accept as many bytes as fit. Returns the accepted count, or
    /// `WouldBlock` if the buffer is already full.
    pub fn send(&mut self, data: &[u8], error: Option<i32>) -> Result<usize, SockError> {
        if let Some(errno) = error {
            return Err(SockError::Backend(errno));
        }
        if data.is_empty() {
            return Ok(0);
        }
        let room = self.room();
        if room == 0 {
            return Err(SockError::WouldBlock);
        }
        let n = data.len().min(room);
        self.queued.extend_from_slice(&data[..n]);
        Ok(n)
    }

    /// Move every queued byte into a single in-flight batch.
    ///
    /// Returns `None` if a batch is already in flight or nothing is queued.
    pub fn take_batch(&mut self) -> Option<Bytes> {
        if self.in_flight.is_some() || self.queued.is_empty() {
            return None;
        }
        let batch = self.queued.split().freeze();
        self.in_flight = Some(batch.clone());
        Some(batch)
    }

    /// Undo [`take_batch`](Self::take_batch) when the backend refused the
    /// write; the bytes are dropped and reported as `errno`.
    pub fn abort(&mut self, errno: i32) -> WriteOutcome {
        self.in_flight = None;
        self.queued.clear();
        WriteOutcome::Error(errno)
    }

    /// Record the completion of the in-flight batch.
    pub fn complete(&mut self, result: i32) -> WriteOutcome {
        if result < 0 {
            return self.abort(-result);
        }
        let Some(batch) = self.in_flight.as_mut() else {
            debug_assert!(false, "write completion without a batch in flight");
            return WriteOutcome::Done {
                written: 0,
                more: !self.queued.is_empty(),
            };
        };
        if result == 0 && !batch.is_empty() {
            // The peer stopped accepting bytes without an errno.
            return self.abort(libc::EPIPE);
        }
        let written = (result as usize).min(batch.len());
        batch.advance(written);
        if batch.is_empty() {
            self.in_flight = None;
            WriteOutcome::Done {
                written,
                more: !self.queued.is_empty(),
            }
        } else {
            WriteOutcome::Partial {
                written,
                remainder: batch.clone(),
            }
        }
    }

    /// Drop everything (used when a handle is torn down with an error pending).
    pub fn clear(&mut self) {
        self.queued.clear();
        self.scheduled = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_coalesce_into_one_batch() {
        let mut wb = WriteBatch::new(128);
        assert_eq!(wb.send(&[1u8; 10], None), Ok(10));
        assert_eq!(wb.send(&[2u8; 20], None), Ok(20));
        assert_eq!(wb.send(&[3u8; 30], None), Ok(30));
        assert!(wb.needs_flush());

        let batch = wb.take_batch().unwrap();
        assert_eq!(batch.len(), 60);
        assert_eq!(&batch[..10], &[1u8; 10]);
        assert_eq!(&batch[30..], &[3u8; 30]);
        assert!(wb.take_batch().is_none());
    }

    #[test]
    fn accepts_only_remaining_room() {
        let mut wb = WriteBatch::new(16);
        assert_eq!(wb.send(&[0u8; 10], None), Ok(10));
        assert_eq!(wb.send(&[0u8; 10], None), Ok(6));
        assert_eq!(wb.send(&[0u8; 10], None), Err(SockError::WouldBlock));
        assert_eq!(wb.room(), 0);
    }

    #[test]
    fn in_flight_bytes_count_against_capacity() {
        let mut wb = WriteBatch::new(16);
        wb.send(&[0u8; 12], None).unwrap();
        let _ = wb.take_batch().unwrap();
        assert!(!wb.writable());
        assert_eq!(wb.send(&[0u8; 8], None), Ok(4));
        assert!(!wb.needs_flush());

        assert_eq!(
            wb.complete(12),
            WriteOutcome::Done {
                written: 12,
                more: true
            }
        );
        assert!(wb.needs_flush());
        assert_eq!(wb.room(), 12);
    }

    #[test]
    fn short_write_keeps_remainder() {
        let mut wb = WriteBatch::new(64);
        wb.send(b"hello world", None).unwrap();
        let _ = wb.take_batch().unwrap();

        match wb.complete(6) {
            WriteOutcome::Partial { written, remainder } => {
                assert_eq!(written, 6);
                assert_eq!(&remainder[..], b"world");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(wb.flushing());
        assert_eq!(wb.in_flight_len(), 5);
        assert_eq!(
            wb.complete(5),
            WriteOutcome::Done {
                written: 5,
                more: false
            }
        );
        assert!(wb.writable());
    }

    #[test]
    fn error_discards_queue_and_sticks() {
        let mut wb = WriteBatch::new(64);
        wb.send(b"abc", None).unwrap();
        let _ = wb.take_batch().unwrap();
        wb.send(b"def", None).unwrap();

        assert_eq!(
            wb.complete(-libc::ECONNRESET),
            WriteOutcome::Error(libc::ECONNRESET)
        );
        assert_eq!(wb.queued(), 0);
        assert!(!wb.flushing());
        assert_eq!(
            wb.send(b"x", Some(libc::ECONNRESET)),
            Err(SockError::Backend(libc::ECONNRESET))
        );
    }

    #[test]
    fn zero_byte_completion_is_broken_pipe() {
        let mut wb = WriteBatch::new(8);
        wb.send(b"ab", None).unwrap();
        let _ = wb.take_batch().unwrap();
        assert_eq!(wb.complete(0), WriteOutcome::Error(libc::EPIPE));
    }
}
