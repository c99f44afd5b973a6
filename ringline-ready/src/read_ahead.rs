//! Per-handle read-ahead buffer.
//!
//! A standing backend read fills the buffer; the consumer's `recv` drains
//! it. Consumed bytes are released via O(1) `advance()` instead of shifting.
use bytes::{Buf, BytesMut};

use crate::error::SockError;

/// What a read completion did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were appended.
    Data(usize),
    /// Zero-length completion: the peer closed its side.
    Eof,
    /// The backend reported an error (errno).
    Error(i32),
}

pub struct ReadAhead {
    buf: BytesMut,
    capacity: usize,
    in_flight: bool,
    eof: bool,
}

impl ReadAhead {
    /// Create an empty read-ahead buffer bounded at `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        ReadAhead {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            in_flight: false,
            eof: false,
        }
    }

    /// Number of buffered, unread bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Free space left before the standing read must be suspended.
    pub fn room(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Whether a zero-length completion has been seen.
    pub fn eof(&self) -> bool {
        self.eof
    }

    /// Whether a new standing read may be issued.
    pub fn can_issue(&self, error_pending: bool, closing: bool) -> bool {
        !self.in_flight && !self.eof && !error_pending && !closing && self.room() > 0
    }

    /// Mark a read in flight and return the buffer the backend reads into.
    ///
    /// The buffer's length is the remaining room, so the completion can never
    /// push the read-ahead past its capacity.
    pub fn begin(&mut self) -> BytesMut {
        debug_assert!(!self.in_flight, "standing read already in flight");
        self.in_flight = true;
        BytesMut::zeroed(self.room())
    }

    /// Undo [`begin`](Self::begin) when the backend refused the read.
    pub fn abort(&mut self) {
        self.in_flight = false;
    }

    /// Record the completion of the standing read.
    pub fn complete(&mut self, result: i32, data: Option<&[u8]>) -> ReadOutcome {
        self.in_flight = false;
        if result < 0 {
            return ReadOutcome::Error(-result);
        }
        if result == 0 {
            self.eof = true;
            return ReadOutcome::Eof;
        }
        let data = data.unwrap_or_default();
        let n = (result as usize).min(data.len());
        debug_assert!(
            n <= self.room(),
            "read completion of {n} bytes exceeds room {}",
            self.room()
        );
        self.buf.extend_from_slice(&data[..n]);
        ReadOutcome::Data(n)
    }

    /// Serve a readiness-style `recv` from the buffer.
    ///
    /// Buffered bytes always win over a pending error or end-of-stream.
    pub fn recv(&mut self, out: &mut [u8], error: Option<i32>) -> Result<usize, SockError> {
        if out.is_empty() {
            return Ok(0);
        }
        if !self.buf.is_empty() {
            let n = out.len().min(self.buf.len());
            out[..n].copy_from_slice(&self.buf[..n]);
            self.buf.advance(n);
            return Ok(n);
        }
        if let Some(errno) = error {
            return Err(SockError::Backend(errno));
        }
        if self.eof {
            return Err(SockError::EndOfStream);
        }
        Err(SockError::WouldBlock)
    }

    /// Discard all buffered data (used on close).
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(ra: &mut ReadAhead, data: &[u8]) -> ReadOutcome {
        let buf = ra.begin();
        assert!(buf.len() >= data.len());
        ra.complete(data.len() as i32, Some(data))
    }

    #[test]
    fn short_read_then_would_block() {
        let mut ra = ReadAhead::new(100);
        assert_eq!(fill(&mut ra, &[7u8; 40]), ReadOutcome::Data(40));

        let mut out = [0u8; 25];
        assert_eq!(ra.recv(&mut out, None), Ok(25));
        assert_eq!(ra.len(), 15);
        assert_eq!(ra.recv(&mut out, None), Ok(15));
        assert_eq!(ra.recv(&mut out, None), Err(SockError::WouldBlock));
    }

    #[test]
    fn begin_is_bounded_by_room() {
        let mut ra = ReadAhead::new(16);
        fill(&mut ra, b"0123456789");
        assert_eq!(ra.room(), 6);
        let buf = ra.begin();
        assert_eq!(buf.len(), 6);
        ra.abort();
        assert!(!ra.in_flight());
    }

    #[test]
    fn full_buffer_suspends_issue() {
        let mut ra = ReadAhead::new(4);
        fill(&mut ra, b"abcd");
        assert!(!ra.can_issue(false, false));

        let mut out = [0u8; 1];
        ra.recv(&mut out, None).unwrap();
        assert!(ra.can_issue(false, false));
        assert!(!ra.can_issue(true, false));
        assert!(!ra.can_issue(false, true));
    }

    #[test]
    fn error_deferred_until_drained() {
        let mut ra = ReadAhead::new(64);
        fill(&mut ra, b"hello");
        let _ = ra.begin();
        assert_eq!(
            ra.complete(-libc::ECONNRESET, None),
            ReadOutcome::Error(libc::ECONNRESET)
        );

        let err = Some(libc::ECONNRESET);
        let mut out = [0u8; 3];
        assert_eq!(ra.recv(&mut out, err), Ok(3));
        assert_eq!(ra.recv(&mut out, err), Ok(2));
        assert_eq!(
            ra.recv(&mut out, err),
            Err(SockError::Backend(libc::ECONNRESET))
        );
    }

    #[test]
    fn eof_after_buffered_bytes() {
        let mut ra = ReadAhead::new(64);
        fill(&mut ra, &[1u8; 10]);
        let _ = ra.begin();
        assert_eq!(ra.complete(0, None), ReadOutcome::Eof);
        assert!(!ra.can_issue(false, false));

        let mut out = [0u8; 32];
        assert_eq!(ra.recv(&mut out, None), Ok(10));
        assert_eq!(ra.recv(&mut out, None), Err(SockError::EndOfStream));
    }

    #[test]
    fn zero_length_recv_is_noop() {
        let mut ra = ReadAhead::new(8);
        fill(&mut ra, b"ab");
        assert_eq!(ra.recv(&mut [], None), Ok(0));
        assert_eq!(ra.len(), 2);
    }
}
