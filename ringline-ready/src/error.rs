use std::io;

use thiserror::Error;

/// Errors returned by adapter setup and handle creation.
#[derive(Debug, Error)]
pub enum Error {
    /// Backend setup or operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Ring setup failed (e.g., unsupported kernel features).
    #[error("ring setup: {0}")]
    RingSetup(String),
    /// A configuration value is out of range.
    #[error("invalid config: {0}")]
    Config(String),
    /// No free handle slots available.
    #[error("handle limit reached")]
    HandleLimitReached,
    /// Invalid handle (stale, closed or never created).
    #[error("invalid handle")]
    InvalidHandle,
}

/// Outcome of a non-blocking socket call that did not transfer data.
///
/// Mirrors what a traditional non-blocking socket reports: flow control
/// (`WouldBlock`) and a clean peer close (`EndOfStream`) are distinct from
/// an I/O failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SockError {
    /// No data or buffer space yet. Wait for the next readiness callback.
    #[error("operation would block")]
    WouldBlock,
    /// The peer closed the stream and every buffered byte has been read.
    #[error("end of stream")]
    EndOfStream,
    /// The backend reported an I/O failure (errno).
    #[error("backend error: {}", io::Error::from_raw_os_error(*.0))]
    Backend(i32),
    /// The handle was destroyed, closed by the consumer, or never existed.
    #[error("invalid handle")]
    InvalidHandle,
}

impl SockError {
    /// Convert into the `io::Error` a non-blocking socket call would return.
    pub fn into_io(self) -> io::Error {
        match self {
            SockError::WouldBlock => io::Error::from(io::ErrorKind::WouldBlock),
            SockError::EndOfStream => io::Error::from(io::ErrorKind::UnexpectedEof),
            SockError::Backend(errno) => io::Error::from_raw_os_error(errno),
            SockError::InvalidHandle => io::Error::from_raw_os_error(libc::EBADF),
        }
    }

    /// Raw errno for backend errors.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            SockError::Backend(errno) => Some(*errno),
            _ => None,
        }
    }
}

impl From<SockError> for io::Error {
    fn from(err: SockError) -> Self {
        err.into_io()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_maps_to_io_kind() {
        let err = SockError::WouldBlock.into_io();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn backend_keeps_errno() {
        let err: io::Error = SockError::Backend(libc::ECONNRESET).into();
        assert_eq!(err.raw_os_error(), Some(libc::ECONNRESET));
        assert_eq!(
            SockError::Backend(libc::EPIPE).raw_os_error(),
            Some(libc::EPIPE)
        );
        assert_eq!(SockError::EndOfStream.raw_os_error(), None);
    }

    #[test]
    fn invalid_handle_is_ebadf() {
        let err = SockError::InvalidHandle.into_io();
        assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    }
}
