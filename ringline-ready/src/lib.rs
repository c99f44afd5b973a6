//! ringline-ready: readiness-style sockets over a completion-style backend.
//!
//! Consumers written against non-blocking socket semantics (`recv`/`send`
//! returning `WouldBlock`, readiness callbacks) run unchanged on top of a
//! completion-based I/O backend such as io_uring. The adapter keeps a
//! standing read-ahead per socket, batches writes into one backend write per
//! loop pass, and synthesizes readable/writable notifications from buffer
//! state.
//!
//! # Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use ringline_ready::{Adapter, Config, MockBackend};
//!
//! let mut adapter = Adapter::new(MockBackend::new(), &Config::default())?;
//! let h = adapter.connect("127.0.0.1:6379".parse()?)?;
//! adapter.register_callback(h, |a, h, ready| {
//!     if ready.writable {
//!         let _ = a.send(h, b"PING\r\n");
//!     }
//! })?;
//!
//! let sock = adapter.socket(h).unwrap();
//! adapter.backend_mut().complete_connect(sock, 0);
//! adapter.run_once(Some(Duration::ZERO))?; // connect completes, callback sends
//! adapter.run_once(Some(Duration::ZERO))?; // queued bytes are flushed
//! assert_eq!(adapter.backend().writes_issued(sock), &[6]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Platform
//!
//! The adapter and [`MockBackend`] are portable. [`UringBackend`] is Linux
//! only.

// ── Internal modules ────────────────────────────────────────────────────
pub(crate) mod handle;
pub(crate) mod metrics;
pub(crate) mod read_ahead;
#[cfg(target_os = "linux")]
pub(crate) mod ring;
pub(crate) mod router;
pub(crate) mod write_batch;

// ── Public modules ──────────────────────────────────────────────────────
pub mod adapter;
pub mod backend;
pub mod completion;
pub mod config;
pub mod error;
pub mod mock;
pub mod readiness;

// ── Re-exports ──────────────────────────────────────────────────────────

/// Readiness adapter and its loop hooks.
pub use adapter::{Adapter, ReadinessCallback, StopHandle};
/// Completion backend boundary.
pub use backend::{Backend, Completion, SocketId};
/// Operation tag and `user_data` encoding.
pub use completion::{OpTag, UserData};
/// Adapter configuration.
pub use config::{Config, ConfigBuilder};
/// Error types.
pub use error::{Error, SockError};
/// Consumer handle token and lifecycle state.
pub use handle::{HandleId, HandleState};
/// Scriptable in-memory backend.
pub use mock::MockBackend;
/// Interest mask and delivered readiness.
pub use readiness::{Interest, Readiness};
/// io_uring backend.
#[cfg(target_os = "linux")]
pub use ring::UringBackend;
