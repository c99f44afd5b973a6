//! Adapter metrics.
//!
//! Counters for handle lifecycle, bytes moved, backend operations and
//! readiness notifications. Exposed through metriken's registry.

use metriken::{Counter, Gauge, metric};

// ── Handle lifecycle ─────────────────────────────────────────────

#[metric(
    name = "ringline_ready/handles/opened",
    description = "Total handles created"
)]
pub static HANDLES_OPENED: Counter = Counter::new();

#[metric(
    name = "ringline_ready/handles/destroyed",
    description = "Total handles destroyed after the last reference was released"
)]
pub static HANDLES_DESTROYED: Counter = Counter::new();

#[metric(
    name = "ringline_ready/handles/active",
    description = "Currently live handles (open or closing)"
)]
pub static HANDLES_ACTIVE: Gauge = Gauge::new();

// ── Bytes ────────────────────────────────────────────────────────

#[metric(
    name = "ringline_ready/bytes/received",
    description = "Total bytes delivered into read-ahead buffers"
)]
pub static BYTES_RECEIVED: Counter = Counter::new();

#[metric(
    name = "ringline_ready/bytes/sent",
    description = "Total bytes confirmed written by the backend"
)]
pub static BYTES_SENT: Counter = Counter::new();

// ── Backend operations ───────────────────────────────────────────

#[metric(
    name = "ringline_ready/reads/issued",
    description = "Standing reads issued to the backend"
)]
pub static READS_ISSUED: Counter = Counter::new();

#[metric(
    name = "ringline_ready/flushes/issued",
    description = "Write flushes issued to the backend"
)]
pub static FLUSHES_ISSUED: Counter = Counter::new();

#[metric(
    name = "ringline_ready/completions/processed",
    description = "Total backend completions routed"
)]
pub static COMPLETIONS_PROCESSED: Counter = Counter::new();

#[metric(
    name = "ringline_ready/backend/errors",
    description = "Backend errors recorded on handles"
)]
pub static BACKEND_ERRORS: Counter = Counter::new();

// ── Readiness ────────────────────────────────────────────────────

#[metric(
    name = "ringline_ready/notifications/fired",
    description = "Readiness callbacks invoked"
)]
pub static NOTIFICATIONS_FIRED: Counter = Counter::new();
