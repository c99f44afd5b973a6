//! Readiness synthesis.
//!
//! Completion events change buffer state; this module turns buffer state
//! into readiness notifications for the consumer. A condition is reported
//! once when it becomes true and is not reported again until it has been
//! re-armed: by going false, by a new buffered event in that direction, by
//! the consumer hitting `WouldBlock`, or by the consumer (re-)registering
//! interest.

use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Directions the consumer wants to be told about.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Interest(u8);

impl Interest {
    /// No interest.
    pub const NONE: Interest = Interest(0);
    /// Tell me when `recv` would not block.
    pub const READABLE: Interest = Interest(0b01);
    /// Tell me when `send` would not block.
    pub const WRITABLE: Interest = Interest(0b10);
    /// Both directions.
    pub const BOTH: Interest = Interest(0b11);

    pub const fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Union of two interest sets.
    pub const fn add(self, other: Interest) -> Interest {
        Interest(self.0 | other.0)
    }

    /// `self` without the bits in `other`.
    pub const fn remove(self, other: Interest) -> Interest {
        Interest(self.0 & !other.0)
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        self.add(rhs)
    }
}

impl BitAnd for Interest {
    type Output = Interest;

    fn bitand(self, rhs: Interest) -> Interest {
        Interest(self.0 & rhs.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (false, false) => f.write_str("NONE"),
            (true, false) => f.write_str("READABLE"),
            (false, true) => f.write_str("WRITABLE"),
            (true, true) => f.write_str("READABLE | WRITABLE"),
        }
    }
}

/// Readiness delivered to a consumer callback.
///
/// `error` is set when the handle carries a pending backend error; the next
/// `recv` (once buffered bytes are drained) or `send` observes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// Current truth of each condition, computed from handle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub(crate) struct Conditions {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

impl Conditions {
    fn as_interest(self) -> Interest {
        let mut ready = Interest::NONE;
        if self.readable {
            ready = ready | Interest::READABLE;
        }
        if self.writable {
            ready = ready | Interest::WRITABLE;
        }
        ready
    }
}

/// Per-handle interest mask and notification bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct Notifier {
    interest: Interest,
    reported: Interest,
}

impl Notifier {
    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Replace the interest mask. Newly added directions are re-armed so an
    /// already-satisfied condition is reported on the next evaluation.
    pub fn set_interest(&mut self, interest: Interest) {
        let added = interest.remove(self.interest);
        self.reported = self.reported.remove(added) & interest;
        self.interest = interest;
    }

    /// Allow `which` to be reported again even if it never went false.
    pub fn rearm(&mut self, which: Interest) {
        self.reported = self.reported.remove(which);
    }

    /// Evaluate the current conditions. Returns the readiness to deliver if
    /// an interested condition is true and has not been reported yet.
    pub fn poll(&mut self, conditions: Conditions) -> Option<Readiness> {
        let ready = conditions.as_interest();
        // Conditions that went false are re-armed.
        self.reported = self.reported & ready;
        let live = ready & self.interest;
        if live.remove(self.reported).is_empty() {
            return None;
        }
        self.reported = self.reported | live;
        Some(Readiness {
            readable: live.is_readable(),
            writable: live.is_writable(),
            error: conditions.error,
        })
    }
}
