//! Monotonic time abstraction injected by the host runtime.
//!
//! Every state machine in this crate is generic over the instant type so the
//! same logic runs against `std::time::Instant` on the host and against
//! synthetic microsecond counters in tests.

use core::ops::Add;
use core::time::Duration;

/// Monotonic instant wrapper used for deadlines and activity tracking.
pub trait MonoInstant: Copy + Ord + Add<Duration, Output = Self> {
    /// Returns the saturating duration from `earlier` to `self`.
    fn saturating_duration_since(&self, earlier: Self) -> Duration;
}

/// Returns the earlier of two optional deadlines.
pub fn earliest<TInstant: Ord>(a: Option<TInstant>, b: Option<TInstant>) -> Option<TInstant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}
