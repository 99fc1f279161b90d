//! Stop acknowledgment heuristic.
//!
//! The radios do not confirm `dect perf stop` in a structured way. This
//! detector approximates an acknowledgment: one of a few known phrases must
//! appear in the console text, and then no measurement record may arrive for
//! a quiet period. If the quiet period is never observed before the overall
//! deadline the wait resolves as not acknowledged and teardown continues.

use core::time::Duration;

use heapless::Deque;

use crate::time::{MonoInstant, earliest};

/// Quiet period required after an acknowledgment phrase.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(500);
/// Upper bound on a single acknowledgment wait.
pub const DEFAULT_ACK_DEADLINE: Duration = Duration::from_millis(5_000);
/// Normalized characters retained for phrase matching.
pub const ACK_TEXT_CAPACITY: usize = 256;

/// Phrases that indicate the firmware processed a stop, lower-cased with all
/// non-alphanumeric characters removed.
pub const ACK_PHRASES: [&str; 3] = ["perfcommandstopping", "perfcommandcompleted", "dectperfstop"];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AckConfig {
    pub quiet_period: Duration,
    pub deadline: Duration,
}

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            quiet_period: DEFAULT_QUIET_PERIOD,
            deadline: DEFAULT_ACK_DEADLINE,
        }
    }
}

/// Why a wait resolved without an acknowledgment.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NotAckReason {
    DeadlineElapsed,
    LinkLost,
    Cancelled,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AckOutcome {
    Acknowledged,
    NotAcknowledged(NotAckReason),
}

impl AckOutcome {
    #[must_use]
    pub const fn is_acknowledged(self) -> bool {
        matches!(self, AckOutcome::Acknowledged)
    }
}

/// Outcome of a wait together with how long it was outstanding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AckResolution {
    pub outcome: AckOutcome,
    pub waited: Duration,
}

#[derive(Copy, Clone, Debug)]
struct AckWait<TInstant> {
    started_at: TInstant,
    deadline: TInstant,
}

/// Per-role acknowledgment detector. At most one wait is outstanding.
pub struct StopAckDetector<TInstant> {
    config: AckConfig,
    text: Deque<u8, ACK_TEXT_CAPACITY>,
    wait: Option<AckWait<TInstant>>,
}

impl<TInstant> StopAckDetector<TInstant>
where
    TInstant: MonoInstant,
{
    #[must_use]
    pub const fn new(config: AckConfig) -> Self {
        Self {
            config,
            text: Deque::new(),
            wait: None,
        }
    }

    pub const fn config(&self) -> &AckConfig {
        &self.config
    }

    /// Returns `true` while a wait is outstanding.
    pub const fn is_pending(&self) -> bool {
        self.wait.is_some()
    }

    /// Appends console text to the rolling normalized buffer.
    pub fn observe_text(&mut self, text: &str) {
        for byte in text.bytes().filter(u8::is_ascii_alphanumeric) {
            if self.text.is_full() {
                self.text.pop_front();
            }
            let _ = self.text.push_back(byte.to_ascii_lowercase());
        }
    }

    /// Drops buffered text so an earlier phrase cannot satisfy a new stop.
    pub fn clear_text(&mut self) {
        self.text.clear();
    }

    /// Returns `true` when the rolling buffer contains a known phrase.
    pub fn phrase_seen(&self) -> bool {
        let (front, back) = self.text.as_slices();
        ACK_PHRASES.iter().any(|phrase| {
            let needle = phrase.as_bytes();
            contains(front, back, needle)
        })
    }

    /// Starts a wait. Returns `false` when an outstanding wait is reused.
    pub fn begin(&mut self, now: TInstant) -> bool {
        if self.wait.is_some() {
            return false;
        }
        self.wait = Some(AckWait {
            started_at: now,
            deadline: now + self.config.deadline,
        });
        true
    }

    /// Evaluates the outstanding wait.
    pub fn poll(
        &mut self,
        now: TInstant,
        last_record_at: Option<TInstant>,
    ) -> Option<AckResolution> {
        let wait = self.wait?;
        if self.phrase_seen() && self.is_quiet(now, last_record_at) {
            return self.resolve(now, AckOutcome::Acknowledged);
        }
        if now >= wait.deadline {
            return self.resolve(
                now,
                AckOutcome::NotAcknowledged(NotAckReason::DeadlineElapsed),
            );
        }
        None
    }

    /// Resolves the outstanding wait as cancelled.
    pub fn cancel(&mut self, now: TInstant) -> Option<AckResolution> {
        self.resolve(now, AckOutcome::NotAcknowledged(NotAckReason::Cancelled))
    }

    /// Resolves the outstanding wait because the link disappeared.
    pub fn link_lost(&mut self, now: TInstant) -> Option<AckResolution> {
        self.resolve(now, AckOutcome::NotAcknowledged(NotAckReason::LinkLost))
    }

    /// Earliest instant at which [`poll`](Self::poll) can change its answer.
    pub fn next_deadline(&self, last_record_at: Option<TInstant>) -> Option<TInstant> {
        let wait = self.wait?;
        let quiet_at = if self.phrase_seen() {
            last_record_at.map(|at| at + self.config.quiet_period)
        } else {
            None
        };
        earliest(Some(wait.deadline), quiet_at)
    }

    fn is_quiet(&self, now: TInstant, last_record_at: Option<TInstant>) -> bool {
        last_record_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.config.quiet_period)
    }

    fn resolve(&mut self, now: TInstant, outcome: AckOutcome) -> Option<AckResolution> {
        let wait = self.wait.take()?;
        Some(AckResolution {
            outcome,
            waited: now.saturating_duration_since(wait.started_at),
        })
    }
}

fn contains(front: &[u8], back: &[u8], needle: &[u8]) -> bool {
    let total = front.len() + back.len();
    if needle.is_empty() || needle.len() > total {
        return needle.is_empty();
    }
    let at = |index: usize| {
        if index < front.len() {
            front[index]
        } else {
            back[index - front.len()]
        }
    };
    (0..=total - needle.len())
        .any(|start| needle.iter().enumerate().all(|(i, &b)| at(start + i) == b))
}
