//! Link step sequences used by command sessions.
//!
//! Each session operation (board reset, start, stop) is described as an
//! ordered list of [`LinkStep`]s rather than nested timers. A step performs
//! one [`LinkAction`], waits for its [`StepCompletion`] condition and then
//! holds for `hold_for` before the next step runs. Hold durations come from
//! [`SessionTiming`] so every delay stays configurable.

use core::fmt;
use core::time::Duration;

use heapless::Vec;

use crate::link::DtrLevel;

pub mod reset;
pub mod start;
pub mod stop;

pub use reset::board_reset_template;
pub use start::start_template;
pub use stop::stop_template;

/// Longest sequence we encode (stop teardown) plus headroom.
pub const MAX_SEQUENCE_STEPS: usize = 8;

/// Operation a step applies to the session's link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkAction {
    Open,
    SetDtr(DtrLevel),
    /// Writes the session's role command (server or client start).
    WriteCommand,
    WriteStop,
    AwaitStopAck,
    Close,
}

impl fmt::Display for LinkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkAction::Open => f.write_str("open"),
            LinkAction::SetDtr(DtrLevel::Low) => f.write_str("dtr-low"),
            LinkAction::SetDtr(DtrLevel::High) => f.write_str("dtr-high"),
            LinkAction::WriteCommand => f.write_str("write-command"),
            LinkAction::WriteStop => f.write_str("write-stop"),
            LinkAction::AwaitStopAck => f.write_str("await-stop-ack"),
            LinkAction::Close => f.write_str("close"),
        }
    }
}

/// How a step reports completion back to the session runner.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StepCompletion {
    /// Complete as soon as the action was issued.
    AfterDuration,
    OnLinkOpen,
    OnStopAck,
    OnLinkClosed,
}

/// Ordered operation the session runner applies to its link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkStep {
    pub action: LinkAction,
    pub hold_for: Duration,
    pub completion: StepCompletion,
}

impl LinkStep {
    pub const fn new(action: LinkAction, hold_for: Duration, completion: StepCompletion) -> Self {
        Self {
            action,
            hold_for,
            completion,
        }
    }

    /// Step that completes immediately and then holds.
    pub const fn timed(action: LinkAction, hold_for: Duration) -> Self {
        Self::new(action, hold_for, StepCompletion::AfterDuration)
    }
}

/// The session operation a template implements.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SequenceKind {
    BoardReset,
    Start,
    Stop,
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SequenceKind::BoardReset => "board-reset",
            SequenceKind::Start => "start",
            SequenceKind::Stop => "stop",
        })
    }
}

/// Delays used by the session sequences.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SessionTiming {
    /// DTR held low while resetting the board.
    pub reset_dtr_low: Duration,
    /// DTR held high after the reset pulse before the port is released.
    pub reset_dtr_high: Duration,
    /// Wait between opening the port and writing the start command.
    pub start_settle: Duration,
    /// Wait between writing the stop command and checking for acknowledgment.
    pub stop_settle: Duration,
    /// DTR held low during stop teardown.
    pub stop_dtr_low: Duration,
    /// DTR held high during stop teardown before closing.
    pub stop_dtr_high: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            reset_dtr_low: reset::RESET_DTR_LOW,
            reset_dtr_high: reset::RESET_DTR_HIGH,
            start_settle: start::START_SETTLE,
            stop_settle: stop::STOP_SETTLE,
            stop_dtr_low: stop::STOP_DTR_LOW,
            stop_dtr_high: stop::STOP_DTR_HIGH,
        }
    }
}

/// Ordered step list for one session operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SequenceTemplate {
    pub kind: SequenceKind,
    steps: Vec<LinkStep, MAX_SEQUENCE_STEPS>,
}

impl SequenceTemplate {
    /// Builds a template, truncating steps beyond [`MAX_SEQUENCE_STEPS`].
    pub fn new(kind: SequenceKind, steps: &[LinkStep]) -> Self {
        let mut stored = Vec::new();
        for step in steps.iter().take(MAX_SEQUENCE_STEPS) {
            let _ = stored.push(*step);
        }
        Self {
            kind,
            steps: stored,
        }
    }

    pub fn steps(&self) -> &[LinkStep] {
        &self.steps
    }

    pub fn step(&self, index: usize) -> Option<&LinkStep> {
        self.steps.get(index)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Sum of every hold, i.e. the minimum wall time the sequence takes.
    pub fn total_hold(&self) -> Duration {
        self.steps.iter().map(|step| step.hold_for).sum()
    }
}

/// Builds the template for `kind` using the configured delays.
pub fn template_for(kind: SequenceKind, timing: &SessionTiming) -> SequenceTemplate {
    match kind {
        SequenceKind::BoardReset => board_reset_template(timing),
        SequenceKind::Start => start_template(timing),
        SequenceKind::Stop => stop_template(timing),
    }
}
