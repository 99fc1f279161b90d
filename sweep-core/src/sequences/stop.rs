//! Stop teardown.
//!
//! `dect perf stop` is written, the console gets a short settle window, the
//! acknowledgment heuristic runs (success or timeout), and the board is then
//! pulsed through DTR before the port is released. Every step after the
//! write runs regardless of earlier failures so link ownership is always
//! released.

use core::time::Duration;

use super::{LinkAction, LinkStep, SequenceKind, SequenceTemplate, SessionTiming, StepCompletion};
use crate::link::DtrLevel;

/// Delay after writing the stop command before acknowledgment is checked.
pub const STOP_SETTLE: Duration = Duration::from_millis(500);
/// DTR low pulse during teardown.
pub const STOP_DTR_LOW: Duration = Duration::from_millis(100);
/// DTR high hold before the port is closed.
pub const STOP_DTR_HIGH: Duration = Duration::from_millis(200);

/// Builds the stop template.
#[must_use]
pub fn stop_template(timing: &SessionTiming) -> SequenceTemplate {
    SequenceTemplate::new(
        SequenceKind::Stop,
        &[
            LinkStep::timed(LinkAction::WriteStop, timing.stop_settle),
            LinkStep::new(
                LinkAction::AwaitStopAck,
                Duration::ZERO,
                StepCompletion::OnStopAck,
            ),
            LinkStep::timed(LinkAction::SetDtr(DtrLevel::Low), timing.stop_dtr_low),
            LinkStep::timed(LinkAction::SetDtr(DtrLevel::High), timing.stop_dtr_high),
            LinkStep::new(LinkAction::Close, Duration::ZERO, StepCompletion::OnLinkClosed),
        ],
    )
}
