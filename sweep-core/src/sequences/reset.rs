//! One-time board reset performed before a role's first start.
//!
//! The radios reboot when DTR is pulsed low. The port is opened, DTR is held
//! low briefly, raised again and the port is released so the following start
//! sequence opens a fresh connection to a freshly booted board.

use core::time::Duration;

use super::{LinkAction, LinkStep, SequenceKind, SequenceTemplate, SessionTiming, StepCompletion};
use crate::link::DtrLevel;

/// Duration DTR is held low to reset the board.
pub const RESET_DTR_LOW: Duration = Duration::from_millis(100);
/// Duration DTR is held high before the port is released.
pub const RESET_DTR_HIGH: Duration = Duration::from_millis(300);

/// Builds the board reset template.
#[must_use]
pub fn board_reset_template(timing: &SessionTiming) -> SequenceTemplate {
    SequenceTemplate::new(
        SequenceKind::BoardReset,
        &[
            LinkStep::new(LinkAction::Open, Duration::ZERO, StepCompletion::OnLinkOpen),
            LinkStep::timed(LinkAction::SetDtr(DtrLevel::Low), timing.reset_dtr_low),
            LinkStep::timed(LinkAction::SetDtr(DtrLevel::High), timing.reset_dtr_high),
            LinkStep::new(LinkAction::Close, Duration::ZERO, StepCompletion::OnLinkClosed),
        ],
    )
}
