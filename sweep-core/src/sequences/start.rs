//! Start sequence: claim the port, let the console settle, send the command.

use core::time::Duration;

use super::{LinkAction, LinkStep, SequenceKind, SequenceTemplate, SessionTiming, StepCompletion};

/// Delay between opening the port and writing the start command.
pub const START_SETTLE: Duration = Duration::from_millis(200);

/// Builds the start template.
#[must_use]
pub fn start_template(timing: &SessionTiming) -> SequenceTemplate {
    SequenceTemplate::new(
        SequenceKind::Start,
        &[
            LinkStep::new(
                LinkAction::Open,
                timing.start_settle,
                StepCompletion::OnLinkOpen,
            ),
            LinkStep::timed(LinkAction::WriteCommand, Duration::ZERO),
        ],
    )
}
