//! Engine event catalog and bounded history.
//!
//! Every observable transition the orchestrator makes is an [`EngineEvent`].
//! Events are copied into a fixed-size ring so `status` and post-mortem
//! tooling can inspect recent history without the core owning a logger, and
//! are handed to the host which renders them as structured log lines.

use core::fmt;
use core::time::Duration;

use heapless::{HistoryBuf, OldestOrdered};

use crate::ack::{AckOutcome, NotAckReason};
use crate::error::{EmulatorError, StallError};
use crate::session::{Role, SessionEvent};
use crate::sweep::{Snr, SweepEvent};
use crate::time::MonoInstant;

/// Identifier assigned to each recorded event.
pub type EventId = u32;

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 128;

/// Emulator lifecycle notifications.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EmulatorEvent {
    Spawned,
    Confirmed(Snr),
    Failed(EmulatorError),
    Stopped,
}

/// Everything the engine reports to its host.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum EngineEvent {
    Session { role: Role, event: SessionEvent },
    Sweep(SweepEvent),
    Emulator(EmulatorEvent),
    Stall(StallError),
    Recovery { role: Role },
    RecordDiscarded { role: Role },
}

impl EngineEvent {
    /// Returns `true` for events the host should surface as warnings.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        match self {
            EngineEvent::Session { event, .. } => matches!(
                event,
                SessionEvent::Port(_) | SessionEvent::AckTimeout(_)
            ),
            EngineEvent::Sweep(SweepEvent::Aborted(_))
            | EngineEvent::Emulator(EmulatorEvent::Failed(_))
            | EngineEvent::Stall(_) => true,
            _ => false,
        }
    }

    /// Role the event concerns, if any.
    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        match self {
            EngineEvent::Session { role, .. }
            | EngineEvent::Recovery { role }
            | EngineEvent::RecordDiscarded { role } => Some(*role),
            _ => None,
        }
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::Session { role, event } => {
                write!(f, "{role}: ")?;
                write_session_event(f, event)
            }
            EngineEvent::Sweep(event) => write_sweep_event(f, event),
            EngineEvent::Emulator(EmulatorEvent::Spawned) => f.write_str("emulator started"),
            EngineEvent::Emulator(EmulatorEvent::Confirmed(snr)) => {
                write!(f, "emulator confirmed snr {snr} dB")
            }
            EngineEvent::Emulator(EmulatorEvent::Failed(err)) => write!(f, "{err}"),
            EngineEvent::Emulator(EmulatorEvent::Stopped) => f.write_str("emulator stopped"),
            EngineEvent::Stall(err) => write!(f, "watchdog: {err}"),
            EngineEvent::Recovery { role } => {
                write!(f, "watchdog: re-issuing last {role} command")
            }
            EngineEvent::RecordDiscarded { role } => {
                write!(f, "{role}: record outside measurement window discarded")
            }
        }
    }
}

fn write_session_event(f: &mut fmt::Formatter<'_>, event: &SessionEvent) -> fmt::Result {
    match event {
        SessionEvent::StateChanged { from, to } => write!(f, "{from} -> {to}"),
        SessionEvent::SequenceStarted(kind) => write!(f, "{kind} sequence started"),
        SessionEvent::SequenceFinished(kind) => write!(f, "{kind} sequence finished"),
        SessionEvent::CommandWritten(command) => write!(f, "tx `{command}`"),
        SessionEvent::OpenRetry { attempt } => write!(f, "open failed, retry {attempt}"),
        SessionEvent::StopAck(resolution) => match resolution.outcome {
            AckOutcome::Acknowledged => write!(
                f,
                "stop acknowledged after {}ms",
                resolution.waited.as_millis()
            ),
            AckOutcome::NotAcknowledged(reason) => write!(
                f,
                "stop not acknowledged ({})",
                match reason {
                    NotAckReason::DeadlineElapsed => "deadline elapsed",
                    NotAckReason::LinkLost => "link lost",
                    NotAckReason::Cancelled => "cancelled",
                }
            ),
        },
        SessionEvent::AckTimeout(err) => write!(f, "{err}"),
        SessionEvent::Port(err) => write!(f, "{err}"),
    }
}

fn write_sweep_event(f: &mut fmt::Formatter<'_>, event: &SweepEvent) -> fmt::Result {
    match event {
        SweepEvent::Started { points } => write!(f, "sweep started ({points} points)"),
        SweepEvent::PointStarted(point) => write!(f, "sweep point {point}"),
        SweepEvent::PointMeasured { point, records } => {
            write!(f, "sweep point {point} finished with {records} records")
        }
        SweepEvent::Completed { points } => write!(f, "sweep complete ({points} points)"),
        SweepEvent::Stopped { completed } => {
            write!(f, "sweep stopped after {completed} points")
        }
        SweepEvent::Aborted(err) => write!(f, "sweep aborted: {err}"),
    }
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TelemetryRecord<TInstant> {
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: EngineEvent,
    /// Time since the previous event concerning the same role.
    pub since_previous: Option<Duration>,
}

/// Telemetry ring buffer type alias.
pub type TelemetryRing<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY> =
    HistoryBuf<TelemetryRecord<TInstant>, CAPACITY>;

/// Records engine events into a fixed-size ring buffer.
pub struct TelemetryRecorder<TInstant, const CAPACITY: usize = TELEMETRY_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: TelemetryRing<TInstant, CAPACITY>,
    last_by_role: [Option<TInstant>; 2],
    next_event_id: EventId,
}

impl<TInstant, const CAPACITY: usize> TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: MonoInstant,
{
    /// Creates a new telemetry recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            last_by_role: [None, None],
            next_event_id: 0,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Records `event` and returns its identifier.
    pub fn record(&mut self, event: EngineEvent, timestamp: TInstant) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        let since_previous = event.role().and_then(|role| {
            let slot = &mut self.last_by_role[role.index()];
            let previous = slot.replace(timestamp);
            previous.map(|earlier| timestamp.saturating_duration_since(earlier))
        });

        self.ring.write(TelemetryRecord {
            id,
            timestamp,
            event,
            since_previous,
        });

        id
    }
}

impl<TInstant, const CAPACITY: usize> Default for TelemetryRecorder<TInstant, CAPACITY>
where
    TInstant: MonoInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;
    use alloc::string::ToString;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MicrosInstant(u64);

    impl core::ops::Add<Duration> for MicrosInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self::Output {
            Self(self.0 + rhs.as_micros() as u64)
        }
    }

    impl MonoInstant for MicrosInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_micros(self.0.saturating_sub(earlier.0))
        }
    }

    fn state_change(role: Role) -> EngineEvent {
        EngineEvent::Session {
            role,
            event: SessionEvent::StateChanged {
                from: SessionState::Idle,
                to: SessionState::Starting,
            },
        }
    }

    #[test]
    fn records_elapsed_per_role() {
        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();

        assert_eq!(recorder.record(state_change(Role::Server), MicrosInstant(100)), 0);
        assert_eq!(recorder.record(state_change(Role::Client), MicrosInstant(180)), 1);
        recorder.record(state_change(Role::Server), MicrosInstant(250));

        let latest = recorder.oldest_first().last().copied().expect("record present");
        assert_eq!(latest.id, 2);
        assert_eq!(latest.since_previous, Some(Duration::from_micros(150)));

        let first_client = recorder
            .oldest_first()
            .find(|record| record.event.role() == Some(Role::Client))
            .expect("client record");
        assert_eq!(first_client.since_previous, None);
    }

    #[test]
    fn ring_keeps_most_recent_entries() {
        let mut recorder = TelemetryRecorder::<MicrosInstant, 4>::new();
        for tick in 0..10 {
            recorder.record(
                EngineEvent::Sweep(SweepEvent::Started { points: tick }),
                MicrosInstant(u64::from(tick)),
            );
        }
        assert_eq!(recorder.len(), 4);
        let ids: heapless::Vec<EventId, 4> =
            recorder.oldest_first().map(|record| record.id).collect();
        assert_eq!(ids.as_slice(), &[6, 7, 8, 9]);
    }

    #[test]
    fn failures_are_classified() {
        let stall = EngineEvent::Stall(StallError {
            silence: Duration::from_secs(80),
            threshold: Duration::from_secs(60),
        });
        assert!(stall.is_failure());
        assert!(!state_change(Role::Server).is_failure());
        assert_eq!(
            stall.to_string(),
            "watchdog: no measurement record for 80s (threshold 60s)"
        );

        let mut recorder = TelemetryRecorder::<MicrosInstant>::new();
        recorder.record(stall, MicrosInstant(0));
        recorder.record(state_change(Role::Client), MicrosInstant(1));
        assert_eq!(
            recorder
                .oldest_first()
                .filter(|record| record.event.is_failure())
                .count(),
            1
        );
    }
}
