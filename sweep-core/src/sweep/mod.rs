//! Sweep scheduling over the (MCS x SNR) grid.
//!
//! ```text
//! Idle -> WarmingUp -> AwaitingEmulator -> Measuring -> Draining -> Cooldown
//!                            ^                                        |
//!                            +--------------- next point -------------+
//! ```
//!
//! The scheduler never touches sessions or the emulator directly. It emits
//! [`SweepCommand`]s that the orchestrator routes through the same session
//! request API the operator and the watchdog use, and it learns about
//! progress through [`poll`](SweepScheduler::poll) and the emulator
//! confirmation callbacks.

pub mod plan;
pub mod snr;

pub use plan::{MAX_MCS, MAX_TIERS, SnrRange, SweepCursor, SweepPlan, SweepPoint, Tier};
pub use snr::{InvalidSnr, Snr};

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::mem;
use core::time::Duration;

use crate::emulator::{ChannelType, DEFAULT_STABILIZATION_DELAY};
use crate::error::{EmulatorError, EngineError, SweepConfigError};
use crate::record::{MeasurementRecord, PacketSummary};
use crate::session::{Role, StartRequest, client_start, server_start};
use crate::time::{MonoInstant, earliest};

/// Measurement length passed to the client (`-t`).
pub const DEFAULT_MEASUREMENT_DURATION: Duration = Duration::from_secs(50);
/// Gap between starting the server and starting the client.
pub const DEFAULT_CLIENT_DELAY: Duration = Duration::from_millis(500);
/// Extra time after the measurement before teardown begins.
pub const DEFAULT_MEASUREMENT_GRACE: Duration = Duration::from_secs(5);
/// Settling time between consecutive points.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SweepTiming {
    pub measurement: Duration,
    pub client_delay: Duration,
    pub grace: Duration,
    pub cooldown: Duration,
    pub stabilization: Duration,
}

impl Default for SweepTiming {
    fn default() -> Self {
        Self {
            measurement: DEFAULT_MEASUREMENT_DURATION,
            client_delay: DEFAULT_CLIENT_DELAY,
            grace: DEFAULT_MEASUREMENT_GRACE,
            cooldown: DEFAULT_COOLDOWN,
            stabilization: DEFAULT_STABILIZATION_DELAY,
        }
    }
}

/// Devices and channel profile a sweep runs against.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SweepTargets {
    pub server_path: String,
    pub client_path: String,
    pub channel: ChannelType,
    pub use_emulator: bool,
}

/// Everything measured at one point, handed to the persistence sink.
#[derive(Clone, Debug, PartialEq)]
pub struct PointResult {
    pub point: SweepPoint,
    pub channel: ChannelType,
    pub records: Vec<MeasurementRecord>,
    pub sent: Option<u64>,
    pub received: Option<u64>,
}

/// Work the orchestrator carries out for the scheduler.
#[derive(Clone, Debug, PartialEq)]
pub enum SweepCommand {
    LaunchEmulator { snr: Snr, channel: ChannelType },
    PushSnr { snr: Snr, channel: ChannelType },
    StartSession(Role, StartRequest),
    StopSessions,
    Persist(PointResult),
    ShutdownEmulator,
}

/// Progress notifications recorded in telemetry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SweepEvent {
    Started { points: u32 },
    PointStarted(SweepPoint),
    PointMeasured { point: SweepPoint, records: u32 },
    Completed { points: u32 },
    Stopped { completed: u32 },
    Aborted(EmulatorError),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SweepOutput {
    Command(SweepCommand),
    Event(SweepEvent),
}

/// Observable sweep phase.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SweepPhase {
    Idle,
    WarmingUp,
    AwaitingEmulator,
    Measuring,
    Draining,
    Cooldown,
}

impl fmt::Display for SweepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SweepPhase::Idle => "idle",
            SweepPhase::WarmingUp => "warming-up",
            SweepPhase::AwaitingEmulator => "awaiting-emulator",
            SweepPhase::Measuring => "measuring",
            SweepPhase::Draining => "draining",
            SweepPhase::Cooldown => "cooldown",
        })
    }
}

/// Snapshot for status rendering.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SweepStatus {
    pub phase: SweepPhase,
    pub point: Option<SweepPoint>,
    pub completed: u32,
    pub total: u32,
    pub records: usize,
}

#[derive(Copy, Clone, Debug)]
enum Phase<TInstant> {
    WarmingUp {
        until: TInstant,
    },
    AwaitingEmulator,
    Measuring {
        client_at: Option<TInstant>,
        until: Option<TInstant>,
    },
    Draining,
    Cooldown {
        until: TInstant,
    },
}

#[derive(Clone, Debug)]
struct ActiveSweep<TInstant> {
    plan: SweepPlan,
    targets: SweepTargets,
    cursor: SweepCursor,
    phase: Phase<TInstant>,
    records: Vec<MeasurementRecord>,
    sent: Option<u64>,
    received: Option<u64>,
    completed: u32,
}

impl<TInstant> ActiveSweep<TInstant> {
    fn point(&self) -> Option<SweepPoint> {
        self.plan.point(self.cursor)
    }

    fn accepts_measurements(&self) -> bool {
        matches!(self.phase, Phase::Measuring { .. } | Phase::Draining)
    }
}

/// Drives one sweep at a time.
pub struct SweepScheduler<TInstant> {
    timing: SweepTiming,
    active: Option<ActiveSweep<TInstant>>,
    discarded: u32,
    outputs: Vec<SweepOutput>,
}

impl<TInstant> SweepScheduler<TInstant>
where
    TInstant: MonoInstant,
{
    #[must_use]
    pub const fn new(timing: SweepTiming) -> Self {
        Self {
            timing,
            active: None,
            discarded: 0,
            outputs: Vec::new(),
        }
    }

    pub const fn timing(&self) -> &SweepTiming {
        &self.timing
    }

    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn phase(&self) -> SweepPhase {
        match self.active.as_ref().map(|sweep| sweep.phase) {
            None => SweepPhase::Idle,
            Some(Phase::WarmingUp { .. }) => SweepPhase::WarmingUp,
            Some(Phase::AwaitingEmulator) => SweepPhase::AwaitingEmulator,
            Some(Phase::Measuring { .. }) => SweepPhase::Measuring,
            Some(Phase::Draining) => SweepPhase::Draining,
            Some(Phase::Cooldown { .. }) => SweepPhase::Cooldown,
        }
    }

    pub fn current_point(&self) -> Option<SweepPoint> {
        self.active.as_ref().and_then(ActiveSweep::point)
    }

    /// Measurements received outside any point's measurement window.
    pub const fn discarded(&self) -> u32 {
        self.discarded
    }

    pub fn status(&self) -> SweepStatus {
        SweepStatus {
            phase: self.phase(),
            point: self.current_point(),
            completed: self.active.as_ref().map_or(0, |sweep| sweep.completed),
            total: self
                .active
                .as_ref()
                .map_or(0, |sweep| sweep.plan.point_count()),
            records: self.active.as_ref().map_or(0, |sweep| sweep.records.len()),
        }
    }

    pub fn take_outputs(&mut self) -> Vec<SweepOutput> {
        mem::take(&mut self.outputs)
    }

    /// Starts `plan`. Sessions are stopped first; when the emulator is used
    /// it is launched at the first point's SNR and given time to stabilize.
    ///
    /// # Errors
    ///
    /// [`EngineError::SweepActive`] if a sweep is already running.
    pub fn start(
        &mut self,
        plan: SweepPlan,
        targets: SweepTargets,
        now: TInstant,
    ) -> Result<(), EngineError> {
        if self.active.is_some() {
            return Err(EngineError::SweepActive);
        }
        let cursor = plan.first();
        let Some(first) = plan.point(cursor) else {
            return Err(SweepConfigError::NoTiers.into());
        };

        self.emit(SweepEvent::Started {
            points: plan.point_count(),
        });
        self.command(SweepCommand::StopSessions);

        let phase = if targets.use_emulator {
            self.command(SweepCommand::LaunchEmulator {
                snr: first.snr,
                channel: targets.channel,
            });
            Phase::WarmingUp {
                until: now + self.timing.stabilization,
            }
        } else {
            Phase::Cooldown { until: now }
        };

        self.active = Some(ActiveSweep {
            plan,
            targets,
            cursor,
            phase,
            records: Vec::new(),
            sent: None,
            received: None,
            completed: 0,
        });
        Ok(())
    }

    /// Cancels the sweep in any phase. Safe when no sweep is running.
    pub fn stop(&mut self) {
        self.command(SweepCommand::StopSessions);
        self.command(SweepCommand::ShutdownEmulator);
        if let Some(sweep) = self.active.take() {
            self.emit(SweepEvent::Stopped {
                completed: sweep.completed,
            });
        }
    }

    /// Ends the sweep after an emulator failure.
    pub fn abort(&mut self, error: EmulatorError) {
        if self.active.take().is_none() {
            return;
        }
        self.command(SweepCommand::StopSessions);
        self.command(SweepCommand::ShutdownEmulator);
        self.emit(SweepEvent::Aborted(error));
    }

    /// The emulator confirmed the SNR pushed for the current point.
    pub fn emulator_confirmed(&mut self, snr: Snr, now: TInstant) {
        let awaiting = self.active.as_ref().is_some_and(|sweep| {
            matches!(sweep.phase, Phase::AwaitingEmulator)
                && sweep.point().is_some_and(|point| point.snr == snr)
        });
        if awaiting {
            self.start_measurement(now);
        }
    }

    /// Attributes a record to the active point. Returns `false` when it
    /// arrived outside the measurement window and was dropped.
    pub fn collect_record(&mut self, record: MeasurementRecord) -> bool {
        match self.active.as_mut() {
            Some(sweep) if sweep.accepts_measurements() => {
                sweep.records.push(record);
                true
            }
            _ => {
                self.discarded = self.discarded.saturating_add(1);
                false
            }
        }
    }

    /// Attributes a packet summary to the active point. Sent totals come
    /// from the client and received totals from the server; the other radio's
    /// copy is ignored.
    pub fn collect_summary(&mut self, role: Role, summary: PacketSummary) -> bool {
        match self.active.as_mut() {
            Some(sweep) if sweep.accepts_measurements() && summary.reporter() == role => {
                match summary {
                    PacketSummary::Sent(count) => sweep.sent = Some(count),
                    PacketSummary::Received(count) => sweep.received = Some(count),
                }
                true
            }
            _ => false,
        }
    }

    /// Advances timers. `sessions_idle` is `true` once both sessions have
    /// fully settled in idle.
    pub fn poll(&mut self, now: TInstant, sessions_idle: bool) {
        loop {
            let Some(phase) = self.active.as_ref().map(|sweep| sweep.phase) else {
                return;
            };
            match phase {
                Phase::WarmingUp { until } | Phase::Cooldown { until } => {
                    if now < until {
                        return;
                    }
                    self.begin_point(now);
                }
                Phase::AwaitingEmulator => return,
                Phase::Measuring { client_at, until } => {
                    if let Some(at) = client_at {
                        if now < at {
                            return;
                        }
                        self.start_client(now);
                    } else if let Some(until) = until {
                        if now < until {
                            return;
                        }
                        self.set_phase(Phase::Draining);
                        self.command(SweepCommand::StopSessions);
                    } else {
                        return;
                    }
                }
                Phase::Draining => {
                    if !sessions_idle {
                        return;
                    }
                    self.finish_point(now);
                }
            }
        }
    }

    pub fn next_deadline(&self) -> Option<TInstant> {
        match self.active.as_ref()?.phase {
            Phase::WarmingUp { until } | Phase::Cooldown { until } => Some(until),
            Phase::Measuring { client_at, until } => earliest(client_at, until),
            Phase::AwaitingEmulator | Phase::Draining => None,
        }
    }

    fn begin_point(&mut self, now: TInstant) {
        let Some(sweep) = self.active.as_mut() else {
            return;
        };
        let Some(point) = sweep.point() else {
            return;
        };
        sweep.records.clear();
        sweep.sent = None;
        sweep.received = None;
        let use_emulator = sweep.targets.use_emulator;
        let channel = sweep.targets.channel;

        self.emit(SweepEvent::PointStarted(point));
        if use_emulator {
            self.set_phase(Phase::AwaitingEmulator);
            self.command(SweepCommand::PushSnr {
                snr: point.snr,
                channel,
            });
        } else {
            self.start_measurement(now);
        }
    }

    fn start_measurement(&mut self, now: TInstant) {
        let Some(sweep) = self.active.as_ref() else {
            return;
        };
        let Some(point) = sweep.point() else {
            return;
        };
        let request = StartRequest::new(sweep.targets.server_path.clone(), server_start(point.snr));
        self.set_phase(Phase::Measuring {
            client_at: Some(now + self.timing.client_delay),
            until: None,
        });
        self.command(SweepCommand::StartSession(Role::Server, request));
    }

    fn start_client(&mut self, now: TInstant) {
        let Some(sweep) = self.active.as_ref() else {
            return;
        };
        let Some(point) = sweep.point() else {
            return;
        };
        let request = StartRequest::new(
            sweep.targets.client_path.clone(),
            client_start(point.mcs, self.timing.measurement),
        );
        self.set_phase(Phase::Measuring {
            client_at: None,
            until: Some(now + self.timing.measurement + self.timing.grace),
        });
        self.command(SweepCommand::StartSession(Role::Client, request));
    }

    fn finish_point(&mut self, now: TInstant) {
        let cooldown = self.timing.cooldown;
        let Some(sweep) = self.active.as_mut() else {
            return;
        };
        let Some(point) = sweep.point() else {
            return;
        };
        let result = PointResult {
            point,
            channel: sweep.targets.channel,
            records: mem::take(&mut sweep.records),
            sent: sweep.sent.take(),
            received: sweep.received.take(),
        };
        sweep.completed += 1;
        let completed = sweep.completed;
        let next = sweep.plan.advance(sweep.cursor);
        if let Some(cursor) = next {
            sweep.cursor = cursor;
            sweep.phase = Phase::Cooldown {
                until: now + cooldown,
            };
        }

        let records = u32::try_from(result.records.len()).unwrap_or(u32::MAX);
        self.emit(SweepEvent::PointMeasured { point, records });
        self.command(SweepCommand::Persist(result));

        if next.is_none() {
            self.active = None;
            self.command(SweepCommand::ShutdownEmulator);
            self.emit(SweepEvent::Completed { points: completed });
        }
    }

    fn set_phase(&mut self, phase: Phase<TInstant>) {
        if let Some(sweep) = self.active.as_mut() {
            sweep.phase = phase;
        }
    }

    fn command(&mut self, command: SweepCommand) {
        self.outputs.push(SweepOutput::Command(command));
    }

    fn emit(&mut self, event: SweepEvent) {
        self.outputs.push(SweepOutput::Event(event));
    }
}
