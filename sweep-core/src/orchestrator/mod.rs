//! Measurement orchestration engine.
//!
//! [`MeasurementOrchestrator`] is the single owner of both command sessions,
//! their record extractors, the watchdog, the sweep scheduler, the channel
//! emulator tracker and the telemetry ring. The host feeds it inputs (operator
//! requests, serial bytes, link and emulator outcomes, timer expiry) and
//! drains [`HostAction`]s in order after every call. Nothing here blocks or
//! performs I/O; [`next_deadline`](MeasurementOrchestrator::next_deadline)
//! tells the host how long it may sleep.

use alloc::string::String;
use alloc::vec::Vec;
use core::mem;
use core::time::Duration;

use crate::ack::AckConfig;
use crate::emulator::{ChannelEmulator, ChannelType, EmulatorConfig, EmulatorRequest, EmulatorState};
use crate::error::{EngineError, PortErrorKind, SweepConfigError};
use crate::link::{LinkConfig, LinkRequest};
use crate::record::{ExtractedLine, LineKind, RecordExtractor};
use crate::sequences::SessionTiming;
use crate::session::{
    CommandSession, Role, SessionEvent, SessionOutput, SessionSnapshot, SessionState,
    StartRequest,
    client_start, server_start,
};
use crate::sweep::{
    MAX_MCS, PointResult, Snr, SweepCommand, SweepOutput, SweepPlan, SweepScheduler,
    SweepStatus, SweepTargets, SweepTiming,
};
use crate::telemetry::{EmulatorEvent, EngineEvent, TelemetryRecorder};
use crate::time::{MonoInstant, earliest};
use crate::watchdog::{Watchdog, WatchdogConfig};

/// Static configuration for one engine instance.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub server_path: String,
    pub client_path: String,
    pub link: LinkConfig,
    pub ack: AckConfig,
    pub session: SessionTiming,
    pub sweep: SweepTiming,
    pub watchdog: WatchdogConfig,
    pub emulator: EmulatorConfig,
    /// Plan run by [`EngineRequest::StartSweep`].
    pub plan: Option<SweepPlan>,
}

impl EngineConfig {
    /// Defaults for every delay; the watchdog threshold follows the default
    /// measurement duration.
    pub fn new(server_path: impl Into<String>, client_path: impl Into<String>) -> Self {
        let sweep = SweepTiming::default();
        Self {
            server_path: server_path.into(),
            client_path: client_path.into(),
            link: LinkConfig::default(),
            ack: AckConfig::default(),
            session: SessionTiming::default(),
            watchdog: WatchdogConfig::for_measurement(sweep.measurement),
            sweep,
            emulator: EmulatorConfig::default(),
            plan: None,
        }
    }
}

/// Operator requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineRequest {
    StartServer { path: String, snr: Snr },
    StopServer,
    StartClient { path: String, mcs: u8 },
    StopClient,
    /// Stops both sessions and any running sweep.
    StopAll,
    StartSweep,
    StopSweep,
    /// Forces a board reset before the role's next start.
    RearmReset(Role),
}

/// Work the host performs, drained in order.
#[derive(Clone, Debug, PartialEq)]
pub enum HostAction {
    Link { role: Role, request: LinkRequest },
    Emulator(EmulatorRequest),
    Persist(PointResult),
    DeviceLine { role: Role, line: ExtractedLine },
    Event(EngineEvent),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WatchdogStatus {
    pub armed: bool,
    pub breached: bool,
    pub silence: Option<Duration>,
    pub threshold: Duration,
}

/// Snapshot rendered by the `status` command.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EngineStatus {
    pub sessions: [SessionSnapshot; 2],
    pub watchdog: WatchdogStatus,
    pub sweep: SweepStatus,
    pub emulator: EmulatorState,
    pub channel: ChannelType,
}

pub struct MeasurementOrchestrator<TInstant>
where
    TInstant: MonoInstant,
{
    config: EngineConfig,
    sessions: [CommandSession<TInstant>; 2],
    extractors: [RecordExtractor; 2],
    watchdog: Watchdog<TInstant>,
    sweep: SweepScheduler<TInstant>,
    emulator: ChannelEmulator<TInstant>,
    telemetry: TelemetryRecorder<TInstant>,
    actions: Vec<HostAction>,
}

impl<TInstant> MeasurementOrchestrator<TInstant>
where
    TInstant: MonoInstant,
{
    pub fn new(config: EngineConfig) -> Self {
        let session = |role| CommandSession::new(role, config.link, config.ack, config.session);
        Self {
            sessions: [session(Role::Server), session(Role::Client)],
            extractors: [RecordExtractor::new(), RecordExtractor::new()],
            watchdog: Watchdog::new(config.watchdog),
            sweep: SweepScheduler::new(config.sweep),
            emulator: ChannelEmulator::new(config.emulator.confirm_timeout),
            telemetry: TelemetryRecorder::new(),
            actions: Vec::new(),
            config,
        }
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session(&self, role: Role) -> &CommandSession<TInstant> {
        &self.sessions[role.index()]
    }

    pub const fn sweep(&self) -> &SweepScheduler<TInstant> {
        &self.sweep
    }

    pub const fn telemetry(&self) -> &TelemetryRecorder<TInstant> {
        &self.telemetry
    }

    /// Drains pending host actions.
    pub fn take_actions(&mut self) -> Vec<HostAction> {
        mem::take(&mut self.actions)
    }

    /// Returns `true` when nothing is running and nothing is scheduled.
    pub fn is_quiescent(&self) -> bool {
        !self.sweep.is_active()
            && !self.emulator.is_running()
            && self
                .sessions
                .iter()
                .all(|session| session.state() == SessionState::Idle && session.is_settled())
    }

    /// Handles an operator request.
    ///
    /// # Errors
    ///
    /// Manual session control is refused while a sweep runs, an out-of-range
    /// MCS is rejected, and sweep start fails when a sweep is already active
    /// or no plan is configured.
    pub fn request(&mut self, request: EngineRequest, now: TInstant) -> Result<(), EngineError> {
        let result = self.apply_request(request, now);
        self.step(now);
        result
    }

    fn apply_request(&mut self, request: EngineRequest, now: TInstant) -> Result<(), EngineError> {
        match request {
            EngineRequest::StartServer { path, snr } => {
                self.ensure_manual()?;
                self.sessions[Role::Server.index()]
                    .request_start(StartRequest::new(path, server_start(snr)), now);
            }
            EngineRequest::StartClient { path, mcs } => {
                self.ensure_manual()?;
                if mcs > MAX_MCS {
                    return Err(SweepConfigError::McsOutOfRange { mcs }.into());
                }
                let command = client_start(mcs, self.config.sweep.measurement);
                self.sessions[Role::Client.index()]
                    .request_start(StartRequest::new(path, command), now);
            }
            EngineRequest::StopServer => {
                self.ensure_manual()?;
                self.sessions[Role::Server.index()].request_stop(now);
            }
            EngineRequest::StopClient => {
                self.ensure_manual()?;
                self.sessions[Role::Client.index()].request_stop(now);
            }
            EngineRequest::StopAll => {
                if self.sweep.is_active() {
                    self.sweep.stop();
                } else {
                    self.stop_sessions(now);
                }
            }
            EngineRequest::StartSweep => {
                let plan = self
                    .config
                    .plan
                    .clone()
                    .ok_or(EngineError::SweepConfig(SweepConfigError::NoTiers))?;
                let targets = SweepTargets {
                    server_path: self.config.server_path.clone(),
                    client_path: self.config.client_path.clone(),
                    channel: self.config.emulator.channel,
                    use_emulator: self.config.emulator.enabled,
                };
                self.sweep.start(plan, targets, now)?;
            }
            EngineRequest::StopSweep => self.sweep.stop(),
            EngineRequest::RearmReset(role) => self.sessions[role.index()].rearm_reset(),
        }
        Ok(())
    }

    fn ensure_manual(&self) -> Result<(), EngineError> {
        if self.sweep.is_active() {
            Err(EngineError::SessionsOwnedBySweep)
        } else {
            Ok(())
        }
    }

    /// Bytes read from a role's serial port.
    pub fn serial_data(&mut self, role: Role, chunk: &[u8], now: TInstant) {
        let lines = self.extractors[role.index()].push(chunk);
        for line in lines {
            self.sessions[role.index()].observe_line(&line.text);
            match line.kind {
                LineKind::Record(record) => {
                    self.sessions[role.index()].note_record(now);
                    self.watchdog.note_activity(now);
                    if self.sweep.is_active() && !self.sweep.collect_record(record) {
                        self.emit(EngineEvent::RecordDiscarded { role }, now);
                    }
                }
                LineKind::Summary(summary) => {
                    self.sweep.collect_summary(role, summary);
                }
                LineKind::Text => {}
            }
            self.actions.push(HostAction::DeviceLine { role, line });
        }
        self.step(now);
    }

    pub fn link_opened(&mut self, role: Role, now: TInstant) {
        self.sessions[role.index()].link_opened(now);
        self.step(now);
    }

    pub fn link_open_failed(&mut self, role: Role, now: TInstant) {
        self.sessions[role.index()].link_open_failed(now);
        self.step(now);
    }

    pub fn link_closed(&mut self, role: Role, now: TInstant) {
        self.extractors[role.index()].clear();
        self.sessions[role.index()].link_closed(now);
        self.step(now);
    }

    /// The device vanished while held.
    pub fn link_lost(&mut self, role: Role, now: TInstant) {
        self.extractors[role.index()].clear();
        self.sessions[role.index()].link_lost(now);
        self.step(now);
    }

    /// The host could not carry out a write, DTR or close request.
    pub fn link_request_failed(&mut self, role: Role, kind: PortErrorKind, now: TInstant) {
        self.sessions[role.index()].link_request_failed(kind, now);
        self.step(now);
    }

    pub fn emulator_spawned(&mut self, now: TInstant) {
        self.emulator.spawned();
        self.emit(EngineEvent::Emulator(EmulatorEvent::Spawned), now);
        self.step(now);
    }

    pub fn emulator_spawn_failed(&mut self, now: TInstant) {
        let error = self.emulator.spawn_failed();
        self.emit(EngineEvent::Emulator(EmulatorEvent::Failed(error)), now);
        self.sweep.abort(error);
        self.step(now);
    }

    /// One line from the emulator's stdout.
    pub fn emulator_line(&mut self, line: &str, now: TInstant) {
        if let Some(snr) = self.emulator.observe_line(line) {
            self.emit(EngineEvent::Emulator(EmulatorEvent::Confirmed(snr)), now);
            self.sweep.emulator_confirmed(snr, now);
        }
        self.step(now);
    }

    /// The emulator process ended. Exits after a requested shutdown are
    /// already reported; anything else aborts the sweep.
    pub fn emulator_exited(&mut self, code: Option<i32>, now: TInstant) {
        if let Some(error) = self.emulator.exited(code) {
            self.emit(EngineEvent::Emulator(EmulatorEvent::Failed(error)), now);
            self.sweep.abort(error);
        }
        self.step(now);
    }

    /// Advances every timer that has elapsed by `now`.
    pub fn poll(&mut self, now: TInstant) {
        self.step(now);
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<TInstant> {
        let sessions = self
            .sessions
            .iter()
            .map(CommandSession::next_deadline)
            .fold(None, earliest);
        [
            self.sweep.next_deadline(),
            self.emulator.next_deadline(),
            self.watchdog.next_deadline(),
        ]
        .into_iter()
        .fold(sessions, earliest)
    }

    pub fn status(&self, now: TInstant) -> EngineStatus {
        EngineStatus {
            sessions: [
                self.sessions[Role::Server.index()].snapshot(),
                self.sessions[Role::Client.index()].snapshot(),
            ],
            watchdog: WatchdogStatus {
                armed: self.watchdog.is_armed(),
                breached: self.watchdog.is_breached(),
                silence: self.watchdog.silence(now),
                threshold: self.watchdog.config().threshold,
            },
            sweep: self.sweep.status(),
            emulator: self.emulator.state(),
            channel: self.config.emulator.channel,
        }
    }

    fn step(&mut self, now: TInstant) {
        for session in &mut self.sessions {
            session.poll(now);
        }
        self.settle(now);

        if let Some(error) = self.emulator.poll(now) {
            self.emit(EngineEvent::Emulator(EmulatorEvent::Failed(error)), now);
            self.sweep.abort(error);
            self.settle(now);
        }

        self.update_watchdog(now);
        let eligible = self.watchdog_eligible();
        if let Some(stall) = self.watchdog.check(now, eligible) {
            self.emit(EngineEvent::Stall(stall), now);
            self.recover(now);
            self.settle(now);
        }
    }

    /// Routes outputs until sessions and the sweep stop producing work.
    fn settle(&mut self, now: TInstant) {
        loop {
            let mut progressed = false;
            for role in Role::ALL {
                let outputs = self.sessions[role.index()].take_outputs();
                progressed |= !outputs.is_empty();
                for output in outputs {
                    match output {
                        SessionOutput::Link(request) => {
                            self.actions.push(HostAction::Link { role, request });
                        }
                        SessionOutput::Event(event) => {
                            if let SessionEvent::StateChanged {
                                to: SessionState::Running,
                                ..
                            } = event
                            {
                                self.watchdog.rebaseline(now);
                            }
                            self.emit(EngineEvent::Session { role, event }, now);
                        }
                    }
                }
            }

            let idle = self.sessions_idle();
            self.sweep.poll(now, idle);
            let outputs = self.sweep.take_outputs();
            progressed |= !outputs.is_empty();
            for output in outputs {
                match output {
                    SweepOutput::Command(command) => self.apply_sweep_command(command, now),
                    SweepOutput::Event(event) => self.emit(EngineEvent::Sweep(event), now),
                }
            }

            if !progressed {
                return;
            }
        }
    }

    fn apply_sweep_command(&mut self, command: SweepCommand, now: TInstant) {
        match command {
            SweepCommand::LaunchEmulator { snr, channel } => {
                if let Some(request) = self.emulator.launch(snr, channel) {
                    self.actions.push(HostAction::Emulator(request));
                }
            }
            SweepCommand::PushSnr { snr, channel } => {
                match self.emulator.push_snr(snr, channel, now) {
                    Ok(request) => self.actions.push(HostAction::Emulator(request)),
                    Err(error) => {
                        self.emit(EngineEvent::Emulator(EmulatorEvent::Failed(error)), now);
                        self.sweep.abort(error);
                    }
                }
            }
            SweepCommand::StartSession(role, request) => {
                self.sessions[role.index()].request_start(request, now);
            }
            SweepCommand::StopSessions => self.stop_sessions(now),
            SweepCommand::Persist(result) => self.actions.push(HostAction::Persist(result)),
            SweepCommand::ShutdownEmulator => {
                let requests = self.emulator.shutdown();
                if !requests.is_empty() {
                    self.emit(EngineEvent::Emulator(EmulatorEvent::Stopped), now);
                }
                self.actions
                    .extend(requests.into_iter().map(HostAction::Emulator));
            }
        }
    }

    fn stop_sessions(&mut self, now: TInstant) {
        for session in &mut self.sessions {
            session.request_stop(now);
        }
    }

    /// Stops both sessions and re-issues each role's last start through the
    /// regular request path.
    fn recover(&mut self, now: TInstant) {
        for role in Role::ALL {
            let session = &mut self.sessions[role.index()];
            match session.last_command().cloned() {
                Some(request) => {
                    session.request_start(request, now);
                    self.emit(EngineEvent::Recovery { role }, now);
                }
                None => session.request_stop(now),
            }
        }
    }

    fn sessions_idle(&self) -> bool {
        self.sessions
            .iter()
            .all(|session| session.state() == SessionState::Idle && session.is_settled())
    }

    fn watchdog_eligible(&self) -> bool {
        let any_running = self
            .sessions
            .iter()
            .any(|session| session.state() == SessionState::Running);
        let none_transitioning = self
            .sessions
            .iter()
            .all(|session| !session.state().is_transitioning() && session.is_settled());
        any_running && none_transitioning
    }

    fn update_watchdog(&mut self, now: TInstant) {
        let active = self.sweep.is_active()
            || self
                .sessions
                .iter()
                .any(|session| session.state() != SessionState::Idle);
        if active {
            self.watchdog.arm(now);
        } else if self.watchdog.is_armed() {
            self.watchdog.disarm();
        }
    }

    fn emit(&mut self, event: EngineEvent, now: TInstant) {
        self.telemetry.record(event, now);
        self.actions.push(HostAction::Event(event));
    }
}
