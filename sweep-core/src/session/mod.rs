//! Per-role command session.
//!
//! A [`CommandSession`] owns one [`Link`] and its [`StopAckDetector`] and
//! drives them through the [`sequences`](crate::sequences) templates:
//!
//! ```text
//! Idle -> Resetting -> Starting -> Running -> Stopping -> Idle
//! ```
//!
//! Requests that arrive while a sequence is in flight are queued (latest
//! request wins) and applied once the sequence settles, so a start can never
//! race a closing link. The session is sans-IO: it emits [`SessionOutput`]s
//! which the orchestrator forwards to the host, and the host reports link
//! outcomes back through the `link_*` methods.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::mem;
use core::time::Duration;

use crate::ack::{AckConfig, AckOutcome, AckResolution, NotAckReason, StopAckDetector};
use crate::error::{AckTimeoutError, PortError, PortErrorKind};
use crate::link::{DtrLevel, Link, LinkConfig, LinkRequest, LinkState, OpenFailure};
use crate::sequences::{
    LinkAction, SequenceKind, SequenceTemplate, SessionTiming, StepCompletion, template_for,
};
use crate::sweep::Snr;
use crate::time::{MonoInstant, earliest};

/// Transmit power passed to the client start command, in dBm.
pub const DEFAULT_CLIENT_TX_POWER: i16 = -30;

/// Literal stop command understood by both roles.
pub const STOP_COMMAND: &str = "dect perf stop";

/// Which radio a session controls.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Server, Role::Client];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Client => "client",
        }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Role::Server => 0,
            Role::Client => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session lifecycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    Resetting,
    Starting,
    Running,
    Stopping,
}

impl SessionState {
    /// Returns `true` when `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Idle, SessionState::Resetting | SessionState::Starting)
                | (SessionState::Resetting, SessionState::Starting | SessionState::Idle)
                | (SessionState::Starting, SessionState::Running | SessionState::Idle)
                | (SessionState::Running, SessionState::Stopping | SessionState::Idle)
                | (SessionState::Stopping, SessionState::Idle)
        )
    }

    /// Returns `true` while a sequence is executing.
    #[must_use]
    pub const fn is_transitioning(self) -> bool {
        matches!(
            self,
            SessionState::Resetting | SessionState::Starting | SessionState::Stopping
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Resetting => "resetting",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
        })
    }
}

/// Command line written to a radio console.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DeviceCommand {
    ServerStart {
        snr: Snr,
    },
    ClientStart {
        mcs: u8,
        tx_power: i16,
        duration_secs: u32,
    },
    Stop,
}

impl DeviceCommand {
    /// Role that accepts this command, `None` for stop.
    #[must_use]
    pub const fn role(&self) -> Option<Role> {
        match self {
            DeviceCommand::ServerStart { .. } => Some(Role::Server),
            DeviceCommand::ClientStart { .. } => Some(Role::Client),
            DeviceCommand::Stop => None,
        }
    }

    /// Newline-terminated wire form.
    #[must_use]
    pub fn line(&self) -> String {
        format!("{self}\n")
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::ServerStart { snr } => write!(f, "dect perf -s --pdc_number={snr}"),
            DeviceCommand::ClientStart {
                mcs,
                tx_power,
                duration_secs,
            } => write!(
                f,
                "dect perf -c --c_tx_mcs {mcs} --c_tx_pwr {tx_power} -t {duration_secs}"
            ),
            DeviceCommand::Stop => f.write_str(STOP_COMMAND),
        }
    }
}

/// A start request: which device to open and what to run on it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StartRequest {
    pub path: String,
    pub command: DeviceCommand,
}

impl StartRequest {
    pub fn new(path: impl Into<String>, command: DeviceCommand) -> Self {
        Self {
            path: path.into(),
            command,
        }
    }
}

/// Observable session transitions and failures.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    SequenceStarted(SequenceKind),
    SequenceFinished(SequenceKind),
    CommandWritten(DeviceCommand),
    OpenRetry {
        attempt: u8,
    },
    StopAck(AckResolution),
    AckTimeout(AckTimeoutError),
    Port(PortError),
}

/// Output drained by the orchestrator after every call.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutput {
    Link(LinkRequest),
    Event(SessionEvent),
}

#[derive(Clone, Debug)]
enum PendingRequest {
    Start(StartRequest),
    Stop,
}

#[derive(Copy, Clone, Debug)]
enum StepPhase<TInstant> {
    Ready,
    Awaiting,
    Holding { until: TInstant },
}

#[derive(Clone, Debug)]
struct SequenceRun<TInstant> {
    template: SequenceTemplate,
    index: usize,
    phase: StepPhase<TInstant>,
}

/// Read-only view used for status reporting.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SessionSnapshot {
    pub role: Role,
    pub state: SessionState,
    pub link: LinkState,
    pub dtr: DtrLevel,
    pub ack_pending: bool,
    pub reset_done: bool,
    pub last_command: Option<DeviceCommand>,
}

/// Controller for one radio.
pub struct CommandSession<TInstant> {
    role: Role,
    state: SessionState,
    link: Link<TInstant>,
    ack: StopAckDetector<TInstant>,
    timing: SessionTiming,
    run: Option<SequenceRun<TInstant>>,
    pending: Option<PendingRequest>,
    active: Option<StartRequest>,
    last_command: Option<StartRequest>,
    last_record_at: Option<TInstant>,
    reset_done: bool,
    outputs: Vec<SessionOutput>,
}

impl<TInstant> CommandSession<TInstant>
where
    TInstant: MonoInstant,
{
    pub fn new(role: Role, link: LinkConfig, ack: AckConfig, timing: SessionTiming) -> Self {
        Self {
            role,
            state: SessionState::Idle,
            link: Link::new(link),
            ack: StopAckDetector::new(ack),
            timing,
            run: None,
            pending: None,
            active: None,
            last_command: None,
            last_record_at: None,
            reset_done: false,
            outputs: Vec::new(),
        }
    }

    pub const fn role(&self) -> Role {
        self.role
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    pub const fn link(&self) -> &Link<TInstant> {
        &self.link
    }

    /// Returns `true` when idle or running with nothing queued.
    pub fn is_settled(&self) -> bool {
        matches!(self.state, SessionState::Idle | SessionState::Running) && self.pending.is_none()
    }

    pub const fn reset_done(&self) -> bool {
        self.reset_done
    }

    /// Last start accepted by this session, used for stall recovery.
    pub fn last_command(&self) -> Option<&StartRequest> {
        self.last_command.as_ref()
    }

    pub const fn last_record_at(&self) -> Option<TInstant> {
        self.last_record_at
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            role: self.role,
            state: self.state,
            link: self.link.state(),
            dtr: self.link.dtr(),
            ack_pending: self.ack.is_pending(),
            reset_done: self.reset_done,
            last_command: self.last_command.as_ref().map(|request| request.command),
        }
    }

    /// Forces the next start to pulse the board reset again.
    pub fn rearm_reset(&mut self) {
        self.reset_done = false;
    }

    /// Drains everything emitted since the last call.
    pub fn take_outputs(&mut self) -> Vec<SessionOutput> {
        mem::take(&mut self.outputs)
    }

    /// Starts (or restarts) the radio with `request`.
    pub fn request_start(&mut self, request: StartRequest, now: TInstant) {
        self.last_command = Some(request.clone());
        match self.state {
            SessionState::Idle => self.begin_start(request),
            SessionState::Running => {
                self.pending = Some(PendingRequest::Start(request));
                self.begin_stop();
            }
            SessionState::Resetting | SessionState::Starting | SessionState::Stopping => {
                self.pending = Some(PendingRequest::Start(request));
            }
        }
        self.advance(now);
    }

    /// Stops the radio. A no-op when idle; reuses an in-flight teardown.
    pub fn request_stop(&mut self, now: TInstant) {
        match self.state {
            SessionState::Idle => {}
            SessionState::Stopping => self.pending = None,
            SessionState::Running => {
                self.pending = None;
                self.begin_stop();
            }
            SessionState::Resetting | SessionState::Starting => {
                self.pending = Some(PendingRequest::Stop);
            }
        }
        self.advance(now);
    }

    /// Console text for the acknowledgment buffer.
    pub fn observe_line(&mut self, text: &str) {
        self.ack.observe_text(text);
    }

    /// A measurement record arrived from this role.
    pub fn note_record(&mut self, now: TInstant) {
        self.last_record_at = Some(now);
    }

    pub fn link_opened(&mut self, now: TInstant) {
        self.link.opened();
        self.advance(now);
    }

    pub fn link_open_failed(&mut self, now: TInstant) {
        match self.link.open_failed(now) {
            OpenFailure::Retry { attempt, .. } => {
                self.emit(SessionEvent::OpenRetry { attempt });
            }
            OpenFailure::GiveUp { attempts } => {
                self.port_error(PortErrorKind::Open { attempts });
                self.abort(now);
            }
        }
    }

    pub fn link_closed(&mut self, now: TInstant) {
        self.link.closed();
        self.advance(now);
    }

    /// The device disappeared. Any pending acknowledgment resolves as not
    /// acknowledged and the session drops to idle.
    pub fn link_lost(&mut self, now: TInstant) {
        let was_held = self.link.lost();
        if let Some(resolution) = self.ack.link_lost(now) {
            self.emit(SessionEvent::StopAck(resolution));
        }
        if was_held {
            self.port_error(PortErrorKind::Lost);
        }
        self.abort(now);
    }

    /// The host failed to carry out a write, DTR or close request.
    pub fn link_request_failed(&mut self, kind: PortErrorKind, now: TInstant) {
        self.port_error(kind);
        self.advance(now);
    }

    /// Advances timers. Call whenever [`next_deadline`](Self::next_deadline) elapses.
    pub fn poll(&mut self, now: TInstant) {
        if let Some(request) = self.link.poll_retry(now) {
            self.outputs.push(SessionOutput::Link(request));
        }
        self.advance(now);
    }

    /// Earliest instant at which [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<TInstant> {
        let step = self.run.as_ref().and_then(|run| match run.phase {
            StepPhase::Holding { until } => Some(until),
            StepPhase::Awaiting => run
                .template
                .step(run.index)
                .filter(|step| step.completion == StepCompletion::OnStopAck)
                .and_then(|_| self.ack.next_deadline(self.last_record_at)),
            StepPhase::Ready => None,
        });
        earliest(step, self.link.next_deadline())
    }

    fn begin_start(&mut self, request: StartRequest) {
        self.active = Some(request);
        if self.reset_done {
            self.begin_sequence(SequenceKind::Start, SessionState::Starting);
        } else {
            self.begin_sequence(SequenceKind::BoardReset, SessionState::Resetting);
        }
    }

    fn begin_stop(&mut self) {
        self.begin_sequence(SequenceKind::Stop, SessionState::Stopping);
    }

    fn begin_sequence(&mut self, kind: SequenceKind, state: SessionState) {
        self.transition(state);
        self.run = Some(SequenceRun {
            template: template_for(kind, &self.timing),
            index: 0,
            phase: StepPhase::Ready,
        });
        self.emit(SessionEvent::SequenceStarted(kind));
    }

    fn advance(&mut self, now: TInstant) {
        loop {
            let Some(run) = self.run.as_ref() else {
                return;
            };
            let index = run.index;
            let phase = run.phase;
            let kind = run.template.kind;

            match phase {
                StepPhase::Ready => {
                    let Some(step) = run.template.step(index).copied() else {
                        self.finish_sequence(kind);
                        continue;
                    };
                    let completion = self.execute(step.action, now);
                    let next = if completion {
                        StepPhase::Holding {
                            until: now + step.hold_for,
                        }
                    } else {
                        StepPhase::Awaiting
                    };
                    self.set_phase(next);
                }
                StepPhase::Awaiting => {
                    let Some(step) = run.template.step(index).copied() else {
                        return;
                    };
                    if !self.completed(step.completion, now) {
                        return;
                    }
                    self.set_phase(StepPhase::Holding {
                        until: now + step.hold_for,
                    });
                }
                StepPhase::Holding { until } => {
                    if now < until {
                        return;
                    }
                    if let Some(run) = self.run.as_mut() {
                        run.index += 1;
                        run.phase = StepPhase::Ready;
                    }
                }
            }
        }
    }

    fn set_phase(&mut self, phase: StepPhase<TInstant>) {
        if let Some(run) = self.run.as_mut() {
            run.phase = phase;
        }
    }

    /// Issues the step action. Returns `true` when the step is already complete.
    fn execute(&mut self, action: LinkAction, now: TInstant) -> bool {
        match action {
            LinkAction::Open => {
                let Some(path) = self.active.as_ref().map(|request| request.path.clone()) else {
                    return true;
                };
                match self.link.open(&path) {
                    Ok(Some(request)) => {
                        self.outputs.push(SessionOutput::Link(request));
                        false
                    }
                    Ok(None) => self.link.is_open(),
                    Err(kind) => {
                        self.port_error(kind);
                        self.abort(now);
                        true
                    }
                }
            }
            LinkAction::SetDtr(level) => {
                match self.link.set_dtr(level) {
                    Ok(request) => self.outputs.push(SessionOutput::Link(request)),
                    Err(_) => self.port_error(PortErrorKind::Dtr),
                }
                true
            }
            LinkAction::WriteCommand => {
                if let Some(command) = self.active.as_ref().map(|request| request.command) {
                    self.write(command);
                }
                true
            }
            LinkAction::WriteStop => {
                self.ack.clear_text();
                self.write(DeviceCommand::Stop);
                true
            }
            LinkAction::AwaitStopAck => {
                self.ack.begin(now);
                false
            }
            LinkAction::Close => match self.link.close() {
                Some(request) => {
                    self.outputs.push(SessionOutput::Link(request));
                    false
                }
                None => self.link.state() == LinkState::Closed,
            },
        }
    }

    fn completed(&mut self, completion: StepCompletion, now: TInstant) -> bool {
        match completion {
            StepCompletion::AfterDuration => true,
            StepCompletion::OnLinkOpen => self.link.is_open(),
            StepCompletion::OnLinkClosed => self.link.state() == LinkState::Closed,
            StepCompletion::OnStopAck => match self.ack.poll(now, self.last_record_at) {
                Some(resolution) => {
                    self.emit(SessionEvent::StopAck(resolution));
                    if resolution.outcome
                        == AckOutcome::NotAcknowledged(NotAckReason::DeadlineElapsed)
                    {
                        self.emit(SessionEvent::AckTimeout(AckTimeoutError {
                            role: self.role,
                            waited: resolution.waited,
                        }));
                    }
                    true
                }
                None => false,
            },
        }
    }

    fn write(&mut self, command: DeviceCommand) {
        match self.link.write(&command.line()) {
            Ok(request) => {
                self.outputs.push(SessionOutput::Link(request));
                self.emit(SessionEvent::CommandWritten(command));
            }
            Err(_) => self.port_error(PortErrorKind::Write),
        }
    }

    fn finish_sequence(&mut self, kind: SequenceKind) {
        self.run = None;
        self.emit(SessionEvent::SequenceFinished(kind));

        match kind {
            SequenceKind::BoardReset => {
                self.reset_done = true;
                match self.pending.take() {
                    Some(PendingRequest::Stop) => {
                        self.active = None;
                        self.transition(SessionState::Idle);
                    }
                    Some(PendingRequest::Start(request)) => {
                        self.active = Some(request);
                        self.begin_sequence(SequenceKind::Start, SessionState::Starting);
                    }
                    None => self.begin_sequence(SequenceKind::Start, SessionState::Starting),
                }
            }
            SequenceKind::Start => {
                self.transition(SessionState::Running);
                match self.pending {
                    Some(PendingRequest::Stop) => {
                        self.pending = None;
                        self.begin_stop();
                    }
                    Some(PendingRequest::Start(_)) => self.begin_stop(),
                    None => {}
                }
            }
            SequenceKind::Stop => {
                self.active = None;
                self.transition(SessionState::Idle);
                if let Some(PendingRequest::Start(request)) = self.pending.take() {
                    self.begin_start(request);
                }
            }
        }
    }

    /// Drops the in-flight sequence and any queued request; the link is
    /// released if still held.
    fn abort(&mut self, now: TInstant) {
        self.run = None;
        self.pending = None;
        self.active = None;
        if let Some(resolution) = self.ack.cancel(now) {
            self.emit(SessionEvent::StopAck(resolution));
        }
        if let Some(request) = self.link.close() {
            self.outputs.push(SessionOutput::Link(request));
        }
        if self.state != SessionState::Idle {
            self.transition(SessionState::Idle);
        }
    }

    fn transition(&mut self, next: SessionState) {
        let from = self.state;
        debug_assert!(
            from.can_transition_to(next),
            "illegal session transition {from} -> {next}"
        );
        self.state = next;
        self.emit(SessionEvent::StateChanged { from, to: next });
    }

    fn port_error(&mut self, kind: PortErrorKind) {
        self.emit(SessionEvent::Port(PortError::new(self.role, kind)));
    }

    fn emit(&mut self, event: SessionEvent) {
        self.outputs.push(SessionOutput::Event(event));
    }
}

/// Builds the server start command.
#[must_use]
pub const fn server_start(snr: Snr) -> DeviceCommand {
    DeviceCommand::ServerStart { snr }
}

/// Builds the client start command with the default transmit power.
#[must_use]
pub fn client_start(mcs: u8, duration: Duration) -> DeviceCommand {
    DeviceCommand::ClientStart {
        mcs,
        tx_power: DEFAULT_CLIENT_TX_POWER,
        duration_secs: u32::try_from(duration.as_secs()).unwrap_or(u32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MicrosInstant(u64);

    impl MicrosInstant {
        fn millis(value: u64) -> Self {
            Self(value * 1_000)
        }
    }

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

    fn session(role: Role) -> CommandSession<MicrosInstant> {
        CommandSession::new(
            role,
            LinkConfig::default(),
            AckConfig::default(),
            SessionTiming::default(),
        )
    }

    fn link_requests(outputs: &[SessionOutput]) -> Vec<LinkRequest> {
        outputs
            .iter()
            .filter_map(|output| match output {
                SessionOutput::Link(request) => Some(request.clone()),
                SessionOutput::Event(_) => None,
            })
            .collect()
    }

    #[test]
    fn command_strings_match_firmware_grammar() {
        assert_eq!(
            DeviceCommand::ServerStart {
                snr: Snr::from_whole_db(2)
            }
            .line(),
            "dect perf -s --pdc_number=2\n"
        );
        assert_eq!(
            DeviceCommand::ServerStart {
                snr: Snr::from_millidb(-3_500)
            }
            .to_string(),
            "dect perf -s --pdc_number=-3.5"
        );
        assert_eq!(
            client_start(3, Duration::from_secs(50)).line(),
            "dect perf -c --c_tx_mcs 3 --c_tx_pwr -30 -t 50\n"
        );
        assert_eq!(DeviceCommand::Stop.line(), "dect perf stop\n");
    }

    #[test]
    fn transition_table_follows_lifecycle() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Resetting));
        assert!(Idle.can_transition_to(Starting));
        assert!(Resetting.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Running));
        assert!(!Stopping.can_transition_to(Starting));
        assert!(!Running.can_transition_to(Starting));
    }

    #[test]
    fn first_start_resets_board_then_writes_command() {
        let mut session = session(Role::Server);
        let request = StartRequest::new("/dev/ttyACM0", server_start(Snr::from_whole_db(2)));
        session.request_start(request, MicrosInstant::millis(0));
        assert_eq!(session.state(), SessionState::Resetting);
        let outputs = session.take_outputs();
        assert!(matches!(
            link_requests(&outputs).as_slice(),
            [LinkRequest::Open { .. }]
        ));

        session.link_opened(MicrosInstant::millis(10));
        assert_eq!(
            link_requests(&session.take_outputs()),
            [LinkRequest::SetDtr(DtrLevel::Low)]
        );

        session.poll(MicrosInstant::millis(110));
        assert_eq!(
            link_requests(&session.take_outputs()),
            [LinkRequest::SetDtr(DtrLevel::High)]
        );

        session.poll(MicrosInstant::millis(410));
        assert_eq!(link_requests(&session.take_outputs()), [LinkRequest::Close]);

        session.link_closed(MicrosInstant::millis(420));
        assert_eq!(session.state(), SessionState::Starting);
        assert!(session.reset_done());
        assert!(matches!(
            link_requests(&session.take_outputs()).as_slice(),
            [LinkRequest::Open { .. }]
        ));

        session.link_opened(MicrosInstant::millis(430));
        assert!(link_requests(&session.take_outputs()).is_empty());
        assert_eq!(session.next_deadline(), Some(MicrosInstant::millis(630)));

        session.poll(MicrosInstant::millis(630));
        assert_eq!(
            link_requests(&session.take_outputs()),
            [LinkRequest::Write("dect perf -s --pdc_number=2\n".into())]
        );
        assert_eq!(session.state(), SessionState::Running);
    }

    fn running(role: Role) -> CommandSession<MicrosInstant> {
        let mut session = session(role);
        session.reset_done = true;
        session.request_start(
            StartRequest::new("/dev/ttyACM1", client_start(1, Duration::from_secs(50))),
            MicrosInstant::millis(0),
        );
        session.link_opened(MicrosInstant::millis(0));
        session.poll(MicrosInstant::millis(200));
        assert_eq!(session.state(), SessionState::Running);
        session.take_outputs();
        session
    }

    #[test]
    fn stop_runs_teardown_and_releases_link() {
        let mut session = running(Role::Client);
        session.request_stop(MicrosInstant::millis(1_000));
        assert_eq!(session.state(), SessionState::Stopping);
        assert_eq!(
            link_requests(&session.take_outputs()),
            [LinkRequest::Write("dect perf stop\n".into())]
        );

        session.observe_line("uart:~$ dect perf stop");
        session.observe_line("perf command stopping");
        session.poll(MicrosInstant::millis(1_500));
        let outputs = session.take_outputs();
        assert!(outputs.iter().any(|output| matches!(
            output,
            SessionOutput::Event(SessionEvent::StopAck(AckResolution {
                outcome: AckOutcome::Acknowledged,
                ..
            }))
        )));
        assert_eq!(
            link_requests(&outputs),
            [LinkRequest::SetDtr(DtrLevel::Low)]
        );

        session.poll(MicrosInstant::millis(1_600));
        session.poll(MicrosInstant::millis(1_800));
        assert_eq!(
            link_requests(&session.take_outputs()),
            [LinkRequest::SetDtr(DtrLevel::High), LinkRequest::Close]
        );
        session.link_closed(MicrosInstant::millis(1_810));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.link().state(), LinkState::Closed);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut session = running(Role::Client);
        session.request_stop(MicrosInstant::millis(1_000));
        session.request_stop(MicrosInstant::millis(1_001));
        let writes = link_requests(&session.take_outputs());
        assert_eq!(writes.len(), 1);

        let mut idle = session_idle();
        idle.request_stop(MicrosInstant::millis(0));
        idle.request_stop(MicrosInstant::millis(1));
        assert!(idle.take_outputs().is_empty());
        assert!(idle.next_deadline().is_none());
    }

    fn session_idle() -> CommandSession<MicrosInstant> {
        session(Role::Server)
    }

    #[test]
    fn start_on_running_session_stops_first() {
        let mut session = running(Role::Client);
        session.request_start(
            StartRequest::new("/dev/ttyACM1", client_start(2, Duration::from_secs(50))),
            MicrosInstant::millis(1_000),
        );
        assert_eq!(session.state(), SessionState::Stopping);
        assert_eq!(
            link_requests(&session.take_outputs()),
            [LinkRequest::Write("dect perf stop\n".into())]
        );

        // No acknowledgment text: the wait runs to its deadline.
        session.poll(MicrosInstant::millis(1_500));
        session.poll(MicrosInstant::millis(6_500));
        session.poll(MicrosInstant::millis(6_600));
        session.poll(MicrosInstant::millis(6_800));
        let outputs = session.take_outputs();
        assert!(outputs.iter().any(|output| matches!(
            output,
            SessionOutput::Event(SessionEvent::AckTimeout(_))
        )));
        session.link_closed(MicrosInstant::millis(6_810));
        assert_eq!(session.state(), SessionState::Starting);
        assert!(matches!(
            link_requests(&session.take_outputs()).as_slice(),
            [LinkRequest::Open { .. }]
        ));
    }

    #[test]
    fn link_loss_during_stop_resolves_wait_and_idles() {
        let mut session = running(Role::Server);
        session.request_stop(MicrosInstant::millis(0));
        session.poll(MicrosInstant::millis(500));
        assert!(session.snapshot().ack_pending);

        session.link_lost(MicrosInstant::millis(600));
        let outputs = session.take_outputs();
        let resolutions = outputs
            .iter()
            .filter(|output| matches!(output, SessionOutput::Event(SessionEvent::StopAck(_))))
            .count();
        assert_eq!(resolutions, 1);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.snapshot().ack_pending);

        session.poll(MicrosInstant::millis(10_000));
        assert!(session.take_outputs().is_empty());
    }

    #[test]
    fn open_failures_give_up_after_three_attempts() {
        let mut session = session(Role::Server);
        session.reset_done = true;
        session.request_start(
            StartRequest::new("/dev/missing", server_start(Snr::ZERO)),
            MicrosInstant::millis(0),
        );
        session.link_open_failed(MicrosInstant::millis(1));
        session.poll(MicrosInstant::millis(501));
        session.link_open_failed(MicrosInstant::millis(502));
        session.poll(MicrosInstant::millis(1_002));
        session.link_open_failed(MicrosInstant::millis(1_003));

        let outputs = session.take_outputs();
        let opens = link_requests(&outputs)
            .iter()
            .filter(|request| matches!(request, LinkRequest::Open { .. }))
            .count();
        assert_eq!(opens, 3);
        assert!(outputs.iter().any(|output| matches!(
            output,
            SessionOutput::Event(SessionEvent::Port(PortError {
                kind: PortErrorKind::Open { attempts: 3 },
                ..
            }))
        )));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn stop_during_start_is_applied_after_start_settles() {
        let mut session = session(Role::Server);
        session.reset_done = true;
        session.request_start(
            StartRequest::new("/dev/ttyACM0", server_start(Snr::from_whole_db(1))),
            MicrosInstant::millis(0),
        );
        session.request_stop(MicrosInstant::millis(1));
        assert_eq!(session.state(), SessionState::Starting);

        session.link_opened(MicrosInstant::millis(2));
        session.poll(MicrosInstant::millis(202));
        assert_eq!(session.state(), SessionState::Stopping);
    }

    #[test]
    fn rearm_forces_another_board_reset() {
        let mut session = running(Role::Server);
        session.rearm_reset();
        session.request_stop(MicrosInstant::millis(0));
        session.link_lost(MicrosInstant::millis(1));
        session.take_outputs();

        session.request_start(
            StartRequest::new("/dev/ttyACM0", server_start(Snr::from_whole_db(1))),
            MicrosInstant::millis(2),
        );
        assert_eq!(session.state(), SessionState::Resetting);
    }
}
