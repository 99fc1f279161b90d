//! Engine loop.
//!
//! One task owns the [`MeasurementOrchestrator`]. It waits on the event
//! channel, the engine's next deadline and Ctrl-C, feeds whichever fired into
//! the engine and then carries out the actions the engine queued.

use std::io;

use sweep_core::emulator::EmulatorRequest;
use sweep_core::error::{EmulatorError, EngineError, PortErrorKind};
use sweep_core::link::LinkRequest;
use sweep_core::orchestrator::{EngineConfig, EngineRequest, HostAction, MeasurementOrchestrator};
use sweep_core::session::Role;
use sweep_core::sweep::SweepEvent;
use sweep_core::telemetry::EngineEvent;
use tracing::{debug, error, info, warn};

use crate::clock::HostInstant;
use crate::console::{self, Reply};
use crate::emulator::{EmulatorCommand, ProcessHandle};
use crate::event::{self, EventReceiver, EventSender, HostEvent, LinkEvent, ProcessEvent};
use crate::serial::PortHandle;
use crate::sink::CsvSink;

pub type Engine = MeasurementOrchestrator<HostInstant>;

/// How the loop decides it is finished.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mode {
    /// Exit once the engine has nothing left to do.
    Batch,
    /// Keep running until the operator quits; device output is echoed.
    Interactive,
}

/// How a sweep run ended.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SweepOutcome {
    #[default]
    None,
    Completed { points: u32 },
    Stopped { completed: u32 },
    Aborted(EmulatorError),
}

pub struct Runtime {
    engine: Engine,
    mode: Mode,
    ports: [Option<PortHandle>; 2],
    emulator: Option<ProcessHandle>,
    emulator_id: u64,
    emulator_command: EmulatorCommand,
    sink: CsvSink,
    events_tx: EventSender,
    events_rx: EventReceiver,
    outcome: SweepOutcome,
    finishing: bool,
}

impl Runtime {
    pub fn new(
        config: EngineConfig,
        emulator_command: EmulatorCommand,
        sink: CsvSink,
        mode: Mode,
    ) -> Self {
        let (events_tx, events_rx) = event::channel();
        Self {
            engine: Engine::new(config),
            mode,
            ports: [None, None],
            emulator: None,
            emulator_id: 0,
            emulator_command,
            sink,
            events_tx,
            events_rx,
            outcome: SweepOutcome::None,
            finishing: mode == Mode::Batch,
        }
    }

    pub fn events(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// Submits an operator request and performs the resulting actions.
    ///
    /// # Errors
    ///
    /// The engine's refusal, unchanged.
    pub fn request(&mut self, request: EngineRequest) -> Result<(), EngineError> {
        let result = self.engine.request(request, HostInstant::now());
        self.dispatch();
        result
    }

    /// Runs until the engine is quiescent after a sweep or a `quit`.
    pub async fn run(&mut self) -> SweepOutcome {
        let mut interrupts = 0u8;
        loop {
            if self.finishing && self.engine.is_quiescent() {
                break;
            }
            let deadline = self.engine.next_deadline();
            tokio::select! {
                received = self.events_rx.recv() => match received {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                () = sleep_until(deadline) => self.engine.poll(HostInstant::now()),
                signal = tokio::signal::ctrl_c() => {
                    if let Err(err) = signal {
                        error!(error = %err, "cannot listen for Ctrl-C");
                        break;
                    }
                    interrupts += 1;
                    if interrupts > 1 {
                        warn!("second interrupt, exiting without waiting for the radios");
                        break;
                    }
                    warn!("interrupted, stopping radios");
                    self.shut_down();
                },
            }
            self.dispatch();
        }
        self.outcome
    }

    fn shut_down(&mut self) {
        self.finishing = true;
        if let Err(err) = self.engine.request(EngineRequest::StopAll, HostInstant::now()) {
            warn!(error = %err, "stop request refused");
        }
    }

    fn handle_event(&mut self, event: HostEvent) {
        let now = HostInstant::now();
        match event {
            HostEvent::Link { role, event } => self.handle_link_event(role, event, now),
            HostEvent::Emulator { id, event } => {
                if id != self.emulator_id {
                    debug!(id, ?event, "ignoring event from a previous emulator");
                    return;
                }
                match event {
                    ProcessEvent::Spawned => self.engine.emulator_spawned(now),
                    ProcessEvent::SpawnFailed(reason) => {
                        debug!(%reason, "emulator spawn failed");
                        self.emulator = None;
                        self.engine.emulator_spawn_failed(now);
                    }
                    ProcessEvent::Line(line) => self.engine.emulator_line(&line, now),
                    ProcessEvent::Exited(code) => {
                        self.emulator = None;
                        self.engine.emulator_exited(code, now);
                    }
                }
            }
            HostEvent::Console(line) => {
                let reply = console::execute(&mut self.engine, &line, now);
                if reply == Reply::Quit {
                    info!("quit requested, stopping radios");
                    self.shut_down();
                } else if let Err(err) = console::render(&reply, &mut io::stdout().lock()) {
                    warn!(error = %err, "console write failed");
                }
            }
            HostEvent::ConsoleClosed => {
                if self.mode == Mode::Interactive {
                    info!("console input closed, stopping radios");
                    self.shut_down();
                }
            }
        }
    }

    fn handle_link_event(&mut self, role: Role, event: LinkEvent, now: HostInstant) {
        match event {
            LinkEvent::Opened => self.engine.link_opened(role, now),
            LinkEvent::OpenFailed(reason) => {
                debug!(%role, %reason, "open failed");
                self.ports[role.index()] = None;
                self.engine.link_open_failed(role, now);
            }
            LinkEvent::Data(bytes) => self.engine.serial_data(role, &bytes, now),
            LinkEvent::RequestFailed(kind) => self.engine.link_request_failed(role, kind, now),
            LinkEvent::Closed => {
                self.ports[role.index()] = None;
                self.engine.link_closed(role, now);
            }
            LinkEvent::Lost => {
                self.ports[role.index()] = None;
                self.engine.link_lost(role, now);
            }
        }
    }

    fn dispatch(&mut self) {
        for action in self.engine.take_actions() {
            match action {
                HostAction::Link { role, request } => self.link_request(role, request),
                HostAction::Emulator(request) => self.emulator_request(request),
                HostAction::Persist(result) => match self.sink.persist(&result) {
                    Ok(Some(path)) => info!(
                        point = %result.point,
                        records = result.records.len(),
                        path = %path.display(),
                        "point saved"
                    ),
                    Ok(None) => {}
                    Err(err) => error!(point = %result.point, error = %err, "point not saved"),
                },
                HostAction::DeviceLine { role, line } => {
                    debug!(target: "device", %role, "{}", line.text);
                    if self.mode == Mode::Interactive {
                        if let Err(err) = console::echo_device_line(&mut io::stdout().lock(), role, &line) {
                            warn!(error = %err, "console write failed");
                        }
                    }
                }
                HostAction::Event(event) => self.log_event(&event),
            }
        }
    }

    fn link_request(&mut self, role: Role, request: LinkRequest) {
        let slot = &mut self.ports[role.index()];
        if let LinkRequest::Open { path, baud_rate } = request {
            *slot = Some(PortHandle::open(role, path, baud_rate, self.events_tx.clone()));
            return;
        }
        let delivered = slot.as_ref().is_some_and(|port| port.send(request.clone()));
        if delivered {
            return;
        }
        // The port task is gone; answer for it so the session can settle.
        let event = match request {
            LinkRequest::Close => LinkEvent::Closed,
            LinkRequest::SetDtr(_) => LinkEvent::RequestFailed(PortErrorKind::Dtr),
            _ => LinkEvent::RequestFailed(PortErrorKind::Write),
        };
        *slot = None;
        let _ = self.events_tx.send(HostEvent::Link { role, event });
    }

    fn emulator_request(&mut self, request: EmulatorRequest) {
        match request {
            EmulatorRequest::Spawn { snr, channel } => {
                self.emulator_id += 1;
                self.emulator = ProcessHandle::spawn(
                    self.emulator_id,
                    &self.emulator_command,
                    snr,
                    channel,
                    &self.events_tx,
                );
            }
            EmulatorRequest::Write(line) => match &self.emulator {
                Some(process) => process.write(line),
                None => warn!(line = line.trim_end(), "no emulator running"),
            },
            EmulatorRequest::Kill => {
                if let Some(process) = self.emulator.take() {
                    process.kill();
                }
            }
        }
    }

    fn log_event(&mut self, event: &EngineEvent) {
        let role = event.role().map(Role::as_str);
        if event.is_failure() {
            warn!(role, "{event}");
        } else {
            info!(role, "{event}");
        }
        if let EngineEvent::Sweep(sweep) = event {
            match *sweep {
                SweepEvent::Started { .. } => self.outcome = SweepOutcome::None,
                SweepEvent::Completed { points } => {
                    self.outcome = SweepOutcome::Completed { points };
                }
                SweepEvent::Stopped { completed } => {
                    self.outcome = SweepOutcome::Stopped { completed };
                }
                SweepEvent::Aborted(err) => self.outcome = SweepOutcome::Aborted(err),
                SweepEvent::PointStarted(_) | SweepEvent::PointMeasured { .. } => {}
            }
        }
    }
}

async fn sleep_until(deadline: Option<HostInstant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into_tokio()).await,
        None => std::future::pending().await,
    }
}
