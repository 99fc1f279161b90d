#![allow(dead_code)]

use core::time::Duration;

use sweep_core::emulator::EmulatorRequest;
use sweep_core::link::LinkRequest;
use sweep_core::orchestrator::{
    EngineConfig, EngineRequest, HostAction, MeasurementOrchestrator,
};
use sweep_core::session::Role;
use sweep_core::sweep::PointResult;
use sweep_core::telemetry::EngineEvent;
use sweep_core::time::MonoInstant;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct MicrosInstant(pub u64);

impl MicrosInstant {
    pub fn millis(value: u64) -> Self {
        Self(value * 1_000)
    }

    pub fn secs(value: u64) -> Self {
        Self(value * 1_000_000)
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

/// Simulated host: radios that open instantly, acknowledge stops and print
/// records when the client starts, plus an emulator that confirms every
/// update.
pub struct Bench {
    pub engine: MeasurementOrchestrator<MicrosInstant>,
    pub now: MicrosInstant,
    pub writes: Vec<(Role, String)>,
    pub emulator_writes: Vec<String>,
    pub persisted: Vec<PointResult>,
    pub events: Vec<EngineEvent>,
    pub kills: usize,
    /// Records the server prints each time the client command is written.
    pub records_per_start: usize,
    pub ack_stops: bool,
    pub confirm_emulator: bool,
    /// Confirm the way the real emulator prints, `[ANITE][ts] SNR updated to 2.0 dB`.
    pub float_confirmations: bool,
    server_snr: String,
}

impl Bench {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engine: MeasurementOrchestrator::new(config),
            now: MicrosInstant(0),
            writes: Vec::new(),
            emulator_writes: Vec::new(),
            persisted: Vec::new(),
            events: Vec::new(),
            kills: 0,
            records_per_start: 3,
            ack_stops: true,
            confirm_emulator: true,
            float_confirmations: false,
            server_snr: String::from("0"),
        }
    }

    pub fn request(&mut self, request: EngineRequest) {
        self.engine
            .request(request, self.now)
            .expect("request accepted");
        self.pump();
    }

    /// Serial bytes from a radio at the current instant.
    pub fn device_says(&mut self, role: Role, text: &str) {
        self.engine.serial_data(role, text.as_bytes(), self.now);
    }

    /// Carries out every pending host action, including the ones they cause.
    pub fn pump(&mut self) {
        loop {
            let actions = self.engine.take_actions();
            if actions.is_empty() {
                return;
            }
            for action in actions {
                self.handle(action);
            }
        }
    }

    /// Advances simulated time to `until`, firing every deadline on the way.
    pub fn run_until(&mut self, until: MicrosInstant) {
        for _ in 0..100_000 {
            self.pump();
            match self.engine.next_deadline() {
                Some(deadline) if deadline <= until => {
                    self.now = self.now.max(deadline);
                    self.engine.poll(self.now);
                }
                _ => {
                    self.now = until;
                    self.engine.poll(self.now);
                    self.pump();
                    return;
                }
            }
        }
        panic!("engine did not settle before {until:?}");
    }

    /// Runs until nothing is active, returning the instant it settled.
    pub fn run_to_quiescence(&mut self) -> MicrosInstant {
        for _ in 0..100_000 {
            self.pump();
            if self.engine.is_quiescent() {
                return self.now;
            }
            let deadline = self
                .engine
                .next_deadline()
                .expect("active engine has a deadline");
            self.now = self.now.max(deadline);
            self.engine.poll(self.now);
        }
        panic!("engine never became quiescent");
    }

    pub fn commands_written(&self, role: Role, prefix: &str) -> usize {
        self.writes
            .iter()
            .filter(|(r, text)| *r == role && text.starts_with(prefix))
            .count()
    }

    pub fn count_events(&self, predicate: impl Fn(&EngineEvent) -> bool) -> usize {
        self.events.iter().filter(|event| predicate(event)).count()
    }

    fn handle(&mut self, action: HostAction) {
        let now = self.now;
        match action {
            HostAction::Link { role, request } => match request {
                LinkRequest::Open { .. } => self.engine.link_opened(role, now),
                LinkRequest::Close => self.engine.link_closed(role, now),
                LinkRequest::SetDtr(_) => {}
                LinkRequest::Write(text) => self.device_received(role, text),
            },
            HostAction::Emulator(request) => match request {
                EmulatorRequest::Spawn { .. } => self.engine.emulator_spawned(now),
                EmulatorRequest::Write(line) => {
                    let update = line
                        .strip_prefix("snr_update:")
                        .and_then(|rest| rest.split(':').next())
                        .map(String::from);
                    self.emulator_writes.push(line);
                    if let (true, Some(snr)) = (self.confirm_emulator, update) {
                        let reply = if self.float_confirmations {
                            let value: f64 = snr.parse().expect("numeric snr");
                            format!("[ANITE][12:00:00] SNR updated to {value:?} dB")
                        } else {
                            format!("SNR updated to {snr}")
                        };
                        self.engine.emulator_line(&reply, now);
                    }
                }
                EmulatorRequest::Kill => {
                    self.kills += 1;
                    self.engine.emulator_exited(None, now);
                }
            },
            HostAction::Persist(result) => self.persisted.push(result),
            HostAction::DeviceLine { .. } => {}
            HostAction::Event(event) => self.events.push(event),
        }
    }

    fn device_received(&mut self, role: Role, text: String) {
        if let Some(snr) = text.trim_end().strip_prefix("dect perf -s --pdc_number=") {
            self.server_snr = String::from(snr);
        }
        if text.starts_with("dect perf stop") && self.ack_stops {
            self.device_says(role, "perf command stopping\r\n");
        }
        if let Some(rest) = text.strip_prefix("dect perf -c --c_tx_mcs ") {
            let mcs = rest.split_whitespace().next().unwrap_or("0").to_owned();
            for index in 0..self.records_per_start {
                let line = format!("pdc,{},{mcs},{}\r\n", 10 + index, self.server_snr);
                self.device_says(Role::Server, &line);
            }
        }
        self.writes.push((role, text));
    }
}
