//! Channel emulator line protocol and process tracking.
//!
//! The emulator is an external program launched as
//! `<program> <args...> <initial snr> <channel type>`. SNR changes are pushed
//! over stdin as `snr_update:<value>:<channel>` and confirmed by a stdout line
//! containing `SNR updated to <value>`. Shutdown writes `stop` and then kills
//! the process.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;
use core::time::Duration;

use crate::error::EmulatorError;
use crate::record::text_after;
use crate::sweep::Snr;
use crate::time::MonoInstant;

/// Upper bound on waiting for an SNR confirmation line.
pub const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);
/// Delay after launch before the first point is measured.
pub const DEFAULT_STABILIZATION_DELAY: Duration = Duration::from_secs(5);
/// Line written before the process is killed.
pub const STOP_LINE: &str = "stop\n";

const CONFIRMATION_MARKER: &str = "SNR updated to ";

/// Fading profile selected on the emulator. Also names the CSV file.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ChannelType {
    Awgn,
    TdlA,
    TdlB,
    TdlC,
}

impl ChannelType {
    pub const ALL: [ChannelType; 4] = [
        ChannelType::Awgn,
        ChannelType::TdlA,
        ChannelType::TdlB,
        ChannelType::TdlC,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ChannelType::Awgn => "AWGN",
            ChannelType::TdlA => "TDL-A",
            ChannelType::TdlB => "TDL-B",
            ChannelType::TdlC => "TDL-C",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name that is not one of the supported channel profiles.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UnknownChannelType;

impl fmt::Display for UnknownChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("channel type must be one of AWGN, TDL-A, TDL-B, TDL-C")
    }
}

impl core::error::Error for UnknownChannelType {}

impl FromStr for ChannelType {
    type Err = UnknownChannelType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        ChannelType::ALL
            .into_iter()
            .find(|channel| channel.as_str().eq_ignore_ascii_case(name))
            .ok_or(UnknownChannelType)
    }
}

/// Stdin line requesting a new SNR.
#[must_use]
pub fn snr_update_line(snr: Snr, channel: ChannelType) -> String {
    format!("snr_update:{snr}:{channel}\n")
}

/// Trailing launch arguments appended after the configured program arguments.
#[must_use]
pub fn launch_args(snr: Snr, channel: ChannelType) -> [String; 2] {
    [format!("{snr}"), String::from(channel.as_str())]
}

/// Returns `true` when `line` confirms the update to exactly `snr`.
///
/// The value after the marker is compared numerically, so `2.0` confirms `2`
/// while `25` and `2.5` do not.
#[must_use]
pub fn confirms(line: &str, snr: Snr) -> bool {
    let Some(rest) = text_after(line, CONFIRMATION_MARKER) else {
        return false;
    };
    let numeric = |(i, c): &(usize, char)| {
        c.is_ascii_digit() || *c == '.' || (*i == 0 && matches!(*c, '-' | '+'))
    };
    let len = rest
        .char_indices()
        .find(|pair| !numeric(pair))
        .map_or(rest.len(), |(i, _)| i);
    rest[..len]
        .trim_end_matches('.')
        .parse::<Snr>()
        .is_ok_and(|value| value == snr)
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EmulatorConfig {
    pub enabled: bool,
    pub channel: ChannelType,
    pub confirm_timeout: Duration,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channel: ChannelType::Awgn,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }
}

/// Process-level action the host performs for the emulator.
#[derive(Clone, Debug, PartialEq)]
pub enum EmulatorRequest {
    Spawn { snr: Snr, channel: ChannelType },
    Write(String),
    Kill,
}

/// Externally visible emulator state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EmulatorState {
    Stopped,
    Launching,
    Running,
    Confirming(Snr),
}

impl fmt::Display for EmulatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulatorState::Stopped => f.write_str("stopped"),
            EmulatorState::Launching => f.write_str("launching"),
            EmulatorState::Running => f.write_str("running"),
            EmulatorState::Confirming(snr) => write!(f, "confirming {snr} dB"),
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum Process<TInstant> {
    Stopped,
    Launching,
    Running,
    Confirming { snr: Snr, since: TInstant },
}

/// Tracks the emulator process the host runs on the engine's behalf.
#[derive(Clone, Debug)]
pub struct ChannelEmulator<TInstant> {
    confirm_timeout: Duration,
    process: Process<TInstant>,
}

impl<TInstant> ChannelEmulator<TInstant>
where
    TInstant: MonoInstant,
{
    #[must_use]
    pub const fn new(confirm_timeout: Duration) -> Self {
        Self {
            confirm_timeout,
            process: Process::Stopped,
        }
    }

    pub const fn state(&self) -> EmulatorState {
        match self.process {
            Process::Stopped => EmulatorState::Stopped,
            Process::Launching => EmulatorState::Launching,
            Process::Running => EmulatorState::Running,
            Process::Confirming { snr, .. } => EmulatorState::Confirming(snr),
        }
    }

    pub const fn is_running(&self) -> bool {
        !matches!(self.process, Process::Stopped)
    }

    /// Asks the host to spawn the process. `None` when one is already running.
    pub fn launch(&mut self, snr: Snr, channel: ChannelType) -> Option<EmulatorRequest> {
        if self.is_running() {
            return None;
        }
        self.process = Process::Launching;
        Some(EmulatorRequest::Spawn { snr, channel })
    }

    pub fn spawned(&mut self) {
        if matches!(self.process, Process::Launching) {
            self.process = Process::Running;
        }
    }

    pub fn spawn_failed(&mut self) -> EmulatorError {
        self.process = Process::Stopped;
        EmulatorError::SpawnFailed
    }

    /// Writes an SNR update and starts the confirmation wait.
    ///
    /// # Errors
    ///
    /// [`EmulatorError::WriteFailed`] when no process is running.
    pub fn push_snr(
        &mut self,
        snr: Snr,
        channel: ChannelType,
        now: TInstant,
    ) -> Result<EmulatorRequest, EmulatorError> {
        if !self.is_running() {
            return Err(EmulatorError::WriteFailed);
        }
        self.process = Process::Confirming { snr, since: now };
        Ok(EmulatorRequest::Write(snr_update_line(snr, channel)))
    }

    /// Feeds one stdout line. Returns the SNR it confirmed, if any.
    pub fn observe_line(&mut self, line: &str) -> Option<Snr> {
        let Process::Confirming { snr, .. } = self.process else {
            return None;
        };
        if !confirms(line, snr) {
            return None;
        }
        self.process = Process::Running;
        Some(snr)
    }

    /// Reports a confirmation timeout once.
    pub fn poll(&mut self, now: TInstant) -> Option<EmulatorError> {
        let Process::Confirming { since, .. } = self.process else {
            return None;
        };
        let waited = now.saturating_duration_since(since);
        if waited < self.confirm_timeout {
            return None;
        }
        self.process = Process::Running;
        Some(EmulatorError::ConfirmationTimeout { waited })
    }

    /// The process ended. Unexpected exits are reported as errors.
    pub fn exited(&mut self, code: Option<i32>) -> Option<EmulatorError> {
        let was_running = self.is_running();
        self.process = Process::Stopped;
        was_running.then_some(EmulatorError::Exited { code })
    }

    /// Requests a graceful stop followed by a kill. Empty when not running.
    pub fn shutdown(&mut self) -> Vec<EmulatorRequest> {
        if !self.is_running() {
            return Vec::new();
        }
        self.process = Process::Stopped;
        alloc::vec![
            EmulatorRequest::Write(String::from(STOP_LINE)),
            EmulatorRequest::Kill,
        ]
    }

    pub fn next_deadline(&self) -> Option<TInstant> {
        match self.process {
            Process::Confirming { since, .. } => Some(since + self.confirm_timeout),
            _ => None,
        }
    }
}
