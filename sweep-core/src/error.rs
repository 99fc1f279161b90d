//! Error taxonomy shared by the engine and its host.
//!
//! Failures local to one role are reported through these types and logged by
//! the host; none of them carry heap data so they stay cheap to copy into
//! events.

use core::fmt;
use core::time::Duration;

use crate::link::LinkState;
use crate::session::Role;

/// Failure class for a serial link operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PortErrorKind {
    /// The device could not be claimed after every configured attempt.
    Open { attempts: u8 },
    /// A command write was rejected by the transport.
    Write,
    /// Toggling the DTR line failed.
    Dtr,
    /// Releasing the device failed; ownership is released regardless.
    Close,
    /// The link is not in a state that accepts the request.
    Busy(LinkState),
    /// The device disappeared while the link was held.
    Lost,
}

/// Serial link failure attributed to a session role.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PortError {
    pub role: Role,
    pub kind: PortErrorKind,
}

impl PortError {
    #[must_use]
    pub const fn new(role: Role, kind: PortErrorKind) -> Self {
        Self { role, kind }
    }
}

impl fmt::Display for PortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PortErrorKind::Open { attempts } => {
                write!(f, "{} port failed to open after {attempts} attempts", self.role)
            }
            PortErrorKind::Write => write!(f, "{} port write failed", self.role),
            PortErrorKind::Dtr => write!(f, "{} port DTR toggle failed", self.role),
            PortErrorKind::Close => write!(f, "{} port close failed", self.role),
            PortErrorKind::Busy(state) => {
                write!(f, "{} port busy ({state})", self.role)
            }
            PortErrorKind::Lost => write!(f, "{} port closed unexpectedly", self.role),
        }
    }
}

impl core::error::Error for PortError {}

/// The stop acknowledgment heuristic gave up before observing a quiet period.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AckTimeoutError {
    pub role: Role,
    pub waited: Duration,
}

impl fmt::Display for AckTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stop not acknowledged after {}ms",
            self.role,
            self.waited.as_millis()
        )
    }
}

impl core::error::Error for AckTimeoutError {}

/// No measurement record arrived within the watchdog threshold.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StallError {
    pub silence: Duration,
    pub threshold: Duration,
}

impl fmt::Display for StallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no measurement record for {}s (threshold {}s)",
            self.silence.as_secs(),
            self.threshold.as_secs()
        )
    }
}

impl core::error::Error for StallError {}

/// Reasons a sweep plan is rejected before any hardware action.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SweepConfigError {
    NoTiers,
    TooManyTiers { max: usize },
    McsOutOfRange { mcs: u8 },
    DuplicateTier { mcs: u8 },
    EmptyRange { mcs: u8 },
    InvalidStep { mcs: u8 },
    NonFiniteBound { mcs: u8 },
}

impl fmt::Display for SweepConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepConfigError::NoTiers => f.write_str("sweep plan has no enabled tiers"),
            SweepConfigError::TooManyTiers { max } => {
                write!(f, "sweep plan exceeds {max} tiers")
            }
            SweepConfigError::McsOutOfRange { mcs } => {
                write!(f, "mcs {mcs} outside supported range 0-4")
            }
            SweepConfigError::DuplicateTier { mcs } => {
                write!(f, "mcs {mcs} configured more than once")
            }
            SweepConfigError::EmptyRange { mcs } => {
                write!(f, "mcs {mcs} snr range is empty (min > max)")
            }
            SweepConfigError::InvalidStep { mcs } => {
                write!(f, "mcs {mcs} snr step must be positive")
            }
            SweepConfigError::NonFiniteBound { mcs } => {
                write!(f, "mcs {mcs} snr range contains a non-finite bound")
            }
        }
    }
}

impl core::error::Error for SweepConfigError {}

/// Watchdog settings that cannot drive a check schedule.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WatchdogConfigError {
    ZeroCheckInterval,
    InvalidMultiplier,
}

impl fmt::Display for WatchdogConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchdogConfigError::ZeroCheckInterval => {
                f.write_str("watchdog check interval must be non-zero")
            }
            WatchdogConfigError::InvalidMultiplier => f.write_str(
                "watchdog multiplier must be a finite positive number within range",
            ),
        }
    }
}

impl core::error::Error for WatchdogConfigError {}

/// Channel emulator subprocess failures. Each one aborts the active sweep.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EmulatorError {
    SpawnFailed,
    Exited { code: Option<i32> },
    ConfirmationTimeout { waited: Duration },
    WriteFailed,
}

impl fmt::Display for EmulatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmulatorError::SpawnFailed => f.write_str("channel emulator failed to start"),
            EmulatorError::Exited { code: Some(code) } => {
                write!(f, "channel emulator exited with status {code}")
            }
            EmulatorError::Exited { code: None } => f.write_str("channel emulator exited"),
            EmulatorError::ConfirmationTimeout { waited } => write!(
                f,
                "channel emulator did not confirm snr update within {}ms",
                waited.as_millis()
            ),
            EmulatorError::WriteFailed => f.write_str("channel emulator input closed"),
        }
    }
}

impl core::error::Error for EmulatorError {}

/// Umbrella error returned by orchestrator requests.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EngineError {
    Port(PortError),
    SweepConfig(SweepConfigError),
    Emulator(EmulatorError),
    /// A sweep is already running; stop it before starting another.
    SweepActive,
    /// Manual session control is refused while a sweep owns the sessions.
    SessionsOwnedBySweep,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Port(err) => err.fmt(f),
            EngineError::SweepConfig(err) => write!(f, "invalid sweep plan: {err}"),
            EngineError::Emulator(err) => err.fmt(f),
            EngineError::SweepActive => f.write_str("a sweep is already running"),
            EngineError::SessionsOwnedBySweep => {
                f.write_str("sessions are controlled by the running sweep")
            }
        }
    }
}

impl core::error::Error for EngineError {}

impl From<PortError> for EngineError {
    fn from(value: PortError) -> Self {
        EngineError::Port(value)
    }
}

impl From<SweepConfigError> for EngineError {
    fn from(value: SweepConfigError) -> Self {
        EngineError::SweepConfig(value)
    }
}

impl From<EmulatorError> for EngineError {
    fn from(value: EmulatorError) -> Self {
        EngineError::Emulator(value)
    }
}
