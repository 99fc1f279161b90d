//! Serial link lifecycle tracking.
//!
//! A [`Link`] never touches a device itself. It records what the host has
//! been asked to do and what it reported back, and it turns owner intents
//! into [`LinkRequest`]s that the host executes against the real port.

use alloc::string::String;
use core::fmt;
use core::time::Duration;

use crate::error::PortErrorKind;
use crate::time::MonoInstant;

/// Baud rate used by the radio command consoles.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
/// Number of attempts made to claim a device before giving up.
pub const DEFAULT_OPEN_ATTEMPTS: u8 = 3;
/// Delay between consecutive open attempts.
pub const DEFAULT_OPEN_BACKOFF: Duration = Duration::from_millis(500);

/// Lifecycle state of a serial link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LinkState {
    Closed,
    Opening,
    Open,
    Closing,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkState::Closed => "closed",
            LinkState::Opening => "opening",
            LinkState::Open => "open",
            LinkState::Closing => "closing",
        })
    }
}

/// Level driven on the DTR control line.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DtrLevel {
    Low,
    High,
}

impl DtrLevel {
    /// Returns the boolean passed to serial drivers (`true` asserts DTR).
    #[must_use]
    pub const fn is_high(self) -> bool {
        matches!(self, DtrLevel::High)
    }
}

/// Tunables for opening a link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LinkConfig {
    pub baud_rate: u32,
    pub open_attempts: u8,
    pub open_backoff: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            open_attempts: DEFAULT_OPEN_ATTEMPTS,
            open_backoff: DEFAULT_OPEN_BACKOFF,
        }
    }
}

/// Operation the host must perform on the physical port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkRequest {
    Open { path: String, baud_rate: u32 },
    SetDtr(DtrLevel),
    Write(String),
    Close,
}

/// Result of reporting a failed open attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OpenFailure<TInstant> {
    /// Another attempt is scheduled at the given instant.
    Retry { at: TInstant, attempt: u8 },
    /// Every attempt failed; the link is closed again.
    GiveUp { attempts: u8 },
}

/// Owner-side view of one serial connection.
#[derive(Clone, Debug)]
pub struct Link<TInstant> {
    config: LinkConfig,
    path: Option<String>,
    state: LinkState,
    dtr: DtrLevel,
    attempts: u8,
    retry_at: Option<TInstant>,
}

impl<TInstant> Link<TInstant>
where
    TInstant: MonoInstant,
{
    #[must_use]
    pub const fn new(config: LinkConfig) -> Self {
        Self {
            config,
            path: None,
            state: LinkState::Closed,
            dtr: DtrLevel::High,
            attempts: 0,
            retry_at: None,
        }
    }

    pub const fn state(&self) -> LinkState {
        self.state
    }

    pub const fn dtr(&self) -> DtrLevel {
        self.dtr
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub const fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Returns `true` when writes and DTR changes are accepted.
    pub const fn is_open(&self) -> bool {
        matches!(self.state, LinkState::Open)
    }

    /// Starts claiming the device at `path`.
    ///
    /// Returns `Ok(None)` when an open for the same path is already in flight
    /// or complete.
    ///
    /// # Errors
    ///
    /// [`PortErrorKind::Busy`] while closing or while held for another path.
    pub fn open(&mut self, path: &str) -> Result<Option<LinkRequest>, PortErrorKind> {
        match self.state {
            LinkState::Closing => Err(PortErrorKind::Busy(self.state)),
            LinkState::Opening | LinkState::Open if self.path.as_deref() == Some(path) => Ok(None),
            LinkState::Opening | LinkState::Open => Err(PortErrorKind::Busy(self.state)),
            LinkState::Closed => {
                self.path = Some(String::from(path));
                self.state = LinkState::Opening;
                self.attempts = 1;
                self.retry_at = None;
                Ok(Some(self.open_request(path)))
            }
        }
    }

    /// Host confirmed the device is claimed.
    pub fn opened(&mut self) {
        if self.state == LinkState::Opening {
            self.state = LinkState::Open;
            self.attempts = 0;
            self.retry_at = None;
            self.dtr = DtrLevel::High;
        }
    }

    /// Host reported an open failure; schedules a retry or gives up.
    pub fn open_failed(&mut self, now: TInstant) -> OpenFailure<TInstant> {
        if self.state == LinkState::Opening && self.attempts < self.config.open_attempts {
            let at = now + self.config.open_backoff;
            self.retry_at = Some(at);
            OpenFailure::Retry {
                at,
                attempt: self.attempts,
            }
        } else {
            let attempts = self.attempts.max(1);
            self.state = LinkState::Closed;
            self.attempts = 0;
            self.retry_at = None;
            OpenFailure::GiveUp { attempts }
        }
    }

    /// Issues the next open attempt once the backoff elapsed.
    pub fn poll_retry(&mut self, now: TInstant) -> Option<LinkRequest> {
        let at = self.retry_at?;
        if self.state != LinkState::Opening || now < at {
            return None;
        }
        self.retry_at = None;
        self.attempts = self.attempts.saturating_add(1);
        let path = self.path.clone()?;
        Some(self.open_request(&path))
    }

    /// Pending open retry deadline, if any.
    pub const fn next_deadline(&self) -> Option<TInstant> {
        self.retry_at
    }

    /// Wraps a newline-terminated command for transmission.
    ///
    /// # Errors
    ///
    /// [`PortErrorKind::Busy`] unless the link is open.
    pub fn write(&self, text: &str) -> Result<LinkRequest, PortErrorKind> {
        if !self.is_open() {
            return Err(PortErrorKind::Busy(self.state));
        }
        Ok(LinkRequest::Write(String::from(text)))
    }

    /// Drives DTR to the requested level.
    ///
    /// # Errors
    ///
    /// [`PortErrorKind::Busy`] unless the link is open.
    pub fn set_dtr(&mut self, level: DtrLevel) -> Result<LinkRequest, PortErrorKind> {
        if !self.is_open() {
            return Err(PortErrorKind::Busy(self.state));
        }
        self.dtr = level;
        Ok(LinkRequest::SetDtr(level))
    }

    /// Releases the device. Closing a closed or closing link is a no-op.
    pub fn close(&mut self) -> Option<LinkRequest> {
        match self.state {
            LinkState::Closed | LinkState::Closing => None,
            LinkState::Opening | LinkState::Open => {
                self.state = LinkState::Closing;
                self.retry_at = None;
                Some(LinkRequest::Close)
            }
        }
    }

    /// Host confirmed the device is released.
    pub fn closed(&mut self) {
        self.state = LinkState::Closed;
        self.attempts = 0;
        self.retry_at = None;
    }

    /// Device vanished. Returns `true` when the link was held at the time.
    pub fn lost(&mut self) -> bool {
        let was_held = self.state != LinkState::Closed;
        self.closed();
        was_held
    }

    fn open_request(&self, path: &str) -> LinkRequest {
        LinkRequest::Open {
            path: String::from(path),
            baud_rate: self.config.baud_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn link() -> Link<MicrosInstant> {
        Link::new(LinkConfig::default())
    }

    #[test]
    fn open_emits_request_with_fixed_baud() {
        let mut link = link();
        let request = link.open("/dev/ttyACM0").expect("open accepted");
        assert_eq!(
            request,
            Some(LinkRequest::Open {
                path: "/dev/ttyACM0".into(),
                baud_rate: 115_200,
            })
        );
        assert_eq!(link.state(), LinkState::Opening);

        link.opened();
        assert!(link.is_open());
        assert_eq!(link.open("/dev/ttyACM0"), Ok(None));
    }

    #[test]
    fn open_retries_with_backoff_then_gives_up() {
        let mut link = link();
        link.open("/dev/ttyACM1").expect("open accepted");

        let start = MicrosInstant(0);
        let first = link.open_failed(start);
        let retry_at = start + DEFAULT_OPEN_BACKOFF;
        assert_eq!(first, OpenFailure::Retry { at: retry_at, attempt: 1 });
        assert_eq!(link.next_deadline(), Some(retry_at));

        assert!(link.poll_retry(MicrosInstant(1)).is_none());
        assert!(matches!(
            link.poll_retry(retry_at),
            Some(LinkRequest::Open { .. })
        ));

        assert!(matches!(link.open_failed(retry_at), OpenFailure::Retry { attempt: 2, .. }));
        link.poll_retry(retry_at + DEFAULT_OPEN_BACKOFF);

        assert_eq!(
            link.open_failed(retry_at + DEFAULT_OPEN_BACKOFF),
            OpenFailure::GiveUp { attempts: 3 }
        );
        assert_eq!(link.state(), LinkState::Closed);
        assert!(link.next_deadline().is_none());
    }

    #[test]
    fn close_is_idempotent() {
        let mut link = link();
        assert!(link.close().is_none());

        link.open("/dev/ttyACM0").expect("open accepted");
        link.opened();
        assert_eq!(link.close(), Some(LinkRequest::Close));
        assert!(link.close().is_none());
        link.closed();
        assert!(link.close().is_none());
    }

    #[test]
    fn closing_link_rejects_writes_and_opens() {
        let mut link = link();
        link.open("/dev/ttyACM0").expect("open accepted");
        link.opened();
        link.close();

        assert_eq!(
            link.write("dect perf stop\n"),
            Err(PortErrorKind::Busy(LinkState::Closing))
        );
        assert_eq!(
            link.set_dtr(DtrLevel::Low),
            Err(PortErrorKind::Busy(LinkState::Closing))
        );
        assert_eq!(
            link.open("/dev/ttyACM0"),
            Err(PortErrorKind::Busy(LinkState::Closing))
        );
    }

    #[test]
    fn dtr_level_tracks_requests() {
        let mut link = link();
        link.open("/dev/ttyACM0").expect("open accepted");
        link.opened();
        assert_eq!(
            link.set_dtr(DtrLevel::Low),
            Ok(LinkRequest::SetDtr(DtrLevel::Low))
        );
        assert_eq!(link.dtr(), DtrLevel::Low);
    }

    #[test]
    fn lost_reports_whether_link_was_held() {
        let mut link = link();
        assert!(!link.lost());
        link.open("/dev/ttyACM0").expect("open accepted");
        assert!(link.lost());
        assert_eq!(link.state(), LinkState::Closed);
    }
}
