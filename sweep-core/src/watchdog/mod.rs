//! Measurement stall detection.
//!
//! The watchdog samples on a fixed cadence while any session or sweep is
//! active. When the newest measurement record is older than the threshold it
//! reports a [`StallError`] once; the breach stays latched until another
//! record is observed so a single silence never triggers repeated recovery.

use core::time::Duration;

use crate::error::{StallError, WatchdogConfigError};
use crate::time::MonoInstant;

/// Cadence at which silence is evaluated.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(20);
/// Threshold expressed as a multiple of the measurement duration.
pub const DEFAULT_STALL_MULTIPLIER: f64 = 1.2;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WatchdogConfig {
    pub check_interval: Duration,
    pub threshold: Duration,
}

impl WatchdogConfig {
    /// Default cadence and multiplier for `measurement`. The threshold
    /// saturates rather than overflowing.
    #[must_use]
    pub fn for_measurement(measurement: Duration) -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            threshold: scaled(measurement, DEFAULT_STALL_MULTIPLIER).unwrap_or(Duration::MAX),
        }
    }

    /// Operator-supplied cadence and multiplier.
    ///
    /// # Errors
    ///
    /// A zero `check_interval`, or a multiplier that is not finite and
    /// positive or that scales `measurement` past what a `Duration` holds.
    pub fn new(
        check_interval: Duration,
        measurement: Duration,
        multiplier: f64,
    ) -> Result<Self, WatchdogConfigError> {
        if check_interval.is_zero() {
            return Err(WatchdogConfigError::ZeroCheckInterval);
        }
        let threshold =
            scaled(measurement, multiplier).ok_or(WatchdogConfigError::InvalidMultiplier)?;
        Ok(Self {
            check_interval,
            threshold,
        })
    }
}

fn scaled(measurement: Duration, multiplier: f64) -> Option<Duration> {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(measurement.as_secs_f64() * multiplier).ok()
}

/// Silence tracker shared by both roles.
#[derive(Clone, Debug)]
pub struct Watchdog<TInstant> {
    config: WatchdogConfig,
    last_activity: Option<TInstant>,
    next_check: Option<TInstant>,
    breached: bool,
}

impl<TInstant> Watchdog<TInstant>
where
    TInstant: MonoInstant,
{
    #[must_use]
    pub const fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            last_activity: None,
            next_check: None,
            breached: false,
        }
    }

    pub const fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    pub const fn is_armed(&self) -> bool {
        self.next_check.is_some()
    }

    pub const fn is_breached(&self) -> bool {
        self.breached
    }

    /// Starts checking. Arming an armed watchdog keeps its schedule.
    pub fn arm(&mut self, now: TInstant) {
        if self.is_armed() {
            return;
        }
        self.last_activity = Some(now);
        self.next_check = Some(now + self.config.check_interval);
        self.breached = false;
    }

    pub fn disarm(&mut self) {
        self.last_activity = None;
        self.next_check = None;
        self.breached = false;
    }

    /// A measurement record arrived; ends any latched breach.
    pub fn note_activity(&mut self, now: TInstant) {
        self.last_activity = Some(now);
        self.breached = false;
    }

    /// A session entered Running. Silence is measured from here, but a
    /// latched breach stays latched until a record arrives.
    pub fn rebaseline(&mut self, now: TInstant) {
        if self.is_armed() {
            self.last_activity = Some(now);
        }
    }

    /// Silence since the last record, if armed.
    pub fn silence(&self, now: TInstant) -> Option<Duration> {
        self.last_activity
            .map(|at| now.saturating_duration_since(at))
    }

    /// Runs a scheduled check.
    ///
    /// `eligible` is `false` while any session is mid-transition; those
    /// checks are skipped rather than counted as stalls.
    pub fn check(&mut self, now: TInstant, eligible: bool) -> Option<StallError> {
        let due = self.next_check?;
        if now < due {
            return None;
        }
        self.next_check = Some(now + self.config.check_interval);

        let silence = self.silence(now)?;
        if !eligible || self.breached || silence <= self.config.threshold {
            return None;
        }

        self.breached = true;
        self.last_activity = Some(now);
        Some(StallError {
            silence,
            threshold: self.config.threshold,
        })
    }

    pub const fn next_deadline(&self) -> Option<TInstant> {
        self.next_check
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MicrosInstant(u64);

    impl MicrosInstant {
        fn secs(value: u64) -> Self {
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

    fn watchdog() -> Watchdog<MicrosInstant> {
        Watchdog::new(WatchdogConfig::for_measurement(Duration::from_secs(50)))
    }

    #[test]
    fn threshold_scales_with_measurement_duration() {
        let config = WatchdogConfig::for_measurement(Duration::from_secs(50));
        assert_eq!(config.threshold, Duration::from_secs(60));
        assert_eq!(config.check_interval, DEFAULT_CHECK_INTERVAL);

        let config = WatchdogConfig::new(Duration::from_secs(5), Duration::from_secs(10), 2.0)
            .expect("valid watchdog");
        assert_eq!(config.threshold, Duration::from_secs(20));
        assert_eq!(config.check_interval, Duration::from_secs(5));
    }

    #[test]
    fn rejects_unusable_cadence_and_multiplier() {
        let measurement = Duration::from_secs(50);
        assert_eq!(
            WatchdogConfig::new(Duration::ZERO, measurement, 1.2),
            Err(WatchdogConfigError::ZeroCheckInterval)
        );
        for multiplier in [-1.0, 0.0, f64::NAN, f64::INFINITY, 1e300] {
            assert_eq!(
                WatchdogConfig::new(DEFAULT_CHECK_INTERVAL, measurement, multiplier),
                Err(WatchdogConfigError::InvalidMultiplier),
                "multiplier {multiplier}"
            );
        }
        assert_eq!(
            WatchdogConfig::for_measurement(Duration::MAX).threshold,
            Duration::MAX
        );
    }

    #[test]
    fn fires_once_per_breach() {
        let mut watchdog = watchdog();
        watchdog.arm(MicrosInstant::secs(0));

        let mut stalls = 0;
        for tick in 1..=10 {
            if watchdog.check(MicrosInstant::secs(tick * 20), true).is_some() {
                stalls += 1;
            }
        }
        assert_eq!(stalls, 1);
        assert!(watchdog.is_breached());

        watchdog.note_activity(MicrosInstant::secs(205));
        assert!(!watchdog.is_breached());
        let mut later = 0;
        for tick in 11..=15 {
            if watchdog.check(MicrosInstant::secs(tick * 20), true).is_some() {
                later += 1;
            }
        }
        assert_eq!(later, 1);
    }

    #[test]
    fn first_stall_reported_after_threshold() {
        let mut watchdog = watchdog();
        watchdog.arm(MicrosInstant::secs(0));
        assert!(watchdog.check(MicrosInstant::secs(20), true).is_none());
        assert!(watchdog.check(MicrosInstant::secs(40), true).is_none());
        assert!(watchdog.check(MicrosInstant::secs(60), true).is_none());
        let stall = watchdog
            .check(MicrosInstant::secs(80), true)
            .expect("stall expected");
        assert_eq!(stall.silence, Duration::from_secs(80));
        assert_eq!(stall.threshold, Duration::from_secs(60));
    }

    #[test]
    fn ineligible_checks_are_skipped() {
        let mut watchdog = watchdog();
        watchdog.arm(MicrosInstant::secs(0));
        assert!(watchdog.check(MicrosInstant::secs(80), false).is_none());
        assert!(!watchdog.is_breached());
        assert!(watchdog.check(MicrosInstant::secs(100), true).is_some());
    }

    #[test]
    fn checks_only_run_when_due() {
        let mut watchdog = watchdog();
        assert!(watchdog.check(MicrosInstant::secs(500), true).is_none());

        watchdog.arm(MicrosInstant::secs(0));
        assert_eq!(watchdog.next_deadline(), Some(MicrosInstant::secs(20)));
        assert!(watchdog.check(MicrosInstant::secs(10), true).is_none());
        assert_eq!(watchdog.next_deadline(), Some(MicrosInstant::secs(20)));

        watchdog.disarm();
        assert!(!watchdog.is_armed());
        assert!(watchdog.next_deadline().is_none());
    }

    #[test]
    fn rebaseline_defers_stall_but_keeps_latch() {
        let mut watchdog = watchdog();
        watchdog.rebaseline(MicrosInstant::secs(5));
        assert!(watchdog.silence(MicrosInstant::secs(5)).is_none());

        watchdog.arm(MicrosInstant::secs(0));
        watchdog.rebaseline(MicrosInstant::secs(30));
        assert!(watchdog.check(MicrosInstant::secs(80), true).is_none());
        assert!(watchdog.check(MicrosInstant::secs(100), true).is_some());

        watchdog.rebaseline(MicrosInstant::secs(101));
        assert!(watchdog.is_breached());
        assert!(watchdog.check(MicrosInstant::secs(180), true).is_none());
    }
}
