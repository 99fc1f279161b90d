//! Fixed-point SNR values.
//!
//! SNR is stored in milli-dB so sweep steps accumulate exactly and the value
//! written to the radio and emulator prints the same way every time
//! (`2`, `2.5`, `-3.25`).

use core::fmt;
use core::str::FromStr;

/// Signal-to-noise ratio in milli-dB.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Snr(i32);

impl Snr {
    pub const ZERO: Snr = Snr(0);

    #[must_use]
    pub const fn from_millidb(value: i32) -> Self {
        Self(value)
    }

    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn from_whole_db(value: i16) -> Self {
        Self(value as i32 * 1000)
    }

    /// Rounds `value` to the nearest milli-dB. `None` for NaN, infinities and
    /// values outside the representable range.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_db(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = value * 1000.0;
        if scaled > f64::from(i32::MAX) || scaled < f64::from(i32::MIN) {
            return None;
        }
        let rounded = if scaled >= 0.0 {
            scaled + 0.5
        } else {
            scaled - 0.5
        };
        Some(Self(rounded as i32))
    }

    #[must_use]
    pub const fn millidb(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Snr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        let whole = magnitude / 1000;
        let mut frac = magnitude % 1000;
        if frac == 0 {
            return write!(f, "{sign}{whole}");
        }
        let mut width = 3;
        while frac % 10 == 0 {
            frac /= 10;
            width -= 1;
        }
        write!(f, "{sign}{whole}.{frac:0width$}")
    }
}

/// Text that is not a finite decimal SNR.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InvalidSnr;

impl fmt::Display for InvalidSnr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("snr must be a finite decimal number")
    }
}

impl core::error::Error for InvalidSnr {}

impl FromStr for Snr {
    type Err = InvalidSnr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<f64>()
            .ok()
            .and_then(Snr::from_db)
            .ok_or(InvalidSnr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn display_strips_trailing_zeros() {
        assert_eq!(Snr::from_whole_db(2).to_string(), "2");
        assert_eq!(Snr::from_millidb(2_500).to_string(), "2.5");
        assert_eq!(Snr::from_millidb(-3_250).to_string(), "-3.25");
        assert_eq!(Snr::from_millidb(-500).to_string(), "-0.5");
        assert_eq!(Snr::from_millidb(1_005).to_string(), "1.005");
        assert_eq!(Snr::ZERO.to_string(), "0");
    }

    #[test]
    fn parses_and_rounds_decimal_text() {
        assert_eq!("2.5".parse::<Snr>(), Ok(Snr::from_millidb(2_500)));
        assert_eq!(" -1 ".parse::<Snr>(), Ok(Snr::from_whole_db(-1)));
        assert_eq!(Snr::from_db(0.1 + 0.2), Some(Snr::from_millidb(300)));
        assert_eq!("nan".parse::<Snr>(), Err(InvalidSnr));
        assert_eq!("abc".parse::<Snr>(), Err(InvalidSnr));
        assert!(Snr::from_db(f64::INFINITY).is_none());
    }
}
