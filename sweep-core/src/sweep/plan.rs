//! Sweep plan validation and cursor arithmetic.

use core::fmt;

use heapless::Vec;

use super::snr::Snr;
use crate::error::SweepConfigError;

/// Highest MCS index the radios accept.
pub const MAX_MCS: u8 = 4;
/// One tier per MCS index at most.
#[allow(clippy::cast_lossless)]
pub const MAX_TIERS: usize = MAX_MCS as usize + 1;

/// Inclusive SNR range visited in `step` increments.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SnrRange {
    pub min: Snr,
    pub max: Snr,
    pub step: Snr,
}

impl SnrRange {
    #[must_use]
    pub const fn new(min: Snr, max: Snr, step: Snr) -> Self {
        Self { min, max, step }
    }

    /// Number of points in the range, including both ends when reachable.
    #[must_use]
    pub fn len(&self) -> u32 {
        if !self.step.is_positive() || self.min > self.max {
            return 0;
        }
        let span = i64::from(self.max.millidb()) - i64::from(self.min.millidb());
        let steps = span / i64::from(self.step.millidb());
        u32::try_from(steps + 1).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// SNR at `index` steps above the minimum, `None` once past the maximum.
    #[must_use]
    pub fn at(&self, index: u32) -> Option<Snr> {
        let value =
            i64::from(self.min.millidb()) + i64::from(index) * i64::from(self.step.millidb());
        if value > i64::from(self.max.millidb()) {
            return None;
        }
        i32::try_from(value).ok().map(Snr::from_millidb)
    }
}

/// One MCS value and the SNR sub-range swept with it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Tier {
    pub mcs: u8,
    pub range: SnrRange,
}

impl Tier {
    #[must_use]
    pub const fn new(mcs: u8, range: SnrRange) -> Self {
        Self { mcs, range }
    }
}

/// A single measurement point.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SweepPoint {
    pub mcs: u8,
    pub snr: Snr,
}

impl fmt::Display for SweepPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mcs {} / snr {} dB", self.mcs, self.snr)
    }
}

/// Validated tiers, ordered by MCS.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SweepPlan {
    tiers: Vec<Tier, MAX_TIERS>,
}

impl SweepPlan {
    /// Validates `tiers` and orders them by MCS.
    ///
    /// # Errors
    ///
    /// Returns [`SweepConfigError`] for an empty plan, an MCS above
    /// [`MAX_MCS`], a repeated MCS, a non-positive step or `min > max`.
    pub fn new(tiers: &[Tier]) -> Result<Self, SweepConfigError> {
        if tiers.is_empty() {
            return Err(SweepConfigError::NoTiers);
        }
        if tiers.len() > MAX_TIERS {
            return Err(SweepConfigError::TooManyTiers { max: MAX_TIERS });
        }

        let mut ordered: Vec<Tier, MAX_TIERS> = Vec::new();
        for tier in tiers {
            if tier.mcs > MAX_MCS {
                return Err(SweepConfigError::McsOutOfRange { mcs: tier.mcs });
            }
            if !tier.range.step.is_positive() {
                return Err(SweepConfigError::InvalidStep { mcs: tier.mcs });
            }
            if tier.range.min > tier.range.max {
                return Err(SweepConfigError::EmptyRange { mcs: tier.mcs });
            }
            if ordered.iter().any(|existing| existing.mcs == tier.mcs) {
                return Err(SweepConfigError::DuplicateTier { mcs: tier.mcs });
            }
            ordered
                .push(*tier)
                .map_err(|_| SweepConfigError::TooManyTiers { max: MAX_TIERS })?;
        }
        ordered.sort_unstable_by_key(|tier| tier.mcs);

        Ok(Self { tiers: ordered })
    }

    pub fn tiers(&self) -> &[Tier] {
        &self.tiers
    }

    /// Total number of points across all tiers.
    #[must_use]
    pub fn point_count(&self) -> u32 {
        self.tiers.iter().map(|tier| tier.range.len()).sum()
    }

    /// Cursor positioned at the first tier's minimum SNR.
    #[must_use]
    pub const fn first(&self) -> SweepCursor {
        SweepCursor { tier: 0, step: 0 }
    }

    /// Point addressed by `cursor`, if it lies inside the plan.
    #[must_use]
    pub fn point(&self, cursor: SweepCursor) -> Option<SweepPoint> {
        let tier = self.tiers.get(cursor.tier)?;
        let snr = tier.range.at(cursor.step)?;
        Some(SweepPoint { mcs: tier.mcs, snr })
    }

    /// Cursor after `cursor`: the next SNR step, else the next tier's
    /// minimum, else `None` when the plan is exhausted.
    #[must_use]
    pub fn advance(&self, cursor: SweepCursor) -> Option<SweepCursor> {
        let next_step = SweepCursor {
            tier: cursor.tier,
            step: cursor.step.checked_add(1)?,
        };
        if self.point(next_step).is_some() {
            return Some(next_step);
        }
        let next_tier = SweepCursor {
            tier: cursor.tier + 1,
            step: 0,
        };
        self.point(next_tier).map(|_| next_tier)
    }

    /// Every point in visiting order.
    pub fn points(&self) -> impl Iterator<Item = SweepPoint> + '_ {
        core::iter::successors(Some(self.first()), |cursor| self.advance(*cursor))
            .filter_map(|cursor| self.point(cursor))
    }
}

/// Position within a [`SweepPlan`]. Only ever moves forward.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct SweepCursor {
    pub tier: usize,
    pub step: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(min: i16, max: i16, step: i16) -> SnrRange {
        SnrRange::new(
            Snr::from_whole_db(min),
            Snr::from_whole_db(max),
            Snr::from_whole_db(step),
        )
    }

    #[test]
    fn visits_every_step_including_maximum() {
        let plan = SweepPlan::new(&[Tier::new(0, range(2, 4, 1))]).expect("valid plan");
        let points: alloc::vec::Vec<_> = plan.points().collect();
        assert_eq!(
            points,
            [
                SweepPoint {
                    mcs: 0,
                    snr: Snr::from_whole_db(2)
                },
                SweepPoint {
                    mcs: 0,
                    snr: Snr::from_whole_db(3)
                },
                SweepPoint {
                    mcs: 0,
                    snr: Snr::from_whole_db(4)
                },
            ]
        );
        assert_eq!(plan.point_count(), 3);
    }

    #[test]
    fn fractional_steps_do_not_drift() {
        let plan = SweepPlan::new(&[Tier::new(
            1,
            SnrRange::new(
                Snr::from_whole_db(0),
                Snr::from_whole_db(1),
                Snr::from_millidb(100),
            ),
        )])
        .expect("valid plan");
        assert_eq!(plan.point_count(), 11);
        assert_eq!(plan.points().last().map(|p| p.snr), Some(Snr::from_whole_db(1)));
    }

    #[test]
    fn tiers_are_ordered_and_chained() {
        let plan = SweepPlan::new(&[Tier::new(3, range(5, 6, 1)), Tier::new(1, range(0, 0, 1))])
            .expect("valid plan");
        let visited: alloc::vec::Vec<_> = plan
            .points()
            .map(|point| (point.mcs, point.snr.millidb() / 1000))
            .collect();
        assert_eq!(visited, [(1, 0), (3, 5), (3, 6)]);
    }

    #[test]
    fn step_that_overshoots_stops_below_maximum() {
        let plan = SweepPlan::new(&[Tier::new(0, range(0, 5, 2))]).expect("valid plan");
        let visited: alloc::vec::Vec<_> = plan.points().map(|p| p.snr.millidb()).collect();
        assert_eq!(visited, [0, 2_000, 4_000]);
    }

    #[test]
    fn rejects_invalid_tiers() {
        assert_eq!(SweepPlan::new(&[]), Err(SweepConfigError::NoTiers));
        assert_eq!(
            SweepPlan::new(&[Tier::new(5, range(0, 1, 1))]),
            Err(SweepConfigError::McsOutOfRange { mcs: 5 })
        );
        assert_eq!(
            SweepPlan::new(&[Tier::new(2, range(4, 1, 1))]),
            Err(SweepConfigError::EmptyRange { mcs: 2 })
        );
        assert_eq!(
            SweepPlan::new(&[Tier::new(2, range(0, 1, 0))]),
            Err(SweepConfigError::InvalidStep { mcs: 2 })
        );
        assert_eq!(
            SweepPlan::new(&[Tier::new(1, range(0, 1, 1)), Tier::new(1, range(2, 3, 1))]),
            Err(SweepConfigError::DuplicateTier { mcs: 1 })
        );
    }
}
