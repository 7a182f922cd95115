//! Daily-claim streak arithmetic.
//!
//! Pure logic over civil dates. The current date comes from an injected
//! [`DateProvider`] so tests can pin it.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Days, NaiveDate, Utc};

/// Source of the current civil date.
pub trait DateProvider: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Wall-clock UTC date provider.
pub struct UtcDateProvider;

impl DateProvider for UtcDateProvider {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Bonus thresholds used when a guild has not configured its own.
pub fn default_streak_bonuses() -> BTreeMap<u32, i64> {
    BTreeMap::from([(7, 2), (14, 4), (30, 10), (60, 20)])
}

/// What a claim attempt on the current day would do to the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakOutcome {
    /// `last_daily` is already today; the caller surfaces AlreadyClaimed.
    AlreadyClaimed,
    /// Claim proceeds with the given streak and multiplier.
    Claimed { streak: i64, multiplier: i64 },
}

/// Streak evaluation with an injected clock.
pub struct StreakEngine {
    dates: Arc<dyn DateProvider>,
}

impl StreakEngine {
    pub fn new(dates: Arc<dyn DateProvider>) -> Self {
        Self { dates }
    }

    /// Evaluate a claim attempt.
    ///
    /// No previous claim or a gap of more than one day resets the streak to 1;
    /// a claim yesterday extends it; a claim today is a duplicate.
    pub fn evaluate(
        &self,
        last_daily: Option<NaiveDate>,
        current_streak: i64,
        bonuses: &BTreeMap<u32, i64>,
    ) -> StreakOutcome {
        let today = self.dates.today();

        let streak = match last_daily {
            None => 1,
            Some(last) if last == today => return StreakOutcome::AlreadyClaimed,
            Some(last) if Some(last) == today.checked_sub_days(Days::new(1)) => {
                current_streak.max(0) + 1
            }
            Some(_) => 1,
        };

        StreakOutcome::Claimed {
            streak,
            multiplier: multiplier_for(streak, bonuses),
        }
    }
}

/// Largest configured threshold at or below `streak` wins; default 1.
pub fn multiplier_for(streak: i64, bonuses: &BTreeMap<u32, i64>) -> i64 {
    bonuses
        .iter()
        .rev()
        .find(|(threshold, _)| i64::from(**threshold) <= streak)
        .map(|(_, multiplier)| *multiplier)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDate(NaiveDate);

    impl DateProvider for FixedDate {
        fn today(&self) -> NaiveDate {
            self.0
        }
    }

    fn engine(today: NaiveDate) -> StreakEngine {
        StreakEngine::new(Arc::new(FixedDate(today)))
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_first_claim_starts_at_one() {
        let outcome = engine(date(2024, 1, 15)).evaluate(None, 0, &default_streak_bonuses());
        assert_eq!(
            outcome,
            StreakOutcome::Claimed {
                streak: 1,
                multiplier: 1
            }
        );
    }

    #[test]
    fn test_consecutive_day_extends_streak() {
        let outcome = engine(date(2024, 1, 15)).evaluate(
            Some(date(2024, 1, 14)),
            5,
            &default_streak_bonuses(),
        );
        assert_eq!(
            outcome,
            StreakOutcome::Claimed {
                streak: 6,
                multiplier: 1
            }
        );
    }

    #[test]
    fn test_same_day_is_duplicate() {
        let outcome = engine(date(2024, 1, 15)).evaluate(
            Some(date(2024, 1, 15)),
            5,
            &default_streak_bonuses(),
        );
        assert_eq!(outcome, StreakOutcome::AlreadyClaimed);
    }

    #[test]
    fn test_gap_resets_streak() {
        let outcome = engine(date(2024, 1, 15)).evaluate(
            Some(date(2024, 1, 12)),
            30,
            &default_streak_bonuses(),
        );
        assert_eq!(
            outcome,
            StreakOutcome::Claimed {
                streak: 1,
                multiplier: 1
            }
        );
    }

    #[test]
    fn test_streak_crossing_threshold_earns_multiplier() {
        let outcome = engine(date(2024, 1, 15)).evaluate(
            Some(date(2024, 1, 14)),
            6,
            &default_streak_bonuses(),
        );
        assert_eq!(
            outcome,
            StreakOutcome::Claimed {
                streak: 7,
                multiplier: 2
            }
        );
    }

    #[test]
    fn test_multiplier_thresholds() {
        let bonuses = default_streak_bonuses();
        assert_eq!(multiplier_for(0, &bonuses), 1);
        assert_eq!(multiplier_for(6, &bonuses), 1);
        assert_eq!(multiplier_for(7, &bonuses), 2);
        assert_eq!(multiplier_for(13, &bonuses), 2);
        assert_eq!(multiplier_for(14, &bonuses), 4);
        assert_eq!(multiplier_for(30, &bonuses), 10);
        assert_eq!(multiplier_for(59, &bonuses), 10);
        assert_eq!(multiplier_for(60, &bonuses), 20);
        assert_eq!(multiplier_for(365, &bonuses), 20);
    }

    #[test]
    fn test_multiplier_is_monotonic() {
        let bonuses = default_streak_bonuses();
        let mut previous = 0;
        for streak in 0..=100 {
            let current = multiplier_for(streak, &bonuses);
            assert!(current >= previous, "multiplier dipped at streak {streak}");
            previous = current;
        }
    }

    #[test]
    fn test_empty_bonus_table_defaults_to_one() {
        assert_eq!(multiplier_for(100, &BTreeMap::new()), 1);
    }
}
