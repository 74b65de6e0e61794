// =============================================================================
// Weekly Checkpoints — five cumulative milestones per month
// =============================================================================
//
// Week k covers days 7(k-1)+1 ..= 7k; week 5 runs from day 29 to month end
// (in a 28-day month it collapses onto day 28 and stays upcoming, since it
// has no day of its own).  Week k's cumulative target
// is k/5 of the monthly target.  Only the week in progress carries an
// adjustment, graded by how far cumulative return trails that week's target:
//
//   gap <= 0   NONE      gap < 2   MINOR
//   gap < 5    MODERATE  otherwise AGGRESSIVE

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::DayBucket;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStatus {
    Completed,
    InProgress,
    Upcoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Adjustment {
    None,
    Minor,
    Moderate,
    Aggressive,
}

impl Adjustment {
    pub fn from_gap(gap_pct: f64) -> Self {
        if gap_pct <= 0.0 {
            Self::None
        } else if gap_pct < 2.0 {
            Self::Minor
        } else if gap_pct < 5.0 {
            Self::Moderate
        } else {
            Self::Aggressive
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyCheckpoint {
    pub week: u8,
    pub start_day: u32,
    pub end_day: u32,
    pub target_pct: f64,
    /// Cumulative return through the end of the week, or through today for
    /// the week in progress.
    pub actual_pct: f64,
    pub status: CheckpointStatus,
    /// Set once the week is completed.
    pub achieved: Option<bool>,
    pub adjustment: Option<Adjustment>,
}

/// Build the five checkpoints of the month containing `first_day`.
pub fn build(
    target_pct: f64,
    first_day: NaiveDate,
    days_in_month: u32,
    today_day: u32,
    days: &BTreeMap<NaiveDate, DayBucket>,
) -> Vec<WeeklyCheckpoint> {
    let cumulative_through = |day: u32| -> f64 {
        days.iter()
            .filter(|(d, _)| d.year() == first_day.year() && d.month() == first_day.month() && d.day() <= day)
            .map(|(_, b)| b.return_pct)
            .sum()
    };

    (1..=5u8)
        .map(|week| {
            let nominal_start = 7 * (week as u32 - 1) + 1;
            let start_day = nominal_start.min(days_in_month);
            let end_day = if week == 5 { days_in_month } else { (7 * week as u32).min(days_in_month) };
            let target = target_pct * week as f64 / 5.0;

            let status = if today_day > end_day {
                CheckpointStatus::Completed
            } else if today_day >= nominal_start {
                CheckpointStatus::InProgress
            } else {
                CheckpointStatus::Upcoming
            };

            let actual = match status {
                CheckpointStatus::Completed => cumulative_through(end_day),
                _ => cumulative_through(today_day.min(end_day)),
            };

            WeeklyCheckpoint {
                week,
                start_day,
                end_day,
                target_pct: target,
                actual_pct: actual,
                status,
                achieved: (status == CheckpointStatus::Completed).then_some(actual >= target),
                adjustment: (status == CheckpointStatus::InProgress)
                    .then(|| Adjustment::from_gap(target - actual)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32, ret: f64) -> (NaiveDate, DayBucket) {
        let date = NaiveDate::from_ymd_opt(2026, 3, d).unwrap();
        (
            date,
            DayBucket {
                date,
                trades: 1,
                wins: u32::from(ret > 0.0),
                return_pct: ret,
            },
        )
    }

    fn first() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn cumulative_targets_are_fifths() {
        let cps = build(25.0, first(), 31, 1, &BTreeMap::new());
        let targets: Vec<f64> = cps.iter().map(|c| c.target_pct).collect();
        assert_eq!(targets, vec![5.0, 10.0, 15.0, 20.0, 25.0]);
        assert_eq!((cps[4].start_day, cps[4].end_day), (29, 31));
    }

    #[test]
    fn only_current_week_is_adjusted() {
        let days: BTreeMap<_, _> = [day(2, 6.0), day(9, 1.0)].into_iter().collect();
        let cps = build(25.0, first(), 31, 10, &days);

        assert_eq!(cps[0].status, CheckpointStatus::Completed);
        assert_eq!(cps[0].achieved, Some(true));
        assert!(cps[0].adjustment.is_none());

        assert_eq!(cps[1].status, CheckpointStatus::InProgress);
        assert!((cps[1].actual_pct - 7.0).abs() < 1e-9);
        assert_eq!(cps[1].adjustment, Some(Adjustment::Moderate));

        assert_eq!(cps[2].status, CheckpointStatus::Upcoming);
        assert!(cps[2].adjustment.is_none());
    }

    #[test]
    fn february_week_five_collapses() {
        let feb = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        let cps = build(25.0, feb, 28, 28, &BTreeMap::new());
        assert_eq!((cps[4].start_day, cps[4].end_day), (28, 28));
        assert_eq!(cps[4].status, CheckpointStatus::Upcoming);
        assert!(cps[4].adjustment.is_none());

        let in_progress: Vec<u8> = cps
            .iter()
            .filter(|c| c.status == CheckpointStatus::InProgress)
            .map(|c| c.week)
            .collect();
        assert_eq!(in_progress, vec![4]);
        assert_eq!(cps[3].adjustment, Some(Adjustment::Aggressive));
    }

    #[test]
    fn gap_grades() {
        assert_eq!(Adjustment::from_gap(-1.0), Adjustment::None);
        assert_eq!(Adjustment::from_gap(1.5), Adjustment::Minor);
        assert_eq!(Adjustment::from_gap(4.0), Adjustment::Moderate);
        assert_eq!(Adjustment::from_gap(8.0), Adjustment::Aggressive);
    }
}
