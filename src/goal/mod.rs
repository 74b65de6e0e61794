// =============================================================================
// Goal Achievement Engine — monthly return target tracking
// =============================================================================
//
// Calendar-month state machine.  Realised trade outcomes land in per-day
// buckets of the open month; progress, weekly checkpoints and the strategic
// posture are all derived from those buckets and the fixed monthly target.
//
// Lifecycle:
//   record_trade   appends to the open month only; prior months are sealed
//   close_month_at archives (target, actual, achieved), clears the
//                  checkpoint cache and opens the next month
//   roll_over      hourly hook: closes the open month once the calendar has
//                  moved past it
//
// Every time-dependent method has an `_at(today)` twin so tests can pin the
// calendar.
// =============================================================================

pub mod checkpoints;
pub mod posture;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub use checkpoints::{Adjustment, CheckpointStatus, WeeklyCheckpoint};
pub use posture::{Posture, RiskTier, StrategicRecommendation};

use crate::persistence::Store;
use crate::runtime_config::GoalSettings;

/// Trade count at which the sample half of progress confidence saturates.
const CONFIDENT_TRADE_COUNT: f64 = 50.0;
/// Elapsed days at which the time half of progress confidence saturates.
const CONFIDENT_DAYS: f64 = 15.0;
/// Share of expected return that still counts as on track.
const ON_TRACK_RATIO: f64 = 0.95;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum GoalError {
    #[error("{date} belongs to a month that is already closed")]
    PriorMonth { date: NaiveDate },
    #[error("{date} belongs to a month that has not been opened yet")]
    FutureMonth { date: NaiveDate },
    #[error("invalid trade return: {0}")]
    InvalidReturn(f64),
}

/// Realised outcomes of one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub trades: u32,
    pub wins: u32,
    /// Sum of that day's trade returns, in percent.
    pub return_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalProgress {
    pub year: i32,
    pub month: u32,
    pub target_pct: f64,
    pub current_return_pct: f64,
    /// Target scaled by elapsed / total days.
    pub expected_return_pct: f64,
    pub days_elapsed: u32,
    pub days_remaining: u32,
    pub days_in_month: u32,
    pub required_daily_return_pct: f64,
    pub actual_daily_return_pct: f64,
    pub on_track: bool,
    pub deviation_pct: f64,
    pub projected_return_pct: f64,
    /// 0..100, grows with elapsed days and trade count.
    pub confidence: f64,
    pub trades: u32,
    pub wins: u32,
    pub win_rate: f64,
}

/// Sealed result of one month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthArchive {
    pub year: i32,
    pub month: u32,
    pub target_pct: f64,
    pub actual_pct: f64,
    pub achieved: bool,
    pub trades: u32,
    pub wins: u32,
    pub closed_at: DateTime<Utc>,
}

/// Everything the goal endpoint serves in one read.
#[derive(Debug, Clone, Serialize)]
pub struct GoalStatus {
    pub progress: GoalProgress,
    pub checkpoints: Vec<WeeklyCheckpoint>,
    pub recommendation: StrategicRecommendation,
    /// Per-day breakdown of the open month.
    pub days: Vec<DayBucket>,
}

// ── Calendar helpers ────────────────────────────────────────────────────────

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = next_month(year, month);
    (first_of_month(ny, nm) - first_of_month(year, month)).num_days() as u32
}

// =============================================================================
// Engine
// =============================================================================

struct MonthState {
    year: i32,
    month: u32,
    days: BTreeMap<NaiveDate, DayBucket>,
    /// Checkpoints keyed by the day they were computed for.
    checkpoint_cache: Option<(NaiveDate, Vec<WeeklyCheckpoint>)>,
    history: VecDeque<MonthArchive>,
}

impl MonthState {
    fn open(year: i32, month: u32, history: VecDeque<MonthArchive>) -> Self {
        Self {
            year,
            month,
            days: BTreeMap::new(),
            checkpoint_cache: None,
            history,
        }
    }

    fn key(&self) -> (i32, u32) {
        (self.year, self.month)
    }

    fn totals(&self) -> (f64, u32, u32) {
        self.days.values().fold((0.0, 0, 0), |(ret, trades, wins), b| {
            (ret + b.return_pct, trades + b.trades, wins + b.wins)
        })
    }
}

pub struct GoalAchievementEngine {
    state: Mutex<MonthState>,
    store: Arc<dyn Store>,
    target_pct: f64,
    history_len: usize,
}

impl GoalAchievementEngine {
    pub fn new(settings: &GoalSettings, store: Arc<dyn Store>) -> Self {
        Self::new_at(settings, store, Utc::now().date_naive())
    }

    /// Engine whose open month is the one containing `today`.
    pub fn new_at(settings: &GoalSettings, store: Arc<dyn Store>, today: NaiveDate) -> Self {
        Self {
            state: Mutex::new(MonthState::open(today.year(), today.month(), VecDeque::new())),
            store,
            target_pct: settings.monthly_target_pct,
            history_len: settings.history_len.max(1),
        }
    }

    /// Reload archived months from the store. Returns how many were kept.
    pub fn load_history(&self) -> anyhow::Result<usize> {
        let archives = self.store.load_month_archives()?;
        let skip = archives.len().saturating_sub(self.history_len);
        let mut state = self.state.lock();
        state.history = archives.into_iter().skip(skip).collect();
        info!(months = state.history.len(), "goal history loaded");
        Ok(state.history.len())
    }

    // ── Trade intake ────────────────────────────────────────────────────

    /// Record one realised trade. `date` defaults to today (UTC).
    pub fn record_trade(
        &self,
        date: Option<NaiveDate>,
        is_win: bool,
        profit_pct: f64,
    ) -> Result<GoalProgress, GoalError> {
        self.record_trade_at(Utc::now().date_naive(), date, is_win, profit_pct)
    }

    pub fn record_trade_at(
        &self,
        today: NaiveDate,
        date: Option<NaiveDate>,
        is_win: bool,
        profit_pct: f64,
    ) -> Result<GoalProgress, GoalError> {
        if !profit_pct.is_finite() || profit_pct <= -100.0 {
            return Err(GoalError::InvalidReturn(profit_pct));
        }
        let date = date.unwrap_or(today);

        let mut state = self.state.lock();
        let key = (date.year(), date.month());
        if key < state.key() {
            return Err(GoalError::PriorMonth { date });
        }
        if key > state.key() {
            return Err(GoalError::FutureMonth { date });
        }

        let bucket = state.days.entry(date).or_insert_with(|| DayBucket {
            date,
            trades: 0,
            wins: 0,
            return_pct: 0.0,
        });
        bucket.trades += 1;
        if is_win {
            bucket.wins += 1;
        }
        bucket.return_pct += profit_pct;
        state.checkpoint_cache = None;

        let progress = self.progress_locked(&state, today);
        info!(
            date = %date,
            is_win,
            profit_pct = format!("{:.2}", profit_pct),
            current = format!("{:.2}", progress.current_return_pct),
            deviation = format!("{:.1}", progress.deviation_pct),
            "trade recorded"
        );
        Ok(progress)
    }

    /// Buckets of the open month, oldest first.
    pub fn day_buckets(&self) -> Vec<DayBucket> {
        self.state.lock().days.values().cloned().collect()
    }

    // ── Derived views ───────────────────────────────────────────────────

    pub fn calculate_monthly_target(&self) -> GoalProgress {
        self.calculate_monthly_target_at(Utc::now().date_naive())
    }

    pub fn calculate_monthly_target_at(&self, today: NaiveDate) -> GoalProgress {
        let state = self.state.lock();
        self.progress_locked(&state, today)
    }

    fn progress_locked(&self, state: &MonthState, today: NaiveDate) -> GoalProgress {
        let dim = days_in_month(state.year, state.month);
        let days_elapsed = match (today.year(), today.month()).cmp(&state.key()) {
            std::cmp::Ordering::Less => 1,
            std::cmp::Ordering::Equal => today.day(),
            // Calendar moved on but the month has not been closed yet.
            std::cmp::Ordering::Greater => dim,
        };
        let days_remaining = dim - days_elapsed;

        let (current, trades, wins) = state.totals();
        let expected = self.target_pct * days_elapsed as f64 / dim as f64;
        let deviation = if expected > 0.0 {
            (current - expected) / expected * 100.0
        } else {
            0.0
        };
        let actual_daily = current / days_elapsed as f64;
        let required_daily = if days_remaining > 0 {
            (self.target_pct - current).max(0.0) / days_remaining as f64
        } else {
            0.0
        };
        let confidence = (days_elapsed as f64 / CONFIDENT_DAYS).min(1.0) * 50.0
            + (trades as f64 / CONFIDENT_TRADE_COUNT).min(1.0) * 50.0;

        GoalProgress {
            year: state.year,
            month: state.month,
            target_pct: self.target_pct,
            current_return_pct: current,
            expected_return_pct: expected,
            days_elapsed,
            days_remaining,
            days_in_month: dim,
            required_daily_return_pct: required_daily,
            actual_daily_return_pct: actual_daily,
            on_track: current >= ON_TRACK_RATIO * expected,
            deviation_pct: deviation,
            projected_return_pct: actual_daily * dim as f64,
            confidence,
            trades,
            wins,
            win_rate: if trades > 0 {
                wins as f64 / trades as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    pub fn weekly_checkpoints(&self) -> Vec<WeeklyCheckpoint> {
        self.weekly_checkpoints_at(Utc::now().date_naive())
    }

    pub fn weekly_checkpoints_at(&self, today: NaiveDate) -> Vec<WeeklyCheckpoint> {
        let mut state = self.state.lock();
        if let Some((day, cached)) = &state.checkpoint_cache {
            if *day == today {
                return cached.clone();
            }
        }

        let dim = days_in_month(state.year, state.month);
        let today_day = match (today.year(), today.month()).cmp(&state.key()) {
            std::cmp::Ordering::Less => 0,
            std::cmp::Ordering::Equal => today.day(),
            std::cmp::Ordering::Greater => dim + 1,
        };
        let built = checkpoints::build(
            self.target_pct,
            first_of_month(state.year, state.month),
            dim,
            today_day,
            &state.days,
        );
        state.checkpoint_cache = Some((today, built.clone()));
        built
    }

    pub fn strategic_recommendation(&self) -> StrategicRecommendation {
        self.strategic_recommendation_at(Utc::now().date_naive())
    }

    pub fn strategic_recommendation_at(&self, today: NaiveDate) -> StrategicRecommendation {
        let progress = self.calculate_monthly_target_at(today);
        StrategicRecommendation::new(progress.deviation_pct, progress.days_remaining)
    }

    pub fn status_at(&self, today: NaiveDate) -> GoalStatus {
        let progress = self.calculate_monthly_target_at(today);
        GoalStatus {
            recommendation: StrategicRecommendation::new(progress.deviation_pct, progress.days_remaining),
            checkpoints: self.weekly_checkpoints_at(today),
            days: self.day_buckets(),
            progress,
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Seal the open month and open the next one (or the month containing
    /// `today`, if the calendar has moved further).
    pub fn close_month_at(&self, today: NaiveDate) -> MonthArchive {
        let archive = {
            let mut state = self.state.lock();
            self.seal_locked(&mut state, today)
        };
        self.persist_archive(&archive);
        archive
    }

    /// Close the open month if `today` lies past it.
    pub fn roll_over(&self, today: NaiveDate) -> Option<MonthArchive> {
        let archive = {
            let mut state = self.state.lock();
            if (today.year(), today.month()) <= state.key() {
                return None;
            }
            self.seal_locked(&mut state, today)
        };
        self.persist_archive(&archive);
        Some(archive)
    }

    fn seal_locked(&self, state: &mut MonthState, today: NaiveDate) -> MonthArchive {
        let (actual, trades, wins) = state.totals();
        let archive = MonthArchive {
            year: state.year,
            month: state.month,
            target_pct: self.target_pct,
            actual_pct: actual,
            achieved: actual >= self.target_pct,
            trades,
            wins,
            closed_at: Utc::now(),
        };

        let next = next_month(state.year, state.month).max((today.year(), today.month()));
        let mut history = std::mem::take(&mut state.history);
        history.push_back(archive.clone());
        while history.len() > self.history_len {
            history.pop_front();
        }
        *state = MonthState::open(next.0, next.1, history);

        info!(
            year = archive.year,
            month = archive.month,
            actual = format!("{:.2}", archive.actual_pct),
            achieved = archive.achieved,
            "month closed"
        );
        archive
    }

    fn persist_archive(&self, archive: &MonthArchive) {
        if let Err(e) = self.store.append_month_archive(archive) {
            warn!(error = %e, year = archive.year, month = archive.month, "failed to persist month archive");
        }
    }

    /// Archived months, oldest first.
    pub fn history(&self) -> Vec<MonthArchive> {
        self.state.lock().history.iter().cloned().collect()
    }
}
