// =============================================================================
// Alpha Decision Engine — regime + confluence + goal posture -> mode
// =============================================================================
//
// One cycle (every 4 h, at startup, and on manual trigger):
//
//   1. market metrics + regime of the primary instrument
//   2. goal progress + strategic posture
//   3. posture -> base mode
//   4. regime overrides
//   5. dynamic threshold set
//   6. command for the final mode
//   7. publish `alpha:decision` and `gamma:command`
//   8. close the previous mode's tenure if the mode changed
//
// A sub-analysis that fails is replaced by its neutral default and noted in
// the decision's warnings; the cycle always emits a command.
//
// Decision confidence:
//   0.3 * data quality + 0.3 * regime confidence
//   + 0.2 * goal confidence + 0.2 * sample adequacy (elapsed days / 15)
// =============================================================================

pub mod command;
pub mod modes;
pub mod thresholds;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{info, warn};

pub use command::{CommandPriority, GammaCommand};
pub use modes::{AlphaMode, ModeTemplate};
pub use thresholds::{AdjustmentContext, EffectiveThresholds, Threshold, ThresholdSet};

use crate::events::{Event, EventBus};
use crate::goal::{GoalAchievementEngine, GoalProgress, Posture, StrategicRecommendation};
use crate::mtf::{Confluence, MultiTimeframeAnalyzer};
use crate::persistence::Store;
use crate::regime::{MarketConditionAnalyzer, MarketMetrics, MarketRegime};
use crate::runtime_config::AlphaSettings;
use crate::types::{clamp_score, TrendDirection};

/// Elapsed goal days at which sample adequacy saturates.
const SAMPLE_SATURATION_DAYS: f64 = 15.0;

// =============================================================================
// Types
// =============================================================================

/// Output of one decision cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlphaDecision {
    pub id: String,
    pub symbol: String,
    pub mode: AlphaMode,
    /// Mode chosen from the posture before regime overrides.
    pub base_mode: AlphaMode,
    pub posture: Posture,
    pub regime: MarketRegime,
    pub regime_confidence: f64,
    pub composite: f64,
    pub data_quality: f64,
    pub confluence_trend: TrendDirection,
    pub alignment: f64,
    pub goal_deviation_pct: f64,
    pub days_remaining: u32,
    pub target_signals_per_day: u32,
    pub min_win_rate: f64,
    pub thresholds: ThresholdSet,
    pub effective: EffectiveThresholds,
    pub command: GammaCommand,
    /// 0..100.
    pub confidence: f64,
    pub reasoning: Vec<String>,
    pub warnings: Vec<String>,
    pub decided_at: DateTime<Utc>,
}

/// Realised outcomes while one mode was active.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModePerformance {
    pub cycles: u32,
    pub trades: u32,
    pub wins: u32,
    pub return_pct: f64,
}

/// End of one mode's tenure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeTransition {
    pub id: String,
    pub from: AlphaMode,
    pub to: AlphaMode,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub reason: String,
    pub performance: ModePerformance,
}

/// Inputs of a single decision, already resolved to defaults where an
/// analysis failed.
#[derive(Debug, Clone)]
pub struct DecisionInputs {
    pub symbol: String,
    pub metrics: MarketMetrics,
    pub regime: MarketRegime,
    pub regime_confidence: f64,
    pub confluence: Confluence,
    pub progress: GoalProgress,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlphaStatus {
    pub cycles: u64,
    pub current_mode: Option<AlphaMode>,
    pub mode_since: Option<DateTime<Utc>>,
    pub last_decision_at: Option<DateTime<Utc>>,
    pub last_warnings: Vec<String>,
    pub command_valid_until: Option<DateTime<Utc>>,
    /// The last command's validity window has passed without a new cycle.
    pub command_expired: bool,
}

// ── Pure decision ───────────────────────────────────────────────────────────

pub fn decision_confidence(data_quality: f64, regime_confidence: f64, goal_confidence: f64, days_elapsed: u32) -> f64 {
    let sample = (days_elapsed as f64 / SAMPLE_SATURATION_DAYS).min(1.0) * 100.0;
    clamp_score(0.3 * data_quality + 0.3 * regime_confidence + 0.2 * goal_confidence + 0.2 * sample)
}

/// Steps 2-6 of the cycle for already-gathered inputs.
pub fn decide(inputs: DecisionInputs, now: DateTime<Utc>, command_duration: Duration) -> AlphaDecision {
    let progress = &inputs.progress;
    let recommendation = StrategicRecommendation::new(progress.deviation_pct, progress.days_remaining);

    let mut reasoning = vec![format!(
        "goal {:.2}% vs {:.2}% expected ({:+.1}%), {} days left -> {}",
        progress.current_return_pct,
        progress.expected_return_pct,
        progress.deviation_pct,
        progress.days_remaining,
        recommendation.posture
    )];

    let base_mode = AlphaMode::from_posture(recommendation.posture);
    reasoning.push(format!("posture {} -> {}", recommendation.posture, base_mode));

    let (mode, override_reason) = base_mode.with_regime_overrides(inputs.regime);
    if let Some(why) = override_reason {
        reasoning.push(why);
    }
    reasoning.push(format!(
        "regime {} ({:.0}%), composite {:.1}, confluence {} ({:.0}% aligned)",
        inputs.regime,
        inputs.regime_confidence,
        inputs.metrics.composite,
        inputs.confluence.overall_trend,
        inputs.confluence.alignment
    ));

    let thresholds = ThresholdSet::dynamic(
        mode,
        &AdjustmentContext {
            composite: inputs.metrics.composite,
            regime: inputs.regime,
            confluence: &inputs.confluence,
            days_remaining: progress.days_remaining,
        },
    );

    let reason = format!("{mode} for {} regime, posture {}", inputs.regime, recommendation.posture);
    let command = GammaCommand::for_mode(mode, reason, now, command_duration);
    debug_assert!(thresholds.within_bounds());
    let effective = thresholds.apply_command(&command);
    let template = mode.template();

    AlphaDecision {
        id: uuid::Uuid::new_v4().to_string(),
        symbol: inputs.symbol,
        mode,
        base_mode,
        posture: recommendation.posture,
        regime: inputs.regime,
        regime_confidence: inputs.regime_confidence,
        composite: inputs.metrics.composite,
        data_quality: inputs.metrics.data_quality,
        confluence_trend: inputs.confluence.overall_trend,
        alignment: inputs.confluence.alignment,
        goal_deviation_pct: progress.deviation_pct,
        days_remaining: progress.days_remaining,
        target_signals_per_day: template.target_signals_per_day,
        min_win_rate: template.min_win_rate,
        thresholds,
        effective,
        command,
        confidence: decision_confidence(
            inputs.metrics.data_quality,
            inputs.regime_confidence,
            progress.confidence,
            progress.days_elapsed,
        ),
        reasoning,
        warnings: inputs.warnings,
        decided_at: now,
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Goal totals at the start of a mode's tenure.
#[derive(Debug, Clone, Copy)]
struct GoalMark {
    year: i32,
    month: u32,
    trades: u32,
    wins: u32,
    return_pct: f64,
}

impl GoalMark {
    fn of(p: &GoalProgress) -> Self {
        Self {
            year: p.year,
            month: p.month,
            trades: p.trades,
            wins: p.wins,
            return_pct: p.current_return_pct,
        }
    }

    /// Outcomes since this mark. Across a month boundary only the new
    /// month's totals are known.
    fn since(&self, now: &GoalProgress) -> (u32, u32, f64) {
        if (self.year, self.month) == (now.year, now.month) {
            (
                now.trades.saturating_sub(self.trades),
                now.wins.saturating_sub(self.wins),
                now.current_return_pct - self.return_pct,
            )
        } else {
            (now.trades, now.wins, now.current_return_pct)
        }
    }
}

struct Tenure {
    mode: AlphaMode,
    started_at: DateTime<Utc>,
    cycles: u32,
    mark: Option<GoalMark>,
}

#[derive(Default)]
struct AlphaState {
    tenure: Option<Tenure>,
    latest: Option<AlphaDecision>,
    history: VecDeque<ModeTransition>,
    cycles: u64,
}

pub struct AlphaDecisionEngine {
    market: Arc<MarketConditionAnalyzer>,
    mtf: Arc<MultiTimeframeAnalyzer>,
    goal: Arc<GoalAchievementEngine>,
    bus: Arc<EventBus>,
    store: Arc<dyn Store>,
    settings: AlphaSettings,
    primary_symbol: String,
    trigger: Arc<Notify>,
    state: Mutex<AlphaState>,
}

impl AlphaDecisionEngine {
    pub fn new(
        market: Arc<MarketConditionAnalyzer>,
        mtf: Arc<MultiTimeframeAnalyzer>,
        goal: Arc<GoalAchievementEngine>,
        bus: Arc<EventBus>,
        store: Arc<dyn Store>,
        settings: AlphaSettings,
        primary_symbol: &str,
    ) -> Self {
        Self {
            market,
            mtf,
            goal,
            bus,
            store,
            settings,
            primary_symbol: primary_symbol.to_string(),
            trigger: Arc::new(Notify::new()),
            state: Mutex::new(AlphaState::default()),
        }
    }

    /// Reload mode history. The most recent transition's target becomes the
    /// mode in force, so the first cycle after a restart can close it.
    pub fn load_history(&self) -> anyhow::Result<usize> {
        let transitions = self.store.load_mode_history()?;
        let skip = transitions.len().saturating_sub(self.settings.mode_history_len.max(1));
        let mut state = self.state.lock();
        state.history = transitions.into_iter().skip(skip).collect();
        state.tenure = state.history.back().map(|t| Tenure {
            mode: t.to,
            started_at: t.ended_at,
            cycles: 0,
            mark: None,
        });
        info!(transitions = state.history.len(), "mode history loaded");
        Ok(state.history.len())
    }

    /// Wakes the scheduled decision task for an extra cycle.
    pub fn trigger(&self) -> Arc<Notify> {
        self.trigger.clone()
    }

    pub fn request_cycle(&self) {
        self.trigger.notify_one();
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.decision_interval_secs)
    }

    // ── Cycle ───────────────────────────────────────────────────────────

    fn gather(&self) -> DecisionInputs {
        let symbol = self.primary_symbol.clone();
        let now = Utc::now();
        let mut warnings = Vec::new();

        let (metrics, regime, regime_confidence) = match self.market.analyze(&symbol) {
            Ok((update, event)) => {
                self.bus.publish(Event::MarketUpdate(update.clone()));
                if let Some(event) = event {
                    self.bus.publish(Event::RegimeChange(event));
                }
                (update.metrics, update.regime.regime, update.regime.confidence)
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "market analysis failed; using defaults");
                warnings.push(format!("market analysis: {e}"));
                match self.market.latest(&symbol) {
                    Some(prev) => (prev.metrics, prev.regime.regime, prev.regime.confidence),
                    None => (MarketMetrics::neutral(&symbol, now), MarketRegime::Ranging, 0.0),
                }
            }
        };

        let report = self.mtf.analyze(&symbol);
        if report.timeframes.iter().all(|t| t.candles == 0) {
            warn!(symbol = %symbol, "no candle data; confluence is neutral");
            warnings.push("confluence: no candle data".to_string());
        }

        DecisionInputs {
            symbol,
            metrics,
            regime,
            regime_confidence,
            confluence: report.confluence,
            progress: self.goal.calculate_monthly_target(),
            warnings,
        }
    }

    /// Run one full cycle and publish its outputs.
    pub fn run_cycle(&self) -> AlphaDecision {
        let inputs = self.gather();
        self.apply(inputs, Utc::now())
    }

    /// Decide from `inputs`, publish, and track the mode tenure.
    pub fn apply(&self, inputs: DecisionInputs, now: DateTime<Utc>) -> AlphaDecision {
        let progress = inputs.progress.clone();
        let decision = decide(inputs, now, Duration::from_secs(self.settings.command_duration_secs));

        let transition = {
            let mut state = self.state.lock();
            state.cycles += 1;
            let transition = self.track_tenure(&mut state, &decision, &progress, now);
            if let Some(t) = &transition {
                state.history.push_back(t.clone());
                while state.history.len() > self.settings.mode_history_len.max(1) {
                    state.history.pop_front();
                }
            }
            state.latest = Some(decision.clone());
            transition
        };

        if let Some(t) = &transition {
            info!(from = %t.from, to = %t.to, trades = t.performance.trades, "mode transition");
            if let Err(e) = self.store.append_mode_transition(t) {
                warn!(error = %e, "failed to persist mode transition");
            }
        }

        info!(
            mode = %decision.mode,
            posture = %decision.posture,
            regime = %decision.regime,
            confidence = format!("{:.1}", decision.confidence),
            warnings = decision.warnings.len(),
            "alpha decision"
        );

        self.bus.publish(Event::AlphaDecision(decision.clone()));
        self.bus.publish(Event::GammaCommand(decision.command.clone()));
        decision
    }

    fn track_tenure(
        &self,
        state: &mut AlphaState,
        decision: &AlphaDecision,
        progress: &GoalProgress,
        now: DateTime<Utc>,
    ) -> Option<ModeTransition> {
        let fresh = || Tenure {
            mode: decision.mode,
            started_at: now,
            cycles: 1,
            mark: Some(GoalMark::of(progress)),
        };

        match state.tenure.as_mut() {
            None => {
                state.tenure = Some(fresh());
                None
            }
            Some(t) if t.mode == decision.mode => {
                t.cycles += 1;
                if t.mark.is_none() {
                    t.mark = Some(GoalMark::of(progress));
                }
                None
            }
            Some(t) => {
                let (trades, wins, return_pct) = t.mark.map(|m| m.since(progress)).unwrap_or((0, 0, 0.0));
                let transition = ModeTransition {
                    id: uuid::Uuid::new_v4().to_string(),
                    from: t.mode,
                    to: decision.mode,
                    started_at: t.started_at,
                    ended_at: now,
                    reason: decision.reasoning.join("; "),
                    performance: ModePerformance {
                        cycles: t.cycles,
                        trades,
                        wins,
                        return_pct,
                    },
                };
                state.tenure = Some(fresh());
                Some(transition)
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn latest(&self) -> Option<AlphaDecision> {
        self.state.lock().latest.clone()
    }

    pub fn mode_history(&self) -> Vec<ModeTransition> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn status(&self) -> AlphaStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> AlphaStatus {
        let state = self.state.lock();
        let command = state.latest.as_ref().map(|d| &d.command);
        AlphaStatus {
            cycles: state.cycles,
            current_mode: state.tenure.as_ref().map(|t| t.mode),
            mode_since: state.tenure.as_ref().map(|t| t.started_at),
            last_decision_at: state.latest.as_ref().map(|d| d.decided_at),
            last_warnings: state.latest.as_ref().map(|d| d.warnings.clone()).unwrap_or_default(),
            command_valid_until: command.map(|c| c.valid_until),
            command_expired: command.is_some_and(|c| c.is_expired(now)),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::SourceAggregator;
    use crate::events::Topic;
    use crate::market_data::CandleBuffer;
    use crate::persistence::MemoryStore;
    use crate::runtime_config::{GoalSettings, MarketSettings};
    use crate::side_inputs::SideInputStore;
    use chrono::NaiveDate;

    fn progress(deviation_pct: f64, days_remaining: u32) -> GoalProgress {
        let days_in_month = 30;
        let days_elapsed = days_in_month - days_remaining;
        let expected = 25.0 * days_elapsed as f64 / days_in_month as f64;
        let current = expected * (1.0 + deviation_pct / 100.0);
        GoalProgress {
            year: 2026,
            month: 6,
            target_pct: 25.0,
            current_return_pct: current,
            expected_return_pct: expected,
            days_elapsed,
            days_remaining,
            days_in_month,
            required_daily_return_pct: 0.0,
            actual_daily_return_pct: current / days_elapsed as f64,
            on_track: deviation_pct >= -5.0,
            deviation_pct,
            projected_return_pct: 0.0,
            confidence: 60.0,
            trades: 30,
            wins: 17,
            win_rate: 56.7,
        }
    }

    fn inputs(regime: MarketRegime, deviation_pct: f64, days_remaining: u32) -> DecisionInputs {
        DecisionInputs {
            symbol: "BTC".into(),
            metrics: MarketMetrics::neutral("BTC", Utc::now()),
            regime,
            regime_confidence: 85.0,
            confluence: Confluence::neutral(),
            progress: progress(deviation_pct, days_remaining),
            warnings: Vec::new(),
        }
    }

    fn engine() -> (AlphaDecisionEngine, Arc<EventBus>, Arc<MemoryStore>) {
        let aggregator = Arc::new(SourceAggregator::with_clients(Vec::new(), vec!["BTC".into()], 30_000, 120));
        let market = Arc::new(MarketConditionAnalyzer::new(
            aggregator,
            Arc::new(SideInputStore::new(Duration::from_secs(900))),
            MarketSettings::default(),
        ));
        let mtf = Arc::new(MultiTimeframeAnalyzer::new(Arc::new(CandleBuffer::new(100)), 100));
        let store = Arc::new(MemoryStore::new());
        let goal = Arc::new(GoalAchievementEngine::new_at(
            &GoalSettings::default(),
            store.clone(),
            NaiveDate::from_ymd_opt(2026, 6, 22).unwrap(),
        ));
        let bus = Arc::new(EventBus::new());
        let engine = AlphaDecisionEngine::new(
            market,
            mtf,
            goal,
            bus.clone(),
            store.clone(),
            AlphaSettings::default(),
            "BTC",
        );
        (engine, bus, store)
    }

    #[test]
    fn deep_deficit_late_in_month_floods() {
        let d = decide(inputs(MarketRegime::Ranging, -16.0, 8), Utc::now(), Duration::from_secs(3600));
        assert_eq!(d.posture, Posture::UltraAggressive);
        assert_eq!(d.mode, AlphaMode::Flood);
        assert_eq!(d.command.priority, CommandPriority::Critical);
        assert_eq!(d.target_signals_per_day, 35);
    }

    #[test]
    fn high_volatility_downgrades_flood_to_volume() {
        let d = decide(inputs(MarketRegime::HighVolatility, -16.0, 8), Utc::now(), Duration::from_secs(3600));
        assert_eq!(d.base_mode, AlphaMode::Flood);
        assert_eq!(d.mode, AlphaMode::Volume);
        assert_eq!(d.command.mode, AlphaMode::Volume);
        assert!(d.reasoning.iter().any(|r| r.contains("HIGH_VOLATILITY")));
    }

    #[test]
    fn bear_regime_caps_mode() {
        let d = decide(inputs(MarketRegime::BearTrending, -12.0, 20), Utc::now(), Duration::from_secs(3600));
        assert_eq!(d.base_mode, AlphaMode::Volume);
        assert_eq!(d.mode, AlphaMode::Balanced);
    }

    #[test]
    fn confidence_blend() {
        // 0.3*80 + 0.3*90 + 0.2*50 + 0.2*(6/15*100)
        let c = decision_confidence(80.0, 90.0, 50.0, 6);
        assert!((c - 69.0).abs() < 1e-9);
        assert!((decision_confidence(100.0, 100.0, 100.0, 40) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn command_valid_until_after_issue() {
        let d = decide(inputs(MarketRegime::Ranging, 0.0, 15), Utc::now(), Duration::from_secs(4 * 3600));
        assert!(d.command.valid_until > d.command.issued_at);
        assert!(d.thresholds.within_bounds());
    }

    #[tokio::test]
    async fn cycle_without_data_still_emits_command() {
        let (engine, bus, _) = engine();
        let mut sub = bus.subscribe(&[Topic::AlphaDecision, Topic::GammaCommand]);

        let d = engine.run_cycle();
        assert!(d.warnings.iter().any(|w| w.starts_with("market analysis")));
        assert!(d.warnings.iter().any(|w| w.starts_with("confluence")));
        assert_eq!(d.regime, MarketRegime::Ranging);

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert_eq!(first.topic, Topic::AlphaDecision);
        assert_eq!(second.topic, Topic::GammaCommand);
        assert_eq!(engine.status().cycles, 1);
        assert_eq!(engine.status().last_warnings.len(), 2);
    }

    #[test]
    fn mode_change_records_and_persists_transition() {
        let (engine, _, store) = engine();
        let t0 = Utc::now();

        engine.apply(inputs(MarketRegime::Ranging, 0.0, 15), t0);
        engine.apply(inputs(MarketRegime::Ranging, 1.0, 14), t0 + chrono::Duration::hours(4));
        assert!(engine.mode_history().is_empty());

        let mut later = inputs(MarketRegime::Ranging, -16.0, 8);
        later.progress.trades = 34;
        later.progress.wins = 19;
        engine.apply(later, t0 + chrono::Duration::hours(8));

        let history = engine.mode_history();
        assert_eq!(history.len(), 1);
        let t = &history[0];
        assert_eq!((t.from, t.to), (AlphaMode::Balanced, AlphaMode::Flood));
        assert_eq!(t.started_at, t0);
        assert_eq!(t.performance.cycles, 2);
        assert_eq!(t.performance.trades, 4);
        assert_eq!(t.performance.wins, 2);
        assert_eq!(store.load_mode_history().unwrap().len(), 1);
        assert_eq!(engine.status().current_mode, Some(AlphaMode::Flood));
    }

    #[test]
    fn status_reports_command_expiry() {
        let (engine, _, _) = engine();
        let t0 = Utc::now();
        assert!(!engine.status_at(t0).command_expired);
        assert!(engine.status_at(t0).command_valid_until.is_none());

        engine.apply(inputs(MarketRegime::Ranging, 0.0, 15), t0);
        let fresh = engine.status_at(t0 + chrono::Duration::hours(1));
        assert_eq!(fresh.command_valid_until, Some(t0 + chrono::Duration::hours(4)));
        assert!(!fresh.command_expired);
        assert!(engine.status_at(t0 + chrono::Duration::hours(4)).command_expired);
    }

    #[test]
    fn reloaded_history_sets_mode_in_force() {
        let (engine, _, store) = engine();
        let t0 = Utc::now();
        store
            .append_mode_transition(&ModeTransition {
                id: "x".into(),
                from: AlphaMode::Balanced,
                to: AlphaMode::Volume,
                started_at: t0 - chrono::Duration::hours(8),
                ended_at: t0 - chrono::Duration::hours(4),
                reason: String::new(),
                performance: ModePerformance::default(),
            })
            .unwrap();
        assert_eq!(engine.load_history().unwrap(), 1);
        assert_eq!(engine.status().current_mode, Some(AlphaMode::Volume));

        engine.apply(inputs(MarketRegime::Ranging, 0.0, 15), t0);
        let history = engine.mode_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].from, AlphaMode::Volume);
        assert_eq!(history[1].started_at, t0 - chrono::Duration::hours(4));
    }
}
