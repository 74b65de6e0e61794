// =============================================================================
// Gamma Command — instruction to the downstream signal filter
// =============================================================================
//
//   mode           pattern x  consensus  r/r x  max/sector  dedup  priority
//   ULTRA_QUALITY     1.15       +10      1.2        1       240m   LOW
//   HIGH_QUALITY      1.05        +5      1.1        2       180m   LOW
//   BALANCED          1.00         0      1.0        3       120m   MEDIUM
//   VOLUME            0.92        -5      0.9        5        60m   HIGH
//   FLOOD             0.85       -10      0.8        8        30m   CRITICAL

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::modes::AlphaMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GammaCommand {
    pub id: String,
    pub mode: AlphaMode,
    pub pattern_strength_multiplier: f64,
    pub consensus_delta: f64,
    pub risk_reward_multiplier: f64,
    pub max_signals_per_sector: u32,
    pub dedup_window_minutes: u32,
    pub reason: String,
    pub priority: CommandPriority,
    pub issued_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl GammaCommand {
    pub fn for_mode(mode: AlphaMode, reason: String, issued_at: DateTime<Utc>, duration: Duration) -> Self {
        let (pattern, consensus, rr, per_sector, dedup, priority) = match mode {
            AlphaMode::UltraQuality => (1.15, 10.0, 1.2, 1, 240, CommandPriority::Low),
            AlphaMode::HighQuality => (1.05, 5.0, 1.1, 2, 180, CommandPriority::Low),
            AlphaMode::Balanced => (1.0, 0.0, 1.0, 3, 120, CommandPriority::Medium),
            AlphaMode::Volume => (0.92, -5.0, 0.9, 5, 60, CommandPriority::High),
            AlphaMode::Flood => (0.85, -10.0, 0.8, 8, 30, CommandPriority::Critical),
        };

        // A zero duration would make the command expire as it is issued.
        let validity = chrono::Duration::from_std(duration.max(Duration::from_secs(1)))
            .unwrap_or_else(|_| chrono::Duration::hours(4));

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mode,
            pattern_strength_multiplier: pattern,
            consensus_delta: consensus,
            risk_reward_multiplier: rr,
            max_signals_per_sector: per_sector,
            dedup_window_minutes: dedup,
            reason,
            priority,
            issued_at,
            valid_until: issued_at + validity,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_until
    }
}
