//! Scoring policy configuration
//!
//! One canonical, named policy for risk scoring: severity weights, risk-type
//! multipliers, level thresholds and the large-table escalation threshold.
//! Defaults are the published policy; individual knobs can be overridden from
//! environment variables for teams that tune their own thresholds.

use serde::{Deserialize, Serialize};

use crate::risk::{RiskKind, Severity};

/// Risk score a category contributes per severity level.
pub const WEIGHT_LOW: f64 = 10.0;
pub const WEIGHT_MEDIUM: f64 = 25.0;
pub const WEIGHT_HIGH: f64 = 50.0;
pub const WEIGHT_CRITICAL: f64 = 100.0;

/// Tables above this row count get row-count-based escalation.
pub const LARGE_TABLE_ROWS: i64 = 1_000_000;

/// Severity weights and risk-type multipliers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringPolicy {
    /// Score thresholds for level classification (critical, high, medium)
    pub critical_threshold: f64,
    pub high_threshold: f64,
    pub medium_threshold: f64,

    /// Row count above which table metadata escalates performance risk
    pub large_table_rows: i64,

    /// Weight of the mean of category scores in the final blend
    pub mean_weight: f64,

    /// Weight of the maximum category score in the final blend
    pub max_weight: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            critical_threshold: 80.0,
            high_threshold: 60.0,
            medium_threshold: 30.0,
            large_table_rows: LARGE_TABLE_ROWS,
            mean_weight: 0.6,
            max_weight: 0.4,
        }
    }
}

impl ScoringPolicy {
    /// Load the policy, applying any environment overrides.
    ///
    /// Recognized variables: `SCHEMAGUARD_CRITICAL_THRESHOLD`,
    /// `SCHEMAGUARD_HIGH_THRESHOLD`, `SCHEMAGUARD_MEDIUM_THRESHOLD`,
    /// `SCHEMAGUARD_LARGE_TABLE_ROWS`.
    pub fn load() -> Self {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();

        Self {
            critical_threshold: env_f64("SCHEMAGUARD_CRITICAL_THRESHOLD")
                .unwrap_or(defaults.critical_threshold),
            high_threshold: env_f64("SCHEMAGUARD_HIGH_THRESHOLD")
                .unwrap_or(defaults.high_threshold),
            medium_threshold: env_f64("SCHEMAGUARD_MEDIUM_THRESHOLD")
                .unwrap_or(defaults.medium_threshold),
            large_table_rows: std::env::var("SCHEMAGUARD_LARGE_TABLE_ROWS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.large_table_rows),
            mean_weight: defaults.mean_weight,
            max_weight: defaults.max_weight,
        }
    }

    /// Weight a single severity contributes before type multipliers.
    pub fn severity_weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Low => WEIGHT_LOW,
            Severity::Medium => WEIGHT_MEDIUM,
            Severity::High => WEIGHT_HIGH,
            Severity::Critical => WEIGHT_CRITICAL,
        }
    }

    /// Multiplier applied per risk family. Destructive findings dominate,
    /// performance findings are discounted since they degrade rather than
    /// break.
    pub fn type_multiplier(&self, kind: RiskKind) -> f64 {
        match kind {
            RiskKind::Destructive => 1.5,
            RiskKind::Downtime => 1.3,
            RiskKind::Blocking => 1.2,
            RiskKind::Constraint => 1.0,
            RiskKind::Performance => 0.8,
        }
    }

    /// Score contributed by one matched category.
    pub fn category_score(&self, severity: Severity, kind: RiskKind) -> f64 {
        self.severity_weight(severity) * self.type_multiplier(kind)
    }

    /// Blend per-category scores into the final 0-100 score.
    pub fn blend(&self, category_scores: &[f64]) -> f64 {
        if category_scores.is_empty() {
            return 0.0;
        }
        let mean = category_scores.iter().sum::<f64>() / category_scores.len() as f64;
        let max = category_scores.iter().cloned().fold(0.0f64, f64::max);
        (self.mean_weight * mean + self.max_weight * max).clamp(0.0, 100.0)
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_thresholds() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.critical_threshold, 80.0);
        assert_eq!(policy.high_threshold, 60.0);
        assert_eq!(policy.medium_threshold, 30.0);
        assert_eq!(policy.large_table_rows, 1_000_000);
    }

    #[test]
    fn test_blend_is_clamped() {
        let policy = ScoringPolicy::default();
        let scores = vec![150.0, 150.0, 150.0];
        assert_eq!(policy.blend(&scores), 100.0);
        assert_eq!(policy.blend(&[]), 0.0);
    }

    #[test]
    fn test_destructive_outscores_performance() {
        let policy = ScoringPolicy::default();
        let destructive = policy.category_score(Severity::High, RiskKind::Destructive);
        let performance = policy.category_score(Severity::High, RiskKind::Performance);
        assert!(destructive > performance);
    }
}
