//! Risk detection and scoring
//!
//! Five independent rule families (blocking, destructive, performance,
//! constraint, downtime) matched per statement, scored through the one
//! canonical [`ScoringPolicy`](crate::config::ScoringPolicy) and aggregated
//! into a [`RiskAssessment`].

pub mod detector;
pub mod patterns;

pub use detector::RiskDetector;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ScoringPolicy;

/// Risk rule family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskKind {
    Blocking,
    Destructive,
    Performance,
    Constraint,
    Downtime,
}

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// How reversible an operation is once executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackDifficulty {
    Easy,
    Medium,
    Hard,
    Impossible,
}

/// Estimated impact of one finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskImpact {
    /// Estimated exclusive-lock hold time, when the finding implies one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_duration_secs: Option<u64>,
    pub downtime: bool,
    pub data_loss: bool,
    pub rollback_difficulty: RollbackDifficulty,
}

impl RiskImpact {
    pub fn lock(secs: u64) -> Self {
        Self {
            lock_duration_secs: Some(secs),
            downtime: false,
            data_loss: false,
            rollback_difficulty: RollbackDifficulty::Easy,
        }
    }

    pub fn data_loss(difficulty: RollbackDifficulty) -> Self {
        Self {
            lock_duration_secs: None,
            downtime: false,
            data_loss: true,
            rollback_difficulty: difficulty,
        }
    }
}

/// One detected risk finding. Immutable; many per statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskCategory {
    /// Stable machine-readable code for CLI consumers
    pub code: String,
    pub kind: RiskKind,
    pub severity: Severity,
    pub description: String,
    pub affected_objects: Vec<String>,
    pub impact: RiskImpact,
}

/// Aggregate verdict level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Classify a 0-100 risk score under the given policy thresholds.
    pub fn from_score(score: f64, policy: &ScoringPolicy) -> Self {
        if score >= policy.critical_threshold {
            RiskLevel::Critical
        } else if score >= policy.high_threshold {
            RiskLevel::High
        } else if score >= policy.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Aggregate verdict for one migration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub id: Uuid,
    pub risk_level: RiskLevel,
    /// 0-100, higher is riskier; deterministic in (sql, metadata)
    pub risk_score: f64,
    pub categories: Vec<RiskCategory>,
    /// Deduplicated, in first-seen order
    pub mitigations: Vec<String>,
    pub warnings: Vec<String>,
    pub blockers: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

/// Compute the blended risk score for a set of findings.
pub fn score_categories(categories: &[RiskCategory], policy: &ScoringPolicy) -> f64 {
    let scores: Vec<f64> = categories
        .iter()
        .map(|c| policy.category_score(c.severity, c.kind))
        .collect();
    policy.blend(&scores)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(kind: RiskKind, severity: Severity) -> RiskCategory {
        RiskCategory {
            code: "TEST".to_string(),
            kind,
            severity,
            description: String::new(),
            affected_objects: vec![],
            impact: RiskImpact::lock(0),
        }
    }

    #[test]
    fn test_score_bounds() {
        let policy = ScoringPolicy::default();
        assert_eq!(score_categories(&[], &policy), 0.0);

        let worst: Vec<RiskCategory> = (0..20)
            .map(|_| category(RiskKind::Destructive, Severity::Critical))
            .collect();
        let score = score_categories(&worst, &policy);
        assert!(score <= 100.0);
        assert!(score > 0.0);
    }

    #[test]
    fn test_adding_critical_category_never_decreases_score() {
        let policy = ScoringPolicy::default();
        let mut categories = vec![
            category(RiskKind::Blocking, Severity::Medium),
            category(RiskKind::Constraint, Severity::Low),
        ];
        let before = score_categories(&categories, &policy);
        categories.push(category(RiskKind::Destructive, Severity::Critical));
        let after = score_categories(&categories, &policy);
        assert!(after >= before);
    }

    #[test]
    fn test_level_thresholds() {
        let policy = ScoringPolicy::default();
        assert_eq!(RiskLevel::from_score(85.0, &policy), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(65.0, &policy), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(35.0, &policy), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(5.0, &policy), RiskLevel::Low);
    }
}
