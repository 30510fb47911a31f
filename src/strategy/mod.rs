//! Safe execution strategy types
//!
//! The generator rewrites a risky migration into an ordered multi-step plan
//! with per-step failure policy, a derived rollback plan, guard checks and
//! maintenance-window guidance.

pub mod generator;
pub mod rollback;

pub use generator::StrategyGenerator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::risk::RiskLevel;

/// What the executor should do when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureAction {
    /// Halt; earlier steps stay applied
    Stop,
    /// Halt and run the rollback plan
    Rollback,
    /// Log and keep going
    Continue,
}

/// One safer rewritten action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancementStep {
    /// 1-based, contiguous
    pub step_number: usize,
    /// Stable label other steps reference in `dependencies`
    pub label: String,
    pub description: String,
    pub sql: String,
    pub risk_level: RiskLevel,
    pub estimated_duration_secs: u64,
    pub can_rollback: bool,
    /// Labels of earlier steps this one requires
    pub dependencies: Vec<String>,
    pub validation_queries: Vec<String>,
    pub on_failure: FailureAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackComplexity {
    Simple,
    Complex,
    Impossible,
}

/// Reverse-execution plan derived from the forward steps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackStrategy {
    pub can_rollback: bool,
    /// Reverse order: the last forward step's inverse comes first
    pub rollback_steps: Vec<String>,
    pub data_backup_required: bool,
    pub rollback_complexity: RollbackComplexity,
    pub rollback_window_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckFailureAction {
    /// Abort the migration before it starts
    Block,
    /// Surface and continue
    Warn,
}

/// Guard condition evaluated before execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreFlightCheck {
    pub check_name: String,
    pub query: String,
    pub expected: String,
    pub on_failure: CheckFailureAction,
}

/// Assertion evaluated after execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationStep {
    pub step_name: String,
    pub query: String,
    pub expected_condition: String,
    pub required: bool,
}

/// Scheduling guidance computed from the full plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceWindow {
    pub recommended: bool,
    pub minimum_duration_secs: u64,
    pub optimal_duration_secs: u64,
    pub considerations: Vec<String>,
}

/// Top-level generator output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancementStrategy {
    pub id: Uuid,
    pub original_sql: String,
    pub enhanced_steps: Vec<EnhancementStep>,
    pub rollback_strategy: RollbackStrategy,
    pub pre_flight_checks: Vec<PreFlightCheck>,
    pub post_migration_validation: Vec<ValidationStep>,
    pub estimated_duration_secs: u64,
    pub maintenance_window: MaintenanceWindow,
    /// Cross-statement ordering constraints, human-readable
    pub dependencies: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl EnhancementStrategy {
    /// The rewritten forward SQL, steps joined in order.
    pub fn enhanced_sql(&self) -> String {
        self.enhanced_steps
            .iter()
            .map(|s| format!("-- Step {}: {}\n{}", s.step_number, s.description, s.sql))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// The reverse SQL from the rollback plan.
    pub fn rollback_sql(&self) -> String {
        self.rollback_strategy.rollback_steps.join("\n")
    }
}
