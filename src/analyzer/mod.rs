//! Structural and dependency analysis
//!
//! Consumes the ordered operations of one migration and produces the
//! per-operation profiles, the dependency edge set and the per-migration
//! aggregate: overall complexity, total estimated time, risk factors and
//! ordered recommendations.

pub mod dependency;
pub mod structure;

pub use dependency::{analyze_dependencies, DependencyEdge};
pub use structure::{
    classify_alter_action, profile_operation, AlterAction, ColumnInfo, Complexity, ConstraintInfo,
    ConstraintKind, LockScope, OperationProfile,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::parser::{Operation, SqlDialect};
use crate::risk::patterns;

/// Aggregate structural analysis of one migration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationAnalysis {
    pub overall_complexity: Complexity,
    pub total_estimated_secs: f64,
    pub operations: Vec<OperationProfile>,
    pub dependencies: Vec<DependencyEdge>,
    /// Human-readable factors driving the complexity grade
    pub risk_factors: Vec<String>,
    /// Ordered, highest-leverage first
    pub recommendations: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

/// Analyzer over the classified operations of one migration
pub struct StructureAnalyzer {
    dialect: SqlDialect,
}

impl StructureAnalyzer {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    /// Run the full structural analysis.
    pub fn analyze(&self, operations: &[Operation]) -> MigrationAnalysis {
        let profiles: Vec<OperationProfile> = operations
            .iter()
            .enumerate()
            .map(|(index, op)| profile_operation(index, op, self.dialect))
            .collect();

        let dependencies = analyze_dependencies(operations, &profiles);

        let total_estimated_secs = profiles.iter().map(|p| p.estimated_secs).sum();
        let overall_complexity = if profiles.is_empty() {
            Complexity::Low
        } else {
            let avg = profiles
                .iter()
                .map(|p| p.complexity.score() as f64)
                .sum::<f64>()
                / profiles.len() as f64;
            Complexity::from_average(avg)
        };

        let risk_factors = self.risk_factors(operations, &profiles);
        let recommendations = self.recommendations(operations, &profiles, &dependencies);

        info!(
            complexity = ?overall_complexity,
            operations = profiles.len(),
            dependencies = dependencies.len(),
            "structural analysis complete"
        );

        MigrationAnalysis {
            overall_complexity,
            total_estimated_secs,
            operations: profiles,
            dependencies,
            risk_factors,
            recommendations,
            analyzed_at: Utc::now(),
        }
    }

    fn risk_factors(&self, operations: &[Operation], profiles: &[OperationProfile]) -> Vec<String> {
        let mut factors = Vec::new();

        let destructive = operations.iter().filter(|o| o.flags.is_destructive).count();
        if destructive > 0 {
            factors.push(format!(
                "{destructive} destructive operation(s) that can permanently remove data"
            ));
        }

        let blocking = operations.iter().filter(|o| o.flags.is_blocking).count();
        if blocking > 0 {
            factors.push(format!(
                "{blocking} blocking operation(s) that hold locks against concurrent traffic"
            ));
        }

        let critical = profiles
            .iter()
            .filter(|p| p.complexity == Complexity::Critical)
            .count();
        if critical > 0 {
            factors.push(format!(
                "{critical} critical-complexity operation(s) such as column type changes"
            ));
        }

        let long_running = profiles.iter().filter(|p| p.estimated_secs > 60.0).count();
        if long_running > 0 {
            factors.push(format!(
                "{long_running} operation(s) estimated to run longer than a minute"
            ));
        }

        factors
    }

    fn recommendations(
        &self,
        operations: &[Operation],
        profiles: &[OperationProfile],
        dependencies: &[DependencyEdge],
    ) -> Vec<String> {
        let mut recommendations = Vec::new();

        if operations
            .iter()
            .any(|o| patterns::is_blocking_index_creation(&o.sql))
        {
            recommendations.push(
                "Use CREATE INDEX CONCURRENTLY so index builds do not block writes".to_string(),
            );
        }

        if operations.len() > 5 {
            recommendations.push(
                "Break this migration into smaller batches executed independently".to_string(),
            );
        }

        if operations.iter().any(|o| o.flags.is_destructive) {
            recommendations
                .push("Back up affected tables before running destructive steps".to_string());
        }

        if !dependencies.is_empty() {
            recommendations.push(
                "Execute statements in dependency order; reordering will fail on missing tables"
                    .to_string(),
            );
        }

        if profiles
            .iter()
            .any(|p| p.complexity >= Complexity::High && p.lock_scope == LockScope::Table)
        {
            recommendations
                .push("Schedule table-locking steps inside a maintenance window".to_string());
        }

        recommendations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::scan_migration;
    use pretty_assertions::assert_eq;

    fn analyze(sql: &str) -> MigrationAnalysis {
        let scan = scan_migration(sql, SqlDialect::Postgresql);
        StructureAnalyzer::new(SqlDialect::Postgresql).analyze(&scan.operations)
    }

    #[test]
    fn test_fk_dependency_on_created_table() {
        let analysis = analyze(
            "CREATE TABLE parent(id INT PRIMARY KEY); \
             ALTER TABLE child ADD CONSTRAINT fk FOREIGN KEY(parent_id) REFERENCES parent(id);",
        );
        assert!(analysis
            .dependencies
            .iter()
            .any(|e| e.from_index == 1 && e.to_index == 0));
    }

    #[test]
    fn test_index_depends_on_create_table() {
        let analysis = analyze(
            "CREATE TABLE events(id INT); CREATE INDEX idx_events ON events(id);",
        );
        assert_eq!(analysis.dependencies.len(), 1);
        assert_eq!(analysis.dependencies[0].from_index, 1);
        assert_eq!(analysis.dependencies[0].to_index, 0);
    }

    #[test]
    fn test_overall_complexity_from_average() {
        // One critical op (type change) and one low op average to 2.5 => High.
        let analysis = analyze(
            "ALTER TABLE t ALTER COLUMN c TYPE bigint; CREATE TABLE tiny(id INT);",
        );
        assert_eq!(analysis.overall_complexity, Complexity::High);
    }

    #[test]
    fn test_empty_migration_is_low_complexity() {
        let analysis = analyze("");
        assert_eq!(analysis.overall_complexity, Complexity::Low);
        assert!(analysis.operations.is_empty());
    }

    #[test]
    fn test_recommendations_are_ordered_and_relevant() {
        let analysis = analyze(
            "CREATE INDEX idx_a ON big(a); DROP TABLE old_stuff;",
        );
        assert!(analysis.recommendations[0].contains("CONCURRENTLY"));
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.contains("Back up")));
    }
}
