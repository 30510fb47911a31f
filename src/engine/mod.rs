//! Enhancement engine
//!
//! Orchestrates the risk detector and the strategy generator into one
//! `enhance()` call, memoized by a SHA-256 content hash, and hosts the
//! registry of pluggable enhancement modules with the detect/analyze/apply
//! pipeline.

pub mod module;
pub mod modules;

pub use module::{
    EnhancementModule, ModuleAnalysis, ModuleCategory, ModuleMetadata, ModuleRegistry,
};
pub use modules::{DropTableSafeguard, TransactionWrapper};

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ScoringPolicy;
use crate::error::{EngineError, EngineResult};
use crate::metadata::TableMetadata;
use crate::migration::MigrationFile;
use crate::parser::SqlDialect;
use crate::risk::{RiskAssessment, RiskDetector};
use crate::strategy::{
    EnhancementStrategy, PreFlightCheck, RollbackStrategy, StrategyGenerator, ValidationStep,
};

/// The rewritten migration surfaces
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedSql {
    pub up: String,
    pub down: String,
    pub pre_flight_checks: Vec<PreFlightCheck>,
    pub post_migration_validation: Vec<ValidationStep>,
    pub rollback_strategy: RollbackStrategy,
}

/// Aggregate result of enhancing one migration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedMigration {
    pub id: Uuid,
    pub original: MigrationFile,
    pub enhanced: EnhancedSql,
    pub strategy: EnhancementStrategy,
    pub assessment: RiskAssessment,
    pub estimated_duration_secs: u64,
}

/// Outcome of applying a set of modules to migration content
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub content: String,
    pub applied: Vec<String>,
    pub skipped: Vec<String>,
}

type AnalysisKey = (String, String, usize);

/// The engine. Holds the scoring policy, the module registry and the
/// memoization caches; caches are pure performance layers - clearing them
/// never changes a result.
pub struct EnhancementEngine {
    dialect: SqlDialect,
    policy: ScoringPolicy,
    registry: ModuleRegistry,
    assessment_cache: RwLock<HashMap<String, Arc<RiskAssessment>>>,
    enhanced_cache: RwLock<HashMap<String, Arc<EnhancedMigration>>>,
    analysis_cache: RwLock<HashMap<AnalysisKey, Arc<ModuleAnalysis>>>,
}

impl EnhancementEngine {
    /// Engine with the canonical policy and the built-in safety modules.
    pub fn new(dialect: SqlDialect) -> Self {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(TransactionWrapper::new()));
        registry.register(Arc::new(DropTableSafeguard::new()));
        Self::with_registry(dialect, ScoringPolicy::default(), registry)
    }

    pub fn with_registry(
        dialect: SqlDialect,
        policy: ScoringPolicy,
        registry: ModuleRegistry,
    ) -> Self {
        Self {
            dialect,
            policy,
            registry,
            assessment_cache: RwLock::new(HashMap::new()),
            enhanced_cache: RwLock::new(HashMap::new()),
            analysis_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.registry
    }

    /// Collision-resistant memoization key over migration content.
    fn content_hash(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Risk-assess a migration's forward SQL, memoized by content hash.
    pub async fn assess(
        &self,
        migration: &MigrationFile,
        metadata: Option<&[TableMetadata]>,
    ) -> EngineResult<Arc<RiskAssessment>> {
        let key = Self::content_hash(&migration.up_sql);
        if let Some(hit) = self.assessment_cache.read().await.get(&key) {
            debug!(migration = %migration.name, "assessment cache hit");
            return Ok(hit.clone());
        }

        let policy = self.policy.clone();
        let sql = migration.up_sql.clone();
        let tables = metadata.map(<[TableMetadata]>::to_vec);
        let assessment = tokio::task::spawn_blocking(move || {
            RiskDetector::new(policy).analyze_sql(&sql, tables.as_deref())
        })
        .await
        .map_err(|e| EngineError::Task(e.to_string()))?;

        let assessment = Arc::new(assessment);
        self.assessment_cache
            .write()
            .await
            .insert(key, assessment.clone());
        Ok(assessment)
    }

    /// Run risk detection and strategy generation (in parallel - they share
    /// no state) and assemble the enhanced migration. Repeat calls on
    /// unchanged content are served from the cache.
    pub async fn enhance(
        &self,
        migration: &MigrationFile,
        metadata: Option<&[TableMetadata]>,
    ) -> EngineResult<Arc<EnhancedMigration>> {
        let key = Self::content_hash(&migration.up_sql);
        if let Some(hit) = self.enhanced_cache.read().await.get(&key) {
            debug!(migration = %migration.name, "enhancement cache hit");
            return Ok(hit.clone());
        }

        let policy = self.policy.clone();
        let dialect = self.dialect;
        let sql = migration.up_sql.clone();
        let sql_for_strategy = sql.clone();
        let tables = metadata.map(<[TableMetadata]>::to_vec);
        let tables_for_strategy = tables.clone();

        let detector = tokio::task::spawn_blocking(move || {
            RiskDetector::new(policy).analyze_sql(&sql, tables.as_deref())
        });
        let generator = tokio::task::spawn_blocking(move || {
            StrategyGenerator::new(dialect)
                .generate(&sql_for_strategy, tables_for_strategy.as_deref())
        });

        let (assessment, strategy) = tokio::try_join!(detector, generator)
            .map_err(|e| EngineError::Task(e.to_string()))?;

        let enhanced = EnhancedSql {
            up: strategy.enhanced_sql(),
            down: strategy.rollback_sql(),
            pre_flight_checks: strategy.pre_flight_checks.clone(),
            post_migration_validation: strategy.post_migration_validation.clone(),
            rollback_strategy: strategy.rollback_strategy.clone(),
        };

        let result = Arc::new(EnhancedMigration {
            id: Uuid::new_v4(),
            original: migration.clone(),
            estimated_duration_secs: strategy.estimated_duration_secs,
            enhanced,
            strategy,
            assessment,
        });

        info!(
            migration = %migration.name,
            steps = result.strategy.enhanced_steps.len(),
            risk = ?result.assessment.risk_level,
            "migration enhanced"
        );

        self.enhanced_cache.write().await.insert(key, result.clone());
        Ok(result)
    }

    /// Drop all memoized results. Only ever a performance event.
    pub async fn clear_caches(&self) {
        self.assessment_cache.write().await.clear();
        self.enhanced_cache.write().await.clear();
        self.analysis_cache.write().await.clear();
    }

    /// Run every safety module's `detect` concurrently.
    pub async fn detect_safety(&self, migration: &MigrationFile) -> Vec<ModuleMetadata> {
        self.registry.detect(ModuleCategory::Safety, migration).await
    }

    /// Run every speed module's `detect` concurrently.
    pub async fn detect_speed(&self, migration: &MigrationFile) -> Vec<ModuleMetadata> {
        self.registry.detect(ModuleCategory::Speed, migration).await
    }

    /// A module's analysis of one migration, cached per
    /// `(module id, migration name, content length)`.
    pub async fn enhancement_analysis(
        &self,
        id: &str,
        migration: &MigrationFile,
    ) -> EngineResult<Arc<ModuleAnalysis>> {
        let key: AnalysisKey = (
            id.to_string(),
            migration.name.clone(),
            migration.up_sql.len(),
        );
        if let Some(hit) = self.analysis_cache.read().await.get(&key) {
            return Ok(hit.clone());
        }

        let module = self
            .registry
            .get(id)
            .ok_or_else(|| EngineError::UnknownModule(id.to_string()))?;
        let migration = migration.clone();
        let analysis = tokio::task::spawn_blocking(move || module.analyze(&migration))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))?
            .map_err(|e| EngineError::ModuleFailed {
                id: id.to_string(),
                message: format!("{e:#}"),
            })?;

        let analysis = Arc::new(analysis);
        self.analysis_cache.write().await.insert(key, analysis.clone());
        Ok(analysis)
    }

    /// Apply the requested modules to the content, highest priority first,
    /// threading each applicator's output into the next. Unknown ids and
    /// failing applicators are skipped with a warning; the caller's
    /// migration record is never mutated.
    pub async fn apply_enhancements(
        &self,
        content: &str,
        migration: &MigrationFile,
        ids: &[String],
    ) -> ApplyOutcome {
        let mut selected = Vec::new();
        let mut skipped = Vec::new();

        for id in ids {
            match self.registry.get(id) {
                Some(module) => selected.push(module),
                None => {
                    warn!(module = %id, "unknown enhancement requested, skipping");
                    skipped.push(id.clone());
                }
            }
        }
        selected.sort_by(|a, b| b.metadata().priority.cmp(&a.metadata().priority));

        let mut current = content.to_string();
        let mut applied = Vec::new();

        for module in selected {
            let id = module.metadata().id.clone();
            // Fresh shallow view so the applicator sees prior output without
            // touching the caller's record.
            let view = migration.with_up_sql(current.clone());
            match module.apply(&current, &view) {
                Ok(next) => {
                    current = next;
                    applied.push(id);
                }
                Err(e) => {
                    warn!(module = %id, "applicator failed, skipping: {e:#}");
                    skipped.push(id);
                }
            }
        }

        ApplyOutcome {
            content: current,
            applied,
            skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn migration(up: &str) -> MigrationFile {
        MigrationFile::new("migrations/20240101_test.sql", "20240101_test", up)
    }

    fn engine() -> EnhancementEngine {
        EnhancementEngine::new(SqlDialect::Postgresql)
    }

    #[tokio::test]
    async fn test_enhance_assembles_all_surfaces() {
        let engine = engine();
        let m = migration("ALTER TABLE users ADD COLUMN email VARCHAR(255) NOT NULL;");
        let result = engine.enhance(&m, None).await.unwrap();

        assert_eq!(result.strategy.enhanced_steps.len(), 3);
        assert!(result.enhanced.up.contains("[SPECIFY_DEFAULT_VALUE]"));
        assert!(result
            .enhanced
            .down
            .contains("ALTER TABLE users DROP COLUMN email;"));
        assert!(!result.enhanced.pre_flight_checks.is_empty());
        assert!(result.assessment.risk_score > 0.0);
        assert_eq!(
            result.estimated_duration_secs,
            result.strategy.estimated_duration_secs
        );
    }

    #[tokio::test]
    async fn test_enhance_memoizes_by_content() {
        let engine = engine();
        let m = migration("DROP TABLE sessions;");
        let first = engine.enhance(&m, None).await.unwrap();
        let second = engine.enhance(&m, None).await.unwrap();
        // Same Arc back from the cache.
        assert!(Arc::ptr_eq(&first, &second));

        // Different content misses.
        let other = migration("DROP TABLE audit;");
        let third = engine.enhance(&other, None).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_clearing_caches_never_changes_results() {
        let engine = engine();
        let m = migration("CREATE INDEX idx_a ON users(email);");
        let cached = engine.enhance(&m, None).await.unwrap();
        engine.clear_caches().await;
        let recomputed = engine.enhance(&m, None).await.unwrap();

        assert_eq!(
            cached.strategy.enhanced_steps.len(),
            recomputed.strategy.enhanced_steps.len()
        );
        assert_eq!(cached.enhanced.up, recomputed.enhanced.up);
        assert_eq!(
            cached.assessment.risk_score,
            recomputed.assessment.risk_score
        );
    }

    #[tokio::test]
    async fn test_detect_safety_finds_applicable_modules() {
        let engine = engine();
        let m = migration("DROP TABLE sessions; DROP TABLE logs;");
        let detected = engine.detect_safety(&m).await;
        let ids: Vec<_> = detected.iter().map(|m| m.id.as_str()).collect();
        assert!(ids.contains(&"transaction-wrapper"));
        assert!(ids.contains(&"drop-table-safeguard"));
    }

    #[tokio::test]
    async fn test_apply_enhancements_skips_unknown_ids() {
        let engine = engine();
        let m = migration("DROP TABLE sessions; DROP TABLE logs;");
        let outcome = engine
            .apply_enhancements(
                &m.up_sql,
                &m,
                &[
                    "drop-table-safeguard".to_string(),
                    "does-not-exist".to_string(),
                ],
            )
            .await;
        assert_eq!(outcome.skipped, vec!["does-not-exist".to_string()]);
        assert_eq!(outcome.applied, vec!["drop-table-safeguard".to_string()]);
        assert!(outcome.content.contains("_backup_"));
        // Caller's migration is untouched.
        assert_eq!(m.up_sql, "DROP TABLE sessions; DROP TABLE logs;");
    }

    #[tokio::test]
    async fn test_apply_runs_in_priority_order() {
        let engine = engine();
        let m = migration("DROP TABLE sessions; DROP TABLE logs;");
        let outcome = engine
            .apply_enhancements(
                &m.up_sql,
                &m,
                &[
                    "drop-table-safeguard".to_string(),
                    "transaction-wrapper".to_string(),
                ],
            )
            .await;
        // transaction-wrapper (priority 90) runs before drop-table-safeguard (80),
        // so the safeguard's backup lands inside the transaction body.
        assert_eq!(
            outcome.applied,
            vec![
                "transaction-wrapper".to_string(),
                "drop-table-safeguard".to_string()
            ]
        );
        assert!(outcome.content.contains("BEGIN;"));
    }

    #[tokio::test]
    async fn test_enhancement_analysis_is_cached() {
        let engine = engine();
        let m = migration("DROP TABLE sessions;");
        let first = engine
            .enhancement_analysis("drop-table-safeguard", &m)
            .await
            .unwrap();
        let second = engine
            .enhancement_analysis("drop-table-safeguard", &m)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.applicable);
    }

    #[tokio::test]
    async fn test_unknown_module_analysis_is_an_error() {
        let engine = engine();
        let m = migration("SELECT 1;");
        let err = engine.enhancement_analysis("nope", &m).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownModule(_)));
    }
}
