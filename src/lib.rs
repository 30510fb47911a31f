//! SchemaGuard - Migration Safety Engine
//!
//! Analyzes schema-migration SQL for production risk and rewrites it into a
//! safer multi-step execution plan with rollback, pre-flight and post-flight
//! validation - no live database session required.
//!
//! ANALYSIS PIPELINE: raw SQL flows one direction through the engine:
//! - Stage 1 (Parse): statement splitting and grammar-driven classification,
//!   with an explicit regex fallback for dialect corners
//! - Stage 2 (Analyze): column/constraint extraction, inter-operation
//!   dependency graph, per-migration complexity aggregate
//! - Stage 3 (Detect): five risk rule families scored through one canonical
//!   policy into a `RiskAssessment`
//! - Stage 4 (Rewrite): multi-step safe strategy with rollback plan, guard
//!   checks and maintenance-window guidance
//!
//! The CLI surface, ORM detection, file I/O and live introspection are host
//! concerns; this crate exchanges in-memory values only and every analysis
//! entry point is total - malformed SQL degrades, it never throws.

pub mod analyzer;
pub mod config;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod migration;
pub mod parser;
pub mod risk;
pub mod strategy;
pub mod telemetry;

pub use config::ScoringPolicy;
pub use engine::{
    ApplyOutcome, EnhancedMigration, EnhancedSql, EnhancementEngine, EnhancementModule,
    ModuleAnalysis, ModuleCategory, ModuleMetadata, ModuleRegistry,
};
pub use error::{EngineError, EngineResult};
pub use metadata::TableMetadata;
pub use migration::MigrationFile;
pub use parser::{scan_migration, Operation, OperationKind, SqlDialect};
pub use risk::{RiskAssessment, RiskCategory, RiskDetector, RiskKind, RiskLevel, Severity};
pub use strategy::{EnhancementStep, EnhancementStrategy, RollbackStrategy, StrategyGenerator};
pub use telemetry::init_tracing;
