//! Statement parsing and classification
//!
//! Turns raw SQL text into typed [`Operation`] records. The grammar-driven
//! path (`classify`) is primary; the regex path (`fallback`) is an explicit
//! best-effort fallback for dialect corners the grammar rejects. Both paths
//! are total - a statement always classifies, possibly as `Unknown`.

pub mod classify;
pub mod fallback;
pub mod split;

pub use classify::classify_statement;
pub use split::{scan_migration, split_statements, MigrationScan};

use serde::{Deserialize, Serialize};

use crate::risk::patterns;

/// Target SQL dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    Postgresql,
    Mysql,
    Sqlite,
}

impl Default for SqlDialect {
    fn default() -> Self {
        SqlDialect::Postgresql
    }
}

/// Statement classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateTable,
    AlterTable,
    DropTable,
    CreateIndex,
    DropIndex,
    Insert,
    Update,
    Delete,
    Select,
    Unknown,
}

/// Which path produced the classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationPath {
    /// Parsed by the SQL grammar
    Grammar,
    /// Keyword/regex best-effort fallback (degraded confidence)
    Fallback,
}

/// Coarse wall-clock bucket for one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationBucket {
    Fast,
    Medium,
    Slow,
}

/// Behavioral flags derived from the statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationFlags {
    pub is_blocking: bool,
    pub is_destructive: bool,
    pub affects_data: bool,
    pub requires_lock: bool,
}

/// One classified SQL statement. Read-only after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub kind: OperationKind,
    pub sql: String,
    pub table_name: Option<String>,
    pub index_name: Option<String>,
    pub flags: OperationFlags,
    pub duration: DurationBucket,
    pub classified_by: ClassificationPath,
}

impl Operation {
    /// Derive flags and duration bucket for a classified statement.
    pub(crate) fn profile(kind: OperationKind, sql: &str) -> (OperationFlags, DurationBucket) {
        let concurrent = patterns::is_concurrent_index(sql);
        match kind {
            OperationKind::CreateTable => (
                OperationFlags {
                    requires_lock: true,
                    ..Default::default()
                },
                DurationBucket::Fast,
            ),
            OperationKind::AlterTable => {
                let destructive = patterns::DROP_COLUMN.is_match(sql);
                (
                    OperationFlags {
                        is_blocking: true,
                        is_destructive: destructive,
                        affects_data: destructive,
                        requires_lock: true,
                    },
                    if patterns::is_table_rewrite(sql) {
                        DurationBucket::Slow
                    } else {
                        DurationBucket::Medium
                    },
                )
            }
            OperationKind::DropTable => (
                OperationFlags {
                    is_blocking: true,
                    is_destructive: true,
                    affects_data: true,
                    requires_lock: true,
                },
                DurationBucket::Fast,
            ),
            OperationKind::CreateIndex => (
                OperationFlags {
                    is_blocking: !concurrent,
                    requires_lock: !concurrent,
                    ..Default::default()
                },
                DurationBucket::Slow,
            ),
            OperationKind::DropIndex => (
                OperationFlags {
                    is_blocking: !concurrent,
                    is_destructive: true,
                    requires_lock: !concurrent,
                    ..Default::default()
                },
                DurationBucket::Fast,
            ),
            OperationKind::Insert => (
                OperationFlags {
                    affects_data: true,
                    ..Default::default()
                },
                DurationBucket::Medium,
            ),
            OperationKind::Update | OperationKind::Delete => (
                OperationFlags {
                    is_destructive: kind == OperationKind::Delete,
                    affects_data: true,
                    ..Default::default()
                },
                DurationBucket::Medium,
            ),
            OperationKind::Select => (OperationFlags::default(), DurationBucket::Fast),
            OperationKind::Unknown => (OperationFlags::default(), DurationBucket::Medium),
        }
    }
}
