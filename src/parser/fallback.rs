//! Regex fallback classifier
//!
//! Best-effort classification for statements the grammar rejects (vendor
//! extensions, partial statements, malformed input). Must produce an
//! [`Operation`] for any input, with degraded confidence marked via
//! [`ClassificationPath::Fallback`].

use super::{ClassificationPath, Operation, OperationKind};
use crate::risk::patterns;

/// Classify a statement from its keyword shape alone.
pub fn classify(sql: &str) -> Operation {
    let kind = kind_from_keywords(sql);
    let table_name = patterns::extract_table_name(sql);
    let index_name = match kind {
        OperationKind::CreateIndex | OperationKind::DropIndex => {
            patterns::extract_index_name(sql)
        }
        _ => None,
    };
    let (flags, duration) = Operation::profile(kind, sql);

    Operation {
        kind,
        sql: sql.to_string(),
        table_name,
        index_name,
        flags,
        duration,
        classified_by: ClassificationPath::Fallback,
    }
}

fn kind_from_keywords(sql: &str) -> OperationKind {
    let upper = sql.trim().to_uppercase();

    if patterns::CREATE_TABLE.is_match(sql) {
        OperationKind::CreateTable
    } else if patterns::ALTER_TABLE.is_match(sql) {
        OperationKind::AlterTable
    } else if patterns::DROP_TABLE.is_match(sql) {
        OperationKind::DropTable
    } else if patterns::CREATE_INDEX.is_match(sql) {
        OperationKind::CreateIndex
    } else if patterns::DROP_INDEX.is_match(sql) {
        OperationKind::DropIndex
    } else if upper.starts_with("INSERT") {
        OperationKind::Insert
    } else if upper.starts_with("UPDATE") {
        OperationKind::Update
    } else if upper.starts_with("DELETE") || patterns::TRUNCATE_TABLE.is_match(sql) {
        OperationKind::Delete
    } else if upper.starts_with("SELECT") || upper.starts_with("WITH") {
        OperationKind::Select
    } else {
        OperationKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_classification() {
        assert_eq!(
            classify("ALTER TABLE t ADD COLUMN x INT").kind,
            OperationKind::AlterTable
        );
        assert_eq!(
            classify("truncate table audit_log;").kind,
            OperationKind::Delete
        );
        assert_eq!(classify("").kind, OperationKind::Unknown);
    }

    #[test]
    fn test_fallback_extracts_names() {
        let op = classify("CREATE INDEX CONCURRENTLY IF NOT EXISTS idx_a ON big_table (a)");
        assert_eq!(op.kind, OperationKind::CreateIndex);
        assert_eq!(op.index_name.as_deref(), Some("idx_a"));
        assert_eq!(op.table_name.as_deref(), Some("big_table"));
        assert!(!op.flags.is_blocking);
    }
}
