//! Built-in enhancement modules
//!
//! Two small rules exercising the detect/analyze/apply contract: wrapping a
//! multi-statement migration in a transaction, and forcing a backup ahead of
//! DROP TABLE. Both are written to be idempotent: `detect` returns false on
//! content they have already enhanced.

use chrono::Utc;

use super::module::{EnhancementModule, ModuleAnalysis, ModuleCategory, ModuleMetadata};
use crate::migration::MigrationFile;
use crate::parser::split_statements;
use crate::risk::patterns;

/// Wraps multi-statement migrations in BEGIN/COMMIT so a mid-migration
/// failure leaves nothing half-applied.
pub struct TransactionWrapper {
    metadata: ModuleMetadata,
}

impl TransactionWrapper {
    pub fn new() -> Self {
        Self {
            metadata: ModuleMetadata {
                id: "transaction-wrapper".to_string(),
                name: "Transaction Wrapper".to_string(),
                description: "Wrap multi-statement migrations in a transaction".to_string(),
                category: ModuleCategory::Safety,
                priority: 90,
                requires_confirmation: false,
            },
        }
    }

    fn already_wrapped(content: &str) -> bool {
        content.trim_start().to_uppercase().starts_with("BEGIN")
    }
}

impl Default for TransactionWrapper {
    fn default() -> Self {
        Self::new()
    }
}

impl EnhancementModule for TransactionWrapper {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn detect(&self, migration: &MigrationFile) -> anyhow::Result<bool> {
        let content = &migration.up_sql;
        if Self::already_wrapped(content) {
            return Ok(false);
        }
        // CREATE INDEX CONCURRENTLY cannot run inside a transaction block.
        if patterns::CONCURRENTLY.is_match(content) {
            return Ok(false);
        }
        Ok(split_statements(content).len() > 1)
    }

    fn analyze(&self, migration: &MigrationFile) -> anyhow::Result<ModuleAnalysis> {
        let applicable = self.detect(migration)?;
        Ok(ModuleAnalysis {
            module_id: self.metadata.id.clone(),
            applicable,
            summary: if applicable {
                format!(
                    "{} statements will be wrapped in a single transaction",
                    split_statements(&migration.up_sql).len()
                )
            } else {
                "Migration is already transactional or cannot be wrapped".to_string()
            },
            details: vec![],
        })
    }

    fn apply(&self, content: &str, _migration: &MigrationFile) -> anyhow::Result<String> {
        if Self::already_wrapped(content) || patterns::CONCURRENTLY.is_match(content) {
            return Ok(content.to_string());
        }
        Ok(format!("BEGIN;\n\n{}\n\nCOMMIT;\n", content.trim_end()))
    }
}

/// Inserts a timestamped backup ahead of every DROP TABLE.
pub struct DropTableSafeguard {
    metadata: ModuleMetadata,
}

impl DropTableSafeguard {
    pub fn new() -> Self {
        Self {
            metadata: ModuleMetadata {
                id: "drop-table-safeguard".to_string(),
                name: "Drop Table Safeguard".to_string(),
                description: "Create a backup table before any DROP TABLE".to_string(),
                category: ModuleCategory::Safety,
                priority: 80,
                requires_confirmation: true,
            },
        }
    }
}

impl Default for DropTableSafeguard {
    fn default() -> Self {
        Self::new()
    }
}

impl EnhancementModule for DropTableSafeguard {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn detect(&self, migration: &MigrationFile) -> anyhow::Result<bool> {
        let content = &migration.up_sql;
        Ok(patterns::DROP_TABLE.is_match(content) && !content.contains("_backup_"))
    }

    fn analyze(&self, migration: &MigrationFile) -> anyhow::Result<ModuleAnalysis> {
        let applicable = self.detect(migration)?;
        let targets: Vec<String> = split_statements(&migration.up_sql)
            .iter()
            .filter(|s| patterns::DROP_TABLE.is_match(s))
            .filter_map(|s| patterns::extract_table_name(s))
            .collect();
        Ok(ModuleAnalysis {
            module_id: self.metadata.id.clone(),
            applicable,
            summary: if applicable {
                format!("{} table(s) will be backed up before dropping", targets.len())
            } else {
                "No unprotected DROP TABLE statements found".to_string()
            },
            details: targets,
        })
    }

    fn apply(&self, content: &str, _migration: &MigrationFile) -> anyhow::Result<String> {
        if content.contains("_backup_") {
            return Ok(content.to_string());
        }
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let mut out = Vec::new();
        for statement in split_statements(content) {
            if patterns::DROP_TABLE.is_match(&statement) {
                if let Some(table) = patterns::extract_table_name(&statement) {
                    out.push(format!(
                        "CREATE TABLE {table}_backup_{stamp} AS SELECT * FROM {table};"
                    ));
                }
            }
            let trimmed = statement.trim().to_string();
            if trimmed.ends_with(';') {
                out.push(trimmed);
            } else {
                out.push(format!("{trimmed};"));
            }
        }
        Ok(out.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn migration(up: &str) -> MigrationFile {
        MigrationFile::new("migrations/001.sql", "001_test", up)
    }

    #[test]
    fn test_transaction_wrapper_detects_multi_statement() {
        let module = TransactionWrapper::new();
        assert!(module
            .detect(&migration("CREATE TABLE a(id INT); CREATE TABLE b(id INT);"))
            .unwrap());
        assert!(!module.detect(&migration("CREATE TABLE a(id INT);")).unwrap());
        assert!(!module
            .detect(&migration(
                "CREATE INDEX CONCURRENTLY i ON a(x); DROP INDEX j;"
            ))
            .unwrap());
    }

    #[test]
    fn test_transaction_wrapper_apply_is_idempotent() {
        let module = TransactionWrapper::new();
        let m = migration("CREATE TABLE a(id INT); CREATE TABLE b(id INT);");
        let once = module.apply(&m.up_sql, &m).unwrap();
        assert!(once.starts_with("BEGIN;"));
        assert!(once.trim_end().ends_with("COMMIT;"));

        let wrapped = m.with_up_sql(once.clone());
        assert!(!module.detect(&wrapped).unwrap());
        let twice = module.apply(&once, &wrapped).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_drop_safeguard_inserts_backup_before_drop() {
        let module = DropTableSafeguard::new();
        let m = migration("DROP TABLE sessions;");
        assert!(module.detect(&m).unwrap());

        let applied = module.apply(&m.up_sql, &m).unwrap();
        let backup_pos = applied.find("CREATE TABLE sessions_backup_").unwrap();
        let drop_pos = applied.find("DROP TABLE sessions").unwrap();
        assert!(backup_pos < drop_pos);
    }

    #[test]
    fn test_drop_safeguard_is_idempotent() {
        let module = DropTableSafeguard::new();
        let m = migration("DROP TABLE sessions;");
        let once = module.apply(&m.up_sql, &m).unwrap();

        let enhanced = m.with_up_sql(once.clone());
        assert!(!module.detect(&enhanced).unwrap());
        let twice = module.apply(&once, &enhanced).unwrap();
        assert_eq!(once, twice);
    }
}
