//! Rollback derivation and guard checks
//!
//! The rollback plan is derived by walking the forward steps in reverse and
//! emitting the inverse of each recognized action. The first non-reversible
//! step renders the whole plan non-rollbackable and halts emission. Step
//! types without a known inverse get a manual-rollback comment instead of
//! failing generation.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{
    CheckFailureAction, EnhancementStep, PreFlightCheck, RollbackComplexity, RollbackStrategy,
    ValidationStep,
};
use crate::parser::SqlDialect;
use crate::risk::patterns;

static ALTERED_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\bALTER\s+COLUMN\s+(\S+)").expect("invalid pattern"));

static BACKUP_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^\s*CREATE\s+TABLE\s+(\S+)\s+AS\s+SELECT").expect("invalid pattern"));

enum Inverse {
    Sql(String),
    Manual(String),
    None,
}

/// Derive the reverse-execution plan from the forward steps.
pub fn derive_rollback(steps: &[EnhancementStep], dialect: SqlDialect) -> RollbackStrategy {
    let mut rollback_steps = Vec::new();
    let mut can_rollback = true;
    let mut has_manual = false;
    let mut window_secs = 0u64;

    for step in steps.iter().rev() {
        if !step.can_rollback {
            can_rollback = false;
            break;
        }
        match inverse_of(step, dialect) {
            Inverse::Sql(sql) => {
                window_secs += step.estimated_duration_secs;
                rollback_steps.push(sql);
            }
            Inverse::Manual(comment) => {
                has_manual = true;
                rollback_steps.push(comment);
            }
            Inverse::None => {}
        }
    }

    let data_backup_required = steps.iter().any(|s| {
        !s.can_rollback || BACKUP_TABLE.is_match(&s.sql)
    });

    let rollback_complexity = if !can_rollback {
        RollbackComplexity::Impossible
    } else if has_manual || rollback_steps.len() > 3 {
        RollbackComplexity::Complex
    } else {
        RollbackComplexity::Simple
    };

    RollbackStrategy {
        can_rollback,
        rollback_steps,
        data_backup_required,
        rollback_complexity,
        rollback_window_secs: window_secs,
    }
}

fn inverse_of(step: &EnhancementStep, dialect: SqlDialect) -> Inverse {
    let sql = &step.sql;

    // Backup tables created by earlier steps are cleaned up on rollback.
    if let Some(caps) = BACKUP_TABLE.captures(sql) {
        return Inverse::Sql(format!("DROP TABLE {};", caps[1].trim_end_matches(';')));
    }

    if patterns::SET_NOT_NULL.is_match(sql) {
        let table = patterns::extract_table_name(sql).unwrap_or_default();
        let column = ALTERED_COLUMN
            .captures(sql)
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        return Inverse::Sql(format!(
            "ALTER TABLE {table} ALTER COLUMN {column} DROP NOT NULL;"
        ));
    }

    if patterns::ALTER_TABLE.is_match(sql) && patterns::adds_column(sql) {
        let table = patterns::extract_table_name(sql).unwrap_or_default();
        let column = patterns::extract_added_column(sql).unwrap_or_default();
        return Inverse::Sql(format!("ALTER TABLE {table} DROP COLUMN {column};"));
    }

    if patterns::ADD_CONSTRAINT.is_match(sql) {
        let table = patterns::extract_table_name(sql).unwrap_or_default();
        let constraint = patterns::extract_constraint_name(sql).unwrap_or_default();
        return Inverse::Sql(format!("ALTER TABLE {table} DROP CONSTRAINT {constraint};"));
    }

    if patterns::CREATE_INDEX.is_match(sql) {
        let index = patterns::extract_index_name(sql).unwrap_or_default();
        return match dialect {
            SqlDialect::Mysql => {
                let table = patterns::extract_table_name(sql).unwrap_or_default();
                Inverse::Sql(format!("DROP INDEX {index} ON {table};"))
            }
            _ => Inverse::Sql(format!("DROP INDEX IF EXISTS {index};")),
        };
    }

    if patterns::CREATE_TABLE.is_match(sql) {
        let table = patterns::extract_table_name(sql).unwrap_or_default();
        return Inverse::Sql(format!("DROP TABLE IF EXISTS {table};"));
    }

    // Verification SELECTs need no inverse.
    if sql.trim_start().to_uppercase().starts_with("SELECT") {
        return Inverse::None;
    }

    Inverse::Manual(format!(
        "-- Manual rollback required for step {} ({})",
        step.step_number, step.description
    ))
}

/// Pre-flight guards: a blocking existence check for every ALTER TABLE
/// target, plus advisory disk-space and connection checks.
pub fn pre_flight_checks(statements: &[String]) -> Vec<PreFlightCheck> {
    let mut checks = Vec::new();
    let mut seen_tables = Vec::new();

    for statement in statements {
        if !patterns::ALTER_TABLE.is_match(statement) {
            continue;
        }
        let Some(table) = patterns::extract_table_name(statement) else {
            continue;
        };
        if seen_tables.contains(&table) {
            continue;
        }
        checks.push(PreFlightCheck {
            check_name: format!("table_exists_{table}"),
            query: format!(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = '{table}';"
            ),
            expected: "1".to_string(),
            on_failure: CheckFailureAction::Block,
        });
        seen_tables.push(table);
    }

    checks.push(PreFlightCheck {
        check_name: "sufficient_disk_space".to_string(),
        query: "SELECT pg_size_pretty(pg_database_size(current_database()));".to_string(),
        expected: "at least 2x the affected tables' size free".to_string(),
        on_failure: CheckFailureAction::Warn,
    });
    checks.push(PreFlightCheck {
        check_name: "low_active_connections".to_string(),
        query: "SELECT COUNT(*) FROM pg_stat_activity WHERE state = 'active';".to_string(),
        expected: "below normal peak traffic".to_string(),
        on_failure: CheckFailureAction::Warn,
    });

    checks
}

/// Post-flight assertions mirroring the forward steps' structural effects.
pub fn post_migration_validation(steps: &[EnhancementStep]) -> Vec<ValidationStep> {
    let mut validations = Vec::new();

    for step in steps {
        let sql = &step.sql;

        if patterns::SET_NOT_NULL.is_match(sql) {
            let table = patterns::extract_table_name(sql).unwrap_or_default();
            let column = ALTERED_COLUMN
                .captures(sql)
                .map(|c| c[1].to_string())
                .unwrap_or_default();
            validations.push(ValidationStep {
                step_name: format!("column_is_not_null_{table}_{column}"),
                query: format!(
                    "SELECT is_nullable FROM information_schema.columns \
                     WHERE table_name = '{table}' AND column_name = '{column}';"
                ),
                expected_condition: "is_nullable = 'NO'".to_string(),
                required: true,
            });
        } else if patterns::ALTER_TABLE.is_match(sql) && patterns::adds_column(sql) {
            let table = patterns::extract_table_name(sql).unwrap_or_default();
            let column = patterns::extract_added_column(sql).unwrap_or_default();
            validations.push(ValidationStep {
                step_name: format!("column_exists_{table}_{column}"),
                query: format!(
                    "SELECT COUNT(*) FROM information_schema.columns \
                     WHERE table_name = '{table}' AND column_name = '{column}';"
                ),
                expected_condition: "count = 1".to_string(),
                required: true,
            });
        } else if patterns::ADD_CONSTRAINT.is_match(sql) {
            let table = patterns::extract_table_name(sql).unwrap_or_default();
            let constraint = patterns::extract_constraint_name(sql).unwrap_or_default();
            validations.push(ValidationStep {
                step_name: format!("constraint_exists_{constraint}"),
                query: format!(
                    "SELECT COUNT(*) FROM information_schema.table_constraints \
                     WHERE table_name = '{table}' AND constraint_name = '{constraint}';"
                ),
                expected_condition: "count = 1".to_string(),
                required: true,
            });
        } else if patterns::CREATE_INDEX.is_match(sql) {
            let index = patterns::extract_index_name(sql).unwrap_or_default();
            validations.push(ValidationStep {
                step_name: format!("index_exists_{index}"),
                query: format!("SELECT COUNT(*) FROM pg_indexes WHERE indexname = '{index}';"),
                expected_condition: "count = 1".to_string(),
                required: true,
            });
        } else if patterns::DROP_TABLE.is_match(sql) {
            let table = patterns::extract_table_name(sql).unwrap_or_default();
            validations.push(ValidationStep {
                step_name: format!("table_dropped_{table}"),
                query: format!(
                    "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = '{table}';"
                ),
                expected_condition: "count = 0".to_string(),
                required: true,
            });
        }
    }

    validations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyGenerator;
    use pretty_assertions::assert_eq;

    fn generate(sql: &str) -> crate::strategy::EnhancementStrategy {
        StrategyGenerator::new(SqlDialect::Postgresql).generate(sql, None)
    }

    #[test]
    fn test_add_column_rollback_is_drop_column() {
        let strategy =
            generate("ALTER TABLE users ADD COLUMN email VARCHAR(255) NOT NULL;");
        assert!(strategy.rollback_strategy.can_rollback);
        assert!(strategy
            .rollback_strategy
            .rollback_steps
            .contains(&"ALTER TABLE users DROP COLUMN email;".to_string()));
        // Reverse order: the SET NOT NULL inverse comes before the column drop.
        let steps = &strategy.rollback_strategy.rollback_steps;
        let drop_not_null = steps
            .iter()
            .position(|s| s.contains("DROP NOT NULL"))
            .expect("inverse of SET NOT NULL");
        let drop_column = steps
            .iter()
            .position(|s| s.contains("DROP COLUMN"))
            .expect("inverse of ADD COLUMN");
        assert!(drop_not_null < drop_column);
    }

    #[test]
    fn test_irreversible_step_poisons_rollback() {
        let strategy = generate("DROP TABLE sessions;");
        assert!(!strategy.rollback_strategy.can_rollback);
        assert_eq!(
            strategy.rollback_strategy.rollback_complexity,
            RollbackComplexity::Impossible
        );
        assert!(strategy.rollback_strategy.data_backup_required);
    }

    #[test]
    fn test_rollback_soundness_invariant() {
        // Any plan with a non-rollbackable step must be IMPOSSIBLE overall.
        for sql in [
            "DROP TABLE a;",
            "ALTER TABLE t DROP COLUMN c;",
            "ALTER TABLE users ADD COLUMN email TEXT NOT NULL; DROP TABLE b;",
        ] {
            let strategy = generate(sql);
            if strategy.enhanced_steps.iter().any(|s| !s.can_rollback) {
                assert!(!strategy.rollback_strategy.can_rollback, "for {sql}");
                assert_eq!(
                    strategy.rollback_strategy.rollback_complexity,
                    RollbackComplexity::Impossible,
                    "for {sql}"
                );
            }
        }
    }

    #[test]
    fn test_index_rollback_drops_index() {
        let strategy = generate("CREATE INDEX idx_users_email ON users(email);");
        assert!(strategy
            .rollback_strategy
            .rollback_steps
            .iter()
            .any(|s| s.contains("DROP INDEX IF EXISTS idx_users_email")));
    }

    #[test]
    fn test_preflight_has_existence_check_and_advisories() {
        let strategy =
            generate("ALTER TABLE users ADD COLUMN email VARCHAR(255) NOT NULL;");
        let checks = &strategy.pre_flight_checks;
        let existence = checks
            .iter()
            .find(|c| c.check_name == "table_exists_users")
            .expect("existence check");
        assert_eq!(existence.on_failure, CheckFailureAction::Block);
        assert_eq!(
            checks
                .iter()
                .filter(|c| c.on_failure == CheckFailureAction::Warn)
                .count(),
            2
        );
    }

    #[test]
    fn test_post_validation_mirrors_steps() {
        let strategy =
            generate("ALTER TABLE users ADD COLUMN email VARCHAR(255) NOT NULL;");
        let names: Vec<_> = strategy
            .post_migration_validation
            .iter()
            .map(|v| v.step_name.as_str())
            .collect();
        assert!(names.contains(&"column_exists_users_email"));
        assert!(names.contains(&"column_is_not_null_users_email"));
    }
}
