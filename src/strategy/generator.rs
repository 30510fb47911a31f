//! Strategy generation
//!
//! Dispatches each statement of a migration to a rewrite rule and emits the
//! ordered safe-step plan. Values that require business context (backfill
//! defaults) are emitted as explicit `[SPECIFY_...]` placeholders for a
//! human - never invented.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;
use uuid::Uuid;

use super::rollback::{derive_rollback, post_migration_validation, pre_flight_checks};
use super::{
    EnhancementStep, EnhancementStrategy, FailureAction, MaintenanceWindow,
};
use crate::analyzer::{analyze_dependencies, profile_operation};
use crate::config::LARGE_TABLE_ROWS;
use crate::metadata::{find_table, TableMetadata};
use crate::parser::{split_statements, classify_statement, SqlDialect};
use crate::risk::{patterns, RiskLevel};

static NOT_NULL_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+NOT\s+NULL").expect("invalid pattern"));

static CREATE_INDEX_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)CREATE\s+(UNIQUE\s+)?INDEX\s+").expect("invalid pattern"));

static FK_COLUMNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)FOREIGN\s+KEY\s*\(([^)]+)\)").expect("invalid pattern"));

static REFERENCED_COLUMNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)REFERENCES\s+\S+\s*\(([^)]+)\)").expect("invalid pattern"));

static UNIQUE_COLUMNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)UNIQUE\s*\(([^)]+)\)").expect("invalid pattern"));

/// Human-input placeholder for the backfill value of a new NOT NULL column.
pub const DEFAULT_VALUE_PLACEHOLDER: &str = "[SPECIFY_DEFAULT_VALUE]";

/// The rewrite engine
pub struct StrategyGenerator {
    dialect: SqlDialect,
}

impl StrategyGenerator {
    pub fn new(dialect: SqlDialect) -> Self {
        Self { dialect }
    }

    /// Generate the safe multi-step strategy for one migration's SQL.
    pub fn generate(
        &self,
        sql: &str,
        metadata: Option<&[TableMetadata]>,
    ) -> EnhancementStrategy {
        let statements = split_statements(sql);
        let mut steps: Vec<EnhancementStep> = Vec::new();

        for statement in &statements {
            self.rewrite_statement(statement, metadata, &mut steps);
        }

        let rollback_strategy = derive_rollback(&steps, self.dialect);
        let pre_flight = pre_flight_checks(&statements);
        let post_validation = post_migration_validation(&steps);

        let estimated_duration_secs: u64 =
            steps.iter().map(|s| s.estimated_duration_secs).sum();
        let maintenance_window =
            self.maintenance_window(&steps, &statements, estimated_duration_secs);
        let dependencies = self.statement_dependencies(&statements);

        info!(
            steps = steps.len(),
            duration_secs = estimated_duration_secs,
            window = maintenance_window.recommended,
            "strategy generation complete"
        );

        EnhancementStrategy {
            id: Uuid::new_v4(),
            original_sql: sql.to_string(),
            enhanced_steps: steps,
            rollback_strategy,
            pre_flight_checks: pre_flight,
            post_migration_validation: post_validation,
            estimated_duration_secs,
            maintenance_window,
            dependencies,
            generated_at: Utc::now(),
        }
    }

    fn rewrite_statement(
        &self,
        statement: &str,
        metadata: Option<&[TableMetadata]>,
        steps: &mut Vec<EnhancementStep>,
    ) {
        if patterns::adds_not_null_without_default(statement) {
            self.rewrite_not_null_addition(statement, metadata, steps);
        } else if patterns::ALTER_TABLE.is_match(statement)
            && patterns::DROP_COLUMN.is_match(statement)
        {
            self.rewrite_drop_column(statement, steps);
        } else if patterns::adds_foreign_key(statement) {
            self.rewrite_add_foreign_key(statement, steps);
        } else if patterns::adds_unique_constraint(statement) {
            self.rewrite_add_unique(statement, steps);
        } else if patterns::is_blocking_index_creation(statement)
            && self.dialect == SqlDialect::Postgresql
        {
            self.rewrite_blocking_index(statement, steps);
        } else if patterns::DROP_TABLE.is_match(statement) {
            self.rewrite_drop_table(statement, steps);
        } else {
            push_step(
                steps,
                "Execute statement as written".to_string(),
                ensure_terminated(statement),
                RiskLevel::Medium,
                10,
                true,
                vec![],
                vec![],
                FailureAction::Stop,
            );
        }
    }

    /// `ADD COLUMN ... NOT NULL` without default: add nullable, backfill
    /// with an explicit human placeholder, then tighten.
    fn rewrite_not_null_addition(
        &self,
        statement: &str,
        metadata: Option<&[TableMetadata]>,
        steps: &mut Vec<EnhancementStep>,
    ) {
        let table = patterns::extract_table_name(statement).unwrap_or_default();
        let column = patterns::extract_added_column(statement).unwrap_or_default();

        let nullable_sql = ensure_terminated(&NOT_NULL_CLAUSE.replace_all(statement, ""));
        let add_label = push_step(
            steps,
            format!("Add column '{column}' as nullable to avoid a table rewrite"),
            nullable_sql,
            RiskLevel::Low,
            5,
            true,
            vec![],
            vec![column_exists_query(&table, &column)],
            FailureAction::Stop,
        );

        let backfill_secs = match metadata.and_then(|m| find_table(m, &table)) {
            Some(t) if t.row_count > LARGE_TABLE_ROWS => (t.row_count / 10_000).max(30) as u64,
            _ => 30,
        };
        let backfill_label = push_step(
            steps,
            format!("Backfill existing rows of '{table}.{column}'"),
            format!(
                "UPDATE {table} SET {column} = {DEFAULT_VALUE_PLACEHOLDER} WHERE {column} IS NULL;"
            ),
            RiskLevel::Medium,
            backfill_secs,
            true,
            vec![add_label],
            vec![format!(
                "SELECT COUNT(*) FROM {table} WHERE {column} IS NULL;"
            )],
            FailureAction::Rollback,
        );

        push_step(
            steps,
            format!("Tighten '{table}.{column}' to NOT NULL now that rows are backfilled"),
            format!("ALTER TABLE {table} ALTER COLUMN {column} SET NOT NULL;"),
            RiskLevel::Medium,
            10,
            true,
            vec![backfill_label],
            vec![column_not_nullable_query(&table, &column)],
            FailureAction::Rollback,
        );
    }

    /// DROP COLUMN: back the column up first; the drop itself cannot be
    /// rolled back.
    fn rewrite_drop_column(&self, statement: &str, steps: &mut Vec<EnhancementStep>) {
        let table = patterns::extract_table_name(statement).unwrap_or_default();
        let column = patterns::extract_dropped_column(statement).unwrap_or_default();
        let backup_table = format!("{table}_{column}_backup");

        let backup_label = push_step(
            steps,
            format!("Back up '{table}.{column}' before dropping it"),
            format!("CREATE TABLE {backup_table} AS SELECT id, {column} FROM {table};"),
            RiskLevel::Low,
            30,
            true,
            vec![],
            vec![table_exists_query(&backup_table)],
            FailureAction::Stop,
        );

        push_step(
            steps,
            format!("Drop column '{table}.{column}'"),
            ensure_terminated(statement),
            RiskLevel::High,
            60,
            false,
            vec![backup_label],
            vec![],
            FailureAction::Stop,
        );
    }

    fn rewrite_add_foreign_key(&self, statement: &str, steps: &mut Vec<EnhancementStep>) {
        let table = patterns::extract_table_name(statement).unwrap_or_default();
        let referenced =
            patterns::extract_referenced_table(statement).unwrap_or_else(|| "[SPECIFY_REFERENCED_TABLE]".to_string());
        let fk_column = first_column(&FK_COLUMNS, statement)
            .unwrap_or_else(|| "[SPECIFY_FK_COLUMN]".to_string());
        let ref_column = first_column(&REFERENCED_COLUMNS, statement)
            .unwrap_or_else(|| "id".to_string());

        let check_label = push_step(
            steps,
            format!("Verify referential integrity of '{table}.{fk_column}' before constraining"),
            format!(
                "SELECT COUNT(*) AS orphaned_rows FROM {table} t \
                 WHERE t.{fk_column} IS NOT NULL \
                 AND NOT EXISTS (SELECT 1 FROM {referenced} r WHERE r.{ref_column} = t.{fk_column});"
            ),
            RiskLevel::Medium,
            60,
            true,
            vec![],
            vec![],
            FailureAction::Stop,
        );

        push_step(
            steps,
            format!("Add foreign key on '{table}.{fk_column}'"),
            ensure_terminated(statement),
            RiskLevel::High,
            120,
            true,
            vec![check_label],
            vec![constraint_exists_query(&table, statement)],
            FailureAction::Rollback,
        );
    }

    fn rewrite_add_unique(&self, statement: &str, steps: &mut Vec<EnhancementStep>) {
        let table = patterns::extract_table_name(statement).unwrap_or_default();
        let columns = first_column_list(&UNIQUE_COLUMNS, statement)
            .unwrap_or_else(|| "[SPECIFY_COLUMNS]".to_string());

        let check_label = push_step(
            steps,
            format!("Verify '{table}({columns})' holds no duplicates before constraining"),
            format!(
                "SELECT {columns}, COUNT(*) FROM {table} GROUP BY {columns} HAVING COUNT(*) > 1;"
            ),
            RiskLevel::Medium,
            30,
            true,
            vec![],
            vec![],
            FailureAction::Stop,
        );

        push_step(
            steps,
            format!("Add unique constraint on '{table}({columns})'"),
            ensure_terminated(statement),
            RiskLevel::Medium,
            60,
            true,
            vec![check_label],
            vec![constraint_exists_query(&table, statement)],
            FailureAction::Rollback,
        );
    }

    /// Blocking CREATE INDEX on PostgreSQL: rewrite to CONCURRENTLY. Slower
    /// in wall-clock, but writes keep flowing.
    fn rewrite_blocking_index(&self, statement: &str, steps: &mut Vec<EnhancementStep>) {
        let rewritten = CREATE_INDEX_PREFIX
            .replace(statement, "CREATE ${1}INDEX CONCURRENTLY ")
            .to_string();
        let index = patterns::extract_index_name(statement).unwrap_or_default();

        push_step(
            steps,
            format!("Build index '{index}' concurrently instead of blocking writes"),
            ensure_terminated(&rewritten),
            RiskLevel::Low,
            300,
            true,
            vec![],
            vec![index_exists_query(&index)],
            FailureAction::Stop,
        );
    }

    /// DROP TABLE: timestamped full backup, then the irreversible drop.
    fn rewrite_drop_table(&self, statement: &str, steps: &mut Vec<EnhancementStep>) {
        let table = patterns::extract_table_name(statement).unwrap_or_default();
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let backup_table = format!("{table}_backup_{stamp}");

        let backup_label = push_step(
            steps,
            format!("Create timestamped backup of '{table}' before dropping it"),
            format!("CREATE TABLE {backup_table} AS SELECT * FROM {table};"),
            RiskLevel::Low,
            120,
            true,
            vec![],
            vec![table_exists_query(&backup_table)],
            FailureAction::Stop,
        );

        push_step(
            steps,
            format!("Drop table '{table}'"),
            ensure_terminated(statement),
            RiskLevel::Critical,
            30,
            false,
            vec![backup_label],
            vec![],
            FailureAction::Stop,
        );
    }

    fn maintenance_window(
        &self,
        steps: &[EnhancementStep],
        statements: &[String],
        total_secs: u64,
    ) -> MaintenanceWindow {
        let has_risky_step = steps
            .iter()
            .any(|s| s.risk_level >= RiskLevel::High);
        let has_blocking = statements.iter().any(|s| {
            patterns::adds_not_null_without_default(s)
                || patterns::adds_foreign_key(s)
                || patterns::adds_unique_constraint(s)
                || patterns::is_blocking_index_creation(s)
                || (patterns::ALTER_TABLE.is_match(s) && patterns::DROP_COLUMN.is_match(s))
        });
        let recommended = has_risky_step || has_blocking || total_secs > 300;

        let mut considerations = Vec::new();
        if has_blocking {
            considerations
                .push("Blocking operations will pause concurrent writes while they run".to_string());
        }
        if steps.iter().any(|s| !s.can_rollback) {
            considerations.push(
                "Plan contains irreversible steps; verify backups before the window opens"
                    .to_string(),
            );
        }
        if total_secs > 300 {
            considerations.push(format!(
                "Total estimated duration is {total_secs}s; size the window accordingly"
            ));
        }

        MaintenanceWindow {
            recommended,
            minimum_duration_secs: total_secs,
            optimal_duration_secs: (total_secs as f64 * 1.5).ceil() as u64,
            considerations,
        }
    }

    /// Cross-statement ordering constraints, rendered for the plan consumer.
    fn statement_dependencies(&self, statements: &[String]) -> Vec<String> {
        let operations: Vec<_> = statements
            .iter()
            .map(|s| classify_statement(s, self.dialect))
            .collect();
        let profiles: Vec<_> = operations
            .iter()
            .enumerate()
            .map(|(i, op)| profile_operation(i, op, self.dialect))
            .collect();
        analyze_dependencies(&operations, &profiles)
            .into_iter()
            .map(|edge| {
                format!(
                    "statement {} depends on statement {}: {}",
                    edge.from_index + 1,
                    edge.to_index + 1,
                    edge.reason
                )
            })
            .collect()
    }
}

#[allow(clippy::too_many_arguments)]
fn push_step(
    steps: &mut Vec<EnhancementStep>,
    description: String,
    sql: String,
    risk_level: RiskLevel,
    estimated_duration_secs: u64,
    can_rollback: bool,
    dependencies: Vec<String>,
    validation_queries: Vec<String>,
    on_failure: FailureAction,
) -> String {
    let step_number = steps.len() + 1;
    let label = format!("step_{step_number}");
    steps.push(EnhancementStep {
        step_number,
        label: label.clone(),
        description,
        sql,
        risk_level,
        estimated_duration_secs,
        can_rollback,
        dependencies,
        validation_queries,
        on_failure,
    });
    label
}

fn ensure_terminated(sql: &str) -> String {
    let trimmed = sql.trim();
    if trimmed.ends_with(';') {
        trimmed.to_string()
    } else {
        format!("{trimmed};")
    }
}

fn first_column(re: &Regex, sql: &str) -> Option<String> {
    re.captures(sql)
        .and_then(|c| c[1].split(',').next().map(|s| s.trim().to_string()))
}

fn first_column_list(re: &Regex, sql: &str) -> Option<String> {
    re.captures(sql).map(|c| {
        c[1].split(',')
            .map(|s| s.trim())
            .collect::<Vec<_>>()
            .join(", ")
    })
}

fn column_exists_query(table: &str, column: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM information_schema.columns \
         WHERE table_name = '{table}' AND column_name = '{column}';"
    )
}

fn column_not_nullable_query(table: &str, column: &str) -> String {
    format!(
        "SELECT is_nullable FROM information_schema.columns \
         WHERE table_name = '{table}' AND column_name = '{column}';"
    )
}

fn table_exists_query(table: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = '{table}';"
    )
}

fn index_exists_query(index: &str) -> String {
    format!("SELECT COUNT(*) FROM pg_indexes WHERE indexname = '{index}';")
}

fn constraint_exists_query(table: &str, sql: &str) -> String {
    let name = patterns::extract_constraint_name(sql).unwrap_or_default();
    format!(
        "SELECT COUNT(*) FROM information_schema.table_constraints \
         WHERE table_name = '{table}' AND constraint_name = '{name}';"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn generate(sql: &str) -> EnhancementStrategy {
        StrategyGenerator::new(SqlDialect::Postgresql).generate(sql, None)
    }

    #[test]
    fn test_not_null_addition_yields_three_steps() {
        let strategy =
            generate("ALTER TABLE users ADD COLUMN email VARCHAR(255) NOT NULL;");
        assert_eq!(strategy.enhanced_steps.len(), 3);

        let add = &strategy.enhanced_steps[0];
        assert!(!add.sql.to_uppercase().contains("NOT NULL"));
        assert_eq!(add.on_failure, FailureAction::Stop);

        let backfill = &strategy.enhanced_steps[1];
        assert!(backfill.sql.contains(DEFAULT_VALUE_PLACEHOLDER));
        assert_eq!(backfill.dependencies, vec!["step_1".to_string()]);
        assert_eq!(backfill.on_failure, FailureAction::Rollback);

        let tighten = &strategy.enhanced_steps[2];
        assert!(tighten.sql.contains("SET NOT NULL"));
        assert_eq!(tighten.dependencies, vec!["step_2".to_string()]);
    }

    #[test]
    fn test_step_numbers_are_contiguous() {
        let strategy = generate(
            "ALTER TABLE users ADD COLUMN email VARCHAR(255) NOT NULL; \
             DROP TABLE sessions; \
             CREATE INDEX idx_a ON users(email);",
        );
        for (i, step) in strategy.enhanced_steps.iter().enumerate() {
            assert_eq!(step.step_number, i + 1);
        }
    }

    #[test]
    fn test_drop_table_backs_up_first() {
        let strategy = generate("DROP TABLE sessions;");
        assert_eq!(strategy.enhanced_steps.len(), 2);

        let backup = &strategy.enhanced_steps[0];
        assert!(backup.sql.starts_with("CREATE TABLE sessions_backup_"));
        assert!(backup.sql.contains("AS SELECT * FROM sessions"));

        let drop = &strategy.enhanced_steps[1];
        assert!(!drop.can_rollback);
        assert_eq!(drop.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_blocking_index_rewritten_concurrently() {
        let strategy = generate("CREATE INDEX idx_users_email ON users(email);");
        assert_eq!(strategy.enhanced_steps.len(), 1);
        assert!(strategy.enhanced_steps[0]
            .sql
            .contains("CREATE INDEX CONCURRENTLY"));
    }

    #[test]
    fn test_concurrent_index_not_rewritten_on_mysql() {
        let strategy = StrategyGenerator::new(SqlDialect::Mysql)
            .generate("CREATE INDEX idx_users_email ON users(email);", None);
        assert!(!strategy.enhanced_steps[0].sql.contains("CONCURRENTLY"));
    }

    #[test]
    fn test_foreign_key_gets_integrity_check_first() {
        let strategy = generate(
            "ALTER TABLE child ADD CONSTRAINT fk FOREIGN KEY(parent_id) REFERENCES parent(id);",
        );
        assert_eq!(strategy.enhanced_steps.len(), 2);
        assert!(strategy.enhanced_steps[0].sql.contains("orphaned_rows"));
        assert!(strategy.enhanced_steps[0].sql.contains("parent_id"));
        assert_eq!(strategy.enhanced_steps[1].on_failure, FailureAction::Rollback);
    }

    #[test]
    fn test_maintenance_window_for_risky_plan() {
        let strategy = generate("DROP TABLE sessions;");
        assert!(strategy.maintenance_window.recommended);
        assert_eq!(
            strategy.maintenance_window.minimum_duration_secs,
            strategy.estimated_duration_secs
        );
        assert_eq!(
            strategy.maintenance_window.optimal_duration_secs,
            (strategy.estimated_duration_secs as f64 * 1.5).ceil() as u64
        );
    }

    #[test]
    fn test_unmatched_statement_passes_through() {
        let strategy = generate("INSERT INTO settings (k, v) VALUES ('a', 'b');");
        assert_eq!(strategy.enhanced_steps.len(), 1);
        assert_eq!(strategy.enhanced_steps[0].risk_level, RiskLevel::Medium);
        assert_eq!(strategy.enhanced_steps[0].on_failure, FailureAction::Stop);
    }

    #[test]
    fn test_dependencies_reference_only_earlier_steps() {
        let strategy = generate(
            "ALTER TABLE users ADD COLUMN email VARCHAR(255) NOT NULL; DROP TABLE old;",
        );
        for step in &strategy.enhanced_steps {
            for dep in &step.dependencies {
                let n: usize = dep.trim_start_matches("step_").parse().unwrap();
                assert!(n < step.step_number);
            }
        }
    }
}
