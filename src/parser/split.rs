//! Migration text splitting and batch scanning
//!
//! Splits a whole migration's SQL into individual statements before
//! classification. Generator-managed ORM migration files (TypeORM and
//! friends) embed SQL inside template strings; those are extracted first,
//! then split on statement boundaries with quote and comment awareness.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{classify_statement, ClassificationPath, Operation, OperationKind, SqlDialect};

/// Aggregate result of scanning one migration's SQL
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationScan {
    pub operations: Vec<Operation>,
    pub destructive_count: usize,
    pub blocking_count: usize,
    pub warnings: Vec<String>,
}

static EMBEDDED_TEMPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`([^`]+)`").expect("invalid pattern"));

static SQL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*(CREATE|ALTER|DROP|TRUNCATE|INSERT|UPDATE|DELETE|SELECT|WITH|BEGIN|COMMIT)\b")
        .expect("invalid pattern")
});

/// Pull SQL out of template strings in generator-managed migration files.
/// Returns `None` when the text looks like plain SQL already.
pub fn extract_embedded_sql(text: &str) -> Option<Vec<String>> {
    // Plain SQL files may use backticks as MySQL identifier quotes; only
    // treat backtick contents as embedded statements when they are whole
    // statements rather than quoted identifiers.
    let candidates: Vec<String> = EMBEDDED_TEMPLATE
        .captures_iter(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|fragment| SQL_PREFIX.is_match(fragment))
        .collect();

    if candidates.is_empty() {
        None
    } else {
        debug!("extracted {} embedded SQL template(s)", candidates.len());
        Some(candidates)
    }
}

/// Split SQL text into `;`-delimited statements, honoring string literals,
/// quoted identifiers, comments and dollar-quoted bodies.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    let mut chars = sql.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut in_backtick = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;
    let mut in_dollar = false;

    while let Some(c) = chars.next() {
        current.push(c);

        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
            }
            continue;
        }
        if in_block_comment {
            if c == '*' && chars.peek() == Some(&'/') {
                current.push(chars.next().unwrap());
                in_block_comment = false;
            }
            continue;
        }
        match c {
            '\'' if !in_double && !in_backtick && !in_dollar => in_single = !in_single,
            '"' if !in_single && !in_backtick && !in_dollar => in_double = !in_double,
            '`' if !in_single && !in_double && !in_dollar => in_backtick = !in_backtick,
            '$' if !in_single && !in_double && !in_backtick => {
                if chars.peek() == Some(&'$') {
                    current.push(chars.next().unwrap());
                    in_dollar = !in_dollar;
                }
            }
            '-' if !in_single && !in_double && !in_backtick && !in_dollar => {
                if chars.peek() == Some(&'-') {
                    current.push(chars.next().unwrap());
                    in_line_comment = true;
                }
            }
            '/' if !in_single && !in_double && !in_backtick && !in_dollar => {
                if chars.peek() == Some(&'*') {
                    current.push(chars.next().unwrap());
                    in_block_comment = true;
                }
            }
            ';' if !in_single && !in_double && !in_backtick && !in_dollar => {
                let statement = current.trim().to_string();
                if !statement.is_empty() && statement != ";" {
                    statements.push(statement);
                }
                current.clear();
            }
            _ => {}
        }
    }

    let tail = current.trim().to_string();
    if !tail.is_empty() && !is_comment_only(&tail) {
        statements.push(tail);
    }

    statements
}

fn is_comment_only(fragment: &str) -> bool {
    fragment
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Split and classify a whole migration, with aggregate counts and
/// per-statement warnings.
pub fn scan_migration(sql: &str, dialect: SqlDialect) -> MigrationScan {
    let statements: Vec<String> = match extract_embedded_sql(sql) {
        Some(embedded) => embedded
            .iter()
            .flat_map(|fragment| split_statements(fragment))
            .collect(),
        None => split_statements(sql),
    };

    let mut operations = Vec::with_capacity(statements.len());
    let mut warnings = Vec::new();

    for (idx, statement) in statements.iter().enumerate() {
        let operation = classify_statement(statement, dialect);
        if operation.classified_by == ClassificationPath::Fallback {
            if operation.kind == OperationKind::Unknown {
                warnings.push(format!(
                    "Statement {} could not be classified; treating as unknown: {}",
                    idx + 1,
                    preview(statement)
                ));
            } else {
                warnings.push(format!(
                    "Statement {} was rejected by the SQL grammar; classified by keyword fallback as {:?}",
                    idx + 1,
                    operation.kind
                ));
            }
        }
        operations.push(operation);
    }

    let destructive_count = operations.iter().filter(|op| op.flags.is_destructive).count();
    let blocking_count = operations.iter().filter(|op| op.flags.is_blocking).count();

    MigrationScan {
        operations,
        destructive_count,
        blocking_count,
        warnings,
    }
}

fn preview(statement: &str) -> String {
    let flattened = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() > 60 {
        format!("{}...", flattened.chars().take(60).collect::<String>())
    } else {
        flattened
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_split_respects_string_literals() {
        let sql = "INSERT INTO t (a) VALUES ('x;y');\nUPDATE t SET a = 'z';";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("'x;y'"));
    }

    #[test]
    fn test_split_ignores_semicolons_in_comments() {
        let sql = "-- first; not a boundary\nCREATE TABLE a (id INT); /* also ; here */ DROP TABLE b;";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn test_split_dollar_quoted_body() {
        let sql = "CREATE FUNCTION f() RETURNS void AS $$ BEGIN; END; $$ LANGUAGE plpgsql; DROP TABLE x;";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
    }

    #[test]
    fn test_embedded_template_extraction() {
        let source = r#"
            await queryRunner.query(`ALTER TABLE "users" ADD COLUMN "age" integer NOT NULL`);
            await queryRunner.query(`CREATE INDEX "idx_age" ON "users" ("age")`);
        "#;
        let extracted = extract_embedded_sql(source).expect("should extract");
        assert_eq!(extracted.len(), 2);
        assert!(extracted[0].starts_with("ALTER TABLE"));
    }

    #[test]
    fn test_plain_sql_with_mysql_backticks_not_treated_as_template() {
        let sql = "ALTER TABLE `users` ADD COLUMN `age` INT;";
        assert!(extract_embedded_sql(sql).is_none());
    }

    #[test]
    fn test_scan_counts_destructive_and_blocking() {
        let sql = "DROP TABLE old_data; ALTER TABLE users ADD COLUMN a INT NOT NULL; SELECT 1;";
        let scan = scan_migration(sql, SqlDialect::Postgresql);
        assert_eq!(scan.operations.len(), 3);
        assert_eq!(scan.destructive_count, 1);
        assert_eq!(scan.blocking_count, 2);
    }
}
