//! Structural extraction and per-operation profiling
//!
//! Pulls column and constraint definitions out of CREATE TABLE statements
//! (grammar path with a lexical fallback), classifies ALTER TABLE
//! sub-actions, and assigns each operation a complexity grade, duration
//! estimate and lock scope.

use serde::{Deserialize, Serialize};
use sqlparser::ast::{ColumnOption, Statement, TableConstraint};

use crate::parser::classify::parse_statements;
use crate::parser::{Operation, OperationKind, SqlDialect};
use crate::risk::patterns;

/// Operational complexity grade for one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
    Critical,
}

impl Complexity {
    /// Numeric score used for per-migration averaging.
    pub fn score(self) -> u8 {
        match self {
            Complexity::Low => 1,
            Complexity::Medium => 2,
            Complexity::High => 3,
            Complexity::Critical => 4,
        }
    }

    /// Grade a migration from the average of its operations' scores.
    pub fn from_average(avg: f64) -> Self {
        if avg >= 3.5 {
            Complexity::Critical
        } else if avg >= 2.5 {
            Complexity::High
        } else if avg >= 1.5 {
            Complexity::Medium
        } else {
            Complexity::Low
        }
    }
}

/// Lock footprint of one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    None,
    Row,
    Table,
}

/// Column definition extracted from CREATE TABLE
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub auto_increment: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    ForeignKey,
    Unique,
    Check,
}

/// Constraint definition extracted from CREATE TABLE
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintInfo {
    pub name: Option<String>,
    pub kind: ConstraintKind,
    pub columns: Vec<String>,
    pub references_table: Option<String>,
    pub referenced_columns: Vec<String>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
}

/// ALTER TABLE sub-action classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlterAction {
    AddColumn { not_null_without_default: bool },
    DropColumn,
    TypeChange,
    Rename,
    AddConstraint,
    Other,
}

/// Per-operation analysis record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationProfile {
    /// Position within the migration (0-based)
    pub index: usize,
    pub kind: OperationKind,
    pub table_name: Option<String>,
    pub complexity: Complexity,
    pub estimated_secs: f64,
    pub lock_scope: LockScope,
    pub summary: String,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub constraints: Vec<ConstraintInfo>,
}

/// Classify the sub-action of an ALTER TABLE statement. Rides the shared
/// pattern vocabulary so the risk detector and strategy generator agree.
pub fn classify_alter_action(sql: &str) -> AlterAction {
    if patterns::DROP_COLUMN.is_match(sql) {
        AlterAction::DropColumn
    } else if patterns::is_type_change(sql) {
        AlterAction::TypeChange
    } else if patterns::RENAME_TABLE.is_match(sql) || patterns::RENAME_COLUMN.is_match(sql) {
        AlterAction::Rename
    } else if patterns::ADD_CONSTRAINT.is_match(sql) {
        AlterAction::AddConstraint
    } else if patterns::adds_column(sql) {
        AlterAction::AddColumn {
            not_null_without_default: patterns::adds_not_null_without_default(sql),
        }
    } else {
        AlterAction::Other
    }
}

/// Build the analysis profile for one classified operation.
pub fn profile_operation(index: usize, op: &Operation, dialect: SqlDialect) -> OperationProfile {
    let (complexity, estimated_secs, lock_scope, summary) = match op.kind {
        OperationKind::CreateTable => (
            Complexity::Low,
            0.5,
            LockScope::None,
            "Creates a new table; no existing data affected".to_string(),
        ),
        OperationKind::AlterTable => match classify_alter_action(&op.sql) {
            AlterAction::AddColumn {
                not_null_without_default: true,
            } => (
                Complexity::High,
                10.0,
                LockScope::Table,
                "Adds a NOT NULL column without default; forces a table rewrite".to_string(),
            ),
            AlterAction::AddColumn { .. } => (
                Complexity::Low,
                1.0,
                LockScope::Table,
                "Adds a nullable or defaulted column; metadata-only on modern engines".to_string(),
            ),
            AlterAction::DropColumn => (
                Complexity::High,
                5.0,
                LockScope::Table,
                "Drops a column; data is irrecoverable without a backup".to_string(),
            ),
            AlterAction::TypeChange => (
                Complexity::Critical,
                15.0,
                LockScope::Table,
                "Changes a column type; rewrites and revalidates every row".to_string(),
            ),
            AlterAction::Rename => (
                Complexity::Low,
                0.5,
                LockScope::None,
                "Rename; catalog-only but breaks dependent references".to_string(),
            ),
            AlterAction::AddConstraint => (
                Complexity::Medium,
                5.0,
                LockScope::Table,
                "Adds a constraint; existing rows are validated".to_string(),
            ),
            AlterAction::Other => (
                Complexity::Medium,
                2.0,
                LockScope::Table,
                "Alters table structure".to_string(),
            ),
        },
        OperationKind::CreateIndex => {
            if patterns::is_concurrent_index(&op.sql) {
                // Trades lock time for total duration: roughly twice the
                // blocking build's wall-clock.
                (
                    Complexity::Low,
                    BLOCKING_INDEX_BUILD_SECS * 2.0,
                    LockScope::None,
                    "Builds the index concurrently; slower but writes continue".to_string(),
                )
            } else {
                (
                    Complexity::Medium,
                    BLOCKING_INDEX_BUILD_SECS,
                    LockScope::Table,
                    "Builds the index while blocking writes".to_string(),
                )
            }
        }
        OperationKind::DropIndex => (
            Complexity::Low,
            1.0,
            LockScope::None,
            "Drops an index; queries relying on it will slow down".to_string(),
        ),
        OperationKind::DropTable => (
            Complexity::High,
            1.0,
            LockScope::Table,
            "Drops the table and all of its data permanently".to_string(),
        ),
        OperationKind::Insert => (
            Complexity::Low,
            1.0,
            LockScope::Row,
            "Inserts data".to_string(),
        ),
        OperationKind::Update | OperationKind::Delete => (
            Complexity::Medium,
            5.0,
            LockScope::Row,
            "Modifies existing rows".to_string(),
        ),
        OperationKind::Select | OperationKind::Unknown => (
            Complexity::Low,
            0.1,
            LockScope::None,
            "No structural impact detected".to_string(),
        ),
    };

    let (columns, constraints) = if op.kind == OperationKind::CreateTable {
        extract_table_structure(&op.sql, dialect)
    } else {
        (Vec::new(), Vec::new())
    };

    OperationProfile {
        index,
        kind: op.kind,
        table_name: op.table_name.clone(),
        complexity,
        estimated_secs,
        lock_scope,
        summary,
        columns,
        constraints,
    }
}

const BLOCKING_INDEX_BUILD_SECS: f64 = 10.0;

/// Extract column and constraint definitions from a CREATE TABLE statement.
/// Grammar path first; a coarse lexical pass if the grammar rejects it.
pub fn extract_table_structure(
    sql: &str,
    dialect: SqlDialect,
) -> (Vec<ColumnInfo>, Vec<ConstraintInfo>) {
    if let Ok(statements) = parse_statements(sql, dialect) {
        if let Some(Statement::CreateTable(create)) = statements.first() {
            let columns = create.columns.iter().map(column_from_def).collect();
            let constraints = create
                .constraints
                .iter()
                .filter_map(constraint_from_ast)
                .collect();
            return (columns, constraints);
        }
    }
    lexical_table_structure(sql)
}

fn column_from_def(def: &sqlparser::ast::ColumnDef) -> ColumnInfo {
    let mut nullable = true;
    let mut primary_key = false;
    let mut unique = false;
    let mut auto_increment = false;
    let mut default_value = None;

    for opt in &def.options {
        match &opt.option {
            ColumnOption::NotNull => nullable = false,
            ColumnOption::Default(expr) => default_value = Some(expr.to_string()),
            ColumnOption::PrimaryKey(_) => {
                primary_key = true;
                nullable = false;
            }
            ColumnOption::Unique(_) => {
                unique = true;
            }
            other => {
                let rendered = other.to_string().to_uppercase();
                if rendered.contains("AUTO_INCREMENT") || rendered.contains("AUTOINCREMENT") {
                    auto_increment = true;
                }
            }
        }
    }

    let data_type = def.data_type.to_string();
    if data_type.to_uppercase().contains("SERIAL") {
        auto_increment = true;
    }

    ColumnInfo {
        name: def.name.to_string().replace(['"', '`'], ""),
        data_type,
        nullable,
        primary_key,
        unique,
        auto_increment,
        default_value,
    }
}

fn constraint_from_ast(constraint: &TableConstraint) -> Option<ConstraintInfo> {
    match constraint {
        TableConstraint::PrimaryKey(pk) => Some(ConstraintInfo {
            name: pk.name.as_ref().map(|n| n.to_string()),
            kind: ConstraintKind::PrimaryKey,
            columns: pk.columns.iter().map(|c| c.to_string()).collect(),
            references_table: None,
            referenced_columns: Vec::new(),
            on_delete: None,
            on_update: None,
        }),
        TableConstraint::Unique(u) => Some(ConstraintInfo {
            name: u.name.as_ref().map(|n| n.to_string()),
            kind: ConstraintKind::Unique,
            columns: u.columns.iter().map(|c| c.to_string()).collect(),
            references_table: None,
            referenced_columns: Vec::new(),
            on_delete: None,
            on_update: None,
        }),
        TableConstraint::ForeignKey(fk) => Some(ConstraintInfo {
            name: fk.name.as_ref().map(|n| n.to_string()),
            kind: ConstraintKind::ForeignKey,
            columns: fk.columns.iter().map(|c| c.to_string()).collect(),
            references_table: Some(fk.foreign_table.to_string().replace(['"', '`'], "")),
            referenced_columns: fk.referred_columns.iter().map(|c| c.to_string()).collect(),
            on_delete: fk.on_delete.as_ref().map(|a| a.to_string()),
            on_update: fk.on_update.as_ref().map(|a| a.to_string()),
        }),
        TableConstraint::Check(c) => Some(ConstraintInfo {
            name: c.name.as_ref().map(|n| n.to_string()),
            kind: ConstraintKind::Check,
            columns: vec![c.expr.to_string()],
            references_table: None,
            referenced_columns: Vec::new(),
            on_delete: None,
            on_update: None,
        }),
        _ => None,
    }
}

/// Coarse lexical extraction for CREATE TABLE bodies the grammar rejects.
fn lexical_table_structure(sql: &str) -> (Vec<ColumnInfo>, Vec<ConstraintInfo>) {
    let body = match (sql.find('('), sql.rfind(')')) {
        (Some(open), Some(close)) if close > open => &sql[open + 1..close],
        _ => return (Vec::new(), Vec::new()),
    };

    let mut columns = Vec::new();
    let mut constraints = Vec::new();

    for item in split_top_level(body) {
        let upper = item.trim().to_uppercase();
        if upper.starts_with("CONSTRAINT")
            || upper.starts_with("PRIMARY KEY")
            || upper.starts_with("FOREIGN KEY")
            || upper.starts_with("UNIQUE")
            || upper.starts_with("CHECK")
            || upper.starts_with("KEY")
            || upper.starts_with("INDEX")
        {
            let kind = if upper.contains("FOREIGN KEY") {
                ConstraintKind::ForeignKey
            } else if upper.contains("PRIMARY KEY") {
                ConstraintKind::PrimaryKey
            } else if upper.contains("UNIQUE") {
                ConstraintKind::Unique
            } else if upper.contains("CHECK") {
                ConstraintKind::Check
            } else {
                continue;
            };
            constraints.push(ConstraintInfo {
                name: None,
                kind,
                columns: Vec::new(),
                references_table: patterns::extract_referenced_table(&item),
                referenced_columns: Vec::new(),
                on_delete: None,
                on_update: None,
            });
        } else {
            let mut parts = item.trim().split_whitespace();
            let (Some(name), Some(data_type)) = (parts.next(), parts.next()) else {
                continue;
            };
            columns.push(ColumnInfo {
                name: name.replace(['"', '`'], ""),
                data_type: data_type.to_string(),
                nullable: !upper.contains("NOT NULL"),
                primary_key: upper.contains("PRIMARY KEY"),
                unique: upper.contains("UNIQUE"),
                auto_increment: upper.contains("AUTO_INCREMENT") || upper.contains("AUTOINCREMENT"),
                default_value: None,
            });
        }
    }

    (columns, constraints)
}

/// Split a CREATE TABLE body on commas at parenthesis depth zero.
fn split_top_level(body: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in body.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                if !current.trim().is_empty() {
                    items.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}
