//! Live table metadata contract
//!
//! Shapes supplied by an external database analyzer (row counts, sizes,
//! columns, indexes, constraints). The engine treats these as read-only
//! input; absence degrades gracefully by skipping row-count-based
//! escalation.

use serde::{Deserialize, Serialize};

/// Facts about one live table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    pub name: String,
    pub row_count: i64,
    pub size_bytes: i64,
    #[serde(default)]
    pub columns: Vec<ColumnMetadata>,
    #[serde(default)]
    pub indexes: Vec<IndexMetadata>,
    #[serde(default)]
    pub constraints: Vec<ConstraintMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub is_primary_key: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintMetadata {
    pub name: String,
    pub constraint_type: String,
    pub definition: Option<String>,
}

/// Look up metadata for a table by name, ignoring schema qualification
/// and identifier quoting.
pub fn find_table<'a>(tables: &'a [TableMetadata], name: &str) -> Option<&'a TableMetadata> {
    let bare = name
        .rsplit('.')
        .next()
        .unwrap_or(name)
        .trim_matches(|c| c == '"' || c == '`');
    tables
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(bare))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_table_ignores_schema_and_quotes() {
        let tables = vec![TableMetadata {
            name: "users".to_string(),
            row_count: 5_000_000,
            size_bytes: 1 << 30,
            columns: vec![],
            indexes: vec![],
            constraints: vec![],
        }];
        assert!(find_table(&tables, "public.\"users\"").is_some());
        assert!(find_table(&tables, "USERS").is_some());
        assert!(find_table(&tables, "orders").is_none());
    }
}
