//! Shared SQL pattern vocabulary
//!
//! Case-insensitive patterns for the concrete migration idioms the risk
//! detector and the strategy generator both key on. Compiled once; every
//! rule family and rewrite rule matches through this module so the two
//! stay in agreement.

use once_cell::sync::Lazy;
use regex::Regex;

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        pub static $name: Lazy<Regex> =
            Lazy::new(|| Regex::new(concat!("(?is)", $re)).expect("invalid pattern"));
    };
}

// Identifier fragment: bare, double-quoted, backticked or bracketed.
const IDENT: &str = r#"(?:"[^"]+"|`[^`]+`|\[[^\]]+\]|[A-Za-z_][A-Za-z0-9_$.]*)"#;

pattern!(ALTER_TABLE, r"^\s*ALTER\s+TABLE");
pattern!(CREATE_TABLE, r"^\s*CREATE\s+(?:TEMPORARY\s+|TEMP\s+)?TABLE");
pattern!(DROP_TABLE, r"\bDROP\s+TABLE\b");
pattern!(TRUNCATE_TABLE, r"\bTRUNCATE\s+(?:TABLE\s+)?");
pattern!(CREATE_INDEX, r"\bCREATE\s+(?:UNIQUE\s+)?INDEX\b");
pattern!(DROP_INDEX, r"\bDROP\s+INDEX\b");
pattern!(CONCURRENTLY, r"\bCONCURRENTLY\b");
pattern!(ADD_COLUMN, r"\bADD\s+COLUMN\b");
pattern!(GENERIC_ADD, r"\bADD\b");
pattern!(DROP_COLUMN, r"\bDROP\s+COLUMN\b");
pattern!(NOT_NULL, r"\bNOT\s+NULL\b");
pattern!(HAS_DEFAULT, r"\bDEFAULT\b");
pattern!(ADD_CONSTRAINT, r"\bADD\s+CONSTRAINT\b");
pattern!(FOREIGN_KEY, r"\bFOREIGN\s+KEY\b");
pattern!(UNIQUE_KEYWORD, r"\bUNIQUE\b");
pattern!(CHECK_CONSTRAINT, r"\bADD\s+CONSTRAINT\s+\S+\s+CHECK\b");
pattern!(RENAME_TABLE, r"\bRENAME\s+TO\b");
pattern!(RENAME_COLUMN, r"\bRENAME\s+COLUMN\b");
pattern!(SET_NOT_NULL, r"\bALTER\s+COLUMN\s+\S+\s+SET\s+NOT\s+NULL\b");
pattern!(DELETE_FROM, r"^\s*DELETE\s+FROM\b");
pattern!(UPDATE_STMT, r"^\s*UPDATE\b");
pattern!(HAS_WHERE, r"\bWHERE\b");
pattern!(
    TYPE_CHANGE,
    r"(?:\bALTER\s+COLUMN\s+\S+\s+(?:SET\s+DATA\s+)?TYPE\b|\bMODIFY\s+(?:COLUMN\s+)?\S+\s+\S+|\bCHANGE\s+(?:COLUMN\s+)?\S+\s+\S+)"
);

/// `ADD COLUMN ... NOT NULL` with no `DEFAULT` - forces a full table
/// rewrite on most engines.
pub fn adds_not_null_without_default(sql: &str) -> bool {
    ALTER_TABLE.is_match(sql)
        && adds_column(sql)
        && NOT_NULL.is_match(sql)
        && !HAS_DEFAULT.is_match(sql)
}

/// Any column addition. MySQL allows omitting the COLUMN keyword, so a bare
/// ADD that is not ADD CONSTRAINT also counts.
pub fn adds_column(sql: &str) -> bool {
    ADD_COLUMN.is_match(sql) || (GENERIC_ADD.is_match(sql) && !ADD_CONSTRAINT.is_match(sql))
}

/// `ADD CONSTRAINT ... FOREIGN KEY`
pub fn adds_foreign_key(sql: &str) -> bool {
    ADD_CONSTRAINT.is_match(sql) && FOREIGN_KEY.is_match(sql)
}

/// `ADD CONSTRAINT ... UNIQUE`
pub fn adds_unique_constraint(sql: &str) -> bool {
    ADD_CONSTRAINT.is_match(sql) && UNIQUE_KEYWORD.is_match(sql) && !FOREIGN_KEY.is_match(sql)
}

/// `CREATE INDEX ... CONCURRENTLY` (or DROP INDEX CONCURRENTLY)
pub fn is_concurrent_index(sql: &str) -> bool {
    (CREATE_INDEX.is_match(sql) || DROP_INDEX.is_match(sql)) && CONCURRENTLY.is_match(sql)
}

/// Blocking index build: CREATE INDEX without the CONCURRENTLY option.
pub fn is_blocking_index_creation(sql: &str) -> bool {
    CREATE_INDEX.is_match(sql) && !CONCURRENTLY.is_match(sql)
}

/// Statements that rewrite the whole table under an exclusive lock.
pub fn is_table_rewrite(sql: &str) -> bool {
    adds_not_null_without_default(sql) || is_type_change(sql)
}

/// Column type change (`ALTER COLUMN ... TYPE`, MySQL `MODIFY`/`CHANGE`).
pub fn is_type_change(sql: &str) -> bool {
    ALTER_TABLE.is_match(sql) && TYPE_CHANGE.is_match(sql) && !RENAME_COLUMN.is_match(sql)
}

/// Table rename (`ALTER TABLE ... RENAME TO`).
pub fn is_table_rename(sql: &str) -> bool {
    ALTER_TABLE.is_match(sql) && RENAME_TABLE.is_match(sql)
}

/// `DELETE FROM t;` with no WHERE clause.
pub fn is_unfiltered_delete(sql: &str) -> bool {
    DELETE_FROM.is_match(sql) && !HAS_WHERE.is_match(sql)
}

/// `UPDATE t SET ...;` with no WHERE clause.
pub fn is_unfiltered_update(sql: &str) -> bool {
    UPDATE_STMT.is_match(sql) && !HAS_WHERE.is_match(sql)
}

/// Narrowing type conversions that risk truncation or data loss.
const NARROWING_PAIRS: &[(&str, &str)] = &[
    ("bigint", "integer"),
    ("bigint", "smallint"),
    ("integer", "smallint"),
    ("double precision", "real"),
    ("text", "varchar"),
    ("varchar", "char"),
    ("timestamp", "date"),
];

/// Whether a type-change statement mentions a narrowing conversion.
/// Purely lexical: the statement must name both the wide and narrow type
/// (the wide one usually appears in a USING cast or MySQL CHANGE clause).
pub fn mentions_narrowing_conversion(sql: &str) -> bool {
    let lower = sql.to_lowercase();
    NARROWING_PAIRS
        .iter()
        .any(|(wide, narrow)| lower.contains(wide) && lower.contains(narrow))
}

static TABLE_AFTER_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)\b(?:ALTER\s+TABLE|CREATE\s+(?:TEMPORARY\s+|TEMP\s+)?TABLE|DROP\s+TABLE|TRUNCATE\s+TABLE|TRUNCATE|DELETE\s+FROM|INSERT\s+INTO|UPDATE)\s+(?:IF\s+(?:NOT\s+)?EXISTS\s+)?(?:ONLY\s+)?({IDENT})"
    ))
    .expect("invalid pattern")
});

static TABLE_AFTER_ON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?is)\bON\s+(?:ONLY\s+)?({IDENT})")).expect("invalid pattern")
});

static INDEX_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)\b(?:CREATE\s+(?:UNIQUE\s+)?INDEX|DROP\s+INDEX)\s+(?:CONCURRENTLY\s+)?(?:IF\s+(?:NOT\s+)?EXISTS\s+)?({IDENT})"
    ))
    .expect("invalid pattern")
});

static COLUMN_AFTER_ADD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?is)\bADD\s+(?:COLUMN\s+)?(?:IF\s+NOT\s+EXISTS\s+)?({IDENT})"))
        .expect("invalid pattern")
});

static COLUMN_AFTER_DROP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?is)\bDROP\s+COLUMN\s+(?:IF\s+EXISTS\s+)?({IDENT})"))
        .expect("invalid pattern")
});

static CONSTRAINT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?is)\bADD\s+CONSTRAINT\s+({IDENT})")).expect("invalid pattern")
});

static REFERENCED_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?is)\bREFERENCES\s+({IDENT})")).expect("invalid pattern")
});

fn unquote(raw: &str) -> String {
    raw.trim_matches(|c| c == '"' || c == '`' || c == '[' || c == ']')
        .to_string()
}

/// Extract the target table name of a statement, if any.
pub fn extract_table_name(sql: &str) -> Option<String> {
    if let Some(caps) = TABLE_AFTER_KEYWORD.captures(sql) {
        return Some(unquote(&caps[1]));
    }
    // CREATE INDEX ... ON table
    if CREATE_INDEX.is_match(sql) {
        if let Some(caps) = TABLE_AFTER_ON.captures(sql) {
            return Some(unquote(&caps[1]));
        }
    }
    None
}

/// Extract the index name of a CREATE/DROP INDEX statement.
pub fn extract_index_name(sql: &str) -> Option<String> {
    INDEX_NAME.captures(sql).map(|caps| unquote(&caps[1]))
}

/// Column name added by an `ADD COLUMN` clause.
pub fn extract_added_column(sql: &str) -> Option<String> {
    COLUMN_AFTER_ADD
        .captures(sql)
        .map(|caps| unquote(&caps[1]))
        .filter(|name| !name.eq_ignore_ascii_case("CONSTRAINT"))
}

/// Column name dropped by a `DROP COLUMN` clause.
pub fn extract_dropped_column(sql: &str) -> Option<String> {
    COLUMN_AFTER_DROP.captures(sql).map(|caps| unquote(&caps[1]))
}

/// Constraint name of an `ADD CONSTRAINT` clause.
pub fn extract_constraint_name(sql: &str) -> Option<String> {
    CONSTRAINT_NAME.captures(sql).map(|caps| unquote(&caps[1]))
}

/// Table referenced by a `REFERENCES` clause.
pub fn extract_referenced_table(sql: &str) -> Option<String> {
    REFERENCED_TABLE.captures(sql).map(|caps| unquote(&caps[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_null_without_default() {
        assert!(adds_not_null_without_default(
            "ALTER TABLE users ADD COLUMN email VARCHAR(255) NOT NULL;"
        ));
        assert!(!adds_not_null_without_default(
            "ALTER TABLE users ADD COLUMN email VARCHAR(255) NOT NULL DEFAULT '';"
        ));
        assert!(!adds_not_null_without_default(
            "ALTER TABLE users ADD COLUMN email VARCHAR(255);"
        ));
    }

    #[test]
    fn test_concurrent_index_detection() {
        assert!(is_concurrent_index(
            "CREATE INDEX CONCURRENTLY idx_users_email ON users(email);"
        ));
        assert!(is_blocking_index_creation(
            "CREATE INDEX idx_users_email ON users(email);"
        ));
        assert!(!is_blocking_index_creation(
            "CREATE UNIQUE INDEX CONCURRENTLY idx_u ON users(email);"
        ));
    }

    #[test]
    fn test_table_name_extraction() {
        assert_eq!(
            extract_table_name("ALTER TABLE \"users\" ADD COLUMN a INT;"),
            Some("users".to_string())
        );
        assert_eq!(
            extract_table_name("CREATE INDEX idx ON `orders` (id);"),
            Some("orders".to_string())
        );
        assert_eq!(
            extract_table_name("DELETE FROM orders;"),
            Some("orders".to_string())
        );
    }

    #[test]
    fn test_unfiltered_dml() {
        assert!(is_unfiltered_delete("DELETE FROM orders;"));
        assert!(!is_unfiltered_delete("DELETE FROM orders WHERE id = 1;"));
        assert!(is_unfiltered_update("UPDATE users SET active = false;"));
        assert!(!is_unfiltered_update(
            "UPDATE users SET active = false WHERE id = 1;"
        ));
    }

    #[test]
    fn test_narrowing_conversion() {
        assert!(mentions_narrowing_conversion(
            "ALTER TABLE t ALTER COLUMN c TYPE integer USING c::integer; -- was bigint"
        ));
        assert!(!mentions_narrowing_conversion(
            "ALTER TABLE t ALTER COLUMN c TYPE bigint;"
        ));
    }
}
