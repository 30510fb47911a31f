//! Migration file contract
//!
//! `MigrationFile` is the unit of work threaded through the engine. The host
//! (migration locator/parser) constructs these from disk; the core never
//! performs file I/O itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::parser::Operation;

/// One migration as handed to the engine by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationFile {
    /// Path the host read this migration from (informational)
    pub path: String,

    /// Human-readable migration name
    pub name: String,

    /// Forward SQL
    pub up_sql: String,

    /// Reverse SQL, if the migration carries one
    pub down_sql: Option<String>,

    /// Timestamp extracted from the migration's version prefix
    pub timestamp: Option<DateTime<Utc>>,

    /// Classified operations, populated lazily by the parser
    #[serde(default)]
    pub operations: Vec<Operation>,

    /// Content checksum over up + down SQL
    pub checksum: String,
}

impl MigrationFile {
    /// Build a migration record, computing the content checksum.
    pub fn new(path: impl Into<String>, name: impl Into<String>, up_sql: impl Into<String>) -> Self {
        let up_sql = up_sql.into();
        let checksum = Self::compute_checksum(&up_sql, None);
        Self {
            path: path.into(),
            name: name.into(),
            up_sql,
            down_sql: None,
            timestamp: None,
            operations: Vec::new(),
            checksum,
        }
    }

    /// Attach reverse SQL, refreshing the checksum.
    pub fn with_down_sql(mut self, down_sql: impl Into<String>) -> Self {
        let down = down_sql.into();
        self.checksum = Self::compute_checksum(&self.up_sql, Some(&down));
        self.down_sql = Some(down);
        self
    }

    /// Compute checksum from migration content
    pub fn compute_checksum(up_sql: &str, down_sql: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(up_sql.as_bytes());
        if let Some(down) = down_sql {
            hasher.update(b"\n--down--\n");
            hasher.update(down.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// A shallow view of this migration with replaced up SQL. Used by the
    /// apply pipeline so applicators see prior applicators' output without
    /// the caller's record ever being mutated.
    pub fn with_up_sql(&self, up_sql: impl Into<String>) -> Self {
        let up_sql = up_sql.into();
        Self {
            path: self.path.clone(),
            name: self.name.clone(),
            checksum: Self::compute_checksum(&up_sql, self.down_sql.as_deref()),
            up_sql,
            down_sql: self.down_sql.clone(),
            timestamp: self.timestamp,
            operations: Vec::new(),
        }
    }
}
