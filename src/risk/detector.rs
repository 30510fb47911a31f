//! Risk rule families
//!
//! Runs five independent families per statement - blocking, destructive,
//! performance, constraint, downtime - each tied to concrete migration
//! idioms. Performance rules escalate with live row counts when table
//! metadata is supplied; without metadata they stay quiet rather than guess.

use std::collections::HashSet;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::patterns;
use super::{
    score_categories, RiskAssessment, RiskCategory, RiskImpact, RiskKind, RiskLevel,
    RollbackDifficulty, Severity,
};
use crate::config::ScoringPolicy;
use crate::metadata::{find_table, TableMetadata};
use crate::parser::split_statements;

/// One rule match plus the operator guidance attached to it
struct Finding {
    category: RiskCategory,
    mitigation: Option<String>,
    warning: Option<String>,
    blocker: Option<String>,
}

/// The risk detection engine
pub struct RiskDetector {
    policy: ScoringPolicy,
}

impl RiskDetector {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    /// Analyze a whole migration's SQL. Pure and deterministic in
    /// `(sql, metadata)` apart from the assessment id and timestamp.
    pub fn analyze_sql(&self, sql: &str, metadata: Option<&[TableMetadata]>) -> RiskAssessment {
        let mut findings = Vec::new();

        for statement in split_statements(sql) {
            findings.extend(self.blocking_risks(&statement));
            findings.extend(self.destructive_risks(&statement));
            findings.extend(self.performance_risks(&statement, metadata));
            findings.extend(self.constraint_risks(&statement));
            findings.extend(self.downtime_risks(&statement));
        }

        let categories: Vec<RiskCategory> =
            findings.iter().map(|f| f.category.clone()).collect();
        let risk_score = score_categories(&categories, &self.policy);
        let risk_level = RiskLevel::from_score(risk_score, &self.policy);

        let mitigations = dedup(findings.iter().filter_map(|f| f.mitigation.clone()));
        let warnings = dedup(findings.iter().filter_map(|f| f.warning.clone()));
        let blockers = dedup(findings.iter().filter_map(|f| f.blocker.clone()));

        info!(
            score = risk_score,
            level = ?risk_level,
            categories = categories.len(),
            "risk analysis complete"
        );

        RiskAssessment {
            id: Uuid::new_v4(),
            risk_level,
            risk_score,
            categories,
            mitigations,
            warnings,
            blockers,
            analyzed_at: Utc::now(),
        }
    }

    fn blocking_risks(&self, sql: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        let table = patterns::extract_table_name(sql);
        let objects = as_objects(&table);

        if patterns::adds_not_null_without_default(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "ADD_NOT_NULL_NO_DEFAULT".to_string(),
                    kind: RiskKind::Blocking,
                    severity: Severity::High,
                    description: format!(
                        "Adding a NOT NULL column without a default forces a full table rewrite on {}",
                        name_or(&table)
                    ),
                    affected_objects: objects.clone(),
                    impact: RiskImpact::lock(300),
                },
                mitigation: Some(
                    "Add the column as nullable, backfill existing rows, then SET NOT NULL"
                        .to_string(),
                ),
                warning: Some("NOT NULL column addition rewrites the table under an exclusive lock".to_string()),
                blocker: None,
            });
        }

        if patterns::ALTER_TABLE.is_match(sql) && patterns::DROP_COLUMN.is_match(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "DROP_COLUMN_LOCK".to_string(),
                    kind: RiskKind::Blocking,
                    severity: Severity::Medium,
                    description: format!("Dropping a column locks {}", name_or(&table)),
                    affected_objects: objects.clone(),
                    impact: RiskImpact::lock(60),
                },
                mitigation: None,
                warning: None,
                blocker: None,
            });
        }

        if patterns::adds_foreign_key(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "ADD_FOREIGN_KEY".to_string(),
                    kind: RiskKind::Blocking,
                    severity: Severity::High,
                    description: format!(
                        "Adding a foreign key validates every row of {} while holding a lock",
                        name_or(&table)
                    ),
                    affected_objects: objects.clone(),
                    impact: RiskImpact::lock(180),
                },
                mitigation: Some(
                    "Add the constraint as NOT VALID, then VALIDATE CONSTRAINT separately"
                        .to_string(),
                ),
                warning: None,
                blocker: None,
            });
        }

        if patterns::adds_unique_constraint(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "ADD_UNIQUE_CONSTRAINT".to_string(),
                    kind: RiskKind::Blocking,
                    severity: Severity::Medium,
                    description: format!(
                        "Adding a unique constraint scans {} for duplicates under a lock",
                        name_or(&table)
                    ),
                    affected_objects: objects.clone(),
                    impact: RiskImpact::lock(120),
                },
                mitigation: Some(
                    "Build a unique index concurrently, then attach the constraint to it"
                        .to_string(),
                ),
                warning: None,
                blocker: None,
            });
        }

        if patterns::is_blocking_index_creation(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "BLOCKING_INDEX_BUILD".to_string(),
                    kind: RiskKind::Blocking,
                    severity: Severity::Medium,
                    description: format!(
                        "Index build blocks writes to {} for its full duration",
                        name_or(&table)
                    ),
                    affected_objects: objects,
                    impact: RiskImpact::lock(120),
                },
                mitigation: Some("Use CREATE INDEX CONCURRENTLY to keep writes flowing".to_string()),
                warning: None,
                blocker: None,
            });
        }

        findings
    }

    fn destructive_risks(&self, sql: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        let table = patterns::extract_table_name(sql);
        let objects = as_objects(&table);

        if patterns::DROP_TABLE.is_match(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "DROP_TABLE".to_string(),
                    kind: RiskKind::Destructive,
                    severity: Severity::Critical,
                    description: format!(
                        "Dropping {} permanently deletes the table and all of its data",
                        name_or(&table)
                    ),
                    affected_objects: objects.clone(),
                    impact: RiskImpact::data_loss(RollbackDifficulty::Impossible),
                },
                mitigation: Some("Create a full backup of the table before dropping it".to_string()),
                warning: None,
                blocker: Some(format!(
                    "DROP TABLE on {} is irreversible without a backup",
                    name_or(&table)
                )),
            });
        }

        if patterns::ALTER_TABLE.is_match(sql) && patterns::DROP_COLUMN.is_match(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "DROP_COLUMN".to_string(),
                    kind: RiskKind::Destructive,
                    severity: Severity::High,
                    description: format!(
                        "Dropping a column from {} permanently deletes its data",
                        name_or(&table)
                    ),
                    affected_objects: objects.clone(),
                    impact: RiskImpact::data_loss(RollbackDifficulty::Impossible),
                },
                mitigation: Some("Back up the column's values before dropping it".to_string()),
                warning: None,
                blocker: None,
            });
        }

        if patterns::TRUNCATE_TABLE.is_match(sql) && sql.trim().to_uppercase().starts_with("TRUNCATE") {
            findings.push(Finding {
                category: RiskCategory {
                    code: "TRUNCATE_TABLE".to_string(),
                    kind: RiskKind::Destructive,
                    severity: Severity::Critical,
                    description: format!("Truncating {} deletes every row", name_or(&table)),
                    affected_objects: objects.clone(),
                    impact: RiskImpact::data_loss(RollbackDifficulty::Impossible),
                },
                mitigation: Some("Create a full backup of the table before truncating".to_string()),
                warning: None,
                blocker: Some(format!(
                    "TRUNCATE on {} is irreversible without a backup",
                    name_or(&table)
                )),
            });
        }

        if patterns::is_unfiltered_delete(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "DELETE_WITHOUT_WHERE".to_string(),
                    kind: RiskKind::Destructive,
                    severity: Severity::High,
                    description: format!(
                        "DELETE without WHERE removes every row of {}",
                        name_or(&table)
                    ),
                    affected_objects: objects.clone(),
                    impact: RiskImpact::data_loss(RollbackDifficulty::Hard),
                },
                mitigation: Some("Add a WHERE clause, or batch the delete with explicit ranges".to_string()),
                warning: Some(format!(
                    "DELETE statement without WHERE clause affects all rows of {}",
                    name_or(&table)
                )),
                blocker: None,
            });
        }

        if patterns::is_unfiltered_update(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "UPDATE_WITHOUT_WHERE".to_string(),
                    kind: RiskKind::Destructive,
                    severity: Severity::Medium,
                    description: format!(
                        "UPDATE without WHERE rewrites every row of {}",
                        name_or(&table)
                    ),
                    affected_objects: objects,
                    impact: RiskImpact {
                        lock_duration_secs: None,
                        downtime: false,
                        data_loss: false,
                        rollback_difficulty: RollbackDifficulty::Hard,
                    },
                },
                mitigation: None,
                warning: Some(format!(
                    "UPDATE statement without WHERE clause affects all rows of {}",
                    name_or(&table)
                )),
                blocker: None,
            });
        }

        findings
    }

    fn performance_risks(
        &self,
        sql: &str,
        metadata: Option<&[TableMetadata]>,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();
        let Some(tables) = metadata else {
            return findings;
        };
        let Some(table_name) = patterns::extract_table_name(sql) else {
            return findings;
        };
        let Some(table) = find_table(tables, &table_name) else {
            return findings;
        };
        if table.row_count <= self.policy.large_table_rows {
            return findings;
        }

        let rows = table.row_count;
        let objects = vec![table.name.clone()];

        if patterns::ALTER_TABLE.is_match(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "LARGE_TABLE_ALTER".to_string(),
                    kind: RiskKind::Performance,
                    severity: Severity::High,
                    description: format!(
                        "ALTER on '{}' ({rows} rows) will hold its lock for an extended period",
                        table.name
                    ),
                    affected_objects: objects.clone(),
                    impact: RiskImpact::lock((rows / 1_000).max(1) as u64),
                },
                mitigation: Some(
                    "Use an online schema change tool for tables of this size".to_string(),
                ),
                warning: Some(format!(
                    "Table '{}' exceeds the large-table threshold ({rows} rows)",
                    table.name
                )),
                blocker: None,
            });
        }

        if patterns::CREATE_INDEX.is_match(sql) {
            let concurrent = patterns::is_concurrent_index(sql);
            findings.push(Finding {
                category: RiskCategory {
                    code: "LARGE_TABLE_INDEX".to_string(),
                    kind: RiskKind::Performance,
                    severity: Severity::Medium,
                    description: format!(
                        "Index build on '{}' ({rows} rows) will take roughly {} seconds",
                        table.name,
                        rows / 5_000
                    ),
                    affected_objects: objects.clone(),
                    impact: RiskImpact {
                        lock_duration_secs: (!concurrent).then_some((rows / 5_000).max(1) as u64),
                        downtime: false,
                        data_loss: false,
                        rollback_difficulty: RollbackDifficulty::Easy,
                    },
                },
                mitigation: None,
                warning: None,
                blocker: None,
            });
        }

        if patterns::CHECK_CONSTRAINT.is_match(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "LARGE_TABLE_CHECK".to_string(),
                    kind: RiskKind::Performance,
                    severity: Severity::Medium,
                    description: format!(
                        "CHECK constraint on '{}' requires a full scan of {rows} rows",
                        table.name
                    ),
                    affected_objects: objects,
                    impact: RiskImpact::lock((rows / 10_000).max(1) as u64),
                },
                mitigation: None,
                warning: None,
                blocker: None,
            });
        }

        findings
    }

    fn constraint_risks(&self, sql: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        let table = patterns::extract_table_name(sql);
        let objects = as_objects(&table);

        if patterns::adds_not_null_without_default(sql) || patterns::SET_NOT_NULL.is_match(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "NOT_NULL_ON_EXISTING".to_string(),
                    kind: RiskKind::Constraint,
                    severity: Severity::High,
                    description: format!(
                        "NOT NULL on {} will fail if existing rows contain NULLs",
                        name_or(&table)
                    ),
                    affected_objects: objects.clone(),
                    impact: RiskImpact {
                        lock_duration_secs: None,
                        downtime: false,
                        data_loss: false,
                        rollback_difficulty: RollbackDifficulty::Easy,
                    },
                },
                mitigation: Some("Backfill NULLs before tightening the constraint".to_string()),
                warning: None,
                blocker: None,
            });
        }

        if patterns::adds_unique_constraint(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "UNIQUE_ON_EXISTING".to_string(),
                    kind: RiskKind::Constraint,
                    severity: Severity::Medium,
                    description: format!(
                        "UNIQUE on {} will fail if existing rows contain duplicates",
                        name_or(&table)
                    ),
                    affected_objects: objects,
                    impact: RiskImpact {
                        lock_duration_secs: None,
                        downtime: false,
                        data_loss: false,
                        rollback_difficulty: RollbackDifficulty::Easy,
                    },
                },
                mitigation: Some("Check for duplicate values before adding the constraint".to_string()),
                warning: None,
                blocker: None,
            });
        }

        findings
    }

    fn downtime_risks(&self, sql: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        let table = patterns::extract_table_name(sql);
        let objects = as_objects(&table);

        if patterns::is_table_rename(sql) {
            findings.push(Finding {
                category: RiskCategory {
                    code: "TABLE_RENAME".to_string(),
                    kind: RiskKind::Downtime,
                    severity: Severity::High,
                    description: format!(
                        "Renaming {} breaks application queries until they are redeployed",
                        name_or(&table)
                    ),
                    affected_objects: objects.clone(),
                    impact: RiskImpact {
                        lock_duration_secs: Some(60),
                        downtime: true,
                        data_loss: false,
                        rollback_difficulty: RollbackDifficulty::Easy,
                    },
                },
                mitigation: Some(
                    "Create a view with the old name for backward compatibility".to_string(),
                ),
                warning: None,
                blocker: None,
            });
        }

        if patterns::is_type_change(sql) {
            let narrowing = patterns::mentions_narrowing_conversion(sql);
            findings.push(Finding {
                category: RiskCategory {
                    code: if narrowing {
                        "NARROWING_TYPE_CHANGE".to_string()
                    } else {
                        "COLUMN_TYPE_CHANGE".to_string()
                    },
                    kind: RiskKind::Downtime,
                    severity: if narrowing {
                        Severity::High
                    } else {
                        Severity::Medium
                    },
                    description: if narrowing {
                        format!(
                            "Narrowing type change on {} may truncate or lose data during conversion",
                            name_or(&table)
                        )
                    } else {
                        format!(
                            "Column type change on {} may require data conversion",
                            name_or(&table)
                        )
                    },
                    affected_objects: objects,
                    impact: RiskImpact {
                        lock_duration_secs: Some(30),
                        downtime: true,
                        data_loss: narrowing,
                        rollback_difficulty: RollbackDifficulty::Medium,
                    },
                },
                mitigation: Some(
                    "Add a new column with the target type, migrate data, then drop the old column"
                        .to_string(),
                ),
                warning: None,
                blocker: None,
            });
        }

        findings
    }
}

fn name_or(table: &Option<String>) -> String {
    table
        .as_deref()
        .map(|t| format!("'{t}'"))
        .unwrap_or_else(|| "the target table".to_string())
}

fn as_objects(table: &Option<String>) -> Vec<String> {
    table.iter().cloned().collect()
}

fn dedup(strings: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for s in strings {
        if seen.insert(s.clone()) {
            out.push(s);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn detector() -> RiskDetector {
        RiskDetector::new(ScoringPolicy::default())
    }

    fn large_users_table() -> Vec<TableMetadata> {
        vec![TableMetadata {
            name: "users".to_string(),
            row_count: 5_000_000,
            size_bytes: 2 << 30,
            columns: vec![],
            indexes: vec![],
            constraints: vec![],
        }]
    }

    #[test]
    fn test_not_null_addition_is_blocking_high() {
        let assessment = detector()
            .analyze_sql("ALTER TABLE users ADD COLUMN email VARCHAR(255) NOT NULL;", None);
        let blocking = assessment
            .categories
            .iter()
            .find(|c| c.kind == RiskKind::Blocking)
            .expect("blocking category");
        assert_eq!(blocking.severity, Severity::High);
        assert!(blocking.description.contains("table rewrite"));
        assert_eq!(blocking.impact.lock_duration_secs, Some(300));
    }

    #[test]
    fn test_drop_table_is_critical_and_irreversible() {
        let assessment = detector().analyze_sql("DROP TABLE sessions;", None);
        let destructive = assessment
            .categories
            .iter()
            .find(|c| c.code == "DROP_TABLE")
            .expect("destructive category");
        assert_eq!(destructive.severity, Severity::Critical);
        assert!(destructive.impact.data_loss);
        assert_eq!(
            destructive.impact.rollback_difficulty,
            RollbackDifficulty::Impossible
        );
        assert!(!assessment.blockers.is_empty());
    }

    #[test]
    fn test_blocking_index_detected_but_not_concurrent() {
        let blocking =
            detector().analyze_sql("CREATE INDEX idx_users_email ON users(email);", None);
        assert!(blocking
            .categories
            .iter()
            .any(|c| c.kind == RiskKind::Blocking && c.severity == Severity::Medium));

        let concurrent = detector().analyze_sql(
            "CREATE INDEX CONCURRENTLY idx_users_email ON users(email);",
            None,
        );
        assert!(!concurrent
            .categories
            .iter()
            .any(|c| c.kind == RiskKind::Blocking));
    }

    #[test]
    fn test_delete_without_where_warning() {
        let assessment = detector().analyze_sql("DELETE FROM orders;", None);
        let destructive = assessment
            .categories
            .iter()
            .find(|c| c.code == "DELETE_WITHOUT_WHERE")
            .expect("delete category");
        assert_eq!(destructive.severity, Severity::High);
        assert!(destructive.impact.data_loss);
        assert!(assessment
            .warnings
            .iter()
            .any(|w| w.contains("without WHERE")));
    }

    #[test]
    fn test_metadata_escalates_large_table_alter() {
        let sql = "ALTER TABLE users ADD COLUMN age INT;";
        let without = detector().analyze_sql(sql, None);
        let with = detector().analyze_sql(sql, Some(&large_users_table()));
        assert!(with.risk_score >= without.risk_score);
        let perf = with
            .categories
            .iter()
            .find(|c| c.code == "LARGE_TABLE_ALTER")
            .expect("performance category");
        assert_eq!(perf.impact.lock_duration_secs, Some(5_000));
    }

    #[test]
    fn test_determinism() {
        let sql = "DROP TABLE a; ALTER TABLE b ADD COLUMN c INT NOT NULL; CREATE INDEX i ON b(c);";
        let first = detector().analyze_sql(sql, None);
        let second = detector().analyze_sql(sql, None);
        assert_eq!(first.risk_score, second.risk_score);
        assert_eq!(first.risk_level, second.risk_level);
        assert_eq!(first.categories, second.categories);
        assert_eq!(first.mitigations, second.mitigations);
        assert_eq!(first.warnings, second.warnings);
        assert_eq!(first.blockers, second.blockers);
    }

    #[test]
    fn test_assessment_serializes_camel_case() {
        let assessment = detector().analyze_sql("DROP TABLE a;", None);
        let json = serde_json::to_string(&assessment).unwrap();
        assert!(json.contains("\"riskScore\""));
        assert!(json.contains("\"riskLevel\""));
        assert!(json.contains("\"rollbackDifficulty\""));
    }

    #[test]
    fn test_score_in_bounds_for_pathological_input() {
        let sql = "DROP TABLE a; DROP TABLE b; TRUNCATE TABLE c; DELETE FROM d; \
                   ALTER TABLE e ADD COLUMN f INT NOT NULL; ALTER TABLE g RENAME TO h;";
        let assessment = detector().analyze_sql(sql, None);
        assert!(assessment.risk_score >= 0.0);
        assert!(assessment.risk_score <= 100.0);
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
    }
}
