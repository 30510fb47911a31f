//! Inter-operation dependency analysis
//!
//! Builds the edge set between operations of one migration: ALTER TABLE and
//! CREATE INDEX depend on an earlier CREATE TABLE of their target table;
//! foreign key constraints depend on the CREATE TABLE of the table they
//! reference.

use serde::{Deserialize, Serialize};

use super::structure::{ConstraintKind, OperationProfile};
use crate::parser::{Operation, OperationKind};
use crate::risk::patterns;

/// One dependency edge: `from` must run after `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    /// Index of the dependent operation
    pub from_index: usize,
    /// Index of the operation it depends on
    pub to_index: usize,
    pub reason: String,
}

/// Compute dependency edges across one migration.
///
/// `operations` and `profiles` are parallel slices produced by the parser
/// and [`super::structure::profile_operation`].
pub fn analyze_dependencies(
    operations: &[Operation],
    profiles: &[OperationProfile],
) -> Vec<DependencyEdge> {
    let mut edges = Vec::new();

    for (index, op) in operations.iter().enumerate() {
        match op.kind {
            OperationKind::AlterTable | OperationKind::CreateIndex => {
                if let Some(table) = &op.table_name {
                    if let Some(target) = earlier_create_table(profiles, table, index) {
                        edges.push(DependencyEdge {
                            from_index: index,
                            to_index: target,
                            reason: format!(
                                "operates on table '{table}' created in this migration"
                            ),
                        });
                    }
                }
                if op.kind == OperationKind::AlterTable && patterns::adds_foreign_key(&op.sql) {
                    if let Some(referenced) = patterns::extract_referenced_table(&op.sql) {
                        if let Some(target) = earlier_create_table(profiles, &referenced, index) {
                            edges.push(DependencyEdge {
                                from_index: index,
                                to_index: target,
                                reason: format!("foreign key references table '{referenced}'"),
                            });
                        }
                    }
                }
            }
            OperationKind::CreateTable => {
                // In-table FOREIGN KEY clauses referencing tables created
                // earlier in the same migration.
                let Some(profile) = profiles.get(index) else {
                    continue;
                };
                for constraint in &profile.constraints {
                    if constraint.kind != ConstraintKind::ForeignKey {
                        continue;
                    }
                    if let Some(referenced) = &constraint.references_table {
                        if let Some(target) = earlier_create_table(profiles, referenced, index) {
                            edges.push(DependencyEdge {
                                from_index: index,
                                to_index: target,
                                reason: format!("foreign key references table '{referenced}'"),
                            });
                        }
                    }
                }
            }
            _ => {}
        }
    }

    edges
}

fn earlier_create_table(profiles: &[OperationProfile], table: &str, before: usize) -> Option<usize> {
    profiles
        .iter()
        .take(before)
        .find(|p| {
            p.kind == OperationKind::CreateTable
                && p.table_name
                    .as_deref()
                    .is_some_and(|t| t.eq_ignore_ascii_case(table))
        })
        .map(|p| p.index)
}
