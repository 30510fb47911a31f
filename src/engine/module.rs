//! Pluggable enhancement modules
//!
//! Each module is a small rule with three capabilities: a pure `detect`
//! predicate, an `analyze` report and an `apply` content transformation.
//! The registry is an owned value constructed by the engine - no globals.
//! Per-module failures are isolated: a broken rule is "not applicable",
//! never an abort.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::migration::MigrationFile;

/// Dispatch category for a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleCategory {
    /// Protects against data loss or downtime
    Safety,
    /// Shortens execution or lock time
    Speed,
}

/// Static description of a module
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: ModuleCategory,
    /// Higher runs first during apply
    pub priority: u8,
    /// Whether a human must confirm before this module's rewrite is applied
    pub requires_confirmation: bool,
}

/// Result of a module's `analyze` capability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAnalysis {
    pub module_id: String,
    pub applicable: bool,
    pub summary: String,
    #[serde(default)]
    pub details: Vec<String>,
}

/// The detect/analyze/apply contract every rule implements.
///
/// Modules must be pure with respect to their inputs; `apply` receives the
/// running content plus a read-only migration view and returns the new
/// content. Errors are caught by the engine and logged, so rule authors may
/// use any `anyhow`-compatible error.
pub trait EnhancementModule: Send + Sync {
    fn metadata(&self) -> &ModuleMetadata;

    /// Pure predicate: does this rule apply to the migration?
    fn detect(&self, migration: &MigrationFile) -> anyhow::Result<bool>;

    /// Produce a human-facing report of what the rule would change.
    fn analyze(&self, migration: &MigrationFile) -> anyhow::Result<ModuleAnalysis>;

    /// Transform the migration content. Must not mutate the migration view.
    fn apply(&self, content: &str, migration: &MigrationFile) -> anyhow::Result<String>;
}

/// Owned module registry, priority-sorted per category
pub struct ModuleRegistry {
    safety: Vec<Arc<dyn EnhancementModule>>,
    speed: Vec<Arc<dyn EnhancementModule>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            safety: Vec::new(),
            speed: Vec::new(),
        }
    }

    /// Register a module, keeping its category list sorted by descending
    /// priority. Last registration wins on duplicate ids.
    pub fn register(&mut self, module: Arc<dyn EnhancementModule>) {
        let id = module.metadata().id.clone();
        let list = match module.metadata().category {
            ModuleCategory::Safety => &mut self.safety,
            ModuleCategory::Speed => &mut self.speed,
        };
        list.retain(|m| m.metadata().id != id);
        list.push(module);
        list.sort_by(|a, b| b.metadata().priority.cmp(&a.metadata().priority));
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn EnhancementModule>> {
        self.safety
            .iter()
            .chain(self.speed.iter())
            .find(|m| m.metadata().id == id)
            .cloned()
    }

    pub fn modules(&self, category: ModuleCategory) -> &[Arc<dyn EnhancementModule>] {
        match category {
            ModuleCategory::Safety => &self.safety,
            ModuleCategory::Speed => &self.speed,
        }
    }

    /// Run every module's `detect` concurrently; failures and panics are
    /// logged and treated as "not applicable".
    pub async fn detect(
        &self,
        category: ModuleCategory,
        migration: &MigrationFile,
    ) -> Vec<ModuleMetadata> {
        let mut handles = Vec::new();
        for module in self.modules(category) {
            let module = module.clone();
            let migration = migration.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let metadata = module.metadata().clone();
                let detected = module.detect(&migration);
                (metadata, detected)
            }));
        }

        let mut applicable = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((metadata, Ok(true))) => applicable.push(metadata),
                Ok((_, Ok(false))) => {}
                Ok((metadata, Err(e))) => {
                    warn!(
                        module = %metadata.id,
                        "module detect failed, treating as not applicable: {e:#}"
                    );
                }
                Err(e) => {
                    warn!("module detect task panicked, treating as not applicable: {e}");
                }
            }
        }
        applicable
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::modules::TransactionWrapper;
    use crate::migration::MigrationFile;

    struct BrokenModule {
        metadata: ModuleMetadata,
    }

    impl BrokenModule {
        fn new() -> Self {
            Self {
                metadata: ModuleMetadata {
                    id: "broken".to_string(),
                    name: "Broken".to_string(),
                    description: "Always fails".to_string(),
                    category: ModuleCategory::Safety,
                    priority: 99,
                    requires_confirmation: false,
                },
            }
        }
    }

    impl EnhancementModule for BrokenModule {
        fn metadata(&self) -> &ModuleMetadata {
            &self.metadata
        }

        fn detect(&self, _migration: &MigrationFile) -> anyhow::Result<bool> {
            anyhow::bail!("rule exploded")
        }

        fn analyze(&self, _migration: &MigrationFile) -> anyhow::Result<ModuleAnalysis> {
            anyhow::bail!("rule exploded")
        }

        fn apply(&self, _content: &str, _migration: &MigrationFile) -> anyhow::Result<String> {
            anyhow::bail!("rule exploded")
        }
    }

    #[test]
    fn test_detect_isolates_failing_modules() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(BrokenModule::new()));
        registry.register(Arc::new(TransactionWrapper::new()));

        let migration = MigrationFile::new(
            "migrations/001.sql",
            "001",
            "CREATE TABLE a(id INT); CREATE TABLE b(id INT);",
        );
        let detected = tokio_test::block_on(registry.detect(ModuleCategory::Safety, &migration));

        // The broken rule is logged and dropped; the healthy one still fires.
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].id, "transaction-wrapper");
    }

    #[test]
    fn test_register_replaces_duplicate_ids() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(TransactionWrapper::new()));
        registry.register(Arc::new(TransactionWrapper::new()));
        assert_eq!(registry.modules(ModuleCategory::Safety).len(), 1);
    }
}
