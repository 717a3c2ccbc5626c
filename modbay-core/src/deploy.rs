//! Deployment pipeline - publishes a draft and records its version.
//!
//! A deploy is three single-row writes plus a best-effort catalog sync:
//! status flip, version snapshot, audit row, then `sync_one`. The first
//! three are the deployment; the sync is catalog visibility only. A sync
//! failure surfaces as a warning on the outcome and never rolls back the
//! published flag or the version history. `sync_all` is the backstop that
//! repairs missed syncs later.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::{ModuleError, Result};
use crate::store::{ModuleStatus, Store};
use crate::sync::{SyncEngine, SyncOutcome};

/// Default deployment environment on the audit row
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Result of a successful deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub source_id: String,
    pub version_id: String,
    pub deployment_id: String,
    /// Present when the follow-up catalog sync succeeded
    pub sync: Option<SyncOutcome>,
    /// Present when the follow-up catalog sync failed
    pub warning: Option<String>,
}

/// Result of a successful unpublish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnpublishOutcome {
    pub source_id: String,
    /// Whether a catalog projection was deactivated
    pub unsynced: bool,
    pub warning: Option<String>,
}

/// Orchestrates publish/unpublish transitions
pub struct DeployPipeline {
    store: Arc<Store>,
    sync: SyncEngine,
}

impl DeployPipeline {
    pub fn new(store: Arc<Store>) -> Self {
        let sync = SyncEngine::new(store.clone());
        Self { store, sync }
    }

    /// Publish a source and append a version snapshot plus audit row.
    ///
    /// A concurrent deploy of the same (source, version) loses on the
    /// ledger's uniqueness constraint and gets a `Conflict`.
    #[instrument(skip(self, changelog))]
    pub fn deploy(&self, source_id: &str, version: &str, changelog: &str) -> Result<DeployOutcome> {
        if version.trim().is_empty() {
            return Err(ModuleError::validation("version label must not be empty"));
        }

        let source = self
            .store
            .source(source_id)?
            .ok_or_else(|| ModuleError::not_found("module source", source_id))?;

        self.store
            .set_source_status(&source.id, ModuleStatus::Published)?;

        let snapshot = self.store.insert_version(&source, version, changelog)?;
        let deployment = self
            .store
            .insert_deployment(&snapshot.id, DEFAULT_ENVIRONMENT)?;

        info!(
            slug = %source.slug,
            version,
            deployment_id = %deployment.id,
            "Deployed module version"
        );

        let (sync, warning) = match self.sync.sync_one(&source.id) {
            Ok(outcome) => (Some(outcome), None),
            Err(e) => {
                // Deployment stands; visibility is repaired by the next sync_all.
                warn!(slug = %source.slug, error = %e, "Catalog sync after deploy failed");
                (None, Some(format!("catalog sync failed: {e}")))
            }
        };

        Ok(DeployOutcome {
            source_id: source.id,
            version_id: snapshot.id,
            deployment_id: deployment.id,
            sync,
            warning,
        })
    }

    /// Move a source back to draft and best-effort deactivate its projection
    #[instrument(skip(self))]
    pub fn unpublish(&self, source_id: &str) -> Result<UnpublishOutcome> {
        let source = self
            .store
            .source(source_id)?
            .ok_or_else(|| ModuleError::not_found("module source", source_id))?;

        self.store
            .set_source_status(&source.id, ModuleStatus::Draft)?;
        info!(slug = %source.slug, "Unpublished module");

        let (unsynced, warning) = match self.sync.unsync(&source.id) {
            Ok(existed) => (existed, None),
            Err(e) => {
                warn!(slug = %source.slug, error = %e, "Catalog unsync after unpublish failed");
                (false, Some(format!("catalog unsync failed: {e}")))
            }
        };

        Ok(UnpublishOutcome {
            source_id: source.id,
            unsynced,
            warning,
        })
    }
}
