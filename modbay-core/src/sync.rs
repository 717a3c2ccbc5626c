//! Sync engine - reconciles published sources into the marketplace catalog.
//!
//! `sync_one` is the single-item projection step; `sync_all` is the
//! correctness backstop that re-runs it over every published source. The
//! deploy pipeline calls `sync_one` inline as a best-effort follow-up, so
//! a periodic `sync_all` must be able to repair anything that call missed.
//! Running it twice with no authoring changes is a no-op: at most one
//! projection row ever exists per source.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{ModuleError, Result};
use crate::store::{ModuleSource, ModuleStatus, ProjectedModule, Store};

/// Fixed tier table mapping `pricing_tier` to (wholesale, retail) prices.
/// Explicit price overrides on the source win over the table.
const PRICING_TIERS: &[(u32, f64, f64)] = &[
    (0, 0.0, 0.0),
    (1, 4.99, 9.99),
    (2, 12.49, 24.99),
    (3, 24.99, 49.99),
];

fn tier_prices(tier: u32) -> (f64, f64) {
    PRICING_TIERS
        .iter()
        .find(|(t, _, _)| *t == tier)
        .map(|(_, w, r)| (*w, *r))
        .unwrap_or((0.0, 0.0))
}

/// What `sync_one` did for a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncAction {
    Created,
    Updated,
    Skipped,
}

/// Result of projecting one source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub action: SyncAction,
    pub source_id: String,
    pub marketplace_id: Option<String>,
    /// Present when the item was skipped (e.g., not published)
    pub reason: Option<String>,
}

/// Aggregate counts for a `sync_all` batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} skipped, {} errors",
            self.created, self.updated, self.skipped, self.errors
        )
    }
}

/// Projects published module sources into the public catalog
pub struct SyncEngine {
    store: Arc<Store>,
}

impl SyncEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Project one source into the catalog.
    ///
    /// A source that is not published is a normal skip, not an error; only
    /// a missing source or a storage failure is returned as `Err`.
    #[instrument(skip(self))]
    pub fn sync_one(&self, source_id: &str) -> Result<SyncOutcome> {
        let source = self
            .store
            .source(source_id)?
            .ok_or_else(|| ModuleError::not_found("module source", source_id))?;

        if source.status != ModuleStatus::Published {
            debug!(
                slug = %source.slug,
                status = %source.status,
                "Source is not published; skipping sync"
            );
            return Ok(SyncOutcome {
                action: SyncAction::Skipped,
                source_id: source.id,
                marketplace_id: None,
                reason: Some(format!("source status is '{}'", source.status)),
            });
        }

        let projected = self.project(&source)?;

        match self.store.marketplace_by_source(&source.id)? {
            Some(existing) => {
                self.store.update_marketplace(&existing.id, &projected)?;
                info!(slug = %source.slug, "Updated catalog projection");
                Ok(SyncOutcome {
                    action: SyncAction::Updated,
                    source_id: source.id,
                    marketplace_id: Some(existing.id),
                    reason: None,
                })
            }
            None => {
                let created = self.store.insert_marketplace(&projected)?;
                info!(slug = %source.slug, marketplace_id = %created.id, "Created catalog projection");
                Ok(SyncOutcome {
                    action: SyncAction::Created,
                    source_id: source.id,
                    marketplace_id: Some(created.id),
                    reason: None,
                })
            }
        }
    }

    /// Reconcile every published source. One item's failure never stops the
    /// batch; failures are counted and logged.
    #[instrument(skip(self))]
    pub fn sync_all(&self) -> Result<SyncReport> {
        let sources = self.store.published_sources()?;
        let mut report = SyncReport::default();

        for source in &sources {
            match self.sync_one(&source.id) {
                Ok(outcome) => match outcome.action {
                    SyncAction::Created => report.created += 1,
                    SyncAction::Updated => report.updated += 1,
                    SyncAction::Skipped => report.skipped += 1,
                },
                Err(e) => {
                    warn!(slug = %source.slug, error = %e, "Failed to sync source");
                    report.errors += 1;
                }
            }
        }

        info!(%report, total = sources.len(), "Catalog sync complete");
        Ok(report)
    }

    /// Mark the projection inactive (soft delete).
    ///
    /// Installations are deliberately untouched: sites that already adopted
    /// the module keep resolving code through the render loader's source
    /// fallback. Returns whether a projection existed.
    #[instrument(skip(self))]
    pub fn unsync(&self, source_id: &str) -> Result<bool> {
        let existed = self.store.set_marketplace_active(source_id, false)?;
        if existed {
            info!(source_id, "Deactivated catalog projection");
        } else {
            debug!(source_id, "No catalog projection to deactivate");
        }
        Ok(existed)
    }

    /// Map source fields (and the pricing tier table) to catalog fields
    fn project(&self, source: &ModuleSource) -> Result<ProjectedModule> {
        let (tier_wholesale, tier_retail) = tier_prices(source.pricing_tier);
        let wholesale = source.wholesale_price.unwrap_or(tier_wholesale);
        let retail = source.retail_price.unwrap_or(tier_retail);

        // Zero retail price means a one-time (free) listing; anything
        // positive bills monthly.
        let billing_cycle = if retail > 0.0 { "monthly" } else { "one_time" };

        let version = self
            .store
            .versions_for_source(&source.id)?
            .first()
            .map(|v| v.version.clone())
            .unwrap_or_else(|| "0.0.1".to_string());

        Ok(ProjectedModule {
            module_source_id: source.id.clone(),
            slug: source.slug.clone(),
            name: source.name.clone(),
            version,
            pricing_tier: source.pricing_tier,
            wholesale_price: wholesale,
            retail_price: retail,
            billing_cycle: billing_cycle.to_string(),
            render_code: source.render_code.clone(),
            settings_schema: source.settings_schema.clone(),
            styles: source.styles.clone(),
            default_settings: source.default_settings.clone(),
        })
    }
}
