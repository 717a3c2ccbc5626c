//! Catalog service - the single discovery surface.
//!
//! Merges the dynamic (synced) catalog with the static bundled catalog,
//! de-duplicated by slug with dynamic entries taking precedence. A miss in
//! `resolve` is `None`, never an error.

mod bundled;

pub use bundled::bundled_modules;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::schema::SettingsSchema;
use crate::store::{MarketplaceModule, SourceType, Store};

/// One discoverable module, whichever half of the catalog it came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    /// Authoring source behind a studio projection; `None` for bundled entries
    pub module_source_id: Option<String>,
    pub slug: String,
    pub name: String,
    pub version: String,
    pub retail_price: f64,
    pub billing_cycle: String,
    pub source_type: SourceType,
    pub render_code: String,
    pub styles: String,
    pub settings_schema: SettingsSchema,
    pub default_settings: Value,
}

impl From<MarketplaceModule> for CatalogEntry {
    fn from(m: MarketplaceModule) -> Self {
        CatalogEntry {
            id: m.id,
            module_source_id: Some(m.module_source_id),
            slug: m.slug,
            name: m.name,
            version: m.version,
            retail_price: m.retail_price,
            billing_cycle: m.billing_cycle,
            source_type: m.source_type,
            render_code: m.render_code,
            styles: m.styles,
            settings_schema: m.settings_schema,
            default_settings: m.default_settings,
        }
    }
}

/// Merged discovery surface over studio projections and the bundled set
pub struct Catalog {
    store: Arc<Store>,
}

impl Catalog {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// All discoverable modules: active studio projections first, then
    /// bundled entries whose slug is not overridden, sorted by slug.
    pub fn list(&self) -> Result<Vec<CatalogEntry>> {
        let mut entries: Vec<CatalogEntry> = self
            .store
            .active_studio_modules()?
            .into_iter()
            .map(CatalogEntry::from)
            .collect();

        let taken: HashSet<String> = entries.iter().map(|e| e.slug.clone()).collect();
        for bundled in bundled_modules() {
            if taken.contains(&bundled.slug) {
                debug!(slug = %bundled.slug, "Bundled entry overridden by studio module");
                continue;
            }
            entries.push(bundled);
        }

        entries.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(entries)
    }

    /// Resolve a module by id or slug.
    ///
    /// Keys shaped like generated identifiers (UUIDs) are tried against the
    /// dynamic catalog by id first, then by slug; either way a dynamic miss
    /// falls back to the bundled catalog. A full miss is `None`.
    pub fn resolve(&self, key: &str) -> Result<Option<CatalogEntry>> {
        let dynamic = if Uuid::parse_str(key).is_ok() {
            match self.active_by_id(key)? {
                Some(hit) => Some(hit),
                None => self.active_by_slug(key)?,
            }
        } else {
            match self.active_by_slug(key)? {
                Some(hit) => Some(hit),
                None => self.active_by_id(key)?,
            }
        };

        if let Some(hit) = dynamic {
            return Ok(Some(hit.into()));
        }

        Ok(bundled_modules()
            .into_iter()
            .find(|m| m.id == key || m.slug == key))
    }

    fn active_by_id(&self, id: &str) -> Result<Option<MarketplaceModule>> {
        Ok(self.store.marketplace_by_id(id)?.filter(|m| m.is_active))
    }

    fn active_by_slug(&self, slug: &str) -> Result<Option<MarketplaceModule>> {
        Ok(self.store.marketplace_by_slug(slug)?.filter(|m| m.is_active))
    }
}
