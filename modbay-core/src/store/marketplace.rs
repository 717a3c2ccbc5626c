//! Marketplace projection - the public catalog copy of published modules.
//!
//! Rows here are derived, never authored: only the sync engine writes them.
//! `rating` and `install_count` are catalog-owned and survive re-syncs.
//! Deactivation is a soft delete so install history and ratings are kept.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::{decode_json, encode_json, new_id, now, Store};
use crate::error::{storage_error, ModuleError, Result};
use crate::schema::SettingsSchema;

/// Where a catalog entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// First-party, compiled into the host
    Catalog,
    /// Author-published through the studio pipeline
    Studio,
    /// Brought in from an external marketplace
    Imported,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Catalog => "catalog",
            SourceType::Studio => "studio",
            SourceType::Imported => "imported",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "catalog" => Ok(SourceType::Catalog),
            "studio" => Ok(SourceType::Studio),
            "imported" => Ok(SourceType::Imported),
            other => Err(ModuleError::validation(format!(
                "unknown source type '{other}'"
            ))),
        }
    }
}

/// A published module as the catalog sees it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceModule {
    pub id: String,
    pub module_source_id: String,
    pub slug: String,
    pub name: String,
    pub version: String,
    pub pricing_tier: u32,
    pub wholesale_price: f64,
    pub retail_price: f64,
    pub billing_cycle: String,
    pub render_code: String,
    pub settings_schema: SettingsSchema,
    pub styles: String,
    pub default_settings: Value,
    pub is_active: bool,
    pub source_type: SourceType,
    pub rating: f64,
    pub install_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Source-owned fields the sync engine projects into the catalog
#[derive(Debug, Clone)]
pub struct ProjectedModule {
    pub module_source_id: String,
    pub slug: String,
    pub name: String,
    pub version: String,
    pub pricing_tier: u32,
    pub wholesale_price: f64,
    pub retail_price: f64,
    pub billing_cycle: String,
    pub render_code: String,
    pub settings_schema: SettingsSchema,
    pub styles: String,
    pub default_settings: Value,
}

fn marketplace_from_row(row: &Row<'_>) -> Result<MarketplaceModule> {
    let schema_raw: String = row.get("settings_schema")?;
    let defaults_raw: String = row.get("default_settings")?;
    let source_type_raw: String = row.get("source_type")?;

    Ok(MarketplaceModule {
        id: row.get("id")?,
        module_source_id: row.get("module_source_id")?,
        slug: row.get("slug")?,
        name: row.get("name")?,
        version: row.get("version")?,
        pricing_tier: row.get("pricing_tier")?,
        wholesale_price: row.get("wholesale_price")?,
        retail_price: row.get("retail_price")?,
        billing_cycle: row.get("billing_cycle")?,
        render_code: row.get("render_code")?,
        settings_schema: decode_json(&schema_raw, "marketplace_modules.settings_schema")?,
        styles: row.get("styles")?,
        default_settings: decode_json(&defaults_raw, "marketplace_modules.default_settings")?,
        is_active: row.get("is_active")?,
        source_type: source_type_raw.parse()?,
        rating: row.get("rating")?,
        install_count: row.get("install_count")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const MARKETPLACE_COLUMNS: &str =
    "id, module_source_id, slug, name, version, pricing_tier, wholesale_price, retail_price, \
     billing_cycle, render_code, settings_schema, styles, default_settings, is_active, \
     source_type, rating, install_count, created_at, updated_at";

impl Store {
    /// Create a projection row for a source that has none yet
    pub fn insert_marketplace(&self, projected: &ProjectedModule) -> Result<MarketplaceModule> {
        let id = new_id();
        let ts = now();

        self.conn()
            .execute(
                "INSERT INTO marketplace_modules
                     (id, module_source_id, slug, name, version, pricing_tier,
                      wholesale_price, retail_price, billing_cycle, render_code,
                      settings_schema, styles, default_settings, is_active, source_type,
                      rating, install_count, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 1,
                         'studio', 0, 0, ?14, ?14)",
                params![
                    id,
                    projected.module_source_id,
                    projected.slug,
                    projected.name,
                    projected.version,
                    projected.pricing_tier,
                    projected.wholesale_price,
                    projected.retail_price,
                    projected.billing_cycle,
                    projected.render_code,
                    encode_json(&projected.settings_schema),
                    projected.styles,
                    encode_json(&projected.default_settings),
                    ts,
                ],
            )
            .map_err(|e| {
                storage_error(e, &format!("marketplace projection '{}'", projected.slug))
            })?;

        self.marketplace_by_id_required(&id)
    }

    /// Update the source-owned fields of an existing projection.
    ///
    /// Rating and install count are catalog-owned and deliberately not
    /// touched. The row is reactivated: a successful sync means the source
    /// is published again.
    pub fn update_marketplace(&self, id: &str, projected: &ProjectedModule) -> Result<()> {
        let changed = self
            .conn()
            .execute(
                "UPDATE marketplace_modules SET
                     slug = ?1, name = ?2, version = ?3, pricing_tier = ?4,
                     wholesale_price = ?5, retail_price = ?6, billing_cycle = ?7,
                     render_code = ?8, settings_schema = ?9, styles = ?10,
                     default_settings = ?11, is_active = 1, updated_at = ?12
                 WHERE id = ?13",
                params![
                    projected.slug,
                    projected.name,
                    projected.version,
                    projected.pricing_tier,
                    projected.wholesale_price,
                    projected.retail_price,
                    projected.billing_cycle,
                    projected.render_code,
                    encode_json(&projected.settings_schema),
                    projected.styles,
                    encode_json(&projected.default_settings),
                    now(),
                    id,
                ],
            )
            .map_err(|e| {
                storage_error(e, &format!("marketplace projection '{}'", projected.slug))
            })?;

        if changed == 0 {
            return Err(ModuleError::not_found("marketplace module", id));
        }
        Ok(())
    }

    /// Soft-delete toggle. Returns false when the source has no projection.
    pub fn set_marketplace_active(&self, source_id: &str, active: bool) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE marketplace_modules SET is_active = ?1, updated_at = ?2
             WHERE module_source_id = ?3",
            params![active, now(), source_id],
        )?;
        Ok(changed > 0)
    }

    /// Catalog-owned install counter, bumped on each successful install
    pub fn bump_install_count(&self, module_id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE marketplace_modules SET install_count = install_count + 1 WHERE id = ?1",
            params![module_id],
        )?;
        Ok(())
    }

    pub fn marketplace_by_id(&self, id: &str) -> Result<Option<MarketplaceModule>> {
        self.marketplace_where("id = ?1", id)
    }

    pub fn marketplace_by_slug(&self, slug: &str) -> Result<Option<MarketplaceModule>> {
        self.marketplace_where("slug = ?1", slug)
    }

    /// The at-most-one projection for a source (the back-reference is UNIQUE)
    pub fn marketplace_by_source(&self, source_id: &str) -> Result<Option<MarketplaceModule>> {
        self.marketplace_where("module_source_id = ?1", source_id)
    }

    fn marketplace_by_id_required(&self, id: &str) -> Result<MarketplaceModule> {
        self.marketplace_by_id(id)?
            .ok_or_else(|| ModuleError::not_found("marketplace module", id))
    }

    fn marketplace_where(&self, predicate: &str, key: &str) -> Result<Option<MarketplaceModule>> {
        let conn = self.conn();
        let sql = format!("SELECT {MARKETPLACE_COLUMNS} FROM marketplace_modules WHERE {predicate}");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![key])?;

        match rows.next()? {
            Some(row) => Ok(Some(marketplace_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Active studio-published projections, the dynamic half of the catalog
    pub fn active_studio_modules(&self) -> Result<Vec<MarketplaceModule>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {MARKETPLACE_COLUMNS} FROM marketplace_modules
             WHERE is_active = 1 AND source_type = 'studio'
             ORDER BY slug"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut modules = Vec::new();
        while let Some(row) = rows.next()? {
            modules.push(marketplace_from_row(row)?);
        }
        Ok(modules)
    }
}
