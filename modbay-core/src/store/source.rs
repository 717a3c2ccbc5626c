//! Module sources - the author-owned drafts.
//!
//! The authoring editor owns these rows; the pipeline reads them and only
//! ever writes the lifecycle status. Sources are never deleted.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::{decode_json, encode_json, new_id, now, Store};
use crate::error::{storage_error, ModuleError, Result};
use crate::schema::SettingsSchema;

/// Authoring lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Draft,
    Testing,
    Published,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Draft => "draft",
            ModuleStatus::Testing => "testing",
            ModuleStatus::Published => "published",
        }
    }

    /// Whether a site may install a module in this status. Testing is
    /// installable so an author can validate on a specific site before
    /// going fully public.
    pub fn is_installable(&self) -> bool {
        matches!(self, ModuleStatus::Published | ModuleStatus::Testing)
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleStatus {
    type Err = ModuleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(ModuleStatus::Draft),
            "testing" => Ok(ModuleStatus::Testing),
            "published" => Ok(ModuleStatus::Published),
            other => Err(ModuleError::validation(format!(
                "unknown module status '{other}'"
            ))),
        }
    }
}

/// An author's editable module draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSource {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub status: ModuleStatus,
    pub render_code: String,
    pub settings_schema: SettingsSchema,
    pub styles: String,
    pub default_settings: Value,
    pub pricing_tier: u32,
    /// Explicit price overrides; when present they win over the tier table
    pub wholesale_price: Option<f64>,
    pub retail_price: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields the authoring flow supplies when registering a draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewModuleSource {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub render_code: String,
    #[serde(default)]
    pub settings_schema: SettingsSchema,
    #[serde(default)]
    pub styles: String,
    #[serde(default = "default_settings_value")]
    pub default_settings: Value,
    #[serde(default)]
    pub pricing_tier: u32,
    #[serde(default)]
    pub wholesale_price: Option<f64>,
    #[serde(default)]
    pub retail_price: Option<f64>,
}

fn default_settings_value() -> Value {
    Value::Object(serde_json::Map::new())
}

fn source_from_row(row: &Row<'_>) -> Result<ModuleSource> {
    let status_raw: String = row.get("status")?;
    let schema_raw: String = row.get("settings_schema")?;
    let defaults_raw: String = row.get("default_settings")?;

    Ok(ModuleSource {
        id: row.get("id")?,
        slug: row.get("slug")?,
        name: row.get("name")?,
        status: status_raw.parse()?,
        render_code: row.get("render_code")?,
        settings_schema: decode_json(&schema_raw, "module_sources.settings_schema")?,
        styles: row.get("styles")?,
        default_settings: decode_json(&defaults_raw, "module_sources.default_settings")?,
        pricing_tier: row.get("pricing_tier")?,
        wholesale_price: row.get("wholesale_price")?,
        retail_price: row.get("retail_price")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const SOURCE_COLUMNS: &str = "id, slug, name, status, render_code, settings_schema, styles, \
                              default_settings, pricing_tier, wholesale_price, retail_price, \
                              created_at, updated_at";

impl Store {
    /// Register a new draft. This is the seam to the external authoring
    /// store; the pipeline itself never creates sources.
    pub fn insert_source(&self, new: NewModuleSource) -> Result<ModuleSource> {
        let conn = self.conn();
        let id = new_id();
        let ts = now();

        conn.execute(
            "INSERT INTO module_sources
                 (id, slug, name, status, render_code, settings_schema, styles,
                  default_settings, pricing_tier, wholesale_price, retail_price,
                  created_at, updated_at)
             VALUES (?1, ?2, ?3, 'draft', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
            params![
                id,
                new.slug,
                new.name,
                new.render_code,
                encode_json(&new.settings_schema),
                new.styles,
                encode_json(&new.default_settings),
                new.pricing_tier,
                new.wholesale_price,
                new.retail_price,
                ts,
            ],
        )
        .map_err(|e| storage_error(e, &format!("module source '{}'", new.slug)))?;
        drop(conn);

        self.source(&id)?
            .ok_or_else(|| ModuleError::not_found("module source", id))
    }

    /// Fetch a source by id
    pub fn source(&self, id: &str) -> Result<Option<ModuleSource>> {
        self.source_where("id = ?1", id)
    }

    /// Fetch a source by slug
    pub fn source_by_slug(&self, slug: &str) -> Result<Option<ModuleSource>> {
        self.source_where("slug = ?1", slug)
    }

    fn source_where(&self, predicate: &str, key: &str) -> Result<Option<ModuleSource>> {
        let conn = self.conn();
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM module_sources WHERE {predicate}");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![key])?;

        match rows.next()? {
            Some(row) => Ok(Some(source_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// All sources currently in `published` status
    pub fn published_sources(&self) -> Result<Vec<ModuleSource>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {SOURCE_COLUMNS} FROM module_sources WHERE status = 'published' ORDER BY slug"
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut sources = Vec::new();
        while let Some(row) = rows.next()? {
            sources.push(source_from_row(row)?);
        }
        Ok(sources)
    }

    /// All sources, newest first (authoring/ops listing)
    pub fn sources(&self) -> Result<Vec<ModuleSource>> {
        let conn = self.conn();
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM module_sources ORDER BY created_at DESC");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut sources = Vec::new();
        while let Some(row) = rows.next()? {
            sources.push(source_from_row(row)?);
        }
        Ok(sources)
    }

    /// Flip the lifecycle status; the only source field the pipeline writes
    pub fn set_source_status(&self, id: &str, status: ModuleStatus) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE module_sources SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now(), id],
        )?;

        if changed == 0 {
            return Err(ModuleError::not_found("module source", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn demo_source(slug: &str) -> NewModuleSource {
        NewModuleSource {
            slug: slug.to_string(),
            name: "Demo".to_string(),
            render_code: String::new(),
            settings_schema: SettingsSchema::default(),
            styles: String::new(),
            default_settings: json!({"title": "Demo"}),
            pricing_tier: 0,
            wholesale_price: None,
            retail_price: None,
        }
    }

    #[test]
    fn insert_and_fetch_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let created = store.insert_source(demo_source("demo")).unwrap();

        assert_eq!(created.status, ModuleStatus::Draft);
        assert_eq!(created.default_settings, json!({"title": "Demo"}));

        let by_slug = store.source_by_slug("demo").unwrap().unwrap();
        assert_eq!(by_slug.id, created.id);
    }

    #[test]
    fn duplicate_slug_is_a_conflict() {
        let store = Store::open_in_memory().unwrap();
        store.insert_source(demo_source("demo")).unwrap();

        let err = store.insert_source(demo_source("demo")).unwrap_err();
        assert!(matches!(err, ModuleError::Conflict { .. }));
    }

    #[test]
    fn status_transitions() {
        let store = Store::open_in_memory().unwrap();
        let source = store.insert_source(demo_source("demo")).unwrap();

        store
            .set_source_status(&source.id, ModuleStatus::Published)
            .unwrap();
        let reread = store.source(&source.id).unwrap().unwrap();
        assert_eq!(reread.status, ModuleStatus::Published);

        assert_eq!(store.published_sources().unwrap().len(), 1);

        let missing = store.set_source_status("nope", ModuleStatus::Draft);
        assert!(matches!(missing, Err(ModuleError::NotFound { .. })));
    }

    #[test]
    fn installable_statuses() {
        assert!(!ModuleStatus::Draft.is_installable());
        assert!(ModuleStatus::Testing.is_installable());
        assert!(ModuleStatus::Published.is_installable());
    }
}
