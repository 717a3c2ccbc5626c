//! Per-tenant installation rows.
//!
//! One row per (site, module) - the UNIQUE constraint is load-bearing for
//! the whole downstream render path. Unlike the marketplace projection,
//! uninstall is a hard delete: there is no history requirement here.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode_json, encode_json, new_id, now, Store};
use crate::error::{storage_error, ModuleError, Result};

/// A site's enablement record for one module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteInstallation {
    pub id: String,
    pub site_id: String,
    pub module_id: String,
    /// Tenant override mapping, merged over module defaults at render time
    pub settings: Value,
    pub is_enabled: bool,
    pub installed_at: String,
}

fn installation_from_row(row: &Row<'_>) -> Result<SiteInstallation> {
    let settings_raw: String = row.get("settings")?;

    Ok(SiteInstallation {
        id: row.get("id")?,
        site_id: row.get("site_id")?,
        module_id: row.get("module_id")?,
        settings: decode_json(&settings_raw, "site_installations.settings")?,
        is_enabled: row.get("is_enabled")?,
        installed_at: row.get("installed_at")?,
    })
}

impl Store {
    /// Create the (site, module) row; conflict when it already exists
    pub fn insert_installation(
        &self,
        site_id: &str,
        module_id: &str,
        settings: &Value,
    ) -> Result<SiteInstallation> {
        let id = new_id();
        let ts = now();

        self.conn()
            .execute(
                "INSERT INTO site_installations
                     (id, site_id, module_id, settings, is_enabled, installed_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5)",
                params![id, site_id, module_id, encode_json(settings), ts],
            )
            .map_err(|e| {
                storage_error(
                    e,
                    &format!("installation of '{module_id}' on site '{site_id}'"),
                )
            })?;

        Ok(SiteInstallation {
            id,
            site_id: site_id.to_string(),
            module_id: module_id.to_string(),
            settings: settings.clone(),
            is_enabled: true,
            installed_at: ts,
        })
    }

    pub fn installation(&self, site_id: &str, module_id: &str) -> Result<Option<SiteInstallation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, site_id, module_id, settings, is_enabled, installed_at
             FROM site_installations
             WHERE site_id = ?1 AND module_id = ?2",
        )?;
        let mut rows = stmt.query(params![site_id, module_id])?;

        match rows.next()? {
            Some(row) => Ok(Some(installation_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Hard delete. Returns whether a row existed (idempotent for callers).
    pub fn delete_installation(&self, site_id: &str, module_id: &str) -> Result<bool> {
        let changed = self.conn().execute(
            "DELETE FROM site_installations WHERE site_id = ?1 AND module_id = ?2",
            params![site_id, module_id],
        )?;
        Ok(changed > 0)
    }

    /// Replace the stored override mapping
    pub fn update_installation_settings(
        &self,
        site_id: &str,
        module_id: &str,
        settings: &Value,
    ) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE site_installations SET settings = ?1
             WHERE site_id = ?2 AND module_id = ?3",
            params![encode_json(settings), site_id, module_id],
        )?;

        if changed == 0 {
            return Err(ModuleError::not_found(
                "installation",
                format!("{module_id} on site {site_id}"),
            ));
        }
        Ok(())
    }

    /// Flip the enabled flag without touching settings
    pub fn set_installation_enabled(
        &self,
        site_id: &str,
        module_id: &str,
        enabled: bool,
    ) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE site_installations SET is_enabled = ?1
             WHERE site_id = ?2 AND module_id = ?3",
            params![enabled, site_id, module_id],
        )?;

        if changed == 0 {
            return Err(ModuleError::not_found(
                "installation",
                format!("{module_id} on site {site_id}"),
            ));
        }
        Ok(())
    }

    /// All enabled installations for a site, oldest install first
    pub fn enabled_installations(&self, site_id: &str) -> Result<Vec<SiteInstallation>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, site_id, module_id, settings, is_enabled, installed_at
             FROM site_installations
             WHERE site_id = ?1 AND is_enabled = 1
             ORDER BY installed_at",
        )?;
        let mut rows = stmt.query(params![site_id])?;

        let mut installations = Vec::new();
        while let Some(row) = rows.next()? {
            installations.push(installation_from_row(row)?);
        }
        Ok(installations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unique_per_site_and_module() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_installation("site-1", "m1", &json!({}))
            .unwrap();

        let err = store
            .insert_installation("site-1", "m1", &json!({}))
            .unwrap_err();
        assert!(matches!(err, ModuleError::Conflict { .. }));

        // Same module on another site, or another module on the same site, is fine.
        store
            .insert_installation("site-2", "m1", &json!({}))
            .unwrap();
        store
            .insert_installation("site-1", "m2", &json!({}))
            .unwrap();
    }

    #[test]
    fn delete_reports_existence() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_installation("site-1", "m1", &json!({}))
            .unwrap();

        assert!(store.delete_installation("site-1", "m1").unwrap());
        assert!(!store.delete_installation("site-1", "m1").unwrap());
    }

    #[test]
    fn settings_and_enabled_updates_need_a_row() {
        let store = Store::open_in_memory().unwrap();

        let err = store
            .update_installation_settings("site-1", "m1", &json!({}))
            .unwrap_err();
        assert!(matches!(err, ModuleError::NotFound { .. }));

        store
            .insert_installation("site-1", "m1", &json!({"a": 1}))
            .unwrap();
        store
            .update_installation_settings("site-1", "m1", &json!({"a": 2}))
            .unwrap();

        let row = store.installation("site-1", "m1").unwrap().unwrap();
        assert_eq!(row.settings, json!({"a": 2}));

        store
            .set_installation_enabled("site-1", "m1", false)
            .unwrap();
        assert!(store.enabled_installations("site-1").unwrap().is_empty());
    }
}
