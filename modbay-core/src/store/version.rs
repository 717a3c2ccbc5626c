//! Version ledger - immutable snapshots and deployment audit rows.
//!
//! Both tables are append-only. The UNIQUE constraint on
//! `(module_source_id, version)` is what serializes concurrent deploys of
//! the same version: the loser gets a conflict, never an overwrite.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode_json, encode_json, new_id, now, ModuleSource, Store};
use crate::error::{storage_error, Result};
use crate::schema::SettingsSchema;

/// Immutable snapshot of a module's artifacts at deploy time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub id: String,
    pub module_source_id: String,
    pub version: String,
    pub changelog: String,
    pub render_code: String,
    pub settings_schema: SettingsSchema,
    pub styles: String,
    pub default_settings: Value,
    pub created_at: String,
}

/// Audit record for one deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDeployment {
    pub id: String,
    pub version_id: String,
    pub environment: String,
    pub status: String,
    pub created_at: String,
}

fn version_from_row(row: &Row<'_>) -> Result<ModuleVersion> {
    let schema_raw: String = row.get("settings_schema")?;
    let defaults_raw: String = row.get("default_settings")?;

    Ok(ModuleVersion {
        id: row.get("id")?,
        module_source_id: row.get("module_source_id")?,
        version: row.get("version")?,
        changelog: row.get("changelog")?,
        render_code: row.get("render_code")?,
        settings_schema: decode_json(&schema_raw, "module_versions.settings_schema")?,
        styles: row.get("styles")?,
        default_settings: decode_json(&defaults_raw, "module_versions.default_settings")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    /// Append a version snapshot copied from the source's current artifacts.
    ///
    /// Fails with a conflict when (source, version) already exists.
    pub fn insert_version(
        &self,
        source: &ModuleSource,
        version: &str,
        changelog: &str,
    ) -> Result<ModuleVersion> {
        let id = new_id();
        let ts = now();

        self.conn()
            .execute(
                "INSERT INTO module_versions
                     (id, module_source_id, version, changelog, render_code,
                      settings_schema, styles, default_settings, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    source.id,
                    version,
                    changelog,
                    source.render_code,
                    encode_json(&source.settings_schema),
                    source.styles,
                    encode_json(&source.default_settings),
                    ts,
                ],
            )
            .map_err(|e| {
                storage_error(e, &format!("version '{version}' of '{}'", source.slug))
            })?;

        Ok(ModuleVersion {
            id,
            module_source_id: source.id.clone(),
            version: version.to_string(),
            changelog: changelog.to_string(),
            render_code: source.render_code.clone(),
            settings_schema: source.settings_schema.clone(),
            styles: source.styles.clone(),
            default_settings: source.default_settings.clone(),
            created_at: ts,
        })
    }

    /// Append a deployment audit row for a version snapshot
    pub fn insert_deployment(
        &self,
        version_id: &str,
        environment: &str,
    ) -> Result<ModuleDeployment> {
        let id = new_id();
        let ts = now();

        self.conn().execute(
            "INSERT INTO module_deployments (id, version_id, environment, status, created_at)
             VALUES (?1, ?2, ?3, 'completed', ?4)",
            params![id, version_id, environment, ts],
        )?;

        Ok(ModuleDeployment {
            id,
            version_id: version_id.to_string(),
            environment: environment.to_string(),
            status: "completed".to_string(),
            created_at: ts,
        })
    }

    /// Version history for a source, newest first
    pub fn versions_for_source(&self, source_id: &str) -> Result<Vec<ModuleVersion>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, module_source_id, version, changelog, render_code,
                    settings_schema, styles, default_settings, created_at
             FROM module_versions
             WHERE module_source_id = ?1
             ORDER BY created_at DESC",
        )?;
        let mut rows = stmt.query(params![source_id])?;

        let mut versions = Vec::new();
        while let Some(row) = rows.next()? {
            versions.push(version_from_row(row)?);
        }
        Ok(versions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModuleError;
    use crate::store::NewModuleSource;
    use serde_json::json;

    fn store_with_source() -> (Store, ModuleSource) {
        let store = Store::open_in_memory().unwrap();
        let source = store
            .insert_source(NewModuleSource {
                slug: "demo".into(),
                name: "Demo".into(),
                render_code: "code v1".into(),
                settings_schema: SettingsSchema::default(),
                styles: ".demo {}".into(),
                default_settings: json!({"a": 1}),
                pricing_tier: 0,
                wholesale_price: None,
                retail_price: None,
            })
            .unwrap();
        (store, source)
    }

    #[test]
    fn snapshot_copies_artifacts() {
        let (store, source) = store_with_source();

        let version = store.insert_version(&source, "1.0.0", "first").unwrap();
        assert_eq!(version.render_code, "code v1");
        assert_eq!(version.default_settings, json!({"a": 1}));

        let history = store.versions_for_source(&source.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, "1.0.0");
    }

    #[test]
    fn duplicate_version_is_a_conflict() {
        let (store, source) = store_with_source();

        store.insert_version(&source, "1.0.0", "").unwrap();
        let err = store.insert_version(&source, "1.0.0", "").unwrap_err();
        assert!(matches!(err, ModuleError::Conflict { .. }));

        // A different label is fine.
        store.insert_version(&source, "1.0.1", "").unwrap();
        assert_eq!(store.versions_for_source(&source.id).unwrap().len(), 2);
    }

    #[test]
    fn deployment_audit_row() {
        let (store, source) = store_with_source();
        let version = store.insert_version(&source, "1.0.0", "").unwrap();

        let deployment = store.insert_deployment(&version.id, "production").unwrap();
        assert_eq!(deployment.status, "completed");
        assert_eq!(deployment.environment, "production");
    }
}
