//! Installation manager - per-tenant enablement of catalog modules.
//!
//! Availability is validated against the active catalog first and the
//! authoring store second (testing modules are installable so an author can
//! validate on a specific site before going fully public). The check is
//! optimistic: an install racing an unpublish may succeed, and correctness
//! is recovered at render time by the loader's skip-on-failure rule.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::error::{ModuleError, Result};
use crate::schema::SettingsSchema;
use crate::settings::merge_settings;
use crate::store::{SiteInstallation, Store};

/// Billing/entitlement seam consulted before an install is created.
///
/// The entitlement model itself is external; the default implementation
/// permits everything.
pub trait EntitlementGate: Send + Sync {
    fn authorize_install(&self, site_id: &str, module_slug: &str) -> Result<()>;
}

/// Permissive default gate
pub struct AllowAll;

impl EntitlementGate for AllowAll {
    fn authorize_install(&self, _site_id: &str, _module_slug: &str) -> Result<()> {
        Ok(())
    }
}

/// What a successful install hands back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallOutcome {
    pub installation: SiteInstallation,
    /// Defaults with the tenant overrides merged over them
    pub merged_settings: Value,
}

/// The module identity an install resolved against
struct Available {
    module_id: String,
    /// The other id the same logical module may be installed under: the
    /// source id behind a marketplace projection, or the projection id in
    /// front of a source. Publishing must not mint a second identity.
    alias_id: Option<String>,
    slug: String,
    schema: SettingsSchema,
    defaults: Value,
    /// Marketplace rows carry a catalog-owned install counter
    is_marketplace: bool,
}

/// Creates, updates, and removes per-site installations
pub struct InstallationManager {
    store: Arc<Store>,
    catalog: Catalog,
    gate: Box<dyn EntitlementGate>,
}

impl InstallationManager {
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_gate(store, Box::new(AllowAll))
    }

    pub fn with_gate(store: Arc<Store>, gate: Box<dyn EntitlementGate>) -> Self {
        let catalog = Catalog::new(store.clone());
        Self {
            store,
            catalog,
            gate,
        }
    }

    /// Install a module on a site.
    ///
    /// `module_key` may be a module id or a slug. Fails with `NotFound` when
    /// the module is neither in the active catalog nor an installable
    /// source, and with `Conflict` when the (site, module) pair already has
    /// a row.
    #[instrument(skip(self, overrides))]
    pub fn install(
        &self,
        site_id: &str,
        module_key: &str,
        overrides: Option<Value>,
    ) -> Result<InstallOutcome> {
        let available = self.resolve_available(module_key)?;
        self.gate.authorize_install(site_id, &available.slug)?;

        let overrides = overrides.unwrap_or_else(|| Value::Object(Default::default()));
        available.schema.validate_overrides(&overrides)?;

        if let Some(alias) = &available.alias_id {
            if self.store.installation(site_id, alias)?.is_some() {
                return Err(ModuleError::conflict(format!(
                    "module '{}' is already installed on site {site_id}",
                    available.slug
                )));
            }
        }

        let installation =
            self.store
                .insert_installation(site_id, &available.module_id, &overrides)?;

        if available.is_marketplace {
            self.store.bump_install_count(&available.module_id)?;
        }

        info!(site_id, slug = %available.slug, "Installed module");

        Ok(InstallOutcome {
            merged_settings: merge_settings(&available.defaults, &installation.settings),
            installation,
        })
    }

    /// Remove the installation row. Idempotent: a missing pair is not an error.
    #[instrument(skip(self))]
    pub fn uninstall(&self, site_id: &str, module_id: &str) -> Result<()> {
        if self.store.delete_installation(site_id, module_id)? {
            info!(site_id, module_id, "Uninstalled module");
        } else {
            debug!(site_id, module_id, "No installation to remove");
        }
        Ok(())
    }

    /// Replace the stored override mapping for an existing installation
    #[instrument(skip(self, settings))]
    pub fn update_settings(&self, site_id: &str, module_id: &str, settings: Value) -> Result<()> {
        // Validate when the module still resolves; an unsynced-but-installed
        // module keeps accepting settings updates.
        if let Some(available) = self.try_resolve_available(module_id)? {
            available.schema.validate_overrides(&settings)?;
        }

        self.store
            .update_installation_settings(site_id, module_id, &settings)
    }

    /// Flip the enabled flag for an installation
    #[instrument(skip(self))]
    pub fn set_enabled(&self, site_id: &str, module_id: &str, enabled: bool) -> Result<()> {
        self.store
            .set_installation_enabled(site_id, module_id, enabled)
    }

    fn resolve_available(&self, module_key: &str) -> Result<Available> {
        self.try_resolve_available(module_key)?
            .ok_or_else(|| ModuleError::not_found("module", module_key))
    }

    /// Active catalog first, installable source second
    fn try_resolve_available(&self, module_key: &str) -> Result<Option<Available>> {
        if let Some(entry) = self.catalog.resolve(module_key)? {
            return Ok(Some(Available {
                is_marketplace: Uuid::parse_str(&entry.id).is_ok(),
                alias_id: entry.module_source_id,
                module_id: entry.id,
                slug: entry.slug,
                schema: entry.settings_schema,
                defaults: entry.default_settings,
            }));
        }

        let source = match self.store.source(module_key)? {
            Some(source) => Some(source),
            None => self.store.source_by_slug(module_key)?,
        };
        let Some(source) = source.filter(|s| s.status.is_installable()) else {
            return Ok(None);
        };

        let alias_id = self
            .store
            .marketplace_by_source(&source.id)?
            .map(|m| m.id);

        Ok(Some(Available {
            module_id: source.id,
            alias_id,
            slug: source.slug,
            schema: source.settings_schema,
            defaults: source.default_settings,
            is_marketplace: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::DeployPipeline;
    use crate::store::{ModuleStatus, NewModuleSource, ProjectedModule};
    use serde_json::json;

    fn store_with_projection() -> (Arc<Store>, String) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let module = store
            .insert_marketplace(&ProjectedModule {
                module_source_id: "src-1".to_string(),
                slug: "loyalty-points".to_string(),
                name: "Loyalty Points".to_string(),
                version: "1.0.0".to_string(),
                pricing_tier: 0,
                wholesale_price: 0.0,
                retail_price: 0.0,
                billing_cycle: "one_time".to_string(),
                render_code: "code".to_string(),
                settings_schema: serde_json::from_value(json!([
                    {"name": "title", "label": "Title", "type": "text"}
                ]))
                .unwrap(),
                styles: String::new(),
                default_settings: json!({"title": "Points", "limit": 5}),
            })
            .unwrap();
        (store, module.id)
    }

    #[test]
    fn install_merges_defaults_with_overrides() {
        let (store, module_id) = store_with_projection();
        let manager = InstallationManager::new(store.clone());

        let outcome = manager
            .install("42", "loyalty-points", Some(json!({"title": "My Points"})))
            .unwrap();

        assert_eq!(outcome.installation.module_id, module_id);
        assert_eq!(
            outcome.merged_settings,
            json!({"title": "My Points", "limit": 5})
        );

        // Stored settings are the override mapping, not the merge.
        let row = store.installation("42", &module_id).unwrap().unwrap();
        assert_eq!(row.settings, json!({"title": "My Points"}));

        // Catalog-owned counter moved.
        let module = store.marketplace_by_id(&module_id).unwrap().unwrap();
        assert_eq!(module.install_count, 1);
    }

    #[test]
    fn second_install_for_same_pair_conflicts() {
        let (store, _) = store_with_projection();
        let manager = InstallationManager::new(store);

        manager.install("42", "loyalty-points", None).unwrap();
        let err = manager.install("42", "loyalty-points", None).unwrap_err();
        assert!(matches!(err, ModuleError::Conflict { .. }));
    }

    #[test]
    fn unknown_module_is_not_found() {
        let (store, _) = store_with_projection();
        let manager = InstallationManager::new(store);

        let err = manager.install("42", "no-such-module", None).unwrap_err();
        assert!(matches!(err, ModuleError::NotFound { .. }));
    }

    #[test]
    fn testing_source_is_installable_for_author_preview() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let source = store
            .insert_source(NewModuleSource {
                slug: "wip-widget".into(),
                name: "WIP Widget".into(),
                render_code: "code".into(),
                settings_schema: SettingsSchema::default(),
                styles: String::new(),
                default_settings: json!({}),
                pricing_tier: 0,
                wholesale_price: None,
                retail_price: None,
            })
            .unwrap();

        let manager = InstallationManager::new(store.clone());

        // Draft: not installable anywhere.
        let err = manager.install("42", "wip-widget", None).unwrap_err();
        assert!(matches!(err, ModuleError::NotFound { .. }));

        store
            .set_source_status(&source.id, ModuleStatus::Testing)
            .unwrap();
        let outcome = manager.install("42", "wip-widget", None).unwrap();
        assert_eq!(outcome.installation.module_id, source.id);
    }

    #[test]
    fn publishing_does_not_mint_a_second_install_identity() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let source = store
            .insert_source(NewModuleSource {
                slug: "wip-widget".into(),
                name: "WIP Widget".into(),
                render_code: "code".into(),
                settings_schema: SettingsSchema::default(),
                styles: String::new(),
                default_settings: json!({}),
                pricing_tier: 0,
                wholesale_price: None,
                retail_price: None,
            })
            .unwrap();
        store
            .set_source_status(&source.id, ModuleStatus::Testing)
            .unwrap();

        // Author previews on a site while testing; the row keys the source id.
        let manager = InstallationManager::new(store.clone());
        manager.install("42", "wip-widget", None).unwrap();

        // Publishing creates the marketplace projection under a fresh id.
        DeployPipeline::new(store.clone())
            .deploy(&source.id, "1.0.0", "")
            .unwrap();

        let err = manager.install("42", "wip-widget", None).unwrap_err();
        assert!(matches!(err, ModuleError::Conflict { .. }));
        assert_eq!(store.enabled_installations("42").unwrap().len(), 1);
    }

    #[test]
    fn reinstall_through_the_source_sees_the_marketplace_row() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let source = store
            .insert_source(NewModuleSource {
                slug: "wip-widget".into(),
                name: "WIP Widget".into(),
                render_code: "code".into(),
                settings_schema: SettingsSchema::default(),
                styles: String::new(),
                default_settings: json!({}),
                pricing_tier: 0,
                wholesale_price: None,
                retail_price: None,
            })
            .unwrap();

        let pipeline = DeployPipeline::new(store.clone());
        pipeline.deploy(&source.id, "1.0.0", "").unwrap();

        // Installed while published; the row keys the marketplace id.
        let manager = InstallationManager::new(store.clone());
        manager.install("42", "wip-widget", None).unwrap();

        // Back to testing: resolution now goes through the source.
        pipeline.unpublish(&source.id).unwrap();
        store
            .set_source_status(&source.id, ModuleStatus::Testing)
            .unwrap();

        let err = manager.install("42", "wip-widget", None).unwrap_err();
        assert!(matches!(err, ModuleError::Conflict { .. }));
        assert_eq!(store.enabled_installations("42").unwrap().len(), 1);
    }

    #[test]
    fn invalid_overrides_are_rejected_before_any_write() {
        let (store, module_id) = store_with_projection();
        let manager = InstallationManager::new(store.clone());

        let err = manager
            .install("42", "loyalty-points", Some(json!({"title": 7})))
            .unwrap_err();
        assert!(matches!(err, ModuleError::Validation { .. }));
        assert!(store.installation("42", &module_id).unwrap().is_none());
    }

    #[test]
    fn uninstall_is_idempotent() {
        let (store, module_id) = store_with_projection();
        let manager = InstallationManager::new(store);

        manager.install("42", "loyalty-points", None).unwrap();
        manager.uninstall("42", &module_id).unwrap();
        manager.uninstall("42", &module_id).unwrap();
    }

    #[test]
    fn entitlement_gate_can_refuse() {
        struct DenyAll;
        impl EntitlementGate for DenyAll {
            fn authorize_install(&self, _site_id: &str, module_slug: &str) -> Result<()> {
                Err(ModuleError::validation(format!(
                    "site is not entitled to '{module_slug}'"
                )))
            }
        }

        let (store, _) = store_with_projection();
        let manager = InstallationManager::with_gate(store, Box::new(DenyAll));

        let err = manager.install("42", "loyalty-points", None).unwrap_err();
        assert!(err.to_string().contains("not entitled"));
    }

    #[test]
    fn update_settings_replaces_the_mapping() {
        let (store, module_id) = store_with_projection();
        let manager = InstallationManager::new(store.clone());

        manager
            .install("42", "loyalty-points", Some(json!({"title": "A"})))
            .unwrap();
        manager
            .update_settings("42", &module_id, json!({"title": "B"}))
            .unwrap();

        let row = store.installation("42", &module_id).unwrap().unwrap();
        assert_eq!(row.settings, json!({"title": "B"}));

        let err = manager
            .update_settings("42", &module_id, json!({"title": 3}))
            .unwrap_err();
        assert!(matches!(err, ModuleError::Validation { .. }));
    }
}
