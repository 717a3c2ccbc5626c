//! Render loader - resolves what a site's installations should execute.
//!
//! Resolution prefers the active catalog projection and falls back to the
//! authoring source, which covers testing modules an author is previewing
//! and modules that were unsynced after sites adopted them. A module that
//! cannot resolve is skipped, never fatal: one broken installation must not
//! blank an entire tenant page.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::catalog::bundled_modules;
use crate::error::Result;
use crate::schema::SettingsSchema;
use crate::settings::merge_settings;
use crate::store::Store;

/// Everything the page-rendering host needs to mount one module
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderableModule {
    pub id: String,
    pub name: String,
    pub code: String,
    pub styles: String,
    pub settings_schema: SettingsSchema,
    pub merged_settings: Value,
    pub version: String,
}

/// Resolved module artifacts before per-site settings are applied
#[derive(Debug, Clone)]
pub struct ResolvedModule {
    pub id: String,
    pub name: String,
    pub code: String,
    pub styles: String,
    pub settings_schema: SettingsSchema,
    pub default_settings: Value,
    pub version: String,
}

/// Resolves render artifacts for installed modules
pub struct RenderLoader {
    store: Arc<Store>,
}

impl RenderLoader {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Resolve the code a module id should execute right now.
    ///
    /// Order: active catalog projection with a render artifact, then the
    /// authoring source, then the bundled set. `None` means "this module
    /// cannot currently render" and is not an error.
    #[instrument(skip(self))]
    pub fn load_one(&self, module_id: &str) -> Result<Option<ResolvedModule>> {
        let projection = self.store.marketplace_by_id(module_id)?;

        if let Some(m) = &projection {
            if m.is_active && !m.render_code.trim().is_empty() {
                return Ok(Some(ResolvedModule {
                    id: m.id.clone(),
                    name: m.name.clone(),
                    code: m.render_code.clone(),
                    styles: m.styles.clone(),
                    settings_schema: m.settings_schema.clone(),
                    default_settings: m.default_settings.clone(),
                    version: m.version.clone(),
                }));
            }
        }

        // Fallback to the source: through the projection's back-reference
        // when one exists, or treating the id as a source id (testing
        // installs reference the source directly).
        let source = match &projection {
            Some(m) => self.store.source(&m.module_source_id)?,
            None => self.store.source(module_id)?,
        };

        if let Some(s) = source {
            if !s.render_code.trim().is_empty() {
                debug!(module_id, slug = %s.slug, "Resolved module through source fallback");
                let version = projection
                    .as_ref()
                    .map(|m| m.version.clone())
                    .or_else(|| {
                        self.store
                            .versions_for_source(&s.id)
                            .ok()
                            .and_then(|v| v.first().map(|v| v.version.clone()))
                    })
                    .unwrap_or_else(|| "dev".to_string());

                return Ok(Some(ResolvedModule {
                    id: module_id.to_string(),
                    name: s.name,
                    code: s.render_code,
                    styles: s.styles,
                    settings_schema: s.settings_schema,
                    default_settings: s.default_settings,
                    version,
                }));
            }
        }

        Ok(bundled_modules()
            .into_iter()
            .find(|m| m.id == module_id && !m.render_code.trim().is_empty())
            .map(|m| ResolvedModule {
                id: m.id,
                name: m.name,
                code: m.render_code,
                styles: m.styles,
                settings_schema: m.settings_schema,
                default_settings: m.default_settings,
                version: m.version,
            }))
    }

    /// Resolve every enabled installation for a site, skipping entries that
    /// cannot render.
    #[instrument(skip(self))]
    pub fn load_for_site(&self, site_id: &str) -> Result<Vec<RenderableModule>> {
        let installations = self.store.enabled_installations(site_id)?;
        let mut renderables = Vec::with_capacity(installations.len());

        for installation in installations {
            let resolved = match self.load_one(&installation.module_id) {
                Ok(Some(resolved)) => resolved,
                Ok(None) => {
                    warn!(
                        site_id,
                        module_id = %installation.module_id,
                        "Installed module has no render artifact; skipping"
                    );
                    continue;
                }
                Err(e) => {
                    warn!(
                        site_id,
                        module_id = %installation.module_id,
                        error = %e,
                        "Failed to resolve installed module; skipping"
                    );
                    continue;
                }
            };

            renderables.push(RenderableModule {
                merged_settings: merge_settings(
                    &resolved.default_settings,
                    &installation.settings,
                ),
                id: resolved.id,
                name: resolved.name,
                code: resolved.code,
                styles: resolved.styles,
                settings_schema: resolved.settings_schema,
                version: resolved.version,
            });
        }

        Ok(renderables)
    }
}
