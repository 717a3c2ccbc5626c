//! End-to-end lifecycle: author a draft, deploy it, discover it in the
//! catalog, install it on a site, render the site, then unpublish.

use modbay_core::{
    Catalog, DeployPipeline, InstallationManager, ModuleStatus, MountStatus, NewModuleSource,
    RenderLoader, SandboxEngine, Store, SyncEngine,
};
use serde_json::json;
use std::sync::Arc;

const LOYALTY_CODE: &str = r#"
import { ModuleConfig } from "./types";

interface LoyaltySettings {
  heading: string;
  points_per_dollar: number;
}

const loyaltyPoints = {
  name: "Loyalty Points",
  render(config: ModuleConfig): string {
    return `<section class="loyalty">
      <h2>${config.settings.heading}</h2>
      <p>Earn ${config.settings.points_per_dollar} points per dollar at ${config.module.name}.</p>
    </section>`;
  }
};

export default loyaltyPoints;
"#;

fn loyalty_source() -> NewModuleSource {
    serde_json::from_value(json!({
        "slug": "loyalty-points",
        "name": "Loyalty Points",
        "render_code": LOYALTY_CODE,
        "styles": ".loyalty { padding: 12px; }",
        "settings_schema": [
            {"name": "heading", "label": "Heading", "type": "text"},
            {"name": "points_per_dollar", "label": "Points per dollar", "type": "number", "min": 1.0}
        ],
        "default_settings": {"heading": "Rewards", "points_per_dollar": 1},
        "pricing_tier": 1
    }))
    .unwrap()
}

#[tokio::test]
async fn full_lifecycle_from_draft_to_rendered_page() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let source = store.insert_source(loyalty_source()).unwrap();
    assert_eq!(source.status, ModuleStatus::Draft);

    // A draft is not discoverable (the bundled set still is).
    let catalog = Catalog::new(store.clone());
    assert!(catalog.resolve("loyalty-points").unwrap().is_none());

    // Deploy: version ledger entry, deployment record, catalog projection.
    let pipeline = DeployPipeline::new(store.clone());
    let outcome = pipeline.deploy(&source.id, "1.0.0", "Initial release").unwrap();
    assert!(outcome.warning.is_none());
    assert!(outcome.sync.is_some());

    let versions = store.versions_for_source(&source.id).unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version, "1.0.0");

    let entry = catalog.resolve("loyalty-points").unwrap().unwrap();
    assert_eq!(entry.version, "1.0.0");
    // Tier 1 prices apply because the source sets no explicit override.
    assert_eq!(entry.retail_price, 9.99);
    assert_eq!(entry.billing_cycle, "monthly");

    // Install on a site with a settings override.
    let manager = InstallationManager::new(store.clone());
    let installed = manager
        .install("42", "loyalty-points", Some(json!({"points_per_dollar": 3})))
        .unwrap();
    assert_eq!(installed.merged_settings["heading"], "Rewards");
    assert_eq!(installed.merged_settings["points_per_dollar"], 3);

    let marketplace = store.marketplace_by_source(&source.id).unwrap().unwrap();
    assert_eq!(marketplace.install_count, 1);

    // The loader hands the sandbox a renderable with merged settings.
    let loader = RenderLoader::new(store.clone());
    let modules = loader.load_for_site("42").unwrap();
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].merged_settings["points_per_dollar"], 3);

    let outcomes = SandboxEngine::new().mount_all(&modules).await;
    assert_eq!(outcomes[0].status, MountStatus::Mounted);
    assert!(outcomes[0].html.contains("<h2>Rewards</h2>"));
    assert!(outcomes[0].html.contains("Earn 3 points per dollar"));
    assert!(outcomes[0].styles.contains(".loyalty"));

    // Unpublish deactivates the projection but keeps installations renderable.
    let withdrawn = pipeline.unpublish(&source.id).unwrap();
    assert!(withdrawn.unsynced);
    assert!(!store
        .marketplace_by_source(&source.id)
        .unwrap()
        .unwrap()
        .is_active);
    assert!(catalog.resolve("loyalty-points").unwrap().is_none());

    let modules = loader.load_for_site("42").unwrap();
    assert_eq!(modules.len(), 1, "existing installs fall back to the source");
}

#[tokio::test]
async fn install_rejects_overrides_outside_the_schema() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let source = store.insert_source(loyalty_source()).unwrap();
    DeployPipeline::new(store.clone())
        .deploy(&source.id, "1.0.0", "")
        .unwrap();

    let manager = InstallationManager::new(store.clone());
    let err = manager
        .install("42", "loyalty-points", Some(json!({"heading": 7})))
        .unwrap_err();
    assert!(err.to_string().contains("heading"));

    // A type mismatch rejects the whole install.
    assert!(store.enabled_installations("42").unwrap().is_empty());
}

#[test]
fn sync_all_is_an_idempotent_backstop() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let source = store.insert_source(loyalty_source()).unwrap();
    store
        .set_source_status(&source.id, ModuleStatus::Published)
        .unwrap();

    let engine = SyncEngine::new(store.clone());
    let first = engine.sync_all().unwrap();
    assert_eq!(first.created, 1);
    assert_eq!(first.errors, 0);

    let second = engine.sync_all().unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.updated, 1);

    // Exactly one projection exists regardless of how often sync runs.
    assert!(store.marketplace_by_source(&source.id).unwrap().is_some());
}

#[test]
fn catalog_survives_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("modules.db");

    let source_id = {
        let store = Arc::new(Store::open(&path).unwrap());
        let source = store.insert_source(loyalty_source()).unwrap();
        DeployPipeline::new(store.clone())
            .deploy(&source.id, "1.0.0", "")
            .unwrap();
        source.id
    };

    let store = Arc::new(Store::open(&path).unwrap());
    let entry = Catalog::new(store.clone())
        .resolve("loyalty-points")
        .unwrap()
        .unwrap();
    assert_eq!(entry.version, "1.0.0");
    assert!(store.marketplace_by_source(&source_id).unwrap().is_some());
}
