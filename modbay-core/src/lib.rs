//! Core engine for the modbay module pipeline.
//!
//! The crate covers the full lifecycle of a site module: authoring drafts
//! and their version ledger ([`store`]), publication into the marketplace
//! projection ([`deploy`], [`sync`]), discovery ([`catalog`]), per-tenant
//! installation with settings merge ([`install`], [`settings`]), resolution
//! of render artifacts ([`loader`]), and sandboxed execution ([`sandbox`]).

pub mod catalog;
pub mod deploy;
pub mod error;
pub mod install;
pub mod loader;
pub mod sandbox;
pub mod schema;
pub mod settings;
pub mod store;
pub mod sync;

pub use catalog::{Catalog, CatalogEntry};
pub use deploy::{DeployOutcome, DeployPipeline, UnpublishOutcome};
pub use error::{ModuleError, Result};
pub use install::{AllowAll, EntitlementGate, InstallOutcome, InstallationManager};
pub use loader::{RenderLoader, RenderableModule};
pub use sandbox::{HealthReport, MountOutcome, MountStatus, SandboxEngine};
pub use schema::{FieldDescriptor, SettingsField, SettingsSchema};
pub use settings::merge_settings;
pub use store::{ModuleSource, ModuleStatus, ModuleVersion, NewModuleSource, Store};
pub use sync::{SyncEngine, SyncReport};
