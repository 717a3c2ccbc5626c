//! Relational storage for the four pipeline entities.
//!
//! A [`Store`] wraps a single SQLite connection. Every operation is a
//! short-lived single-statement transaction; the uniqueness invariants live
//! in the schema itself so concurrent writers are arbitrated by the
//! database, not by in-process locks:
//!
//! - `module_sources.slug` UNIQUE
//! - `module_versions (module_source_id, version)` UNIQUE
//! - `marketplace_modules.module_source_id` UNIQUE, `.slug` UNIQUE
//! - `site_installations (site_id, module_id)` UNIQUE

mod installation;
mod marketplace;
mod source;
mod version;

pub use installation::SiteInstallation;
pub use marketplace::{MarketplaceModule, ProjectedModule, SourceType};
pub use source::{ModuleSource, ModuleStatus, NewModuleSource};
pub use version::{ModuleDeployment, ModuleVersion};

use rusqlite::Connection;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::error::{ModuleError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS module_sources (
    id               TEXT PRIMARY KEY,
    slug             TEXT NOT NULL UNIQUE,
    name             TEXT NOT NULL,
    status           TEXT NOT NULL DEFAULT 'draft',
    render_code      TEXT NOT NULL DEFAULT '',
    settings_schema  TEXT NOT NULL DEFAULT '[]',
    styles           TEXT NOT NULL DEFAULT '',
    default_settings TEXT NOT NULL DEFAULT '{}',
    pricing_tier     INTEGER NOT NULL DEFAULT 0,
    wholesale_price  REAL,
    retail_price     REAL,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS module_versions (
    id               TEXT PRIMARY KEY,
    module_source_id TEXT NOT NULL REFERENCES module_sources(id),
    version          TEXT NOT NULL,
    changelog        TEXT NOT NULL DEFAULT '',
    render_code      TEXT NOT NULL DEFAULT '',
    settings_schema  TEXT NOT NULL DEFAULT '[]',
    styles           TEXT NOT NULL DEFAULT '',
    default_settings TEXT NOT NULL DEFAULT '{}',
    created_at       TEXT NOT NULL,
    UNIQUE (module_source_id, version)
);

CREATE TABLE IF NOT EXISTS module_deployments (
    id          TEXT PRIMARY KEY,
    version_id  TEXT NOT NULL REFERENCES module_versions(id),
    environment TEXT NOT NULL DEFAULT 'production',
    status      TEXT NOT NULL DEFAULT 'completed',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS marketplace_modules (
    id               TEXT PRIMARY KEY,
    module_source_id TEXT NOT NULL UNIQUE REFERENCES module_sources(id),
    slug             TEXT NOT NULL UNIQUE,
    name             TEXT NOT NULL,
    version          TEXT NOT NULL DEFAULT '',
    pricing_tier     INTEGER NOT NULL DEFAULT 0,
    wholesale_price  REAL NOT NULL DEFAULT 0,
    retail_price     REAL NOT NULL DEFAULT 0,
    billing_cycle    TEXT NOT NULL DEFAULT 'one_time',
    render_code      TEXT NOT NULL DEFAULT '',
    settings_schema  TEXT NOT NULL DEFAULT '[]',
    styles           TEXT NOT NULL DEFAULT '',
    default_settings TEXT NOT NULL DEFAULT '{}',
    is_active        INTEGER NOT NULL DEFAULT 1,
    source_type      TEXT NOT NULL DEFAULT 'studio',
    rating           REAL NOT NULL DEFAULT 0,
    install_count    INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS site_installations (
    id           TEXT PRIMARY KEY,
    site_id      TEXT NOT NULL,
    module_id    TEXT NOT NULL,
    settings     TEXT NOT NULL DEFAULT '{}',
    is_enabled   INTEGER NOT NULL DEFAULT 1,
    installed_at TEXT NOT NULL,
    UNIQUE (site_id, module_id)
);
";

/// Shared storage handle for all pipeline components
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (and create if needed) a file-backed store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening store at {}", path.display());
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory store; state lives as long as the handle
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fresh UUIDv7 identifier (time-ordered, so rows sort by creation)
pub(crate) fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Current UTC timestamp as RFC 3339
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Decode a JSON column, reporting which column was corrupt
pub(crate) fn decode_json<T: DeserializeOwned>(raw: &str, context: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|source| ModuleError::Corrupt {
        context: context.to_string(),
        source,
    })
}

/// Encode a JSON column
pub(crate) fn encode_json<T: serde::Serialize>(value: &T) -> String {
    // In-memory settings/schema values are always encodable.
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_applies_cleanly() {
        let store = Store::open_in_memory().unwrap();
        // Applying twice must be a no-op (IF NOT EXISTS throughout).
        store.conn().execute_batch(SCHEMA).unwrap();
    }

    #[test]
    fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modbay.db");

        {
            let store = Store::open(&path).unwrap();
            store
                .conn()
                .execute(
                    "INSERT INTO module_sources (id, slug, name, created_at, updated_at)
                     VALUES ('s1', 'demo', 'Demo', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                    [],
                )
                .unwrap();
        }

        let store = Store::open(&path).unwrap();
        let count: i64 = store
            .conn()
            .query_row("SELECT COUNT(*) FROM module_sources", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
