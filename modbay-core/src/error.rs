//! Typed failure taxonomy for the publishing pipeline.
//!
//! Expected failures (validation, not-found, conflict) are returned to the
//! caller as values; they are never meant to surface as uncaught panics in
//! presentation code. Render failures are contained at the sandbox boundary
//! and only appear here when a caller inspects a mount outcome.

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum ModuleError {
    /// A precondition was not met (e.g., syncing a source that is not published)
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// A referenced module, site, or installation does not exist
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// A uniqueness invariant rejected the write (duplicate install, duplicate version)
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// Module code failed during mount; contained within the sandbox
    #[error("module {module_id} failed to render: {reason}")]
    Render { module_id: String, reason: String },

    /// Storage-level failure; the current single-row operation was aborted
    #[error("storage error")]
    Persistence {
        #[from]
        source: rusqlite::Error,
    },

    /// Stored JSON column could not be decoded
    #[error("corrupt stored value for {context}")]
    Corrupt {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ModuleError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// True for the expected-failure half of the taxonomy (the caller can
    /// act on these without treating them as bugs).
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::NotFound { .. } | Self::Conflict { .. }
        )
    }
}

/// Convenience alias used throughout the core
pub type Result<T, E = ModuleError> = std::result::Result<T, E>;

/// Map a rusqlite error, promoting UNIQUE violations to [`ModuleError::Conflict`].
///
/// The uniqueness constraints in the schema are the arbiter for concurrent
/// writes; the loser of a race must see a typed conflict, not a silent merge.
pub(crate) fn storage_error(err: rusqlite::Error, what: &str) -> ModuleError {
    if let rusqlite::Error::SqliteFailure(code, _) = &err {
        if code.code == rusqlite::ErrorCode::ConstraintViolation {
            return ModuleError::conflict(format!("{what} already exists"));
        }
    }
    ModuleError::Persistence { source: err }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_failures_are_flagged() {
        assert!(ModuleError::validation("nope").is_expected());
        assert!(ModuleError::not_found("module", "m1").is_expected());
        assert!(ModuleError::conflict("dup").is_expected());
        assert!(!ModuleError::Render {
            module_id: "m1".into(),
            reason: "boom".into()
        }
        .is_expected());
    }

    #[test]
    fn constraint_violation_becomes_conflict() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed".into()),
        );
        match storage_error(err, "installation") {
            ModuleError::Conflict { reason } => assert!(reason.contains("installation")),
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
