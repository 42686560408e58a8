//! Database entity models.
//!
//! Serializable views of the registry contents used by introspection
//! endpoints and listing pages.

use serde::Serialize;

/// Row of the `/-/databases` listing.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DatabaseInfo {
    pub name: String,
    /// Filesystem path, absent for the in-memory database.
    pub path: Option<String>,
    /// Size in bytes.
    pub size: u64,
    pub is_mutable: bool,
    pub is_memory: bool,
    /// SHA-256 of the file contents (immutable file databases only).
    pub hash: Option<String>,
}

/// A table and its row count. `count` is absent when counting was skipped
/// because it ran past its time limit.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TableSummary {
    pub name: String,
    pub count: Option<u64>,
}
