//! One logical SQLite database.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use common::models::{DatabaseInfo, TableSummary};
use sha2::{Digest, Sha256};

/// Name used for the synthetic in-memory database.
pub const MEMORY_NAME: &str = ":memory:";

/// A database served by the registry.
///
/// Everything but the lazily computed facts (size, hash, table counts) is
/// fixed at construction. Immutable databases cache those facts for the
/// life of the process; mutable ones recompute size on every call and never
/// cache a hash.
#[derive(Debug)]
pub struct Database {
    name: String,
    path: Option<PathBuf>,
    is_mutable: bool,
    is_memory: bool,
    cached_size: OnceLock<u64>,
    cached_hash: OnceLock<String>,
    cached_table_counts: OnceLock<Vec<TableSummary>>,
}

impl Database {
    /// A file-backed database named after the file stem.
    pub fn from_file(path: impl Into<PathBuf>, is_mutable: bool) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            name,
            path: Some(path),
            is_mutable,
            is_memory: false,
            cached_size: OnceLock::new(),
            cached_hash: OnceLock::new(),
            cached_table_counts: OnceLock::new(),
        }
    }

    pub fn memory() -> Self {
        Self {
            name: MEMORY_NAME.to_string(),
            path: None,
            is_mutable: true,
            is_memory: true,
            cached_size: OnceLock::new(),
            cached_hash: OnceLock::new(),
            cached_table_counts: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_mutable(&self) -> bool {
        self.is_mutable
    }

    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// File size in bytes; 0 for the memory database or an unreadable file.
    pub fn size(&self) -> u64 {
        let Some(path) = &self.path else {
            return 0;
        };
        let read = || std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if self.is_mutable {
            read()
        } else {
            *self.cached_size.get_or_init(read)
        }
    }

    /// Cached SHA-256 hex digest. Never touches the file; `None` until
    /// [`Database::compute_hash`] has run.
    pub fn hash(&self) -> Option<String> {
        self.cached_hash.get().cloned()
    }

    /// Reads the whole file to hash it, immutable file databases only.
    /// Blocking; async callers go through `spawn_blocking`.
    pub fn compute_hash(&self) -> Option<String> {
        if self.is_mutable || self.is_memory {
            return None;
        }
        if let Some(hash) = self.cached_hash.get() {
            return Some(hash.clone());
        }
        let path = self.path.as_deref()?;
        match hash_file(path) {
            Ok(hash) => Some(self.cached_hash.get_or_init(|| hash).clone()),
            Err(e) => {
                tracing::warn!(database = %self.name, error = %e, "Failed to hash database file");
                None
            }
        }
    }

    /// Table counts computed once at startup, immutable databases only.
    pub fn cached_table_counts(&self) -> Option<&[TableSummary]> {
        self.cached_table_counts.get().map(Vec::as_slice)
    }

    /// Stores table counts. Ignored for mutable databases and after the
    /// first call.
    pub fn cache_table_counts(&self, counts: Vec<TableSummary>) {
        if !self.is_mutable {
            let _ = self.cached_table_counts.set(counts);
        }
    }

    pub fn info(&self) -> DatabaseInfo {
        DatabaseInfo {
            name: self.name.clone(),
            path: self.path.as_ref().map(|p| p.to_string_lossy().into_owned()),
            size: self.size(),
            is_mutable: self.is_mutable,
            is_memory: self.is_memory,
            hash: self.compute_hash(),
        }
    }
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_comes_from_file_stem() {
        let db = Database::from_file("/data/fixtures.db", true);
        assert_eq!(db.name(), "fixtures");
        assert!(!db.is_memory());
    }

    #[test]
    fn memory_database_has_no_size_or_hash() {
        let db = Database::memory();
        assert_eq!(db.name(), MEMORY_NAME);
        assert_eq!(db.size(), 0);
        assert_eq!(db.hash(), None);
        assert!(db.info().path.is_none());
    }

    #[test]
    fn immutable_database_caches_size_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frozen.db");
        std::fs::write(&path, b"abc").unwrap();
        let db = Database::from_file(&path, false);
        assert_eq!(db.size(), 3);
        assert_eq!(db.hash(), None);
        assert_eq!(
            db.compute_hash().as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        std::fs::write(&path, b"abcdef").unwrap();
        assert_eq!(db.size(), 3);
        assert_eq!(db.hash(), db.compute_hash());
    }

    #[test]
    fn mutable_database_recomputes_size_and_skips_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.db");
        std::fs::write(&path, b"abc").unwrap();
        let db = Database::from_file(&path, true);
        assert_eq!(db.size(), 3);
        std::fs::write(&path, b"abcdef").unwrap();
        assert_eq!(db.size(), 6);
        assert_eq!(db.compute_hash(), None);
    }

    #[test]
    fn table_counts_are_only_cached_for_immutable() {
        let counts = vec![TableSummary { name: "t".into(), count: Some(1) }];
        let live = Database::from_file("live.db", true);
        live.cache_table_counts(counts.clone());
        assert!(live.cached_table_counts().is_none());
        let frozen = Database::from_file("frozen.db", false);
        frozen.cache_table_counts(counts.clone());
        assert_eq!(frozen.cached_table_counts(), Some(counts.as_slice()));
    }
}
