//! Database registry.
//!
//! Owns every [`Database`] the server publishes, keyed by unique name and
//! kept in insertion order.

use std::path::PathBuf;
use std::sync::Arc;

use common::models::DatabaseInfo;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::database::Database;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("duplicate database name: {0}")]
    DuplicateName(String),
}

/// Registry of published databases.
///
/// Lookups take a read lock; mutations (start-up, hot reload) take the write
/// lock, so concurrent dispatch always sees either the old or the new set.
#[derive(Debug, Default)]
pub struct DatabaseRegistry {
    databases: RwLock<Vec<Arc<Database>>>,
}

impl DatabaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the start-up registry from the configured file lists.
    ///
    /// With no files at all, or when `memory` is set, a synthetic in-memory
    /// database is registered first.
    pub fn from_config(
        files: &[PathBuf],
        immutables: &[PathBuf],
        memory: bool,
    ) -> Result<Self, RegistryError> {
        let mut databases: Vec<Arc<Database>> = Vec::new();
        if memory || (files.is_empty() && immutables.is_empty()) {
            databases.push(Arc::new(Database::memory()));
        }
        let candidates = files
            .iter()
            .map(|p| Database::from_file(p.clone(), true))
            .chain(immutables.iter().map(|p| Database::from_file(p.clone(), false)));
        for db in candidates {
            if databases.iter().any(|d| d.name() == db.name()) {
                return Err(RegistryError::DuplicateName(db.name().to_string()));
            }
            tracing::info!(
                name = %db.name(),
                mutable = db.is_mutable(),
                "Database registered"
            );
            databases.push(Arc::new(db));
        }
        Ok(Self {
            databases: RwLock::new(databases),
        })
    }

    /// Adds a database at runtime. Fails if the name is already taken.
    /// An immutable database is hashed before it becomes visible.
    pub async fn add(&self, db: Database) -> Result<Arc<Database>, RegistryError> {
        if self.contains(db.name()).await {
            return Err(RegistryError::DuplicateName(db.name().to_string()));
        }
        let db = Arc::new(db);
        hash_off_runtime(vec![db.clone()]).await;
        let mut databases = self.databases.write().await;
        if databases.iter().any(|d| d.name() == db.name()) {
            return Err(RegistryError::DuplicateName(db.name().to_string()));
        }
        databases.push(db.clone());
        tracing::info!(name = %db.name(), "Database added");
        Ok(db)
    }

    /// Hashes every immutable database on the blocking pool, so request
    /// handlers only ever read the cached digest.
    pub async fn warm_hashes(&self) {
        hash_off_runtime(self.list().await).await;
    }

    /// Removes a database by name, returning it if it was registered.
    pub async fn remove(&self, name: &str) -> Option<Arc<Database>> {
        let mut databases = self.databases.write().await;
        let index = databases.iter().position(|d| d.name() == name)?;
        let removed = databases.remove(index);
        tracing::info!(name = %name, "Database removed");
        Some(removed)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Database>> {
        self.databases
            .read()
            .await
            .iter()
            .find(|d| d.name() == name)
            .cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.get(name).await.is_some()
    }

    /// All databases in insertion order.
    pub async fn list(&self) -> Vec<Arc<Database>> {
        self.databases.read().await.clone()
    }

    pub async fn names(&self) -> Vec<String> {
        self.databases
            .read()
            .await
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.databases.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.databases.read().await.is_empty()
    }

    // ============== Introspection ==============

    /// Listing for `/-/databases`, sorted by name.
    ///
    /// Size and hash may touch the filesystem, so they are computed off the
    /// async runtime.
    pub async fn connected_databases(&self) -> Vec<DatabaseInfo> {
        let databases = self.list().await;
        let listing = tokio::task::spawn_blocking(move || {
            let mut infos: Vec<DatabaseInfo> = databases.iter().map(|d| d.info()).collect();
            infos.sort_by(|a, b| a.name.cmp(&b.name));
            infos
        })
        .await;
        match listing {
            Ok(infos) => infos,
            Err(e) => {
                tracing::error!(error = %e, "Database listing task failed");
                Vec::new()
            }
        }
    }
}

async fn hash_off_runtime(databases: Vec<Arc<Database>>) {
    let pending: Vec<Arc<Database>> = databases
        .into_iter()
        .filter(|d| !d.is_mutable() && d.hash().is_none())
        .collect();
    if pending.is_empty() {
        return;
    }
    let hashed = tokio::task::spawn_blocking(move || {
        for db in &pending {
            if db.compute_hash().is_some() {
                tracing::info!(name = %db.name(), "Database hashed");
            }
        }
    })
    .await;
    if let Err(e) = hashed {
        tracing::error!(error = %e, "Database hashing task failed");
    }
}
