//! `/-/` introspection endpoints.
//!
//! Each endpoint is a [`JsonDataView`] over a [`DataSource`]; the view
//! serves the data as JSON for a `.json` URL and as an HTML page otherwise.

use std::sync::Arc;

use async_trait::async_trait;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::errors::{AppError, AppResult};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

use super::render_html;
use crate::plugins::HookContext;
use crate::router::{Handler, RoutedRequest};
use crate::state::AppContext;

/// Produces the payload of one introspection endpoint.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load(&self, ctx: &AppContext) -> AppResult<Value>;
}

pub struct JsonDataView {
    filename: String,
    source: Arc<dyn DataSource>,
}

impl JsonDataView {
    pub fn new(filename: impl Into<String>, source: Arc<dyn DataSource>) -> Self {
        Self {
            filename: filename.into(),
            source,
        }
    }
}

#[async_trait]
impl Handler<Arc<AppContext>> for JsonDataView {
    async fn call(&self, ctx: Arc<AppContext>, req: RoutedRequest) -> AppResult<Response> {
        let data = self.source.load(&ctx).await?;
        if req.format() == Some("json") {
            return Ok(Json(data).into_response());
        }
        let hook = HookContext {
            view_name: "json_data",
            database: None,
            table: None,
            metadata: &ctx.config.metadata,
        };
        let mut extra = Map::new();
        extra.insert("filename".into(), Value::String(self.filename.clone()));
        extra.insert("data".into(), data);
        render_html(&ctx, &req, &hook, &["show_json.html".to_string()], extra).await
    }
}

/// The built-in endpoints in registration order.
pub fn sources() -> Vec<(&'static str, Arc<dyn DataSource>)> {
    let metadata: Arc<dyn DataSource> = Arc::new(MetadataSource);
    let versions: Arc<dyn DataSource> = Arc::new(VersionsSource);
    let plugins: Arc<dyn DataSource> = Arc::new(PluginsSource);
    let config: Arc<dyn DataSource> = Arc::new(ConfigSource);
    let threads: Arc<dyn DataSource> = Arc::new(ThreadsSource);
    let databases: Arc<dyn DataSource> = Arc::new(DatabasesSource);
    vec![
        ("metadata", metadata),
        ("versions", versions),
        ("plugins", plugins),
        ("config", config),
        ("threads", threads),
        ("databases", databases),
    ]
}

pub struct MetadataSource;

#[async_trait]
impl DataSource for MetadataSource {
    async fn load(&self, ctx: &AppContext) -> AppResult<Value> {
        Ok(ctx.config.metadata.as_json().clone())
    }
}

pub struct VersionsSource;

#[async_trait]
impl DataSource for VersionsSource {
    async fn load(&self, ctx: &AppContext) -> AppResult<Value> {
        let fts_versions = tokio::task::spawn_blocking(fts_versions)
            .await
            .map_err(|e| AppError::Internal(e.to_string()))?;
        Ok(json!({
            "app": {
                "version": env!("CARGO_PKG_VERSION"),
                "note": ctx.config.version_note,
            },
            "sqlite": {
                "version": rusqlite::version(),
                "fts_versions": fts_versions,
            },
        }))
    }
}

/// Full-text search modules this SQLite build supports.
fn fts_versions() -> Vec<&'static str> {
    let Ok(conn) = Connection::open_in_memory() else {
        return Vec::new();
    };
    ["FTS5", "FTS4", "FTS3"]
        .into_iter()
        .filter(|module| {
            let sql = format!("create virtual table probe_{module} using {module}(body)");
            conn.execute_batch(&sql).is_ok()
        })
        .collect()
}

pub struct PluginsSource;

#[async_trait]
impl DataSource for PluginsSource {
    async fn load(&self, ctx: &AppContext) -> AppResult<Value> {
        Ok(Value::Array(ctx.plugins.describe()))
    }
}

pub struct ConfigSource;

#[async_trait]
impl DataSource for ConfigSource {
    async fn load(&self, ctx: &AppContext) -> AppResult<Value> {
        Ok(ctx.settings().to_json())
    }
}

pub struct ThreadsSource;

#[async_trait]
impl DataSource for ThreadsSource {
    async fn load(&self, ctx: &AppContext) -> AppResult<Value> {
        let pool = ctx.executor.pool_status();
        let metrics = tokio::runtime::Handle::current().metrics();
        Ok(json!({
            "num_threads": pool.num_threads,
            "threads": pool.threads,
            "busy": pool.busy,
            "queued": pool.queued,
            "runtime": {
                "num_workers": metrics.num_workers(),
                "num_alive_tasks": metrics.num_alive_tasks(),
            },
            "started_at": ctx.started_at.to_rfc3339(),
        }))
    }
}

pub struct DatabasesSource;

#[async_trait]
impl DataSource for DatabasesSource {
    async fn load(&self, ctx: &AppContext) -> AppResult<Value> {
        serde_json::to_value(ctx.registry.connected_databases().await)
            .map_err(|e| AppError::Internal(e.to_string()))
    }
}
