//! Application state for the gateway.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use common::config::{AppConfig, Settings};
use connection_service::{ConnectionSetup, DatabaseRegistry};
use query_service::QueryExecutor;

use crate::plugins::{Plugin, PluginManager};
use crate::renderers::RendererRegistry;
use crate::router::RouteTable;
use crate::templates::{FileTemplates, TemplateRenderer};

/// Everything a view needs, built once at start-up.
pub struct AppContext {
    pub config: AppConfig,
    pub registry: Arc<DatabaseRegistry>,
    pub executor: QueryExecutor,
    pub plugins: PluginManager,
    pub renderers: RendererRegistry,
    pub templates: Arc<dyn TemplateRenderer>,
    pub started_at: DateTime<Utc>,
}

impl AppContext {
    /// Builds the context: databases, then the executor, then renderers and
    /// templates.
    pub fn new(config: AppConfig, plugins: Vec<Arc<dyn Plugin>>) -> anyhow::Result<Arc<Self>> {
        let registry = Arc::new(
            DatabaseRegistry::from_config(&config.files, &config.immutables, config.memory)
                .context("invalid database list")?,
        );

        let plugins = PluginManager::new(plugins);
        let setup = ConnectionSetup {
            extensions: config.sqlite_extensions.clone(),
            cache_size_kb: config.settings.cache_size_kb,
            ..ConnectionSetup::new()
        }
        .with_hook(plugins.connection_hook());
        let executor = QueryExecutor::from_settings(registry.clone(), setup, &config.settings)
            .context("failed to start SQL workers")?;

        let renderers = RendererRegistry::new(plugins.output_renderers());

        let mut template_dirs = Vec::new();
        template_dirs.extend(config.template_dir.clone());
        template_dirs.extend(plugins.template_dirs());
        let templates: Arc<dyn TemplateRenderer> =
            Arc::new(FileTemplates::new(template_dirs, plugins.template_globals()));

        Ok(Arc::new(Self {
            config,
            registry,
            executor,
            plugins,
            renderers,
            templates,
            started_at: Utc::now(),
        }))
    }

    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    /// `base_url` joined with `path`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings().base_prefix(), path.trim_start_matches('/'))
    }
}

/// Shared HTTP state: the context plus the frozen route table.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
    pub routes: Arc<RouteTable<Arc<AppContext>>>,
}

impl AppState {
    pub fn new(ctx: Arc<AppContext>, routes: RouteTable<Arc<AppContext>>) -> Self {
        Self {
            ctx,
            routes: Arc::new(routes),
        }
    }
}
