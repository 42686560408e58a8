//! 插件钩子
//!
//! 插件实现 [`Plugin`] 中需要的钩子；所有返回多个值的钩子统一返回 `Vec`，
//! 由 [`PluginManager`] 按注册顺序调用并合并结果。

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use common::metadata::Metadata;
use connection_service::ConnectionHook;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

use crate::renderers::OutputRenderer;

/// Wraps the assembled HTTP router, outermost last.
pub type RouterWrapper = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// Where a page-level hook is being called from.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub view_name: &'a str,
    pub database: Option<&'a str>,
    pub table: Option<&'a str>,
    pub metadata: &'a Metadata,
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> Option<&str> {
        None
    }

    /// Directory served under `/-/static-plugins/<name>/`.
    fn static_dir(&self) -> Option<PathBuf> {
        None
    }

    /// Directory searched for templates after the configured one.
    fn templates_dir(&self) -> Option<PathBuf> {
        None
    }

    /// Called once for every new connection.
    fn prepare_connection(&self, _conn: &Connection, _database: &str) -> rusqlite::Result<()> {
        Ok(())
    }

    /// Globals made available to every template.
    fn prepare_templates(&self) -> Vec<(String, Value)> {
        Vec::new()
    }

    fn extra_css_urls(&self, _hook: &HookContext<'_>) -> Vec<String> {
        Vec::new()
    }

    fn extra_js_urls(&self, _hook: &HookContext<'_>) -> Vec<String> {
        Vec::new()
    }

    fn extra_body_script(&self, _hook: &HookContext<'_>) -> Vec<String> {
        Vec::new()
    }

    fn extra_template_vars(&self, _hook: &HookContext<'_>) -> Vec<(String, Value)> {
        Vec::new()
    }

    fn register_output_renderer(&self) -> Vec<OutputRenderer> {
        Vec::new()
    }

    fn wrap_router(&self) -> Vec<RouterWrapper> {
        Vec::new()
    }
}

/// Registered plugins, called in registration order.
#[derive(Clone, Default)]
pub struct PluginManager {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginManager {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        for plugin in &plugins {
            tracing::info!(plugin = plugin.name(), "Plugin loaded");
        }
        Self { plugins }
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// `(name, dir)` for every plugin that ships static assets.
    pub fn static_dirs(&self) -> Vec<(String, PathBuf)> {
        self.plugins
            .iter()
            .filter_map(|p| p.static_dir().map(|dir| (p.name().to_string(), dir)))
            .collect()
    }

    pub fn template_dirs(&self) -> Vec<PathBuf> {
        self.plugins.iter().filter_map(|p| p.templates_dir()).collect()
    }

    pub fn connection_hook(&self) -> Arc<dyn ConnectionHook> {
        Arc::new(PluginConnectionHook {
            plugins: self.plugins.clone(),
        })
    }

    pub fn template_globals(&self) -> Map<String, Value> {
        self.plugins
            .iter()
            .flat_map(|p| p.prepare_templates())
            .collect()
    }

    /// Metadata URLs first, then plugin URLs; duplicates dropped.
    pub fn extra_css_urls(&self, hook: &HookContext<'_>) -> Vec<String> {
        let from_metadata = metadata_urls(hook, "extra_css_urls");
        let from_plugins = self.plugins.iter().flat_map(|p| p.extra_css_urls(hook));
        dedup(from_metadata.into_iter().chain(from_plugins))
    }

    pub fn extra_js_urls(&self, hook: &HookContext<'_>) -> Vec<String> {
        let from_metadata = metadata_urls(hook, "extra_js_urls");
        let from_plugins = self.plugins.iter().flat_map(|p| p.extra_js_urls(hook));
        dedup(from_metadata.into_iter().chain(from_plugins))
    }

    pub fn extra_body_script(&self, hook: &HookContext<'_>) -> Vec<String> {
        self.plugins
            .iter()
            .flat_map(|p| p.extra_body_script(hook))
            .collect()
    }

    pub fn extra_template_vars(&self, hook: &HookContext<'_>) -> Map<String, Value> {
        self.plugins
            .iter()
            .flat_map(|p| p.extra_template_vars(hook))
            .collect()
    }

    pub fn output_renderers(&self) -> Vec<OutputRenderer> {
        self.plugins
            .iter()
            .flat_map(|p| p.register_output_renderer())
            .collect()
    }

    pub fn wrap_router(&self, router: Router) -> Router {
        self.plugins
            .iter()
            .flat_map(|p| p.wrap_router())
            .fold(router, |router, wrap| wrap(router))
    }

    /// Listing for `/-/plugins`.
    pub fn describe(&self) -> Vec<Value> {
        self.plugins
            .iter()
            .map(|p| {
                json!({
                    "name": p.name(),
                    "static": p.static_dir().is_some(),
                    "templates": p.templates_dir().is_some(),
                    "version": p.version(),
                })
            })
            .collect()
    }
}

struct PluginConnectionHook {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl ConnectionHook for PluginConnectionHook {
    fn prepare(&self, conn: &Connection, database: &str) -> rusqlite::Result<()> {
        for plugin in &self.plugins {
            plugin.prepare_connection(conn, database)?;
        }
        Ok(())
    }
}

/// URLs listed in metadata, as plain strings or `{"url": ...}` objects.
fn metadata_urls(hook: &HookContext<'_>, key: &str) -> Vec<String> {
    let Some(Value::Array(items)) = hook.metadata.lookup(key, hook.database, hook.table, true)
    else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(url) => Some(url.clone()),
            Value::Object(obj) => obj.get("url").and_then(Value::as_str).map(String::from),
            _ => None,
        })
        .collect()
}

fn dedup(urls: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = Vec::new();
    for url in urls {
        if !seen.contains(&url) {
            seen.push(url);
        }
    }
    seen
}
