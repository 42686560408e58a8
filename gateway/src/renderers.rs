//! Output renderers keyed by URL extension.

use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::Json;
use common::errors::AppResult;
use serde_json::Value;

/// What a data view hands to a renderer.
pub struct RenderInput<'a> {
    pub database: &'a str,
    pub table: Option<&'a str>,
    pub columns: &'a [String],
    /// Rows as arrays in column order.
    pub rows: &'a [Vec<Value>],
    /// The view's complete JSON payload.
    pub data: &'a Value,
    pub args: &'a [(String, String)],
}

pub type RenderFn = Arc<dyn Fn(&RenderInput<'_>) -> AppResult<Response> + Send + Sync>;

#[derive(Clone)]
pub struct OutputRenderer {
    pub extension: String,
    pub render: RenderFn,
}

impl OutputRenderer {
    pub fn new<F>(extension: impl Into<String>, render: F) -> Self
    where
        F: Fn(&RenderInput<'_>) -> AppResult<Response> + Send + Sync + 'static,
    {
        Self {
            extension: extension.into(),
            render: Arc::new(render),
        }
    }
}

fn render_json(input: &RenderInput<'_>) -> AppResult<Response> {
    Ok(Json(input.data.clone()).into_response())
}

/// Renderers in registration order, `json` first.
pub struct RendererRegistry {
    renderers: Vec<OutputRenderer>,
}

impl RendererRegistry {
    /// Seeds `json` and appends plugin renderers. A later renderer for an
    /// extension already taken is ignored.
    pub fn new(extra: Vec<OutputRenderer>) -> Self {
        let mut renderers = vec![OutputRenderer::new("json", render_json)];
        for renderer in extra {
            if renderers.iter().any(|r| r.extension == renderer.extension) {
                tracing::warn!(extension = %renderer.extension, "Duplicate output renderer ignored");
                continue;
            }
            renderers.push(renderer);
        }
        Self { renderers }
    }

    pub fn get(&self, extension: &str) -> Option<&OutputRenderer> {
        self.renderers.iter().find(|r| r.extension == extension)
    }

    pub fn extensions(&self) -> Vec<&str> {
        self.renderers.iter().map(|r| r.extension.as_str()).collect()
    }

    /// Regex alternation of all known extensions, for route patterns.
    pub fn extension_pattern(&self) -> String {
        self.renderers
            .iter()
            .map(|r| regex::escape(&r.extension))
            .collect::<Vec<_>>()
            .join("|")
    }
}
