//! 视图
//!
//! 每个路由绑定的处理函数，以及它们共用的模板上下文和输出格式分派。

pub mod database;
pub mod files;
pub mod index;
pub mod pages;
pub mod row;
pub mod special;
pub mod table;

use axum::response::{Html, IntoResponse, Response};
use common::errors::{AppError, AppResult};
use common::models::QueryResult;
use serde_json::{Map, Value};

use crate::plugins::HookContext;
use crate::renderers::RenderInput;
use crate::router::RoutedRequest;
use crate::state::AppContext;
use crate::templates::escape_html;
use crate::urls::apply_cache_headers;

/// Variables every template sees.
pub fn base_context(ctx: &AppContext, hook: &HookContext<'_>) -> Map<String, Value> {
    let css = ctx.plugins.extra_css_urls(hook);
    let js = ctx.plugins.extra_js_urls(hook);
    let scripts = ctx.plugins.extra_body_script(hook);

    let css_html: String = css
        .iter()
        .map(|url| format!(r#"<link rel="stylesheet" href="{}">"#, escape_html(url)))
        .collect();
    let js_html: String = js
        .iter()
        .map(|url| format!(r#"<script src="{}"></script>"#, escape_html(url)))
        .collect();
    let scripts_html: String = scripts
        .iter()
        .map(|script| format!("<script>{script}</script>"))
        .collect();

    let mut context = Map::new();
    context.insert("base_url".into(), Value::String(ctx.settings().base_url.clone()));
    context.insert("app_version".into(), Value::String(env!("CARGO_PKG_VERSION").into()));
    context.insert(
        "version_note".into(),
        ctx.config.version_note.clone().map(Value::String).unwrap_or(Value::Null),
    );
    context.insert(
        "metadata".into(),
        Value::Object(ctx.config.metadata.merged(hook.database, hook.table, true)),
    );
    context.insert("extra_css_urls".into(), Value::from(css));
    context.insert("extra_js_urls".into(), Value::from(js));
    context.insert("extra_css_html".into(), Value::String(css_html));
    context.insert("extra_js_html".into(), Value::String(js_html));
    context.insert("extra_body_script_html".into(), Value::String(scripts_html));
    context.extend(ctx.plugins.extra_template_vars(hook));
    context
}

/// Renders the first existing template of `names` as an HTML page.
///
/// With `template_debug` on, `?_context=1` shows the context instead.
pub async fn render_html(
    ctx: &AppContext,
    req: &RoutedRequest,
    hook: &HookContext<'_>,
    names: &[String],
    extra: Map<String, Value>,
) -> AppResult<Response> {
    let mut context = base_context(ctx, hook);
    context.extend(extra);

    if ctx.settings().template_debug && req.arg("_context").is_some() {
        let dump = serde_json::to_string_pretty(&context).map_err(|e| AppError::Internal(e.to_string()))?;
        return Ok(Html(format!("<pre>{}</pre>", escape_html(&dump))).into_response());
    }

    let rendered = ctx
        .templates
        .render(names, &Value::Object(context))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Html(rendered.body).into_response())
}

/// A data view's output, rendered either by an output renderer (when the
/// URL carries an extension) or as an HTML page.
pub struct DataPage<'a> {
    pub view_name: &'a str,
    pub database: Option<&'a str>,
    pub table: Option<&'a str>,
    pub templates: Vec<String>,
    pub title: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub data: Value,
    /// Served from a hashed URL.
    pub hashed: bool,
}

pub async fn respond(ctx: &AppContext, req: &RoutedRequest, page: DataPage<'_>) -> AppResult<Response> {
    let mut response = match req.format() {
        Some(extension) => {
            let renderer = ctx
                .renderers
                .get(extension)
                .ok_or_else(|| AppError::NotFound(format!("Unknown format: {extension}")))?;
            (renderer.render)(&RenderInput {
                database: page.database.unwrap_or_default(),
                table: page.table,
                columns: &page.columns,
                rows: &page.rows,
                data: &page.data,
                args: &req.args,
            })?
        }
        None => {
            let hook = HookContext {
                view_name: page.view_name,
                database: page.database,
                table: page.table,
                metadata: &ctx.config.metadata,
            };
            let mut extra = Map::new();
            extra.insert("title".into(), Value::String(page.title.clone()));
            extra.insert("database".into(), page.database.map(Value::from).unwrap_or(Value::Null));
            extra.insert("table".into(), page.table.map(Value::from).unwrap_or(Value::Null));
            extra.insert("data".into(), page.data.clone());
            render_html(ctx, req, &hook, &page.templates, extra).await?
        }
    };
    apply_cache_headers(ctx, &mut response, page.hashed);
    Ok(response)
}

/// Rows as arrays of JSON values, in column order.
pub fn rows_json(result: &QueryResult) -> Vec<Vec<Value>> {
    result
        .rows
        .iter()
        .map(|row| row.values().iter().map(|v| v.to_json()).collect())
        .collect()
}

/// `.<format>` when the route captured one, for rebuilding URLs.
pub fn format_suffix(req: &RoutedRequest) -> String {
    req.format().map(|f| format!(".{f}")).unwrap_or_default()
}
