//! 错误转换
//!
//! 所有未被视图处理的错误都在这里统一转换为响应：路径以 `.json` 结尾时返回
//! JSON，否则依次尝试 `<status>.html` 和 `500.html` 模板渲染错误页面。

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use common::errors::AppError;
use common::response::ErrorPayload;
use serde_json::Value;

use crate::plugins::HookContext;
use crate::state::AppContext;
use crate::templates::escape_html;
use crate::views;

/// Whether the request path, ignoring any query string, asks for JSON.
pub fn wants_json(path: &str) -> bool {
    path.split('?').next().unwrap_or_default().ends_with(".json")
}

/// Turns a failure into the final response.
pub async fn translate(ctx: &AppContext, err: &AppError, path: &str) -> Response {
    let payload = ErrorPayload::from(err);
    if payload.status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = ?err, path = %path, "Unhandled error");
    } else {
        tracing::debug!(status = payload.status.as_u16(), error = %err, path = %path, "Request failed");
    }

    if wants_json(path) {
        (payload.status, Json(payload.to_json())).into_response()
    } else {
        html_error(ctx, &payload).await
    }
}

async fn html_error(ctx: &AppContext, payload: &ErrorPayload) -> Response {
    let status = payload.status;
    let title = payload
        .title()
        .map(String::from)
        .unwrap_or_else(|| format!("Error {}", status.as_u16()));
    let message_html = if payload.message_is_html {
        payload.message().to_string()
    } else {
        escape_html(payload.message())
    };

    let hook = HookContext {
        view_name: "error",
        database: None,
        table: None,
        metadata: &ctx.config.metadata,
    };
    let mut context = views::base_context(ctx, &hook);
    context.extend(payload.body.clone());
    context.insert("status".into(), Value::from(status.as_u16()));
    context.insert("title".into(), Value::String(title));
    context.insert("message_html".into(), Value::String(message_html));

    let names = [format!("{}.html", status.as_u16()), "500.html".to_string()];
    match ctx.templates.render(&names, &Value::Object(context)).await {
        Ok(rendered) => (status, Html(rendered.body)).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Error page could not be rendered");
            (status, payload.message().to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_suffix_ignores_query_string() {
        assert!(wants_json("/-/versions.json"));
        assert!(wants_json("/db/table.json?_size=1"));
        assert!(!wants_json("/db/table?format=.json"));
        assert!(!wants_json("/db/table"));
    }
}
