//! Custom pages: `/about` renders `pages/about.html` when no route matches.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use common::errors::{AppError, AppResult};
use percent_encoding::percent_decode_str;
use serde_json::{Map, Value};

use super::{base_context, render_html};
use crate::plugins::HookContext;
use crate::router::{redirect, PageFallback, RoutedRequest};
use crate::state::AppContext;
use crate::templates::{PageDirectives, TemplateError};

/// Looks up `pages/<path>.html` for unrouted paths.
pub struct PageTemplates;

#[async_trait]
impl PageFallback<Arc<AppContext>> for PageTemplates {
    async fn render_page(
        &self,
        ctx: Arc<AppContext>,
        req: &RoutedRequest,
    ) -> AppResult<Option<Response>> {
        let Some(name) = page_template(&req.path) else {
            return Ok(None);
        };
        let hook = HookContext {
            view_name: "page",
            database: None,
            table: None,
            metadata: &ctx.config.metadata,
        };
        let mut context = base_context(&ctx, &hook);
        context.insert("request_path".into(), Value::String(req.path.clone()));
        context.insert(
            "args".into(),
            Value::Object(
                req.args
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );

        match ctx.templates.render(&[name], &Value::Object(context)).await {
            Ok(rendered) => Ok(Some(apply_directives(rendered.body, &rendered.directives))),
            Err(TemplateError::NotFound(_)) => Ok(None),
            Err(e) => Err(AppError::Internal(e.to_string())),
        }
    }
}

/// `pages/<decoded path>.html`, or `None` for paths that cannot name a page.
fn page_template(path: &str) -> Option<String> {
    let decoded = percent_decode_str(path.trim_matches('/')).decode_utf8_lossy();
    if decoded
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return None;
    }
    Some(format!("pages/{decoded}.html"))
}

fn apply_directives(body: String, directives: &PageDirectives) -> Response {
    if let Some(location) = &directives.redirect {
        let mut response = redirect(location);
        if let Some(status) = directives.redirect_status.and_then(|s| StatusCode::from_u16(s).ok()) {
            *response.status_mut() = status;
        }
        return response;
    }
    let mut response = Html(body).into_response();
    if let Some(status) = directives.status.and_then(|s| StatusCode::from_u16(s).ok()) {
        *response.status_mut() = status;
    }
    for (name, value) in &directives.headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            tracing::warn!(header = %name, "Ignoring invalid page header");
            continue;
        };
        if name == header::CONTENT_TYPE {
            response.headers_mut().insert(name, value);
        } else {
            response.headers_mut().append(name, value);
        }
    }
    response
}

/// `/-/patterns`: a showcase of the page building blocks.
pub async fn patterns(ctx: Arc<AppContext>, req: RoutedRequest) -> AppResult<Response> {
    let hook = HookContext {
        view_name: "patterns",
        database: None,
        table: None,
        metadata: &ctx.config.metadata,
    };
    let mut extra = Map::new();
    extra.insert("title".into(), Value::String("Pattern portfolio".into()));
    render_html(&ctx, &req, &hook, &["patterns.html".to_string()], extra).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_names() {
        assert_eq!(page_template("/about").as_deref(), Some("pages/about.html"));
        assert_eq!(page_template("/docs/intro").as_deref(), Some("pages/docs/intro.html"));
        assert_eq!(page_template("/hello%20world").as_deref(), Some("pages/hello world.html"));
        assert_eq!(page_template("/"), None);
        assert_eq!(page_template("/a/../b"), None);
        assert_eq!(page_template("/a//b"), None);
    }

    #[test]
    fn directives_shape_the_response() {
        let directives = PageDirectives {
            headers: vec![("Content-Type".into(), "text/plain".into()), ("x-teapot".into(), "yes".into())],
            status: Some(418),
            ..Default::default()
        };
        let response = apply_directives("hi".into(), &directives);
        assert_eq!(response.status().as_u16(), 418);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(response.headers()["x-teapot"], "yes");

        let directives = PageDirectives {
            redirect: Some("/elsewhere".into()),
            ..Default::default()
        };
        let response = apply_directives("ignored".into(), &directives);
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/elsewhere");

        let directives = PageDirectives {
            redirect: Some("/moved".into()),
            redirect_status: Some(301),
            ..Default::default()
        };
        let response = apply_directives(String::new(), &directives);
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/moved");
    }
}
