//! 路由分发
//!
//! 按注册顺序匹配正则路由（先注册者优先），匹配前剥离配置的基础路径前缀，
//! 全部未命中（或处理函数报告资源不存在）时依次尝试：尾部斜杠重定向 → 页面模板 → NotFound。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, request::Parts, HeaderMap, Method, StatusCode, Uri};
use axum::response::Response;
use common::errors::{AppError, AppResult};
use percent_encoding::percent_decode_str;
use regex::Regex;

/// A request after base-prefix stripping and route matching.
#[derive(Debug, Clone)]
pub struct RoutedRequest {
    pub method: Method,
    /// The URI as received, prefix included.
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Path with the base prefix removed; always starts with `/`.
    pub path: String,
    /// Named captures of the matched route, percent-decoded.
    pub params: HashMap<String, String>,
    /// The same captures as they appeared in the path.
    pub raw_params: HashMap<String, String>,
    /// Decoded query arguments in order.
    pub args: Vec<(String, String)>,
}

impl RoutedRequest {
    pub fn new(parts: &Parts, base_prefix: &str) -> Self {
        let args = parts
            .uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            path: strip_base(parts.uri.path(), base_prefix).to_string(),
            params: HashMap::new(),
            raw_params: HashMap::new(),
            args,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// A capture before percent-decoding, for values that carry their own
    /// escaped separators.
    pub fn raw_param(&self, name: &str) -> Option<&str> {
        self.raw_params.get(name).map(String::as_str)
    }

    /// First value of a query argument.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn query_string(&self) -> Option<&str> {
        self.uri.query()
    }

    /// The output-format suffix captured by the route, if any.
    pub fn format(&self) -> Option<&str> {
        self.param("format").filter(|f| !f.is_empty())
    }
}

/// Removes `prefix` from the front of `path` when it sits on a segment
/// boundary. An empty prefix leaves the path untouched.
pub fn strip_base<'a>(path: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return path;
    }
    match path.strip_prefix(prefix) {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

/// Something a route can be bound to.
#[async_trait]
pub trait Handler<S>: Send + Sync {
    async fn call(&self, state: S, req: RoutedRequest) -> AppResult<Response>;
}

#[async_trait]
impl<S, F, Fut> Handler<S> for F
where
    S: Send + 'static,
    F: Fn(S, RoutedRequest) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = AppResult<Response>> + Send + 'static,
{
    async fn call(&self, state: S, req: RoutedRequest) -> AppResult<Response> {
        (self)(state, req).await
    }
}

/// Second step of the not-found chain: render a page for an unrouted path.
#[async_trait]
pub trait PageFallback<S>: Send + Sync {
    /// `Ok(None)` when no page exists for this path.
    async fn render_page(&self, state: S, req: &RoutedRequest) -> AppResult<Option<Response>>;
}

struct Route<S> {
    pattern: Regex,
    handler: Arc<dyn Handler<S>>,
}

/// Ordered route bindings. Append-only while building, read-only once
/// serving starts.
pub struct RouteTable<S> {
    routes: Vec<Route<S>>,
    base_prefix: String,
    fallback: Option<Arc<dyn PageFallback<S>>>,
}

impl<S: Clone + Send + 'static> RouteTable<S> {
    /// `base_url` may carry a trailing slash; `/` means no prefix.
    pub fn new(base_url: &str) -> Self {
        Self {
            routes: Vec::new(),
            base_prefix: base_url.trim_end_matches('/').to_string(),
            fallback: None,
        }
    }

    /// Appends a binding. `pattern` is anchored at both ends.
    pub fn register(
        &mut self,
        pattern: &str,
        handler: impl Handler<S> + 'static,
    ) -> Result<(), regex::Error> {
        self.register_arc(pattern, Arc::new(handler))
    }

    pub fn register_arc(
        &mut self,
        pattern: &str,
        handler: Arc<dyn Handler<S>>,
    ) -> Result<(), regex::Error> {
        let pattern = Regex::new(&format!("^{pattern}$"))?;
        tracing::debug!(pattern = %pattern, "Route registered");
        self.routes.push(Route { pattern, handler });
        Ok(())
    }

    pub fn set_fallback(&mut self, fallback: impl PageFallback<S> + 'static) {
        self.fallback = Some(Arc::new(fallback));
    }

    pub fn base_prefix(&self) -> &str {
        &self.base_prefix
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Index of the first binding matching `path`.
    pub fn find(&self, path: &str) -> Option<usize> {
        self.routes.iter().position(|r| r.pattern.is_match(path))
    }

    /// Routes a request to the first matching binding, or runs the
    /// not-found chain.
    pub async fn dispatch(&self, state: S, parts: &Parts) -> AppResult<Response> {
        let mut req = RoutedRequest::new(parts, &self.base_prefix);

        for route in &self.routes {
            let Some(captures) = route.pattern.captures(&req.path) else {
                continue;
            };
            for name in route.pattern.capture_names().flatten() {
                if let Some(m) = captures.name(name) {
                    let decoded = percent_decode_str(m.as_str()).decode_utf8_lossy();
                    req.params.insert(name.to_string(), decoded.into_owned());
                    req.raw_params.insert(name.to_string(), m.as_str().to_string());
                }
            }
            let unmatched = req.clone();
            return match route.handler.call(state.clone(), req).await {
                Err(AppError::NotFound(message)) => {
                    self.not_found(state, unmatched, Some(message)).await
                }
                other => other,
            };
        }

        self.not_found(state, req, None).await
    }

    /// A handler reporting a missing resource enters the chain too; its
    /// message is kept for the final 404.
    async fn not_found(
        &self,
        state: S,
        req: RoutedRequest,
        message: Option<String>,
    ) -> AppResult<Response> {
        let raw_path = req.uri.path();
        if req.path.len() > 1 && req.path.ends_with('/') {
            let mut target = raw_path.trim_end_matches('/').to_string();
            if target.is_empty() {
                target.push('/');
            }
            if let Some(query) = req.query_string() {
                target.push('?');
                target.push_str(query);
            }
            return Ok(redirect(&target));
        }
        if let Some(fallback) = &self.fallback {
            if let Some(response) = fallback.render_page(state, &req).await? {
                return Ok(response);
            }
        }
        Err(AppError::NotFound(
            message.unwrap_or_else(|| "Page not found".into()),
        ))
    }
}

/// `302 Found` with an empty body.
pub fn redirect(location: &str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::FOUND;
    if let Ok(value) = location.parse() {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}
