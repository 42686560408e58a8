//! 应用组装
//!
//! 按固定顺序注册所有路由，并把路由表挂到 axum 的 fallback 上：
//! axum 自带的路由按最长匹配而不是注册顺序选择，这里需要后者。

use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Request, State};
use axum::middleware;
use axum::response::Response;
use axum::Router;
use common::config::AppConfig;
use common::middleware::request_id_middleware;
use tower::util::option_layer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::errors;
use crate::plugins::Plugin;
use crate::router::RouteTable;
use crate::state::{AppContext, AppState};
use crate::views::{database, files, index, pages, row, special, table};

/// Registers every route in matching order.
pub fn build_routes(ctx: &AppContext) -> anyhow::Result<RouteTable<Arc<AppContext>>> {
    let mut routes = RouteTable::new(&ctx.settings().base_url);
    let ext = ctx.renderers.extension_pattern();

    routes.register(r"/(?:\.(?P<format>json))?", index::index)?;
    routes.register(r"/favicon\.ico", files::favicon)?;
    routes.register(
        r"/-/static/(?P<path>.*)",
        files::StaticFiles::new(ctx.config.static_dir.clone()),
    )?;
    for mount in &ctx.config.static_mounts {
        routes.register(
            &format!("/{}/(?P<path>.*)", regex::escape(&mount.mount)),
            files::StaticFiles::new(mount.dir.clone()),
        )?;
    }
    for (name, dir) in ctx.plugins.static_dirs() {
        let mut variants = vec![name.clone(), name.replace('-', "_"), name.replace('_', "-")];
        variants.sort();
        variants.dedup();
        for variant in variants {
            routes.register(
                &format!("/-/static-plugins/{}/(?P<path>.*)", regex::escape(&variant)),
                files::StaticFiles::new(dir.clone()),
            )?;
        }
    }
    for (name, source) in special::sources() {
        routes.register(
            &format!(r"/-/{name}(?:\.(?P<format>json))?"),
            special::JsonDataView::new(format!("{name}.json"), source),
        )?;
    }
    routes.register(r"/-/patterns", pages::patterns)?;
    routes.register(r"/(?P<db>[^/]+?)\.db", files::download)?;
    routes.register(
        &format!(r"/(?P<db>[^/]+?)(?:\.(?P<format>{ext}))?"),
        database::database_view,
    )?;
    routes.register(
        &format!(r"/(?P<db>[^/]+)/(?P<table>[^/]+?)(?:\.(?P<format>{ext}))?"),
        table::table_view,
    )?;
    routes.register(
        &format!(r"/(?P<db>[^/]+)/(?P<table>[^/]+?)/(?P<pks>[^/]+?)(?:\.(?P<format>{ext}))?"),
        row::row_view,
    )?;
    routes.set_fallback(pages::PageTemplates);

    tracing::info!(routes = routes.len(), base = %routes.base_prefix(), "Routes registered");
    Ok(routes)
}

/// Wraps the route table in the HTTP middleware stack.
pub fn create_router(state: AppState) -> Router {
    let ctx = state.ctx.clone();
    let cors = ctx.config.cors.then(|| {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    });

    let router = Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(option_layer(cors))
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http());
    ctx.plugins.wrap_router(router)
}

async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let (parts, _body) = request.into_parts();
    match state.routes.dispatch(state.ctx.clone(), &parts).await {
        Ok(response) => response,
        Err(err) => errors::translate(&state.ctx, &err, parts.uri.path()).await,
    }
}

/// Builds the whole application: databases, warmed counts, routes and
/// middleware.
pub async fn build(config: AppConfig, plugins: Vec<Arc<dyn Plugin>>) -> anyhow::Result<Router> {
    let ctx = AppContext::new(config, plugins)?;
    query_service::introspect::warm_table_counts(&ctx.executor).await;
    let routes = build_routes(&ctx).context("invalid route pattern")?;
    Ok(create_router(AppState::new(ctx, routes)))
}
