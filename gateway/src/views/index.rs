//! Index page: every database with its tables and row totals.

use std::sync::Arc;

use axum::response::Response;
use common::errors::AppResult;
use query_service::introspect::table_counts;
use serde_json::{json, Map, Value};

use super::{respond, DataPage};
use crate::router::RoutedRequest;
use crate::state::AppContext;
use crate::urls::{database_segment, encode_segment};

pub async fn index(ctx: Arc<AppContext>, req: RoutedRequest) -> AppResult<Response> {
    // Keyed by name, so the listing comes out sorted.
    let mut databases = Map::new();
    for db in ctx.registry.list().await {
        let tables = table_counts(&ctx.executor, &db, None).await?;
        let rows_sum: u64 = tables.iter().filter_map(|t| t.count).sum();
        let path = ctx.url(&encode_segment(&database_segment(ctx.settings(), &db)));
        databases.insert(
            db.name().to_string(),
            json!({
                "name": db.name(),
                "hash": db.hash(),
                "path": path,
                "tables_count": tables.len(),
                "table_rows_sum": rows_sum,
                "tables_truncated": tables.iter().any(|t| t.count.is_none()),
                "tables": tables,
            }),
        );
    }

    let title = ctx
        .config
        .metadata
        .lookup("title", None, None, true)
        .and_then(Value::as_str)
        .unwrap_or("Databases")
        .to_string();

    respond(
        &ctx,
        &req,
        DataPage {
            view_name: "index",
            database: None,
            table: None,
            templates: vec!["index.html".into(), "default.html".into()],
            title,
            columns: Vec::new(),
            rows: Vec::new(),
            data: Value::Object(databases),
            hashed: false,
        },
    )
    .await
}
