//! Table pages: one page of rows with offset pagination, or a canned query
//! when the metadata declares one under the same name.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Response;
use common::errors::{AppError, AppResult};
use common::models::{QueryOptions, QueryParams, QueryRequest, SqlValue};
use query_service::introspect::{escape_identifier, primary_keys, table_exists};
use serde_json::json;

use super::database::run_query;
use super::{format_suffix, respond, rows_json, DataPage};
use crate::router::{redirect, RoutedRequest};
use crate::state::AppContext;
use crate::urls::{encode_segment, resolve_database, Resolution};

pub async fn table_view(ctx: Arc<AppContext>, req: RoutedRequest) -> AppResult<Response> {
    let segment = req.param("db").unwrap_or_default();
    let table = req.param("table").unwrap_or_default().to_string();
    let rest = format!("/{}{}", encode_segment(&table), format_suffix(&req));
    let (db, hashed) = match resolve_database(&ctx, segment, &rest, req.query_string()).await? {
        Resolution::Found { db, hashed } => (db, hashed),
        Resolution::Redirect(target) => return Ok(redirect(&target)),
    };

    if let Some(query) = ctx.config.metadata.canned_query(db.name(), &table) {
        return run_query(
            &ctx,
            &req,
            &db,
            &query.sql,
            Some((&query.name, query.title.as_deref())),
            hashed,
        )
        .await;
    }
    if !table_exists(&ctx.executor, db.name(), &table).await? {
        return Err(AppError::NotFound(format!("Table not found: {table}")));
    }

    let size = page_size(&req, ctx.settings().default_page_size, ctx.settings().max_returned_rows)?;
    let offset = match req.arg("_next") {
        Some(raw) => raw
            .parse::<u64>()
            .ok()
            .filter(|n| i64::try_from(*n).is_ok())
            .ok_or_else(|| {
                AppError::application(StatusCode::BAD_REQUEST, "_next must be a non-negative integer")
            })?,
        None => 0,
    };

    let pks = primary_keys(&ctx.executor, db.name(), &table).await?;
    let escaped = escape_identifier(&table);
    let (select, order_by) = if pks.is_empty() {
        ("rowid, *".to_string(), "rowid".to_string())
    } else {
        let order: Vec<String> = pks.iter().map(|pk| escape_identifier(pk)).collect();
        ("*".to_string(), order.join(", "))
    };
    let sql = format!(
        "select {select} from {escaped} order by {order_by} limit {} offset {offset}",
        size.saturating_add(1)
    );
    let mut result = ctx
        .executor
        .execute(QueryRequest::new(db.name(), sql.clone()))
        .await
        .map_err(AppError::into_query_failure)?;

    let has_more = result.rows.len() > size;
    result.rows.truncate(size);
    let next = has_more.then(|| offset.saturating_add(size as u64));
    let next_url = next.map(|n| with_arg(&req, "_next", &n.to_string()));

    let count = match ctx
        .executor
        .execute(
            QueryRequest::new(db.name(), format!("select count(*) from {escaped}"))
                .options(QueryOptions::new().quiet()),
        )
        .await
    {
        Ok(result) => result.scalar().and_then(SqlValue::as_i64),
        Err(e) if e.is_interrupted() => None,
        Err(e) => return Err(e),
    };

    let rows = rows_json(&result);
    let data = json!({
        "database": db.name(),
        "table": table,
        "primary_keys": pks,
        "columns": result.columns,
        "rows": rows,
        "count": count,
        "next": next.map(|n| n.to_string()),
        "next_url": next_url,
        "query": {"sql": sql, "params": QueryParams::None.to_json()},
    });
    respond(
        &ctx,
        &req,
        DataPage {
            view_name: "table",
            database: Some(db.name()),
            table: Some(&table),
            templates: vec![
                format!("table-{}-{}.html", db.name(), table),
                "table.html".into(),
                "default.html".into(),
            ],
            title: table.clone(),
            columns: result.columns.clone(),
            rows,
            data,
            hashed,
        },
    )
    .await
}

/// `_size`: `max` or an integer in `1..=max_returned_rows`.
fn page_size(req: &RoutedRequest, default: usize, max: usize) -> AppResult<usize> {
    let invalid = || AppError::application(StatusCode::BAD_REQUEST, "_size must be a positive integer");
    let size = match req.arg("_size") {
        None => default,
        Some("max") if max > 0 => max,
        Some("max") => default,
        Some(raw) => raw.parse::<usize>().map_err(|_| invalid())?,
    };
    // SQLite limits are signed 64-bit and the query asks for one extra row.
    if size == 0 || i64::try_from(size).map_or(true, |n| n == i64::MAX) {
        return Err(invalid());
    }
    if max > 0 && size > max {
        return Err(AppError::application(
            StatusCode::BAD_REQUEST,
            format!("_size must be <= {max}"),
        ));
    }
    Ok(size)
}

/// The current URL with `name` set to `value`.
fn with_arg(req: &RoutedRequest, name: &str, value: &str) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, existing) in req.args.iter().filter(|(key, _)| key != name) {
        query.append_pair(key, existing);
    }
    query.append_pair(name, value);
    format!("{}?{}", req.uri.path(), query.finish())
}
