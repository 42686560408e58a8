//! A single record addressed by its primary key values.

use std::sync::Arc;

use axum::response::Response;
use common::errors::{AppError, AppResult};
use common::models::{QueryParams, QueryRequest, SqlValue};
use percent_encoding::percent_decode_str;
use query_service::introspect::{escape_identifier, primary_keys, table_exists};
use serde_json::json;

use super::{format_suffix, respond, rows_json, DataPage};
use crate::router::{redirect, RoutedRequest};
use crate::state::AppContext;
use crate::urls::{encode_segment, resolve_database, Resolution};

pub async fn row_view(ctx: Arc<AppContext>, req: RoutedRequest) -> AppResult<Response> {
    let segment = req.param("db").unwrap_or_default();
    let table = req.param("table").unwrap_or_default().to_string();
    let raw_pks = req.raw_param("pks").unwrap_or_default().to_string();
    let rest = format!("/{}/{}{}", encode_segment(&table), raw_pks, format_suffix(&req));
    let (db, hashed) = match resolve_database(&ctx, segment, &rest, req.query_string()).await? {
        Resolution::Found { db, hashed } => (db, hashed),
        Resolution::Redirect(target) => return Ok(redirect(&target)),
    };
    if !table_exists(&ctx.executor, db.name(), &table).await? {
        return Err(AppError::NotFound(format!("Table not found: {table}")));
    }

    let values = split_pks(&raw_pks);
    let mut pks = primary_keys(&ctx.executor, db.name(), &table).await?;
    let use_rowid = pks.is_empty();
    if use_rowid {
        pks.push("rowid".to_string());
    }
    let not_found = || AppError::NotFound(format!("Record not found: {}", values.join(", ")));
    if pks.len() != values.len() {
        return Err(not_found());
    }

    let conditions: Vec<String> = pks
        .iter()
        .enumerate()
        .map(|(i, pk)| format!("{} = :p{i}", escape_identifier(pk)))
        .collect();
    let select = if use_rowid { "rowid, *" } else { "*" };
    let sql = format!(
        "select {select} from {} where {}",
        escape_identifier(&table),
        conditions.join(" and ")
    );
    let params: Vec<(String, SqlValue)> = values
        .iter()
        .enumerate()
        .map(|(i, value)| (format!("p{i}"), SqlValue::from(value.as_str())))
        .collect();
    let result = ctx
        .executor
        .execute(QueryRequest::new(db.name(), sql).params(QueryParams::Named(params)))
        .await
        .map_err(AppError::into_query_failure)?;
    if result.rows.is_empty() {
        return Err(not_found());
    }

    let rows = rows_json(&result);
    let data = json!({
        "database": db.name(),
        "table": table,
        "primary_keys": pks,
        "primary_key_values": values,
        "columns": result.columns,
        "rows": rows,
    });
    respond(
        &ctx,
        &req,
        DataPage {
            view_name: "row",
            database: Some(db.name()),
            table: Some(&table),
            templates: vec![
                format!("row-{}-{}.html", db.name(), table),
                "row.html".into(),
                "default.html".into(),
            ],
            title: format!("{table}: {}", values.join(", ")),
            columns: result.columns.clone(),
            rows,
            data,
            hashed,
        },
    )
    .await
}

/// Splits on literal commas only; an escaped `%2C` stays inside its value.
fn split_pks(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| percent_decode_str(part).decode_utf8_lossy().into_owned())
        .collect()
}
