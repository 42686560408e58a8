//! Database overview, and arbitrary `?sql=` queries against it.

use std::sync::{Arc, LazyLock};

use axum::http::StatusCode;
use axum::response::Response;
use common::errors::{AppError, AppResult};
use common::models::{QueryOptions, QueryParams, QueryRequest, SqlValue};
use connection_service::Database;
use query_service::introspect::table_counts;
use regex::Regex;
use serde_json::{json, Map, Value};

use super::{format_suffix, respond, rows_json, DataPage};
use crate::router::{redirect, RoutedRequest};
use crate::state::AppContext;
use crate::urls::{resolve_database, Resolution};

static NAMED_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":(\w+)").expect("named parameter pattern"));

pub async fn database_view(ctx: Arc<AppContext>, req: RoutedRequest) -> AppResult<Response> {
    let segment = req.param("db").unwrap_or_default();
    let (db, hashed) =
        match resolve_database(&ctx, segment, &format_suffix(&req), req.query_string()).await? {
            Resolution::Found { db, hashed } => (db, hashed),
            Resolution::Redirect(target) => return Ok(redirect(&target)),
        };

    if let Some(sql) = req.arg("sql") {
        if !ctx.settings().allow_sql {
            return Err(AppError::application(
                StatusCode::BAD_REQUEST,
                "sql= is not allowed",
            ));
        }
        let sql = sql.to_string();
        return run_query(&ctx, &req, &db, &sql, None, hashed).await;
    }

    let tables = table_counts(&ctx.executor, &db, None).await?;
    let queries = ctx.config.metadata.canned_queries(db.name());
    let data = json!({
        "database": db.name(),
        "size": db.size(),
        "hash": db.hash(),
        "is_mutable": db.is_mutable(),
        "tables": tables,
        "queries": queries,
    });
    respond(
        &ctx,
        &req,
        DataPage {
            view_name: "database",
            database: Some(db.name()),
            table: None,
            templates: vec![format!("database-{}.html", db.name()), "database.html".into(), "default.html".into()],
            title: db.name().to_string(),
            columns: Vec::new(),
            rows: Vec::new(),
            data,
            hashed,
        },
    )
    .await
}

/// `:name` parameters in order of first appearance.
pub fn named_parameters(sql: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in NAMED_PARAM.captures_iter(sql) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Runs a user-supplied or canned query with truncation. Named parameters
/// are filled from the query string; query failures become 400 pages.
pub async fn run_query(
    ctx: &AppContext,
    req: &RoutedRequest,
    db: &Database,
    sql: &str,
    canned: Option<(&str, Option<&str>)>,
    hashed: bool,
) -> AppResult<Response> {
    let params: Vec<(String, SqlValue)> = named_parameters(sql)
        .into_iter()
        .map(|name| {
            let value = req.arg(&name).map(SqlValue::from).unwrap_or(SqlValue::Null);
            (name, value)
        })
        .collect();
    let params_json: Map<String, Value> = params
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();

    let result = ctx
        .executor
        .execute(
            QueryRequest::new(db.name(), sql)
                .params(QueryParams::Named(params))
                .options(QueryOptions::new().truncate()),
        )
        .await
        .map_err(AppError::into_query_failure)?;

    let rows = rows_json(&result);
    let data = json!({
        "database": db.name(),
        "query_name": canned.map(|(name, _)| name),
        "query": {"sql": sql, "params": params_json},
        "columns": result.columns,
        "rows": rows,
        "truncated": result.truncated,
    });
    let title = match canned {
        Some((name, title)) => title.unwrap_or(name).to_string(),
        None => format!("{} query", db.name()),
    };
    respond(
        ctx,
        req,
        DataPage {
            view_name: "query",
            database: Some(db.name()),
            table: canned.map(|(name, _)| name),
            templates: vec!["query.html".into(), "default.html".into()],
            title,
            columns: result.columns.clone(),
            rows,
            data,
            hashed,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_parameters_are_unique_and_ordered() {
        assert_eq!(
            named_parameters("select * from t where a = :b and c = :a or d = :b"),
            vec!["b", "a"]
        );
        assert!(named_parameters("select 1").is_empty());
    }
}
