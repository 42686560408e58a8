//! Schema helpers built on [`QueryExecutor`].

use common::errors::AppResult;
use common::models::{QueryOptions, QueryParams, QueryRequest, SqlValue, TableSummary};
use connection_service::Database;

use crate::executor::QueryExecutor;

/// Time limit for the start-up count of immutable tables.
pub const WARMUP_TIME_LIMIT_MS: i64 = 60 * 60 * 1000;

/// Quotes an identifier for use in SQL text.
pub fn escape_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub async fn table_names(executor: &QueryExecutor, database: &str) -> AppResult<Vec<String>> {
    let result = executor
        .execute(QueryRequest::new(
            database,
            "select name from sqlite_master where type = 'table' order by name",
        ))
        .await?;
    Ok(result
        .rows
        .iter()
        .filter_map(|row| row.at(0).and_then(SqlValue::as_str).map(String::from))
        .collect())
}

pub async fn table_exists(executor: &QueryExecutor, database: &str, table: &str) -> AppResult<bool> {
    let result = executor
        .execute(
            QueryRequest::new(
                database,
                "select 1 from sqlite_master where type = 'table' and name = ?",
            )
            .params(QueryParams::Positional(vec![table.into()])),
        )
        .await?;
    Ok(!result.rows.is_empty())
}

/// Row counts per table.
///
/// Immutable databases answer from the start-up cache when it is filled.
/// A count that runs past its limit is reported as `None` instead of
/// failing the whole listing.
pub async fn table_counts(
    executor: &QueryExecutor,
    db: &Database,
    time_limit_ms: Option<i64>,
) -> AppResult<Vec<TableSummary>> {
    if let Some(cached) = db.cached_table_counts() {
        return Ok(cached.to_vec());
    }
    let mut counts = Vec::new();
    for name in table_names(executor, db.name()).await? {
        let mut options = QueryOptions::new().quiet();
        if let Some(limit) = time_limit_ms {
            options = options.time_limit_ms(limit);
        }
        let request = QueryRequest::new(
            db.name(),
            format!("select count(*) from {}", escape_identifier(&name)),
        )
        .options(options);
        let count = match executor.execute(request).await {
            Ok(result) => result
                .scalar()
                .and_then(SqlValue::as_i64)
                .and_then(|n| u64::try_from(n).ok()),
            Err(e) if e.is_interrupted() => None,
            Err(e) => return Err(e),
        };
        counts.push(TableSummary { name, count });
    }
    Ok(counts)
}

/// Hashes every immutable database, then counts its tables once and
/// caches both on the database.
pub async fn warm_table_counts(executor: &QueryExecutor) {
    executor.registry().warm_hashes().await;
    for db in executor.registry().list().await {
        if db.is_mutable() {
            continue;
        }
        match table_counts(executor, &db, Some(WARMUP_TIME_LIMIT_MS)).await {
            Ok(counts) => {
                tracing::info!(database = %db.name(), tables = counts.len(), "Table counts cached");
                db.cache_table_counts(counts);
            }
            Err(e) => tracing::warn!(database = %db.name(), error = %e, "Table count warm-up failed"),
        }
    }
}

/// Primary key columns in key order; empty for rowid tables.
pub async fn primary_keys(
    executor: &QueryExecutor,
    database: &str,
    table: &str,
) -> AppResult<Vec<String>> {
    let result = executor
        .execute(
            QueryRequest::new(
                database,
                "select name from pragma_table_info(?) where pk > 0 order by pk",
            )
            .params(QueryParams::Positional(vec![table.into()])),
        )
        .await?;
    Ok(result
        .rows
        .iter()
        .filter_map(|row| row.at(0).and_then(SqlValue::as_str).map(String::from))
        .collect())
}
