//! 查询执行器
//!
//! 在工作线程池上运行 SQL，并在超过时间限制时通过中断令牌终止语句。

use std::sync::Arc;
use std::time::Duration;

use common::config::Settings;
use common::errors::{AppError, AppResult};
use common::models::{QueryParams, QueryRequest, QueryResult, Row, SqlValue};
use connection_service::{ConnectionSetup, Database, DatabaseRegistry};
use rusqlite::{Connection, Statement};
use tokio::sync::oneshot;

use crate::interrupt::{self, InterruptToken};
use crate::worker::{Job, PoolStatus, WorkerPool};

/// Limits applied when a request does not override them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutorLimits {
    /// Zero disables truncation.
    pub max_returned_rows: usize,
    /// Zero or negative disables the time limit.
    pub time_limit_ms: i64,
}

impl From<&Settings> for ExecutorLimits {
    fn from(settings: &Settings) -> Self {
        Self {
            max_returned_rows: settings.max_returned_rows,
            time_limit_ms: settings.sql_time_limit_ms,
        }
    }
}

/// How a job on the pool ended, before it is turned into an [`AppError`].
enum RunError {
    Interrupted,
    Engine(rusqlite::Error),
    Lost,
}

/// Runs queries against registered databases on a bounded worker pool.
pub struct QueryExecutor {
    registry: Arc<DatabaseRegistry>,
    pool: WorkerPool,
    limits: ExecutorLimits,
}

impl QueryExecutor {
    pub fn new(
        registry: Arc<DatabaseRegistry>,
        setup: ConnectionSetup,
        num_threads: usize,
        limits: ExecutorLimits,
    ) -> AppResult<Self> {
        Ok(Self {
            registry,
            pool: WorkerPool::new(num_threads, setup)?,
            limits,
        })
    }

    pub fn from_settings(
        registry: Arc<DatabaseRegistry>,
        setup: ConnectionSetup,
        settings: &Settings,
    ) -> AppResult<Self> {
        Self::new(registry, setup, settings.num_sql_threads, settings.into())
    }

    pub fn registry(&self) -> &Arc<DatabaseRegistry> {
        &self.registry
    }

    pub fn limits(&self) -> ExecutorLimits {
        self.limits
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Runs one statement.
    ///
    /// Fails with `UnknownDatabase` for an unregistered name,
    /// `QueryInterrupted` when the time limit fires and `Query` for any
    /// other engine error.
    pub async fn execute(&self, request: QueryRequest) -> AppResult<QueryResult> {
        let QueryRequest {
            database,
            sql,
            params,
            options,
        } = request;

        let db = self
            .registry
            .get(&database)
            .await
            .ok_or_else(|| AppError::UnknownDatabase(database.clone()))?;

        let time_limit_ms = options.time_limit_ms.unwrap_or(self.limits.time_limit_ms);
        let max_rows = if options.truncate {
            row_cap(self.limits.max_returned_rows, options.page_size)
        } else {
            None
        };

        let job_sql = sql.clone();
        let job_params = params.clone();
        let outcome = self
            .run(db, time_limit_ms, move |conn| {
                fetch(conn, &job_sql, &job_params, max_rows)
            })
            .await;

        match outcome {
            Ok(result) => Ok(result),
            Err(RunError::Interrupted) => {
                tracing::debug!(database = %database, time_limit_ms, "SQL query interrupted");
                Err(AppError::QueryInterrupted { sql, params })
            }
            Err(RunError::Engine(e)) => {
                if options.log_errors {
                    tracing::error!(database = %database, sql = %sql, error = %e, "SQL query failed");
                }
                Err(AppError::Query {
                    message: e.to_string(),
                    sql,
                })
            }
            Err(RunError::Lost) => Err(AppError::Internal(
                "SQL worker exited before returning a result".into(),
            )),
        }
    }

    /// Runs `f` on a pool worker with the time limit armed. The caller
    /// suspends until the worker answers; if the caller goes away the timer
    /// still fires and the worker finishes on its own.
    async fn run<T, F>(&self, db: Arc<Database>, time_limit_ms: i64, f: F) -> Result<T, RunError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let limited = time_limit_ms > 0;
        let token = InterruptToken::new();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (result_tx, result_rx) = oneshot::channel();

        let job_token = token.clone();
        let job: Job = Box::new(move |connections| {
            let outcome = match connections.get(&db) {
                Ok(conn) => {
                    if limited {
                        interrupt::arm(conn, &job_token, time_limit_ms);
                    }
                    let _ = started_tx.send(());
                    let outcome = f(conn);
                    if limited {
                        interrupt::disarm(conn);
                    }
                    outcome.map_err(|e| {
                        if interrupt::is_interrupt(&e) {
                            RunError::Interrupted
                        } else {
                            RunError::Engine(e)
                        }
                    })
                }
                Err(e) => Err(RunError::Engine(e)),
            };
            let _ = result_tx.send(outcome);
        });
        self.pool.submit(job).map_err(|_| RunError::Lost)?;

        // The clock starts when a worker picks the job up, not while it waits
        // in the queue.
        let timer = limited.then(|| {
            let limit = Duration::from_millis(time_limit_ms.unsigned_abs());
            tokio::spawn(async move {
                if started_rx.await.is_ok() {
                    tokio::time::sleep(limit).await;
                    token.interrupt();
                }
            })
        });

        let outcome = result_rx.await.map_err(|_| RunError::Lost);
        if let Some(timer) = timer {
            timer.abort();
        }
        outcome?
    }
}

/// Effective truncation cap. A page size equal to the cap raises it by one
/// so that a full page is not reported as truncated.
fn row_cap(max_returned_rows: usize, page_size: Option<usize>) -> Option<usize> {
    if max_returned_rows == 0 {
        return None;
    }
    if page_size == Some(max_returned_rows) {
        Some(max_returned_rows + 1)
    } else {
        Some(max_returned_rows)
    }
}

fn bind(stmt: &mut Statement<'_>, params: &QueryParams) -> rusqlite::Result<()> {
    match params {
        QueryParams::None => {}
        QueryParams::Positional(values) => {
            for (i, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(i + 1, value)?;
            }
        }
        QueryParams::Named(values) => {
            for (name, value) in values {
                let key = if name.starts_with([':', '@', '$']) {
                    name.clone()
                } else {
                    format!(":{name}")
                };
                // Arguments the statement does not mention are ignored.
                if let Some(index) = stmt.parameter_index(&key)? {
                    stmt.raw_bind_parameter(index, value)?;
                }
            }
        }
    }
    Ok(())
}

/// Runs the statement on the worker. With a cap, reads at most one row past
/// it to learn whether the result was truncated.
fn fetch(
    conn: &Connection,
    sql: &str,
    params: &QueryParams,
    max_rows: Option<usize>,
) -> rusqlite::Result<QueryResult> {
    let mut stmt = conn.prepare(sql)?;
    bind(&mut stmt, params)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let shared: Arc<[String]> = columns.clone().into();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut raw = stmt.raw_query();
    while let Some(row) = raw.next()? {
        let values = (0..width)
            .map(|i| row.get_ref(i).map(SqlValue::from_value_ref))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.push(Row::new(shared.clone(), values));
        if max_rows.is_some_and(|max| rows.len() > max) {
            break;
        }
    }

    let truncated = match max_rows {
        Some(max) if rows.len() > max => {
            rows.truncate(max);
            true
        }
        _ => false,
    };
    Ok(QueryResult::new(columns, rows, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::models::QueryOptions;
    use std::path::PathBuf;
    use std::time::Instant;

    const SLOW: &str = "with recursive c(x) as (select 1 union all select x + 1 from c) \
                        select count(*) from c";

    fn fixture(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("fixtures.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "create table five (n integer primary key, label text);
             insert into five values (1, 'a'), (2, 'b'), (3, 'c'), (4, 'd'), (5, 'e');",
        )
        .unwrap();
        path
    }

    fn executor(dir: &tempfile::TempDir, max_returned_rows: usize) -> QueryExecutor {
        let registry = DatabaseRegistry::from_config(&[fixture(dir)], &[], false).unwrap();
        QueryExecutor::new(
            Arc::new(registry),
            ConnectionSetup::new(),
            3,
            ExecutorLimits {
                max_returned_rows,
                time_limit_ms: 1000,
            },
        )
        .unwrap()
    }

    fn truncated_select(limit: usize) -> QueryRequest {
        QueryRequest::new("fixtures", format!("select * from five order by n limit {limit}"))
            .options(QueryOptions::new().truncate())
    }

    #[tokio::test]
    async fn one_extra_row_marks_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 4);

        let result = exec.execute(truncated_select(5)).await.unwrap();
        assert_eq!(result.row_count, 4);
        assert!(result.truncated);

        let result = exec.execute(truncated_select(4)).await.unwrap();
        assert_eq!(result.row_count, 4);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn page_size_equal_to_cap_is_not_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 4);
        let request = QueryRequest::new("fixtures", "select * from five order by n limit 5")
            .options(QueryOptions::new().truncate().page_size(4));
        let result = exec.execute(request).await.unwrap();
        assert_eq!(result.row_count, 5);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn zero_cap_disables_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 0);
        let result = exec.execute(truncated_select(5)).await.unwrap();
        assert_eq!(result.row_count, 5);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn rows_keep_column_order_and_names() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 100);
        let request = QueryRequest::new("fixtures", "select label, n from five where n = :n")
            .params(QueryParams::Named(vec![
                ("n".into(), SqlValue::Integer(2)),
                ("unused".into(), SqlValue::Null),
            ]));
        let result = exec.execute(request).await.unwrap();
        assert_eq!(result.columns, vec!["label", "n"]);
        let row = &result.rows[0];
        assert_eq!(row.get("label"), Some(&SqlValue::Text("b".into())));
        assert_eq!(row.at(1), Some(&SqlValue::Integer(2)));
    }

    #[tokio::test]
    async fn positional_params_bind_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 100);
        let request = QueryRequest::new("fixtures", "select count(*) from five where n between ? and ?")
            .params(QueryParams::Positional(vec![SqlValue::Integer(2), SqlValue::Integer(4)]));
        let result = exec.execute(request).await.unwrap();
        assert_eq!(result.scalar(), Some(&SqlValue::Integer(3)));
    }

    #[tokio::test]
    async fn unknown_database_differs_from_bad_sql() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 100);

        let err = exec.execute(QueryRequest::new("nope", "select 1")).await.unwrap_err();
        assert!(matches!(err, AppError::UnknownDatabase(name) if name == "nope"));

        let err = exec
            .execute(QueryRequest::new("fixtures", "select * from missing").options(QueryOptions::new().quiet()))
            .await
            .unwrap_err();
        match err {
            AppError::Query { message, sql } => {
                assert!(message.contains("no such table"));
                assert_eq!(sql, "select * from missing");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn failures_are_logged_unless_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 100);
        let logs = Captured::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let err = exec
            .execute(QueryRequest::new("fixtures", "select * from quiet_missing").options(QueryOptions::new().quiet()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Query { .. }));
        assert!(!logs.text().contains("quiet_missing"));

        let err = exec
            .execute(QueryRequest::new("fixtures", "select * from loud_missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Query { ref sql, .. } if sql == "select * from loud_missing"));
        let text = logs.text();
        assert!(text.contains("SQL query failed"));
        assert!(text.contains("loud_missing"));
    }

    #[tokio::test]
    async fn runaway_query_is_interrupted_near_its_limit() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 100);
        let started = Instant::now();
        let err = exec
            .execute(QueryRequest::new("fixtures", SLOW).options(QueryOptions::new().time_limit_ms(50)))
            .await
            .unwrap_err();
        assert!(err.is_interrupted());
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            AppError::QueryInterrupted { sql, .. } => assert_eq!(sql, SLOW),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn concurrent_limits_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(executor(&dir, 100));
        let sql = "with recursive c(x) as (select 1 union all select x + 1 from c limit 3000000) \
                   select count(*) from c";

        let short = {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.execute(QueryRequest::new("fixtures", sql).options(QueryOptions::new().time_limit_ms(1)))
                    .await
            })
        };
        let long = {
            let exec = exec.clone();
            tokio::spawn(async move {
                exec.execute(QueryRequest::new("fixtures", sql).options(QueryOptions::new().time_limit_ms(60_000)))
                    .await
            })
        };

        let short = short.await.unwrap();
        let long = long.await.unwrap().unwrap();
        assert!(short.unwrap_err().is_interrupted());
        assert_eq!(long.scalar(), Some(&SqlValue::Integer(3_000_000)));
    }

    #[tokio::test]
    async fn non_positive_limit_disables_timer() {
        let dir = tempfile::tempdir().unwrap();
        let exec = executor(&dir, 100);
        let sql = "with recursive c(x) as (select 1 union all select x + 1 from c limit 200000) \
                   select count(*) from c";
        let result = exec
            .execute(QueryRequest::new("fixtures", sql).options(QueryOptions::new().time_limit_ms(0)))
            .await
            .unwrap();
        assert_eq!(result.scalar(), Some(&SqlValue::Integer(200_000)));
    }

    #[test]
    fn row_cap_rules() {
        assert_eq!(row_cap(0, Some(10)), None);
        assert_eq!(row_cap(10, None), Some(10));
        assert_eq!(row_cap(10, Some(10)), Some(11));
        assert_eq!(row_cap(10, Some(5)), Some(10));
    }
}
