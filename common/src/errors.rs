//! Error taxonomy shared by every crate in the workspace.
//!
//! Query execution failures are returned as typed values so handlers can
//! recover from them (for example skipping an optional count that was
//! interrupted). Anything left unrecovered reaches the gateway's error
//! translator, which is the only place that turns an [`AppError`] into a
//! response.

use axum::http::StatusCode;
use serde_json::{Map, Value};

use crate::models::query::QueryParams;

/// Result alias used across the workspace.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No route matched, or no resource exists at that identifier.
    #[error("{0}")]
    NotFound(String),

    /// A query ran past its time limit and was interrupted.
    #[error("SQL query interrupted: {sql}")]
    QueryInterrupted { sql: String, params: QueryParams },

    /// Any other failure raised by the database engine.
    #[error("{message}")]
    Query { message: String, sql: String },

    /// Executor was asked for a database the registry does not hold.
    #[error("unknown database: {0}")]
    UnknownDatabase(String),

    /// Raised on purpose by a handler with its own status and payload.
    #[error("{}", .0.message)]
    Application(ApplicationError),

    /// Access to an existing resource is not allowed.
    #[error("{0}")]
    Forbidden(String),

    /// Unanticipated failure.
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Builds a declared application failure with a status and message.
    pub fn application(status: StatusCode, message: impl Into<String>) -> Self {
        AppError::Application(ApplicationError::new(status, message))
    }

    /// True when the failure was caused by the query time limit.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, AppError::QueryInterrupted { .. })
    }

    /// The user-facing failure a query error is reported as, if this is
    /// a query error.
    pub fn query_failure(&self) -> Option<ApplicationError> {
        match self {
            AppError::QueryInterrupted { sql, .. } => Some(
                ApplicationError::new(
                    StatusCode::BAD_REQUEST,
                    "SQL query took too long. The time limit is controlled by the \
                     sql_time_limit_ms configuration option.",
                )
                .with_title("SQL Interrupted")
                .with_detail("sql", Value::String(sql.clone())),
            ),
            AppError::Query { message, sql } => Some(
                ApplicationError::new(StatusCode::BAD_REQUEST, message.clone())
                    .with_title("Invalid SQL")
                    .with_detail("sql", Value::String(sql.clone())),
            ),
            _ => None,
        }
    }

    /// Rewrites query failures into application failures. Other variants
    /// pass through untouched.
    pub fn into_query_failure(self) -> Self {
        match self.query_failure() {
            Some(app) => AppError::Application(app),
            None => self,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// A failure a handler raises intentionally.
#[derive(Debug, Clone)]
pub struct ApplicationError {
    pub status: StatusCode,
    pub message: String,
    /// Whether `message` is already HTML and must not be escaped.
    pub message_is_html: bool,
    pub title: Option<String>,
    /// Machine-readable fields merged into the JSON error payload.
    pub detail: Map<String, Value>,
}

impl ApplicationError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            message_is_html: false,
            title: None,
            detail: Map::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.detail.insert(key.into(), value);
        self
    }

    pub fn html(mut self) -> Self {
        self.message_is_html = true;
        self
    }
}
