//! Response payload types.
//!
//! Error responses share one shape, `{"ok": false, "error": ...}`, optionally
//! extended with the status, title and detail fields of a declared
//! application failure.

use axum::http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{AppError, ApplicationError};

/// Machine-readable error payload.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    /// HTTP status, not part of the serialized body.
    #[serde(skip)]
    pub status: StatusCode,
    #[serde(skip)]
    pub message_is_html: bool,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl ErrorPayload {
    /// Minimal `{ok: false, error}` body.
    pub fn simple(status: StatusCode, message: impl Into<String>) -> Self {
        let mut body = Map::new();
        body.insert("ok".into(), Value::Bool(false));
        body.insert("error".into(), Value::String(message.into()));
        Self {
            status,
            message_is_html: false,
            body,
        }
    }

    /// Body for a declared failure: detail fields, then `ok`, `error`,
    /// `status` and `title`.
    pub fn from_application(err: &ApplicationError) -> Self {
        let mut body = err.detail.clone();
        body.insert("ok".into(), Value::Bool(false));
        body.insert("error".into(), Value::String(err.message.clone()));
        body.insert("status".into(), Value::from(err.status.as_u16()));
        body.insert(
            "title".into(),
            err.title.clone().map(Value::String).unwrap_or(Value::Null),
        );
        Self {
            status: err.status,
            message_is_html: err.message_is_html,
            body,
        }
    }

    pub fn message(&self) -> &str {
        self.body.get("error").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn title(&self) -> Option<&str> {
        self.body.get("title").and_then(Value::as_str)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.body.clone())
    }
}

impl From<&AppError> for ErrorPayload {
    fn from(err: &AppError) -> Self {
        match err {
            AppError::NotFound(message) => ErrorPayload::simple(StatusCode::NOT_FOUND, message.clone()),
            AppError::Application(app) => ErrorPayload::from_application(app),
            AppError::Forbidden(message) => ErrorPayload::from_application(&ApplicationError::new(
                StatusCode::FORBIDDEN,
                message.clone(),
            )),
            AppError::QueryInterrupted { .. } | AppError::Query { .. } => match err.query_failure() {
                Some(app) => ErrorPayload::from_application(&app),
                None => ErrorPayload::simple(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            },
            AppError::UnknownDatabase(_) | AppError::Internal(_) => {
                ErrorPayload::simple(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
        }
    }
}
