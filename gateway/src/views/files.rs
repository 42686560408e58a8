//! Favicon, static assets and database downloads.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use common::errors::{AppError, AppResult};
use tower::ServiceExt;
use tower_http::services::fs::ServeFileSystemResponseBody;
use tower_http::services::{ServeDir, ServeFile};

use crate::router::{redirect, Handler, RoutedRequest};
use crate::state::AppContext;
use crate::urls::{apply_cache_headers, encode_segment, resolve_database, Resolution};

pub async fn favicon(_ctx: Arc<AppContext>, _req: RoutedRequest) -> AppResult<Response> {
    Ok(StatusCode::OK.into_response())
}

/// Serves files below `dir` from the route's `path` capture.
pub struct StaticFiles {
    dir: PathBuf,
}

impl StaticFiles {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl Handler<Arc<AppContext>> for StaticFiles {
    async fn call(&self, _ctx: Arc<AppContext>, req: RoutedRequest) -> AppResult<Response> {
        let path = req.param("path").unwrap_or_default();
        if path.split('/').any(|segment| segment == "..") {
            return Err(AppError::NotFound("File not found".into()));
        }
        let uri: String = path
            .split('/')
            .map(encode_segment)
            .collect::<Vec<_>>()
            .join("/");
        let request = file_request(&format!("/{uri}"))?;
        let response = into_response(ServeDir::new(&self.dir).oneshot(request).await);
        if response.status() == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound("File not found".into()));
        }
        Ok(response)
    }
}

/// `/<db>.db`: the raw database file as an attachment.
pub async fn download(ctx: Arc<AppContext>, req: RoutedRequest) -> AppResult<Response> {
    let segment = req.param("db").unwrap_or_default();
    let (db, hashed) = match resolve_database(&ctx, segment, ".db", req.query_string()).await? {
        Resolution::Found { db, hashed } => (db, hashed),
        Resolution::Redirect(target) => return Ok(redirect(&target)),
    };
    if !ctx.settings().allow_download {
        return Err(AppError::Forbidden("Database download is forbidden".into()));
    }
    let Some(path) = db.path().filter(|_| !db.is_memory()) else {
        return Err(AppError::Forbidden(
            "Cannot download an in-memory database".into(),
        ));
    };

    let request = file_request("/")?;
    let mut response = into_response(ServeFile::new(path).oneshot(request).await);
    if response.status() == StatusCode::NOT_FOUND {
        return Err(AppError::NotFound(format!("Database file missing: {}", db.name())));
    }
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    let disposition = format!("attachment; filename=\"{}.db\"", db.name().replace('"', ""));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(hash) = db.hash() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{hash}\"")) {
            headers.insert(header::ETAG, value);
        }
    }
    apply_cache_headers(&ctx, &mut response, hashed);
    Ok(response)
}

fn file_request(uri: &str) -> AppResult<Request<Body>> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .map_err(|e| AppError::Internal(e.to_string()))
}

fn into_response(
    result: Result<axum::http::Response<ServeFileSystemResponseBody>, Infallible>,
) -> Response {
    match result {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    }
}
