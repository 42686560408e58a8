//! Hashed database URLs and cache headers.
//!
//! With `hash_urls` on, an immutable database is addressed as
//! `name-<first 7 hex digits of its hash>` so its pages can be cached for a
//! long time; any other spelling redirects there.

use std::sync::Arc;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use common::config::Settings;
use common::errors::{AppError, AppResult};
use connection_service::Database;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::state::AppContext;

const HASH_LEN: usize = 7;

/// Characters escaped inside one path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Percent-encodes a value for use as a single path segment.
pub fn encode_segment(value: &str) -> String {
    utf8_percent_encode(value, SEGMENT).to_string()
}

/// Outcome of resolving the `<db>` segment of a path.
pub enum Resolution {
    Found { db: Arc<Database>, hashed: bool },
    /// The database exists but should be addressed by another URL.
    Redirect(String),
}

/// Splits `name-abcdef0` into `("name", Some("abcdef0"))`.
pub fn split_hash(segment: &str) -> (&str, Option<&str>) {
    match segment.rsplit_once('-') {
        Some((name, hash))
            if !name.is_empty()
                && hash.len() == HASH_LEN
                && hash.bytes().all(|b| b.is_ascii_hexdigit()) =>
        {
            (name, Some(hash))
        }
        _ => (segment, None),
    }
}

fn short_hash(db: &Database) -> Option<String> {
    db.hash().map(|h| h[..HASH_LEN.min(h.len())].to_string())
}

/// The path segment a database should be addressed by.
pub fn database_segment(settings: &Settings, db: &Database) -> String {
    if settings.hash_urls && !db.is_mutable() {
        if let Some(hash) = short_hash(db) {
            return format!("{}-{}", db.name(), hash);
        }
    }
    db.name().to_string()
}

/// Resolves the `<db>` segment. `rest` is the remainder of the path after
/// that segment, reused when building a redirect.
pub async fn resolve_database(
    ctx: &AppContext,
    segment: &str,
    rest: &str,
    query: Option<&str>,
) -> AppResult<Resolution> {
    let (db, hash_in_url) = match ctx.registry.get(segment).await {
        Some(db) => (db, None),
        None => match split_hash(segment) {
            (name, Some(hash)) => match ctx.registry.get(name).await {
                Some(db) => (db, Some(hash)),
                None => return Err(AppError::NotFound(format!("Database not found: {name}"))),
            },
            _ => return Err(AppError::NotFound(format!("Database not found: {segment}"))),
        },
    };

    let expected = database_segment(ctx.settings(), &db);
    let given = match hash_in_url {
        Some(hash) => format!("{}-{}", db.name(), hash),
        None => db.name().to_string(),
    };
    if expected != given {
        let mut target = ctx.url(&format!("{}{rest}", encode_segment(&expected)));
        if let Some(query) = query {
            target.push('?');
            target.push_str(query);
        }
        return Ok(Resolution::Redirect(target));
    }
    Ok(Resolution::Found {
        db,
        hashed: hash_in_url.is_some(),
    })
}

/// Sets `Cache-Control` on successful responses. Hashed URLs get the long
/// TTL; a TTL of zero sends no header.
pub fn apply_cache_headers(ctx: &AppContext, response: &mut Response, hashed: bool) {
    if !ctx.config.cache_headers || response.status() != StatusCode::OK {
        return;
    }
    let settings = ctx.settings();
    let ttl = if hashed {
        settings.default_cache_ttl_hashed
    } else {
        settings.default_cache_ttl
    };
    if ttl == 0 {
        return;
    }
    if let Ok(value) = HeaderValue::from_str(&format!("max-age={ttl}")) {
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }
}
