//! Shared building blocks for the SQLite publishing services: the error
//! taxonomy, configuration, metadata lookup, query models and HTTP
//! middleware.

pub mod config;
pub mod errors;
pub mod metadata;
pub mod middleware;
pub mod models;
pub mod response;

pub use errors::{AppError, AppResult, ApplicationError};
