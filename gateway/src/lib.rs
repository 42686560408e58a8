//! HTTP front end publishing SQLite databases: ordered routing, views,
//! output renderers, templates, plugins and error pages.

pub mod app;
pub mod errors;
pub mod plugins;
pub mod renderers;
pub mod router;
pub mod state;
pub mod templates;
pub mod urls;
pub mod views;

pub use app::{build, build_routes, create_router};
pub use state::{AppContext, AppState};
