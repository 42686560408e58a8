//! Application configuration.
//!
//! [`AppConfig`] is assembled from environment variables (optionally seeded
//! from a `.env` file) and an optional configuration directory. [`Settings`]
//! holds the runtime options dictionary exposed at `/-/config`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError};

use crate::metadata::Metadata;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8001;

/// Runtime options. Every field has a default; overrides are merged from
/// `config.json` and the `SETTINGS_JSON` environment variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Default page size for the table view.
    #[validate(range(min = 1))]
    pub default_page_size: usize,
    /// Maximum rows returned from a table or custom query. 0 disables truncation.
    pub max_returned_rows: usize,
    /// Size of the worker pool that runs SQLite queries.
    #[validate(range(min = 1, max = 256))]
    pub num_sql_threads: usize,
    /// Time limit for a SQL query in milliseconds. 0 disables the limit.
    pub sql_time_limit_ms: i64,
    /// Allow downloading the original database files.
    pub allow_download: bool,
    /// Allow arbitrary SQL via `?sql=`.
    pub allow_sql: bool,
    /// `Cache-Control: max-age` for ordinary pages.
    pub default_cache_ttl: u64,
    /// `Cache-Control: max-age` for hashed URLs.
    pub default_cache_ttl_hashed: u64,
    /// SQLite cache size in KB. 0 keeps the engine default.
    pub cache_size_kb: u64,
    /// Include the database content hash in URLs.
    pub hash_urls: bool,
    /// Allow `?_context=1` to dump template context.
    pub template_debug: bool,
    /// Prefix every URL is mounted under.
    #[validate(custom(function = "validate_base_url"))]
    pub base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_page_size: 100,
            max_returned_rows: 1000,
            num_sql_threads: 3,
            sql_time_limit_ms: 1000,
            allow_download: true,
            allow_sql: true,
            default_cache_ttl: 5,
            default_cache_ttl_hashed: 365 * 24 * 60 * 60,
            cache_size_kb: 0,
            hash_urls: false,
            template_debug: false,
            base_url: "/".to_string(),
        }
    }
}

fn validate_base_url(value: &str) -> Result<(), ValidationError> {
    if value.starts_with('/') {
        Ok(())
    } else {
        Err(ValidationError::new("base_url must start with /"))
    }
}

impl Settings {
    /// Applies a JSON object of overrides on top of `self`.
    pub fn merged(&self, overrides: &Value) -> anyhow::Result<Settings> {
        let Value::Object(overrides) = overrides else {
            bail!("settings overrides must be a JSON object");
        };
        let mut base = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut base {
            for (key, value) in overrides {
                map.insert(key.clone(), value.clone());
            }
        }
        let settings: Settings =
            serde_json::from_value(base).context("invalid settings override")?;
        settings.validate().context("settings failed validation")?;
        Ok(settings)
    }

    /// Fully resolved option dictionary.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// The base URL without its trailing slash; empty when mounted at root.
    pub fn base_prefix(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// A directory served under a URL prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticMount {
    pub mount: String,
    pub dir: PathBuf,
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Database files to serve, in registration order.
    pub files: Vec<PathBuf>,
    /// Files that never change while the process runs.
    pub immutables: Vec<PathBuf>,
    /// Also serve a synthetic in-memory database.
    pub memory: bool,
    /// Attach `Access-Control-Allow-Origin: *` to every response.
    pub cors: bool,
    /// Emit `Cache-Control` headers.
    pub cache_headers: bool,
    pub metadata: Metadata,
    pub template_dir: Option<PathBuf>,
    /// Directory served at `/-/static/`.
    pub static_dir: PathBuf,
    pub static_mounts: Vec<StaticMount>,
    pub sqlite_extensions: Vec<PathBuf>,
    pub version_note: Option<String>,
    pub settings: Settings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            files: Vec::new(),
            immutables: Vec::new(),
            memory: false,
            cors: false,
            cache_headers: true,
            metadata: Metadata::default(),
            template_dir: None,
            static_dir: PathBuf::from("static"),
            static_mounts: Vec::new(),
            sqlite_extensions: Vec::new(),
            version_note: None,
            settings: Settings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        load_dotenv(Path::new(".env"));
        let mut config = AppConfig {
            host: env_string("SERVER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: match env_string("SERVER_PORT") {
                Some(port) => port.parse().context("SERVER_PORT must be a port number")?,
                None => DEFAULT_PORT,
            },
            files: env_paths("SQLITE_FILES"),
            immutables: env_paths("IMMUTABLE_FILES"),
            memory: env_flag("SQLITE_MEMORY"),
            cors: env_flag("CORS"),
            template_dir: env_string("TEMPLATE_DIR").map(PathBuf::from),
            static_mounts: parse_static_mounts(&env_string("STATIC_MOUNTS").unwrap_or_default())?,
            sqlite_extensions: env_paths("SQLITE_EXTENSIONS"),
            version_note: env_string("VERSION_NOTE"),
            ..AppConfig::default()
        };
        if let Some(dir) = env_string("STATIC_DIR") {
            config.static_dir = PathBuf::from(dir);
        }
        if let Some(path) = env_string("METADATA_FILE") {
            config.metadata = Metadata::from_file(Path::new(&path))?;
        }
        if let Some(dir) = env_string("CONFIG_DIR") {
            config.apply_config_dir(Path::new(&dir))?;
        }
        if let Some(raw) = env_string("SETTINGS_JSON") {
            let overrides: Value = serde_json::from_str(&raw).context("SETTINGS_JSON is not JSON")?;
            config.settings = config.settings.merged(&overrides)?;
        }
        Ok(config)
    }

    /// Picks up databases, metadata, settings, templates and static files
    /// from a configuration directory. Explicit settings win.
    pub fn apply_config_dir(&mut self, dir: &Path) -> anyhow::Result<()> {
        let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("cannot read config dir {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "db"))
            .collect();
        found.sort();

        let inspect = dir.join("inspect-data.json");
        if inspect.exists() && self.immutables.is_empty() {
            let raw = std::fs::read_to_string(&inspect)?;
            let data: Value = serde_json::from_str(&raw).context("invalid inspect-data.json")?;
            let names: Vec<&str> = data
                .as_object()
                .map(|m| m.values().filter_map(|v| v["file"].as_str()).collect())
                .unwrap_or_default();
            let immutables: Vec<PathBuf> = found
                .iter()
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| names.contains(&n))
                })
                .cloned()
                .collect();
            found.retain(|p| !immutables.contains(p));
            self.immutables = immutables;
        }
        self.files.extend(found);

        let metadata_path = dir.join("metadata.json");
        if self.metadata.is_empty() && metadata_path.exists() {
            self.metadata = Metadata::from_file(&metadata_path)?;
        }
        let settings_path = dir.join("config.json");
        if settings_path.exists() {
            let raw = std::fs::read_to_string(&settings_path)?;
            let overrides: Value = serde_json::from_str(&raw).context("invalid config.json")?;
            self.settings = self.settings.merged(&overrides)?;
        }
        if self.template_dir.is_none() && dir.join("templates").is_dir() {
            self.template_dir = Some(dir.join("templates"));
        }
        if self.static_mounts.is_empty() && dir.join("static").is_dir() {
            self.static_mounts.push(StaticMount {
                mount: "static".to_string(),
                dir: dir.join("static"),
            });
        }
        Ok(())
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_flag(key: &str) -> bool {
    env_string(key).is_some_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_paths(key: &str) -> Vec<PathBuf> {
    std::env::var_os(key)
        .map(|raw| std::env::split_paths(&raw).filter(|p| !p.as_os_str().is_empty()).collect())
        .unwrap_or_default()
}

/// Parses `mount:dir,mount:dir`.
pub fn parse_static_mounts(raw: &str) -> anyhow::Result<Vec<StaticMount>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.split_once(':') {
            Some((mount, dir)) if !mount.is_empty() && !dir.is_empty() => Ok(StaticMount {
                mount: mount.trim_matches('/').to_string(),
                dir: PathBuf::from(dir),
            }),
            _ => bail!("static mount {item:?} should be mount:directory"),
        })
        .collect()
}

/// Loads a `.env` file (best-effort, no error if missing). Variables already
/// present in the environment are left alone.
fn load_dotenv(path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else {
        return;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            if std::env::var_os(key).is_none() {
                std::env::set_var(key, value.trim());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.num_sql_threads, 3);
        assert_eq!(settings.sql_time_limit_ms, 1000);
        assert_eq!(settings.max_returned_rows, 1000);
        assert_eq!(settings.base_prefix(), "");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn overrides_merge_and_validate() {
        let settings = Settings::default()
            .merged(&json!({"sql_time_limit_ms": 50, "base_url": "/data/"}))
            .unwrap();
        assert_eq!(settings.sql_time_limit_ms, 50);
        assert_eq!(settings.base_prefix(), "/data");
        assert_eq!(settings.max_returned_rows, 1000);
    }

    #[test]
    fn unknown_and_invalid_settings_are_rejected() {
        assert!(Settings::default().merged(&json!({"nope": 1})).is_err());
        assert!(Settings::default().merged(&json!({"num_sql_threads": 0})).is_err());
        assert!(Settings::default().merged(&json!({"base_url": "data"})).is_err());
    }

    #[test]
    fn static_mounts_parse() {
        let mounts = parse_static_mounts("assets:/srv/assets, img:./img").unwrap();
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].mount, "assets");
        assert_eq!(mounts[1].dir, PathBuf::from("./img"));
        assert!(parse_static_mounts("broken").is_err());
    }

    #[test]
    fn config_dir_collects_databases_and_immutables() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.db"), b"").unwrap();
        std::fs::write(dir.path().join("b.db"), b"").unwrap();
        std::fs::write(
            dir.path().join("inspect-data.json"),
            r#"{"b": {"file": "b.db"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"default_page_size": 7}"#).unwrap();
        std::fs::create_dir(dir.path().join("templates")).unwrap();

        let mut config = AppConfig::default();
        config.apply_config_dir(dir.path()).unwrap();
        assert_eq!(config.files, vec![dir.path().join("a.db")]);
        assert_eq!(config.immutables, vec![dir.path().join("b.db")]);
        assert_eq!(config.settings.default_page_size, 7);
        assert_eq!(config.template_dir, Some(dir.path().join("templates")));
    }
}
