//! Cascading metadata lookup.
//!
//! Metadata is a JSON tree with optional `databases.<db>` and
//! `databases.<db>.tables.<table>` levels. Lookups cascade from the most
//! specific level back to the root.

use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use serde_json::{Map, Value};

/// Metadata tree loaded at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Metadata(Value);

/// A named query declared in metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CannedQuery {
    pub name: String,
    pub sql: String,
    pub title: Option<String>,
}

impl Metadata {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read metadata {}", path.display()))?;
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("invalid metadata JSON in {}", path.display()))?;
        Ok(Self(value))
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }

    /// Levels to search, most specific first.
    fn search_list(&self, database: Option<&str>, table: Option<&str>, fallback: bool) -> Vec<&Value> {
        let mut levels = Vec::with_capacity(3);
        if let Some(db) = database {
            let db_meta = &self.0["databases"][db];
            if let Some(table) = table {
                levels.push(&db_meta["tables"][table]);
            }
            levels.push(db_meta);
        }
        levels.push(&self.0);
        if !fallback {
            levels.truncate(1);
        }
        levels
    }

    /// Looks up `key`, cascading table -> database -> root. With
    /// `fallback = false` only the most specific level is consulted.
    pub fn lookup(
        &self,
        key: &str,
        database: Option<&str>,
        table: Option<&str>,
        fallback: bool,
    ) -> Option<&Value> {
        self.search_list(database, table, fallback)
            .into_iter()
            .find_map(|level| level.get(key))
    }

    /// All keys visible at the given level, more specific levels winning.
    pub fn merged(&self, database: Option<&str>, table: Option<&str>, fallback: bool) -> Map<String, Value> {
        let mut merged = Map::new();
        for level in self.search_list(database, table, fallback).into_iter().rev() {
            if let Value::Object(map) = level {
                for (key, value) in map {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        merged
    }

    pub fn canned_queries(&self, database: &str) -> Vec<CannedQuery> {
        let Some(Value::Object(queries)) = self.lookup("queries", Some(database), None, false) else {
            return Vec::new();
        };
        queries
            .iter()
            .filter_map(|(name, query)| canned_query(name, query))
            .collect()
    }

    pub fn canned_query(&self, database: &str, name: &str) -> Option<CannedQuery> {
        self.lookup("queries", Some(database), None, false)
            .and_then(|queries| queries.get(name))
            .and_then(|query| canned_query(name, query))
    }

    /// Plugin configuration with `{"$env": NAME}` and `{"$file": PATH}`
    /// values resolved.
    pub fn plugin_config(
        &self,
        plugin: &str,
        database: Option<&str>,
        table: Option<&str>,
    ) -> Option<Value> {
        let config = self.lookup("plugins", database, table, true)?.get(plugin)?.clone();
        let Value::Object(map) = config else {
            return Some(config);
        };
        let resolved = map
            .into_iter()
            .map(|(key, value)| {
                let value = match value.as_object() {
                    Some(inner) if inner.len() == 1 && inner.contains_key("$env") => inner["$env"]
                        .as_str()
                        .and_then(|name| std::env::var(name).ok())
                        .map(Value::String)
                        .unwrap_or(Value::Null),
                    Some(inner) if inner.len() == 1 && inner.contains_key("$file") => inner["$file"]
                        .as_str()
                        .and_then(|path| std::fs::read_to_string(path).ok())
                        .map(Value::String)
                        .unwrap_or(Value::Null),
                    _ => value,
                };
                (key, value)
            })
            .collect();
        Some(Value::Object(resolved))
    }
}

fn canned_query(name: &str, query: &Value) -> Option<CannedQuery> {
    match query {
        Value::String(sql) => Some(CannedQuery {
            name: name.to_string(),
            sql: sql.clone(),
            title: None,
        }),
        Value::Object(map) => Some(CannedQuery {
            name: name.to_string(),
            sql: map.get("sql")?.as_str()?.to_string(),
            title: map.get("title").and_then(Value::as_str).map(String::from),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Metadata {
        Metadata::new(json!({
            "title": "root",
            "license": "MIT",
            "databases": {
                "fixtures": {
                    "title": "db",
                    "queries": {
                        "one": "select 1",
                        "two": {"sql": "select 2", "title": "Two"}
                    },
                    "tables": {
                        "facets": {"title": "table"}
                    }
                }
            }
        }))
    }

    #[test]
    fn lookup_cascades_from_table_to_root() {
        let meta = sample();
        assert_eq!(meta.lookup("title", Some("fixtures"), Some("facets"), true), Some(&json!("table")));
        assert_eq!(meta.lookup("title", Some("fixtures"), None, true), Some(&json!("db")));
        assert_eq!(meta.lookup("license", Some("fixtures"), Some("facets"), true), Some(&json!("MIT")));
        assert_eq!(meta.lookup("title", None, None, true), Some(&json!("root")));
    }

    #[test]
    fn lookup_without_fallback_uses_most_specific_level() {
        let meta = sample();
        assert_eq!(meta.lookup("license", Some("fixtures"), Some("facets"), false), None);
        assert_eq!(meta.lookup("title", Some("fixtures"), Some("missing"), false), None);
    }

    #[test]
    fn merged_prefers_specific_values() {
        let merged = sample().merged(Some("fixtures"), Some("facets"), true);
        assert_eq!(merged["title"], "table");
        assert_eq!(merged["license"], "MIT");
    }

    #[test]
    fn canned_queries_accept_strings_and_objects() {
        let meta = sample();
        let queries = meta.canned_queries("fixtures");
        assert_eq!(queries.len(), 2);
        let two = meta.canned_query("fixtures", "two").unwrap();
        assert_eq!(two.sql, "select 2");
        assert_eq!(two.title.as_deref(), Some("Two"));
        assert!(meta.canned_query("other", "one").is_none());
    }

    #[test]
    fn plugin_config_resolves_files() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("secret.txt");
        std::fs::write(&secret, "hunter2").unwrap();
        let meta = Metadata::new(json!({
            "plugins": {"auth": {"key": {"$file": secret.to_str().unwrap()}, "plain": 1}}
        }));
        let config = meta.plugin_config("auth", None, None).unwrap();
        assert_eq!(config["key"], "hunter2");
        assert_eq!(config["plain"], 1);
    }
}
