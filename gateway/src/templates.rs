//! Template rendering.
//!
//! Templates are looked up by name in the configured template directory,
//! then in plugin template directories, then among the built-in defaults.
//! The syntax is deliberately small: `{{ a.b }}` inserts an HTML-escaped
//! value, `|safe` skips escaping, `|json` inserts JSON, and three page
//! directives (`custom_header`, `custom_status`, `custom_redirect`) let a
//! page template shape its own response.

use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use thiserror::Error;

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("tag pattern"));
static DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(custom_header|custom_status|custom_redirect)\((.*)\)$")
        .expect("directive pattern")
});
static ARG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""((?:[^"\\]|\\.)*)"|'([^']*)'|(-?\d+)"#).expect("argument pattern")
});

const BUILTIN_500: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{ title }}</title>{{ extra_css_html|safe }}</head>
<body>
<h1>{{ title }}</h1>
<div class="error">{{ message_html|safe }}</div>
{{ extra_js_html|safe }}{{ extra_body_script_html|safe }}
</body>
</html>
"#;

const BUILTIN_DEFAULT: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{ title }}</title>{{ extra_css_html|safe }}</head>
<body>
<p><a href="{{ base_url }}">home</a></p>
<h1>{{ title }}</h1>
<pre>{{ data|json }}</pre>
{{ extra_js_html|safe }}{{ extra_body_script_html|safe }}
</body>
</html>
"#;

const BUILTIN_SHOW_JSON: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>{{ filename }}</title>{{ extra_css_html|safe }}</head>
<body>
<h1>{{ filename }}</h1>
<p><a href="{{ filename }}.json">json</a></p>
<pre>{{ data|json }}</pre>
{{ extra_js_html|safe }}{{ extra_body_script_html|safe }}
</body>
</html>
"#;

const BUILTIN_PATTERNS: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Pattern portfolio</title>{{ extra_css_html|safe }}</head>
<body>
<h1>Pattern portfolio</h1>
<section><h2>Message</h2><p class="message-info">Example message</p></section>
<section><h2>Error</h2><div class="error">Example error</div></section>
<section><h2>Table</h2><table><thead><tr><th>id</th><th>name</th></tr></thead>
<tbody><tr><td>1</td><td>Example</td></tr></tbody></table></section>
<section><h2>Metadata</h2><pre>{{ metadata|json }}</pre></section>
</body>
</html>
"#;

fn builtin(name: &str) -> Option<&'static str> {
    match name {
        "500.html" => Some(BUILTIN_500),
        "default.html" => Some(BUILTIN_DEFAULT),
        "show_json.html" => Some(BUILTIN_SHOW_JSON),
        "patterns.html" => Some(BUILTIN_PATTERNS),
        _ => None,
    }
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),
    #[error("template {name}: {message}")]
    Invalid { name: String, message: String },
}

/// Response adjustments a page template asked for while rendering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageDirectives {
    pub headers: Vec<(String, String)>,
    pub status: Option<u16>,
    pub redirect: Option<String>,
    /// Status for `redirect`; 302 when unset.
    pub redirect_status: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct Rendered {
    /// Name of the template that was used.
    pub template: String,
    pub body: String,
    pub directives: PageDirectives,
}

#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    /// Renders the first of `names` that exists.
    async fn render(&self, names: &[String], context: &Value) -> Result<Rendered, TemplateError>;
}

/// Filesystem-backed renderer.
pub struct FileTemplates {
    dirs: Vec<PathBuf>,
    globals: Map<String, Value>,
}

impl FileTemplates {
    /// `dirs` are searched in order before the built-ins. `globals` are
    /// visible in every template unless the context shadows them.
    pub fn new(dirs: Vec<PathBuf>, globals: Map<String, Value>) -> Self {
        Self { dirs, globals }
    }

    async fn load(&self, name: &str) -> Option<String> {
        for dir in &self.dirs {
            if let Ok(source) = tokio::fs::read_to_string(dir.join(name)).await {
                return Some(source);
            }
        }
        builtin(name).map(String::from)
    }
}

#[async_trait]
impl TemplateRenderer for FileTemplates {
    async fn render(&self, names: &[String], context: &Value) -> Result<Rendered, TemplateError> {
        for name in names {
            if name.split('/').any(|segment| segment == "..") {
                continue;
            }
            let Some(source) = self.load(name).await else {
                continue;
            };
            let mut scope = self.globals.clone();
            if let Value::Object(map) = context {
                scope.extend(map.clone());
            }
            let (body, directives) = render_source(&source, &Value::Object(scope))
                .map_err(|message| TemplateError::Invalid {
                    name: name.clone(),
                    message,
                })?;
            return Ok(Rendered {
                template: name.clone(),
                body,
                directives,
            });
        }
        Err(TemplateError::NotFound(names.join(", ")))
    }
}

/// Renders `source` against `context`, collecting page directives.
pub fn render_source(source: &str, context: &Value) -> Result<(String, PageDirectives), String> {
    let mut directives = PageDirectives::default();
    let mut failure = None;
    let body = TAG.replace_all(source, |caps: &Captures<'_>| {
        match expand(&caps[1], context, &mut directives) {
            Ok(text) => text,
            Err(message) => {
                failure.get_or_insert(message);
                String::new()
            }
        }
    });
    match failure {
        Some(message) => Err(message),
        None => Ok((body.into_owned(), directives)),
    }
}

fn expand(expr: &str, context: &Value, directives: &mut PageDirectives) -> Result<String, String> {
    if let Some(caps) = DIRECTIVE.captures(expr) {
        let args: Vec<String> = ARG
            .captures_iter(&caps[2])
            .filter_map(|a| a.get(1).or_else(|| a.get(2)).or_else(|| a.get(3)))
            .map(|m| m.as_str().replace("\\\"", "\""))
            .collect();
        match (&caps[1], args.as_slice()) {
            ("custom_header", [name, value]) => directives.headers.push((name.clone(), value.clone())),
            ("custom_status", [status]) => directives.status = Some(parse_status(status)?),
            ("custom_redirect", [location]) => directives.redirect = Some(location.clone()),
            ("custom_redirect", [location, status]) => {
                directives.redirect_status = Some(parse_status(status)?);
                directives.redirect = Some(location.clone());
            }
            (name, _) => return Err(format!("wrong arguments for {name}")),
        }
        return Ok(String::new());
    }

    let mut parts = expr.split('|').map(str::trim);
    let path = parts.next().unwrap_or_default();
    let value = lookup(context, path);
    let mut safe = false;
    let mut as_json = false;
    for filter in parts {
        match filter {
            "safe" => safe = true,
            "json" => as_json = true,
            other => return Err(format!("unknown filter {other}")),
        }
    }
    let text = if as_json {
        serde_json::to_string_pretty(value.unwrap_or(&Value::Null)).map_err(|e| e.to_string())?
    } else {
        value.map(display).unwrap_or_default()
    };
    Ok(if safe { text } else { escape_html(&text) })
}

fn parse_status(status: &str) -> Result<u16, String> {
    status
        .parse::<u16>()
        .ok()
        .filter(|code| (100..=999).contains(code))
        .ok_or_else(|| format!("invalid status {status}"))
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(context, |value, key| match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_are_escaped_unless_safe() {
        let ctx = json!({"a": {"b": "<i>x</i>"}, "n": 3, "list": ["p", "q"]});
        let (body, _) = render_source("{{ a.b }}|{{a.b|safe}}|{{ n }}|{{ list.1 }}|{{ missing }}", &ctx).unwrap();
        assert_eq!(body, "&lt;i&gt;x&lt;/i&gt;|<i>x</i>|3|q|");
    }

    #[test]
    fn directives_are_collected_and_removed() {
        let source = r#"{{ custom_header("X-Kind", "page") }}{{ custom_status(418) }}{{ custom_redirect('/elsewhere') }}body"#;
        let (body, directives) = render_source(source, &json!({})).unwrap();
        assert_eq!(body, "body");
        assert_eq!(
            directives,
            PageDirectives {
                headers: vec![("X-Kind".into(), "page".into())],
                status: Some(418),
                redirect: Some("/elsewhere".into()),
                redirect_status: None,
            }
        );
    }

    #[test]
    fn redirect_takes_an_optional_status() {
        let (_, directives) = render_source(r#"{{ custom_redirect("/x", 301) }}"#, &json!({})).unwrap();
        assert_eq!(directives.redirect.as_deref(), Some("/x"));
        assert_eq!(directives.redirect_status, Some(301));
        assert!(render_source(r#"{{ custom_redirect("/x", 7) }}"#, &json!({})).is_err());
    }

    #[test]
    fn unknown_filter_is_an_error() {
        assert!(render_source("{{ a|upper }}", &json!({"a": "x"})).is_err());
    }

    #[tokio::test]
    async fn search_order_and_globals() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("500.html"), "custom {{ error }} {{ site }}").unwrap();
        let templates = FileTemplates::new(
            vec![dir.path().to_path_buf()],
            Map::from_iter([("site".to_string(), json!("demo"))]),
        );

        let names = vec!["404.html".to_string(), "500.html".to_string()];
        let rendered = templates.render(&names, &json!({"error": "gone"})).await.unwrap();
        assert_eq!(rendered.template, "500.html");
        assert_eq!(rendered.body, "custom gone demo");

        let rendered = templates
            .render(&["show_json.html".to_string()], &json!({"filename": "versions", "data": {}}))
            .await
            .unwrap();
        assert!(rendered.body.contains("<h1>versions</h1>"));

        let missing = templates.render(&["nope.html".to_string()], &json!({})).await;
        assert!(matches!(missing, Err(TemplateError::NotFound(_))));
    }

    #[tokio::test]
    async fn parent_segments_are_never_loaded() {
        let templates = FileTemplates::new(Vec::new(), Map::new());
        let result = templates.render(&["../500.html".to_string()], &json!({})).await;
        assert!(matches!(result, Err(TemplateError::NotFound(_))));
    }
}
