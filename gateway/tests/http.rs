use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use common::config::{AppConfig, Settings};
use common::errors::{AppError, AppResult};
use connection_service::Database;
use gateway::router::RouteTable;
use gateway::state::{AppContext, AppState};
use gateway::views::special::{DataSource, JsonDataView};
use http_body_util::BodyExt;
use rusqlite::Connection;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

fn fixtures(dir: &Path) -> PathBuf {
    let path = dir.join("fixtures.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "create table dogs (id integer primary key, name text);
         insert into dogs (name) values ('Cleo'), ('Pancakes'), ('Fido');
         create table pairs (a text, b text, v integer, primary key (a, b));
         insert into pairs values ('x,1', 'y', 1), ('p', 'q', 2);",
    )
    .unwrap();
    path
}

fn config(dir: &TempDir) -> AppConfig {
    let templates = dir.path().join("templates");
    std::fs::create_dir_all(templates.join("pages")).unwrap();
    std::fs::write(
        templates.join("pages/about.html"),
        r#"{{ custom_status(418) }}{{ custom_header("X-Page", "about") }}About {{ request_path }}"#,
    )
    .unwrap();
    std::fs::write(
        templates.join("pages/old.html"),
        r#"{{ custom_redirect("/about") }}gone"#,
    )
    .unwrap();
    std::fs::write(
        templates.join("pages/moved.html"),
        r#"{{ custom_redirect("/about", 301) }}"#,
    )
    .unwrap();
    AppConfig {
        files: vec![fixtures(dir.path())],
        template_dir: Some(templates),
        ..AppConfig::default()
    }
}

async fn app(config: AppConfig) -> Router {
    gateway::build(config, Vec::new()).await.unwrap()
}

async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn json_body(response: Response) -> Value {
    serde_json::from_str(&text(response).await).unwrap()
}

#[tokio::test]
async fn index_lists_databases() {
    let dir = TempDir::new().unwrap();
    let app = app(config(&dir)).await;
    let response = get(&app, "/.json").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["fixtures"]["tables_count"], 2);
    assert_eq!(body["fixtures"]["table_rows_sum"], 5);
}

#[tokio::test]
async fn download_route_wins_over_database_route() {
    let dir = TempDir::new().unwrap();
    let app = app(config(&dir)).await;
    let response = get(&app, "/fixtures.db").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"fixtures.db\""
    );
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/octet-stream");
}

#[tokio::test]
async fn downloads_can_be_forbidden() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.settings.allow_download = false;
    let app = app(config).await;
    assert_eq!(get(&app, "/fixtures.db").await.status(), StatusCode::FORBIDDEN);

    let memory = AppConfig {
        memory: true,
        ..AppConfig::default()
    };
    let app = gateway::build(memory, Vec::new()).await.unwrap();
    assert_eq!(get(&app, "/:memory:.db").await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn base_prefix_is_stripped_before_routing() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.settings = Settings {
        base_url: "/data/".into(),
        ..Settings::default()
    };
    let app = app(config).await;
    let prefixed = json_body(get(&app, "/data/fixtures/dogs.json").await).await;
    let plain = json_body(get(&app, "/fixtures/dogs.json").await).await;
    assert_eq!(prefixed["rows"], plain["rows"]);
    assert_eq!(prefixed["rows"][0], json!([1, "Cleo"]));
}

#[tokio::test]
async fn trailing_slash_redirects_with_empty_body() {
    let dir = TempDir::new().unwrap();
    let app = app(config(&dir)).await;
    let response = get(&app, "/fixtures/dogs/?_size=1").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/fixtures/dogs?_size=1");
    assert_eq!(text(response).await, "");
}

#[tokio::test]
async fn missing_database_is_404_json() {
    let dir = TempDir::new().unwrap();
    let app = app(config(&dir)).await;
    let response = get(&app, "/nope.json").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        json_body(response).await,
        json!({"ok": false, "error": "Database not found: nope"})
    );

    let response = get(&app, "/a/b/c/d/e").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(text(response).await.contains("Page not found"));
}

#[tokio::test]
async fn page_templates_shape_the_response() {
    let dir = TempDir::new().unwrap();
    let app = app(config(&dir)).await;
    let response = get(&app, "/about").await;
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(response.headers()["x-page"], "about");
    assert_eq!(text(response).await, "About /about");

    let response = get(&app, "/old").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[header::LOCATION], "/about");

    let response = get(&app, "/moved").await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()[header::LOCATION], "/about");
}

#[tokio::test]
async fn table_pagination_and_row_lookup() {
    let dir = TempDir::new().unwrap();
    let app = app(config(&dir)).await;
    let page = json_body(get(&app, "/fixtures/dogs.json?_size=2").await).await;
    assert_eq!(page["rows"].as_array().unwrap().len(), 2);
    assert_eq!(page["count"], 3);
    assert_eq!(page["next"], "2");
    assert_eq!(page["next_url"], "/fixtures/dogs.json?_size=2&_next=2");

    let last = json_body(get(&app, "/fixtures/dogs.json?_size=2&_next=2").await).await;
    assert_eq!(last["rows"], json!([[3, "Fido"]]));
    assert_eq!(last["next"], Value::Null);

    assert_eq!(
        get(&app, "/fixtures/dogs.json?_size=0").await.status(),
        StatusCode::BAD_REQUEST
    );

    let row = json_body(get(&app, "/fixtures/pairs/x%2C1,y.json").await).await;
    assert_eq!(row["rows"], json!([["x,1", "y", 1]]));
    assert_eq!(
        get(&app, "/fixtures/pairs/x,1.json").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn custom_sql_and_its_failures() {
    let dir = TempDir::new().unwrap();
    let app = app(config(&dir)).await;
    let body = json_body(
        get(&app, "/fixtures.json?sql=select+name+from+dogs+where+id+%3D+%3Aid&id=2").await,
    )
    .await;
    assert_eq!(body["rows"], json!([["Pancakes"]]));
    assert_eq!(body["query"]["params"], json!({"id": "2"}));

    let response = get(&app, "/fixtures.json?sql=select+nope+from+dogs").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["title"], "Invalid SQL");
}

#[tokio::test]
async fn hashed_urls_redirect_to_the_hash() {
    let dir = TempDir::new().unwrap();
    let path = fixtures(dir.path());
    let hash = Database::from_file(&path, false).compute_hash().unwrap();
    let config = AppConfig {
        immutables: vec![path],
        settings: Settings {
            hash_urls: true,
            ..Settings::default()
        },
        ..AppConfig::default()
    };
    let app = app(config).await;
    let response = get(&app, "/fixtures/dogs.json?_size=1").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers()[header::LOCATION],
        format!("/fixtures-{}/dogs.json?_size=1", &hash[..7])
    );

    let response = get(&app, &format!("/fixtures-{}/dogs.json", &hash[..7])).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        format!("max-age={}", Settings::default().default_cache_ttl_hashed)
    );
}

#[tokio::test]
async fn cors_header_on_success_and_error() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.cors = true;
    let app = app(config).await;
    let ok = get(&app, "/-/versions.json").await;
    assert_eq!(ok.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let missing = get(&app, "/nope.json").await;
    assert_eq!(missing.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let preflight = app
        .clone()
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/fixtures/dogs.json")
                .header(header::ORIGIN, "https://example.com")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(preflight.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert!(preflight.headers().contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));

    let other = TempDir::new().unwrap();
    let closed = self::app(self::config(&other)).await;
    let ok = get(&closed, "/-/versions.json").await;
    assert!(!ok.headers().contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

struct Broken;

#[async_trait]
impl DataSource for Broken {
    async fn load(&self, _ctx: &AppContext) -> AppResult<Value> {
        Err(AppError::Internal("boom".into()))
    }
}

#[tokio::test]
async fn unexpected_failure_is_500_json() {
    let ctx = AppContext::new(AppConfig::default(), Vec::new()).unwrap();
    let mut routes = RouteTable::new("/");
    routes
        .register(
            r"/-/broken(?:\.(?P<format>json))?",
            JsonDataView::new("broken.json", Arc::new(Broken)),
        )
        .unwrap();
    let app = gateway::create_router(AppState::new(ctx, routes));

    let response = get(&app, "/-/broken.json").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await, json!({"ok": false, "error": "boom"}));

    let response = get(&app, "/-/broken").await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(text(response).await.contains("boom"));
}

#[tokio::test]
async fn introspection_endpoints() {
    let dir = TempDir::new().unwrap();
    let app = app(config(&dir)).await;
    let threads = json_body(get(&app, "/-/threads.json").await).await;
    assert_eq!(threads["num_threads"], 3);
    let config = json_body(get(&app, "/-/config.json").await).await;
    assert_eq!(config["sql_time_limit_ms"], 1000);
    let databases = json_body(get(&app, "/-/databases.json").await).await;
    assert_eq!(databases[0]["name"], "fixtures");
    let html = text(get(&app, "/-/versions").await).await;
    assert!(html.contains("versions.json"));
}

struct Assets {
    dir: PathBuf,
}

impl gateway::plugins::Plugin for Assets {
    fn name(&self) -> &str {
        "my-plugin"
    }

    fn static_dir(&self) -> Option<PathBuf> {
        Some(self.dir.clone())
    }

    fn register_output_renderer(&self) -> Vec<gateway::renderers::OutputRenderer> {
        vec![gateway::renderers::OutputRenderer::new("csv", |input| {
            let mut out = input.columns.join(",");
            for row in input.rows {
                out.push('\n');
                out.push_str(&row.iter().map(Value::to_string).collect::<Vec<_>>().join(","));
            }
            Ok(out.into_response())
        })]
    }
}

#[tokio::test]
async fn plugin_assets_and_renderers() {
    let dir = TempDir::new().unwrap();
    let assets = dir.path().join("assets");
    std::fs::create_dir_all(&assets).unwrap();
    std::fs::write(assets.join("app.css"), "body {}").unwrap();
    let plugin: Arc<dyn gateway::plugins::Plugin> = Arc::new(Assets { dir: assets });
    let app = gateway::build(config(&dir), vec![plugin]).await.unwrap();

    for uri in ["/-/static-plugins/my-plugin/app.css", "/-/static-plugins/my_plugin/app.css"] {
        let response = get(&app, uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(text(response).await, "body {}");
    }
    assert_eq!(
        get(&app, "/-/static-plugins/my-plugin/missing.css").await.status(),
        StatusCode::NOT_FOUND
    );

    let csv = text(get(&app, "/fixtures/dogs.csv?_size=1").await).await;
    assert_eq!(csv, "id,name\n1,\"Cleo\"");
}
