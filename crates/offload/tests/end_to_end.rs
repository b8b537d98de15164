//! Build a two-contributor project and run requests through the compiled
//! worker on a real isolate.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use offload::config::{OffloadConfig, PLUGIN_KEYWORD, WORKERS_LOCATION};
use offload::pipeline::{self, BuildReport};
use offload_worker::{BackgroundAdapter, JsWorkerFactory, Worker, WorkerFactory, WorkerSessions};

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn plugin(root: &Path, name: &str) -> std::path::PathBuf {
    let dir = root.join("node_modules").join(name);
    write(
        &dir.join("package.json"),
        &format!(
            r#"{{ "name": "{}", "keywords": ["{}"], "dependencies": {{ "shared": "*" }} }}"#,
            name, PLUGIN_KEYWORD
        ),
    );
    write(
        &dir.join("node_modules/shared/package.json"),
        r#"{ "name": "shared", "main": "lib.js" }"#,
    );
    write(
        &dir.join("node_modules/shared/lib.js"),
        &format!("exports.owner = '{}';\n", name),
    );
    dir.join(WORKERS_LOCATION)
}

/// pkg-a and pkg-b both register themselves; pkg-b answers requests.
fn project() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    write(
        &root.join("package.json"),
        r#"{ "name": "app", "dependencies": { "pkg-a": "*", "pkg-b": "*" } }"#,
    );

    let a = plugin(root, "pkg-a");
    write(
        &a.join("index.js"),
        r#"import { owner } from 'shared';

self.registered = (self.registered || []).concat(owner);
"#,
    );

    let b = plugin(root, "pkg-b");
    write(
        &b.join("index.js"),
        r#"import { describe } from './describe';

self.registered = (self.registered || []).concat('pkg-b');

self.handleRequest = async function (url, config) {
  return describe(url, self.registered, config);
};
"#,
    );
    write(
        &b.join("describe.js"),
        r#"export function describe(url, registered, config) {
  return { url: url, registered: registered.slice(), location: config.location };
}
"#,
    );

    temp
}

fn build(root: &Path, config: &OffloadConfig) -> BuildReport {
    pipeline::build(root, config).unwrap().unwrap()
}

fn sessions(root: &Path, config: &OffloadConfig, report: &BuildReport) -> WorkerSessions {
    let factory = JsWorkerFactory::new(config.output_root(root)).with_root_url(&config.root_url);
    WorkerSessions::new(Arc::new(factory), report.location.clone())
        .with_timeout(Some(Duration::from_secs(10)))
}

#[tokio::test]
async fn test_contributors_register_before_handshake() {
    let temp = project();
    let config = OffloadConfig::default();
    let report = build(temp.path(), &config);
    assert_eq!(report.contributors, vec!["pkg-a", "pkg-b", "offload-runtime"]);

    let sessions = sessions(temp.path(), &config, &report);
    let reply = sessions.chunk("/api/widgets?page=2").await.unwrap();

    assert_eq!(
        reply,
        json!({
            "url": "/api/widgets?page=2",
            "registered": ["pkg-a", "pkg-b"],
            "location": "/workers/background-adapters/worker.js",
        })
    );
}

#[tokio::test]
async fn test_handshake_announces_session_id() {
    let temp = project();
    let config = OffloadConfig::default();
    let report = build(temp.path(), &config);

    let factory = JsWorkerFactory::new(config.output_root(temp.path()));
    let mut worker = factory.spawn(&report.location).unwrap();
    worker
        .post_message(json!({ "config": { "location": report.location } }))
        .unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(10), worker.next_message())
        .await
        .unwrap()
        .unwrap();
    let id = reply["id"].as_str().unwrap();
    assert_eq!(id.len(), 36);

    // Once booted, a stray boot message is ignored.
    worker.post_message(json!({ "config": {} })).unwrap();
    worker.post_message(json!({ "url": "/ping" })).unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(10), worker.next_message())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply["url"], json!("/ping"));

    worker.terminate();
}

#[tokio::test]
async fn test_minified_bundle_behaves_the_same() {
    let temp = project();
    let config = OffloadConfig {
        minify: true,
        ..OffloadConfig::default()
    };
    let report = build(temp.path(), &config);

    let sessions = sessions(temp.path(), &config, &report);
    let first = sessions.chunk("/a").await.unwrap();
    let second = sessions.chunk("/b").await.unwrap();

    assert_eq!(first["registered"], json!(["pkg-a", "pkg-b"]));
    assert_eq!(second["url"], json!("/b"));
}

#[tokio::test]
async fn test_request_without_handler_gets_empty_reply() {
    let temp = TempDir::new().unwrap();
    write(&temp.path().join("package.json"), r#"{ "name": "bare" }"#);
    let config = OffloadConfig::default();
    let report = build(temp.path(), &config);
    assert_eq!(report.contributors, vec!["offload-runtime"]);

    let sessions = sessions(temp.path(), &config, &report);
    assert_eq!(sessions.chunk("/anything").await.unwrap(), json!({}));
}

#[tokio::test]
async fn test_slow_handler_is_cut_off_by_worker_timeout() {
    let temp = project();
    write(
        &temp.path().join("tests/dummy").join(WORKERS_LOCATION).join("index.js"),
        r#"self.handleRequest = function () {
  return new Promise(function (resolve) {
    setTimeout(function () { resolve({ late: true }); }, 5000);
  });
};
"#,
    );
    let config = OffloadConfig::default();
    let report = build(temp.path(), &config);
    assert_eq!(report.contributors.last().map(String::as_str), Some("app-dummy"));

    let sessions = sessions(temp.path(), &config, &report).with_config_value("timeout", json!(50));
    assert_eq!(sessions.chunk("/slow").await.unwrap(), json!({}));
}

#[tokio::test]
async fn test_configured_timeout_reaches_runtime() {
    let temp = project();
    write(
        &temp.path().join("tests/dummy").join(WORKERS_LOCATION).join("index.js"),
        r#"self.handleRequest = function () {
  return new Promise(function (resolve) {
    setTimeout(function () { resolve({ late: true }); }, 5000);
  });
};
"#,
    );
    let config = OffloadConfig {
        request_timeout_ms: 50,
        ..OffloadConfig::default()
    };
    build(temp.path(), &config);

    let factory = JsWorkerFactory::new(config.output_root(temp.path())).with_root_url(&config.root_url);
    let sessions = pipeline::sessions(&config, Arc::new(factory));
    assert_eq!(sessions.chunk("/slow").await.unwrap(), json!({}));
}

#[tokio::test]
async fn test_background_adapter_query() {
    let temp = project();
    let config = OffloadConfig::default();
    let report = build(temp.path(), &config);

    let adapter = BackgroundAdapter::new(Arc::new(sessions(temp.path(), &config, &report)))
        .with_namespace("api");
    let query: serde_json::Map<String, Value> = json!({ "page": 1 }).as_object().cloned().unwrap();

    let result = adapter.query("lineItem", &query, "application").await.unwrap();
    assert_eq!(result.data["url"], json!("/api/line-items?page=1"));
}
