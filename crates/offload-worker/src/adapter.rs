//! Background data adapter
//!
//! Turns a model query into a request URL and runs it through a worker
//! session, so data loading happens off the caller's thread.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

use crate::error::SessionError;
use crate::session::WorkerSessions;

/// Result of [`BackgroundAdapter::query`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub data: Value,
}

pub struct BackgroundAdapter {
    sessions: Arc<WorkerSessions>,
    host: String,
    namespace: String,
}

impl BackgroundAdapter {
    pub fn new(sessions: Arc<WorkerSessions>) -> Self {
        Self {
            sessions,
            host: String::new(),
            namespace: String::new(),
        }
    }

    /// Scheme and authority, e.g. `https://api.example.com`. Empty for same-origin.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Path prefix, e.g. `api/v1`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// `<host>/<namespace>/<models>?<query>`
    pub fn url_for_query(&self, model_name: &str, query: &serde_json::Map<String, Value>) -> String {
        let mut url = self.host.trim_end_matches('/').to_string();
        let path = path_for_type(model_name);
        for segment in [self.namespace.trim_matches('/'), path.as_str()] {
            if !segment.is_empty() {
                url.push('/');
                url.push_str(segment);
            }
        }
        if url.is_empty() {
            url.push('/');
        }

        if !query.is_empty() {
            let mut pairs = form_urlencoded::Serializer::new(String::new());
            for (key, value) in query {
                append(&mut pairs, key, value);
            }
            url.push('?');
            url.push_str(&pairs.finish());
        }
        url
    }

    /// Fetch records of `model_name` matching `query` through a worker.
    ///
    /// `serializer` names the serializer the caller will apply to `data`.
    pub async fn query(
        &self,
        model_name: &str,
        query: &serde_json::Map<String, Value>,
        serializer: &str,
    ) -> Result<QueryResult, SessionError> {
        let url = self.url_for_query(model_name, query);
        debug!(model = model_name, serializer, %url, "Background query");

        let data = self.sessions.chunk(&url).await?;
        Ok(QueryResult { data })
    }
}

fn append(pairs: &mut form_urlencoded::Serializer<'_, String>, key: &str, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => {
            pairs.append_pair(key, s);
        }
        Value::Array(items) => {
            let key = format!("{}[]", key);
            for item in items {
                append(pairs, &key, item);
            }
        }
        Value::Object(fields) => {
            for (field, item) in fields {
                append(pairs, &format!("{}[{}]", key, field), item);
            }
        }
        other => {
            pairs.append_pair(key, &other.to_string());
        }
    }
}

/// `blogPost` → `blog-posts`
fn path_for_type(model_name: &str) -> String {
    pluralize(&dasherize(model_name))
}

fn dasherize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '_' || c == ' ' || c == '-' {
            if !out.ends_with('-') && !out.is_empty() {
                out.push('-');
            }
            prev_lower = false;
        } else if c.is_uppercase() {
            if prev_lower && !out.ends_with('-') {
                out.push('-');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

fn pluralize(word: &str) -> String {
    if word.is_empty() {
        return String::new();
    }
    let (head, last) = match word.rfind('-') {
        Some(i) => word.split_at(i + 1),
        None => ("", word),
    };

    let plural = if last.ends_with("ss")
        || last.ends_with('x')
        || last.ends_with('z')
        || last.ends_with("ch")
        || last.ends_with("sh")
    {
        format!("{}es", last)
    } else if last.len() > 1
        && last.ends_with('y')
        && !last[..last.len() - 1].ends_with(['a', 'e', 'i', 'o', 'u'])
    {
        format!("{}ies", &last[..last.len() - 1])
    } else if last.ends_with('s') {
        last.to_string()
    } else {
        format!("{}s", last)
    };
    format!("{}{}", head, plural)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;
    use crate::worker::{Worker, WorkerFactory};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::mpsc;

    /// Answers the handshake, then echoes the request URL.
    struct EchoWorker {
        tx: mpsc::UnboundedSender<Value>,
        rx: mpsc::UnboundedReceiver<Value>,
    }

    #[async_trait]
    impl Worker for EchoWorker {
        fn post_message(&self, message: Value) -> Result<(), WorkerError> {
            let reply = match message.get("url") {
                Some(url) => json!({ "records": [], "url": url }),
                None => json!({ "id": "echo" }),
            };
            self.tx.send(reply).map_err(|_| WorkerError::ChannelClosed)
        }

        async fn next_message(&mut self) -> Option<Value> {
            self.rx.recv().await
        }

        fn terminate(&mut self) {}
    }

    struct EchoFactory;

    impl WorkerFactory for EchoFactory {
        fn spawn(&self, _location: &str) -> Result<Box<dyn Worker>, WorkerError> {
            let (tx, rx) = mpsc::unbounded_channel();
            Ok(Box::new(EchoWorker { tx, rx }))
        }
    }

    fn adapter() -> BackgroundAdapter {
        let sessions = WorkerSessions::new(Arc::new(EchoFactory), "/worker.js");
        BackgroundAdapter::new(Arc::new(sessions))
    }

    fn query(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_path_for_type() {
        assert_eq!(path_for_type("post"), "posts");
        assert_eq!(path_for_type("blogPost"), "blog-posts");
        assert_eq!(path_for_type("user_profile"), "user-profiles");
        assert_eq!(path_for_type("category"), "categories");
        assert_eq!(path_for_type("day"), "days");
        assert_eq!(path_for_type("address"), "addresses");
        assert_eq!(path_for_type("box"), "boxes");
        assert_eq!(path_for_type("news"), "news");
    }

    #[test]
    fn test_url_for_query() {
        let adapter = adapter()
            .with_host("https://api.example.com/")
            .with_namespace("/api/v1/");

        assert_eq!(
            adapter.url_for_query("blogPost", &query(json!({}))),
            "https://api.example.com/api/v1/blog-posts"
        );
        assert_eq!(
            adapter.url_for_query(
                "blogPost",
                &query(json!({ "page": 2, "filter": { "tag": "a b" }, "ids": [1, 2], "skip": null }))
            ),
            "https://api.example.com/api/v1/blog-posts?page=2&filter%5Btag%5D=a+b&ids%5B%5D=1&ids%5B%5D=2"
        );
    }

    #[test]
    fn test_same_origin_url() {
        assert_eq!(adapter().url_for_query("widget", &query(json!({}))), "/widgets");
    }

    #[tokio::test]
    async fn test_query_wraps_reply_in_data() {
        let adapter = adapter().with_namespace("api");

        let result = adapter
            .query("widget", &query(json!({ "q": "x" })), "application")
            .await
            .unwrap();

        assert_eq!(
            result,
            QueryResult {
                data: json!({ "records": [], "url": "/api/widgets?q=x" })
            }
        );
    }
}
