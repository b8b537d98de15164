//! Messages exchanged with a worker.
//!
//! ```text
//! host -> worker   { "config": { "location": "/workers/background-adapters/worker.js" } }
//! worker -> host   { "id": "…" }
//! host -> worker   { "url": "/api/widgets?page=2" }
//! worker -> host   { … }
//! ```

use serde::{Deserialize, Serialize};

/// Configuration handed to the worker at boot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// URL the worker script was loaded from.
    pub location: String,
    /// Anything else the host wants the worker to see.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WorkerConfig {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// First message posted to a new worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootMessage {
    pub config: WorkerConfig,
}

/// The worker's answer to [`BootMessage`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BootReply {
    #[serde(default)]
    pub id: serde_json::Value,
}

/// A data request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRequest {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_boot_message_shape() {
        let mut config = WorkerConfig::new("/workers/background-adapters/worker.js");
        config.extra.insert("timeout".into(), json!(500));

        let value = serde_json::to_value(BootMessage { config }).unwrap();
        assert_eq!(
            value,
            json!({ "config": { "location": "/workers/background-adapters/worker.js", "timeout": 500 } })
        );
    }

    #[test]
    fn test_boot_reply_tolerates_missing_id() {
        let reply: BootReply = serde_json::from_value(json!({})).unwrap();
        assert!(reply.id.is_null());

        let reply: BootReply = serde_json::from_value(json!({ "id": "abc", "other": 1 })).unwrap();
        assert_eq!(reply.id, json!("abc"));
    }
}
