//! The worker seam.
//!
//! A worker is an isolated script that exchanges JSON messages with the
//! host. [`WorkerFactory`] starts one from a script location.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::WorkerError;

#[async_trait]
pub trait Worker: Send {
    /// Deliver a message to the worker's `message` listeners.
    fn post_message(&self, message: Value) -> Result<(), WorkerError>;

    /// The next message the worker posted, or `None` once it has gone away.
    async fn next_message(&mut self) -> Option<Value>;

    /// Stop the worker. Idempotent.
    fn terminate(&mut self);
}

pub trait WorkerFactory: Send + Sync {
    /// Start a worker running the script at `location`.
    fn spawn(&self, location: &str) -> Result<Box<dyn Worker>, WorkerError>;
}
