//! Offload Worker
//!
//! Runtime half of offload: boots the compiled worker bundle and exchanges
//! data requests with it.
//!
//! - [`session`]: the per-request worker session service
//! - [`js`]: workers backed by V8 isolates
//! - [`adapter`]: model queries routed through a worker
//! - [`protocol`]: the messages on the wire

pub mod adapter;
mod error;
pub mod js;
pub mod protocol;
pub mod session;
mod worker;

pub use adapter::{BackgroundAdapter, QueryResult};
pub use error::{SessionError, WorkerError};
pub use js::{init_platform, JsWorker, JsWorkerFactory};
pub use session::{SessionState, WorkerProxy, WorkerSessions};
pub use worker::{Worker, WorkerFactory};
