//! Deno ops backing the worker globals.

use deno_core::error::{generic_error, AnyError};
use deno_core::op2;
use deno_core::OpState;
use serde_json::Value;
use tokio::sync::mpsc;

/// Messages the worker posts back to the host.
pub(crate) struct Outbound(pub mpsc::UnboundedSender<Value>);

/// Worker label used in log lines.
pub(crate) struct WorkerName(pub String);

/// `postMessage` from inside the worker.
#[op2]
pub fn op_post_message(state: &mut OpState, #[serde] message: serde_json::Value) -> Result<(), AnyError> {
    state
        .borrow::<Outbound>()
        .0
        .send(message)
        .map_err(|_| generic_error("Worker host has gone away"))
}

/// `console.*` forwarded to tracing.
#[op2(fast)]
pub fn op_worker_log(state: &mut OpState, #[string] level: &str, #[string] msg: &str) {
    let name = &state.borrow::<WorkerName>().0;
    match level {
        "error" => tracing::error!("[{}] {}", name, msg),
        "warn" => tracing::warn!("[{}] {}", name, msg),
        "debug" => tracing::debug!("[{}] {}", name, msg),
        "trace" => tracing::trace!("[{}] {}", name, msg),
        _ => tracing::info!("[{}] {}", name, msg),
    }
}

/// `crypto.randomUUID()`
#[op2]
#[string]
pub fn op_random_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Timer primitive behind `setTimeout`.
#[op2(async)]
pub async fn op_sleep(millis: u32) {
    tokio::time::sleep(std::time::Duration::from_millis(millis as u64)).await;
}

deno_core::extension!(
    offload_worker,
    ops = [op_post_message, op_worker_log, op_random_uuid, op_sleep],
    esm_entry_point = "ext:offload_worker/bootstrap.js",
    esm = [dir "src/js", "bootstrap.js"],
);
