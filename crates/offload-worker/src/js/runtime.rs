//! The worker thread.
//!
//! Each worker owns one isolate on a dedicated thread with a current-thread
//! tokio runtime. The loop below waits on shutdown, inbound messages and the
//! isolate's event loop.

use std::sync::Once;

use deno_core::v8;
use deno_core::JsRuntime;
use deno_core::PollEventLoopOptions;
use deno_core::RuntimeOptions;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use super::ops::{offload_worker, Outbound, WorkerName};
use crate::error::WorkerError;

static V8_INIT: Once = Once::new();

/// Serializes isolate creation.
static ISOLATE_CREATE_LOCK: parking_lot::Mutex<()> = parking_lot::const_mutex(());

const SCRIPT_NAME: &str = "offload:worker.js";

/// Initialize the V8 platform. Safe to call more than once.
pub fn init_platform() {
    V8_INIT.call_once(|| {
        JsRuntime::init_platform(None, false);
    });
}

pub(crate) enum WorkerCommand {
    Post(Value),
}

pub(crate) async fn run_worker(
    name: String,
    code: String,
    mut cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>,
    outbound: mpsc::UnboundedSender<Value>,
    mut shutdown_rx: watch::Receiver<bool>,
    init_tx: std::sync::mpsc::SyncSender<Result<v8::IsolateHandle, String>>,
) -> Result<(), WorkerError> {
    let mut js_runtime = {
        let _lock = ISOLATE_CREATE_LOCK.lock();
        tracing::debug!("[run_worker:{}] Creating JsRuntime", name);
        JsRuntime::new(RuntimeOptions {
            extensions: vec![offload_worker::init_ops_and_esm()],
            ..Default::default()
        })
    };

    let isolate_handle = js_runtime.v8_isolate().thread_safe_handle();
    {
        let op_state = js_runtime.op_state();
        let mut state = op_state.borrow_mut();
        state.put(Outbound(outbound));
        state.put(WorkerName(name.clone()));
    }

    if let Err(e) = js_runtime.execute_script(SCRIPT_NAME, code) {
        let message = e.to_string();
        let _ = init_tx.send(Err(message.clone()));
        return Err(WorkerError::JavaScript(message));
    }
    let _ = init_tx.send(Ok(isolate_handle));

    // Whether timers or ops may still be outstanding.
    let mut pending = true;
    let mut result = Ok(());

    loop {
        if *shutdown_rx.borrow() {
            tracing::debug!("[run_worker:{}] Shutdown requested", name);
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::debug!("[run_worker:{}] Command channel closed", name);
                    break;
                };
                match cmd {
                    WorkerCommand::Post(message) => {
                        if let Err(e) = dispatch(&mut js_runtime, &message) {
                            tracing::error!("[run_worker:{}] {}", name, e);
                            result = Err(e);
                            break;
                        }
                        pending = true;
                    }
                }
            }

            polled = js_runtime.run_event_loop(PollEventLoopOptions::default()), if pending => {
                pending = false;
                if let Err(e) = polled {
                    tracing::error!("[run_worker:{}] {}", name, e);
                    result = Err(WorkerError::JavaScript(e.to_string()));
                    break;
                }
            }
        }
    }

    tracing::debug!("[run_worker:{}] Worker loop exited", name);
    result
}

/// Hand `message` to the worker's `message` listeners.
fn dispatch(js_runtime: &mut JsRuntime, message: &Value) -> Result<(), WorkerError> {
    let payload = serde_json::to_string(message).map_err(|e| WorkerError::JavaScript(e.to_string()))?;
    js_runtime
        .execute_script("<message>", format!("globalThis.__offloadDispatch({});", payload))
        .map(|_| ())
        .map_err(|e| WorkerError::JavaScript(e.to_string()))
}
