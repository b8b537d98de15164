use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use async_trait::async_trait;
use deno_core::v8;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use super::runtime::WorkerCommand;
use crate::error::WorkerError;
use crate::worker::Worker;

/// Handle to a worker running on its own isolate.
pub struct JsWorker {
    pub(crate) cmd_tx: mpsc::UnboundedSender<WorkerCommand>,
    pub(crate) messages: mpsc::UnboundedReceiver<Value>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) terminated: AtomicBool,
    /// For forced termination of a busy isolate.
    pub(crate) isolate_handle: v8::IsolateHandle,
    pub(crate) thread_handle: Option<thread::JoinHandle<Result<(), WorkerError>>>,
}

impl JsWorker {
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Wait for the worker thread to finish.
    pub fn join(mut self) -> Result<(), WorkerError> {
        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| WorkerError::ThreadPanic)??;
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for JsWorker {
    fn post_message(&self, message: Value) -> Result<(), WorkerError> {
        if self.is_terminated() {
            return Err(WorkerError::Terminated);
        }
        self.cmd_tx
            .send(WorkerCommand::Post(message))
            .map_err(|_| WorkerError::ChannelClosed)
    }

    async fn next_message(&mut self) -> Option<Value> {
        self.messages.recv().await
    }

    fn terminate(&mut self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        self.isolate_handle.terminate_execution();
    }
}

impl Drop for JsWorker {
    fn drop(&mut self) {
        self.terminate();
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        // Never park a runtime thread on the join.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || {
                    let _ = handle.join();
                });
            }
            Err(_) => {
                let _ = handle.join();
            }
        }
    }
}
