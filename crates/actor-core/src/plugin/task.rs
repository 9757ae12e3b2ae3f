//! Background evaluation for slow plugins.
//!
//! A plugin that blocks (waiting on a prompt, a slow backend) must not stall
//! the tick. [`TaskRunner::submit`] moves the work onto a blocking worker and
//! hands back a [`TaskHandle`]; the tick then polls the handle until it
//! yields. Workers only ever write to their own channel.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;

use super::{CallArgs, Plugin};
use crate::error::PluginError;

/// Owns the worker pool. Cheap to clone.
#[derive(Clone)]
pub struct TaskRunner {
    runtime: Arc<Runtime>,
}

impl TaskRunner {
    pub fn new() -> std::io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("actor-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Arc::new(runtime),
        })
    }

    /// Start `work` in the background.
    pub fn submit<F>(&self, identifier: &str, work: F) -> TaskHandle
    where
        F: FnOnce() -> Result<Value, PluginError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let join = self.runtime.spawn_blocking(move || {
            // The receiver may be gone if the task was cancelled.
            let _ = tx.send(work());
        });
        tracing::debug!(identifier, "background evaluation submitted");
        TaskHandle {
            identifier: identifier.to_string(),
            rx,
            join,
        }
    }
}

/// A submitted evaluation.
pub struct TaskHandle {
    identifier: String,
    rx: oneshot::Receiver<Result<Value, PluginError>>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// `None` while the work is still running. A worker that went away
    /// without answering yields `Cancelled`.
    pub fn poll(&mut self) -> Option<Result<Value, PluginError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(PluginError::Cancelled {
                identifier: self.identifier.clone(),
            })),
        }
    }

    /// Abandon the evaluation. A worker already running finishes, but its
    /// result is discarded.
    pub fn cancel(self) {
        tracing::debug!(identifier = %self.identifier, "background evaluation cancelled");
        self.join.abort();
    }
}

/// Runs the wrapped plugin in the background.
///
/// The first `run` submits and returns `Value::Null`. Later runs poll and
/// keep returning `Value::Null` until the result arrives; the run that
/// observes the result returns it and forgets the handle, so the next run
/// starts a fresh evaluation. Arguments are those of the submitting run.
///
/// Register deferred plugins as stateful or with side effects: a pending
/// `Null` must not be mistaken for a cacheable result.
pub struct Deferred<P> {
    identifier: String,
    inner: Arc<Mutex<P>>,
    runner: TaskRunner,
    pending: Option<TaskHandle>,
}

impl<P: Plugin + 'static> Deferred<P> {
    pub fn new(identifier: impl Into<String>, inner: P, runner: TaskRunner) -> Self {
        Self {
            identifier: identifier.into(),
            inner: Arc::new(Mutex::new(inner)),
            runner,
            pending: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop an in-flight evaluation, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.cancel();
        }
    }
}

impl<P: Plugin + 'static> Plugin for Deferred<P> {
    fn run(&mut self, args: &CallArgs) -> Result<Value, PluginError> {
        if let Some(handle) = self.pending.as_mut() {
            return match handle.poll() {
                None => Ok(Value::Null),
                Some(result) => {
                    self.pending = None;
                    result
                }
            };
        }

        let inner = Arc::clone(&self.inner);
        let call = args.clone();
        let identifier = self.identifier.clone();
        self.pending = Some(self.runner.submit(&self.identifier, move || {
            let mut plugin = inner
                .lock()
                .map_err(|_| PluginError::failed(identifier, "plugin state poisoned"))?;
            plugin.run(&call)
        }));
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::plugin_fn;
    use serde_json::json;
    use std::time::Duration;

    fn wait_for(handle: &mut TaskHandle) -> Result<Value, PluginError> {
        for _ in 0..500 {
            if let Some(result) = handle.poll() {
                return result;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("background task did not finish");
    }

    #[test]
    fn submitted_work_is_polled_to_completion() {
        let runner = TaskRunner::new().unwrap();
        let mut handle = runner.submit("answer", || Ok(json!(42)));
        assert_eq!(wait_for(&mut handle).unwrap(), json!(42));
    }

    #[test]
    fn pending_until_work_finishes() {
        let runner = TaskRunner::new().unwrap();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let mut handle = runner.submit("blocked", move || {
            release_rx.recv().ok();
            Ok(json!("done"))
        });

        assert!(handle.poll().is_none());
        release_tx.send(()).unwrap();
        assert_eq!(wait_for(&mut handle).unwrap(), json!("done"));
    }

    #[test]
    fn worker_panic_is_reported_as_cancelled() {
        let runner = TaskRunner::new().unwrap();
        let mut handle = runner.submit("boom", || panic!("worker exploded"));
        assert!(matches!(wait_for(&mut handle), Err(PluginError::Cancelled { .. })));
    }

    #[test]
    fn deferred_returns_pending_then_value_then_resubmits() {
        let runner = TaskRunner::new().unwrap();
        let mut calls = 0u64;
        let inner = plugin_fn(move |_| {
            calls += 1;
            Ok(json!(calls))
        });
        let mut deferred = Deferred::new("prompt", inner, runner);
        let call = CallArgs::new();

        assert_eq!(deferred.run(&call).unwrap(), Value::Null);
        assert!(deferred.is_pending());

        let mut value = Value::Null;
        for _ in 0..500 {
            value = deferred.run(&call).unwrap();
            if !value.is_null() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(value, json!(1));
        assert!(!deferred.is_pending());

        // No manual reset: the next run starts a new evaluation.
        assert_eq!(deferred.run(&call).unwrap(), Value::Null);
        assert!(deferred.is_pending());
        deferred.cancel();
        assert!(!deferred.is_pending());
    }
}
