//! Bridges between requestors and `async` code.
//!
//! - [`Task`] + [`TaskRequestor`]: run an async unit of work as a requestor;
//!   cancelling it aborts the spawned task.
//! - [`request`]: await a requestor's outcome; dropping the future cancels it.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

use crate::domain::{Cancel, Completion, Outcome, Reason, Requestor, RequestorRef};

/// An async unit of work
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Short name used in failure reasons
    fn name(&self) -> &str {
        "task"
    }

    /// Perform the work for one activation
    async fn run(&self, input: Value) -> Outcome;
}

/// Requestor that spawns a [`Task`] on the current Tokio runtime
pub struct TaskRequestor<T> {
    task: Arc<T>,
}

impl<T: Task> TaskRequestor<T> {
    pub fn new(task: T) -> Self {
        Self {
            task: Arc::new(task),
        }
    }

    /// Share this requestor for use in a combinator
    pub fn into_ref(self) -> RequestorRef {
        Arc::new(self)
    }
}

impl<T: Task> Requestor for TaskRequestor<T> {
    fn start(&self, completion: Completion, input: Value) -> Option<Cancel> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                completion.fail(Reason::new(self.task.name(), "No runtime."));
                return None;
            }
        };

        let task = Arc::clone(&self.task);
        let join = handle.spawn(async move {
            let outcome = task.run(input).await;
            completion.complete(outcome);
        });

        let name = self.task.name().to_string();
        Some(Cancel::new(move |reason| {
            debug!(task = %name, %reason, "aborting task");
            join.abort();
        }))
    }
}

struct FnTask<F>(F);

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    async fn run(&self, input: Value) -> Outcome {
        (self.0)(input).await
    }
}

/// Build a requestor from an async closure
pub fn from_fn<F, Fut>(f: F) -> RequestorRef
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    TaskRequestor::new(FnTask(f)).into_ref()
}

/// Cancels the wrapped requestor unless defused first
struct CancelOnDrop {
    cancel: Option<Cancel>,
}

impl CancelOnDrop {
    fn defuse(&mut self) {
        self.cancel = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel(Reason::new("request", "Dropped."));
        }
    }
}

/// Start `requestor` with `input` and wait for its outcome.
///
/// Dropping the returned future before it resolves cancels the requestor. A
/// requestor that discards its completion without calling it yields an
/// `Abandoned.` failure.
pub async fn request(requestor: &dyn Requestor, input: Value) -> Outcome {
    let (tx, rx) = oneshot::channel();
    let cancel = requestor.start(
        Completion::new(move |outcome| {
            let _ = tx.send(outcome);
        }),
        input,
    );

    let mut guard = CancelOnDrop { cancel };
    let outcome = match rx.await {
        Ok(outcome) => outcome,
        Err(_) => Err(Reason::new("request", "Abandoned.")),
    };
    guard.defuse();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use crate::domain::requestor_fn;

    #[tokio::test]
    async fn test_from_fn_runs_async_closure() {
        let double = from_fn(|input: Value| async move {
            let n = input.as_i64().unwrap_or(0);
            Ok(Value::from(n * 2))
        });

        assert_eq!(request(&*double, Value::from(4)).await.unwrap(), Value::from(8));
    }

    #[tokio::test]
    async fn test_dropped_completion_is_abandoned() {
        let careless = requestor_fn(|completion: Completion, _input: Value| {
            drop(completion);
            None
        });

        let reason = request(&*careless, Value::Null).await.unwrap_err();
        assert_eq!(reason.excuse, "Abandoned.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_request_cancels() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let slow = requestor_fn(move |completion: Completion, _input: Value| {
            let flag = Arc::clone(&flag);
            Some(Cancel::new(move |_reason| {
                drop(completion);
                flag.store(true, Ordering::SeqCst);
            }))
        });

        let pending = tokio::time::timeout(Duration::from_millis(10), request(&*slow, Value::Null)).await;

        assert!(pending.is_err());
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn test_task_requires_runtime() {
        let task = from_fn(|_input: Value| async { Ok(Value::Null) });
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = Arc::clone(&seen);

        let cancel = task.start(
            Completion::new(move |outcome| *sink.lock().unwrap() = Some(outcome)),
            Value::Null,
        );

        assert!(cancel.is_none());
        let outcome = seen.lock().unwrap().take().unwrap();
        assert_eq!(outcome.unwrap_err().excuse, "No runtime.");
    }
}
