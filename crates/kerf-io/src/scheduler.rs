//! Single-flight FIFO task scheduler.
//!
//! Every operation that touches shared native state or the drawing
//! surface is submitted here. Tasks run strictly one at a time in
//! submission order; a task that suspends does not let the next one
//! start. Each task's outcome is delivered on its own [`TaskHandle`];
//! failures additionally go to the [`NotificationSink`] and never stop
//! the worker loop.
//!
//! The worker loop is a spawned tokio task that exists only while the
//! queue is non-empty. The empty check that ends it and the enqueue in
//! [`TaskScheduler::submit`] happen under the same lock, so a task
//! submitted while the loop is winding down is never stranded.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::oneshot;

use crate::sink::{NotificationSink, ProgressSink, TracingNotifier, TracingProgress};

/// Pause between two consecutive tasks.
pub const DEFAULT_INTER_TASK_DELAY: Duration = Duration::from_millis(50);

/// How long a failure notification stays visible.
pub const DEFAULT_FAILURE_NOTICE: Duration = Duration::from_secs(5);

/// Scheduler timing. Durations serialize as milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(with = "crate::millis")]
    pub inter_task_delay: Duration,
    #[serde(with = "crate::millis")]
    pub failure_notice: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            inter_task_delay: DEFAULT_INTER_TASK_DELAY,
            failure_notice: DEFAULT_FAILURE_NOTICE,
        }
    }
}

/// Why a task did not produce a value.
#[derive(Debug, thiserror::Error)]
pub enum TaskError<E> {
    /// The operation returned an error.
    #[error("{label} failed: {source}")]
    Failed {
        label: String,
        #[source]
        source: E,
    },

    /// The operation panicked. The panic was contained.
    #[error("{label} panicked")]
    Panicked { label: String },

    /// The task was removed from the queue before it started, or the
    /// scheduler went away.
    #[error("{label} was cancelled before it ran")]
    Cancelled { label: String },
}

impl<E> TaskError<E> {
    /// Label of the task this error belongs to.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Failed { label, .. } | Self::Panicked { label } | Self::Cancelled { label } => {
                label
            }
        }
    }

    /// The operation's own error, if it returned one.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::Failed { source, .. } => Some(source),
            Self::Panicked { .. } | Self::Cancelled { .. } => None,
        }
    }
}

/// The scheduler was created outside a tokio runtime.
#[derive(Debug, thiserror::Error)]
#[error("task scheduler needs a tokio runtime")]
pub struct NoRuntime(#[from] TryCurrentError);

/// Whether a worker loop is currently active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Draining,
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A queued task with its result type erased.
trait QueuedTask: Send {
    fn label(&self) -> &str;

    /// Run to completion and resolve the handle. Returns the failure
    /// message, if any.
    fn run(self: Box<Self>) -> BoxFuture<Option<String>>;

    /// Resolve the handle with [`TaskError::Cancelled`] without running.
    fn cancel(self: Box<Self>);
}

struct Pending<F, T, E> {
    label: String,
    op: F,
    reply: oneshot::Sender<Result<T, TaskError<E>>>,
}

impl<F, Fut, T, E> QueuedTask for Pending<F, T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn run(self: Box<Self>) -> BoxFuture<Option<String>> {
        let Self { label, op, reply } = *self;
        Box::pin(async move {
            // Own task so a panic is contained to this operation.
            let joined = tokio::spawn(async move { op().await }).await;
            let (outcome, failure) = match joined {
                Ok(Ok(value)) => (Ok(value), None),
                Ok(Err(source)) => {
                    let message = source.to_string();
                    (Err(TaskError::Failed { label, source }), Some(message))
                }
                Err(err) if err.is_panic() => (
                    Err(TaskError::Panicked { label }),
                    Some("task panicked".to_owned()),
                ),
                Err(_) => (
                    Err(TaskError::Cancelled { label }),
                    Some("task was aborted".to_owned()),
                ),
            };
            // The caller may have dropped its handle.
            let _ = reply.send(outcome);
            failure
        })
    }

    fn cancel(self: Box<Self>) {
        let Self { label, reply, .. } = *self;
        let _ = reply.send(Err(TaskError::Cancelled { label }));
    }
}

/// Future resolving to a submitted task's outcome.
///
/// Dropping the handle does not cancel the task.
#[must_use = "dropping a task handle discards the task's result"]
pub struct TaskHandle<T, E> {
    label: String,
    receiver: oneshot::Receiver<Result<T, TaskError<E>>>,
}

impl<T, E> TaskHandle<T, E> {
    /// Label the task was submitted with.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = Result<T, TaskError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let polled = Pin::new(&mut self.receiver).poll(cx);
        polled.map(|received| {
            received.unwrap_or_else(|_| {
                Err(TaskError::Cancelled {
                    label: self.label.clone(),
                })
            })
        })
    }
}

impl<T, E> fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

struct Queue {
    tasks: VecDeque<Box<dyn QueuedTask>>,
    state: SchedulerState,
    running: Option<String>,
}

struct Shared {
    config: SchedulerConfig,
    progress: Arc<dyn ProgressSink>,
    notifier: Arc<dyn NotificationSink>,
    runtime: Handle,
    queue: Mutex<Queue>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Single-flight FIFO executor. Cheap to clone; clones share the queue.
#[derive(Clone)]
pub struct TaskScheduler {
    shared: Arc<Shared>,
}

impl TaskScheduler {
    /// Create a scheduler on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`NoRuntime`] when called outside a runtime context.
    pub fn new(
        config: SchedulerConfig,
        progress: Arc<dyn ProgressSink>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Result<Self, NoRuntime> {
        Ok(Self::with_runtime(
            Handle::try_current()?,
            config,
            progress,
            notifier,
        ))
    }

    /// Create a scheduler that spawns its worker loop on `runtime`.
    #[must_use]
    pub fn with_runtime(
        runtime: Handle,
        config: SchedulerConfig,
        progress: Arc<dyn ProgressSink>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                progress,
                notifier,
                runtime,
                queue: Mutex::new(Queue {
                    tasks: VecDeque::new(),
                    state: SchedulerState::Idle,
                    running: None,
                }),
            }),
        }
    }

    /// Scheduler with default timing that reports through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns [`NoRuntime`] when called outside a runtime context.
    pub fn with_tracing(config: SchedulerConfig) -> Result<Self, NoRuntime> {
        Self::new(config, Arc::new(TracingProgress), Arc::new(TracingNotifier))
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Queue `op` behind every previously submitted task.
    ///
    /// `op` is invoked only when the task reaches the front of the queue.
    pub fn submit<F, Fut, T, E>(&self, label: impl Into<String>, op: F) -> TaskHandle<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let label = label.into();
        let (reply, receiver) = oneshot::channel();
        let task = Box::new(Pending {
            label: label.clone(),
            op,
            reply,
        });

        let (start, queued) = {
            let mut queue = self.shared.lock();
            queue.tasks.push_back(task);
            let start = queue.state == SchedulerState::Idle;
            if start {
                queue.state = SchedulerState::Draining;
            }
            (start, queue.tasks.len())
        };
        tracing::debug!(task = %label, queued, "task submitted");

        if start {
            tracing::debug!("scheduler draining");
            self.shared.runtime.spawn(drain(Arc::clone(&self.shared)));
        }
        TaskHandle { label, receiver }
    }

    /// Number of tasks waiting to start. The running task is not counted.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    /// Label of the task currently running.
    #[must_use]
    pub fn running_task(&self) -> Option<String> {
        self.shared.lock().running.clone()
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        self.shared.lock().state
    }

    /// Discard every waiting task. The running task is unaffected.
    ///
    /// Discarded handles resolve with [`TaskError::Cancelled`]. Returns
    /// how many tasks were discarded.
    pub fn clear(&self) -> usize {
        let waiting: Vec<Box<dyn QueuedTask>> = self.shared.lock().tasks.drain(..).collect();
        let cancelled = waiting.len();
        for task in waiting {
            task.cancel();
        }
        if cancelled > 0 {
            tracing::info!(cancelled, "cleared waiting tasks");
        }
        cancelled
    }
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.shared.lock();
        f.debug_struct("TaskScheduler")
            .field("config", &self.shared.config)
            .field("state", &queue.state)
            .field("running", &queue.running)
            .field("queued", &queue.tasks.len())
            .finish_non_exhaustive()
    }
}

/// Repairs the queue when the worker loop unwinds, e.g. from a
/// panicking sink: clears the running task and either goes idle or
/// restarts the loop for the tasks still waiting.
struct DrainGuard {
    shared: Arc<Shared>,
    armed: bool,
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let restart = {
            let mut queue = self.shared.lock();
            queue.running = None;
            if queue.tasks.is_empty() {
                queue.state = SchedulerState::Idle;
                false
            } else {
                true
            }
        };
        tracing::error!(restart, "scheduler worker loop unwound");
        if restart {
            self.shared.runtime.spawn(drain(Arc::clone(&self.shared)));
        }
    }
}

async fn drain(shared: Arc<Shared>) {
    let mut guard = DrainGuard {
        shared: Arc::clone(&shared),
        armed: true,
    };
    loop {
        let task = {
            let mut queue = shared.lock();
            let Some(task) = queue.tasks.pop_front() else {
                queue.state = SchedulerState::Idle;
                drop(queue);
                guard.armed = false;
                tracing::debug!("scheduler idle");
                return;
            };
            queue.running = Some(task.label().to_owned());
            task
        };

        let label = task.label().to_owned();
        shared.progress.on_task_start(&label);
        if let Some(error) = task.run().await {
            tracing::warn!(task = %label, %error, "task failed");
            shared
                .notifier
                .notify(&format!("{label} failed: {error}"), shared.config.failure_notice);
        }
        shared.progress.on_task_end();
        shared.lock().running = None;

        if !shared.config.inter_task_delay.is_zero() {
            tokio::time::sleep(shared.config.inter_task_delay).await;
        }
    }
}
