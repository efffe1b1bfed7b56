//! Bounded worker pool shared by every pipeline stage.
//!
//! One [`Workforce`] is created per process invocation; each pipeline stage
//! starts its own [`Run`], a bounded execution epoch with a fixed number of
//! worker threads and its own child cancellation token. The first task
//! error wins: it is recorded, the run's token is cancelled so in-flight
//! tasks can abort early, and `wait` returns it. The pool never retries a
//! task; retry belongs to the task closure.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::cancel::{CancelReason, CancellationToken};

/// Upper bound on the default worker count. Builds and uploads saturate the
/// external compiler and network long before the CPU count on big hosts.
const MAX_DEFAULT_WORKERS: usize = 6;

/// The error produced by a task closure.
///
/// Stage-specific errors convert into this via `From`, so task closures can
/// use `?` on their own error types. A panic inside a task is converted to
/// a task error at the pool boundary instead of crashing the run.
pub struct TaskError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl TaskError {
    pub fn msg(message: impl Into<String>) -> Self {
        TaskError(message.into().into())
    }

    fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        TaskError::msg(format!("task panicked: {message}"))
    }
}

impl<E: std::error::Error + Send + Sync + 'static> From<E> for TaskError {
    fn from(err: E) -> Self {
        TaskError(Box::new(err))
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::fmt::Debug for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

type Task = Box<dyn FnOnce() -> Result<(), TaskError> + Send + 'static>;

/// Default worker count: available parallelism, capped.
pub fn default_num_workers() -> usize {
    let n = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    n.min(MAX_DEFAULT_WORKERS)
}

/// A reusable handle that starts bounded-parallel runs.
#[derive(Debug, Clone)]
pub struct Workforce {
    num_workers: usize,
}

impl Workforce {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Start a new run. The returned token is a child of `token`: it is
    /// cancelled when the parent is, and additionally as soon as any task
    /// in this run fails. Independent runs may be in flight concurrently,
    /// each with its own worker budget.
    pub fn start(&self, token: &CancellationToken) -> (Run, CancellationToken) {
        let run_token = token.child();
        let (tx, rx) = mpsc::channel::<Task>();
        let rx = Arc::new(Mutex::new(rx));
        let first_err: Arc<Mutex<Option<TaskError>>> = Arc::new(Mutex::new(None));

        let mut handles = Vec::with_capacity(self.num_workers);
        for _ in 0..self.num_workers {
            let rx = Arc::clone(&rx);
            let first_err = Arc::clone(&first_err);
            let worker_token = run_token.clone();
            handles.push(thread::spawn(move || {
                worker_loop(&rx, &first_err, &worker_token);
            }));
        }

        (
            Run {
                tx,
                handles,
                first_err,
                token: run_token.clone(),
            },
            run_token,
        )
    }
}

fn worker_loop(
    rx: &Mutex<Receiver<Task>>,
    first_err: &Mutex<Option<TaskError>>,
    token: &CancellationToken,
) {
    loop {
        let task = {
            let guard = match rx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.recv()
        };
        let task = match task {
            Ok(task) => task,
            // Channel closed: the run is waiting and the queue is drained.
            Err(_) => return,
        };

        let result = match catch_unwind(AssertUnwindSafe(task)) {
            Ok(result) => result,
            Err(payload) => Err(TaskError::from_panic(payload)),
        };

        if let Err(err) = result {
            let mut slot = match first_err.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if slot.is_none() {
                *slot = Some(err);
                token.cancel(CancelReason::TaskFailed);
            }
        }
    }
}

/// One bounded execution epoch.
pub struct Run {
    tx: Sender<Task>,
    handles: Vec<JoinHandle<()>>,
    first_err: Arc<Mutex<Option<TaskError>>>,
    token: CancellationToken,
}

impl Run {
    /// Enqueue a task. Tasks enqueued after the first failure still execute
    /// but are expected to observe the cancelled token and bail out early.
    pub fn run(&self, task: impl FnOnce() -> Result<(), TaskError> + Send + 'static) {
        let _ = self.tx.send(Box::new(task));
    }

    /// The run's cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Block until every enqueued task finished, returning the first error
    /// observed. Consumes the run, so no task can be enqueued afterwards.
    pub fn wait(self) -> Result<(), TaskError> {
        let Run {
            tx,
            handles,
            first_err,
            token: _,
        } = self;
        drop(tx);
        for handle in handles {
            let _ = handle.join();
        }
        let mut slot = match first_err.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match slot.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
