//! Execution queue
//!
//! Engine work runs one job at a time on a single worker task, in the order
//! it was submitted. A panicking job is reported to its submitter and the
//! worker moves on to the next job.

use crate::error::{ServerError, ServerResult};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use kernel_runtime::{Closeable, MergedError};
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Job = BoxFuture<'static, ()>;

pub struct ExecutionQueue {
    jobs: mpsc::UnboundedSender<Job>,
    stop: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    abort: AbortHandle,
}

impl ExecutionQueue {
    /// Start the worker. It stops when `cancel` is cancelled or the queue is shut down.
    pub fn start(cancel: &CancellationToken) -> Self {
        let (jobs, mut pending) = mpsc::unbounded_channel::<Job>();
        let stop = cancel.child_token();
        let worker_stop = stop.clone();

        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = worker_stop.cancelled() => break,
                    job = pending.recv() => match job {
                        Some(job) => job.await,
                        None => break,
                    },
                }
            }
            debug!("Execution queue stopped");
        });

        Self {
            jobs,
            stop,
            abort: worker.abort_handle(),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue `job` and wait for its result
    pub async fn run<F, T>(&self, job: F) -> ServerResult<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done, result) = oneshot::channel();
        let wrapped = async move {
            let outcome = AssertUnwindSafe(job).catch_unwind().await.map_err(panic_message);
            if let Err(message) = &outcome {
                warn!("Queued job panicked: {}", message);
            }
            // Submitter may have stopped waiting
            let _ = done.send(outcome);
        };

        self.jobs
            .send(Box::pin(wrapped))
            .map_err(|_| ServerError::QueueClosed)?;

        match result.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(ServerError::Panicked(message)),
            Err(_) => Err(ServerError::QueueClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stop.is_cancelled()
    }
}

#[async_trait]
impl Closeable for ExecutionQueue {
    fn name(&self) -> &str {
        "execution queue"
    }

    /// Stop accepting work and wait for the worker to finish its current job
    async fn close(&self) -> Result<(), MergedError> {
        self.stop.cancel();
        let worker = self.worker.lock().take();
        match worker {
            Some(worker) => MergedError::collect([worker.await]),
            None => Ok(()),
        }
    }

    /// Abort the worker along with the job it is running
    fn force_close(&self) {
        self.stop.cancel();
        warn!("Aborting execution queue worker");
        self.abort.abort();
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
