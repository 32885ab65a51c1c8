//! Loop supervision
//!
//! Every loop shares one cancellation token. When any loop finishes,
//! whether cleanly, with an error, or by panicking, the token is cancelled
//! so no loop outlives its siblings.

use crate::error::{RuntimeError, RuntimeResult};
use crate::merge::MergedError;
use std::future::Future;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Supervised {
    name: String,
    handle: JoinHandle<anyhow::Result<()>>,
}

/// Owns the loop tasks and their shared cancellation token
pub struct LoopSupervisor {
    token: CancellationToken,
    loops: Vec<Supervised>,
}

impl LoopSupervisor {
    /// Supervisor whose token is a child of `parent`; cancelling the parent
    /// stops every loop, cancelling the supervisor leaves the parent alone.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            loops: Vec::new(),
        }
    }

    /// Token observed by every supervised loop
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request every loop to stop
    pub fn shutdown(&self) {
        info!(loops = self.loops.len(), "Shutting down supervised loops");
        self.token.cancel();
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Spawn a loop. `body` receives the shared token; its exit cancels the token.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, body: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let token = self.token.clone();
        let work = body(token.clone());
        let loop_name = name.clone();

        let handle = tokio::spawn(async move {
            // Dropped on return and on unwind alike
            let _cancel_siblings = token.drop_guard();
            let result = work.await;
            match &result {
                Ok(()) => debug!(loop_name = %loop_name, "Supervised loop finished"),
                Err(e) => error!(loop_name = %loop_name, "Supervised loop failed: {:#}", e),
            }
            result
        });

        self.loops.push(Supervised { name, handle });
    }

    /// Wait for every loop and report all failures together
    pub async fn join(self) -> RuntimeResult<()> {
        let mut failures = Vec::new();
        for supervised in self.loops {
            if let Some(failure) = outcome(&supervised.name, supervised.handle.await) {
                failures.push(failure);
            }
        }

        if failures.len() <= 1 {
            return failures.pop().map_or(Ok(()), Err);
        }
        let merged =
            MergedError::from_errors(failures.into_iter().map(anyhow::Error::new).collect());
        match merged {
            Some(merged) => Err(RuntimeError::Merged(merged)),
            None => Ok(()),
        }
    }

    /// Like [`join`](Self::join), but loops still running after `deadline`
    /// are aborted.
    pub async fn join_within(self, deadline: Duration) -> RuntimeResult<()> {
        let aborts: Vec<AbortHandle> = self
            .loops
            .iter()
            .map(|supervised| supervised.handle.abort_handle())
            .collect();
        let token = self.token.clone();

        match tokio::time::timeout(deadline, self.join()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(?deadline, "Loops did not stop in time, aborting");
                token.cancel();
                for abort in aborts {
                    abort.abort();
                }
                Err(RuntimeError::CloseTimedOut {
                    resource: "supervised loops".to_string(),
                    timeout: deadline,
                })
            }
        }
    }
}

fn outcome(
    name: &str,
    joined: Result<anyhow::Result<()>, tokio::task::JoinError>,
) -> Option<RuntimeError> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(source)) => Some(RuntimeError::LoopFailed {
            name: name.to_string(),
            source,
        }),
        Err(join) if join.is_panic() => {
            let payload = join.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Some(RuntimeError::LoopPanicked {
                name: name.to_string(),
                message,
            })
        }
        // Aborted
        Err(_) => None,
    }
}
