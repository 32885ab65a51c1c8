//! Generic receive loop

use crate::error::Interruptible;
use std::fmt::Display;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Repeat `step` until the token is cancelled, `step` reports an
/// interruption, or `step` fails. Cancellation aborts an in-flight step.
pub async fn run_loop<F, Fut, E>(name: &str, token: CancellationToken, mut step: F) -> Result<(), E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Interruptible + Display,
{
    info!(loop_name = name, "Loop started");

    loop {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(loop_name = name, "Loop cancelled");
                break;
            }
            result = step() => result,
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_interruption() => {
                debug!(loop_name = name, "Loop interrupted: {}", e);
                break;
            }
            Err(e) => {
                error!(loop_name = name, "Loop failed: {}", e);
                return Err(e);
            }
        }
    }

    info!(loop_name = name, "Loop exited");
    Ok(())
}
