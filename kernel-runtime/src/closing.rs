//! Bounded close

use crate::error::{RuntimeError, RuntimeResult};
use crate::merge::MergedError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

/// A resource with a graceful close and a non-blocking forced close
#[async_trait]
pub trait Closeable: Send + Sync {
    fn name(&self) -> &str;

    /// Close every part, attempting all of them even if some fail
    async fn close(&self) -> Result<(), MergedError>;

    /// Drop whatever is still open without waiting
    fn force_close(&self);
}

/// Close `resource`, giving up after `deadline` and force-closing the remainder
pub async fn close_within(resource: &dyn Closeable, deadline: Duration) -> RuntimeResult<()> {
    match tokio::time::timeout(deadline, resource.close()).await {
        Ok(Ok(())) => {
            info!(resource = resource.name(), "Closed");
            Ok(())
        }
        Ok(Err(merged)) => {
            warn!(
                resource = resource.name(),
                failures = merged.len(),
                "Closed with failures: {}",
                merged
            );
            Err(RuntimeError::Merged(merged))
        }
        Err(_) => {
            warn!(resource = resource.name(), ?deadline, "Close timed out, forcing");
            resource.force_close();
            Err(RuntimeError::CloseTimedOut {
                resource: resource.name().to_string(),
                timeout: deadline,
            })
        }
    }
}
