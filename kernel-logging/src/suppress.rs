//! Scoped log suppression

use std::future::Future;
use tracing::instrument::WithSubscriber;
use tracing::subscriber::NoSubscriber;

/// Run `future` with every tracing event discarded while it is polled.
/// Events from other tasks are unaffected.
pub async fn silenced<F: Future>(future: F) -> F::Output {
    future.with_subscriber(NoSubscriber::default()).await
}
