//! Kernel I/O sink
//!
//! The kernel hands one [`KernelIo`] to the engine per execute request.
//! Every message it produces is parented to that request.

use crate::error::EngineResult;
use crate::render::DisplayPayload;
use async_trait::async_trait;
use kernel_protocol::content::StreamName;

#[async_trait]
pub trait KernelIo: Send + Sync {
    /// Publish text on stdout or stderr
    async fn stream(&self, name: StreamName, text: &str) -> EngineResult<()>;

    /// Publish a display. A `display_id` lets later calls to
    /// [`KernelIo::update_display`] replace it.
    async fn display(&self, payload: DisplayPayload, display_id: Option<&str>) -> EngineResult<()>;

    /// Replace the content of a display published earlier under `display_id`
    async fn update_display(&self, payload: DisplayPayload, display_id: &str) -> EngineResult<()>;

    /// Clear the front end's output area. With `wait` the clear is deferred
    /// until new output arrives.
    async fn clear_output(&self, wait: bool) -> EngineResult<()>;

    /// Ask the front end for a line of input and wait for it
    ///
    /// # Errors
    /// [`crate::EngineError::StdinNotAllowed`] if the request disallowed stdin,
    /// [`crate::EngineError::Interrupted`] if the kernel is shutting down.
    async fn read_input(&self, prompt: &str, password: bool) -> EngineResult<String>;
}
