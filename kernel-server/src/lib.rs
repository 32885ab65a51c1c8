//! Kernel server
//!
//! The request router, comm manager and execution queue, assembled over a
//! server-role [`SocketManager`](kernel_transport::SocketManager) into a
//! runnable [`Kernel`]. [`KernelClient`] is the matching client role.

pub mod client;
pub mod comm;
pub mod counter;
pub mod error;
pub mod history;
pub mod io;
pub mod iopub;
pub mod kernel;
pub mod queue;
pub mod router;
pub mod session;

pub use client::KernelClient;
pub use comm::{Comm, CommCallbackId, CommHandler, CommManager};
pub use counter::ExecutionCounter;
pub use error::{ServerError, ServerResult};
pub use history::HistoryStore;
pub use iopub::{Broadcast, IoPub};
pub use kernel::{Kernel, KernelExit, RunningKernel};
pub use queue::ExecutionQueue;
pub use router::{RequestRouter, ShutdownRequested, ABORT_MESSAGE};
pub use session::{MessageFactory, SessionIdentity};
