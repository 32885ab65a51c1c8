//! # Kernel Interfaces
//!
//! Contracts between the kernel and the collaborators it drives but does
//! not implement.
//!
//! ## Main Interfaces
//!
//! - [`ExecutionEngine`] - Runs submitted code and reports the outcome
//! - [`KernelIo`] - Output and input sink handed to the engine for one request
//! - [`Renderer`] - Turns result values into display payloads

pub mod engine;
pub mod error;
pub mod io;
pub mod render;

pub use engine::{
    Completions, EngineFailure, ExecutionEngine, ExecutionOutcome, ExecutionRequest,
    ImplementationInfo,
};
pub use error::{EngineError, EngineResult};
pub use io::KernelIo;
pub use render::{DisplayPayload, Renderer};
