//! Logging setup for the kernel
//!
//! Everything logs through `tracing`. This crate installs the global
//! subscriber once at startup and offers [`silenced`] for work that must not
//! produce log output.

pub mod init;
pub mod suppress;

pub use init::{init_logging_from_config, init_simple_tracing};
pub use suppress::silenced;
