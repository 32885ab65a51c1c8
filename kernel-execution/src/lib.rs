//! Execution engines for the kernel
//!
//! [`ShellEngine`] runs each cell as a shell script in a child process and
//! streams its output back line by line. [`PlainTextRenderer`] renders any
//! JSON result as `text/plain`.

pub mod render;
pub mod shell;
pub mod syntax;

pub use render::PlainTextRenderer;
pub use shell::{ShellEngine, ShellEngineConfig};
pub use syntax::check_shell_syntax;
