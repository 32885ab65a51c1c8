//! Execution engine interface
//!
//! The engine runs submitted code. The kernel serializes calls to
//! [`ExecutionEngine::execute`] but may call
//! [`ExecutionEngine::interrupt_in_flight`] from another task at any time.

use crate::error::EngineResult;
use crate::io::KernelIo;
use async_trait::async_trait;
use kernel_protocol::content::{Completeness, LanguageInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// One unit of code to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub code: String,
    /// Counter value this execution is reported under
    pub execution_count: u64,
    pub store_history: bool,
    /// Suppress output and results
    pub silent: bool,
    pub allow_stdin: bool,
}

/// A fault in user code, reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineFailure {
    pub ename: String,
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
    /// Extra structured detail passed through in reply metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl EngineFailure {
    pub fn new(ename: impl Into<String>, evalue: impl Into<String>) -> Self {
        let ename = ename.into();
        let evalue = evalue.into();
        Self {
            traceback: vec![format!("{}: {}", ename, evalue)],
            ename,
            evalue,
            metadata: Map::new(),
        }
    }

    pub fn with_traceback(mut self, traceback: Vec<String>) -> Self {
        self.traceback = traceback;
        self
    }
}

/// How an execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Finished; the value, if any, is rendered into `execute_result`
    Success(Option<Value>),
    /// User code raised or exited abnormally
    Failed(EngineFailure),
    /// Interrupted before completion
    Aborted,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success(_))
    }
}

/// Name, version and banner reported in `kernel_info_reply`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationInfo {
    pub name: String,
    pub version: String,
    pub banner: String,
}

/// Completion candidates for a cursor position
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completions {
    pub matches: Vec<String>,
    pub cursor_start: usize,
    pub cursor_end: usize,
}

impl Completions {
    /// No candidates, with an empty range at `cursor_pos`
    pub fn none_at(cursor_pos: usize) -> Self {
        Self {
            matches: Vec::new(),
            cursor_start: cursor_pos,
            cursor_end: cursor_pos,
        }
    }
}

#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    fn language_info(&self) -> LanguageInfo;

    fn implementation(&self) -> ImplementationInfo;

    /// Run `request`, sending output through `io`
    ///
    /// Faults in user code are reported as [`ExecutionOutcome::Failed`];
    /// `Err` is reserved for failures of the engine itself.
    async fn execute(
        &self,
        request: ExecutionRequest,
        io: Arc<dyn KernelIo>,
    ) -> EngineResult<ExecutionOutcome>;

    /// Cancel whatever is running. Returns without waiting for it to stop.
    fn interrupt_in_flight(&self);

    /// Run registered shutdown hooks
    async fn run_teardown(&self) -> EngineResult<()>;

    /// Classify `code` without running it
    async fn check_syntax_complete(&self, code: &str) -> Completeness;

    /// Completion candidates; engines without completion return none
    async fn complete(&self, code: &str, cursor_pos: usize) -> EngineResult<Completions> {
        let _ = code;
        Ok(Completions::none_at(cursor_pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_traceback_defaults_to_summary() {
        let failure = EngineFailure::new("ZeroDivisionError", "division by zero");
        assert_eq!(failure.traceback, vec!["ZeroDivisionError: division by zero"]);

        let failure = failure.with_traceback(vec!["frame 1".to_string(), "frame 2".to_string()]);
        assert_eq!(failure.traceback.len(), 2);
    }

    #[test]
    fn test_outcome_classification() {
        assert!(ExecutionOutcome::Success(None).is_success());
        assert!(!ExecutionOutcome::Aborted.is_success());
        assert!(!ExecutionOutcome::Failed(EngineFailure::new("E", "v")).is_success());
    }

    #[test]
    fn test_empty_completions() {
        let completions = Completions::none_at(7);
        assert!(completions.matches.is_empty());
        assert_eq!((completions.cursor_start, completions.cursor_end), (7, 7));
    }
}
