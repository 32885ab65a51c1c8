//! Process-backed execution engine
//!
//! Each execute request runs as `<shell> -c <code>` in a fresh child
//! process. Output is streamed to the front end one line at a time; a
//! non-zero exit status is reported as a failure with the tail of stderr as
//! the traceback.

use crate::syntax::check_shell_syntax;
use async_trait::async_trait;
use kernel_interfaces::{
    Completions, EngineError, EngineFailure, EngineResult, ExecutionEngine, ExecutionOutcome,
    ExecutionRequest, ImplementationInfo, KernelIo,
};
use kernel_protocol::content::{Completeness, LanguageInfo, StreamName};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const STDERR_TAIL: usize = 20;

const KEYWORDS: &[&str] = &[
    "case", "cd", "do", "done", "echo", "elif", "else", "esac", "exit", "export", "fi", "for",
    "function", "if", "in", "local", "printf", "read", "return", "set", "shift", "then", "unset",
    "until", "while",
];

type TeardownHook = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Configuration for the shell engine
#[derive(Debug, Clone)]
pub struct ShellEngineConfig {
    /// Interpreter binary
    pub shell: String,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl Default for ShellEngineConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: None,
            env: HashMap::new(),
        }
    }
}

pub struct ShellEngine {
    config: ShellEngineConfig,
    in_flight: Mutex<Option<CancellationToken>>,
    teardown: Mutex<Vec<(String, TeardownHook)>>,
}

impl ShellEngine {
    pub fn new(config: ShellEngineConfig) -> Self {
        Self {
            config,
            in_flight: Mutex::new(None),
            teardown: Mutex::new(Vec::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShellEngineConfig::default())
    }

    /// Register a hook to run on shutdown. Hooks run once, in registration order.
    pub fn on_teardown<F>(&self, name: impl Into<String>, hook: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.teardown.lock().push((name.into(), Box::new(hook)));
    }

    fn spawn(&self, code: &str) -> EngineResult<Child> {
        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(code)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        Ok(cmd.spawn()?)
    }

    async fn run(
        &self,
        request: &ExecutionRequest,
        io: &dyn KernelIo,
        cancel: &CancellationToken,
    ) -> EngineResult<ExecutionOutcome> {
        let mut child = self.spawn(&request.code)?;
        debug!(pid = ?child.id(), execution_count = request.execution_count, "Spawned shell");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Unavailable("child stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Unavailable("child stderr was not captured".to_string()))?;
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let (mut stdout_open, mut stderr_open) = (true, true);
        let mut stderr_tail = VecDeque::with_capacity(STDERR_TAIL);

        while stdout_open || stderr_open {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return abort(child).await,
                line = stdout.next_line(), if stdout_open => match line? {
                    Some(line) if !request.silent => {
                        io.stream(StreamName::Stdout, &format!("{}\n", line)).await?
                    }
                    Some(_) => {}
                    None => stdout_open = false,
                },
                line = stderr.next_line(), if stderr_open => match line? {
                    Some(line) => {
                        if !request.silent {
                            io.stream(StreamName::Stderr, &format!("{}\n", line)).await?;
                        }
                        if stderr_tail.len() == STDERR_TAIL {
                            stderr_tail.pop_front();
                        }
                        stderr_tail.push_back(line);
                    }
                    None => stderr_open = false,
                },
            }
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return abort(child).await,
            status = child.wait() => status?,
        };

        if status.success() {
            return Ok(ExecutionOutcome::Success(None));
        }

        let evalue = match status.code() {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        let mut failure = EngineFailure::new("ShellError", evalue);
        if !stderr_tail.is_empty() {
            failure = failure.with_traceback(stderr_tail.into_iter().collect());
        }
        failure.metadata.insert("exit_code".to_string(), json!(status.code()));
        Ok(ExecutionOutcome::Failed(failure))
    }
}

async fn abort(mut child: Child) -> EngineResult<ExecutionOutcome> {
    info!(pid = ?child.id(), "Killing interrupted shell");
    child.start_kill()?;
    child.wait().await?;
    Ok(ExecutionOutcome::Aborted)
}

#[async_trait]
impl ExecutionEngine for ShellEngine {
    fn language_info(&self) -> LanguageInfo {
        LanguageInfo {
            name: "shell".to_string(),
            version: String::new(),
            mimetype: "text/x-sh".to_string(),
            file_extension: ".sh".to_string(),
            pygments_lexer: Some("bash".to_string()),
            codemirror_mode: Some(json!("shell")),
        }
    }

    fn implementation(&self) -> ImplementationInfo {
        ImplementationInfo {
            name: "kernel-shell".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            banner: format!("Shell kernel ({})", self.config.shell),
        }
    }

    async fn execute(
        &self,
        request: ExecutionRequest,
        io: Arc<dyn KernelIo>,
    ) -> EngineResult<ExecutionOutcome> {
        let cancel = CancellationToken::new();
        *self.in_flight.lock() = Some(cancel.clone());

        let outcome = self.run(&request, io.as_ref(), &cancel).await;

        self.in_flight.lock().take();
        outcome
    }

    fn interrupt_in_flight(&self) {
        match self.in_flight.lock().as_ref() {
            Some(cancel) => cancel.cancel(),
            None => debug!("Interrupt requested with nothing running"),
        }
    }

    async fn run_teardown(&self) -> EngineResult<()> {
        self.interrupt_in_flight();

        let hooks = std::mem::take(&mut *self.teardown.lock());
        let mut failed = Vec::new();
        for (name, hook) in hooks {
            if let Err(e) = hook() {
                warn!(hook = %name, "Teardown hook failed: {:#}", e);
                failed.push(name);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!("teardown hooks failed: {}", failed.join(", ")).into())
        }
    }

    async fn check_syntax_complete(&self, code: &str) -> Completeness {
        check_shell_syntax(code)
    }

    async fn complete(&self, code: &str, cursor_pos: usize) -> EngineResult<Completions> {
        let before: Vec<char> = code.chars().take(cursor_pos).collect();
        let cursor = before.len();
        let prefix_len = before
            .iter()
            .rev()
            .take_while(|c| c.is_alphanumeric() || **c == '_')
            .count();
        if prefix_len == 0 {
            return Ok(Completions::none_at(cursor));
        }
        let prefix: String = before[cursor - prefix_len..].iter().collect();

        Ok(Completions {
            matches: KEYWORDS
                .iter()
                .filter(|keyword| keyword.starts_with(&prefix))
                .map(|keyword| keyword.to_string())
                .collect(),
            cursor_start: cursor - prefix_len,
            cursor_end: cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_interfaces::DisplayPayload;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        streams: Mutex<Vec<(StreamName, String)>>,
    }

    #[async_trait]
    impl KernelIo for Recorder {
        async fn stream(&self, name: StreamName, text: &str) -> EngineResult<()> {
            self.streams.lock().push((name, text.to_string()));
            Ok(())
        }

        async fn display(
            &self,
            _payload: DisplayPayload,
            _display_id: Option<&str>,
        ) -> EngineResult<()> {
            Ok(())
        }

        async fn update_display(
            &self,
            _payload: DisplayPayload,
            _display_id: &str,
        ) -> EngineResult<()> {
            Ok(())
        }

        async fn clear_output(&self, _wait: bool) -> EngineResult<()> {
            Ok(())
        }

        async fn read_input(&self, _prompt: &str, _password: bool) -> EngineResult<String> {
            Err(EngineError::StdinNotAllowed)
        }
    }

    fn request(code: &str) -> ExecutionRequest {
        ExecutionRequest {
            code: code.to_string(),
            execution_count: 1,
            store_history: true,
            silent: false,
            allow_stdin: false,
        }
    }

    #[tokio::test]
    async fn test_streams_stdout() {
        let engine = ShellEngine::with_defaults();
        let io = Arc::new(Recorder::default());
        let outcome = engine.execute(request("echo one; echo two"), io.clone()).await.unwrap();

        assert_eq!(outcome, ExecutionOutcome::Success(None));
        let streams = io.streams.lock().clone();
        assert_eq!(
            streams,
            vec![
                (StreamName::Stdout, "one\n".to_string()),
                (StreamName::Stdout, "two\n".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let engine = ShellEngine::with_defaults();
        let io = Arc::new(Recorder::default());
        let outcome = engine.execute(request("echo broken >&2; exit 3"), io.clone()).await.unwrap();

        let ExecutionOutcome::Failed(failure) = outcome else {
            panic!("expected a failure");
        };
        assert_eq!(failure.ename, "ShellError");
        assert_eq!(failure.evalue, "exit status 3");
        assert_eq!(failure.traceback, vec!["broken"]);
        assert_eq!(failure.metadata["exit_code"], json!(3));
    }

    #[tokio::test]
    async fn test_silent_suppresses_output() {
        let engine = ShellEngine::with_defaults();
        let io = Arc::new(Recorder::default());
        let mut quiet = request("echo hidden");
        quiet.silent = true;
        engine.execute(quiet, io.clone()).await.unwrap();
        assert!(io.streams.lock().is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_aborts() {
        let engine = Arc::new(ShellEngine::with_defaults());
        let io = Arc::new(Recorder::default());

        let running = engine.clone();
        let handle = tokio::spawn(async move { running.execute(request("sleep 30"), io).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.interrupt_in_flight();

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ExecutionOutcome::Aborted);
    }

    #[tokio::test]
    async fn test_teardown_runs_hooks_once() {
        let engine = ShellEngine::with_defaults();
        let ran = Arc::new(Mutex::new(Vec::new()));
        let first = ran.clone();
        engine.on_teardown("first", move || {
            first.lock().push("first");
            Ok(())
        });
        engine.on_teardown("failing", || Err(anyhow::anyhow!("disk gone")));

        let err = engine.run_teardown().await.unwrap_err();
        assert!(err.to_string().contains("failing"));
        assert_eq!(*ran.lock(), vec!["first"]);

        engine.run_teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_keyword_completion() {
        let engine = ShellEngine::with_defaults();
        let completions = engine.complete("ec", 2).await.unwrap();
        assert_eq!(completions.matches, vec!["echo"]);
        assert_eq!((completions.cursor_start, completions.cursor_end), (0, 2));

        let completions = engine.complete("ls ", 3).await.unwrap();
        assert!(completions.matches.is_empty());
    }
}
