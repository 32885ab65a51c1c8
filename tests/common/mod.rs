//! Shared harness: a kernel on free loopback ports with a scripted engine

#![allow(dead_code)]

use async_trait::async_trait;
use kernel_config::{ConnectionConfig, KernelConfig, RuntimeConfig, SessionConfig};
use kernel_execution::PlainTextRenderer;
use kernel_interfaces::{
    EngineError, EngineFailure, EngineResult, ExecutionEngine, ExecutionOutcome, ExecutionRequest,
    ImplementationInfo, KernelIo,
};
use kernel_protocol::content::{Completeness, ExecutionState, LanguageInfo, StreamName};
use kernel_protocol::{Message, MessageContent};
use kernel_server::{CommManager, Kernel, KernelClient, KernelExit, RunningKernel, ServerResult};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Helper to suppress logging output during test execution
pub fn init_quiet_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_target(false)
            .without_time()
            .with_test_writer()
            .try_init();
    });
}

/// Engine driven by the code it is given:
///
/// - `raise` returns an engine error
/// - `fail` reports a user-code failure
/// - `panic` panics
/// - `print` writes to stdout and returns nothing
/// - `input` asks for input and greets it
/// - `sleep` waits until interrupted
/// - `hang` waits a minute and ignores interrupts
/// - anything else is echoed back as the result
#[derive(Default)]
pub struct ScriptedEngine {
    interrupted: Notify,
    pub teardowns: AtomicUsize,
}

#[async_trait]
impl ExecutionEngine for ScriptedEngine {
    fn language_info(&self) -> LanguageInfo {
        LanguageInfo {
            name: "script".to_string(),
            version: "1.0".to_string(),
            mimetype: "text/plain".to_string(),
            file_extension: ".txt".to_string(),
            pygments_lexer: None,
            codemirror_mode: None,
        }
    }

    fn implementation(&self) -> ImplementationInfo {
        ImplementationInfo {
            name: "scripted".to_string(),
            version: "0.1.0".to_string(),
            banner: "Scripted test engine".to_string(),
        }
    }

    async fn execute(
        &self,
        request: ExecutionRequest,
        io: Arc<dyn KernelIo>,
    ) -> EngineResult<ExecutionOutcome> {
        match request.code.as_str() {
            "raise" => Err(EngineError::Other(anyhow::anyhow!("engine exploded"))),
            "fail" => Ok(ExecutionOutcome::Failed(
                EngineFailure::new("ValueError", "bad value")
                    .with_traceback(vec!["line 1".to_string()]),
            )),
            "panic" => panic!("engine panicked"),
            "print" => {
                io.stream(StreamName::Stdout, "printed\n").await?;
                Ok(ExecutionOutcome::Success(None))
            }
            "input" => {
                let name = io.read_input("name: ", false).await?;
                Ok(ExecutionOutcome::Success(Some(Value::String(format!("hello {}", name)))))
            }
            "sleep" => {
                tokio::select! {
                    _ = self.interrupted.notified() => Ok(ExecutionOutcome::Aborted),
                    _ = tokio::time::sleep(Duration::from_secs(60)) => {
                        Ok(ExecutionOutcome::Success(None))
                    }
                }
            }
            "hang" => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(ExecutionOutcome::Success(None))
            }
            code => Ok(ExecutionOutcome::Success(Some(Value::String(code.to_string())))),
        }
    }

    fn interrupt_in_flight(&self) {
        self.interrupted.notify_one();
    }

    async fn run_teardown(&self) -> EngineResult<()> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn check_syntax_complete(&self, code: &str) -> Completeness {
        if code.ends_with('\\') {
            Completeness::Incomplete
        } else {
            Completeness::Complete
        }
    }
}

pub fn test_config() -> KernelConfig {
    KernelConfig {
        connection: ConnectionConfig::with_free_ports("127.0.0.1").expect("free ports"),
        session: SessionConfig {
            session_id: uuid::Uuid::new_v4().to_string(),
            username: "kernel".to_string(),
            embedded: true,
        },
        runtime: RuntimeConfig {
            close_timeout: Duration::from_secs(5),
            publish_warmup: Duration::from_millis(100),
            ..RuntimeConfig::default()
        },
        ..KernelConfig::default()
    }
}

pub struct TestKernel {
    pub config: KernelConfig,
    pub engine: Arc<ScriptedEngine>,
    pub cancel: CancellationToken,
    pub running: RunningKernel,
}

impl TestKernel {
    pub async fn start() -> Self {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(config: KernelConfig) -> Self {
        init_quiet_logging();
        let engine = Arc::new(ScriptedEngine::default());
        let cancel = CancellationToken::new();
        let running = Kernel::new(config.clone(), engine.clone(), Arc::new(PlainTextRenderer))
            .start(&cancel)
            .await
            .expect("kernel starts");

        Self {
            config,
            engine,
            cancel,
            running,
        }
    }

    pub async fn client(&self) -> KernelClient {
        let connecting =
            KernelClient::connect(&self.config.connection, &self.config.runtime, &self.cancel);
        within(connecting).await
    }

    pub fn comms(&self) -> &Arc<CommManager> {
        self.running.comms()
    }

    /// Wait for the kernel to stop on its own
    pub async fn wait(self) -> KernelExit {
        within(self.running.wait()).await
    }

    /// Cancel and wait
    pub async fn stop(self) -> KernelExit {
        self.cancel.cancel();
        self.wait().await
    }
}

pub async fn within<T>(future: impl Future<Output = ServerResult<T>>) -> T {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("timed out")
        .expect("operation failed")
}

pub fn types(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|message| message.header.msg_type.clone()).collect()
}

pub fn state(message: &Message) -> Option<ExecutionState> {
    match &message.content {
        MessageContent::Status(status) => Some(status.execution_state),
        _ => None,
    }
}

/// Exactly one busy first and one idle last
pub fn assert_bracketed(messages: &[Message]) {
    assert!(messages.len() >= 2, "too few messages: {:?}", types(messages));
    assert_eq!(state(&messages[0]), Some(ExecutionState::Busy));
    assert_eq!(state(&messages[messages.len() - 1]), Some(ExecutionState::Idle));
    let statuses = messages.iter().filter(|message| state(message).is_some()).count();
    assert_eq!(statuses, 2, "unexpected statuses in {:?}", types(messages));
}
