//! Kernel assembly
//!
//! Opens the five channels, wires the router into the shell and control
//! dispatchers and runs one supervised loop per latency-sensitive channel.
//! The first loop to exit cancels the others; the sockets are then closed
//! within the configured deadline.

use crate::comm::CommManager;
use crate::error::{ServerError, ServerResult};
use crate::iopub::IoPub;
use crate::queue::ExecutionQueue;
use crate::router::{RequestRouter, ShutdownRequested};
use crate::session::{MessageFactory, SessionIdentity};
use async_trait::async_trait;
use kernel_config::KernelConfig;
use kernel_interfaces::{ExecutionEngine, Renderer};
use kernel_protocol::{ChannelType, RawMessage, SocketSide, WireCodec};
use kernel_runtime::{
    close_within, run_loop, Interruptible, LoopSupervisor, MergedError, RuntimeError,
};
use kernel_transport::{CallbackId, MessageCallback, MessageFilter, SocketManager, TransportError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How a kernel run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelExit {
    /// Cancelled from outside, or a loop stopped on its own
    Cancelled,
    /// A client sent `shutdown_request`
    Shutdown { restart: bool },
}

/// Forwards every verified message on a channel to the router
struct RouteTo {
    router: Arc<RequestRouter>,
    channel: ChannelType,
}

#[async_trait]
impl MessageCallback for RouteTo {
    async fn on_message(&self, message: &RawMessage) -> anyhow::Result<()> {
        match self.router.handle(self.channel, message).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_interruption() => Err(anyhow::Error::new(TransportError::Interrupted)),
            Err(e) => Err(anyhow::Error::new(e)),
        }
    }
}

pub struct Kernel {
    config: KernelConfig,
    engine: Arc<dyn ExecutionEngine>,
    renderer: Arc<dyn Renderer>,
}

impl Kernel {
    pub fn new(
        config: KernelConfig,
        engine: Arc<dyn ExecutionEngine>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            config,
            engine,
            renderer,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Open the sockets and start the channel loops
    ///
    /// # Errors
    /// Configuration errors and sockets that fail to bind are reported
    /// before any loop starts.
    pub async fn start(self, cancel: &CancellationToken) -> ServerResult<RunningKernel> {
        self.config.validate_all()?;

        let mut supervisor = LoopSupervisor::new(cancel);
        let codec = Arc::new(WireCodec::new(self.config.connection.signer()?));
        let sockets = Arc::new(
            SocketManager::open(
                &self.config.connection,
                &self.config.runtime,
                SocketSide::Server,
                codec,
                &supervisor.token(),
            )
            .await?,
        );

        let factory = Arc::new(MessageFactory::new(SessionIdentity::from(&self.config.session)));
        let iopub = Arc::new(IoPub::new(sockets.clone(), factory));
        let comms = Arc::new(CommManager::new(iopub.clone()));
        let queue = Arc::new(ExecutionQueue::start(&supervisor.token()));
        let router = Arc::new(RequestRouter::new(
            sockets.clone(),
            iopub,
            comms,
            queue.clone(),
            self.engine.clone(),
            self.renderer,
        ));

        let routes = [ChannelType::Shell, ChannelType::Control]
            .into_iter()
            .map(|channel| {
                let route = Arc::new(RouteTo {
                    router: router.clone(),
                    channel,
                });
                (channel, sockets.channel(channel).callbacks().register(MessageFilter::Any, route))
            })
            .collect();

        let hb = sockets.clone();
        supervisor.spawn("heartbeat", move |token| async move {
            run_loop("heartbeat", token, || {
                let hb = hb.clone();
                async move {
                    let ping = hb.heartbeat().receive_raw().await?;
                    hb.heartbeat().send_raw(ping).await
                }
            })
            .await?;
            Ok(())
        });

        for channel in [ChannelType::Control, ChannelType::Shell] {
            let loop_sockets = sockets.clone();
            supervisor.spawn(channel.name(), move |token| async move {
                run_loop(channel.name(), token, || {
                    let sockets = loop_sockets.clone();
                    async move {
                        sockets
                            .channel(channel)
                            .receive_message_and_run_callbacks()
                            .await
                    }
                })
                .await?;
                Ok(())
            });
        }

        info!(
            ip = %self.config.connection.ip,
            session = %self.config.session.session_id,
            embedded = self.config.session.embedded,
            "Kernel started"
        );

        Ok(RunningKernel {
            config: self.config,
            supervisor,
            sockets,
            router,
            queue,
            engine: self.engine,
            routes,
        })
    }

    /// Start and wait for the kernel to stop
    pub async fn run(self, cancel: &CancellationToken) -> ServerResult<KernelExit> {
        self.start(cancel).await?.wait().await
    }
}

/// A started kernel. Dropping it without [`wait`](Self::wait) leaves the
/// loops running until `cancel` fires.
pub struct RunningKernel {
    config: KernelConfig,
    supervisor: LoopSupervisor,
    sockets: Arc<SocketManager>,
    router: Arc<RequestRouter>,
    queue: Arc<ExecutionQueue>,
    engine: Arc<dyn ExecutionEngine>,
    routes: Vec<(ChannelType, CallbackId)>,
}

impl RunningKernel {
    pub fn comms(&self) -> &Arc<CommManager> {
        self.router.comms()
    }

    pub fn execution_count(&self) -> u64 {
        self.router.counter().current()
    }

    pub fn ports(&self) -> BTreeMap<ChannelType, u16> {
        self.sockets.ports()
    }

    /// Token shared by the channel loops
    pub fn token(&self) -> CancellationToken {
        self.supervisor.token()
    }

    /// Ask every loop to stop; [`wait`](Self::wait) then returns
    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }

    /// Wait for the loops, then close the execution queue and the sockets,
    /// each within the close timeout. Work still running on the queue is
    /// interrupted first and aborted if it outlives the timeout.
    ///
    /// A served `shutdown_request` ends the process here unless the kernel
    /// is embedded in a host.
    pub async fn wait(self) -> ServerResult<KernelExit> {
        let RunningKernel {
            config,
            supervisor,
            sockets,
            router,
            queue,
            engine,
            routes,
        } = self;

        let joined = supervisor.join().await;
        debug!("Channel loops stopped");
        for (channel, id) in routes {
            sockets.channel(channel).callbacks().unregister(id);
        }
        engine.interrupt_in_flight();
        let drained = close_within(queue.as_ref(), config.runtime.close_timeout).await;
        let closed = close_within(sockets.as_ref(), config.runtime.close_timeout).await;

        let exit = match router.shutdown_requested() {
            Some(ShutdownRequested { restart }) => KernelExit::Shutdown { restart },
            None => KernelExit::Cancelled,
        };
        info!(?exit, "Kernel stopped");

        let mut failures: Vec<RuntimeError> = [joined.err(), drained.err(), closed.err()]
            .into_iter()
            .flatten()
            .collect();

        if matches!(exit, KernelExit::Shutdown { .. }) && !config.session.embedded {
            for failure in &failures {
                warn!("Failure during shutdown: {}", failure);
            }
            std::process::exit(0);
        }

        if failures.len() > 1 {
            let merged =
                MergedError::from_errors(failures.drain(..).map(anyhow::Error::new).collect());
            failures.extend(merged.map(RuntimeError::Merged));
        }
        match failures.pop() {
            Some(failure) => Err(ServerError::Runtime(failure)),
            None => Ok(exit),
        }
    }
}
