//! Comms: long-lived, named side channels between kernel and front end
//!
//! A comm is `open` from creation until it is closed by either side; a
//! closed comm never reopens. [`CommManager`] owns the registry of live
//! comms and the callbacks registered per target name.

use crate::error::{ServerError, ServerResult};
use crate::iopub::IoPub;
use futures::future::BoxFuture;
use kernel_protocol::content::{CommClose, CommMsg, CommOpen, CommTarget};
use kernel_protocol::{JsonObject, MessageContent};
use kernel_transport::{is_interruption, TransportError};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Callback invoked with the comm and the message or close payload
pub type CommHandler =
    Arc<dyn Fn(Arc<Comm>, JsonObject) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

fn handler<F, Fut>(f: F) -> CommHandler
where
    F: Fn(Arc<Comm>, JsonObject) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |comm: Arc<Comm>, data: JsonObject| -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(f(comm, data))
    })
}

/// `comm_close` payload reporting a failure to the peer
fn failure_data(reason: String) -> JsonObject {
    let mut data = JsonObject::new();
    data.insert("error".to_string(), serde_json::Value::String(reason));
    data
}

/// Handle for removing a comm callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommCallbackId(u64);

struct CommState {
    open: bool,
    next_id: u64,
    on_message: Vec<(CommCallbackId, CommHandler)>,
    on_close: Vec<(CommCallbackId, CommHandler)>,
}

impl CommState {
    fn next_id(&mut self) -> CommCallbackId {
        self.next_id += 1;
        CommCallbackId(self.next_id)
    }
}

pub struct Comm {
    id: String,
    target: String,
    state: Mutex<CommState>,
    iopub: Arc<IoPub>,
    registry: Weak<CommRegistry>,
}

impl Comm {
    fn new(
        id: String,
        target: String,
        iopub: Arc<IoPub>,
        registry: Weak<CommRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            target,
            state: Mutex::new(CommState {
                open: true,
                next_id: 0,
                on_message: Vec::new(),
                on_close: Vec::new(),
            }),
            iopub,
            registry,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Register a callback for messages from the peer. Callbacks fire in registration order.
    pub fn on_message<F, Fut>(&self, f: F) -> CommCallbackId
    where
        F: Fn(Arc<Comm>, JsonObject) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.on_message.push((id, handler(f)));
        id
    }

    /// Register a callback for when the comm closes, from either side
    pub fn on_close<F, Fut>(&self, f: F) -> CommCallbackId
    where
        F: Fn(Arc<Comm>, JsonObject) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut state = self.state.lock();
        let id = state.next_id();
        state.on_close.push((id, handler(f)));
        id
    }

    pub fn remove_callback(&self, id: CommCallbackId) -> bool {
        let mut state = self.state.lock();
        let before = state.on_message.len() + state.on_close.len();
        state.on_message.retain(|(existing, _)| *existing != id);
        state.on_close.retain(|(existing, _)| *existing != id);
        before != state.on_message.len() + state.on_close.len()
    }

    /// Send `data` to the peer
    ///
    /// # Errors
    /// [`ServerError::CommClosed`] if the comm has been closed.
    pub async fn send(&self, data: JsonObject) -> ServerResult<()> {
        if !self.is_open() {
            return Err(ServerError::CommClosed(self.id.clone()));
        }
        self.iopub
            .publish_in_context(MessageContent::CommMsg(CommMsg {
                comm_id: self.id.clone(),
                data,
            }))
            .await
    }

    /// Close the comm. Message callbacks are dropped, close callbacks run
    /// once each, and the comm leaves the registry. The peer is told only
    /// when `notify_peer` is set. Closing an already closed comm does nothing.
    pub async fn close(self: &Arc<Self>, data: JsonObject, notify_peer: bool) -> ServerResult<()> {
        let on_close = {
            let mut state = self.state.lock();
            if !state.open {
                return Ok(());
            }
            state.open = false;
            state.on_message.clear();
            std::mem::take(&mut state.on_close)
        };

        for (_, callback) in on_close {
            if let Err(e) = callback(self.clone(), data.clone()).await {
                warn!(comm_id = %self.id, "Comm close callback failed: {:#}", e);
            }
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self);
        }
        info!(comm_id = %self.id, target = %self.target, notify_peer, "Comm closed");

        if notify_peer {
            self.iopub
                .publish_in_context(MessageContent::CommClose(CommClose {
                    comm_id: self.id.clone(),
                    data,
                }))
                .await?;
        }
        Ok(())
    }

    /// Run message callbacks for a message from the peer
    async fn deliver(self: &Arc<Self>, data: JsonObject) -> ServerResult<()> {
        let callbacks: Vec<CommHandler> = {
            let state = self.state.lock();
            if !state.open {
                return Err(ServerError::CommClosed(self.id.clone()));
            }
            state.on_message.iter().map(|(_, callback)| callback.clone()).collect()
        };

        for callback in callbacks {
            if let Err(e) = callback(self.clone(), data.clone()).await {
                if is_interruption(&e) {
                    return Err(TransportError::Interrupted.into());
                }
                warn!(comm_id = %self.id, "Comm message callback failed: {:#}", e);
            }
        }
        Ok(())
    }
}

/// Live comms, indexed by id and by target
#[derive(Default)]
struct CommRegistry {
    by_id: RwLock<HashMap<String, Arc<Comm>>>,
    by_target: RwLock<HashMap<String, HashSet<String>>>,
}

impl CommRegistry {
    fn insert(&self, comm: Arc<Comm>) -> bool {
        let mut by_id = self.by_id.write();
        if by_id.contains_key(comm.id()) {
            return false;
        }
        self.by_target
            .write()
            .entry(comm.target().to_string())
            .or_default()
            .insert(comm.id().to_string());
        by_id.insert(comm.id().to_string(), comm);
        true
    }

    fn remove(&self, comm: &Comm) {
        let mut by_id = self.by_id.write();
        by_id.remove(comm.id());
        let mut by_target = self.by_target.write();
        if let Some(ids) = by_target.get_mut(comm.target()) {
            ids.remove(comm.id());
            if ids.is_empty() {
                by_target.remove(comm.target());
            }
        }
    }

    fn get(&self, id: &str) -> Option<Arc<Comm>> {
        self.by_id.read().get(id).cloned()
    }

    fn list(&self, target: Option<&str>) -> Vec<Arc<Comm>> {
        let by_id = self.by_id.read();
        match target {
            None => by_id.values().cloned().collect(),
            Some(target) => self
                .by_target
                .read()
                .get(target)
                .map(|ids| ids.iter().filter_map(|id| by_id.get(id).cloned()).collect())
                .unwrap_or_default(),
        }
    }
}

pub struct CommManager {
    registry: Arc<CommRegistry>,
    targets: RwLock<HashMap<String, CommHandler>>,
    iopub: Arc<IoPub>,
}

impl CommManager {
    pub fn new(iopub: Arc<IoPub>) -> Self {
        Self {
            registry: Arc::new(CommRegistry::default()),
            targets: RwLock::new(HashMap::new()),
            iopub,
        }
    }

    /// Callback for comms the peer opens with `target`. Replaces any earlier registration.
    pub fn register_target<F, Fut>(&self, target: impl Into<String>, f: F)
    where
        F: Fn(Arc<Comm>, JsonObject) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.targets.write().insert(target.into(), handler(f));
    }

    pub fn unregister_target(&self, target: &str) -> bool {
        self.targets.write().remove(target).is_some()
    }

    fn create(&self, id: String, target: String) -> ServerResult<Arc<Comm>> {
        let comm = Comm::new(id, target, self.iopub.clone(), Arc::downgrade(&self.registry));
        if !self.registry.insert(comm.clone()) {
            return Err(ServerError::DuplicateComm(comm.id().to_string()));
        }
        Ok(comm)
    }

    /// Open a comm from the kernel side and announce it to the peer
    pub async fn open_comm(
        &self,
        target: impl Into<String>,
        data: JsonObject,
    ) -> ServerResult<Arc<Comm>> {
        let comm = self.create(uuid::Uuid::new_v4().to_string(), target.into())?;
        info!(comm_id = %comm.id(), target = %comm.target(), "Opening comm");

        self.iopub
            .publish_in_context(MessageContent::CommOpen(CommOpen {
                comm_id: comm.id().to_string(),
                target_name: comm.target().to_string(),
                data,
                target_module: None,
            }))
            .await?;
        Ok(comm)
    }

    /// Handle `comm_open` from the peer. A failing target callback closes
    /// the comm again and tells the peer why.
    pub async fn process_comm_open(&self, open: CommOpen) -> ServerResult<()> {
        let comm = self.create(open.comm_id, open.target_name)?;
        let callback = self.targets.read().get(comm.target()).cloned();

        match callback {
            Some(callback) => {
                if let Err(e) = callback(comm.clone(), open.data).await {
                    warn!(
                        comm_id = %comm.id(),
                        target = %comm.target(),
                        "Comm target callback failed: {:#}",
                        e
                    );
                    let reason = format!(
                        "Unable to create comm {} (with target {}): {:#}",
                        comm.id(),
                        comm.target(),
                        e
                    );
                    comm.close(failure_data(reason), true).await?;
                }
            }
            None => {
                debug!(comm_id = %comm.id(), target = %comm.target(), "No callback for comm target")
            }
        }
        Ok(())
    }

    /// Handle `comm_msg` from the peer. Messages for unknown comms are ignored.
    pub async fn process_comm_msg(&self, message: CommMsg) -> ServerResult<()> {
        match self.registry.get(&message.comm_id) {
            Some(comm) => comm.deliver(message.data).await,
            None => {
                warn!(comm_id = %message.comm_id, "Message for unknown comm");
                Ok(())
            }
        }
    }

    /// Handle `comm_close` from the peer; the close is not echoed back
    pub async fn process_comm_close(&self, close: CommClose) -> ServerResult<()> {
        match self.registry.get(&close.comm_id) {
            Some(comm) => comm.close(close.data, false).await,
            None => {
                warn!(comm_id = %close.comm_id, "Close for unknown comm");
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Comm>> {
        self.registry.get(id)
    }

    /// Live comms, optionally only those for `target`; order is unspecified
    pub fn get_comms(&self, target: Option<&str>) -> Vec<Arc<Comm>> {
        self.registry.list(target)
    }

    /// `comms` field of `comm_info_reply`
    pub fn comm_info(&self, target: Option<&str>) -> BTreeMap<String, CommTarget> {
        self.get_comms(target)
            .into_iter()
            .map(|comm| {
                (
                    comm.id().to_string(),
                    CommTarget {
                        target_name: comm.target().to_string(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iopub::testing::iopub;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn data(value: serde_json::Value) -> JsonObject {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_open_then_close_leaves_nothing() {
        let (iopub, sink) = iopub();
        let manager = CommManager::new(iopub);

        let comm = manager.open_comm("t", data(json!({"x": 1}))).await.unwrap();
        assert_eq!(manager.get_comms(Some("t")).len(), 1);
        assert!(comm.is_open());

        comm.close(JsonObject::new(), true).await.unwrap();
        assert!(manager.get_comms(Some("t")).is_empty());
        assert!(manager.get_comms(None).is_empty());
        assert!(!comm.is_open());
        assert_eq!(sink.types(), vec!["comm_open", "comm_close"]);
    }

    #[tokio::test]
    async fn test_send_on_closed_comm_fails() {
        let (iopub, sink) = iopub();
        let manager = CommManager::new(iopub);
        let comm = manager.open_comm("t", JsonObject::new()).await.unwrap();

        comm.send(data(json!({"n": 1}))).await.unwrap();
        comm.close(JsonObject::new(), false).await.unwrap();
        let err = comm.send(JsonObject::new()).await.unwrap_err();
        assert!(matches!(err, ServerError::CommClosed(ref id) if id == comm.id()));
        assert_eq!(sink.types(), vec!["comm_open", "comm_msg"]);
    }

    #[tokio::test]
    async fn test_unregistered_target_creates_comm_without_callback() {
        let (iopub, _sink) = iopub();
        let manager = CommManager::new(iopub);
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        manager.register_target("widgets", move |_comm, _data| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        assert!(manager.unregister_target("widgets"));

        manager
            .process_comm_open(CommOpen {
                comm_id: "c1".to_string(),
                target_name: "widgets".to_string(),
                data: JsonObject::new(),
                target_module: None,
            })
            .await
            .unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(manager.get("c1").is_some());
        assert_eq!(manager.comm_info(Some("widgets"))["c1"].target_name, "widgets");
    }

    #[tokio::test]
    async fn test_failing_target_callback_closes_comm() {
        let (iopub, sink) = iopub();
        let manager = CommManager::new(iopub);
        manager.register_target("broken", |_comm, _data| async {
            Err::<(), _>(anyhow::anyhow!("no widget"))
        });

        manager
            .process_comm_open(CommOpen {
                comm_id: "c4".to_string(),
                target_name: "broken".to_string(),
                data: JsonObject::new(),
                target_module: None,
            })
            .await
            .unwrap();

        assert!(manager.get("c4").is_none());
        assert!(manager.get_comms(Some("broken")).is_empty());
        assert_eq!(sink.types(), vec!["comm_close"]);
        let sent = sink.sent.lock();
        match &sent[0].content {
            MessageContent::CommClose(close) => {
                assert_eq!(close.comm_id, "c4");
                let error = close.data["error"].as_str().unwrap();
                assert!(error.contains("c4") && error.contains("no widget"), "{}", error);
            }
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_peer_messages_reach_callbacks_in_order() {
        let (iopub, sink) = iopub();
        let manager = CommManager::new(iopub);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        manager.register_target("echo", move |comm, _data| {
            let first = log.clone();
            let second = log.clone();
            comm.on_message(move |_comm, data| {
                let first = first.clone();
                async move {
                    first.lock().push(format!("first:{}", data["n"]));
                    Err(anyhow::anyhow!("ignored"))
                }
            });
            comm.on_message(move |comm, data| {
                let second = second.clone();
                async move {
                    second.lock().push(format!("second:{}", data["n"]));
                    comm.send(data).await?;
                    Ok(())
                }
            });
            async { Ok(()) }
        });

        manager
            .process_comm_open(CommOpen {
                comm_id: "c2".to_string(),
                target_name: "echo".to_string(),
                data: JsonObject::new(),
                target_module: None,
            })
            .await
            .unwrap();
        manager
            .process_comm_msg(CommMsg {
                comm_id: "c2".to_string(),
                data: data(json!({"n": 5})),
            })
            .await
            .unwrap();

        assert_eq!(*seen.lock(), vec!["first:5", "second:5"]);
        assert_eq!(sink.types(), vec!["comm_msg"]);
    }

    #[tokio::test]
    async fn test_peer_close_runs_close_callbacks_without_echo() {
        let (iopub, sink) = iopub();
        let manager = CommManager::new(iopub);
        let closed = Arc::new(AtomicUsize::new(0));

        manager
            .process_comm_open(CommOpen {
                comm_id: "c3".to_string(),
                target_name: "t".to_string(),
                data: JsonObject::new(),
                target_module: None,
            })
            .await
            .unwrap();
        let comm = manager.get("c3").unwrap();
        comm.on_close(|_comm, _data| async { Err(anyhow::anyhow!("first close callback fails")) });
        let counter = closed.clone();
        comm.on_close(move |_comm, _data| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        manager
            .process_comm_close(CommClose {
                comm_id: "c3".to_string(),
                data: JsonObject::new(),
            })
            .await
            .unwrap();

        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(manager.get("c3").is_none());
        assert!(sink.types().is_empty());

        // A second close is a no-op
        comm.close(JsonObject::new(), true).await.unwrap();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_open_is_rejected() {
        let (iopub, _sink) = iopub();
        let manager = CommManager::new(iopub);
        let open = CommOpen {
            comm_id: "dup".to_string(),
            target_name: "t".to_string(),
            data: JsonObject::new(),
            target_module: None,
        };
        manager.process_comm_open(open.clone()).await.unwrap();
        assert!(matches!(
            manager.process_comm_open(open).await,
            Err(ServerError::DuplicateComm(_))
        ));
    }

    #[tokio::test]
    async fn test_removed_callback_does_not_fire() {
        let (iopub, _sink) = iopub();
        let manager = CommManager::new(iopub);
        let comm = manager.open_comm("t", JsonObject::new()).await.unwrap();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        let id = comm.on_message(move |_comm, _data| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        assert!(comm.remove_callback(id));
        assert!(!comm.remove_callback(id));

        manager
            .process_comm_msg(CommMsg {
                comm_id: comm.id().to_string(),
                data: JsonObject::new(),
            })
            .await
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
