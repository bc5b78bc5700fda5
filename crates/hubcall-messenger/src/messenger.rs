//! The per-process messaging runtime.
//!
//! # Routing
//!
//! ```text
//!   invoke_and_wait(call)
//!        │
//!        ├─ local endpoint? ──► Endpoint::invoke_local ──► result
//!        │
//!        └─ HubInvoke ──► server ──► Hub ──► SpokeInvoke ──► implementor node
//!                                                              │
//!           pending[call_id] ◄── SpokeInvocationResults ◄──────┘
//! ```
//!
//! One delivery task consumes the transport's ordered event stream (plus
//! a loopback queue the server uses to message itself). Incoming
//! `SpokeInvoke`s take their endpoint ticket on that task and then run on
//! the worker pool, so a slow implementor never stalls delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use hubcall_protocol::{
    CallId, Codec, InvocationResult, JsonCodec, MethodCall, RemoteFailure,
    RemoteName, WireMessage,
};
use hubcall_transport::{EventStream, NetEvent, NodeId, NodeMessenger};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::pool::WorkerPool;
use crate::{Endpoint, Hub, Implementor, MessengerConfig, MessengerError};

/// Calls waiting for a result from the network.
#[derive(Default)]
struct PendingCalls {
    calls: HashMap<CallId, oneshot::Sender<InvocationResult>>,
    /// Set once the connection to the server is gone.
    lost: Option<String>,
}

struct Inner<M, C> {
    transport: M,
    codec: C,
    config: MessengerConfig,
    local: NodeId,
    server: NodeId,
    endpoints: Mutex<HashMap<String, Arc<Endpoint>>>,
    /// Held across an endpoint change and its announcement so the hub
    /// sees announcements in the same order the map changed.
    registration: tokio::sync::Mutex<()>,
    pending: Mutex<PendingCalls>,
    /// Present only on the server node.
    hub: Option<Hub>,
    pool: WorkerPool,
    loopback: mpsc::UnboundedSender<WireMessage>,
}

/// Routes calls to local endpoints or through the hub.
///
/// Cheap to clone; all clones share one runtime. Must be created inside
/// a Tokio runtime because it starts its delivery task immediately.
pub struct UnifiedMessenger<M, C = JsonCodec> {
    inner: Arc<Inner<M, C>>,
}

impl<M, C> Clone for UnifiedMessenger<M, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: NodeMessenger> UnifiedMessenger<M, JsonCodec> {
    /// Creates a messenger with the JSON codec and default config.
    ///
    /// # Errors
    /// Fails if the transport's event stream was already taken.
    pub fn new(transport: M) -> Result<Self, MessengerError> {
        Self::with_config(transport, JsonCodec, MessengerConfig::default())
    }
}

impl<M: NodeMessenger, C: Codec> UnifiedMessenger<M, C> {
    /// Creates a messenger with an explicit codec and config.
    ///
    /// # Errors
    /// Fails if the transport's event stream was already taken.
    pub fn with_config(
        transport: M,
        codec: C,
        config: MessengerConfig,
    ) -> Result<Self, MessengerError> {
        let config = config.validated();
        let events = transport.take_events()?;
        let local = transport.local_node();
        let server = transport.server_node();
        let hub = transport.is_server().then(|| Hub::new(config.clone()));
        let (loopback, loopback_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            pool: WorkerPool::new(config.worker_pool_size),
            transport,
            codec,
            config,
            local,
            server,
            endpoints: Mutex::new(HashMap::new()),
            registration: tokio::sync::Mutex::new(()),
            pending: Mutex::new(PendingCalls::default()),
            hub,
            loopback,
        });
        tokio::spawn(deliver(Arc::downgrade(&inner), events, loopback_rx));

        tracing::info!(%local, %server, is_server = local == server, "messenger started");
        Ok(Self { inner })
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    pub fn local_node(&self) -> NodeId {
        self.inner.local
    }

    pub fn server_node(&self) -> NodeId {
        self.inner.server
    }

    pub fn is_server(&self) -> bool {
        self.inner.local == self.inner.server
    }

    /// The hub, if this node is the server.
    pub fn hub(&self) -> Option<&Hub> {
        self.inner.hub.as_ref()
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Registers `implementor` under `name`, creating the local endpoint
    /// and announcing it to the hub if this is the first one.
    ///
    /// # Errors
    /// - `Protocol(InvalidInterface)` if the interface descriptor is
    ///   inconsistent.
    /// - `NotImplementing` if the implementor doesn't satisfy it.
    /// - `EndpointMismatch` if the endpoint exists with another interface
    ///   or threading mode.
    /// - `Transport` if the announcement can't be sent.
    pub async fn add_implementor(
        &self,
        name: &RemoteName,
        implementor: Arc<dyn Implementor>,
        single_threaded: bool,
    ) -> Result<(), MessengerError> {
        self.register(name, implementor, single_threaded, false).await
    }

    /// Like [`add_implementor`](Self::add_implementor), but only succeeds
    /// if this creates the endpoint.
    ///
    /// # Errors
    /// `DuplicateRemote` if a local endpoint called `name` already
    /// exists, plus everything `add_implementor` can return.
    pub async fn add_exclusive_implementor(
        &self,
        name: &RemoteName,
        implementor: Arc<dyn Implementor>,
        single_threaded: bool,
    ) -> Result<(), MessengerError> {
        self.register(name, implementor, single_threaded, true).await
    }

    async fn register(
        &self,
        name: &RemoteName,
        implementor: Arc<dyn Implementor>,
        single_threaded: bool,
        exclusive: bool,
    ) -> Result<(), MessengerError> {
        let interface = name.interface();
        interface.validate()?;
        if !implementor.implements(interface) {
            return Err(MessengerError::NotImplementing {
                endpoint: name.name().to_owned(),
                interface: interface.name,
            });
        }

        let _registering = self.inner.registration.lock().await;
        let created = {
            let mut endpoints = self.inner.endpoints();
            match endpoints.get(name.name()) {
                Some(_) if exclusive => {
                    return Err(MessengerError::DuplicateRemote(name.name().to_owned()));
                }
                Some(endpoint) => {
                    if !endpoint.is_equivalent(interface, single_threaded) {
                        return Err(MessengerError::EndpointMismatch {
                            endpoint: name.name().to_owned(),
                        });
                    }
                    endpoint.add_implementor(implementor)?;
                    tracing::debug!(
                        endpoint = %name,
                        single_threaded = endpoint.is_single_threaded(),
                        implementors = endpoint.implementor_count(),
                        "implementor joined endpoint"
                    );
                    false
                }
                None => {
                    let endpoint =
                        Endpoint::new(name.name(), interface, single_threaded);
                    endpoint.add_implementor(implementor)?;
                    endpoints.insert(name.name().to_owned(), Arc::new(endpoint));
                    true
                }
            }
        };

        if created {
            tracing::info!(
                node = %self.inner.local,
                endpoint = %name,
                single_threaded,
                "endpoint created"
            );
            self.inner
                .route_to_hub(WireMessage::HasEndPointImplementor {
                    endpoint: name.name().to_owned(),
                })
                .await?;
        }
        Ok(())
    }

    /// Unregisters `implementor`. Removing the last one tears the
    /// endpoint down and announces that to the hub.
    ///
    /// # Errors
    /// - `UnknownEndpoint` if there is no local endpoint called `name`.
    /// - `NotRegistered` if the implementor wasn't registered there.
    /// - `Transport` if the announcement can't be sent.
    pub async fn remove_implementor(
        &self,
        name: &str,
        implementor: &Arc<dyn Implementor>,
    ) -> Result<(), MessengerError> {
        let _registering = self.inner.registration.lock().await;
        let emptied = {
            let mut endpoints = self.inner.endpoints();
            let endpoint = endpoints
                .get(name)
                .ok_or_else(|| MessengerError::UnknownEndpoint(name.to_owned()))?;
            let emptied = endpoint.remove_implementor(implementor)?;
            if emptied {
                endpoints.remove(name);
            }
            emptied
        };

        if emptied {
            tracing::info!(node = %self.inner.local, endpoint = name, "endpoint destroyed");
            self.inner
                .route_to_hub(WireMessage::NoLongerHasEndPointImplementor {
                    endpoint: name.to_owned(),
                })
                .await?;
        }
        Ok(())
    }

    /// The single local implementor registered under `name`.
    ///
    /// # Errors
    /// `UnknownEndpoint` if there is none, `ImplementorCount` if there
    /// are several.
    pub fn get_implementor(
        &self,
        name: &str,
    ) -> Result<Arc<dyn Implementor>, MessengerError> {
        let endpoint = self
            .inner
            .endpoint(name)
            .ok_or_else(|| MessengerError::UnknownEndpoint(name.to_owned()))?;
        let mut implementors = endpoint.implementors();
        if implementors.len() != 1 {
            return Err(MessengerError::ImplementorCount {
                endpoint: name.to_owned(),
                found: implementors.len(),
            });
        }
        Ok(implementors.remove(0))
    }

    /// Number of local implementors for `name` (0 if no endpoint).
    pub fn local_implementor_count(&self, name: &str) -> usize {
        self.inner
            .endpoint(name)
            .map_or(0, |endpoint| endpoint.implementor_count())
    }

    pub fn has_local_implementor(&self, name: &str) -> bool {
        self.inner.endpoint(name).is_some()
    }

    /// Polls until a local endpoint called `name` exists or `timeout`
    /// elapses. A zero timeout waits as long as the configured maximum.
    pub async fn wait_for_local_implementor(
        &self,
        name: &str,
        timeout: Duration,
    ) -> bool {
        let config = &self.inner.config;
        let deadline = Instant::now() + config.effective_timeout(timeout);
        loop {
            if self.has_local_implementor(name) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(config.poll_interval).await;
        }
    }

    // -----------------------------------------------------------------------
    // Invocation
    // -----------------------------------------------------------------------

    /// Runs `call` on its single implementor, wherever it lives, and
    /// waits for the result.
    ///
    /// Cluster-side problems come back as `InvocationResult::Failure`:
    /// `RemoteNotFound` when nobody implements the endpoint,
    /// `ConnectionLost` when the connection drops (or already dropped)
    /// before the result arrives.
    ///
    /// # Errors
    /// `ImplementorCount` if the endpoint is local but doesn't have
    /// exactly one implementor; `Protocol` if the call can't be encoded.
    pub async fn invoke_and_wait(
        &self,
        call: MethodCall,
    ) -> Result<InvocationResult, MessengerError> {
        if let Some(endpoint) = self.inner.endpoint(&call.endpoint) {
            let name = call.endpoint.clone();
            let mut results = self.inner.run_local(endpoint, call).await;
            if results.len() != 1 {
                return Err(MessengerError::ImplementorCount {
                    endpoint: name,
                    found: results.len(),
                });
            }
            return Ok(results.remove(0));
        }

        let call_id = CallId::random();
        let receiver = {
            let mut pending = self.inner.pending();
            if let Some(reason) = &pending.lost {
                return Ok(InvocationResult::connection_lost(reason.clone()));
            }
            let (tx, rx) = oneshot::channel();
            pending.calls.insert(call_id.clone(), tx);
            rx
        };

        tracing::debug!(
            node = %self.inner.local,
            endpoint = %call.endpoint,
            method = %call.method,
            %call_id,
            "sending call to hub"
        );
        let sent = self
            .inner
            .route_to_hub(WireMessage::HubInvoke {
                call_id: Some(call_id.clone()),
                needs_response: true,
                call,
            })
            .await;
        if let Err(e) = sent {
            self.inner.pending().calls.remove(&call_id);
            return match e {
                MessengerError::Transport(e) => {
                    Ok(InvocationResult::connection_lost(e.to_string()))
                }
                other => Err(other),
            };
        }

        Ok(receiver.await.unwrap_or_else(|_| {
            InvocationResult::connection_lost("messenger shut down")
        }))
    }

    /// Sends `call` to every implementor in the cluster without waiting
    /// for results. Local implementors run before this returns; their
    /// failures are logged, never returned.
    ///
    /// # Errors
    /// `Protocol` or `Transport` if the call can't be sent to the hub.
    /// Local implementors have already run in that case.
    pub async fn invoke(&self, call: MethodCall) -> Result<(), MessengerError> {
        let local = self.inner.endpoint(&call.endpoint);
        let ticket = local.as_ref().map(|endpoint| endpoint.take_ticket());

        let sent = self
            .inner
            .route_to_hub(WireMessage::HubInvoke {
                call_id: None,
                needs_response: false,
                call: call.clone(),
            })
            .await;

        if let (Some(endpoint), Some(ticket)) = (local, ticket) {
            let invoker = self.inner.local;
            let endpoint_name = call.endpoint.clone();
            let handle = tokio::spawn(async move {
                endpoint.invoke_local(&call, ticket, invoker).await
            });
            if let Err(e) = handle.await {
                tracing::error!(endpoint = %endpoint_name, error = %e, "local invocation task failed");
            }
        }

        sent
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

impl<M: NodeMessenger, C: Codec> Inner<M, C> {
    fn endpoints(&self) -> MutexGuard<'_, HashMap<String, Arc<Endpoint>>> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, PendingCalls> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn endpoint(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.endpoints().get(name).cloned()
    }

    /// Runs a call on a local endpoint as the local node. Spawned so the
    /// ticket is released even if the caller stops waiting.
    async fn run_local(
        &self,
        endpoint: Arc<Endpoint>,
        call: MethodCall,
    ) -> Vec<InvocationResult> {
        let ticket = endpoint.take_ticket();
        let invoker = self.local;
        let handle = tokio::spawn(async move {
            endpoint.invoke_local(&call, ticket, invoker).await
        });
        match handle.await {
            Ok(results) => results,
            Err(e) => vec![InvocationResult::illegal_state(format!(
                "local invocation failed: {e}"
            ))],
        }
    }

    /// Sends a node → hub message. On the server this goes straight into
    /// the local hub.
    async fn route_to_hub(&self, msg: WireMessage) -> Result<(), MessengerError> {
        if let Some(hub) = &self.hub {
            for (to, out) in hub.handle(self.local, msg) {
                self.route_from_hub(to, out).await;
            }
            return Ok(());
        }
        let data = self.codec.encode(&msg)?;
        self.transport.send(self.server, data).await?;
        Ok(())
    }

    /// Sends a hub → node message. Failures are logged: the hub learns
    /// about dead nodes from `NodeLeft`.
    async fn route_from_hub(&self, to: NodeId, msg: WireMessage) {
        if to == self.local {
            if self.loopback.send(msg).is_err() {
                tracing::warn!("loopback closed, dropping hub message");
            }
            return;
        }
        let kind = msg.kind();
        let data = match self.codec.encode(&msg) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(%to, kind, error = %e, "failed to encode hub message");
                return;
            }
        };
        if let Err(e) = self.transport.send(to, data).await {
            tracing::warn!(%to, kind, error = %e, "failed to deliver hub message");
        }
    }

    async fn handle_event(self: &Arc<Self>, event: NetEvent) {
        match event {
            NetEvent::Message { from, data } => {
                match self.codec.decode::<WireMessage>(&data) {
                    Ok(msg) => self.handle_message(from, msg).await,
                    Err(e) => {
                        tracing::warn!(%from, error = %e, "dropping undecodable message");
                    }
                }
            }
            NetEvent::NodeLeft(node) => {
                if let Some(hub) = &self.hub {
                    for (to, out) in hub.node_removed(node) {
                        self.route_from_hub(to, out).await;
                    }
                }
            }
            NetEvent::ConnectionLost => {
                self.connection_lost("connection to server lost");
            }
        }
    }

    async fn handle_message(self: &Arc<Self>, from: NodeId, msg: WireMessage) {
        match msg {
            WireMessage::HasEndPointImplementor { .. }
            | WireMessage::NoLongerHasEndPointImplementor { .. }
            | WireMessage::HubInvoke { .. }
            | WireMessage::HubInvocationResults { .. } => {
                let Some(hub) = &self.hub else {
                    tracing::warn!(%from, kind = msg.kind(), "hub message on a non-server node");
                    return;
                };
                for (to, out) in hub.handle(from, msg) {
                    self.route_from_hub(to, out).await;
                }
            }
            WireMessage::SpokeInvoke {
                call_id,
                needs_response,
                call,
                invoker,
            } => {
                if from != self.server {
                    tracing::warn!(%from, "ignoring SpokeInvoke not sent by the server");
                    return;
                }
                self.dispatch_spoke(call_id, needs_response, call, invoker)
                    .await;
            }
            WireMessage::SpokeInvocationResults { call_id, result } => {
                if from != self.server {
                    tracing::warn!(%from, "ignoring results not sent by the server");
                    return;
                }
                self.complete(call_id, result);
            }
        }
    }

    /// Runs a hub-forwarded call on the worker pool and, if asked, sends
    /// back its single result.
    async fn dispatch_spoke(
        self: &Arc<Self>,
        call_id: Option<CallId>,
        needs_response: bool,
        call: MethodCall,
        invoker: NodeId,
    ) {
        let reply_to = call_id.filter(|_| needs_response);

        let Some(endpoint) = self.endpoint(&call.endpoint) else {
            tracing::debug!(endpoint = %call.endpoint, %invoker, "no local endpoint for forwarded call");
            if let Some(call_id) = reply_to {
                let result = InvocationResult::Failure(RemoteFailure::RemoteNotFound {
                    endpoint: call.endpoint,
                });
                self.send_result(call_id, result).await;
            }
            return;
        };

        // Taken here, on the delivery task, so arrival order is kept.
        let ticket = endpoint.take_ticket();
        let this = Arc::clone(self);
        self.pool.execute(async move {
            let mut results = endpoint.invoke_local(&call, ticket, invoker).await;
            let Some(call_id) = reply_to else {
                return;
            };
            let result = if results.len() == 1 {
                results.remove(0)
            } else {
                tracing::error!(
                    endpoint = %call.endpoint,
                    found = results.len(),
                    "unicast call reached a node without exactly one implementor"
                );
                InvocationResult::illegal_state(format!(
                    "expected exactly one implementor for {}, found {}",
                    call.endpoint,
                    results.len()
                ))
            };
            this.send_result(call_id, result).await;
        });
    }

    async fn send_result(&self, call_id: CallId, result: InvocationResult) {
        let msg = WireMessage::HubInvocationResults { call_id, result };
        if let Err(e) = self.route_to_hub(msg).await {
            tracing::warn!(error = %e, "failed to send result to hub");
        }
    }

    fn complete(&self, call_id: CallId, result: InvocationResult) {
        let Some(tx) = self.pending().calls.remove(&call_id) else {
            tracing::warn!(%call_id, "result for unknown or finished call");
            return;
        };
        // The caller may have stopped waiting.
        let _ = tx.send(result);
    }

    /// Releases every waiting caller with `ConnectionLost` and makes
    /// future calls fail the same way.
    fn connection_lost(&self, reason: &str) {
        let drained: Vec<_> = {
            let mut pending = self.pending();
            pending.lost = Some(reason.to_owned());
            pending.calls.drain().collect()
        };
        tracing::warn!(node = %self.local, released = drained.len(), reason, "connection lost");
        for (_, tx) in drained {
            let _ = tx.send(InvocationResult::connection_lost(reason));
        }
    }
}

/// The delivery task. Holds only a weak reference so dropping the last
/// messenger handle stops it.
async fn deliver<M: NodeMessenger, C: Codec>(
    inner: Weak<Inner<M, C>>,
    mut events: EventStream,
    mut loopback: mpsc::UnboundedReceiver<WireMessage>,
) {
    loop {
        let next = tokio::select! {
            event = events.recv() => event.map(Delivery::Net),
            msg = loopback.recv() => msg.map(Delivery::Loopback),
        };
        let Some(next) = next else {
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match next {
            Delivery::Net(event) => inner.handle_event(event).await,
            Delivery::Loopback(msg) => {
                let local = inner.local;
                inner.handle_message(local, msg).await;
            }
        }
    }
    tracing::debug!("delivery task stopped");
}

enum Delivery {
    Net(NetEvent),
    Loopback(WireMessage),
}
