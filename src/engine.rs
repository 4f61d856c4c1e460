//! Engine: connection lifecycle and the public call surface.
//!
//! The [`Engine`] ties the pieces together for one core:
//! 1. Open the TCP connection and split it
//! 2. Spawn the writer task and the read loop
//! 3. Log on if credentials are configured
//! 4. Arm the keep-alive ticker and report `Ready`
//!
//! The read loop hands responses to the correlator and everything else to
//! the notification router. Any read or write failure tears the connection
//! down, fails every pending request with `ConnectionLost` and emits
//! [`EngineEvent::ConnectionLost`]. There is no automatic reconnect.
//!
//! # Example
//!
//! ```no_run
//! use qrc_client::{Engine, Topic};
//! use serde_json::json;
//!
//! # async fn run() -> qrc_client::Result<()> {
//! let engine = Engine::builder().host("192.168.1.10").build()?;
//! engine.connect().await?;
//!
//! engine.control_set("gain1", -6.0, None).await?;
//! let result = engine.call("Control.Get", json!(["gain1", "mute1"])).await?;
//!
//! engine.subscribe(Topic::method("EngineStatus"), |status| {
//!     println!("engine status: {:?}", status.params);
//!     Ok(())
//! });
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthSession;
use crate::config::{EngineBuilder, EngineConfig};
use crate::correlator::RequestCorrelator;
use crate::error::{QrcError, Result};
use crate::keepalive::KeepAliveScheduler;
use crate::methods::{
    ChangeGroupPoll, ComponentControls, ControlDescriptor, EngineStatus, MethodRegistry,
    MethodResult,
};
use crate::notify::{CallbackError, NotificationRouter, Subscription, Topic};
use crate::protocol::{encode, Envelope, EnvelopeKind, FrameBuffer};
use crate::transport;
use crate::writer::{spawn_writer_task, WriterHandle};

const READ_BUFFER_SIZE: usize = 64 * 1024;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of the connection to a core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    /// Socket open, logon not yet attempted.
    Connected,
    /// `Logon` sent, waiting for the answer.
    AwaitingAuth,
    Authenticated,
    /// Authenticated with keep-alive armed; calls are accepted.
    Ready,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connected => "connected",
            ConnectionState::AwaitingAuth => "awaiting-auth",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Ready => "ready",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection-level events, see [`Engine::events`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(ConnectionState),
    /// The socket failed or was closed by the core.
    ConnectionLost { reason: String },
    /// A keep-alive probe failed; the connection stays up.
    KeepAliveFailed { reason: String, consecutive: u32 },
}

struct Connection {
    generation: u64,
    writer: WriterHandle,
    token: CancellationToken,
}

struct Inner {
    config: EngineConfig,
    registry: MethodRegistry,
    correlator: RequestCorrelator,
    router: NotificationRouter,
    auth: AuthSession,
    keepalive: KeepAliveScheduler,
    /// Lock order: `connection` before `state`.
    connection: Mutex<Option<Connection>>,
    state: Mutex<ConnectionState>,
    generation: AtomicU64,
    events: broadcast::Sender<EngineEvent>,
}

/// Client engine for one core.
///
/// Dropping the engine closes its connection.
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Create a disconnected engine with the standard method catalogue.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_registry(config, MethodRegistry::standard())
    }

    /// Create a disconnected engine with a custom method catalogue.
    pub fn with_registry(config: EngineConfig, registry: MethodRegistry) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                router: NotificationRouter::with_queue_capacity(config.notification_queue_capacity),
                auth: AuthSession::new(config.credentials.clone()),
                keepalive: KeepAliveScheduler::new(
                    config.keepalive_interval,
                    config.keepalive_timeout,
                ),
                correlator: RequestCorrelator::new(),
                connection: Mutex::new(None),
                state: Mutex::new(ConnectionState::Disconnected),
                generation: AtomicU64::new(0),
                events,
                registry,
                config,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.inner.registry
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Number of requests waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Subscribe to connection-level events.
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Connect to the configured core and bring the session to `Ready`.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.connection.lock().is_some() {
            return Err(QrcError::AlreadyConnected);
        }
        let config = &self.inner.config;
        let stream = transport::open(&config.host, config.port, config.connect_timeout).await?;
        self.attach(stream).await
    }

    /// Run the session over an already established stream.
    ///
    /// Same as [`connect`](Self::connect) after the socket is open.
    pub async fn attach<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let inner = &self.inner;
        let (reader, writer) = tokio::io::split(stream);
        let (generation, token) = inner.install(writer)?;

        tokio::spawn(read_loop(inner.clone(), generation, reader, token.clone()));

        let timeout = inner.config.request_timeout;
        let outcome = inner
            .auth
            .authenticate(
                |state| {
                    inner.transition(generation, state);
                },
                |params| inner.invoke("Logon", params, timeout),
            )
            .await;

        if let Err(e) = outcome {
            inner.teardown(Some(generation), &format!("logon failed: {e}"));
            return Err(e);
        }

        inner.arm_keepalive(token);
        if inner.transition(generation, ConnectionState::Ready) {
            Ok(())
        } else {
            Err(QrcError::ConnectionLost(
                "connection closed during session setup".into(),
            ))
        }
    }

    /// Close the connection.
    ///
    /// Idempotent. Pending requests fail with `ConnectionLost`.
    pub fn close(&self) {
        if self.inner.teardown(None, "connection closed by client") {
            tracing::info!(addr = %self.inner.config.addr(), "connection closed");
        }
    }

    /// Call a catalogue method with the configured request timeout.
    pub async fn call(&self, method: &str, params: Value) -> Result<MethodResult> {
        self.call_with_timeout(method, params, self.inner.config.request_timeout)
            .await
    }

    /// Call a catalogue method with an explicit timeout.
    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<MethodResult> {
        let state = self.state();
        if state != ConnectionState::Ready {
            return Err(QrcError::NotReady(state));
        }
        self.inner.invoke(method, params, timeout).await
    }

    /// Queue a raw envelope for writing.
    ///
    /// Bypasses the registry and the correlator. Works from `Connected` on.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let writer = self.inner.writer()?;
        writer.send(encode(envelope)?).await
    }

    /// Receive unsolicited envelopes matching `topic`.
    ///
    /// Each subscription gets its own delivery task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&Envelope) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.inner.router.subscribe(topic, callback)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.inner.router.unsubscribe(subscription)
    }

    // ------------------------------------------------------------------
    // Typed calls
    // ------------------------------------------------------------------

    pub async fn status_get(&self) -> Result<EngineStatus> {
        match self.call("StatusGet", Value::Null).await? {
            MethodResult::Status(status) => Ok(status),
            other => Err(unexpected("StatusGet", &other)),
        }
    }

    /// Read one or more named controls.
    pub async fn control_get(&self, names: &[&str]) -> Result<Vec<ControlDescriptor>> {
        match self.call("Control.Get", json!(names)).await? {
            MethodResult::Controls(controls) => Ok(controls),
            other => Err(unexpected("Control.Get", &other)),
        }
    }

    /// Set a named control, optionally ramping over `ramp` seconds.
    pub async fn control_set(
        &self,
        name: &str,
        value: impl Into<Value>,
        ramp: Option<f64>,
    ) -> Result<()> {
        let mut params = json!({ "Name": name, "Value": value.into() });
        if let Some(ramp) = ramp {
            params["Ramp"] = json!(ramp);
        }
        self.call("Control.Set", params).await.map(drop)
    }

    pub async fn component_get_controls(&self, name: &str) -> Result<ComponentControls> {
        match self
            .call("Component.GetControls", json!({ "Name": name }))
            .await?
        {
            MethodResult::Component(component) => Ok(component),
            other => Err(unexpected("Component.GetControls", &other)),
        }
    }

    /// Set several controls of one component in a single call.
    ///
    /// Returns the names of controls the core did not recognise; the rest
    /// were applied.
    pub async fn component_set(
        &self,
        name: &str,
        controls: &[(&str, Value)],
    ) -> Result<Vec<String>> {
        let controls: Vec<Value> = controls
            .iter()
            .map(|(control, value)| json!({ "Name": control, "Value": value }))
            .collect();
        match self
            .call("Component.Set", json!({ "Name": name, "Controls": controls }))
            .await?
        {
            MethodResult::UnknownControls(unknown) => Ok(unknown),
            other => Err(unexpected("Component.Set", &other)),
        }
    }

    /// Recall snapshot `bank` (1-based) of the bank named `name`.
    pub async fn snapshot_load(&self, name: &str, bank: u32, ramp: Option<f64>) -> Result<()> {
        let mut params = json!({ "Name": name, "Bank": bank });
        if let Some(ramp) = ramp {
            params["Ramp"] = json!(ramp);
        }
        self.call("Snapshot.Load", params).await.map(drop)
    }

    pub async fn snapshot_save(&self, name: &str, bank: u32) -> Result<()> {
        self.call("Snapshot.Save", json!({ "Name": name, "Bank": bank }))
            .await
            .map(drop)
    }

    /// Add named controls to a change group, creating it if needed.
    pub async fn change_group_add_controls(&self, id: &str, controls: &[&str]) -> Result<()> {
        self.call(
            "ChangeGroup.AddControl",
            json!({ "Id": id, "Controls": controls }),
        )
        .await
        .map(drop)
    }

    pub async fn change_group_poll(&self, id: &str) -> Result<ChangeGroupPoll> {
        match self.call("ChangeGroup.Poll", json!({ "Id": id })).await? {
            MethodResult::ChangeGroup(poll) => Ok(poll),
            other => Err(unexpected("ChangeGroup.Poll", &other)),
        }
    }

    pub async fn change_group_destroy(&self, id: &str) -> Result<()> {
        self.call("ChangeGroup.Destroy", json!({ "Id": id }))
            .await
            .map(drop)
    }

    pub async fn no_op(&self) -> Result<()> {
        self.call("NoOp", Value::Null).await.map(drop)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.inner.teardown(None, "engine dropped");
        self.inner.router.clear();
    }
}

impl Inner {
    fn writer(&self) -> Result<WriterHandle> {
        self.connection
            .lock()
            .as_ref()
            .map(|c| c.writer.clone())
            .ok_or(QrcError::Disconnected)
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if *state != next {
            tracing::debug!(from = %*state, to = %next, "connection state changed");
            *state = next;
            let _ = self.events.send(EngineEvent::StateChanged(next));
        }
    }

    /// Enter `next` only while connection `generation` is still current.
    fn transition(&self, generation: u64, next: ConnectionState) -> bool {
        let connection = self.connection.lock();
        match connection.as_ref() {
            Some(c) if c.generation == generation => {
                self.set_state(next);
                true
            }
            _ => false,
        }
    }

    /// Take ownership of the write half and start accepting requests.
    fn install<W>(self: &Arc<Self>, writer: W) -> Result<(u64, CancellationToken)>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut slot = self.connection.lock();
        if slot.is_some() {
            return Err(QrcError::AlreadyConnected);
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let (handle, task) =
            spawn_writer_task(writer, self.config.write_queue_capacity, token.clone());

        let inner = self.clone();
        tokio::spawn(async move {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => inner.connection_lost(generation, &format!("write failed: {e}")),
                Err(e) => inner.connection_lost(generation, &format!("writer task failed: {e}")),
            }
        });

        self.correlator.open();
        *slot = Some(Connection {
            generation,
            writer: handle,
            token: token.clone(),
        });
        self.set_state(ConnectionState::Connected);
        Ok((generation, token))
    }

    /// Drop the connection if it is `generation` (or any, for `None`).
    ///
    /// Returns `false` when there was nothing to tear down.
    fn teardown(&self, generation: Option<u64>, reason: &str) -> bool {
        let mut slot = self.connection.lock();
        let current = match slot.as_ref() {
            Some(c) => c.generation,
            None => return false,
        };
        if generation.is_some_and(|g| g != current) {
            return false;
        }
        let Some(connection) = slot.take() else {
            return false;
        };

        connection.token.cancel();
        let cancelled = self.correlator.fail_all(reason);
        if cancelled > 0 {
            tracing::debug!(cancelled, reason, "failed pending requests");
        }
        self.set_state(ConnectionState::Disconnected);
        true
    }

    fn connection_lost(&self, generation: u64, reason: &str) {
        if self.teardown(Some(generation), reason) {
            tracing::error!(addr = %self.config.addr(), reason, "connection lost");
            let _ = self.events.send(EngineEvent::ConnectionLost {
                reason: reason.to_string(),
            });
        }
    }

    fn arm_keepalive(self: &Arc<Self>, token: CancellationToken) {
        let probe = self.clone();
        let events = self.events.clone();

        self.keepalive.spawn(
            token,
            move |timeout| {
                let inner = probe.clone();
                async move { inner.invoke("NoOp", Value::Null, timeout).await.map(drop) }
            },
            move |e, consecutive| {
                let _ = events.send(EngineEvent::KeepAliveFailed {
                    reason: e.to_string(),
                    consecutive,
                });
            },
        );
    }

    /// Encode, submit and decode one call without checking the state.
    async fn invoke(&self, method: &str, params: Value, timeout: Duration) -> Result<MethodResult> {
        let spec = *self.registry.get(method)?;
        let wire_params = spec.encode(&params)?;
        let writer = self.writer()?;
        let result = self
            .correlator
            .submit(&writer, spec.name, wire_params, timeout)
            .await?;
        spec.decode(result)
    }

    fn route(&self, frame: Result<Envelope>) {
        let envelope = match frame {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "dropping frame");
                return;
            }
        };

        match envelope.kind() {
            EnvelopeKind::Response => {
                if let Some(unmatched) = self.correlator.resolve(envelope) {
                    tracing::warn!(
                        id = ?unmatched.id,
                        error = ?unmatched.error,
                        "unexpected response"
                    );
                }
            }
            EnvelopeKind::Notification | EnvelopeKind::Request => {
                if self.router.dispatch(&envelope) == 0 {
                    tracing::info!(
                        method = envelope.method().unwrap_or_default(),
                        params = ?envelope.params,
                        "unhandled notification"
                    );
                }
            }
            EnvelopeKind::Invalid => {
                tracing::warn!("dropping envelope with neither method nor result");
            }
        }
    }
}

/// Owns the receive side of one connection.
async fn read_loop<R>(inner: Arc<Inner>, generation: u64, mut reader: R, token: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::with_max_frame_size(inner.config.max_frame_size);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let reason = loop {
        let n = tokio::select! {
            _ = token.cancelled() => return,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break "connection closed by core".to_string(),
                Ok(n) => n,
                Err(e) => break format!("read failed: {e}"),
            },
        };

        for frame in frames.feed(&buf[..n]) {
            inner.route(frame);
        }
    };

    inner.connection_lost(generation, &reason);
}

fn unexpected(method: &str, got: &MethodResult) -> QrcError {
    QrcError::UnexpectedResultShape {
        method: method.to_string(),
        detail: format!("decoded as {got:?}"),
    }
}
