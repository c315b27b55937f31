//! Reconnecting, heartbeat-monitored connection client
//!
//! A [`WsClient`] owns at most one transport at a time. Every connection
//! attempt gets a new epoch; the task driving that attempt, and any timer
//! scheduled on its behalf, only touches client state while its epoch is
//! still current. Shutting the client down bumps the epoch, so late
//! callbacks from a discarded transport are silently ignored.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::config::{validate_server_url, ClientOptions};
use crate::core::{
    ClientEvent, ClientEventKind, ListenerId, ListenerRegistry, ReadyState, TransportPhase,
};
use crate::error::{self, ClientResult};
use crate::protocol::{close_code, close_reason, describe_close, is_reconnectable, Envelope};
use crate::recovery::{ReconnectDecision, ReconnectPolicy};
use crate::websocket::{CloseInfo, Connector, Transport, TransportEvent, TungsteniteConnector};

/// Instructions from the public handle to the task driving the transport
enum Command {
    Send(String),
    Close { code: u16, reason: String },
    Shutdown,
}

/// Mutable client state, always accessed under the lock and never across an await
struct ClientState {
    phase: TransportPhase,
    /// Session identity assigned by the peer's `init` frame
    id: Option<String>,
    epoch: u64,
    commands: Option<mpsc::UnboundedSender<Command>>,
    /// Consecutive reconnects since the last successful open
    reconnect_attempts: u32,
    reconnect_timer: Option<JoinHandle<()>>,
    /// A retry was decided but its timer is not armed yet
    retry_pending: bool,
    /// The current transport is closing because `close` was called
    close_requested: bool,
    shut_down: bool,
}

impl ClientState {
    fn ready_state(&self) -> ReadyState {
        ReadyState::derive(self.phase, self.id.is_some())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch && !self.shut_down
    }

    fn will_reconnect(&self) -> bool {
        self.retry_pending || self.reconnect_timer.is_some()
    }
}

struct Inner {
    url: String,
    options: ClientOptions,
    policy: ReconnectPolicy,
    connector: Arc<dyn Connector>,
    listeners: ListenerRegistry,
    state: Mutex<ClientState>,
}

/// Shuts the client down once the last public handle is dropped
struct Owner(Arc<Inner>);

impl Drop for Owner {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}

/// Handle to a connection client
///
/// Cloning is cheap; all clones share the same connection. The client is
/// shut down when the last clone is dropped or when [`WsClient::shutdown`]
/// is called.
///
/// Listeners are owned by the client, so a listener that captures a
/// `WsClient` keeps it alive until `shutdown` runs. Capture a
/// [`WeakClient`] from [`WsClient::downgrade`] instead.
#[derive(Clone)]
pub struct WsClient {
    inner: Arc<Inner>,
    _owner: Arc<Owner>,
}

/// Non-owning handle that does not keep the client alive
#[derive(Clone)]
pub struct WeakClient {
    inner: Weak<Inner>,
    owner: Weak<Owner>,
}

impl WeakClient {
    /// The client, unless every `WsClient` handle has been dropped
    pub fn upgrade(&self) -> Option<WsClient> {
        Some(WsClient {
            inner: self.inner.upgrade()?,
            _owner: self.owner.upgrade()?,
        })
    }
}

impl fmt::Debug for WeakClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakClient")
            .field("alive", &(self.owner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for WsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsClient")
            .field("url", &self.inner.url)
            .field("ready_state", &self.ready_state())
            .field("id", &self.id())
            .finish()
    }
}

impl WsClient {
    /// Create a client that connects with `tokio-tungstenite`
    ///
    /// The client is created closed; call [`WsClient::connect`] to open it.
    pub fn new(url: impl Into<String>, options: ClientOptions) -> ClientResult<Self> {
        Self::with_connector(url, options, Arc::new(TungsteniteConnector::new()))
    }

    /// Create a client and start connecting immediately
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn start(url: impl Into<String>, options: ClientOptions) -> ClientResult<Self> {
        let client = Self::new(url, options)?;
        client.connect();
        Ok(client)
    }

    /// Create a client that opens transports through `connector`
    pub fn with_connector(
        url: impl Into<String>,
        options: ClientOptions,
        connector: Arc<dyn Connector>,
    ) -> ClientResult<Self> {
        let url = url.into();
        validate_server_url(&url)?;
        options.validate()?;

        let inner = Arc::new(Inner {
            policy: ReconnectPolicy::from_options(&options),
            url,
            options,
            connector,
            listeners: ListenerRegistry::new(),
            state: Mutex::new(ClientState {
                phase: TransportPhase::Idle,
                id: None,
                epoch: 0,
                commands: None,
                reconnect_attempts: 0,
                reconnect_timer: None,
                retry_pending: false,
                close_requested: false,
                shut_down: false,
            }),
        });

        Ok(Self {
            _owner: Arc::new(Owner(Arc::clone(&inner))),
            inner,
        })
    }

    /// Handle for listeners that need to call back into the client
    pub fn downgrade(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
            owner: Arc::downgrade(&self._owner),
        }
    }

    /// Target address
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Session identity of the current connection, if one was assigned
    pub fn id(&self) -> Option<String> {
        let state = self.inner.lock();
        match state.ready_state() {
            ReadyState::Open | ReadyState::Closing => state.id.clone(),
            _ => None,
        }
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.lock().ready_state()
    }

    /// Consecutive reconnects since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().reconnect_attempts
    }

    /// Whether a reconnect timer is armed
    pub fn is_reconnect_pending(&self) -> bool {
        self.inner.lock().reconnect_timer.is_some()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }

    /// Start a connection attempt
    ///
    /// Does nothing when an attempt is already in flight, the connection is
    /// open or closing, a reconnect is pending, or the client is shut down.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a Tokio runtime.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Send `payload` on `channel`, stamped with the session identity
    ///
    /// Fails only when the payload cannot be serialized. A send while the
    /// connection is not open is dropped and reported through an `error`
    /// event when anyone listens for one.
    pub fn send<T>(&self, channel: &str, payload: &T) -> ClientResult<()>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(payload).map_err(error::invalid_payload)?;
        self.inner.send(channel, payload);
        Ok(())
    }

    /// Send a frame without payload on `channel`
    pub fn send_empty(&self, channel: &str) {
        self.inner.send(channel, Value::Null);
    }

    /// Close the connection with a normal closure
    pub fn close(&self) {
        self.close_with(close_code::NORMAL, "");
    }

    /// Close the connection with a custom code and reason
    ///
    /// Only acts while the connection is open. A close requested here is
    /// never followed by a reconnect.
    pub fn close_with(&self, code: u16, reason: &str) {
        let commands = {
            let mut state = self.inner.lock();
            if state.ready_state() != ReadyState::Open {
                debug!(state = %state.ready_state(), "Ignoring close, connection is not open");
                return;
            }
            let Some(commands) = state.commands.clone() else {
                return;
            };
            state.phase = TransportPhase::Closing;
            state.close_requested = true;
            commands
        };

        info!(url = %self.inner.url, code, reason, "Closing connection");
        let command = Command::Close {
            code,
            reason: reason.to_string(),
        };
        if commands.send(command).is_err() {
            debug!("Transport task already finished");
        }
    }

    /// Tear the client down
    ///
    /// Removes every listener, cancels a pending reconnect and closes the
    /// transport. No event is raised afterwards.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Register a listener
    pub fn on<F>(&self, kind: ClientEventKind, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.on(kind, listener)
    }

    /// Register a listener that runs at most once
    pub fn once<F>(&self, kind: ClientEventKind, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.once(kind, listener)
    }

    /// Remove a listener; returns whether it was registered
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.listeners.off(id)
    }

    pub fn listener_count(&self, kind: ClientEventKind) -> usize {
        self.inner.listeners.listener_count(kind)
    }

    /// Remove every listener without closing the connection
    pub fn remove_all_listeners(&self) {
        self.inner.listeners.remove_all();
    }

    /// Listen for inbound messages as `(channel, sender, payload)`
    pub fn on_message<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str, Option<&str>, Option<&Value>) + Send + Sync + 'static,
    {
        self.on(ClientEventKind::Message, move |event| {
            if let ClientEvent::Message {
                channel,
                sender,
                payload,
            } = event
            {
                listener(channel, sender.as_deref(), payload.as_ref());
            }
        })
    }

    /// Listen for closes as `(reason, code, was_clean)`
    pub fn on_close<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str, u16, bool) + Send + Sync + 'static,
    {
        self.on(ClientEventKind::Close, move |event| {
            if let ClientEvent::Close {
                reason,
                code,
                was_clean,
            } = event
            {
                listener(reason, *code, *was_clean);
            }
        })
    }

    /// Wait until the connection is open and identified
    ///
    /// Resolves immediately when already open. Fails when the client is closed
    /// with no attempt pending, when a close ends the connection without a
    /// reconnect, or when the client is shut down.
    pub async fn wait_for_connect(&self) -> ClientResult<()> {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));

        // Only the listeners hold the sender, so shutdown drops it
        let connect_slot = Arc::clone(&slot);
        let close_slot = slot;
        let _guard = ListenerGuard {
            client: self,
            ids: [
                self.on(ClientEventKind::Connect, move |_| {
                    resolve(&connect_slot, Ok(()));
                }),
                self.on(ClientEventKind::Close, move |event| {
                    if let ClientEvent::Close { code, reason, .. } = event {
                        if *code == close_code::TRY_AGAIN_LATER {
                            resolve(&close_slot, Err(error::reconnect_exhausted()));
                        } else if !is_reconnectable(*code) {
                            resolve(&close_slot, Err(error::connection_closed(*code, reason)));
                        }
                    }
                }),
            ],
        };

        {
            let state = self.inner.lock();
            if state.shut_down {
                return Err(error::client_shut_down());
            }
            match state.ready_state() {
                ReadyState::Open => return Ok(()),
                ReadyState::Closed if !state.will_reconnect() => {
                    return Err(error::not_connecting());
                }
                _ => {}
            }
        }

        rx.await.unwrap_or_else(|_| Err(error::client_shut_down()))
    }
}

/// Removes listeners when a wait finishes or is cancelled
struct ListenerGuard<'a> {
    client: &'a WsClient,
    ids: [ListenerId; 2],
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        for id in self.ids {
            self.client.off(id);
        }
    }
}

fn resolve(slot: &Mutex<Option<oneshot::Sender<ClientResult<()>>>>, outcome: ClientResult<()>) {
    let sender = slot.lock().unwrap_or_else(|e| e.into_inner()).take();
    if let Some(sender) = sender {
        let _ = sender.send(outcome);
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Dispatch `event` if `epoch` is still current
    fn emit(&self, epoch: u64, event: ClientEvent) {
        if !self.lock().is_current(epoch) {
            trace!(epoch, kind = %event.kind(), "Suppressing event from stale attempt");
            return;
        }
        let delivered = self
            .listeners
            .emit_while(&event, || self.lock().is_current(epoch));
        trace!(kind = %event.kind(), delivered, "Event dispatched");
    }

    /// Raise an `error` event, only when someone listens for it
    fn emit_error(&self, epoch: u64, message: impl Into<String>) {
        if self.listeners.listener_count(ClientEventKind::Error) == 0 {
            return;
        }
        self.emit(
            epoch,
            ClientEvent::Error {
                message: message.into(),
            },
        );
    }

    fn connect(self: &Arc<Self>) {
        let epoch = {
            let mut state = self.lock();
            if state.shut_down {
                debug!("Ignoring connect, client is shut down");
                return;
            }
            if state.reconnect_timer.is_some() {
                debug!("Ignoring connect, reconnect already scheduled");
                return;
            }
            if state.ready_state() != ReadyState::Closed {
                debug!(state = %state.ready_state(), "Ignoring connect, attempt already active");
                return;
            }

            state.epoch += 1;
            state.id = None;
            state.phase = TransportPhase::Connecting;
            state.close_requested = false;
            state.retry_pending = false;
            state.epoch
        };

        info!(url = %self.url, epoch, "Connecting");
        self.emit(epoch, ClientEvent::Connecting);

        // A connecting listener may have shut the client down
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.lock();
            if !state.is_current(epoch) {
                return;
            }
            state.commands = Some(tx);
        }
        tokio::spawn(drive(Arc::clone(self), epoch, rx));
    }

    fn send(&self, channel: &str, payload: Value) {
        let (epoch, sent) = {
            let state = self.lock();
            let sent = match (state.ready_state(), &state.commands) {
                (ReadyState::Open, Some(commands)) => {
                    let frame = Envelope::new(channel, state.id.clone())
                        .with_payload(payload)
                        .encode();
                    trace!(channel, "Queueing frame");
                    commands.send(Command::Send(frame)).is_ok()
                }
                (ready_state, _) => {
                    warn!(channel, state = %ready_state, "Dropping send, connection is not open");
                    false
                }
            };
            (state.epoch, sent)
        };

        if !sent {
            self.emit_error(epoch, format!("Cannot send on '{}': not connected", channel));
        }
    }

    fn shutdown(&self) {
        let (timer, commands) = {
            let mut state = self.lock();
            if state.shut_down {
                return;
            }
            state.shut_down = true;
            state.epoch += 1;
            state.phase = TransportPhase::Closed;
            state.id = None;
            state.retry_pending = false;
            (state.reconnect_timer.take(), state.commands.take())
        };

        self.listeners.remove_all();
        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(commands) = commands {
            let _ = commands.send(Command::Shutdown);
        }
        info!(url = %self.url, "Client shut down");
    }

    /// Mark the transport open; returns false when the attempt is stale
    fn handle_open(&self, epoch: u64) -> bool {
        let mut state = self.lock();
        if !state.is_current(epoch) {
            return false;
        }
        state.phase = TransportPhase::Open;
        state.reconnect_attempts = 0;
        info!(url = %self.url, epoch, "Transport open, waiting for identity");
        true
    }

    fn handle_frame(&self, epoch: u64, data: &[u8]) {
        if data.is_empty() {
            trace!("Ignoring empty frame");
            return;
        }

        let envelope = match Envelope::decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        if envelope.is_init() {
            let Some(id) = envelope.sender else {
                warn!("Dropping init frame without identity");
                return;
            };
            {
                let mut state = self.lock();
                if !state.is_current(epoch) {
                    return;
                }
                if let Some(current) = &state.id {
                    warn!(current = %current, ignored = %id, "Ignoring repeated init frame");
                    return;
                }
                state.id = Some(id.clone());
            }
            info!(client_id = %id, "Session identity assigned");
            self.emit(epoch, ClientEvent::Connect);
            return;
        }

        let identified = {
            let state = self.lock();
            state.is_current(epoch) && state.id.is_some()
        };
        if !identified {
            debug!(channel = %envelope.channel, "Dropping frame received before identity");
            return;
        }

        self.emit(
            epoch,
            ClientEvent::Message {
                channel: envelope.channel,
                sender: envelope.sender,
                payload: envelope.payload,
            },
        );
    }

    fn handle_close(self: &Arc<Self>, epoch: u64, info: CloseInfo) {
        let decision = {
            let mut state = self.lock();
            if !state.is_current(epoch) {
                return;
            }
            state.phase = TransportPhase::Closed;
            state.commands = None;

            let decision = if state.close_requested {
                ReconnectDecision::Stop
            } else {
                self.policy.decide(info.code, &mut state.reconnect_attempts)
            };
            state.close_requested = false;
            state.retry_pending = matches!(decision, ReconnectDecision::Retry { .. });
            decision
        };

        let reason = describe_close(info.code, &info.reason);
        info!(url = %self.url, code = info.code, reason = %reason, was_clean = info.was_clean, "Connection closed");
        self.emit(
            epoch,
            ClientEvent::Close {
                reason,
                code: info.code,
                was_clean: info.was_clean,
            },
        );

        match decision {
            ReconnectDecision::Retry { attempt, delay } => {
                self.schedule_reconnect(epoch, attempt, delay)
            }
            ReconnectDecision::GiveUp { attempts } => {
                warn!(url = %self.url, attempts, "Reconnect attempts exhausted, giving up");
                self.emit(
                    epoch,
                    ClientEvent::Close {
                        reason: close_reason(close_code::TRY_AGAIN_LATER).to_string(),
                        code: close_code::TRY_AGAIN_LATER,
                        was_clean: false,
                    },
                );
            }
            ReconnectDecision::Stop => {}
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, epoch: u64, attempt: u32, delay: Duration) {
        let mut state = self.lock();
        state.retry_pending = false;
        // A close listener may have reconnected or shut down already
        if !state.is_current(epoch) || state.reconnect_timer.is_some() {
            return;
        }
        if state.phase != TransportPhase::Closed {
            return;
        }

        info!(url = %self.url, attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        let inner = Arc::clone(self);
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire_reconnect(epoch);
        }));
    }

    fn fire_reconnect(self: &Arc<Self>, epoch: u64) {
        {
            let mut state = self.lock();
            if !state.is_current(epoch) {
                return;
            }
            state.reconnect_timer = None;
        }
        debug!(epoch, "Reconnect timer fired");
        self.connect();
    }
}

/// Drive one transport attempt from handshake to close
async fn drive(inner: Arc<Inner>, epoch: u64, mut commands: mpsc::UnboundedReceiver<Command>) {
    let handshake_timeout = inner.options.timeout_interval();
    let handshake = tokio::select! {
        result = timeout(handshake_timeout, inner.connector.connect(&inner.url)) => result,
        // Nothing but a shutdown reaches a transport that is not open yet
        _ = commands.recv() => {
            debug!(epoch, "Attempt abandoned during handshake");
            return;
        }
    };

    let mut transport = match handshake {
        Ok(Ok(transport)) => transport,
        Ok(Err(e)) => {
            warn!(url = %inner.url, error = %e, "Transport handshake failed");
            inner.emit_error(epoch, e.to_string());
            inner.handle_close(epoch, CloseInfo::abnormal());
            return;
        }
        Err(_) => {
            warn!(
                url = %inner.url,
                timeout_ms = handshake_timeout.as_millis() as u64,
                "Transport handshake timed out"
            );
            inner.handle_close(
                epoch,
                CloseInfo::new(close_code::HANDSHAKE_TIMEOUT, "", false),
            );
            return;
        }
    };

    if !inner.handle_open(epoch) {
        let _ = transport.close(close_code::NORMAL, "").await;
        return;
    }

    let period = inner.options.ping_interval();
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let close = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(frame)) => {
                    if let Err(e) = transport.send(frame).await {
                        warn!(error = %e, "Failed to write frame");
                        inner.emit_error(epoch, e.to_string());
                        break CloseInfo::abnormal();
                    }
                }
                Some(Command::Close { code, reason }) => {
                    break close_transport(transport.as_mut(), code, &reason, handshake_timeout).await;
                }
                Some(Command::Shutdown) | None => {
                    let _ = transport.close(close_code::NORMAL, "").await;
                    debug!(epoch, "Transport released on shutdown");
                    return;
                }
            },
            _ = heartbeat.tick() => {
                trace!(epoch, "Sending heartbeat");
                if let Err(e) = transport.send(String::new()).await {
                    warn!(error = %e, "Failed to write heartbeat");
                    inner.emit_error(epoch, e.to_string());
                    break CloseInfo::abnormal();
                }
            }
            event = transport.next_event() => match event {
                TransportEvent::Frame(data) => inner.handle_frame(epoch, &data),
                TransportEvent::Closed(info) => break info,
                TransportEvent::Error(message) => {
                    warn!(error = %message, "Transport error");
                    inner.emit_error(epoch, message);
                    break CloseInfo::abnormal();
                }
            },
        }
    };

    inner.handle_close(epoch, close);
}

/// Run the closing handshake, waiting up to `wait` for the peer
async fn close_transport(
    transport: &mut dyn Transport,
    code: u16,
    reason: &str,
    wait: Duration,
) -> CloseInfo {
    if let Err(e) = transport.close(code, reason).await {
        warn!(error = %e, "Failed to send close frame");
        return CloseInfo::new(code, reason, false);
    }

    let drained = timeout(wait, async {
        loop {
            match transport.next_event().await {
                TransportEvent::Closed(info) => return info,
                TransportEvent::Error(_) => return CloseInfo::new(code, reason, false),
                TransportEvent::Frame(_) => trace!("Dropping frame received while closing"),
            }
        }
    })
    .await;

    drained.unwrap_or_else(|_| {
        debug!(code, "Peer did not finish the closing handshake");
        CloseInfo::new(code, reason, false)
    })
}
