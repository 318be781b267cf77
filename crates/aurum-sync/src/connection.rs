//! # Connection Manager
//!
//! WebSocket channel lifecycle: health probe, connect, authenticate,
//! bounded reconnection with exponential backoff.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Channel Connection States                           │
//! │                                                                         │
//! │                 connect()     ┌──────────────┐                          │
//! │  ┌──────┐    ─────────────►   │HealthChecking│                          │
//! │  │ Idle │                     └──────┬───────┘                          │
//! │  └──────┘                            │ probe ok                         │
//! │     ▲  ▲    probe failed             ▼                                  │
//! │     │  └──── (first try)      ┌──────────────┐                          │
//! │     │                         │  Connecting  │                          │
//! │     │ attempts                └──────┬───────┘                          │
//! │     │ exhausted            success   │   failure                        │
//! │     │                        ┌───────┴───────┐                          │
//! │     │                        ▼               ▼                          │
//! │     │                 ┌────────────┐  ┌─────────────┐                   │
//! │     │                 │ Connected  │  │Reconnecting │ ◄─┐               │
//! │     │                 └─────┬──────┘  └──────┬──────┘   │               │
//! │     │                       │ lost           │ delay    │               │
//! │     │                       └───────────────►│ expired  │               │
//! │     └────────────────────────────────────────┴──────────┘               │
//! │                                                                         │
//! │  ┌──────────┐  disable() from any state; enable() returns to Idle      │
//! │  │ Disabled │                                                           │
//! │  └──────────┘                                                           │
//! │                                                                         │
//! │  BACKOFF STRATEGY (Exponential, bounded attempts)                       │
//! │  ────────────────────────────────────────────────                       │
//! │  Attempt 1: base × 1   (2s with defaults)                               │
//! │  Attempt 2: base × 2   (4s)                                             │
//! │  Attempt 3: base × 4   (8s)                                             │
//! │  After max_attempts: give up until reset()/enable()                     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every (re)connect attempt starts with an HTTP health probe. A probe
//! failure on a fresh user-initiated connect abandons quietly back to Idle;
//! a probe failure inside a reconnect cycle burns an attempt like any other
//! connection failure.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{ChannelEvent, OutboundEvent};

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, no attempt in progress.
    Idle,
    /// Probing server reachability before connecting.
    HealthChecking,
    /// WebSocket handshake in progress.
    Connecting,
    /// Channel open and ready.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Connects refused until `enable()`.
    Disabled,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::HealthChecking => write!(f, "health-checking"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Disabled => write!(f, "disabled"),
        }
    }
}

// =============================================================================
// Reconnect Policy
// =============================================================================

/// Bounded exponential backoff.
///
/// Delay for the Nth attempt is `base_delay_ms × 2^(N-1)`. The counter only
/// clears on a successful connection or an explicit `reset()`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Attempts consumed since the last successful connection.
    pub attempt: u32,

    /// Attempts allowed before giving up.
    pub max_attempts: u32,

    /// First-attempt delay in milliseconds.
    pub base_delay_ms: u64,

    /// Delay computed for the most recent attempt.
    pub current_delay_ms: u64,
}

impl ReconnectPolicy {
    /// Creates a fresh policy with no attempts consumed.
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        ReconnectPolicy {
            attempt: 0,
            max_attempts,
            base_delay_ms,
            current_delay_ms: base_delay_ms,
        }
    }

    /// Consumes one attempt and returns the delay to wait before it.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u64.checked_shl(self.attempt).unwrap_or(u64::MAX);
        self.current_delay_ms = self.base_delay_ms.saturating_mul(factor);
        self.attempt += 1;
        Duration::from_millis(self.current_delay_ms)
    }

    /// Returns true once every allowed attempt has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Clears the attempt counter and delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_delay_ms = self.base_delay_ms;
    }
}

// =============================================================================
// Reachability Probe
// =============================================================================

/// Pre-connect server reachability check.
///
/// Trait seam so tests can swap in a canned probe without a server.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Resolves Ok when the server answered healthy.
    async fn check(&self) -> SyncResult<()>;
}

/// Probes the backend health endpoint over HTTP.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        HttpProbe {
            client,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    async fn check(&self) -> SyncResult<()> {
        let response = timeout(self.timeout, self.client.get(&self.url).send())
            .await
            .map_err(|_| SyncError::ProbeTimeout(self.timeout.as_secs()))??;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(SyncError::ProbeFailed(format!(
                "status {}",
                response.status()
            )))
        }
    }
}

// =============================================================================
// Connection Configuration
// =============================================================================

/// Configuration for the connection manager.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL of the realtime channel.
    pub channel_url: String,

    /// Handshake timeout.
    pub connect_timeout: Duration,

    /// First-attempt backoff delay in milliseconds.
    pub base_delay_ms: u64,

    /// Reconnect attempts allowed before giving up.
    pub max_attempts: u32,

    /// Keepalive ping interval.
    pub ping_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            channel_url: String::new(),
            connect_timeout: Duration::from_secs(15),
            base_delay_ms: 2000,
            max_attempts: 3,
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    /// Derives the connection configuration from the loaded sync config.
    pub fn from_sync_config(config: &SyncConfig) -> Self {
        ConnectionConfig {
            channel_url: config.channel_url(),
            connect_timeout: config.channel.connect_timeout(),
            base_delay_ms: config.channel.base_delay_ms,
            max_attempts: config.channel.max_attempts,
            ping_interval: config.channel.ping_interval(),
        }
    }
}

// =============================================================================
// Connection Status (UI surface)
// =============================================================================

/// Point-in-time connection status for display layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub is_connected: bool,

    /// True while a reconnect cycle is in progress, including the probe and
    /// handshake phases of a retry.
    pub is_reconnecting: bool,

    pub attempt: u32,
    pub max_attempts: u32,
}

// =============================================================================
// Commands
// =============================================================================

enum Command {
    Connect { auth_token: Option<String> },
    Disconnect,
    Emit(OutboundEvent),
    Reset,
    Enable,
    Disable,
    Shutdown,
}

// =============================================================================
// Connection Handle
// =============================================================================

/// Handle for driving the connection manager from other components.
#[derive(Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<Command>,
    state: Arc<RwLock<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    policy: Arc<RwLock<ReconnectPolicy>>,
}

impl ConnectionHandle {
    /// Requests a connection. No-op while already connected or mid-attempt.
    pub async fn connect(&self) -> SyncResult<()> {
        self.send_cmd(Command::Connect { auth_token: None }).await
    }

    /// Requests a connection that authenticates right after the handshake.
    pub async fn connect_with_token(&self, token: impl Into<String>) -> SyncResult<()> {
        self.send_cmd(Command::Connect {
            auth_token: Some(token.into()),
        })
        .await
    }

    /// Closes the channel and returns to Idle without retrying.
    pub async fn disconnect(&self) -> SyncResult<()> {
        self.send_cmd(Command::Disconnect).await
    }

    /// Sends an event up the channel.
    ///
    /// Delivery is best-effort: when the channel is not connected the event
    /// is dropped with a warning at call time, never queued for later.
    pub async fn emit(&self, event: OutboundEvent) -> SyncResult<()> {
        if *self.state.read().await != ConnectionState::Connected {
            warn!(event = %event.event_name(), "Dropping event, channel not connected");
            return Ok(());
        }
        self.send_cmd(Command::Emit(event)).await
    }

    /// Clears the reconnect attempt counter and cancels a pending backoff.
    pub async fn reset(&self) -> SyncResult<()> {
        self.send_cmd(Command::Reset).await
    }

    /// Lifts a previous `disable()` and restores the reconnect attempt
    /// budget.
    pub async fn enable(&self) -> SyncResult<()> {
        self.send_cmd(Command::Enable).await
    }

    /// Tears down any connection and refuses connects until `enable()`.
    pub async fn disable(&self) -> SyncResult<()> {
        self.send_cmd(Command::Disable).await
    }

    /// Stops the manager task.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.send_cmd(Command::Shutdown).await
    }

    /// Returns the current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Returns true if the channel is open.
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Returns a watch over connection state transitions.
    ///
    /// Receivers observe every settled state; a burst of transitions may be
    /// coalesced into the latest one.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Returns the status summary for display layers.
    pub async fn status(&self) -> ConnectionStatus {
        let state = *self.state.read().await;
        let policy = self.policy.read().await;
        ConnectionStatus {
            is_connected: state == ConnectionState::Connected,
            is_reconnecting: state == ConnectionState::Reconnecting
                || (policy.attempt > 0
                    && matches!(
                        state,
                        ConnectionState::HealthChecking | ConnectionState::Connecting
                    )),
            attempt: policy.attempt,
            max_attempts: policy.max_attempts,
        }
    }

    async fn send_cmd(&self, cmd: Command) -> SyncResult<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SyncError::ChannelError("Connection manager task gone".into()))
    }
}

// =============================================================================
// Internal loop outcomes
// =============================================================================

enum CycleEnd {
    Idle,
    Disabled,
    Shutdown,
}

enum DisconnectKind {
    Local,
    Lost,
    Disabled,
    Shutdown,
}

enum BackoffOutcome {
    Retry,
    GiveUp,
    Idle,
    Disabled,
    Shutdown,
}

// =============================================================================
// Connection Manager
// =============================================================================

/// WebSocket channel manager with probe-gated, bounded reconnection.
///
/// ## Usage
/// ```rust,ignore
/// let config = ConnectionConfig {
///     channel_url: "wss://shop.example.com/realtime".into(),
///     ..Default::default()
/// };
/// let probe = Arc::new(HttpProbe::new(client, "https://shop.example.com/api/health", timeout));
///
/// let (handle, mut inbound_rx) = ConnectionManager::spawn(config, probe);
/// handle.connect_with_token("jwt").await?;
///
/// while let Some(event) = inbound_rx.recv().await {
///     println!("event: {}", event.event_name());
/// }
/// ```
pub struct ConnectionManager {
    config: ConnectionConfig,
    probe: Arc<dyn ReachabilityProbe>,
    state: Arc<RwLock<ConnectionState>>,
    state_tx: watch::Sender<ConnectionState>,
    policy: Arc<RwLock<ReconnectPolicy>>,
    cmd_rx: mpsc::Receiver<Command>,
    inbound_tx: mpsc::Sender<ChannelEvent>,
}

impl ConnectionManager {
    /// Creates the manager and spawns its background task.
    ///
    /// Returns a handle for commands and a receiver for inbound events.
    pub fn spawn(
        config: ConnectionConfig,
        probe: Arc<dyn ReachabilityProbe>,
    ) -> (ConnectionHandle, mpsc::Receiver<ChannelEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ChannelEvent>(256);
        let state = Arc::new(RwLock::new(ConnectionState::Idle));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let policy = Arc::new(RwLock::new(ReconnectPolicy::new(
            config.max_attempts,
            config.base_delay_ms,
        )));

        let manager = ConnectionManager {
            config,
            probe,
            state: state.clone(),
            state_tx,
            policy: policy.clone(),
            cmd_rx,
            inbound_tx,
        };

        // Spawn background task
        tokio::spawn(manager.run());

        let handle = ConnectionHandle {
            cmd_tx,
            state,
            state_rx,
            policy,
        };

        (handle, inbound_rx)
    }

    /// Main manager loop: waits for commands while idle or disabled.
    async fn run(mut self) {
        info!(url = %self.config.channel_url, "Connection manager starting");

        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Command::Connect { auth_token } => {
                    if *self.state.read().await == ConnectionState::Disabled {
                        warn!("Connect refused, channel is disabled");
                        continue;
                    }
                    if self.policy.read().await.is_exhausted() {
                        warn!("Connect refused, reconnect attempts exhausted (reset required)");
                        continue;
                    }
                    match self.connect_cycle(auth_token).await {
                        CycleEnd::Shutdown => break,
                        CycleEnd::Idle | CycleEnd::Disabled => {}
                    }
                }
                Command::Emit(event) => {
                    warn!(event = %event.event_name(), "Dropping event, channel not connected");
                }
                Command::Disconnect => {
                    // Already idle or disabled, nothing to close.
                }
                Command::Reset => {
                    self.policy.write().await.reset();
                    debug!("Reconnect policy reset");
                }
                Command::Enable => {
                    // Enabling also hands back a full attempt budget, so an
                    // exhausted channel can connect again without a reset.
                    self.policy.write().await.reset();
                    if *self.state.read().await == ConnectionState::Disabled {
                        self.set_state(ConnectionState::Idle).await;
                        info!("Channel enabled");
                    }
                }
                Command::Disable => {
                    self.set_state(ConnectionState::Disabled).await;
                    info!("Channel disabled");
                }
                Command::Shutdown => break,
            }
        }

        self.set_state(ConnectionState::Idle).await;
        info!("Connection manager stopped");
    }

    /// One connect cycle: probe, connect, stay connected, retry on loss.
    ///
    /// Returns only when the cycle lands back in a resting state.
    async fn connect_cycle(&mut self, auth_token: Option<String>) -> CycleEnd {
        let mut first_try = true;

        loop {
            // ---- Health probe ----
            self.set_state(ConnectionState::HealthChecking).await;
            if let Err(e) = self.probe.check().await {
                if first_try {
                    // Fresh user-initiated connect against an unreachable
                    // server: abandon without burning retry attempts.
                    warn!(error = %e, "Server unreachable, connect abandoned");
                    self.set_state(ConnectionState::Idle).await;
                    return CycleEnd::Idle;
                }
                warn!(error = %e, "Health probe failed during reconnect");
                match self.backoff_or_give_up().await {
                    BackoffOutcome::Retry => continue,
                    BackoffOutcome::GiveUp | BackoffOutcome::Idle => {
                        self.set_state(ConnectionState::Idle).await;
                        return CycleEnd::Idle;
                    }
                    BackoffOutcome::Disabled => {
                        self.set_state(ConnectionState::Disabled).await;
                        return CycleEnd::Disabled;
                    }
                    BackoffOutcome::Shutdown => return CycleEnd::Shutdown,
                }
            }

            // ---- Connect ----
            self.set_state(ConnectionState::Connecting).await;
            match self.connect_with_timeout().await {
                Ok(ws_stream) => {
                    info!("Realtime channel connected");
                    self.policy.write().await.reset();

                    match self.connected_loop(ws_stream, &auth_token).await {
                        DisconnectKind::Local => {
                            self.set_state(ConnectionState::Idle).await;
                            return CycleEnd::Idle;
                        }
                        DisconnectKind::Disabled => {
                            self.set_state(ConnectionState::Disabled).await;
                            return CycleEnd::Disabled;
                        }
                        DisconnectKind::Shutdown => return CycleEnd::Shutdown,
                        DisconnectKind::Lost => {
                            // Fall through to backoff and retry.
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Channel connect failed");
                }
            }

            first_try = false;
            match self.backoff_or_give_up().await {
                BackoffOutcome::Retry => continue,
                BackoffOutcome::GiveUp | BackoffOutcome::Idle => {
                    self.set_state(ConnectionState::Idle).await;
                    return CycleEnd::Idle;
                }
                BackoffOutcome::Disabled => {
                    self.set_state(ConnectionState::Disabled).await;
                    return CycleEnd::Disabled;
                }
                BackoffOutcome::Shutdown => return CycleEnd::Shutdown,
            }
        }
    }

    /// Connects with timeout.
    async fn connect_with_timeout(
        &self,
    ) -> SyncResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
        let connect_future = connect_async(&self.config.channel_url);

        match timeout(self.config.connect_timeout, connect_future).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "Channel handshake complete");
                Ok(ws_stream)
            }
            Ok(Err(e)) => Err(SyncError::from(e)),
            Err(_) => Err(SyncError::ConnectTimeout(
                self.config.connect_timeout.as_secs(),
            )),
        }
    }

    /// Runs the open channel: commands out, events in, keepalive pings.
    async fn connected_loop(
        &mut self,
        ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        auth_token: &Option<String>,
    ) -> DisconnectKind {
        let (mut write, mut read) = ws_stream.split();

        // Authenticate goes out before the state flips to Connected.
        if let Some(token) = auth_token {
            match OutboundEvent::authenticate(token.clone()).to_json() {
                Ok(json) => {
                    if let Err(e) = write.send(WsMessage::Text(json.into())).await {
                        warn!(error = %e, "Failed to send authenticate");
                        return DisconnectKind::Lost;
                    }
                }
                Err(e) => warn!(error = %e, "Failed to encode authenticate"),
            }
        }
        self.set_state(ConnectionState::Connected).await;

        let mut ping_interval = tokio::time::interval(self.config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Handle commands
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Emit(event)) => {
                        let json = match event.to_json() {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(error = %e, "Failed to encode event");
                                continue;
                            }
                        };
                        debug!(event = %event.event_name(), "Sending event");
                        if let Err(e) = write.send(WsMessage::Text(json.into())).await {
                            warn!(error = %e, "Send failed, channel lost");
                            return DisconnectKind::Lost;
                        }
                    }
                    Some(Command::Disconnect) => {
                        info!("Closing channel on request");
                        let _ = write.send(WsMessage::Close(None)).await;
                        return DisconnectKind::Local;
                    }
                    Some(Command::Disable) => {
                        info!("Closing channel, disabled");
                        let _ = write.send(WsMessage::Close(None)).await;
                        return DisconnectKind::Disabled;
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        return DisconnectKind::Shutdown;
                    }
                    Some(Command::Connect { .. }) => {
                        debug!("Connect requested while already connected, ignoring");
                    }
                    Some(Command::Reset) => {
                        self.policy.write().await.reset();
                    }
                    Some(Command::Enable) => {}
                },

                // Handle inbound frames
                item = read.next() => match item {
                    Some(Ok(WsMessage::Text(text))) => {
                        match ChannelEvent::from_json(&text) {
                            Ok(event) => {
                                debug!(event = %event.event_name(), "Received event");
                                if self.inbound_tx.send(event).await.is_err() {
                                    warn!("Inbound event receiver dropped");
                                    return DisconnectKind::Shutdown;
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "Ignoring unparseable event");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if write.send(WsMessage::Pong(data)).await.is_err() {
                            return DisconnectKind::Lost;
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        debug!("Received pong");
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(?frame, "Server closed the channel");
                        return DisconnectKind::Lost;
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        warn!("Ignoring unexpected binary message");
                    }
                    Some(Ok(WsMessage::Frame(_))) => {
                        // Raw frame, ignore
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Channel error");
                        return DisconnectKind::Lost;
                    }
                    None => {
                        info!("Channel stream ended");
                        return DisconnectKind::Lost;
                    }
                },

                // Send periodic pings
                _ = ping_interval.tick() => {
                    if write.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        return DisconnectKind::Lost;
                    }
                    debug!("Sent ping");
                }
            }
        }
    }

    /// Consumes one attempt and waits out the backoff delay, or gives up.
    ///
    /// Commands arriving mid-wait can cancel the cycle.
    async fn backoff_or_give_up(&mut self) -> BackoffOutcome {
        let (delay, attempt) = {
            let mut policy = self.policy.write().await;
            if policy.is_exhausted() {
                error!(
                    max_attempts = policy.max_attempts,
                    "Reconnect attempts exhausted, giving up"
                );
                return BackoffOutcome::GiveUp;
            }
            let delay = policy.next_delay();
            (delay, policy.attempt)
        };

        self.set_state(ConnectionState::Reconnecting).await;
        debug!(?delay, attempt, "Waiting before reconnect");

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return BackoffOutcome::Retry,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Disconnect) => return BackoffOutcome::Idle,
                    Some(Command::Disable) => return BackoffOutcome::Disabled,
                    Some(Command::Shutdown) | None => return BackoffOutcome::Shutdown,
                    Some(Command::Reset) => {
                        self.policy.write().await.reset();
                        return BackoffOutcome::Idle;
                    }
                    Some(Command::Emit(event)) => {
                        warn!(event = %event.event_name(), "Dropping event, channel not connected");
                    }
                    Some(Command::Connect { .. }) => {
                        debug!("Connect requested while already reconnecting, ignoring");
                    }
                    Some(Command::Enable) => {}
                },
            }
        }
    }

    async fn set_state(&self, new_state: ConnectionState) {
        let mut state = self.state.write().await;
        if *state != new_state {
            debug!(from = %*state, to = %new_state, "Connection state changed");
            *state = new_state;
            let _ = self.state_tx.send(new_state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OkProbe;

    #[async_trait]
    impl ReachabilityProbe for OkProbe {
        async fn check(&self) -> SyncResult<()> {
            Ok(())
        }
    }

    struct FailProbe;

    #[async_trait]
    impl ReachabilityProbe for FailProbe {
        async fn check(&self) -> SyncResult<()> {
            Err(SyncError::ProbeFailed("server down".into()))
        }
    }

    /// Answers healthy after a fixed delay, holding the manager in
    /// HealthChecking meanwhile.
    struct SlowProbe(Duration);

    #[async_trait]
    impl ReachabilityProbe for SlowProbe {
        async fn check(&self) -> SyncResult<()> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    /// Local WebSocket server that counts completed handshakes and then
    /// holds each connection open.
    async fn spawn_ws_server() -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handshakes = Arc::new(AtomicUsize::new(0));
        let counter = handshakes.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let counter = counter.clone();
                tokio::spawn(async move {
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                        counter.fetch_add(1, Ordering::SeqCst);
                        while let Some(Ok(_)) = ws.next().await {}
                    }
                });
            }
        });

        (format!("ws://{}", addr), handshakes)
    }

    /// Local WebSocket server that records every text frame it receives.
    async fn spawn_recording_ws_server() -> (String, Arc<std::sync::Mutex<Vec<String>>>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frames: Arc<std::sync::Mutex<Vec<String>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = frames.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let sink = sink.clone();
                tokio::spawn(async move {
                    if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                        while let Some(Ok(msg)) = ws.next().await {
                            if let WsMessage::Text(text) = msg {
                                sink.lock().unwrap().push(text.as_str().to_owned());
                            }
                        }
                    }
                });
            }
        });

        (format!("ws://{}", addr), frames)
    }

    fn test_config(channel_url: String) -> ConnectionConfig {
        ConnectionConfig {
            channel_url,
            connect_timeout: Duration::from_secs(5),
            base_delay_ms: 10,
            max_attempts: 2,
            ping_interval: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let mut policy = ReconnectPolicy::new(3, 2000);
        assert_eq!(policy.next_delay(), Duration::from_millis(2000));
        assert_eq!(policy.next_delay(), Duration::from_millis(4000));
        assert_eq!(policy.next_delay(), Duration::from_millis(8000));
        assert!(policy.is_exhausted());

        policy.reset();
        assert_eq!(policy.attempt, 0);
        assert_eq!(policy.next_delay(), Duration::from_millis(2000));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::HealthChecking.to_string(), "health-checking");
        assert_eq!(ConnectionState::Disabled.to_string(), "disabled");
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_handshake() {
        let (url, handshakes) = spawn_ws_server().await;
        let (handle, _inbound) = ConnectionManager::spawn(test_config(url), Arc::new(OkProbe));

        handle.connect().await.unwrap();
        handle.connect().await.unwrap();
        handle.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(handshakes.load(Ordering::SeqCst), 1);
        assert!(handle.is_connected().await);

        let status = handle.status().await;
        assert!(status.is_connected);
        assert!(!status.is_reconnecting);
        assert_eq!(status.attempt, 0);
    }

    #[tokio::test]
    async fn test_initial_probe_failure_abandons_to_idle() {
        let (url, handshakes) = spawn_ws_server().await;
        let (handle, _inbound) = ConnectionManager::spawn(test_config(url), Arc::new(FailProbe));

        handle.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(handle.state().await, ConnectionState::Idle);
        assert_eq!(handshakes.load(Ordering::SeqCst), 0);
        // No retry attempts were burned by the abandoned connect.
        assert_eq!(handle.status().await.attempt, 0);
    }

    #[tokio::test]
    async fn test_disable_refuses_connect_until_enable() {
        let (url, handshakes) = spawn_ws_server().await;
        let (handle, _inbound) = ConnectionManager::spawn(test_config(url), Arc::new(OkProbe));

        handle.disable().await.unwrap();
        handle.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.state().await, ConnectionState::Disabled);
        assert_eq!(handshakes.load(Ordering::SeqCst), 0);

        handle.enable().await.unwrap();
        handle.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(handshakes.load(Ordering::SeqCst), 1);
        assert!(handle.is_connected().await);
    }

    #[tokio::test]
    async fn test_exhaustion_gives_up_until_reset() {
        // Bind then drop a listener so the port refuses connections.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let (handle, _inbound) = ConnectionManager::spawn(test_config(url), Arc::new(OkProbe));

        handle.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let status = handle.status().await;
        assert_eq!(handle.state().await, ConnectionState::Idle);
        assert_eq!(status.attempt, 2);
        assert!(!status.is_connected);

        // Exhausted: further connects are refused outright.
        handle.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.state().await, ConnectionState::Idle);

        handle.reset().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status().await.attempt, 0);
    }

    #[tokio::test]
    async fn test_enable_restores_attempt_budget() {
        // Burn the whole budget against a dead port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        drop(listener);

        let (handle, _inbound) = ConnectionManager::spawn(test_config(url), Arc::new(OkProbe));
        handle.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.status().await.attempt, 2);

        handle.disable().await.unwrap();
        handle.enable().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // No reset() was issued; enable alone cleared the counter.
        assert_eq!(handle.status().await.attempt, 0);
        assert_eq!(handle.state().await, ConnectionState::Idle);

        // A fresh connect is admitted and burns fresh attempts rather than
        // being refused as exhausted.
        handle.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.status().await.attempt, 2);
    }

    #[tokio::test]
    async fn test_emit_before_connected_is_dropped_not_queued() {
        let (url, frames) = spawn_recording_ws_server().await;
        let (handle, _inbound) = ConnectionManager::spawn(
            test_config(url),
            Arc::new(SlowProbe(Duration::from_millis(200))),
        );

        handle.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.state().await, ConnectionState::HealthChecking);

        // Emitted mid-probe: dropped at call time, never delivered later.
        handle
            .emit(OutboundEvent::JoinRoom {
                room: "catalog".into(),
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(handle.is_connected().await);
        assert!(frames.lock().unwrap().is_empty());

        // The same emit goes through once connected.
        handle
            .emit(OutboundEvent::JoinRoom {
                room: "catalog".into(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(frames.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_state_changes_surface_connected_transitions() {
        let (url, _handshakes) = spawn_ws_server().await;
        let (handle, _inbound) = ConnectionManager::spawn(test_config(url), Arc::new(OkProbe));
        let mut states = handle.state_changes();
        assert_eq!(*states.borrow(), ConnectionState::Idle);

        handle.connect().await.unwrap();
        let reached = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                states.changed().await.unwrap();
                if *states.borrow_and_update() == ConnectionState::Connected {
                    break;
                }
            }
        })
        .await;
        assert!(reached.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_returns_to_idle() {
        let (url, handshakes) = spawn_ws_server().await;
        let (handle, _inbound) = ConnectionManager::spawn(test_config(url), Arc::new(OkProbe));

        handle.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(handle.is_connected().await);

        handle.disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.state().await, ConnectionState::Idle);
        assert_eq!(handshakes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_emit_while_idle_is_dropped_not_fatal() {
        let (url, _handshakes) = spawn_ws_server().await;
        let (handle, _inbound) = ConnectionManager::spawn(test_config(url), Arc::new(OkProbe));

        let result = handle
            .emit(OutboundEvent::JoinRoom {
                room: "catalog".into(),
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(handle.state().await, ConnectionState::Idle);
    }
}
