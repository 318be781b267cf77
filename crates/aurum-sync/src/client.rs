//! # Realtime Client
//!
//! Composition root. Wires the channel, the event bus, the poller, and the
//! cart reconciler together behind one handle the app embeds.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         RealtimeClient                           │
//! │                                                                  │
//! │  ConnectionManager ──inbound──▶ router task ──▶ EventBus         │
//! │        ▲                                          │              │
//! │        │ commands                     bridge listeners           │
//! │        │                                          │              │
//! │   app calls                     ┌─────────────────┴────────┐     │
//! │                                 ▼                          ▼     │
//! │                        DifferentialPoller          CartReconciler│
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The bridge listeners registered by [`RealtimeClient::start`] are what
//! make push and poll cooperate: every `*-update` broadcast kicks the
//! poller for its domain (off-schedule, without touching the cadence), and
//! every cart room event is folded straight into the local cart. A
//! connection watcher re-joins the remembered user room every time the
//! channel comes back up.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use aurum_core::DataDomain;

use crate::bus::{EventBus, ListenerId};
use crate::config::SyncConfig;
use crate::connection::{
    ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState, ConnectionStatus,
    HttpProbe,
};
use crate::error::{SyncError, SyncResult};
use crate::poller::{DifferentialPoller, DomainNotification, FilterOptions, SubscriptionId};
use crate::protocol::{ChannelEvent, OutboundEvent, UserIdentityPayload};
use crate::reconciler::CartReconciler;
use crate::rest::{HttpCartApi, HttpDomainFetcher};
use crate::store::CartStore;

// =============================================================================
// Realtime Client
// =============================================================================

/// The embeddable sync client.
///
/// Construction spawns the connection manager task, so it must happen
/// inside a Tokio runtime. Nothing touches the network until `connect()`.
pub struct RealtimeClient {
    config: SyncConfig,
    connection: ConnectionHandle,
    bus: Arc<EventBus>,
    poller: DifferentialPoller,
    reconciler: CartReconciler,
    identity: Arc<Mutex<Option<UserIdentityPayload>>>,
    inbound: Mutex<Option<mpsc::Receiver<ChannelEvent>>>,
}

impl RealtimeClient {
    /// Builds the client from a validated configuration.
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let probe = Arc::new(HttpProbe::new(
            http.clone(),
            config.health_url(),
            config.channel.probe_timeout(),
        ));
        let (connection, inbound_rx) =
            ConnectionManager::spawn(ConnectionConfig::from_sync_config(&config), probe);

        let bus = Arc::new(EventBus::new(connection.clone()));

        let fetcher = Arc::new(HttpDomainFetcher::new(http.clone(), config.base_url()));
        let poller = DifferentialPoller::new(fetcher, config.poll.interval());

        let store = match config.data_dir() {
            Some(dir) => CartStore::open(dir)?,
            None => {
                warn!("No data directory available, cart persistence is in-memory only");
                CartStore::open_temporary()?
            }
        };
        let reconciler = CartReconciler::new(Arc::new(HttpCartApi::new(http, config.base_url())), store);
        match reconciler.restore_last_session() {
            Ok(Some(user_id)) => info!(user_id, "Previous cart session restored"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Previous cart session not restored"),
        }

        Ok(RealtimeClient {
            config,
            connection,
            bus,
            poller,
            reconciler,
            identity: Arc::new(Mutex::new(None)),
            inbound: Mutex::new(Some(inbound_rx)),
        })
    }

    /// Registers the push/poll/cart bridges and starts routing inbound
    /// events. Call once; a second call is refused.
    pub fn start(&self) -> SyncResult<()> {
        let inbound = self
            .inbound
            .lock()
            .expect("Inbound receiver mutex poisoned")
            .take();
        let Some(mut inbound_rx) = inbound else {
            return Err(SyncError::ChannelError(
                "realtime client already started".to_string(),
            ));
        };

        self.register_bridges();

        let bus = Arc::clone(&self.bus);
        tokio::spawn(async move {
            while let Some(event) = inbound_rx.recv().await {
                debug!(event = event.event_name(), "Channel event received");
                bus.dispatch(&event);
            }
            debug!("Inbound event stream closed, router stopped");
        });

        // Every time the channel comes up, re-join the remembered user room
        // so cart events keep flowing after an automatic reconnect. Keyed on
        // the transport state, not the authenticate ack: unauthenticated
        // sessions reconnect too.
        let connection = self.connection.clone();
        let identity = Arc::clone(&self.identity);
        let mut states = self.connection.state_changes();
        tokio::spawn(async move {
            loop {
                if *states.borrow_and_update() == ConnectionState::Connected {
                    let remembered = identity
                        .lock()
                        .expect("Identity mutex poisoned")
                        .clone();
                    if let Some(user) = remembered {
                        if let Err(e) = connection.emit(OutboundEvent::JoinUserRoom(user)).await {
                            warn!(error = %e, "User room re-join failed");
                        }
                    }
                }
                if states.changed().await.is_err() {
                    debug!("Connection state watch closed, re-join task stopped");
                    break;
                }
            }
        });

        info!("Realtime client started");
        Ok(())
    }

    fn register_bridges(&self) {
        // Catalog broadcasts kick an off-schedule poll for their domain.
        for domain in DataDomain::ALL {
            let poller = self.poller.clone();
            self.bus
                .add_listener(ChannelEvent::domain_event_name(domain), move |_| {
                    poller.trigger(domain);
                });
        }

        // Order creation lands in the orders domain under its own names.
        for name in ["order-created", "orders-created-from-cart"] {
            let poller = self.poller.clone();
            self.bus.add_listener(name, move |_| {
                poller.trigger(DataDomain::Orders);
            });
        }

        // Cart room events fold straight into the local cart.
        for name in [
            "cart-item-added",
            "cart-item-updated",
            "cart-item-removed",
            "cart-cleared",
        ] {
            let reconciler = self.reconciler.clone();
            self.bus.add_listener(name, move |event| {
                reconciler.apply_channel_event(event);
            });
        }

        // A confirmed room join means the server-side cart is in scope;
        // reconcile against it.
        {
            let reconciler = self.reconciler.clone();
            self.bus.add_listener("user-room-joined", move |event| {
                if let ChannelEvent::UserRoomJoined(payload) = event {
                    if !payload.success {
                        warn!("Server refused the user room join");
                        return;
                    }
                }
                let reconciler = reconciler.clone();
                tokio::spawn(async move {
                    if let Err(e) = reconciler.refresh_from_server().await {
                        warn!(error = %e, "Cart refresh after room join failed");
                    }
                });
            });
        }
    }

    // =========================================================================
    // Channel Control
    // =========================================================================

    /// Opens the realtime channel (health probe first).
    pub async fn connect(&self) -> SyncResult<()> {
        self.connection.connect().await
    }

    /// Opens the realtime channel and authenticates it.
    pub async fn connect_with_token(&self, token: impl Into<String>) -> SyncResult<()> {
        self.connection.connect_with_token(token).await
    }

    /// Closes the channel without retrying.
    pub async fn disconnect(&self) -> SyncResult<()> {
        self.connection.disconnect().await
    }

    /// Re-allows connects after `disable()`.
    pub async fn enable(&self) -> SyncResult<()> {
        self.connection.enable().await
    }

    /// Tears down the channel and refuses connects until `enable()`.
    pub async fn disable(&self) -> SyncResult<()> {
        self.connection.disable().await
    }

    /// Clears the reconnect attempt counter.
    pub async fn reset(&self) -> SyncResult<()> {
        self.connection.reset().await
    }

    /// Sends an event up the channel (best-effort while connected).
    pub async fn emit(&self, event: OutboundEvent) -> SyncResult<()> {
        self.connection.emit(event).await
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        self.connection.state().await
    }

    /// True when the channel is open.
    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    /// Status summary for display layers.
    pub async fn status(&self) -> ConnectionStatus {
        self.connection.status().await
    }

    // =========================================================================
    // User Session
    // =========================================================================

    /// Signs a user in: activates their cart and joins their event room.
    ///
    /// The room join is best-effort; while offline it is dropped and
    /// repeated automatically when the channel next connects.
    pub async fn join_user_room(&self, identity: UserIdentityPayload) -> SyncResult<()> {
        self.reconciler.set_active_user(identity.id)?;
        *self.identity.lock().expect("Identity mutex poisoned") = Some(identity.clone());
        self.bus.emit(OutboundEvent::JoinUserRoom(identity)).await
    }

    /// Signs the user out: leaves their event room and resets the cart.
    pub async fn leave_user_room(&self) -> SyncResult<()> {
        let remembered = self
            .identity
            .lock()
            .expect("Identity mutex poisoned")
            .take();
        self.reconciler.clear_active_user();
        if let Some(user) = remembered {
            let room = format!("user-{}", user.id);
            self.bus.emit(OutboundEvent::LeaveRoom { room }).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Data Access
    // =========================================================================

    /// Subscribes a callback to differential updates for one domain.
    pub fn subscribe_domain<F>(
        &self,
        domain: DataDomain,
        filter: FilterOptions,
        callback: F,
    ) -> SubscriptionId
    where
        F: Fn(&DomainNotification) + Send + Sync + 'static,
    {
        self.poller.subscribe(domain, filter, callback)
    }

    /// Drops a domain subscription.
    pub fn unsubscribe_domain(&self, domain: DataDomain, id: SubscriptionId) {
        self.poller.unsubscribe(domain, id);
    }

    /// Kicks a manual out-of-schedule fetch for one domain.
    pub fn refresh_domain(&self, domain: DataDomain) {
        self.poller.refresh(domain);
    }

    /// Registers a raw listener for one channel event name.
    pub fn add_listener<F>(&self, event_name: &str, callback: F) -> ListenerId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.bus.add_listener(event_name, callback)
    }

    /// Removes a raw listener.
    pub fn remove_listener(&self, event_name: &str, id: ListenerId) {
        self.bus.remove_listener(event_name, id);
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The cart surface: local-first mutations, flush, and checkout.
    pub fn cart(&self) -> &CartReconciler {
        &self.reconciler
    }

    /// The differential poller, for status and interval tuning.
    pub fn poller(&self) -> &DifferentialPoller {
        &self.poller
    }

    /// The active configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stops polling and tears down the channel. The inbound router exits
    /// when the manager task drops its sender.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.poller.shutdown();
        self.connection.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CartEventPayload;
    use aurum_core::{CartAction, RemoteCartItem};

    fn test_config(dir: &std::path::Path) -> SyncConfig {
        let mut config = SyncConfig::new();
        config.storage.data_dir = Some(dir.to_path_buf());
        config
    }

    fn remote_row(id: i64, sku: &str, quantity: u32) -> RemoteCartItem {
        RemoteCartItem {
            id,
            product_id: id,
            sku: sku.to_string(),
            name: sku.to_string(),
            quantity,
            unit_price_cents: 10_000_00,
            gross_weight_mg: 3_000,
            net_weight_mg: 2_800,
        }
    }

    /// Minimal HTTP endpoint answering 200 to every request, for the
    /// reachability probe.
    async fn spawn_health_server() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream
                        .write_all(
                            b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                        )
                        .await;
                });
            }
        });
        format!("http://{}", addr)
    }

    /// WebSocket server that records text frames and drops the first
    /// connection right after its first frame, forcing a reconnect.
    async fn spawn_flaky_ws_server() -> (String, Arc<Mutex<Vec<String>>>) {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let frames: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = frames.clone();

        tokio::spawn(async move {
            let mut connections = 0usize;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                connections += 1;
                let drop_after_first_frame = connections == 1;
                let sink = sink.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        if let Message::Text(text) = msg {
                            sink.lock().unwrap().push(text.as_str().to_owned());
                            if drop_after_first_frame {
                                return;
                            }
                        }
                    }
                });
            }
        });

        (format!("ws://{}", addr), frames)
    }

    #[tokio::test]
    async fn test_start_twice_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let client = RealtimeClient::new(test_config(dir.path())).unwrap();

        client.start().unwrap();
        assert!(client.start().is_err());
    }

    #[tokio::test]
    async fn test_bridges_are_registered_on_start() {
        let dir = tempfile::tempdir().unwrap();
        let client = RealtimeClient::new(test_config(dir.path())).unwrap();
        client.start().unwrap();

        for domain in DataDomain::ALL {
            assert_eq!(
                client
                    .bus
                    .listener_count(ChannelEvent::domain_event_name(domain)),
                1
            );
        }
        assert_eq!(client.bus.listener_count("order-created"), 1);
        assert_eq!(client.bus.listener_count("orders-created-from-cart"), 1);
        assert_eq!(client.bus.listener_count("cart-item-added"), 1);
        assert_eq!(client.bus.listener_count("user-room-joined"), 1);
    }

    #[tokio::test]
    async fn test_cart_event_reaches_reconciler() {
        let dir = tempfile::tempdir().unwrap();
        let client = RealtimeClient::new(test_config(dir.path())).unwrap();
        client.start().unwrap();

        let event = ChannelEvent::CartItemAdded(CartEventPayload {
            action: CartAction::ItemAdded,
            cart_item: Some(remote_row(11, "AU-RING-18K", 2)),
            cart_item_id: None,
            timestamp: None,
        });
        client.bus.dispatch(&event);

        assert_eq!(client.cart().item_count(), 1);
        assert_eq!(client.cart().cart().items[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_join_user_room_activates_cart_while_offline() {
        let dir = tempfile::tempdir().unwrap();
        let client = RealtimeClient::new(test_config(dir.path())).unwrap();
        client.start().unwrap();

        let identity = UserIdentityPayload {
            id: 7,
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        };
        // Offline: the room join is dropped, the local session still starts.
        client.join_user_room(identity).await.unwrap();
        assert_eq!(client.cart().active_user(), Some(7));

        client.leave_user_room().await.unwrap();
        assert_eq!(client.cart().active_user(), None);
    }

    #[tokio::test]
    async fn test_reconnect_rejoins_user_room_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let health_url = spawn_health_server().await;
        let (channel_url, frames) = spawn_flaky_ws_server().await;

        let mut config = test_config(dir.path());
        config.server.base_url = health_url;
        config.server.channel_url = Some(channel_url);
        config.channel.base_delay_ms = 10;

        let client = RealtimeClient::new(config).unwrap();
        client.start().unwrap();

        // Plain connect, no auth token in play.
        client.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(client.is_connected().await);

        let identity = UserIdentityPayload {
            id: 7,
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        };
        client.join_user_room(identity).await.unwrap();

        // The server drops the connection right after that join frame. The
        // manager reconnects on its own and the room is joined again, with
        // no authenticated ack involved.
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(client.is_connected().await);

        let frames = frames.lock().unwrap();
        let joins: Vec<&String> = frames
            .iter()
            .filter(|f| f.contains("\"event\":\"join-user-room\""))
            .collect();
        assert_eq!(joins.len(), 2);
        assert!(joins[1].contains("\"id\":7"));
    }

    #[tokio::test]
    async fn test_custom_listener_sees_dispatched_events() {
        let dir = tempfile::tempdir().unwrap();
        let client = RealtimeClient::new(test_config(dir.path())).unwrap();
        client.start().unwrap();

        let seen = Arc::new(Mutex::new(0u32));
        let seen_in_listener = Arc::clone(&seen);
        let id = client.add_listener("product-update", move |_| {
            *seen_in_listener.lock().unwrap() += 1;
        });

        let event: ChannelEvent =
            serde_json::from_str(r#"{"event":"product-update","payload":{"action":"updated"}}"#)
                .unwrap();
        client.bus.dispatch(&event);
        assert_eq!(*seen.lock().unwrap(), 1);

        client.remove_listener("product-update", id);
        client.bus.dispatch(&event);
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
