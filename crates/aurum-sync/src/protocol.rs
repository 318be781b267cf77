//! # Channel Protocol
//!
//! JSON event vocabulary for the realtime WebSocket channel.
//!
//! ## Message Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Channel Event Flow                                │
//! │                                                                         │
//! │  CLIENT                                              SERVER             │
//! │    │                                                    │               │
//! │    │  authenticate {token}                              │               │
//! │    │ ──────────────────────────────────────────────────►│               │
//! │    │                                                    │               │
//! │    │                          authenticated {success}   │               │
//! │    │ ◄──────────────────────────────────────────────────│               │
//! │    │                                                    │               │
//! │    │  join-user-room {id, name, email}                  │               │
//! │    │ ──────────────────────────────────────────────────►│               │
//! │    │                    user-room-joined {success,room} │               │
//! │    │ ◄──────────────────────────────────────────────────│               │
//! │    │                                                    │               │
//! │    │         product-update {action, entity, ts}       │               │
//! │    │ ◄──────────────────────────────────────────────────│  (broadcast)  │
//! │    │        cart-item-added {action, cartItem, ts}      │               │
//! │    │ ◄──────────────────────────────────────────────────│  (user room)  │
//! │    │                                                    │               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Adjacently tagged JSON: `{"event": "product-update", "payload": {...}}`.
//! Domain update payloads carry the changed entity opaquely; the poller
//! re-fetches authoritative state instead of trusting pushed entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use aurum_core::{CartAction, DataDomain, RemoteCartItem, UpdateAction};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Payload Types
// =============================================================================

/// Payload for catalog/domain update broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainUpdatePayload {
    /// What happened to the entity.
    pub action: UpdateAction,

    /// The changed entity, passed through opaquely.
    #[serde(default)]
    pub entity: Value,

    /// Server-side event time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Payload for the bulk cart-to-orders conversion broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrdersCreatedPayload {
    pub action: UpdateAction,

    /// Backend ids of the orders that were created.
    #[serde(default)]
    pub order_ids: Vec<i64>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Payload for per-user cart room events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartEventPayload {
    /// What happened to the cart.
    pub action: CartAction,

    /// The affected cart row, absent for removals and clears.
    #[serde(default)]
    pub cart_item: Option<RemoteCartItem>,

    /// Backend row id, set for removals.
    #[serde(default)]
    pub cart_item_id: Option<i64>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Payload acknowledging a user-room join.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoinedPayload {
    pub success: bool,

    /// Room name, e.g. "user-42".
    #[serde(default)]
    pub room: String,
}

/// Payload acknowledging channel authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthAckPayload {
    pub success: bool,
}

/// Identity sent when joining the per-user cart room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentityPayload {
    pub id: i64,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub email: String,
}

// =============================================================================
// Inbound Events (server -> client)
// =============================================================================

/// An event received on the realtime channel.
///
/// Every variant corresponds to one wire event name. Unknown event names
/// fail deserialization and are dropped (with a warning) by the channel
/// read loop, so protocol growth on the server does not break old clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum ChannelEvent {
    // ------------------------------------------------------------------
    // Catalog broadcasts (one per data domain)
    // ------------------------------------------------------------------
    CategoryUpdate(DomainUpdatePayload),
    ProductUpdate(DomainUpdatePayload),
    OrderUpdate(DomainUpdatePayload),
    SliderUpdate(DomainUpdatePayload),
    AppIconUpdate(DomainUpdatePayload),
    AppVersionUpdate(DomainUpdatePayload),
    UserUpdate(DomainUpdatePayload),

    /// A single order was created (checkout elsewhere, admin action).
    OrderCreated(DomainUpdatePayload),

    /// A cart was converted into orders in bulk.
    OrdersCreatedFromCart(OrdersCreatedPayload),

    // ------------------------------------------------------------------
    // Per-user cart room events
    // ------------------------------------------------------------------
    CartItemAdded(CartEventPayload),
    CartItemUpdated(CartEventPayload),
    CartItemRemoved(CartEventPayload),
    CartCleared(CartEventPayload),

    // ------------------------------------------------------------------
    // Acknowledgements
    // ------------------------------------------------------------------
    UserRoomJoined(RoomJoinedPayload),
    Authenticated(AuthAckPayload),
}

impl ChannelEvent {
    /// Returns the wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            ChannelEvent::CategoryUpdate(_) => "category-update",
            ChannelEvent::ProductUpdate(_) => "product-update",
            ChannelEvent::OrderUpdate(_) => "order-update",
            ChannelEvent::SliderUpdate(_) => "slider-update",
            ChannelEvent::AppIconUpdate(_) => "app-icon-update",
            ChannelEvent::AppVersionUpdate(_) => "app-version-update",
            ChannelEvent::UserUpdate(_) => "user-update",
            ChannelEvent::OrderCreated(_) => "order-created",
            ChannelEvent::OrdersCreatedFromCart(_) => "orders-created-from-cart",
            ChannelEvent::CartItemAdded(_) => "cart-item-added",
            ChannelEvent::CartItemUpdated(_) => "cart-item-updated",
            ChannelEvent::CartItemRemoved(_) => "cart-item-removed",
            ChannelEvent::CartCleared(_) => "cart-cleared",
            ChannelEvent::UserRoomJoined(_) => "user-room-joined",
            ChannelEvent::Authenticated(_) => "authenticated",
        }
    }

    /// Returns the data domain this event invalidates, if any.
    ///
    /// Order events map to the orders domain: an order being created means
    /// the orders list is stale.
    pub fn domain(&self) -> Option<DataDomain> {
        match self {
            ChannelEvent::CategoryUpdate(_) => Some(DataDomain::Categories),
            ChannelEvent::ProductUpdate(_) => Some(DataDomain::Products),
            ChannelEvent::OrderUpdate(_) => Some(DataDomain::Orders),
            ChannelEvent::SliderUpdate(_) => Some(DataDomain::Sliders),
            ChannelEvent::AppIconUpdate(_) => Some(DataDomain::AppIcons),
            ChannelEvent::AppVersionUpdate(_) => Some(DataDomain::AppVersions),
            ChannelEvent::UserUpdate(_) => Some(DataDomain::Users),
            ChannelEvent::OrderCreated(_) => Some(DataDomain::Orders),
            ChannelEvent::OrdersCreatedFromCart(_) => Some(DataDomain::Orders),
            _ => None,
        }
    }

    /// Returns the wire event name for a domain's update broadcast.
    pub fn domain_event_name(domain: DataDomain) -> &'static str {
        match domain {
            DataDomain::Categories => "category-update",
            DataDomain::Products => "product-update",
            DataDomain::Orders => "order-update",
            DataDomain::Sliders => "slider-update",
            DataDomain::AppIcons => "app-icon-update",
            DataDomain::AppVersions => "app-version-update",
            DataDomain::Users => "user-update",
        }
    }

    /// Returns true for per-user cart room events.
    pub fn is_cart_event(&self) -> bool {
        matches!(
            self,
            ChannelEvent::CartItemAdded(_)
                | ChannelEvent::CartItemUpdated(_)
                | ChannelEvent::CartItemRemoved(_)
                | ChannelEvent::CartCleared(_)
        )
    }

    /// Serializes to the JSON wire format.
    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(|e| SyncError::SerializationFailed(e.to_string()))
    }

    /// Deserializes from the JSON wire format.
    pub fn from_json(json: &str) -> SyncResult<Self> {
        serde_json::from_str(json).map_err(|e| SyncError::DeserializationFailed(e.to_string()))
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Creates a domain update broadcast.
    pub fn domain_update(domain: DataDomain, action: UpdateAction, entity: Value) -> Self {
        let payload = DomainUpdatePayload {
            action,
            entity,
            timestamp: Some(Utc::now()),
        };
        match domain {
            DataDomain::Categories => ChannelEvent::CategoryUpdate(payload),
            DataDomain::Products => ChannelEvent::ProductUpdate(payload),
            DataDomain::Orders => ChannelEvent::OrderUpdate(payload),
            DataDomain::Sliders => ChannelEvent::SliderUpdate(payload),
            DataDomain::AppIcons => ChannelEvent::AppIconUpdate(payload),
            DataDomain::AppVersions => ChannelEvent::AppVersionUpdate(payload),
            DataDomain::Users => ChannelEvent::UserUpdate(payload),
        }
    }

    /// Creates a cart-item-added event.
    pub fn cart_item_added(item: RemoteCartItem) -> Self {
        ChannelEvent::CartItemAdded(CartEventPayload {
            action: CartAction::ItemAdded,
            cart_item: Some(item),
            cart_item_id: None,
            timestamp: Some(Utc::now()),
        })
    }

    /// Creates a cart-item-removed event.
    pub fn cart_item_removed(cart_item_id: i64) -> Self {
        ChannelEvent::CartItemRemoved(CartEventPayload {
            action: CartAction::ItemRemoved,
            cart_item: None,
            cart_item_id: Some(cart_item_id),
            timestamp: Some(Utc::now()),
        })
    }
}

// =============================================================================
// Outbound Events (client -> server)
// =============================================================================

/// An event sent up the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// Authenticate the channel right after connecting.
    Authenticate { token: String },

    /// Join a broadcast room.
    JoinRoom { room: String },

    /// Leave a broadcast room.
    LeaveRoom { room: String },

    /// Join the per-user cart room.
    JoinUserRoom(UserIdentityPayload),
}

impl OutboundEvent {
    /// Returns the wire event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundEvent::Authenticate { .. } => "authenticate",
            OutboundEvent::JoinRoom { .. } => "join-room",
            OutboundEvent::LeaveRoom { .. } => "leave-room",
            OutboundEvent::JoinUserRoom(_) => "join-user-room",
        }
    }

    /// Serializes to the JSON wire format.
    pub fn to_json(&self) -> SyncResult<String> {
        serde_json::to_string(self).map_err(|e| SyncError::SerializationFailed(e.to_string()))
    }

    /// Creates an authenticate event.
    pub fn authenticate(token: impl Into<String>) -> Self {
        OutboundEvent::Authenticate {
            token: token.into(),
        }
    }

    /// Creates a join-user-room event.
    pub fn join_user_room(id: i64, name: impl Into<String>, email: impl Into<String>) -> Self {
        OutboundEvent::JoinUserRoom(UserIdentityPayload {
            id,
            name: name.into(),
            email: email.into(),
        })
    }
}
