//! # aurum-sync: Real-Time Sync Engine for the Aurum Storefront
//!
//! This crate keeps an embedded storefront client in line with its backend:
//! push events over a WebSocket channel, differential polling as the safety
//! net, and a local-first cart that survives going offline.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         RealtimeClient                                  │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  ConnectionManager (Tokio task)                  │  │
//! │  │                                                                  │  │
//! │  │  Health probe before connect, capped exponential backoff,        │  │
//! │  │  keepalive pings, single-flight connects                         │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ inbound ChannelEvents                   │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                           EventBus                               │  │
//! │  │                                                                  │  │
//! │  │  Name-keyed listeners, registration-order delivery,              │  │
//! │  │  per-listener panic isolation                                    │  │
//! │  └───────────┬───────────────────────────────────┬──────────────────┘  │
//! │              ▼                                   ▼                     │
//! │  ┌────────────────────────┐        ┌────────────────────────────────┐  │
//! │  │  DifferentialPoller    │        │        CartReconciler          │  │
//! │  │                        │        │                                │  │
//! │  │  Per-domain tasks,     │        │  Local-first cart, pending     │  │
//! │  │  content hashing,      │        │  ops, deletion ledger,         │  │
//! │  │  push-kicked fetches   │        │  flush-before-checkout         │  │
//! │  └────────────────────────┘        └───────────────┬────────────────┘  │
//! │                                                    ▼                   │
//! │                                         sled cart store (per user)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`client`] - `RealtimeClient` composition root
//! - [`config`] - TOML + environment configuration
//! - [`connection`] - WebSocket channel manager with probe and backoff
//! - [`bus`] - Typed event bus for channel events
//! - [`poller`] - Differential poller with content hashing
//! - [`reconciler`] - Local-first cart reconciliation
//! - [`rest`] - REST endpoints (cart, orders, domain fetches)
//! - [`store`] - Embedded cart persistence
//! - [`protocol`] - Wire types for the realtime channel
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use aurum_sync::{FilterOptions, RealtimeClient, SyncConfig};
//! use aurum_core::DataDomain;
//!
//! let config = SyncConfig::load_or_default(None);
//! let client = RealtimeClient::new(config)?;
//! client.start()?;
//! client.connect().await?;
//!
//! let sub = client.subscribe_domain(DataDomain::Products, FilterOptions::default(), |n| {
//!     println!("products changed: {}", n.data);
//! });
//! ```

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bus;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod poller;
pub mod protocol;
pub mod reconciler;
pub mod rest;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

// Composition root
pub use client::RealtimeClient;
pub use config::{ChannelSettings, PollSettings, ServerSettings, StorageSettings, SyncConfig};
pub use error::{SyncError, SyncResult};

// Channel
pub use bus::{EventBus, ListenerId};
pub use connection::{
    ConnectionConfig, ConnectionHandle, ConnectionManager, ConnectionState, ConnectionStatus,
    HttpProbe, ReachabilityProbe, ReconnectPolicy,
};
pub use protocol::{
    AuthAckPayload, CartEventPayload, ChannelEvent, DomainUpdatePayload, OrdersCreatedPayload,
    OutboundEvent, RoomJoinedPayload, UserIdentityPayload,
};

// Data access
pub use poller::{
    DifferentialPoller, DomainFetch, DomainNotification, FilterOptions, SubscriptionId,
    UpdateSource,
};
pub use reconciler::CartReconciler;
pub use rest::{ApiEnvelope, CartApi, HttpCartApi, HttpDomainFetcher};
pub use store::CartStore;

// =============================================================================
// Crate Helpers
// =============================================================================

/// Per-process salt mixed into listener and subscription ids so ids from a
/// previous process cannot be replayed against this one.
pub(crate) fn process_start_salt() -> u32 {
    static SALT: OnceLock<u32> = OnceLock::new();
    *SALT.get_or_init(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    })
}

/// Extracts a printable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_start_salt_is_stable() {
        assert_eq!(process_start_salt(), process_start_salt());
    }

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"boom".to_string()), "boom");
        assert_eq!(panic_message(&42_u32), "unknown panic");
    }
}
