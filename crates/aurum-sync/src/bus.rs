//! # Event Bus
//!
//! Typed pub/sub fan-out for channel events, plus the outbound emit path.
//!
//! ## Dispatch Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Event Bus Dispatch                              │
//! │                                                                         │
//! │   ConnectionManager ──► inbound events ──► dispatch(event)              │
//! │                                               │                         │
//! │                          ┌────────────────────┼─────────────────┐       │
//! │                          ▼                    ▼                 ▼       │
//! │                     listener #1          listener #2       listener #3  │
//! │                    (registration order, at most once each)              │
//! │                                                                         │
//! │   • Delivery is synchronous on the dispatching task                     │
//! │   • A panicking listener is caught and logged; the rest still run      │
//! │   • Listener ids carry a process-start salt, so an id saved from a     │
//! │     previous process can never unsubscribe a current listener           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::connection::ConnectionHandle;
use crate::error::SyncResult;
use crate::protocol::{ChannelEvent, OutboundEvent};
use crate::{panic_message, process_start_salt};

/// Listener callback invoked for each matching event.
pub type ListenerFn = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

// =============================================================================
// Listener Id
// =============================================================================

/// Opaque id returned by [`EventBus::add_listener`].
///
/// Ordered by registration sequence; the salt half ties the id to this
/// process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId {
    salt: u32,
    seq: u64,
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}-{}", self.salt, self.seq)
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Pub/sub hub between the realtime channel and the rest of the client.
///
/// Inbound events are fanned out to listeners registered per event name.
/// Outbound emits pass straight through to the connection manager, which
/// drops them with a warning when the channel is not connected.
pub struct EventBus {
    /// Listener registry keyed by wire event name.
    ///
    /// BTreeMap iteration order is the ListenerId order, which is the
    /// registration order within this process.
    listeners: Mutex<HashMap<String, BTreeMap<ListenerId, ListenerFn>>>,

    /// Monotonic sequence for listener ids.
    next_seq: AtomicU64,

    /// The channel used for outbound emits.
    connection: ConnectionHandle,
}

impl EventBus {
    /// Creates a bus wrapping the given channel handle.
    pub fn new(connection: ConnectionHandle) -> Self {
        EventBus {
            listeners: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
            connection,
        }
    }

    /// Registers a listener for one wire event name.
    ///
    /// Returns the id needed to unsubscribe.
    pub fn add_listener<F>(&self, event_name: &str, callback: F) -> ListenerId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let id = ListenerId {
            salt: process_start_salt(),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };

        let mut listeners = self.registry();
        listeners
            .entry(event_name.to_string())
            .or_default()
            .insert(id, Arc::new(callback));

        debug!(event = event_name, listener = %id, "Listener added");
        id
    }

    /// Unregisters a listener. Unknown ids are a silent no-op.
    pub fn remove_listener(&self, event_name: &str, id: ListenerId) {
        let mut listeners = self.registry();
        if let Some(for_event) = listeners.get_mut(event_name) {
            if for_event.remove(&id).is_some() {
                debug!(event = event_name, listener = %id, "Listener removed");
            }
            if for_event.is_empty() {
                listeners.remove(event_name);
            }
        }
    }

    /// Number of listeners registered for an event name.
    pub fn listener_count(&self, event_name: &str) -> usize {
        self.registry().get(event_name).map_or(0, BTreeMap::len)
    }

    /// Delivers one event to every listener registered for its name.
    ///
    /// Listeners run synchronously in registration order, each at most once.
    /// A panicking listener is caught and logged so the remaining listeners
    /// and the dispatching task are unaffected.
    pub fn dispatch(&self, event: &ChannelEvent) {
        let snapshot: Vec<(ListenerId, ListenerFn)> = {
            let listeners = self.registry();
            match listeners.get(event.event_name()) {
                Some(for_event) => for_event
                    .iter()
                    .map(|(id, callback)| (*id, callback.clone()))
                    .collect(),
                None => return,
            }
        };

        for (id, callback) in snapshot {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
            if let Err(payload) = result {
                warn!(
                    event = event.event_name(),
                    listener = %id,
                    panic = %panic_message(payload.as_ref()),
                    "Listener panicked during dispatch"
                );
            }
        }
    }

    /// Sends an event up the channel. Dropped with a warning when offline.
    pub async fn emit(&self, event: OutboundEvent) -> SyncResult<()> {
        self.connection.emit(event).await
    }

    /// The underlying channel handle.
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    fn registry(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, BTreeMap<ListenerId, ListenerFn>>> {
        self.listeners.lock().expect("Listener registry mutex poisoned")
    }
}
