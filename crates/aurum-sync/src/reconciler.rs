//! # Cart Reconciler
//!
//! Optimistic local-first cart. Every user action lands in the in-memory
//! cart immediately; the matching backend write runs as a spawned mirror
//! task and its result is folded back in through the confirmation methods
//! on [`Cart`].
//!
//! ```text
//!   UI action ──▶ Cart (instant) ──▶ persisted (sled)
//!                   │
//!                   └─▶ mirror task ──▶ REST ──▶ confirm_* ──▶ Cart
//! ```
//!
//! Anything that cannot be mirrored right away stays flagged with a
//! [`PendingOp`] and is retried by [`CartReconciler::flush_pending`], which
//! runs after every snapshot merge and as the first step of checkout.
//! Checkout refuses to create an order while any item is unsynced.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};
use uuid::Uuid;

use aurum_core::{AddOutcome, Cart, CartItem, CartTotals, PendingOp, RemoteCartItem};

use crate::error::{SyncError, SyncResult};
use crate::protocol::ChannelEvent;
use crate::rest::CartApi;
use crate::store::CartStore;

// =============================================================================
// Cart Reconciler
// =============================================================================

/// Keeps the local cart, the persisted cart, and the server-side cart
/// converging toward the same state.
///
/// Cheap to clone; all clones share one cart. Mutating operations spawn
/// their mirror task, so they must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct CartReconciler {
    inner: Arc<ReconcilerInner>,
}

struct ReconcilerInner {
    cart: Mutex<Cart>,
    active_user: Mutex<Option<i64>>,
    api: Arc<dyn CartApi>,
    store: CartStore,
}

impl CartReconciler {
    pub fn new(api: Arc<dyn CartApi>, store: CartStore) -> Self {
        CartReconciler {
            inner: Arc::new(ReconcilerInner {
                cart: Mutex::new(Cart::new()),
                active_user: Mutex::new(None),
                api,
                store,
            }),
        }
    }

    // =========================================================================
    // Active User
    // =========================================================================

    /// Returns the active user, if any.
    pub fn active_user(&self) -> Option<i64> {
        *self
            .inner
            .active_user
            .lock()
            .expect("Active user mutex poisoned")
    }

    /// Switches the active user, restoring that user's persisted cart.
    ///
    /// Setting the same user again is a no-op. The previous user's cart is
    /// already persisted (every mutation persists), so nothing is lost on
    /// switch.
    pub fn set_active_user(&self, user_id: i64) -> SyncResult<()> {
        {
            let mut active = self
                .inner
                .active_user
                .lock()
                .expect("Active user mutex poisoned");
            if *active == Some(user_id) {
                return Ok(());
            }
            *active = Some(user_id);
        }

        let restored = self.inner.store.load_cart(user_id)?;
        let items = self.with_cart_mut(|cart| {
            match restored {
                Some(saved) => *cart = saved,
                None => cart.reset(),
            }
            cart.item_count()
        });
        self.inner.store.save_last_user(user_id)?;
        info!(user_id, items, "Active user set");
        Ok(())
    }

    /// Logs the user out. The in-memory cart resets; the persisted copy
    /// stays for the next login.
    pub fn clear_active_user(&self) {
        let had_user = self
            .inner
            .active_user
            .lock()
            .expect("Active user mutex poisoned")
            .take()
            .is_some();
        if had_user {
            self.with_cart_mut(|cart| cart.reset());
            info!("Active user cleared, cart reset");
        }
    }

    /// Restores the most recent session recorded in the store.
    pub fn restore_last_session(&self) -> SyncResult<Option<i64>> {
        match self.inner.store.load_last_user()? {
            Some(user_id) => {
                self.set_active_user(user_id)?;
                Ok(Some(user_id))
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // Local-First Operations
    // =========================================================================

    /// Adds an item to the local cart and mirrors it in the background.
    ///
    /// The returned outcome reflects the local state at return time; the
    /// mirror result lands later via `confirm_mirror`.
    pub fn add_locally(&self, item: CartItem) -> SyncResult<AddOutcome> {
        let sku = item.sku.clone();
        let outcome = self.with_cart_mut(|cart| cart.add_item(item))?;
        self.persist();

        match self.active_user() {
            Some(user_id) => {
                let this = self.clone();
                let local_id = outcome.local_id;
                let quantity = outcome.quantity;
                tokio::spawn(async move {
                    this.mirror_upsert(user_id, local_id, &sku, quantity).await;
                });
            }
            None => debug!(%sku, "No active user, add stays local"),
        }
        Ok(outcome)
    }

    /// Sets an item's quantity locally and mirrors it in the background.
    /// Quantity 0 removes the item.
    pub fn update_quantity_locally(&self, local_id: Uuid, quantity: u32) -> SyncResult<()> {
        if quantity == 0 {
            return self.remove_locally(local_id).map(|_| ());
        }

        self.with_cart_mut(|cart| cart.update_quantity(local_id, quantity))?;
        self.persist();

        if let Some(user_id) = self.active_user() {
            let snapshot = self.with_cart(|cart| {
                cart.find(local_id)
                    .map(|item| (item.sku.clone(), item.backend_id))
            });
            if let Some((sku, backend_id)) = snapshot {
                let this = self.clone();
                tokio::spawn(async move {
                    this.mirror_set_quantity(user_id, local_id, &sku, backend_id, quantity)
                        .await;
                });
            }
        }
        Ok(())
    }

    /// Removes an item locally and mirrors the delete in the background.
    /// Returns the removed item.
    pub fn remove_locally(&self, local_id: Uuid) -> SyncResult<CartItem> {
        let removed = self.with_cart_mut(|cart| cart.remove_item(local_id))?;
        self.persist();

        if let Some(backend_id) = removed.backend_id {
            if self.active_user().is_some() {
                let this = self.clone();
                tokio::spawn(async move {
                    this.mirror_remove(backend_id).await;
                });
            }
        }
        Ok(removed)
    }

    /// Empties the local cart and mirrors the clear in the background.
    pub fn clear_locally(&self) {
        self.with_cart_mut(|cart| cart.clear());
        self.persist();

        if let Some(user_id) = self.active_user() {
            let ledgered: Vec<i64> = self.with_cart(|cart| {
                cart.pending_delete_items()
                    .iter()
                    .filter_map(|t| t.backend_id)
                    .collect()
            });
            let this = self.clone();
            tokio::spawn(async move {
                this.mirror_clear(user_id, ledgered).await;
            });
        }
    }

    // =========================================================================
    // Mirror Tasks
    // =========================================================================

    async fn mirror_upsert(&self, user_id: i64, local_id: Uuid, sku: &str, quantity: u32) {
        match self.inner.api.upsert_item(user_id, sku, quantity).await {
            Ok(remote) => {
                let settled = self.with_cart_mut(|cart| {
                    cart.confirm_mirror(local_id, remote.id, remote.quantity)
                });
                if settled {
                    debug!(sku, backend_id = remote.id, "Cart item mirrored");
                } else {
                    debug!(sku, "Cart item changed during mirror, still pending");
                }
                self.persist();
            }
            Err(e) => {
                warn!(sku, error = %e, "Cart mirror failed, item stays pending");
            }
        }
    }

    async fn mirror_set_quantity(
        &self,
        user_id: i64,
        local_id: Uuid,
        sku: &str,
        backend_id: Option<i64>,
        quantity: u32,
    ) {
        let Some(backend_id) = backend_id else {
            return self.mirror_upsert(user_id, local_id, sku, quantity).await;
        };

        match self.inner.api.update_quantity(backend_id, quantity).await {
            Ok(true) => {
                self.with_cart_mut(|cart| cart.confirm_mirror(local_id, backend_id, quantity));
                self.persist();
            }
            Ok(false) => {
                // The row vanished server-side. The user just set a quantity,
                // so the latest intent is for the row to exist; recreate it.
                self.mirror_upsert(user_id, local_id, sku, quantity).await;
            }
            Err(e) => {
                warn!(sku, error = %e, "Quantity mirror failed, item stays pending");
            }
        }
    }

    async fn mirror_remove(&self, backend_id: i64) {
        match self.inner.api.remove_item(backend_id).await {
            Ok(()) => {
                self.with_cart_mut(|cart| cart.confirm_delete(backend_id));
                self.persist();
                debug!(backend_id, "Cart delete mirrored");
            }
            Err(e) => {
                warn!(backend_id, error = %e, "Delete mirror failed, stays ledgered");
            }
        }
    }

    async fn mirror_clear(&self, user_id: i64, ledgered: Vec<i64>) {
        match self.inner.api.clear_cart(user_id).await {
            Ok(()) => {
                self.with_cart_mut(|cart| {
                    for backend_id in ledgered {
                        cart.confirm_delete(backend_id);
                    }
                });
                self.persist();
                debug!(user_id, "Server cart cleared");
            }
            Err(e) => {
                warn!(user_id, error = %e, "Clear mirror failed, deletes stay ledgered");
            }
        }
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Merges an authoritative server snapshot, then pushes surviving local
    /// pending edits back out.
    pub async fn apply_remote_snapshot(&self, snapshot: &[RemoteCartItem]) {
        self.with_cart_mut(|cart| cart.merge_snapshot(snapshot));
        self.persist();

        let failed = self.flush_pending().await;
        if !failed.is_empty() {
            warn!(
                failed = failed.len(),
                "Some cart edits could not be pushed after snapshot merge"
            );
        }
    }

    /// Fetches the server cart and reconciles against it. Called on connect
    /// and reconnect so both sides converge after an offline stretch.
    pub async fn refresh_from_server(&self) -> SyncResult<()> {
        let user_id = self.active_user().ok_or(SyncError::NoActiveUser)?;
        let snapshot = self.inner.api.fetch_cart(user_id).await?;
        debug!(user_id, rows = snapshot.len(), "Server cart fetched");
        self.apply_remote_snapshot(&snapshot).await;
        Ok(())
    }

    /// Pushes every pending local edit to the backend, deletes first.
    ///
    /// Deletes go first so an upsert can never land on a row that is queued
    /// for removal. Returns labels for everything that still could not be
    /// mirrored (SKUs, or `#id` for orphaned rows).
    pub async fn flush_pending(&self) -> Vec<String> {
        let Some(user_id) = self.active_user() else {
            return self.pending_labels();
        };

        let mut failed = Vec::new();

        for tombstone in self.with_cart(|cart| cart.pending_delete_items()) {
            let Some(backend_id) = tombstone.backend_id else {
                continue;
            };
            match self.inner.api.remove_item(backend_id).await {
                Ok(()) => {
                    self.with_cart_mut(|cart| cart.confirm_delete(backend_id));
                }
                Err(e) => {
                    warn!(backend_id, error = %e, "Pending delete still unmirrored");
                    failed.push(ledger_label(&tombstone));
                }
            }
        }

        for item in self.with_cart(|cart| cart.unsynced_items()) {
            let outcome = match item.backend_id {
                Some(backend_id) if item.pending_op == PendingOp::Update => {
                    match self.inner.api.update_quantity(backend_id, item.quantity).await {
                        Ok(true) => {
                            self.with_cart_mut(|cart| {
                                cart.confirm_mirror(item.local_id, backend_id, item.quantity)
                            });
                            Ok(())
                        }
                        Ok(false) => self.upsert_and_confirm(user_id, &item).await,
                        Err(e) => Err(e),
                    }
                }
                _ => self.upsert_and_confirm(user_id, &item).await,
            };

            if let Err(e) = outcome {
                warn!(sku = %item.sku, error = %e, "Pending item still unmirrored");
                failed.push(item.sku.clone());
            }
        }

        self.persist();
        failed
    }

    async fn upsert_and_confirm(&self, user_id: i64, item: &CartItem) -> SyncResult<()> {
        let remote = self
            .inner
            .api
            .upsert_item(user_id, &item.sku, item.quantity)
            .await?;
        self.with_cart_mut(|cart| cart.confirm_mirror(item.local_id, remote.id, remote.quantity));
        Ok(())
    }

    // =========================================================================
    // Checkout
    // =========================================================================

    /// Converts the cart into orders.
    ///
    /// Pending edits are flushed first; if anything is still unsynced after
    /// the flush the checkout fails, naming the offending items, and the
    /// order endpoint is never called. On success the cart resets.
    pub async fn checkout(&self, remark: &str, courier: &str) -> SyncResult<Vec<i64>> {
        let user_id = self.active_user().ok_or(SyncError::NoActiveUser)?;

        let failed = self.flush_pending().await;
        if !failed.is_empty() {
            return Err(SyncError::CheckoutSyncFailed {
                unsynced_skus: failed,
            });
        }
        // An edit may have raced the flush; re-check before committing.
        if !self.with_cart(|cart| cart.is_fully_synced()) {
            return Err(SyncError::CheckoutSyncFailed {
                unsynced_skus: self.pending_labels(),
            });
        }

        let order_ids = self
            .inner
            .api
            .create_order_from_cart(user_id, remark, courier)
            .await?;
        self.with_cart_mut(|cart| cart.reset());
        self.persist();
        info!(user_id, orders = order_ids.len(), "Checkout complete");
        Ok(order_ids)
    }

    // =========================================================================
    // Channel Events
    // =========================================================================

    /// Applies a cart event received over the realtime channel.
    ///
    /// Returns true when the event was a cart event that changed local state.
    pub fn apply_channel_event(&self, event: &ChannelEvent) -> bool {
        let changed = match event {
            ChannelEvent::CartItemAdded(payload) => match &payload.cart_item {
                Some(remote) => {
                    self.with_cart_mut(|cart| cart.apply_item_added(remote));
                    true
                }
                None => false,
            },
            ChannelEvent::CartItemUpdated(payload) => match &payload.cart_item {
                Some(remote) => {
                    self.with_cart_mut(|cart| cart.apply_item_updated(remote));
                    true
                }
                None => false,
            },
            ChannelEvent::CartItemRemoved(payload) => {
                let backend_id = payload
                    .cart_item_id
                    .or_else(|| payload.cart_item.as_ref().map(|i| i.id));
                match backend_id {
                    Some(backend_id) => {
                        self.with_cart_mut(|cart| cart.apply_item_removed(backend_id));
                        true
                    }
                    None => false,
                }
            }
            ChannelEvent::CartCleared(_) => {
                self.with_cart_mut(|cart| cart.apply_cart_cleared());
                true
            }
            _ => false,
        };

        if changed {
            self.persist();
        }
        changed
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Clones the current cart.
    pub fn cart(&self) -> Cart {
        self.with_cart(|cart| cart.clone())
    }

    /// Totals summary over the current cart.
    pub fn totals(&self) -> CartTotals {
        self.with_cart(|cart| cart.totals())
    }

    /// True when every item is mirrored and the deletion ledger is empty.
    pub fn is_fully_synced(&self) -> bool {
        self.with_cart(|cart| cart.is_fully_synced())
    }

    /// Number of visible lines.
    pub fn item_count(&self) -> usize {
        self.with_cart(|cart| cart.item_count())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn with_cart<T>(&self, f: impl FnOnce(&Cart) -> T) -> T {
        let cart = self.inner.cart.lock().expect("Cart mutex poisoned");
        f(&cart)
    }

    fn with_cart_mut<T>(&self, f: impl FnOnce(&mut Cart) -> T) -> T {
        let mut cart = self.inner.cart.lock().expect("Cart mutex poisoned");
        f(&mut cart)
    }

    /// Best-effort write-through to the store. The in-memory cart is the
    /// source of truth, so a persistence failure only warns.
    fn persist(&self) {
        if let Some(user_id) = self.active_user() {
            let snapshot = self.cart();
            if let Err(e) = self.inner.store.save_cart(user_id, &snapshot) {
                warn!(user_id, error = %e, "Failed to persist cart");
            }
        }
    }

    fn pending_labels(&self) -> Vec<String> {
        self.with_cart(|cart| {
            let mut labels: Vec<String> =
                cart.unsynced_items().iter().map(|i| i.sku.clone()).collect();
            labels.extend(cart.pending_delete_items().iter().map(ledger_label));
            labels
        })
    }
}

fn ledger_label(tombstone: &CartItem) -> String {
    if tombstone.sku.is_empty() {
        match tombstone.backend_id {
            Some(backend_id) => format!("#{backend_id}"),
            None => "#unknown".to_string(),
        }
    } else {
        tombstone.sku.clone()
    }
}

// =============================================================================
// Tests
// =============================================================================
