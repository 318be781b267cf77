//! # Cart Model & Reconciliation Rules
//!
//! The locally-owned cart representation and the pure merge rules that keep
//! it convergent with the remote authority without dropping unsynced edits.
//!
//! ## Item Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Cart Item Lifecycle                               │
//! │                                                                         │
//! │  add locally ──► pending_op = Create, backend_id = None                 │
//! │        │                                                                │
//! │        │ mirror succeeds (confirm_mirror)                               │
//! │        ▼                                                                │
//! │  pending_op = None, backend_id = Some(id)   ◄── snapshot rows land here │
//! │        │                                                                │
//! │        │ quantity edited locally                                        │
//! │        ▼                                                                │
//! │  pending_op = Update ──(mirror succeeds)──► pending_op = None           │
//! │        │                                                                │
//! │        │ removed locally                                                │
//! │        ▼                                                                │
//! │  moved to the deletion ledger (pending_op = Delete) until the remote    │
//! │  delete is confirmed                                                    │
//! │                                                                         │
//! │  RULES                                                                  │
//! │  ─────                                                                  │
//! │  • A pending item is NEVER overwritten by a remote snapshot             │
//! │  • A ledgered backend id is NEVER resurrected by a remote snapshot      │
//! │  • A synced item absent from the snapshot is removed (server won)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

// =============================================================================
// Pending Operation
// =============================================================================

/// Unsynced local intent attached to a cart item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingOp {
    /// Fully mirrored; the remote authority may overwrite this item.
    #[default]
    None,
    /// Added locally, not yet created remotely.
    Create,
    /// Quantity changed locally, not yet written remotely.
    Update,
    /// Removed locally, remote delete not yet confirmed (ledger entries only).
    Delete,
}

impl PendingOp {
    /// Returns true if this item carries unsynced local intent.
    pub fn is_pending(&self) -> bool {
        !matches!(self, PendingOp::None)
    }
}

// =============================================================================
// Cart Item
// =============================================================================

/// An item in the shopping cart.
///
/// ## Design Notes
/// - `local_id`: stable local identity, assigned before any network round-trip
/// - `backend_id`: the remote row id; `None` until the first successful mirror
/// - Money is integer cents, weight is integer milligrams. Precious-metal
///   carts price by weight; floats are forbidden in this math.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Local identity (UUID v4), never sent to the backend.
    pub local_id: Uuid,

    /// Remote row id once the item has been mirrored.
    pub backend_id: Option<i64>,

    /// SKU at time of adding.
    pub sku: String,

    /// Display name at time of adding.
    pub name: String,

    /// Quantity in cart. Always > 0 for visible items.
    pub quantity: u32,

    /// Unit price in cents at time of adding.
    pub unit_price_cents: i64,

    /// Gross weight per unit, in milligrams.
    pub gross_weight_mg: i64,

    /// Net weight per unit, in milligrams.
    pub net_weight_mg: i64,

    /// Unsynced local intent.
    #[serde(default)]
    pub pending_op: PendingOp,

    /// When this item was added locally.
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    /// Creates a new locally-added item awaiting its first mirror.
    pub fn new(
        sku: impl Into<String>,
        name: impl Into<String>,
        quantity: u32,
        unit_price_cents: i64,
        gross_weight_mg: i64,
        net_weight_mg: i64,
    ) -> Self {
        CartItem {
            local_id: Uuid::new_v4(),
            backend_id: None,
            sku: sku.into(),
            name: name.into(),
            quantity,
            unit_price_cents,
            gross_weight_mg,
            net_weight_mg,
            pending_op: PendingOp::Create,
            added_at: Utc::now(),
        }
    }

    /// Creates a synced item from an authoritative remote row.
    pub fn from_remote(remote: &RemoteCartItem) -> Self {
        CartItem {
            local_id: Uuid::new_v4(),
            backend_id: Some(remote.id),
            sku: remote.sku.clone(),
            name: remote.name.clone(),
            quantity: remote.quantity,
            unit_price_cents: remote.unit_price_cents,
            gross_weight_mg: remote.gross_weight_mg,
            net_weight_mg: remote.net_weight_mg,
            pending_op: PendingOp::None,
            added_at: Utc::now(),
        }
    }

    /// Overwrites the authoritative fields from a remote row.
    ///
    /// The local id, added_at, and pending_op are preserved.
    fn overwrite_from_remote(&mut self, remote: &RemoteCartItem) {
        self.backend_id = Some(remote.id);
        self.sku = remote.sku.clone();
        self.name = remote.name.clone();
        self.quantity = remote.quantity;
        self.unit_price_cents = remote.unit_price_cents;
        self.gross_weight_mg = remote.gross_weight_mg;
        self.net_weight_mg = remote.net_weight_mg;
    }

    /// Line total (unit price × quantity).
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.quantity)
    }

    /// Line gross weight (per-unit gross weight × quantity).
    pub fn line_gross_weight_mg(&self) -> i64 {
        self.gross_weight_mg * i64::from(self.quantity)
    }

    /// Line net weight (per-unit net weight × quantity).
    pub fn line_net_weight_mg(&self) -> i64 {
        self.net_weight_mg * i64::from(self.quantity)
    }

    /// Returns true if this item carries unsynced local intent.
    pub fn is_pending(&self) -> bool {
        self.pending_op.is_pending()
    }
}

// =============================================================================
// Remote Cart Item (authoritative wire row)
// =============================================================================

/// A cart row as returned by the remote authority.
///
/// Keyed by `id` (the backend row id). This is the shape carried both by the
/// cart fetch endpoint and by cart channel events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCartItem {
    /// Backend row id.
    pub id: i64,

    /// Backend product id.
    pub product_id: i64,

    /// Product SKU.
    pub sku: String,

    /// Product display name.
    pub name: String,

    /// Quantity on the server.
    pub quantity: u32,

    /// Unit price in cents.
    pub unit_price_cents: i64,

    /// Gross weight per unit, in milligrams.
    #[serde(default)]
    pub gross_weight_mg: i64,

    /// Net weight per unit, in milligrams.
    #[serde(default)]
    pub net_weight_mg: i64,
}

// =============================================================================
// Add Outcome
// =============================================================================

/// Result of a local add: which item absorbed it and the resulting quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// Local id of the item that now holds the SKU.
    pub local_id: Uuid,

    /// True if the add merged into an existing line instead of creating one.
    pub merged: bool,

    /// Total quantity for the SKU after the add.
    pub quantity: u32,
}

// =============================================================================
// Cart
// =============================================================================

/// The locally-owned cart.
///
/// ## Invariants
/// - Visible items are unique by SKU (adding the same SKU merges quantity)
/// - Quantity is always > 0 (quantity 0 removes the item)
/// - `pending_deletes` holds only `pending_op == Delete` tombstones with a
///   known backend id, and never shares a SKU with a visible item
/// - Maximum items and per-item quantity are capped (configured in lib.rs)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    /// Visible items.
    pub items: Vec<CartItem>,

    /// Deletion ledger: removed items whose remote delete is unconfirmed.
    #[serde(default)]
    pub pending_deletes: Vec<CartItem>,
}

impl Cart {
    /// Creates a new empty cart.
    pub fn new() -> Self {
        Cart::default()
    }

    // =========================================================================
    // Local Mutations
    // =========================================================================

    /// Adds an item, merging quantity into an existing line with the same SKU.
    ///
    /// A merged line that was already mirrored is re-flagged `Update` so the
    /// new quantity gets written back. A matching ledger entry is dropped:
    /// the upcoming upsert supersedes the pending delete for that SKU.
    pub fn add_item(&mut self, item: CartItem) -> CoreResult<AddOutcome> {
        if item.quantity == 0 {
            return Err(CoreError::ZeroQuantity);
        }
        if item.quantity > MAX_ITEM_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: item.quantity,
                max: MAX_ITEM_QUANTITY,
            });
        }

        self.pending_deletes.retain(|t| t.sku != item.sku);

        if let Some(existing) = self.items.iter_mut().find(|i| i.sku == item.sku) {
            let new_qty = existing.quantity.saturating_add(item.quantity);
            if new_qty > MAX_ITEM_QUANTITY {
                return Err(CoreError::QuantityTooLarge {
                    requested: new_qty,
                    max: MAX_ITEM_QUANTITY,
                });
            }
            existing.quantity = new_qty;
            if existing.pending_op == PendingOp::None {
                existing.pending_op = PendingOp::Update;
            }
            return Ok(AddOutcome {
                local_id: existing.local_id,
                merged: true,
                quantity: new_qty,
            });
        }

        if self.items.len() >= MAX_CART_ITEMS {
            return Err(CoreError::CartTooLarge {
                max: MAX_CART_ITEMS,
            });
        }

        let outcome = AddOutcome {
            local_id: item.local_id,
            merged: false,
            quantity: item.quantity,
        };
        self.items.push(item);
        Ok(outcome)
    }

    /// Sets the quantity of an item. Quantity 0 removes it.
    pub fn update_quantity(&mut self, local_id: Uuid, quantity: u32) -> CoreResult<()> {
        if quantity == 0 {
            return self.remove_item(local_id).map(|_| ());
        }
        if quantity > MAX_ITEM_QUANTITY {
            return Err(CoreError::QuantityTooLarge {
                requested: quantity,
                max: MAX_ITEM_QUANTITY,
            });
        }

        let item = self
            .items
            .iter_mut()
            .find(|i| i.local_id == local_id)
            .ok_or(CoreError::ItemNotFound(local_id))?;

        item.quantity = quantity;
        if item.pending_op == PendingOp::None {
            item.pending_op = PendingOp::Update;
        }
        Ok(())
    }

    /// Removes an item immediately from the visible cart.
    ///
    /// A mirrored item moves to the deletion ledger so the remote delete can
    /// be retried until confirmed. A never-mirrored item just disappears.
    /// Returns the removed item.
    pub fn remove_item(&mut self, local_id: Uuid) -> CoreResult<CartItem> {
        let idx = self
            .items
            .iter()
            .position(|i| i.local_id == local_id)
            .ok_or(CoreError::ItemNotFound(local_id))?;

        let removed = self.items.remove(idx);
        if removed.backend_id.is_some() {
            let mut tombstone = removed.clone();
            tombstone.pending_op = PendingOp::Delete;
            self.pending_deletes.push(tombstone);
        }
        Ok(removed)
    }

    /// Empties the visible cart, keeping delete intent for mirrored items.
    ///
    /// Every item with a backend id joins the deletion ledger; the caller is
    /// expected to fire a remote clear, and the ledger covers the case where
    /// that clear never lands.
    pub fn clear(&mut self) {
        for item in self.items.drain(..) {
            if let Some(backend_id) = item.backend_id {
                if !self
                    .pending_deletes
                    .iter()
                    .any(|t| t.backend_id == Some(backend_id))
                {
                    let mut tombstone = item;
                    tombstone.pending_op = PendingOp::Delete;
                    self.pending_deletes.push(tombstone);
                }
            }
        }
    }

    /// Drops all local state, ledger included. Used when the active user
    /// changes or after a successful checkout.
    pub fn reset(&mut self) {
        self.items.clear();
        self.pending_deletes.clear();
    }

    // =========================================================================
    // Mirror Confirmations
    // =========================================================================

    /// Folds a successful mirror back into the item.
    ///
    /// Clears `pending_op` only when the mirrored quantity still matches the
    /// live quantity; a mismatch means a newer local edit raced the mirror,
    /// so the item is re-flagged `Update` and the next flush converges it.
    /// Returns true when the item is fully settled.
    pub fn confirm_mirror(
        &mut self,
        local_id: Uuid,
        backend_id: i64,
        mirrored_quantity: u32,
    ) -> bool {
        if let Some(item) = self.items.iter_mut().find(|i| i.local_id == local_id) {
            item.backend_id = Some(backend_id);
            if item.quantity == mirrored_quantity {
                item.pending_op = PendingOp::None;
                true
            } else {
                item.pending_op = PendingOp::Update;
                false
            }
        } else {
            // Removed while the mirror was in flight. The remote row now
            // exists without a local counterpart; ledger it for deletion.
            if !self
                .pending_deletes
                .iter()
                .any(|t| t.backend_id == Some(backend_id))
            {
                let mut tombstone = CartItem::new("", "", 1, 0, 0, 0);
                tombstone.backend_id = Some(backend_id);
                tombstone.pending_op = PendingOp::Delete;
                self.pending_deletes.push(tombstone);
            }
            false
        }
    }

    /// Drops a ledger entry after its remote delete succeeded (or the server
    /// reported the row already gone).
    pub fn confirm_delete(&mut self, backend_id: i64) {
        self.pending_deletes
            .retain(|t| t.backend_id != Some(backend_id));
    }

    // =========================================================================
    // Remote Reconciliation
    // =========================================================================

    /// Merges an authoritative snapshot into local state.
    ///
    /// - Items with `pending_op == None` are overwritten from their snapshot
    ///   row (matched by backend id) or removed when absent (server won)
    /// - Pending items are left untouched
    /// - Snapshot rows with no local counterpart become new synced items,
    ///   unless their backend id is on the deletion ledger or their SKU is
    ///   held by a pending local item
    pub fn merge_snapshot(&mut self, snapshot: &[RemoteCartItem]) {
        let tombstoned: HashSet<i64> = self
            .pending_deletes
            .iter()
            .filter_map(|t| t.backend_id)
            .collect();
        let by_backend: HashMap<i64, &RemoteCartItem> =
            snapshot.iter().map(|r| (r.id, r)).collect();
        let pending_skus: HashSet<String> = self
            .items
            .iter()
            .filter(|i| i.is_pending())
            .map(|i| i.sku.clone())
            .collect();

        self.items.retain_mut(|item| {
            if item.is_pending() {
                return true;
            }
            match item.backend_id {
                Some(backend_id) => match by_backend.get(&backend_id) {
                    Some(remote) => {
                        item.overwrite_from_remote(remote);
                        true
                    }
                    // Server-side deletion won.
                    None => false,
                },
                // Synced item without a backend id cannot exist; keep it so
                // nothing user-visible is silently dropped.
                None => true,
            }
        });

        let known: HashSet<i64> = self.items.iter().filter_map(|i| i.backend_id).collect();
        for remote in snapshot {
            if known.contains(&remote.id)
                || tombstoned.contains(&remote.id)
                || pending_skus.contains(&remote.sku)
                || remote.quantity == 0
            {
                continue;
            }
            self.items.push(CartItem::from_remote(remote));
        }
    }

    // =========================================================================
    // Channel Event Application
    // =========================================================================

    /// Applies a pushed item-added delta.
    pub fn apply_item_added(&mut self, remote: &RemoteCartItem) {
        if self
            .pending_deletes
            .iter()
            .any(|t| t.backend_id == Some(remote.id))
        {
            // Local delete intent wins until it is flushed or confirmed.
            return;
        }
        if let Some(item) = self
            .items
            .iter_mut()
            .find(|i| i.backend_id == Some(remote.id))
        {
            if !item.is_pending() {
                item.overwrite_from_remote(remote);
            }
            return;
        }
        if let Some(item) = self.items.iter_mut().find(|i| i.sku == remote.sku) {
            if !item.is_pending() {
                item.overwrite_from_remote(remote);
            }
            return;
        }
        if remote.quantity > 0 && self.items.len() < MAX_CART_ITEMS {
            self.items.push(CartItem::from_remote(remote));
        }
    }

    /// Applies a pushed item-updated delta.
    pub fn apply_item_updated(&mut self, remote: &RemoteCartItem) {
        if let Some(item) = self
            .items
            .iter_mut()
            .find(|i| i.backend_id == Some(remote.id))
        {
            if !item.is_pending() {
                item.overwrite_from_remote(remote);
            }
        }
    }

    /// Applies a pushed item-removed delta.
    pub fn apply_item_removed(&mut self, backend_id: i64) {
        // The server already dropped the row, so any pending delete for it
        // is settled.
        self.confirm_delete(backend_id);
        self.items
            .retain(|i| i.backend_id != Some(backend_id) || i.is_pending());
    }

    /// Applies a pushed cart-cleared delta.
    ///
    /// Synced items vanish (the server emptied the cart). Pending items
    /// survive but are demoted to unmirrored creates: their server rows are
    /// gone, so the previous backend ids are meaningless. The ledger empties,
    /// there is nothing left to delete remotely.
    pub fn apply_cart_cleared(&mut self) {
        self.items.retain(|i| i.is_pending());
        for item in &mut self.items {
            item.backend_id = None;
            item.pending_op = PendingOp::Create;
        }
        self.pending_deletes.clear();
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Returns the item with the given local id.
    pub fn find(&self, local_id: Uuid) -> Option<&CartItem> {
        self.items.iter().find(|i| i.local_id == local_id)
    }

    /// Returns the visible item with the given SKU.
    pub fn find_by_sku(&self, sku: &str) -> Option<&CartItem> {
        self.items.iter().find(|i| i.sku == sku)
    }

    /// Clones the items that carry unsynced local intent.
    pub fn unsynced_items(&self) -> Vec<CartItem> {
        self.items.iter().filter(|i| i.is_pending()).cloned().collect()
    }

    /// Clones the deletion ledger.
    pub fn pending_delete_items(&self) -> Vec<CartItem> {
        self.pending_deletes.clone()
    }

    /// Returns true if every visible item is mirrored and the ledger is empty.
    pub fn is_fully_synced(&self) -> bool {
        self.pending_deletes.is_empty() && self.items.iter().all(|i| !i.is_pending())
    }

    /// Number of visible lines.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Total quantity across all lines.
    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Checks if the visible cart is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Totals summary over the visible items.
    pub fn totals(&self) -> CartTotals {
        CartTotals {
            item_count: self.item_count(),
            total_quantity: self.total_quantity(),
            subtotal_cents: self.items.iter().map(|i| i.line_total_cents()).sum(),
            gross_weight_mg: self.items.iter().map(|i| i.line_gross_weight_mg()).sum(),
            net_weight_mg: self.items.iter().map(|i| i.line_net_weight_mg()).sum(),
        }
    }
}

// =============================================================================
// Cart Totals
// =============================================================================

/// Cart totals summary for display layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartTotals {
    pub item_count: usize,
    pub total_quantity: u32,
    pub subtotal_cents: i64,
    pub gross_weight_mg: i64,
    pub net_weight_mg: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gold_ring(quantity: u32) -> CartItem {
        CartItem::new("AU-RING-18K", "18K Gold Ring", quantity, 45_000_00, 5_200, 4_800)
    }

    fn remote_row(id: i64, sku: &str, quantity: u32) -> RemoteCartItem {
        RemoteCartItem {
            id,
            product_id: id * 10,
            sku: sku.to_string(),
            name: format!("Item {sku}"),
            quantity,
            unit_price_cents: 45_000_00,
            gross_weight_mg: 5_200,
            net_weight_mg: 4_800,
        }
    }

    #[test]
    fn test_add_item() {
        let mut cart = Cart::new();
        let outcome = cart.add_item(gold_ring(2)).unwrap();

        assert!(!outcome.merged);
        assert_eq!(outcome.quantity, 2);
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.items[0].pending_op, PendingOp::Create);
        assert_eq!(cart.items[0].backend_id, None);
    }

    #[test]
    fn test_add_same_sku_merges_quantity() {
        let mut cart = Cart::new();
        cart.add_item(gold_ring(2)).unwrap();
        let outcome = cart.add_item(gold_ring(3)).unwrap();

        assert!(outcome.merged);
        assert_eq!(outcome.quantity, 5);
        assert_eq!(cart.item_count(), 1);
        // Never mirrored, so the line is still one pending create.
        assert_eq!(cart.items[0].pending_op, PendingOp::Create);
    }

    #[test]
    fn test_add_to_synced_line_flags_update() {
        let mut cart = Cart::new();
        cart.merge_snapshot(&[remote_row(7, "AU-RING-18K", 1)]);
        assert_eq!(cart.items[0].pending_op, PendingOp::None);

        cart.add_item(gold_ring(1)).unwrap();
        assert_eq!(cart.items[0].quantity, 2);
        assert_eq!(cart.items[0].pending_op, PendingOp::Update);
        assert_eq!(cart.items[0].backend_id, Some(7));
    }

    #[test]
    fn test_add_rejects_zero_and_caps() {
        let mut cart = Cart::new();
        assert!(matches!(
            cart.add_item(gold_ring(0)),
            Err(CoreError::ZeroQuantity)
        ));
        assert!(matches!(
            cart.add_item(gold_ring(MAX_ITEM_QUANTITY + 1)),
            Err(CoreError::QuantityTooLarge { .. })
        ));
    }

    #[test]
    fn test_remove_mirrored_item_moves_to_ledger() {
        let mut cart = Cart::new();
        cart.merge_snapshot(&[remote_row(7, "AU-RING-18K", 2)]);
        let local_id = cart.items[0].local_id;

        let removed = cart.remove_item(local_id).unwrap();
        assert_eq!(removed.backend_id, Some(7));
        assert!(cart.is_empty());
        assert_eq!(cart.pending_deletes.len(), 1);
        assert_eq!(cart.pending_deletes[0].pending_op, PendingOp::Delete);
    }

    #[test]
    fn test_remove_unmirrored_item_leaves_no_ledger() {
        let mut cart = Cart::new();
        let outcome = cart.add_item(gold_ring(1)).unwrap();

        cart.remove_item(outcome.local_id).unwrap();
        assert!(cart.is_empty());
        assert!(cart.pending_deletes.is_empty());
    }

    #[test]
    fn test_re_add_supersedes_pending_delete() {
        let mut cart = Cart::new();
        cart.merge_snapshot(&[remote_row(7, "AU-RING-18K", 2)]);
        let local_id = cart.items[0].local_id;
        cart.remove_item(local_id).unwrap();
        assert_eq!(cart.pending_deletes.len(), 1);

        // Re-adding the SKU drops the tombstone; the upsert will set the
        // fresh quantity on the same (user, sku) row.
        cart.add_item(gold_ring(1)).unwrap();
        assert!(cart.pending_deletes.is_empty());
    }

    #[test]
    fn test_update_quantity_zero_removes() {
        let mut cart = Cart::new();
        let outcome = cart.add_item(gold_ring(2)).unwrap();

        cart.update_quantity(outcome.local_id, 0).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_empty_snapshot_keeps_pending_create() {
        let mut cart = Cart::new();
        cart.add_item(gold_ring(2)).unwrap();

        // Lagging/empty server view while the add is still pending.
        cart.merge_snapshot(&[]);

        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.items[0].pending_op, PendingOp::Create);
        assert_eq!(cart.items[0].quantity, 2);
    }

    #[test]
    fn test_snapshot_overwrites_synced_quantity() {
        let mut cart = Cart::new();
        cart.merge_snapshot(&[remote_row(7, "AU-RING-18K", 2)]);
        assert_eq!(cart.items[0].quantity, 2);

        cart.merge_snapshot(&[remote_row(7, "AU-RING-18K", 6)]);
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.items[0].quantity, 6);
        assert_eq!(cart.items[0].pending_op, PendingOp::None);
    }

    #[test]
    fn test_snapshot_removes_server_deleted_item() {
        let mut cart = Cart::new();
        cart.merge_snapshot(&[
            remote_row(7, "AU-RING-18K", 2),
            remote_row(8, "AU-CHAIN-22K", 1),
        ]);
        assert_eq!(cart.item_count(), 2);

        cart.merge_snapshot(&[remote_row(8, "AU-CHAIN-22K", 1)]);
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.items[0].backend_id, Some(8));
    }

    #[test]
    fn test_snapshot_does_not_resurrect_ledgered_item() {
        let mut cart = Cart::new();
        cart.merge_snapshot(&[remote_row(7, "AU-RING-18K", 2)]);
        let local_id = cart.items[0].local_id;
        cart.remove_item(local_id).unwrap();

        // Server has not processed the delete yet and still reports the row.
        cart.merge_snapshot(&[remote_row(7, "AU-RING-18K", 2)]);
        assert!(cart.is_empty());
        assert_eq!(cart.pending_deletes.len(), 1);
    }

    #[test]
    fn test_confirm_mirror_settles_matching_quantity() {
        let mut cart = Cart::new();
        let outcome = cart.add_item(gold_ring(2)).unwrap();

        let settled = cart.confirm_mirror(outcome.local_id, 42, 2);
        assert!(settled);
        assert_eq!(cart.items[0].backend_id, Some(42));
        assert_eq!(cart.items[0].pending_op, PendingOp::None);
    }

    #[test]
    fn test_confirm_mirror_reflags_on_raced_edit() {
        let mut cart = Cart::new();
        let outcome = cart.add_item(gold_ring(2)).unwrap();
        // A newer local edit lands while the mirror for quantity 2 is in
        // flight.
        cart.update_quantity(outcome.local_id, 5).unwrap();

        let settled = cart.confirm_mirror(outcome.local_id, 42, 2);
        assert!(!settled);
        assert_eq!(cart.items[0].backend_id, Some(42));
        assert_eq!(cart.items[0].pending_op, PendingOp::Update);
        assert_eq!(cart.items[0].quantity, 5);
    }

    #[test]
    fn test_confirm_mirror_after_removal_ledgers_orphan_row() {
        let mut cart = Cart::new();
        let outcome = cart.add_item(gold_ring(2)).unwrap();
        cart.remove_item(outcome.local_id).unwrap();
        assert!(cart.pending_deletes.is_empty());

        // The create mirror lands after the local removal; the orphaned
        // remote row must be scheduled for deletion.
        cart.confirm_mirror(outcome.local_id, 42, 2);
        assert_eq!(cart.pending_deletes.len(), 1);
        assert_eq!(cart.pending_deletes[0].backend_id, Some(42));
    }

    #[test]
    fn test_clear_ledgers_mirrored_items() {
        let mut cart = Cart::new();
        cart.merge_snapshot(&[remote_row(7, "AU-RING-18K", 2)]);
        cart.add_item(CartItem::new("AU-COIN-24K", "Gold Coin", 1, 9_000_00, 8_000, 8_000))
            .unwrap();

        cart.clear();
        assert!(cart.is_empty());
        // Only the mirrored item needs a remote delete.
        assert_eq!(cart.pending_deletes.len(), 1);
        assert_eq!(cart.pending_deletes[0].backend_id, Some(7));
    }

    #[test]
    fn test_apply_item_removed_respects_pending() {
        let mut cart = Cart::new();
        cart.merge_snapshot(&[remote_row(7, "AU-RING-18K", 2)]);
        cart.update_quantity(cart.items[0].local_id, 4).unwrap();

        // Push says the row is gone, but a local update is pending; local
        // intent wins until flushed.
        cart.apply_item_removed(7);
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.items[0].pending_op, PendingOp::Update);
    }

    #[test]
    fn test_apply_cart_cleared_demotes_pending_items() {
        let mut cart = Cart::new();
        cart.merge_snapshot(&[remote_row(7, "AU-RING-18K", 2)]);
        cart.add_item(CartItem::new("AU-COIN-24K", "Gold Coin", 1, 9_000_00, 8_000, 8_000))
            .unwrap();

        cart.apply_cart_cleared();
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.items[0].sku, "AU-COIN-24K");
        assert_eq!(cart.items[0].backend_id, None);
        assert_eq!(cart.items[0].pending_op, PendingOp::Create);
        assert!(cart.pending_deletes.is_empty());
    }

    #[test]
    fn test_totals_include_weight() {
        let mut cart = Cart::new();
        cart.add_item(gold_ring(2)).unwrap();

        let totals = cart.totals();
        assert_eq!(totals.item_count, 1);
        assert_eq!(totals.total_quantity, 2);
        assert_eq!(totals.subtotal_cents, 90_000_00);
        assert_eq!(totals.gross_weight_mg, 10_400);
        assert_eq!(totals.net_weight_mg, 9_600);
    }

    #[test]
    fn test_cart_serde_round_trip() {
        let mut cart = Cart::new();
        cart.merge_snapshot(&[remote_row(7, "AU-RING-18K", 2)]);
        cart.remove_item(cart.items[0].local_id).unwrap();
        cart.add_item(gold_ring(1)).unwrap();

        let json = serde_json::to_string(&cart).unwrap();
        let restored: Cart = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.item_count(), cart.item_count());
        assert_eq!(restored.pending_deletes.len(), cart.pending_deletes.len());
    }
}
