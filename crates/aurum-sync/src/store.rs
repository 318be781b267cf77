//! # Cart Store
//!
//! Embedded persistence for cart state, keyed per user. Survives restarts
//! so unsynced edits made offline are not lost with the process.
//!
//! Layout inside the `cart` tree:
//! ```text
//! cart:{userId}    -> JSON-serialized Cart (items + deletion ledger)
//! meta:last-user   -> i64 big-endian, the most recent active user
//! ```

use std::path::Path;

use sled::Db;
use tracing::{debug, warn};

use aurum_core::Cart;

use crate::error::{SyncError, SyncResult};

/// Durable cart storage on top of an embedded sled database.
#[derive(Clone)]
pub struct CartStore {
    db: Db,
    tree: sled::Tree,
}

impl CartStore {
    /// Opens (or creates) the store at the given directory.
    pub fn open(path: impl AsRef<Path>) -> SyncResult<Self> {
        let db = sled::open(path)?;
        let tree = db.open_tree("cart")?;
        Ok(CartStore { db, tree })
    }

    /// Opens an in-memory store that vanishes on drop.
    pub fn open_temporary() -> SyncResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        let tree = db.open_tree("cart")?;
        Ok(CartStore { db, tree })
    }

    /// Persists the full cart state for one user.
    pub fn save_cart(&self, user_id: i64, cart: &Cart) -> SyncResult<()> {
        let bytes = serde_json::to_vec(cart)?;
        self.tree.insert(Self::cart_key(user_id), bytes)?;
        debug!(user_id, items = cart.item_count(), "Cart persisted");
        Ok(())
    }

    /// Loads the persisted cart for one user.
    ///
    /// An unreadable record is discarded rather than propagated: a fresh
    /// cart beats a client that cannot start.
    pub fn load_cart(&self, user_id: i64) -> SyncResult<Option<Cart>> {
        match self.tree.get(Self::cart_key(user_id))? {
            Some(bytes) => match serde_json::from_slice(&bytes) {
                Ok(cart) => Ok(Some(cart)),
                Err(e) => {
                    warn!(user_id, error = %e, "Discarding unreadable persisted cart");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Drops the persisted cart for one user.
    pub fn clear_cart(&self, user_id: i64) -> SyncResult<()> {
        self.tree.remove(Self::cart_key(user_id))?;
        Ok(())
    }

    /// Records the most recent active user.
    pub fn save_last_user(&self, user_id: i64) -> SyncResult<()> {
        self.tree
            .insert(b"meta:last-user", user_id.to_be_bytes().to_vec())?;
        Ok(())
    }

    /// Returns the most recent active user, if any.
    pub fn load_last_user(&self) -> SyncResult<Option<i64>> {
        match self.tree.get(b"meta:last-user")? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_ref()
                    .try_into()
                    .map_err(|_| SyncError::StorageError("corrupt last-user record".into()))?;
                Ok(Some(i64::from_be_bytes(raw)))
            }
            None => Ok(None),
        }
    }

    /// Forces buffered writes to disk.
    pub fn flush(&self) -> SyncResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn cart_key(user_id: i64) -> Vec<u8> {
        format!("cart:{user_id}").into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurum_core::CartItem;

    fn cart_with_one_item() -> Cart {
        let mut cart = Cart::new();
        cart.add_item(CartItem::new(
            "AU-RING-18K",
            "18K Gold Ring",
            2,
            45_000_00,
            5_200,
            4_800,
        ))
        .unwrap();
        cart
    }

    #[test]
    fn test_cart_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CartStore::open(dir.path().join("cart-db")).unwrap();

        store.save_cart(42, &cart_with_one_item()).unwrap();
        let loaded = store.load_cart(42).unwrap().unwrap();
        assert_eq!(loaded.item_count(), 1);
        assert_eq!(loaded.items[0].sku, "AU-RING-18K");
        assert_eq!(loaded.items[0].quantity, 2);
    }

    #[test]
    fn test_carts_are_isolated_per_user() {
        let store = CartStore::open_temporary().unwrap();

        store.save_cart(1, &cart_with_one_item()).unwrap();
        assert!(store.load_cart(1).unwrap().is_some());
        assert!(store.load_cart(2).unwrap().is_none());

        store.clear_cart(1).unwrap();
        assert!(store.load_cart(1).unwrap().is_none());
    }

    #[test]
    fn test_unreadable_cart_is_discarded() {
        let store = CartStore::open_temporary().unwrap();
        store
            .tree
            .insert(b"cart:7".to_vec(), b"not json".to_vec())
            .unwrap();

        assert!(store.load_cart(7).unwrap().is_none());
    }

    #[test]
    fn test_last_user_round_trip() {
        let store = CartStore::open_temporary().unwrap();
        assert!(store.load_last_user().unwrap().is_none());

        store.save_last_user(42).unwrap();
        assert_eq!(store.load_last_user().unwrap(), Some(42));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cart-db");

        {
            let store = CartStore::open(&path).unwrap();
            store.save_cart(9, &cart_with_one_item()).unwrap();
            store.flush().unwrap();
        }

        let store = CartStore::open(&path).unwrap();
        assert!(store.load_cart(9).unwrap().is_some());
    }
}
