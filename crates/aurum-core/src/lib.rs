//! # Aurum Core
//!
//! Pure domain logic for the Aurum storefront sync client. This crate owns
//! the cart model, the reconciliation rules, and the data-domain vocabulary.
//! It performs no I/O: no sockets, no HTTP, no disk, no clocks beyond
//! timestamping.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              UI / app shell                 │
//! └──────────────────────┬──────────────────────┘
//!                        │
//! ┌──────────────────────▼──────────────────────┐
//! │  aurum-sync   (channel, polling, mirroring) │
//! └──────────────────────┬──────────────────────┘
//!                        │
//! ┌──────────────────────▼──────────────────────┐
//! │  aurum-core   (YOU ARE HERE)                │
//! │  cart model · merge rules · domain types    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Everything here is synchronous and deterministic, which is what makes the
//! reconciliation rules unit-testable without a server.

pub mod cart;
pub mod domain;
pub mod error;

// Re-export commonly used types at crate root
pub use cart::{AddOutcome, Cart, CartItem, CartTotals, PendingOp, RemoteCartItem};
pub use domain::{CartAction, DataDomain, UpdateAction};
pub use error::{CoreError, CoreResult};

// =============================================================================
// Business Constants
// =============================================================================

/// Maximum number of distinct lines in a cart.
///
/// **Business Reason:** A storefront cart is a working set, not inventory.
/// Past this size the mirror traffic per edit stops being negligible.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity on a single cart line.
///
/// **Business Reason:** Bulk orders above this go through the trade desk,
/// not the retail cart.
pub const MAX_ITEM_QUANTITY: u32 = 999;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_are_sane() {
        assert!(MAX_CART_ITEMS >= 10);
        assert!(MAX_ITEM_QUANTITY >= 1);
    }

    #[test]
    fn test_core_types_are_exported() {
        let cart = Cart::new();
        assert!(cart.is_empty());
        assert_eq!(DataDomain::ALL.len(), 7);
    }
}
