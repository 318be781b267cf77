//! # Error Types
//!
//! Domain-specific error types for aurum-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  aurum-core errors (this file)                                         │
//! │  └── CoreError        - Cart rule violations, vocabulary parse errors  │
//! │                                                                         │
//! │  aurum-sync errors (separate crate)                                    │
//! │  └── SyncError        - Network, channel, storage, checkout failures   │
//! │                                                                         │
//! │  Flow: CoreError → SyncError → UI layer                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (SKU, ID, etc.)
//! 3. Errors are enum variants, never String

use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
///
/// These errors represent cart rule violations or vocabulary failures.
/// They should be caught and translated to user-friendly messages.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Cart has exceeded maximum allowed items.
    #[error("Cart cannot have more than {max} items")]
    CartTooLarge { max: usize },

    /// Item quantity exceeds maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: u32, max: u32 },

    /// Quantity must be at least 1.
    ///
    /// ## When This Occurs
    /// - Adding an item with quantity 0
    /// - A remote snapshot row carries quantity 0 (rejected, deletion is
    ///   expressed by absence, not zero)
    #[error("Quantity must be greater than zero")]
    ZeroQuantity,

    /// Cart item cannot be found by its local id.
    #[error("Cart item not found: {0}")]
    ItemNotFound(Uuid),

    /// A string did not parse into a known data domain.
    #[error("Unknown data domain: '{0}'")]
    UnknownDomain(String),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::QuantityTooLarge {
            requested: 1200,
            max: 999,
        };
        assert_eq!(
            err.to_string(),
            "Quantity 1200 exceeds maximum allowed (999)"
        );

        let err = CoreError::CartTooLarge { max: 100 };
        assert_eq!(err.to_string(), "Cart cannot have more than 100 items");
    }

    #[test]
    fn test_unknown_domain_message() {
        let err = CoreError::UnknownDomain("widgets".to_string());
        assert!(err.to_string().contains("widgets"));
    }
}
