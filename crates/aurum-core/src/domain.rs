//! # Data-Domain Vocabulary
//!
//! Closed vocabulary for the named data domains the storefront keeps in
//! sync, and for the actions carried on change notifications.
//!
//! ## Vocabulary Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Data Domains & Actions                           │
//! │                                                                         │
//! │  DataDomain          wire key         push event                        │
//! │  ──────────          ────────         ──────────                        │
//! │  Categories          categories       category-update                   │
//! │  Products            products         product-update                    │
//! │  Orders              orders           order-update (+ order-created,    │
//! │                                        orders-created-from-cart)        │
//! │  Sliders             sliders          slider-update                     │
//! │  AppIcons            app-icons        app-icon-update                   │
//! │  AppVersions         app-versions     app-version-update                │
//! │  Users               users            user-update                       │
//! │                                                                         │
//! │  UpdateAction: created | updated | deleted                              │
//! │  CartAction:   item-added | item-updated | item-removed | cart-cleared  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// =============================================================================
// Data Domain
// =============================================================================

/// A named data domain kept in sync between the storefront and the backend.
///
/// Replaces the free-form string keys of loosely-typed clients with a closed
/// enum: an unknown domain is a parse error, never a silent new map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataDomain {
    /// Product categories.
    Categories,
    /// Catalog products.
    Products,
    /// Customer orders.
    Orders,
    /// Home-screen slider banners.
    Sliders,
    /// App icon assets.
    AppIcons,
    /// Published app versions.
    AppVersions,
    /// User profiles.
    Users,
}

impl DataDomain {
    /// All domains, in a stable order.
    pub const ALL: [DataDomain; 7] = [
        DataDomain::Categories,
        DataDomain::Products,
        DataDomain::Orders,
        DataDomain::Sliders,
        DataDomain::AppIcons,
        DataDomain::AppVersions,
        DataDomain::Users,
    ];

    /// Wire key for REST paths and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataDomain::Categories => "categories",
            DataDomain::Products => "products",
            DataDomain::Orders => "orders",
            DataDomain::Sliders => "sliders",
            DataDomain::AppIcons => "app-icons",
            DataDomain::AppVersions => "app-versions",
            DataDomain::Users => "users",
        }
    }

    /// Returns true if products in this domain can be scoped by category.
    ///
    /// Only product fetches accept a category filter; every other domain
    /// ignores it.
    pub fn supports_category_filter(&self) -> bool {
        matches!(self, DataDomain::Products)
    }
}

impl std::fmt::Display for DataDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DataDomain {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "categories" => Ok(DataDomain::Categories),
            "products" => Ok(DataDomain::Products),
            "orders" => Ok(DataDomain::Orders),
            "sliders" => Ok(DataDomain::Sliders),
            "app-icons" | "appicons" => Ok(DataDomain::AppIcons),
            "app-versions" | "appversions" => Ok(DataDomain::AppVersions),
            "users" => Ok(DataDomain::Users),
            other => Err(CoreError::UnknownDomain(other.to_string())),
        }
    }
}

// =============================================================================
// Update Action
// =============================================================================

/// The action carried on a domain change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateAction::Created => write!(f, "created"),
            UpdateAction::Updated => write!(f, "updated"),
            UpdateAction::Deleted => write!(f, "deleted"),
        }
    }
}

// =============================================================================
// Cart Action
// =============================================================================

/// The action carried on a cart change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CartAction {
    ItemAdded,
    ItemUpdated,
    ItemRemoved,
    CartCleared,
}

impl std::fmt::Display for CartAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CartAction::ItemAdded => write!(f, "item-added"),
            CartAction::ItemUpdated => write!(f, "item-updated"),
            CartAction::ItemRemoved => write!(f, "item-removed"),
            CartAction::CartCleared => write!(f, "cart-cleared"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_parsing() {
        assert_eq!("products".parse::<DataDomain>().unwrap(), DataDomain::Products);
        assert_eq!("app-icons".parse::<DataDomain>().unwrap(), DataDomain::AppIcons);
        assert_eq!("appversions".parse::<DataDomain>().unwrap(), DataDomain::AppVersions);
        assert!("widgets".parse::<DataDomain>().is_err());
    }

    #[test]
    fn test_domain_round_trip() {
        for domain in DataDomain::ALL {
            assert_eq!(domain.as_str().parse::<DataDomain>().unwrap(), domain);
        }
    }

    #[test]
    fn test_category_filter_support() {
        assert!(DataDomain::Products.supports_category_filter());
        assert!(!DataDomain::Categories.supports_category_filter());
        assert!(!DataDomain::Orders.supports_category_filter());
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_string(&UpdateAction::Created).unwrap();
        assert_eq!(json, "\"created\"");

        let json = serde_json::to_string(&CartAction::ItemAdded).unwrap();
        assert_eq!(json, "\"item-added\"");

        let parsed: CartAction = serde_json::from_str("\"cart-cleared\"").unwrap();
        assert_eq!(parsed, CartAction::CartCleared);
    }
}
