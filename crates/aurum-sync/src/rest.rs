//! # REST Access
//!
//! HTTP client paths for domain fetches and cart mirroring.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Backend Endpoints                               │
//! │                                                                         │
//! │  DOMAIN FETCH (differential polling)                                    │
//! │  GET  /api/{domain}                    categories, products, orders...  │
//! │  GET  /api/products?categoryId=N       the only filtered domain         │
//! │                                                                         │
//! │  CART MIRROR (per signed-in user)                                       │
//! │  GET    /api/cart/{userId}             full snapshot                    │
//! │  POST   /api/cart/{userId}/items       upsert by SKU, absolute qty      │
//! │  PATCH  /api/cart/items/{id}           set quantity on a known row      │
//! │  DELETE /api/cart/items/{id}           404 counts as success            │
//! │  DELETE /api/cart/{userId}             clear                            │
//! │                                                                         │
//! │  CHECKOUT                                                               │
//! │  POST   /api/orders/from-cart          converts the server cart         │
//! │                                                                         │
//! │  Every response is wrapped: { "success": bool, "data": ..., "message" } │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The upsert carries an ABSOLUTE quantity, never a delta, which is what
//! makes mirror retries idempotent.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use aurum_core::{DataDomain, RemoteCartItem};

use crate::error::{SyncError, SyncResult};
use crate::poller::{DomainFetch, FilterOptions};

// =============================================================================
// Response Envelope
// =============================================================================

/// Standard backend response wrapper.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,

    pub data: Option<T>,

    #[serde(default)]
    pub message: Option<String>,
}

async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> SyncResult<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(SyncError::UnexpectedStatus(status.as_u16()));
    }

    let envelope: ApiEnvelope<T> = response.json().await?;
    if !envelope.success {
        return Err(SyncError::HttpError(
            envelope.message.unwrap_or_else(|| "request failed".into()),
        ));
    }
    envelope
        .data
        .ok_or_else(|| SyncError::HttpError("missing data in response".into()))
}

async fn read_ack(response: reqwest::Response) -> SyncResult<()> {
    let status = response.status();
    if !status.is_success() {
        return Err(SyncError::UnexpectedStatus(status.as_u16()));
    }
    Ok(())
}

// =============================================================================
// Cart API Seam
// =============================================================================

/// Remote cart operations.
///
/// Trait seam so the reconciler can be tested against a scripted backend.
#[async_trait]
pub trait CartApi: Send + Sync {
    /// Fetches the authoritative cart snapshot.
    async fn fetch_cart(&self, user_id: i64) -> SyncResult<Vec<RemoteCartItem>>;

    /// Upserts one SKU with an absolute quantity. Returns the resulting row.
    async fn upsert_item(
        &self,
        user_id: i64,
        sku: &str,
        quantity: u32,
    ) -> SyncResult<RemoteCartItem>;

    /// Sets the quantity on a known row. Returns false when the row is gone.
    async fn update_quantity(&self, backend_id: i64, quantity: u32) -> SyncResult<bool>;

    /// Deletes a row. An already-absent row counts as success.
    async fn remove_item(&self, backend_id: i64) -> SyncResult<()>;

    /// Empties the user's server-side cart.
    async fn clear_cart(&self, user_id: i64) -> SyncResult<()>;

    /// Converts the server-side cart into orders. Returns the order ids.
    async fn create_order_from_cart(
        &self,
        user_id: i64,
        remark: &str,
        courier: &str,
    ) -> SyncResult<Vec<i64>>;
}

// =============================================================================
// HTTP Cart API
// =============================================================================

/// [`CartApi`] over the backend's REST endpoints.
pub struct HttpCartApi {
    client: Client,
    base_url: String,
}

impl HttpCartApi {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        HttpCartApi {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl CartApi for HttpCartApi {
    async fn fetch_cart(&self, user_id: i64) -> SyncResult<Vec<RemoteCartItem>> {
        let response = self
            .client
            .get(self.url(&format!("/api/cart/{user_id}")))
            .send()
            .await?;
        read_envelope(response).await
    }

    async fn upsert_item(
        &self,
        user_id: i64,
        sku: &str,
        quantity: u32,
    ) -> SyncResult<RemoteCartItem> {
        let response = self
            .client
            .post(self.url(&format!("/api/cart/{user_id}/items")))
            .json(&json!({ "sku": sku, "quantity": quantity }))
            .send()
            .await?;
        read_envelope(response).await
    }

    async fn update_quantity(&self, backend_id: i64, quantity: u32) -> SyncResult<bool> {
        let response = self
            .client
            .patch(self.url(&format!("/api/cart/items/{backend_id}")))
            .json(&json!({ "quantity": quantity }))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(backend_id, "Cart row gone, quantity update skipped");
            return Ok(false);
        }
        read_ack(response).await?;
        Ok(true)
    }

    async fn remove_item(&self, backend_id: i64) -> SyncResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/api/cart/items/{backend_id}")))
            .send()
            .await?;
        // The row being absent is the state we wanted.
        if response.status() == StatusCode::NOT_FOUND {
            debug!(backend_id, "Cart row already gone");
            return Ok(());
        }
        read_ack(response).await
    }

    async fn clear_cart(&self, user_id: i64) -> SyncResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/api/cart/{user_id}")))
            .send()
            .await?;
        read_ack(response).await
    }

    async fn create_order_from_cart(
        &self,
        user_id: i64,
        remark: &str,
        courier: &str,
    ) -> SyncResult<Vec<i64>> {
        let response = self
            .client
            .post(self.url("/api/orders/from-cart"))
            .json(&json!({
                "userId": user_id,
                "remark": remark,
                "courier": courier,
            }))
            .send()
            .await?;
        read_envelope(response).await
    }
}

// =============================================================================
// HTTP Domain Fetcher
// =============================================================================

/// [`DomainFetch`] over the backend's per-domain list endpoints.
pub struct HttpDomainFetcher {
    client: Client,
    base_url: String,
}

impl HttpDomainFetcher {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        HttpDomainFetcher {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl DomainFetch for HttpDomainFetcher {
    async fn fetch(&self, domain: DataDomain, filter: &FilterOptions) -> SyncResult<Value> {
        let url = format!(
            "{}/api/{}",
            self.base_url.trim_end_matches('/'),
            domain.as_str()
        );
        let mut request = self.client.get(url);
        if let Some(category_id) = filter.category_id {
            request = request.query(&[("categoryId", category_id)]);
        }

        let wrap = |reason: String| SyncError::FetchFailed { domain, reason };

        let response = request.send().await.map_err(|e| wrap(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(wrap(format!("status {status}")));
        }

        let envelope: ApiEnvelope<Value> =
            response.json().await.map_err(|e| wrap(e.to_string()))?;
        if !envelope.success {
            return Err(wrap(
                envelope.message.unwrap_or_else(|| "request failed".into()),
            ));
        }
        Ok(envelope.data.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_with_data() {
        let envelope: ApiEnvelope<Vec<RemoteCartItem>> = serde_json::from_str(
            r#"{
                "success": true,
                "data": [{
                    "id": 7,
                    "productId": 70,
                    "sku": "AU-RING-18K",
                    "name": "18K Gold Ring",
                    "quantity": 2,
                    "unitPriceCents": 4500000,
                    "grossWeightMg": 5200,
                    "netWeightMg": 4800
                }]
            }"#,
        )
        .unwrap();

        assert!(envelope.success);
        let rows = envelope.data.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 7);
        assert_eq!(rows[0].quantity, 2);
    }

    #[test]
    fn test_envelope_failure_carries_message() {
        let envelope: ApiEnvelope<Value> =
            serde_json::from_str(r#"{"success": false, "message": "cart not found"}"#).unwrap();
        assert!(!envelope.success);
        assert!(envelope.data.is_none());
        assert_eq!(envelope.message.as_deref(), Some("cart not found"));
    }

    #[test]
    fn test_envelope_missing_fields_default() {
        let envelope: ApiEnvelope<Value> = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert!(!envelope.success);
        assert!(envelope.message.is_none());
    }

    #[test]
    fn test_remote_row_weight_fields_default_to_zero() {
        let envelope: ApiEnvelope<RemoteCartItem> = serde_json::from_str(
            r#"{
                "success": true,
                "data": {
                    "id": 1,
                    "productId": 10,
                    "sku": "AU-COIN-24K",
                    "name": "Gold Coin",
                    "quantity": 1,
                    "unitPriceCents": 900000
                }
            }"#,
        )
        .unwrap();
        let row = envelope.data.unwrap();
        assert_eq!(row.gross_weight_mg, 0);
        assert_eq!(row.net_weight_mg, 0);
    }
}
