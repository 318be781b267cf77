//! # Sync Error Types
//!
//! Error types for realtime sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │  Reachability   │  │      Channel            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  ProbeFailed    │  │  ConnectionFailed       │ │
//! │  │  InvalidUrl     │  │  ProbeTimeout   │  │  ConnectTimeout         │ │
//! │  │  ConfigLoad     │  │                 │  │  Disconnected, Tls      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │     Fetch       │  │ Mirror/Checkout │  │      Storage            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  FetchFailed    │  │  MirrorFailed   │  │  StorageError           │ │
//! │  │  HttpError      │  │  CheckoutSync   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use aurum_core::DataDomain;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible realtime sync failures.
///
/// ## Design Principles
/// - Each variant includes enough context for debugging
/// - Errors are categorized for different handling strategies
/// - All errors are `Send + Sync` for async compatibility
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid server or channel URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Reachability Errors
    // =========================================================================
    /// Health probe got no healthy answer from the server.
    #[error("Health probe failed: {0}")]
    ProbeFailed(String),

    /// Health probe did not answer in time.
    #[error("Health probe timeout after {0} seconds")]
    ProbeTimeout(u64),

    // =========================================================================
    // Channel Errors
    // =========================================================================
    /// Failed to establish the WebSocket channel.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Channel handshake did not complete in time.
    #[error("Connection timeout after {0} seconds")]
    ConnectTimeout(u64),

    /// Channel closed while we expected it open.
    #[error("Disconnected from realtime channel")]
    Disconnected,

    /// WebSocket protocol error.
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// TLS/SSL error.
    #[error("TLS error: {0}")]
    TlsError(String),

    // =========================================================================
    // Fetch Errors
    // =========================================================================
    /// A differential fetch for one domain failed.
    #[error("Fetch failed for {domain}: {reason}")]
    FetchFailed { domain: DataDomain, reason: String },

    /// HTTP transport error outside any specific domain fetch.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Server answered with a non-success status.
    #[error("Server returned status {0}")]
    UnexpectedStatus(u16),

    // =========================================================================
    // Mirror & Checkout Errors
    // =========================================================================
    /// A cart mirror write failed for one SKU.
    #[error("Cart mirror failed for {sku}: {reason}")]
    MirrorFailed { sku: String, reason: String },

    /// Checkout refused because some items never reached the server.
    #[error("Checkout blocked, {} item(s) not synced: {}", unsynced_skus.len(), unsynced_skus.join(", "))]
    CheckoutSyncFailed { unsynced_skus: Vec<String> },

    /// Cart operation attempted with no signed-in user.
    #[error("No active user for cart sync")]
    NoActiveUser,

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Local persistence failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Failed to serialize an outbound event.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Failed to deserialize an inbound event.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Cart domain rule violated.
    #[error("Cart error: {0}")]
    Cart(#[from] aurum_core::CoreError),

    /// Channel send/receive failed (task gone).
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Client is shutting down.
    #[error("Sync client is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            SyncError::UnexpectedStatus(status.as_u16())
        } else {
            SyncError::HttpError(err.to_string())
        }
    }
}

impl From<sled::Error> for SyncError {
    fn from(err: sled::Error) -> Self {
        SyncError::StorageError(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if this error is recoverable and the operation can be
    /// retried.
    ///
    /// ## Retryable Errors
    /// - Reachability failures (server down or unreachable)
    /// - Connection failures and timeouts
    /// - Transient fetch/mirror failures
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Cart domain rule violations
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ProbeFailed(_)
                | SyncError::ProbeTimeout(_)
                | SyncError::ConnectionFailed(_)
                | SyncError::ConnectTimeout(_)
                | SyncError::Disconnected
                | SyncError::WebSocketError(_)
                | SyncError::FetchFailed { .. }
                | SyncError::HttpError(_)
                | SyncError::MirrorFailed { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::ProbeFailed("server down".into()).is_retryable());
        assert!(SyncError::ConnectionFailed("network error".into()).is_retryable());
        assert!(SyncError::ConnectTimeout(15).is_retryable());

        assert!(!SyncError::InvalidConfig("bad config".into()).is_retryable());
        assert!(!SyncError::NoActiveUser.is_retryable());
        assert!(!SyncError::CheckoutSyncFailed { unsynced_skus: vec![] }.is_retryable());
    }

    #[test]
    fn test_checkout_error_names_skus() {
        let err = SyncError::CheckoutSyncFailed {
            unsynced_skus: vec!["AU-RING-18K".into(), "AU-COIN-24K".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 item(s)"));
        assert!(msg.contains("AU-RING-18K"));
        assert!(msg.contains("AU-COIN-24K"));
    }

    #[test]
    fn test_fetch_error_names_domain() {
        let err = SyncError::FetchFailed {
            domain: DataDomain::Products,
            reason: "status 500".into(),
        };
        assert!(err.to_string().contains("products"));
    }
}
