//! # Sync Error Types
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Gateway      │  │     Local               │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Network    ↻   │  │  NotAuthenticated       │ │
//! │  │  InvalidUrl     │  │  Server 5xx ↻   │  │  Database               │ │
//! │  │  ConfigLoad/Save│  │  Client 4xx ✗   │  │                         │ │
//! │  │                 │  │  Unknown    ↻   │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ↻ = a push that failed this way is retried on the next run            │
//! │  ✗ = the record stays in ERROR until the seller edits it               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use remarket_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Result type alias for remote API calls.
pub type GatewayResult<T> = Result<T, GatewayError>;

// =============================================================================
// Gateway Errors
// =============================================================================

/// Failure of one remote API call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The request never got an HTTP answer (DNS, connect, timeout, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// 5xx answer.
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// 4xx answer, including 404.
    #[error("Client error ({status}): {message}")]
    Client { status: u16, message: String },

    /// Anything else, e.g. a 2xx body that does not decode.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl GatewayError {
    /// Classifies a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400..=499 => GatewayError::Client { status, message },
            500..=599 => GatewayError::Server { status, message },
            _ => GatewayError::Unknown(format!("unexpected status {status}: {message}")),
        }
    }

    /// Returns true if the same call may succeed later without any change
    /// to the request.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GatewayError::Client { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::Client { status: 404, .. })
    }

    /// HTTP status, when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Server { status, .. } | GatewayError::Client { status, .. } => {
                Some(*status)
            }
            GatewayError::Network(_) | GatewayError::Unknown(_) => None,
        }
    }

    /// Message shown to the user when a single listing cannot be loaded.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Client { status: 404, .. } => "Product not found (404)".to_string(),
            GatewayError::Server { status: 500, .. } => "Internal server error (500)".to_string(),
            GatewayError::Server { status, message } | GatewayError::Client { status, message } => {
                format!("Error {status}: {message}")
            }
            GatewayError::Network(detail) => format!("Network error: {detail}"),
            GatewayError::Unknown(_) => "Unknown error while fetching product".to_string(),
        }
    }
}

// =============================================================================
// Sync Errors
// =============================================================================

/// Sync error type covering every failure the engine surfaces to callers.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid API base URL.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Local Errors
    // =========================================================================
    /// No seller is signed in on this device.
    #[error("No signed-in seller. Sign in before creating listings.")]
    NotAuthenticated,

    /// Record store failure.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Remote API call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Scheduler is shutting down.
    #[error("Sync scheduler is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
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

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::InvalidConfig(format!("HTTP client: {err}"))
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the failed operation may succeed when run again.
    ///
    /// ## Retryable Errors
    /// - Network failures, 5xx answers, undecodable answers
    /// - Transient store errors (pool exhausted, transaction aborted)
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - 4xx answers
    /// - Sign-in errors
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Gateway(e) => e.is_retryable(),
            SyncError::Database(e) => e.is_transient(),
            SyncError::ChannelError(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
