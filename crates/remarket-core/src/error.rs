//! # Error Types
//!
//! Domain-specific error types for remarket-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  remarket-core (this file)                                             │
//! │  └── CoreError        - Domain errors                                  │
//! │                                                                         │
//! │  remarket-db                                                           │
//! │  └── DbError          - Record store failures                          │
//! │                                                                         │
//! │  remarket-sync                                                         │
//! │  ├── GatewayError     - Remote API failures (network/server/client)    │
//! │  └── SyncError        - What engine callers see                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A stored sync state name is not one we know.
    ///
    /// ## When This Occurs
    /// - The database was written by a newer build
    /// - Manual edits to the `sync_state` column
    #[error("Unknown sync state: {0}")]
    InvalidSyncState(String),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
