//! # remarket-core: Domain Types for ReMarket Sync
//!
//! Pure types and conversions shared by the record store and the sync engine.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       ReMarket Sync Architecture                        │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │             Marketplace UI (out of scope)                       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        remarket-sync: SyncEngine, gateway, scheduler            │   │
//! │  └──────────────┬──────────────────────────────────┬───────────────┘   │
//! │                 │                                  │                    │
//! │  ┌──────────────▼──────────────┐    ┌──────────────▼──────────────┐    │
//! │  │  remarket-db (SQLite)       │    │  Remote product API (HTTP)  │    │
//! │  └──────────────┬──────────────┘    └─────────────────────────────┘    │
//! │                 │                                                       │
//! │  ┌──────────────▼──────────────────────────────────────────────────┐   │
//! │  │               ★ remarket-core (THIS CRATE) ★                    │   │
//! │  │   ProductRecord · Product · ProductDto · Money · Resource       │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • NO CLOCK                  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Listing record, domain product, wire DTOs, sync state
//! - [`money`] - Integer price type
//! - [`resource`] - Loading/success/error wrapper for one-shot results
//! - [`codec`] - Column encodings for the local table
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use remarket_core::{Money, ProductRecord, ProductRequest, SyncState};
//!
//! let request = ProductRequest {
//!     brand: "Apple".into(),
//!     model: "iPhone 13".into(),
//!     storage: "128GB".into(),
//!     price: Money::from_cents(45_000),
//!     imei: "356938035643809".into(),
//!     description: "Like new".into(),
//!     image_urls: vec![],
//!     box_image_url: None,
//!     invoice_url: None,
//! };
//!
//! let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
//! let record = ProductRecord::new_pending("local-1", "seller-9", &request, now);
//! assert_eq!(record.sync_state, SyncState::Pending);
//! assert_eq!(record.status, "CREATED");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod codec;
pub mod error;
pub mod money;
pub mod resource;
pub mod types;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult};
pub use money::Money;
pub use resource::Resource;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Lifecycle label given to every listing created on this device.
pub const STATUS_CREATED: &str = "CREATED";

/// Separator used to flatten the image list into one column.
pub const IMAGE_DELIMITER: &str = ",";
