//! # Domain Types
//!
//! One listing has three shapes depending on where it lives.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Listing Shapes                                 │
//! │                                                                         │
//! │  ┌──────────────────┐  to_request   ┌──────────────────┐               │
//! │  │  ProductRecord   │ ────────────► │  ProductRequest  │ ──► POST      │
//! │  │  (local table)   │               └──────────────────┘               │
//! │  │  + sync_state    │  from_remote  ┌──────────────────┐               │
//! │  │  + last_modified │ ◄──────────── │   ProductDto     │ ◄── GET       │
//! │  └────────┬─────────┘               └────────┬─────────┘               │
//! │           │ to_product                       │ into                     │
//! │           ▼                                  ▼                          │
//! │  ┌─────────────────────────────────────────────────────┐               │
//! │  │        Product (what observers and screens see)     │               │
//! │  └─────────────────────────────────────────────────────┘               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sync State Machine
//! ```text
//!   create ──► PENDING ──push ok──► SYNCED ◄──pull── remote catalog
//!                 │
//!                 └──push failed──► ERROR ──push ok──► SYNCED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::codec::{format_instant, next_modified};
use crate::error::CoreError;
use crate::money::{self, Money};
use crate::STATUS_CREATED;

// =============================================================================
// Sync State
// =============================================================================

/// Where a local record stands relative to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "UPPERCASE"))]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncState {
    /// Local write not yet acknowledged by the server.
    Pending,
    /// Mirrors the server as of the last successful push or pull.
    Synced,
    /// Last push attempt failed.
    Error,
}

impl SyncState {
    /// Name as persisted in the `sync_state` column.
    pub const fn as_str(&self) -> &'static str {
        match self {
            SyncState::Pending => "PENDING",
            SyncState::Synced => "SYNCED",
            SyncState::Error => "ERROR",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SyncState::Pending),
            "SYNCED" => Ok(SyncState::Synced),
            "ERROR" => Ok(SyncState::Error),
            other => Err(CoreError::InvalidSyncState(other.to_string())),
        }
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// A listing as returned by the product API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDto {
    pub id: String,
    #[serde(default)]
    pub seller_id: String,
    pub brand: String,
    pub model: String,
    #[serde(default)]
    pub storage: String,
    #[serde(with = "money::decimal")]
    pub price: Money,
    #[serde(default)]
    pub imei: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub box_image_url: Option<String>,
    #[serde(default)]
    pub invoice_url: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

fn default_status() -> String {
    STATUS_CREATED.to_string()
}

fn default_active() -> bool {
    true
}

/// Body of `POST /products`.
///
/// The server assigns the canonical id and timestamps; the seller comes from
/// the bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRequest {
    pub brand: String,
    pub model: String,
    pub storage: String,
    #[serde(with = "money::decimal")]
    pub price: Money,
    pub imei: String,
    pub description: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub box_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_url: Option<String>,
}

/// Body of `POST /reports`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub product_id: String,
    pub reason: String,
}

// =============================================================================
// Domain Product
// =============================================================================

/// A listing as shown to observers. Carries no sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub seller_id: String,
    pub brand: String,
    pub model: String,
    pub storage: String,
    pub price: Money,
    pub imei: String,
    pub description: String,
    pub images: Vec<String>,
    pub box_image_uri: Option<String>,
    pub invoice_uri: Option<String>,
    pub status: String,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}


impl From<ProductDto> for Product {
    fn from(dto: ProductDto) -> Self {
        Product {
            id: dto.id,
            seller_id: dto.seller_id,
            brand: dto.brand,
            model: dto.model,
            storage: dto.storage,
            price: dto.price,
            imei: dto.imei,
            description: dto.description,
            images: dto.image_urls,
            box_image_uri: dto.box_image_url,
            invoice_uri: dto.invoice_url,
            status: dto.status,
            active: dto.active,
            created_at: dto.created_at,
            updated_at: dto.updated_at,
        }
    }
}

// =============================================================================
// Product Record
// =============================================================================

/// A listing as stored locally, with its sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Primary key. Client-assigned until the first successful push.
    pub id: String,
    pub seller_id: String,
    pub brand: String,
    pub model: String,
    pub storage: String,
    pub price: Money,
    pub imei: String,
    pub description: String,
    /// Ordered image URIs.
    pub images: Vec<String>,
    pub box_image_uri: Option<String>,
    pub invoice_uri: Option<String>,
    /// Free-text lifecycle label ("CREATED", ...).
    pub status: String,
    pub active: bool,
    /// ISO-8601 instant, server value once synced.
    pub created_at: String,
    /// ISO-8601 instant, server value once synced.
    pub updated_at: String,
    pub sync_state: SyncState,
    /// Local write stamp in epoch milliseconds. Bumped on every mutation.
    pub last_modified: i64,
    /// Failed push attempts since the record last became PENDING.
    pub sync_attempts: i64,
    /// Message of the most recent failed push.
    pub last_sync_error: Option<String>,
    /// Whether the most recent failure may be retried automatically.
    pub retryable: bool,
}

impl ProductRecord {
    /// Builds the local record for a listing the seller just created.
    pub fn new_pending(
        id: impl Into<String>,
        seller_id: impl Into<String>,
        request: &ProductRequest,
        now: DateTime<Utc>,
    ) -> Self {
        let stamp = format_instant(now);
        ProductRecord {
            id: id.into(),
            seller_id: seller_id.into(),
            brand: request.brand.trim().to_string(),
            model: request.model.trim().to_string(),
            storage: request.storage.trim().to_string(),
            price: request.price,
            imei: request.imei.trim().to_string(),
            description: request.description.clone(),
            images: request.image_urls.clone(),
            box_image_uri: request.box_image_url.clone(),
            invoice_uri: request.invoice_url.clone(),
            status: STATUS_CREATED.to_string(),
            active: true,
            created_at: stamp.clone(),
            updated_at: stamp,
            sync_state: SyncState::Pending,
            last_modified: now.timestamp_millis(),
            sync_attempts: 0,
            last_sync_error: None,
            retryable: true,
        }
    }

    /// Builds a SYNCED record from the server's copy.
    pub fn from_remote(dto: ProductDto, now_millis: i64) -> Self {
        ProductRecord {
            id: dto.id,
            seller_id: dto.seller_id,
            brand: dto.brand,
            model: dto.model,
            storage: dto.storage,
            price: dto.price,
            imei: dto.imei,
            description: dto.description,
            images: dto.image_urls,
            box_image_uri: dto.box_image_url,
            invoice_uri: dto.invoice_url,
            status: dto.status,
            active: dto.active,
            created_at: dto.created_at,
            updated_at: dto.updated_at,
            sync_state: SyncState::Synced,
            last_modified: now_millis,
            sync_attempts: 0,
            last_sync_error: None,
            retryable: true,
        }
    }

    /// Rebuilds the create request for a push.
    pub fn to_request(&self) -> ProductRequest {
        ProductRequest {
            brand: self.brand.clone(),
            model: self.model.clone(),
            storage: self.storage.clone(),
            price: self.price,
            imei: self.imei.clone(),
            description: self.description.clone(),
            image_urls: self.images.clone(),
            box_image_url: self.box_image_uri.clone(),
            invoice_url: self.invoice_uri.clone(),
        }
    }

    /// The record after the server accepted it.
    ///
    /// Takes the server's id and timestamps; everything else stays local.
    pub fn acknowledged(&self, created: &ProductDto, now_millis: i64) -> Self {
        ProductRecord {
            id: created.id.clone(),
            created_at: created.created_at.clone(),
            updated_at: created.updated_at.clone(),
            sync_state: SyncState::Synced,
            last_modified: next_modified(self.last_modified, now_millis),
            sync_attempts: 0,
            last_sync_error: None,
            retryable: true,
            ..self.clone()
        }
    }

    /// The record after a push attempt failed.
    pub fn failed(&self, message: impl Into<String>, retryable: bool, now_millis: i64) -> Self {
        ProductRecord {
            sync_state: SyncState::Error,
            last_modified: next_modified(self.last_modified, now_millis),
            sync_attempts: self.sync_attempts.saturating_add(1),
            last_sync_error: Some(message.into()),
            retryable,
            ..self.clone()
        }
    }

    /// Domain view of this record.
    pub fn to_product(&self) -> Product {
        Product {
            id: self.id.clone(),
            seller_id: self.seller_id.clone(),
            brand: self.brand.clone(),
            model: self.model.clone(),
            storage: self.storage.clone(),
            price: self.price,
            imei: self.imei.clone(),
            description: self.description.clone(),
            images: self.images.clone(),
            box_image_uri: self.box_image_uri.clone(),
            invoice_uri: self.invoice_uri.clone(),
            status: self.status.clone(),
            active: self.active,
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }

    pub fn is_synced(&self) -> bool {
        self.sync_state == SyncState::Synced
    }
}

/// Generates a fresh client-side listing id (UUID v4).
pub fn generate_product_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
