//! # remarket-db: Local Record Store
//!
//! SQLite-backed storage for listings known to this device.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ReMarket Data Flow                               │
//! │                                                                         │
//! │  SyncEngine (remarket-sync)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   remarket-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌──────────────────┐   ┌─────────────┐  │   │
//! │  │   │   Database    │    │  Repositories    │   │ Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                  │   │ (embedded)  │  │   │
//! │  │   │               │    │ ProductRepo      │   │             │  │   │
//! │  │   │ SqlitePool    │◄───│ SyncMetaRepo     │   │ 001_products│  │   │
//! │  │   │ change signal │    │                  │   │ 002_meta    │  │   │
//! │  │   └───────────────┘    └──────────────────┘   └─────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  remarket.db (platform data dir)                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use remarket_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("remarket.db")).await?;
//! let pending = db.products().get_by_status(SyncState::Pending).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::product::{ProductRepository, ReplaceSummary};
pub use repository::sync::SyncMetaRepository;
