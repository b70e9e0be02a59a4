//! # Repository Module
//!
//! Typed access to the local tables.
//!
//! ```text
//! SyncEngine
//!     │  db.products().get_push_queue(10)
//!     ▼
//! ProductRepository ── products table   (listings + sync state)
//! SyncMetaRepository ── sync_meta table (last push/pull markers)
//!     │
//!     ▼
//! SQLite
//! ```
//!
//! Every query is bound at runtime (`sqlx::query` / `query_as`), so the crate
//! builds without a database present.

pub mod product;
pub mod sync;
