//! # remarket-sync: Offline-first Product Sync
//!
//! Keeps the local record store and the remote product API in agreement.
//! Listings created on the device are stored as PENDING at once and pushed
//! later; the remote catalog is pulled into the store without touching
//! anything that has not been pushed yet.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Layer Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SyncScheduler (scheduler.rs)                     │  │
//! │  │  one-shot at start-up · every 15 min · backoff on Retry          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │ SyncTask::run = push, then pull        │
//! │  ┌────────────────────────────▼─────────────────────────────────────┐  │
//! │  │                    SyncEngine (engine.rs)                        │  │
//! │  │  create · push · pull · read-through · get-by-id · report        │  │
//! │  └──────────┬──────────────────────────────────────┬────────────────┘  │
//! │             │                                      │                   │
//! │  ┌──────────▼───────────┐            ┌─────────────▼───────────────┐   │
//! │  │ remarket-db          │            │ RemoteGateway (gateway.rs)  │   │
//! │  │ products · sync_meta │            │ HttpGateway over reqwest    │   │
//! │  └──────────────────────┘            └─────────────────────────────┘   │
//! │                                                                         │
//! │  Injected seams: CredentialSource (auth.rs) · Clock (clock.rs)         │
//! │                  DeviceConditions (scheduler.rs)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`engine`] - `SyncEngine`, the offline-first product repository
//! - [`gateway`] - Remote product API trait and HTTP client
//! - [`scheduler`] - Background run loop with device constraints
//! - [`config`] - TOML configuration with environment overrides
//! - [`auth`] - Signed-in seller and bearer token
//! - [`clock`] - Wall clock seam
//! - [`error`] - Gateway and sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use remarket_sync::{EngineOptions, HttpGateway, StaticCredentials, SyncConfig, SyncEngine};
//!
//! let config = SyncConfig::load(None)?;
//! let credentials = Arc::new(StaticCredentials::from_env());
//! let gateway = Arc::new(HttpGateway::new(&config.api, credentials.clone())?);
//! let engine = SyncEngine::new(db, gateway, credentials, EngineOptions::from(&config));
//!
//! engine.create_product(request).await?;
//! let report = engine.sync_pending_products().await?;
//! println!("Pushed {} listings", report.synced);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod auth;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod scheduler;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::{CredentialSource, StaticCredentials};
pub use clock::{Clock, SystemClock};
pub use config::{ApiSettings, ScheduleSettings, SyncConfig, SyncMode, SyncSettings};
pub use engine::{EngineOptions, PullOutcome, PushReport, SyncEngine, SyncStatus};
pub use error::{GatewayError, GatewayResult, SyncError, SyncResult};
pub use gateway::{HttpGateway, RemoteGateway};
pub use scheduler::{
    DeviceConditions, JobOutcome, NetworkState, SchedulerConfig, SchedulerHandle,
    StaticConditions, SyncScheduler, SyncTask,
};
