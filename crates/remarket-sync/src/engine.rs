//! # Sync Engine
//!
//! Reconciles the local record store with the remote product API.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          SyncEngine                                     │
//! │                                                                         │
//! │  create_product ──► validate ──► upsert PENDING ──► return             │
//! │                                                                         │
//! │  sync_pending_products (push)                                          │
//! │    for record in push queue (storage order, one at a time):           │
//! │      claim id ──► re-read ──► gateway.create_product                   │
//! │         ok  ──► replace(old id → server id, SYNCED)                    │
//! │         err ──► update(ERROR, attempts + 1, retryable?)                │
//! │                                                                         │
//! │  sync_all_products (pull)                                              │
//! │    gateway.list_products ──► replace_synced(catalog as SYNCED)         │
//! │    failures are logged and recorded, never returned                    │
//! │                                                                         │
//! │  get_all_products (read-through, ≤ 2 emissions)                        │
//! │    emit local ──► list_products ──► replace_synced ──► emit refreshed  │
//! │                          └── error ──► done (local snapshot only)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//! Push, pull and read-through may run at the same time from different
//! tasks. Each store write is atomic on its own. Two pushes never send the
//! same record: ids are claimed in an in-memory set for the duration of a
//! push run, and each claimed record is re-read before it is sent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use remarket_core::codec::format_instant;
use remarket_core::{
    generate_product_id, Product, ProductRecord, ProductRequest, ReportRequest, Resource,
    SyncState,
};
use remarket_db::{Database, DbError, ProductRepository, ReplaceSummary};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::auth::CredentialSource;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use crate::scheduler::{JobOutcome, SyncTask};

// =============================================================================
// Constants
// =============================================================================

const META_LAST_PUSH_AT: &str = "last_push_at";
const META_LAST_PULL_AT: &str = "last_pull_at";
const META_LAST_PULL_ERROR: &str = "last_pull_error";

// =============================================================================
// Options & Reports
// =============================================================================

/// Tunables taken from `[sync]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Retryable ERROR records are pushed again until they have failed this
    /// many times. `0` retries them on every run.
    pub max_push_attempts: i64,

    /// Pause between two record pushes.
    pub push_interval: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            max_push_attempts: 0,
            push_interval: None,
        }
    }
}

impl From<&SyncConfig> for EngineOptions {
    fn from(config: &SyncConfig) -> Self {
        EngineOptions {
            max_push_attempts: config.sync.max_push_attempts,
            push_interval: config.push_interval(),
        }
    }
}

/// What one push run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    /// Records accepted by the server.
    pub synced: usize,
    /// Records the server (or the network) rejected; now ERROR.
    pub failed: usize,
    /// Records another push was already handling, or that changed under us.
    pub skipped: usize,
    /// Records whose outcome could not be written locally.
    pub store_errors: usize,
}

impl PushReport {
    pub fn attempted(&self) -> usize {
        self.synced + self.failed + self.store_errors
    }

    /// True when local storage let the run down and the whole job should be
    /// retried.
    pub fn needs_retry(&self) -> bool {
        self.store_errors > 0
    }
}

/// Result of a pull. Pull never fails from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    Applied(ReplaceSummary),
    Failed(String),
}

impl PullOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, PullOutcome::Applied(_))
    }
}

/// Snapshot of local sync health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub pending: i64,
    pub errored: i64,
    pub synced: i64,
    pub last_push_at: Option<DateTime<Utc>>,
    pub last_pull_at: Option<DateTime<Utc>>,
    /// Why the most recent pull failed; cleared by the next successful pull.
    pub last_pull_error: Option<String>,
}

enum PushOutcome {
    Synced,
    Failed,
    Skipped,
}

// =============================================================================
// In-flight Claims
// =============================================================================

type InFlight = Arc<Mutex<HashSet<String>>>;

fn lock(set: &InFlight) -> MutexGuard<'_, HashSet<String>> {
    // The set stays consistent even if a holder panicked.
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Ids claimed by one push run. Released on drop.
struct Claim {
    set: InFlight,
    ids: Vec<String>,
}

impl Claim {
    /// Claims every record no other run holds. Returns the claim and the
    /// claimed records, in their original order.
    fn acquire(set: &InFlight, records: Vec<ProductRecord>) -> (Self, Vec<ProductRecord>) {
        let mut held = lock(set);
        let claimed: Vec<ProductRecord> = records
            .into_iter()
            .filter(|record| held.insert(record.id.clone()))
            .collect();
        drop(held);

        let claim = Claim {
            set: set.clone(),
            ids: claimed.iter().map(|r| r.id.clone()).collect(),
        };
        (claim, claimed)
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut held = lock(&self.set);
        for id in &self.ids {
            held.remove(id);
        }
    }
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Offline-first product repository.
///
/// Cheap to clone; clones share the store, the gateway and the in-flight set.
///
/// ## Usage
/// ```rust,ignore
/// let engine = SyncEngine::new(db, gateway, credentials, EngineOptions::default());
///
/// let record = engine.create_product(request).await?;   // PENDING
/// engine.sync_pending_products().await?;                // pushed
/// engine.sync_all_products().await;                     // catalog pulled
/// ```
#[derive(Clone)]
pub struct SyncEngine {
    db: Database,
    gateway: Arc<dyn RemoteGateway>,
    credentials: Arc<dyn CredentialSource>,
    clock: Arc<dyn Clock>,
    options: EngineOptions,
    in_flight: InFlight,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Creates an engine using the system clock.
    pub fn new(
        db: Database,
        gateway: Arc<dyn RemoteGateway>,
        credentials: Arc<dyn CredentialSource>,
        options: EngineOptions,
    ) -> Self {
        SyncEngine {
            db,
            gateway,
            credentials,
            clock: Arc::new(SystemClock),
            options,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    fn products(&self) -> ProductRepository {
        self.db.products()
    }

    // =========================================================================
    // Read-through List
    // =========================================================================

    /// Local listings, then the same listings refreshed from the server.
    ///
    /// Emits the current store contents, fetches the catalog, replaces the
    /// SYNCED part of the store with it and emits the store again. When the
    /// catalog cannot be fetched only the first list is emitted. The stream
    /// ends after at most two lists and never yields an error. Dropping it
    /// stops the work.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn get_all_products(&self) -> ReceiverStream<Vec<Product>> {
        let (tx, rx) = mpsc::channel(2);
        let engine = self.clone();
        tokio::spawn(async move { engine.read_through(tx).await });
        ReceiverStream::new(rx)
    }

    async fn read_through(&self, tx: mpsc::Sender<Vec<Product>>) {
        let snapshot = match self.products().get_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Read-through could not load local products");
                return;
            }
        };

        if tx.send(to_products(&snapshot)).await.is_err() {
            return;
        }

        let fetched = tokio::select! {
            result = self.gateway.list_products() => result,
            _ = tx.closed() => {
                debug!("Read-through dropped before the catalog arrived");
                return;
            }
        };

        let catalog = match fetched {
            Ok(catalog) => catalog,
            Err(e) => {
                info!(error = %e, "Catalog unavailable, serving local products only");
                self.record_pull_failure(&e.to_string()).await;
                return;
            }
        };

        if let Err(e) = self.apply_catalog(catalog).await {
            warn!(error = %e, "Read-through could not store the catalog");
            return;
        }

        match self.products().get_all().await {
            Ok(refreshed) => {
                // Receiver gone is fine: the work is done either way.
                let _ = tx.send(to_products(&refreshed)).await;
            }
            Err(e) => warn!(error = %e, "Read-through could not reload local products"),
        }
    }

    // =========================================================================
    // Push
    // =========================================================================

    /// Pushes every PENDING record, and every retryable ERROR record under
    /// the attempt cap, to the server.
    ///
    /// One record's failure never stops the run; it is persisted as ERROR.
    ///
    /// ## Returns
    /// * `Ok(PushReport)` - per-outcome counts
    /// * `Err(SyncError::Database)` - the push queue could not be read
    pub async fn sync_pending_products(&self) -> SyncResult<PushReport> {
        let queue = self
            .products()
            .get_push_queue(self.options.max_push_attempts)
            .await?;

        let mut report = PushReport::default();
        if queue.is_empty() {
            debug!("Nothing to push");
            return Ok(report);
        }

        let queued = queue.len();
        let (_claim, records) = Claim::acquire(&self.in_flight, queue);
        report.skipped = queued - records.len();

        info!(count = records.len(), skipped = report.skipped, "Pushing local products");

        for (index, record) in records.iter().enumerate() {
            if index > 0 {
                if let Some(pause) = self.options.push_interval {
                    tokio::time::sleep(pause).await;
                }
            }

            match self.push_one(record).await {
                Ok(PushOutcome::Synced) => report.synced += 1,
                Ok(PushOutcome::Failed) => report.failed += 1,
                Ok(PushOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Could not store push outcome");
                    report.store_errors += 1;
                }
            }
        }

        self.set_meta(META_LAST_PUSH_AT, &format_instant(self.clock.now()))
            .await;

        info!(
            synced = report.synced,
            failed = report.failed,
            skipped = report.skipped,
            store_errors = report.store_errors,
            "Push finished"
        );
        Ok(report)
    }

    async fn push_one(&self, queued: &ProductRecord) -> Result<PushOutcome, DbError> {
        // Another run may have finished this record between our queue read
        // and our claim.
        let current = match self.products().get_by_id(&queued.id).await? {
            Some(current) if self.is_pushable(&current) => current,
            _ => {
                debug!(id = %queued.id, "Record no longer needs a push");
                return Ok(PushOutcome::Skipped);
            }
        };

        let result = self.gateway.create_product(&current.to_request()).await;
        let now = self.clock.now_millis();

        let written = match result {
            Ok(created) => {
                let synced = current.acknowledged(&created, now);
                self.products()
                    .replace(&current.id, &synced)
                    .await
                    .map(|()| {
                        info!(local_id = %current.id, server_id = %synced.id, "Product synced");
                        PushOutcome::Synced
                    })
            }
            Err(e) => {
                let failed = current.failed(e.to_string(), e.is_retryable(), now);
                self.products().update(&failed).await.map(|()| {
                    warn!(
                        id = %current.id,
                        attempts = failed.sync_attempts,
                        retryable = failed.retryable,
                        error = %e,
                        "Product push failed"
                    );
                    PushOutcome::Failed
                })
            }
        };

        match written {
            // Wiped locally while the request was in flight.
            Err(DbError::NotFound { .. }) => Ok(PushOutcome::Skipped),
            other => other,
        }
    }

    fn is_pushable(&self, record: &ProductRecord) -> bool {
        match record.sync_state {
            SyncState::Pending => true,
            SyncState::Error => {
                let cap = self.options.max_push_attempts;
                record.retryable && (cap == 0 || record.sync_attempts < cap)
            }
            SyncState::Synced => false,
        }
    }

    // =========================================================================
    // Pull
    // =========================================================================

    /// Replaces every SYNCED local record with the server catalog.
    ///
    /// PENDING and ERROR records are never touched. Failures are logged,
    /// recorded for [`status`](Self::status) and returned as
    /// [`PullOutcome::Failed`].
    pub async fn sync_all_products(&self) -> PullOutcome {
        let catalog = match self.gateway.list_products().await {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "Pull failed");
                let message = e.to_string();
                self.record_pull_failure(&message).await;
                return PullOutcome::Failed(message);
            }
        };

        match self.apply_catalog(catalog).await {
            Ok(summary) => {
                info!(
                    removed = summary.removed,
                    inserted = summary.inserted,
                    kept_local = summary.skipped,
                    "Pull finished"
                );
                PullOutcome::Applied(summary)
            }
            Err(e) => {
                warn!(error = %e, "Pull could not store the catalog");
                let message = e.to_string();
                self.record_pull_failure(&message).await;
                PullOutcome::Failed(message)
            }
        }
    }

    async fn apply_catalog(
        &self,
        catalog: Vec<remarket_core::ProductDto>,
    ) -> Result<ReplaceSummary, DbError> {
        let now = self.clock.now();
        let now_millis = now.timestamp_millis();
        let records: Vec<ProductRecord> = catalog
            .into_iter()
            .map(|dto| ProductRecord::from_remote(dto, now_millis))
            .collect();

        let summary = self.products().replace_synced(&records).await?;

        self.set_meta(META_LAST_PULL_AT, &format_instant(now)).await;
        if let Err(e) = self.db.sync_meta().remove(META_LAST_PULL_ERROR).await {
            debug!(error = %e, "Could not clear last pull error");
        }
        Ok(summary)
    }

    async fn record_pull_failure(&self, message: &str) {
        self.set_meta(META_LAST_PULL_ERROR, message).await;
    }

    /// Bookkeeping writes never fail a sync.
    async fn set_meta(&self, key: &str, value: &str) {
        if let Err(e) = self.db.sync_meta().set(key, value).await {
            debug!(key = %key, error = %e, "Could not store sync marker");
        }
    }

    // =========================================================================
    // Single-listing Operations
    // =========================================================================

    /// Stores a new listing as PENDING and returns it. Nothing is sent until
    /// the next push.
    ///
    /// ## Returns
    /// * `Err(SyncError::NotAuthenticated)` - no seller signed in
    pub async fn create_product(&self, request: ProductRequest) -> SyncResult<ProductRecord> {
        let seller_id = self
            .credentials
            .seller_id()
            .ok_or(SyncError::NotAuthenticated)?;

        let record =
            ProductRecord::new_pending(generate_product_id(), seller_id, &request, self.clock.now());
        self.products().upsert(&record).await?;

        info!(id = %record.id, "Product queued for sync");
        Ok(record)
    }

    /// Fetches one listing from the server. Never touches the store.
    pub async fn get_product_by_id(&self, id: &str) -> Resource<Product> {
        match self.gateway.get_product(id).await {
            Ok(dto) => Resource::Success(Product::from(dto)),
            Err(e) => {
                debug!(id = %id, error = %e, "Could not load product");
                Resource::error(e.user_message())
            }
        }
    }

    /// Reports a listing. Any failure is `false`.
    pub async fn report_product(&self, product_id: &str, reason: &str) -> bool {
        let report = ReportRequest {
            product_id: product_id.to_string(),
            reason: reason.to_string(),
        };

        match self.gateway.create_report(&report).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(product_id = %product_id, error = %e, "Report failed");
                false
            }
        }
    }

    // =========================================================================
    // Local Views
    // =========================================================================

    /// Records waiting for their first push.
    pub async fn pending_products(&self) -> SyncResult<Vec<ProductRecord>> {
        Ok(self.products().get_by_status(SyncState::Pending).await?)
    }

    /// The signed-in seller's listings.
    pub async fn seller_products(&self) -> SyncResult<Vec<Product>> {
        let seller_id = self
            .credentials
            .seller_id()
            .ok_or(SyncError::NotAuthenticated)?;
        let records = self.products().get_by_seller(&seller_id).await?;
        Ok(to_products(&records))
    }

    /// Live local listings; re-emits after every store write.
    pub fn observe_products(&self) -> impl Stream<Item = SyncResult<Vec<Product>>> + Send + 'static {
        self.products()
            .watch_all()
            .map(|snapshot| snapshot.map(|records| to_products(&records)).map_err(SyncError::from))
    }

    /// Deletes every local record, including unpushed ones.
    pub async fn clear_local_store(&self) -> SyncResult<u64> {
        let removed = self.products().delete_all().await?;
        info!(removed, "Local store cleared");
        Ok(removed)
    }

    /// Counts per sync state plus the last push/pull markers.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        let products = self.products();
        let meta = self.db.sync_meta();

        Ok(SyncStatus {
            pending: products.count_by_status(SyncState::Pending).await?,
            errored: products.count_by_status(SyncState::Error).await?,
            synced: products.count_by_status(SyncState::Synced).await?,
            last_push_at: parse_instant(meta.get(META_LAST_PUSH_AT).await?),
            last_pull_at: parse_instant(meta.get(META_LAST_PULL_AT).await?),
            last_pull_error: meta.get(META_LAST_PULL_ERROR).await?,
        })
    }
}

#[async_trait]
impl SyncTask for SyncEngine {
    /// Push, then pull. Asks for a retry only when the push could not use
    /// the local store.
    async fn run(&self) -> JobOutcome {
        let push = self.sync_pending_products().await;
        self.sync_all_products().await;

        match push {
            Ok(report) if !report.needs_retry() => JobOutcome::Success,
            Ok(report) => {
                warn!(store_errors = report.store_errors, "Push incomplete, retry requested");
                JobOutcome::Retry
            }
            Err(e) => {
                warn!(error = %e, "Push failed, retry requested");
                JobOutcome::Retry
            }
        }
    }
}

fn to_products(records: &[ProductRecord]) -> Vec<Product> {
    records.iter().map(ProductRecord::to_product).collect()
}

fn parse_instant(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|value| DateTime::parse_from_rfc3339(&value).ok())
        .map(|at| at.with_timezone(&Utc))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;
    use crate::error::{GatewayError, GatewayResult};
    use pretty_assertions::assert_eq;
    use remarket_core::{Money, ProductDto};
    use remarket_db::DbConfig;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    // -------------------------------------------------------------------------
    // Fakes
    // -------------------------------------------------------------------------

    const NOW: i64 = 1_717_000_000_000;

    struct FixedClock(AtomicI64);

    impl FixedClock {
        fn at(millis: i64) -> Arc<Self> {
            Arc::new(FixedClock(AtomicI64::new(millis)))
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.0.load(Ordering::SeqCst)).unwrap()
        }
    }

    /// Scripted product API.
    #[derive(Default)]
    struct FakeGateway {
        catalog: Mutex<Option<GatewayResult<Vec<ProductDto>>>>,
        create_script: Mutex<VecDeque<GatewayResult<ProductDto>>>,
        create_calls: Mutex<Vec<ProductRequest>>,
        create_delay: Option<Duration>,
        list_calls: AtomicUsize,
        get_result: Mutex<Option<GatewayResult<ProductDto>>>,
        report_result: Mutex<Option<GatewayResult<bool>>>,
        next_id: AtomicUsize,
    }

    impl FakeGateway {
        fn set_catalog(&self, result: GatewayResult<Vec<ProductDto>>) {
            *self.catalog.lock().unwrap() = Some(result);
        }

        fn script_create(&self, result: GatewayResult<ProductDto>) {
            self.create_script.lock().unwrap().push_back(result);
        }

        fn create_count(&self) -> usize {
            self.create_calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RemoteGateway for FakeGateway {
        async fn list_products(&self) -> GatewayResult<Vec<ProductDto>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.catalog
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn get_product(&self, id: &str) -> GatewayResult<ProductDto> {
            self.get_result
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Ok(dto(id)))
        }

        async fn create_product(&self, request: &ProductRequest) -> GatewayResult<ProductDto> {
            self.create_calls.lock().unwrap().push(request.clone());
            if let Some(delay) = self.create_delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self.create_script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                let mut created = dto(&format!("srv-{n}"));
                created.brand = request.brand.clone();
                Ok(created)
            })
        }

        async fn create_report(&self, _report: &ReportRequest) -> GatewayResult<bool> {
            self.report_result.lock().unwrap().clone().unwrap_or(Ok(true))
        }
    }

    fn dto(id: &str) -> ProductDto {
        ProductDto {
            id: id.to_string(),
            seller_id: "seller-2".into(),
            brand: "Samsung".into(),
            model: "S21".into(),
            storage: "128GB".into(),
            price: Money::from_cents(25_000),
            imei: "490154203237518".into(),
            description: "Server copy".into(),
            image_urls: vec![],
            box_image_url: None,
            invoice_url: None,
            status: "ACTIVE".into(),
            active: true,
            created_at: "2024-06-01T00:00:00.000Z".into(),
            updated_at: "2024-06-01T00:00:00.000Z".into(),
        }
    }

    fn request(brand: &str) -> ProductRequest {
        ProductRequest {
            brand: brand.into(),
            model: "Pixel 7".into(),
            storage: "128GB".into(),
            price: Money::from_cents(39_999),
            imei: "353918050000000".into(),
            description: "Scratch on back".into(),
            image_urls: vec!["content://img/1".into()],
            box_image_url: None,
            invoice_url: Some("content://invoice".into()),
        }
    }

    struct Harness {
        db: Database,
        gateway: Arc<FakeGateway>,
        credentials: Arc<StaticCredentials>,
        engine: SyncEngine,
    }

    async fn harness_with(gateway: FakeGateway, options: EngineOptions) -> Harness {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let gateway = Arc::new(gateway);
        let credentials = Arc::new(StaticCredentials::seller("seller-1"));
        let engine = SyncEngine::new(db.clone(), gateway.clone(), credentials.clone(), options)
            .with_clock(FixedClock::at(NOW));
        Harness {
            db,
            gateway,
            credentials,
            engine,
        }
    }

    async fn harness() -> Harness {
        harness_with(FakeGateway::default(), EngineOptions::default()).await
    }

    fn synced_record(id: &str) -> ProductRecord {
        ProductRecord::from_remote(dto(id), NOW - 1_000)
    }

    fn ids<T>(items: &[T], id: impl Fn(&T) -> &str) -> Vec<String> {
        items.iter().map(|item| id(item).to_string()).collect()
    }

    // -------------------------------------------------------------------------
    // Create
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_created_product_is_immediately_pending() {
        let h = harness().await;

        let record = h.engine.create_product(request("Google")).await.unwrap();

        assert!(uuid::Uuid::parse_str(&record.id).is_ok());
        assert_eq!(record.seller_id, "seller-1");
        assert_eq!(record.status, "CREATED");
        assert!(record.active);
        assert_eq!(record.created_at, "2024-05-29T16:26:40.000Z");
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(record.last_modified, NOW);

        let stored = h.db.products().get_all().await.unwrap();
        assert_eq!(stored, vec![record.clone()]);
        assert_eq!(stored[0].sync_state, SyncState::Pending);

        let pending = h.engine.pending_products().await.unwrap();
        assert_eq!(ids(&pending, |r| r.id.as_str()), vec![record.id]);
        assert_eq!(h.gateway.create_count(), 0);
    }

    #[tokio::test]
    async fn test_create_requires_seller() {
        let h = harness().await;
        h.credentials.sign_out();

        let err = h.engine.create_product(request("Google")).await.unwrap_err();
        assert!(matches!(err, SyncError::NotAuthenticated));
        assert!(h.db.products().get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_accepts_blank_imei() {
        let h = harness().await;
        let mut listing = request("Google");
        listing.imei.clear();
        listing.description.clear();

        let record = h.engine.create_product(listing).await.unwrap();

        let stored = h.db.products().get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Pending);
        assert_eq!(stored.imei, "");
    }

    // -------------------------------------------------------------------------
    // Push
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_push_replaces_local_id_with_server_id() {
        let h = harness().await;
        let local = h.engine.create_product(request("Google")).await.unwrap();

        let mut server = dto("B");
        server.created_at = "T".into();
        server.updated_at = "T".into();
        h.gateway.script_create(Ok(server));

        let report = h.engine.sync_pending_products().await.unwrap();
        assert_eq!(report.synced, 1);

        let stored = h.db.products().get_all().await.unwrap();
        assert_eq!(stored.len(), 1);
        let pushed = &stored[0];
        assert_eq!(pushed.id, "B");
        assert_eq!(pushed.sync_state, SyncState::Synced);
        assert_eq!(pushed.created_at, "T");
        assert_eq!(pushed.updated_at, "T");
        // Local fields survive; only id and timestamps come from the server.
        assert_eq!(pushed.brand, "Google");
        assert_eq!(pushed.seller_id, "seller-1");
        assert!(pushed.last_modified > local.last_modified);
        assert!(h.db.products().get_by_id(&local.id).await.unwrap().is_none());

        let sent = h.gateway.create_calls.lock().unwrap().clone();
        assert_eq!(sent, vec![local.to_request()]);
    }

    #[tokio::test]
    async fn test_failed_push_is_kept_as_error() {
        let h = harness().await;
        let local = h.engine.create_product(request("Google")).await.unwrap();
        h.gateway.script_create(Err(GatewayError::Server {
            status: 503,
            message: "Service Unavailable".into(),
        }));

        let report = h.engine.sync_pending_products().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(!report.needs_retry());

        let stored = h.db.products().get_by_id(&local.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Error);
        assert_eq!(stored.sync_attempts, 1);
        assert!(stored.retryable);
        assert_eq!(
            stored.last_sync_error.as_deref(),
            Some("Server error (503): Service Unavailable")
        );
        assert!(stored.last_modified > local.last_modified);
    }

    #[tokio::test]
    async fn test_error_records_are_retried() {
        let h = harness().await;
        let local = h.engine.create_product(request("Google")).await.unwrap();
        h.gateway
            .script_create(Err(GatewayError::Network("connection reset".into())));

        h.engine.sync_pending_products().await.unwrap();
        let report = h.engine.sync_pending_products().await.unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(h.gateway.create_count(), 2);
        assert!(h.db.products().get_by_id(&local.id).await.unwrap().is_none());
        assert_eq!(h.db.products().count_by_status(SyncState::Synced).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_client_rejection_is_not_retried() {
        let h = harness().await;
        let local = h.engine.create_product(request("Google")).await.unwrap();
        h.gateway.script_create(Err(GatewayError::Client {
            status: 422,
            message: "Unprocessable Entity".into(),
        }));

        h.engine.sync_pending_products().await.unwrap();
        let second = h.engine.sync_pending_products().await.unwrap();

        assert_eq!(second.attempted(), 0);
        assert_eq!(h.gateway.create_count(), 1);
        let stored = h.db.products().get_by_id(&local.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Error);
        assert!(!stored.retryable);
    }

    #[tokio::test]
    async fn test_attempt_cap_stops_retries() {
        let options = EngineOptions {
            max_push_attempts: 2,
            push_interval: None,
        };
        let h = harness_with(FakeGateway::default(), options).await;
        h.engine.create_product(request("Google")).await.unwrap();
        for _ in 0..3 {
            h.gateway.script_create(Err(GatewayError::Network("offline".into())));
        }

        h.engine.sync_pending_products().await.unwrap();
        h.engine.sync_pending_products().await.unwrap();
        let third = h.engine.sync_pending_products().await.unwrap();

        assert_eq!(third.attempted(), 0);
        assert_eq!(h.gateway.create_count(), 2);
        assert_eq!(h.db.products().count_by_status(SyncState::Error).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_default_options_keep_retrying() {
        let h = harness().await;
        let record = h.engine.create_product(request("Google")).await.unwrap();
        for _ in 0..12 {
            h.gateway.script_create(Err(GatewayError::Server {
                status: 503,
                message: "Service Unavailable".into(),
            }));
        }

        for _ in 0..12 {
            let report = h.engine.sync_pending_products().await.unwrap();
            assert_eq!(report.failed, 1);
        }
        let stored = h.db.products().get_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.sync_state, SyncState::Error);
        assert_eq!(stored.sync_attempts, 12);

        let next = h.engine.sync_pending_products().await.unwrap();
        assert_eq!(next.attempted(), 1);
        assert_eq!(next.synced, 1);
        assert_eq!(h.gateway.create_count(), 13);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_queue() {
        let h = harness().await;
        h.engine.create_product(request("First")).await.unwrap();
        let second = h.engine.create_product(request("Second")).await.unwrap();
        h.engine.create_product(request("Third")).await.unwrap();

        h.gateway.script_create(Ok(dto("srv-a")));
        h.gateway.script_create(Err(GatewayError::Unknown("garbled".into())));
        h.gateway.script_create(Ok(dto("srv-c")));

        let report = h.engine.sync_pending_products().await.unwrap();
        assert_eq!(
            report,
            PushReport {
                synced: 2,
                failed: 1,
                skipped: 0,
                store_errors: 0
            }
        );

        let sent: Vec<String> = h
            .gateway
            .create_calls
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.brand.clone())
            .collect();
        assert_eq!(sent, vec!["First", "Second", "Third"]);

        let errored = h.db.products().get_by_status(SyncState::Error).await.unwrap();
        assert_eq!(ids(&errored, |r| r.id.as_str()), vec![second.id]);
    }

    #[tokio::test]
    async fn test_push_on_synced_store_is_a_no_op() {
        let h = harness().await;
        h.db.products()
            .upsert_all(&[synced_record("x"), synced_record("y")])
            .await
            .unwrap();
        let before = h.db.products().get_all().await.unwrap();

        let first = h.engine.sync_pending_products().await.unwrap();
        let second = h.engine.sync_pending_products().await.unwrap();

        assert_eq!(first, PushReport::default());
        assert_eq!(second, PushReport::default());
        assert_eq!(h.gateway.create_count(), 0);
        assert_eq!(h.db.products().get_all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_concurrent_pushes_send_each_record_once() {
        let gateway = FakeGateway {
            create_delay: Some(Duration::from_millis(20)),
            ..FakeGateway::default()
        };
        let h = harness_with(gateway, EngineOptions::default()).await;
        for brand in ["A", "B", "C"] {
            h.engine.create_product(request(brand)).await.unwrap();
        }

        let (left, right) = tokio::join!(
            h.engine.sync_pending_products(),
            h.engine.sync_pending_products()
        );
        let (left, right) = (left.unwrap(), right.unwrap());

        assert_eq!(left.synced + right.synced, 3);
        assert_eq!(h.gateway.create_count(), 3);
        assert_eq!(h.db.products().count_by_status(SyncState::Synced).await.unwrap(), 3);
        assert_eq!(h.db.products().count_by_status(SyncState::Pending).await.unwrap(), 0);
    }

    // -------------------------------------------------------------------------
    // Pull
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_pull_replaces_synced_and_keeps_pending() {
        let h = harness().await;
        h.db.products().upsert(&synced_record("X")).await.unwrap();
        let pending = h.engine.create_product(request("Y")).await.unwrap();
        h.gateway.set_catalog(Ok(vec![dto("Z")]));

        let outcome = h.engine.sync_all_products().await;
        assert!(outcome.is_applied());

        let stored = h.db.products().get_all().await.unwrap();
        assert_eq!(ids(&stored, |r| r.id.as_str()), vec![pending.id.clone(), "Z".to_string()]);
        assert_eq!(stored[0].sync_state, SyncState::Pending);
        assert_eq!(stored[1].sync_state, SyncState::Synced);
        assert_eq!(stored[1].last_modified, NOW);
        assert!(h.db.products().get_by_id("X").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pull_never_reduces_local_writes() {
        let h = harness().await;
        let pending = h.engine.create_product(request("Mine")).await.unwrap();
        let mut errored = synced_record("E");
        errored.sync_state = SyncState::Error;
        h.db.products().upsert(&errored).await.unwrap();

        // The server happens to know both ids already.
        h.gateway
            .set_catalog(Ok(vec![dto(&pending.id), dto("E"), dto("other")]));
        h.engine.sync_all_products().await;

        let kept = h.db.products().get_by_id(&pending.id).await.unwrap().unwrap();
        assert_eq!(kept, pending);
        let kept_error = h.db.products().get_by_id("E").await.unwrap().unwrap();
        assert_eq!(kept_error.sync_state, SyncState::Error);
        assert_eq!(h.db.products().count_by_status(SyncState::Synced).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pull_failure_is_swallowed_and_recorded() {
        let h = harness().await;
        h.db.products().upsert(&synced_record("X")).await.unwrap();
        h.gateway
            .set_catalog(Err(GatewayError::Network("no route to host".into())));

        let outcome = h.engine.sync_all_products().await;
        assert_eq!(
            outcome,
            PullOutcome::Failed("Network error: no route to host".into())
        );
        assert_eq!(h.db.products().get_all().await.unwrap().len(), 1);

        let status = h.engine.status().await.unwrap();
        assert_eq!(status.last_pull_at, None);
        assert_eq!(
            status.last_pull_error.as_deref(),
            Some("Network error: no route to host")
        );

        h.gateway.set_catalog(Ok(vec![]));
        h.engine.sync_all_products().await;
        let status = h.engine.status().await.unwrap();
        assert_eq!(status.last_pull_error, None);
        assert_eq!(status.last_pull_at, DateTime::from_timestamp_millis(NOW));
    }

    // -------------------------------------------------------------------------
    // Read-through
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_read_through_emits_local_then_refreshed() {
        let h = harness().await;
        h.db.products().upsert(&synced_record("old")).await.unwrap();
        h.gateway.set_catalog(Ok(vec![dto("new-1"), dto("new-2")]));

        let emissions: Vec<Vec<Product>> = h.engine.get_all_products().collect().await;

        assert_eq!(emissions.len(), 2);
        assert_eq!(ids(&emissions[0], |p| p.id.as_str()), vec!["old"]);
        assert_eq!(ids(&emissions[1], |p| p.id.as_str()), vec!["new-1", "new-2"]);
    }

    #[tokio::test]
    async fn test_read_through_offline_emits_snapshot_once() {
        let h = harness().await;
        let pending = h.engine.create_product(request("Mine")).await.unwrap();
        h.db.products().upsert(&synced_record("cached")).await.unwrap();
        h.gateway
            .set_catalog(Err(GatewayError::Network("unreachable".into())));

        let emissions: Vec<Vec<Product>> = h.engine.get_all_products().collect().await;

        assert_eq!(emissions.len(), 1);
        assert_eq!(
            ids(&emissions[0], |p| p.id.as_str()),
            vec![pending.id, "cached".to_string()]
        );
        assert_eq!(h.db.products().get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_read_through_keeps_pending_records() {
        let h = harness().await;
        let pending = h.engine.create_product(request("Mine")).await.unwrap();
        h.gateway.set_catalog(Ok(vec![dto("remote")]));

        let emissions: Vec<Vec<Product>> = h.engine.get_all_products().collect().await;
        let last = emissions.last().unwrap();
        assert_eq!(ids(last, |p| p.id.as_str()), vec![pending.id, "remote".to_string()]);
    }

    // -------------------------------------------------------------------------
    // Single-listing Operations
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_get_product_by_id() {
        let h = harness().await;

        let found = h.engine.get_product_by_id("p-1").await;
        assert_eq!(found.data().map(|p| p.id.as_str()), Some("p-1"));

        *h.gateway.get_result.lock().unwrap() = Some(Err(GatewayError::Client {
            status: 404,
            message: "Not Found".into(),
        }));
        assert_eq!(
            h.engine.get_product_by_id("p-1").await,
            Resource::Error("Product not found (404)".into())
        );

        *h.gateway.get_result.lock().unwrap() =
            Some(Err(GatewayError::Network("timed out".into())));
        assert_eq!(
            h.engine.get_product_by_id("p-1").await.error_message(),
            Some("Network error: timed out")
        );

        // Remote only: nothing lands in the store.
        assert!(h.db.products().get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_report_collapses_errors_to_false() {
        let h = harness().await;
        assert!(h.engine.report_product("p-1", "fake listing").await);

        *h.gateway.report_result.lock().unwrap() = Some(Ok(false));
        assert!(!h.engine.report_product("p-1", "fake listing").await);

        *h.gateway.report_result.lock().unwrap() =
            Some(Err(GatewayError::Network("down".into())));
        assert!(!h.engine.report_product("p-1", "fake listing").await);
    }

    // -------------------------------------------------------------------------
    // Local Views
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_seller_products_and_clear() {
        let h = harness().await;
        let mine = h.engine.create_product(request("Mine")).await.unwrap();
        h.db.products().upsert(&synced_record("theirs")).await.unwrap();

        let own = h.engine.seller_products().await.unwrap();
        assert_eq!(ids(&own, |p| p.id.as_str()), vec![mine.id]);

        assert_eq!(h.engine.clear_local_store().await.unwrap(), 2);
        assert!(h.db.products().get_all().await.unwrap().is_empty());

        h.credentials.sign_out();
        assert!(matches!(
            h.engine.seller_products().await,
            Err(SyncError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_observe_products_follows_writes() {
        let h = harness().await;
        let mut live = Box::pin(h.engine.observe_products());
        assert!(live.next().await.unwrap().unwrap().is_empty());

        let record = h.engine.create_product(request("Live")).await.unwrap();

        let next = tokio::time::timeout(Duration::from_secs(5), live.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(ids(&next, |p| p.id.as_str()), vec![record.id]);
    }

    #[tokio::test]
    async fn test_status_counts() {
        let h = harness().await;
        h.engine.create_product(request("One")).await.unwrap();
        h.engine.create_product(request("Two")).await.unwrap();
        h.db.products().upsert(&synced_record("s")).await.unwrap();
        h.gateway.script_create(Err(GatewayError::Network("down".into())));

        h.engine.sync_pending_products().await.unwrap();
        let status = h.engine.status().await.unwrap();

        assert_eq!(status.pending, 0);
        assert_eq!(status.errored, 1);
        assert_eq!(status.synced, 2);
        assert_eq!(status.last_push_at, DateTime::from_timestamp_millis(NOW));
    }

    // -------------------------------------------------------------------------
    // Scheduled Task
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_task_pushes_then_pulls() {
        let h = harness().await;
        h.engine.create_product(request("Mine")).await.unwrap();
        h.gateway.script_create(Ok(dto("pushed")));
        h.gateway.set_catalog(Ok(vec![dto("pushed"), dto("someone-else")]));

        assert_eq!(h.engine.run().await, JobOutcome::Success);

        let stored = h.db.products().get_all().await.unwrap();
        assert_eq!(ids(&stored, |r| r.id.as_str()), vec!["pushed", "someone-else"]);
        assert!(stored.iter().all(ProductRecord::is_synced));
        assert_eq!(h.gateway.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_task_succeeds_when_only_pull_fails() {
        let h = harness().await;
        h.gateway.set_catalog(Err(GatewayError::Server {
            status: 500,
            message: "Internal Server Error".into(),
        }));

        assert_eq!(h.engine.run().await, JobOutcome::Success);
    }

    #[tokio::test]
    async fn test_task_retries_when_store_is_gone() {
        let h = harness().await;
        h.db.close().await;

        assert_eq!(h.engine.run().await, JobOutcome::Retry);
    }
}
