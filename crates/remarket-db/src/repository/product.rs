//! # Product Repository
//!
//! The local record store: one row per listing plus its sync bookkeeping.
//!
//! ## Who Touches Which Rows
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   create_product ──► upsert(PENDING)                                   │
//! │                                                                         │
//! │   push ──► get_push_queue ──► replace(old_id, SYNCED)                  │
//! │                          └──► update(ERROR)                            │
//! │                                                                         │
//! │   pull ──► replace_synced(catalog)                                     │
//! │              ├── DELETE every SYNCED row                               │
//! │              └── INSERT catalog rows, skipping ids held by a           │
//! │                  PENDING/ERROR row (local write wins)                  │
//! │                                                                         │
//! │   observers ──► watch_all() ── re-query after every committed write    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rows keep their insertion position (`rowid`) across upserts, so "storage
//! order" is the order listings first reached this device.

use futures_util::stream::{self, BoxStream, StreamExt};
use remarket_core::codec::{decode_images, encode_images};
use remarket_core::{Money, ProductRecord, SyncState};
use sqlx::sqlite::SqliteArguments;
use sqlx::{Sqlite, SqliteExecutor, SqlitePool};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{DbError, DbResult};

// =============================================================================
// SQL
// =============================================================================

/// Prefixes a query tail with the full column list.
macro_rules! select_products {
    ($tail:literal) => {
        concat!(
            "SELECT id, seller_id, brand, model, storage, price_cents, imei, description, ",
            "images, box_image_uri, invoice_uri, status, active, created_at, updated_at, ",
            "sync_state, last_modified, sync_attempts, last_sync_error, retryable ",
            "FROM products ",
            $tail
        )
    };
}

/// Column list and placeholders shared by both insert flavours.
macro_rules! insert_product {
    ($conflict:literal) => {
        concat!(
            "INSERT INTO products (id, seller_id, brand, model, storage, price_cents, imei, ",
            "description, images, box_image_uri, invoice_uri, status, active, created_at, ",
            "updated_at, sync_state, last_modified, sync_attempts, last_sync_error, retryable) ",
            "VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ",
            "?17, ?18, ?19, ?20) ",
            $conflict
        )
    };
}

const UPSERT_SQL: &str = insert_product!(
    "ON CONFLICT(id) DO UPDATE SET
        seller_id = excluded.seller_id,
        brand = excluded.brand,
        model = excluded.model,
        storage = excluded.storage,
        price_cents = excluded.price_cents,
        imei = excluded.imei,
        description = excluded.description,
        images = excluded.images,
        box_image_uri = excluded.box_image_uri,
        invoice_uri = excluded.invoice_uri,
        status = excluded.status,
        active = excluded.active,
        created_at = excluded.created_at,
        updated_at = excluded.updated_at,
        sync_state = excluded.sync_state,
        last_modified = excluded.last_modified,
        sync_attempts = excluded.sync_attempts,
        last_sync_error = excluded.last_sync_error,
        retryable = excluded.retryable"
);

const INSERT_IF_ABSENT_SQL: &str = insert_product!("ON CONFLICT(id) DO NOTHING");

const UPDATE_SQL: &str = "UPDATE products SET
        seller_id = ?2, brand = ?3, model = ?4, storage = ?5, price_cents = ?6,
        imei = ?7, description = ?8, images = ?9, box_image_uri = ?10,
        invoice_uri = ?11, status = ?12, active = ?13, created_at = ?14,
        updated_at = ?15, sync_state = ?16, last_modified = ?17,
        sync_attempts = ?18, last_sync_error = ?19, retryable = ?20
    WHERE id = ?1";

type ProductQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Binds a record in column order `?1..?20`.
fn bind_record<'q>(query: ProductQuery<'q>, record: &'q ProductRecord) -> ProductQuery<'q> {
    query
        .bind(record.id.as_str())
        .bind(record.seller_id.as_str())
        .bind(record.brand.as_str())
        .bind(record.model.as_str())
        .bind(record.storage.as_str())
        .bind(record.price.cents())
        .bind(record.imei.as_str())
        .bind(record.description.as_str())
        .bind(encode_images(&record.images))
        .bind(record.box_image_uri.as_deref())
        .bind(record.invoice_uri.as_deref())
        .bind(record.status.as_str())
        .bind(record.active)
        .bind(record.created_at.as_str())
        .bind(record.updated_at.as_str())
        .bind(record.sync_state)
        .bind(record.last_modified)
        .bind(record.sync_attempts)
        .bind(record.last_sync_error.as_deref())
        .bind(record.retryable)
}

async fn upsert_row<'c, E: SqliteExecutor<'c>>(executor: E, record: &ProductRecord) -> DbResult<()> {
    bind_record(sqlx::query(UPSERT_SQL), record)
        .execute(executor)
        .await?;
    Ok(())
}

// =============================================================================
// Row Mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: String,
    seller_id: String,
    brand: String,
    model: String,
    storage: String,
    price_cents: i64,
    imei: String,
    description: String,
    images: String,
    box_image_uri: Option<String>,
    invoice_uri: Option<String>,
    status: String,
    active: bool,
    created_at: String,
    updated_at: String,
    sync_state: SyncState,
    last_modified: i64,
    sync_attempts: i64,
    last_sync_error: Option<String>,
    retryable: bool,
}

impl From<ProductRow> for ProductRecord {
    fn from(row: ProductRow) -> Self {
        ProductRecord {
            id: row.id,
            seller_id: row.seller_id,
            brand: row.brand,
            model: row.model,
            storage: row.storage,
            price: Money::from_cents(row.price_cents),
            imei: row.imei,
            description: row.description,
            images: decode_images(&row.images),
            box_image_uri: row.box_image_uri,
            invoice_uri: row.invoice_uri,
            status: row.status,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sync_state: row.sync_state,
            last_modified: row.last_modified,
            sync_attempts: row.sync_attempts,
            last_sync_error: row.last_sync_error,
            retryable: row.retryable,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Counts reported by [`ProductRepository::replace_synced`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    /// SYNCED rows deleted.
    pub removed: u64,
    /// Catalog rows written.
    pub inserted: u64,
    /// Catalog rows dropped because a local PENDING/ERROR row holds the id.
    pub skipped: u64,
}

/// Repository for listing rows.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.products();
/// repo.upsert(&record).await?;
/// let pending = repo.get_by_status(SyncState::Pending).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
    changes: Arc<watch::Sender<u64>>,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool, changes: Arc<watch::Sender<u64>>) -> Self {
        ProductRepository { pool, changes }
    }

    /// Wakes every `watch_all` observer.
    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Every record, in storage order.
    pub async fn get_all(&self) -> DbResult<Vec<ProductRecord>> {
        let rows = sqlx::query_as::<_, ProductRow>(select_products!("ORDER BY rowid"))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(ProductRecord::from).collect())
    }

    /// Live view of [`get_all`](Self::get_all).
    ///
    /// Emits the current contents immediately, then again after every
    /// committed write through any repository sharing this database. Runs
    /// until the stream is dropped. Writes that land while a snapshot is
    /// being read are coalesced into the next emission.
    pub fn watch_all(&self) -> BoxStream<'static, DbResult<Vec<ProductRecord>>> {
        let mut changes = self.changes.subscribe();
        changes.mark_unchanged();

        stream::unfold(
            (self.clone(), changes, true),
            |(repo, mut changes, first)| async move {
                if !first && changes.changed().await.is_err() {
                    return None;
                }
                changes.mark_unchanged();
                let snapshot = repo.get_all().await;
                Some((snapshot, (repo, changes, false)))
            },
        )
        .boxed()
    }

    /// Gets a record by id.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<ProductRecord>> {
        let row = sqlx::query_as::<_, ProductRow>(select_products!("WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(ProductRecord::from))
    }

    /// Records in one sync state, in storage order.
    pub async fn get_by_status(&self, state: SyncState) -> DbResult<Vec<ProductRecord>> {
        let rows = sqlx::query_as::<_, ProductRow>(select_products!(
            "WHERE sync_state = ?1 ORDER BY rowid"
        ))
        .bind(state)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ProductRecord::from).collect())
    }

    /// Listings owned by one seller, in storage order.
    pub async fn get_by_seller(&self, seller_id: &str) -> DbResult<Vec<ProductRecord>> {
        let rows = sqlx::query_as::<_, ProductRow>(select_products!(
            "WHERE seller_id = ?1 ORDER BY rowid"
        ))
        .bind(seller_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ProductRecord::from).collect())
    }

    /// Records a push should attempt, in storage order.
    ///
    /// ## Includes
    /// - every PENDING record
    /// - ERROR records whose last failure was retryable and that have failed
    ///   fewer than `max_attempts` times (`0` means no limit)
    pub async fn get_push_queue(&self, max_attempts: i64) -> DbResult<Vec<ProductRecord>> {
        let rows = sqlx::query_as::<_, ProductRow>(select_products!(
            "WHERE sync_state = 'PENDING'
                OR (sync_state = 'ERROR' AND retryable = 1 AND (?1 = 0 OR sync_attempts < ?1))
             ORDER BY rowid"
        ))
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;

        debug!(count = rows.len(), "Loaded push queue");
        Ok(rows.into_iter().map(ProductRecord::from).collect())
    }

    /// Number of records in one sync state.
    pub async fn count_by_status(&self, state: SyncState) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE sync_state = ?1")
            .bind(state)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts the record, or overwrites the row with the same id.
    pub async fn upsert(&self, record: &ProductRecord) -> DbResult<()> {
        upsert_row(&self.pool, record).await?;
        debug!(id = %record.id, state = %record.sync_state, "Upserted product");
        self.notify();
        Ok(())
    }

    /// Upserts several records in one transaction.
    pub async fn upsert_all(&self, records: &[ProductRecord]) -> DbResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        for record in records {
            upsert_row(&mut *tx, record).await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(count = records.len(), "Upserted products");
        self.notify();
        Ok(())
    }

    /// Overwrites an existing row.
    ///
    /// ## Returns
    /// * `Err(DbError::NotFound)` - no row with `record.id`
    pub async fn update(&self, record: &ProductRecord) -> DbResult<()> {
        let result = bind_record(sqlx::query(UPDATE_SQL), record)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", &record.id));
        }

        debug!(id = %record.id, state = %record.sync_state, "Updated product");
        self.notify();
        Ok(())
    }

    /// Swaps the row `old_id` for `record` in one transaction.
    ///
    /// Used when the server assigns a new id to a pushed listing. The new row
    /// takes the end of storage order.
    pub async fn replace(&self, old_id: &str, record: &ProductRecord) -> DbResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        if old_id != record.id {
            sqlx::query("DELETE FROM products WHERE id = ?1")
                .bind(old_id)
                .execute(&mut *tx)
                .await?;
        }
        upsert_row(&mut *tx, record).await?;

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(old_id = %old_id, new_id = %record.id, "Replaced product");
        self.notify();
        Ok(())
    }

    /// Deletes every record. Returns the number removed.
    pub async fn delete_all(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM products")
            .execute(&self.pool)
            .await?;

        self.notify();
        Ok(result.rows_affected())
    }

    /// Deletes every SYNCED record. PENDING and ERROR rows stay.
    pub async fn delete_all_synced(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM products WHERE sync_state = 'SYNCED'")
            .execute(&self.pool)
            .await?;

        self.notify();
        Ok(result.rows_affected())
    }

    /// Replaces the SYNCED part of the table with `records`.
    ///
    /// One transaction, so observers never see the table without its synced
    /// rows. A catalog row whose id is held by a PENDING or ERROR row is
    /// skipped.
    pub async fn replace_synced(&self, records: &[ProductRecord]) -> DbResult<ReplaceSummary> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        let removed = sqlx::query("DELETE FROM products WHERE sync_state = 'SYNCED'")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let mut summary = ReplaceSummary {
            removed,
            ..ReplaceSummary::default()
        };

        for record in records {
            let written = bind_record(sqlx::query(INSERT_IF_ABSENT_SQL), record)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            if written == 0 {
                summary.skipped += 1;
            } else {
                summary.inserted += written;
            }
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(
            removed = summary.removed,
            inserted = summary.inserted,
            skipped = summary.skipped,
            "Replaced synced products"
        );
        self.notify();
        Ok(summary)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
