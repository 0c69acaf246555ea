//! Storage seam for cartons, movements, thresholds and stocktakes
//!
//! Every carton mutation goes through [`LedgerStore::apply`] or
//! [`LedgerStore::repack`]: the store locks the carton, runs the guarded
//! transition from `shared` against the locked state and writes the new
//! projection together with its movement, or nothing at all.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    CartonTemplate, ListResponse, PlannedTransition, RepackPlan, SessionProgress, StockAggregate,
    StockItem, StockItemFilter, StockMovement, StockOperation, StockThreshold, StocktakeScan,
    SessionStatus, StocktakeSession, TransitionContext,
};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// How a mutation addresses its carton
#[derive(Debug, Clone, Copy)]
pub enum ItemRef<'a> {
    Id(Uuid),
    Barcode(&'a str),
}

impl ItemRef<'_> {
    pub fn not_found(&self) -> AppError {
        match self {
            ItemRef::Id(id) => AppError::NotFound(format!("Stock item {} not found", id)),
            ItemRef::Barcode(barcode) => {
                AppError::NotFound(format!("Barcode not recognised: {}", barcode))
            }
        }
    }
}

/// A stocktake scan as persisted, with the carton it resolved to
#[derive(Debug, Clone)]
pub struct RecordedScan {
    pub scan: StocktakeScan,
    pub item: Option<StockItem>,
    pub progress: SessionProgress,
}

/// Consistent read of a session for reconciliation
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session: StocktakeSession,
    /// Frozen expectation, current state of each carton
    pub expected: Vec<StockItem>,
    /// Cartons with a `found` scan in this session
    pub found: HashSet<Uuid>,
    /// Every scan in recording order
    pub scans: Vec<StocktakeScan>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Cheap round trip to the backing storage
    async fn ping(&self) -> AppResult<()>;

    // Cartons

    /// Allocate `count` barcodes after the highest sequence under `stem` and
    /// register them as `pending_scan`. Allocation is atomic per stem.
    async fn create_pending_items(
        &self,
        stem: &str,
        template: &CartonTemplate,
        count: u32,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<StockItem>>;

    async fn get_item(&self, id: Uuid) -> AppResult<Option<StockItem>>;

    async fn find_by_barcode(&self, barcode: &str) -> AppResult<Option<StockItem>>;

    /// Newest first
    async fn list_items(&self, filter: &StockItemFilter) -> AppResult<ListResponse<StockItem>>;

    /// Movements of one carton in the order they were written
    async fn list_movements(&self, item_id: Uuid) -> AppResult<Vec<StockMovement>>;

    /// Latest movement per carton, ignoring movements tied to `exclude_session`
    async fn last_movements(
        &self,
        item_ids: &[Uuid],
        exclude_session: Option<Uuid>,
    ) -> AppResult<HashMap<Uuid, StockMovement>>;

    /// Run a guarded transition against the locked carton and persist it
    async fn apply(
        &self,
        target: ItemRef<'_>,
        operation: &StockOperation,
        ctx: &TransitionContext,
    ) -> AppResult<PlannedTransition>;

    /// Split a picked carton, allocating the child's barcode under `child_stem`
    async fn repack(
        &self,
        barcode: &str,
        units_taken: i32,
        order_id: Option<Uuid>,
        child_stem: &str,
        ctx: &TransitionContext,
    ) -> AppResult<RepackPlan>;

    /// Per product and colour totals over non-terminal cartons
    async fn stock_aggregates(&self) -> AppResult<Vec<StockAggregate>>;

    // Thresholds

    async fn list_thresholds(&self) -> AppResult<Vec<StockThreshold>>;

    async fn get_threshold(&self, id: Uuid) -> AppResult<Option<StockThreshold>>;

    /// Fails with `DuplicateIdentity` when the `(product_code, colour)` key exists
    async fn insert_threshold(&self, threshold: &StockThreshold) -> AppResult<()>;

    /// Replace levels of an existing threshold
    async fn update_threshold(&self, threshold: &StockThreshold) -> AppResult<()>;

    /// Returns whether a row was removed
    async fn delete_threshold(&self, id: Uuid) -> AppResult<bool>;

    // Stocktake

    /// Persist a new session and freeze the set of in-stock cartons it expects
    async fn start_session(&self, session: StocktakeSession) -> AppResult<StocktakeSession>;

    async fn get_session(&self, id: Uuid) -> AppResult<Option<StocktakeSession>>;

    /// Newest first
    async fn list_sessions(&self) -> AppResult<Vec<StocktakeSession>>;

    /// Classify and record a scan atomically with the "already found" check
    async fn record_scan(
        &self,
        session_id: Uuid,
        barcode: &str,
        notes: Option<String>,
        ctx: &TransitionContext,
    ) -> AppResult<RecordedScan>;

    /// Newest first
    async fn list_scans(&self, session_id: Uuid, limit: u32) -> AppResult<Vec<StocktakeScan>>;

    async fn session_snapshot(&self, session_id: Uuid) -> AppResult<SessionSnapshot>;

    /// Move the session to `completed` and return the snapshot the totals
    /// were computed from. No scan can land after the snapshot.
    async fn complete_session(
        &self,
        session_id: Uuid,
        completed_by: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<SessionSnapshot>;

    async fn cancel_session(
        &self,
        session_id: Uuid,
        cancelled_by: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<StocktakeSession>;
}

/// Progress derived from a session's stored counters
pub fn session_progress(session: &StocktakeSession) -> SessionProgress {
    SessionProgress::compute(
        i64::from(session.total_scanned),
        i64::from(session.total_expected),
    )
}

/// Error for touching a session that is no longer in progress
pub fn closed_session_error(session: &StocktakeSession, completing: bool) -> AppError {
    match session.status {
        SessionStatus::Completed if completing => AppError::AlreadyCompleted(session.id),
        status => AppError::SessionClosed {
            session_id: session.id,
            status,
        },
    }
}
