//! PostgreSQL ledger store
//!
//! Every carton mutation runs in one transaction that takes a row lock on the
//! carton (`FOR UPDATE`) before the guarded transition is evaluated, so the
//! status check and the write see the same row. Barcode allocation is
//! serialized per stem with a transaction-scoped advisory lock.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use shared::{
    barcode, classify_scan, plan_repack, reconcile, BoxType, CartonTemplate, ListResponse,
    MovementType, PlannedTransition, RepackPlan, ScanResult, SessionProgress, SessionStatus,
    StockAggregate, StockItem, StockItemFilter, StockMovement, StockOperation, StockStatus,
    StockThreshold, StocktakeScan, StocktakeSession, TransitionContext,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use super::{closed_session_error, ItemRef, LedgerStore, RecordedScan, SessionSnapshot};
use crate::error::{AppError, AppResult, IdentityKind};

const ITEM_COLUMNS: &str = "id, barcode_id, product_code, colour, quantity, box_type, status, \
     production_date, scanned_in_at, scanned_in_by, scanned_out_at, scanned_out_by, order_id, \
     parent_stock_item_id, notes, created_at, updated_at";

const MOVEMENT_COLUMNS: &str = "id, stock_item_id, movement_type, quantity_change, status_after, \
     reason, order_id, stocktake_session_id, performed_by, created_at";

const THRESHOLD_COLUMNS: &str =
    "id, product_code, colour, red_threshold, amber_threshold, created_at, updated_at";

const SCAN_COLUMNS: &str =
    "id, session_id, barcode_scanned, stock_item_id, scan_result, scanned_by, scanned_at, notes";

// total_scanned is derived from found scans, never stored
const SESSION_SELECT: &str = r#"
    SELECT s.id, s.name, s.status, s.started_by, s.completed_by, s.started_at, s.completed_at,
           s.total_expected,
           (SELECT COUNT(*) FROM stocktake_scans sc
             WHERE sc.session_id = s.id AND sc.scan_result = 'found')::INT AS total_scanned,
           s.total_discrepancies, s.notes
    FROM stocktake_sessions s
"#;

/// Row for stock_items
#[derive(Debug, FromRow)]
struct StockItemRow {
    id: Uuid,
    barcode_id: String,
    product_code: String,
    colour: String,
    quantity: i32,
    box_type: String,
    status: String,
    production_date: Option<NaiveDate>,
    scanned_in_at: Option<DateTime<Utc>>,
    scanned_in_by: Option<Uuid>,
    scanned_out_at: Option<DateTime<Utc>>,
    scanned_out_by: Option<Uuid>,
    order_id: Option<Uuid>,
    parent_stock_item_id: Option<Uuid>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Row for stock_movements
#[derive(Debug, FromRow)]
struct MovementRow {
    id: Uuid,
    stock_item_id: Uuid,
    movement_type: String,
    quantity_change: i32,
    status_after: String,
    reason: Option<String>,
    order_id: Option<Uuid>,
    stocktake_session_id: Option<Uuid>,
    performed_by: Uuid,
    created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct ThresholdRow {
    id: Uuid,
    product_code: String,
    colour: Option<String>,
    red_threshold: i32,
    amber_threshold: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    name: String,
    status: String,
    started_by: Uuid,
    completed_by: Option<Uuid>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    total_expected: i32,
    total_scanned: i32,
    total_discrepancies: i32,
    notes: Option<String>,
}

#[derive(Debug, FromRow)]
struct ScanRow {
    id: Uuid,
    session_id: Uuid,
    barcode_scanned: String,
    stock_item_id: Option<Uuid>,
    scan_result: String,
    scanned_by: Uuid,
    scanned_at: DateTime<Utc>,
    notes: Option<String>,
}

/// Row for the per product/colour aggregate query
#[derive(Debug, FromRow)]
struct AggregateRow {
    product_code: String,
    colour: String,
    carton_count: i64,
    total_units: i64,
}

fn unknown_value(column: &str, raw: &str) -> AppError {
    AppError::Internal(format!("Unknown {} '{}' in database", column, raw))
}

impl TryFrom<StockItemRow> for StockItem {
    type Error = AppError;

    fn try_from(row: StockItemRow) -> Result<Self, Self::Error> {
        let status =
            StockStatus::from_str(&row.status).ok_or_else(|| unknown_value("status", &row.status))?;
        let box_type = BoxType::from_str(&row.box_type)
            .ok_or_else(|| unknown_value("box_type", &row.box_type))?;

        Ok(StockItem {
            id: row.id,
            barcode_id: row.barcode_id,
            product_code: row.product_code,
            colour: row.colour,
            quantity: row.quantity,
            box_type,
            status,
            production_date: row.production_date,
            scanned_in_at: row.scanned_in_at,
            scanned_in_by: row.scanned_in_by,
            scanned_out_at: row.scanned_out_at,
            scanned_out_by: row.scanned_out_by,
            order_id: row.order_id,
            parent_stock_item_id: row.parent_stock_item_id,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<MovementRow> for StockMovement {
    type Error = AppError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let movement_type = MovementType::from_str(&row.movement_type)
            .ok_or_else(|| unknown_value("movement_type", &row.movement_type))?;
        let status_after = StockStatus::from_str(&row.status_after)
            .ok_or_else(|| unknown_value("status_after", &row.status_after))?;

        Ok(StockMovement {
            id: row.id,
            stock_item_id: row.stock_item_id,
            movement_type,
            quantity_change: row.quantity_change,
            status_after,
            reason: row.reason,
            order_id: row.order_id,
            stocktake_session_id: row.stocktake_session_id,
            performed_by: row.performed_by,
            created_at: row.created_at,
        })
    }
}

impl From<ThresholdRow> for StockThreshold {
    fn from(row: ThresholdRow) -> Self {
        StockThreshold {
            id: row.id,
            product_code: row.product_code,
            colour: row.colour,
            red_threshold: row.red_threshold,
            amber_threshold: row.amber_threshold,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl TryFrom<SessionRow> for StocktakeSession {
    type Error = AppError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status = SessionStatus::from_str(&row.status)
            .ok_or_else(|| unknown_value("session status", &row.status))?;

        Ok(StocktakeSession {
            id: row.id,
            name: row.name,
            status,
            started_by: row.started_by,
            completed_by: row.completed_by,
            started_at: row.started_at,
            completed_at: row.completed_at,
            total_expected: row.total_expected,
            total_scanned: row.total_scanned,
            total_discrepancies: row.total_discrepancies,
            notes: row.notes,
        })
    }
}

impl TryFrom<ScanRow> for StocktakeScan {
    type Error = AppError;

    fn try_from(row: ScanRow) -> Result<Self, Self::Error> {
        let scan_result = ScanResult::from_str(&row.scan_result)
            .ok_or_else(|| unknown_value("scan_result", &row.scan_result))?;

        Ok(StocktakeScan {
            id: row.id,
            session_id: row.session_id,
            barcode_scanned: row.barcode_scanned,
            stock_item_id: row.stock_item_id,
            scan_result,
            scanned_by: row.scanned_by,
            scanned_at: row.scanned_at,
            notes: row.notes,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> AppResult<Vec<T>>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn session_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Stocktake session {} not found", id))
}

/// Row lock strength for a session read
#[derive(Debug, Clone, Copy)]
enum SessionLock {
    /// Scans may proceed in parallel but block completion
    Share,
    Update,
}

/// PostgreSQL-backed [`LedgerStore`]
#[derive(Clone)]
pub struct PgLedgerStore {
    db: PgPool,
}

impl PgLedgerStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Serialize allocation under `stem` and return its highest sequence
    async fn lock_stem(conn: &mut PgConnection, stem: &str) -> AppResult<u32> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(stem)
            .execute(&mut *conn)
            .await?;

        let existing = sqlx::query_scalar::<_, String>(
            "SELECT barcode_id FROM stock_items WHERE left(barcode_id, char_length($1)) = $1",
        )
        .bind(stem)
        .fetch_all(&mut *conn)
        .await?;

        Ok(barcode::max_sequence(
            stem,
            existing.iter().map(String::as_str),
        ))
    }

    async fn insert_item(conn: &mut PgConnection, item: &StockItem) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO stock_items (
                id, barcode_id, product_code, colour, quantity, box_type, status,
                production_date, scanned_in_at, scanned_in_by, scanned_out_at, scanned_out_by,
                order_id, parent_stock_item_id, notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(item.id)
        .bind(&item.barcode_id)
        .bind(&item.product_code)
        .bind(&item.colour)
        .bind(item.quantity)
        .bind(item.box_type.as_str())
        .bind(item.status.as_str())
        .bind(item.production_date)
        .bind(item.scanned_in_at)
        .bind(item.scanned_in_by)
        .bind(item.scanned_out_at)
        .bind(item.scanned_out_by)
        .bind(item.order_id)
        .bind(item.parent_stock_item_id)
        .bind(&item.notes)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(AppError::DuplicateIdentity {
                kind: IdentityKind::Barcode,
                key: item.barcode_id.clone(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Write back the mutable half of a carton
    async fn update_item(conn: &mut PgConnection, item: &StockItem) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE stock_items
            SET quantity = $2, box_type = $3, status = $4,
                scanned_in_at = $5, scanned_in_by = $6,
                scanned_out_at = $7, scanned_out_by = $8,
                order_id = $9, notes = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(item.id)
        .bind(item.quantity)
        .bind(item.box_type.as_str())
        .bind(item.status.as_str())
        .bind(item.scanned_in_at)
        .bind(item.scanned_in_by)
        .bind(item.scanned_out_at)
        .bind(item.scanned_out_by)
        .bind(item.order_id)
        .bind(&item.notes)
        .bind(item.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn insert_movement(conn: &mut PgConnection, movement: &StockMovement) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                id, stock_item_id, movement_type, quantity_change, status_after, reason,
                order_id, stocktake_session_id, performed_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(movement.id)
        .bind(movement.stock_item_id)
        .bind(movement.movement_type.as_str())
        .bind(movement.quantity_change)
        .bind(movement.status_after.as_str())
        .bind(&movement.reason)
        .bind(movement.order_id)
        .bind(movement.stocktake_session_id)
        .bind(movement.performed_by)
        .bind(movement.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Read and row-lock a carton for the rest of the transaction
    async fn lock_item(
        conn: &mut PgConnection,
        target: ItemRef<'_>,
    ) -> AppResult<Option<StockItem>> {
        let row = match target {
            ItemRef::Id(id) => {
                let sql = format!("SELECT {} FROM stock_items WHERE id = $1 FOR UPDATE", ITEM_COLUMNS);
                sqlx::query_as::<_, StockItemRow>(&sql)
                    .bind(id)
                    .fetch_optional(&mut *conn)
                    .await?
            }
            ItemRef::Barcode(barcode) => {
                let sql = format!(
                    "SELECT {} FROM stock_items WHERE barcode_id = $1 FOR UPDATE",
                    ITEM_COLUMNS
                );
                sqlx::query_as::<_, StockItemRow>(&sql)
                    .bind(barcode)
                    .fetch_optional(&mut *conn)
                    .await?
            }
        };

        row.map(StockItem::try_from).transpose()
    }

    async fn read_session(
        conn: &mut PgConnection,
        id: Uuid,
        lock: Option<SessionLock>,
    ) -> AppResult<StocktakeSession> {
        let clause = match lock {
            None => "",
            Some(SessionLock::Share) => " FOR SHARE OF s",
            Some(SessionLock::Update) => " FOR UPDATE OF s",
        };
        let sql = format!("{} WHERE s.id = $1{}", SESSION_SELECT, clause);

        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| session_not_found(id))?;

        StocktakeSession::try_from(row)
    }

    async fn found_count(conn: &mut PgConnection, session_id: Uuid) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM stocktake_scans WHERE session_id = $1 AND scan_result = 'found'",
        )
        .bind(session_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(count)
    }

    /// Insert a scan; `false` when a `found` scan for the carton already exists
    async fn insert_scan(conn: &mut PgConnection, scan: &StocktakeScan) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO stocktake_scans (
                id, session_id, barcode_scanned, stock_item_id, scan_result,
                scanned_by, scanned_at, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(scan.id)
        .bind(scan.session_id)
        .bind(&scan.barcode_scanned)
        .bind(scan.stock_item_id)
        .bind(scan.scan_result.as_str())
        .bind(scan.scanned_by)
        .bind(scan.scanned_at)
        .bind(&scan.notes)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn load_snapshot(
        conn: &mut PgConnection,
        session: StocktakeSession,
    ) -> AppResult<SessionSnapshot> {
        let sql = format!(
            r#"
            SELECT {} FROM stock_items
            WHERE id IN (SELECT stock_item_id FROM stocktake_expected_items WHERE session_id = $1)
            ORDER BY barcode_id
            "#,
            ITEM_COLUMNS
        );
        let expected = sqlx::query_as::<_, StockItemRow>(&sql)
            .bind(session.id)
            .fetch_all(&mut *conn)
            .await?;

        let sql = format!(
            "SELECT {} FROM stocktake_scans WHERE session_id = $1 ORDER BY seq",
            SCAN_COLUMNS
        );
        let scans = sqlx::query_as::<_, ScanRow>(&sql)
            .bind(session.id)
            .fetch_all(&mut *conn)
            .await?;

        let scans: Vec<StocktakeScan> = convert_all(scans)?;
        let found: HashSet<Uuid> = scans
            .iter()
            .filter(|scan| scan.scan_result == ScanResult::Found)
            .filter_map(|scan| scan.stock_item_id)
            .collect();

        Ok(SessionSnapshot {
            session,
            expected: convert_all(expected)?,
            found,
            scans,
        })
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.db).await?;
        Ok(())
    }

    async fn create_pending_items(
        &self,
        stem: &str,
        template: &CartonTemplate,
        count: u32,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<StockItem>> {
        let mut tx = self.db.begin().await?;

        let current_max = Self::lock_stem(&mut *tx, stem).await?;

        let mut created = Vec::with_capacity(count as usize);
        for barcode_id in barcode::allocate(stem, current_max, count) {
            let item = StockItem::pending(barcode_id, template, at);
            Self::insert_item(&mut *tx, &item).await?;
            created.push(item);
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get_item(&self, id: Uuid) -> AppResult<Option<StockItem>> {
        let sql = format!("SELECT {} FROM stock_items WHERE id = $1", ITEM_COLUMNS);
        let row = sqlx::query_as::<_, StockItemRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(StockItem::try_from).transpose()
    }

    async fn find_by_barcode(&self, barcode: &str) -> AppResult<Option<StockItem>> {
        let sql = format!("SELECT {} FROM stock_items WHERE barcode_id = $1", ITEM_COLUMNS);
        let row = sqlx::query_as::<_, StockItemRow>(&sql)
            .bind(barcode)
            .fetch_optional(&self.db)
            .await?;

        row.map(StockItem::try_from).transpose()
    }

    async fn list_items(&self, filter: &StockItemFilter) -> AppResult<ListResponse<StockItem>> {
        const FILTER: &str = r#"
            WHERE ($1::TEXT IS NULL OR product_code = $1)
              AND ($2::TEXT IS NULL OR colour = $2)
              AND ($3::TEXT IS NULL OR status = $3)
              AND ($4::TEXT IS NULL OR strpos(lower(barcode_id), lower($4)) > 0)
        "#;

        let status = filter.status.map(|s| s.as_str());

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM stock_items {}",
            FILTER
        ))
        .bind(&filter.product_code)
        .bind(&filter.colour)
        .bind(status)
        .bind(&filter.search)
        .fetch_one(&self.db)
        .await?;

        let sql = format!(
            "SELECT {} FROM stock_items {} ORDER BY created_at DESC, barcode_id DESC LIMIT $5 OFFSET $6",
            ITEM_COLUMNS, FILTER
        );
        let rows = sqlx::query_as::<_, StockItemRow>(&sql)
            .bind(&filter.product_code)
            .bind(&filter.colour)
            .bind(status)
            .bind(&filter.search)
            .bind(i64::from(filter.limit()))
            .bind(i64::from(filter.offset()))
            .fetch_all(&self.db)
            .await?;

        Ok(ListResponse {
            items: convert_all(rows)?,
            total,
        })
    }

    async fn list_movements(&self, item_id: Uuid) -> AppResult<Vec<StockMovement>> {
        let sql = format!(
            "SELECT {} FROM stock_movements WHERE stock_item_id = $1 ORDER BY seq",
            MOVEMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, MovementRow>(&sql)
            .bind(item_id)
            .fetch_all(&self.db)
            .await?;

        convert_all(rows)
    }

    async fn last_movements(
        &self,
        item_ids: &[Uuid],
        exclude_session: Option<Uuid>,
    ) -> AppResult<HashMap<Uuid, StockMovement>> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            r#"
            SELECT DISTINCT ON (stock_item_id) {}
            FROM stock_movements
            WHERE stock_item_id = ANY($1)
              AND ($2::UUID IS NULL OR stocktake_session_id IS DISTINCT FROM $2)
            ORDER BY stock_item_id, seq DESC
            "#,
            MOVEMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, MovementRow>(&sql)
            .bind(item_ids)
            .bind(exclude_session)
            .fetch_all(&self.db)
            .await?;

        let movements: Vec<StockMovement> = convert_all(rows)?;
        Ok(movements
            .into_iter()
            .map(|movement| (movement.stock_item_id, movement))
            .collect())
    }

    async fn apply(
        &self,
        target: ItemRef<'_>,
        operation: &StockOperation,
        ctx: &TransitionContext,
    ) -> AppResult<PlannedTransition> {
        let mut tx = self.db.begin().await?;

        let item = Self::lock_item(&mut *tx, target)
            .await?
            .ok_or_else(|| target.not_found())?;

        let planned = operation.apply(&item, ctx)?;
        Self::update_item(&mut *tx, &planned.item).await?;
        Self::insert_movement(&mut *tx, &planned.movement).await?;

        tx.commit().await?;
        Ok(planned)
    }

    async fn repack(
        &self,
        barcode: &str,
        units_taken: i32,
        order_id: Option<Uuid>,
        child_stem: &str,
        ctx: &TransitionContext,
    ) -> AppResult<RepackPlan> {
        let target = ItemRef::Barcode(barcode);
        let mut tx = self.db.begin().await?;

        let original = Self::lock_item(&mut *tx, target)
            .await?
            .ok_or_else(|| target.not_found())?;

        // Reject before taking the stem lock
        StockOperation::RepackSource {
            units_taken,
            child_barcode: String::new(),
            order_id,
        }
        .apply(&original, ctx)?;

        let current_max = Self::lock_stem(&mut *tx, child_stem).await?;
        let child_barcode = barcode::format_barcode(child_stem, current_max + 1);

        let plan = plan_repack(&original, units_taken, child_barcode, order_id, ctx)?;

        Self::insert_item(&mut *tx, &plan.child).await?;
        Self::update_item(&mut *tx, &plan.source.item).await?;
        Self::insert_movement(&mut *tx, &plan.source.movement).await?;
        Self::insert_movement(&mut *tx, &plan.child_movement).await?;

        tx.commit().await?;
        Ok(plan)
    }

    async fn stock_aggregates(&self) -> AppResult<Vec<StockAggregate>> {
        let rows = sqlx::query_as::<_, AggregateRow>(
            r#"
            SELECT product_code, colour,
                   COUNT(*) FILTER (WHERE status = 'in_stock') AS carton_count,
                   COALESCE(SUM(quantity) FILTER (WHERE status = 'in_stock'), 0)::BIGINT AS total_units
            FROM stock_items
            WHERE status IN ('pending_scan', 'in_stock', 'picked')
            GROUP BY product_code, colour
            ORDER BY product_code COLLATE "C", colour COLLATE "C"
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StockAggregate {
                product_code: row.product_code,
                colour: row.colour,
                carton_count: row.carton_count,
                total_units: row.total_units,
            })
            .collect())
    }

    async fn list_thresholds(&self) -> AppResult<Vec<StockThreshold>> {
        let sql = format!(
            "SELECT {} FROM stock_thresholds ORDER BY product_code, colour NULLS FIRST",
            THRESHOLD_COLUMNS
        );
        let rows = sqlx::query_as::<_, ThresholdRow>(&sql)
            .fetch_all(&self.db)
            .await?;

        Ok(rows.into_iter().map(StockThreshold::from).collect())
    }

    async fn get_threshold(&self, id: Uuid) -> AppResult<Option<StockThreshold>> {
        let sql = format!("SELECT {} FROM stock_thresholds WHERE id = $1", THRESHOLD_COLUMNS);
        let row = sqlx::query_as::<_, ThresholdRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.map(StockThreshold::from))
    }

    async fn insert_threshold(&self, threshold: &StockThreshold) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO stock_thresholds (
                id, product_code, colour, red_threshold, amber_threshold, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(threshold.id)
        .bind(&threshold.product_code)
        .bind(&threshold.colour)
        .bind(threshold.red_threshold)
        .bind(threshold.amber_threshold)
        .bind(threshold.created_at)
        .bind(threshold.updated_at)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(AppError::DuplicateIdentity {
                kind: IdentityKind::Threshold,
                key: format!(
                    "{}/{}",
                    threshold.product_code,
                    threshold.colour.as_deref().unwrap_or("all colours")
                ),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_threshold(&self, threshold: &StockThreshold) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE stock_thresholds
            SET red_threshold = $2, amber_threshold = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(threshold.id)
        .bind(threshold.red_threshold)
        .bind(threshold.amber_threshold)
        .bind(threshold.updated_at)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Threshold not found".to_string()));
        }
        Ok(())
    }

    async fn delete_threshold(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM stock_thresholds WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn start_session(&self, mut session: StocktakeSession) -> AppResult<StocktakeSession> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO stocktake_sessions (id, name, status, started_by, started_at, notes)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(session.id)
        .bind(&session.name)
        .bind(session.status.as_str())
        .bind(session.started_by)
        .bind(session.started_at)
        .bind(&session.notes)
        .execute(&mut *tx)
        .await?;

        let frozen = sqlx::query(
            r#"
            INSERT INTO stocktake_expected_items (session_id, stock_item_id)
            SELECT $1, id FROM stock_items WHERE status = 'in_stock'
            "#,
        )
        .bind(session.id)
        .execute(&mut *tx)
        .await?;

        let total_expected = i32::try_from(frozen.rows_affected())
            .map_err(|_| AppError::Internal("expected item count out of range".into()))?;

        sqlx::query("UPDATE stocktake_sessions SET total_expected = $2 WHERE id = $1")
            .bind(session.id)
            .bind(total_expected)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        session.total_expected = total_expected;
        session.total_scanned = 0;
        session.total_discrepancies = 0;
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> AppResult<Option<StocktakeSession>> {
        let sql = format!("{} WHERE s.id = $1", SESSION_SELECT);
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(StocktakeSession::try_from).transpose()
    }

    async fn list_sessions(&self) -> AppResult<Vec<StocktakeSession>> {
        let sql = format!("{} ORDER BY s.started_at DESC", SESSION_SELECT);
        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .fetch_all(&self.db)
            .await?;

        convert_all(rows)
    }

    async fn record_scan(
        &self,
        session_id: Uuid,
        barcode: &str,
        notes: Option<String>,
        ctx: &TransitionContext,
    ) -> AppResult<RecordedScan> {
        let mut tx = self.db.begin().await?;

        let session = Self::read_session(&mut *tx, session_id, Some(SessionLock::Share)).await?;
        if !session.status.is_open() {
            return Err(closed_session_error(&session, false));
        }

        let mut item = Self::lock_item(&mut *tx, ItemRef::Barcode(barcode)).await?;

        let already_found = match &item {
            Some(found) => sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS(
                    SELECT 1 FROM stocktake_scans
                    WHERE session_id = $1 AND stock_item_id = $2 AND scan_result = 'found'
                )
                "#,
            )
            .bind(session_id)
            .bind(found.id)
            .fetch_one(&mut *tx)
            .await?,
            None => false,
        };

        let mut scan = StocktakeScan {
            id: Uuid::new_v4(),
            session_id,
            barcode_scanned: barcode.to_string(),
            stock_item_id: item.as_ref().map(|i| i.id),
            scan_result: classify_scan(item.as_ref(), already_found),
            scanned_by: ctx.performed_by,
            scanned_at: ctx.at,
            notes,
        };

        if !Self::insert_scan(&mut *tx, &scan).await? {
            // Lost the race on the found index
            scan.scan_result = ScanResult::AlreadyScanned;
            Self::insert_scan(&mut *tx, &scan).await?;
        } else if scan.scan_result == ScanResult::Found {
            if let Some(current) = item.as_ref() {
                let planned = StockOperation::StocktakeVerify { session_id }.apply(current, ctx)?;
                Self::update_item(&mut *tx, &planned.item).await?;
                Self::insert_movement(&mut *tx, &planned.movement).await?;
                item = Some(planned.item);
            }
        }

        let total_scanned = Self::found_count(&mut *tx, session_id).await?;
        tx.commit().await?;

        Ok(RecordedScan {
            scan,
            item,
            progress: SessionProgress::compute(total_scanned, i64::from(session.total_expected)),
        })
    }

    async fn list_scans(&self, session_id: Uuid, limit: u32) -> AppResult<Vec<StocktakeScan>> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM stocktake_sessions WHERE id = $1)",
        )
        .bind(session_id)
        .fetch_one(&self.db)
        .await?;

        if !exists {
            return Err(session_not_found(session_id));
        }

        let sql = format!(
            "SELECT {} FROM stocktake_scans WHERE session_id = $1 ORDER BY seq DESC LIMIT $2",
            SCAN_COLUMNS
        );
        let rows = sqlx::query_as::<_, ScanRow>(&sql)
            .bind(session_id)
            .bind(i64::from(limit))
            .fetch_all(&self.db)
            .await?;

        convert_all(rows)
    }

    async fn session_snapshot(&self, session_id: Uuid) -> AppResult<SessionSnapshot> {
        let mut tx = self.db.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let session = Self::read_session(&mut *tx, session_id, None).await?;
        let snapshot = Self::load_snapshot(&mut *tx, session).await?;

        tx.commit().await?;
        Ok(snapshot)
    }

    async fn complete_session(
        &self,
        session_id: Uuid,
        completed_by: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<SessionSnapshot> {
        let mut tx = self.db.begin().await?;

        let session = Self::read_session(&mut *tx, session_id, Some(SessionLock::Update)).await?;
        if !session.status.is_open() {
            return Err(closed_session_error(&session, true));
        }

        let snapshot = Self::load_snapshot(&mut *tx, session).await?;
        let reconciliation = reconcile(
            snapshot.expected.clone(),
            &snapshot.found,
            snapshot.scans.clone(),
        );
        let total_discrepancies = i32::try_from(reconciliation.summary.total_discrepancies())
            .map_err(|_| AppError::Internal("discrepancy count out of range".into()))?;

        sqlx::query(
            r#"
            UPDATE stocktake_sessions
            SET status = 'completed', completed_by = $2, completed_at = $3, total_discrepancies = $4
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .bind(completed_by)
        .bind(at)
        .bind(total_discrepancies)
        .execute(&mut *tx)
        .await?;

        let session = Self::read_session(&mut *tx, session_id, None).await?;
        tx.commit().await?;

        Ok(SessionSnapshot {
            session,
            ..snapshot
        })
    }

    async fn cancel_session(
        &self,
        session_id: Uuid,
        cancelled_by: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<StocktakeSession> {
        let mut tx = self.db.begin().await?;

        let session = Self::read_session(&mut *tx, session_id, Some(SessionLock::Update)).await?;
        if !session.status.is_open() {
            return Err(closed_session_error(&session, false));
        }

        sqlx::query(
            r#"
            UPDATE stocktake_sessions
            SET status = 'cancelled', completed_by = $2, completed_at = $3
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .bind(cancelled_by)
        .bind(at)
        .execute(&mut *tx)
        .await?;

        let session = Self::read_session(&mut *tx, session_id, None).await?;
        tx.commit().await?;
        Ok(session)
    }
}
