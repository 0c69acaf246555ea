//! Stocktake sessions: frozen expectation, floor scans, reconciliation

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use shared::{
    reconcile, validate_session_name, DiscrepancyReport, DiscrepancySummary, ItemSummary,
    MissingItem, ScanResult, SessionProgress, SessionStatus, StockItem, StockOperation,
    StockStatus, StocktakeScan, StocktakeSession, TransitionContext, UnexpectedScan,
    MAX_LIST_LIMIT,
};
use uuid::Uuid;
use validator::Validate;

use super::scanned_barcode;
use crate::config::StocktakeConfig;
use crate::error::{AppError, AppResult};
use crate::store::{session_progress, ItemRef, LedgerStore, RecordedScan};

#[derive(Debug, Deserialize, Validate)]
pub struct StartSessionInput {
    #[validate(length(min = 1, max = 200, message = "Session name is required"))]
    pub name: String,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordScanInput {
    #[validate(length(min = 1, message = "Barcode is required"))]
    pub barcode: String,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteSessionInput {
    #[serde(default)]
    pub auto_adjust: bool,
}

/// Session with live progress
#[derive(Debug, Clone, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: StocktakeSession,
    pub progress: SessionProgress,
}

/// What the floor sees after a stocktake scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub scan_result: ScanResult,
    /// Carried by the response envelope
    #[serde(skip_serializing)]
    pub message: String,
    pub scan: StocktakeScan,
    pub item: Option<ItemSummary>,
    pub progress: SessionProgress,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionResult {
    pub session: StocktakeSession,
    pub summary: DiscrepancySummary,
    pub auto_adjusted: bool,
    /// Missing cartons written off
    pub adjusted: usize,
    /// Missing cartons that had already left stock by other means
    pub skipped: usize,
}

fn scan_message(result: ScanResult, barcode: &str, item: Option<&StockItem>) -> String {
    match (result, item) {
        (ScanResult::NotInSystem, _) | (_, None) => format!("Barcode not recognised: {}", barcode),
        (ScanResult::Found, Some(item)) => format!(
            "Found: {} {}, {} units",
            item.product_code, item.colour, item.quantity
        ),
        (ScanResult::AlreadyScanned, Some(item)) => format!(
            "Already counted in this stocktake ({} {})",
            item.product_code, item.colour
        ),
        (ScanResult::WrongStatus, Some(item)) => format!(
            "Item is {}, not in stock ({} {}, {} units)",
            item.status, item.product_code, item.colour, item.quantity
        ),
    }
}

#[derive(Clone)]
pub struct StocktakeService {
    store: Arc<dyn LedgerStore>,
    config: StocktakeConfig,
}

impl StocktakeService {
    pub fn new(store: Arc<dyn LedgerStore>, config: StocktakeConfig) -> Self {
        Self { store, config }
    }

    async fn session(&self, id: Uuid) -> AppResult<StocktakeSession> {
        self.store
            .get_session(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Stocktake session {} not found", id)))
    }

    /// Open a session expecting every carton currently in stock
    pub async fn start(
        &self,
        operator: Uuid,
        input: StartSessionInput,
    ) -> AppResult<StocktakeSession> {
        input.validate()?;
        let name = input.name.trim().to_string();
        validate_session_name(&name).map_err(|msg| AppError::validation("name", msg))?;

        let session = StocktakeSession {
            id: Uuid::new_v4(),
            name,
            status: SessionStatus::InProgress,
            started_by: operator,
            completed_by: None,
            started_at: Utc::now(),
            completed_at: None,
            total_expected: 0,
            total_scanned: 0,
            total_discrepancies: 0,
            notes: input.notes.filter(|n| !n.trim().is_empty()),
        };

        let session = self.store.start_session(session).await?;
        tracing::info!(
            session_id = %session.id,
            name = %session.name,
            total_expected = session.total_expected,
            started_by = %operator,
            "stocktake started"
        );
        Ok(session)
    }

    pub async fn list(&self) -> AppResult<Vec<StocktakeSession>> {
        self.store.list_sessions().await
    }

    pub async fn detail(&self, id: Uuid) -> AppResult<SessionDetail> {
        let session = self.session(id).await?;
        Ok(SessionDetail {
            progress: session_progress(&session),
            session,
        })
    }

    /// Classify and record one floor scan. Only a `found` scan touches the
    /// ledger, with an informational zero-delta movement.
    pub async fn record_scan(
        &self,
        session_id: Uuid,
        operator: Uuid,
        input: RecordScanInput,
    ) -> AppResult<ScanOutcome> {
        input.validate()?;
        let barcode = scanned_barcode(&input.barcode)?;
        let notes = input.notes.filter(|n| !n.trim().is_empty());

        let RecordedScan {
            scan,
            item,
            progress,
        } = self
            .store
            .record_scan(session_id, &barcode, notes, &TransitionContext::now(operator))
            .await?;

        if scan.scan_result.is_unexpected() {
            tracing::warn!(
                session_id = %session_id,
                barcode = %barcode,
                scan_result = scan.scan_result.as_str(),
                "unexpected stocktake scan"
            );
        } else {
            tracing::info!(
                session_id = %session_id,
                barcode = %barcode,
                scan_result = scan.scan_result.as_str(),
                scanned = progress.total_scanned,
                expected = progress.total_expected,
                "stocktake scan recorded"
            );
        }

        Ok(ScanOutcome {
            scan_result: scan.scan_result,
            message: scan_message(scan.scan_result, &barcode, item.as_ref()),
            item: item.as_ref().map(StockItem::summary),
            scan,
            progress,
        })
    }

    /// Most recent scans first
    pub async fn list_scans(&self, session_id: Uuid, limit: Option<u32>) -> AppResult<Vec<StocktakeScan>> {
        let limit = limit
            .unwrap_or(self.config.default_scan_limit)
            .clamp(1, MAX_LIST_LIMIT);
        self.store.list_scans(session_id, limit).await
    }

    /// Close the session and optionally write off every missing carton.
    ///
    /// Totals come from the snapshot the store took while closing the
    /// session. Write-offs run concurrently and independently; a carton that
    /// left stock since the snapshot is skipped.
    pub async fn complete(
        &self,
        session_id: Uuid,
        operator: Uuid,
        input: CompleteSessionInput,
    ) -> AppResult<CompletionResult> {
        let snapshot = self
            .store
            .complete_session(session_id, operator, Utc::now())
            .await?;
        let session = snapshot.session;
        let reconciliation = reconcile(snapshot.expected, &snapshot.found, snapshot.scans);

        let (adjusted, skipped) = if input.auto_adjust {
            self.write_off(&session, reconciliation.missing, operator)
                .await?
        } else {
            (0, 0)
        };

        tracing::info!(
            session_id = %session.id,
            expected = reconciliation.summary.total_expected,
            found = reconciliation.summary.total_found,
            missing = reconciliation.summary.total_missing,
            unexpected = reconciliation.summary.total_unexpected,
            auto_adjust = input.auto_adjust,
            adjusted,
            skipped,
            "stocktake completed"
        );

        Ok(CompletionResult {
            session,
            summary: reconciliation.summary,
            auto_adjusted: input.auto_adjust,
            adjusted,
            skipped,
        })
    }

    async fn write_off(
        &self,
        session: &StocktakeSession,
        missing: Vec<StockItem>,
        operator: Uuid,
    ) -> AppResult<(usize, usize)> {
        let ctx = TransitionContext::now(operator);
        let operation = StockOperation::StocktakeWriteOff {
            session_id: session.id,
            session_name: session.name.clone(),
        };

        let (candidates, gone): (Vec<StockItem>, Vec<StockItem>) = missing
            .into_iter()
            .partition(|item| item.status == StockStatus::InStock);

        let outcomes: Vec<_> = stream::iter(candidates)
            .map(|item| {
                let store = Arc::clone(&self.store);
                let operation = operation.clone();
                async move {
                    let result = store.apply(ItemRef::Id(item.id), &operation, &ctx).await;
                    (item, result)
                }
            })
            .buffer_unordered(self.config.auto_adjust_concurrency)
            .collect()
            .await;

        let mut adjusted = 0;
        let mut skipped = gone.len();
        let mut fatal = None;

        for (item, outcome) in outcomes {
            match outcome {
                Ok(planned) => {
                    adjusted += 1;
                    tracing::info!(
                        session_id = %session.id,
                        barcode = %item.barcode_id,
                        quantity_change = planned.movement.quantity_change,
                        "missing carton written off"
                    );
                }
                Err(err) if !err.is_fatal() => {
                    skipped += 1;
                    tracing::debug!(
                        session_id = %session.id,
                        barcode = %item.barcode_id,
                        "write-off skipped: {}",
                        err
                    );
                }
                Err(err) => {
                    tracing::error!(
                        session_id = %session.id,
                        barcode = %item.barcode_id,
                        error = ?err,
                        "write-off failed"
                    );
                    fatal.get_or_insert(err);
                }
            }
        }

        match fatal {
            Some(err) => Err(err),
            None => Ok((adjusted, skipped)),
        }
    }

    pub async fn cancel(&self, session_id: Uuid, operator: Uuid) -> AppResult<StocktakeSession> {
        let session = self
            .store
            .cancel_session(session_id, operator, Utc::now())
            .await?;
        tracing::info!(session_id = %session.id, cancelled_by = %operator, "stocktake cancelled");
        Ok(session)
    }

    /// Reconcile the frozen expectation against the session's scans
    pub async fn discrepancies(&self, session_id: Uuid) -> AppResult<DiscrepancyReport> {
        let snapshot = self.store.session_snapshot(session_id).await?;
        let session = snapshot.session;
        let reconciliation = reconcile(snapshot.expected, &snapshot.found, snapshot.scans);

        let missing_ids: Vec<Uuid> = reconciliation.missing.iter().map(|i| i.id).collect();
        let mut last_movements = self
            .store
            .last_movements(&missing_ids, Some(session.id))
            .await?;

        let missing_items = reconciliation
            .missing
            .into_iter()
            .map(|item| {
                let last = last_movements.remove(&item.id);
                MissingItem {
                    stock_item_id: item.id,
                    barcode_id: item.barcode_id,
                    product_code: item.product_code,
                    colour: item.colour,
                    quantity: item.quantity,
                    status: item.status,
                    last_movement: last.as_ref().map(|m| m.movement_type),
                    last_movement_date: last.map(|m| m.created_at),
                }
            })
            .collect();

        let unexpected_scans = reconciliation
            .unexpected
            .into_iter()
            .map(|scan| UnexpectedScan {
                barcode_scanned: scan.barcode_scanned,
                scan_result: scan.scan_result,
                scanned_at: scan.scanned_at,
            })
            .collect();

        Ok(DiscrepancyReport {
            session_id: session.id,
            session_status: session.status,
            missing_items,
            unexpected_scans,
            found_outside_snapshot: reconciliation.found_outside_snapshot,
            summary: reconciliation.summary,
        })
    }
}
