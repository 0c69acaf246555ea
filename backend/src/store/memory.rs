//! In-memory ledger store
//!
//! Each carton and each session sits behind its own async mutex inside a
//! `DashMap`, so operations on different barcodes never contend. Lock order
//! is session before carton.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use shared::{
    aggregate_items, barcode, classify_scan, plan_repack, reconcile, CartonTemplate, ListResponse,
    PlannedTransition, RepackPlan, ScanResult, SessionStatus, StockAggregate, StockItem,
    StockItemFilter, StockMovement, StockOperation, StockStatus, StockThreshold, StocktakeScan,
    StocktakeSession, TransitionContext,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    closed_session_error, session_progress, ItemRef, LedgerStore, RecordedScan, SessionSnapshot,
};
use crate::error::{AppError, AppResult, IdentityKind};

type ThresholdKey = (String, Option<String>);

struct SessionState {
    session: StocktakeSession,
    expected: Vec<Uuid>,
    found: HashSet<Uuid>,
    scans: Vec<StocktakeScan>,
}

#[derive(Default)]
pub struct MemoryLedgerStore {
    items: DashMap<Uuid, Arc<Mutex<StockItem>>>,
    barcodes: DashMap<String, Uuid>,
    movements: DashMap<Uuid, Vec<StockMovement>>,
    /// Highest sequence handed out per barcode stem
    sequences: DashMap<String, u32>,
    thresholds: DashMap<Uuid, StockThreshold>,
    threshold_keys: DashMap<ThresholdKey, Uuid>,
    sessions: DashMap<Uuid, Arc<Mutex<SessionState>>>,
}

fn session_not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Stocktake session {} not found", id))
}

fn threshold_key_label(key: &ThresholdKey) -> String {
    format!("{}/{}", key.0, key.1.as_deref().unwrap_or("all colours"))
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn item_handle(&self, id: Uuid) -> Option<Arc<Mutex<StockItem>>> {
        self.items.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    fn resolve(&self, target: ItemRef<'_>) -> Option<Arc<Mutex<StockItem>>> {
        let id = match target {
            ItemRef::Id(id) => id,
            ItemRef::Barcode(barcode) => *self.barcodes.get(barcode)?.value(),
        };
        self.item_handle(id)
    }

    fn session_handle(&self, id: Uuid) -> AppResult<Arc<Mutex<SessionState>>> {
        self.sessions
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| session_not_found(id))
    }

    fn push_movement(&self, movement: StockMovement) {
        self.movements
            .entry(movement.stock_item_id)
            .or_default()
            .push(movement);
    }

    fn allocate_barcodes(&self, stem: &str, count: u32) -> Vec<String> {
        let mut highest = self.sequences.entry(stem.to_string()).or_insert(0);
        let barcodes = barcode::allocate(stem, *highest, count);
        *highest += count;
        barcodes
    }

    fn register(&self, item: StockItem) -> AppResult<()> {
        match self.barcodes.entry(item.barcode_id.clone()) {
            Entry::Occupied(_) => Err(AppError::DuplicateIdentity {
                kind: IdentityKind::Barcode,
                key: item.barcode_id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(item.id);
                self.items.insert(item.id, Arc::new(Mutex::new(item)));
                Ok(())
            }
        }
    }

    /// Copy of every carton, each read under its own lock
    async fn all_items(&self) -> Vec<StockItem> {
        let handles: Vec<_> = self
            .items
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut items = Vec::with_capacity(handles.len());
        for handle in handles {
            items.push(handle.lock().await.clone());
        }
        items
    }

    async fn items_by_id(&self, ids: &[Uuid]) -> Vec<StockItem> {
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(handle) = self.item_handle(*id) {
                items.push(handle.lock().await.clone());
            }
        }
        items
    }

    async fn snapshot_of(&self, state: &SessionState) -> SessionSnapshot {
        SessionSnapshot {
            session: state.session.clone(),
            expected: self.items_by_id(&state.expected).await,
            found: state.found.clone(),
            scans: state.scans.clone(),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }

    async fn create_pending_items(
        &self,
        stem: &str,
        template: &CartonTemplate,
        count: u32,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<StockItem>> {
        let mut created = Vec::with_capacity(count as usize);
        for barcode_id in self.allocate_barcodes(stem, count) {
            let item = StockItem::pending(barcode_id, template, at);
            self.register(item.clone())?;
            created.push(item);
        }
        Ok(created)
    }

    async fn get_item(&self, id: Uuid) -> AppResult<Option<StockItem>> {
        match self.item_handle(id) {
            Some(handle) => Ok(Some(handle.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn find_by_barcode(&self, barcode: &str) -> AppResult<Option<StockItem>> {
        match self.resolve(ItemRef::Barcode(barcode)) {
            Some(handle) => Ok(Some(handle.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list_items(&self, filter: &StockItemFilter) -> AppResult<ListResponse<StockItem>> {
        let mut items: Vec<StockItem> = self
            .all_items()
            .await
            .into_iter()
            .filter(|item| filter.matches(item))
            .collect();

        items.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.barcode_id.cmp(&a.barcode_id))
        });

        let total = items.len() as i64;
        let items = items
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit() as usize)
            .collect();

        Ok(ListResponse { items, total })
    }

    async fn list_movements(&self, item_id: Uuid) -> AppResult<Vec<StockMovement>> {
        Ok(self
            .movements
            .get(&item_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn last_movements(
        &self,
        item_ids: &[Uuid],
        exclude_session: Option<Uuid>,
    ) -> AppResult<HashMap<Uuid, StockMovement>> {
        let mut latest = HashMap::new();
        for id in item_ids {
            if let Some(entry) = self.movements.get(id) {
                let last = entry
                    .value()
                    .iter()
                    .rev()
                    .find(|m| exclude_session.is_none() || m.stocktake_session_id != exclude_session);
                if let Some(movement) = last {
                    latest.insert(*id, movement.clone());
                }
            }
        }
        Ok(latest)
    }

    async fn apply(
        &self,
        target: ItemRef<'_>,
        operation: &StockOperation,
        ctx: &TransitionContext,
    ) -> AppResult<PlannedTransition> {
        let handle = self.resolve(target).ok_or_else(|| target.not_found())?;
        let mut item = handle.lock().await;

        let planned = operation.apply(&item, ctx)?;
        self.push_movement(planned.movement.clone());
        *item = planned.item.clone();

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
        let handle = self.resolve(target).ok_or_else(|| target.not_found())?;
        let mut original = handle.lock().await;

        // Reject before a sequence number is spent
        StockOperation::RepackSource {
            units_taken,
            child_barcode: String::new(),
            order_id,
        }
        .apply(&original, ctx)?;

        let child_barcode = self
            .allocate_barcodes(child_stem, 1)
            .pop()
            .ok_or_else(|| AppError::Internal("barcode allocation returned nothing".into()))?;

        let plan = plan_repack(&original, units_taken, child_barcode, order_id, ctx)?;

        self.register(plan.child.clone())?;
        self.push_movement(plan.source.movement.clone());
        self.push_movement(plan.child_movement.clone());
        *original = plan.source.item.clone();

        Ok(plan)
    }

    async fn stock_aggregates(&self) -> AppResult<Vec<StockAggregate>> {
        let items = self.all_items().await;
        Ok(aggregate_items(&items))
    }

    async fn list_thresholds(&self) -> AppResult<Vec<StockThreshold>> {
        let mut thresholds: Vec<StockThreshold> = self
            .thresholds
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        thresholds.sort_by(|a, b| {
            a.product_code
                .cmp(&b.product_code)
                .then_with(|| a.colour.cmp(&b.colour))
        });
        Ok(thresholds)
    }

    async fn get_threshold(&self, id: Uuid) -> AppResult<Option<StockThreshold>> {
        Ok(self.thresholds.get(&id).map(|entry| entry.value().clone()))
    }

    async fn insert_threshold(&self, threshold: &StockThreshold) -> AppResult<()> {
        let key = (threshold.product_code.clone(), threshold.colour.clone());
        match self.threshold_keys.entry(key) {
            Entry::Occupied(slot) => Err(AppError::DuplicateIdentity {
                kind: IdentityKind::Threshold,
                key: threshold_key_label(slot.key()),
            }),
            Entry::Vacant(slot) => {
                slot.insert(threshold.id);
                self.thresholds.insert(threshold.id, threshold.clone());
                Ok(())
            }
        }
    }

    async fn update_threshold(&self, threshold: &StockThreshold) -> AppResult<()> {
        let mut existing = self
            .thresholds
            .get_mut(&threshold.id)
            .ok_or_else(|| AppError::NotFound("Threshold not found".into()))?;

        existing.red_threshold = threshold.red_threshold;
        existing.amber_threshold = threshold.amber_threshold;
        existing.updated_at = threshold.updated_at;
        Ok(())
    }

    async fn delete_threshold(&self, id: Uuid) -> AppResult<bool> {
        match self.thresholds.remove(&id) {
            Some((_, removed)) => {
                self.threshold_keys
                    .remove(&(removed.product_code, removed.colour));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn start_session(&self, mut session: StocktakeSession) -> AppResult<StocktakeSession> {
        let mut expected: Vec<StockItem> = self
            .all_items()
            .await
            .into_iter()
            .filter(|item| item.status == StockStatus::InStock)
            .collect();
        expected.sort_by(|a, b| a.barcode_id.cmp(&b.barcode_id));

        session.total_expected = expected.len() as i32;
        session.total_scanned = 0;
        session.total_discrepancies = 0;

        let state = SessionState {
            session: session.clone(),
            expected: expected.iter().map(|item| item.id).collect(),
            found: HashSet::new(),
            scans: Vec::new(),
        };
        self.sessions.insert(session.id, Arc::new(Mutex::new(state)));

        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> AppResult<Option<StocktakeSession>> {
        match self.sessions.get(&id).map(|entry| Arc::clone(entry.value())) {
            Some(handle) => Ok(Some(handle.lock().await.session.clone())),
            None => Ok(None),
        }
    }

    async fn list_sessions(&self) -> AppResult<Vec<StocktakeSession>> {
        let handles: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut sessions = Vec::with_capacity(handles.len());
        for handle in handles {
            sessions.push(handle.lock().await.session.clone());
        }
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(sessions)
    }

    async fn record_scan(
        &self,
        session_id: Uuid,
        barcode: &str,
        notes: Option<String>,
        ctx: &TransitionContext,
    ) -> AppResult<RecordedScan> {
        let handle = self.session_handle(session_id)?;
        let mut state = handle.lock().await;

        if !state.session.status.is_open() {
            return Err(closed_session_error(&state.session, false));
        }

        let (scan_result, item) = match self.resolve(ItemRef::Barcode(barcode)) {
            None => (ScanResult::NotInSystem, None),
            Some(item_handle) => {
                let mut item = item_handle.lock().await;
                let result = classify_scan(Some(&*item), state.found.contains(&item.id));

                if result == ScanResult::Found {
                    let planned = StockOperation::StocktakeVerify { session_id }.apply(&item, ctx)?;
                    self.push_movement(planned.movement);
                    *item = planned.item;
                    state.found.insert(item.id);
                    state.session.total_scanned += 1;
                }

                (result, Some(item.clone()))
            }
        };

        let scan = StocktakeScan {
            id: Uuid::new_v4(),
            session_id,
            barcode_scanned: barcode.to_string(),
            stock_item_id: item.as_ref().map(|i| i.id),
            scan_result,
            scanned_by: ctx.performed_by,
            scanned_at: ctx.at,
            notes,
        };
        state.scans.push(scan.clone());

        Ok(RecordedScan {
            scan,
            item,
            progress: session_progress(&state.session),
        })
    }

    async fn list_scans(&self, session_id: Uuid, limit: u32) -> AppResult<Vec<StocktakeScan>> {
        let handle = self.session_handle(session_id)?;
        let state = handle.lock().await;
        Ok(state
            .scans
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn session_snapshot(&self, session_id: Uuid) -> AppResult<SessionSnapshot> {
        let handle = self.session_handle(session_id)?;
        let state = handle.lock().await;
        Ok(self.snapshot_of(&state).await)
    }

    async fn complete_session(
        &self,
        session_id: Uuid,
        completed_by: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<SessionSnapshot> {
        let handle = self.session_handle(session_id)?;
        let mut state = handle.lock().await;

        if !state.session.status.is_open() {
            return Err(closed_session_error(&state.session, true));
        }

        let snapshot = self.snapshot_of(&state).await;
        let reconciliation = reconcile(
            snapshot.expected.clone(),
            &snapshot.found,
            snapshot.scans.clone(),
        );

        state.session.status = SessionStatus::Completed;
        state.session.completed_by = Some(completed_by);
        state.session.completed_at = Some(at);
        state.session.total_discrepancies = reconciliation.summary.total_discrepancies() as i32;

        Ok(SessionSnapshot {
            session: state.session.clone(),
            ..snapshot
        })
    }

    async fn cancel_session(
        &self,
        session_id: Uuid,
        cancelled_by: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<StocktakeSession> {
        let handle = self.session_handle(session_id)?;
        let mut state = handle.lock().await;

        if !state.session.status.is_open() {
            return Err(closed_session_error(&state.session, false));
        }

        state.session.status = SessionStatus::Cancelled;
        state.session.completed_by = Some(cancelled_by);
        state.session.completed_at = Some(at);

        Ok(state.session.clone())
    }
}
