//! HTTP handlers for carton endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use shared::{
    ListResponse, PlannedTransition, RepackPlan, StockItem, StockItemDetail, StockItemFilter,
    StockMovement, StockSummary, SummaryFilter,
};
use uuid::Uuid;

use super::{scan_response, ScanResponse};
use crate::error::AppResult;
use crate::middleware::CurrentOperator;
use crate::services::ledger::{AdjustQuantityInput, ConsumeInput, GenerateLabelsInput, LabelBatch, ScrapInput};
use crate::services::repack::RepackInput;
use crate::services::scan::{ScanInInput, ScanOutInput};
use crate::services::{LedgerService, RepackService, ScanService, ThresholdService};
use crate::AppState;

/// Carton state after a movement, with the movement itself
#[derive(Debug, Serialize)]
pub struct MovementResult {
    pub item: StockItem,
    pub movement: StockMovement,
}

impl From<PlannedTransition> for MovementResult {
    fn from(planned: PlannedTransition) -> Self {
        Self {
            item: planned.item,
            movement: planned.movement,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RepackResult {
    pub original_item: StockItem,
    pub original_movement: StockMovement,
    pub new_item: StockItem,
    pub new_item_movement: StockMovement,
    pub units_taken: i32,
    pub units_remaining: i32,
}

impl From<RepackPlan> for RepackResult {
    fn from(plan: RepackPlan) -> Self {
        Self {
            original_item: plan.source.item,
            original_movement: plan.source.movement,
            new_item: plan.child,
            new_item_movement: plan.child_movement,
            units_taken: plan.units_taken,
            units_remaining: plan.units_remaining,
        }
    }
}

fn describe(verb: &str, item: &StockItem) -> String {
    format!(
        "{}: {} {}, {} units",
        verb, item.product_code, item.colour, item.quantity
    )
}

/// Register a batch of cartons for label printing
pub async fn generate_labels(
    State(state): State<AppState>,
    _operator: CurrentOperator,
    Json(input): Json<GenerateLabelsInput>,
) -> AppResult<(StatusCode, Json<LabelBatch>)> {
    let service = LedgerService::new(state.store);
    let batch = service
        .generate_labels(&state.config.barcode.prefix, input)
        .await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

pub async fn scan_in(
    State(state): State<AppState>,
    operator: CurrentOperator,
    Json(input): Json<ScanInInput>,
) -> AppResult<Json<ScanResponse<MovementResult>>> {
    let service = ScanService::new(state.store);
    let result = service
        .scan_in(operator.0.user_id, input)
        .await
        .map(MovementResult::from);
    scan_response(result, |r| describe("Scanned in", &r.item))
}

pub async fn scan_out(
    State(state): State<AppState>,
    operator: CurrentOperator,
    Json(input): Json<ScanOutInput>,
) -> AppResult<Json<ScanResponse<MovementResult>>> {
    let service = ScanService::new(state.store);
    let result = service
        .scan_out(operator.0.user_id, input)
        .await
        .map(MovementResult::from);
    scan_response(result, |r| describe("Scanned out", &r.item))
}

pub async fn partial_repack(
    State(state): State<AppState>,
    operator: CurrentOperator,
    Json(input): Json<RepackInput>,
) -> AppResult<Json<ScanResponse<RepackResult>>> {
    let service = RepackService::new(state.store, state.config.barcode.prefix.clone());
    let result = service
        .repack(operator.0.user_id, input)
        .await
        .map(RepackResult::from);
    scan_response(result, |r| {
        format!(
            "Repacked: {} units taken, {} units returned as {}",
            r.units_taken, r.units_remaining, r.new_item.barcode_id
        )
    })
}

pub async fn adjust_quantity(
    State(state): State<AppState>,
    operator: CurrentOperator,
    Json(input): Json<AdjustQuantityInput>,
) -> AppResult<Json<MovementResult>> {
    let service = LedgerService::new(state.store);
    let planned = service.adjust_quantity(operator.0.user_id, input).await?;
    Ok(Json(planned.into()))
}

pub async fn scrap(
    State(state): State<AppState>,
    operator: CurrentOperator,
    Json(input): Json<ScrapInput>,
) -> AppResult<Json<MovementResult>> {
    let service = LedgerService::new(state.store);
    let planned = service.scrap(operator.0.user_id, input).await?;
    Ok(Json(planned.into()))
}

pub async fn consume(
    State(state): State<AppState>,
    operator: CurrentOperator,
    Json(input): Json<ConsumeInput>,
) -> AppResult<Json<MovementResult>> {
    let service = LedgerService::new(state.store);
    let planned = service.consume(operator.0.user_id, input).await?;
    Ok(Json(planned.into()))
}

/// Stock levels per product and colour with threshold status
pub async fn get_stock_summary(
    State(state): State<AppState>,
    _operator: CurrentOperator,
    Query(filter): Query<SummaryFilter>,
) -> AppResult<Json<StockSummary>> {
    let service = ThresholdService::new(state.store);
    let summary = service.stock_summary(filter).await?;
    Ok(Json(summary))
}

pub async fn list_items(
    State(state): State<AppState>,
    _operator: CurrentOperator,
    Query(filter): Query<StockItemFilter>,
) -> AppResult<Json<ListResponse<StockItem>>> {
    let service = LedgerService::new(state.store);
    let items = service.list_items(filter).await?;
    Ok(Json(items))
}

pub async fn get_item_detail(
    State(state): State<AppState>,
    _operator: CurrentOperator,
    Path(id): Path<Uuid>,
) -> AppResult<Json<StockItemDetail>> {
    let service = LedgerService::new(state.store);
    let detail = service.get_item_detail(id).await?;
    Ok(Json(detail))
}

pub async fn get_item_by_barcode(
    State(state): State<AppState>,
    _operator: CurrentOperator,
    Path(barcode): Path<String>,
) -> AppResult<Json<StockItem>> {
    let service = LedgerService::new(state.store);
    let item = service.get_by_barcode(&barcode).await?;
    Ok(Json(item))
}
