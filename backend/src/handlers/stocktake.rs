//! HTTP handlers for stocktake sessions

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use shared::{DiscrepancyReport, StocktakeScan, StocktakeSession};
use uuid::Uuid;

use super::{scan_response, ScanResponse};
use crate::error::AppResult;
use crate::middleware::CurrentOperator;
use crate::services::stocktake::{
    CompleteSessionInput, CompletionResult, RecordScanInput, ScanOutcome, SessionDetail,
    StartSessionInput,
};
use crate::services::{ReportingService, StocktakeService};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ScanListQuery {
    pub limit: Option<u32>,
}

fn stocktake_service(state: AppState) -> StocktakeService {
    StocktakeService::new(state.store, state.config.stocktake.clone())
}

pub async fn list_sessions(
    State(state): State<AppState>,
    _operator: CurrentOperator,
) -> AppResult<Json<Vec<StocktakeSession>>> {
    let sessions = stocktake_service(state).list().await?;
    Ok(Json(sessions))
}

pub async fn start_session(
    State(state): State<AppState>,
    operator: CurrentOperator,
    Json(input): Json<StartSessionInput>,
) -> AppResult<(StatusCode, Json<StocktakeSession>)> {
    let session = stocktake_service(state)
        .start(operator.0.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<AppState>,
    _operator: CurrentOperator,
    Path(id): Path<Uuid>,
) -> AppResult<Json<SessionDetail>> {
    let detail = stocktake_service(state).detail(id).await?;
    Ok(Json(detail))
}

/// Record a floor scan; non-fatal failures come back in the envelope
pub async fn record_scan(
    State(state): State<AppState>,
    operator: CurrentOperator,
    Path(id): Path<Uuid>,
    Json(input): Json<RecordScanInput>,
) -> AppResult<Json<ScanResponse<ScanOutcome>>> {
    let result = stocktake_service(state)
        .record_scan(id, operator.0.user_id, input)
        .await;
    scan_response(result, |outcome| outcome.message.clone())
}

pub async fn list_scans(
    State(state): State<AppState>,
    _operator: CurrentOperator,
    Path(id): Path<Uuid>,
    Query(query): Query<ScanListQuery>,
) -> AppResult<Json<Vec<StocktakeScan>>> {
    let scans = stocktake_service(state).list_scans(id, query.limit).await?;
    Ok(Json(scans))
}

pub async fn complete_session(
    State(state): State<AppState>,
    operator: CurrentOperator,
    Path(id): Path<Uuid>,
    input: Option<Json<CompleteSessionInput>>,
) -> AppResult<Json<CompletionResult>> {
    let input = input.map(|Json(input)| input).unwrap_or_default();
    let result = stocktake_service(state)
        .complete(id, operator.0.user_id, input)
        .await?;
    Ok(Json(result))
}

pub async fn cancel_session(
    State(state): State<AppState>,
    operator: CurrentOperator,
    Path(id): Path<Uuid>,
) -> AppResult<Json<StocktakeSession>> {
    let session = stocktake_service(state)
        .cancel(id, operator.0.user_id)
        .await?;
    Ok(Json(session))
}

pub async fn get_discrepancies(
    State(state): State<AppState>,
    _operator: CurrentOperator,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DiscrepancyReport>> {
    let report = stocktake_service(state).discrepancies(id).await?;
    Ok(Json(report))
}

pub async fn export_discrepancies(
    State(state): State<AppState>,
    _operator: CurrentOperator,
    Path(id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let report = stocktake_service(state).discrepancies(id).await?;
    let body = ReportingService::discrepancy_csv(&report)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"stocktake-{}-discrepancies.csv\"", id),
            ),
        ],
        body,
    ))
}
