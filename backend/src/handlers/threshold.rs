//! HTTP handlers for stock thresholds

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use shared::StockThreshold;
use uuid::Uuid;

use crate::error::AppResult;
use crate::middleware::CurrentOperator;
use crate::services::threshold::{CreateThresholdInput, UpdateThresholdInput};
use crate::services::ThresholdService;
use crate::AppState;

pub async fn list_thresholds(
    State(state): State<AppState>,
    _operator: CurrentOperator,
) -> AppResult<Json<Vec<StockThreshold>>> {
    let service = ThresholdService::new(state.store);
    Ok(Json(service.list().await?))
}

pub async fn create_threshold(
    State(state): State<AppState>,
    _operator: CurrentOperator,
    Json(input): Json<CreateThresholdInput>,
) -> AppResult<(StatusCode, Json<StockThreshold>)> {
    let service = ThresholdService::new(state.store);
    let threshold = service.create(input).await?;
    Ok((StatusCode::CREATED, Json(threshold)))
}

pub async fn update_threshold(
    State(state): State<AppState>,
    _operator: CurrentOperator,
    Path(id): Path<Uuid>,
    Json(input): Json<UpdateThresholdInput>,
) -> AppResult<Json<StockThreshold>> {
    let service = ThresholdService::new(state.store);
    let threshold = service.update(id, input).await?;
    Ok(Json(threshold))
}

pub async fn delete_threshold(
    State(state): State<AppState>,
    _operator: CurrentOperator,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let service = ThresholdService::new(state.store);
    service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
