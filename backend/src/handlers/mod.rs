//! HTTP handlers
//!
//! Floor-facing scan endpoints answer `200` with a [`ScanResponse`] for every
//! non-fatal outcome, so the scanner UI can render pass/fail feedback without
//! HTTP error handling. Everything else uses the regular error mapping.

pub mod health;
pub mod stock;
pub mod stocktake;
pub mod threshold;

pub use health::*;
pub use stock::*;
pub use stocktake::*;
pub use threshold::*;

use axum::Json;
use serde::Serialize;
use shared::ItemSummary;

use crate::error::{AppResult, StateConflict};

/// Envelope for floor scan results
#[derive(Debug, Serialize)]
pub struct ScanResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<StateConflict>,
    /// The carton that blocked the operation, so the operator can see what was scanned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_item: Option<ItemSummary>,
    #[serde(flatten)]
    pub data: Option<T>,
}

/// Fold a service result into the scan envelope; fatal errors still propagate
pub(crate) fn scan_response<T, F>(result: AppResult<T>, describe: F) -> AppResult<Json<ScanResponse<T>>>
where
    F: FnOnce(&T) -> String,
{
    match result {
        Ok(data) => Ok(Json(ScanResponse {
            success: true,
            message: describe(&data),
            error_code: None,
            reason: None,
            conflicting_item: None,
            data: Some(data),
        })),
        Err(err) if !err.is_fatal() => {
            let detail = err.detail();
            Ok(Json(ScanResponse {
                success: false,
                message: detail.message,
                error_code: Some(err.code()),
                reason: detail.reason,
                conflicting_item: detail.item,
                data: None,
            }))
        }
        Err(err) => Err(err),
    }
}
