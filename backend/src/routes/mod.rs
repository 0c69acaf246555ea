//! Route definitions for the carton ledger API

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes - cartons, scans and thresholds
        .nest("/stock", stock_routes(state.clone()))
        // Protected routes - stocktake sessions
        .nest("/stocktake", stocktake_routes(state))
}

/// Carton routes (protected)
fn stock_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/labels", post(handlers::generate_labels))
        .route("/scan-in", post(handlers::scan_in))
        .route("/scan-out", post(handlers::scan_out))
        .route("/partial-repack", post(handlers::partial_repack))
        .route("/adjustment", post(handlers::adjust_quantity))
        .route("/scrap", post(handlers::scrap))
        .route("/consume", post(handlers::consume))
        .route("/summary", get(handlers::get_stock_summary))
        .route("/items", get(handlers::list_items))
        .route("/items/:id", get(handlers::get_item_detail))
        .route("/barcodes/:barcode", get(handlers::get_item_by_barcode))
        .route(
            "/thresholds",
            get(handlers::list_thresholds).post(handlers::create_threshold),
        )
        .route(
            "/thresholds/:id",
            put(handlers::update_threshold).delete(handlers::delete_threshold),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Stocktake routes (protected)
fn stocktake_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::start_session),
        )
        .route("/sessions/:id", get(handlers::get_session))
        .route("/sessions/:id/scan", post(handlers::record_scan))
        .route("/sessions/:id/scans", get(handlers::list_scans))
        .route("/sessions/:id/complete", post(handlers::complete_session))
        .route("/sessions/:id/cancel", post(handlers::cancel_session))
        .route(
            "/sessions/:id/discrepancies",
            get(handlers::get_discrepancies),
        )
        .route(
            "/sessions/:id/discrepancies.csv",
            get(handlers::export_discrepancies),
        )
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
