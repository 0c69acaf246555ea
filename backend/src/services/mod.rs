//! Business logic services for the carton ledger
//!
//! Services are thin: they validate requests, build the operation and hand it
//! to the [`LedgerStore`](crate::store::LedgerStore), which owns atomicity.

pub mod ledger;
pub mod repack;
pub mod reporting;
pub mod scan;
pub mod stocktake;
pub mod threshold;

pub use ledger::LedgerService;
pub use repack::RepackService;
pub use reporting::ReportingService;
pub use scan::ScanService;
pub use stocktake::StocktakeService;
pub use threshold::ThresholdService;

use shared::{barcode, PlannedTransition, StockOperation, TransitionContext};

use crate::error::{AppError, AppResult};
use crate::store::{ItemRef, LedgerStore};

/// Trim a scanned barcode and reject anything a scanner could not produce
pub(crate) fn scanned_barcode(raw: &str) -> AppResult<String> {
    let barcode = barcode::normalize(raw);
    barcode::validate_barcode(&barcode).map_err(|msg| AppError::validation("barcode", msg))?;
    Ok(barcode)
}

/// Run one guarded transition and log the outcome
pub(crate) async fn run_transition(
    store: &dyn LedgerStore,
    target: ItemRef<'_>,
    operation: &StockOperation,
    ctx: &TransitionContext,
) -> AppResult<PlannedTransition> {
    match store.apply(target, operation, ctx).await {
        Ok(planned) => {
            tracing::info!(
                operation = operation.name(),
                barcode = %planned.item.barcode_id,
                product_code = %planned.item.product_code,
                colour = %planned.item.colour,
                quantity = planned.item.quantity,
                quantity_change = planned.movement.quantity_change,
                status = %planned.item.status,
                performed_by = %ctx.performed_by,
                "stock movement recorded"
            );
            Ok(planned)
        }
        Err(err) if !err.is_fatal() => {
            tracing::warn!(
                operation = operation.name(),
                target = ?target,
                code = err.code(),
                "stock operation rejected: {}",
                err
            );
            Err(err)
        }
        Err(err) => Err(err),
    }
}
