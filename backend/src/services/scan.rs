//! Floor scan-in and scan-out

use std::sync::Arc;

use serde::Deserialize;
use shared::{PlannedTransition, StockOperation, TransitionContext};
use uuid::Uuid;
use validator::Validate;

use super::{run_transition, scanned_barcode};
use crate::error::AppResult;
use crate::store::{ItemRef, LedgerStore};

#[derive(Debug, Deserialize, Validate)]
pub struct ScanInInput {
    #[validate(length(min = 1, message = "Barcode is required"))]
    pub barcode: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ScanOutInput {
    #[validate(length(min = 1, message = "Barcode is required"))]
    pub barcode: String,
    pub order_id: Option<Uuid>,
}

/// Scan processor for the warehouse floor
#[derive(Clone)]
pub struct ScanService {
    store: Arc<dyn LedgerStore>,
}

impl ScanService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// `pending_scan` to `in_stock`; a repeat scan fails with `InvalidState`
    pub async fn scan_in(&self, operator: Uuid, input: ScanInInput) -> AppResult<PlannedTransition> {
        input.validate()?;
        let barcode = scanned_barcode(&input.barcode)?;
        run_transition(
            self.store.as_ref(),
            ItemRef::Barcode(&barcode),
            &StockOperation::ScanIn,
            &TransitionContext::now(operator),
        )
        .await
    }

    /// `in_stock` to `picked`, optionally against an order
    pub async fn scan_out(
        &self,
        operator: Uuid,
        input: ScanOutInput,
    ) -> AppResult<PlannedTransition> {
        input.validate()?;
        let barcode = scanned_barcode(&input.barcode)?;
        run_transition(
            self.store.as_ref(),
            ItemRef::Barcode(&barcode),
            &StockOperation::ScanOut {
                order_id: input.order_id,
            },
            &TransitionContext::now(operator),
        )
        .await
    }
}
