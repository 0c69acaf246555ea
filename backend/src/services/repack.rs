//! Partial repack: split a picked carton and shelve the remainder

use std::sync::Arc;

use serde::Deserialize;
use shared::{barcode, RepackPlan, TransitionContext};
use uuid::Uuid;
use validator::Validate;

use super::scanned_barcode;
use crate::error::AppResult;
use crate::store::{ItemRef, LedgerStore};

#[derive(Debug, Deserialize, Validate)]
pub struct RepackInput {
    #[validate(length(min = 1, message = "Barcode is required"))]
    pub barcode: String,
    pub units_taken: i32,
    pub order_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct RepackService {
    store: Arc<dyn LedgerStore>,
    prefix: String,
}

impl RepackService {
    pub fn new(store: Arc<dyn LedgerStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// The original stays `picked` at its full quantity; a new `partial`
    /// carton carrying the remainder goes back in stock under a fresh barcode
    /// dated today.
    pub async fn repack(&self, operator: Uuid, input: RepackInput) -> AppResult<RepackPlan> {
        input.validate()?;
        let barcode = scanned_barcode(&input.barcode)?;
        let ctx = TransitionContext::now(operator);

        // Product and colour never change, so an unlocked read is enough for the stem
        let original = self
            .store
            .find_by_barcode(&barcode)
            .await?
            .ok_or_else(|| ItemRef::Barcode(&barcode).not_found())?;
        let child_stem = barcode::barcode_stem(
            &self.prefix,
            &original.product_code,
            &original.colour,
            ctx.at.date_naive(),
        );

        let result = self
            .store
            .repack(&barcode, input.units_taken, input.order_id, &child_stem, &ctx)
            .await;

        match &result {
            Ok(plan) => tracing::info!(
                barcode = %barcode,
                child_barcode = %plan.child.barcode_id,
                product_code = %plan.child.product_code,
                colour = %plan.child.colour,
                units_taken = plan.units_taken,
                units_remaining = plan.units_remaining,
                performed_by = %operator,
                "carton repacked"
            ),
            Err(err) if !err.is_fatal() => tracing::warn!(
                barcode = %barcode,
                units_taken = input.units_taken,
                code = err.code(),
                "repack rejected: {}",
                err
            ),
            Err(_) => {}
        }

        result
    }
}
