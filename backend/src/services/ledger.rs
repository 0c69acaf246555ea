//! Carton registration, lookups and manual adjustments

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    barcode, replay, validate_colour, validate_label_count, validate_product_code,
    validate_quantity_per_carton, BoxType, CartonTemplate, ListResponse, PlannedTransition,
    StockItem, StockItemDetail, StockItemFilter, StockOperation, TransitionContext,
};
use uuid::Uuid;
use validator::Validate;

use super::{run_transition, scanned_barcode};
use crate::error::{AppError, AppResult};
use crate::store::{ItemRef, LedgerStore};

/// Input for generating a batch of carton labels
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateLabelsInput {
    #[validate(length(min = 1, max = 50, message = "Product code is required"))]
    pub product_code: String,
    #[validate(length(min = 1, max = 50, message = "Colour is required"))]
    pub colour: String,
    #[validate(range(min = 1, message = "Quantity per carton must be at least 1"))]
    pub quantity_per_carton: i32,
    #[validate(range(min = 1, max = 500, message = "Between 1 and 500 labels per batch"))]
    pub number_of_labels: u32,
    #[serde(default)]
    pub box_type: BoxType,
    pub production_date: Option<NaiveDate>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

/// Cartons registered for one print run
#[derive(Debug, Clone, Serialize)]
pub struct LabelBatch {
    pub count: usize,
    pub barcodes: Vec<String>,
    pub items: Vec<StockItem>,
}

/// Input for a manual quantity correction
#[derive(Debug, Deserialize, Validate)]
pub struct AdjustQuantityInput {
    #[validate(length(min = 1, message = "Barcode is required"))]
    pub barcode: String,
    pub quantity_change: i32,
    #[validate(length(min = 1, max = 500, message = "A reason is required"))]
    pub reason: String,
}

/// Input for scrapping a carton
#[derive(Debug, Deserialize, Validate)]
pub struct ScrapInput {
    #[validate(length(min = 1, message = "Barcode is required"))]
    pub barcode: String,
    #[validate(length(min = 1, max = 500, message = "A reason is required"))]
    pub reason: String,
}

/// Input for marking a picked carton consumed
#[derive(Debug, Deserialize, Validate)]
pub struct ConsumeInput {
    #[validate(length(min = 1, message = "Barcode is required"))]
    pub barcode: String,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

/// Ledger service for carton registration and reads
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
}

impl LedgerService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Allocate fresh barcodes and register them as `pending_scan`
    pub async fn generate_labels(
        &self,
        prefix: &str,
        input: GenerateLabelsInput,
    ) -> AppResult<LabelBatch> {
        input.validate()?;
        validate_product_code(input.product_code.trim())
            .map_err(|msg| AppError::validation("product_code", msg))?;
        validate_colour(&input.colour).map_err(|msg| AppError::validation("colour", msg))?;
        validate_label_count(input.number_of_labels)
            .map_err(|msg| AppError::validation("number_of_labels", msg))?;
        validate_quantity_per_carton(input.quantity_per_carton)
            .map_err(|msg| AppError::validation("quantity_per_carton", msg))?;

        let now = Utc::now();
        let template = CartonTemplate {
            product_code: input.product_code.trim().to_string(),
            colour: input.colour.trim().to_string(),
            quantity_per_carton: input.quantity_per_carton,
            box_type: input.box_type,
            production_date: input.production_date.unwrap_or_else(|| now.date_naive()),
            notes: input.notes.filter(|n| !n.trim().is_empty()),
        };
        let stem = barcode::barcode_stem(
            prefix,
            &template.product_code,
            &template.colour,
            template.production_date,
        );

        let items = self
            .store
            .create_pending_items(&stem, &template, input.number_of_labels, now)
            .await?;

        tracing::info!(
            product_code = %template.product_code,
            colour = %template.colour,
            quantity = template.quantity_per_carton,
            count = items.len(),
            first = items.first().map(|i| i.barcode_id.as_str()).unwrap_or_default(),
            "labels generated"
        );

        Ok(LabelBatch {
            count: items.len(),
            barcodes: items.iter().map(|i| i.barcode_id.clone()).collect(),
            items,
        })
    }

    /// Carton with its full movement history
    pub async fn get_item_detail(&self, id: Uuid) -> AppResult<StockItemDetail> {
        let item = self
            .store
            .get_item(id)
            .await?
            .ok_or_else(|| ItemRef::Id(id).not_found())?;
        let movements = self.store.list_movements(id).await?;

        match replay(&movements) {
            Ok(replayed) if replayed.matches(&item) => {}
            Ok(replayed) => tracing::error!(
                barcode = %item.barcode_id,
                status = %item.status,
                replayed_status = %replayed.status,
                replayed_on_hand = replayed.on_hand,
                "movement ledger disagrees with carton state"
            ),
            Err(err) => tracing::error!(
                barcode = %item.barcode_id,
                error = %err,
                "movement ledger cannot be replayed"
            ),
        }

        Ok(StockItemDetail { item, movements })
    }

    pub async fn get_by_barcode(&self, raw: &str) -> AppResult<StockItem> {
        let barcode = scanned_barcode(raw)?;
        self.store
            .find_by_barcode(&barcode)
            .await?
            .ok_or_else(|| ItemRef::Barcode(&barcode).not_found())
    }

    pub async fn list_items(&self, filter: StockItemFilter) -> AppResult<ListResponse<StockItem>> {
        self.store.list_items(&filter).await
    }

    pub async fn adjust_quantity(
        &self,
        operator: Uuid,
        input: AdjustQuantityInput,
    ) -> AppResult<PlannedTransition> {
        input.validate()?;
        let barcode = scanned_barcode(&input.barcode)?;
        let operation = StockOperation::AdjustQuantity {
            quantity_change: input.quantity_change,
            reason: input.reason,
        };
        run_transition(
            self.store.as_ref(),
            ItemRef::Barcode(&barcode),
            &operation,
            &TransitionContext::now(operator),
        )
        .await
    }

    pub async fn scrap(&self, operator: Uuid, input: ScrapInput) -> AppResult<PlannedTransition> {
        input.validate()?;
        let barcode = scanned_barcode(&input.barcode)?;
        let operation = StockOperation::Scrap {
            reason: input.reason,
        };
        run_transition(
            self.store.as_ref(),
            ItemRef::Barcode(&barcode),
            &operation,
            &TransitionContext::now(operator),
        )
        .await
    }

    pub async fn consume(&self, operator: Uuid, input: ConsumeInput) -> AppResult<PlannedTransition> {
        input.validate()?;
        let barcode = scanned_barcode(&input.barcode)?;
        let operation = StockOperation::Consume {
            reason: input.reason.filter(|r| !r.trim().is_empty()),
        };
        run_transition(
            self.store.as_ref(),
            ItemRef::Barcode(&barcode),
            &operation,
            &TransitionContext::now(operator),
        )
        .await
    }
}
