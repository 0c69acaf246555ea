//! Threshold configuration and the stock summary derived from it

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use shared::{
    evaluate_thresholds, summarize, validate_threshold, StockSummary, StockThreshold,
    SummaryFilter,
};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::store::LedgerStore;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateThresholdInput {
    #[validate(length(min = 1, max = 50, message = "Product code is required"))]
    pub product_code: String,
    /// `None` applies to every colour of the product
    pub colour: Option<String>,
    #[serde(default)]
    pub red_threshold: i32,
    #[serde(default)]
    pub amber_threshold: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateThresholdInput {
    pub red_threshold: Option<i32>,
    pub amber_threshold: Option<i32>,
}

#[derive(Clone)]
pub struct ThresholdService {
    store: Arc<dyn LedgerStore>,
}

fn check_levels(red: i32, amber: i32) -> AppResult<()> {
    validate_threshold(red, amber).map_err(|msg| AppError::validation("red_threshold", msg))
}

impl ThresholdService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> AppResult<Vec<StockThreshold>> {
        self.store.list_thresholds().await
    }

    pub async fn create(&self, input: CreateThresholdInput) -> AppResult<StockThreshold> {
        input.validate()?;
        check_levels(input.red_threshold, input.amber_threshold)?;

        let now = Utc::now();
        let threshold = StockThreshold {
            id: Uuid::new_v4(),
            product_code: input.product_code.trim().to_string(),
            colour: input
                .colour
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            red_threshold: input.red_threshold,
            amber_threshold: input.amber_threshold,
            created_at: now,
            updated_at: now,
        };

        self.store.insert_threshold(&threshold).await?;

        tracing::info!(
            product_code = %threshold.product_code,
            colour = threshold.colour.as_deref().unwrap_or("*"),
            red = threshold.red_threshold,
            amber = threshold.amber_threshold,
            "threshold created"
        );
        Ok(threshold)
    }

    /// Change either level; the merged pair must still satisfy `0 <= red <= amber`
    pub async fn update(&self, id: Uuid, input: UpdateThresholdInput) -> AppResult<StockThreshold> {
        let mut threshold = self
            .store
            .get_threshold(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Threshold not found".to_string()))?;

        if let Some(red) = input.red_threshold {
            threshold.red_threshold = red;
        }
        if let Some(amber) = input.amber_threshold {
            threshold.amber_threshold = amber;
        }
        check_levels(threshold.red_threshold, threshold.amber_threshold)?;
        threshold.updated_at = Utc::now();

        self.store.update_threshold(&threshold).await?;

        tracing::info!(
            threshold_id = %id,
            red = threshold.red_threshold,
            amber = threshold.amber_threshold,
            "threshold updated"
        );
        Ok(threshold)
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        if !self.store.delete_threshold(id).await? {
            return Err(AppError::NotFound("Threshold not found".to_string()));
        }
        tracing::info!(threshold_id = %id, "threshold deleted");
        Ok(())
    }

    /// Per product and colour in-stock totals with their threshold band.
    /// Recomputed from carton state on every call.
    pub async fn stock_summary(&self, filter: SummaryFilter) -> AppResult<StockSummary> {
        let aggregates: Vec<_> = self
            .store
            .stock_aggregates()
            .await?
            .into_iter()
            .filter(|agg| filter.matches_group(&agg.product_code, &agg.colour))
            .collect();
        let thresholds = self.store.list_thresholds().await?;

        let rows = evaluate_thresholds(aggregates, &thresholds);
        Ok(summarize(rows, filter.status_filter))
    }
}
