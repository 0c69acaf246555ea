//! Stock level thresholds and health status derivation

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{StockItem, StockStatus};

/// Health of aggregate stock for a product and colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdStatus {
    Red,
    Amber,
    Green,
}

impl ThresholdStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdStatus::Red => "red",
            ThresholdStatus::Amber => "amber",
            ThresholdStatus::Green => "green",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "red" => Some(ThresholdStatus::Red),
            "amber" => Some(ThresholdStatus::Amber),
            "green" => Some(ThresholdStatus::Green),
            _ => None,
        }
    }

    pub fn is_low(&self) -> bool {
        matches!(self, ThresholdStatus::Red | ThresholdStatus::Amber)
    }
}

/// Configured red/amber levels; `colour = None` applies to every colour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockThreshold {
    pub id: Uuid,
    pub product_code: String,
    pub colour: Option<String>,
    pub red_threshold: i32,
    pub amber_threshold: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derive the band for a total. Boundary values belong to the stricter band.
pub fn threshold_status(total_units: i64, red: i32, amber: i32) -> ThresholdStatus {
    if total_units <= i64::from(red) {
        ThresholdStatus::Red
    } else if total_units <= i64::from(amber) {
        ThresholdStatus::Amber
    } else {
        ThresholdStatus::Green
    }
}

/// Exact `(product, colour)` match first, then the colour-agnostic row
pub fn resolve_threshold<'a>(
    thresholds: &'a [StockThreshold],
    product_code: &str,
    colour: &str,
) -> Option<&'a StockThreshold> {
    thresholds
        .iter()
        .find(|t| t.product_code == product_code && t.colour.as_deref() == Some(colour))
        .or_else(|| {
            thresholds
                .iter()
                .find(|t| t.product_code == product_code && t.colour.is_none())
        })
}

/// In-stock totals for one product and colour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAggregate {
    pub product_code: String,
    pub colour: String,
    pub carton_count: i64,
    pub total_units: i64,
}

/// Group cartons by product and colour.
///
/// Every group with at least one non-terminal carton is reported, even when
/// nothing is currently in stock, so an empty shelf still shows red.
pub fn aggregate_items<'a, I>(items: I) -> Vec<StockAggregate>
where
    I: IntoIterator<Item = &'a StockItem>,
{
    let mut groups: BTreeMap<(String, String), (i64, i64)> = BTreeMap::new();

    for item in items {
        if !StockStatus::NON_TERMINAL.contains(&item.status) {
            continue;
        }
        let entry = groups
            .entry((item.product_code.clone(), item.colour.clone()))
            .or_insert((0, 0));
        if item.status == StockStatus::InStock {
            entry.0 += 1;
            entry.1 += i64::from(item.quantity);
        }
    }

    groups
        .into_iter()
        .map(|((product_code, colour), (carton_count, total_units))| StockAggregate {
            product_code,
            colour,
            carton_count,
            total_units,
        })
        .collect()
}

/// One row of the stock summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummaryRow {
    pub product_code: String,
    pub colour: String,
    pub carton_count: i64,
    pub total_units: i64,
    pub threshold_status: Option<ThresholdStatus>,
    pub red_threshold: Option<i32>,
    pub amber_threshold: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummaryTotals {
    pub total_skus: usize,
    pub total_units: i64,
    pub total_cartons: i64,
    pub low_stock_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummary {
    pub summary: StockSummaryTotals,
    pub items: Vec<StockSummaryRow>,
}

/// Attach threshold status to each aggregate
///
/// Pure: the same aggregates and thresholds always give the same rows.
pub fn evaluate_thresholds(
    aggregates: Vec<StockAggregate>,
    thresholds: &[StockThreshold],
) -> Vec<StockSummaryRow> {
    aggregates
        .into_iter()
        .map(|agg| {
            let threshold = resolve_threshold(thresholds, &agg.product_code, &agg.colour);
            StockSummaryRow {
                threshold_status: threshold
                    .map(|t| threshold_status(agg.total_units, t.red_threshold, t.amber_threshold)),
                red_threshold: threshold.map(|t| t.red_threshold),
                amber_threshold: threshold.map(|t| t.amber_threshold),
                product_code: agg.product_code,
                colour: agg.colour,
                carton_count: agg.carton_count,
                total_units: agg.total_units,
            }
        })
        .collect()
}

/// Compute totals over every row, then apply the optional status filter
pub fn summarize(rows: Vec<StockSummaryRow>, status_filter: Option<ThresholdStatus>) -> StockSummary {
    let summary = StockSummaryTotals {
        total_skus: rows.len(),
        total_units: rows.iter().map(|r| r.total_units).sum(),
        total_cartons: rows.iter().map(|r| r.carton_count).sum(),
        low_stock_count: rows
            .iter()
            .filter(|r| r.threshold_status.map(|s| s.is_low()).unwrap_or(false))
            .count(),
    };

    let items = match status_filter {
        Some(wanted) => rows
            .into_iter()
            .filter(|r| r.threshold_status == Some(wanted))
            .collect(),
        None => rows,
    };

    StockSummary { summary, items }
}
