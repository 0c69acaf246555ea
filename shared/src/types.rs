//! Query and response shapes shared with clients

use serde::{Deserialize, Serialize};

use crate::models::{StockStatus, ThresholdStatus};

pub const DEFAULT_LIST_LIMIT: u32 = 100;
pub const MAX_LIST_LIMIT: u32 = 1000;

/// Filters for listing individual cartons
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StockItemFilter {
    pub product_code: Option<String>,
    pub colour: Option<String>,
    pub status: Option<StockStatus>,
    /// Barcode substring, case-insensitive
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl StockItemFilter {
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }

    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or(0)
    }

    /// Whether an item passes every filter except paging
    pub fn matches(&self, item: &crate::models::StockItem) -> bool {
        if let Some(code) = &self.product_code {
            if &item.product_code != code {
                return false;
            }
        }
        if let Some(colour) = &self.colour {
            if &item.colour != colour {
                return false;
            }
        }
        if let Some(status) = self.status {
            if item.status != status {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !contains_ignore_case(&item.barcode_id, search) {
                return false;
            }
        }
        true
    }
}

/// Filters for the stock summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryFilter {
    /// Product code substring, case-insensitive
    pub search: Option<String>,
    /// Colour substring, case-insensitive
    pub colour: Option<String>,
    pub status_filter: Option<ThresholdStatus>,
}

impl SummaryFilter {
    pub fn matches_group(&self, product_code: &str, colour: &str) -> bool {
        let search_ok = self
            .search
            .as_deref()
            .map(|s| contains_ignore_case(product_code, s))
            .unwrap_or(true);
        let colour_ok = self
            .colour
            .as_deref()
            .map(|c| contains_ignore_case(colour, c))
            .unwrap_or(true);
        search_ok && colour_ok
    }
}

/// A page of results plus the unpaged total
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
}

pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
