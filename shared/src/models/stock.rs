//! Carton stock models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a physical carton
///
/// Transitions only ever move forward:
///
/// ```text
/// pending_scan -> in_stock -> picked -> consumed
///                    |          |
///                    +----------+----> scrapped
/// ```
///
/// `in_stock -> in_stock` and `picked -> picked` are allowed for movements
/// that annotate or resize a carton without moving it (adjustments,
/// stocktake verification, repack of a picked carton).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    PendingScan,
    InStock,
    Picked,
    Scrapped,
    Consumed,
}

impl StockStatus {
    pub const ALL: [StockStatus; 5] = [
        StockStatus::PendingScan,
        StockStatus::InStock,
        StockStatus::Picked,
        StockStatus::Scrapped,
        StockStatus::Consumed,
    ];

    /// Statuses that still count as physical stock somewhere in the building
    pub const NON_TERMINAL: [StockStatus; 3] = [
        StockStatus::PendingScan,
        StockStatus::InStock,
        StockStatus::Picked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::PendingScan => "pending_scan",
            StockStatus::InStock => "in_stock",
            StockStatus::Picked => "picked",
            StockStatus::Scrapped => "scrapped",
            StockStatus::Consumed => "consumed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending_scan" => Some(StockStatus::PendingScan),
            "in_stock" => Some(StockStatus::InStock),
            "picked" => Some(StockStatus::Picked),
            "scrapped" => Some(StockStatus::Scrapped),
            "consumed" => Some(StockStatus::Consumed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StockStatus::Scrapped | StockStatus::Consumed)
    }

    /// Transition table for the carton lifecycle
    pub fn can_transition_to(&self, next: StockStatus) -> bool {
        use StockStatus::*;

        matches!(
            (self, next),
            (PendingScan, InStock)
                | (InStock, InStock)
                | (InStock, Picked)
                | (InStock, Scrapped)
                | (Picked, Picked)
                | (Picked, Consumed)
                | (Picked, Scrapped)
        )
    }
}

impl std::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StockStatus::PendingScan => write!(f, "pending scan"),
            StockStatus::InStock => write!(f, "in stock"),
            StockStatus::Picked => write!(f, "picked"),
            StockStatus::Scrapped => write!(f, "scrapped"),
            StockStatus::Consumed => write!(f, "consumed"),
        }
    }
}

/// Full cartons come off the line; partial cartons come out of a repack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BoxType {
    #[default]
    Full,
    Partial,
}

impl BoxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoxType::Full => "full",
            BoxType::Partial => "partial",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "full" => Some(BoxType::Full),
            "partial" => Some(BoxType::Partial),
            _ => None,
        }
    }
}

/// One physical, barcode-identified carton
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockItem {
    pub id: Uuid,
    /// Printed on the label and scanned on the floor
    pub barcode_id: String,
    pub product_code: String,
    pub colour: String,
    /// Units in this carton, always positive
    pub quantity: i32,
    pub box_type: BoxType,
    pub status: StockStatus,
    pub production_date: Option<NaiveDate>,
    pub scanned_in_at: Option<DateTime<Utc>>,
    pub scanned_in_by: Option<Uuid>,
    pub scanned_out_at: Option<DateTime<Utc>>,
    pub scanned_out_by: Option<Uuid>,
    /// Order this carton was picked against
    pub order_id: Option<Uuid>,
    /// Set on cartons created by a repack split
    pub parent_stock_item_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockItem {
    /// Create a freshly labelled carton awaiting its first scan
    pub fn pending(
        barcode_id: String,
        template: &CartonTemplate,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            barcode_id,
            product_code: template.product_code.clone(),
            colour: template.colour.clone(),
            quantity: template.quantity_per_carton,
            box_type: template.box_type,
            status: StockStatus::PendingScan,
            production_date: Some(template.production_date),
            scanned_in_at: None,
            scanned_in_by: None,
            scanned_out_at: None,
            scanned_out_by: None,
            order_id: None,
            parent_stock_item_id: None,
            notes: template.notes.clone(),
            created_at,
            updated_at: created_at,
        }
    }

    /// Units this carton contributes to on-hand stock
    pub fn on_hand_units(&self) -> i64 {
        if self.status == StockStatus::InStock {
            i64::from(self.quantity)
        } else {
            0
        }
    }

    pub fn summary(&self) -> ItemSummary {
        ItemSummary {
            id: self.id,
            barcode_id: self.barcode_id.clone(),
            product_code: self.product_code.clone(),
            colour: self.colour.clone(),
            quantity: self.quantity,
            status: self.status,
        }
    }
}

/// Identifying fields shown to a floor operator when a scan is rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    pub id: Uuid,
    pub barcode_id: String,
    pub product_code: String,
    pub colour: String,
    pub quantity: i32,
    pub status: StockStatus,
}

/// Shared attributes of a batch of cartons created at label generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartonTemplate {
    pub product_code: String,
    pub colour: String,
    pub quantity_per_carton: i32,
    pub box_type: BoxType,
    pub production_date: NaiveDate,
    pub notes: Option<String>,
}

/// Carton plus its ordered movement history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockItemDetail {
    #[serde(flatten)]
    pub item: StockItem,
    pub movements: Vec<super::StockMovement>,
}
