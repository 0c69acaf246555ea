//! Movement ledger models and replay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{StockItem, StockStatus};

/// Kinds of stock-affecting events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    StockIn,
    StockOut,
    Adjustment,
    StocktakeVerified,
    PartialRepack,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::StockIn => "stock_in",
            MovementType::StockOut => "stock_out",
            MovementType::Adjustment => "adjustment",
            MovementType::StocktakeVerified => "stocktake_verified",
            MovementType::PartialRepack => "partial_repack",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "stock_in" => Some(MovementType::StockIn),
            "stock_out" => Some(MovementType::StockOut),
            "adjustment" => Some(MovementType::Adjustment),
            "stocktake_verified" => Some(MovementType::StocktakeVerified),
            "partial_repack" => Some(MovementType::PartialRepack),
            _ => None,
        }
    }
}

/// Immutable audit record of one stock-affecting event
///
/// `quantity_change` is the signed change in units on hand. `status_after`
/// is the carton status this movement left behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub stock_item_id: Uuid,
    pub movement_type: MovementType,
    pub quantity_change: i32,
    pub status_after: StockStatus,
    pub reason: Option<String>,
    pub order_id: Option<Uuid>,
    pub stocktake_session_id: Option<Uuid>,
    pub performed_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Result of folding a carton's movements in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedgerReplay {
    pub status: StockStatus,
    pub on_hand: i64,
}

impl LedgerReplay {
    /// Whether the projection agrees with its own history
    pub fn matches(&self, item: &StockItem) -> bool {
        self.status == item.status && self.on_hand == item.on_hand_units()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("movement {index} moves {from} -> {to}, which is not a legal transition")]
    IllegalTransition {
        index: usize,
        from: StockStatus,
        to: StockStatus,
    },

    #[error("movement {index} belongs to carton {found}, expected {expected}")]
    ForeignMovement {
        index: usize,
        expected: Uuid,
        found: Uuid,
    },
}

/// Rebuild a carton's status and on-hand units from its movements
///
/// Every carton starts life as `pending_scan` with nothing on hand.
pub fn replay(movements: &[StockMovement]) -> Result<LedgerReplay, ReplayError> {
    let mut state = LedgerReplay {
        status: StockStatus::PendingScan,
        on_hand: 0,
    };

    let owner = movements.first().map(|m| m.stock_item_id);

    for (index, movement) in movements.iter().enumerate() {
        if let Some(expected) = owner {
            if movement.stock_item_id != expected {
                return Err(ReplayError::ForeignMovement {
                    index,
                    expected,
                    found: movement.stock_item_id,
                });
            }
        }

        if !state.status.can_transition_to(movement.status_after) {
            return Err(ReplayError::IllegalTransition {
                index,
                from: state.status,
                to: movement.status_after,
            });
        }

        state.status = movement.status_after;
        state.on_hand += i64::from(movement.quantity_change);
    }

    Ok(state)
}
