//! Guarded state transitions for cartons
//!
//! Every mutation of a carton goes through [`StockOperation::apply`]: check
//! the current status against the operation's allowed sources, validate the
//! operation's own inputs, then produce the updated projection together with
//! the movement that explains it. Stores persist both halves in one atomic
//! write, which keeps the projection and the ledger from drifting apart.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{BoxType, ItemSummary, MovementType, StockItem, StockMovement, StockStatus};

/// Who is acting and when
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext {
    pub performed_by: Uuid,
    pub at: DateTime<Utc>,
}

impl TransitionContext {
    pub fn now(performed_by: Uuid) -> Self {
        Self {
            performed_by,
            at: Utc::now(),
        }
    }
}

/// A carton mutation request
#[derive(Debug, Clone, PartialEq)]
pub enum StockOperation {
    ScanIn,
    ScanOut {
        order_id: Option<Uuid>,
    },
    AdjustQuantity {
        quantity_change: i32,
        reason: String,
    },
    Scrap {
        reason: String,
    },
    Consume {
        reason: Option<String>,
    },
    /// Movement on the source carton of a repack split
    RepackSource {
        units_taken: i32,
        child_barcode: String,
        order_id: Option<Uuid>,
    },
    StocktakeVerify {
        session_id: Uuid,
    },
    /// Write off a carton a stocktake could not find
    StocktakeWriteOff {
        session_id: Uuid,
        session_name: String,
    },
}

/// Projection and movement to be written together
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTransition {
    pub item: StockItem,
    pub movement: StockMovement,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum TransitionError {
    #[error("{} ({})", already_scanned_message(.item), describe_item(.item))]
    AlreadyScanned { item: ItemSummary },

    #[error("{} ({})", wrong_status_message(.operation, .item), describe_item(.item))]
    WrongStatus {
        operation: &'static str,
        expected: &'static [StockStatus],
        item: ItemSummary,
    },

    #[error("{0}")]
    InvalidQuantity(String),

    #[error("A reason is required to {0}")]
    MissingReason(&'static str),
}

fn describe_item(item: &ItemSummary) -> String {
    format!("{} {}, {} units", item.product_code, item.colour, item.quantity)
}

fn already_scanned_message(item: &ItemSummary) -> String {
    match item.status {
        StockStatus::InStock => "Already scanned in".to_string(),
        status => format!("Cannot scan in: item has been {}", status),
    }
}

fn wrong_status_message(operation: &str, item: &ItemSummary) -> String {
    match (operation, item.status) {
        (_, StockStatus::PendingScan) => "Item not yet scanned in".to_string(),
        ("scan out", StockStatus::Picked) => "Already scanned out".to_string(),
        ("repack" | "consume", StockStatus::InStock) => {
            format!("Cannot {}: item must be scanned out first", operation)
        }
        (_, status) if status.is_terminal() => {
            format!("Cannot {}: item has been {}", operation, status)
        }
        (_, status) => format!("Cannot {}: item is {}", operation, status),
    }
}

impl TransitionError {
    pub fn item(&self) -> Option<&ItemSummary> {
        match self {
            TransitionError::AlreadyScanned { item } | TransitionError::WrongStatus { item, .. } => {
                Some(item)
            }
            _ => None,
        }
    }
}

impl StockOperation {
    /// Short verb used in operator messages and logs
    pub fn name(&self) -> &'static str {
        match self {
            StockOperation::ScanIn => "scan in",
            StockOperation::ScanOut { .. } => "scan out",
            StockOperation::AdjustQuantity { .. } => "adjust",
            StockOperation::Scrap { .. } => "scrap",
            StockOperation::Consume { .. } => "consume",
            StockOperation::RepackSource { .. } => "repack",
            StockOperation::StocktakeVerify { .. } => "verify",
            StockOperation::StocktakeWriteOff { .. } => "write off",
        }
    }

    pub fn allowed_from(&self) -> &'static [StockStatus] {
        use StockStatus::*;

        match self {
            StockOperation::ScanIn => &[PendingScan],
            StockOperation::ScanOut { .. }
            | StockOperation::AdjustQuantity { .. }
            | StockOperation::StocktakeVerify { .. }
            | StockOperation::StocktakeWriteOff { .. } => &[InStock],
            StockOperation::Scrap { .. } => &[InStock, Picked],
            StockOperation::Consume { .. } | StockOperation::RepackSource { .. } => &[Picked],
        }
    }

    pub fn movement_type(&self) -> MovementType {
        match self {
            StockOperation::ScanIn => MovementType::StockIn,
            StockOperation::ScanOut { .. } => MovementType::StockOut,
            StockOperation::AdjustQuantity { .. }
            | StockOperation::Scrap { .. }
            | StockOperation::Consume { .. }
            | StockOperation::StocktakeWriteOff { .. } => MovementType::Adjustment,
            StockOperation::RepackSource { .. } => MovementType::PartialRepack,
            StockOperation::StocktakeVerify { .. } => MovementType::StocktakeVerified,
        }
    }

    fn target(&self, current: StockStatus) -> StockStatus {
        match self {
            StockOperation::ScanIn => StockStatus::InStock,
            StockOperation::ScanOut { .. } => StockStatus::Picked,
            StockOperation::Scrap { .. } | StockOperation::StocktakeWriteOff { .. } => {
                StockStatus::Scrapped
            }
            StockOperation::Consume { .. } => StockStatus::Consumed,
            StockOperation::AdjustQuantity { .. }
            | StockOperation::RepackSource { .. }
            | StockOperation::StocktakeVerify { .. } => current,
        }
    }

    fn check_inputs(&self, item: &StockItem) -> Result<(), TransitionError> {
        match self {
            StockOperation::AdjustQuantity {
                quantity_change,
                reason,
            } => {
                if reason.trim().is_empty() {
                    return Err(TransitionError::MissingReason("adjust"));
                }
                if *quantity_change == 0 {
                    return Err(TransitionError::InvalidQuantity(
                        "Adjustment must change the quantity".to_string(),
                    ));
                }
                let next = i64::from(item.quantity) + i64::from(*quantity_change);
                if next <= 0 {
                    return Err(TransitionError::InvalidQuantity(format!(
                        "Adjustment would leave {} units (current: {}, change: {:+}). Scrap the carton instead.",
                        next, item.quantity, quantity_change
                    )));
                }
                if next > i64::from(i32::MAX) {
                    return Err(TransitionError::InvalidQuantity(
                        "Adjustment overflows carton quantity".to_string(),
                    ));
                }
            }
            StockOperation::Scrap { reason } => {
                if reason.trim().is_empty() {
                    return Err(TransitionError::MissingReason("scrap"));
                }
            }
            StockOperation::RepackSource { units_taken, .. } => {
                crate::validation::validate_units_taken(*units_taken, item.quantity)
                    .map_err(TransitionError::InvalidQuantity)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn quantity_change(&self, item: &StockItem) -> i32 {
        match self {
            StockOperation::ScanIn => item.quantity,
            StockOperation::ScanOut { .. } => -item.quantity,
            StockOperation::AdjustQuantity {
                quantity_change, ..
            } => *quantity_change,
            StockOperation::Scrap { .. } | StockOperation::StocktakeWriteOff { .. } => {
                // Only cartons still on hand take units with them
                -(item.on_hand_units() as i32)
            }
            StockOperation::Consume { .. }
            | StockOperation::RepackSource { .. }
            | StockOperation::StocktakeVerify { .. } => 0,
        }
    }

    fn reason(&self, item: &StockItem) -> Option<String> {
        match self {
            StockOperation::AdjustQuantity { reason, .. } | StockOperation::Scrap { reason } => {
                Some(reason.trim().to_string())
            }
            StockOperation::Consume { reason } => reason.clone(),
            StockOperation::RepackSource {
                units_taken,
                child_barcode,
                ..
            } => Some(format!(
                "{} units taken, {} repacked into {}",
                units_taken,
                item.quantity - units_taken,
                child_barcode
            )),
            StockOperation::StocktakeWriteOff { session_name, .. } => Some(format!(
                "Stocktake discrepancy: item not found during {}",
                session_name
            )),
            StockOperation::ScanIn
            | StockOperation::ScanOut { .. }
            | StockOperation::StocktakeVerify { .. } => None,
        }
    }

    /// Validate and plan this operation against the carton's current state
    pub fn apply(
        &self,
        item: &StockItem,
        ctx: &TransitionContext,
    ) -> Result<PlannedTransition, TransitionError> {
        if !self.allowed_from().contains(&item.status) {
            return Err(match self {
                StockOperation::ScanIn => TransitionError::AlreadyScanned {
                    item: item.summary(),
                },
                _ => TransitionError::WrongStatus {
                    operation: self.name(),
                    expected: self.allowed_from(),
                    item: item.summary(),
                },
            });
        }

        self.check_inputs(item)?;

        let target = self.target(item.status);
        if !item.status.can_transition_to(target) {
            return Err(TransitionError::WrongStatus {
                operation: self.name(),
                expected: self.allowed_from(),
                item: item.summary(),
            });
        }

        let quantity_change = self.quantity_change(item);
        let mut next = item.clone();
        next.status = target;
        next.updated_at = ctx.at;

        let mut order_id = None;
        let mut stocktake_session_id = None;

        match self {
            StockOperation::ScanIn => {
                next.scanned_in_at = Some(ctx.at);
                next.scanned_in_by = Some(ctx.performed_by);
            }
            StockOperation::ScanOut { order_id: order } => {
                next.scanned_out_at = Some(ctx.at);
                next.scanned_out_by = Some(ctx.performed_by);
                if order.is_some() {
                    next.order_id = *order;
                }
                order_id = *order;
            }
            StockOperation::AdjustQuantity {
                quantity_change, ..
            } => {
                next.quantity += quantity_change;
            }
            StockOperation::RepackSource { order_id: order, .. } => {
                if order.is_some() {
                    next.order_id = *order;
                }
                order_id = *order;
            }
            StockOperation::StocktakeVerify { session_id } => {
                stocktake_session_id = Some(*session_id);
            }
            StockOperation::StocktakeWriteOff {
                session_id,
                session_name,
            } => {
                stocktake_session_id = Some(*session_id);
                let note = format!("[Stocktake adjustment: {}]", session_name);
                next.notes = Some(match next.notes.take() {
                    Some(existing) if !existing.is_empty() => format!("{} {}", existing, note),
                    _ => note,
                });
            }
            StockOperation::Scrap { .. } | StockOperation::Consume { .. } => {}
        }

        let movement = StockMovement {
            id: Uuid::new_v4(),
            stock_item_id: item.id,
            movement_type: self.movement_type(),
            quantity_change,
            status_after: target,
            reason: self.reason(item),
            order_id,
            stocktake_session_id,
            performed_by: ctx.performed_by,
            created_at: ctx.at,
        };

        Ok(PlannedTransition {
            item: next,
            movement,
        })
    }
}

/// Both halves of a repack split
#[derive(Debug, Clone, PartialEq)]
pub struct RepackPlan {
    pub source: PlannedTransition,
    pub child: StockItem,
    pub child_movement: StockMovement,
    pub units_taken: i32,
    pub units_remaining: i32,
}

/// Plan splitting a picked carton.
///
/// The source keeps its quantity and stays `picked`; the remainder goes back
/// on the shelf as a new `partial` carton carrying `child_barcode`.
pub fn plan_repack(
    original: &StockItem,
    units_taken: i32,
    child_barcode: String,
    order_id: Option<Uuid>,
    ctx: &TransitionContext,
) -> Result<RepackPlan, TransitionError> {
    let source = StockOperation::RepackSource {
        units_taken,
        child_barcode: child_barcode.clone(),
        order_id,
    }
    .apply(original, ctx)?;

    let units_remaining = original.quantity - units_taken;

    let child = StockItem {
        id: Uuid::new_v4(),
        barcode_id: child_barcode,
        product_code: original.product_code.clone(),
        colour: original.colour.clone(),
        quantity: units_remaining,
        box_type: BoxType::Partial,
        status: StockStatus::InStock,
        production_date: original.production_date,
        scanned_in_at: Some(ctx.at),
        scanned_in_by: Some(ctx.performed_by),
        scanned_out_at: None,
        scanned_out_by: None,
        order_id: None,
        parent_stock_item_id: Some(original.id),
        notes: None,
        created_at: ctx.at,
        updated_at: ctx.at,
    };

    let child_movement = StockMovement {
        id: Uuid::new_v4(),
        stock_item_id: child.id,
        movement_type: MovementType::StockIn,
        quantity_change: units_remaining,
        status_after: StockStatus::InStock,
        reason: Some(format!("Repacked from {}", original.barcode_id)),
        order_id: None,
        stocktake_session_id: None,
        performed_by: ctx.performed_by,
        created_at: ctx.at,
    };

    Ok(RepackPlan {
        source,
        child,
        child_movement,
        units_taken,
        units_remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{replay, CartonTemplate};
    use chrono::NaiveDate;

    fn pending(quantity: i32) -> StockItem {
        let template = CartonTemplate {
            product_code: "P100".into(),
            colour: "Black".into(),
            quantity_per_carton: quantity,
            box_type: BoxType::Full,
            production_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            notes: None,
        };
        StockItem::pending("RJ-P100-BLK-20240601-001".into(), &template, Utc::now())
    }

    fn ctx() -> TransitionContext {
        TransitionContext::now(Uuid::new_v4())
    }

    fn run(item: &mut StockItem, ledger: &mut Vec<StockMovement>, op: StockOperation) {
        let planned = op.apply(item, &ctx()).unwrap();
        *item = planned.item;
        ledger.push(planned.movement);
    }

    #[test]
    fn test_scan_in_sets_in_stock() {
        let item = pending(500);
        let planned = StockOperation::ScanIn.apply(&item, &ctx()).unwrap();

        assert_eq!(planned.item.status, StockStatus::InStock);
        assert!(planned.item.scanned_in_at.is_some());
        assert_eq!(planned.movement.movement_type, MovementType::StockIn);
        assert_eq!(planned.movement.quantity_change, 500);
    }

    #[test]
    fn test_second_scan_in_is_already_scanned() {
        let mut item = pending(500);
        item.status = StockStatus::InStock;

        let err = StockOperation::ScanIn.apply(&item, &ctx()).unwrap_err();
        assert!(matches!(err, TransitionError::AlreadyScanned { .. }));
        assert_eq!(err.item().unwrap().quantity, 500);
        assert_eq!(err.to_string(), "Already scanned in (P100 Black, 500 units)");
    }

    #[test]
    fn test_scan_out_requires_in_stock() {
        for status in [
            StockStatus::PendingScan,
            StockStatus::Picked,
            StockStatus::Scrapped,
            StockStatus::Consumed,
        ] {
            let mut item = pending(10);
            item.status = status;
            let err = StockOperation::ScanOut { order_id: None }
                .apply(&item, &ctx())
                .unwrap_err();
            assert!(matches!(err, TransitionError::WrongStatus { .. }), "{:?}", status);
        }

        let mut item = pending(10);
        item.status = StockStatus::Picked;
        let err = StockOperation::ScanOut { order_id: None }
            .apply(&item, &ctx())
            .unwrap_err();
        assert_eq!(err.to_string(), "Already scanned out (P100 Black, 10 units)");
    }

    #[test]
    fn test_scan_out_attaches_order() {
        let mut item = pending(10);
        item.status = StockStatus::InStock;
        let order = Uuid::new_v4();

        let planned = StockOperation::ScanOut {
            order_id: Some(order),
        }
        .apply(&item, &ctx())
        .unwrap();

        assert_eq!(planned.item.order_id, Some(order));
        assert_eq!(planned.movement.order_id, Some(order));
        assert_eq!(planned.movement.quantity_change, -10);
    }

    #[test]
    fn test_adjustment_cannot_empty_carton() {
        let mut item = pending(10);
        item.status = StockStatus::InStock;

        let err = StockOperation::AdjustQuantity {
            quantity_change: -10,
            reason: "damaged".into(),
        }
        .apply(&item, &ctx())
        .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidQuantity(_)));

        let err = StockOperation::AdjustQuantity {
            quantity_change: -2,
            reason: "  ".into(),
        }
        .apply(&item, &ctx())
        .unwrap_err();
        assert_eq!(err, TransitionError::MissingReason("adjust"));
    }

    #[test]
    fn test_scrap_from_picked_moves_nothing_off_hand() {
        let mut item = pending(10);
        item.status = StockStatus::Picked;

        let planned = StockOperation::Scrap {
            reason: "crushed".into(),
        }
        .apply(&item, &ctx())
        .unwrap();
        assert_eq!(planned.item.status, StockStatus::Scrapped);
        assert_eq!(planned.movement.quantity_change, 0);
    }

    #[test]
    fn test_repack_keeps_source_and_creates_remainder() {
        let mut item = pending(500);
        let mut ledger = Vec::new();
        run(&mut item, &mut ledger, StockOperation::ScanIn);
        run(&mut item, &mut ledger, StockOperation::ScanOut { order_id: None });

        let plan = plan_repack(&item, 120, "RJ-P100-BLK-20240601-002".into(), None, &ctx()).unwrap();

        assert_eq!(plan.source.item.quantity, 500);
        assert_eq!(plan.source.item.status, StockStatus::Picked);
        assert_eq!(plan.source.movement.movement_type, MovementType::PartialRepack);
        assert_eq!(plan.child.quantity, 380);
        assert_eq!(plan.child.box_type, BoxType::Partial);
        assert_eq!(plan.child.status, StockStatus::InStock);
        assert_eq!(plan.child.parent_stock_item_id, Some(item.id));
        assert_eq!(plan.units_taken + plan.units_remaining, 500);

        ledger.push(plan.source.movement.clone());
        assert!(replay(&ledger).unwrap().matches(&plan.source.item));
        assert!(replay(&[plan.child_movement.clone()]).unwrap().matches(&plan.child));
    }

    #[test]
    fn test_repack_bounds() {
        let mut item = pending(500);
        item.status = StockStatus::Picked;

        for units in [0, -1, 500, 501] {
            let err = plan_repack(&item, units, "NEW".into(), None, &ctx()).unwrap_err();
            assert!(matches!(err, TransitionError::InvalidQuantity(_)), "{}", units);
        }
    }

    #[test]
    fn test_repack_requires_picked() {
        let mut item = pending(500);
        item.status = StockStatus::InStock;

        let err = plan_repack(&item, 100, "NEW".into(), None, &ctx()).unwrap_err();
        assert!(matches!(err, TransitionError::WrongStatus { operation: "repack", .. }));
    }

    #[test]
    fn test_write_off_appends_note() {
        let mut item = pending(40);
        item.status = StockStatus::InStock;
        item.notes = Some("top shelf".into());
        let session_id = Uuid::new_v4();

        let planned = StockOperation::StocktakeWriteOff {
            session_id,
            session_name: "June count".into(),
        }
        .apply(&item, &ctx())
        .unwrap();

        assert_eq!(planned.item.status, StockStatus::Scrapped);
        assert_eq!(planned.movement.quantity_change, -40);
        assert_eq!(planned.movement.stocktake_session_id, Some(session_id));
        assert_eq!(
            planned.item.notes.as_deref(),
            Some("top shelf [Stocktake adjustment: June count]")
        );
    }

    mod fold {
        use super::*;
        use proptest::prelude::*;

        fn operation(choice: u8, amount: i32) -> StockOperation {
            match choice % 8 {
                0 => StockOperation::ScanIn,
                1 => StockOperation::ScanOut { order_id: None },
                2 => StockOperation::AdjustQuantity {
                    quantity_change: amount,
                    reason: "recount".into(),
                },
                3 => StockOperation::Scrap {
                    reason: "damaged".into(),
                },
                4 => StockOperation::Consume { reason: None },
                5 => StockOperation::RepackSource {
                    units_taken: amount.abs(),
                    child_barcode: "CHILD".into(),
                    order_id: None,
                },
                6 => StockOperation::StocktakeVerify {
                    session_id: Uuid::nil(),
                },
                _ => StockOperation::StocktakeWriteOff {
                    session_id: Uuid::nil(),
                    session_name: "count".into(),
                },
            }
        }

        proptest! {
            #[test]
            fn prop_replay_reproduces_projection(
                quantity in 1i32..1000,
                steps in proptest::collection::vec((any::<u8>(), -50i32..50), 0..25),
            ) {
                let mut item = pending(quantity);
                let mut ledger = Vec::new();

                for (choice, amount) in steps {
                    let op = operation(choice, amount);
                    if let Ok(planned) = op.apply(&item, &ctx()) {
                        prop_assert!(item.status.can_transition_to(planned.item.status));
                        item = planned.item;
                        ledger.push(planned.movement);
                    }
                    prop_assert!(item.quantity > 0);
                    let state = replay(&ledger).unwrap();
                    prop_assert!(state.matches(&item), "{:?} vs {:?}", state, item);
                }
            }
        }
    }
}
