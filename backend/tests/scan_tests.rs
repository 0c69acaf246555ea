//! Carton scan and manual adjustment tests
//!
//! Tests for the floor scan processor including:
//! - scan-in succeeds exactly once per carton
//! - scan-out only from in_stock, never mutating on failure
//! - concurrent scans of one barcode serialize
//! - movement ledger replays to the carton state

mod common;

use carton_ledger_backend::error::StateConflict;
use carton_ledger_backend::services::ledger::{
    AdjustQuantityInput, ConsumeInput, GenerateLabelsInput, ScrapInput,
};
use carton_ledger_backend::AppError;
use common::{production_date, Harness, PREFIX};
use shared::{BoxType, MovementType, StockStatus};

// ============================================================================
// Label generation
// ============================================================================

mod label_tests {
    use super::*;

    #[tokio::test]
    async fn test_labels_are_pending_with_sequential_barcodes() {
        let h = Harness::new();
        let items = h.cartons("P100", "Black", 500, 3).await;

        let barcodes: Vec<&str> = items.iter().map(|i| i.barcode_id.as_str()).collect();
        assert_eq!(
            barcodes,
            vec![
                "RJ-P100-BLK-20240601-001",
                "RJ-P100-BLK-20240601-002",
                "RJ-P100-BLK-20240601-003",
            ]
        );
        assert!(items.iter().all(|i| i.status == StockStatus::PendingScan));
        assert!(items.iter().all(|i| i.box_type == BoxType::Full));

        // Registration writes no movement
        let movements = h.store.list_movements(items[0].id).await.unwrap();
        assert!(movements.is_empty());
    }

    #[tokio::test]
    async fn test_second_batch_continues_sequence() {
        let h = Harness::new();
        h.cartons("P100", "Black", 500, 2).await;
        let next = h.cartons("P100", "Black", 500, 1).await;

        assert_eq!(next[0].barcode_id, "RJ-P100-BLK-20240601-003");
    }

    #[tokio::test]
    async fn test_colour_without_override_uses_first_three_letters() {
        let h = Harness::new();
        let items = h.cartons("P200", "Magenta", 10, 1).await;

        assert_eq!(items[0].barcode_id, "RJ-P200-MAG-20240601-001");
    }

    fn labels_for(colour: &str) -> GenerateLabelsInput {
        GenerateLabelsInput {
            product_code: "P1".to_string(),
            colour: colour.to_string(),
            quantity_per_carton: 20,
            number_of_labels: 1,
            box_type: BoxType::Full,
            production_date: Some(production_date()),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_every_printed_label_scans_in() {
        let h = Harness::new();

        for (colour, expected) in [
            ("Écru", "RJ-P1-CRU-20240601-001"),
            ("A B", "RJ-P1-AB-20240601-001"),
            ("sea-green", "RJ-P1-SEA-20240601-001"),
        ] {
            let batch = h.ledger.generate_labels(PREFIX, labels_for(colour)).await.unwrap();
            assert_eq!(batch.barcodes, vec![expected.to_string()]);

            let scanned = h.scan_in(&batch.barcodes[0]).await.unwrap();
            assert_eq!(scanned.item.status, StockStatus::InStock);
            assert_eq!(scanned.item.colour, colour);
        }
    }

    #[tokio::test]
    async fn test_colour_without_barcode_code_is_rejected() {
        let h = Harness::new();

        for colour in ["", "   ", "ÄÖÜ"] {
            let err = h.ledger.generate_labels(PREFIX, labels_for(colour)).await.unwrap_err();
            assert!(
                matches!(&err, AppError::Validation { field, .. } if field == "colour"),
                "{:?} gave {:?}",
                colour,
                err
            );
        }

        // Nothing was registered
        let next = h.cartons("P1", "Black", 20, 1).await;
        assert_eq!(next[0].barcode_id, "RJ-P1-BLK-20240601-001");
    }

    #[tokio::test]
    async fn test_concurrent_batches_never_collide() {
        let h = Harness::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                h.cartons("P100", "Black", 500, 5).await
            }));
        }

        let mut barcodes = std::collections::HashSet::new();
        for handle in handles {
            for item in handle.await.unwrap() {
                assert!(barcodes.insert(item.barcode_id));
            }
        }
        assert_eq!(barcodes.len(), 40);
    }
}

// ============================================================================
// Scan-in / scan-out
// ============================================================================

mod scan_flow_tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_in_succeeds_exactly_once() {
        let h = Harness::new();
        let carton = h.cartons("P100", "Black", 500, 1).await.remove(0);

        let first = h.scan_in(&carton.barcode_id).await.unwrap();
        assert_eq!(first.item.status, StockStatus::InStock);
        assert_eq!(first.movement.movement_type, MovementType::StockIn);
        assert_eq!(first.movement.quantity_change, 500);
        assert_eq!(first.movement.performed_by, h.operator);

        let second = h.scan_in(&carton.barcode_id).await.unwrap_err();
        match second {
            AppError::InvalidState { reason, item, .. } => {
                assert_eq!(reason, StateConflict::AlreadyScanned);
                let item = item.unwrap();
                assert_eq!(item.product_code, "P100");
                assert_eq!(item.quantity, 500);
            }
            other => panic!("expected InvalidState, got {:?}", other),
        }

        let movements = h.store.list_movements(carton.id).await.unwrap();
        assert_eq!(movements.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_barcode_is_not_found() {
        let h = Harness::new();
        let err = h.scan_in("RJ-NOPE-BLK-20240601-001").await.unwrap_err();

        assert!(matches!(err, AppError::NotFound(ref msg) if msg.contains("RJ-NOPE")));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_barcode_is_trimmed_before_lookup() {
        let h = Harness::new();
        let carton = h.cartons("P100", "Black", 500, 1).await.remove(0);

        let padded = format!("  {}\n", carton.barcode_id);
        assert!(h.scan_in(&padded).await.is_ok());
    }

    #[tokio::test]
    async fn test_scan_out_requires_in_stock_and_never_mutates_on_failure() {
        let h = Harness::new();
        let carton = h.cartons("P100", "Black", 500, 1).await.remove(0);

        // Still pending
        let err = h.scan_out(&carton.barcode_id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidState {
                reason: StateConflict::WrongStatus,
                ..
            }
        ));
        assert_eq!(err.to_string(), "Item not yet scanned in (P100 Black, 500 units)");
        assert_eq!(h.item(&carton.barcode_id).await.status, StockStatus::PendingScan);

        h.scan_in(&carton.barcode_id).await.unwrap();
        let picked = h.scan_out(&carton.barcode_id).await.unwrap();
        assert_eq!(picked.item.status, StockStatus::Picked);
        assert_eq!(picked.movement.quantity_change, -500);

        let before = h.item(&carton.barcode_id).await;
        let err = h.scan_out(&carton.barcode_id).await.unwrap_err();
        assert!(err.to_string().starts_with("Already scanned out"));
        assert_eq!(h.item(&carton.barcode_id).await, before);

        h.assert_ledger_consistent(&carton.barcode_id).await;
    }

    #[tokio::test]
    async fn test_scan_out_records_order() {
        let h = Harness::new();
        let carton = h.in_stock("P100", "Black", 500, 1).await.remove(0);
        let order_id = uuid::Uuid::new_v4();

        let picked = h
            .scans
            .scan_out(
                h.operator,
                carton_ledger_backend::services::scan::ScanOutInput {
                    barcode: carton.barcode_id.clone(),
                    order_id: Some(order_id),
                },
            )
            .await
            .unwrap();

        assert_eq!(picked.item.order_id, Some(order_id));
        assert_eq!(picked.movement.order_id, Some(order_id));
        assert_eq!(picked.item.scanned_out_by, Some(h.operator));
    }

    #[tokio::test]
    async fn test_empty_barcode_is_validation_error() {
        let h = Harness::new();
        let err = h.scan_in("   ").await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}

// ============================================================================
// Manual adjustments
// ============================================================================

mod adjustment_tests {
    use super::*;

    #[tokio::test]
    async fn test_adjust_keeps_quantity_positive() {
        let h = Harness::new();
        let carton = h.in_stock("P100", "Black", 500, 1).await.remove(0);

        let adjusted = h
            .ledger
            .adjust_quantity(
                h.operator,
                AdjustQuantityInput {
                    barcode: carton.barcode_id.clone(),
                    quantity_change: -20,
                    reason: "Damaged units removed".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(adjusted.item.quantity, 480);
        assert_eq!(adjusted.movement.movement_type, MovementType::Adjustment);
        assert_eq!(adjusted.movement.quantity_change, -20);

        let err = h
            .ledger
            .adjust_quantity(
                h.operator,
                AdjustQuantityInput {
                    barcode: carton.barcode_id.clone(),
                    quantity_change: -480,
                    reason: "Everything gone".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidQuantity(_)));
        assert_eq!(h.item(&carton.barcode_id).await.quantity, 480);

        h.assert_ledger_consistent(&carton.barcode_id).await;
    }

    #[tokio::test]
    async fn test_adjust_requires_reason() {
        let h = Harness::new();
        let carton = h.in_stock("P100", "Black", 500, 1).await.remove(0);

        let err = h
            .ledger
            .adjust_quantity(
                h.operator,
                AdjustQuantityInput {
                    barcode: carton.barcode_id,
                    quantity_change: 5,
                    reason: String::new(),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_scrap_from_in_stock_and_picked() {
        let h = Harness::new();
        let cartons = h.in_stock("P100", "Black", 500, 2).await;
        h.scan_out(&cartons[1].barcode_id).await.unwrap();

        for (carton, expected_delta) in cartons.iter().zip([-500, 0]) {
            let scrapped = h
                .ledger
                .scrap(
                    h.operator,
                    ScrapInput {
                        barcode: carton.barcode_id.clone(),
                        reason: "Water damage".into(),
                    },
                )
                .await
                .unwrap();
            assert_eq!(scrapped.item.status, StockStatus::Scrapped);
            assert_eq!(scrapped.movement.quantity_change, expected_delta);
            h.assert_ledger_consistent(&carton.barcode_id).await;
        }
    }

    #[tokio::test]
    async fn test_consume_only_from_picked() {
        let h = Harness::new();
        let carton = h.in_stock("P100", "Black", 500, 1).await.remove(0);

        let err = h
            .ledger
            .consume(
                h.operator,
                ConsumeInput {
                    barcode: carton.barcode_id.clone(),
                    reason: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot consume: item must be scanned out first (P100 Black, 500 units)"
        );

        h.scan_out(&carton.barcode_id).await.unwrap();
        let consumed = h
            .ledger
            .consume(
                h.operator,
                ConsumeInput {
                    barcode: carton.barcode_id.clone(),
                    reason: Some("Used on line 2".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(consumed.item.status, StockStatus::Consumed);
        assert_eq!(consumed.movement.quantity_change, 0);

        // Terminal
        let err = h.scan_in(&carton.barcode_id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState { .. }));
        h.assert_ledger_consistent(&carton.barcode_id).await;
    }

    #[tokio::test]
    async fn test_item_detail_carries_history() {
        let h = Harness::new();
        let carton = h.in_stock("P100", "Black", 500, 1).await.remove(0);
        h.scan_out(&carton.barcode_id).await.unwrap();

        let detail = h.ledger.get_item_detail(carton.id).await.unwrap();
        let types: Vec<MovementType> = detail.movements.iter().map(|m| m.movement_type).collect();
        assert_eq!(types, vec![MovementType::StockIn, MovementType::StockOut]);
        assert_eq!(detail.item.status, StockStatus::Picked);

        let missing = h.ledger.get_item_detail(uuid::Uuid::new_v4()).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_items_filters_and_pages() {
        let h = Harness::new();
        h.in_stock("P100", "Black", 500, 3).await;
        h.cartons("P100", "White", 500, 2).await;
        h.cartons("P200", "Black", 100, 1).await;

        let all = h.ledger.list_items(Default::default()).await.unwrap();
        assert_eq!(all.total, 6);

        let in_stock = h
            .ledger
            .list_items(shared::StockItemFilter {
                status: Some(StockStatus::InStock),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(in_stock.total, 3);

        let search = h
            .ledger
            .list_items(shared::StockItemFilter {
                search: Some("p100-wht".into()),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(search.total, 2);
        assert_eq!(search.items.len(), 1);
    }
}

// ============================================================================
// Concurrency
// ============================================================================

mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_scan_ins_have_one_winner() {
        let h = Harness::new();
        let carton = h.cartons("P100", "Black", 500, 1).await.remove(0);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let h = h.clone();
            let barcode = carton.barcode_id.clone();
            handles.push(tokio::spawn(async move { h.scan_in(&barcode).await }));
        }

        let mut wins = 0;
        let mut losses = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(AppError::InvalidState {
                    reason: StateConflict::AlreadyScanned,
                    ..
                }) => losses += 1,
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(losses, 15);
        assert_eq!(h.store.list_movements(carton.id).await.unwrap().len(), 1);
        h.assert_ledger_consistent(&carton.barcode_id).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_different_barcodes_scan_concurrently() {
        let h = Harness::new();
        let cartons = h.cartons("P100", "Black", 500, 20).await;

        let mut handles = Vec::new();
        for carton in cartons.iter().cloned() {
            let h = h.clone();
            handles.push(tokio::spawn(async move { h.scan_in(&carton.barcode_id).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        for carton in &cartons {
            h.assert_ledger_consistent(&carton.barcode_id).await;
        }
    }
}
