//! Stocktake session tests
//!
//! - Expectation is frozen at start; found + missing = expected
//! - A carton counts as found at most once per session, even under races
//! - Completion is one-way; auto-adjust writes off only what is still in stock
//! - Reports and progress are derived, never stored counters drifting

mod common;

use carton_ledger_backend::services::stocktake::{
    CompleteSessionInput, RecordScanInput, ScanOutcome, StartSessionInput,
};
use carton_ledger_backend::AppError;
use common::Harness;
use proptest::prelude::*;
use shared::{MovementType, ScanResult, SessionStatus, StockItem, StockStatus, StocktakeSession};

async fn start(h: &Harness, name: &str) -> StocktakeSession {
    h.stocktake
        .start(
            h.operator,
            StartSessionInput {
                name: name.to_string(),
                notes: None,
            },
        )
        .await
        .unwrap()
}

async fn scan(h: &Harness, session: &StocktakeSession, barcode: &str) -> Result<ScanOutcome, AppError> {
    h.stocktake
        .record_scan(
            session.id,
            h.operator,
            RecordScanInput {
                barcode: barcode.to_string(),
                notes: None,
            },
        )
        .await
}

fn auto_adjust(enabled: bool) -> CompleteSessionInput {
    CompleteSessionInput {
        auto_adjust: enabled,
    }
}

/// Ten cartons on the shelf, eight of them counted, one stray label
async fn counted_floor(h: &Harness) -> (StocktakeSession, Vec<StockItem>) {
    let cartons = h.in_stock("P100", "Black", 50, 10).await;
    let session = start(h, "June count").await;

    for carton in &cartons[..8] {
        let outcome = scan(h, &session, &carton.barcode_id).await.unwrap();
        assert_eq!(outcome.scan_result, ScanResult::Found);
    }
    let stray = scan(h, &session, "RJ-ZZZ-BLK-20240601-001").await.unwrap();
    assert_eq!(stray.scan_result, ScanResult::NotInSystem);
    assert_eq!(stray.message, "Barcode not recognised: RJ-ZZZ-BLK-20240601-001");

    (session, cartons)
}

// ============================================================================
// Session Lifecycle Tests
// ============================================================================

mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_start_freezes_in_stock_cartons() {
        let h = Harness::new();
        h.in_stock("P100", "Black", 50, 3).await;
        h.cartons("P100", "Black", 50, 2).await;
        let picked = h.in_stock("P100", "Black", 50, 1).await.remove(0);
        h.scan_out(&picked.barcode_id).await.unwrap();

        let session = start(&h, "  Weekly  ").await;

        assert_eq!(session.name, "Weekly");
        assert_eq!(session.status, SessionStatus::InProgress);
        assert_eq!(session.total_expected, 3);

        let detail = h.stocktake.detail(session.id).await.unwrap();
        assert_eq!(detail.progress.total_expected, 3);
        assert_eq!(detail.progress.percentage, 0.0);
    }

    #[tokio::test]
    async fn test_blank_name_is_rejected() {
        let h = Harness::new();
        let err = h
            .stocktake
            .start(
                h.operator,
                StartSessionInput {
                    name: "   ".into(),
                    notes: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_complete_twice() {
        let h = Harness::new();
        h.in_stock("P100", "Black", 50, 1).await;
        let session = start(&h, "Once").await;

        let completed = h
            .stocktake
            .complete(session.id, h.operator, auto_adjust(false))
            .await
            .unwrap();
        assert_eq!(completed.session.status, SessionStatus::Completed);
        assert!(completed.session.completed_at.is_some());

        let err = h
            .stocktake
            .complete(session.id, h.operator, auto_adjust(false))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyCompleted(id) if id == session.id));

        let err = h.stocktake.cancel(session.id, h.operator).await.unwrap_err();
        assert!(matches!(err, AppError::SessionClosed { .. }));
    }

    #[tokio::test]
    async fn test_scan_after_close_is_rejected() {
        let h = Harness::new();
        let carton = h.in_stock("P100", "Black", 50, 1).await.remove(0);
        let session = start(&h, "Closed").await;
        h.stocktake
            .complete(session.id, h.operator, auto_adjust(false))
            .await
            .unwrap();

        let err = scan(&h, &session, &carton.barcode_id).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::SessionClosed {
                status: SessionStatus::Completed,
                ..
            }
        ));
        assert!(h.stocktake.list_scans(session.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel() {
        let h = Harness::new();
        let carton = h.in_stock("P100", "Black", 50, 1).await.remove(0);
        let session = start(&h, "Abandoned").await;

        let cancelled = h.stocktake.cancel(session.id, h.operator).await.unwrap();
        assert_eq!(cancelled.status, SessionStatus::Cancelled);

        assert!(matches!(
            scan(&h, &session, &carton.barcode_id).await,
            Err(AppError::SessionClosed { .. })
        ));
        assert!(matches!(
            h.stocktake
                .complete(session.id, h.operator, auto_adjust(true))
                .await,
            Err(AppError::SessionClosed {
                status: SessionStatus::Cancelled,
                ..
            })
        ));
        assert_eq!(h.item(&carton.barcode_id).await.status, StockStatus::InStock);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let h = Harness::new();
        let err = h.stocktake.detail(uuid::Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}

// ============================================================================
// Scan Classification Tests
// ============================================================================

mod scan_tests {
    use super::*;

    #[tokio::test]
    async fn test_found_then_already_scanned() {
        let h = Harness::new();
        let carton = h.in_stock("P100", "Black", 500, 1).await.remove(0);
        let session = start(&h, "Repeat").await;

        let first = scan(&h, &session, &carton.barcode_id).await.unwrap();
        assert_eq!(first.scan_result, ScanResult::Found);
        assert_eq!(first.message, "Found: P100 Black, 500 units");
        assert_eq!(first.progress.total_scanned, 1);
        assert_eq!(first.progress.percentage, 100.0);

        let second = scan(&h, &session, &carton.barcode_id).await.unwrap();
        assert_eq!(second.scan_result, ScanResult::AlreadyScanned);
        assert_eq!(second.message, "Already counted in this stocktake (P100 Black)");
        assert_eq!(second.progress.total_scanned, 1);

        let movements = h.store.list_movements(carton.id).await.unwrap();
        let verified: Vec<_> = movements
            .iter()
            .filter(|m| m.movement_type == MovementType::StocktakeVerified)
            .collect();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].quantity_change, 0);
        assert_eq!(verified[0].stocktake_session_id, Some(session.id));
        h.assert_ledger_consistent(&carton.barcode_id).await;
    }

    #[tokio::test]
    async fn test_picked_carton_is_wrong_status() {
        let h = Harness::new();
        let carton = h.in_stock("P100", "Black", 500, 1).await.remove(0);
        h.scan_out(&carton.barcode_id).await.unwrap();
        let session = start(&h, "Picked").await;

        let outcome = scan(&h, &session, &carton.barcode_id).await.unwrap();
        assert_eq!(outcome.scan_result, ScanResult::WrongStatus);
        assert_eq!(outcome.message, "Item is picked, not in stock (P100 Black, 500 units)");
        assert_eq!(outcome.item.map(|i| i.status), Some(StockStatus::Picked));
        assert_eq!(outcome.progress.total_scanned, 0);
    }

    #[tokio::test]
    async fn test_progress_is_rounded() {
        let h = Harness::new();
        let cartons = h.in_stock("P100", "Black", 10, 3).await;
        let session = start(&h, "Thirds").await;

        let outcome = scan(&h, &session, &cartons[0].barcode_id).await.unwrap();
        assert_eq!(outcome.progress.percentage, 33.3);
        let outcome = scan(&h, &session, &cartons[1].barcode_id).await.unwrap();
        assert_eq!(outcome.progress.percentage, 66.7);
    }

    #[tokio::test]
    async fn test_found_outside_snapshot_caps_progress() {
        let h = Harness::new();
        let expected = h.in_stock("P100", "Black", 10, 1).await.remove(0);
        let session = start(&h, "Late arrival").await;
        let late = h.in_stock("P100", "Black", 10, 1).await.remove(0);

        scan(&h, &session, &expected.barcode_id).await.unwrap();
        let outcome = scan(&h, &session, &late.barcode_id).await.unwrap();
        assert_eq!(outcome.scan_result, ScanResult::Found);
        assert_eq!(outcome.progress.percentage, 100.0);

        let report = h.stocktake.discrepancies(session.id).await.unwrap();
        assert_eq!(report.found_outside_snapshot, vec![late.id]);
        assert_eq!(report.summary.total_expected, 1);
        assert_eq!(report.summary.total_found, 1);
        assert_eq!(report.summary.total_missing, 0);
    }

    #[tokio::test]
    async fn test_list_scans_newest_first() {
        let h = Harness::new();
        let cartons = h.in_stock("P100", "Black", 10, 3).await;
        let session = start(&h, "Order").await;
        for carton in &cartons {
            scan(&h, &session, &carton.barcode_id).await.unwrap();
        }

        let scans = h.stocktake.list_scans(session.id, None).await.unwrap();
        let barcodes: Vec<_> = scans.iter().map(|s| s.barcode_scanned.as_str()).collect();
        assert_eq!(
            barcodes,
            vec![
                cartons[2].barcode_id.as_str(),
                cartons[1].barcode_id.as_str(),
                cartons[0].barcode_id.as_str(),
            ]
        );

        let limited = h.stocktake.list_scans(session.id, Some(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
    }
}

// ============================================================================
// Reconciliation Tests
// ============================================================================

mod reconciliation_tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_without_adjustment() {
        let h = Harness::new();
        let (session, cartons) = counted_floor(&h).await;

        let result = h
            .stocktake
            .complete(session.id, h.operator, auto_adjust(false))
            .await
            .unwrap();

        assert_eq!(result.summary.total_expected, 10);
        assert_eq!(result.summary.total_found, 8);
        assert_eq!(result.summary.total_missing, 2);
        assert_eq!(result.summary.total_unexpected, 1);
        assert_eq!(result.session.total_discrepancies, 3);
        assert!(!result.auto_adjusted);
        assert_eq!(result.adjusted, 0);

        for carton in &cartons[8..] {
            assert_eq!(h.item(&carton.barcode_id).await.status, StockStatus::InStock);
            assert_eq!(h.store.list_movements(carton.id).await.unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_complete_with_adjustment() {
        let h = Harness::new();
        let (session, cartons) = counted_floor(&h).await;

        let result = h
            .stocktake
            .complete(session.id, h.operator, auto_adjust(true))
            .await
            .unwrap();
        assert!(result.auto_adjusted);
        assert_eq!(result.adjusted, 2);
        assert_eq!(result.skipped, 0);

        for carton in &cartons[8..] {
            let item = h.item(&carton.barcode_id).await;
            assert_eq!(item.status, StockStatus::Scrapped);

            let movements = h.store.list_movements(item.id).await.unwrap();
            let last = movements.last().unwrap();
            assert_eq!(last.movement_type, MovementType::Adjustment);
            assert_eq!(last.quantity_change, -50);
            assert_eq!(last.status_after, StockStatus::Scrapped);
            assert_eq!(
                last.reason.as_deref(),
                Some("Stocktake discrepancy: item not found during June count")
            );
            h.assert_ledger_consistent(&carton.barcode_id).await;
        }
        for carton in &cartons[..8] {
            assert_eq!(h.item(&carton.barcode_id).await.status, StockStatus::InStock);
        }
    }

    #[tokio::test]
    async fn test_auto_adjust_skips_cartons_already_gone() {
        let h = Harness::new();
        let (session, cartons) = counted_floor(&h).await;
        h.scan_out(&cartons[9].barcode_id).await.unwrap();

        let result = h
            .stocktake
            .complete(session.id, h.operator, auto_adjust(true))
            .await
            .unwrap();

        assert_eq!(result.summary.total_missing, 2);
        assert_eq!(result.adjusted, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(h.item(&cartons[9].barcode_id).await.status, StockStatus::Picked);
    }

    #[tokio::test]
    async fn test_discrepancy_report() {
        let h = Harness::new();
        let (session, cartons) = counted_floor(&h).await;

        let report = h.stocktake.discrepancies(session.id).await.unwrap();
        assert_eq!(report.session_status, SessionStatus::InProgress);
        assert_eq!(report.missing_items.len(), 2);
        for missing in &report.missing_items {
            assert!(cartons[8..].iter().any(|c| c.id == missing.stock_item_id));
            assert_eq!(missing.last_movement, Some(MovementType::StockIn));
            assert!(missing.last_movement_date.is_some());
        }
        assert_eq!(report.unexpected_scans.len(), 1);
        assert_eq!(report.unexpected_scans[0].scan_result, ScanResult::NotInSystem);
        assert_eq!(report.summary.total_discrepancies(), 3);

        // Report reflects the same snapshot after completion
        h.stocktake
            .complete(session.id, h.operator, auto_adjust(false))
            .await
            .unwrap();
        let after = h.stocktake.discrepancies(session.id).await.unwrap();
        assert_eq!(after.session_status, SessionStatus::Completed);
        assert_eq!(after.summary, report.summary);
    }
}

// ============================================================================
// Concurrency Tests
// ============================================================================

mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_scans_count_once() {
        let h = Harness::new();
        let carton = h.in_stock("P100", "Black", 500, 1).await.remove(0);
        let session = start(&h, "Race").await;

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let h = h.clone();
                let session = session.clone();
                let barcode = carton.barcode_id.clone();
                tokio::spawn(async move { scan(&h, &session, &barcode).await })
            })
            .collect();

        let mut found = 0;
        let mut repeated = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap().scan_result {
                ScanResult::Found => found += 1,
                ScanResult::AlreadyScanned => repeated += 1,
                other => panic!("unexpected scan result {:?}", other),
            }
        }
        assert_eq!(found, 1);
        assert_eq!(repeated, 11);

        let verified = h
            .store
            .list_movements(carton.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.movement_type == MovementType::StocktakeVerified)
            .count();
        assert_eq!(verified, 1);

        let detail = h.stocktake.detail(session.id).await.unwrap();
        assert_eq!(detail.progress.total_scanned, 1);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod property_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_found_plus_missing_is_expected(
            on_shelf in 0u32..12,
            counted in prop::collection::vec(any::<bool>(), 12),
            strays in 0usize..4,
            repeats in 0usize..3,
        ) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async {
                let h = Harness::new();
                let cartons = if on_shelf > 0 {
                    h.in_stock("P100", "Black", 10, on_shelf).await
                } else {
                    Vec::new()
                };
                let session = start(&h, "Property").await;

                let mut scanned = 0i64;
                for (carton, count) in cartons.iter().zip(&counted) {
                    if *count {
                        scan(&h, &session, &carton.barcode_id).await.unwrap();
                        scanned += 1;
                    }
                }
                for i in 0..strays {
                    scan(&h, &session, &format!("STRAY-{}", i)).await.unwrap();
                }
                if let Some(first) = cartons.iter().zip(&counted).find(|(_, c)| **c) {
                    for _ in 0..repeats {
                        scan(&h, &session, &first.0.barcode_id).await.unwrap();
                    }
                }

                let result = h
                    .stocktake
                    .complete(session.id, h.operator, auto_adjust(false))
                    .await
                    .unwrap();
                let summary = result.summary;

                assert_eq!(summary.total_expected, i64::from(on_shelf));
                assert_eq!(summary.total_found, scanned);
                assert_eq!(summary.total_found + summary.total_missing, summary.total_expected);
                // Repeat scans are feedback, not discrepancies
                assert_eq!(summary.total_unexpected, strays as i64);
            });
        }
    }
}
