//! Discrepancy report export

use csv::Writer;
use serde::Serialize;
use shared::DiscrepancyReport;

use crate::error::{AppError, AppResult};

/// One CSV line: either a missing carton or an unexpected scan
#[derive(Debug, Serialize)]
struct DiscrepancyRow<'a> {
    kind: &'static str,
    barcode: &'a str,
    product_code: &'a str,
    colour: &'a str,
    quantity: Option<i32>,
    status: &'a str,
    last_movement: &'a str,
    at: String,
}

pub struct ReportingService;

impl ReportingService {
    /// Missing cartons first, then unexpected scans in recording order
    pub fn discrepancy_csv(report: &DiscrepancyReport) -> AppResult<String> {
        let mut writer = Writer::from_writer(Vec::new());

        for item in &report.missing_items {
            writer
                .serialize(DiscrepancyRow {
                    kind: "missing",
                    barcode: &item.barcode_id,
                    product_code: &item.product_code,
                    colour: &item.colour,
                    quantity: Some(item.quantity),
                    status: item.status.as_str(),
                    last_movement: item.last_movement.map(|m| m.as_str()).unwrap_or(""),
                    at: item
                        .last_movement_date
                        .map(|d| d.to_rfc3339())
                        .unwrap_or_default(),
                })
                .map_err(csv_error)?;
        }

        for scan in &report.unexpected_scans {
            writer
                .serialize(DiscrepancyRow {
                    kind: "unexpected",
                    barcode: &scan.barcode_scanned,
                    product_code: "",
                    colour: "",
                    quantity: None,
                    status: scan.scan_result.as_str(),
                    last_movement: "",
                    at: scan.scanned_at.to_rfc3339(),
                })
                .map_err(csv_error)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| AppError::Internal(format!("CSV flush failed: {}", e)))?;
        String::from_utf8(bytes).map_err(|e| AppError::Internal(format!("CSV not UTF-8: {}", e)))
    }
}

fn csv_error(err: csv::Error) -> AppError {
    AppError::Internal(format!("CSV export failed: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use shared::{
        DiscrepancySummary, MissingItem, MovementType, ScanResult, SessionStatus, StockStatus,
        UnexpectedScan,
    };
    use uuid::Uuid;

    #[test]
    fn test_csv_has_header_and_one_line_per_discrepancy() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap();
        let report = DiscrepancyReport {
            session_id: Uuid::nil(),
            session_status: SessionStatus::Completed,
            missing_items: vec![MissingItem {
                stock_item_id: Uuid::nil(),
                barcode_id: "RJ-P100-BLK-20240601-001".into(),
                product_code: "P100".into(),
                colour: "Black".into(),
                quantity: 500,
                status: StockStatus::InStock,
                last_movement: Some(MovementType::StockIn),
                last_movement_date: Some(at),
            }],
            unexpected_scans: vec![UnexpectedScan {
                barcode_scanned: "UNKNOWN-1".into(),
                scan_result: ScanResult::NotInSystem,
                scanned_at: at,
            }],
            found_outside_snapshot: vec![],
            summary: DiscrepancySummary {
                total_expected: 1,
                total_found: 0,
                total_missing: 1,
                total_unexpected: 1,
            },
        };

        let csv = ReportingService::discrepancy_csv(&report).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "kind,barcode,product_code,colour,quantity,status,last_movement,at"
        );
        assert!(lines[1].starts_with("missing,RJ-P100-BLK-20240601-001,P100,Black,500,in_stock,stock_in,"));
        assert!(lines[2].starts_with("unexpected,UNKNOWN-1,,,,not_in_system,,"));
    }
}
