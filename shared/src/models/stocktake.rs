//! Stocktake session models and reconciliation

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MovementType, StockItem, StockStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        *self == SessionStatus::InProgress
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::InProgress => write!(f, "in progress"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Classification of a single floor scan during a stocktake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanResult {
    Found,
    NotInSystem,
    AlreadyScanned,
    WrongStatus,
}

impl ScanResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanResult::Found => "found",
            ScanResult::NotInSystem => "not_in_system",
            ScanResult::AlreadyScanned => "already_scanned",
            ScanResult::WrongStatus => "wrong_status",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "found" => Some(ScanResult::Found),
            "not_in_system" => Some(ScanResult::NotInSystem),
            "already_scanned" => Some(ScanResult::AlreadyScanned),
            "wrong_status" => Some(ScanResult::WrongStatus),
            _ => None,
        }
    }

    /// Scans that show up in the discrepancy report as unexpected
    pub fn is_unexpected(&self) -> bool {
        matches!(self, ScanResult::NotInSystem | ScanResult::WrongStatus)
    }
}

/// Classify a stocktake scan.
///
/// `already_found` must be read atomically with the insert of the scan row.
pub fn classify_scan(item: Option<&StockItem>, already_found: bool) -> ScanResult {
    match item {
        None => ScanResult::NotInSystem,
        Some(_) if already_found => ScanResult::AlreadyScanned,
        Some(item) if item.status != StockStatus::InStock => ScanResult::WrongStatus,
        Some(_) => ScanResult::Found,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StocktakeSession {
    pub id: Uuid,
    pub name: String,
    pub status: SessionStatus,
    pub started_by: Uuid,
    pub completed_by: Option<Uuid>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Count of in-stock cartons frozen at session start
    pub total_expected: i32,
    pub total_scanned: i32,
    pub total_discrepancies: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StocktakeScan {
    pub id: Uuid,
    pub session_id: Uuid,
    pub barcode_scanned: String,
    pub stock_item_id: Option<Uuid>,
    pub scan_result: ScanResult,
    pub scanned_by: Uuid,
    pub scanned_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Live progress of a session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub total_expected: i64,
    pub total_scanned: i64,
    pub percentage: f64,
}

impl SessionProgress {
    pub fn compute(total_scanned: i64, total_expected: i64) -> Self {
        let percentage = if total_expected > 0 {
            let raw = total_scanned as f64 / total_expected as f64 * 100.0;
            ((raw * 10.0).round() / 10.0).min(100.0)
        } else {
            0.0
        };

        Self {
            total_expected,
            total_scanned,
            percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingItem {
    pub stock_item_id: Uuid,
    pub barcode_id: String,
    pub product_code: String,
    pub colour: String,
    pub quantity: i32,
    pub status: StockStatus,
    pub last_movement: Option<MovementType>,
    pub last_movement_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnexpectedScan {
    pub barcode_scanned: String,
    pub scan_result: ScanResult,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscrepancySummary {
    pub total_expected: i64,
    pub total_found: i64,
    pub total_missing: i64,
    pub total_unexpected: i64,
}

impl DiscrepancySummary {
    pub fn total_discrepancies(&self) -> i64 {
        self.total_missing + self.total_unexpected
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscrepancyReport {
    pub session_id: Uuid,
    pub session_status: SessionStatus,
    pub missing_items: Vec<MissingItem>,
    pub unexpected_scans: Vec<UnexpectedScan>,
    /// Cartons found on the floor that entered stock after the session started
    pub found_outside_snapshot: Vec<Uuid>,
    pub summary: DiscrepancySummary,
}

/// Outcome of comparing the frozen expectation against the session's scans
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub missing: Vec<StockItem>,
    pub found_outside_snapshot: Vec<Uuid>,
    pub unexpected: Vec<StocktakeScan>,
    pub summary: DiscrepancySummary,
}

/// Compare what the ledger expected with what the floor reported
///
/// `expected` is the frozen expectation captured at session start (current
/// item state, in the order the snapshot was taken). `found` is the set of
/// carton ids with a `found` scan in the session.
pub fn reconcile(
    expected: Vec<StockItem>,
    found: &HashSet<Uuid>,
    scans: Vec<StocktakeScan>,
) -> Reconciliation {
    let expected_ids: HashSet<Uuid> = expected.iter().map(|item| item.id).collect();
    let total_expected = expected.len() as i64;

    let (found_in_snapshot, missing): (Vec<StockItem>, Vec<StockItem>) = expected
        .into_iter()
        .partition(|item| found.contains(&item.id));

    let mut found_outside_snapshot: Vec<Uuid> = found
        .iter()
        .filter(|id| !expected_ids.contains(id))
        .copied()
        .collect();
    found_outside_snapshot.sort();

    let unexpected: Vec<StocktakeScan> = scans
        .into_iter()
        .filter(|scan| scan.scan_result.is_unexpected())
        .collect();

    let summary = DiscrepancySummary {
        total_expected,
        total_found: found_in_snapshot.len() as i64,
        total_missing: missing.len() as i64,
        total_unexpected: unexpected.len() as i64,
    };

    Reconciliation {
        missing,
        found_outside_snapshot,
        unexpected,
        summary,
    }
}
