//! WebAssembly module for the carton scanning client
//!
//! Provides client-side helpers for:
//! - Barcode normalisation and validation before a scan is sent
//! - Threshold banding for the stock dashboard
//! - Stocktake progress and scan feedback tones
//! - Offline input validation (reasons, repack quantities, label batches)

use chrono::NaiveDate;
use serde::Deserialize;
use wasm_bindgen::prelude::*;

// Re-export shared types for use in JavaScript
pub use shared::models::*;
pub use shared::types::*;
pub use shared::validation::*;

use shared::barcode;

fn js_error(message: impl AsRef<str>) -> JsValue {
    JsValue::from_str(message.as_ref())
}

/// Trim scanner noise and reject input that can never be a barcode
#[wasm_bindgen]
pub fn normalize_scanned_barcode(raw: &str) -> Result<String, JsValue> {
    let barcode = barcode::normalize(raw);
    barcode::validate_barcode(&barcode).map_err(js_error)?;
    Ok(barcode)
}

/// Band for a total: "red", "amber" or "green"
#[wasm_bindgen]
pub fn threshold_band(total_units: f64, red_threshold: i32, amber_threshold: i32) -> String {
    let total = if total_units.is_finite() { total_units.floor() as i64 } else { 0 };
    threshold_status(total, red_threshold, amber_threshold)
        .as_str()
        .to_string()
}

/// Dashboard colour for a band; unconfigured products render grey
#[wasm_bindgen]
pub fn threshold_colour(status: &str) -> String {
    match ThresholdStatus::from_str(status) {
        Some(ThresholdStatus::Red) => "#dc2626",
        Some(ThresholdStatus::Amber) => "#f59e0b",
        Some(ThresholdStatus::Green) => "#16a34a",
        None => "#9ca3af",
    }
    .to_string()
}

/// Stocktake progress, one decimal place, capped at 100
#[wasm_bindgen]
pub fn stocktake_progress(total_scanned: u32, total_expected: u32) -> f64 {
    SessionProgress::compute(i64::from(total_scanned), i64::from(total_expected)).percentage
}

#[derive(Deserialize)]
struct ScanEnvelope {
    success: bool,
    #[serde(default)]
    scan_result: Option<ScanResult>,
    #[serde(default)]
    reason: Option<String>,
}

/// Beep/flash tone for a scan response: "success", "warning" or "error"
///
/// Repeat scans warn rather than fail so operators keep going.
#[wasm_bindgen]
pub fn scan_feedback_tone(response_json: &str) -> Result<String, JsValue> {
    let envelope: ScanEnvelope = serde_json::from_str(response_json)
        .map_err(|e| js_error(format!("Invalid scan response JSON: {}", e)))?;

    let tone = match (envelope.success, envelope.scan_result, envelope.reason.as_deref()) {
        (true, Some(ScanResult::AlreadyScanned), _) => "warning",
        (true, Some(result), _) if result.is_unexpected() => "error",
        (true, _, _) => "success",
        (false, _, Some("already_scanned")) => "warning",
        (false, _, _) => "error",
    };
    Ok(tone.to_string())
}

/// Check a scrap or adjustment reason before submitting
#[wasm_bindgen]
pub fn check_reason(reason: &str) -> Result<(), JsValue> {
    validate_reason(reason).map_err(js_error)
}

/// Check a repack split before submitting
#[wasm_bindgen]
pub fn check_units_taken(units_taken: i32, carton_quantity: i32) -> Result<(), JsValue> {
    validate_units_taken(units_taken, carton_quantity).map_err(js_error)
}

/// Barcodes a label batch would print, assuming nothing exists yet under the
/// stem. The server allocates the real sequence.
#[wasm_bindgen]
pub fn preview_label_barcodes(
    prefix: &str,
    product_code: &str,
    colour: &str,
    production_date: &str,
    count: u32,
) -> Result<js_sys::Array, JsValue> {
    validate_product_code(product_code).map_err(js_error)?;
    validate_colour(colour).map_err(js_error)?;
    validate_label_count(count).map_err(js_error)?;
    let date = NaiveDate::parse_from_str(production_date, "%Y-%m-%d")
        .map_err(|e| js_error(format!("Invalid production date: {}", e)))?;

    let stem = barcode::barcode_stem(prefix, product_code, colour, date);
    Ok(barcode::allocate(&stem, 0, count)
        .into_iter()
        .map(|code| JsValue::from_str(&code))
        .collect())
}

/// Log a rejected scan to the browser console
#[wasm_bindgen]
pub fn log_scan_rejection(barcode: &str, message: &str) {
    web_sys::console::warn_1(&JsValue::from_str(&format!(
        "scan rejected: {} ({})",
        message, barcode
    )));
}
