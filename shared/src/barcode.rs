//! Carton barcode format
//!
//! Barcodes look like `RJ-P100-BLK-20240601-007`: prefix, product code,
//! colour short code, production date and a per-stem sequence. The sequence
//! is zero padded to three digits and keeps growing past 999.

use chrono::NaiveDate;

pub const DEFAULT_PREFIX: &str = "RJ";

/// Longest barcode the scanners are expected to produce
pub const MAX_BARCODE_LEN: usize = 100;

const COLOUR_SHORT_CODES: &[(&str, &str)] = &[
    ("black", "BLK"),
    ("white", "WHT"),
    ("yellow", "YEL"),
    ("natural", "NAT"),
    ("red", "RED"),
    ("blue", "BLU"),
    ("green", "GRN"),
    ("grey", "GRY"),
    ("gray", "GRY"),
    ("orange", "ORG"),
    ("brown", "BRN"),
    ("clear", "CLR"),
];

/// Three letter code printed in the barcode for a colour name.
///
/// Colours without a fixed code use their first three ASCII letters or
/// digits, so the code is empty when the name has none.
pub fn colour_short(colour: &str) -> String {
    let trimmed = colour.trim();
    let lower = trimmed.to_lowercase();

    COLOUR_SHORT_CODES
        .iter()
        .find(|(name, _)| *name == lower)
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| {
            trimmed
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .take(3)
                .collect::<String>()
                .to_ascii_uppercase()
        })
}

/// Everything before the sequence number, including the trailing dash
pub fn barcode_stem(prefix: &str, product_code: &str, colour: &str, date: NaiveDate) -> String {
    format!(
        "{}-{}-{}-{}-",
        prefix,
        product_code.trim(),
        colour_short(colour),
        date.format("%Y%m%d")
    )
}

pub fn format_barcode(stem: &str, sequence: u32) -> String {
    format!("{}{:03}", stem, sequence)
}

/// Trailing sequence number of a generated barcode
pub fn parse_sequence(barcode: &str) -> Option<u32> {
    barcode.rsplit('-').next()?.parse().ok()
}

/// Highest sequence among `existing` barcodes that share `stem`
pub fn max_sequence<'a, I>(stem: &str, existing: I) -> u32
where
    I: IntoIterator<Item = &'a str>,
{
    existing
        .into_iter()
        .filter_map(|barcode| barcode.strip_prefix(stem))
        .filter_map(|rest| rest.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
}

/// `count` consecutive barcodes following `current_max`
pub fn allocate(stem: &str, current_max: u32, count: u32) -> Vec<String> {
    (1..=count)
        .map(|offset| format_barcode(stem, current_max + offset))
        .collect()
}

/// Scanners add whitespace and the odd carriage return
pub fn normalize(raw: &str) -> String {
    raw.trim().to_string()
}

/// Reject input that can never be a carton barcode
pub fn validate_barcode(raw: &str) -> Result<(), &'static str> {
    let barcode = raw.trim();
    if barcode.is_empty() {
        return Err("Barcode is required");
    }
    if barcode.len() > MAX_BARCODE_LEN {
        return Err("Barcode is too long");
    }
    if !barcode.chars().all(|c| c.is_ascii_graphic()) {
        return Err("Barcode contains invalid characters");
    }
    Ok(())
}
