//! Validation helpers shared by the server and the scanning client

/// Most labels a single request may print
pub const MAX_LABELS_PER_BATCH: u32 = 500;

/// Threshold levels must satisfy `0 <= red <= amber`
pub fn validate_threshold(red: i32, amber: i32) -> Result<(), &'static str> {
    if red < 0 || amber < 0 {
        return Err("Thresholds cannot be negative");
    }
    if red > amber {
        return Err("Red threshold must not exceed amber threshold");
    }
    Ok(())
}

/// A repack must leave something in both halves
pub fn validate_units_taken(units_taken: i32, carton_quantity: i32) -> Result<(), String> {
    if units_taken <= 0 {
        return Err(format!("Units taken must be positive, got {}", units_taken));
    }
    if units_taken >= carton_quantity {
        return Err(format!(
            "Units taken ({}) must be less than carton quantity ({})",
            units_taken, carton_quantity
        ));
    }
    Ok(())
}

pub fn validate_quantity_per_carton(quantity: i32) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Quantity per carton must be positive");
    }
    Ok(())
}

pub fn validate_label_count(count: u32) -> Result<(), &'static str> {
    if count == 0 {
        return Err("At least one label is required");
    }
    if count > MAX_LABELS_PER_BATCH {
        return Err("Too many labels in one batch");
    }
    Ok(())
}

/// Reasons are mandatory for manual adjustments and scrapping
pub fn validate_reason(reason: &str) -> Result<(), &'static str> {
    if reason.trim().is_empty() {
        return Err("A reason is required");
    }
    Ok(())
}

/// Product codes go into barcodes, so no whitespace or dashes
pub fn validate_product_code(code: &str) -> Result<(), &'static str> {
    let code = code.trim();
    if code.is_empty() {
        return Err("Product code is required");
    }
    if code.len() > 50 {
        return Err("Product code must be at most 50 characters");
    }
    if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '/' || c == '.') {
        return Err("Product code may only contain letters, digits, '_', '/' and '.'");
    }
    Ok(())
}

/// The colour must yield a non-empty barcode code
pub fn validate_colour(colour: &str) -> Result<(), &'static str> {
    let colour = colour.trim();
    if colour.is_empty() {
        return Err("Colour is required");
    }
    if colour.chars().count() > 50 {
        return Err("Colour must be at most 50 characters");
    }
    if crate::barcode::colour_short(colour).is_empty() {
        return Err("Colour must contain at least one ASCII letter or digit");
    }
    Ok(())
}

pub fn validate_session_name(name: &str) -> Result<(), &'static str> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Session name is required");
    }
    if name.chars().count() > 200 {
        return Err("Session name must be at most 200 characters");
    }
    Ok(())
}
