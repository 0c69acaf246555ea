//! Shared domain types for the carton ledger
//!
//! Pure logic with no I/O: carton lifecycle, guarded transitions, movement
//! replay, threshold evaluation and stocktake reconciliation. Used by the
//! backend and, through WASM, by the scanning client.

pub mod barcode;
pub mod models;
pub mod transition;
pub mod types;
pub mod validation;

pub use models::*;
pub use transition::*;
pub use types::*;
pub use validation::*;
