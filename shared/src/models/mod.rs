//! Domain models for the carton ledger

mod movement;
mod stock;
mod stocktake;
mod threshold;

pub use movement::*;
pub use stock::*;
pub use stocktake::*;
pub use threshold::*;
