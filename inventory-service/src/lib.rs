pub mod alerts;
pub mod api;
pub mod ledger;
pub mod models;
pub mod reservations;
pub mod schema;
pub mod sweeper;

pub use ledger::InventoryLedger;
pub use reservations::{ReservationKey, ReservationManager, ReserveRequest};
pub use sweeper::ReservationSweeper;
