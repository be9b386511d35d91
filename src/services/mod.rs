// Ledger and registries
pub mod capacity;
pub mod holds;
pub mod inventory;
pub mod unique_units;

// Physical-goods workflows
pub mod orders;
pub mod receiving;
pub mod returns;
pub mod transfers;
