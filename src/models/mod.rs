pub mod location;
pub mod lot;
pub mod movement;
pub mod order;
pub mod product;
pub mod receipt;
pub mod rma;
pub mod transfer;
pub mod unique_unit;
