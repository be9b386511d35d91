use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lot::ManufactureCode;

/// Append-only audit record written for every ledger mutation.
///
/// Moves produce two records, one negative at the source and one positive
/// at the destination, so the sum of deltas per product always equals the
/// on-hand total.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: Uuid,
    pub product_id: Uuid,
    pub warehouse_id: Uuid,
    pub location: String,
    pub batch: String,
    pub manufacture_code: ManufactureCode,
    pub quantity_delta: i32,
    pub previous_quantity: i32,
    pub new_quantity: i32,
    pub reason: String,
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
}
