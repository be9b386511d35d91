use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lot::ManufactureCode;

/// Condition an inspector assigns to returned units.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum ReturnCondition {
    Sellable,
    Damaged,
    Scrap,
    Quarantine,
}

/// What happens to inspected units of a given condition.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Quantity re-enters the ledger at a chosen put-away location.
    Restock,
    /// Quantity is recorded on the return item but never re-enters
    /// available stock.
    #[default]
    RecordOnly,
}

/// Lifecycle of a return. A return is terminal only once every item has
/// been fully inspected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum ReturnStatus {
    Open,
    Completed,
}

/// One inspection pass over part of a return item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InspectionRecord {
    pub condition: ReturnCondition,
    pub disposition: Disposition,
    pub quantity: i32,
    /// Put-away location for restocked quantity.
    pub location: Option<String>,
    pub inspected_by: String,
    pub inspected_at: DateTime<Utc>,
}

/// Expected vs. inspected state of one returned product line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReturnItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub manufacture_code: ManufactureCode,
    /// Batch the units originally shipped under, when known.
    pub batch: Option<String>,
    pub expected_qty: i32,
    pub processed_qty: i32,
    pub inspections: Vec<InspectionRecord>,
}

impl ReturnItem {
    pub fn remaining_to_inspect(&self) -> i32 {
        self.expected_qty - self.processed_qty
    }

    pub fn is_inspected(&self) -> bool {
        self.processed_qty == self.expected_qty
    }
}

/// A customer return (RMA) referencing an original outbound order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReturnOrder {
    pub id: Uuid,
    pub order_id: Uuid,
    pub warehouse_id: Uuid,
    pub rma_number: String,
    pub status: ReturnStatus,
    pub items: Vec<ReturnItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReturnOrder {
    pub fn find_item_mut(&mut self, item_id: Uuid) -> Option<&mut ReturnItem> {
        self.items.iter_mut().find(|i| i.id == item_id)
    }

    pub fn total_processed(&self) -> i32 {
        self.items.iter().map(|i| i.processed_qty).sum()
    }

    pub fn all_items_inspected(&self) -> bool {
        self.items.iter().all(ReturnItem::is_inspected)
    }
}
