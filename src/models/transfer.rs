use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lot::ManufactureCode;

/// Lifecycle of a transfer order. Execution is atomic across all lines,
/// so there is no partially-completed state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Completed,
    Cancelled,
}

impl TransferStatus {
    pub fn can_transition(self, to: TransferStatus) -> bool {
        matches!(
            (self, to),
            (TransferStatus::Pending, TransferStatus::Completed)
                | (TransferStatus::Pending, TransferStatus::Cancelled)
        )
    }
}

/// One stock movement instruction inside a transfer order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub batch: String,
    pub manufacture_code: ManufactureCode,
    pub quantity: i32,
    pub from_location: String,
    pub to_location: String,
}

/// Instruction to move stock between locations, same or cross warehouse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferOrder {
    pub id: Uuid,
    pub source_warehouse_id: Uuid,
    pub destination_warehouse_id: Uuid,
    pub status: TransferStatus,
    pub lines: Vec<TransferLine>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
}
