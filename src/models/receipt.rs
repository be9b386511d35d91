use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lot::ManufactureCode;

/// Lifecycle of an inbound receipt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    PartiallyReceived,
    Received,
    PartiallyPutaway,
    Completed,
    Cancelled,
}

impl ReceiptStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReceiptStatus::Completed | ReceiptStatus::Cancelled)
    }

    /// Closed transition table; everything not listed is illegal.
    pub fn can_transition(self, to: ReceiptStatus) -> bool {
        use ReceiptStatus::*;
        match (self, to) {
            (Pending, PartiallyReceived)
            | (Pending, Received)
            | (PartiallyReceived, Received)
            | (Received, PartiallyPutaway)
            | (Received, Completed)
            | (PartiallyPutaway, Completed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Whether item receipt events are accepted in this state.
    pub fn accepts_receiving(self) -> bool {
        matches!(self, ReceiptStatus::Pending | ReceiptStatus::PartiallyReceived)
    }

    /// Whether put-away events are accepted in this state.
    pub fn accepts_putaway(self) -> bool {
        matches!(self, ReceiptStatus::Received | ReceiptStatus::PartiallyPutaway)
    }
}

/// Stock placed into a storage location during put-away, tracked so a
/// cancellation can reverse exactly what was applied.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub location: String,
    pub quantity: i32,
}

/// One expected product line inside a container.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub batch: String,
    pub manufacture_code: ManufactureCode,
    pub expected_qty: i32,
    pub received_qty: i32,
    pub putaway_qty: i32,
    pub unit_cost: Option<Decimal>,
    pub placements: Vec<Placement>,
}

impl ReceiptItem {
    pub fn remaining_to_receive(&self) -> i32 {
        self.expected_qty - self.received_qty
    }

    pub fn remaining_at_dock(&self) -> i32 {
        self.received_qty - self.putaway_qty
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReceiptContainer {
    pub id: Uuid,
    pub container_no: String,
    pub items: Vec<ReceiptItem>,
}

/// Inbound receipt: supplier delivery of one or more containers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundReceipt {
    pub id: Uuid,
    pub supplier: String,
    pub warehouse_id: Uuid,
    pub arrival_date: NaiveDate,
    pub status: ReceiptStatus,
    pub containers: Vec<ReceiptContainer>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InboundReceipt {
    pub fn items(&self) -> impl Iterator<Item = &ReceiptItem> {
        self.containers.iter().flat_map(|c| c.items.iter())
    }

    pub fn find_item(&self, item_id: Uuid) -> Option<&ReceiptItem> {
        self.items().find(|i| i.id == item_id)
    }

    pub fn find_item_mut(&mut self, item_id: Uuid) -> Option<&mut ReceiptItem> {
        self.containers
            .iter_mut()
            .flat_map(|c| c.items.iter_mut())
            .find(|i| i.id == item_id)
    }

    pub fn total_expected(&self) -> i32 {
        self.items().map(|i| i.expected_qty).sum()
    }

    pub fn total_received(&self) -> i32 {
        self.items().map(|i| i.received_qty).sum()
    }

    pub fn total_putaway(&self) -> i32 {
        self.items().map(|i| i.putaway_qty).sum()
    }

    /// Status implied by the aggregate received/put-away quantities.
    pub fn derived_status(&self) -> ReceiptStatus {
        let expected = self.total_expected();
        let received = self.total_received();
        let putaway = self.total_putaway();
        if received == 0 {
            ReceiptStatus::Pending
        } else if received < expected {
            ReceiptStatus::PartiallyReceived
        } else if putaway == 0 {
            ReceiptStatus::Received
        } else if putaway < received {
            ReceiptStatus::PartiallyPutaway
        } else {
            ReceiptStatus::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(expected: i32, received: i32, putaway: i32) -> ReceiptItem {
        ReceiptItem {
            id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            batch: "B1".into(),
            manufacture_code: ManufactureCode::parse("0122").unwrap(),
            expected_qty: expected,
            received_qty: received,
            putaway_qty: putaway,
            unit_cost: None,
            placements: Vec::new(),
        }
    }

    fn receipt(items: Vec<ReceiptItem>) -> InboundReceipt {
        let now = Utc::now();
        InboundReceipt {
            id: Uuid::new_v4(),
            supplier: "Acme".into(),
            warehouse_id: Uuid::new_v4(),
            arrival_date: now.date_naive(),
            status: ReceiptStatus::Pending,
            containers: vec![ReceiptContainer {
                id: Uuid::new_v4(),
                container_no: "C1".into(),
                items,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn derived_status_follows_quantities() {
        assert_eq!(receipt(vec![item(10, 0, 0)]).derived_status(), ReceiptStatus::Pending);
        assert_eq!(
            receipt(vec![item(10, 4, 0)]).derived_status(),
            ReceiptStatus::PartiallyReceived
        );
        assert_eq!(
            receipt(vec![item(10, 10, 0)]).derived_status(),
            ReceiptStatus::Received
        );
        assert_eq!(
            receipt(vec![item(10, 10, 3)]).derived_status(),
            ReceiptStatus::PartiallyPutaway
        );
        assert_eq!(
            receipt(vec![item(10, 10, 10)]).derived_status(),
            ReceiptStatus::Completed
        );
    }

    #[test]
    fn partial_state_spans_items() {
        // One item fully received, the other untouched: the receipt as a
        // whole is only partially received.
        let r = receipt(vec![item(5, 5, 0), item(5, 0, 0)]);
        assert_eq!(r.derived_status(), ReceiptStatus::PartiallyReceived);
    }

    #[test]
    fn cancel_is_reachable_from_every_open_state() {
        use ReceiptStatus::*;
        for from in [Pending, PartiallyReceived, Received, PartiallyPutaway] {
            assert!(from.can_transition(Cancelled), "{} should cancel", from);
        }
        assert!(!Completed.can_transition(Cancelled));
        assert!(!Cancelled.can_transition(Cancelled));
    }

    #[test]
    fn putaway_requires_fully_received_receipt() {
        assert!(!ReceiptStatus::PartiallyReceived.accepts_putaway());
        assert!(ReceiptStatus::Received.accepts_putaway());
        assert!(ReceiptStatus::PartiallyPutaway.accepts_putaway());
    }
}
