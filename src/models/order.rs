use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::lot::ManufactureCode;

/// Lifecycle of an outbound order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum OrderStatus {
    New,
    PendingPick,
    PartiallyPicked,
    Picked,
    Staged,
    Assigned,
    Shipped,
    OutForDelivery,
    Delivered,
    PartiallyReturned,
    Returned,
    Cancelled,
}

impl OrderStatus {
    /// Cancellation is permitted for any pre-shipped, pre-assignment state.
    pub fn is_cancellable(self) -> bool {
        use OrderStatus::*;
        matches!(self, New | PendingPick | PartiallyPicked | Picked | Staged)
    }

    /// Closed transition table; everything not listed is illegal.
    pub fn can_transition(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, to) {
            (New, PendingPick)
            | (PendingPick, PartiallyPicked)
            | (PendingPick, Picked)
            | (PartiallyPicked, Picked)
            | (Picked, Staged)
            | (Staged, Assigned)
            | (Assigned, Shipped)
            | (Shipped, OutForDelivery)
            | (OutForDelivery, Delivered)
            | (Delivered, PartiallyReturned)
            | (Delivered, Returned)
            | (PartiallyReturned, Returned) => true,
            (from, Cancelled) => from.is_cancellable(),
            _ => false,
        }
    }
}

/// Driver bound to an order for pickup and delivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverRef {
    pub name: String,
    pub kind: DriverKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    InHouse,
    ThirdParty,
}

/// Proof captured at delivery confirmation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeliveryProof {
    pub receiver_name: String,
    pub receiver_phone: String,
    /// Opaque reference into the external photo/blob store.
    pub photo_ref: String,
    pub confirmed_at: DateTime<Utc>,
}

/// A delivery attempt that did not succeed. Recording one never implies
/// progress; the order state is untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailedDelivery {
    pub reason: String,
    pub reported_by: String,
    pub reported_at: DateTime<Utc>,
}

/// Binding of an order item to the specific lot a picker took stock from.
/// This is the record that makes picked quantity traceable back to batch,
/// manufacture code, and location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PickAllocation {
    pub id: Uuid,
    pub item_id: Uuid,
    pub product_id: Uuid,
    pub batch: String,
    pub manufacture_code: ManufactureCode,
    pub location: String,
    pub quantity: i32,
    /// Sticker codes scanned against this allocation during pickup
    /// verification.
    pub scanned_codes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub ordered_qty: i32,
    pub picked_qty: i32,
}

/// Outbound customer order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundOrder {
    pub id: Uuid,
    pub customer: String,
    pub warehouse_id: Uuid,
    pub required_ship_date: NaiveDate,
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub allocations: Vec<PickAllocation>,
    pub staging_location: Option<String>,
    pub driver: Option<DriverRef>,
    pub delivery_proof: Option<DeliveryProof>,
    pub failed_deliveries: Vec<FailedDelivery>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboundOrder {
    pub fn find_item(&self, item_id: Uuid) -> Option<&OrderItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn total_ordered(&self) -> i32 {
        self.items.iter().map(|i| i.ordered_qty).sum()
    }

    pub fn total_picked(&self) -> i32 {
        self.items.iter().map(|i| i.picked_qty).sum()
    }

    pub fn total_scanned(&self) -> i32 {
        self.allocations
            .iter()
            .map(|a| a.scanned_codes.len() as i32)
            .sum()
    }

    /// Pick status implied by per-item picked quantities.
    pub fn derived_pick_status(&self) -> OrderStatus {
        if self.items.iter().all(|i| i.picked_qty == i.ordered_qty) {
            OrderStatus::Picked
        } else if self.items.iter().any(|i| i.picked_qty > 0) {
            OrderStatus::PartiallyPicked
        } else {
            OrderStatus::PendingPick
        }
    }

    /// Applies a table-validated status change. Returns the old status, or
    /// `None` when the transition is illegal (state left untouched).
    pub fn update_status(&mut self, new_status: OrderStatus) -> Option<OrderStatus> {
        if !self.status.can_transition(new_status) {
            return None;
        }
        let old = self.status;
        self.status = new_status;
        self.updated_at = Utc::now();
        Some(old)
    }
}
