use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::unique_unit::UnitEvent;

/// Cloneable handle used by services to publish domain events.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Domain events emitted after each successful mutation.
///
/// Events are published once the mutation has committed and its holds are
/// released; a failed operation emits nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Ledger events
    StockAdjusted {
        product_id: Uuid,
        warehouse_id: Uuid,
        location: String,
        previous_quantity: i32,
        new_quantity: i32,
        reason: String,
    },
    StockMoved {
        product_id: Uuid,
        warehouse_id: Uuid,
        from_location: String,
        to_location: String,
        quantity: i32,
    },

    // Inbound receiving events
    ReceiptCreated(Uuid),
    ItemReceived {
        receipt_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    },
    ItemPutaway {
        receipt_id: Uuid,
        item_id: Uuid,
        location: String,
        quantity: i32,
    },
    ReceiptCancelled(Uuid),

    // Outbound fulfillment events
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    ItemPicked {
        order_id: Uuid,
        item_id: Uuid,
        location: String,
        quantity: i32,
    },
    DriverAssigned {
        order_id: Uuid,
        driver: String,
    },
    UnitScanned {
        code: String,
        event: UnitEvent,
    },
    OrderDelivered(Uuid),
    DeliveryFailed {
        order_id: Uuid,
        reason: String,
    },
    OrderCancelled(Uuid),

    // Return events
    ReturnCreated(Uuid),
    ReturnItemInspected {
        return_id: Uuid,
        item_id: Uuid,
        quantity: i32,
        restocked: bool,
    },
    ReturnCompleted(Uuid),

    // Transfer events
    TransferCreated(Uuid),
    TransferExecuted(Uuid),
    TransferCancelled(Uuid),
}

/// Consumer loop draining the event channel.
///
/// The core only logs; downstream collaborators (notifications, projections)
/// subscribe by wrapping or replacing this loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "Order status changed");
            }
            Event::StockAdjusted {
                product_id,
                location,
                previous_quantity,
                new_quantity,
                reason,
                ..
            } => {
                info!(
                    %product_id,
                    %location,
                    previous = previous_quantity,
                    new = new_quantity,
                    %reason,
                    "Stock adjusted"
                );
            }
            Event::DeliveryFailed { order_id, reason } => {
                info!(%order_id, %reason, "Delivery attempt failed");
            }
            other => debug!(event = ?other, "Event processed"),
        }
    }

    info!("Event channel closed; stopping event processing loop");
}
