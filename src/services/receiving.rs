use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    context::RequestContext,
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        lot::ManufactureCode,
        receipt::{
            InboundReceipt, Placement, ReceiptContainer, ReceiptItem, ReceiptStatus,
        },
    },
    services::{
        holds::{HoldKey, HoldRegistry},
        inventory::{AdjustLotCommand, InventoryService, MoveLotCommand},
        unique_units::UniqueUnitService,
    },
    store::Store,
};

#[derive(Debug, Clone)]
pub struct NewReceiptItem {
    pub product_id: Uuid,
    pub expected_qty: i32,
    pub batch: String,
    pub manufacture_code: String,
    pub unit_cost: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct NewReceiptContainer {
    pub container_no: String,
    pub items: Vec<NewReceiptItem>,
}

#[derive(Debug, Clone, Validate)]
pub struct CreateReceiptCommand {
    #[validate(length(min = 1, max = 100))]
    pub supplier: String,
    /// Defaults to today.
    pub arrival_date: Option<NaiveDate>,
    pub containers: Vec<NewReceiptContainer>,
}

#[derive(Debug, Clone, Validate)]
pub struct ReceiveItemCommand {
    pub receipt_id: Uuid,
    pub item_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Actual batch on the received goods, when it differs from the
    /// expected one.
    pub batch: Option<String>,
    /// Actual manufacture code on the received goods.
    pub manufacture_code: Option<String>,
    pub unit_cost: Option<Decimal>,
}

#[derive(Debug, Clone, Validate)]
pub struct PutawayItemCommand {
    pub receipt_id: Uuid,
    pub item_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
    #[validate(length(min = 1, max = 32))]
    pub location: String,
}

#[derive(Debug, Clone)]
pub struct ItemReceived {
    pub receipt_id: Uuid,
    pub item_id: Uuid,
    pub lot_id: Uuid,
    pub quantity: i32,
    /// Sticker codes issued for the received units.
    pub unit_codes: Vec<String>,
    pub receipt_status: ReceiptStatus,
}

/// Inbound receiving workflow: receipt creation, item receipt at the dock,
/// put-away into storage, and compensating cancellation.
///
/// All stock effects go through the ledger; this service only drives the
/// receipt state machine and remembers what it applied so cancellation can
/// reverse it exactly.
#[derive(Clone)]
pub struct ReceivingService {
    store: Arc<Store>,
    holds: Arc<HoldRegistry>,
    inventory: InventoryService,
    units: UniqueUnitService,
    event_sender: EventSender,
    dock_location: String,
}

impl ReceivingService {
    pub fn new(
        store: Arc<Store>,
        holds: Arc<HoldRegistry>,
        inventory: InventoryService,
        units: UniqueUnitService,
        event_sender: EventSender,
        dock_location: String,
    ) -> Self {
        Self {
            store,
            holds,
            inventory,
            units,
            event_sender,
            dock_location,
        }
    }

    /// Creates a receipt in `pending` with its expected containers/items.
    #[instrument(skip(self, ctx, cmd), fields(supplier = %cmd.supplier))]
    pub async fn create_receipt(
        &self,
        ctx: &RequestContext,
        cmd: CreateReceiptCommand,
    ) -> Result<InboundReceipt, ServiceError> {
        cmd.validate()?;
        if cmd.containers.is_empty() {
            return Err(ServiceError::ValidationError(
                "receipt needs at least one container".into(),
            ));
        }

        let mut containers = Vec::with_capacity(cmd.containers.len());
        for container in &cmd.containers {
            if container.items.is_empty() {
                return Err(ServiceError::ValidationError(format!(
                    "container {} has no items",
                    container.container_no
                )));
            }
            let mut items = Vec::with_capacity(container.items.len());
            for item in &container.items {
                if item.expected_qty < 1 {
                    return Err(ServiceError::ValidationError(
                        "expected quantity must be positive".into(),
                    ));
                }
                if item.batch.is_empty() {
                    return Err(ServiceError::ValidationError("batch must not be empty".into()));
                }
                if self.store.product(item.product_id).is_none() {
                    return Err(ServiceError::not_found("Product", item.product_id));
                }
                items.push(ReceiptItem {
                    id: Uuid::new_v4(),
                    product_id: item.product_id,
                    batch: item.batch.clone(),
                    manufacture_code: ManufactureCode::parse(&item.manufacture_code)?,
                    expected_qty: item.expected_qty,
                    received_qty: 0,
                    putaway_qty: 0,
                    unit_cost: item.unit_cost,
                    placements: Vec::new(),
                });
            }
            containers.push(ReceiptContainer {
                id: Uuid::new_v4(),
                container_no: container.container_no.clone(),
                items,
            });
        }

        let now = Utc::now();
        let receipt = InboundReceipt {
            id: Uuid::new_v4(),
            supplier: cmd.supplier,
            warehouse_id: ctx.warehouse_id(),
            arrival_date: cmd.arrival_date.unwrap_or_else(|| now.date_naive()),
            status: ReceiptStatus::Pending,
            containers,
            created_at: now,
            updated_at: now,
        };
        self.store.receipts.insert(receipt.id, receipt.clone());
        info!(receipt_id = %receipt.id, "Receipt created");

        self.event_sender
            .send(Event::ReceiptCreated(receipt.id))
            .await
            .map_err(ServiceError::EventError)?;
        Ok(receipt)
    }

    /// Receives quantity against a receipt item: ledger increase at the
    /// dock plus one sticker per physical unit.
    #[instrument(skip(self, ctx, cmd), fields(receipt_id = %cmd.receipt_id, item_id = %cmd.item_id, quantity = cmd.quantity))]
    pub async fn receive_item(
        &self,
        ctx: &RequestContext,
        cmd: ReceiveItemCommand,
    ) -> Result<ItemReceived, ServiceError> {
        cmd.validate()?;
        let _hold = self
            .holds
            .acquire(vec![HoldKey::Receipt(cmd.receipt_id)])
            .await;

        let receipt = self.scoped_receipt(ctx, cmd.receipt_id)?;
        if !receipt.status.accepts_receiving() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "receipt {} is {} and cannot receive items",
                receipt.id, receipt.status
            )));
        }
        let item = receipt
            .find_item(cmd.item_id)
            .ok_or_else(|| ServiceError::not_found("Receipt item", cmd.item_id))?;
        if cmd.quantity > item.remaining_to_receive() {
            return Err(ServiceError::ValidationError(format!(
                "receiving {} units exceeds the {} still expected",
                cmd.quantity,
                item.remaining_to_receive()
            )));
        }

        let batch = cmd.batch.clone().unwrap_or_else(|| item.batch.clone());
        let code = match &cmd.manufacture_code {
            Some(raw) => ManufactureCode::parse(raw)?,
            None => item.manufacture_code,
        };
        // The actual batch/code on the goods may correct the expected ones,
        // but only before any quantity is on the books; put-away and
        // cancellation reverse stock under the recorded identity.
        if item.received_qty > 0 && (batch != item.batch || code != item.manufacture_code) {
            return Err(ServiceError::ValidationError(format!(
                "item already has stock recorded under batch {} code {}",
                item.batch, item.manufacture_code
            )));
        }
        let unit_cost = cmd.unit_cost.or(item.unit_cost);

        let adjustment = self
            .inventory
            .adjust_lot(
                ctx,
                AdjustLotCommand {
                    product_id: item.product_id,
                    batch: batch.clone(),
                    manufacture_code: code,
                    location: self.dock_location.clone(),
                    delta: cmd.quantity,
                    reason: format!("receipt {}", receipt.id),
                    unit_cost,
                    expected_on_hand: None,
                },
            )
            .await?;
        let unit_codes = self.units.issue(adjustment.lot_id, cmd.quantity)?;

        let status = self.with_receipt(cmd.receipt_id, |receipt| {
            let item = receipt
                .find_item_mut(cmd.item_id)
                .ok_or_else(|| ServiceError::not_found("Receipt item", cmd.item_id))?;
            item.received_qty += cmd.quantity;
            item.batch = batch.clone();
            item.manufacture_code = code;
            if unit_cost.is_some() {
                item.unit_cost = unit_cost;
            }
            Self::advance_status(receipt)
        })?;

        info!(lot_id = %adjustment.lot_id, new_status = %status, "Item received at dock");
        self.event_sender
            .send(Event::ItemReceived {
                receipt_id: cmd.receipt_id,
                item_id: cmd.item_id,
                quantity: cmd.quantity,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(ItemReceived {
            receipt_id: cmd.receipt_id,
            item_id: cmd.item_id,
            lot_id: adjustment.lot_id,
            quantity: cmd.quantity,
            unit_codes,
            receipt_status: status,
        })
    }

    /// Moves received stock from the dock into a storage location.
    #[instrument(skip(self, ctx, cmd), fields(receipt_id = %cmd.receipt_id, item_id = %cmd.item_id, location = %cmd.location))]
    pub async fn putaway_item(
        &self,
        ctx: &RequestContext,
        cmd: PutawayItemCommand,
    ) -> Result<ReceiptStatus, ServiceError> {
        cmd.validate()?;
        let _hold = self
            .holds
            .acquire(vec![HoldKey::Receipt(cmd.receipt_id)])
            .await;

        let receipt = self.scoped_receipt(ctx, cmd.receipt_id)?;
        if !receipt.status.accepts_putaway() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "receipt {} is {} and cannot put away items",
                receipt.id, receipt.status
            )));
        }
        let item = receipt
            .find_item(cmd.item_id)
            .ok_or_else(|| ServiceError::not_found("Receipt item", cmd.item_id))?;
        if cmd.quantity > item.remaining_at_dock() {
            return Err(ServiceError::ValidationError(format!(
                "putting away {} units exceeds the {} still at the dock",
                cmd.quantity,
                item.remaining_at_dock()
            )));
        }

        self.inventory
            .move_lot(
                ctx,
                MoveLotCommand {
                    product_id: item.product_id,
                    batch: item.batch.clone(),
                    manufacture_code: item.manufacture_code,
                    from_location: self.dock_location.clone(),
                    to_location: cmd.location.clone(),
                    to_warehouse_id: None,
                    quantity: cmd.quantity,
                    expected_on_hand: None,
                },
            )
            .await?;

        let status = self.with_receipt(cmd.receipt_id, |receipt| {
            let item = receipt
                .find_item_mut(cmd.item_id)
                .ok_or_else(|| ServiceError::not_found("Receipt item", cmd.item_id))?;
            item.putaway_qty += cmd.quantity;
            match item.placements.iter_mut().find(|p| p.location == cmd.location) {
                Some(placement) => placement.quantity += cmd.quantity,
                None => item.placements.push(Placement {
                    location: cmd.location.clone(),
                    quantity: cmd.quantity,
                }),
            }
            Self::advance_status(receipt)
        })?;

        info!(new_status = %status, "Item put away");
        self.event_sender
            .send(Event::ItemPutaway {
                receipt_id: cmd.receipt_id,
                item_id: cmd.item_id,
                location: cmd.location,
                quantity: cmd.quantity,
            })
            .await
            .map_err(ServiceError::EventError)?;
        Ok(status)
    }

    /// Cancels an open receipt, reversing every ledger effect it applied.
    ///
    /// Both the stock still at the dock and stock already put away are
    /// removed; if any reversal fails, the ones already applied are rolled
    /// back so the ledger never ends up half-compensated.
    #[instrument(skip(self, ctx), fields(receipt_id = %receipt_id))]
    pub async fn cancel_receipt(
        &self,
        ctx: &RequestContext,
        receipt_id: Uuid,
    ) -> Result<(), ServiceError> {
        let _hold = self.holds.acquire(vec![HoldKey::Receipt(receipt_id)]).await;

        let receipt = self.scoped_receipt(ctx, receipt_id)?;
        if receipt.status.is_terminal() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "receipt {} is {} and cannot be cancelled",
                receipt.id, receipt.status
            )));
        }

        // Everything this receipt added to the ledger, by current position.
        let mut reversals = Vec::new();
        for item in receipt.items() {
            if item.remaining_at_dock() > 0 {
                reversals.push((item.clone(), self.dock_location.clone(), item.remaining_at_dock()));
            }
            for placement in &item.placements {
                reversals.push((item.clone(), placement.location.clone(), placement.quantity));
            }
        }

        let mut applied: Vec<(ReceiptItem, String, i32)> = Vec::new();
        for (item, location, quantity) in reversals {
            let outcome = self
                .inventory
                .adjust_lot(
                    ctx,
                    AdjustLotCommand {
                        product_id: item.product_id,
                        batch: item.batch.clone(),
                        manufacture_code: item.manufacture_code,
                        location: location.clone(),
                        delta: -quantity,
                        reason: format!("receipt {} cancelled", receipt_id),
                        unit_cost: None,
                        expected_on_hand: None,
                    },
                )
                .await;
            match outcome {
                Ok(_) => applied.push((item, location, quantity)),
                Err(err) => {
                    self.rollback_reversals(ctx, receipt_id, &applied).await;
                    return Err(err);
                }
            }
        }

        self.with_receipt(receipt_id, |receipt| {
            receipt.status = ReceiptStatus::Cancelled;
            receipt.updated_at = Utc::now();
            Ok(receipt.status)
        })?;

        info!("Receipt cancelled");
        self.event_sender
            .send(Event::ReceiptCancelled(receipt_id))
            .await
            .map_err(ServiceError::EventError)?;
        Ok(())
    }

    /// Re-adds stock removed by a partially failed cancellation. The
    /// additions go back into lots this cancellation just drained, so
    /// capacity is available; a failure here is logged and skipped rather
    /// than allowed to mask the original error.
    async fn rollback_reversals(
        &self,
        ctx: &RequestContext,
        receipt_id: Uuid,
        applied: &[(ReceiptItem, String, i32)],
    ) {
        for (item, location, quantity) in applied {
            let outcome = self
                .inventory
                .adjust_lot(
                    ctx,
                    AdjustLotCommand {
                        product_id: item.product_id,
                        batch: item.batch.clone(),
                        manufacture_code: item.manufacture_code,
                        location: location.clone(),
                        delta: *quantity,
                        reason: format!("receipt {} cancel rollback", receipt_id),
                        unit_cost: item.unit_cost,
                        expected_on_hand: None,
                    },
                )
                .await;
            if let Err(err) = outcome {
                error!(%location, quantity, error = %err, "Cancel rollback step failed");
            }
        }
    }

    fn scoped_receipt(
        &self,
        ctx: &RequestContext,
        receipt_id: Uuid,
    ) -> Result<InboundReceipt, ServiceError> {
        let receipt = self
            .store
            .receipt(receipt_id)
            .ok_or_else(|| ServiceError::not_found("Receipt", receipt_id))?;
        if receipt.warehouse_id != ctx.warehouse_id() {
            return Err(ServiceError::not_found("Receipt", receipt_id));
        }
        Ok(receipt)
    }

    fn with_receipt<T>(
        &self,
        receipt_id: Uuid,
        f: impl FnOnce(&mut InboundReceipt) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut receipt = self
            .store
            .receipts
            .get_mut(&receipt_id)
            .ok_or_else(|| ServiceError::not_found("Receipt", receipt_id))?;
        f(&mut receipt)
    }

    /// Moves the receipt to the status implied by its quantities, checked
    /// against the transition table.
    fn advance_status(receipt: &mut InboundReceipt) -> Result<ReceiptStatus, ServiceError> {
        let derived = receipt.derived_status();
        if derived != receipt.status {
            if !receipt.status.can_transition(derived) {
                return Err(ServiceError::InternalError(format!(
                    "receipt {} cannot move from {} to {}",
                    receipt.id, receipt.status, derived
                )));
            }
            receipt.status = derived;
        }
        receipt.updated_at = Utc::now();
        Ok(receipt.status)
    }
}
