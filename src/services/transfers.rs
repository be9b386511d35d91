use chrono::Utc;
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
        transfer::{TransferLine, TransferOrder, TransferStatus},
    },
    services::{
        holds::{HoldKey, HoldRegistry},
        inventory::{InventoryService, MoveLotCommand},
    },
    store::Store,
};

#[derive(Debug, Clone)]
pub struct NewTransferLine {
    pub product_id: Uuid,
    pub batch: String,
    pub manufacture_code: String,
    pub quantity: i32,
    pub from_location: String,
    pub to_location: String,
}

#[derive(Debug, Clone, Validate)]
pub struct CreateTransferCommand {
    /// Destination warehouse; defaults to the context (source) warehouse
    /// for intra-warehouse relocations.
    pub destination_warehouse_id: Option<Uuid>,
    pub lines: Vec<NewTransferLine>,
}

/// Transfer workflow: moves stock between locations, same or cross
/// warehouse, atomically over all lines. If any line fails, lines already
/// moved in the same execution are moved back before the error surfaces,
/// so a transfer order never completes partially.
#[derive(Clone)]
pub struct TransferService {
    store: Arc<Store>,
    holds: Arc<HoldRegistry>,
    inventory: InventoryService,
    event_sender: EventSender,
}

impl TransferService {
    pub fn new(
        store: Arc<Store>,
        holds: Arc<HoldRegistry>,
        inventory: InventoryService,
        event_sender: EventSender,
    ) -> Self {
        Self {
            store,
            holds,
            inventory,
            event_sender,
        }
    }

    /// Creates a transfer order in `pending`.
    #[instrument(skip(self, ctx, cmd))]
    pub async fn create_transfer(
        &self,
        ctx: &RequestContext,
        cmd: CreateTransferCommand,
    ) -> Result<TransferOrder, ServiceError> {
        cmd.validate()?;
        if cmd.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "transfer needs at least one line".into(),
            ));
        }

        let destination = cmd
            .destination_warehouse_id
            .unwrap_or_else(|| ctx.warehouse_id());
        let mut lines = Vec::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            if line.quantity < 1 {
                return Err(ServiceError::ValidationError(
                    "transfer quantity must be positive".into(),
                ));
            }
            if destination == ctx.warehouse_id() && line.from_location == line.to_location {
                return Err(ServiceError::ValidationError(format!(
                    "line for product {} moves stock onto itself",
                    line.product_id
                )));
            }
            if self.store.product(line.product_id).is_none() {
                return Err(ServiceError::not_found("Product", line.product_id));
            }
            lines.push(TransferLine {
                id: Uuid::new_v4(),
                product_id: line.product_id,
                batch: line.batch.clone(),
                manufacture_code: ManufactureCode::parse(&line.manufacture_code)?,
                quantity: line.quantity,
                from_location: line.from_location.clone(),
                to_location: line.to_location.clone(),
            });
        }

        let transfer = TransferOrder {
            id: Uuid::new_v4(),
            source_warehouse_id: ctx.warehouse_id(),
            destination_warehouse_id: destination,
            status: TransferStatus::Pending,
            lines,
            created_at: Utc::now(),
            executed_at: None,
        };
        self.store.transfers.insert(transfer.id, transfer.clone());
        info!(transfer_id = %transfer.id, lines = transfer.lines.len(), "Transfer created");

        self.event_sender
            .send(Event::TransferCreated(transfer.id))
            .await
            .map_err(ServiceError::EventError)?;
        Ok(transfer)
    }

    /// Executes every line of a pending transfer as one atomic unit.
    #[instrument(skip(self, ctx), fields(transfer_id = %transfer_id))]
    pub async fn execute_transfer(
        &self,
        ctx: &RequestContext,
        transfer_id: Uuid,
    ) -> Result<(), ServiceError> {
        let _hold = self
            .holds
            .acquire(vec![HoldKey::Transfer(transfer_id)])
            .await;

        let transfer = self.scoped_transfer(ctx, transfer_id)?;
        if transfer.status != TransferStatus::Pending {
            return Err(ServiceError::InvalidStateTransition(format!(
                "transfer {} is {} and cannot execute",
                transfer.id, transfer.status
            )));
        }

        let cross_warehouse =
            transfer.destination_warehouse_id != transfer.source_warehouse_id;
        let mut moved: Vec<&TransferLine> = Vec::new();
        for line in &transfer.lines {
            let outcome = self
                .inventory
                .move_lot(
                    ctx,
                    MoveLotCommand {
                        product_id: line.product_id,
                        batch: line.batch.clone(),
                        manufacture_code: line.manufacture_code,
                        from_location: line.from_location.clone(),
                        to_location: line.to_location.clone(),
                        to_warehouse_id: cross_warehouse
                            .then_some(transfer.destination_warehouse_id),
                        quantity: line.quantity,
                        expected_on_hand: None,
                    },
                )
                .await;
            match outcome {
                Ok(_) => moved.push(line),
                Err(err) => {
                    self.compensate_moves(ctx, &transfer, &moved).await;
                    return Err(err);
                }
            }
        }

        {
            let mut stored = self
                .store
                .transfers
                .get_mut(&transfer_id)
                .ok_or_else(|| ServiceError::not_found("Transfer", transfer_id))?;
            stored.status = TransferStatus::Completed;
            stored.executed_at = Some(Utc::now());
        }

        info!("Transfer executed");
        self.event_sender
            .send(Event::TransferExecuted(transfer_id))
            .await
            .map_err(ServiceError::EventError)
    }

    /// Cancels a pending transfer. Pending transfers have no ledger
    /// footprint, so there is nothing to compensate.
    #[instrument(skip(self, ctx), fields(transfer_id = %transfer_id))]
    pub async fn cancel_transfer(
        &self,
        ctx: &RequestContext,
        transfer_id: Uuid,
    ) -> Result<(), ServiceError> {
        let _hold = self
            .holds
            .acquire(vec![HoldKey::Transfer(transfer_id)])
            .await;

        let transfer = self.scoped_transfer(ctx, transfer_id)?;
        if !transfer.status.can_transition(TransferStatus::Cancelled) {
            return Err(ServiceError::InvalidStateTransition(format!(
                "transfer {} is {} and cannot be cancelled",
                transfer.id, transfer.status
            )));
        }

        {
            let mut stored = self
                .store
                .transfers
                .get_mut(&transfer_id)
                .ok_or_else(|| ServiceError::not_found("Transfer", transfer_id))?;
            stored.status = TransferStatus::Cancelled;
        }

        self.event_sender
            .send(Event::TransferCancelled(transfer_id))
            .await
            .map_err(ServiceError::EventError)
    }

    /// Moves already-transferred lines back to their source after a later
    /// line failed. The stock just arrived at the destination, so the
    /// reverse move has it available; a failure here is logged and skipped
    /// rather than allowed to mask the original error.
    async fn compensate_moves(
        &self,
        ctx: &RequestContext,
        transfer: &TransferOrder,
        moved: &[&TransferLine],
    ) {
        let reverse_ctx =
            RequestContext::new(transfer.destination_warehouse_id, ctx.actor());
        let cross_warehouse =
            transfer.destination_warehouse_id != transfer.source_warehouse_id;
        for line in moved {
            let outcome = self
                .inventory
                .move_lot(
                    &reverse_ctx,
                    MoveLotCommand {
                        product_id: line.product_id,
                        batch: line.batch.clone(),
                        manufacture_code: line.manufacture_code,
                        from_location: line.to_location.clone(),
                        to_location: line.from_location.clone(),
                        to_warehouse_id: cross_warehouse
                            .then_some(transfer.source_warehouse_id),
                        quantity: line.quantity,
                        expected_on_hand: None,
                    },
                )
                .await;
            if let Err(err) = outcome {
                error!(line_id = %line.id, error = %err, "Transfer compensation step failed");
            }
        }
    }

    fn scoped_transfer(
        &self,
        ctx: &RequestContext,
        transfer_id: Uuid,
    ) -> Result<TransferOrder, ServiceError> {
        let transfer = self
            .store
            .transfer(transfer_id)
            .ok_or_else(|| ServiceError::not_found("Transfer", transfer_id))?;
        if transfer.source_warehouse_id != ctx.warehouse_id() {
            return Err(ServiceError::not_found("Transfer", transfer_id));
        }
        Ok(transfer)
    }
}
