use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::ReturnsConfig,
    context::RequestContext,
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        lot::ManufactureCode,
        order::OrderStatus,
        rma::{
            Disposition, InspectionRecord, ReturnCondition, ReturnItem, ReturnOrder, ReturnStatus,
        },
    },
    services::{
        holds::{HoldKey, HoldRegistry},
        inventory::{AdjustLotCommand, InventoryService},
        orders::OrderService,
        unique_units::UniqueUnitService,
    },
    store::Store,
};

#[derive(Debug, Clone)]
pub struct NewReturnItem {
    pub product_id: Uuid,
    pub manufacture_code: String,
    /// Batch the units shipped under, when the customer paperwork has it.
    pub batch: Option<String>,
    pub expected_qty: i32,
}

#[derive(Debug, Clone, Validate)]
pub struct CreateReturnCommand {
    pub order_id: Uuid,
    /// Defaults to a generated RMA number.
    pub rma_number: Option<String>,
    pub items: Vec<NewReturnItem>,
}

#[derive(Debug, Clone, Validate)]
pub struct InspectReturnItemCommand {
    pub return_id: Uuid,
    pub item_id: Uuid,
    pub condition: ReturnCondition,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Put-away location for quantity whose condition restocks.
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ItemInspected {
    pub return_id: Uuid,
    pub item_id: Uuid,
    pub disposition: Disposition,
    /// Sticker codes issued for restocked units.
    pub unit_codes: Vec<String>,
    pub return_status: ReturnStatus,
    pub order_status: OrderStatus,
}

/// Returns workflow: RMA creation against a delivered order and
/// item-by-item inspection. Only conditions whose configured disposition
/// is `Restock` ever put quantity back into the ledger.
#[derive(Clone)]
pub struct ReturnService {
    store: Arc<Store>,
    holds: Arc<HoldRegistry>,
    inventory: InventoryService,
    units: UniqueUnitService,
    orders: OrderService,
    event_sender: EventSender,
    policy: ReturnsConfig,
}

impl ReturnService {
    pub fn new(
        store: Arc<Store>,
        holds: Arc<HoldRegistry>,
        inventory: InventoryService,
        units: UniqueUnitService,
        orders: OrderService,
        event_sender: EventSender,
        policy: ReturnsConfig,
    ) -> Self {
        Self {
            store,
            holds,
            inventory,
            units,
            orders,
            event_sender,
            policy,
        }
    }

    /// Opens a return against a delivered order.
    #[instrument(skip(self, ctx, cmd), fields(order_id = %cmd.order_id))]
    pub async fn create_return(
        &self,
        ctx: &RequestContext,
        cmd: CreateReturnCommand,
    ) -> Result<ReturnOrder, ServiceError> {
        cmd.validate()?;
        if cmd.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "return needs at least one item".into(),
            ));
        }

        let order = self
            .store
            .order(cmd.order_id)
            .ok_or_else(|| ServiceError::not_found("Order", cmd.order_id))?;
        if order.warehouse_id != ctx.warehouse_id() {
            return Err(ServiceError::not_found("Order", cmd.order_id));
        }
        if !matches!(
            order.status,
            OrderStatus::Delivered | OrderStatus::PartiallyReturned
        ) {
            return Err(ServiceError::InvalidStateTransition(format!(
                "order {} is {} and cannot take returns",
                order.id, order.status
            )));
        }

        let mut items = Vec::with_capacity(cmd.items.len());
        for item in &cmd.items {
            if item.expected_qty < 1 {
                return Err(ServiceError::ValidationError(
                    "expected quantity must be positive".into(),
                ));
            }
            if !order.items.iter().any(|i| i.product_id == item.product_id) {
                return Err(ServiceError::ValidationError(format!(
                    "product {} is not on order {}",
                    item.product_id, order.id
                )));
            }
            items.push(ReturnItem {
                id: Uuid::new_v4(),
                product_id: item.product_id,
                manufacture_code: ManufactureCode::parse(&item.manufacture_code)?,
                batch: item.batch.clone(),
                expected_qty: item.expected_qty,
                processed_qty: 0,
                inspections: Vec::new(),
            });
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let rma = ReturnOrder {
            id,
            order_id: cmd.order_id,
            warehouse_id: ctx.warehouse_id(),
            rma_number: cmd
                .rma_number
                .unwrap_or_else(|| format!("RMA-{}", &id.simple().to_string()[..8].to_uppercase())),
            status: ReturnStatus::Open,
            items,
            created_at: now,
            updated_at: now,
        };
        self.store.returns.insert(rma.id, rma.clone());
        info!(return_id = %rma.id, rma_number = %rma.rma_number, "Return created");

        self.event_sender
            .send(Event::ReturnCreated(rma.id))
            .await
            .map_err(ServiceError::EventError)?;
        Ok(rma)
    }

    /// Inspects part of a return item under a condition.
    ///
    /// Restock-disposition quantity re-enters the ledger at the chosen
    /// location and gets fresh stickers; everything else is recorded on the
    /// item only. The parent order's returned state is recomputed from the
    /// aggregate processed quantity across all its returns.
    #[instrument(skip(self, ctx, cmd), fields(return_id = %cmd.return_id, item_id = %cmd.item_id, condition = %cmd.condition, quantity = cmd.quantity))]
    pub async fn inspect_return_item(
        &self,
        ctx: &RequestContext,
        cmd: InspectReturnItemCommand,
    ) -> Result<ItemInspected, ServiceError> {
        cmd.validate()?;

        // The order reference on a return never changes, so it is safe to
        // look up before taking holds on both aggregates in one acquire.
        let order_id = self
            .store
            .return_order(cmd.return_id)
            .ok_or_else(|| ServiceError::not_found("Return", cmd.return_id))?
            .order_id;
        let _hold = self
            .holds
            .acquire(vec![
                HoldKey::Return(cmd.return_id),
                HoldKey::Order(order_id),
            ])
            .await;

        let rma = self.scoped_return(ctx, cmd.return_id)?;
        if rma.status != ReturnStatus::Open {
            return Err(ServiceError::InvalidStateTransition(format!(
                "return {} is {} and cannot be inspected",
                rma.id, rma.status
            )));
        }
        let item = rma
            .items
            .iter()
            .find(|i| i.id == cmd.item_id)
            .ok_or_else(|| ServiceError::not_found("Return item", cmd.item_id))?;
        if cmd.quantity > item.remaining_to_inspect() {
            return Err(ServiceError::ValidationError(format!(
                "inspecting {} units exceeds the {} still expected",
                cmd.quantity,
                item.remaining_to_inspect()
            )));
        }

        let disposition = self.policy.disposition_for(cmd.condition);
        let mut unit_codes = Vec::new();
        if disposition == Disposition::Restock {
            let location = cmd.location.clone().ok_or_else(|| {
                ServiceError::ValidationError(
                    "a put-away location is required to restock returned stock".into(),
                )
            })?;
            let batch = item
                .batch
                .clone()
                .unwrap_or_else(|| rma.rma_number.clone());
            let adjustment = self
                .inventory
                .adjust_lot(
                    ctx,
                    AdjustLotCommand {
                        product_id: item.product_id,
                        batch,
                        manufacture_code: item.manufacture_code,
                        location,
                        delta: cmd.quantity,
                        reason: format!("return {} restock", rma.rma_number),
                        unit_cost: None,
                        expected_on_hand: None,
                    },
                )
                .await?;
            unit_codes = self.units.issue(adjustment.lot_id, cmd.quantity)?;
        }

        let actor = ctx.actor().to_string();
        let return_status = {
            let mut rma = self
                .store
                .returns
                .get_mut(&cmd.return_id)
                .ok_or_else(|| ServiceError::not_found("Return", cmd.return_id))?;
            let item = rma
                .find_item_mut(cmd.item_id)
                .ok_or_else(|| ServiceError::not_found("Return item", cmd.item_id))?;
            item.processed_qty += cmd.quantity;
            item.inspections.push(InspectionRecord {
                condition: cmd.condition,
                disposition,
                quantity: cmd.quantity,
                location: cmd.location.clone(),
                inspected_by: actor,
                inspected_at: Utc::now(),
            });
            if rma.all_items_inspected() {
                rma.status = ReturnStatus::Completed;
            }
            rma.updated_at = Utc::now();
            rma.status
        };

        // Aggregate processed quantity across every return of the order.
        let processed_total: i32 = self
            .store
            .returns
            .iter()
            .filter(|r| r.order_id == order_id)
            .map(|r| r.total_processed())
            .sum();
        let order_change = self.orders.apply_return_progress(order_id, processed_total)?;
        let order_status = self
            .store
            .order(order_id)
            .map(|o| o.status)
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;

        info!(
            disposition = %disposition,
            return_status = %return_status,
            order_status = %order_status,
            "Return item inspected"
        );

        self.event_sender
            .send(Event::ReturnItemInspected {
                return_id: cmd.return_id,
                item_id: cmd.item_id,
                quantity: cmd.quantity,
                restocked: disposition == Disposition::Restock,
            })
            .await
            .map_err(ServiceError::EventError)?;
        if return_status == ReturnStatus::Completed {
            self.event_sender
                .send(Event::ReturnCompleted(cmd.return_id))
                .await
                .map_err(ServiceError::EventError)?;
        }
        if let Some((old, new)) = order_change {
            self.event_sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status: old.to_string(),
                    new_status: new.to_string(),
                })
                .await
                .map_err(ServiceError::EventError)?;
        }

        Ok(ItemInspected {
            return_id: cmd.return_id,
            item_id: cmd.item_id,
            disposition,
            unit_codes,
            return_status,
            order_status,
        })
    }

    fn scoped_return(
        &self,
        ctx: &RequestContext,
        return_id: Uuid,
    ) -> Result<ReturnOrder, ServiceError> {
        let rma = self
            .store
            .return_order(return_id)
            .ok_or_else(|| ServiceError::not_found("Return", return_id))?;
        if rma.warehouse_id != ctx.warehouse_id() {
            return Err(ServiceError::not_found("Return", return_id));
        }
        Ok(rma)
    }
}
