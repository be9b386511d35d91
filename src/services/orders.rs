use chrono::{NaiveDate, Utc};
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    context::RequestContext,
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        location::LocationKind,
        lot::ManufactureCode,
        order::{
            DeliveryProof, DriverKind, DriverRef, FailedDelivery, OrderItem, OrderStatus,
            OutboundOrder, PickAllocation,
        },
        unique_unit::UnitEvent,
    },
    services::{
        holds::{HoldKey, HoldRegistry},
        inventory::{AdjustLotCommand, InventoryService},
        unique_units::UniqueUnitService,
    },
    store::Store,
};

lazy_static! {
    static ref UNITS_PICKED: IntCounter = IntCounter::new(
        "fulfillment_units_picked_total",
        "Total number of units picked against orders"
    )
    .expect("metric can be created");
    static ref ORDERS_SHIPPED: IntCounter = IntCounter::new(
        "fulfillment_orders_shipped_total",
        "Total number of orders shipped"
    )
    .expect("metric can be created");
    static ref PICK_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "fulfillment_pick_failures_total",
            "Total number of failed pick attempts"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

#[derive(Debug, Clone)]
pub struct NewOrderLine {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Validate)]
pub struct CreateOrderCommand {
    #[validate(length(min = 1, max = 100))]
    pub customer: String,
    /// Defaults to today.
    pub required_ship_date: Option<NaiveDate>,
    pub lines: Vec<NewOrderLine>,
}

/// Picker-driven lot selection: the caller chooses which location, batch,
/// and manufacture code to take stock from. The engine enforces quantity
/// caps and ledger consistency, not a picking policy.
#[derive(Debug, Clone, Validate)]
pub struct PickItemCommand {
    pub order_id: Uuid,
    pub item_id: Uuid,
    #[validate(length(min = 1, max = 32))]
    pub location: String,
    #[validate(length(min = 1, max = 64))]
    pub batch: String,
    pub manufacture_code: String,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Availability snapshot shown to the picker, re-validated by the
    /// ledger inside its hold.
    pub expected_on_hand: Option<i32>,
}

#[derive(Debug, Clone, Validate)]
pub struct StageOrderCommand {
    pub order_id: Uuid,
    #[validate(length(min = 1, max = 32))]
    pub staging_location: String,
}

#[derive(Debug, Clone, Validate)]
pub struct AssignDriverCommand {
    pub order_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub driver_name: String,
    pub driver_kind: DriverKind,
}

#[derive(Debug, Clone, Validate)]
pub struct ConfirmDeliveryCommand {
    pub order_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub receiver_name: String,
    #[validate(length(min = 1, max = 32))]
    pub receiver_phone: String,
    /// Opaque reference returned by the photo store.
    #[validate(length(min = 1, max = 256))]
    pub photo_ref: String,
}

#[derive(Debug, Clone, Validate)]
pub struct ReportFailedDeliveryCommand {
    pub order_id: Uuid,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

/// Outbound fulfillment workflow: order creation through picking, staging,
/// driver assignment, scan-verified pickup, shipment, and delivery.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<Store>,
    holds: Arc<HoldRegistry>,
    inventory: InventoryService,
    units: UniqueUnitService,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(
        store: Arc<Store>,
        holds: Arc<HoldRegistry>,
        inventory: InventoryService,
        units: UniqueUnitService,
        event_sender: EventSender,
    ) -> Self {
        Self {
            store,
            holds,
            inventory,
            units,
            event_sender,
        }
    }

    /// Creates an order; it lands in `PendingPick` immediately.
    #[instrument(skip(self, ctx, cmd), fields(customer = %cmd.customer))]
    pub async fn create_order(
        &self,
        ctx: &RequestContext,
        cmd: CreateOrderCommand,
    ) -> Result<OutboundOrder, ServiceError> {
        cmd.validate()?;
        if cmd.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "order needs at least one line".into(),
            ));
        }
        let mut items = Vec::with_capacity(cmd.lines.len());
        for line in &cmd.lines {
            if line.quantity < 1 {
                return Err(ServiceError::ValidationError(
                    "ordered quantity must be positive".into(),
                ));
            }
            if self.store.product(line.product_id).is_none() {
                return Err(ServiceError::not_found("Product", line.product_id));
            }
            items.push(OrderItem {
                id: Uuid::new_v4(),
                product_id: line.product_id,
                ordered_qty: line.quantity,
                picked_qty: 0,
            });
        }

        let now = Utc::now();
        let mut order = OutboundOrder {
            id: Uuid::new_v4(),
            customer: cmd.customer,
            warehouse_id: ctx.warehouse_id(),
            required_ship_date: cmd.required_ship_date.unwrap_or_else(|| now.date_naive()),
            status: OrderStatus::New,
            items,
            allocations: Vec::new(),
            staging_location: None,
            driver: None,
            delivery_proof: None,
            failed_deliveries: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let _ = order.update_status(OrderStatus::PendingPick);
        self.store.orders.insert(order.id, order.clone());
        info!(order_id = %order.id, lines = order.items.len(), "Order created");

        self.event_sender
            .send(Event::OrderCreated(order.id))
            .await
            .map_err(ServiceError::EventError)?;
        Ok(order)
    }

    /// Picks quantity for an order item out of a caller-chosen lot.
    ///
    /// The cap check runs before the ledger call, so an over-pick fails
    /// without any stock side effect; an insufficient lot fails without any
    /// order side effect.
    #[instrument(skip(self, ctx, cmd), fields(order_id = %cmd.order_id, item_id = %cmd.item_id, quantity = cmd.quantity))]
    pub async fn pick_item(
        &self,
        ctx: &RequestContext,
        cmd: PickItemCommand,
    ) -> Result<OrderStatus, ServiceError> {
        cmd.validate().map_err(|e| self.pick_fail(e.into()))?;
        let code = ManufactureCode::parse(&cmd.manufacture_code).map_err(|e| self.pick_fail(e))?;

        let _hold = self.holds.acquire(vec![HoldKey::Order(cmd.order_id)]).await;

        let order = self.scoped_order(ctx, cmd.order_id).map_err(|e| self.pick_fail(e))?;
        if !matches!(
            order.status,
            OrderStatus::PendingPick | OrderStatus::PartiallyPicked
        ) {
            return Err(self.pick_fail(ServiceError::InvalidStateTransition(format!(
                "order {} is {} and cannot be picked",
                order.id, order.status
            ))));
        }
        let item = order
            .find_item(cmd.item_id)
            .ok_or_else(|| self.pick_fail(ServiceError::not_found("Order item", cmd.item_id)))?;
        if item.picked_qty + cmd.quantity > item.ordered_qty {
            return Err(self.pick_fail(ServiceError::ValidationError(format!(
                "picking {} units would exceed the ordered quantity ({} of {} already picked)",
                cmd.quantity, item.picked_qty, item.ordered_qty
            ))));
        }

        self.inventory
            .adjust_lot(
                ctx,
                AdjustLotCommand {
                    product_id: item.product_id,
                    batch: cmd.batch.clone(),
                    manufacture_code: code,
                    location: cmd.location.clone(),
                    delta: -cmd.quantity,
                    reason: format!("pick order {}", cmd.order_id),
                    unit_cost: None,
                    expected_on_hand: cmd.expected_on_hand,
                },
            )
            .await
            .map_err(|e| self.pick_fail(e))?;

        let status = self.with_order(cmd.order_id, |order| {
            let product_id = {
                let item = order
                    .items
                    .iter_mut()
                    .find(|i| i.id == cmd.item_id)
                    .ok_or_else(|| ServiceError::not_found("Order item", cmd.item_id))?;
                item.picked_qty += cmd.quantity;
                item.product_id
            };
            order.allocations.push(PickAllocation {
                id: Uuid::new_v4(),
                item_id: cmd.item_id,
                product_id,
                batch: cmd.batch.clone(),
                manufacture_code: code,
                location: cmd.location.clone(),
                quantity: cmd.quantity,
                scanned_codes: Vec::new(),
            });
            let derived = order.derived_pick_status();
            if derived != order.status {
                order.update_status(derived).ok_or_else(|| {
                    ServiceError::InternalError(format!(
                        "order {} cannot move from {} to {}",
                        order.id, order.status, derived
                    ))
                })?;
            }
            Ok(order.status)
        })?;

        UNITS_PICKED.inc_by(cmd.quantity as u64);
        info!(new_status = %status, "Item picked");
        self.event_sender
            .send(Event::ItemPicked {
                order_id: cmd.order_id,
                item_id: cmd.item_id,
                location: cmd.location,
                quantity: cmd.quantity,
            })
            .await
            .map_err(ServiceError::EventError)?;
        Ok(status)
    }

    /// Stages a fully picked order at a staging location.
    #[instrument(skip(self, ctx, cmd), fields(order_id = %cmd.order_id))]
    pub async fn stage_order(
        &self,
        ctx: &RequestContext,
        cmd: StageOrderCommand,
    ) -> Result<(), ServiceError> {
        cmd.validate()?;
        let _hold = self.holds.acquire(vec![HoldKey::Order(cmd.order_id)]).await;
        self.scoped_order(ctx, cmd.order_id)?;

        let location = self
            .store
            .location(ctx.warehouse_id(), &cmd.staging_location)
            .ok_or_else(|| ServiceError::not_found("Location", &cmd.staging_location))?;
        if location.kind != LocationKind::Staging {
            return Err(ServiceError::ValidationError(format!(
                "location {} is a {}, not a staging area",
                location.code, location.kind
            )));
        }

        let (old, new) = self.with_order(cmd.order_id, |order| {
            Self::checked_transition(order, OrderStatus::Staged).map(|old| {
                order.staging_location = Some(cmd.staging_location.clone());
                (old, order.status)
            })
        })?;
        self.emit_status_change(cmd.order_id, old, new).await
    }

    /// Binds a driver to a staged order. Re-assignment is permitted any
    /// time before shipment.
    #[instrument(skip(self, ctx, cmd), fields(order_id = %cmd.order_id, driver = %cmd.driver_name))]
    pub async fn assign_driver(
        &self,
        ctx: &RequestContext,
        cmd: AssignDriverCommand,
    ) -> Result<(), ServiceError> {
        cmd.validate()?;
        let _hold = self.holds.acquire(vec![HoldKey::Order(cmd.order_id)]).await;
        self.scoped_order(ctx, cmd.order_id)?;

        self.with_order(cmd.order_id, |order| {
            match order.status {
                OrderStatus::Staged => {
                    Self::checked_transition(order, OrderStatus::Assigned)?;
                }
                OrderStatus::Assigned => {
                    order.updated_at = Utc::now();
                }
                status => {
                    return Err(ServiceError::InvalidStateTransition(format!(
                        "order {} is {} and cannot be assigned a driver",
                        order.id, status
                    )))
                }
            }
            order.driver = Some(DriverRef {
                name: cmd.driver_name.clone(),
                kind: cmd.driver_kind,
            });
            Ok(())
        })?;

        self.event_sender
            .send(Event::DriverAssigned {
                order_id: cmd.order_id,
                driver: cmd.driver_name,
            })
            .await
            .map_err(ServiceError::EventError)
    }

    /// Records a pickup scan of one unique unit against the order.
    ///
    /// The unit must trace back (product, batch, manufacture code) to one
    /// of the order's pick allocations with unscanned quantity remaining.
    #[instrument(skip(self, ctx), fields(order_id = %order_id))]
    pub async fn scan_pickup_unit(
        &self,
        ctx: &RequestContext,
        order_id: Uuid,
        code: &str,
    ) -> Result<(), ServiceError> {
        let _hold = self.holds.acquire(vec![HoldKey::Order(order_id)]).await;

        let order = self.scoped_order(ctx, order_id)?;
        if order.status != OrderStatus::Assigned {
            return Err(ServiceError::InvalidStateTransition(format!(
                "order {} is {} and is not awaiting pickup verification",
                order.id, order.status
            )));
        }

        let (lot, _) = self.units.resolve(code)?;
        let allocation_id = order
            .allocations
            .iter()
            .find(|a| {
                a.product_id == lot.key.product_id
                    && a.batch == lot.key.batch
                    && a.manufacture_code == lot.key.manufacture_code
                    && (a.scanned_codes.len() as i32) < a.quantity
            })
            .map(|a| a.id)
            .ok_or_else(|| {
                ServiceError::ValidationError(format!(
                    "unit {} does not match any open allocation of order {}",
                    code, order_id
                ))
            })?;

        // The registry enforces single pickup per unit; this fails on a
        // double scan before the order is touched.
        self.units.mark_event(code, UnitEvent::Picked)?;

        self.with_order(order_id, |order| {
            let allocation = order
                .allocations
                .iter_mut()
                .find(|a| a.id == allocation_id)
                .ok_or_else(|| ServiceError::not_found("Allocation", allocation_id))?;
            allocation.scanned_codes.push(code.to_string());
            order.updated_at = Utc::now();
            Ok(())
        })?;

        self.event_sender
            .send(Event::UnitScanned {
                code: code.to_string(),
                event: UnitEvent::Picked,
            })
            .await
            .map_err(ServiceError::EventError)
    }

    /// Ships an order once every picked unit has been scan-verified.
    #[instrument(skip(self, ctx), fields(order_id = %order_id))]
    pub async fn ship_order(&self, ctx: &RequestContext, order_id: Uuid) -> Result<(), ServiceError> {
        let _hold = self.holds.acquire(vec![HoldKey::Order(order_id)]).await;

        let order = self.scoped_order(ctx, order_id)?;
        if order.status != OrderStatus::Assigned {
            return Err(ServiceError::InvalidStateTransition(format!(
                "order {} is {} and cannot ship",
                order.id, order.status
            )));
        }
        let unverified = order.total_picked() - order.total_scanned();
        if unverified > 0 {
            return Err(ServiceError::ValidationError(format!(
                "{} picked units are not yet scan-verified",
                unverified
            )));
        }

        let (old, new) = self.with_order(order_id, |order| {
            Self::checked_transition(order, OrderStatus::Shipped).map(|old| (old, order.status))
        })?;
        ORDERS_SHIPPED.inc();
        self.emit_status_change(order_id, old, new).await
    }

    /// External carrier update: the shipment left the yard.
    #[instrument(skip(self, ctx), fields(order_id = %order_id))]
    pub async fn mark_out_for_delivery(
        &self,
        ctx: &RequestContext,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let _hold = self.holds.acquire(vec![HoldKey::Order(order_id)]).await;
        self.scoped_order(ctx, order_id)?;
        let (old, new) = self.with_order(order_id, |order| {
            Self::checked_transition(order, OrderStatus::OutForDelivery)
                .map(|old| (old, order.status))
        })?;
        self.emit_status_change(order_id, old, new).await
    }

    /// Records a delivery scan of one unit at the receiver's door.
    #[instrument(skip(self, ctx), fields(order_id = %order_id))]
    pub async fn scan_delivery_unit(
        &self,
        ctx: &RequestContext,
        order_id: Uuid,
        code: &str,
    ) -> Result<(), ServiceError> {
        let _hold = self.holds.acquire(vec![HoldKey::Order(order_id)]).await;

        let order = self.scoped_order(ctx, order_id)?;
        if order.status != OrderStatus::OutForDelivery {
            return Err(ServiceError::InvalidStateTransition(format!(
                "order {} is {} and is not out for delivery",
                order.id, order.status
            )));
        }
        if !order
            .allocations
            .iter()
            .any(|a| a.scanned_codes.iter().any(|c| c == code))
        {
            return Err(ServiceError::ValidationError(format!(
                "unit {} was not picked up with order {}",
                code, order_id
            )));
        }

        self.units.mark_event(code, UnitEvent::Delivered)?;
        self.event_sender
            .send(Event::UnitScanned {
                code: code.to_string(),
                event: UnitEvent::Delivered,
            })
            .await
            .map_err(ServiceError::EventError)
    }

    /// Confirms delivery, capturing receiver identity and photo proof.
    #[instrument(skip(self, ctx, cmd), fields(order_id = %cmd.order_id))]
    pub async fn confirm_delivery(
        &self,
        ctx: &RequestContext,
        cmd: ConfirmDeliveryCommand,
    ) -> Result<(), ServiceError> {
        cmd.validate()?;
        let _hold = self.holds.acquire(vec![HoldKey::Order(cmd.order_id)]).await;
        self.scoped_order(ctx, cmd.order_id)?;

        self.with_order(cmd.order_id, |order| {
            Self::checked_transition(order, OrderStatus::Delivered)?;
            order.delivery_proof = Some(DeliveryProof {
                receiver_name: cmd.receiver_name.clone(),
                receiver_phone: cmd.receiver_phone.clone(),
                photo_ref: cmd.photo_ref.clone(),
                confirmed_at: Utc::now(),
            });
            Ok(())
        })?;

        info!("Delivery confirmed");
        self.event_sender
            .send(Event::OrderDelivered(cmd.order_id))
            .await
            .map_err(ServiceError::EventError)
    }

    /// Records a failed delivery attempt. Deliberately not a status
    /// transition: the order stays out for delivery.
    #[instrument(skip(self, ctx, cmd), fields(order_id = %cmd.order_id))]
    pub async fn report_failed_delivery(
        &self,
        ctx: &RequestContext,
        cmd: ReportFailedDeliveryCommand,
    ) -> Result<(), ServiceError> {
        cmd.validate()?;
        let _hold = self.holds.acquire(vec![HoldKey::Order(cmd.order_id)]).await;

        let order = self.scoped_order(ctx, cmd.order_id)?;
        if order.status != OrderStatus::OutForDelivery {
            return Err(ServiceError::InvalidStateTransition(format!(
                "order {} is {} and has no delivery attempt to fail",
                order.id, order.status
            )));
        }

        let actor = ctx.actor().to_string();
        self.with_order(cmd.order_id, |order| {
            order.failed_deliveries.push(FailedDelivery {
                reason: cmd.reason.clone(),
                reported_by: actor,
                reported_at: Utc::now(),
            });
            order.updated_at = Utc::now();
            Ok(())
        })?;

        self.event_sender
            .send(Event::DeliveryFailed {
                order_id: cmd.order_id,
                reason: cmd.reason,
            })
            .await
            .map_err(ServiceError::EventError)
    }

    /// Cancels a not-yet-assigned order, returning all picked stock to the
    /// lots it came from before the order reaches `Cancelled`.
    #[instrument(skip(self, ctx), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        ctx: &RequestContext,
        order_id: Uuid,
    ) -> Result<(), ServiceError> {
        let _hold = self.holds.acquire(vec![HoldKey::Order(order_id)]).await;

        let order = self.scoped_order(ctx, order_id)?;
        if !order.status.is_cancellable() {
            return Err(ServiceError::InvalidStateTransition(format!(
                "order {} is {} and cannot be cancelled",
                order.id, order.status
            )));
        }

        let mut restocked: Vec<&PickAllocation> = Vec::new();
        for allocation in &order.allocations {
            let outcome = self
                .inventory
                .adjust_lot(
                    ctx,
                    AdjustLotCommand {
                        product_id: allocation.product_id,
                        batch: allocation.batch.clone(),
                        manufacture_code: allocation.manufacture_code,
                        location: allocation.location.clone(),
                        delta: allocation.quantity,
                        reason: format!("order {} cancelled", order_id),
                        unit_cost: None,
                        expected_on_hand: None,
                    },
                )
                .await;
            match outcome {
                Ok(_) => restocked.push(allocation),
                Err(err) => {
                    // Undo the compensations already applied; the stock was
                    // just added back, so removing it again cannot run dry.
                    for done in restocked {
                        let rollback = self
                            .inventory
                            .adjust_lot(
                                ctx,
                                AdjustLotCommand {
                                    product_id: done.product_id,
                                    batch: done.batch.clone(),
                                    manufacture_code: done.manufacture_code,
                                    location: done.location.clone(),
                                    delta: -done.quantity,
                                    reason: format!("order {} cancel rollback", order_id),
                                    unit_cost: None,
                                    expected_on_hand: None,
                                },
                            )
                            .await;
                        if let Err(rollback_err) = rollback {
                            error!(allocation_id = %done.id, error = %rollback_err, "Cancel rollback step failed");
                        }
                    }
                    return Err(err);
                }
            }
        }

        self.with_order(order_id, |order| {
            Self::checked_transition(order, OrderStatus::Cancelled)?;
            Ok(())
        })?;

        info!("Order cancelled");
        self.event_sender
            .send(Event::OrderCancelled(order_id))
            .await
            .map_err(ServiceError::EventError)
    }

    /// Recomputes the order's returned/partially-returned state from the
    /// aggregate processed quantity across all its returns. Called by the
    /// returns workflow under the order's hold.
    pub(crate) fn apply_return_progress(
        &self,
        order_id: Uuid,
        processed_total: i32,
    ) -> Result<Option<(OrderStatus, OrderStatus)>, ServiceError> {
        self.with_order(order_id, |order| {
            let target = if processed_total >= order.total_picked() && processed_total > 0 {
                OrderStatus::Returned
            } else if processed_total > 0 {
                OrderStatus::PartiallyReturned
            } else {
                return Ok(None);
            };
            if order.status == target {
                return Ok(None);
            }
            let old = Self::checked_transition(order, target)?;
            Ok(Some((old, order.status)))
        })
    }

    fn pick_fail(&self, err: ServiceError) -> ServiceError {
        PICK_FAILURES.with_label_values(&[err.code()]).inc();
        err
    }

    async fn emit_status_change(
        &self,
        order_id: Uuid,
        old: OrderStatus,
        new: OrderStatus,
    ) -> Result<(), ServiceError> {
        self.event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status: old.to_string(),
                new_status: new.to_string(),
            })
            .await
            .map_err(ServiceError::EventError)
    }

    fn checked_transition(
        order: &mut OutboundOrder,
        new_status: OrderStatus,
    ) -> Result<OrderStatus, ServiceError> {
        order.update_status(new_status).ok_or_else(|| {
            ServiceError::InvalidStateTransition(format!(
                "order {} cannot move from {} to {}",
                order.id, order.status, new_status
            ))
        })
    }

    fn scoped_order(
        &self,
        ctx: &RequestContext,
        order_id: Uuid,
    ) -> Result<OutboundOrder, ServiceError> {
        let order = self
            .store
            .order(order_id)
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        if order.warehouse_id != ctx.warehouse_id() {
            return Err(ServiceError::not_found("Order", order_id));
        }
        Ok(order)
    }

    fn with_order<T>(
        &self,
        order_id: Uuid,
        f: impl FnOnce(&mut OutboundOrder) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut order = self
            .store
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        f(&mut order)
    }
}
