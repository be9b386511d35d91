use chrono::Utc;
use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, Opts};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    context::RequestContext,
    errors::ServiceError,
    events::{Event, EventSender},
    models::{
        lot::{Lot, LotKey, ManufactureCode},
        movement::StockMovement,
    },
    services::{
        capacity::CapacityService,
        holds::{HoldKey, HoldRegistry},
    },
    store::Store,
};

lazy_static! {
    static ref STOCK_ADJUSTMENTS: IntCounter = IntCounter::new(
        "ledger_stock_adjustments_total",
        "Total number of committed lot adjustments"
    )
    .expect("metric can be created");
    static ref STOCK_MOVES: IntCounter = IntCounter::new(
        "ledger_stock_moves_total",
        "Total number of committed lot moves"
    )
    .expect("metric can be created");
    static ref LEDGER_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "ledger_failures_total",
            "Total number of failed ledger mutations"
        ),
        &["error_type"]
    )
    .expect("metric can be created");
}

/// Signed quantity change against one lot identity.
#[derive(Debug, Clone, Validate)]
pub struct AdjustLotCommand {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub batch: String,
    pub manufacture_code: ManufactureCode,
    #[validate(length(min = 1, max = 32))]
    pub location: String,
    /// Positive to add stock, negative to remove. Never zero.
    pub delta: i32,
    #[validate(length(min = 1, max = 100))]
    pub reason: String,
    pub unit_cost: Option<Decimal>,
    /// On-hand snapshot the caller based its decision on. When set, the
    /// ledger re-validates it inside the hold and fails with a concurrency
    /// conflict if another mutation got there first.
    pub expected_on_hand: Option<i32>,
}

/// All-or-nothing relocation of quantity between two lot identities.
#[derive(Debug, Clone, Validate)]
pub struct MoveLotCommand {
    pub product_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub batch: String,
    pub manufacture_code: ManufactureCode,
    #[validate(length(min = 1, max = 32))]
    pub from_location: String,
    #[validate(length(min = 1, max = 32))]
    pub to_location: String,
    /// Destination warehouse for cross-warehouse moves; defaults to the
    /// context warehouse.
    pub to_warehouse_id: Option<Uuid>,
    #[validate(range(min = 1))]
    pub quantity: i32,
    pub expected_on_hand: Option<i32>,
}

/// Optional narrowing filters for availability queries.
#[derive(Debug, Clone, Default)]
pub struct AvailabilityFilter {
    pub batch: Option<String>,
    pub manufacture_code: Option<ManufactureCode>,
    pub location: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LotAdjustment {
    pub lot_id: Uuid,
    pub previous_quantity: i32,
    pub new_quantity: i32,
}

#[derive(Debug, Clone)]
pub struct LotMove {
    pub from_lot_id: Uuid,
    pub to_lot_id: Uuid,
    pub quantity: i32,
}

/// The inventory ledger: single source of truth for how many units of
/// which product, batch, and manufacture code sit in which location.
///
/// Workflows never mutate quantities directly; every stock change goes
/// through `adjust_lot` or `move_lot`, which take the affected lot and
/// location holds for the duration of the one operation.
#[derive(Clone)]
pub struct InventoryService {
    store: Arc<Store>,
    holds: Arc<HoldRegistry>,
    capacity: CapacityService,
    event_sender: EventSender,
}

impl InventoryService {
    pub fn new(
        store: Arc<Store>,
        holds: Arc<HoldRegistry>,
        capacity: CapacityService,
        event_sender: EventSender,
    ) -> Self {
        Self {
            store,
            holds,
            capacity,
            event_sender,
        }
    }

    /// Applies a signed quantity change to the matching lot, creating it on
    /// first positive stock and retiring it when the quantity reaches
    /// exactly zero.
    #[instrument(skip(self, ctx, cmd), fields(product_id = %cmd.product_id, location = %cmd.location, delta = cmd.delta))]
    pub async fn adjust_lot(
        &self,
        ctx: &RequestContext,
        cmd: AdjustLotCommand,
    ) -> Result<LotAdjustment, ServiceError> {
        cmd.validate().map_err(|e| self.fail(e.into()))?;
        if cmd.delta == 0 {
            return Err(self.fail(ServiceError::ValidationError(
                "adjustment delta must be non-zero".into(),
            )));
        }

        let key = LotKey {
            product_id: cmd.product_id,
            batch: cmd.batch.clone(),
            manufacture_code: cmd.manufacture_code,
            warehouse_id: ctx.warehouse_id(),
            location: cmd.location.clone(),
        };

        let hold = self
            .holds
            .acquire(vec![
                HoldKey::Lot(key.clone()),
                HoldKey::Location(key.warehouse_id, key.location.clone()),
            ])
            .await;

        let result = self
            .apply_delta(
                ctx,
                &key,
                cmd.delta,
                cmd.unit_cost,
                &cmd.reason,
                cmd.expected_on_hand,
            )
            .map_err(|e| self.fail(e))?;

        STOCK_ADJUSTMENTS.inc();
        info!(
            lot_id = %result.lot_id,
            previous = result.previous_quantity,
            new = result.new_quantity,
            reason = %cmd.reason,
            "Stock adjusted"
        );

        drop(hold);
        self.event_sender
            .send(Event::StockAdjusted {
                product_id: key.product_id,
                warehouse_id: key.warehouse_id,
                location: key.location,
                previous_quantity: result.previous_quantity,
                new_quantity: result.new_quantity,
                reason: cmd.reason,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(result)
    }

    /// Moves quantity between two locations as one atomic operation:
    /// either both the decrement and the increment commit, or neither.
    #[instrument(skip(self, ctx, cmd), fields(product_id = %cmd.product_id, from = %cmd.from_location, to = %cmd.to_location, quantity = cmd.quantity))]
    pub async fn move_lot(
        &self,
        ctx: &RequestContext,
        cmd: MoveLotCommand,
    ) -> Result<LotMove, ServiceError> {
        cmd.validate().map_err(|e| self.fail(e.into()))?;

        let to_warehouse_id = cmd.to_warehouse_id.unwrap_or_else(|| ctx.warehouse_id());
        if to_warehouse_id == ctx.warehouse_id() && cmd.from_location == cmd.to_location {
            return Err(self.fail(ServiceError::ValidationError(
                "source and destination are the same location".into(),
            )));
        }

        let src = LotKey {
            product_id: cmd.product_id,
            batch: cmd.batch.clone(),
            manufacture_code: cmd.manufacture_code,
            warehouse_id: ctx.warehouse_id(),
            location: cmd.from_location.clone(),
        };
        let dst = LotKey {
            location: cmd.to_location.clone(),
            warehouse_id: to_warehouse_id,
            ..src.clone()
        };

        let hold = self
            .holds
            .acquire(vec![
                HoldKey::Lot(src.clone()),
                HoldKey::Lot(dst.clone()),
                HoldKey::Location(src.warehouse_id, src.location.clone()),
                HoldKey::Location(dst.warehouse_id, dst.location.clone()),
            ])
            .await;

        let result = self
            .apply_move(ctx, &src, &dst, cmd.quantity, cmd.expected_on_hand)
            .map_err(|e| self.fail(e))?;

        STOCK_MOVES.inc();
        info!(
            from_lot_id = %result.from_lot_id,
            to_lot_id = %result.to_lot_id,
            quantity = result.quantity,
            "Stock moved"
        );

        drop(hold);
        self.event_sender
            .send(Event::StockMoved {
                product_id: src.product_id,
                warehouse_id: src.warehouse_id,
                from_location: src.location,
                to_location: dst.location,
                quantity: cmd.quantity,
            })
            .await
            .map_err(ServiceError::EventError)?;

        Ok(result)
    }

    /// Lots available for picking, oldest manufacture code first.
    ///
    /// Read-only snapshot; callers re-validate through `expected_on_hand`
    /// or simply let the mutating call re-check inside its hold.
    pub fn query_available(
        &self,
        ctx: &RequestContext,
        product_id: Uuid,
        filter: &AvailabilityFilter,
    ) -> Vec<Lot> {
        let mut lots: Vec<Lot> = self
            .store
            .lots
            .iter()
            .filter(|lot| {
                !lot.retired
                    && lot.key.product_id == product_id
                    && lot.key.warehouse_id == ctx.warehouse_id()
                    && filter
                        .batch
                        .as_ref()
                        .map_or(true, |b| &lot.key.batch == b)
                    && filter
                        .manufacture_code
                        .map_or(true, |c| lot.key.manufacture_code == c)
                    && filter
                        .location
                        .as_ref()
                        .map_or(true, |l| &lot.key.location == l)
            })
            .map(|lot| lot.clone())
            .collect();
        lots.sort_by(|a, b| {
            a.key
                .manufacture_code
                .cmp(&b.key.manufacture_code)
                .then_with(|| a.key.location.cmp(&b.key.location))
        });
        lots
    }

    /// Audit trail of every mutation touching a product in the context
    /// warehouse, oldest first.
    pub fn movements_for_product(
        &self,
        ctx: &RequestContext,
        product_id: Uuid,
    ) -> Vec<StockMovement> {
        self.store
            .movements()
            .into_iter()
            .filter(|m| m.product_id == product_id && m.warehouse_id == ctx.warehouse_id())
            .collect()
    }

    fn fail(&self, err: ServiceError) -> ServiceError {
        LEDGER_FAILURES.with_label_values(&[err.code()]).inc();
        err
    }

    /// Core delta application. Caller must hold the lot and its location.
    fn apply_delta(
        &self,
        ctx: &RequestContext,
        key: &LotKey,
        delta: i32,
        unit_cost: Option<Decimal>,
        reason: &str,
        expected_on_hand: Option<i32>,
    ) -> Result<LotAdjustment, ServiceError> {
        let live = self.store.live_lot_id(key);
        let current = live
            .and_then(|id| self.store.lot(id))
            .map(|l| l.quantity)
            .unwrap_or(0);
        if let Some(expected) = expected_on_hand {
            if expected != current {
                return Err(ServiceError::ConcurrencyConflict(format!(
                    "lot at {} holds {} units, caller expected {}",
                    key.location, current, expected
                )));
            }
        }

        if delta > 0 {
            let product = self
                .store
                .product(key.product_id)
                .ok_or_else(|| ServiceError::not_found("Product", key.product_id))?;
            self.capacity.reserve(key.warehouse_id, &key.location, delta)?;

            let result = match live {
                Some(lot_id) => {
                    let mut lot = self.store.lots.get_mut(&lot_id).ok_or_else(|| {
                        ServiceError::InternalError("live lot index points at a missing lot".into())
                    })?;
                    let previous = lot.quantity;
                    lot.quantity += delta;
                    if unit_cost.is_some() {
                        lot.unit_cost = unit_cost;
                    }
                    lot.updated_at = Utc::now();
                    LotAdjustment {
                        lot_id,
                        previous_quantity: previous,
                        new_quantity: previous + delta,
                    }
                }
                None => {
                    let expires_on = key.manufacture_code.expiry(product.shelf_life_weeks);
                    let lot = Lot::new(key.clone(), delta, expires_on, unit_cost);
                    let lot_id = lot.id;
                    self.store.live_lots.insert(key.clone(), lot_id);
                    self.store.lots.insert(lot_id, lot);
                    LotAdjustment {
                        lot_id,
                        previous_quantity: 0,
                        new_quantity: delta,
                    }
                }
            };
            self.record(ctx, key, delta, &result, reason);
            Ok(result)
        } else {
            let lot_id = live.ok_or_else(|| {
                ServiceError::InsufficientStock(format!(
                    "no stock of product {} batch {} code {} at {}",
                    key.product_id, key.batch, key.manufacture_code, key.location
                ))
            })?;
            let retired;
            let result = {
                let mut lot = self.store.lots.get_mut(&lot_id).ok_or_else(|| {
                    ServiceError::InternalError("live lot index points at a missing lot".into())
                })?;
                let previous = lot.quantity;
                if previous + delta < 0 {
                    return Err(ServiceError::InsufficientStock(format!(
                        "lot at {} holds {} units, cannot remove {}",
                        key.location, previous, -delta
                    )));
                }
                lot.quantity += delta;
                lot.updated_at = Utc::now();
                retired = lot.quantity == 0;
                if retired {
                    lot.retired = true;
                }
                LotAdjustment {
                    lot_id,
                    previous_quantity: previous,
                    new_quantity: previous + delta,
                }
            };
            if retired {
                self.store.live_lots.remove(key);
            }
            self.capacity.release(key.warehouse_id, &key.location, -delta)?;
            self.record(ctx, key, delta, &result, reason);
            Ok(result)
        }
    }

    /// Core move application. Caller must hold both lots and locations.
    /// All failure checks run before the first mutation, so a failed move
    /// leaves no trace.
    fn apply_move(
        &self,
        ctx: &RequestContext,
        src: &LotKey,
        dst: &LotKey,
        quantity: i32,
        expected_on_hand: Option<i32>,
    ) -> Result<LotMove, ServiceError> {
        let src_lot_id = self.store.live_lot_id(src).ok_or_else(|| {
            ServiceError::InsufficientStock(format!(
                "no stock of product {} batch {} code {} at {}",
                src.product_id, src.batch, src.manufacture_code, src.location
            ))
        })?;
        let src_lot = self.store.lot(src_lot_id).ok_or_else(|| {
            ServiceError::InternalError("live lot index points at a missing lot".into())
        })?;

        if let Some(expected) = expected_on_hand {
            if expected != src_lot.quantity {
                return Err(ServiceError::ConcurrencyConflict(format!(
                    "lot at {} holds {} units, caller expected {}",
                    src.location, src_lot.quantity, expected
                )));
            }
        }
        if src_lot.quantity < quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "lot at {} holds {} units, cannot move {}",
                src.location, src_lot.quantity, quantity
            )));
        }

        // Destination capacity is the last fallible step; nothing has been
        // mutated yet when it rejects the move.
        self.capacity
            .reserve(dst.warehouse_id, &dst.location, quantity)?;

        let src_retired;
        let src_result = {
            let mut lot = self.store.lots.get_mut(&src_lot_id).ok_or_else(|| {
                ServiceError::InternalError("live lot index points at a missing lot".into())
            })?;
            let previous = lot.quantity;
            lot.quantity -= quantity;
            lot.updated_at = Utc::now();
            src_retired = lot.quantity == 0;
            if src_retired {
                lot.retired = true;
            }
            LotAdjustment {
                lot_id: src_lot_id,
                previous_quantity: previous,
                new_quantity: previous - quantity,
            }
        };
        if src_retired {
            self.store.live_lots.remove(src);
        }
        self.capacity
            .release(src.warehouse_id, &src.location, quantity)?;
        self.record(ctx, src, -quantity, &src_result, "move out");

        let dst_result = match self.store.live_lot_id(dst) {
            Some(dst_lot_id) => {
                let mut lot = self.store.lots.get_mut(&dst_lot_id).ok_or_else(|| {
                    ServiceError::InternalError("live lot index points at a missing lot".into())
                })?;
                let previous = lot.quantity;
                lot.quantity += quantity;
                lot.updated_at = Utc::now();
                LotAdjustment {
                    lot_id: dst_lot_id,
                    previous_quantity: previous,
                    new_quantity: previous + quantity,
                }
            }
            None => {
                let lot = Lot::new(
                    dst.clone(),
                    quantity,
                    src_lot.expires_on,
                    src_lot.unit_cost,
                );
                let lot_id = lot.id;
                self.store.live_lots.insert(dst.clone(), lot_id);
                self.store.lots.insert(lot_id, lot);
                LotAdjustment {
                    lot_id,
                    previous_quantity: 0,
                    new_quantity: quantity,
                }
            }
        };
        self.record(ctx, dst, quantity, &dst_result, "move in");

        Ok(LotMove {
            from_lot_id: src_lot_id,
            to_lot_id: dst_result.lot_id,
            quantity,
        })
    }

    fn record(
        &self,
        ctx: &RequestContext,
        key: &LotKey,
        delta: i32,
        result: &LotAdjustment,
        reason: &str,
    ) {
        self.store.record_movement(StockMovement {
            id: Uuid::new_v4(),
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            location: key.location.clone(),
            batch: key.batch.clone(),
            manufacture_code: key.manufacture_code,
            quantity_delta: delta,
            previous_quantity: result.previous_quantity,
            new_quantity: result.new_quantity,
            reason: reason.to_string(),
            actor: ctx.actor().to_string(),
            occurred_at: Utc::now(),
        });
    }
}
