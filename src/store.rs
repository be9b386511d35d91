use dashmap::DashMap;
use std::sync::{Mutex, PoisonError};
use uuid::Uuid;

use crate::models::{
    location::Location,
    lot::{Lot, LotKey},
    movement::StockMovement,
    order::OutboundOrder,
    product::Product,
    receipt::InboundReceipt,
    rma::ReturnOrder,
    transfer::TransferOrder,
    unique_unit::UniqueUnit,
};

/// In-memory entity arenas, keyed by identifier.
///
/// This is the in-process stand-in for the persistent storage collaborator:
/// every entity row lives in exactly one arena, and cross-entity references
/// are identifiers, never embedded back-pointers. Services receive the store
/// as `Arc<Store>` the same way a connection pool would be handed around.
///
/// The arenas themselves only guarantee per-entry consistency; logical
/// serialization of multi-entity operations is the hold registry's job.
#[derive(Default)]
pub struct Store {
    pub(crate) products: DashMap<Uuid, Product>,
    /// Locations keyed by (warehouse, code).
    pub(crate) locations: DashMap<(Uuid, String), Location>,
    /// All lots ever created, retired ones included.
    pub(crate) lots: DashMap<Uuid, Lot>,
    /// Index of non-retired lots by identity.
    pub(crate) live_lots: DashMap<LotKey, Uuid>,
    pub(crate) units: DashMap<String, UniqueUnit>,
    pub(crate) receipts: DashMap<Uuid, InboundReceipt>,
    pub(crate) orders: DashMap<Uuid, OutboundOrder>,
    pub(crate) returns: DashMap<Uuid, ReturnOrder>,
    pub(crate) transfers: DashMap<Uuid, TransferOrder>,
    movements: Mutex<Vec<StockMovement>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // Catalog seeding and lookups. Product and location registration are
    // master-data concerns of the surrounding system; the core only needs
    // them present.

    pub fn add_product(&self, product: Product) {
        self.products.insert(product.id, product);
    }

    pub fn product(&self, id: Uuid) -> Option<Product> {
        self.products.get(&id).map(|p| p.clone())
    }

    pub fn location(&self, warehouse_id: Uuid, code: &str) -> Option<Location> {
        self.locations
            .get(&(warehouse_id, code.to_string()))
            .map(|l| l.clone())
    }

    // Read access for callers and tests. Everything returns owned clones;
    // mutable quantity state never leaves the store.

    pub fn lot(&self, id: Uuid) -> Option<Lot> {
        self.lots.get(&id).map(|l| l.clone())
    }

    pub fn live_lot_id(&self, key: &LotKey) -> Option<Uuid> {
        self.live_lots.get(key).map(|id| *id)
    }

    pub fn unit(&self, code: &str) -> Option<UniqueUnit> {
        self.units.get(code).map(|u| u.clone())
    }

    pub fn receipt(&self, id: Uuid) -> Option<InboundReceipt> {
        self.receipts.get(&id).map(|r| r.clone())
    }

    pub fn order(&self, id: Uuid) -> Option<OutboundOrder> {
        self.orders.get(&id).map(|o| o.clone())
    }

    pub fn return_order(&self, id: Uuid) -> Option<ReturnOrder> {
        self.returns.get(&id).map(|r| r.clone())
    }

    pub fn transfer(&self, id: Uuid) -> Option<TransferOrder> {
        self.transfers.get(&id).map(|t| t.clone())
    }

    /// Total non-retired quantity of a product across a warehouse.
    pub fn on_hand(&self, product_id: Uuid, warehouse_id: Uuid) -> i32 {
        self.lots
            .iter()
            .filter(|l| {
                !l.retired
                    && l.key.product_id == product_id
                    && l.key.warehouse_id == warehouse_id
            })
            .map(|l| l.quantity)
            .sum()
    }

    /// Snapshot of the audit log.
    pub fn movements(&self) -> Vec<StockMovement> {
        self.movements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record_movement(&self, movement: StockMovement) {
        self.movements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(movement);
    }
}
