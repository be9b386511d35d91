//! Inventory ledger and fulfillment workflow engine for warehouse
//! operations.
//!
//! The ledger (`services::inventory`) is the single source of truth for
//! how much of which product, batch, and manufacture code sits in which
//! location; the workflow services (receiving, orders, returns, transfers)
//! drive the physical-goods state machines and only ever touch stock
//! through the ledger. Presentation, persistence, and authentication are
//! external collaborators.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod logging;
pub mod models;
pub mod services;
pub mod store;

use std::sync::Arc;
use tokio::sync::mpsc;

use config::AppConfig;
use events::{Event, EventSender};
use services::{
    capacity::CapacityService, holds::HoldRegistry, inventory::InventoryService,
    orders::OrderService, receiving::ReceivingService, returns::ReturnService,
    transfers::TransferService, unique_units::UniqueUnitService,
};
use store::Store;

/// Bundle of the core's services over one shared store.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<Store>,
    pub event_sender: EventSender,
    pub capacity: CapacityService,
    pub inventory: InventoryService,
    pub unique_units: UniqueUnitService,
    pub receiving: ReceivingService,
    pub orders: OrderService,
    pub returns: ReturnService,
    pub transfers: TransferService,
}

impl AppState {
    /// Wires up the full service graph. The returned receiver feeds
    /// `events::process_events` (or a custom consumer); dropping it makes
    /// every subsequent mutation fail with an event error, so hold on to
    /// it.
    pub fn new(config: AppConfig) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        let event_sender = EventSender::new(tx);

        let store = Arc::new(Store::new());
        let holds = Arc::new(HoldRegistry::new());

        let capacity = CapacityService::new(store.clone());
        let inventory = InventoryService::new(
            store.clone(),
            holds.clone(),
            capacity.clone(),
            event_sender.clone(),
        );
        let unique_units = UniqueUnitService::new(store.clone());
        let receiving = ReceivingService::new(
            store.clone(),
            holds.clone(),
            inventory.clone(),
            unique_units.clone(),
            event_sender.clone(),
            config.dock_location_code.clone(),
        );
        let orders = OrderService::new(
            store.clone(),
            holds.clone(),
            inventory.clone(),
            unique_units.clone(),
            event_sender.clone(),
        );
        let returns = ReturnService::new(
            store.clone(),
            holds.clone(),
            inventory.clone(),
            unique_units.clone(),
            orders.clone(),
            event_sender.clone(),
            config.returns.clone(),
        );
        let transfers = TransferService::new(
            store.clone(),
            holds,
            inventory.clone(),
            event_sender.clone(),
        );

        (
            Self {
                config,
                store,
                event_sender,
                capacity,
                inventory,
                unique_units,
                receiving,
                orders,
                returns,
                transfers,
            },
            rx,
        )
    }
}
