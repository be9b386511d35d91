#![allow(dead_code)]

use uuid::Uuid;

use warehouse_core::{
    config::AppConfig,
    context::RequestContext,
    events,
    models::{location::LocationKind, order::DriverKind, product::Product},
    services::{
        capacity::RegisterLocationCommand,
        orders::{AssignDriverCommand, ConfirmDeliveryCommand, CreateOrderCommand, NewOrderLine, PickItemCommand, StageOrderCommand},
        receiving::{CreateReceiptCommand, NewReceiptContainer, NewReceiptItem, PutawayItemCommand, ReceiveItemCommand},
    },
    AppState,
};

pub const BATCH: &str = "B1";
pub const DOT: &str = "0124";

/// Harness wiring up the full service graph with a draining event loop.
pub struct TestApp {
    pub state: AppState,
    pub warehouse_id: Uuid,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let (state, rx) = AppState::new(config);
        let event_task = tokio::spawn(events::process_events(rx));
        Self {
            state,
            warehouse_id: Uuid::new_v4(),
            _event_task: event_task,
        }
    }

    pub fn ctx(&self) -> RequestContext {
        RequestContext::new(self.warehouse_id, "tester")
    }

    pub fn ctx_for(&self, warehouse_id: Uuid) -> RequestContext {
        RequestContext::new(warehouse_id, "tester")
    }

    pub fn seed_product(&self) -> Product {
        let short = Uuid::new_v4().simple().to_string();
        let product = Product::new(
            format!("SKU-{}", &short[..8]),
            format!("ART-{}", &short[..6]),
            "Test product",
            52,
        );
        self.state.store.add_product(product.clone());
        product
    }

    pub fn seed_location(&self, code: &str, kind: LocationKind, max_units: i32) {
        self.state
            .capacity
            .register_location(
                &self.ctx(),
                RegisterLocationCommand {
                    code: code.into(),
                    kind,
                    max_units,
                },
            )
            .unwrap();
    }

    /// Registers the default dock plus a generously sized bin and staging
    /// area. Locations that are already registered are left as they are, so
    /// tests can layer this over their own layout.
    pub fn seed_standard_layout(&self) {
        let ctx = self.ctx();
        for (code, kind) in [
            ("DOCK", LocationKind::Dock),
            ("A1", LocationKind::Bin),
            ("STAGE", LocationKind::Staging),
        ] {
            if self.state.capacity.get(&ctx, code).is_err() {
                self.seed_location(code, kind, 10_000);
            }
        }
    }

    /// Puts `quantity` units of a product into a bin the way stock really
    /// arrives: receipt at the dock, then put-away. Returns the sticker
    /// codes issued at receiving.
    pub async fn stock_units(&self, product: &Product, location: &str, quantity: i32) -> Vec<String> {
        self.stock_units_via_receipt(product, location, quantity)
            .await
            .unit_codes
    }

    /// Like `stock_units`, but also hands back the completed receipt id.
    pub async fn stock_units_via_receipt(
        &self,
        product: &Product,
        location: &str,
        quantity: i32,
    ) -> StockIntake {
        let ctx = self.ctx();
        let receipt = self
            .state
            .receiving
            .create_receipt(
                &ctx,
                CreateReceiptCommand {
                    supplier: "Seed Supplier".into(),
                    arrival_date: None,
                    containers: vec![NewReceiptContainer {
                        container_no: "C1".into(),
                        items: vec![NewReceiptItem {
                            product_id: product.id,
                            expected_qty: quantity,
                            batch: BATCH.into(),
                            manufacture_code: DOT.into(),
                            unit_cost: None,
                        }],
                    }],
                },
            )
            .await
            .unwrap();
        let item_id = receipt.containers[0].items[0].id;
        let received = self
            .state
            .receiving
            .receive_item(
                &ctx,
                ReceiveItemCommand {
                    receipt_id: receipt.id,
                    item_id,
                    quantity,
                    batch: None,
                    manufacture_code: None,
                    unit_cost: None,
                },
            )
            .await
            .unwrap();
        self.state
            .receiving
            .putaway_item(
                &ctx,
                PutawayItemCommand {
                    receipt_id: receipt.id,
                    item_id,
                    quantity,
                    location: location.into(),
                },
            )
            .await
            .unwrap();
        StockIntake {
            receipt_id: receipt.id,
            unit_codes: received.unit_codes,
        }
    }
}

/// Receipt id and sticker codes produced by a seeded stock intake.
pub struct StockIntake {
    pub receipt_id: Uuid,
    pub unit_codes: Vec<String>,
}

/// A fully delivered order plus everything needed to exercise returns.
pub struct DeliveredOrder {
    pub order_id: Uuid,
    pub product: Product,
    pub codes: Vec<String>,
    pub quantity: i32,
}

/// Drives one order of `quantity` units end to end: stock intake, pick,
/// stage, driver assignment, scan-verified pickup, shipment, and delivery
/// confirmation.
pub async fn deliver_order(app: &TestApp, quantity: i32) -> DeliveredOrder {
    let ctx = app.ctx();
    let product = app.seed_product();
    app.seed_standard_layout();
    let codes = app.stock_units(&product, "A1", quantity).await;

    let order = app
        .state
        .orders
        .create_order(
            &ctx,
            CreateOrderCommand {
                customer: "Returning Customer".into(),
                required_ship_date: None,
                lines: vec![NewOrderLine {
                    product_id: product.id,
                    quantity,
                }],
            },
        )
        .await
        .unwrap();
    let item_id = order.items[0].id;

    app.state
        .orders
        .pick_item(
            &ctx,
            PickItemCommand {
                order_id: order.id,
                item_id,
                location: "A1".into(),
                batch: BATCH.into(),
                manufacture_code: DOT.into(),
                quantity,
                expected_on_hand: None,
            },
        )
        .await
        .unwrap();
    app.state
        .orders
        .stage_order(
            &ctx,
            StageOrderCommand {
                order_id: order.id,
                staging_location: "STAGE".into(),
            },
        )
        .await
        .unwrap();
    app.state
        .orders
        .assign_driver(
            &ctx,
            AssignDriverCommand {
                order_id: order.id,
                driver_name: "Dana".into(),
                driver_kind: DriverKind::InHouse,
            },
        )
        .await
        .unwrap();
    for code in &codes {
        app.state
            .orders
            .scan_pickup_unit(&ctx, order.id, code)
            .await
            .unwrap();
    }
    app.state.orders.ship_order(&ctx, order.id).await.unwrap();
    app.state
        .orders
        .mark_out_for_delivery(&ctx, order.id)
        .await
        .unwrap();
    for code in &codes {
        app.state
            .orders
            .scan_delivery_unit(&ctx, order.id, code)
            .await
            .unwrap();
    }
    app.state
        .orders
        .confirm_delivery(
            &ctx,
            ConfirmDeliveryCommand {
                order_id: order.id,
                receiver_name: "Riley".into(),
                receiver_phone: "555-0100".into(),
                photo_ref: "photos/proof-1".into(),
            },
        )
        .await
        .unwrap();

    DeliveredOrder {
        order_id: order.id,
        product,
        codes,
        quantity,
    }
}
