//! Concurrency tests: per-lot and per-location holds must serialize
//! competing mutations so stock is never over-allocated.

mod common;

use common::{TestApp, BATCH, DOT};
use std::sync::Arc;
use warehouse_core::{
    errors::ServiceError,
    models::{location::LocationKind, lot::ManufactureCode, product::Product},
    services::{
        inventory::{AdjustLotCommand, MoveLotCommand},
        orders::{CreateOrderCommand, NewOrderLine, PickItemCommand},
    },
};

fn take(product: &Product, location: &str, quantity: i32) -> AdjustLotCommand {
    AdjustLotCommand {
        product_id: product.id,
        batch: BATCH.into(),
        manufacture_code: ManufactureCode::parse(DOT).unwrap(),
        location: location.into(),
        delta: -quantity,
        reason: "concurrent take".into(),
        unit_cost: None,
        expected_on_hand: None,
    }
}

#[tokio::test]
async fn two_competing_picks_cannot_both_win_the_last_units() {
    let app = Arc::new(TestApp::new());
    let ctx = app.ctx();
    let product = app.seed_product();
    app.seed_standard_layout();
    app.stock_units(&product, "A1", 5).await;

    let order = app
        .state
        .orders
        .create_order(
            &ctx,
            CreateOrderCommand {
                customer: "Race Customer".into(),
                required_ship_date: None,
                lines: vec![NewOrderLine {
                    product_id: product.id,
                    quantity: 8,
                }],
            },
        )
        .await
        .unwrap();
    let item_id = order.items[0].id;

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let app = app.clone();
        let ctx = ctx.clone();
        let product_id = product.id;
        tasks.push(tokio::spawn(async move {
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
                        quantity: 4,
                        expected_on_hand: None,
                    },
                )
                .await
                .map(|_| product_id)
        }));
    }

    let mut successes = 0;
    let mut insufficient = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(ServiceError::InsufficientStock(_)) => insufficient += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(insufficient, 1);

    assert_eq!(app.state.store.on_hand(product.id, app.warehouse_id), 1);
    let picked = app.state.store.order(order.id).unwrap().total_picked();
    assert_eq!(picked, 4);
}

#[tokio::test]
async fn exactly_as_many_single_unit_takes_succeed_as_there_is_stock() {
    let app = Arc::new(TestApp::new());
    let ctx = app.ctx();
    let product = app.seed_product();
    app.seed_location("A1", LocationKind::Bin, 100);

    app.state
        .inventory
        .adjust_lot(
            &ctx,
            AdjustLotCommand {
                product_id: product.id,
                batch: BATCH.into(),
                manufacture_code: ManufactureCode::parse(DOT).unwrap(),
                location: "A1".into(),
                delta: 10,
                reason: "seed".into(),
                unit_cost: None,
                expected_on_hand: None,
            },
        )
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let app = app.clone();
        let ctx = ctx.clone();
        let product = product.clone();
        tasks.push(tokio::spawn(async move {
            app.state
                .inventory
                .adjust_lot(&ctx, take(&product, "A1", 1))
                .await
                .is_ok()
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap() {
            successes += 1;
        }
    }
    assert_eq!(
        successes, 10,
        "exactly 10 single-unit takes should succeed; got {}",
        successes
    );
    assert_eq!(app.state.store.on_hand(product.id, app.warehouse_id), 0);
}

#[tokio::test]
async fn concurrent_moves_respect_destination_capacity() {
    let app = Arc::new(TestApp::new());
    let ctx = app.ctx();
    let product = app.seed_product();
    app.seed_location("A1", LocationKind::Bin, 100);
    app.seed_location("B1", LocationKind::Bin, 100);
    app.seed_location("TIGHT", LocationKind::Bin, 5);

    for source in ["A1", "B1"] {
        app.state
            .inventory
            .adjust_lot(
                &ctx,
                AdjustLotCommand {
                    product_id: product.id,
                    batch: BATCH.into(),
                    manufacture_code: ManufactureCode::parse(DOT).unwrap(),
                    location: source.into(),
                    delta: 3,
                    reason: "seed".into(),
                    unit_cost: None,
                    expected_on_hand: None,
                },
            )
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for source in ["A1", "B1"] {
        let app = app.clone();
        let ctx = ctx.clone();
        let product_id = product.id;
        tasks.push(tokio::spawn(async move {
            app.state
                .inventory
                .move_lot(
                    &ctx,
                    MoveLotCommand {
                        product_id,
                        batch: BATCH.into(),
                        manufacture_code: ManufactureCode::parse(DOT).unwrap(),
                        from_location: source.into(),
                        to_location: "TIGHT".into(),
                        to_warehouse_id: None,
                        quantity: 3,
                        expected_on_hand: None,
                    },
                )
                .await
                .is_ok()
        }));
    }

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap() {
            successes += 1;
        }
    }
    // 3 + 3 into a 5-unit location: only one move fits.
    assert_eq!(successes, 1);
    let occupied = app.state.capacity.get(&ctx, "TIGHT").unwrap().occupied_units;
    assert_eq!(occupied, 3);
    assert_eq!(app.state.store.on_hand(product.id, app.warehouse_id), 6);
}

#[tokio::test]
async fn stale_snapshot_loses_the_race_cleanly() {
    let app = Arc::new(TestApp::new());
    let ctx = app.ctx();
    let product = app.seed_product();
    app.seed_location("A1", LocationKind::Bin, 100);

    app.state
        .inventory
        .adjust_lot(
            &ctx,
            AdjustLotCommand {
                product_id: product.id,
                batch: BATCH.into(),
                manufacture_code: ManufactureCode::parse(DOT).unwrap(),
                location: "A1".into(),
                delta: 5,
                reason: "seed".into(),
                unit_cost: None,
                expected_on_hand: None,
            },
        )
        .await
        .unwrap();

    // Both callers read "5 on hand" and act on it; the serialized loser
    // must observe the winner's result as a conflict, not oversell.
    let mut tasks = Vec::new();
    for _ in 0..2 {
        let app = app.clone();
        let ctx = ctx.clone();
        let product = product.clone();
        tasks.push(tokio::spawn(async move {
            let mut cmd = take(&product, "A1", 2);
            cmd.expected_on_hand = Some(5);
            app.state.inventory.adjust_lot(&ctx, cmd).await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(ServiceError::ConcurrencyConflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(conflicts, 1);
    assert_eq!(app.state.store.on_hand(product.id, app.warehouse_id), 3);
}
