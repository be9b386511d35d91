//! Returns workflow: item-by-item inspection, condition-driven
//! disposition, and parent-order state recompute.

mod common;

use assert_matches::assert_matches;
use common::{deliver_order, TestApp, DOT};
use warehouse_core::{
    config::AppConfig,
    errors::ServiceError,
    models::{
        location::LocationKind,
        order::OrderStatus,
        rma::{Disposition, ReturnCondition, ReturnStatus},
    },
    services::returns::{CreateReturnCommand, InspectReturnItemCommand, NewReturnItem},
};

fn return_command(order_id: uuid::Uuid, product_id: uuid::Uuid, qty: i32) -> CreateReturnCommand {
    CreateReturnCommand {
        order_id,
        rma_number: None,
        items: vec![NewReturnItem {
            product_id,
            manufacture_code: DOT.into(),
            batch: None,
            expected_qty: qty,
        }],
    }
}

#[tokio::test]
async fn damaged_units_never_re_enter_stock() {
    let app = TestApp::new();
    let ctx = app.ctx();
    let delivered = deliver_order(&app, 3).await;
    let on_hand_before = app
        .state
        .store
        .on_hand(delivered.product.id, app.warehouse_id);

    let rma = app
        .state
        .returns
        .create_return(&ctx, return_command(delivered.order_id, delivered.product.id, 3))
        .await
        .unwrap();
    let item_id = rma.items[0].id;

    let inspected = app
        .state
        .returns
        .inspect_return_item(
            &ctx,
            InspectReturnItemCommand {
                return_id: rma.id,
                item_id,
                condition: ReturnCondition::Damaged,
                quantity: 3,
                location: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(inspected.disposition, Disposition::RecordOnly);
    assert!(inspected.unit_codes.is_empty());
    assert_eq!(inspected.return_status, ReturnStatus::Completed);
    assert_eq!(
        app.state
            .store
            .on_hand(delivered.product.id, app.warehouse_id),
        on_hand_before
    );

    let stored = app.state.store.return_order(rma.id).unwrap();
    assert_eq!(stored.items[0].processed_qty, 3);
    assert!(stored.items[0].is_inspected());
}

#[tokio::test]
async fn sellable_units_restock_with_fresh_stickers() {
    let app = TestApp::new();
    let ctx = app.ctx();
    let delivered = deliver_order(&app, 5).await;

    let rma = app
        .state
        .returns
        .create_return(&ctx, return_command(delivered.order_id, delivered.product.id, 2))
        .await
        .unwrap();
    let item_id = rma.items[0].id;

    let inspected = app
        .state
        .returns
        .inspect_return_item(
            &ctx,
            InspectReturnItemCommand {
                return_id: rma.id,
                item_id,
                condition: ReturnCondition::Sellable,
                quantity: 2,
                location: Some("A1".into()),
            },
        )
        .await
        .unwrap();

    assert_eq!(inspected.disposition, Disposition::Restock);
    assert_eq!(inspected.unit_codes.len(), 2);
    assert_eq!(
        app.state
            .store
            .on_hand(delivered.product.id, app.warehouse_id),
        2
    );
    // The restock stickers are new, not the originals.
    for code in &inspected.unit_codes {
        assert!(!delivered.codes.contains(code));
    }
    assert_eq!(inspected.order_status, OrderStatus::PartiallyReturned);
}

#[tokio::test]
async fn restocking_requires_a_location() {
    let app = TestApp::new();
    let ctx = app.ctx();
    let delivered = deliver_order(&app, 2).await;

    let rma = app
        .state
        .returns
        .create_return(&ctx, return_command(delivered.order_id, delivered.product.id, 2))
        .await
        .unwrap();
    let item_id = rma.items[0].id;

    let err = app
        .state
        .returns
        .inspect_return_item(
            &ctx,
            InspectReturnItemCommand {
                return_id: rma.id,
                item_id,
                condition: ReturnCondition::Sellable,
                quantity: 1,
                location: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn inspection_cannot_exceed_expected_quantity() {
    let app = TestApp::new();
    let ctx = app.ctx();
    let delivered = deliver_order(&app, 3).await;

    let rma = app
        .state
        .returns
        .create_return(&ctx, return_command(delivered.order_id, delivered.product.id, 3))
        .await
        .unwrap();
    let item_id = rma.items[0].id;

    app.state
        .returns
        .inspect_return_item(
            &ctx,
            InspectReturnItemCommand {
                return_id: rma.id,
                item_id,
                condition: ReturnCondition::Scrap,
                quantity: 2,
                location: None,
            },
        )
        .await
        .unwrap();

    let err = app
        .state
        .returns
        .inspect_return_item(
            &ctx,
            InspectReturnItemCommand {
                return_id: rma.id,
                item_id,
                condition: ReturnCondition::Scrap,
                quantity: 2,
                location: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let stored = app.state.store.return_order(rma.id).unwrap();
    assert_eq!(stored.status, ReturnStatus::Open);
    assert_eq!(stored.items[0].processed_qty, 2);
}

#[tokio::test]
async fn order_moves_to_returned_once_everything_is_processed() {
    let app = TestApp::new();
    let ctx = app.ctx();
    let delivered = deliver_order(&app, 4).await;

    let rma = app
        .state
        .returns
        .create_return(&ctx, return_command(delivered.order_id, delivered.product.id, 4))
        .await
        .unwrap();
    let item_id = rma.items[0].id;

    let inspected = app
        .state
        .returns
        .inspect_return_item(
            &ctx,
            InspectReturnItemCommand {
                return_id: rma.id,
                item_id,
                condition: ReturnCondition::Damaged,
                quantity: 1,
                location: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(inspected.order_status, OrderStatus::PartiallyReturned);
    assert_eq!(inspected.return_status, ReturnStatus::Open);

    let inspected = app
        .state
        .returns
        .inspect_return_item(
            &ctx,
            InspectReturnItemCommand {
                return_id: rma.id,
                item_id,
                condition: ReturnCondition::Sellable,
                quantity: 3,
                location: Some("A1".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(inspected.return_status, ReturnStatus::Completed);
    assert_eq!(inspected.order_status, OrderStatus::Returned);

    // A completed return takes no further inspections.
    let err = app
        .state
        .returns
        .inspect_return_item(
            &ctx,
            InspectReturnItemCommand {
                return_id: rma.id,
                item_id,
                condition: ReturnCondition::Scrap,
                quantity: 1,
                location: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidStateTransition(_));
}

#[tokio::test]
async fn returns_only_open_against_delivered_orders() {
    let app = TestApp::new();
    let ctx = app.ctx();
    let product = app.seed_product();
    app.seed_standard_layout();
    app.stock_units(&product, "A1", 2).await;

    let order = app
        .state
        .orders
        .create_order(
            &ctx,
            warehouse_core::services::orders::CreateOrderCommand {
                customer: "Still Open".into(),
                required_ship_date: None,
                lines: vec![warehouse_core::services::orders::NewOrderLine {
                    product_id: product.id,
                    quantity: 2,
                }],
            },
        )
        .await
        .unwrap();

    let err = app
        .state
        .returns
        .create_return(&ctx, return_command(order.id, product.id, 1))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidStateTransition(_));

    // A product that was never on the order is rejected outright.
    let delivered = deliver_order(&app, 1).await;
    let stranger = app.seed_product();
    let err = app
        .state
        .returns
        .create_return(&ctx, return_command(delivered.order_id, stranger.id, 1))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn disposition_policy_is_configurable() {
    // Site policy: damaged stock is refurbished, so it restocks into a
    // quarantine-kind location instead of being written off.
    let mut config = AppConfig::default();
    config.returns.damaged = Disposition::Restock;
    let app = TestApp::with_config(config);
    let ctx = app.ctx();

    let delivered = deliver_order(&app, 2).await;
    app.seed_location("QA-HOLD", LocationKind::Quarantine, 100);

    let rma = app
        .state
        .returns
        .create_return(&ctx, return_command(delivered.order_id, delivered.product.id, 2))
        .await
        .unwrap();
    let item_id = rma.items[0].id;

    let inspected = app
        .state
        .returns
        .inspect_return_item(
            &ctx,
            InspectReturnItemCommand {
                return_id: rma.id,
                item_id,
                condition: ReturnCondition::Damaged,
                quantity: 2,
                location: Some("QA-HOLD".into()),
            },
        )
        .await
        .unwrap();

    assert_eq!(inspected.disposition, Disposition::Restock);
    assert_eq!(
        app.state
            .store
            .on_hand(delivered.product.id, app.warehouse_id),
        2
    );
    assert_eq!(
        app.state.capacity.get(&ctx, "QA-HOLD").unwrap().occupied_units,
        2
    );
}
