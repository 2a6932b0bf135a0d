mod common;

use common::{checkout, line, Harness};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use inventory_service::schema::stock_reservations;
use inventory_service::ReservationManager;
use order_service::pricing::{CouponBook, FlatRateTax, MethodRates, Pricing, ShippingMethod};
use order_service::schema::orders;
use shared::*;

async fn order_count(harness: &Harness, user_id: i64) -> i64 {
    let mut conn = harness.pool.get().await.unwrap();
    orders::table
        .filter(orders::user_id.eq(user_id))
        .count()
        .get_result::<i64>(&mut conn)
        .await
        .unwrap()
}

async fn reservation_count(harness: &Harness, inventory_item_id: i64) -> i64 {
    let mut conn = harness.pool.get().await.unwrap();
    stock_reservations::table
        .filter(stock_reservations::inventory_item_id.eq(inventory_item_id))
        .count()
        .get_result::<i64>(&mut conn)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_create_order_reserves_stock() {
    let Some(pool) = common::test_pool().await else { return };
    let harness = Harness::new(pool.clone());
    let product = harness.product(500, true).await;
    let stock = harness.stock(product.id, None, 1, 5).await;
    let user_id = common::unique_id();

    let details = harness
        .orders
        .create_order(checkout(user_id, vec![line(&product, 2)]))
        .await
        .unwrap();

    let order = &details.order;
    assert_eq!(order.status().unwrap(), OrderStatus::Pending);
    assert_eq!(order.payment_status().unwrap(), PaymentStatus::Pending);
    assert_eq!(order.subtotal_amount, 1000);
    assert_eq!(order.total_amount, 1000);
    assert_eq!(order.billing_address, order.shipping_address);

    let order_number = order.order_number.clone().unwrap();
    assert!(order_number.starts_with("ORD-"));
    assert!(order_number.ends_with(&format!("-{:06}", order.id)));

    assert_eq!(details.items.len(), 1);
    assert_eq!(details.items[0].quantity, 2);
    assert_eq!(details.items[0].unit_price, 500);
    assert_eq!(details.items[0].total_price, 1000);
    assert_eq!(details.items[0].sku, product.sku);
    assert_eq!(details.history.len(), 1);
    assert_eq!(details.history[0].status, "pending");

    let stock = harness.item(stock.id).await;
    assert_eq!(stock.quantity, 5);
    assert_eq!(stock.reserved_quantity, 2);
    assert_eq!(stock.available_quantity, 3);

    let movements = harness.ledger.movements(stock.id, 100).await.unwrap();
    let reservations: Vec<_> = movements
        .iter()
        .filter(|m| m.movement_type().unwrap() == MovementType::Reservation)
        .collect();
    assert_eq!(reservations.len(), 1);
    assert_eq!(reservations[0].reference_id, Some(order.id));

    assert_eq!(*harness.carts.cleared.lock().unwrap(), vec![user_id]);

    let mut delivered = false;
    for _ in 0..50 {
        if !harness.notifier.sent.lock().unwrap().is_empty() {
            delivered = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(delivered, "order confirmation should be sent");
    assert_eq!(harness.notifier.sent.lock().unwrap()[0].order_number, order_number);
}

#[tokio::test]
async fn test_create_order_short_of_stock_changes_nothing() {
    let Some(pool) = common::test_pool().await else { return };
    let harness = Harness::new(pool);
    let product = harness.product(500, true).await;
    let stock = harness.stock(product.id, None, 1, 1).await;
    let user_id = common::unique_id();

    let err = harness
        .orders
        .create_order(checkout(user_id, vec![line(&product, 2)]))
        .await
        .unwrap_err();
    match err {
        CoreError::InsufficientInventory {
            product_id,
            requested,
            available,
            shortfall,
            ..
        } => {
            assert_eq!(product_id, product.id);
            assert_eq!(requested, 2);
            assert_eq!(available, 1);
            assert_eq!(shortfall, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let stock = harness.item(stock.id).await;
    assert_eq!(stock.reserved_quantity, 0);
    assert_eq!(stock.available_quantity, 1);
    assert_eq!(order_count(&harness, user_id).await, 0);
    assert!(harness.carts.cleared.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_cart_is_rejected() {
    let Some(pool) = common::test_pool().await else { return };
    let harness = Harness::new(pool);
    let user_id = common::unique_id();

    let err = harness
        .orders
        .create_order(checkout(user_id, Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::EmptyCart), "got {err:?}");
    assert_eq!(order_count(&harness, user_id).await, 0);
}

#[tokio::test]
async fn test_failing_line_rolls_back_whole_order() {
    let Some(pool) = common::test_pool().await else { return };
    let harness = Harness::new(pool);
    let in_stock = harness.product(300, true).await;
    let sold_out = harness.product(700, true).await;
    let first = harness.stock(in_stock.id, None, 1, 5).await;
    harness.stock(sold_out.id, None, 1, 0).await;
    let user_id = common::unique_id();

    let err = harness
        .orders
        .create_order(checkout(
            user_id,
            vec![line(&in_stock, 1), line(&sold_out, 1)],
        ))
        .await
        .unwrap_err();
    assert!(
        matches!(err, CoreError::InsufficientInventory { product_id, .. } if product_id == sold_out.id),
        "got {err:?}"
    );

    assert_eq!(harness.item(first.id).await.reserved_quantity, 0);
    assert_eq!(order_count(&harness, user_id).await, 0);

    // Only the opening balance is on the ledger and no hold was left behind.
    let movements = harness.ledger.movements(first.id, 100).await.unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type().unwrap(), MovementType::Inbound);
    assert_eq!(reservation_count(&harness, first.id).await, 0);
}

#[tokio::test]
async fn test_unknown_product_is_not_found() {
    let Some(pool) = common::test_pool().await else { return };
    let harness = Harness::new(pool);
    let product = harness.product(300, true).await;
    harness.stock(product.id, None, 1, 5).await;
    let user_id = common::unique_id();

    let mut missing = line(&product, 1);
    missing.product_id = -common::unique_id();

    let err = harness
        .orders
        .create_order(checkout(user_id, vec![line(&product, 1), missing]))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { entity: "product", .. }), "got {err:?}");
    assert_eq!(order_count(&harness, user_id).await, 0);
}

#[tokio::test]
async fn test_repeated_product_lines_share_the_stock_check() {
    let Some(pool) = common::test_pool().await else { return };
    let harness = Harness::new(pool);
    let product = harness.product(100, true).await;
    let stock = harness.stock(product.id, None, 1, 5).await;
    let user_id = common::unique_id();

    let err = harness
        .orders
        .create_order(checkout(user_id, vec![line(&product, 3), line(&product, 3)]))
        .await
        .unwrap_err();
    assert!(
        matches!(err, CoreError::InsufficientInventory { available: 2, .. }),
        "got {err:?}"
    );
    assert_eq!(harness.item(stock.id).await.reserved_quantity, 0);
}

#[tokio::test]
async fn test_reserves_from_warehouse_with_most_stock() {
    let Some(pool) = common::test_pool().await else { return };
    let harness = Harness::new(pool);
    let product = harness.product(100, true).await;
    let small = harness.stock(product.id, None, 1, 2).await;
    let large = harness.stock(product.id, None, 2, 9).await;

    harness
        .orders
        .create_order(checkout(common::unique_id(), vec![line(&product, 2)]))
        .await
        .unwrap();

    assert_eq!(harness.item(small.id).await.reserved_quantity, 0);
    assert_eq!(harness.item(large.id).await.reserved_quantity, 2);
}

#[tokio::test]
async fn test_variant_line_snapshots_variant() {
    let Some(pool) = common::test_pool().await else { return };
    let harness = Harness::new(pool);
    let product = harness.product(800, true).await;
    let variant = harness.variant(&product, "Blue").await;
    let stock = harness.stock(product.id, Some(variant.id), 1, 4).await;

    let mut cart_line = line(&product, 1);
    cart_line.variant_id = Some(variant.id);

    let details = harness
        .orders
        .create_order(checkout(common::unique_id(), vec![cart_line]))
        .await
        .unwrap();

    assert_eq!(details.items[0].variant_id, Some(variant.id));
    assert_eq!(details.items[0].variant_title.as_deref(), Some("Blue"));
    assert_eq!(details.items[0].sku, variant.sku);
    assert_eq!(harness.item(stock.id).await.reserved_quantity, 1);
}

#[tokio::test]
async fn test_untracked_product_needs_no_stock() {
    let Some(pool) = common::test_pool().await else { return };
    let harness = Harness::new(pool.clone());
    let product = harness.product(250, false).await;

    let details = harness
        .orders
        .create_order(checkout(common::unique_id(), vec![line(&product, 3)]))
        .await
        .unwrap();

    assert_eq!(details.order.subtotal_amount, 750);
    let reservations = ReservationManager::new(pool, chrono::Duration::hours(24))
        .for_order(details.order.id)
        .await
        .unwrap();
    assert!(reservations.is_empty());
}

#[tokio::test]
async fn test_totals_include_tax_shipping_and_coupon() {
    let Some(pool) = common::test_pool().await else { return };
    let pricing = Pricing::new(
        FlatRateTax { rate_bps: 1000 },
        MethodRates {
            standard: 500,
            express: 1500,
            overnight: 3000,
            free_standard_from: None,
        },
        "SAVE10=10%".parse::<CouponBook>().unwrap(),
    );
    let harness = Harness::with_pricing(pool, pricing);
    let product = harness.product(1000, true).await;
    harness.stock(product.id, None, 1, 10).await;

    let mut request = checkout(common::unique_id(), vec![line(&product, 2)]);
    request.shipping_method = ShippingMethod::Express;
    request.coupon_code = Some("save10".to_string());

    let order = harness.orders.create_order(request).await.unwrap().order;
    assert_eq!(order.subtotal_amount, 2000);
    assert_eq!(order.tax_amount, 200);
    assert_eq!(order.shipping_amount, 1500);
    assert_eq!(order.discount_amount, 200);
    assert_eq!(order.total_amount, 3500);
    assert_eq!(order.shipping_method, "express");
}

#[tokio::test]
async fn test_negative_cart_price_is_rejected() {
    let Some(pool) = common::test_pool().await else { return };
    let harness = Harness::new(pool);
    let product = harness.product(500, true).await;
    let stock = harness.stock(product.id, None, 1, 5).await;
    let user_id = common::unique_id();

    let mut request = checkout(user_id, vec![line(&product, 1)]);
    request.cart.lines[0].unit_price = -500;

    let err = harness.orders.create_order(request).await.unwrap_err();
    assert!(
        matches!(err, CoreError::InvalidPrice { unit_price: -500, .. }),
        "got {err:?}"
    );
    assert_eq!(err.http_status(), 422);
    assert_eq!(order_count(&harness, user_id).await, 0);
    assert_eq!(harness.item(stock.id).await.reserved_quantity, 0);
}

#[tokio::test]
async fn test_overflowing_cart_total_is_rejected() {
    let Some(pool) = common::test_pool().await else { return };
    let harness = Harness::new(pool);
    let product = harness.product(500, true).await;
    let stock = harness.stock(product.id, None, 1, 5).await;
    let user_id = common::unique_id();

    let mut request = checkout(user_id, vec![line(&product, 3)]);
    request.cart.lines[0].unit_price = 4_000_000_000_000_000_000;

    let err = harness.orders.create_order(request).await.unwrap_err();
    assert!(matches!(err, CoreError::AmountOverflow), "got {err:?}");
    assert_eq!(order_count(&harness, user_id).await, 0);
    assert_eq!(harness.item(stock.id).await.reserved_quantity, 0);
}
