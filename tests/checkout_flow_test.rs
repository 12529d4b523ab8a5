mod common;

use std::sync::Arc;

use chrono::Utc;
use pedidos_api::entities::order::OrderStatus;
use pedidos_api::entities::{audit_log, order, order_item, order_status_history, product, stock_movement};
use pedidos_api::errors::ServiceError;
use pedidos_api::services::orders::{BuyerInput, CheckoutItem, CheckoutRequest, OrderService};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

fn buyer(name: &str) -> BuyerInput {
    BuyerInput {
        name: name.to_string(),
        lastname: None,
        tax_id: None,
        email: None,
        phone: None,
        code: None,
    }
}

fn checkout_request(items: Vec<CheckoutItem>) -> CheckoutRequest {
    CheckoutRequest {
        buyer: buyer("Ana"),
        items,
        seller_id: None,
        payment_method: None,
        generate_code: false,
    }
}

#[tokio::test]
async fn checkout_computes_totals_and_decrements_stock() {
    let db = Arc::new(common::setup_db().await);
    let product_id = common::seed_product(&db, "Yerba", dec!(100.00), 5).await;
    let svc = OrderService::new(db.clone(), None);

    let response = svc
        .create_order(
            checkout_request(vec![CheckoutItem {
                product_id,
                quantity: 2,
            }]),
            Some("tester"),
        )
        .await
        .expect("checkout");

    let expected_number = format!("ORD-{}-{}", Utc::now().format("%Y%m%d"), response.order_id);
    assert_eq!(response.order_number, expected_number);

    let order = svc.get_order(response.order_id).await.expect("get order");
    assert_eq!(order.total_amount, dec!(200.00));
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.paid_amount, dec!(200.00));
    assert_eq!(order.balance, Decimal::ZERO);
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].unit_price, dec!(100.00));

    let prod = product::Entity::find_by_id(product_id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(prod.stock_quantity, 3);

    // one SALIDA movement per decremented line
    let movements = stock_movement::Entity::find()
        .filter(stock_movement::Column::ProductId.eq(product_id))
        .all(&*db)
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].quantity, 2);
}

#[tokio::test]
async fn item_totals_always_match_order_total() {
    let db = Arc::new(common::setup_db().await);
    let a = common::seed_product(&db, "A", dec!(33.33), 10).await;
    let b = common::seed_product(&db, "B", dec!(9.99), 10).await;
    let svc = OrderService::new(db.clone(), None);

    let response = svc
        .create_order(
            checkout_request(vec![
                CheckoutItem {
                    product_id: a,
                    quantity: 3,
                },
                CheckoutItem {
                    product_id: b,
                    quantity: 2,
                },
            ]),
            None,
        )
        .await
        .expect("checkout");

    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(response.order_id))
        .all(&*db)
        .await
        .unwrap();
    let sum: Decimal = items
        .iter()
        .map(|i| i.unit_price * Decimal::from(i.quantity))
        .sum();

    let header = order::Entity::find_by_id(response.order_id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sum, header.total_amount);
}

#[tokio::test]
async fn discount_is_frozen_into_the_item_price() {
    let db = Arc::new(common::setup_db().await);
    let product_id =
        common::seed_discounted_product(&db, "Promo", dec!(100.00), 10, Some(dec!(10)), None, None)
            .await;
    let svc = OrderService::new(db.clone(), None);

    let response = svc
        .create_order(
            checkout_request(vec![CheckoutItem {
                product_id,
                quantity: 1,
            }]),
            None,
        )
        .await
        .expect("checkout");

    let order = svc.get_order(response.order_id).await.unwrap();
    assert_eq!(order.items[0].unit_price, dec!(90.00));
    assert_eq!(order.total_amount, dec!(90.00));
}

#[tokio::test]
async fn unknown_product_fails_with_not_found() {
    let db = Arc::new(common::setup_db().await);
    let svc = OrderService::new(db.clone(), None);

    let err = svc
        .create_order(
            checkout_request(vec![CheckoutItem {
                product_id: 9999,
                quantity: 1,
            }]),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn insufficient_stock_fails_and_leaves_no_partial_state() {
    let db = Arc::new(common::setup_db().await);
    let cheap = common::seed_product(&db, "Cheap", dec!(1.00), 100).await;
    let scarce = common::seed_product(&db, "Scarce", dec!(10.00), 1).await;
    let svc = OrderService::new(db.clone(), None);

    let err = svc
        .create_order(
            checkout_request(vec![
                CheckoutItem {
                    product_id: cheap,
                    quantity: 5,
                },
                CheckoutItem {
                    product_id: scarce,
                    quantity: 2,
                },
            ]),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientStock(_)));

    // nothing committed: both stocks intact, no orders
    let cheap_row = product::Entity::find_by_id(cheap).one(&*db).await.unwrap().unwrap();
    assert_eq!(cheap_row.stock_quantity, 100);
    let orders = order::Entity::find().all(&*db).await.unwrap();
    assert!(orders.is_empty());
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell() {
    let db = Arc::new(common::setup_db().await);
    let product_id = common::seed_product(&db, "Hot", dec!(50.00), 5).await;
    let svc = OrderService::new(db.clone(), None);

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let svc = svc.clone();
        tasks.push(tokio::spawn(async move {
            svc.create_order(
                checkout_request(vec![CheckoutItem {
                    product_id,
                    quantity: 3,
                }]),
                None,
            )
            .await
        }));
    }

    let mut successes = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => successes += 1,
            Err(ServiceError::InsufficientStock(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(conflicts, 1);

    let prod = product::Entity::find_by_id(product_id)
        .one(&*db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(prod.stock_quantity, 2);
}

#[tokio::test]
async fn buyer_code_is_minted_and_reusable_by_the_same_buyer() {
    let db = Arc::new(common::setup_db().await);
    let product_id = common::seed_product(&db, "Loyal", dec!(10.00), 50).await;
    let svc = OrderService::new(db.clone(), None);

    let mut first = checkout_request(vec![CheckoutItem {
        product_id,
        quantity: 1,
    }]);
    first.buyer.email = Some("ana@example.com".into());
    first.generate_code = true;
    let first = svc.create_order(first, None).await.expect("first checkout");
    let code = first.buyer_code.expect("code minted");
    assert!(code.starts_with("C-"));

    // same buyer, same code: accepted, normalized to uppercase however typed
    let mut second = checkout_request(vec![CheckoutItem {
        product_id,
        quantity: 1,
    }]);
    second.buyer.email = Some("ana@example.com".into());
    second.buyer.code = Some(code.to_lowercase());
    let second = svc.create_order(second, None).await.expect("second checkout");
    assert_eq!(second.buyer_code.as_deref(), Some(code.as_str()));

    // different buyer, same code: rejected
    let mut intruder = checkout_request(vec![CheckoutItem {
        product_id,
        quantity: 1,
    }]);
    intruder.buyer.email = Some("other@example.com".into());
    intruder.buyer.code = Some(code);
    let err = svc.create_order(intruder, None).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
}

#[tokio::test]
async fn lifecycle_moves_forward_and_soft_delete_needs_delivery() {
    let db = Arc::new(common::setup_db().await);
    let product_id = common::seed_product(&db, "Ship", dec!(20.00), 10).await;
    let svc = OrderService::new(db.clone(), None);

    let created = svc
        .create_order(
            checkout_request(vec![CheckoutItem {
                product_id,
                quantity: 1,
            }]),
            None,
        )
        .await
        .unwrap();
    let id = created.order_id;

    // cannot delete before delivery
    let err = svc.delete_order(id, None).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    svc.update_order_status(id, OrderStatus::Packing, None)
        .await
        .unwrap();
    svc.update_order_status(id, OrderStatus::Shipped, None)
        .await
        .unwrap();

    // backwards is illegal
    let err = svc
        .update_order_status(id, OrderStatus::Packing, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    svc.update_order_status(id, OrderStatus::Delivered, None)
        .await
        .unwrap();

    // terminal: no further transitions
    let err = svc
        .update_order_status(id, OrderStatus::Canceled, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    svc.delete_order(id, None).await.expect("delete delivered");
    let err = svc.get_order(id).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn checkout_and_transitions_leave_history_and_audit_rows() {
    let db = Arc::new(common::setup_db().await);
    let product_id = common::seed_product(&db, "Trazable", dec!(30.00), 10).await;
    let svc = OrderService::new(db.clone(), None);

    let created = svc
        .create_order(
            checkout_request(vec![CheckoutItem {
                product_id,
                quantity: 1,
            }]),
            Some("mostrador"),
        )
        .await
        .unwrap();
    svc.update_order_status(created.order_id, OrderStatus::Packing, Some("deposito"))
        .await
        .unwrap();

    let history = order_status_history::Entity::find()
        .filter(order_status_history::Column::OrderId.eq(created.order_id))
        .all(&*db)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].old_status, None);
    assert_eq!(history[0].new_status, OrderStatus::Paid);
    assert_eq!(history[1].old_status, Some(OrderStatus::Paid));
    assert_eq!(history[1].new_status, OrderStatus::Packing);
    assert_eq!(history[1].changed_by.as_deref(), Some("deposito"));

    let audits = audit_log::Entity::find()
        .filter(audit_log::Column::EntityId.eq(created.order_id))
        .all(&*db)
        .await
        .unwrap();
    let actions: Vec<&str> = audits.iter().map(|a| a.action.as_str()).collect();
    assert!(actions.contains(&"order.checkout"));
    assert!(actions.contains(&"order.status_change"));
}

#[tokio::test]
async fn cancel_is_reachable_from_any_non_terminal_state() {
    let db = Arc::new(common::setup_db().await);
    let product_id = common::seed_product(&db, "Cancelable", dec!(20.00), 10).await;
    let svc = OrderService::new(db.clone(), None);

    let created = svc
        .create_order(
            checkout_request(vec![CheckoutItem {
                product_id,
                quantity: 1,
            }]),
            None,
        )
        .await
        .unwrap();

    let canceled = svc
        .update_order_status(created.order_id, OrderStatus::Canceled, None)
        .await
        .unwrap();
    assert_eq!(canceled.status, OrderStatus::Canceled);
}
