mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use pedidos_api::entities::client_account_movement::{self, MovementType};
use pedidos_api::entities::order::PaymentCondition;
use pedidos_api::entities::payment::{self, PaymentStatus};
use pedidos_api::errors::ServiceError;
use pedidos_api::services::orders::{BuyerInput, CheckoutItem, CheckoutRequest, OrderService};
use pedidos_api::services::payment_condition::{
    ChangeConditionRequest, PaymentConditionService, RegisterPaymentRequest,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

struct Ctx {
    db: Arc<pedidos_api::db::DbPool>,
    orders: OrderService,
    conditions: PaymentConditionService,
    client_id: i64,
}

/// Seeds one product at 500.00 and checks out one unit, returning the new
/// order's id alongside the services.
async fn setup_with_order() -> (Ctx, i64) {
    let db = Arc::new(common::setup_db().await);
    let product_id = common::seed_product(&db, "Maquina", dec!(500.00), 10).await;
    let client_id = common::seed_client(&db, "Cliente SA").await;
    let orders = OrderService::new(db.clone(), None);
    let conditions = PaymentConditionService::new(db.clone(), None);

    let response = orders
        .create_order(
            CheckoutRequest {
                buyer: BuyerInput {
                    name: "Ana".into(),
                    lastname: None,
                    tax_id: None,
                    email: None,
                    phone: None,
                    code: None,
                },
                items: vec![CheckoutItem {
                    product_id,
                    quantity: 1,
                }],
                seller_id: None,
                payment_method: Some("efectivo".into()),
                generate_code: false,
            },
            None,
        )
        .await
        .expect("checkout");

    (
        Ctx {
            db,
            orders,
            conditions,
            client_id,
        },
        response.order_id,
    )
}

fn to_cta_cte(client_id: i64) -> ChangeConditionRequest {
    ChangeConditionRequest {
        target_condition: PaymentCondition::CtaCte,
        due_date: None,
        client_id: Some(client_id),
    }
}

fn to_contado() -> ChangeConditionRequest {
    ChangeConditionRequest {
        target_condition: PaymentCondition::Contado,
        due_date: None,
        client_id: None,
    }
}

#[tokio::test]
async fn moving_to_running_account_opens_the_full_balance() {
    let (ctx, order_id) = setup_with_order().await;

    let snapshot = ctx
        .conditions
        .change_condition(order_id, to_cta_cte(ctx.client_id), Some("tester"))
        .await
        .expect("transition");

    assert_eq!(snapshot.payment_condition, PaymentCondition::CtaCte);
    assert_eq!(snapshot.paid_amount, Decimal::ZERO);
    assert_eq!(snapshot.balance, dec!(500.00));

    // default term is thirty days out
    let due = snapshot.due_date.expect("due date set");
    let expected = Utc::now() + Duration::days(30);
    assert!((due - expected).num_minutes().abs() < 5);

    // one DEBITO for the full total
    let movements = client_account_movement::Entity::find()
        .filter(client_account_movement::Column::OrderId.eq(order_id))
        .all(&*ctx.db)
        .await
        .unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, MovementType::Debito);
    assert_eq!(movements[0].amount, dec!(500.00));

    // the checkout payment snapshot was voided, not deleted
    let payments = payment::Entity::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .all(&*ctx.db)
        .await
        .unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Voided);
}

#[tokio::test]
async fn running_account_requires_a_client() {
    let (ctx, order_id) = setup_with_order().await;

    let err = ctx
        .conditions
        .change_condition(
            order_id,
            ChangeConditionRequest {
                target_condition: PaymentCondition::CtaCte,
                due_date: None,
                client_id: None,
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(_)));

    let err = ctx
        .conditions
        .change_condition(
            order_id,
            ChangeConditionRequest {
                target_condition: PaymentCondition::CtaCte,
                due_date: None,
                client_id: Some(424242),
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn settling_the_balance_allows_return_to_contado() {
    let (ctx, order_id) = setup_with_order().await;
    ctx.conditions
        .change_condition(order_id, to_cta_cte(ctx.client_id), None)
        .await
        .unwrap();

    let snapshot = ctx
        .conditions
        .register_payment(
            order_id,
            RegisterPaymentRequest {
                amount: dec!(500.00),
                payment_method: Some("transferencia".into()),
                description: None,
            },
            None,
        )
        .await
        .expect("payment");
    assert_eq!(snapshot.paid_amount, dec!(500.00));
    assert_eq!(snapshot.balance, Decimal::ZERO);

    // a CREDITO movement mirrors the payment
    let credits = client_account_movement::Entity::find()
        .filter(client_account_movement::Column::OrderId.eq(order_id))
        .filter(client_account_movement::Column::MovementType.eq(MovementType::Credito))
        .all(&*ctx.db)
        .await
        .unwrap();
    assert_eq!(credits.len(), 1);
    assert_eq!(credits[0].amount, dec!(500.00));

    let snapshot = ctx
        .conditions
        .change_condition(order_id, to_contado(), None)
        .await
        .expect("back to contado");
    assert_eq!(snapshot.payment_condition, PaymentCondition::Contado);
    assert_eq!(snapshot.due_date, None);
    assert_eq!(snapshot.balance, Decimal::ZERO);
}

#[tokio::test]
async fn outstanding_balance_blocks_return_to_contado() {
    let (ctx, order_id) = setup_with_order().await;
    ctx.conditions
        .change_condition(order_id, to_cta_cte(ctx.client_id), None)
        .await
        .unwrap();

    ctx.conditions
        .register_payment(
            order_id,
            RegisterPaymentRequest {
                amount: dec!(400.00),
                payment_method: None,
                description: None,
            },
            None,
        )
        .await
        .unwrap();

    let err = ctx
        .conditions
        .change_condition(order_id, to_contado(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    // fields unchanged by the failed attempt
    let order = ctx.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.payment_condition, PaymentCondition::CtaCte);
    assert_eq!(order.paid_amount, dec!(400.00));
    assert_eq!(order.balance, dec!(100.00));
}

#[tokio::test]
async fn partial_payments_keep_the_financial_invariant() {
    let (ctx, order_id) = setup_with_order().await;
    ctx.conditions
        .change_condition(order_id, to_cta_cte(ctx.client_id), None)
        .await
        .unwrap();

    let snapshot = ctx
        .conditions
        .register_payment(
            order_id,
            RegisterPaymentRequest {
                amount: dec!(200.00),
                payment_method: None,
                description: Some("primer pago".into()),
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(snapshot.paid_amount, dec!(200.00));
    assert_eq!(snapshot.balance, dec!(300.00));

    let order = ctx.orders.get_order(order_id).await.unwrap();
    assert_eq!(order.balance, order.total_amount - order.paid_amount);
    assert!(order.balance >= Decimal::ZERO);
}

#[tokio::test]
async fn payment_rules_are_enforced() {
    let (ctx, order_id) = setup_with_order().await;

    // still CONTADO: no payments accepted
    let err = ctx
        .conditions
        .register_payment(
            order_id,
            RegisterPaymentRequest {
                amount: dec!(100.00),
                payment_method: None,
                description: None,
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(_)));

    ctx.conditions
        .change_condition(order_id, to_cta_cte(ctx.client_id), None)
        .await
        .unwrap();

    // overpayment rejected
    let err = ctx
        .conditions
        .register_payment(
            order_id,
            RegisterPaymentRequest {
                amount: dec!(600.00),
                payment_method: None,
                description: None,
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::BadRequest(_)));

    // non-positive amounts rejected
    let err = ctx
        .conditions
        .register_payment(
            order_id,
            RegisterPaymentRequest {
                amount: Decimal::ZERO,
                payment_method: None,
                description: None,
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn cta_cte_to_cta_cte_only_moves_the_due_date() {
    let (ctx, order_id) = setup_with_order().await;
    ctx.conditions
        .change_condition(order_id, to_cta_cte(ctx.client_id), None)
        .await
        .unwrap();

    let new_due = Utc::now() + Duration::days(60);
    let snapshot = ctx
        .conditions
        .change_condition(
            order_id,
            ChangeConditionRequest {
                target_condition: PaymentCondition::CtaCte,
                due_date: Some(new_due),
                client_id: None,
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(snapshot.payment_condition, PaymentCondition::CtaCte);
    assert_eq!(snapshot.balance, dec!(500.00));
    let due = snapshot.due_date.expect("due date");
    assert!((due - new_due).num_seconds().abs() < 2);

    // no extra DEBITO was written by the due-date adjustment
    let debits = client_account_movement::Entity::find()
        .filter(client_account_movement::Column::OrderId.eq(order_id))
        .filter(client_account_movement::Column::MovementType.eq(MovementType::Debito))
        .all(&*ctx.db)
        .await
        .unwrap();
    assert_eq!(debits.len(), 1);
}
