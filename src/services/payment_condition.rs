use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::client::Entity as ClientEntity,
    entities::client_account_movement::{self, MovementType},
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        PaymentCondition,
    },
    entities::payment::{self, Entity as PaymentEntity, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{audit, pricing},
};

/// Tolerance for treating a running-account balance as settled.
const BALANCE_EPSILON: Decimal = dec!(0.0001);

/// Default credit term when no due date is supplied.
const DEFAULT_TERM_DAYS: i64 = 30;

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct ChangeConditionRequest {
    pub target_condition: PaymentCondition,
    pub due_date: Option<DateTime<Utc>>,
    /// Client to bill when moving onto a running account, if the order does
    /// not already reference one
    pub client_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterPaymentRequest {
    pub amount: Decimal,
    pub payment_method: Option<String>,
    pub description: Option<String>,
}

/// Financial snapshot returned after condition changes and payments
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FinancialSnapshot {
    pub order_id: i64,
    pub payment_condition: PaymentCondition,
    pub due_date: Option<DateTime<Utc>>,
    pub paid_amount: Decimal,
    pub balance: Decimal,
}

/// What a legal transition will do, decided before any row is written.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TransitionPlan {
    /// CONTADO -> CTA_CTE: void prior payments, open the running account
    ToRunningAccount {
        client_id: i64,
        due_date: DateTime<Utc>,
    },
    /// CTA_CTE -> CONTADO: settle and close the on-credit framing
    ToPaidInFull,
    /// CTA_CTE -> CTA_CTE: only the due date moves
    AdjustDueDate { due_date: DateTime<Utc> },
    /// CONTADO -> CONTADO
    NoOp,
}

fn plan_transition(
    current: &OrderModel,
    target: PaymentCondition,
    due_date: Option<DateTime<Utc>>,
    client_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<TransitionPlan, ServiceError> {
    match (current.payment_condition, target) {
        (PaymentCondition::Contado, PaymentCondition::CtaCte) => {
            let client_id = current.client_id.or(client_id).ok_or_else(|| {
                ServiceError::BadRequest(
                    "cannot move to running account: order has no associated client".into(),
                )
            })?;
            Ok(TransitionPlan::ToRunningAccount {
                client_id,
                due_date: due_date.unwrap_or(now + Duration::days(DEFAULT_TERM_DAYS)),
            })
        }
        (PaymentCondition::CtaCte, PaymentCondition::Contado) => {
            if current.balance > BALANCE_EPSILON {
                return Err(ServiceError::Conflict(format!(
                    "cannot mark as paid-in-full: order still has outstanding balance {}",
                    current.balance
                )));
            }
            Ok(TransitionPlan::ToPaidInFull)
        }
        (PaymentCondition::CtaCte, PaymentCondition::CtaCte) => {
            let due_date = due_date
                .or(current.due_date)
                .unwrap_or(now + Duration::days(DEFAULT_TERM_DAYS));
            Ok(TransitionPlan::AdjustDueDate { due_date })
        }
        (PaymentCondition::Contado, PaymentCondition::Contado) => Ok(TransitionPlan::NoOp),
    }
}

/// Service for payment-condition transitions and payment registration
#[derive(Clone)]
pub struct PaymentConditionService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl PaymentConditionService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Moves an order between CONTADO and CTA_CTE. The order row stays
    /// locked for the whole transaction, so concurrent transition requests
    /// on the same order serialize.
    #[instrument(skip(self, request), fields(order_id, target = request.target_condition.as_str()))]
    pub async fn change_condition(
        &self,
        order_id: i64,
        request: ChangeConditionRequest,
        actor: Option<&str>,
    ) -> Result<FinancialSnapshot, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to start condition transaction");
            ServiceError::DatabaseError(e)
        })?;

        let current = OrderEntity::find()
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::DeletedAt.is_null())
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id, "Failed to lock order row");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_condition = current.payment_condition;
        let plan = plan_transition(
            &current,
            request.target_condition,
            request.due_date,
            request.client_id,
            now,
        )?;

        let total = current.total_amount;
        let version = current.version;
        let mut active: OrderActiveModel = current.into();

        match plan {
            TransitionPlan::ToRunningAccount {
                client_id,
                due_date,
            } => {
                let client_exists = ClientEntity::find_by_id(client_id)
                    .one(&txn)
                    .await
                    .map_err(ServiceError::DatabaseError)?
                    .is_some();
                if !client_exists {
                    return Err(ServiceError::NotFound(format!(
                        "Client {} not found",
                        client_id
                    )));
                }

                // Prior cash payments no longer describe this order; keep the
                // rows but void them.
                PaymentEntity::update_many()
                    .col_expr(
                        payment::Column::Status,
                        sea_orm::sea_query::Expr::value(PaymentStatus::Voided.as_str()),
                    )
                    .filter(payment::Column::OrderId.eq(order_id))
                    .filter(payment::Column::Status.eq(PaymentStatus::Confirmed))
                    .exec(&txn)
                    .await
                    .map_err(|e| {
                        error!(error = %e, order_id, "Failed to void prior payments");
                        ServiceError::DatabaseError(e)
                    })?;

                let debit = client_account_movement::ActiveModel {
                    client_id: Set(client_id),
                    order_id: Set(Some(order_id)),
                    movement_date: Set(now),
                    movement_type: Set(MovementType::Debito),
                    amount: Set(total),
                    description: Set(Some(format!("Cargo por pedido {}", order_id))),
                    created_by: Set(None),
                    created_at: Set(now),
                    ..Default::default()
                };
                debit.insert(&txn).await.map_err(|e| {
                    error!(error = %e, order_id, "Failed to insert debit movement");
                    ServiceError::DatabaseError(e)
                })?;

                active.payment_condition = Set(PaymentCondition::CtaCte);
                active.client_id = Set(Some(client_id));
                active.due_date = Set(Some(due_date));
                active.paid_amount = Set(Decimal::ZERO);
                active.balance = Set(total);
            }
            TransitionPlan::ToPaidInFull => {
                active.payment_condition = Set(PaymentCondition::Contado);
                active.due_date = Set(None);
                active.paid_amount = Set(total);
                active.balance = Set(Decimal::ZERO);
            }
            TransitionPlan::AdjustDueDate { due_date } => {
                active.due_date = Set(Some(due_date));
            }
            TransitionPlan::NoOp => {}
        }

        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await.map_err(|e| {
            error!(error = %e, order_id, "Failed to update order condition");
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to commit condition transaction");
            ServiceError::DatabaseError(e)
        })?;

        // Audit entry is best-effort and runs on the pool after commit.
        audit::record_audit(
            db,
            actor,
            "order.payment_condition_change",
            "order",
            order_id,
            Some(serde_json::json!({
                "old_condition": old_condition.as_str(),
                "new_condition": updated.payment_condition.as_str(),
            })),
        )
        .await;

        info!(
            order_id,
            old_condition = old_condition.as_str(),
            new_condition = updated.payment_condition.as_str(),
            "Payment condition updated"
        );

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::PaymentConditionChanged {
                    order_id,
                    old_condition: old_condition.as_str().to_string(),
                    new_condition: updated.payment_condition.as_str().to_string(),
                })
                .await
            {
                warn!(error = %e, order_id, "Failed to send condition change event");
            }
        }

        Ok(snapshot(&updated))
    }

    /// Registers money received against a running-account order: one Payment
    /// row, one CREDITO movement, and the denormalized paid/balance fields
    /// move together.
    #[instrument(skip(self, request), fields(order_id))]
    pub async fn register_payment(
        &self,
        order_id: i64,
        request: RegisterPaymentRequest,
        actor: Option<&str>,
    ) -> Result<FinancialSnapshot, ServiceError> {
        let amount = pricing::round_money(request.amount);
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "payment amount must be positive".into(),
            ));
        }

        let db = &*self.db_pool;
        let now = Utc::now();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to start payment transaction");
            ServiceError::DatabaseError(e)
        })?;

        let current = OrderEntity::find()
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::DeletedAt.is_null())
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id, "Failed to lock order row");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if current.payment_condition != PaymentCondition::CtaCte {
            return Err(ServiceError::BadRequest(
                "payments can only be registered against a running-account order".into(),
            ));
        }
        if current.balance <= Decimal::ZERO {
            return Err(ServiceError::BadRequest(
                "order has no outstanding balance".into(),
            ));
        }
        if amount > current.balance + BALANCE_EPSILON {
            return Err(ServiceError::BadRequest(format!(
                "payment {} exceeds outstanding balance {}",
                amount, current.balance
            )));
        }
        let client_id = current.client_id.ok_or_else(|| {
            ServiceError::InternalError(format!(
                "running-account order {} has no client reference",
                order_id
            ))
        })?;

        let payment_row = payment::ActiveModel {
            order_id: Set(order_id),
            payment_date: Set(now),
            amount: Set(amount),
            payment_method: Set(request.payment_method.clone()),
            status: Set(PaymentStatus::Confirmed),
            created_at: Set(now),
            ..Default::default()
        };
        let payment_row = payment_row.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id, "Failed to insert payment");
            ServiceError::DatabaseError(e)
        })?;

        let credit = client_account_movement::ActiveModel {
            client_id: Set(client_id),
            order_id: Set(Some(order_id)),
            movement_date: Set(now),
            movement_type: Set(MovementType::Credito),
            amount: Set(amount),
            description: Set(request
                .description
                .clone()
                .or_else(|| Some(format!("Pago pedido {}", order_id)))),
            created_by: Set(None),
            created_at: Set(now),
            ..Default::default()
        };
        credit.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id, "Failed to insert credit movement");
            ServiceError::DatabaseError(e)
        })?;

        let total = current.total_amount;
        let new_paid = pricing::round_money(current.paid_amount + amount);
        let new_balance = (total - new_paid).max(Decimal::ZERO);
        let version = current.version;

        let mut active: OrderActiveModel = current.into();
        active.paid_amount = Set(new_paid);
        active.balance = Set(new_balance);
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await.map_err(|e| {
            error!(error = %e, order_id, "Failed to update order balance");
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to commit payment transaction");
            ServiceError::DatabaseError(e)
        })?;

        audit::record_audit(
            db,
            actor,
            "order.payment_registered",
            "order",
            order_id,
            Some(serde_json::json!({ "amount": amount, "balance": new_balance })),
        )
        .await;

        info!(order_id, payment_id = payment_row.id, %amount, "Payment registered");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::PaymentRegistered {
                    order_id,
                    payment_id: payment_row.id,
                })
                .await
            {
                warn!(error = %e, order_id, "Failed to send payment registered event");
            }
        }

        Ok(snapshot(&updated))
    }
}

fn snapshot(order: &OrderModel) -> FinancialSnapshot {
    FinancialSnapshot {
        order_id: order.id,
        payment_condition: order.payment_condition,
        due_date: order.due_date,
        paid_amount: order.paid_amount,
        balance: order.balance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::order::OrderStatus;

    fn order_with(
        condition: PaymentCondition,
        total: Decimal,
        paid: Decimal,
        client_id: Option<i64>,
    ) -> OrderModel {
        OrderModel {
            id: 1,
            order_number: Some("ORD-20250601-1".into()),
            status: OrderStatus::Paid,
            order_date: Utc::now(),
            total_amount: total,
            payment_condition: condition,
            due_date: None,
            paid_amount: paid,
            balance: total - paid,
            buyer_name: "Ana".into(),
            buyer_lastname: None,
            buyer_dni: None,
            buyer_email: None,
            buyer_phone: None,
            buyer_code: None,
            client_id,
            seller_user_id: None,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
            version: 1,
        }
    }

    #[test]
    fn contado_to_cta_cte_defaults_due_date_to_thirty_days() {
        let now = Utc::now();
        let order = order_with(PaymentCondition::Contado, dec!(500), dec!(500), Some(7));
        let plan =
            plan_transition(&order, PaymentCondition::CtaCte, None, None, now).unwrap();
        assert_eq!(
            plan,
            TransitionPlan::ToRunningAccount {
                client_id: 7,
                due_date: now + Duration::days(30),
            }
        );
    }

    #[test]
    fn contado_to_cta_cte_without_client_is_rejected() {
        let order = order_with(PaymentCondition::Contado, dec!(500), dec!(500), None);
        let err =
            plan_transition(&order, PaymentCondition::CtaCte, None, None, Utc::now()).unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }

    #[test]
    fn contado_to_cta_cte_accepts_client_from_request() {
        let order = order_with(PaymentCondition::Contado, dec!(500), dec!(500), None);
        let plan = plan_transition(&order, PaymentCondition::CtaCte, None, Some(9), Utc::now())
            .unwrap();
        assert!(matches!(
            plan,
            TransitionPlan::ToRunningAccount { client_id: 9, .. }
        ));
    }

    #[test]
    fn cta_cte_to_contado_requires_settled_balance() {
        let order = order_with(PaymentCondition::CtaCte, dec!(500), dec!(400), Some(7));
        let err =
            plan_transition(&order, PaymentCondition::Contado, None, None, Utc::now()).unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let settled = order_with(PaymentCondition::CtaCte, dec!(500), dec!(500), Some(7));
        let plan = plan_transition(&settled, PaymentCondition::Contado, None, None, Utc::now())
            .unwrap();
        assert_eq!(plan, TransitionPlan::ToPaidInFull);
    }

    #[test]
    fn cta_cte_to_contado_tolerates_residual_dust() {
        let mut order = order_with(PaymentCondition::CtaCte, dec!(500), dec!(500), Some(7));
        order.balance = dec!(0.0001);
        let plan =
            plan_transition(&order, PaymentCondition::Contado, None, None, Utc::now()).unwrap();
        assert_eq!(plan, TransitionPlan::ToPaidInFull);
    }

    #[test]
    fn cta_cte_to_cta_cte_only_moves_due_date() {
        let now = Utc::now();
        let later = now + Duration::days(60);
        let order = order_with(PaymentCondition::CtaCte, dec!(500), dec!(100), Some(7));
        let plan =
            plan_transition(&order, PaymentCondition::CtaCte, Some(later), None, now).unwrap();
        assert_eq!(plan, TransitionPlan::AdjustDueDate { due_date: later });

        // unset due date defaults forward
        let plan = plan_transition(&order, PaymentCondition::CtaCte, None, None, now).unwrap();
        assert_eq!(
            plan,
            TransitionPlan::AdjustDueDate {
                due_date: now + Duration::days(30),
            }
        );
    }

    #[test]
    fn contado_to_contado_is_a_no_op() {
        let now = Utc::now();
        let order = order_with(PaymentCondition::Contado, dec!(500), dec!(500), Some(7));
        let plan = plan_transition(
            &order,
            PaymentCondition::Contado,
            Some(now + Duration::days(10)),
            None,
            now,
        )
        .unwrap();
        assert_eq!(plan, TransitionPlan::NoOp);
    }
}
