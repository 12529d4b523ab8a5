use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use tracing::{error, info, instrument, warn};

use crate::db::DbPool;
use crate::entities::product::{self, Entity as ProductEntity};
use crate::entities::stock_movement::{self, StockDirection};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Single writer of `product.stock_quantity`. Every change to on-hand stock
/// goes through here, inside the caller's transaction, so concurrent writers
/// serialize on the product row lock and an append-only movement trail is
/// kept alongside.
#[instrument(skip(conn), fields(product_id, delta))]
pub async fn apply_stock_delta<C: ConnectionTrait>(
    conn: &C,
    product_id: i64,
    delta: i32,
    reason: &str,
    actor: Option<&str>,
    unit_price: Option<Decimal>,
) -> Result<product::Model, ServiceError> {
    let found = ProductEntity::find()
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::DeletedAt.is_null())
        .lock_exclusive()
        .one(conn)
        .await
        .map_err(|e| {
            error!(error = %e, product_id, "Failed to lock product row");
            ServiceError::DatabaseError(e)
        })?;

    let current = found
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

    let new_quantity = current.stock_quantity.checked_add(delta).ok_or_else(|| {
        ServiceError::ValidationError(format!(
            "stock delta {} overflows quantity {} for product {}",
            delta, current.stock_quantity, product_id
        ))
    })?;
    if new_quantity < 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "product {} has {} units, requested {}",
            product_id, current.stock_quantity, -delta
        )));
    }

    let now = Utc::now();
    let mut active: product::ActiveModel = current.into();
    active.stock_quantity = Set(new_quantity);
    active.updated_at = Set(Some(now));
    let updated = active.update(conn).await.map_err(|e| {
        error!(error = %e, product_id, "Failed to update stock quantity");
        ServiceError::DatabaseError(e)
    })?;

    record_movement(conn, &updated, delta, reason, actor, unit_price).await;

    Ok(updated)
}

/// Admin surface over [`apply_stock_delta`]: one adjustment per transaction.
#[derive(Clone)]
pub struct StockService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl StockService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Applies a signed stock adjustment (restock or correction) and returns
    /// the new quantity.
    #[instrument(skip(self), fields(product_id, delta))]
    pub async fn adjust(
        &self,
        product_id: i64,
        delta: i32,
        reason: Option<&str>,
        actor: Option<&str>,
    ) -> Result<i32, ServiceError> {
        if delta == 0 {
            return Err(ServiceError::ValidationError(
                "stock delta must not be zero".into(),
            ));
        }

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, product_id, "Failed to start stock adjustment transaction");
            ServiceError::DatabaseError(e)
        })?;

        let updated = apply_stock_delta(
            &txn,
            product_id,
            delta,
            reason.unwrap_or("ajuste manual"),
            actor,
            None,
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, product_id, "Failed to commit stock adjustment");
            ServiceError::DatabaseError(e)
        })?;

        info!(product_id, delta, new_quantity = updated.stock_quantity, "Stock adjusted");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::StockAdjusted {
                    product_id,
                    delta,
                    new_quantity: updated.stock_quantity,
                })
                .await
            {
                warn!(error = %e, product_id, "Failed to send stock adjusted event");
            }
        }

        Ok(updated.stock_quantity)
    }
}

/// Appends the movement row. Best-effort: a failure here is logged and
/// swallowed so it never rolls back the stock change itself.
async fn record_movement<C: ConnectionTrait>(
    conn: &C,
    product: &product::Model,
    delta: i32,
    reason: &str,
    actor: Option<&str>,
    unit_price: Option<Decimal>,
) {
    let direction = if delta >= 0 {
        StockDirection::Entrada
    } else {
        StockDirection::Salida
    };

    let movement = stock_movement::ActiveModel {
        product_id: Set(product.id),
        direction: Set(direction),
        quantity: Set(delta.abs()),
        unit_price: Set(unit_price),
        actor: Set(actor.map(str::to_string)),
        reason: Set(Some(reason.to_string())),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    if let Err(e) = movement.insert(conn).await {
        error!(error = %e, product_id = product.id, "Failed to record stock movement");
    }
}
