use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        OrderStatus, PaymentCondition,
    },
    entities::order_item::{self, Entity as OrderItemEntity},
    entities::payment::{self, PaymentStatus},
    entities::product::{self, Entity as ProductEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{audit, buyer_code, pricing, stock},
};

const STOCK_REASON_SALE: &str = "venta";

/// Request/Response types for the order service
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct BuyerInput {
    #[validate(length(min = 1, message = "Buyer name is required"))]
    pub name: String,
    pub lastname: Option<String>,
    /// Tax identifier (DNI/CUIT)
    pub tax_id: Option<String>,
    #[validate(email(message = "Buyer email must be a valid address"))]
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Reusable buyer code from a previous order
    pub code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutItem {
    #[validate(range(min = 1, message = "Product id must be positive"))]
    pub product_id: i64,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CheckoutRequest {
    #[validate]
    pub buyer: BuyerInput,
    #[validate(length(min = 1, message = "At least one item is required"))]
    #[validate]
    pub items: Vec<CheckoutItem>,
    pub seller_id: Option<i64>,
    pub payment_method: Option<String>,
    /// Mint a fresh buyer code when none is supplied
    #[serde(default)]
    pub generate_code: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: i64,
    pub order_number: String,
    pub buyer_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub id: i64,
    pub product_id: i64,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: i64,
    pub order_number: Option<String>,
    pub status: OrderStatus,
    pub order_date: DateTime<Utc>,
    pub total_amount: Decimal,
    pub payment_condition: PaymentCondition,
    pub due_date: Option<DateTime<Utc>>,
    pub paid_amount: Decimal,
    pub balance: Decimal,
    pub buyer_name: String,
    pub buyer_lastname: Option<String>,
    pub buyer_dni: Option<String>,
    pub buyer_email: Option<String>,
    pub buyer_phone: Option<String>,
    pub buyer_code: Option<String>,
    pub client_id: Option<i64>,
    pub seller_user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemResponse>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Service for order checkout and lifecycle management
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    /// Creates a new order service instance
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Atomic checkout: locks the product rows, validates stock, freezes
    /// effective prices, resolves the buyer code, and creates the order with
    /// its items and stock decrements in one transaction. Either everything
    /// commits or nothing does.
    #[instrument(skip(self, request), fields(buyer = %request.buyer.name, items = request.items.len()))]
    pub async fn create_order(
        &self,
        request: CheckoutRequest,
        actor: Option<&str>,
    ) -> Result<CheckoutResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        // Collapse duplicate product lines; BTreeMap keeps lock acquisition
        // in ascending id order so concurrent checkouts cannot deadlock.
        let mut wanted: BTreeMap<i64, i32> = BTreeMap::new();
        for item in &request.items {
            let slot = wanted.entry(item.product_id).or_insert(0);
            *slot = slot.checked_add(item.quantity).ok_or_else(|| {
                ServiceError::ValidationError("Quantity overflow for product".into())
            })?;
        }

        let db = &*self.db_pool;
        let now = Utc::now();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start checkout transaction");
            ServiceError::DatabaseError(e)
        })?;

        // Lock and price every product before touching anything else.
        let mut lines: Vec<(product::Model, i32, Decimal)> = Vec::with_capacity(wanted.len());
        for (&product_id, &quantity) in &wanted {
            let found = ProductEntity::find()
                .filter(product::Column::Id.eq(product_id))
                .filter(product::Column::DeletedAt.is_null())
                .lock_exclusive()
                .one(&txn)
                .await
                .map_err(|e| {
                    error!(error = %e, product_id, "Failed to lock product for checkout");
                    ServiceError::DatabaseError(e)
                })?;

            let prod = found.ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", product_id))
            })?;

            if prod.stock_quantity < quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "product {} has {} units, requested {}",
                    product_id, prod.stock_quantity, quantity
                )));
            }

            let unit_price = pricing::effective_unit_price(&prod, now);
            lines.push((prod, quantity, unit_price));
        }

        let total_amount: Decimal = lines
            .iter()
            .map(|(_, qty, unit_price)| *unit_price * Decimal::from(*qty))
            .sum();
        let total_amount = pricing::round_money(total_amount);

        let contact = buyer_code::BuyerContact {
            email: request.buyer.email.clone(),
            phone: request.buyer.phone.clone(),
        };
        let resolved_code = buyer_code::resolve_buyer_code(
            &txn,
            request.buyer.code.as_deref(),
            &contact,
            request.generate_code,
        )
        .await?;

        // Checkout is paid-in-full at the counter; running-account framing
        // only appears via an explicit later transition.
        let order_active = OrderActiveModel {
            order_number: Set(None),
            status: Set(OrderStatus::Paid),
            order_date: Set(now),
            total_amount: Set(total_amount),
            payment_condition: Set(PaymentCondition::Contado),
            due_date: Set(None),
            paid_amount: Set(total_amount),
            balance: Set(Decimal::ZERO),
            buyer_name: Set(request.buyer.name.clone()),
            buyer_lastname: Set(request.buyer.lastname.clone()),
            buyer_dni: Set(request.buyer.tax_id.clone()),
            buyer_email: Set(request.buyer.email.clone()),
            buyer_phone: Set(request.buyer.phone.clone()),
            buyer_code: Set(resolved_code.clone()),
            client_id: Set(None),
            seller_user_id: Set(request.seller_id),
            created_at: Set(now),
            updated_at: Set(Some(now)),
            deleted_at: Set(None),
            version: Set(1),
            ..Default::default()
        };

        let order_model = order_active.insert(&txn).await.map_err(|e| {
            error!(error = %e, "Failed to insert order header");
            ServiceError::DatabaseError(e)
        })?;

        for (prod, quantity, unit_price) in &lines {
            let item_active = order_item::ActiveModel {
                order_id: Set(order_model.id),
                product_id: Set(prod.id),
                quantity: Set(*quantity),
                unit_price: Set(*unit_price),
                created_at: Set(now),
                ..Default::default()
            };
            item_active.insert(&txn).await.map_err(|e| {
                error!(error = %e, order_id = order_model.id, product_id = prod.id, "Failed to insert order item");
                ServiceError::DatabaseError(e)
            })?;

            stock::apply_stock_delta(
                &txn,
                prod.id,
                -quantity,
                STOCK_REASON_SALE,
                actor,
                Some(*unit_price),
            )
            .await?;
        }

        // Human-readable order number derives from date and row id, assigned
        // after insert so it is unique without a separate sequence.
        let order_number = format!("ORD-{}-{}", now.format("%Y%m%d"), order_model.id);
        let mut numbered: OrderActiveModel = order_model.clone().into();
        numbered.order_number = Set(Some(order_number.clone()));
        let order_model = numbered.update(&txn).await.map_err(|e| {
            error!(error = %e, order_id = order_model.id, "Failed to assign order number");
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit checkout transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = order_model.id, %order_number, "Order created successfully");

        // Payment-method snapshot, status trail, and audit entry are all
        // best-effort; they run on the pool after commit so a failed write
        // can never abort the checkout.
        if request.payment_method.is_some() {
            let snapshot = payment::ActiveModel {
                order_id: Set(order_model.id),
                payment_date: Set(now),
                amount: Set(total_amount),
                payment_method: Set(request.payment_method.clone()),
                status: Set(PaymentStatus::Confirmed),
                created_at: Set(now),
                ..Default::default()
            };
            if let Err(e) = snapshot.insert(db).await {
                error!(error = %e, order_id = order_model.id, "Failed to record payment snapshot");
            }
        }
        audit::record_status_change(db, order_model.id, None, OrderStatus::Paid, actor).await;
        audit::record_audit(
            db,
            actor,
            "order.checkout",
            "order",
            order_model.id,
            Some(serde_json::json!({ "total_amount": total_amount })),
        )
        .await;

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderCreated(order_model.id)).await {
                warn!(error = %e, order_id = order_model.id, "Failed to send order created event");
            }
        }

        Ok(CheckoutResponse {
            order_id: order_model.id,
            order_number,
            buyer_code: resolved_code,
        })
    }

    /// Retrieves an order with its items
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: i64) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;

        let order = OrderEntity::find()
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::DeletedAt.is_null())
            .one(db)
            .await
            .map_err(|e| {
                error!(error = %e, order_id, "Failed to fetch order");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, order_id, "Failed to fetch order items");
                ServiceError::DatabaseError(e)
            })?;

        Ok(Self::model_to_response(order, items))
    }

    /// Looks an order up by its human-readable number
    #[instrument(skip(self))]
    pub async fn get_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;

        let order = OrderEntity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .filter(order::Column::DeletedAt.is_null())
            .one(db)
            .await
            .map_err(|e| {
                error!(error = %e, order_number, "Failed to fetch order by number");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", order_number))
            })?;

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(db)
            .await
            .map_err(|e| {
                error!(error = %e, order_id = order.id, "Failed to fetch order items");
                ServiceError::DatabaseError(e)
            })?;

        Ok(Self::model_to_response(order, items))
    }

    /// Lists orders with pagination, newest first
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let paginator = OrderEntity::find()
            .filter(order::Column::DeletedAt.is_null())
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;

        let orders = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!(error = %e, page, per_page, "Failed to fetch orders page");
            ServiceError::DatabaseError(e)
        })?;

        Ok(OrderListResponse {
            orders: orders
                .into_iter()
                .map(|m| Self::model_to_response(m, Vec::new()))
                .collect(),
            total,
            page,
            per_page,
        })
    }

    /// Moves an order along its lifecycle. Transitions are forward-only;
    /// CANCELED is reachable from any non-terminal state; DELIVERED and
    /// CANCELED are terminal.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: i64,
        new_status: OrderStatus,
        actor: Option<&str>,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to start status transaction");
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

        let old_status = current.status;
        Self::check_status_transition(old_status, new_status)?;

        let now = Utc::now();
        let version = current.version;
        let mut active: OrderActiveModel = current.into();
        active.status = Set(new_status);
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await.map_err(|e| {
            error!(error = %e, order_id, "Failed to update order status");
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to commit status transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id, old_status = old_status.as_str(), new_status = new_status.as_str(), "Order status updated");

        // Trail writes stay off the transaction; a failure is logged, never
        // surfaced.
        audit::record_status_change(db, order_id, Some(old_status), new_status, actor).await;
        audit::record_audit(
            db,
            actor,
            "order.status_change",
            "order",
            order_id,
            Some(serde_json::json!({
                "old_status": old_status.as_str(),
                "new_status": new_status.as_str(),
            })),
        )
        .await;

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status: old_status.as_str().to_string(),
                    new_status: new_status.as_str().to_string(),
                })
                .await
            {
                warn!(error = %e, order_id, "Failed to send status change event");
            }
        }

        Ok(Self::model_to_response(updated, Vec::new()))
    }

    /// Soft-deletes an order. Permitted only once the order has been
    /// delivered; everything else keeps its full trail.
    #[instrument(skip(self))]
    pub async fn delete_order(
        &self,
        order_id: i64,
        actor: Option<&str>,
    ) -> Result<(), ServiceError> {
        let db = &*self.db_pool;

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to start delete transaction");
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

        if current.status != OrderStatus::Delivered {
            return Err(ServiceError::Conflict(format!(
                "order {} cannot be deleted from status {}",
                order_id,
                current.status.as_str()
            )));
        }

        let now = Utc::now();
        let version = current.version;
        let mut active: OrderActiveModel = current.into();
        active.deleted_at = Set(Some(now));
        active.updated_at = Set(Some(now));
        active.version = Set(version + 1);
        active.update(&txn).await.map_err(|e| {
            error!(error = %e, order_id, "Failed to soft-delete order");
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to commit delete transaction");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id, "Order soft-deleted");

        audit::record_audit(db, actor, "order.delete", "order", order_id, None).await;

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderDeleted(order_id)).await {
                warn!(error = %e, order_id, "Failed to send order deleted event");
            }
        }

        Ok(())
    }

    fn check_status_transition(from: OrderStatus, to: OrderStatus) -> Result<(), ServiceError> {
        if from.is_terminal() {
            return Err(ServiceError::Conflict(format!(
                "order in terminal status {} cannot change",
                from.as_str()
            )));
        }
        if to == OrderStatus::Canceled {
            return Ok(());
        }
        match (from.rank(), to.rank()) {
            (Some(a), Some(b)) if b > a => Ok(()),
            _ => Err(ServiceError::Conflict(format!(
                "illegal status transition {} -> {}",
                from.as_str(),
                to.as_str()
            ))),
        }
    }

    fn model_to_response(order: OrderModel, items: Vec<order_item::Model>) -> OrderResponse {
        OrderResponse {
            id: order.id,
            order_number: order.order_number,
            status: order.status,
            order_date: order.order_date,
            total_amount: order.total_amount,
            payment_condition: order.payment_condition,
            due_date: order.due_date,
            paid_amount: order.paid_amount,
            balance: order.balance,
            buyer_name: order.buyer_name,
            buyer_lastname: order.buyer_lastname,
            buyer_dni: order.buyer_dni,
            buyer_email: order.buyer_email,
            buyer_phone: order.buyer_phone,
            buyer_code: order.buyer_code,
            client_id: order.client_id,
            seller_user_id: order.seller_user_id,
            created_at: order.created_at,
            updated_at: order.updated_at,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    id: item.id,
                    product_id: item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    line_total: item.line_total(),
                })
                .collect(),
        }
    }
}
