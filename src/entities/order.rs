use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Fulfillment lifecycle of an order. DELIVERED and CANCELED are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PAID")]
    Paid,
    #[sea_orm(string_value = "PACKING")]
    Packing,
    #[sea_orm(string_value = "SHIPPED")]
    Shipped,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
    #[sea_orm(string_value = "CANCELED")]
    Canceled,
}

impl OrderStatus {
    /// Position in the forward progression; CANCELED sits outside it.
    pub fn rank(self) -> Option<u8> {
        match self {
            OrderStatus::Pending => Some(0),
            OrderStatus::Paid => Some(1),
            OrderStatus::Packing => Some(2),
            OrderStatus::Shipped => Some(3),
            OrderStatus::Delivered => Some(4),
            OrderStatus::Canceled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Packing => "PACKING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Canceled => "CANCELED",
        }
    }
}

/// How the order is billed: paid in full at checkout, or carried on the
/// client's running account until the due date.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentCondition {
    #[sea_orm(string_value = "CONTADO")]
    Contado,
    #[sea_orm(string_value = "CTA_CTE")]
    CtaCte,
}

impl PaymentCondition {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentCondition::Contado => "CONTADO",
            PaymentCondition::CtaCte => "CTA_CTE",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Human-readable number, `ORD-YYYYMMDD-{id}`; assigned right after the
    /// row is inserted, inside the same transaction.
    pub order_number: Option<String>,

    pub status: OrderStatus,
    pub order_date: DateTime<Utc>,
    pub total_amount: Decimal,

    pub payment_condition: PaymentCondition,
    pub due_date: Option<DateTime<Utc>>,
    pub paid_amount: Decimal,
    /// Denormalized; always `total_amount - paid_amount`, never negative.
    pub balance: Decimal,

    pub buyer_name: String,
    pub buyer_lastname: Option<String>,
    pub buyer_dni: Option<String>,
    pub buyer_email: Option<String>,
    pub buyer_phone: Option<String>,
    /// Reusable, human-shareable code linking a repeat buyer's orders.
    pub buyer_code: Option<String>,

    pub client_id: Option<i64>,
    pub seller_user_id: Option<i64>,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payment,
    #[sea_orm(has_many = "super::client_account_movement::Entity")]
    ClientAccountMovement,
    #[sea_orm(
        belongs_to = "super::client::Entity",
        from = "Column::ClientId",
        to = "super::client::Column::Id"
    )]
    Client,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payment.def()
    }
}

impl Related<super::client_account_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ClientAccountMovement.def()
    }
}

impl Related<super::client::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Client.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
