use chrono::{DateTime, Utc};
use pedidos_api::db::{self, DbPool};
use pedidos_api::entities::{client, product};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, Set};

/// One shared in-memory SQLite database per test. A single pooled connection
/// keeps the database alive and makes every session see the same data.
pub async fn setup_db() -> DbPool {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let pool = Database::connect(opt).await.expect("sqlite connect");
    db::run_migrations(&pool).await.expect("migrations");
    pool
}

pub async fn seed_product(db: &DbPool, name: &str, price: Decimal, stock: i32) -> i64 {
    seed_discounted_product(db, name, price, stock, None, None, None).await
}

pub async fn seed_discounted_product(
    db: &DbPool,
    name: &str,
    price: Decimal,
    stock: i32,
    discount_percent: Option<Decimal>,
    discount_start: Option<DateTime<Utc>>,
    discount_end: Option<DateTime<Utc>>,
) -> i64 {
    let model = product::ActiveModel {
        name: Set(name.to_string()),
        description: Set(None),
        price: Set(price),
        stock_quantity: Set(stock),
        discount_percent: Set(discount_percent),
        discount_start: Set(discount_start),
        discount_end: Set(discount_end),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
        deleted_at: Set(None),
        ..Default::default()
    };
    model.insert(db).await.expect("seed product").id
}

pub async fn seed_client(db: &DbPool, name: &str) -> i64 {
    let model = client::ActiveModel {
        name: Set(name.to_string()),
        email: Set(None),
        phone: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    };
    model.insert(db).await.expect("seed client").id
}
