pub mod audit;
pub mod buyer_code;
pub mod orders;
pub mod payment_condition;
pub mod pricing;
pub mod stock;

use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;

/// All service instances, built once at startup and shared through AppState.
#[derive(Clone)]
pub struct AppServices {
    pub orders: orders::OrderService,
    pub payment_conditions: payment_condition::PaymentConditionService,
    pub stock: stock::StockService,
}

impl AppServices {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            orders: orders::OrderService::new(db.clone(), event_sender.clone()),
            payment_conditions: payment_condition::PaymentConditionService::new(
                db.clone(),
                event_sender.clone(),
            ),
            stock: stock::StockService::new(db, event_sender),
        }
    }
}
