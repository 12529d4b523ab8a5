use chrono::Utc;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use tracing::error;

use crate::entities::audit_log;
use crate::entities::order::OrderStatus;
use crate::entities::order_status_history;

/// Best-effort audit sink. Failures are logged and discarded so the primary
/// operation never aborts on an audit write.
pub async fn record_audit<C: ConnectionTrait>(
    conn: &C,
    actor: Option<&str>,
    action: &str,
    entity_type: &str,
    entity_id: i64,
    meta: Option<serde_json::Value>,
) {
    let entry = audit_log::ActiveModel {
        actor: Set(actor.map(str::to_string)),
        action: Set(action.to_string()),
        entity_type: Set(entity_type.to_string()),
        entity_id: Set(entity_id),
        meta: Set(meta),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    if let Err(e) = entry.insert(conn).await {
        error!(error = %e, action, entity_type, entity_id, "Failed to write audit entry");
    }
}

/// Best-effort status trail, same failure policy as [`record_audit`].
pub async fn record_status_change<C: ConnectionTrait>(
    conn: &C,
    order_id: i64,
    old_status: Option<OrderStatus>,
    new_status: OrderStatus,
    changed_by: Option<&str>,
) {
    let entry = order_status_history::ActiveModel {
        order_id: Set(order_id),
        old_status: Set(old_status),
        new_status: Set(new_status),
        changed_by: Set(changed_by.map(str::to_string)),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    if let Err(e) = entry.insert(conn).await {
        error!(error = %e, order_id, "Failed to write order status history entry");
    }
}
