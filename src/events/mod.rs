use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(i64),
    OrderStatusChanged {
        order_id: i64,
        old_status: String,
        new_status: String,
    },
    OrderDeleted(i64),

    // Payment-condition events
    PaymentConditionChanged {
        order_id: i64,
        old_condition: String,
        new_condition: String,
    },
    PaymentRegistered {
        order_id: i64,
        payment_id: i64,
    },

    // Stock events
    StockAdjusted {
        product_id: i64,
        delta: i32,
        new_quantity: i32,
    },
}

/// Drains the event channel and logs each event. Handlers here are
/// fire-and-forget; a failure never propagates back to the request path.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(order_id) => {
                info!(order_id, "order created");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(order_id, %old_status, %new_status, "order status changed");
            }
            Event::OrderDeleted(order_id) => {
                info!(order_id, "order deleted");
            }
            Event::PaymentConditionChanged {
                order_id,
                old_condition,
                new_condition,
            } => {
                info!(order_id, %old_condition, %new_condition, "payment condition changed");
            }
            Event::PaymentRegistered {
                order_id,
                payment_id,
            } => {
                info!(order_id, payment_id, "payment registered");
            }
            Event::StockAdjusted {
                product_id,
                delta,
                new_quantity,
            } => {
                info!(product_id, delta, new_quantity, "stock adjusted");
            }
        }
    }

    error!("Event processing loop terminated: channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_sender_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(8);
        let sender = EventSender::new(tx);

        sender.send(Event::OrderCreated(7)).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderCreated(id)) => assert_eq!(id, 7),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn event_sender_errors_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        assert!(sender.send(Event::OrderDeleted(1)).await.is_err());
    }
}
