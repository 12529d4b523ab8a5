pub mod audit_log;
pub mod client;
pub mod client_account_movement;
pub mod order;
pub mod order_item;
pub mod order_status_history;
pub mod payment;
pub mod product;
pub mod stock_movement;

pub use audit_log::Entity as AuditLog;
pub use client::Entity as Client;
pub use client_account_movement::Entity as ClientAccountMovement;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use order_status_history::Entity as OrderStatusHistory;
pub use payment::Entity as Payment;
pub use product::Entity as Product;
pub use stock_movement::Entity as StockMovement;
