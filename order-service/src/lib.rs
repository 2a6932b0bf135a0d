pub mod api;
pub mod cart;
pub mod handlers;
pub mod models;
pub mod notifier;
pub mod pricing;
pub mod schema;

pub use cart::{CartStore, DbCartStore};
pub use handlers::{CreateOrderRequest, OrderHandler, StatusChange};
pub use notifier::{KafkaNotifier, LogNotifier, Notifier};
