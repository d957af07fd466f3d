//! External service traits and in-memory implementations.

pub mod inventory;
pub mod notification;
pub mod payment;
pub mod shipping;

pub use inventory::{InMemoryInventoryService, InventoryService};
pub use notification::{InMemoryNotificationService, Notification, NotificationService};
pub use payment::{InMemoryPaymentService, PaymentResult, PaymentService};
pub use shipping::{InMemoryShippingService, ShipmentResult, ShippingService};
