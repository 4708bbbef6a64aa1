pub mod engine;
pub mod expiry;
pub mod payout;

pub use engine::{CreateOrderRequest, OrderEngine, PaymentInfo, WebhookDisposition};
pub use payout::{PayoutDeps, PayoutSender, process_order};
