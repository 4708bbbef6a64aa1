pub mod chain;
pub mod order;
pub mod referral;
pub mod token;
pub mod user;
pub mod voucher;

pub use chain::{ChainKind, ChainSpec};
pub use order::{Order, OrderStatus, PaymentMethod};
pub use referral::Referral;
pub use token::Token;
pub use user::{Role, User};
pub use voucher::Voucher;
