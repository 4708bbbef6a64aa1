pub mod midtrans;
pub mod webhook;

pub use midtrans::{
    ChargeRequest, ChargeResponse, GatewayStatus, Midtrans, PaymentGateway, PaymentOutcome,
};
