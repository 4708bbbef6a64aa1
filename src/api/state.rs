use std::sync::Arc;

use crate::convo::ConvoService;
use crate::db::Db;
use crate::order::OrderEngine;
use crate::quote::QuoteService;

use super::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub engine: Arc<OrderEngine>,
    pub quotes: QuoteService,
    pub convo: Arc<ConvoService>,
    pub midtrans_server_key: String,
    pub jwt_secret: String,
    pub limits: Arc<Limits>,
}

pub struct Limits {
    /// Generic per-user limit.
    pub general: RateLimiter,
    /// Order creation: 10 per hour per user.
    pub order_create: RateLimiter,
}

impl Limits {
    pub fn new() -> Self {
        use std::time::Duration;
        Self {
            general: RateLimiter::new(100, Duration::from_secs(60)),
            order_create: RateLimiter::new(10, Duration::from_secs(3600)),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
