use admit_store::RedisClient;
use admit_ticket::TicketingService;
use std::sync::Arc;

use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub ticketing: TicketingService,
    /// Rate limiting is off when Redis is not configured.
    pub redis: Option<Arc<RedisClient>>,
    pub rate_limit_per_minute: i64,
    pub auth: AuthConfig,
    pub metrics: Arc<Metrics>,
}
