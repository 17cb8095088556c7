pub mod app_config;
pub mod database;
pub mod event_repo;
pub mod events;
pub mod payment_repo;
pub mod redis_repo;
mod rows;
pub mod ticket_repo;
pub mod webhook_repo;

pub use app_config::Config;
pub use database::DbClient;
pub use event_repo::PgEventCatalog;
pub use events::{EventProducer, KafkaNotificationSink};
pub use payment_repo::PgPaymentAttemptRepository;
pub use redis_repo::RedisClient;
pub use ticket_repo::PgTicketRepository;
pub use webhook_repo::PgWebhookLogRepository;
