use admit_api::{app, metrics::Metrics, AppState, AuthConfig};
use admit_catalog::ScheduledOccurrenceResolver;
use admit_core::{NotificationSink, SandboxGateway, TracingNotificationSink};
use admit_store::{
    Config, DbClient, EventProducer, KafkaNotificationSink, PgEventCatalog, PgPaymentAttemptRepository,
    PgTicketRepository, PgWebhookLogRepository, RedisClient,
};
use admit_ticket::{TicketingContext, TicketingService};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "admit_api=debug,admit_ticket=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Admit API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;

    // Redis, optional
    let redis = match &config.redis {
        Some(redis_config) => Some(Arc::new(
            RedisClient::new(&redis_config.url)
                .await
                .context("Failed to connect to Redis")?,
        )),
        None => {
            tracing::warn!("Redis not configured, rate limiting disabled");
            None
        }
    };

    // Kafka, optional
    let notifier: Arc<dyn NotificationSink> = match &config.kafka {
        Some(kafka_config) => {
            let producer = EventProducer::new(&kafka_config.brokers).context("Failed to create Kafka producer")?;
            Arc::new(KafkaNotificationSink::new(producer, kafka_config.notification_topic.clone()))
        }
        None => {
            tracing::warn!("Kafka not configured, notifications are only logged");
            Arc::new(TracingNotificationSink)
        }
    };

    let ctx = TicketingContext {
        tickets: Arc::new(PgTicketRepository::new(db.pool.clone())),
        attempts: Arc::new(PgPaymentAttemptRepository::new(db.pool.clone())),
        webhooks: Arc::new(PgWebhookLogRepository::new(db.pool.clone())),
        events: Arc::new(PgEventCatalog::new(db.pool.clone())),
        gateway: Arc::new(SandboxGateway::new(config.gateway.secret_key.clone())),
        occurrences: Arc::new(ScheduledOccurrenceResolver),
        notifier,
        rules: config.ticketing_rules(),
    };
    let ticketing = TicketingService::new(ctx);

    // Background expiry sweeper
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(ticketing.sweeper().run(shutdown.clone()));

    let app_state = AppState {
        ticketing,
        redis,
        rate_limit_per_minute: config.server.rate_limit_per_minute,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
        metrics: Arc::new(Metrics::new().context("Failed to register metrics")?),
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!("Sweeper task failed: {}", e);
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
            }
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }
}
