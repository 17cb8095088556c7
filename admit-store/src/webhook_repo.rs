use admit_core::{StoreResult, WebhookLogEntry, WebhookLogRepository};
use async_trait::async_trait;
use sqlx::PgPool;

use crate::database::map_sqlx_error;

/// Append-only audit trail of every webhook delivery.
pub struct PgWebhookLogRepository {
    pool: PgPool,
}

impl PgWebhookLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookLogRepository for PgWebhookLogRepository {
    async fn record_webhook(&self, entry: &WebhookLogEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_logs (id, provider, event_type, reference, signature_valid, outcome, detail, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.provider)
        .bind(&entry.event_type)
        .bind(&entry.reference)
        .bind(entry.signature_valid)
        .bind(entry.outcome.as_str())
        .bind(&entry.detail)
        .bind(entry.received_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
