use admit_core::{AttemptStatus, GatewayCheckout, PaymentAttempt, PaymentAttemptRepository, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::map_sqlx_error;
use crate::rows::{kind_columns, AttemptRow, ATTEMPT_COLUMNS};

/// Guard shared by every attempt write: a fulfilled attempt is frozen.
const NOT_DONE: &str = "reference = $1 AND fulfillment_status <> 'done'";

pub struct PgPaymentAttemptRepository {
    pool: PgPool,
}

impl PgPaymentAttemptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentAttemptRepository for PgPaymentAttemptRepository {
    async fn insert_attempt(&self, attempt: &PaymentAttempt) -> StoreResult<()> {
        let (kind, accepted_bid_id) = kind_columns(&attempt.kind);
        let sql = format!(
            "INSERT INTO payment_attempts ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, \
             $14, $15, $16, $17, $18, $19, $20, $21, $22)",
            ATTEMPT_COLUMNS
        );
        sqlx::query(&sql)
            .bind(attempt.id)
            .bind(&attempt.reference)
            .bind(&attempt.provider)
            .bind(kind)
            .bind(attempt.kind.ticket_id())
            .bind(accepted_bid_id)
            .bind(attempt.status.as_str())
            .bind(&attempt.buyer_user_id)
            .bind(attempt.buyer_email.as_ref().map(|e| e.expose().as_str()))
            .bind(attempt.event_id)
            .bind(attempt.amount_minor_units)
            .bind(&attempt.currency)
            .bind(&attempt.authorization_url)
            .bind(&attempt.access_code)
            .bind(&attempt.initialize_payload)
            .bind(&attempt.verify_payload)
            .bind(attempt.fulfillment_status.as_str())
            .bind(attempt.fulfillment_ticket_id)
            .bind(&attempt.failure_reason)
            .bind(attempt.fulfilled_at)
            .bind(attempt.created_at)
            .bind(attempt.updated_at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_by_reference(&self, reference: &str) -> StoreResult<Option<PaymentAttempt>> {
        let sql = format!("SELECT {} FROM payment_attempts WHERE reference = $1", ATTEMPT_COLUMNS);
        sqlx::query_as::<_, AttemptRow>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(PaymentAttempt::try_from)
            .transpose()
    }

    async fn record_checkout(
        &self,
        reference: &str,
        checkout: &GatewayCheckout,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let sql = format!(
            "UPDATE payment_attempts SET authorization_url = $2, access_code = $3, initialize_payload = $4, \
             updated_at = $5 WHERE {}",
            NOT_DONE
        );
        let result = sqlx::query(&sql)
            .bind(reference)
            .bind(&checkout.authorization_url)
            .bind(&checkout.access_code)
            .bind(&checkout.raw)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_verification(
        &self,
        reference: &str,
        status: AttemptStatus,
        payload: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let sql = format!(
            "UPDATE payment_attempts SET status = $2, verify_payload = $3, updated_at = $4 WHERE {}",
            NOT_DONE
        );
        let result = sqlx::query(&sql)
            .bind(reference)
            .bind(status.as_str())
            .bind(payload)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(
        &self,
        reference: &str,
        status: AttemptStatus,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let sql = format!(
            "UPDATE payment_attempts SET status = $2, fulfillment_status = 'failed', failure_reason = $3, \
             updated_at = $4 WHERE {}",
            NOT_DONE
        );
        let result = sqlx::query(&sql)
            .bind(reference)
            .bind(status.as_str())
            .bind(reason)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_fulfillment_failed(&self, reference: &str, reason: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let sql = format!(
            "UPDATE payment_attempts SET fulfillment_status = 'failed', failure_reason = $2, updated_at = $3 WHERE {}",
            NOT_DONE
        );
        let result = sqlx::query(&sql)
            .bind(reference)
            .bind(reason)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_fulfilled(&self, reference: &str, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        // Row lock on the guarded update makes this the single winner.
        let sql = format!(
            "UPDATE payment_attempts SET status = 'success', fulfillment_status = 'done', fulfillment_ticket_id = $2, \
             failure_reason = NULL, fulfilled_at = $3, updated_at = $3 WHERE {}",
            NOT_DONE
        );
        let result = sqlx::query(&sql)
            .bind(reference)
            .bind(ticket_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn expire_open_attempts(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE payment_attempts
            SET status = 'expired', fulfillment_status = 'failed', failure_reason = 'reservation expired', updated_at = $2
            WHERE ticket_id = $1 AND status = 'initialized' AND fulfillment_status <> 'done'
            "#,
        )
        .bind(ticket_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
