use admit_catalog::inventory::check_across;
use admit_catalog::{CapacityLimits, CapacitySnapshot};
use admit_core::repository::TICKET_CODE_CONSTRAINT;
use admit_core::{
    BidEffect, BidStatus, ResaleBid, ResaleTransfer, ResaleUpdate, StoreError, StoreResult, Ticket, TicketRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use crate::database::map_sqlx_error;
use crate::rows::{BidRow, TicketRow, BID_COLUMNS, TICKET_COLUMNS};

const BARCODE_CONSTRAINT: &str = "uq_tickets_barcode_value";

/// Barcode collisions are regenerated the same way code collisions are.
fn map_ticket_error(err: sqlx::Error) -> StoreError {
    match map_sqlx_error(err) {
        e if e.is_duplicate_of(BARCODE_CONSTRAINT) => StoreError::duplicate(TICKET_CODE_CONSTRAINT),
        e => e,
    }
}

/// Every capacity write on an event serializes on this advisory lock key. Category
/// pools also count against the event total, so one key covers both.
fn capacity_lock_key(event_id: Uuid) -> String {
    format!("capacity:{}", event_id)
}

pub struct PgTicketRepository {
    pool: PgPool,
}

impl PgTicketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> StoreResult<Option<Ticket>> {
        let sql = format!("SELECT {} FROM tickets WHERE {} LIMIT 1", TICKET_COLUMNS, clause);
        sqlx::query_as::<_, TicketRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(Ticket::try_from)
            .transpose()
    }
}

async fn snapshot(
    conn: &mut PgConnection,
    event_id: Uuid,
    scope: Option<&str>,
    capacity: Option<i64>,
    fresh_since: DateTime<Utc>,
) -> Result<CapacitySnapshot, sqlx::Error> {
    let (sold, pending_fresh): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(quantity) FILTER (WHERE status IN ('paid', 'used')), 0)::BIGINT,
            COALESCE(SUM(quantity) FILTER (WHERE status = 'pending' AND created_at >= $3), 0)::BIGINT
        FROM tickets
        WHERE event_id = $1 AND ($2::TEXT IS NULL OR category = $2)
        "#,
    )
    .bind(event_id)
    .bind(scope)
    .bind(fresh_since)
    .fetch_one(&mut *conn)
    .await?;

    Ok(CapacitySnapshot {
        capacity,
        sold,
        pending_fresh,
    })
}

/// Holds the event's capacity lock until the transaction ends.
async fn lock_capacity(conn: &mut PgConnection, event_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(capacity_lock_key(event_id))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Whether `quantity` more seats fit every pool in `limits`.
async fn fits(
    conn: &mut PgConnection,
    event_id: Uuid,
    limits: &CapacityLimits,
    fresh_since: DateTime<Utc>,
    quantity: i32,
) -> Result<bool, sqlx::Error> {
    let mut snapshots = Vec::with_capacity(2);
    for (scope, capacity) in limits.scopes() {
        snapshots.push(snapshot(&mut *conn, event_id, scope, capacity, fresh_since).await?);
    }
    Ok(check_across(&snapshots, quantity as i64).is_ok())
}

async fn insert_ticket(conn: &mut PgConnection, t: &Ticket) -> Result<(), sqlx::Error> {
    let sql = format!(
        "INSERT INTO tickets ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
         $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33, $34)",
        TICKET_COLUMNS
    );
    sqlx::query(&sql)
        .bind(t.id)
        .bind(t.event_id)
        .bind(&t.category)
        .bind(&t.buyer_user_id)
        .bind(&t.organizer_user_id)
        .bind(t.quantity)
        .bind(t.unit_price_naira)
        .bind(t.total_price_naira)
        .bind(&t.currency)
        .bind(t.status.as_str())
        .bind(&t.payment_provider)
        .bind(&t.payment_reference)
        .bind(&t.ticket_code)
        .bind(&t.barcode_value)
        .bind(t.occurrence_starts_at)
        .bind(t.occurrence_ends_at)
        .bind(t.paid_at)
        .bind(t.verified_at)
        .bind(t.cancelled_at)
        .bind(t.used_at)
        .bind(t.expired_at)
        .bind(&t.used_by_user_id)
        .bind(t.resold_from_ticket_id)
        .bind(t.resale.status.as_str())
        .bind(t.resale.price_naira)
        .bind(t.resale.quantity)
        .bind(t.resale.allow_bids)
        .bind(t.resale.listed_at)
        .bind(t.resale.accepted_bid_id)
        .bind(t.resale.accepted_bid_expires_at)
        .bind(&t.resale.buyer_user_id)
        .bind(t.version)
        .bind(t.created_at)
        .bind(t.updated_at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Writes the mutable columns of `t` if the stored version still equals `t.version`.
async fn update_ticket_cas(conn: &mut PgConnection, t: &Ticket, at: DateTime<Utc>) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tickets SET
            buyer_user_id = $3,
            quantity = $4,
            total_price_naira = $5,
            status = $6,
            payment_provider = $7,
            payment_reference = $8,
            barcode_value = $9,
            verified_at = $10,
            resale_status = $11,
            resale_price_naira = $12,
            resale_quantity = $13,
            resale_allow_bids = $14,
            resale_listed_at = $15,
            resale_accepted_bid_id = $16,
            resale_accepted_bid_expires_at = $17,
            resale_buyer_user_id = $18,
            version = version + 1,
            updated_at = $19
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(t.id)
    .bind(t.version)
    .bind(&t.buyer_user_id)
    .bind(t.quantity)
    .bind(t.total_price_naira)
    .bind(t.status.as_str())
    .bind(&t.payment_provider)
    .bind(&t.payment_reference)
    .bind(&t.barcode_value)
    .bind(t.verified_at)
    .bind(t.resale.status.as_str())
    .bind(t.resale.price_naira)
    .bind(t.resale.quantity)
    .bind(t.resale.allow_bids)
    .bind(t.resale.listed_at)
    .bind(t.resale.accepted_bid_id)
    .bind(t.resale.accepted_bid_expires_at)
    .bind(&t.resale.buyer_user_id)
    .bind(at)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Rejects the ticket's open bids (and the accepted one when `include_accepted`), except `keep`.
async fn close_bids(
    conn: &mut PgConnection,
    ticket_id: Uuid,
    keep: Option<Uuid>,
    include_accepted: bool,
    at: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE resale_bids SET status = 'rejected', responded_at = $3
        WHERE ticket_id = $1
          AND id IS DISTINCT FROM $2
          AND (status = 'open' OR ($4 AND status = 'accepted'))
        "#,
    )
    .bind(ticket_id)
    .bind(keep)
    .bind(at)
    .bind(include_accepted)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

const CLEARED_RESALE: &str = "resale_status = 'none', resale_price_naira = NULL, resale_quantity = NULL, \
    resale_allow_bids = FALSE, resale_listed_at = NULL, resale_accepted_bid_id = NULL, \
    resale_accepted_bid_expires_at = NULL, resale_buyer_user_id = NULL";

#[async_trait]
impl TicketRepository for PgTicketRepository {
    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        let sql = format!("SELECT {} FROM tickets WHERE id = $1", TICKET_COLUMNS);
        sqlx::query_as::<_, TicketRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(Ticket::try_from)
            .transpose()
    }

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Ticket>> {
        self.fetch_one_where("ticket_code = $1 OR barcode_value = $1", code).await
    }

    async fn find_by_payment_reference(&self, reference: &str) -> StoreResult<Option<Ticket>> {
        self.fetch_one_where("payment_reference = $1", reference).await
    }

    async fn capacity_snapshot(
        &self,
        event_id: Uuid,
        scope: Option<&str>,
        capacity: Option<i64>,
        fresh_since: DateTime<Utc>,
    ) -> StoreResult<CapacitySnapshot> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        snapshot(&mut conn, event_id, scope, capacity, fresh_since)
            .await
            .map_err(map_sqlx_error)
    }

    async fn insert_within_capacity(
        &self,
        ticket: &Ticket,
        limits: &CapacityLimits,
        fresh_since: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // 1. Serialize capacity writes on the event until commit
        lock_capacity(&mut tx, ticket.event_id).await.map_err(map_sqlx_error)?;

        // 2. Re-count every pool under the lock
        let room = fits(&mut tx, ticket.event_id, limits, fresh_since, ticket.quantity)
            .await
            .map_err(map_sqlx_error)?;
        if !room {
            debug!(event_id = %ticket.event_id, category = ?limits.category, "Reservation does not fit");
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(false);
        }

        // 3. Insert and release the lock
        insert_ticket(&mut tx, ticket).await.map_err(map_ticket_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(true)
    }

    async fn set_payment_reference(
        &self,
        ticket_id: Uuid,
        provider: &str,
        reference: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET payment_provider = $2, payment_reference = $3, version = version + 1, updated_at = $4
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(ticket_id)
        .bind(provider)
        .bind(reference)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_paid_within_capacity(
        &self,
        ticket_id: Uuid,
        limits: &CapacityLimits,
        fresh_since: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let pending: Option<(Uuid, i32, DateTime<Utc>)> =
            sqlx::query_as("SELECT event_id, quantity, created_at FROM tickets WHERE id = $1 AND status = 'pending'")
                .bind(ticket_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        let Some((event_id, quantity, created_at)) = pending else {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(false);
        };

        // A stale reservation's seats may have been resold; take them back under the lock.
        if created_at < fresh_since {
            lock_capacity(&mut tx, event_id).await.map_err(map_sqlx_error)?;
            let room = fits(&mut tx, event_id, limits, fresh_since, quantity)
                .await
                .map_err(map_sqlx_error)?;
            if !room {
                debug!(ticket_id = %ticket_id, "Stale reservation no longer fits");
                tx.rollback().await.map_err(map_sqlx_error)?;
                return Ok(false);
            }
        }

        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET status = 'paid', paid_at = $2, verified_at = $2, version = version + 1, updated_at = $2
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(ticket_id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn cancel_pending(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let sql = format!(
            "UPDATE tickets SET status = 'cancelled', cancelled_at = $2, {}, version = version + 1, updated_at = $2 \
             WHERE id = $1 AND status = 'pending'",
            CLEARED_RESALE
        );
        let result = sqlx::query(&sql)
            .bind(ticket_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn expire_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        at: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            "UPDATE tickets SET status = 'expired', expired_at = $2, {cleared}, version = version + 1, updated_at = $2 \
             WHERE id IN ( \
                 SELECT id FROM tickets WHERE status = 'pending' AND created_at < $1 \
                 ORDER BY created_at LIMIT $3 FOR UPDATE SKIP LOCKED \
             ) AND status = 'pending' \
             RETURNING {columns}",
            cleared = CLEARED_RESALE,
            columns = TICKET_COLUMNS
        );
        sqlx::query_as::<_, TicketRow>(&sql)
            .bind(created_before)
            .bind(at)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(Ticket::try_from)
            .collect()
    }

    async fn mark_used(&self, ticket_id: Uuid, used_by: &str, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        let sql = format!(
            "UPDATE tickets SET status = 'used', used_at = $2, used_by_user_id = $3, {}, \
             version = version + 1, updated_at = $2 WHERE id = $1 AND status = 'paid'",
            CLEARED_RESALE
        );
        let result = sqlx::query(&sql)
            .bind(ticket_id)
            .bind(at)
            .bind(used_by)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        if result.rows_affected() != 1 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(false);
        }
        close_bids(&mut tx, ticket_id, None, true, at)
            .await
            .map_err(map_sqlx_error)?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(true)
    }

    async fn apply_resale_update(&self, update: &ResaleUpdate) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // 1. Ticket compare-and-swap takes the row lock
        if !update_ticket_cas(&mut tx, &update.ticket, update.at)
            .await
            .map_err(map_ticket_error)?
        {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(false);
        }

        // 2. Bid ledger
        let ticket_id = update.ticket.id;
        match &update.bids {
            BidEffect::None => {}
            BidEffect::RejectOpen => {
                close_bids(&mut tx, ticket_id, None, false, update.at)
                    .await
                    .map_err(map_sqlx_error)?;
            }
            BidEffect::Accept { bid } => {
                let accepted = sqlx::query(
                    r#"
                    INSERT INTO resale_bids
                        (id, ticket_id, event_id, seller_user_id, bidder_user_id, amount_naira, status,
                         created_at, responded_at, expires_at)
                    VALUES ($1, $2, $3, $4, $5, $6, 'accepted', $7, $8, $9)
                    ON CONFLICT (id) DO UPDATE
                    SET status = 'accepted', responded_at = EXCLUDED.responded_at, expires_at = EXCLUDED.expires_at
                    WHERE resale_bids.status = 'open'
                    "#,
                )
                .bind(bid.id)
                .bind(bid.ticket_id)
                .bind(bid.event_id)
                .bind(&bid.seller_user_id)
                .bind(&bid.bidder_user_id)
                .bind(bid.amount_naira)
                .bind(bid.created_at)
                .bind(update.at)
                .bind(bid.expires_at)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
                if accepted.rows_affected() != 1 {
                    // The bid left `open` under us.
                    tx.rollback().await.map_err(map_sqlx_error)?;
                    return Ok(false);
                }
                close_bids(&mut tx, ticket_id, Some(bid.id), false, update.at)
                    .await
                    .map_err(map_sqlx_error)?;
            }
            BidEffect::Release { bid_id, status } => {
                sqlx::query(
                    "UPDATE resale_bids SET status = $2, responded_at = $3 WHERE id = $1 AND status = 'accepted'",
                )
                .bind(bid_id)
                .bind(status.as_str())
                .bind(update.at)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(true)
    }

    async fn apply_resale_transfer(&self, transfer: &ResaleTransfer) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        // 1. Source ticket, guarded by version
        if !update_ticket_cas(&mut tx, &transfer.source, transfer.at)
            .await
            .map_err(map_ticket_error)?
        {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(false);
        }

        // 2. Split-off ticket for a partial sale
        if let Some(sibling) = &transfer.sibling {
            insert_ticket(&mut tx, sibling).await.map_err(map_ticket_error)?;
        }

        // 3. Settle the bid ledger
        if let Some(bid_id) = transfer.paid_bid_id {
            sqlx::query(
                "UPDATE resale_bids SET status = 'paid', paid_at = $2, responded_at = $2 \
                 WHERE id = $1 AND status = 'accepted'",
            )
            .bind(bid_id)
            .bind(transfer.at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        close_bids(&mut tx, transfer.source.id, transfer.paid_bid_id, true, transfer.at)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(true)
    }

    async fn list_lapsed_offers(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {} FROM tickets \
             WHERE status = 'paid' AND resale_status = 'offer_accepted' \
               AND (resale_accepted_bid_expires_at IS NULL OR resale_accepted_bid_expires_at <= $1) \
             ORDER BY resale_accepted_bid_expires_at NULLS FIRST LIMIT $2",
            TICKET_COLUMNS
        );
        sqlx::query_as::<_, TicketRow>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(Ticket::try_from)
            .collect()
    }

    async fn get_bid(&self, id: Uuid) -> StoreResult<Option<ResaleBid>> {
        let sql = format!("SELECT {} FROM resale_bids WHERE id = $1", BID_COLUMNS);
        sqlx::query_as::<_, BidRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(ResaleBid::try_from)
            .transpose()
    }

    async fn list_bids(&self, ticket_id: Uuid) -> StoreResult<Vec<ResaleBid>> {
        let sql = format!(
            "SELECT {} FROM resale_bids WHERE ticket_id = $1 ORDER BY created_at",
            BID_COLUMNS
        );
        sqlx::query_as::<_, BidRow>(&sql)
            .bind(ticket_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .into_iter()
            .map(ResaleBid::try_from)
            .collect()
    }

    async fn upsert_open_bid(&self, bid: &ResaleBid) -> StoreResult<ResaleBid> {
        let sql = format!(
            "INSERT INTO resale_bids (id, ticket_id, event_id, seller_user_id, bidder_user_id, amount_naira, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 'open', $7) \
             ON CONFLICT (ticket_id, bidder_user_id) WHERE status = 'open' \
             DO UPDATE SET amount_naira = EXCLUDED.amount_naira, created_at = EXCLUDED.created_at \
             RETURNING {}",
            BID_COLUMNS
        );
        let row = sqlx::query_as::<_, BidRow>(&sql)
            .bind(bid.id)
            .bind(bid.ticket_id)
            .bind(bid.event_id)
            .bind(&bid.seller_user_id)
            .bind(&bid.bidder_user_id)
            .bind(bid.amount_naira)
            .bind(bid.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        ResaleBid::try_from(row)
    }

    async fn transition_bid(
        &self,
        bid_id: Uuid,
        from: BidStatus,
        to: BidStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE resale_bids SET status = $3, responded_at = $4 WHERE id = $1 AND status = $2")
            .bind(bid_id)
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }
}
