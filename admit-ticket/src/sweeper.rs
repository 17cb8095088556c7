use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::TicketingContext;
use crate::resale::ResaleMarketplace;

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_offers: usize,
    pub expired_reservations: usize,
    pub errors: usize,
    /// Another sweep was still running; nothing was done.
    pub skipped: bool,
}

/// Periodically closes lapsed resale exclusivity windows and abandoned reservations.
pub struct ResaleExpirySweeper {
    ctx: TicketingContext,
    marketplace: Arc<ResaleMarketplace>,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ResaleExpirySweeper {
    pub fn new(ctx: TicketingContext, marketplace: Arc<ResaleMarketplace>) -> Self {
        Self {
            ctx,
            marketplace,
            in_flight: AtomicBool::new(false),
        }
    }

    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("Sweep already in flight, skipping");
            return SweepReport {
                skipped: true,
                ..SweepReport::default()
            };
        }
        let _guard = InFlight(&self.in_flight);

        let mut report = SweepReport::default();
        let batch = self.ctx.rules.sweep_batch_size.max(1);

        // 1. Lapsed exclusivity windows
        match self.ctx.tickets.list_lapsed_offers(now, batch).await {
            Ok(tickets) => {
                for ticket in tickets {
                    let ticket_id = ticket.id;
                    match self.marketplace.expire_offer(ticket, now).await {
                        Ok(current) if !current.resale.offer_lapsed(now) => report.expired_offers += 1,
                        Ok(_) => {}
                        Err(e) => {
                            report.errors += 1;
                            warn!(ticket_id = %ticket_id, "Failed to expire resale offer: {}", e);
                        }
                    }
                }
            }
            Err(e) => {
                report.errors += 1;
                error!("Failed to list lapsed resale offers: {}", e);
            }
        }

        // 2. Abandoned reservations
        let cutoff = now - Duration::minutes(self.ctx.rules.reservation_expiry_minutes.max(1));
        match self.ctx.tickets.expire_stale_pending(cutoff, now, batch).await {
            Ok(expired) => {
                for ticket in &expired {
                    if let Err(e) = self.ctx.attempts.expire_open_attempts(ticket.id, now).await {
                        report.errors += 1;
                        warn!(ticket_id = %ticket.id, "Failed to expire payment attempts: {}", e);
                    }
                }
                report.expired_reservations = expired.len();
            }
            Err(e) => {
                report.errors += 1;
                error!("Failed to expire stale reservations: {}", e);
            }
        }

        if report.expired_offers + report.expired_reservations + report.errors > 0 {
            info!(
                expired_offers = report.expired_offers,
                expired_reservations = report.expired_reservations,
                errors = report.errors,
                "Expiry sweep finished"
            );
        }
        report
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let period = std::time::Duration::from_secs(self.ctx.rules.sweep_interval_seconds.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = period.as_secs(), "Expiry sweeper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Expiry sweeper received shutdown");
                    break;
                }
                _ = interval.tick() => {
                    self.sweep_once(Utc::now()).await;
                }
            }
        }
        info!("Expiry sweeper stopped");
    }
}
