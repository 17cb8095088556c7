use admit_catalog::{OccurrenceResolver, ScheduledOccurrenceResolver};
use admit_core::memory::InMemoryStore;
use admit_core::{
    EventCatalog, NotificationSink, PaymentAttemptRepository, PaymentGateway, TicketRepository, TicketingRules,
    WebhookLogRepository,
};
use std::sync::Arc;
use std::time::Duration;

/// Collaborators shared by every ticketing component.
#[derive(Clone)]
pub struct TicketingContext {
    pub tickets: Arc<dyn TicketRepository>,
    pub attempts: Arc<dyn PaymentAttemptRepository>,
    pub webhooks: Arc<dyn WebhookLogRepository>,
    pub events: Arc<dyn EventCatalog>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub occurrences: Arc<dyn OccurrenceResolver>,
    pub notifier: Arc<dyn NotificationSink>,
    pub rules: TicketingRules,
}

impl TicketingContext {
    /// Wires every repository to one in-memory store.
    pub fn in_memory(
        store: Arc<InMemoryStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationSink>,
        rules: TicketingRules,
    ) -> Self {
        Self {
            tickets: store.clone(),
            attempts: store.clone(),
            webhooks: store.clone(),
            events: store,
            gateway,
            occurrences: Arc::new(ScheduledOccurrenceResolver),
            notifier,
            rules,
        }
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.rules.gateway_timeout_ms.max(1))
    }
}
