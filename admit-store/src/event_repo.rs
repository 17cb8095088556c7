use admit_catalog::EventListing;
use admit_core::{EventCatalog, StoreResult};
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::map_sqlx_error;
use crate::rows::{EventRow, EVENT_COLUMNS};

pub struct PgEventCatalog {
    pool: PgPool,
}

impl PgEventCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventCatalog for PgEventCatalog {
    async fn get_event(&self, id: Uuid) -> StoreResult<Option<EventListing>> {
        let sql = format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS);
        sqlx::query_as::<_, EventRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .map(EventListing::try_from)
            .transpose()
    }
}
