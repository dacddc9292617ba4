//! Best-effort audit trail of offer/trade lifecycle events.
//!
//! Writes run on their own pool connection, after the business transaction
//! they describe has committed. A failed write is logged and swallowed; it
//! must never abort or roll back the operation it records.

use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::models::EventEntity;

pub const ORDER_CREATED: &str = "ORDER_CREATED";
pub const ORDER_MATCHED: &str = "ORDER_MATCHED";
pub const ORDER_EXPIRED: &str = "ORDER_EXPIRED";
pub const ORDER_CANCELLED: &str = "ORDER_CANCELLED";
pub const TRADE_CREATED: &str = "TRADE_CREATED";

#[derive(Clone)]
pub struct EventLog {
    db: PgPool,
}

impl EventLog {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn log(
        &self,
        participant_id: i64,
        entity: EventEntity,
        entity_id: Uuid,
        event: &str,
        meta: Value,
    ) {
        let meta = if meta.is_null() { None } else { Some(meta) };

        let result = sqlx::query(
            "INSERT INTO event_log (participant_id, entity_type, entity_id, event, meta)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(participant_id)
        .bind(entity.as_str())
        .bind(entity_id)
        .bind(event)
        .bind(meta)
        .execute(&self.db)
        .await;

        if let Err(e) = result {
            warn!(
                participant_id,
                entity = entity.as_str(),
                %entity_id,
                event,
                "event log write failed: {}",
                e
            );
        }
    }
}
