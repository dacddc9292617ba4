//! Order Store: persistence and targeted queries for offers.
//!
//! All status changes go through `conditional_transition`, a single-row
//! UPDATE with a status predicate. Checking the affected-row count makes
//! every transition an atomic compare-and-swap without any table-wide lock;
//! a CAS that reports zero rows simply means the race was lost.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use anyhow::Result;

use crate::models::{Offer, OfferStatus};
use crate::services::scoring::{POOL_SIZE, SELL_OVERFILL_RATIO};

const OFFER_COLUMNS: &str = "id, owner_id, side, price_per_kwh, quantity_kwh, start_time, \
     end_time, status, weight_price, weight_distance, weight_trust, created_at";

#[derive(Clone)]
pub struct OrderStore {
    db: PgPool,
}

impl OrderStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn insert_on(conn: &mut PgConnection, offer: &Offer) -> Result<()> {
        sqlx::query(
            "INSERT INTO offers (id, owner_id, side, price_per_kwh, quantity_kwh, start_time, \
             end_time, status, weight_price, weight_distance, weight_trust, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(offer.id)
        .bind(offer.owner_id)
        .bind(offer.side)
        .bind(offer.price_per_kwh)
        .bind(offer.quantity_kwh)
        .bind(offer.start_time)
        .bind(offer.end_time)
        .bind(offer.status)
        .bind(offer.weight_price)
        .bind(offer.weight_distance)
        .bind(offer.weight_trust)
        .bind(offer.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Offer>> {
        let offer = sqlx::query_as::<_, Offer>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(offer)
    }

    /// Open buy offers eligible for a match attempt, oldest creation first.
    /// The ordering gives first-come-first-served fairness in which buy
    /// offer gets to choose a seller each cycle.
    pub async fn find_active_buy_offer_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM offers
             WHERE status = 'ACTIVE' AND side = 'buy' AND end_time > $1
             ORDER BY created_at ASC",
        )
        .bind(now)
        .fetch_all(&self.db)
        .await?;

        Ok(ids)
    }

    /// Candidate pool for a buy offer: ACTIVE sells at or below the buy
    /// price from a different owner, quantity within the overfill band, and
    /// a delivery-window overlap of at least `required_overlap_min` minutes.
    /// Capped to the oldest `POOL_SIZE` qualifying rows.
    pub async fn find_sell_candidates(
        &self,
        buy: &Offer,
        now: DateTime<Utc>,
        required_overlap_min: i64,
    ) -> Result<Vec<Offer>> {
        let min_quantity = buy.quantity_kwh;
        let max_quantity = (buy.quantity_kwh * SELL_OVERFILL_RATIO)
            .round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero);

        let candidates = sqlx::query_as::<_, Offer>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers
             WHERE side = 'sell'
               AND status = 'ACTIVE'
               AND price_per_kwh <= $1
               AND owner_id <> $2
               AND end_time > $3
               AND quantity_kwh BETWEEN $4 AND $5
               AND start_time < $6
               AND end_time > $7
               AND EXTRACT(EPOCH FROM (LEAST(end_time, $6) - GREATEST(start_time, $7))) / 60 >= $8
             ORDER BY created_at ASC
             LIMIT $9"
        ))
        .bind(buy.price_per_kwh)
        .bind(buy.owner_id)
        .bind(now)
        .bind(min_quantity)
        .bind(max_quantity)
        .bind(buy.end_time)
        .bind(buy.start_time)
        .bind(required_overlap_min as f64)
        .bind(POOL_SIZE)
        .fetch_all(&self.db)
        .await?;

        Ok(candidates)
    }

    /// ACTIVE offers past their end time, batched to bound per-cycle work.
    pub async fn find_expirable(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<Vec<Offer>> {
        let offers = sqlx::query_as::<_, Offer>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers
             WHERE status = 'ACTIVE' AND end_time <= $1
             ORDER BY end_time ASC
             LIMIT $2"
        ))
        .bind(now)
        .bind(batch_size)
        .fetch_all(&self.db)
        .await?;

        Ok(offers)
    }

    /// Lock only the given ids, skipping rows already locked by a
    /// concurrent transaction; returns those still ACTIVE.
    pub async fn lock_top_candidates(
        conn: &mut PgConnection,
        ids: &[Uuid],
    ) -> Result<Vec<Offer>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let offers = sqlx::query_as::<_, Offer>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers
             WHERE id = ANY($1) AND status = 'ACTIVE'
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(ids)
        .fetch_all(conn)
        .await?;

        Ok(offers)
    }

    /// Atomic compare-and-swap on an offer's status. Returns whether
    /// exactly one row changed; `false` means a concurrent claim won.
    pub async fn conditional_transition(
        conn: &mut PgConnection,
        id: Uuid,
        from: OfferStatus,
        to: OfferStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE offers SET status = $1 WHERE id = $2 AND status = $3")
            .bind(to)
            .bind(id)
            .bind(from)
            .execute(conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Cascade for trade promotion: flip the given offers MATCHED -> RUNNING.
    pub async fn promote_offers_to_running(
        conn: &mut PgConnection,
        ids: &[Uuid],
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE offers SET status = 'RUNNING' WHERE id = ANY($1) AND status = 'MATCHED'",
        )
        .bind(ids)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }

    /// Conditional delete used by cancellation: only ACTIVE or EXPIRED
    /// offers can be removed, and the status predicate makes cancel-vs-match
    /// a race exactly one side wins.
    pub async fn delete_if_cancellable(conn: &mut PgConnection, id: Uuid) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM offers WHERE id = $1 AND status IN ('ACTIVE', 'EXPIRED')")
                .bind(id)
                .execute(conn)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Caller's offers that are still in progress (anything but COMPLETED).
    pub async fn find_open_by_owner(&self, owner_id: i64) -> Result<Vec<Offer>> {
        let offers = sqlx::query_as::<_, Offer>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers
             WHERE owner_id = $1 AND status <> 'COMPLETED'
             ORDER BY created_at DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.db)
        .await?;

        Ok(offers)
    }

    pub async fn find_completed_by_owner(&self, owner_id: i64) -> Result<Vec<Offer>> {
        let offers = sqlx::query_as::<_, Offer>(&format!(
            "SELECT {OFFER_COLUMNS} FROM offers
             WHERE owner_id = $1 AND status = 'COMPLETED'
             ORDER BY created_at DESC"
        ))
        .bind(owner_id)
        .fetch_all(&self.db)
        .await?;

        Ok(offers)
    }
}
