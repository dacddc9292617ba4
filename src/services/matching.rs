//! Matching Engine: pools candidates, scores them, locks the top few, and
//! atomically flips both sides of the winning pair to MATCHED.
//!
//! Claiming is done exclusively through conditional transitions; losing a
//! CAS is the normal outcome of a lost race, not an error, and simply means
//! the offer is retried next sweep.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{ApiError, Result as ApiResult};
use crate::models::{
    CreateOfferRequest, EventEntity, Offer, OfferSide, OfferStatus, Participant, Trade,
    TradeStatus, WalletResource,
};
use crate::services::delivery::{min_end_time, required_overlap_minutes};
use crate::services::event_log::{
    EventLog, ORDER_CANCELLED, ORDER_CREATED, ORDER_MATCHED, TRADE_CREATED,
};
use crate::services::order_store::OrderStore;
use crate::services::participants::ParticipantDirectory;
use crate::services::scoring::{self, SlackBounds, Weights, LOCK_TOP_K};
use crate::services::wallet_ledger::{required_funds, WalletLedger};

/// Outcome of one match attempt against a locked candidate.
enum MatchAttempt {
    Matched(Trade),
    /// Lost a race or the overlap check; the buy offer stays ACTIVE.
    Lost,
}

#[derive(Clone)]
pub struct MatchingEngine {
    db: PgPool,
    orders: OrderStore,
    participants: ParticipantDirectory,
    events: EventLog,
}

impl MatchingEngine {
    pub fn new(
        db: PgPool,
        orders: OrderStore,
        participants: ParticipantDirectory,
        events: EventLog,
    ) -> Self {
        Self {
            db,
            orders,
            participants,
            events,
        }
    }

    /// Validate, reserve, persist, and (for buys) attempt one synchronous
    /// match. A failed match attempt never fails creation.
    pub async fn create_offer(
        &self,
        owner_id: i64,
        req: CreateOfferRequest,
    ) -> ApiResult<Offer> {
        let now = Utc::now();
        validate_offer_request(&req, now)?;

        let quantity = req
            .quantity_kwh
            .round_dp_with_strategy(3, RoundingStrategy::MidpointAwayFromZero);
        let price = req
            .price_per_kwh
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);

        let (weight_price, weight_distance, weight_trust) = match req.side {
            OfferSide::Buy => {
                let w = Weights::new(req.weight_price, req.weight_distance, req.weight_trust);
                (Some(w.price), Some(w.distance), Some(w.trust))
            }
            OfferSide::Sell => (None, None, None),
        };

        let offer = Offer {
            id: Uuid::new_v4(),
            owner_id,
            side: req.side,
            price_per_kwh: price,
            quantity_kwh: quantity,
            start_time: req.start_time,
            end_time: req.end_time,
            status: OfferStatus::Active,
            weight_price,
            weight_distance,
            weight_trust,
            created_at: now,
        };

        // Reservation and insert commit together: no offer row ever exists
        // without its escrow hold, and vice versa.
        let mut tx = self.db.begin().await?;
        match offer.side {
            OfferSide::Buy => {
                WalletLedger::reserve_on(
                    &mut *tx,
                    owner_id,
                    WalletResource::Currency,
                    required_funds(price, quantity),
                )
                .await?;
            }
            OfferSide::Sell => {
                WalletLedger::reserve_on(&mut *tx, owner_id, WalletResource::Energy, quantity)
                    .await?;
            }
        }
        OrderStore::insert_on(&mut *tx, &offer)
            .await
            .map_err(ApiError::Internal)?;
        tx.commit().await?;

        info!(
            offer_id = %offer.id,
            owner_id,
            side = offer.side.as_str(),
            price = %offer.price_per_kwh,
            quantity = %offer.quantity_kwh,
            "offer created"
        );

        self.events
            .log(
                owner_id,
                EventEntity::Order,
                offer.id,
                ORDER_CREATED,
                json!({
                    "side": offer.side.as_str(),
                    "status": offer.status.as_str(),
                    "pricePerKwh": offer.price_per_kwh,
                    "quantityKwh": offer.quantity_kwh,
                    "startTime": offer.start_time,
                    "endTime": offer.end_time,
                    "requiredOverlapMin": required_overlap_minutes(offer.quantity_kwh),
                }),
            )
            .await;

        if offer.side == OfferSide::Buy {
            if let Err(e) = self.try_match_offer(offer.id).await {
                error!(offer_id = %offer.id, "immediate match attempt failed: {:#}", e);
            }
        }

        Ok(offer)
    }

    /// Cancel the caller's own offer. Allowed only from ACTIVE or EXPIRED;
    /// the conditional delete means a concurrent match attempt and this
    /// cancellation cannot both win.
    pub async fn cancel_offer(&self, participant_id: i64, offer_id: Uuid) -> ApiResult<()> {
        let offer = self
            .orders
            .find_by_id(offer_id)
            .await
            .map_err(ApiError::Internal)?
            .ok_or_else(|| ApiError::NotFound(format!("offer {offer_id} not found")))?;

        if offer.owner_id != participant_id {
            return Err(ApiError::Forbidden(
                "offer belongs to another participant".to_string(),
            ));
        }

        if !matches!(offer.status, OfferStatus::Active | OfferStatus::Expired) {
            return Err(ApiError::InvalidState(format!(
                "only ACTIVE or EXPIRED offers can be cancelled (current: {})",
                offer.status.as_str()
            )));
        }

        let mut tx = self.db.begin().await?;
        let deleted = OrderStore::delete_if_cancellable(&mut *tx, offer_id)
            .await
            .map_err(ApiError::Internal)?;
        if !deleted {
            // A concurrent match claimed the offer between the read and here.
            return Err(ApiError::InvalidState(
                "offer was claimed by a concurrent match".to_string(),
            ));
        }
        Self::release_reservation_on(&mut *tx, &offer).await?;
        tx.commit().await?;

        info!(offer_id = %offer_id, participant_id, "offer cancelled");

        self.events
            .log(
                participant_id,
                EventEntity::Order,
                offer_id,
                ORDER_CANCELLED,
                json!({
                    "side": offer.side.as_str(),
                    "statusAtCancel": offer.status.as_str(),
                    "pricePerKwh": offer.price_per_kwh,
                    "quantityKwh": offer.quantity_kwh,
                    "startTime": offer.start_time,
                    "endTime": offer.end_time,
                }),
            )
            .await;

        Ok(())
    }

    /// One sweep over all open buy offers, oldest first. Sell offers are
    /// passive; they only match as a side effect of a buy attempt.
    pub async fn run_match_sweep(&self) -> Result<usize> {
        let now = Utc::now();
        let buy_ids = self.orders.find_active_buy_offer_ids(now).await?;
        if buy_ids.is_empty() {
            return Ok(0);
        }

        debug!("match sweep over {} open buy offers", buy_ids.len());

        let mut matched = 0;
        for id in buy_ids {
            match self.try_match_offer(id).await {
                Ok(Some(_)) => matched += 1,
                Ok(None) => {}
                // One bad row must not stop the batch.
                Err(e) => error!(offer_id = %id, "match attempt failed: {:#}", e),
            }
        }

        Ok(matched)
    }

    /// Attempt to match one buy offer: pool -> score all unlocked -> lock
    /// top-K -> re-score survivors -> execute against the winner.
    pub async fn try_match_offer(&self, buy_id: Uuid) -> Result<Option<Uuid>> {
        let now = Utc::now();

        let Some(buy) = self.orders.find_by_id(buy_id).await? else {
            return Ok(None);
        };
        if buy.status != OfferStatus::Active || buy.side != OfferSide::Buy {
            return Ok(None);
        }
        // Past-window offers belong to the expiry sweep, not to matching.
        if buy.end_time <= now {
            return Ok(None);
        }

        let Some(buyer) = self.participants.find(buy.owner_id).await? else {
            return Ok(None);
        };

        let required_min = required_overlap_minutes(buy.quantity_kwh);
        let pool = self
            .orders
            .find_sell_candidates(&buy, now, required_min)
            .await?;
        if pool.is_empty() {
            return Ok(None);
        }

        let seller_ids: Vec<i64> = {
            let mut ids: Vec<i64> = pool.iter().map(|o| o.owner_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let sellers: HashMap<i64, Participant> =
            self.participants.find_many(&seller_ids).await?;

        let bounds = SlackBounds::from_candidates(buy.price_per_kwh, &pool);
        let top_ids = scoring::rank_top_k(&buy, &buyer, &pool, &sellers, bounds, LOCK_TOP_K);
        if top_ids.is_empty() {
            return Ok(None);
        }

        // From here on we hold row locks; keep the transaction short.
        let mut tx = self.db.begin().await?;
        let locked = OrderStore::lock_top_candidates(&mut *tx, &top_ids).await?;
        let Some(best) = scoring::select_best(&buy, &buyer, &locked, &sellers, bounds) else {
            tx.rollback().await?;
            return Ok(None);
        };
        let best = best.clone();

        let attempt = Self::execute_match(&mut *tx, &buy, &best, required_min).await?;
        tx.commit().await?;

        match attempt {
            MatchAttempt::Matched(trade) => {
                info!(
                    trade_id = %trade.id,
                    buy_offer = %buy.id,
                    sell_offer = %best.id,
                    price = %trade.price_per_kwh,
                    quantity = %trade.quantity_kwh,
                    "match executed"
                );
                self.emit_match_events(&buy, &best, &trade, required_min).await;
                Ok(Some(trade.id))
            }
            MatchAttempt::Lost => Ok(None),
        }
    }

    /// The atomic core: recheck, intersect windows, CAS both sides, create
    /// the trade, release over-reservations. Runs inside the caller's
    /// transaction, which already holds the sell row's lock.
    async fn execute_match(
        conn: &mut PgConnection,
        buy: &Offer,
        sell: &Offer,
        required_min: i64,
    ) -> Result<MatchAttempt> {
        // Cheap guard before the CAS.
        if buy.status != OfferStatus::Active || sell.status != OfferStatus::Active {
            return Ok(MatchAttempt::Lost);
        }

        let delivery_start = buy.start_time.max(sell.start_time);
        let delivery_end = buy.end_time.min(sell.end_time);
        let overlap_min = (delivery_end - delivery_start).num_minutes();
        if overlap_min < required_min {
            return Ok(MatchAttempt::Lost);
        }

        if !OrderStore::conditional_transition(
            conn,
            buy.id,
            OfferStatus::Active,
            OfferStatus::Matched,
        )
        .await?
        {
            // Someone else claimed the buy side; nothing to undo.
            return Ok(MatchAttempt::Lost);
        }

        if !OrderStore::conditional_transition(
            conn,
            sell.id,
            OfferStatus::Active,
            OfferStatus::Matched,
        )
        .await?
        {
            // The one permitted reverse transition: the buy CAS already
            // landed, so compensate it back to ACTIVE.
            OrderStore::conditional_transition(
                conn,
                buy.id,
                OfferStatus::Matched,
                OfferStatus::Active,
            )
            .await?;
            return Ok(MatchAttempt::Lost);
        }

        // Executed at the sell price for the buy quantity.
        let trade = Trade {
            id: Uuid::new_v4(),
            buy_offer_id: buy.id,
            sell_offer_id: sell.id,
            price_per_kwh: sell.price_per_kwh,
            quantity_kwh: buy.quantity_kwh,
            delivery_start,
            delivery_end,
            status: TradeStatus::Matched,
            created_at: Utc::now(),
            completed_at: None,
        };
        Self::insert_trade(conn, &trade).await?;

        // The buyer reserved at their own ceiling price; hand back the
        // difference to the executed price.
        let excess_funds = buyer_excess(buy.price_per_kwh, sell.price_per_kwh, buy.quantity_kwh);
        if excess_funds > Decimal::ZERO {
            WalletLedger::release_on(conn, buy.owner_id, WalletResource::Currency, excess_funds)
                .await
                .map_err(|e| anyhow::anyhow!("buyer excess release failed: {e}"))?;
        }

        // The seller may have listed more than the buy quantity.
        let excess_energy = sell.quantity_kwh - buy.quantity_kwh;
        if excess_energy > Decimal::ZERO {
            WalletLedger::release_on(conn, sell.owner_id, WalletResource::Energy, excess_energy)
                .await
                .map_err(|e| anyhow::anyhow!("seller excess release failed: {e}"))?;
        }

        Ok(MatchAttempt::Matched(trade))
    }

    async fn insert_trade(conn: &mut PgConnection, trade: &Trade) -> Result<()> {
        sqlx::query(
            "INSERT INTO trades (id, buy_offer_id, sell_offer_id, price_per_kwh, quantity_kwh, \
             delivery_start, delivery_end, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(trade.id)
        .bind(trade.buy_offer_id)
        .bind(trade.sell_offer_id)
        .bind(trade.price_per_kwh)
        .bind(trade.quantity_kwh)
        .bind(trade.delivery_start)
        .bind(trade.delivery_end)
        .bind(trade.status)
        .bind(trade.created_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// ORDER_MATCHED and TRADE_CREATED, once per side.
    async fn emit_match_events(&self, buy: &Offer, sell: &Offer, trade: &Trade, required_min: i64) {
        let actual_min = (trade.delivery_end - trade.delivery_start).num_minutes();

        for (owner, own_offer, counterpart) in [
            (buy.owner_id, buy.id, sell.id),
            (sell.owner_id, sell.id, buy.id),
        ] {
            self.events
                .log(
                    owner,
                    EventEntity::Order,
                    own_offer,
                    ORDER_MATCHED,
                    json!({
                        "matchedWithOfferId": counterpart,
                        "executedPrice": trade.price_per_kwh,
                        "executedQuantityKwh": trade.quantity_kwh,
                        "deliveryStart": trade.delivery_start,
                        "deliveryEnd": trade.delivery_end,
                        "requiredOverlapMin": required_min,
                        "actualOverlapMin": actual_min,
                        "tradeId": trade.id,
                    }),
                )
                .await;
        }

        for owner in [buy.owner_id, sell.owner_id] {
            self.events
                .log(
                    owner,
                    EventEntity::Trade,
                    trade.id,
                    TRADE_CREATED,
                    json!({
                        "buyOfferId": buy.id,
                        "sellOfferId": sell.id,
                        "pricePerKwh": trade.price_per_kwh,
                        "quantityKwh": trade.quantity_kwh,
                        "deliveryStart": trade.delivery_start,
                        "deliveryEnd": trade.delivery_end,
                    }),
                )
                .await;
        }
    }

    /// Release the full escrow held for an offer (used by cancel/expiry).
    pub async fn release_reservation_on(conn: &mut PgConnection, offer: &Offer) -> ApiResult<()> {
        match offer.side {
            OfferSide::Buy => {
                WalletLedger::release_on(
                    conn,
                    offer.owner_id,
                    WalletResource::Currency,
                    required_funds(offer.price_per_kwh, offer.quantity_kwh),
                )
                .await
            }
            OfferSide::Sell => {
                WalletLedger::release_on(
                    conn,
                    offer.owner_id,
                    WalletResource::Energy,
                    offer.quantity_kwh,
                )
                .await
            }
        }
    }
}

/// Funds the buyer over-reserved at their ceiling price, rounded to the
/// currency scale.
pub fn buyer_excess(buy_price: Decimal, executed_price: Decimal, quantity: Decimal) -> Decimal {
    required_funds(buy_price, quantity) - required_funds(executed_price, quantity)
}

/// Synchronous input checks for offer creation: nothing is persisted or
/// reserved when any of these fail.
pub fn validate_offer_request(req: &CreateOfferRequest, now: DateTime<Utc>) -> ApiResult<()> {
    if req.quantity_kwh <= Decimal::ZERO {
        return Err(ApiError::validation_error(
            "quantity_kwh must be positive",
            Some("quantity_kwh"),
        ));
    }
    if req.price_per_kwh <= Decimal::ZERO {
        return Err(ApiError::validation_error(
            "price_per_kwh must be positive",
            Some("price_per_kwh"),
        ));
    }
    if req.end_time <= req.start_time {
        return Err(ApiError::validation_error(
            "end_time must be after start_time",
            Some("end_time"),
        ));
    }
    if req.end_time <= now {
        return Err(ApiError::validation_error(
            "end_time must be in the future",
            Some("end_time"),
        ));
    }
    for (value, field) in [
        (req.weight_price, "weight_price"),
        (req.weight_distance, "weight_distance"),
        (req.weight_trust, "weight_trust"),
    ] {
        if let Some(w) = value {
            if !w.is_finite() || w < 0.0 {
                return Err(ApiError::validation_error(
                    format!("{field} must be a non-negative number"),
                    Some(field),
                ));
            }
        }
    }

    let min_end = min_end_time(req.start_time, req.quantity_kwh);
    if req.end_time < min_end {
        return Err(ApiError::window_too_short(format!(
            "delivery window too short for {} kWh; earliest acceptable end_time is {}",
            req.quantity_kwh,
            min_end.to_rfc3339()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn request(side: OfferSide, price: &str, qty: &str, minutes: i64) -> CreateOfferRequest {
        let start = Utc::now() + Duration::minutes(5);
        CreateOfferRequest {
            side,
            price_per_kwh: dec(price),
            quantity_kwh: dec(qty),
            start_time: start,
            end_time: start + Duration::minutes(minutes),
            weight_price: None,
            weight_distance: None,
            weight_trust: None,
        }
    }

    #[test]
    fn buyer_excess_covers_price_difference() {
        // Buyer at 200, executed at 180, 5.000 kWh -> 100.00 released.
        assert_eq!(
            buyer_excess(dec("200.00"), dec("180.00"), dec("5.000")),
            dec("100.00")
        );
        // No excess when executed at the ceiling.
        assert_eq!(
            buyer_excess(dec("180.00"), dec("180.00"), dec("5.000")),
            Decimal::ZERO
        );
    }

    #[test]
    fn rejects_window_shorter_than_required() {
        // 7.0 kWh needs 70 minutes; 69 is rejected, 70 accepted.
        let too_short = request(OfferSide::Buy, "200.00", "7.000", 69);
        let err = validate_offer_request(&too_short, Utc::now()).unwrap_err();
        assert!(matches!(err, ApiError::Validation { .. }));

        let exact = request(OfferSide::Buy, "200.00", "7.000", 70);
        assert!(validate_offer_request(&exact, Utc::now()).is_ok());
    }

    #[test]
    fn rejects_non_positive_amounts() {
        let mut req = request(OfferSide::Sell, "200.00", "5.000", 120);
        req.quantity_kwh = Decimal::ZERO;
        assert!(validate_offer_request(&req, Utc::now()).is_err());

        let mut req = request(OfferSide::Sell, "200.00", "5.000", 120);
        req.price_per_kwh = dec("-1");
        assert!(validate_offer_request(&req, Utc::now()).is_err());
    }

    #[test]
    fn rejects_inverted_or_past_windows() {
        let mut req = request(OfferSide::Buy, "200.00", "1.000", 60);
        req.end_time = req.start_time - Duration::minutes(1);
        assert!(validate_offer_request(&req, Utc::now()).is_err());

        let mut req = request(OfferSide::Buy, "200.00", "1.000", 60);
        req.start_time = Utc::now() - Duration::hours(3);
        req.end_time = Utc::now() - Duration::hours(2);
        assert!(validate_offer_request(&req, Utc::now()).is_err());
    }

    #[test]
    fn rejects_negative_weights() {
        let mut req = request(OfferSide::Buy, "200.00", "1.000", 60);
        req.weight_price = Some(-0.5);
        assert!(validate_offer_request(&req, Utc::now()).is_err());
    }
}
