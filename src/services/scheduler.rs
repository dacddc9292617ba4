//! Lifecycle schedulers: three independent interval loops driving the
//! match sweep, offer expiry, and trade promotion.
//!
//! Each loop carries its own single-flight guard; a tick that finds the
//! previous sweep still running is skipped rather than queued, so a slow
//! database never piles up overlapping sweeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::models::{EventEntity, Offer};
use crate::services::event_log::{EventLog, ORDER_EXPIRED};
use crate::services::matching::MatchingEngine;
use crate::services::order_store::OrderStore;

/// Ticker for the sweep loops. Missed ticks are delayed, not burst: a
/// sweep that overruns its period resumes one full period after it
/// finishes instead of re-firing back-to-back.
fn sweep_ticker(period: Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub struct Scheduler {
    db: PgPool,
    config: SchedulerConfig,
    engine: MatchingEngine,
    orders: OrderStore,
    events: EventLog,
    is_running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        db: PgPool,
        config: SchedulerConfig,
        engine: MatchingEngine,
        orders: OrderStore,
        events: EventLog,
    ) -> Self {
        Self {
            db,
            config,
            engine,
            orders,
            events,
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the three loops. Idempotent; a second call is a no-op.
    pub fn start(&self) {
        if self
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("schedulers already running");
            return;
        }

        info!(
            match_interval_secs = self.config.match_interval_secs,
            expiry_interval_secs = self.config.expiry_interval_secs,
            promotion_interval_secs = self.config.promotion_interval_secs,
            "starting lifecycle schedulers"
        );

        self.spawn_match_sweep();
        self.spawn_expiry_sweep();
        self.spawn_trade_promotion();
    }

    pub fn stop(&self) {
        info!("stopping lifecycle schedulers");
        self.is_running.store(false, Ordering::SeqCst);
    }

    fn spawn_match_sweep(&self) {
        let engine = self.engine.clone();
        let running = self.is_running.clone();
        let in_flight = Arc::new(AtomicBool::new(false));
        let period = Duration::from_secs(self.config.match_interval_secs);

        tokio::spawn(async move {
            let mut ticker = sweep_ticker(period);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    debug!("match sweep still running, skipping tick");
                    continue;
                }

                match engine.run_match_sweep().await {
                    Ok(0) => {}
                    Ok(n) => info!(matched = n, "match sweep completed"),
                    Err(e) => error!("match sweep failed: {:#}", e),
                }

                in_flight.store(false, Ordering::SeqCst);
            }
            info!("match sweep loop stopped");
        });
    }

    fn spawn_expiry_sweep(&self) {
        let db = self.db.clone();
        let orders = self.orders.clone();
        let events = self.events.clone();
        let running = self.is_running.clone();
        let in_flight = Arc::new(AtomicBool::new(false));
        let period = Duration::from_secs(self.config.expiry_interval_secs);
        let batch_size = self.config.expiry_batch_size;

        tokio::spawn(async move {
            let mut ticker = sweep_ticker(period);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    debug!("expiry sweep still running, skipping tick");
                    continue;
                }

                match Self::run_expiry_sweep(&db, &orders, &events, batch_size).await {
                    Ok(0) => {}
                    Ok(n) => info!(expired = n, "expiry sweep completed"),
                    Err(e) => error!("expiry sweep failed: {:#}", e),
                }

                in_flight.store(false, Ordering::SeqCst);
            }
            info!("expiry sweep loop stopped");
        });
    }

    fn spawn_trade_promotion(&self) {
        let db = self.db.clone();
        let running = self.is_running.clone();
        let in_flight = Arc::new(AtomicBool::new(false));
        let period = Duration::from_secs(self.config.promotion_interval_secs);

        tokio::spawn(async move {
            let mut ticker = sweep_ticker(period);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if in_flight
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    debug!("trade promotion still running, skipping tick");
                    continue;
                }

                match Self::run_trade_promotion(&db).await {
                    Ok(0) => {}
                    Ok(n) => info!(promoted = n, "trade promotion completed"),
                    Err(e) => error!("trade promotion failed: {:#}", e),
                }

                in_flight.store(false, Ordering::SeqCst);
            }
            info!("trade promotion loop stopped");
        });
    }

    /// Expire one batch of past-window ACTIVE offers. Each offer gets its
    /// own transaction so one poisoned row cannot hold the batch back, and
    /// the reservation is only released when this sweep's CAS actually won.
    pub async fn run_expiry_sweep(
        db: &PgPool,
        orders: &OrderStore,
        events: &EventLog,
        batch_size: i64,
    ) -> Result<usize> {
        let now = Utc::now();
        let expirable = orders.find_expirable(now, batch_size).await?;
        if expirable.is_empty() {
            return Ok(0);
        }

        let mut expired = 0;
        for offer in &expirable {
            match Self::expire_one(db, offer).await {
                Ok(true) => {
                    expired += 1;
                    Self::emit_expired_event(events, offer).await;
                }
                Ok(false) => {} // lost the race to a match or a cancel
                Err(e) => error!(offer_id = %offer.id, "expiry failed: {:#}", e),
            }
        }

        Ok(expired)
    }

    async fn expire_one(db: &PgPool, offer: &Offer) -> Result<bool> {
        use crate::models::OfferStatus;

        let mut tx = db.begin().await?;
        let won = OrderStore::conditional_transition(
            &mut *tx,
            offer.id,
            OfferStatus::Active,
            OfferStatus::Expired,
        )
        .await?;
        if won {
            MatchingEngine::release_reservation_on(&mut *tx, offer)
                .await
                .map_err(|e| anyhow::anyhow!("release on expiry failed: {e}"))?;
        }
        tx.commit().await?;

        Ok(won)
    }

    async fn emit_expired_event(events: &EventLog, offer: &Offer) {
        events
            .log(
                offer.owner_id,
                EventEntity::Order,
                offer.id,
                ORDER_EXPIRED,
                json!({
                    "side": offer.side.as_str(),
                    "pricePerKwh": offer.price_per_kwh,
                    "quantityKwh": offer.quantity_kwh,
                    "endTime": offer.end_time,
                }),
            )
            .await;
    }

    /// Promote MATCHED trades whose delivery window has opened, cascading
    /// the constituent offers to RUNNING in the same transaction.
    async fn run_trade_promotion(db: &PgPool) -> Result<usize> {
        let now = Utc::now();
        let mut tx = db.begin().await?;

        let rows: Vec<(Uuid, Uuid, Uuid)> = sqlx::query_as(
            "UPDATE trades SET status = 'RUNNING'
             WHERE status = 'MATCHED' AND delivery_start <= $1
             RETURNING id, buy_offer_id, sell_offer_id",
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(0);
        }

        let offer_ids: Vec<Uuid> = rows
            .iter()
            .flat_map(|(_, buy, sell)| [*buy, *sell])
            .collect();
        OrderStore::promote_offers_to_running(&mut *tx, &offer_ids).await?;

        tx.commit().await?;
        Ok(rows.len())
    }
}
