pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod openapi;
pub mod services;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post};
use axum::{Json, Router};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::config::Config;
use crate::services::{
    EventLog, MatchingEngine, OrderStore, ParticipantDirectory, Scheduler, WalletLedger,
};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub ledger: WalletLedger,
    pub orders: OrderStore,
    pub participants: ParticipantDirectory,
    pub events: EventLog,
    pub matching: MatchingEngine,
}

impl AppState {
    pub fn new(db: PgPool, config: Config) -> Self {
        let ledger = WalletLedger::new(db.clone());
        let orders = OrderStore::new(db.clone());
        let participants = ParticipantDirectory::new(db.clone());
        let events = EventLog::new(db.clone());
        let matching = MatchingEngine::new(
            db.clone(),
            orders.clone(),
            participants.clone(),
            events.clone(),
        );

        Self {
            db,
            config: Arc::new(config),
            ledger,
            orders,
            participants,
            events,
            matching,
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.db.clone(),
            self.config.scheduler.clone(),
            self.matching.clone(),
            self.orders.clone(),
            self.events.clone(),
        )
    }
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/offers", post(handlers::orders::create_offer))
        .route("/offers/open", get(handlers::orders::list_open_offers))
        .route(
            "/offers/completed",
            get(handlers::orders::list_completed_offers),
        )
        .route(
            "/offers/min-end-time",
            get(handlers::orders::get_min_end_time),
        )
        .route("/offers/{id}", delete(handlers::orders::cancel_offer))
        .route("/wallets/{resource}", get(handlers::wallets::get_wallet))
        .route(
            "/wallets/{resource}/charge",
            post(handlers::wallets::charge_wallet),
        );

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(openapi::ApiDoc::openapi()) }),
        )
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
