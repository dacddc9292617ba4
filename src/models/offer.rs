use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::services::scoring::Weights;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "offer_side", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OfferSide {
    Buy,
    Sell,
}

impl OfferSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferSide::Buy => "buy",
            OfferSide::Sell => "sell",
        }
    }
}

/// Offer lifecycle: ACTIVE -> MATCHED -> RUNNING -> COMPLETED, with the
/// side-branch ACTIVE -> EXPIRED. Transitions happen only through
/// conditional updates (see `OrderStore::conditional_transition`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "offer_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OfferStatus {
    Active,
    Matched,
    Running,
    Expired,
    Completed,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Active => "ACTIVE",
            OfferStatus::Matched => "MATCHED",
            OfferStatus::Running => "RUNNING",
            OfferStatus::Expired => "EXPIRED",
            OfferStatus::Completed => "COMPLETED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Offer {
    pub id: Uuid,
    pub owner_id: i64,
    pub side: OfferSide,
    #[schema(value_type = String, example = "185.00")]
    pub price_per_kwh: Decimal,
    #[schema(value_type = String, example = "5.000")]
    pub quantity_kwh: Decimal,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: OfferStatus,
    pub weight_price: Option<f64>,
    pub weight_distance: Option<f64>,
    pub weight_trust: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Offer {
    /// Preference weights for a buy offer, with defaults applied and the
    /// sum re-normalized to 1. Sell offers carry no weights.
    pub fn weights(&self) -> Weights {
        Weights::new(self.weight_price, self.weight_distance, self.weight_trust)
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOfferRequest {
    pub side: OfferSide,

    #[schema(value_type = String, example = "200.00")]
    pub price_per_kwh: Decimal,

    #[schema(value_type = String, example = "5.000")]
    pub quantity_kwh: Decimal,

    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,

    /// Buy-side preference weights. Optional; default to 0.6 / 0.3 / 0.1
    /// and are normalized to sum to 1 before persisting.
    #[validate(range(min = 0.0))]
    pub weight_price: Option<f64>,
    #[validate(range(min = 0.0))]
    pub weight_distance: Option<f64>,
    #[validate(range(min = 0.0))]
    pub weight_trust: Option<f64>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
pub struct MinEndTimeQuery {
    pub start_time: DateTime<Utc>,
    #[param(value_type = String, example = "5.000")]
    #[schema(value_type = String)]
    pub quantity_kwh: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MinEndTimeResponse {
    pub min_end_time: DateTime<Utc>,
    pub required_minutes: i64,
}
