use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

/// The two escrowable resources. Currency balances are kept at 2 decimal
/// places, energy at 3; the ledger rounds before every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "wallet_resource", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WalletResource {
    Currency,
    Energy,
}

impl WalletResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletResource::Currency => "currency",
            WalletResource::Energy => "energy",
        }
    }

    /// Decimal scale amounts of this resource are rounded to.
    pub fn scale(&self) -> u32 {
        match self {
            WalletResource::Currency => 2,
            WalletResource::Energy => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Wallet {
    pub participant_id: i64,
    pub resource: WalletResource,
    #[schema(value_type = String)]
    pub total: Decimal,
    #[schema(value_type = String)]
    pub locked: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn available(&self) -> Decimal {
        self.total - self.locked
    }

    pub fn empty(participant_id: i64, resource: WalletResource) -> Self {
        Self {
            participant_id,
            resource,
            total: Decimal::ZERO,
            locked: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WalletResponse {
    pub resource: WalletResource,
    #[schema(value_type = String)]
    pub total: Decimal,
    #[schema(value_type = String)]
    pub locked: Decimal,
    #[schema(value_type = String)]
    pub available: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl From<Wallet> for WalletResponse {
    fn from(w: Wallet) -> Self {
        Self {
            resource: w.resource,
            total: w.total,
            locked: w.locked,
            available: w.available(),
            updated_at: w.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChargeRequest {
    #[schema(value_type = String, example = "1000.00")]
    pub amount: Decimal,
}
