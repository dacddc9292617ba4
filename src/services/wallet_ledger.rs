//! Balance Ledger: the only code path that mutates wallet rows.
//!
//! Every operation takes an exclusive row lock on the target wallet for the
//! duration of its transaction, so concurrent reserve/release calls on the
//! same wallet serialize while different wallets never block each other.
//! The `_on` variants run against a caller-supplied connection so the
//! matching engine and expiry sweep can fold wallet updates into their own
//! transactions.

use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use crate::error::{ApiError, Result};
use crate::models::{Wallet, WalletResource};

/// Currency needed to cover `quantity` at `price`, rounded to 2 decimals.
pub fn required_funds(price_per_kwh: Decimal, quantity_kwh: Decimal) -> Decimal {
    (price_per_kwh * quantity_kwh).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

fn round_amount(amount: Decimal, resource: WalletResource) -> Decimal {
    amount.round_dp_with_strategy(resource.scale(), RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Clone)]
pub struct WalletLedger {
    db: PgPool,
}

impl WalletLedger {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Read a wallet without creating it; absent rows read as zero balances.
    pub async fn get(&self, participant_id: i64, resource: WalletResource) -> Result<Wallet> {
        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT participant_id, resource, total, locked, updated_at
             FROM wallets WHERE participant_id = $1 AND resource = $2",
        )
        .bind(participant_id)
        .bind(resource)
        .fetch_optional(&self.db)
        .await?;

        Ok(wallet.unwrap_or_else(|| Wallet::empty(participant_id, resource)))
    }

    pub async fn reserve(
        &self,
        participant_id: i64,
        resource: WalletResource,
        amount: Decimal,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;
        Self::reserve_on(&mut *tx, participant_id, resource, amount).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn release(
        &self,
        participant_id: i64,
        resource: WalletResource,
        amount: Decimal,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;
        Self::release_on(&mut *tx, participant_id, resource, amount).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Increase (deposit) or decrease `total`. A decrease that would drop
    /// `total` below the currently locked amount is rejected.
    pub async fn adjust_total(
        &self,
        participant_id: i64,
        resource: WalletResource,
        delta: Decimal,
    ) -> Result<Wallet> {
        let delta = round_amount(delta, resource);
        let mut tx = self.db.begin().await?;

        let wallet = Self::lock_wallet(&mut *tx, participant_id, resource).await?;
        let new_total = wallet.total + delta;
        if new_total < wallet.locked {
            return Err(ApiError::InvalidState(format!(
                "total cannot drop below locked amount ({})",
                wallet.locked
            )));
        }

        sqlx::query(
            "UPDATE wallets SET total = $1, updated_at = NOW()
             WHERE participant_id = $2 AND resource = $3",
        )
        .bind(new_total)
        .bind(participant_id)
        .bind(resource)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut updated = wallet;
        updated.total = new_total;
        Ok(updated)
    }

    /// Place a hold on `amount`; fails with `InsufficientBalance` when the
    /// available balance (`total - locked`) does not cover it.
    pub async fn reserve_on(
        conn: &mut PgConnection,
        participant_id: i64,
        resource: WalletResource,
        amount: Decimal,
    ) -> Result<()> {
        let amount = round_amount(amount, resource);
        let wallet = Self::lock_wallet(conn, participant_id, resource).await?;

        let available = wallet.available();
        if available < amount {
            return Err(ApiError::InsufficientBalance {
                required: amount.to_string(),
                available: available.to_string(),
            });
        }

        sqlx::query(
            "UPDATE wallets SET locked = locked + $1, updated_at = NOW()
             WHERE participant_id = $2 AND resource = $3",
        )
        .bind(amount)
        .bind(participant_id)
        .bind(resource)
        .execute(conn)
        .await?;

        debug!(
            participant_id,
            resource = resource.as_str(),
            %amount,
            "reserved balance"
        );
        Ok(())
    }

    /// Release a hold, floored at zero so a double release cannot drive
    /// `locked` negative.
    pub async fn release_on(
        conn: &mut PgConnection,
        participant_id: i64,
        resource: WalletResource,
        amount: Decimal,
    ) -> Result<()> {
        let amount = round_amount(amount, resource);
        if amount <= Decimal::ZERO {
            return Ok(());
        }

        let wallet = Self::lock_wallet(conn, participant_id, resource).await?;
        let next_locked = (wallet.locked - amount).max(Decimal::ZERO);

        sqlx::query(
            "UPDATE wallets SET locked = $1, updated_at = NOW()
             WHERE participant_id = $2 AND resource = $3",
        )
        .bind(next_locked)
        .bind(participant_id)
        .bind(resource)
        .execute(conn)
        .await?;

        debug!(
            participant_id,
            resource = resource.as_str(),
            %amount,
            "released balance"
        );
        Ok(())
    }

    /// Lock the wallet row exclusively, creating it with zero balances on
    /// first use.
    async fn lock_wallet(
        conn: &mut PgConnection,
        participant_id: i64,
        resource: WalletResource,
    ) -> Result<Wallet> {
        sqlx::query(
            "INSERT INTO wallets (participant_id, resource) VALUES ($1, $2)
             ON CONFLICT (participant_id, resource) DO NOTHING",
        )
        .bind(participant_id)
        .bind(resource)
        .execute(&mut *conn)
        .await?;

        let wallet = sqlx::query_as::<_, Wallet>(
            "SELECT participant_id, resource, total, locked, updated_at
             FROM wallets WHERE participant_id = $1 AND resource = $2
             FOR UPDATE",
        )
        .bind(participant_id)
        .bind(resource)
        .fetch_one(conn)
        .await?;

        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn required_funds_rounds_to_currency_scale() {
        assert_eq!(required_funds(dec("200.00"), dec("5.000")), dec("1000.00"));
        // 185.55 * 3.333 = 618.43815 -> 618.44
        assert_eq!(required_funds(dec("185.55"), dec("3.333")), dec("618.44"));
    }

    #[test]
    fn amounts_round_per_resource_scale() {
        assert_eq!(
            round_amount(dec("10.005"), WalletResource::Currency),
            dec("10.01")
        );
        assert_eq!(
            round_amount(dec("10.0005"), WalletResource::Energy),
            dec("10.001")
        );
    }
}
